//! Compile-time configuration defaults
//!
//! Generated by build.rs: library defaults, overridden by the file named
//! in `JF_CONFIG_RS` when it is set at build time.

include!(concat!(env!("OUT_DIR"), "/jf_merged_config.rs"));
