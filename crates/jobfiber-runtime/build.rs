//! Build script for jobfiber-runtime
//!
//! Produces `OUT_DIR/jf_merged_config.rs`:
//! 1. Library defaults below
//! 2. With the `custom-config` feature, if `JF_CONFIG_RS` names a file,
//!    its `pub const` lines override them
//!
//! The override file only needs the values it changes.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;

struct ConfigParam {
    name: &'static str,
    rust_type: &'static str,
    default_value: &'static str,
}

const CONFIG_PARAMS: &[ConfigParam] = &[
    // 0 = one worker per available CPU
    ConfigParam { name: "NUM_WORKERS", rust_type: "usize", default_value: "0" },
    ConfigParam { name: "MAX_JOBS_PER_THREAD", rust_type: "usize", default_value: "256" },
    ConfigParam { name: "STACK_SIZE", rust_type: "usize", default_value: "256 * 1024" },
    ConfigParam { name: "STACK_POOL_SIZE", rust_type: "usize", default_value: "16" },
    ConfigParam { name: "DEBUG_LOGGING", rust_type: "bool", default_value: "false" },
];

fn main() {
    let out_dir = env::var("OUT_DIR").expect("OUT_DIR not set");
    let dest_path = Path::new(&out_dir).join("jf_merged_config.rs");

    let mut config: BTreeMap<&str, String> = CONFIG_PARAMS
        .iter()
        .map(|p| (p.name, p.default_value.to_string()))
        .collect();

    let custom = env::var_os("CARGO_FEATURE_CUSTOM_CONFIG").is_some();
    let user_path = env::var("JF_CONFIG_RS").ok().filter(|_| custom);
    if !custom && env::var_os("JF_CONFIG_RS").is_some() {
        println!("cargo:warning=JF_CONFIG_RS ignored: enable the custom-config feature");
    }
    if let Some(path) = &user_path {
        println!("cargo:rerun-if-changed={}", path);
        match fs::read_to_string(path) {
            Ok(content) => {
                merge_overrides(&content, &mut config);
                println!("cargo:warning=Using custom config: {}", path);
            }
            Err(e) => println!("cargo:warning=Failed to read JF_CONFIG_RS ({}): {}", path, e),
        }
    }
    println!("cargo:rerun-if-env-changed=JF_CONFIG_RS");

    let output = render(&config, user_path.is_some());
    fs::write(&dest_path, output).expect("Failed to write merged config");
}

fn merge_overrides(content: &str, config: &mut BTreeMap<&str, String>) {
    for line in content.lines().map(str::trim) {
        if line.starts_with("//") {
            continue;
        }
        let Some((name, value)) = parse_const_line(line) else {
            continue;
        };
        match CONFIG_PARAMS.iter().find(|p| p.name == name) {
            Some(param) => {
                config.insert(param.name, value);
            }
            None => println!("cargo:warning=Unknown config parameter: {}", name),
        }
    }
}

/// Split `pub const NAME: TYPE = VALUE;` into `(NAME, VALUE)`
fn parse_const_line(line: &str) -> Option<(String, String)> {
    let rest = line.strip_prefix("pub const ")?.trim();
    let (name, rest) = rest.split_once(':')?;
    let (_, value) = rest.split_once('=')?;
    let value = value.trim().trim_end_matches(';').trim();
    Some((name.trim().to_string(), value.to_string()))
}

fn render(config: &BTreeMap<&str, String>, has_user_file: bool) -> String {
    let mut output = String::from("// Auto-generated by build.rs - do not edit\n");
    if has_user_file {
        output.push_str("// Library defaults merged with JF_CONFIG_RS overrides\n");
    }
    output.push('\n');

    for param in CONFIG_PARAMS {
        output.push_str(&format!(
            "pub const {}: {} = {};\n",
            param.name, param.rust_type, config[param.name]
        ));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_const_line() {
        assert_eq!(
            parse_const_line("pub const STACK_SIZE: usize = 64 * 1024;"),
            Some(("STACK_SIZE".into(), "64 * 1024".into()))
        );
        assert_eq!(parse_const_line("let x = 1;"), None);
    }

    #[test]
    fn test_merge_overrides() {
        let mut config: BTreeMap<&str, String> =
            CONFIG_PARAMS.iter().map(|p| (p.name, p.default_value.to_string())).collect();
        merge_overrides("// tuned\npub const NUM_WORKERS: usize = 2;\n", &mut config);
        assert_eq!(config["NUM_WORKERS"], "2");
        assert_eq!(config["MAX_JOBS_PER_THREAD"], "256");
    }
}
