//! Architecture-specific context switching
//!
//! Each backend exposes the same surface:
//! - `SavedRegs` - callee-saved register file of a suspended context
//! - `init_context` - prepare a fresh context that starts in an entry function
//! - `switch_context` - save the running context and load another

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        pub mod x86_64;
        pub use self::x86_64::{init_context, switch_context, SavedRegs};
    } else if #[cfg(target_arch = "aarch64")] {
        pub mod aarch64;
        pub use self::aarch64::{init_context, switch_context, SavedRegs};
    }
}

/// Entry point of a fresh context; receives the argument given to `init_context`
pub type ContextEntry = extern "C" fn(usize) -> !;

#[cfg(test)]
mod tests {
    use super::*;

    struct Shared {
        main: SavedRegs,
        side: SavedRegs,
        hits: u32,
    }

    extern "C" fn bounce(arg: usize) -> ! {
        let shared = arg as *mut Shared;
        loop {
            unsafe {
                (*shared).hits += 1;
                switch_context(&mut (*shared).side, &(*shared).main);
            }
        }
    }

    #[test]
    fn test_switch_round_trip() {
        let mut stack = vec![0u8; 64 * 1024];
        let top = unsafe { stack.as_mut_ptr().add(stack.len()) };
        let mut shared = Box::new(Shared {
            main: SavedRegs::default(),
            side: SavedRegs::default(),
            hits: 0,
        });
        let ptr: *mut Shared = &mut *shared;

        unsafe {
            init_context(&mut (*ptr).side, top, bounce, ptr as usize);
            for expected in 1..=3 {
                switch_context(&mut (*ptr).main, &(*ptr).side);
                assert_eq!((*ptr).hits, expected);
            }
        }
    }
}
