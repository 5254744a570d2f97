//! mmap-backed stacks with a guard page

use std::ptr::{self, NonNull};
use std::sync::OnceLock;

use jobfiber_core::constants::GUARD_SIZE;
use jobfiber_core::MemoryError;
use nix::unistd::{sysconf, SysconfVar};

use super::{StackAllocator, StackRegion};

/// System page size (falls back to `GUARD_SIZE` if sysconf fails)
pub fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
    *PAGE_SIZE.get_or_init(|| match sysconf(SysconfVar::PAGE_SIZE) {
        Ok(Some(n)) if n > 0 => n as usize,
        _ => GUARD_SIZE,
    })
}

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        // Queued jobs each hold a stack; only touched pages get committed
        const MAP_FLAGS: libc::c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE;
    } else {
        const MAP_FLAGS: libc::c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
    }
}

/// Anonymous private mapping, lowest page `PROT_NONE`
#[derive(Debug, Default, Clone, Copy)]
pub struct MmapStackAllocator;

impl StackAllocator for MmapStackAllocator {
    fn allocate(&self, size: usize) -> Result<StackRegion, MemoryError> {
        let page = page_size();
        if size == 0 {
            return Err(MemoryError::InvalidStackSize(size));
        }
        let usable = size
            .checked_add(page - 1)
            .map(|s| s & !(page - 1))
            .ok_or(MemoryError::InvalidStackSize(size))?;
        let len = usable.checked_add(page).ok_or(MemoryError::InvalidStackSize(size))?;

        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                MAP_FLAGS,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(MemoryError::AllocationFailed);
        }

        // Guard at the low end; stacks grow down into it on overflow
        if unsafe { libc::mprotect(base, page, libc::PROT_NONE) } != 0 {
            unsafe { libc::munmap(base, len) };
            return Err(MemoryError::ProtectionFailed);
        }

        let base = NonNull::new(base as *mut u8).ok_or(MemoryError::AllocationFailed)?;
        Ok(StackRegion { base, len })
    }

    unsafe fn deallocate(&self, region: StackRegion) {
        libc::munmap(region.base.as_ptr() as *mut libc::c_void, region.len);
    }
}
