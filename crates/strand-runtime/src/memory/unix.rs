//! Unix stack implementation using mmap

use strand_core::error::{MemoryError, SchedResult};
use strand_core::constants::MIN_STACK_SIZE;

/// System page size, falling back to 4 KB if sysconf fails
pub fn page_size() -> usize {
    let ret = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if ret <= 0 {
        strand_core::constants::GUARD_SIZE
    } else {
        ret as usize
    }
}

/// One task stack: `[guard page | usable stack]`, growing down toward the
/// guard.
#[derive(Debug)]
pub struct Stack {
    base: *mut u8,
    total_size: usize,
    guard_size: usize,
}

impl Stack {
    /// Map a stack with at least `size` usable bytes
    ///
    /// Memory is reserved with MAP_NORESERVE; pages are committed on first
    /// touch. The lowest page stays PROT_NONE so an overflow faults instead
    /// of corrupting a neighbour.
    pub fn new(size: usize) -> SchedResult<Stack> {
        if size < MIN_STACK_SIZE {
            return Err(MemoryError::InvalidSize.into());
        }
        let page = page_size();
        let usable = size
            .checked_add(page - 1)
            .map(|s| s & !(page - 1))
            .ok_or(MemoryError::InvalidSize)?;
        let total_size = usable.checked_add(page).ok_or(MemoryError::InvalidSize)?;

        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                total_size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(MemoryError::AllocationFailed.into());
        }

        let stack = Stack {
            base: base as *mut u8,
            total_size,
            guard_size: page,
        };

        let ret = unsafe { libc::mprotect(base, page, libc::PROT_NONE) };
        if ret != 0 {
            // Drop unmaps
            return Err(MemoryError::ProtectionFailed.into());
        }

        Ok(stack)
    }

    /// Highest address of the stack (exclusive); initial stack pointer
    #[inline]
    pub fn top(&self) -> *mut u8 {
        unsafe { self.base.add(self.total_size) }
    }

    /// Lowest usable address, just above the guard page
    #[inline]
    pub fn bottom(&self) -> *mut u8 {
        unsafe { self.base.add(self.guard_size) }
    }

    #[inline]
    pub fn usable_size(&self) -> usize {
        self.total_size - self.guard_size
    }

    /// Tell the kernel the stack contents are no longer needed
    pub fn release_pages(&self) -> SchedResult<()> {
        let ret = unsafe {
            libc::madvise(
                self.bottom() as *mut libc::c_void,
                self.usable_size(),
                libc::MADV_DONTNEED,
            )
        };
        if ret != 0 {
            return Err(MemoryError::AdviseFailed.into());
        }
        Ok(())
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, self.total_size);
        }
    }
}
