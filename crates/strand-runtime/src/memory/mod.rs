//! Task stack management
//!
//! Every task runs on its own mmap'd stack with an inaccessible guard page
//! below it. Finished tasks hand their stack back to a [`StackPool`], which
//! returns the physical pages to the kernel and keeps the mapping for the
//! next task.

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
        pub use unix::*;
    } else {
        compile_error!("strand stacks require a unix platform");
    }
}

use std::cell::RefCell;

use strand_core::error::SchedResult;
use strand_core::kdebug;

/// Cache of released stacks, all of one size
pub struct StackPool {
    stack_size: usize,
    capacity: usize,
    free: RefCell<Vec<Stack>>,
}

impl StackPool {
    pub fn new(stack_size: usize, capacity: usize) -> Self {
        Self {
            stack_size,
            capacity,
            free: RefCell::new(Vec::new()),
        }
    }

    /// Reuse a cached stack, or map a new one
    pub fn acquire(&self) -> SchedResult<Stack> {
        if let Some(stack) = self.free.borrow_mut().pop() {
            return Ok(stack);
        }
        Stack::new(self.stack_size)
    }

    /// Return a stack; it is unmapped when the cache is full or its pages
    /// cannot be released.
    pub fn release(&self, stack: Stack) {
        let mut free = self.free.borrow_mut();
        if free.len() >= self.capacity {
            return;
        }
        match stack.release_pages() {
            Ok(()) => free.push(stack),
            Err(e) => kdebug!("dropping stack instead of caching it: {}", e),
        }
    }

    /// Number of stacks waiting for reuse
    pub fn cached(&self) -> usize {
        self.free.borrow().len()
    }

    pub fn stack_size(&self) -> usize {
        self.stack_size
    }
}
