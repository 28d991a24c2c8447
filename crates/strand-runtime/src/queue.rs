//! Double-ended queue with blocking pops
//!
//! Appending never blocks and never switches. Popping from an empty queue
//! blocks the caller until an append arrives. Waiters are woken oldest
//! first through a sender-preferred channel, so the appending task keeps
//! running and the item stays queued until the woken task gets to run.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use strand_core::TaskResult;

use crate::channel::Channel;
use crate::scheduler::Scheduler;

struct QueueInner<T> {
    items: RefCell<VecDeque<T>>,
    wakeup: Channel<()>,
}

/// Shared FIFO/LIFO queue between tasks of one scheduler
pub struct Queue<T> {
    inner: Rc<QueueInner<T>>,
}

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl Scheduler {
    /// Create an empty queue
    pub fn queue<T: 'static>(&self) -> Queue<T> {
        Queue::new(self)
    }
}

impl<T: 'static> Queue<T> {
    pub fn new(sched: &Scheduler) -> Self {
        Self::with_items(sched, std::iter::empty())
    }

    /// Queue pre-filled with `items`, front first
    pub fn with_items(sched: &Scheduler, items: impl IntoIterator<Item = T>) -> Self {
        let wakeup = Channel::new(sched);
        wakeup.set_preference(0);
        Self {
            inner: Rc::new(QueueInner {
                items: RefCell::new(items.into_iter().collect()),
                wakeup,
            }),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.items.borrow().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.items.borrow().is_empty()
    }

    /// Tasks blocked in `pop` or `popleft` that no append has woken yet
    pub fn pending_receiver_count(&self) -> usize {
        (-self.inner.wakeup.balance()).max(0) as usize
    }

    /// Add to the back, waking one blocked popper
    pub fn append(&self, item: T) -> TaskResult<()> {
        self.inner.items.borrow_mut().push_back(item);
        self.wake_one()
    }

    /// Add to the front, waking one blocked popper
    pub fn appendleft(&self, item: T) -> TaskResult<()> {
        self.inner.items.borrow_mut().push_front(item);
        self.wake_one()
    }

    /// Take from the back, blocking while the queue is empty
    pub fn pop(&self) -> TaskResult<T> {
        loop {
            if let Some(item) = self.inner.items.borrow_mut().pop_back() {
                return Ok(item);
            }
            self.inner.wakeup.receive()?;
        }
    }

    /// Take from the front, blocking while the queue is empty
    pub fn popleft(&self) -> TaskResult<T> {
        loop {
            if let Some(item) = self.inner.items.borrow_mut().pop_front() {
                return Ok(item);
            }
            self.inner.wakeup.receive()?;
        }
    }

    /// Non-blocking `pop`
    pub fn try_pop(&self) -> Option<T> {
        self.inner.items.borrow_mut().pop_back()
    }

    /// Non-blocking `popleft`
    pub fn try_popleft(&self) -> Option<T> {
        self.inner.items.borrow_mut().pop_front()
    }

    /// Drop all queued items
    pub fn clear(&self) {
        self.inner.items.borrow_mut().clear();
    }

    fn wake_one(&self) -> TaskResult<()> {
        if self.inner.wakeup.balance() < 0 {
            self.inner.wakeup.send(())?;
        }
        Ok(())
    }
}

impl<T: Clone + 'static> Queue<T> {
    /// Snapshot of the items, front first
    pub fn to_vec(&self) -> Vec<T> {
        self.inner.items.borrow().iter().cloned().collect()
    }
}

impl<T> fmt::Debug for Queue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("len", &self.inner.items.borrow().len())
            .field("waiting", &(-self.inner.wakeup.balance()).max(0))
            .finish()
    }
}
