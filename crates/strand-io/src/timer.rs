//! Sleep timers
//!
//! A binary min-heap of deadlines, each naming the task to re-insert into
//! the ring when it fires.
//!
//! # Complexity
//!
//! - Insert: O(log n)
//! - Cancel: O(1) (lazy, the entry is skipped when it reaches the top)
//! - Pop due: O(k log n) where k = number of due timers
//! - Next deadline: O(1) amortized
//!
//! The sleeper and the queue share the timer's [`TimerState`], so the
//! sleeper can tell on resumption whether its own timer fired or something
//! else woke it early.

use std::cell::Cell;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::rc::Rc;
use std::time::Instant;

use strand_core::TaskId;

/// Lifecycle of one timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Pending,
    Fired,
    Cancelled,
}

/// Caller's view of an inserted timer
#[derive(Clone)]
pub struct TimerHandle {
    id: u64,
    state: Rc<Cell<TimerState>>,
}

impl TimerHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> TimerState {
        self.state.get()
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle")
            .field("id", &self.id)
            .field("state", &self.state.get())
            .finish()
    }
}

struct HeapEntry {
    deadline: Instant,
    id: u64,
    task: TaskId,
    state: Rc<Cell<TimerState>>,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for a min-heap; ties fire in insertion order
        match other.deadline.cmp(&self.deadline) {
            Ordering::Equal => other.id.cmp(&self.id),
            ord => ord,
        }
    }
}

/// Statistics snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimerStats {
    pub active: usize,
    pub pending_cancellations: usize,
    pub total_inserted: u64,
    pub total_fired: u64,
    pub total_cancelled: u64,
}

/// Deadline-ordered sleep timers
pub struct TimerQueue {
    heap: BinaryHeap<HeapEntry>,
    next_id: u64,
    /// Cancelled entries still sitting in the heap
    cancelled_in_heap: usize,
    total_inserted: u64,
    total_fired: u64,
    total_cancelled: u64,
}

impl Default for TimerQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerQueue {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_id: 0,
            cancelled_in_heap: 0,
            total_inserted: 0,
            total_fired: 0,
            total_cancelled: 0,
        }
    }

    /// Schedule `task` to be re-inserted at `deadline`
    pub fn insert(&mut self, task: TaskId, deadline: Instant) -> TimerHandle {
        let id = self.next_id;
        self.next_id += 1;
        let state = Rc::new(Cell::new(TimerState::Pending));
        self.heap.push(HeapEntry {
            deadline,
            id,
            task,
            state: state.clone(),
        });
        self.total_inserted += 1;
        TimerHandle { id, state }
    }

    /// Cancel a pending timer; `false` if it already fired or was cancelled
    pub fn cancel(&mut self, handle: &TimerHandle) -> bool {
        if handle.state.get() != TimerState::Pending {
            return false;
        }
        handle.state.set(TimerState::Cancelled);
        self.cancelled_in_heap += 1;
        self.total_cancelled += 1;
        true
    }

    /// Any timer still due to fire?
    pub fn has_pending(&self) -> bool {
        self.heap.len() > self.cancelled_in_heap
    }

    /// Earliest live deadline
    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.skip_cancelled();
        self.heap.peek().map(|e| e.deadline)
    }

    /// Fire every timer with `deadline <= now`, earliest first
    pub fn pop_due(&mut self, now: Instant) -> Vec<TaskId> {
        let mut due = Vec::new();
        loop {
            self.skip_cancelled();
            match self.heap.peek() {
                Some(top) if top.deadline <= now => {}
                _ => break,
            }
            if let Some(entry) = self.heap.pop() {
                entry.state.set(TimerState::Fired);
                self.total_fired += 1;
                due.push(entry.task);
            }
        }
        due
    }

    pub fn stats(&self) -> TimerStats {
        TimerStats {
            active: self.heap.len() - self.cancelled_in_heap,
            pending_cancellations: self.cancelled_in_heap,
            total_inserted: self.total_inserted,
            total_fired: self.total_fired,
            total_cancelled: self.total_cancelled,
        }
    }

    fn skip_cancelled(&mut self) {
        while let Some(top) = self.heap.peek() {
            if top.state.get() != TimerState::Cancelled {
                break;
            }
            self.heap.pop();
            self.cancelled_in_heap -= 1;
        }
    }
}
