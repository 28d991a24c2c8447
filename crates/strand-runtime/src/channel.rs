//! Rendezvous channels
//!
//! A channel has no buffer: `send` completes only when a receiver takes
//! the value, and `receive` only when a sender offers one. Whichever side
//! arrives first is queued and blocked. `balance` counts the queue, positive
//! for waiting senders and negative for waiting receivers.
//!
//! `preference` picks which side keeps running after a hand-off. Negative
//! (the default) prefers the receiver: a sender that finds a waiting
//! receiver lets it run at once. Zero or positive prefers the sender.
//!
//! ```ignore
//! let ch: Channel<&str> = sched.channel();
//! let tx = ch.clone();
//! sched.spawn(move || tx.send("ping"))?;
//! assert_eq!(ch.receive()?, "ping");
//! ```

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use strand_core::{Bomb, BombKind, ChannelId, TaskId, TaskResult};

use crate::scheduler::Scheduler;

type Payload<T> = Rc<RefCell<Option<Result<T, Bomb>>>>;

struct Waiter<T> {
    task: TaskId,
    /// Sender's offer, or the receiver's landing spot
    slot: Payload<T>,
}

struct ChannelInner<T> {
    sched: Scheduler,
    id: ChannelId,
    balance: Cell<isize>,
    preference: Cell<i32>,
    queue: RefCell<VecDeque<Waiter<T>>>,
}

/// Unbuffered channel between tasks of one scheduler
pub struct Channel<T> {
    inner: Rc<ChannelInner<T>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl Scheduler {
    /// Create a receiver-preferred channel
    pub fn channel<T: 'static>(&self) -> Channel<T> {
        Channel::new(self)
    }
}

impl<T: 'static> Channel<T> {
    pub fn new(sched: &Scheduler) -> Self {
        Self {
            inner: Rc::new(ChannelInner {
                sched: sched.clone(),
                id: sched.next_channel_id(),
                balance: Cell::new(0),
                preference: Cell::new(-1),
                queue: RefCell::new(VecDeque::new()),
            }),
        }
    }

    #[inline]
    pub fn id(&self) -> ChannelId {
        self.inner.id
    }

    /// Waiting senders (positive) or receivers (negative)
    #[inline]
    pub fn balance(&self) -> isize {
        self.inner.balance.get()
    }

    #[inline]
    pub fn preference(&self) -> i32 {
        self.inner.preference.get()
    }

    /// Negative prefers receivers; zero or more prefers senders
    pub fn set_preference(&self, preference: i32) -> &Self {
        self.inner.preference.set(preference);
        self
    }

    /// Tasks queued on the channel, oldest first
    pub fn waiting(&self) -> Vec<TaskId> {
        self.inner.queue.borrow().iter().map(|w| w.task).collect()
    }

    fn sender_preferred(&self) -> bool {
        self.inner.preference.get() >= 0
    }

    /// Wait for a sender and take its value
    ///
    /// A bomb sent through the channel is raised here, chained to the
    /// sender's original.
    pub fn receive(&self) -> TaskResult<T> {
        let sched = &self.inner.sched;
        let me = sched.current();

        if self.balance() > 0 {
            let waiter = self.inner.queue.borrow_mut().pop_front();
            if let Some(waiter) = waiter {
                self.inner.balance.set(self.balance() - 1);
                let payload = waiter.slot.borrow_mut().take();
                sched.unblock(waiter.task);
                if self.sender_preferred() {
                    sched.insert_next(waiter.task);
                    sched.schedule()?;
                } else {
                    sched.insert(waiter.task)?;
                }
                return self.unpack(payload, me);
            }
        }

        if sched.runcount() <= 1 {
            return Err(Bomb::deadlock().at(me, format!("receive on {}", self.id())));
        }

        let slot: Payload<T> = Rc::new(RefCell::new(None));
        self.wait(me, slot.clone(), -1)?;
        let payload = slot.borrow_mut().take();
        self.unpack(payload, me)
    }

    /// Hand `value` to a receiver, waiting for one if needed
    pub fn send(&self, value: T) -> TaskResult<()> {
        self.offer(Ok(value))
    }

    /// Send a bomb; the receiver raises it
    pub fn send_bomb(&self, bomb: Bomb) -> TaskResult<()> {
        let me = self.inner.sched.current();
        self.offer(Err(bomb.at(me, format!("send on {}", self.id()))))
    }

    /// `send_bomb(Bomb::new(kind, value))`
    pub fn send_exception(&self, kind: BombKind, value: impl Into<String>) -> TaskResult<()> {
        self.send_bomb(Bomb::new(kind, value))
    }

    fn offer(&self, payload: Result<T, Bomb>) -> TaskResult<()> {
        let sched = &self.inner.sched;
        let me = sched.current();

        if self.balance() < 0 {
            let waiter = self.inner.queue.borrow_mut().pop_front();
            if let Some(waiter) = waiter {
                self.inner.balance.set(self.balance() + 1);
                *waiter.slot.borrow_mut() = Some(payload);
                sched.unblock(waiter.task);
                if self.sender_preferred() {
                    sched.insert(waiter.task)?;
                } else {
                    sched.insert_next(waiter.task);
                    sched.schedule()?;
                }
                return Ok(());
            }
        }

        if sched.runcount() <= 1 {
            return Err(Bomb::deadlock().at(me, format!("send on {}", self.id())));
        }

        self.wait(me, Rc::new(RefCell::new(Some(payload))), 1)
    }

    /// Queue the caller and block; on a bomb, leave the queue again
    fn wait(&self, me: TaskId, slot: Payload<T>, delta: isize) -> TaskResult<()> {
        self.inner.queue.borrow_mut().push_back(Waiter {
            task: me,
            slot: slot.clone(),
        });
        self.inner.balance.set(self.balance() + delta);

        if let Err(bomb) = self.inner.sched.block_current(self.id()) {
            let still_queued = {
                let mut queue = self.inner.queue.borrow_mut();
                match queue.iter().position(|w| Rc::ptr_eq(&w.slot, &slot)) {
                    Some(i) => queue.remove(i).is_some(),
                    None => false,
                }
            };
            if still_queued {
                self.inner.balance.set(self.balance() - delta);
            }
            return Err(bomb);
        }
        Ok(())
    }

    fn unpack(&self, payload: Option<Result<T, Bomb>>, me: TaskId) -> TaskResult<T> {
        match payload {
            Some(Ok(value)) => Ok(value),
            Some(Err(bomb)) => Err(bomb.rethrow(me, format!("receive on {}", self.id()))),
            None => Err(Bomb::runtime(format!("woken on {} without a value", self.id()))),
        }
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.inner.id)
            .field("balance", &self.inner.balance.get())
            .field("preference", &self.inner.preference.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::task::Task;
    use std::error::Error;
    use strand_core::TaskState;

    fn sched() -> Scheduler {
        Scheduler::new(&RuntimeConfig::new().stack_size(64 * 1024)).unwrap()
    }

    type Events = Rc<RefCell<Vec<String>>>;

    fn push(ev: &Events, s: impl Into<String>) {
        ev.borrow_mut().push(s.into());
    }

    /// Loops forever receiving and logging `name.wait` / `name/msg`
    fn worker(s: &Scheduler, name: &'static str, ch: &Channel<String>, ev: &Events) -> Task {
        let (ch, ev) = (ch.clone(), ev.clone());
        s.spawn(move || loop {
            push(&ev, format!("{}.wait", name));
            let msg = ch.receive()?;
            push(&ev, format!("{}/{}", name, msg));
        })
        .unwrap()
    }

    /// Schedule until a pass produces no new events
    fn drain(s: &Scheduler, ev: &Events) {
        loop {
            push(ev, "schedule");
            let n = ev.borrow().len();
            s.schedule().unwrap();
            if n == ev.borrow().len() {
                break;
            }
        }
        push(ev, "done");
    }

    fn take(ev: &Events) -> String {
        let out = ev.borrow().join(" ");
        ev.borrow_mut().clear();
        out
    }

    #[test]
    fn test_preference_sequences() {
        let s = sched();
        let ch: Channel<String> = s.channel();
        let ev: Events = Rc::new(RefCell::new(Vec::new()));
        for name in ["A", "B", "C", "D"] {
            worker(&s, name, &ch, &ev);
        }
        assert_eq!(s.runcount(), 5);
        assert_eq!(ch.preference(), -1);
        assert_eq!(ch.balance(), 0);

        push(&ev, "send");
        ch.send("msg".into()).unwrap();
        assert_eq!(s.runcount(), 1);
        drain(&s, &ev);
        assert_eq!(
            take(&ev),
            "send A.wait A/msg A.wait B.wait C.wait D.wait schedule done"
        );
        assert_eq!(ch.balance(), -4);

        ch.set_preference(0);
        push(&ev, "send");
        ch.send("msg".into()).unwrap();
        assert_eq!(s.runcount(), 2);
        drain(&s, &ev);
        assert_eq!(take(&ev), "send schedule A/msg A.wait schedule done");
        assert_eq!(ch.balance(), -4);

        ch.set_preference(1);
        push(&ev, "send");
        ch.send("msg".into()).unwrap();
        drain(&s, &ev);
        assert_eq!(take(&ev), "send schedule B/msg B.wait schedule done");

        // Anything above zero behaves like 1
        ch.set_preference(2);
        push(&ev, "send");
        ch.send("msg".into()).unwrap();
        ch.send("msg".into()).unwrap();
        assert_eq!(s.runcount(), 3);
        drain(&s, &ev);
        assert_eq!(
            take(&ev),
            "send schedule C/msg C.wait D/msg D.wait schedule done"
        );
        assert_eq!(ch.balance(), -4);
    }

    #[test]
    fn test_receiver_waits_for_sender() {
        let s = sched();
        let ch: Channel<u32> = s.channel();
        let tx = ch.clone();
        s.spawn(move || tx.send(7)).unwrap();
        assert_eq!(ch.receive().unwrap(), 7);
        assert_eq!(ch.balance(), 0);
    }

    #[test]
    fn test_balance_tracks_queue() {
        let s = sched();
        let ch: Channel<u32> = s.channel();
        let mut senders = Vec::new();
        for i in 0..3 {
            let tx = ch.clone();
            senders.push(s.spawn(move || tx.send(i)).unwrap());
        }
        s.schedule().unwrap();
        assert_eq!(ch.balance(), 3);
        assert_eq!(ch.waiting().len(), 3);
        assert!(senders.iter().all(|t| t.state() == TaskState::Blocked));

        assert_eq!(ch.receive().unwrap(), 0);
        assert_eq!(ch.balance(), 2);
        assert_eq!(ch.receive().unwrap(), 1);
        assert_eq!(ch.receive().unwrap(), 2);
        assert_eq!(ch.balance(), 0);
        assert!(ch.waiting().is_empty());
    }

    #[test]
    fn test_deadlock_detected() {
        let s = sched();
        let ch: Channel<u32> = s.channel();
        let err = ch.receive().unwrap_err();
        assert!(err.is_runtime_error());
        assert_eq!(*err.kind(), BombKind::Deadlock);
        let err = ch.send(1).unwrap_err();
        assert_eq!(*err.kind(), BombKind::Deadlock);
        assert_eq!(ch.balance(), 0);
    }

    #[test]
    fn test_last_task_blocking_wakes_main_with_deadlock() {
        let s = sched();
        let ch: Channel<u32> = s.channel();
        let other: Channel<u32> = s.channel();
        let s2 = s.clone();
        s.spawn(move || {
            // Main is blocked on `ch`; blocking here too leaves nobody
            s2.schedule_remove()?;
            other.receive().map(|_| ())
        })
        .unwrap();
        let err = ch.receive().unwrap_err();
        assert_eq!(*err.kind(), BombKind::Deadlock);
        assert_eq!(ch.balance(), 0);
        assert!(ch.waiting().is_empty());
    }

    #[test]
    fn test_bomb_round_trip() {
        let s = sched();
        let ch: Channel<u32> = s.channel();
        let tx = ch.clone();
        s.spawn(move || tx.send_exception(BombKind::Value, "bad input"))
            .unwrap();

        let err = ch.receive().unwrap_err();
        assert_eq!(err, Bomb::value_error("bad input"));
        assert_eq!(err.trace()[0].task, TaskId::MAIN);
        let cause = err.cause().unwrap();
        assert_ne!(cause.trace()[0].task, TaskId::MAIN);
        assert!(err.source().is_some());
    }

    #[test]
    fn test_throw_unblocks_and_restores_balance() {
        let s = sched();
        let ch: Channel<u32> = s.channel();
        let seen = Rc::new(RefCell::new(None));
        let t = {
            let (ch, seen) = (ch.clone(), seen.clone());
            s.spawn(move || {
                let r = ch.receive();
                *seen.borrow_mut() = Some(r.map_err(|b| b.kind().clone()));
                Ok(())
            })
            .unwrap()
        };
        s.schedule().unwrap();
        assert_eq!(ch.balance(), -1);
        assert!(t.is_blocked());

        // Blocked tasks cannot be moved around the ring
        assert!(t.insert().is_err());
        assert!(t.remove().is_err());
        assert!(t.run().is_err());

        t.throw(Bomb::timeout("gave up")).unwrap();
        assert_eq!(ch.balance(), 0);
        assert!(ch.waiting().is_empty());
        assert_eq!(*seen.borrow(), Some(Err(BombKind::Timeout)));
        assert!(!t.is_alive());
    }

    #[test]
    fn test_kill_blocked_sender() {
        let s = sched();
        let ch: Channel<u32> = s.channel();
        let tx = ch.clone();
        let t = s.spawn(move || tx.send(1)).unwrap();
        s.schedule().unwrap();
        assert_eq!(ch.balance(), 1);
        t.kill().unwrap();
        assert_eq!(ch.balance(), 0);
        assert_eq!(s.runcount(), 1);
    }
}
