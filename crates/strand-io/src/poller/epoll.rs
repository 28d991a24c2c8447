//! `epoll(7)` backends, level- and edge-triggered

use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use nix::errno::Errno;
use strand_core::ktrace;
use strand_runtime::IoMode;

use super::{Poller, Ready};
use crate::syscall::{self, SysResult};
use crate::wait_slot::WaitSlot;

const EV_IN: u32 = libc::EPOLLIN as u32;
const EV_OUT: u32 = libc::EPOLLOUT as u32;
const EV_HUP: u32 = libc::EPOLLHUP as u32;
const EV_ERR: u32 = libc::EPOLLERR as u32;
const EV_ET: u32 = libc::EPOLLET as u32;

/// Owned epoll descriptor plus its event buffer
struct Epoll {
    fd: i32,
    events: Vec<libc::epoll_event>,
}

impl Epoll {
    fn new(max_events: usize) -> SysResult<Self> {
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(Errno::last());
        }
        Ok(Self {
            fd,
            events: vec![libc::epoll_event { events: 0, u64: 0 }; max_events.max(1)],
        })
    }

    fn ctl(&self, op: i32, fd: i32, events: u32) -> SysResult<()> {
        let mut ev = libc::epoll_event {
            events,
            u64: fd as u64,
        };
        let ret = unsafe { libc::epoll_ctl(self.fd, op, fd, &mut ev) };
        if ret < 0 {
            Err(Errno::last())
        } else {
            Ok(())
        }
    }

    fn add(&self, fd: i32, events: u32) -> SysResult<()> {
        match self.ctl(libc::EPOLL_CTL_ADD, fd, events) {
            Err(Errno::EEXIST) => self.ctl(libc::EPOLL_CTL_MOD, fd, events),
            other => other,
        }
    }

    fn modify(&self, fd: i32, events: u32) -> SysResult<()> {
        match self.ctl(libc::EPOLL_CTL_MOD, fd, events) {
            Err(Errno::ENOENT) => self.ctl(libc::EPOLL_CTL_ADD, fd, events),
            other => other,
        }
    }

    fn delete(&self, fd: i32) {
        // Closed descriptors have already left the interest list.
        let _ = self.ctl(libc::EPOLL_CTL_DEL, fd, 0);
    }

    /// `(fd, events)` pairs reported by one `epoll_wait`
    fn wait(&mut self, timeout: Option<Duration>) -> SysResult<Vec<(i32, u32)>> {
        let n = unsafe {
            libc::epoll_wait(
                self.fd,
                self.events.as_mut_ptr(),
                self.events.len() as i32,
                syscall::timeout_ms(timeout),
            )
        };
        if n < 0 {
            return Err(Errno::last());
        }
        Ok(self.events[..n as usize]
            .iter()
            .map(|ev| {
                let (data, bits) = (ev.u64, ev.events);
                (data as i32, bits)
            })
            .collect())
    }
}

impl Drop for Epoll {
    fn drop(&mut self) {
        let _ = syscall::close(self.fd);
    }
}

// ============================================================================
// Level-triggered
// ============================================================================

#[derive(Default)]
struct LevelEntry {
    registered: u32,
    wanted: u32,
    read: Option<Rc<WaitSlot>>,
    write: Option<Rc<WaitSlot>>,
    /// epoll refused the descriptor (regular files); reported ready as is
    unpollable: bool,
}

/// Level-triggered epoll
///
/// Interest masks follow the pending sets: before every wait each
/// descriptor's wanted mask is recomputed and only the differences are
/// pushed to the kernel.
pub struct LevelPoller {
    epoll: Epoll,
    fds: HashMap<i32, LevelEntry>,
}

impl LevelPoller {
    pub fn new(max_events: usize) -> SysResult<Self> {
        Ok(Self {
            epoll: Epoll::new(max_events)?,
            fds: HashMap::new(),
        })
    }

    fn sync(&mut self, reads: &[Rc<WaitSlot>], writes: &[Rc<WaitSlot>]) -> SysResult<()> {
        for entry in self.fds.values_mut() {
            entry.wanted = 0;
            entry.read = None;
            entry.write = None;
        }
        for slot in reads.iter().filter(|s| s.fd() >= 0) {
            let entry = self.fds.entry(slot.fd()).or_default();
            entry.wanted |= EV_IN;
            entry.read = Some(slot.clone());
        }
        for slot in writes.iter().filter(|s| s.fd() >= 0) {
            let entry = self.fds.entry(slot.fd()).or_default();
            entry.wanted |= EV_OUT;
            entry.write = Some(slot.clone());
        }

        let mut idle = Vec::new();
        for (&fd, entry) in self.fds.iter_mut() {
            if entry.wanted == 0 {
                idle.push(fd);
            } else if entry.unpollable {
                continue;
            } else if entry.registered == 0 {
                match self.epoll.add(fd, entry.wanted) {
                    Ok(()) => entry.registered = entry.wanted,
                    Err(Errno::EPERM) => {
                        ktrace!("epoll-level: fd {} is not pollable", fd);
                        entry.unpollable = true;
                    }
                    Err(e) => return Err(e),
                }
            } else if entry.registered != entry.wanted {
                self.epoll.modify(fd, entry.wanted)?;
                entry.registered = entry.wanted;
            }
        }
        for fd in idle {
            if let Some(entry) = self.fds.remove(&fd) {
                if entry.registered != 0 {
                    self.epoll.delete(fd);
                }
            }
        }
        Ok(())
    }
}

impl Poller for LevelPoller {
    fn mode(&self) -> IoMode {
        IoMode::EpollLevel
    }

    fn forget(&mut self, fd: i32) {
        if self.fds.remove(&fd).is_some() {
            self.epoll.delete(fd);
        }
    }

    fn poll(
        &mut self,
        reads: &[Rc<WaitSlot>],
        writes: &[Rc<WaitSlot>],
        timeout: Option<Duration>,
    ) -> SysResult<Ready> {
        self.sync(reads, writes)?;

        let mut ready = Ready::default();
        for entry in self.fds.values().filter(|e| e.unpollable) {
            ready.read.extend(entry.read.clone());
            ready.write.extend(entry.write.clone());
        }
        let timeout = if ready.is_empty() { timeout } else { Some(Duration::ZERO) };
        let events = self.epoll.wait(timeout)?;

        for (fd, bits) in events {
            let Some(entry) = self.fds.get(&fd) else {
                continue;
            };
            if bits & EV_IN != 0 {
                ready.read.extend(entry.read.clone());
                if bits & EV_OUT != 0 {
                    ready.write.extend(entry.write.clone());
                }
            } else if bits & EV_OUT != 0 {
                ready.write.extend(entry.write.clone());
            } else if bits & (EV_HUP | EV_ERR) != 0 {
                ready.read.extend(entry.read.clone());
                ready.write.extend(entry.write.clone());
            }
        }
        Ok(ready)
    }
}

// ============================================================================
// Edge-triggered
// ============================================================================

/// Edge-triggered epoll
///
/// Every descriptor is registered once for `IN|OUT|ET` when its first slot
/// is created. An edge only wakes a slot that has a receiver waiting, so
/// waiters check readiness with `poll(0)` before blocking.
pub struct EdgePoller {
    epoll: Epoll,
    fds: HashMap<i32, [Option<Rc<WaitSlot>>; 2]>,
}

impl EdgePoller {
    pub fn new(max_events: usize) -> SysResult<Self> {
        Ok(Self {
            epoll: Epoll::new(max_events)?,
            fds: HashMap::new(),
        })
    }
}

fn has_waiter(slot: &Option<Rc<WaitSlot>>) -> Option<Rc<WaitSlot>> {
    slot.as_ref()
        .filter(|s| s.channel().balance() < 0)
        .cloned()
}

impl Poller for EdgePoller {
    fn mode(&self) -> IoMode {
        IoMode::EpollEdge
    }

    fn register(&mut self, slot: &Rc<WaitSlot>) -> SysResult<()> {
        let fd = slot.fd();
        if fd < 0 {
            return Ok(());
        }
        let idx = slot.direction().index();
        if let Some(pair) = self.fds.get_mut(&fd) {
            pair[idx] = Some(slot.clone());
            return Ok(());
        }
        self.epoll.add(fd, EV_IN | EV_OUT | EV_ET)?;
        let mut pair = [None, None];
        pair[idx] = Some(slot.clone());
        self.fds.insert(fd, pair);
        ktrace!("epoll-edge: registered fd {}", fd);
        Ok(())
    }

    fn forget(&mut self, fd: i32) {
        if self.fds.remove(&fd).is_some() {
            self.epoll.delete(fd);
        }
    }

    fn poll(
        &mut self,
        _reads: &[Rc<WaitSlot>],
        _writes: &[Rc<WaitSlot>],
        timeout: Option<Duration>,
    ) -> SysResult<Ready> {
        let events = self.epoll.wait(timeout)?;

        let mut ready = Ready::default();
        for (fd, bits) in events {
            let Some([read, write]) = self.fds.get(&fd) else {
                continue;
            };
            if bits & (EV_IN | EV_HUP | EV_ERR) != 0 {
                ready.read.extend(has_waiter(read));
            }
            if bits & (EV_OUT | EV_HUP | EV_ERR) != 0 {
                ready.write.extend(has_waiter(write));
            }
        }
        Ok(ready)
    }

    fn needs_recheck(&self) -> bool {
        true
    }
}
