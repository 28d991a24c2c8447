//! `select(2)` backend

use std::mem;
use std::ptr;
use std::rc::Rc;
use std::time::Duration;

use nix::errno::Errno;
use strand_runtime::IoMode;

use super::{Poller, Ready};
use crate::syscall::SysResult;
use crate::wait_slot::WaitSlot;

/// Stateless: the fd sets are rebuilt from the pending slots on every poll
#[derive(Debug, Default)]
pub struct SelectPoller;

impl SelectPoller {
    pub fn new() -> Self {
        SelectPoller
    }
}

fn fill(set: &mut libc::fd_set, slots: &[Rc<WaitSlot>], nfds: &mut i32) -> SysResult<()> {
    for slot in slots {
        let fd = slot.fd();
        if fd < 0 {
            continue;
        }
        if fd as usize >= libc::FD_SETSIZE as usize {
            return Err(Errno::EINVAL);
        }
        unsafe { libc::FD_SET(fd, set) };
        *nfds = (*nfds).max(fd + 1);
    }
    Ok(())
}

fn collect(set: &libc::fd_set, slots: &[Rc<WaitSlot>]) -> Vec<Rc<WaitSlot>> {
    slots
        .iter()
        .filter(|s| s.fd() >= 0 && unsafe { libc::FD_ISSET(s.fd(), set) })
        .cloned()
        .collect()
}

impl Poller for SelectPoller {
    fn mode(&self) -> IoMode {
        IoMode::Select
    }

    fn poll(
        &mut self,
        reads: &[Rc<WaitSlot>],
        writes: &[Rc<WaitSlot>],
        timeout: Option<Duration>,
    ) -> SysResult<Ready> {
        let mut rset: libc::fd_set = unsafe { mem::zeroed() };
        let mut wset: libc::fd_set = unsafe { mem::zeroed() };
        unsafe {
            libc::FD_ZERO(&mut rset);
            libc::FD_ZERO(&mut wset);
        }
        let mut nfds = 0;
        fill(&mut rset, reads, &mut nfds)?;
        fill(&mut wset, writes, &mut nfds)?;

        let mut tv;
        let tvp = match timeout {
            Some(d) => {
                tv = libc::timeval {
                    tv_sec: d.as_secs().min(libc::time_t::MAX as u64) as libc::time_t,
                    tv_usec: d.subsec_micros() as libc::suseconds_t,
                };
                &mut tv as *mut libc::timeval
            }
            None => ptr::null_mut(),
        };

        let ret = unsafe { libc::select(nfds, &mut rset, &mut wset, ptr::null_mut(), tvp) };
        if ret < 0 {
            return Err(Errno::last());
        }
        if ret == 0 {
            return Ok(Ready::default());
        }
        Ok(Ready {
            read: collect(&rset, reads),
            write: collect(&wset, writes),
        })
    }
}
