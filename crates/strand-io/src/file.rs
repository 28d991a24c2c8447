//! # Non-blocking descriptors
//!
//! [`NonBlockingFile`] puts its descriptors in non-blocking mode and turns
//! every would-block into a suspension of the calling task only:
//!
//! ```text
//!  charge credit ─► syscall ─► ok ──────────────► return
//!        ▲             │
//!        │             ├─ EINTR ─► again
//!        │             ├─ EAGAIN ─► wait on the slot ─┐
//!        │             └─ other ─► Io bomb            │
//!        └────────────────────────────────────────────┘
//! ```
//!
//! The credit bounds how long a task can keep a descriptor busy when it is
//! always ready: after `credits_per_iteration` successful attempts in a
//! row the task yields once.
//!
//! Line and look-ahead reads (`readline`, `read_more`, `read_upto`) go
//! through a read buffer; plain reads drain that buffer before touching the
//! descriptor again.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use strand_core::{kdebug, Bomb, NonBlockingTransport, TaskResult};

use crate::reactor::Reactor;
use crate::syscall::{self, SysResult};
use crate::wait_slot::{Direction, WaitSlot};

/// What to do with a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Retry {
    /// Would block: wait for readiness, then try again
    Wait,
    /// Interrupted: try again right away
    Again,
    Fail,
}

pub(crate) fn classify(e: Errno) -> Retry {
    match e {
        Errno::EAGAIN => Retry::Wait,
        Errno::EINTR => Retry::Again,
        _ => Retry::Fail,
    }
}

/// Smallest read issued when filling the read buffer
const READ_CHUNK: usize = 8192;

pub(crate) fn io_bomb(e: Errno, op: &str) -> Bomb {
    Bomb::io(e as i32, op)
}

/// A readable and a writable descriptor (often the same one)
pub struct NonBlockingFile {
    reactor: Reactor,
    read_slot: Rc<WaitSlot>,
    write_slot: Rc<WaitSlot>,
    /// Written with `send(MSG_NOSIGNAL)` instead of `write`
    is_socket: bool,
    write_buf: RefCell<Vec<u8>>,
    read_buf: RefCell<Vec<u8>>,
}

impl NonBlockingFile {
    /// Take ownership of `read_fd` and `write_fd`
    ///
    /// Both are switched to non-blocking mode and closed by [`close`] or
    /// on drop.
    ///
    /// [`close`]: NonBlockingFile::close
    pub fn new(reactor: &Reactor, read_fd: i32, write_fd: i32) -> TaskResult<Self> {
        Self::with_kind(reactor, read_fd, write_fd, false)
    }

    /// One descriptor for both directions
    pub fn from_fd(reactor: &Reactor, fd: i32) -> TaskResult<Self> {
        Self::new(reactor, fd, fd)
    }

    /// A fresh pipe: reads return what was written
    pub fn pipe(reactor: &Reactor) -> TaskResult<Self> {
        let (r, w) = syscall::pipe().map_err(|e| io_bomb(e, "pipe"))?;
        Self::new(reactor, r, w)
    }

    pub(crate) fn with_kind(
        reactor: &Reactor,
        read_fd: i32,
        write_fd: i32,
        is_socket: bool,
    ) -> TaskResult<Self> {
        if read_fd < 0 || write_fd < 0 {
            return Err(Bomb::io(libc::EBADF, "open"));
        }
        syscall::set_fd_blocking(read_fd, false).map_err(|e| io_bomb(e, "fcntl"))?;
        if write_fd != read_fd {
            syscall::set_fd_blocking(write_fd, false).map_err(|e| io_bomb(e, "fcntl"))?;
        }
        Ok(Self {
            reactor: reactor.clone(),
            read_slot: reactor.new_slot(read_fd, Direction::Read)?,
            write_slot: reactor.new_slot(write_fd, Direction::Write)?,
            is_socket,
            write_buf: RefCell::new(Vec::new()),
            read_buf: RefCell::new(Vec::new()),
        })
    }

    pub fn reactor(&self) -> &Reactor {
        &self.reactor
    }

    /// Descriptor used for reading, negative once closed
    pub fn fileno(&self) -> i32 {
        self.read_slot.fd()
    }

    pub fn write_fileno(&self) -> i32 {
        self.write_slot.fd()
    }

    pub fn slot(&self, direction: Direction) -> &Rc<WaitSlot> {
        match direction {
            Direction::Read => &self.read_slot,
            Direction::Write => &self.write_slot,
        }
    }

    /// Bytes accepted by `write` but not yet flushed
    pub fn buffered(&self) -> usize {
        self.write_buf.borrow().len()
    }

    /// Repeat `op` on the `direction` descriptor until it stops asking to
    /// be retried
    pub(crate) fn retry<T>(
        &self,
        direction: Direction,
        name: &str,
        classify: fn(Errno) -> Retry,
        mut op: impl FnMut(i32) -> SysResult<T>,
    ) -> TaskResult<T> {
        let slot = self.slot(direction);
        let sched = self.reactor.scheduler();
        loop {
            slot.charge(sched)?;
            let fd = slot.fd();
            if fd < 0 {
                return Err(Bomb::io(libc::EBADF, name));
            }
            match op(fd) {
                Ok(v) => return Ok(v),
                Err(e) => match classify(e) {
                    Retry::Wait => {
                        self.reactor.wait(slot, None)?;
                    }
                    Retry::Again => {}
                    Retry::Fail => return Err(io_bomb(e, name)),
                },
            }
        }
    }

    /// Read up to `buf.len()` bytes; `Ok(0)` is end of file
    pub fn read_into(&self, buf: &mut [u8]) -> TaskResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let n = self.take_buffered(buf);
        if n > 0 {
            return Ok(n);
        }
        self.retry(Direction::Read, "read", classify, |fd| syscall::read(fd, buf))
    }

    /// Move read-ahead bytes into `buf`
    pub(crate) fn take_buffered(&self, buf: &mut [u8]) -> usize {
        let mut rb = self.read_buf.borrow_mut();
        let n = rb.len().min(buf.len());
        buf[..n].copy_from_slice(&rb[..n]);
        rb.drain(..n);
        n
    }

    /// One read of at least `want` bytes appended to the read buffer;
    /// 0 at end of file
    fn fill(&self, want: usize) -> TaskResult<usize> {
        let mut chunk = vec![0u8; want.max(READ_CHUNK)];
        let n = self.retry(Direction::Read, "read", classify, |fd| syscall::read(fd, &mut chunk))?;
        self.read_buf.borrow_mut().extend_from_slice(&chunk[..n]);
        Ok(n)
    }

    fn consume(&self, n: usize) -> Vec<u8> {
        self.read_buf.borrow_mut().drain(..n).collect()
    }

    /// Bytes read ahead and not consumed yet
    pub fn read_buffer_len(&self) -> usize {
        self.read_buf.borrow().len()
    }

    /// Copy of the read-ahead bytes
    pub fn read_buffer(&self) -> Vec<u8> {
        self.read_buf.borrow().clone()
    }

    /// Put `data` back in front of the read buffer
    pub fn unread(&self, data: &[u8]) {
        let mut rb = self.read_buf.borrow_mut();
        let mut joined = data.to_vec();
        joined.extend_from_slice(&rb);
        *rb = joined;
    }

    /// Append `data` to the read buffer as if it had been read
    pub fn unread_append(&self, data: &[u8]) {
        self.read_buf.borrow_mut().extend_from_slice(data);
    }

    /// Read until at least `n` more bytes are buffered or the file ends
    ///
    /// Returns how many bytes arrived, which may exceed `n`.
    pub fn read_more(&self, n: usize) -> TaskResult<usize> {
        let mut got = 0;
        while got < n {
            let k = self.fill(n - got)?;
            if k == 0 {
                break;
            }
            got += k;
        }
        Ok(got)
    }

    /// Read until the buffer holds at least `n` bytes or the file ends;
    /// returns the buffer length
    pub fn read_upto(&self, n: usize) -> TaskResult<usize> {
        let have = self.read_buffer_len();
        if have < n {
            self.read_more(n - have)?;
        }
        Ok(self.read_buffer_len())
    }

    /// Read through the next `\n`, but no more than `limit` bytes
    ///
    /// The line is shorter when the file ends first; empty at end of file.
    pub fn readline(&self, limit: Option<usize>) -> TaskResult<Vec<u8>> {
        self.readline_delim(b'\n', limit)
    }

    /// [`readline`](NonBlockingFile::readline) with another delimiter
    pub fn readline_delim(&self, delim: u8, limit: Option<usize>) -> TaskResult<Vec<u8>> {
        let limit = limit.unwrap_or(usize::MAX);
        loop {
            let found = {
                let rb = self.read_buf.borrow();
                let end = rb.len().min(limit);
                match rb[..end].iter().position(|&b| b == delim) {
                    Some(i) => Some(i + 1),
                    None if end == limit => Some(limit),
                    None => None,
                }
            };
            if let Some(n) = found {
                return Ok(self.consume(n));
            }
            if self.fill(1)? == 0 {
                return Ok(self.consume(self.read_buffer_len()));
            }
        }
    }

    /// Everything up to end of file, read buffer first
    pub fn read_to_end(&self) -> TaskResult<Vec<u8>> {
        while self.fill(READ_CHUNK)? > 0 {}
        Ok(self.consume(self.read_buffer_len()))
    }

    /// Read at most `size` bytes; empty at end of file
    pub fn read_at_most(&self, size: usize) -> TaskResult<Vec<u8>> {
        if size == 0 {
            return Ok(Vec::new());
        }
        let mut buf = vec![0u8; size];
        let n = self.read_into(&mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Buffer `data`; nothing reaches the descriptor before [`flush`]
    ///
    /// [`flush`]: NonBlockingFile::flush
    pub fn write(&self, data: &[u8]) {
        self.write_buf.borrow_mut().extend_from_slice(data);
    }

    /// Write out the whole buffer, suspending as often as needed
    ///
    /// On failure the unwritten bytes stay buffered.
    pub fn flush(&self) -> TaskResult<()> {
        loop {
            let data = std::mem::take(&mut *self.write_buf.borrow_mut());
            if data.is_empty() {
                return Ok(());
            }
            let is_socket = self.is_socket;
            let result = self.retry(Direction::Write, "write", classify, |fd| {
                if is_socket {
                    syscall::send(fd, &data, 0)
                } else {
                    syscall::write(fd, &data)
                }
            });
            // Whatever was buffered meanwhile goes after our leftover.
            let written = match result {
                Ok(n) => n,
                Err(bomb) => {
                    self.unshift(&data);
                    return Err(bomb);
                }
            };
            if written < data.len() {
                self.unshift(&data[written..]);
            }
        }
    }

    fn unshift(&self, rest: &[u8]) {
        let mut buf = self.write_buf.borrow_mut();
        let mut joined = rest.to_vec();
        joined.extend_from_slice(&buf);
        *buf = joined;
    }

    /// `write` + `flush`
    pub fn write_all(&self, data: &[u8]) -> TaskResult<()> {
        self.write(data);
        self.flush()
    }

    /// `true` once readable, `false` if `timeout` elapses first
    ///
    /// A timeout too large for an `Instant` waits without a deadline.
    pub fn wait_for_readable(&self, timeout: Option<Duration>) -> TaskResult<bool> {
        self.reactor.wait(&self.read_slot, deadline_after(timeout))
    }

    pub fn wait_for_writable(&self, timeout: Option<Duration>) -> TaskResult<bool> {
        self.reactor.wait(&self.write_slot, deadline_after(timeout))
    }

    /// `true` once readable, `false` if `deadline` passes first
    pub fn wait_for_readable_until(&self, deadline: Instant) -> TaskResult<bool> {
        self.reactor.wait(&self.read_slot, Some(deadline))
    }

    /// `true` once writable, `false` if `deadline` passes first
    pub fn wait_for_writable_until(&self, deadline: Instant) -> TaskResult<bool> {
        self.reactor.wait(&self.write_slot, Some(deadline))
    }

    /// Retire both slots and close the descriptors; idempotent
    ///
    /// Waiters are woken and their operations fail with `EBADF`.
    /// Unflushed data is discarded.
    pub fn close(&self) -> TaskResult<()> {
        let read_fd = self.read_slot.fd();
        let write_fd = self.write_slot.fd();
        if read_fd < 0 && write_fd < 0 {
            return Ok(());
        }
        self.read_buf.borrow_mut().clear();
        let dropped = std::mem::take(&mut *self.write_buf.borrow_mut());
        if !dropped.is_empty() {
            kdebug!("fd {}: {} unflushed bytes discarded", write_fd, dropped.len());
        }

        let retired = self
            .reactor
            .retire(&self.read_slot)
            .and(self.reactor.retire(&self.write_slot));

        let mut closed = Ok(());
        if read_fd >= 0 {
            closed = syscall::close(read_fd);
        }
        if write_fd >= 0 && write_fd != read_fd {
            closed = closed.and(syscall::close(write_fd));
        }
        retired?;
        closed.map_err(|e| io_bomb(e, "close"))
    }
}

pub(crate) fn deadline_after(timeout: Option<Duration>) -> Option<Instant> {
    timeout.and_then(|t| Instant::now().checked_add(t))
}

impl Drop for NonBlockingFile {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl std::fmt::Debug for NonBlockingFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonBlockingFile")
            .field("read_fd", &self.read_slot.fd())
            .field("write_fd", &self.write_slot.fd())
            .field("buffered", &self.buffered())
            .field("read_ahead", &self.read_buffer_len())
            .finish()
    }
}

impl NonBlockingTransport for NonBlockingFile {
    fn fileno(&self) -> i32 {
        NonBlockingFile::fileno(self)
    }

    fn read_into(&self, buf: &mut [u8]) -> TaskResult<usize> {
        NonBlockingFile::read_into(self, buf)
    }

    fn write_all(&self, data: &[u8]) -> TaskResult<()> {
        NonBlockingFile::write_all(self, data)
    }

    fn wait_for_readable(&self, timeout: Option<Duration>) -> TaskResult<bool> {
        NonBlockingFile::wait_for_readable(self, timeout)
    }

    fn wait_for_writable(&self, timeout: Option<Duration>) -> TaskResult<bool> {
        NonBlockingFile::wait_for_writable(self, timeout)
    }

    fn close(&self) -> TaskResult<()> {
        NonBlockingFile::close(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use strand_runtime::{IoMode, RuntimeConfig, Scheduler};

    const MODES: [IoMode; 3] = [IoMode::Select, IoMode::EpollLevel, IoMode::EpollEdge];

    fn on_thread(f: impl FnOnce() + Send + 'static) {
        std::thread::spawn(f).join().unwrap();
    }

    fn setup(mode: IoMode) -> (Scheduler, Reactor) {
        let config = RuntimeConfig::new().io_mode(mode);
        let sched = Scheduler::new(&config).unwrap();
        let reactor = Reactor::new(&sched).unwrap();
        (sched, reactor)
    }

    #[test]
    fn test_pipe_roundtrip_without_suspending() {
        on_thread(|| {
            let (_sched, reactor) = setup(IoMode::Select);
            let file = NonBlockingFile::pipe(&reactor).unwrap();
            file.write(b"hello ");
            file.write(b"world");
            assert_eq!(file.buffered(), 11);
            file.flush().unwrap();
            assert_eq!(file.buffered(), 0);
            assert_eq!(file.read_at_most(5).unwrap(), b"hello");
            assert_eq!(file.read_at_most(100).unwrap(), b" world");
            assert_eq!(file.read_at_most(0).unwrap(), b"");
        });
    }

    #[test]
    fn test_reader_suspends_until_writer() {
        for mode in MODES {
            on_thread(move || {
                let (sched, reactor) = setup(mode);
                let file = Rc::new(NonBlockingFile::pipe(&reactor).unwrap());
                let got = Rc::new(RefCell::new(Vec::new()));

                let (f, g) = (file.clone(), got.clone());
                sched
                    .spawn(move || {
                        let data = f.read_at_most(64)?;
                        g.borrow_mut().extend(data);
                        Ok(())
                    })
                    .unwrap();
                let (f, r) = (file.clone(), reactor.clone());
                sched
                    .spawn(move || {
                        r.sleep(Duration::from_millis(2))?;
                        f.write_all(b"late data")
                    })
                    .unwrap();

                reactor.run().unwrap();
                assert_eq!(got.borrow().as_slice(), b"late data");
            });
        }
    }

    #[test]
    fn test_eof_after_writer_closes() {
        on_thread(|| {
            let (_sched, reactor) = setup(IoMode::EpollEdge);
            let (r, w) = syscall::pipe().unwrap();
            let reader = NonBlockingFile::from_fd(&reactor, r).unwrap();
            let writer = NonBlockingFile::from_fd(&reactor, w).unwrap();
            writer.write_all(b"bye").unwrap();
            writer.close().unwrap();
            assert_eq!(reader.read_at_most(16).unwrap(), b"bye");
            assert_eq!(reader.read_at_most(16).unwrap(), b"");
        });
    }

    #[test]
    fn test_flush_handles_partial_writes() {
        for mode in MODES {
            on_thread(move || {
                let (sched, reactor) = setup(mode);
                let file = Rc::new(NonBlockingFile::pipe(&reactor).unwrap());
                // larger than any default pipe buffer
                let payload: Vec<u8> = (0..256 * 1024).map(|i| (i % 251) as u8).collect();
                let expected = payload.clone();

                let f = file.clone();
                sched
                    .spawn(move || {
                        f.write(&payload);
                        f.flush()
                    })
                    .unwrap();

                let mut got = Vec::new();
                while got.len() < expected.len() {
                    got.extend(file.read_at_most(8192).unwrap());
                }
                assert_eq!(got, expected);
                assert_eq!(file.buffered(), 0);
            });
        }
    }

    #[test]
    fn test_credit_forces_yield() {
        on_thread(|| {
            let (sched, reactor) = setup(IoMode::Select);
            let credits = sched.config().credits_per_iteration as u64;
            let file = NonBlockingFile::pipe(&reactor).unwrap();
            let attempts = 10 * (credits + 1);
            file.write_all(&vec![7u8; attempts as usize]).unwrap();

            let before = sched.schedule_count();
            for _ in 0..attempts {
                assert_eq!(file.read_at_most(1).unwrap(), [7]);
            }
            let yields = sched.schedule_count() - before;
            assert!(yields >= attempts / (credits + 1), "only {} yields", yields);
        });
    }

    #[test]
    fn test_busy_reader_lets_others_run() {
        on_thread(|| {
            let (sched, reactor) = setup(IoMode::EpollLevel);
            let file = NonBlockingFile::pipe(&reactor).unwrap();
            file.write_all(&[1u8; 200]).unwrap();

            let ticks = Rc::new(Cell::new(0));
            let (t, s) = (ticks.clone(), sched.clone());
            sched
                .spawn(move || -> TaskResult<()> {
                    loop {
                        t.set(t.get() + 1);
                        s.schedule()?;
                    }
                })
                .unwrap();

            for _ in 0..200 {
                file.read_at_most(1).unwrap();
            }
            let credits = sched.config().credits_per_iteration as usize;
            assert!(ticks.get() >= 200 / (credits + 1), "ticks {}", ticks.get());
        });
    }

    #[test]
    fn test_wait_for_readable_timeout() {
        for mode in MODES {
            on_thread(move || {
                let (_sched, reactor) = setup(mode);
                let file = NonBlockingFile::pipe(&reactor).unwrap();
                assert!(!file.wait_for_readable(Some(Duration::from_millis(5))).unwrap());
                assert!(file.wait_for_writable(Some(Duration::from_millis(5))).unwrap());
                file.write_all(b"x").unwrap();
                assert!(file.wait_for_readable(None).unwrap());
                let soon = Instant::now() + Duration::from_millis(5);
                assert!(file.wait_for_readable_until(soon).unwrap());
            });
        }
    }

    #[test]
    fn test_huge_timeout_waits_without_deadline() {
        for mode in MODES {
            on_thread(move || {
                let (_sched, reactor) = setup(mode);
                let file = NonBlockingFile::pipe(&reactor).unwrap();
                file.write_all(b"x").unwrap();
                assert!(file.wait_for_readable(Some(Duration::MAX)).unwrap());
                assert!(file.wait_for_writable(Some(Duration::MAX)).unwrap());
                assert!(!reactor.has_pending());
            });
        }
    }

    #[test]
    fn test_regular_file_is_always_ready() {
        use std::os::fd::IntoRawFd;

        for mode in MODES {
            on_thread(move || {
                let (_sched, reactor) = setup(mode);
                let path = std::env::temp_dir()
                    .join(format!("strand-file-{}-{:?}", std::process::id(), mode));
                std::fs::write(&path, b"on disk").unwrap();
                let fd = std::fs::File::open(&path).unwrap().into_raw_fd();
                std::fs::remove_file(&path).unwrap();

                let file = NonBlockingFile::from_fd(&reactor, fd).unwrap();
                assert!(file.wait_for_readable(None).unwrap());
                assert_eq!(file.read_to_end().unwrap(), b"on disk");
            });
        }
    }

    /// Separate reader and writer over one pipe, so the writer can send EOF
    fn pipe_pair(reactor: &Reactor) -> (Rc<NonBlockingFile>, Rc<NonBlockingFile>) {
        let (r, w) = syscall::pipe().unwrap();
        (
            Rc::new(NonBlockingFile::from_fd(reactor, r).unwrap()),
            Rc::new(NonBlockingFile::from_fd(reactor, w).unwrap()),
        )
    }

    #[test]
    fn test_readline_with_limits() {
        on_thread(|| {
            let (_sched, reactor) = setup(IoMode::Select);
            let file = NonBlockingFile::pipe(&reactor).unwrap();
            assert_eq!(file.readline(Some(0)).unwrap(), b"");
            file.write_all(b"foobarbaz").unwrap();
            assert_eq!(file.readline(Some(0)).unwrap(), b"");
            assert_eq!(file.readline(Some(2)).unwrap(), b"fo");
            assert_eq!(file.readline(Some(3)).unwrap(), b"oba");
            file.write_all(b"X\n\nYZ\n").unwrap();
            assert_eq!(file.readline(Some(1)).unwrap(), b"r");
            assert_eq!(file.readline(Some(0)).unwrap(), b"");
            assert_eq!(file.readline(None).unwrap(), b"bazX\n");
            assert_eq!(file.readline(Some(0)).unwrap(), b"");
            assert_eq!(file.readline(None).unwrap(), b"\n");
            assert_eq!(file.readline(None).unwrap(), b"YZ\n");
            file.write_all(b"\nABC").unwrap();
            assert_eq!(file.readline(Some(1)).unwrap(), b"\n");
            assert_eq!(file.readline(Some(3)).unwrap(), b"ABC");
        });
    }

    #[test]
    fn test_readline_waits_for_writer() {
        for mode in MODES {
            on_thread(move || {
                let (sched, reactor) = setup(mode);
                let file = Rc::new(NonBlockingFile::pipe(&reactor).unwrap());
                let f = file.clone();
                sched
                    .spawn(move || {
                        f.write_all(b"foo\nbar")?;
                        f.reactor().scheduler().schedule()?;
                        f.write_all(b"\nbaz\n")
                    })
                    .unwrap();
                assert_eq!(file.readline(Some(3)).unwrap(), b"foo");
                assert_eq!(file.readline(None).unwrap(), b"\n");
                assert_eq!(file.readline(None).unwrap(), b"bar\n");
                assert_eq!(file.readline(None).unwrap(), b"baz\n");
                assert_eq!(file.read_buffer_len(), 0);
            });
        }
    }

    #[test]
    fn test_long_line_across_partial_writes() {
        on_thread(|| {
            let (sched, reactor) = setup(IoMode::EpollEdge);
            let file = Rc::new(NonBlockingFile::pipe(&reactor).unwrap());
            let line: Vec<u8> = b"ABCDEFGHI".iter().cycle().take(9 * 111_111).copied().collect();
            let mut sent = line.clone();
            sent.extend_from_slice(b"\nfoo");

            let f = file.clone();
            sched.spawn(move || f.write_all(&sent)).unwrap();
            let got = file.readline(None).unwrap();
            assert_eq!(got.len(), line.len() + 1);
            assert_eq!(&got[..line.len()], &line[..]);
            assert_eq!(file.readline(Some(3)).unwrap(), b"foo");
        });
    }

    fn split_all(reactor: &Reactor, input: &[u8], delim: u8, limit: Option<usize>) -> Vec<Vec<u8>> {
        let (reader, writer) = pipe_pair(reactor);
        writer.write_all(input).unwrap();
        writer.close().unwrap();
        let mut parts = Vec::new();
        loop {
            let part = reader.readline_delim(delim, limit).unwrap();
            if part.is_empty() {
                return parts;
            }
            parts.push(part);
        }
    }

    #[test]
    fn test_readline_with_delimiter() {
        on_thread(|| {
            let (_sched, reactor) = setup(IoMode::EpollLevel);
            assert_eq!(
                split_all(&reactor, b"brakadabra", b'a', None),
                [&b"bra"[..], b"ka", b"da", b"bra"]
            );
            assert_eq!(
                split_all(&reactor, b"abrakadabra!", b'a', None),
                [&b"a"[..], b"bra", b"ka", b"da", b"bra", b"!"]
            );
            assert_eq!(
                split_all(&reactor, b"br\xffk\xffd\xffbr\xff", 0xff, Some(3)),
                [&b"br\xff"[..], b"k\xff", b"d\xff", b"br\xff"]
            );
            // the limit cuts lines that are too long
            assert_eq!(split_all(&reactor, b"abcdef\ng", b'\n', Some(4)), [&b"abcd"[..], b"ef\n", b"g"]);
        });
    }

    #[test]
    fn test_read_more_and_read_upto() {
        on_thread(|| {
            let (sched, reactor) = setup(IoMode::EpollLevel);
            let (reader, writer) = pipe_pair(&reactor);

            writer.write_all(b"foobar").unwrap();
            // reads whatever is there, not just what was asked for
            assert_eq!(reader.read_upto(2).unwrap(), 6);
            assert_eq!(reader.read_buffer(), b"foobar");
            writer.write_all(b"baz").unwrap();
            assert_eq!(reader.read_upto(6).unwrap(), 6);
            assert_eq!(reader.read_upto(7).unwrap(), 9);
            assert_eq!(reader.read_buffer(), b"foobarbaz");

            writer.write_all(b"hi").unwrap();
            assert_eq!(reader.read_more(0).unwrap(), 0);
            assert_eq!(reader.read_more(1).unwrap(), 2);
            assert_eq!(reader.read_buffer(), b"foobarbazhi");

            let (w, s) = (writer.clone(), sched.clone());
            sched
                .spawn(move || {
                    w.write_all(b"HEL")?;
                    // the reader has to go around its loop twice
                    s.schedule()?;
                    w.write_all(b"LO!")
                })
                .unwrap();
            assert_eq!(reader.read_more(5).unwrap(), 6);
            assert_eq!(reader.read_buffer(), b"foobarbazhiHELLO!");

            let w = writer.clone();
            sched
                .spawn(move || {
                    w.write_all(b"end")?;
                    w.close()
                })
                .unwrap();
            assert_eq!(reader.read_more(5).unwrap(), 3);
            assert_eq!(reader.read_buffer(), b"foobarbazhiHELLO!end");
            assert_eq!(reader.read_at_most(6).unwrap(), b"foobar");
            assert_eq!(reader.read_to_end().unwrap(), b"bazhiHELLO!end");
        });
    }

    #[test]
    fn test_unread_puts_bytes_back() {
        on_thread(|| {
            let (_sched, reactor) = setup(IoMode::Select);
            let file = NonBlockingFile::pipe(&reactor).unwrap();
            file.unread(b"barb");
            file.unread(b"FOO");
            file.unread_append(b"az");
            assert_eq!(file.read_buffer_len(), 9);
            assert_eq!(file.read_buffer(), b"FOObarbaz");
            assert_eq!(file.readline_delim(b'r', None).unwrap(), b"FOObar");
            assert_eq!(file.read_at_most(16).unwrap(), b"baz");
        });
    }

    #[test]
    fn test_long_read_to_end() {
        for mode in MODES {
            on_thread(move || {
                let (sched, reactor) = setup(mode);
                let (reader, writer) = pipe_pair(&reactor);
                // more than a pipe buffers, so both sides suspend
                let data: Vec<u8> = b"FooBarBaz".iter().cycle().take(9 * 22_222).copied().collect();
                let sent = data.clone();
                sched
                    .spawn(move || {
                        writer.write_all(&sent)?;
                        writer.close()
                    })
                    .unwrap();
                assert_eq!(reader.read_to_end().unwrap(), data);
            });
        }
    }

    #[test]
    fn test_close_is_idempotent_and_fails_later_ops() {
        on_thread(|| {
            let (_sched, reactor) = setup(IoMode::Select);
            let file = NonBlockingFile::pipe(&reactor).unwrap();
            let (r, w) = (file.fileno(), file.write_fileno());
            assert_ne!(r, w);
            file.write(b"lost");
            file.close().unwrap();
            file.close().unwrap();
            assert_eq!(file.fileno(), -2 - r);
            assert_eq!(file.write_fileno(), -2 - w);
            assert!(NonBlockingTransport::is_closed(&file));
            assert_eq!(file.buffered(), 0);

            let err = file.read_at_most(1).unwrap_err();
            assert_eq!(err.errno(), Some(libc::EBADF));
            let err = file.write_all(b"x").unwrap_err();
            assert_eq!(err.errno(), Some(libc::EBADF));
            assert!(!file.wait_for_readable(None).unwrap());
        });
    }

    #[test]
    fn test_close_wakes_blocked_reader_with_ebadf() {
        for mode in MODES {
            on_thread(move || {
                let (sched, reactor) = setup(mode);
                let file = Rc::new(NonBlockingFile::pipe(&reactor).unwrap());
                let errno = Rc::new(Cell::new(None));

                let (f, e) = (file.clone(), errno.clone());
                sched
                    .spawn(move || {
                        if let Err(bomb) = f.read_at_most(8) {
                            e.set(bomb.errno());
                        }
                        Ok(())
                    })
                    .unwrap();
                sched.schedule().unwrap();
                file.close().unwrap();
                reactor.run().unwrap();
                assert_eq!(errno.get(), Some(libc::EBADF));
            });
        }
    }

    #[test]
    fn test_bad_descriptor_is_rejected() {
        on_thread(|| {
            let (_sched, reactor) = setup(IoMode::Select);
            let err = NonBlockingFile::from_fd(&reactor, -1).unwrap_err();
            assert_eq!(err.errno(), Some(libc::EBADF));
        });
    }

    #[test]
    fn test_io_adapter_over_file() {
        use std::io::{Read, Write};
        use strand_core::IoAdapter;

        on_thread(|| {
            let (_sched, reactor) = setup(IoMode::EpollEdge);
            let mut io = IoAdapter(NonBlockingFile::pipe(&reactor).unwrap());
            io.write_all(b"adapted").unwrap();
            let mut buf = [0u8; 7];
            io.read_exact(&mut buf).unwrap();
            assert_eq!(&buf, b"adapted");
        });
    }
}
