//! Non-blocking sockets
//!
//! [`NonBlockingSocket`] is a [`NonBlockingFile`] over one socket
//! descriptor plus the socket calls, each retried the same way: suspend on
//! would-block, retry on `EINTR`, surface anything else as an `Io` bomb.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use strand_core::{NonBlockingTransport, TaskResult};

use crate::file::{classify, io_bomb, NonBlockingFile, Retry};
use crate::reactor::Reactor;
use crate::syscall;
use crate::wait_slot::Direction;

/// `accept` only gives up on errors that say the listener itself is broken.
/// Anything else (aborted handshakes, descriptor exhaustion) is retried.
fn classify_accept(e: Errno) -> Retry {
    match e {
        Errno::EAGAIN => Retry::Wait,
        Errno::EBADF | Errno::EINVAL | Errno::ENOTSOCK | Errno::EOPNOTSUPP | Errno::EFAULT => {
            Retry::Fail
        }
        _ => Retry::Again,
    }
}

/// Socket whose blocking calls suspend only the calling task
pub struct NonBlockingSocket {
    file: NonBlockingFile,
    domain: i32,
    ty: i32,
    protocol: i32,
}

impl NonBlockingSocket {
    /// `socket(domain, ty, protocol)`, e.g. `(AF_INET, SOCK_STREAM, 0)`
    pub fn new(reactor: &Reactor, domain: i32, ty: i32, protocol: i32) -> TaskResult<Self> {
        let fd = syscall::socket(domain, ty, protocol).map_err(|e| io_bomb(e, "socket"))?;
        Self::from_parts(reactor, fd, domain, ty, protocol).inspect_err(|_| {
            let _ = syscall::close(fd);
        })
    }

    /// Take ownership of an existing socket descriptor
    pub fn from_fd(reactor: &Reactor, fd: i32) -> TaskResult<Self> {
        let ty = syscall::get_int_option(fd, libc::SOL_SOCKET, libc::SO_TYPE)
            .map_err(|e| io_bomb(e, "getsockopt"))?;
        cfg_if::cfg_if! {
            if #[cfg(any(target_os = "linux", target_os = "android"))] {
                let domain = syscall::get_int_option(fd, libc::SOL_SOCKET, libc::SO_DOMAIN)
                    .map_err(|e| io_bomb(e, "getsockopt"))?;
                let protocol = syscall::get_int_option(fd, libc::SOL_SOCKET, libc::SO_PROTOCOL)
                    .map_err(|e| io_bomb(e, "getsockopt"))?;
            } else {
                let domain = libc::AF_UNSPEC;
                let protocol = 0;
            }
        }
        Self::from_parts(reactor, fd, domain, ty, protocol)
    }

    fn from_parts(
        reactor: &Reactor,
        fd: i32,
        domain: i32,
        ty: i32,
        protocol: i32,
    ) -> TaskResult<Self> {
        Ok(Self {
            file: NonBlockingFile::with_kind(reactor, fd, fd, true)?,
            domain,
            ty,
            protocol,
        })
    }

    /// Connected `AF_UNIX` stream pair
    pub fn pair(reactor: &Reactor) -> TaskResult<(Self, Self)> {
        let (a, b) = syscall::socketpair(libc::SOCK_STREAM).map_err(|e| io_bomb(e, "socketpair"))?;
        Self::adopt_pair(reactor, a, b)
    }

    /// Wrap both ends, closing whatever is not wrapped on failure
    fn adopt_pair(reactor: &Reactor, a: i32, b: i32) -> TaskResult<(Self, Self)> {
        let first = match Self::from_parts(reactor, a, libc::AF_UNIX, libc::SOCK_STREAM, 0) {
            Ok(sock) => sock,
            Err(bomb) => {
                let _ = syscall::close(a);
                let _ = syscall::close(b);
                return Err(bomb);
            }
        };
        // `first` closes its end when dropped
        let second = Self::from_parts(reactor, b, libc::AF_UNIX, libc::SOCK_STREAM, 0)
            .inspect_err(|_| {
                let _ = syscall::close(b);
            })?;
        Ok((first, second))
    }

    /// TCP socket bound to `addr` and listening
    pub fn listen_tcp(reactor: &Reactor, addr: &SocketAddr, backlog: i32) -> TaskResult<Self> {
        let domain = match addr {
            SocketAddr::V4(_) => libc::AF_INET,
            SocketAddr::V6(_) => libc::AF_INET6,
        };
        let sock = Self::new(reactor, domain, libc::SOCK_STREAM, 0)?;
        sock.set_reuse_addr(true)?;
        sock.bind(addr)?;
        sock.listen(backlog)?;
        Ok(sock)
    }

    pub fn domain(&self) -> i32 {
        self.domain
    }

    pub fn socket_type(&self) -> i32 {
        self.ty
    }

    pub fn protocol(&self) -> i32 {
        self.protocol
    }

    /// The underlying file, for buffered `write`/`flush` and waits
    pub fn as_file(&self) -> &NonBlockingFile {
        &self.file
    }

    pub fn fileno(&self) -> i32 {
        self.file.fileno()
    }

    fn open_fd(&self, op: &str) -> TaskResult<i32> {
        let fd = self.file.fileno();
        if fd < 0 {
            return Err(io_bomb(Errno::EBADF, op));
        }
        Ok(fd)
    }

    pub fn bind(&self, addr: &SocketAddr) -> TaskResult<()> {
        let fd = self.open_fd("bind")?;
        syscall::bind(fd, addr).map_err(|e| io_bomb(e, "bind"))
    }

    pub fn listen(&self, backlog: i32) -> TaskResult<()> {
        let fd = self.open_fd("listen")?;
        syscall::listen(fd, backlog).map_err(|e| io_bomb(e, "listen"))
    }

    pub fn set_reuse_addr(&self, on: bool) -> TaskResult<()> {
        let fd = self.open_fd("setsockopt")?;
        syscall::set_int_option(fd, libc::SOL_SOCKET, libc::SO_REUSEADDR, on as i32)
            .map_err(|e| io_bomb(e, "setsockopt"))
    }

    pub fn local_addr(&self) -> TaskResult<Option<SocketAddr>> {
        let fd = self.open_fd("getsockname")?;
        syscall::local_addr(fd).map_err(|e| io_bomb(e, "getsockname"))
    }

    pub fn peer_addr(&self) -> TaskResult<Option<SocketAddr>> {
        let fd = self.open_fd("getpeername")?;
        syscall::peer_addr(fd).map_err(|e| io_bomb(e, "getpeername"))
    }

    /// Wait for a connection; the accepted socket shares this reactor
    pub fn accept(&self) -> TaskResult<(NonBlockingSocket, Option<SocketAddr>)> {
        let (fd, peer) = self
            .file
            .retry(Direction::Read, "accept", classify_accept, syscall::accept)?;
        let sock = Self::from_parts(self.file.reactor(), fd, self.domain, self.ty, self.protocol)
            .inspect_err(|_| {
                let _ = syscall::close(fd);
            })?;
        Ok((sock, peer))
    }

    /// Connect, suspending until the handshake completes
    pub fn connect(&self, addr: &SocketAddr) -> TaskResult<()> {
        let slot = self.file.slot(Direction::Write);
        let sched = self.file.reactor().scheduler();
        loop {
            slot.charge(sched)?;
            let fd = self.open_fd("connect")?;
            match syscall::connect(fd, addr) {
                Ok(()) | Err(Errno::EISCONN) => return Ok(()),
                Err(Errno::EINTR) => continue,
                Err(Errno::EINPROGRESS | Errno::EALREADY | Errno::EAGAIN) => {
                    if !self.file.reactor().wait(slot, None)? {
                        continue;
                    }
                    return match syscall::take_socket_error(fd) {
                        Ok(None) => Ok(()),
                        Ok(Some(e)) | Err(e) => Err(io_bomb(e, "connect")),
                    };
                }
                Err(e) => return Err(io_bomb(e, "connect")),
            }
        }
    }

    /// Receive at most `size` bytes; empty once the peer has shut down
    pub fn recv(&self, size: usize, flags: i32) -> TaskResult<Vec<u8>> {
        let mut buf = vec![0u8; size];
        let n = self.recv_into(&mut buf, flags)?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Bytes left in the read buffer by `as_file().readline()` and friends
    /// come first, unless `flags` has `MSG_PEEK`
    pub fn recv_into(&self, buf: &mut [u8], flags: i32) -> TaskResult<usize> {
        if flags & libc::MSG_PEEK == 0 && !buf.is_empty() {
            let n = self.file.take_buffered(buf);
            if n > 0 {
                return Ok(n);
            }
        }
        self.file
            .retry(Direction::Read, "recv", classify, |fd| syscall::recv(fd, buf, flags))
    }

    /// Receive one datagram (or stream chunk) with its sender's address
    pub fn recvfrom(&self, size: usize, flags: i32) -> TaskResult<(Vec<u8>, Option<SocketAddr>)> {
        let mut buf = vec![0u8; size];
        let (n, from) = self.file.retry(Direction::Read, "recvfrom", classify, |fd| {
            syscall::recvfrom(fd, &mut buf, flags)
        })?;
        buf.truncate(n);
        Ok((buf, from))
    }

    /// Send once; returns how much the kernel took
    pub fn send(&self, data: &[u8], flags: i32) -> TaskResult<usize> {
        self.file
            .retry(Direction::Write, "send", classify, |fd| syscall::send(fd, data, flags))
    }

    pub fn sendto(&self, data: &[u8], flags: i32, addr: &SocketAddr) -> TaskResult<usize> {
        self.file.retry(Direction::Write, "sendto", classify, |fd| {
            syscall::sendto(fd, data, flags, addr)
        })
    }

    /// Send every byte, after anything still buffered by `write`
    pub fn sendall(&self, data: &[u8], flags: i32) -> TaskResult<()> {
        self.file.flush()?;
        let mut rest = data;
        while !rest.is_empty() {
            let n = self.send(rest, flags)?;
            rest = &rest[n..];
        }
        Ok(())
    }

    /// Buffer `data` until [`flush`](NonBlockingSocket::flush)
    pub fn write(&self, data: &[u8]) {
        self.file.write(data)
    }

    pub fn flush(&self) -> TaskResult<()> {
        self.file.flush()
    }

    pub fn wait_for_readable(&self, timeout: Option<Duration>) -> TaskResult<bool> {
        self.file.wait_for_readable(timeout)
    }

    pub fn wait_for_writable(&self, timeout: Option<Duration>) -> TaskResult<bool> {
        self.file.wait_for_writable(timeout)
    }

    pub fn wait_for_readable_until(&self, deadline: Instant) -> TaskResult<bool> {
        self.file.wait_for_readable_until(deadline)
    }

    pub fn wait_for_writable_until(&self, deadline: Instant) -> TaskResult<bool> {
        self.file.wait_for_writable_until(deadline)
    }

    /// Close the descriptor; idempotent
    pub fn close(&self) -> TaskResult<()> {
        self.file.close()
    }
}

impl std::fmt::Debug for NonBlockingSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonBlockingSocket")
            .field("fd", &self.file.fileno())
            .field("domain", &self.domain)
            .field("type", &self.ty)
            .finish()
    }
}

impl NonBlockingTransport for NonBlockingSocket {
    fn fileno(&self) -> i32 {
        self.file.fileno()
    }

    fn read_into(&self, buf: &mut [u8]) -> TaskResult<usize> {
        self.recv_into(buf, 0)
    }

    fn write_all(&self, data: &[u8]) -> TaskResult<()> {
        self.sendall(data, 0)
    }

    fn wait_for_readable(&self, timeout: Option<Duration>) -> TaskResult<bool> {
        self.file.wait_for_readable(timeout)
    }

    fn wait_for_writable(&self, timeout: Option<Duration>) -> TaskResult<bool> {
        self.file.wait_for_writable(timeout)
    }

    fn close(&self) -> TaskResult<()> {
        self.file.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
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

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn test_accept_errno_classification() {
        assert_eq!(classify_accept(Errno::EAGAIN), Retry::Wait);
        assert_eq!(classify_accept(Errno::EBADF), Retry::Fail);
        assert_eq!(classify_accept(Errno::ENOTSOCK), Retry::Fail);
        assert_eq!(classify_accept(Errno::ECONNABORTED), Retry::Again);
        assert_eq!(classify_accept(Errno::EMFILE), Retry::Again);
        assert_eq!(classify(Errno::EINTR), Retry::Again);
        assert_eq!(classify(Errno::ECONNRESET), Retry::Fail);
    }

    #[test]
    fn test_socketpair_exchange_across_modes() {
        for mode in MODES {
            on_thread(move || {
                let (sched, reactor) = setup(mode);
                let (a, b) = NonBlockingSocket::pair(&reactor).unwrap();
                let b = Rc::new(b);
                let got = Rc::new(RefCell::new(Vec::new()));

                let (peer, g) = (b.clone(), got.clone());
                sched
                    .spawn(move || {
                        let data = peer.recv(64, 0)?;
                        g.borrow_mut().extend(data);
                        peer.sendall(b"pong", 0)
                    })
                    .unwrap();

                sched.schedule().unwrap();
                a.sendall(b"ping", 0).unwrap();
                assert_eq!(a.recv(64, 0).unwrap(), b"pong");
                assert_eq!(got.borrow().as_slice(), b"ping");
                assert_eq!(a.domain(), libc::AF_UNIX);
            });
        }
    }

    #[test]
    fn test_failed_pair_closes_both_ends() {
        on_thread(|| {
            let (_sched, reactor) = setup(IoMode::Select);
            let (x, y) = syscall::socketpair(libc::SOCK_STREAM).unwrap();
            let err = NonBlockingSocket::adopt_pair(&reactor, -1, x).unwrap_err();
            assert_eq!(err.errno(), Some(libc::EBADF));
            // `x` was closed, so its peer sees end of file
            let mut buf = [0u8; 4];
            assert_eq!(syscall::recv(y, &mut buf, 0).unwrap(), 0);
            syscall::close(y).unwrap();
        });
    }

    #[test]
    fn test_recv_drains_line_buffer_first() {
        on_thread(|| {
            let (_sched, reactor) = setup(IoMode::EpollEdge);
            let (a, b) = NonBlockingSocket::pair(&reactor).unwrap();
            a.sendall(b"line\nrest", 0).unwrap();
            assert_eq!(b.as_file().readline(None).unwrap(), b"line\n");
            assert_eq!(b.as_file().read_buffer(), b"rest");
            assert_eq!(b.recv(16, 0).unwrap(), b"rest");
            assert_eq!(b.as_file().read_buffer_len(), 0);
        });
    }

    #[test]
    fn test_tcp_accept_and_connect() {
        for mode in MODES {
            on_thread(move || {
                let (sched, reactor) = setup(mode);
                let listener = NonBlockingSocket::listen_tcp(&reactor, &loopback(), 16).unwrap();
                let addr = listener.local_addr().unwrap().unwrap();

                let r = reactor.clone();
                sched
                    .spawn(move || {
                        let client = NonBlockingSocket::new(&r, libc::AF_INET, libc::SOCK_STREAM, 0)?;
                        client.connect(&addr)?;
                        client.write(b"hello ");
                        client.write(b"server");
                        client.flush()?;
                        client.close()
                    })
                    .unwrap();

                let (conn, peer) = listener.accept().unwrap();
                assert!(peer.unwrap().ip().is_loopback());
                assert_eq!(conn.local_addr().unwrap(), Some(addr));
                assert_eq!(conn.socket_type(), libc::SOCK_STREAM);

                let mut got = Vec::new();
                loop {
                    let chunk = conn.recv(4, 0).unwrap();
                    if chunk.is_empty() {
                        break;
                    }
                    got.extend(chunk);
                }
                assert_eq!(got, b"hello server");
            });
        }
    }

    #[test]
    fn test_connect_refused_is_io_bomb() {
        on_thread(|| {
            let (_sched, reactor) = setup(IoMode::EpollEdge);
            // grab a free port, then stop listening on it
            let addr = {
                let l = NonBlockingSocket::listen_tcp(&reactor, &loopback(), 1).unwrap();
                l.local_addr().unwrap().unwrap()
            };
            let client = NonBlockingSocket::new(&reactor, libc::AF_INET, libc::SOCK_STREAM, 0).unwrap();
            let err = client.connect(&addr).unwrap_err();
            assert_eq!(err.errno(), Some(libc::ECONNREFUSED));
        });
    }

    #[test]
    fn test_udp_sendto_recvfrom() {
        on_thread(|| {
            let (_sched, reactor) = setup(IoMode::EpollLevel);
            let server = NonBlockingSocket::new(&reactor, libc::AF_INET, libc::SOCK_DGRAM, 0).unwrap();
            server.bind(&loopback()).unwrap();
            let server_addr = server.local_addr().unwrap().unwrap();

            let client = NonBlockingSocket::new(&reactor, libc::AF_INET, libc::SOCK_DGRAM, 0).unwrap();
            client.bind(&loopback()).unwrap();
            let client_addr = client.local_addr().unwrap().unwrap();

            assert_eq!(client.sendto(b"datagram", 0, &server_addr).unwrap(), 8);
            let (data, from) = server.recvfrom(64, 0).unwrap();
            assert_eq!(data, b"datagram");
            assert_eq!(from, Some(client_addr));
        });
    }

    #[test]
    fn test_from_fd_reads_socket_kind() {
        use std::os::fd::IntoRawFd;

        on_thread(|| {
            let (_sched, reactor) = setup(IoMode::Select);
            let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            let expected = std_listener.local_addr().unwrap();
            let sock = NonBlockingSocket::from_fd(&reactor, std_listener.into_raw_fd()).unwrap();
            assert_eq!(sock.socket_type(), libc::SOCK_STREAM);
            #[cfg(target_os = "linux")]
            assert_eq!(sock.domain(), libc::AF_INET);
            assert_eq!(sock.local_addr().unwrap(), Some(expected));
            assert_eq!(sock.peer_addr().unwrap_err().errno(), Some(libc::ENOTCONN));
        });
    }

    #[test]
    fn test_closed_socket_ops_fail_with_ebadf() {
        on_thread(|| {
            let (_sched, reactor) = setup(IoMode::Select);
            let (a, _b) = NonBlockingSocket::pair(&reactor).unwrap();
            a.close().unwrap();
            a.close().unwrap();
            assert!(NonBlockingTransport::is_closed(&a));
            assert_eq!(a.recv(1, 0).unwrap_err().errno(), Some(libc::EBADF));
            assert_eq!(a.send(b"x", 0).unwrap_err().errno(), Some(libc::EBADF));
            assert_eq!(a.local_addr().unwrap_err().errno(), Some(libc::EBADF));
        });
    }
}
