//! # Thin libc wrappers
//!
//! Every call returns `SysResult<T>`: the raw return value on success or
//! the `errno` it left behind. Retrying and suspending are the caller's
//! business; nothing here blocks unless the descriptor itself is blocking.

use std::mem;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::time::Duration;

use nix::errno::Errno;
use nix::fcntl::OFlag;

pub type SysResult<T> = Result<T, Errno>;

#[inline]
fn check(ret: libc::c_int) -> SysResult<libc::c_int> {
    if ret < 0 {
        Err(Errno::last())
    } else {
        Ok(ret)
    }
}

#[inline]
fn check_len(ret: libc::ssize_t) -> SysResult<usize> {
    if ret < 0 {
        Err(Errno::last())
    } else {
        Ok(ret as usize)
    }
}

// ============================================================================
// Descriptors
// ============================================================================

pub fn read(fd: i32, buf: &mut [u8]) -> SysResult<usize> {
    check_len(unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) })
}

pub fn write(fd: i32, data: &[u8]) -> SysResult<usize> {
    check_len(unsafe { libc::write(fd, data.as_ptr() as *const libc::c_void, data.len()) })
}

pub fn close(fd: i32) -> SysResult<()> {
    check(unsafe { libc::close(fd) }).map(drop)
}

/// `pipe(2)` with both ends close-on-exec; returns `(read, write)`
pub fn pipe() -> SysResult<(i32, i32)> {
    let mut fds = [-1i32; 2];
    check(unsafe { libc::pipe(fds.as_mut_ptr()) })?;
    for fd in fds {
        check(unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) })?;
    }
    Ok((fds[0], fds[1]))
}

/// Switch `O_NONBLOCK` off (`blocking = true`) or on
///
/// Returns whether the descriptor was blocking before the call.
pub fn set_fd_blocking(fd: i32, blocking: bool) -> SysResult<bool> {
    let raw = check(unsafe { libc::fcntl(fd, libc::F_GETFL) })?;
    let old = OFlag::from_bits_truncate(raw);
    let mut new = old;
    new.set(OFlag::O_NONBLOCK, !blocking);
    if new != old {
        check(unsafe { libc::fcntl(fd, libc::F_SETFL, new.bits()) })?;
    }
    Ok(!old.contains(OFlag::O_NONBLOCK))
}

/// Zero-timeout `poll(2)` on one descriptor: does it report any of `events`?
pub fn poll_ready(fd: i32, events: libc::c_short) -> bool {
    let mut pfd = libc::pollfd {
        fd,
        events,
        revents: 0,
    };
    let ret = unsafe { libc::poll(&mut pfd, 1, 0) };
    ret > 0 && pfd.revents & (events | libc::POLLHUP | libc::POLLERR) != 0
}

/// Milliseconds for `epoll_wait`/`poll`, rounded up; `None` waits forever
pub fn timeout_ms(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(d) => {
            let ms = d.as_nanos().div_ceil(1_000_000);
            ms.min(libc::c_int::MAX as u128) as libc::c_int
        }
    }
}

// ============================================================================
// Sockets
// ============================================================================

pub fn socket(domain: i32, ty: i32, protocol: i32) -> SysResult<i32> {
    cfg_if::cfg_if! {
        if #[cfg(any(target_os = "linux", target_os = "android"))] {
            check(unsafe { libc::socket(domain, ty | libc::SOCK_CLOEXEC, protocol) })
        } else {
            let fd = check(unsafe { libc::socket(domain, ty, protocol) })?;
            unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) };
            Ok(fd)
        }
    }
}

/// Connected `AF_UNIX` pair; both ends close-on-exec
pub fn socketpair(ty: i32) -> SysResult<(i32, i32)> {
    let mut fds = [-1i32; 2];
    check(unsafe { libc::socketpair(libc::AF_UNIX, ty, 0, fds.as_mut_ptr()) })?;
    for fd in fds {
        check(unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) })?;
    }
    Ok((fds[0], fds[1]))
}

pub fn bind(fd: i32, addr: &SocketAddr) -> SysResult<()> {
    let (storage, len) = to_sockaddr(addr);
    check(unsafe { libc::bind(fd, &storage as *const _ as *const libc::sockaddr, len) }).map(drop)
}

pub fn listen(fd: i32, backlog: i32) -> SysResult<()> {
    check(unsafe { libc::listen(fd, backlog) }).map(drop)
}

/// Accept one connection; the new descriptor is close-on-exec
pub fn accept(fd: i32) -> SysResult<(i32, Option<SocketAddr>)> {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    let ptr = &mut storage as *mut _ as *mut libc::sockaddr;

    cfg_if::cfg_if! {
        if #[cfg(any(target_os = "linux", target_os = "android"))] {
            let conn = check(unsafe { libc::accept4(fd, ptr, &mut len, libc::SOCK_CLOEXEC) })?;
        } else {
            let conn = check(unsafe { libc::accept(fd, ptr, &mut len) })?;
            unsafe { libc::fcntl(conn, libc::F_SETFD, libc::FD_CLOEXEC) };
        }
    }
    Ok((conn, from_sockaddr(&storage, len)))
}

pub fn connect(fd: i32, addr: &SocketAddr) -> SysResult<()> {
    let (storage, len) = to_sockaddr(addr);
    check(unsafe { libc::connect(fd, &storage as *const _ as *const libc::sockaddr, len) })
        .map(drop)
}

pub fn recv(fd: i32, buf: &mut [u8], flags: i32) -> SysResult<usize> {
    check_len(unsafe { libc::recv(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), flags) })
}

pub fn recvfrom(fd: i32, buf: &mut [u8], flags: i32) -> SysResult<(usize, Option<SocketAddr>)> {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    let n = check_len(unsafe {
        libc::recvfrom(
            fd,
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
            flags,
            &mut storage as *mut _ as *mut libc::sockaddr,
            &mut len,
        )
    })?;
    Ok((n, from_sockaddr(&storage, len)))
}

pub fn send(fd: i32, data: &[u8], flags: i32) -> SysResult<usize> {
    check_len(unsafe {
        libc::send(fd, data.as_ptr() as *const libc::c_void, data.len(), flags | NOSIGNAL)
    })
}

pub fn sendto(fd: i32, data: &[u8], flags: i32, addr: &SocketAddr) -> SysResult<usize> {
    let (storage, len) = to_sockaddr(addr);
    check_len(unsafe {
        libc::sendto(
            fd,
            data.as_ptr() as *const libc::c_void,
            data.len(),
            flags | NOSIGNAL,
            &storage as *const _ as *const libc::sockaddr,
            len,
        )
    })
}

pub fn local_addr(fd: i32) -> SysResult<Option<SocketAddr>> {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    check(unsafe { libc::getsockname(fd, &mut storage as *mut _ as *mut libc::sockaddr, &mut len) })?;
    Ok(from_sockaddr(&storage, len))
}

pub fn peer_addr(fd: i32) -> SysResult<Option<SocketAddr>> {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    check(unsafe { libc::getpeername(fd, &mut storage as *mut _ as *mut libc::sockaddr, &mut len) })?;
    Ok(from_sockaddr(&storage, len))
}

pub fn set_int_option(fd: i32, level: i32, name: i32, value: i32) -> SysResult<()> {
    check(unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            &value as *const i32 as *const libc::c_void,
            mem::size_of::<i32>() as libc::socklen_t,
        )
    })
    .map(drop)
}

pub fn get_int_option(fd: i32, level: i32, name: i32) -> SysResult<i32> {
    let mut value: i32 = 0;
    let mut len = mem::size_of::<i32>() as libc::socklen_t;
    check(unsafe {
        libc::getsockopt(
            fd,
            level,
            name,
            &mut value as *mut i32 as *mut libc::c_void,
            &mut len,
        )
    })?;
    Ok(value)
}

/// Fetch and clear `SO_ERROR`: the outcome of a non-blocking connect
pub fn take_socket_error(fd: i32) -> SysResult<Option<Errno>> {
    let value = get_int_option(fd, libc::SOL_SOCKET, libc::SO_ERROR)?;
    Ok((value != 0).then(|| Errno::from_raw(value)))
}

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        /// Peer hang-ups surface as EPIPE, never as SIGPIPE
        const NOSIGNAL: i32 = libc::MSG_NOSIGNAL;
    } else {
        const NOSIGNAL: i32 = 0;
    }
}

// ============================================================================
// Address conversion
// ============================================================================

fn to_sockaddr(addr: &SocketAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let len = match addr {
        SocketAddr::V4(a) => {
            let sin = unsafe { &mut *(&mut storage as *mut _ as *mut libc::sockaddr_in) };
            sin.sin_family = libc::AF_INET as libc::sa_family_t;
            sin.sin_port = a.port().to_be();
            sin.sin_addr.s_addr = u32::from_ne_bytes(a.ip().octets());
            mem::size_of::<libc::sockaddr_in>()
        }
        SocketAddr::V6(a) => {
            let sin6 = unsafe { &mut *(&mut storage as *mut _ as *mut libc::sockaddr_in6) };
            sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            sin6.sin6_port = a.port().to_be();
            sin6.sin6_flowinfo = a.flowinfo();
            sin6.sin6_addr.s6_addr = a.ip().octets();
            sin6.sin6_scope_id = a.scope_id();
            mem::size_of::<libc::sockaddr_in6>()
        }
    };
    (storage, len as libc::socklen_t)
}

/// `None` for families other than IPv4/IPv6 (unix sockets, unnamed peers)
fn from_sockaddr(storage: &libc::sockaddr_storage, len: libc::socklen_t) -> Option<SocketAddr> {
    let len = len as usize;
    match storage.ss_family as i32 {
        libc::AF_INET if len >= mem::size_of::<libc::sockaddr_in>() => {
            let sin = unsafe { &*(storage as *const _ as *const libc::sockaddr_in) };
            let ip = Ipv4Addr::from(sin.sin_addr.s_addr.to_ne_bytes());
            Some(SocketAddr::V4(SocketAddrV4::new(ip, u16::from_be(sin.sin_port))))
        }
        libc::AF_INET6 if len >= mem::size_of::<libc::sockaddr_in6>() => {
            let sin6 = unsafe { &*(storage as *const _ as *const libc::sockaddr_in6) };
            Some(SocketAddr::V6(SocketAddrV6::new(
                Ipv6Addr::from(sin6.sin6_addr.s6_addr),
                u16::from_be(sin6.sin6_port),
                sin6.sin6_flowinfo,
                sin6.sin6_scope_id,
            )))
        }
        _ => None,
    }
}
