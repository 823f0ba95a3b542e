// src/syscalls.rs
use crate::error::{EtudeError, EtudeResult};
use libc::{c_int, c_void, socklen_t};
use std::io;
use std::mem;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::ptr;

// ---- Socket Operations ----

/// Create a non-blocking TCP listening socket on `0.0.0.0:port` with SO_REUSEADDR.
pub fn create_listen_socket(port: u16, backlog: c_int) -> EtudeResult<c_int> {
    unsafe {
        let fd = libc::socket(
            libc::AF_INET,
            libc::SOCK_STREAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            0,
        );
        if fd < 0 {
            return Err(io::Error::last_os_error().into());
        }

        // Allow an immediate rebind while old connections sit in TIME_WAIT
        let optval: c_int = 1;
        if libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &optval as *const _ as *const c_void,
            mem::size_of_val(&optval) as socklen_t,
        ) < 0
        {
            let err = io::Error::last_os_error();
            libc::close(fd);
            return Err(err.into());
        }

        let sin = libc::sockaddr_in {
            sin_family: libc::AF_INET as libc::sa_family_t,
            sin_port: port.to_be(),
            sin_addr: libc::in_addr {
                s_addr: u32::from_ne_bytes(Ipv4Addr::UNSPECIFIED.octets()),
            },
            sin_zero: [0; 8],
        };
        if libc::bind(
            fd,
            &sin as *const _ as *const libc::sockaddr,
            mem::size_of_val(&sin) as socklen_t,
        ) < 0
        {
            let err = io::Error::last_os_error();
            libc::close(fd);
            return Err(err.into());
        }

        if libc::listen(fd, backlog) < 0 {
            let err = io::Error::last_os_error();
            libc::close(fd);
            return Err(err.into());
        }

        Ok(fd)
    }
}

/// Address a socket is bound to.
pub fn local_addr(fd: c_int) -> EtudeResult<SocketAddr> {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_storage>() as socklen_t;
    unsafe {
        if libc::getsockname(
            fd,
            &mut storage as *mut _ as *mut libc::sockaddr,
            &mut len,
        ) < 0
        {
            return Err(io::Error::last_os_error().into());
        }
    }
    to_socket_addr(&storage).ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidData, "unsupported address family").into()
    })
}

/// Accept a non-blocking connection. `None` when the backlog is drained.
pub fn accept_connection(listen_fd: c_int) -> EtudeResult<Option<(c_int, Option<SocketAddr>)>> {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_storage>() as socklen_t;
    unsafe {
        let fd = libc::accept4(
            listen_fd,
            &mut storage as *mut _ as *mut libc::sockaddr,
            &mut len,
            libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
        );

        if fd < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                Ok(None)
            } else {
                Err(err.into())
            }
        } else {
            Ok(Some((fd, to_socket_addr(&storage))))
        }
    }
}

/// Whether `err` means the process or the system ran out of descriptors.
pub fn is_fd_exhaustion(err: &EtudeError) -> bool {
    matches!(
        err,
        EtudeError::Io(e) if matches!(e.raw_os_error(), Some(libc::EMFILE | libc::ENFILE))
    )
}

/// Open `/dev/null` read-only. The descriptor is only held so it can be given back later.
pub fn open_reserve_fd() -> EtudeResult<c_int> {
    let fd = unsafe { libc::open(c"/dev/null".as_ptr(), libc::O_RDONLY | libc::O_CLOEXEC) };
    if fd < 0 {
        return Err(io::Error::last_os_error().into());
    }
    Ok(fd)
}

fn to_socket_addr(storage: &libc::sockaddr_storage) -> Option<SocketAddr> {
    match storage.ss_family as c_int {
        libc::AF_INET => {
            let sin = unsafe { &*(storage as *const _ as *const libc::sockaddr_in) };
            let ip = Ipv4Addr::from(sin.sin_addr.s_addr.to_ne_bytes());
            Some(SocketAddr::V4(SocketAddrV4::new(ip, u16::from_be(sin.sin_port))))
        }
        libc::AF_INET6 => {
            let sin6 = unsafe { &*(storage as *const _ as *const libc::sockaddr_in6) };
            let ip = Ipv6Addr::from(sin6.sin6_addr.s6_addr);
            Some(SocketAddr::V6(SocketAddrV6::new(
                ip,
                u16::from_be(sin6.sin6_port),
                sin6.sin6_flowinfo,
                sin6.sin6_scope_id,
            )))
        }
        _ => None,
    }
}

pub fn close_fd(fd: c_int) {
    unsafe {
        libc::close(fd);
    }
}

// ---- Epoll Operations ----

pub use libc::epoll_event;

pub const EV_READ: u32 = libc::EPOLLIN as u32;
pub const EV_WRITE: u32 = libc::EPOLLOUT as u32;
pub const EV_HANGUP: u32 = (libc::EPOLLRDHUP | libc::EPOLLHUP | libc::EPOLLERR) as u32;
pub const EV_RDHUP: u32 = libc::EPOLLRDHUP as u32;
pub const EV_ONESHOT: u32 = libc::EPOLLONESHOT as u32;
pub const EV_EDGE: u32 = libc::EPOLLET as u32;

pub struct Epoll {
    pub fd: c_int,
}

impl Epoll {
    pub fn new() -> EtudeResult<Self> {
        unsafe {
            let fd = libc::epoll_create1(libc::EPOLL_CLOEXEC);
            if fd < 0 {
                return Err(io::Error::last_os_error().into());
            }
            Ok(Self { fd })
        }
    }

    fn ctl(&self, op: c_int, fd: c_int, token: u64, events: u32) -> io::Result<()> {
        let mut event = epoll_event { events, u64: token };
        unsafe {
            if libc::epoll_ctl(self.fd, op, fd, &mut event) < 0 {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(())
    }

    /// Register `fd`. Already registered descriptors are modified instead.
    pub fn add(&self, fd: c_int, token: u64, events: u32) -> EtudeResult<()> {
        match self.ctl(libc::EPOLL_CTL_ADD, fd, token, events) {
            Err(e) if e.raw_os_error() == Some(libc::EEXIST) => {
                Ok(self.ctl(libc::EPOLL_CTL_MOD, fd, token, events)?)
            }
            res => Ok(res?),
        }
    }

    /// Re-arm `fd`. Descriptors that are not registered are added instead.
    pub fn modify(&self, fd: c_int, token: u64, events: u32) -> EtudeResult<()> {
        match self.ctl(libc::EPOLL_CTL_MOD, fd, token, events) {
            Err(e) if e.raw_os_error() == Some(libc::ENOENT) => {
                Ok(self.ctl(libc::EPOLL_CTL_ADD, fd, token, events)?)
            }
            res => Ok(res?),
        }
    }

    pub fn delete(&self, fd: c_int) -> EtudeResult<()> {
        unsafe {
            if libc::epoll_ctl(self.fd, libc::EPOLL_CTL_DEL, fd, ptr::null_mut()) < 0 {
                let err = io::Error::last_os_error();
                if err.raw_os_error() != Some(libc::ENOENT) {
                    return Err(err.into());
                }
            }
        }
        Ok(())
    }

    /// Block for events. A signal interruption reports zero events.
    pub fn wait(&self, events: &mut [epoll_event], timeout_ms: i32) -> EtudeResult<usize> {
        unsafe {
            let res = libc::epoll_wait(
                self.fd,
                events.as_mut_ptr(),
                events.len() as c_int,
                timeout_ms,
            );

            if res < 0 {
                let err = io::Error::last_os_error();
                if err.raw_os_error() == Some(libc::EINTR) {
                    return Ok(0);
                }
                return Err(err.into());
            }

            Ok(res as usize)
        }
    }
}

impl Drop for Epoll {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

// ---- Read / Write ----

/// `Ok(None)` on would-block. `Ok(Some(0))` means the peer closed.
pub fn read_nonblocking(fd: c_int, buf: &mut [u8]) -> EtudeResult<Option<usize>> {
    loop {
        let res = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut c_void, buf.len()) };
        if res >= 0 {
            return Ok(Some(res as usize));
        }
        let err = io::Error::last_os_error();
        match err.kind() {
            io::ErrorKind::WouldBlock => return Ok(None),
            io::ErrorKind::Interrupted => continue,
            _ => return Err(err.into()),
        }
    }
}

/// Vectored write of up to two segments. `Ok(None)` on would-block.
pub fn writev_nonblocking(fd: c_int, bufs: &[&[u8]]) -> EtudeResult<Option<usize>> {
    let mut iovecs: [libc::iovec; 2] = unsafe { mem::zeroed() };
    let iov_count = bufs.len().min(iovecs.len());

    for (iov, buf) in iovecs.iter_mut().zip(&bufs[..iov_count]) {
        *iov = libc::iovec {
            iov_base: buf.as_ptr() as *mut c_void,
            iov_len: buf.len(),
        };
    }

    loop {
        let res = unsafe { libc::writev(fd, iovecs.as_ptr(), iov_count as c_int) };
        if res >= 0 {
            return Ok(Some(res as usize));
        }
        let err = io::Error::last_os_error();
        match err.kind() {
            io::ErrorKind::WouldBlock => return Ok(None),
            io::ErrorKind::Interrupted => continue,
            _ => return Err(err.into()),
        }
    }
}

// ---- Wake Pipe ----

/// Create a non-blocking pipe. Returns (read_fd, write_fd).
pub fn create_pipe() -> EtudeResult<(c_int, c_int)> {
    let mut fds = [0 as c_int; 2];
    unsafe {
        if libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) < 0 {
            return Err(io::Error::last_os_error().into());
        }
    }
    Ok((fds[0], fds[1]))
}

/// Write one byte to the pipe. A full pipe already has a wake pending.
pub fn wake(pipe_write_fd: c_int) -> EtudeResult<()> {
    let byte = [1u8];
    let n = unsafe { libc::write(pipe_write_fd, byte.as_ptr() as *const c_void, 1) };
    if n < 0 {
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::WouldBlock {
            return Err(err.into());
        }
    }
    Ok(())
}

/// Discard everything buffered in the pipe.
pub fn drain_pipe(pipe_read_fd: c_int) {
    let mut buf = [0u8; 64];
    while let Ok(Some(n)) = read_nonblocking(pipe_read_fd, &mut buf) {
        if n == 0 {
            break;
        }
    }
}
