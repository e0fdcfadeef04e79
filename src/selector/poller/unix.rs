//! Unix platform layer: thin wrappers over the socket syscalls the
//! crate needs, plus socket address conversions.
//!
//! Every socket created or accepted here is switched to non-blocking
//! mode before it is handed out.

use libc::{
    AF_INET, AF_INET6, F_GETFL, F_SETFL, IPPROTO_IPV6, IPV6_V6ONLY, O_NONBLOCK, SHUT_RD, SHUT_RDWR,
    SHUT_WR, SO_ERROR, SO_REUSEADDR, SOCK_STREAM, SOL_SOCKET, accept, bind, c_int, close, connect,
    fcntl, getsockname, getsockopt, listen, setsockopt, shutdown, sockaddr, sockaddr_in,
    sockaddr_in6, sockaddr_storage, socket, socklen_t, write,
};
use std::net::{Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::str::FromStr;
use std::{io, mem};

pub use std::os::fd::RawFd;

/// Reads from a file descriptor into the given buffer.
///
/// Returns the number of bytes read, or a negative value on error.
/// The file descriptor **must** be non-blocking.
pub(crate) fn sys_read(fd: RawFd, buffer: &mut [u8]) -> isize {
    unsafe { libc::read(fd, buffer.as_mut_ptr() as *mut _, buffer.len()) }
}

/// Writes the buffer to a file descriptor.
///
/// Returns the number of bytes written, or a negative value on error.
/// The file descriptor **must** be non-blocking.
pub(crate) fn sys_write(fd: RawFd, buffer: &[u8]) -> isize {
    unsafe { write(fd, buffer.as_ptr() as *const _, buffer.len()) }
}

/// Closes a file descriptor.
pub(crate) fn sys_close(fd: RawFd) {
    unsafe { close(fd) };
}

/// Sets a file descriptor to non-blocking mode.
pub(crate) fn sys_set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { fcntl(fd, F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }

    let rc = unsafe { fcntl(fd, F_SETFL, flags | O_NONBLOCK) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Returns the socket domain matching an address family.
pub(crate) fn sys_domain(addr: &SocketAddr) -> c_int {
    match addr {
        SocketAddr::V4(_) => AF_INET,
        SocketAddr::V6(_) => AF_INET6,
    }
}

/// Creates a non-blocking stream socket.
pub(crate) fn sys_socket(domain: c_int) -> io::Result<RawFd> {
    let fd = unsafe { socket(domain, SOCK_STREAM, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }

    if let Err(e) = sys_set_nonblocking(fd) {
        unsafe { close(fd) };
        return Err(e);
    }

    Ok(fd)
}

/// Binds a socket to an address.
pub(crate) fn sys_bind(fd: RawFd, addr: &sockaddr_storage, len: socklen_t) -> io::Result<()> {
    let rc = unsafe { bind(fd, addr as *const _ as *const sockaddr, len) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Marks a socket as a listening socket.
pub(crate) fn sys_listen(fd: RawFd) -> io::Result<()> {
    let rc = unsafe { listen(fd, 128) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Accepts a new incoming connection.
///
/// The returned client socket is automatically set to non-blocking mode.
pub(crate) fn sys_accept(fd: RawFd) -> io::Result<(RawFd, SocketAddr)> {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<sockaddr_storage>() as socklen_t;

    let client_fd = unsafe { accept(fd, &mut storage as *mut _ as *mut sockaddr, &mut len) };

    if client_fd < 0 {
        return Err(io::Error::last_os_error());
    }

    if let Err(e) = sys_set_nonblocking(client_fd) {
        unsafe { close(client_fd) };
        return Err(e);
    }

    let addr = sockaddr_storage_to_socketaddr(&storage)?;

    Ok((client_fd, addr))
}

/// Returns the local address of a socket.
pub(crate) fn sys_sockname(fd: RawFd) -> io::Result<SocketAddr> {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<sockaddr_storage>() as socklen_t;

    let rc = unsafe { getsockname(fd, &mut storage as *mut _ as *mut sockaddr, &mut len) };

    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        sockaddr_storage_to_socketaddr(&storage)
    }
}

/// Initiates a non-blocking connection.
///
/// An in-progress connection is reported as an error (`EINPROGRESS`);
/// classification is up to the caller.
pub(crate) fn sys_connect(fd: RawFd, addr: &SocketAddr) -> io::Result<()> {
    let (storage, len) = socketaddr_to_storage(addr);

    let rc = unsafe { connect(fd, &storage as *const _ as *const sockaddr, len) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Shuts down a socket.
pub(crate) fn sys_shutdown(fd: RawFd, how: Shutdown) -> io::Result<()> {
    let how = match how {
        Shutdown::Read => SHUT_RD,
        Shutdown::Write => SHUT_WR,
        Shutdown::Both => SHUT_RDWR,
    };

    let rc = unsafe { shutdown(fd, how) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Retrieves the pending socket error via `SO_ERROR`.
///
/// Returns `Ok(())` if no error is pending, or the error otherwise.
/// Used to resolve the outcome of a non-blocking connect.
pub(crate) fn sys_take_socket_error(fd: RawFd) -> io::Result<()> {
    let mut err: c_int = 0;
    let mut len = mem::size_of::<c_int>() as socklen_t;

    let rc = unsafe {
        getsockopt(
            fd,
            SOL_SOCKET,
            SO_ERROR,
            &mut err as *mut _ as *mut _,
            &mut len,
        )
    };

    if rc < 0 {
        Err(io::Error::last_os_error())
    } else if err != 0 {
        Err(io::Error::from_raw_os_error(err))
    } else {
        Ok(())
    }
}

/// Enables `SO_REUSEADDR` on a socket.
pub(crate) fn sys_set_reuseaddr(fd: RawFd) -> io::Result<()> {
    let yes: c_int = 1;
    let rc = unsafe {
        setsockopt(
            fd,
            SOL_SOCKET,
            SO_REUSEADDR,
            &yes as *const _ as *const _,
            mem::size_of::<c_int>() as socklen_t,
        )
    };

    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Clears `IPV6_V6ONLY` on IPv6 sockets so they accept IPv4-mapped
/// peers as well.
pub(crate) fn sys_enable_dual_stack(fd: RawFd, domain: c_int) -> io::Result<()> {
    if domain != AF_INET6 {
        return Ok(());
    }

    let value: c_int = 0;
    let rc = unsafe {
        setsockopt(
            fd,
            IPPROTO_IPV6,
            IPV6_V6ONLY,
            &value as *const _ as *const _,
            mem::size_of::<c_int>() as socklen_t,
        )
    };

    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Parses a socket address string into a `sockaddr_storage`.
pub(crate) fn sys_parse_sockaddr(address: &str) -> io::Result<(sockaddr_storage, socklen_t)> {
    let addr = SocketAddr::from_str(address)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid socket addr"))?;

    Ok(socketaddr_to_storage(&addr))
}

/// Converts a `sockaddr_storage` to a Rust `SocketAddr`.
pub(crate) fn sockaddr_storage_to_socketaddr(storage: &sockaddr_storage) -> io::Result<SocketAddr> {
    match storage.ss_family as c_int {
        AF_INET => {
            let addr = unsafe { &*(storage as *const _ as *const sockaddr_in) };
            let ip = Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr));
            let port = u16::from_be(addr.sin_port);

            Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
        }

        AF_INET6 => {
            let addr = unsafe { &*(storage as *const _ as *const sockaddr_in6) };
            let ip = Ipv6Addr::from(addr.sin6_addr.s6_addr);
            let port = u16::from_be(addr.sin6_port);

            Ok(SocketAddr::V6(SocketAddrV6::new(
                ip,
                port,
                addr.sin6_flowinfo,
                addr.sin6_scope_id,
            )))
        }

        _ => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "unsupported address family",
        )),
    }
}

/// Converts a `SocketAddr` to a `sockaddr_storage`.
pub(crate) fn socketaddr_to_storage(addr: &SocketAddr) -> (sockaddr_storage, socklen_t) {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };

    match addr {
        SocketAddr::V4(v4) => {
            let sa = unsafe { &mut *(&mut storage as *mut _ as *mut sockaddr_in) };
            sa.sin_family = AF_INET as _;
            sa.sin_port = v4.port().to_be();
            sa.sin_addr.s_addr = u32::from(*v4.ip()).to_be();

            (storage, mem::size_of::<sockaddr_in>() as socklen_t)
        }

        SocketAddr::V6(v6) => {
            let sa = unsafe { &mut *(&mut storage as *mut _ as *mut sockaddr_in6) };
            sa.sin6_family = AF_INET6 as _;
            sa.sin6_port = v6.port().to_be();
            sa.sin6_addr.s6_addr = v6.ip().octets();
            sa.sin6_flowinfo = v6.flowinfo();
            sa.sin6_scope_id = v6.scope_id();

            (storage, mem::size_of::<sockaddr_in6>() as socklen_t)
        }
    }
}
