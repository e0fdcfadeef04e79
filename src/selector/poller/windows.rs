//! Windows platform layer.
//!
//! This module provides the Windows implementation of the low-level
//! socket primitives. It mirrors the Unix platform layer and exposes
//! identical function names and semantics where possible.
//!
//! Only WinSock sockets are supported; there is no file HANDLE I/O in
//! this crate.

use std::ffi::c_int;
use std::io;
use std::mem;
use std::net::{Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::str::FromStr;
use std::sync::Once;

use windows_sys::Win32::Networking::WinSock::{
    AF_INET, AF_INET6, FIONBIO, INVALID_SOCKET, IPPROTO_IPV6, IPV6_V6ONLY, SD_BOTH, SD_RECEIVE,
    SD_SEND, SO_ERROR, SO_REUSEADDR, SOCK_STREAM, SOCKADDR, SOCKADDR_IN, SOCKADDR_IN6,
    SOCKADDR_STORAGE, SOCKET, SOCKET_ERROR, SOL_SOCKET, WSADATA, WSAStartup, accept, bind,
    closesocket, connect, getsockname, getsockopt, ioctlsocket, listen, recv, send, setsockopt,
    shutdown, socket,
};

/// Raw socket descriptor type on Windows.
pub type RawFd = std::os::windows::io::RawSocket;

/// Creates a MAKEWORD value for the Winsock version.
#[inline]
const fn makeword(low: u8, high: u8) -> u16 {
    ((high as u16) << 8) | (low as u16)
}

/// Winsock initialization guard.
static WINSOCK_INIT: Once = Once::new();

/// Initialize Winsock if not already initialized.
pub(crate) fn ensure_winsock() {
    WINSOCK_INIT.call_once(|| unsafe {
        let mut data: WSADATA = mem::zeroed();
        let rc = WSAStartup(makeword(2, 2), &mut data as *mut _);
        assert_eq!(rc, 0, "WSAStartup failed: {}", rc);
    });
}

/// Reads from a socket into the given buffer.
///
/// Returns the number of bytes read, or `-1` on error.
/// The socket **must** be non-blocking.
pub(crate) fn sys_read(fd: RawFd, buffer: &mut [u8]) -> isize {
    unsafe {
        let rc = recv(fd as SOCKET, buffer.as_mut_ptr(), buffer.len() as i32, 0);
        if rc == SOCKET_ERROR { -1 } else { rc as isize }
    }
}

/// Writes the buffer to a socket.
///
/// Returns the number of bytes written, or `-1` on error.
/// The socket **must** be non-blocking.
pub(crate) fn sys_write(fd: RawFd, buffer: &[u8]) -> isize {
    unsafe {
        let rc = send(fd as SOCKET, buffer.as_ptr(), buffer.len() as i32, 0);
        if rc == SOCKET_ERROR { -1 } else { rc as isize }
    }
}

/// Closes a socket.
pub(crate) fn sys_close(fd: RawFd) {
    unsafe {
        let _ = closesocket(fd as SOCKET);
    }
}

/// Sets a socket to non-blocking mode.
pub(crate) fn sys_set_nonblocking(fd: RawFd) -> io::Result<()> {
    unsafe {
        let mut nonblocking: u32 = 1;
        if ioctlsocket(fd as SOCKET, FIONBIO, &mut nonblocking) != 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}

/// Returns the socket domain matching an address family.
pub(crate) fn sys_domain(addr: &SocketAddr) -> c_int {
    match addr {
        SocketAddr::V4(_) => AF_INET as c_int,
        SocketAddr::V6(_) => AF_INET6 as c_int,
    }
}

/// Creates a non-blocking stream socket.
pub(crate) fn sys_socket(domain: c_int) -> io::Result<RawFd> {
    ensure_winsock();
    unsafe {
        let fd = socket(domain, SOCK_STREAM, 0);
        if fd == INVALID_SOCKET {
            return Err(io::Error::last_os_error());
        }

        if let Err(e) = sys_set_nonblocking(fd as RawFd) {
            let _ = closesocket(fd);
            return Err(e);
        }

        Ok(fd as RawFd)
    }
}

/// Binds a socket to an address.
pub(crate) fn sys_bind(fd: RawFd, addr: &SOCKADDR_STORAGE, len: i32) -> io::Result<()> {
    unsafe {
        if bind(fd as SOCKET, addr as *const _ as *const SOCKADDR, len) != 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}

/// Marks a socket as a listening socket.
pub(crate) fn sys_listen(fd: RawFd) -> io::Result<()> {
    unsafe {
        if listen(fd as SOCKET, 128) != 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}

/// Accepts a new incoming connection.
///
/// The returned client socket is automatically set to non-blocking mode.
pub(crate) fn sys_accept(fd: RawFd) -> io::Result<(RawFd, SocketAddr)> {
    unsafe {
        let mut storage: SOCKADDR_STORAGE = mem::zeroed();
        let mut len = mem::size_of::<SOCKADDR_STORAGE>() as i32;

        let client = accept(
            fd as SOCKET,
            &mut storage as *mut _ as *mut SOCKADDR,
            &mut len,
        );
        if client == INVALID_SOCKET {
            return Err(io::Error::last_os_error());
        }

        if let Err(e) = sys_set_nonblocking(client as RawFd) {
            let _ = closesocket(client);
            return Err(e);
        }

        let addr = sockaddr_storage_to_socketaddr(&storage)?;

        Ok((client as RawFd, addr))
    }
}

/// Returns the local address of a socket.
pub(crate) fn sys_sockname(fd: RawFd) -> io::Result<SocketAddr> {
    unsafe {
        let mut storage: SOCKADDR_STORAGE = mem::zeroed();
        let mut len = mem::size_of::<SOCKADDR_STORAGE>() as i32;

        if getsockname(
            fd as SOCKET,
            &mut storage as *mut _ as *mut SOCKADDR,
            &mut len,
        ) != 0
        {
            Err(io::Error::last_os_error())
        } else {
            sockaddr_storage_to_socketaddr(&storage)
        }
    }
}

/// Initiates a non-blocking connection.
///
/// An in-progress connection is reported as an error (`WSAEWOULDBLOCK`,
/// which maps to `WouldBlock`); classification is up to the caller.
pub(crate) fn sys_connect(fd: RawFd, addr: &SocketAddr) -> io::Result<()> {
    ensure_winsock();
    let (storage, len) = socketaddr_to_storage(addr);

    unsafe {
        let rc = connect(fd as SOCKET, &storage as *const _ as *const SOCKADDR, len);
        if rc != 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}

/// Shuts down part or all of a socket connection.
pub(crate) fn sys_shutdown(fd: RawFd, how: Shutdown) -> io::Result<()> {
    let how = match how {
        Shutdown::Read => SD_RECEIVE,
        Shutdown::Write => SD_SEND,
        Shutdown::Both => SD_BOTH,
    };

    unsafe {
        if shutdown(fd as SOCKET, how) != 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}

/// Retrieves the pending socket error via `SO_ERROR`.
///
/// Returns `Ok(())` if no error is pending, or the error otherwise.
/// Used to resolve the outcome of a non-blocking connect.
pub(crate) fn sys_take_socket_error(fd: RawFd) -> io::Result<()> {
    unsafe {
        let mut err: i32 = 0;
        let mut len = mem::size_of::<i32>() as i32;

        let rc = getsockopt(
            fd as SOCKET,
            SOL_SOCKET,
            SO_ERROR,
            &mut err as *mut _ as *mut u8,
            &mut len,
        );

        if rc != 0 {
            Err(io::Error::last_os_error())
        } else if err != 0 {
            Err(io::Error::from_raw_os_error(err))
        } else {
            Ok(())
        }
    }
}

/// Enables `SO_REUSEADDR` on a socket.
pub(crate) fn sys_set_reuseaddr(fd: RawFd) -> io::Result<()> {
    unsafe {
        let yes: i32 = 1;
        if setsockopt(
            fd as SOCKET,
            SOL_SOCKET,
            SO_REUSEADDR,
            &yes as *const _ as *const u8,
            4,
        ) != 0
        {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}

/// Clears `IPV6_V6ONLY` on IPv6 sockets so they accept IPv4-mapped
/// peers as well.
pub(crate) fn sys_enable_dual_stack(fd: RawFd, domain: c_int) -> io::Result<()> {
    if domain != AF_INET6 as c_int {
        return Ok(());
    }

    unsafe {
        let value: u32 = 0;
        if setsockopt(
            fd as SOCKET,
            IPPROTO_IPV6,
            IPV6_V6ONLY,
            &value as *const _ as *const u8,
            4,
        ) != 0
        {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}

/// Parses a socket address string into a `SOCKADDR_STORAGE`.
pub(crate) fn sys_parse_sockaddr(address: &str) -> io::Result<(SOCKADDR_STORAGE, i32)> {
    let addr = SocketAddr::from_str(address)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid socket addr"))?;

    Ok(socketaddr_to_storage(&addr))
}

/// Converts a `SOCKADDR_STORAGE` to a Rust `SocketAddr`.
pub(crate) fn sockaddr_storage_to_socketaddr(storage: &SOCKADDR_STORAGE) -> io::Result<SocketAddr> {
    unsafe {
        match storage.ss_family {
            AF_INET => {
                let sin = &*(storage as *const _ as *const SOCKADDR_IN);
                let ip = Ipv4Addr::from(u32::from_be(sin.sin_addr.S_un.S_addr));
                let port = u16::from_be(sin.sin_port);

                Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
            }

            AF_INET6 => {
                let sin6 = &*(storage as *const _ as *const SOCKADDR_IN6);
                let ip = Ipv6Addr::from(sin6.sin6_addr.u.Byte);
                let port = u16::from_be(sin6.sin6_port);

                Ok(SocketAddr::V6(SocketAddrV6::new(ip, port, 0, 0)))
            }

            _ => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "unsupported address family",
            )),
        }
    }
}

/// Converts a `SocketAddr` to a `SOCKADDR_STORAGE`.
pub(crate) fn socketaddr_to_storage(addr: &SocketAddr) -> (SOCKADDR_STORAGE, i32) {
    let mut storage: SOCKADDR_STORAGE = unsafe { mem::zeroed() };

    match addr {
        SocketAddr::V4(v4) => {
            let sa = unsafe { &mut *(&mut storage as *mut _ as *mut SOCKADDR_IN) };
            sa.sin_family = AF_INET;
            sa.sin_port = v4.port().to_be();
            sa.sin_addr.S_un.S_addr = u32::from(*v4.ip()).to_be();

            (storage, mem::size_of::<SOCKADDR_IN>() as i32)
        }

        SocketAddr::V6(v6) => {
            let sa = unsafe { &mut *(&mut storage as *mut _ as *mut SOCKADDR_IN6) };
            sa.sin6_family = AF_INET6;
            sa.sin6_port = v6.port().to_be();
            sa.sin6_addr.u.Byte = v6.ip().octets();
            sa.Anonymous.sin6_scope_id = v6.scope_id();

            (storage, mem::size_of::<SOCKADDR_IN6>() as i32)
        }
    }
}
