//! Windows `WSAPoll`-based poller implementation.
//!
//! This module provides a readiness-based Windows backend for the
//! selector. It mirrors the semantics of Linux `epoll` and macOS
//! `kqueue` using non-blocking sockets and `WSAPoll`.
//!
//! Unlike an IOCP backend, this poller is **readiness-based** and does
//! not rely on overlapped or completion-based I/O. It is primarily
//! intended for semantic parity and simplicity.

use super::common::{PollInterest, Waker};
use super::platform::{RawFd, ensure_winsock};
use crate::selector::event::Event;

use std::collections::HashMap;
use std::io;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use windows_sys::Win32::Networking::WinSock::{
    AF_INET, FIONBIO, IPPROTO_UDP, POLLERR, POLLHUP, POLLIN, POLLNVAL, POLLOUT, SOCK_DGRAM,
    SOCKADDR_IN, SOCKET, SOCKET_ERROR, WSAPOLLFD, WSAPoll, WSASocketW, bind, closesocket, connect,
    getsockname, ioctlsocket, recv, send,
};

/// Windows poller based on `WSAPoll`.
///
/// This poller owns:
/// - a registry of monitored sockets,
/// - an internal UDP socket pair used for wake-ups,
/// - a reusable buffer of `WSAPOLLFD` structures.
///
/// The wake-up datagram is queued by the OS, so a wake issued while the
/// loop is between two polls is not lost.
pub(crate) struct WsaPoller {
    /// Registered sockets: `fd → (token, interest)`.
    reg: HashMap<RawFd, (usize, PollInterest)>,

    /// Wake-up socket (receive side).
    wake_recv: SOCKET,

    /// Wake-up socket (send side).
    wake_send: SOCKET,

    /// Waker used by the selector to interrupt polling.
    waker: Arc<Waker>,
}

unsafe impl Send for WsaPoller {}
unsafe impl Sync for WsaPoller {}

impl Waker {
    /// Wake the poller.
    ///
    /// This sends a single byte on the internal UDP socket, causing
    /// `WSAPoll` to return immediately.
    pub(crate) fn wake(&self) {
        unsafe {
            let buf = [1u8; 1];
            let _ = send(self.0 as SOCKET, buf.as_ptr(), 1, 0);
        }
    }
}

impl WsaPoller {
    /// Create a new `WsaPoller`.
    ///
    /// This:
    /// - initializes Winsock (once per process),
    /// - creates a UDP socket pair used for wake-ups,
    /// - configures both sockets as non-blocking.
    pub(crate) fn new() -> io::Result<Self> {
        unsafe {
            ensure_winsock();

            // --- Wake receiver socket ---
            let recv_sock = WSASocketW(
                AF_INET as i32,
                SOCK_DGRAM,
                IPPROTO_UDP,
                std::ptr::null(),
                0,
                0,
            );
            if recv_sock == SOCKET_ERROR as usize {
                return Err(io::Error::last_os_error());
            }

            let mut nonblocking: u32 = 1;
            let _ = ioctlsocket(recv_sock, FIONBIO, &mut nonblocking);

            let mut addr: SOCKADDR_IN = std::mem::zeroed();
            addr.sin_family = AF_INET;
            addr.sin_port = 0;
            addr.sin_addr.S_un.S_addr = u32::from_ne_bytes(Ipv4Addr::LOCALHOST.octets());

            let rc = bind(
                recv_sock,
                &addr as *const _ as *const _,
                std::mem::size_of::<SOCKADDR_IN>() as i32,
            );
            if rc == SOCKET_ERROR {
                let err = io::Error::last_os_error();
                let _ = closesocket(recv_sock);
                return Err(err);
            }

            // Discover the bound port
            let mut bound: SOCKADDR_IN = std::mem::zeroed();
            let mut len = std::mem::size_of::<SOCKADDR_IN>() as i32;

            let rc = getsockname(recv_sock, &mut bound as *mut _ as *mut _, &mut len);
            if rc == SOCKET_ERROR {
                let err = io::Error::last_os_error();
                let _ = closesocket(recv_sock);
                return Err(err);
            }

            // --- Wake sender socket ---
            let send_sock = WSASocketW(
                AF_INET as i32,
                SOCK_DGRAM,
                IPPROTO_UDP,
                std::ptr::null(),
                0,
                0,
            );
            if send_sock == SOCKET_ERROR as usize {
                let err = io::Error::last_os_error();
                let _ = closesocket(recv_sock);
                return Err(err);
            }

            let _ = ioctlsocket(send_sock, FIONBIO, &mut nonblocking);

            let rc = connect(
                send_sock,
                &bound as *const _ as *const _,
                std::mem::size_of::<SOCKADDR_IN>() as i32,
            );
            if rc == SOCKET_ERROR {
                let err = io::Error::last_os_error();
                let _ = closesocket(recv_sock);
                let _ = closesocket(send_sock);
                return Err(err);
            }

            Ok(Self {
                reg: HashMap::new(),
                wake_recv: recv_sock,
                wake_send: send_sock,
                waker: Arc::new(Waker(send_sock as RawFd)),
            })
        }
    }

    /// Return the poller waker.
    pub(crate) fn waker(&self) -> Arc<Waker> {
        self.waker.clone()
    }

    /// Register a socket with the poller.
    pub(crate) fn register(
        &mut self,
        fd: RawFd,
        token: usize,
        interest: PollInterest,
    ) -> io::Result<()> {
        self.reg.insert(fd, (token, interest));
        Ok(())
    }

    /// Update interest flags for a registered socket.
    pub(crate) fn reregister(
        &mut self,
        fd: RawFd,
        token: usize,
        interest: PollInterest,
    ) -> io::Result<()> {
        self.reg.insert(fd, (token, interest));
        Ok(())
    }

    /// Remove a socket from the poller.
    pub(crate) fn deregister(&mut self, fd: RawFd) -> io::Result<()> {
        self.reg.remove(&fd);
        Ok(())
    }

    /// Poll for I/O readiness events.
    ///
    /// Blocks until:
    /// - at least one socket becomes ready,
    /// - the wake-up socket is triggered,
    /// - or the optional timeout expires.
    pub(crate) fn poll(
        &mut self,
        events: &mut Vec<Event>,
        timeout: Option<Duration>,
    ) -> io::Result<()> {
        events.clear();

        let mut fds: Vec<WSAPOLLFD> = Vec::with_capacity(self.reg.len() + 1);

        // Wake-up socket
        fds.push(WSAPOLLFD {
            fd: self.wake_recv,
            events: POLLIN,
            revents: 0,
        });

        // Registered sockets
        for (&fd, &(_, interest)) in self.reg.iter() {
            let mut ev = 0;
            if interest.read {
                ev |= POLLIN;
            }
            if interest.write {
                ev |= POLLOUT;
            }

            fds.push(WSAPOLLFD {
                fd: fd as SOCKET,
                events: ev,
                revents: 0,
            });
        }

        let timeout_ms = timeout
            .map(|t| t.as_millis().min(i32::MAX as u128) as i32)
            .unwrap_or(-1);

        let rc = unsafe { WSAPoll(fds.as_mut_ptr(), fds.len() as u32, timeout_ms) };
        if rc == SOCKET_ERROR {
            return Err(io::Error::last_os_error());
        }

        // Wake handling
        let wake_mask = (POLLIN | POLLERR | POLLHUP | POLLNVAL) as i32;
        if (fds[0].revents as i32 & wake_mask) != 0 {
            unsafe {
                let mut buf = [0u8; 64];
                while recv(
                    self.wake_recv,
                    buf.as_mut_ptr() as *mut _,
                    buf.len() as i32,
                    0,
                ) > 0
                {}
            }
        }

        // Translate readiness into selector events
        for pfd in fds.iter().skip(1) {
            let re = pfd.revents as i32;
            if re == 0 {
                continue;
            }

            let fd = pfd.fd as RawFd;
            let Some(&(token, _)) = self.reg.get(&fd) else {
                continue;
            };

            // An invalidated socket would otherwise be re-reported on
            // every poll; surface it once as fully ready and drop it so
            // the owner's next syscall observes the failure.
            if (re & POLLNVAL as i32) != 0 {
                self.reg.remove(&fd);
                events.push(Event {
                    token,
                    readable: true,
                    writable: true,
                });
                continue;
            }

            events.push(Event {
                token,
                readable: (re & (POLLIN | POLLERR | POLLHUP) as i32) != 0,
                writable: (re & (POLLOUT | POLLERR | POLLHUP) as i32) != 0,
            });
        }

        Ok(())
    }
}

impl Drop for WsaPoller {
    fn drop(&mut self) {
        unsafe {
            let _ = closesocket(self.wake_recv);
        }
    }
}

impl Drop for Waker {
    /// The waker owns the send side of the wake pair: it must stay
    /// open as long as any thread might still wake the (possibly
    /// already gone) loop, or a late wake would write into a recycled
    /// socket.
    fn drop(&mut self) {
        unsafe {
            let _ = closesocket(self.0 as SOCKET);
        }
    }
}
