use crate::net::handle::{HandleKind, IoHandle, closed_handle_error};
use crate::selector::handle::{Interest, RawFd, Selectable};
use crate::selector::manager::SelectorManager;
use crate::selector::poller::platform::{
    sys_close, sys_connect, sys_domain, sys_read, sys_shutdown, sys_socket, sys_sockname,
    sys_take_socket_error, sys_write,
};

use std::io;
use std::net::{Shutdown, SocketAddr};
use std::sync::Arc;

/// A TCP socket driven by a shared selector.
///
/// `TcpSocket` performs all I/O on a non-blocking descriptor. An
/// operation that would block parks the calling thread, arms the
/// matching interest with the selector and resumes once readiness is
/// dispatched. Distinct threads may read and write concurrently; each
/// direction re-arms independently.
///
/// Closing the socket (explicitly or on drop) cancels its registration
/// and releases any parked operation with an error.
pub struct TcpSocket {
    handle: Arc<IoHandle>,
    selector: SelectorManager,
    peer: SocketAddr,
}

impl TcpSocket {
    /// Opens a connection to `address`.
    ///
    /// The address must be a socket address string such as
    /// `"127.0.0.1:8080"` or `"[::1]:8080"`. The connect is issued
    /// non-blocking; if it does not resolve immediately the caller is
    /// parked until the selector reports the outcome, which is then
    /// read back via `SO_ERROR`.
    pub(crate) fn connect(selector: &SelectorManager, address: &str) -> io::Result<Self> {
        selector.ensure_running()?;

        let addr: SocketAddr = address
            .parse()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid socket addr"))?;

        let fd = sys_socket(sys_domain(&addr))?;

        // Construct the socket before the fallible connect steps so an
        // early return closes the descriptor.
        let socket = Self {
            handle: IoHandle::new(HandleKind::Socket, fd),
            selector: selector.clone(),
            peer: addr,
        };

        match sys_connect(fd, &addr) {
            Ok(()) => {}
            Err(err) if connect_in_progress(&err) => {
                IoHandle::await_ready(&socket.handle, Interest::CONNECTABLE, selector)?;
                sys_take_socket_error(fd)?;
            }
            Err(err) => return Err(err),
        }

        Ok(socket)
    }

    /// Wraps a descriptor accepted by a listener.
    pub(crate) fn from_accepted(selector: SelectorManager, fd: RawFd, peer: SocketAddr) -> Self {
        Self {
            handle: IoHandle::new(HandleKind::Socket, fd),
            selector,
            peer,
        }
    }

    /// Reads into `buffer`, parking until the socket is readable.
    ///
    /// Returns the number of bytes read; `0` means the peer closed the
    /// connection.
    pub fn read(&self, buffer: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.handle.is_cancelled() {
                return Err(closed_handle_error());
            }

            let n = sys_read(self.handle.fd(), buffer);
            if n >= 0 {
                return Ok(n as usize);
            }

            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::WouldBlock => {
                    IoHandle::await_ready(&self.handle, Interest::READABLE, &self.selector)?;
                }
                io::ErrorKind::Interrupted => {}
                _ => return Err(err),
            }
        }
    }

    /// Writes from `buffer`, parking until the socket accepts a write.
    ///
    /// Returns the number of bytes written by one successful syscall;
    /// this may be less than the buffer length.
    pub fn write(&self, buffer: &[u8]) -> io::Result<usize> {
        if buffer.is_empty() {
            return Ok(0);
        }

        loop {
            if self.handle.is_cancelled() {
                return Err(closed_handle_error());
            }

            let n = sys_write(self.handle.fd(), buffer);
            if n >= 0 {
                return Ok(n as usize);
            }

            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::WouldBlock => {
                    IoHandle::await_ready(&self.handle, Interest::WRITABLE, &self.selector)?;
                }
                io::ErrorKind::Interrupted => {}
                _ => return Err(err),
            }
        }
    }

    /// Writes the entire buffer, parking as needed.
    pub fn write_all(&self, mut buffer: &[u8]) -> io::Result<()> {
        while !buffer.is_empty() {
            let n = self.write(buffer)?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "failed to write whole buffer",
                ));
            }

            buffer = &buffer[n..];
        }

        Ok(())
    }

    /// Returns the address of the connected peer.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Returns the local socket address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        sys_sockname(self.handle.fd())
    }

    /// Shuts down one or both directions of the connection.
    pub fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        sys_shutdown(self.handle.fd(), how)
    }

    /// Closes the socket.
    ///
    /// Idempotent. Parked operations are released with an error and the
    /// selector registration is cancelled; the descriptor itself is
    /// closed when the socket is dropped.
    pub fn close(&self) {
        if !self.handle.cancel() {
            return;
        }

        let selectable: Arc<dyn Selectable> = self.handle.clone();
        let _ = self.selector.cancel(selectable);
    }
}

/// Whether a connect error means "in progress, wait for writability".
fn connect_in_progress(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::WouldBlock {
        return true;
    }

    #[cfg(unix)]
    if err.raw_os_error() == Some(libc::EINPROGRESS) {
        return true;
    }

    false
}

impl Drop for TcpSocket {
    fn drop(&mut self) {
        self.close();
        sys_close(self.handle.fd());
    }
}

impl std::fmt::Debug for TcpSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpSocket")
            .field("fd", &self.handle.fd())
            .field("peer", &self.peer)
            .finish()
    }
}
