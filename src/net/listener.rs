use crate::net::handle::{HandleKind, IoHandle, closed_handle_error};
use crate::net::socket::TcpSocket;
use crate::selector::handle::{Interest, Selectable};
use crate::selector::manager::SelectorManager;
use crate::selector::poller::platform::{
    sys_accept, sys_bind, sys_close, sys_enable_dual_stack, sys_listen, sys_parse_sockaddr,
    sys_set_reuseaddr, sys_socket, sys_sockname,
};

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

/// A TCP listener driven by a shared selector.
///
/// `TcpListener` accepts connections on a non-blocking descriptor.
/// [`accept`](Self::accept) parks the calling thread until the selector
/// reports a pending connection; the accepted socket is attached to the
/// same selector.
pub struct TcpListener {
    handle: Arc<IoHandle>,
    selector: SelectorManager,
}

impl TcpListener {
    /// Binds a listener to the given address and starts listening.
    ///
    /// The address must be a socket address string such as
    /// `"127.0.0.1:8080"` or `"[::1]:8080"`. This:
    /// - creates a non-blocking socket,
    /// - enables `SO_REUSEADDR`,
    /// - configures IPv6 dual-stack where applicable,
    /// - binds and starts listening.
    pub(crate) fn bind(selector: &SelectorManager, address: &str) -> io::Result<Self> {
        selector.ensure_running()?;

        let (storage, len) = sys_parse_sockaddr(address)?;
        let domain = storage.ss_family as i32;

        let fd = sys_socket(domain)?;

        // Construct the listener before the fallible setup steps so an
        // early return closes the descriptor.
        let listener = Self {
            handle: IoHandle::new(HandleKind::Listener, fd),
            selector: selector.clone(),
        };

        sys_set_reuseaddr(fd)?;
        sys_enable_dual_stack(fd, domain)?;
        sys_bind(fd, &storage, len)?;
        sys_listen(fd)?;

        Ok(listener)
    }

    /// Accepts an incoming connection.
    ///
    /// Parks the calling thread until a client connects, then returns
    /// the connected socket and the peer address.
    pub fn accept(&self) -> io::Result<(TcpSocket, SocketAddr)> {
        loop {
            if self.handle.is_cancelled() {
                return Err(closed_handle_error());
            }

            match sys_accept(self.handle.fd()) {
                Ok((fd, addr)) => {
                    let socket = TcpSocket::from_accepted(self.selector.clone(), fd, addr);
                    return Ok((socket, addr));
                }

                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    IoHandle::await_ready(&self.handle, Interest::ACCEPTABLE, &self.selector)?;
                }

                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}

                Err(err) => return Err(err),
            }
        }
    }

    /// Returns the local socket address of this listener.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        sys_sockname(self.handle.fd())
    }

    /// Closes the listener.
    ///
    /// Idempotent. A parked `accept` is released with an error and the
    /// selector registration is cancelled; the descriptor itself is
    /// closed when the listener is dropped.
    pub fn close(&self) {
        if !self.handle.cancel() {
            return;
        }

        let selectable: Arc<dyn Selectable> = self.handle.clone();
        let _ = self.selector.cancel(selectable);
    }
}

impl Drop for TcpListener {
    fn drop(&mut self) {
        self.close();
        sys_close(self.handle.fd());
    }
}

impl std::fmt::Debug for TcpListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpListener")
            .field("fd", &self.handle.fd())
            .finish()
    }
}
