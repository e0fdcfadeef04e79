//! TCP networking primitives.
//!
//! This module provides the socket types built on top of the shared
//! selector. It exposes:
//! - [`TcpListener`]: accepting incoming TCP connections,
//! - [`TcpSocket`]: establishing outbound connections and performing
//!   socket I/O.
//!
//! All descriptors are non-blocking. An operation that would block
//! parks the *calling* thread on the socket's handle, registers the
//! matching interest with the selector, and resumes when the selector
//! dispatches the readiness callback. The selector loop itself never
//! blocks on socket I/O.

mod handle;
mod listener;
mod socket;

pub use listener::TcpListener;
pub use socket::TcpSocket;
