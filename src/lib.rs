//! # sockmux
//!
//! **sockmux** is a non-blocking socket layer for Rust, built around a
//! single readiness selector shared by many concurrently-used sockets.
//!
//! Unlike a full async runtime, sockmux has no futures and no
//! scheduler of its own. One dedicated thread blocks on the OS
//! readiness primitive (epoll on Linux, kqueue on macOS, WSAPoll on
//! Windows); socket operations run on whatever thread calls them and
//! park only that thread while they wait. Readiness callbacks are
//! handed to a pluggable [`Dispatch`] executor so the selector loop is
//! never occupied by user work.
//!
//! The crate provides:
//!
//! - A **shared selector** ([`SelectorManager`]) that is started
//!   lazily, accepts registrations from any thread over a bounded
//!   submission queue, and shuts down exactly once
//! - **Non-blocking TCP** ([`net::TcpSocket`], [`net::TcpListener`])
//!   with connect, accept, read and write that never busy-wait
//! - A **handle contract** ([`Selectable`]) for plugging custom
//!   registrants into the same loop
//! - A small **worker pool** ([`ThreadPool`]) usable as the callback
//!   dispatcher
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sockmux::dispatch::ThreadPool;
//! use sockmux::SelectorManager;
//! use std::sync::Arc;
//!
//! let pool = Arc::new(ThreadPool::new(4));
//! let selector = SelectorManager::new(pool.clone());
//!
//! let listener = selector.bind("127.0.0.1:8080")?;
//! loop {
//!     let (socket, peer) = listener.accept()?;
//!     // hand the socket to a worker thread...
//! }
//! ```
//!
//! ## Modules
//!
//! - [`net`] — TCP listener and socket types
//! - [`dispatch`] — the callback executor boundary and the bundled pool
//!
//! ## Shutdown
//!
//! [`SelectorManager::close`] stops the loop and fails everything still
//! pending. The dispatcher is a borrowed dependency: shut down the
//! selector first, then the dispatcher.

mod selector;
mod utils;

pub mod dispatch;
pub mod net;

pub use dispatch::{Dispatch, ThreadPool};
pub use selector::{Interest, RawFd, Selectable, SelectorManager, SelectorStats};
