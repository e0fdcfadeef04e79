//! Platform-specific readiness poller abstraction.
//!
//! This module provides a unified interface over the OS readiness
//! primitives the selector is built on: `epoll` on Linux, `kqueue` on
//! macOS and `WSAPoll` on Windows.
//!
//! Every backend exposes the same surface:
//! - non-blocking register / reregister / deregister of a descriptor
//!   with a read/write interest,
//! - a blocking `poll` returning the ready subset,
//! - a cross-thread wake that interrupts a blocking `poll` and is never
//!   lost relative to a concurrent registration.
//!
//! The concrete implementation is selected at compile time.

pub(crate) mod common;

pub(crate) use common::{PollInterest, Waker};

#[cfg(target_os = "linux")]
mod epoll;

#[cfg(target_os = "macos")]
mod kqueue;

#[cfg(windows)]
mod wsapoll;

#[cfg(target_os = "linux")]
pub(crate) type Poller = epoll::EpollPoller;

#[cfg(target_os = "macos")]
pub(crate) type Poller = kqueue::KqueuePoller;

#[cfg(windows)]
pub(crate) type Poller = wsapoll::WsaPoller;

#[cfg(unix)]
pub(crate) mod unix;

#[cfg(unix)]
pub(crate) use unix as platform;

#[cfg(windows)]
pub(crate) mod windows;

#[cfg(windows)]
pub(crate) use windows as platform;
