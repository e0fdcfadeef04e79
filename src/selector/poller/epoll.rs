//! Linux `epoll`-based poller implementation.
//!
//! This module provides the Linux backend for the selector. It is
//! functionally equivalent to the macOS `kqueue` poller and exposes the
//! same interface.
//!
//! Responsibilities:
//! - Register descriptors with read/write interests
//! - Block waiting for I/O readiness
//! - Wake the selector loop when new submissions arrive
//!
//! Control operations report failure through `io::Result` so the
//! selector can tell an invalidated descriptor apart from a healthy
//! one: racing a concurrent close is expected and handled upstream.

use super::common::{PollInterest, Waker};
use crate::selector::event::Event;

use libc::{
    EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLL_CTL_MOD, EPOLLERR, EPOLLHUP, EPOLLIN,
    EPOLLOUT, epoll_create1, epoll_ctl, epoll_event, epoll_wait,
};
use std::io;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;

/// Reserved token used internally for the wake-up event.
///
/// This value must never collide with tokens produced by the
/// registration slab. Using `u64::MAX` guarantees uniqueness.
const WAKE_TOKEN: u64 = u64::MAX;

/// Linux `epoll` poller.
///
/// This poller owns:
/// - an `epoll` instance,
/// - an internal `eventfd` used as a wake-up signal,
/// - a reusable event buffer.
///
/// The wake-up mechanism allows other threads to interrupt a blocking
/// `epoll_wait()` call. The eventfd stays readable until drained, so a
/// wake requested while the loop is between two waits is not lost.
pub(crate) struct EpollPoller {
    /// Epoll file descriptor.
    epoll: RawFd,

    /// Reusable buffer for epoll events.
    events: Vec<epoll_event>,

    /// Waker wrapping the internal eventfd.
    waker: Arc<Waker>,
}

unsafe impl Send for EpollPoller {}

impl Waker {
    /// Wake the poller.
    ///
    /// This writes to the internal `eventfd`, causing `epoll_wait` to
    /// return immediately.
    pub(crate) fn wake(&self) {
        let buf: u64 = 1;
        unsafe {
            libc::write(self.0, &buf as *const _ as *const _, 8);
        }
    }
}

fn cvt(rc: i32) -> io::Result<()> {
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

fn interest_flags(interest: PollInterest) -> u32 {
    let mut flags = 0;

    if interest.read {
        flags |= EPOLLIN;
    }
    if interest.write {
        flags |= EPOLLOUT;
    }

    flags as u32
}

impl EpollPoller {
    /// Create a new `EpollPoller`.
    ///
    /// This:
    /// - creates the epoll instance,
    /// - creates a non-blocking `eventfd`,
    /// - registers the eventfd into epoll as a persistent wake source.
    pub(crate) fn new() -> io::Result<Self> {
        let epoll = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        if epoll < 0 {
            return Err(io::Error::last_os_error());
        }

        let eventfd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if eventfd < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(epoll) };
            return Err(err);
        }

        let mut event = epoll_event {
            events: EPOLLIN as u32,
            u64: WAKE_TOKEN,
        };

        if let Err(err) = cvt(unsafe { epoll_ctl(epoll, EPOLL_CTL_ADD, eventfd, &mut event) }) {
            unsafe {
                libc::close(eventfd);
                libc::close(epoll);
            }
            return Err(err);
        }

        Ok(Self {
            epoll,
            events: Vec::with_capacity(64),
            waker: Arc::new(Waker(eventfd)),
        })
    }

    /// Return the poller waker.
    ///
    /// The selector uses this to interrupt `epoll_wait` when new
    /// submissions arrive.
    pub(crate) fn waker(&self) -> Arc<Waker> {
        self.waker.clone()
    }

    /// Register a descriptor with the poller.
    pub(crate) fn register(
        &mut self,
        fd: RawFd,
        token: usize,
        interest: PollInterest,
    ) -> io::Result<()> {
        let mut event = epoll_event {
            events: interest_flags(interest),
            u64: token as u64,
        };

        cvt(unsafe { epoll_ctl(self.epoll, EPOLL_CTL_ADD, fd, &mut event) })
    }

    /// Update interest flags for an already registered descriptor.
    pub(crate) fn reregister(
        &mut self,
        fd: RawFd,
        token: usize,
        interest: PollInterest,
    ) -> io::Result<()> {
        let mut event = epoll_event {
            events: interest_flags(interest),
            u64: token as u64,
        };

        cvt(unsafe { epoll_ctl(self.epoll, EPOLL_CTL_MOD, fd, &mut event) })
    }

    /// Remove a descriptor from the poller.
    pub(crate) fn deregister(&mut self, fd: RawFd) -> io::Result<()> {
        cvt(unsafe { epoll_ctl(self.epoll, EPOLL_CTL_DEL, fd, std::ptr::null_mut()) })
    }

    /// Poll for I/O readiness events.
    ///
    /// Blocks until:
    /// - at least one descriptor becomes ready,
    /// - the wake event is triggered,
    /// - or the optional timeout expires.
    pub(crate) fn poll(
        &mut self,
        events: &mut Vec<Event>,
        timeout: Option<Duration>,
    ) -> io::Result<()> {
        let timeout_ms = timeout
            .map(|t| t.as_millis().min(i32::MAX as u128) as i32)
            .unwrap_or(-1);

        unsafe {
            self.events.set_len(self.events.capacity());
        }

        let n = unsafe {
            epoll_wait(
                self.epoll,
                self.events.as_mut_ptr(),
                self.events.capacity() as i32,
                timeout_ms,
            )
        };

        if n < 0 {
            unsafe {
                self.events.set_len(0);
            }

            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }

        unsafe {
            self.events.set_len(n as usize);
        }

        events.clear();

        for ev in &self.events {
            // Wake-up event
            if ev.u64 == WAKE_TOKEN {
                let mut buf = 0u64;
                unsafe {
                    libc::read(self.waker.0, &mut buf as *mut _ as *mut _, 8);
                }
                continue;
            }

            let token = ev.u64 as usize;

            let readable = ev.events & ((EPOLLIN | EPOLLERR | EPOLLHUP) as u32) != 0;
            let writable = ev.events & ((EPOLLOUT | EPOLLERR | EPOLLHUP) as u32) != 0;

            if let Some(e) = events.iter_mut().find(|e| e.token == token) {
                e.readable |= readable;
                e.writable |= writable;
            } else {
                events.push(Event {
                    token,
                    readable,
                    writable,
                });
            }
        }

        Ok(())
    }
}

impl Drop for EpollPoller {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epoll);
        }
    }
}

impl Drop for Waker {
    /// The waker owns the eventfd: it must stay open as long as any
    /// thread might still wake the (possibly already gone) loop, or a
    /// late wake would write into a recycled descriptor.
    fn drop(&mut self) {
        unsafe {
            libc::close(self.0);
        }
    }
}
