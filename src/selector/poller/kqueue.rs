//! macOS `kqueue`-based poller implementation.
//!
//! Functionally equivalent to the Linux `epoll` poller. Read and write
//! interests map to `EVFILT_READ`/`EVFILT_WRITE` filters, and the wake
//! channel is an `EVFILT_USER` event triggered from any thread.

use super::common::{PollInterest, Waker};
use crate::selector::event::Event;

use libc::{
    EV_ADD, EV_CLEAR, EV_DELETE, EV_ENABLE, EV_EOF, EV_ERROR, EVFILT_READ, EVFILT_USER,
    EVFILT_WRITE, NOTE_TRIGGER, kevent, kqueue, timespec,
};
use std::io;
use std::os::unix::io::RawFd;
use std::ptr;
use std::sync::Arc;
use std::time::Duration;

/// Identifier of the internal wake event.
///
/// `EVFILT_USER` idents live in their own namespace, so this cannot
/// collide with a descriptor.
const WAKE_IDENT: usize = 0;

/// macOS `kqueue` poller.
///
/// This poller owns the kqueue descriptor and a reusable event buffer.
/// The waker wraps the kqueue itself: triggering the registered
/// `EVFILT_USER` event interrupts a blocking `kevent()` call, and the
/// trigger is latched until consumed so a wake between two waits is
/// not lost.
pub(crate) struct KqueuePoller {
    /// Kqueue file descriptor.
    kq: RawFd,

    /// Reusable buffer for kernel events.
    events: Vec<kevent>,

    /// Waker wrapping the kqueue descriptor.
    waker: Arc<Waker>,
}

unsafe impl Send for KqueuePoller {}

impl Waker {
    /// Wake the poller by triggering the user event.
    pub(crate) fn wake(&self) {
        let event = kevent {
            ident: WAKE_IDENT,
            filter: EVFILT_USER,
            flags: 0,
            fflags: NOTE_TRIGGER,
            data: 0,
            udata: ptr::null_mut(),
        };

        unsafe {
            kevent(self.0, &event, 1, ptr::null_mut(), 0, ptr::null());
        }
    }
}

impl KqueuePoller {
    /// Create a new `KqueuePoller` with its wake event registered.
    pub(crate) fn new() -> io::Result<Self> {
        let kq = unsafe { kqueue() };
        if kq < 0 {
            return Err(io::Error::last_os_error());
        }

        let event = kevent {
            ident: WAKE_IDENT,
            filter: EVFILT_USER,
            flags: EV_ADD | EV_ENABLE | EV_CLEAR,
            fflags: 0,
            data: 0,
            udata: ptr::null_mut(),
        };

        let rc = unsafe { kevent(kq, &event, 1, ptr::null_mut(), 0, ptr::null()) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(kq) };
            return Err(err);
        }

        Ok(Self {
            kq,
            events: Vec::with_capacity(64),
            waker: Arc::new(Waker(kq)),
        })
    }

    /// Return the poller waker.
    pub(crate) fn waker(&self) -> Arc<Waker> {
        self.waker.clone()
    }

    /// Apply a single filter change to the kqueue.
    fn change(&self, fd: RawFd, filter: i16, flags: u16, token: usize) -> io::Result<()> {
        let event = kevent {
            ident: fd as usize,
            filter,
            flags,
            fflags: 0,
            data: 0,
            udata: token as *mut _,
        };

        let rc = unsafe { kevent(self.kq, &event, 1, ptr::null_mut(), 0, ptr::null()) };
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    /// Delete one filter for `fd`, ignoring "was not registered".
    fn delete(&self, fd: RawFd, filter: i16) -> io::Result<()> {
        match self.change(fd, filter, EV_DELETE, 0) {
            Err(err) if err.raw_os_error() == Some(libc::ENOENT) => Ok(()),
            other => other,
        }
    }

    /// Register a descriptor with the poller.
    pub(crate) fn register(
        &mut self,
        fd: RawFd,
        token: usize,
        interest: PollInterest,
    ) -> io::Result<()> {
        if interest.read {
            self.change(fd, EVFILT_READ, EV_ADD | EV_ENABLE, token)?;
        }
        if interest.write {
            self.change(fd, EVFILT_WRITE, EV_ADD | EV_ENABLE, token)?;
        }

        Ok(())
    }

    /// Update interest flags for an already registered descriptor.
    ///
    /// Kqueue has no single-shot modify: the absent filter is deleted
    /// and the wanted one (re-)added.
    pub(crate) fn reregister(
        &mut self,
        fd: RawFd,
        token: usize,
        interest: PollInterest,
    ) -> io::Result<()> {
        if interest.read {
            self.change(fd, EVFILT_READ, EV_ADD | EV_ENABLE, token)?;
        } else {
            self.delete(fd, EVFILT_READ)?;
        }

        if interest.write {
            self.change(fd, EVFILT_WRITE, EV_ADD | EV_ENABLE, token)?;
        } else {
            self.delete(fd, EVFILT_WRITE)?;
        }

        Ok(())
    }

    /// Remove a descriptor from the poller.
    pub(crate) fn deregister(&mut self, fd: RawFd) -> io::Result<()> {
        self.delete(fd, EVFILT_READ)?;
        self.delete(fd, EVFILT_WRITE)?;

        Ok(())
    }

    /// Poll for I/O readiness events.
    pub(crate) fn poll(
        &mut self,
        events: &mut Vec<Event>,
        timeout: Option<Duration>,
    ) -> io::Result<()> {
        let ts = timeout.map(|t| timespec {
            tv_sec: t.as_secs() as _,
            tv_nsec: t.subsec_nanos() as _,
        });

        let ts_ptr = ts
            .as_ref()
            .map(|ts| ts as *const timespec)
            .unwrap_or(ptr::null());

        unsafe {
            self.events.set_len(self.events.capacity());
        }

        let n = unsafe {
            kevent(
                self.kq,
                ptr::null(),
                0,
                self.events.as_mut_ptr(),
                self.events.capacity() as i32,
                ts_ptr,
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
            if ev.filter == EVFILT_USER && ev.ident == WAKE_IDENT {
                continue;
            }

            // A failed changelist entry surfaced late; skip it.
            if ev.flags & EV_ERROR != 0 {
                continue;
            }

            let token = ev.udata as usize;

            let readable = ev.filter == EVFILT_READ || ev.flags & EV_EOF != 0;
            let writable = ev.filter == EVFILT_WRITE;

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

impl Drop for KqueuePoller {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.kq);
        }
    }
}
