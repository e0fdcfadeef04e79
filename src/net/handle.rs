use crate::selector::handle::{Interest, RawFd, Selectable};
use crate::selector::manager::SelectorManager;

use log::trace;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex};

/// The error socket operations fail with once their handle was closed.
pub(crate) fn closed_handle_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "socket is closed")
}

/// The closed set of selectable variants the net layer registers.
#[derive(Clone, Copy, Debug)]
pub(crate) enum HandleKind {
    Socket,
    Listener,
}

/// The selectable handle behind every socket and listener.
///
/// An `IoHandle` binds the descriptor, the interest ops accumulated by
/// currently parked operations, and the gate those operations block
/// on. The selector resolves readiness through the [`Selectable`]
/// callbacks; the callbacks only release the gate, so they are cheap
/// and safe to run for a handle that was cancelled in the meantime.
pub(crate) struct IoHandle {
    kind: HandleKind,
    fd: RawFd,

    /// Ops of the operations currently waiting on the gate.
    interest: AtomicU8,

    /// Set once by `cancel`; a cancelled handle fails every operation.
    cancelled: AtomicBool,

    gate: Gate,
}

impl IoHandle {
    pub(crate) fn new(kind: HandleKind, fd: RawFd) -> Arc<Self> {
        Arc::new(Self {
            kind,
            fd,
            interest: AtomicU8::new(0),
            cancelled: AtomicBool::new(false),
            gate: Gate::new(),
        })
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.fd
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Marks the handle cancelled and releases every parked operation.
    ///
    /// Returns `true` the first time, `false` on repeats.
    pub(crate) fn cancel(&self) -> bool {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return false;
        }

        self.gate.fail(closed_handle_error());
        true
    }

    /// Parks the calling thread until the selector reports readiness
    /// for one of `ops`, or the handle fails.
    ///
    /// The gate epoch is snapshotted before the handle is submitted, so
    /// a readiness callback that fires before the caller parks is not
    /// lost. Every release of the gate wakes all parked operations;
    /// each retries its syscall and re-arms if it still would block.
    pub(crate) fn await_ready(
        handle: &Arc<IoHandle>,
        ops: Interest,
        selector: &SelectorManager,
    ) -> io::Result<()> {
        if handle.is_cancelled() {
            return Err(closed_handle_error());
        }

        let epoch = handle.gate.epoch();
        handle.interest.fetch_or(ops.bits(), Ordering::AcqRel);

        let selectable: Arc<dyn Selectable> = handle.clone();
        selector.submit(selectable)?;

        let result = handle.gate.wait_past(epoch);
        handle.interest.fetch_and(!ops.bits(), Ordering::AcqRel);

        result
    }
}

impl Selectable for IoHandle {
    fn raw_fd(&self) -> RawFd {
        self.fd
    }

    fn interest(&self) -> Interest {
        Interest::from_bits(self.interest.load(Ordering::Acquire))
    }

    fn on_ready(&self) {
        // A cancellation that raced the in-flight notification wins:
        // the parked operation observes the failure, not readiness.
        if self.is_cancelled() {
            self.gate.fail(closed_handle_error());
        } else {
            self.gate.open();
        }
    }

    fn on_failed(&self, error: io::Error) {
        trace!("{:?} handle for fd {:?} failed: {error}", self.kind, self.fd);
        self.gate.fail(error);
    }
}

/// The rendezvous between parked socket operations and the selector's
/// callbacks.
///
/// The gate is an epoch counter plus a sticky error. Opening it bumps
/// the epoch and wakes everyone parked on an older epoch; failing it
/// additionally records the error, which every later wait observes.
/// The first recorded error wins, so a handle fails at most once even
/// when several failure paths race.
struct Gate {
    inner: Mutex<GateInner>,
    resumed: Condvar,
}

struct GateInner {
    epoch: u64,
    error: Option<io::Error>,
}

impl Gate {
    fn new() -> Self {
        Self {
            inner: Mutex::new(GateInner {
                epoch: 0,
                error: None,
            }),
            resumed: Condvar::new(),
        }
    }

    fn epoch(&self) -> u64 {
        self.inner.lock().unwrap().epoch
    }

    fn open(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.epoch += 1;

        self.resumed.notify_all();
    }

    fn fail(&self, error: io::Error) {
        let mut inner = self.inner.lock().unwrap();
        inner.epoch += 1;
        inner.error.get_or_insert(error);

        self.resumed.notify_all();
    }

    /// Blocks until the epoch moves past `epoch` or an error is set.
    fn wait_past(&self, epoch: u64) -> io::Result<()> {
        let mut inner = self.inner.lock().unwrap();

        loop {
            if let Some(error) = &inner.error {
                return Err(io::Error::new(error.kind(), error.to_string()));
            }

            if inner.epoch != epoch {
                return Ok(());
            }

            inner = self.resumed.wait(inner).unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Gate, HandleKind, IoHandle};
    use crate::selector::handle::{Interest, Selectable};

    use std::io;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn gate_release_wakes_a_parked_waiter() {
        let gate = Arc::new(Gate::new());
        let epoch = gate.epoch();

        let waiter = {
            let gate = gate.clone();
            thread::spawn(move || gate.wait_past(epoch))
        };

        thread::sleep(Duration::from_millis(20));
        gate.open();

        waiter.join().unwrap().unwrap();
    }

    #[test]
    fn gate_wait_after_release_does_not_block() {
        let gate = Gate::new();
        let epoch = gate.epoch();

        gate.open();
        gate.wait_past(epoch).unwrap();
    }

    #[test]
    fn gate_keeps_the_first_error() {
        let gate = Gate::new();
        let epoch = gate.epoch();

        gate.fail(io::Error::new(io::ErrorKind::ConnectionReset, "first"));
        gate.fail(io::Error::new(io::ErrorKind::BrokenPipe, "second"));

        let err = gate.wait_past(epoch).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }

    #[test]
    fn ready_after_cancel_resolves_as_failure() {
        let handle = IoHandle::new(HandleKind::Socket, 0 as _);
        let epoch = handle.gate.epoch();

        assert!(handle.cancel());
        assert!(!handle.cancel());

        handle.on_ready();

        let err = handle.gate.wait_past(epoch).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[test]
    fn interest_reflects_armed_ops() {
        let handle = IoHandle::new(HandleKind::Listener, 0 as _);
        assert!(handle.interest().is_empty());

        handle
            .interest
            .fetch_or(Interest::ACCEPTABLE.bits(), std::sync::atomic::Ordering::AcqRel);
        assert!(handle.interest().contains(Interest::ACCEPTABLE));
    }
}
