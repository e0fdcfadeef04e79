use crate::dispatch::Dispatch;
use crate::net::{TcpListener, TcpSocket};
use crate::selector::core::Selector;
use crate::selector::handle::Selectable;
use crate::selector::poller::{Poller, Waker};
use crate::selector::queue::{Submitter, submission_queue};
use crate::selector::request::Request;

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

/// Capacity of the submission queue.
///
/// Producers submitting past this bound block until the loop drains
/// an entry, rather than growing the queue without limit.
const SUBMISSION_QUEUE_CAPACITY: usize = 1000;

/// The error every operation on a closed selector fails with.
pub(crate) fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "selector is closed")
}

/// Diagnostics counters kept by the selector loop.
///
/// The races they count are expected and change no control flow; the
/// counters exist so an operator can observe how often they happen.
pub(crate) struct Counters {
    pub(crate) registration_races: AtomicU64,
    pub(crate) stale_events: AtomicU64,
}

/// A snapshot of the selector's diagnostics counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SelectorStats {
    /// Registrations that lost a race with a concurrent close or
    /// cancellation and were reported through `on_failed`.
    pub registration_races: u64,

    /// Readiness events whose registration was cancelled between
    /// collection and dispatch and that were dropped.
    pub stale_events: u64,
}

/// Where the selector is in its life.
///
/// Transitions are one-directional: unstarted → running → closed.
enum Lifecycle {
    Unstarted,
    Running(LoopHandle),
    Closed,
}

/// Producer-side handle to a running loop: the submission channel and
/// the poller waker, paired so a submission is always followed by a
/// wake.
#[derive(Clone)]
struct LoopHandle {
    submitter: Submitter,
    waker: Arc<Waker>,
}

struct Shared {
    /// Executor the loop hands ready/failed callbacks to.
    dispatcher: Arc<dyn Dispatch>,

    /// Lifecycle state, guarded for lazy start and close.
    ///
    /// The loop thread never takes this lock; producers hold it only
    /// long enough to clone the loop handle out.
    lifecycle: Mutex<Lifecycle>,

    /// Mirror of `Lifecycle::Closed`, readable from the loop thread.
    closed: Arc<AtomicBool>,

    /// Diagnostics counters shared with the loop.
    counters: Arc<Counters>,
}

/// The owner of a selector loop and the entry point of this crate.
///
/// A `SelectorManager` shares one readiness loop between any number of
/// sockets and listeners. The loop thread is started lazily by the
/// first socket or listener creation and runs until [`close`] is
/// called.
///
/// The manager is cheaply cloneable; clones share the same loop.
///
/// # Shutdown
///
/// [`close`] is idempotent and safe to call while the loop is blocked
/// waiting for readiness: the loop is woken, fails everything still
/// pending with a closed error and exits. The dispatcher passed to
/// [`new`] is borrowed, not owned: shut it down after the selector,
/// never before.
///
/// [`new`]: SelectorManager::new
/// [`close`]: SelectorManager::close
///
/// # Examples
///
/// ```rust,ignore
/// let pool = Arc::new(ThreadPool::new(4));
/// let selector = SelectorManager::new(pool.clone());
///
/// let listener = selector.bind("127.0.0.1:0")?;
/// let (peer, addr) = listener.accept()?;
/// ```
#[derive(Clone)]
pub struct SelectorManager {
    shared: Arc<Shared>,
}

impl SelectorManager {
    /// Creates a new manager using `dispatcher` to run callbacks.
    ///
    /// No thread is spawned yet; the loop starts with the first socket
    /// or listener.
    pub fn new(dispatcher: Arc<dyn Dispatch>) -> Self {
        Self {
            shared: Arc::new(Shared {
                dispatcher,
                lifecycle: Mutex::new(Lifecycle::Unstarted),
                closed: Arc::new(AtomicBool::new(false)),
                counters: Arc::new(Counters {
                    registration_races: AtomicU64::new(0),
                    stale_events: AtomicU64::new(0),
                }),
            }),
        }
    }

    /// Opens a TCP connection to `address`.
    ///
    /// Starts the selector loop if this is the first socket. The call
    /// blocks the *calling* thread until the connection resolves; the
    /// loop thread is not involved beyond readiness notification.
    pub fn connect(&self, address: &str) -> io::Result<TcpSocket> {
        TcpSocket::connect(self, address)
    }

    /// Binds a TCP listener to `address` and starts listening.
    ///
    /// Starts the selector loop if this is the first listener.
    pub fn bind(&self, address: &str) -> io::Result<TcpListener> {
        TcpListener::bind(self, address)
    }

    /// Submits a handle for registration or re-arming.
    ///
    /// Blocks while the submission queue is at capacity. The loop is
    /// woken after the submission, so a loop already blocked waiting
    /// for readiness observes the new handle within one wait cycle.
    pub fn submit(&self, handle: Arc<dyn Selectable>) -> io::Result<()> {
        self.request(Request::Register(handle))
    }

    /// Cancels a handle's registration.
    ///
    /// Cancellation is cooperative: it prevents future dispatch but a
    /// callback already handed to the dispatcher still runs.
    pub fn cancel(&self, handle: Arc<dyn Selectable>) -> io::Result<()> {
        self.request(Request::Cancel(handle))
    }

    /// Interrupts the loop's current wait, if it is running.
    pub fn wake(&self) -> io::Result<()> {
        let lifecycle = self.shared.lifecycle.lock().unwrap();

        match &*lifecycle {
            Lifecycle::Running(handle) => {
                handle.waker.wake();
                Ok(())
            }
            Lifecycle::Unstarted => Ok(()),
            Lifecycle::Closed => Err(closed_error()),
        }
    }

    /// Closes the selector.
    ///
    /// Idempotent. Wakes a loop blocked in its wait; every pending and
    /// subsequent operation fails with a closed error.
    pub fn close(&self) {
        let mut lifecycle = self.shared.lifecycle.lock().unwrap();
        self.shared.closed.store(true, Ordering::Release);

        if let Lifecycle::Running(handle) = std::mem::replace(&mut *lifecycle, Lifecycle::Closed) {
            handle.waker.wake();
        }
    }

    /// Returns `true` once the selector has been closed.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Returns a snapshot of the diagnostics counters.
    pub fn stats(&self) -> SelectorStats {
        SelectorStats {
            registration_races: self
                .shared
                .counters
                .registration_races
                .load(Ordering::Relaxed),
            stale_events: self.shared.counters.stale_events.load(Ordering::Relaxed),
        }
    }

    /// Starts the loop if needed, without submitting anything.
    ///
    /// Socket and listener creation call this so the loop exists (and a
    /// closed selector is rejected) before any descriptor is created.
    pub(crate) fn ensure_running(&self) -> io::Result<()> {
        self.ensure_started().map(drop)
    }

    fn request(&self, request: Request) -> io::Result<()> {
        let handle = self.ensure_started()?;

        handle.submitter.submit(request)?;
        handle.waker.wake();

        // A close racing this submission may already have drained the
        // queue for the last time. The loop flips the flag before that
        // drain, so either it is visible here or the entry was seen:
        // report failure rather than let the caller wait on an entry
        // nobody will look at.
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(closed_error());
        }

        Ok(())
    }

    /// Starts the loop thread on first use, exactly once.
    fn ensure_started(&self) -> io::Result<LoopHandle> {
        let mut lifecycle = self.shared.lifecycle.lock().unwrap();

        match &*lifecycle {
            Lifecycle::Running(handle) => Ok(handle.clone()),
            Lifecycle::Closed => Err(closed_error()),
            Lifecycle::Unstarted => {
                let poller = Poller::new()?;
                let waker = poller.waker();

                let (submitter, queue) = submission_queue(SUBMISSION_QUEUE_CAPACITY);

                let selector = Selector::new(
                    poller,
                    queue,
                    self.shared.dispatcher.clone(),
                    self.shared.closed.clone(),
                    self.shared.counters.clone(),
                );

                thread::Builder::new()
                    .name("sockmux-selector".to_string())
                    .spawn(move || selector.run())?;

                let handle = LoopHandle { submitter, waker };
                *lifecycle = Lifecycle::Running(handle.clone());

                Ok(handle)
            }
        }
    }
}
