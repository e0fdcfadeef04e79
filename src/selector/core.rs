use crate::dispatch::Dispatch;
use crate::selector::event::Event;
use crate::selector::handle::Selectable;
use crate::selector::manager::{Counters, closed_error};
use crate::selector::poller::Poller;
use crate::selector::queue::SubmissionQueue;
use crate::selector::registry::Registry;
use crate::selector::request::Request;

use log::{debug, error, trace, warn};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// The selector loop.
///
/// Exactly one dedicated thread runs the loop. Each iteration:
/// 1. blocks in the poller until readiness or an explicit wake
///    (the sole blocking point of the loop thread),
/// 2. drains the submission queue and applies every request,
/// 3. resolves each collected event: the registration is disarmed
///    first, then the handle's callback is submitted to the
///    dispatcher, so a handle is never invoked twice for the same
///    readiness and callback work never occupies the loop thread.
///
/// Per-handle failures are delivered through `on_failed` and never
/// terminate the loop; only closing the selector (or a hard poller
/// failure) ends it.
pub(crate) struct Selector {
    /// Platform-specific poller (epoll, kqueue, WSAPoll).
    poller: Poller,

    /// Consumer side of the submission channel.
    queue: SubmissionQueue,

    /// Descriptor → handle association.
    registry: Registry,

    /// Buffer used to collect readiness events from the poller.
    events: Vec<Event>,

    /// Executor running the ready/failed callbacks off this thread.
    dispatcher: Arc<dyn Dispatch>,

    /// Shared closed flag, set by the manager.
    closed: Arc<AtomicBool>,

    /// Diagnostics counters shared with the manager.
    counters: Arc<Counters>,
}

impl Selector {
    pub(crate) fn new(
        poller: Poller,
        queue: SubmissionQueue,
        dispatcher: Arc<dyn Dispatch>,
        closed: Arc<AtomicBool>,
        counters: Arc<Counters>,
    ) -> Self {
        Self {
            poller,
            queue,
            registry: Registry::new(),
            events: Vec::with_capacity(64),
            dispatcher,
            closed,
            counters,
        }
    }

    /// Runs the loop until the selector is closed.
    pub(crate) fn run(mut self) {
        loop {
            if self.closed.load(Ordering::Acquire) {
                break;
            }

            if let Err(err) = self.poller.poll(&mut self.events, None) {
                error!("selector poll failed, stopping loop: {err}");
                break;
            }

            if self.closed.load(Ordering::Acquire) {
                break;
            }

            self.apply_submissions();
            self.resolve_ready();
            self.registry.end_cycle();
        }

        self.shut_down();
    }

    /// Drains the submission queue and applies every request.
    ///
    /// Registration failures are expected races with concurrent closes;
    /// they are counted, logged and fed back through the handle.
    fn apply_submissions(&mut self) {
        while let Some(request) = self.queue.try_next() {
            match request {
                Request::Register(handle) => {
                    if let Err(err) = self.registry.register_or_update(&mut self.poller, &handle) {
                        self.counters
                            .registration_races
                            .fetch_add(1, Ordering::Relaxed);
                        debug!(
                            "registration of fd {:?} lost a close race: {err}",
                            handle.raw_fd()
                        );
                        self.fail(handle, err);
                    }
                }
                Request::Cancel(handle) => {
                    self.registry.cancel(&mut self.poller, &handle);
                }
            }
        }
    }

    /// Resolves the events collected by the last poll.
    fn resolve_ready(&mut self) {
        let events: Vec<Event> = self.events.drain(..).collect();

        for event in events {
            let Some(handle) = self.registry.handle_for(event.token) else {
                // The registration was cancelled after the event was
                // collected; dropping the event is the normal outcome.
                self.counters.stale_events.fetch_add(1, Ordering::Relaxed);
                trace!("dropping stale readiness event for token {}", event.token);
                continue;
            };

            match self.registry.disarm(&mut self.poller, event.token) {
                Ok(()) => {
                    let ready = handle.clone();
                    let task = Box::new(move || ready.on_ready());

                    if self.dispatcher.execute(task).is_err() {
                        self.fail(handle, io::Error::other("dispatcher rejected callback"));
                    }
                }
                Err(err) => {
                    // Invalidated between collection and dispatch.
                    self.fail(handle, err);
                }
            }
        }
    }

    /// Delivers a failure through the handle, off the loop thread.
    fn fail(&self, handle: Arc<dyn Selectable>, error: io::Error) {
        let fallback = io::Error::new(error.kind(), error.to_string());

        let failed = handle.clone();
        let task = Box::new(move || failed.on_failed(error));

        if self.dispatcher.execute(task).is_err() {
            // Last resort: deliver inline rather than leave the owner
            // parked forever. Failure callbacks are required to be
            // cheap.
            warn!("dispatcher rejected failure callback, delivering inline");
            handle.on_failed(fallback);
        }
    }

    /// Fails everything still pending once the selector has closed.
    ///
    /// Dropping `self` afterwards drops the queue consumer, which
    /// unblocks producers stuck on a full queue, and closes the poller
    /// descriptors.
    fn shut_down(&mut self) {
        // Flipped before the final drain: a producer that submits
        // afterwards observes the flag and treats its submission as
        // failed, so nothing is silently lost in between.
        self.closed.store(true, Ordering::Release);

        while let Some(request) = self.queue.try_next() {
            if let Request::Register(handle) = request {
                self.fail(handle, closed_error());
            }
        }

        for handle in self.registry.drain_handles() {
            self.fail(handle, closed_error());
        }
    }
}
