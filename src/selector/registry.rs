use crate::selector::handle::{Interest, RawFd, Selectable};
use crate::selector::poller::Poller;
use crate::utils::Slab;

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

/// The binding between a descriptor and its OS watch entry.
///
/// `armed` always equals the last op mask applied to the poller for
/// this descriptor; a handle whose requested interest differs is still
/// queued. An empty `armed` mask means the descriptor is currently
/// detached from the OS watch set (disarmed), so level-triggered
/// readiness cannot re-report it until it is re-armed.
struct Registration {
    fd: RawFd,
    armed: Interest,
    handle: Arc<dyn Selectable>,
}

/// The descriptor → handle association, owned by the loop thread.
///
/// The registry stores registrations in a slab keyed by the token the
/// poller reports back, plus a descriptor index for idempotent
/// re-registration. It holds the handles non-owningly: dropping a
/// registration never tears down the socket behind it.
///
/// Tokens freed during a loop iteration are quarantined until
/// [`end_cycle`](Self::end_cycle) so an event collected earlier in the
/// same iteration cannot be resolved against an unrelated registration
/// that recycled the token.
pub(crate) struct Registry {
    slots: Slab<Registration>,
    by_fd: HashMap<RawFd, usize>,
    retired: Vec<usize>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            slots: Slab::with_capacity(64),
            by_fd: HashMap::new(),
            retired: Vec::new(),
        }
    }

    /// Applies a handle's current interest, creating the watch entry if
    /// the descriptor is new and updating it otherwise.
    ///
    /// Idempotent: an unchanged op mask performs no syscall. An error
    /// means the descriptor lost a race with a concurrent close or
    /// cancellation; the stale entry is dropped and the caller reports
    /// the failure through the handle, never out of the loop.
    pub(crate) fn register_or_update(
        &mut self,
        poller: &mut Poller,
        handle: &Arc<dyn Selectable>,
    ) -> io::Result<()> {
        let fd = handle.raw_fd();
        let wanted = handle.interest();

        let Some(&token) = self.by_fd.get(&fd) else {
            if wanted.is_empty() {
                return Ok(());
            }

            let token = self.slots.insert(Registration {
                fd,
                armed: wanted,
                handle: handle.clone(),
            });

            if let Err(err) = poller.register(fd, token, wanted.to_poll()) {
                self.slots.remove(token);
                return Err(err);
            }

            self.by_fd.insert(fd, token);
            return Ok(());
        };

        let registration = self
            .slots
            .get_mut(token)
            .expect("descriptor index points at a live registration");

        if registration.armed == wanted {
            // Same ops from a new handle instance: adopt it so a later
            // cancel for the old one cannot tear this entry down.
            if !Arc::ptr_eq(&registration.handle, handle) {
                registration.handle = handle.clone();
            }
            return Ok(());
        }

        // A disarmed registration was detached from the OS set, so
        // re-arming is an add, not a modify.
        let result = if wanted.is_empty() {
            poller.deregister(fd)
        } else if registration.armed.is_empty() {
            poller.register(fd, token, wanted.to_poll())
        } else {
            poller.reregister(fd, token, wanted.to_poll())
        };

        match result {
            Ok(()) => {
                registration.armed = wanted;
                registration.handle = handle.clone();
                Ok(())
            }
            Err(err) => {
                self.retire(token, fd);
                Err(err)
            }
        }
    }

    /// Detaches a handle's registration, if it is still the one bound
    /// to its descriptor.
    ///
    /// A cancel that lost a race with descriptor reuse finds a foreign
    /// handle under the descriptor and leaves it alone. Detaching is
    /// silent; failures from the poller are expected here (the owner
    /// usually closed the descriptor already) and ignored.
    pub(crate) fn cancel(&mut self, poller: &mut Poller, handle: &Arc<dyn Selectable>) {
        let fd = handle.raw_fd();

        let Some(&token) = self.by_fd.get(&fd) else {
            return;
        };

        let registered = self
            .slots
            .get(token)
            .expect("descriptor index points at a live registration");

        if !Arc::ptr_eq(&registered.handle, handle) {
            return;
        }

        let armed = registered.armed;
        self.retire(token, fd);

        if !armed.is_empty() {
            if let Err(err) = poller.deregister(fd) {
                log::trace!("deregister of cancelled fd lost a close race: {err}");
            }
        }
    }

    /// Returns the handle registered under `token`, if any.
    pub(crate) fn handle_for(&self, token: usize) -> Option<Arc<dyn Selectable>> {
        self.slots.get(token).map(|r| r.handle.clone())
    }

    /// Clears a ready registration's armed interest before its callback
    /// is dispatched.
    ///
    /// The descriptor is detached from the OS watch set entirely: with
    /// level-triggered readiness, leaving it watched would re-report
    /// the same condition on the next poll before the callback had a
    /// chance to re-arm, starving other descriptors and spinning the
    /// loop. On failure the registration is dropped and the error
    /// returned so the caller can fail the handle instead of invoking
    /// its ready callback.
    pub(crate) fn disarm(&mut self, poller: &mut Poller, token: usize) -> io::Result<()> {
        let Some(registration) = self.slots.get_mut(token) else {
            return Ok(());
        };

        if registration.armed.is_empty() {
            return Ok(());
        }

        let fd = registration.fd;

        match poller.deregister(fd) {
            Ok(()) => {
                registration.armed = Interest::NONE;
                Ok(())
            }
            Err(err) => {
                self.retire(token, fd);
                Err(err)
            }
        }
    }

    /// Drains every live handle, for failing them at shutdown.
    pub(crate) fn drain_handles(&mut self) -> Vec<Arc<dyn Selectable>> {
        let tokens: Vec<usize> = self.by_fd.values().copied().collect();
        self.by_fd.clear();

        tokens
            .into_iter()
            .filter_map(|token| self.slots.remove(token).map(|r| r.handle))
            .collect()
    }

    /// Releases tokens freed during this loop iteration for reuse.
    ///
    /// Called once per iteration, after the collected events have been
    /// resolved.
    pub(crate) fn end_cycle(&mut self) {
        for token in self.retired.drain(..) {
            self.slots.release(token);
        }
    }

    fn retire(&mut self, token: usize, fd: RawFd) {
        self.slots.take(token);
        self.by_fd.remove(&fd);
        self.retired.push(token);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::Registry;
    use crate::selector::handle::{Interest, RawFd, Selectable};
    use crate::selector::poller::Poller;
    use crate::selector::poller::platform::sys_close;

    use std::io;
    use std::net::UdpSocket;
    use std::os::fd::IntoRawFd;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU8, Ordering};

    struct FixedHandle {
        fd: RawFd,
        interest: AtomicU8,
    }

    impl FixedHandle {
        fn new(fd: RawFd, interest: Interest) -> Arc<Self> {
            Arc::new(Self {
                fd,
                interest: AtomicU8::new(interest.bits()),
            })
        }

        fn set_interest(&self, interest: Interest) {
            self.interest.store(interest.bits(), Ordering::Relaxed);
        }
    }

    impl Selectable for FixedHandle {
        fn raw_fd(&self) -> RawFd {
            self.fd
        }

        fn interest(&self) -> Interest {
            Interest::from_bits(self.interest.load(Ordering::Relaxed))
        }

        fn on_ready(&self) {}

        fn on_failed(&self, _error: io::Error) {}
    }

    fn socket_fd() -> RawFd {
        UdpSocket::bind("127.0.0.1:0")
            .expect("Failed to bind probe socket")
            .into_raw_fd()
    }

    #[test]
    fn register_update_and_cancel() {
        let mut poller = Poller::new().expect("Failed to create poller");
        let mut registry = Registry::new();

        let fd = socket_fd();
        let handle = FixedHandle::new(fd, Interest::READABLE);
        let selectable: Arc<dyn Selectable> = handle.clone();

        registry
            .register_or_update(&mut poller, &selectable)
            .expect("Failed to register");

        // Unchanged interest is a no-op, changed interest an update.
        registry
            .register_or_update(&mut poller, &selectable)
            .expect("Failed to re-apply unchanged interest");

        handle.set_interest(Interest::READABLE | Interest::WRITABLE);
        registry
            .register_or_update(&mut poller, &selectable)
            .expect("Failed to update interest");

        registry.cancel(&mut poller, &selectable);
        registry.end_cycle();

        sys_close(fd);
    }

    #[test]
    fn cancel_for_a_foreign_handle_is_ignored() {
        let mut poller = Poller::new().expect("Failed to create poller");
        let mut registry = Registry::new();

        let fd = socket_fd();
        let registered: Arc<dyn Selectable> = FixedHandle::new(fd, Interest::READABLE);
        let foreign: Arc<dyn Selectable> = FixedHandle::new(fd, Interest::READABLE);

        registry
            .register_or_update(&mut poller, &registered)
            .expect("Failed to register");

        registry.cancel(&mut poller, &foreign);
        assert!(registry.handle_for(0).is_some());

        registry.cancel(&mut poller, &registered);
        assert!(registry.handle_for(0).is_none());

        registry.end_cycle();
        sys_close(fd);
    }

    #[test]
    fn registering_a_closed_descriptor_fails_into_the_caller() {
        let mut poller = Poller::new().expect("Failed to create poller");
        let mut registry = Registry::new();

        let fd = socket_fd();
        sys_close(fd);

        let handle: Arc<dyn Selectable> = FixedHandle::new(fd, Interest::READABLE);

        registry
            .register_or_update(&mut poller, &handle)
            .expect_err("Registering a closed descriptor must fail");
        assert!(registry.handle_for(0).is_none());
    }

    #[test]
    fn disarmed_registration_rearms_after_ready() {
        let mut poller = Poller::new().expect("Failed to create poller");
        let mut registry = Registry::new();

        let fd = socket_fd();
        let handle = FixedHandle::new(fd, Interest::WRITABLE);
        let selectable: Arc<dyn Selectable> = handle.clone();

        registry
            .register_or_update(&mut poller, &selectable)
            .expect("Failed to register");

        registry
            .disarm(&mut poller, 0)
            .expect("Failed to disarm registration");

        // Re-arming after a disarm goes through the add path again.
        registry
            .register_or_update(&mut poller, &selectable)
            .expect("Failed to re-arm");

        registry.cancel(&mut poller, &selectable);
        registry.end_cycle();
        sys_close(fd);
    }
}
