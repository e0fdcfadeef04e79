use crate::selector::poller::PollInterest;

use std::fmt;
use std::io;
use std::ops::{BitOr, BitOrAssign};

pub use crate::selector::poller::platform::RawFd;

/// The set of operations a handle wants to be notified about.
///
/// `Interest` is a small op mask over the four socket operations the
/// selector distinguishes. Accept and connect interest lower onto the
/// poller's read and write readiness respectively.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Interest(u8);

impl Interest {
    /// No operations; a handle with empty interest is never armed.
    pub const NONE: Interest = Interest(0);

    /// The descriptor has data to read.
    pub const READABLE: Interest = Interest(0b0001);

    /// The descriptor can accept a write.
    pub const WRITABLE: Interest = Interest(0b0010);

    /// The listening descriptor has a pending connection.
    pub const ACCEPTABLE: Interest = Interest(0b0100);

    /// The in-progress connect on the descriptor has resolved.
    pub const CONNECTABLE: Interest = Interest(0b1000);

    /// Returns `true` if no operation is selected.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns `true` if all operations in `other` are selected.
    pub const fn contains(self, other: Interest) -> bool {
        self.0 & other.0 == other.0
    }

    pub(crate) const fn bits(self) -> u8 {
        self.0
    }

    pub(crate) const fn from_bits(bits: u8) -> Interest {
        Interest(bits & 0b1111)
    }

    /// Lowers the op mask onto the poller's two readiness conditions.
    pub(crate) const fn to_poll(self) -> PollInterest {
        PollInterest {
            read: self.0 & (Self::READABLE.0 | Self::ACCEPTABLE.0) != 0,
            write: self.0 & (Self::WRITABLE.0 | Self::CONNECTABLE.0) != 0,
        }
    }
}

impl BitOr for Interest {
    type Output = Interest;

    fn bitor(self, rhs: Interest) -> Interest {
        Interest(self.0 | rhs.0)
    }
}

impl BitOrAssign for Interest {
    fn bitor_assign(&mut self, rhs: Interest) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut set = f.debug_set();

        if self.contains(Interest::READABLE) {
            set.entry(&"readable");
        }
        if self.contains(Interest::WRITABLE) {
            set.entry(&"writable");
        }
        if self.contains(Interest::ACCEPTABLE) {
            set.entry(&"acceptable");
        }
        if self.contains(Interest::CONNECTABLE) {
            set.entry(&"connectable");
        }

        set.finish()
    }
}

/// The capability a registrant exposes to the selector.
///
/// A selectable handle binds a descriptor, the op mask it currently
/// wants to be armed for, and the two callbacks the selector resolves
/// readiness through. Handles are shared as `Arc<dyn Selectable>`; the
/// selector keeps only a non-owning association from descriptor to
/// handle while the descriptor is registered.
///
/// Both callbacks run on the dispatcher, never on the selector loop
/// thread. `on_ready` must tolerate being invoked for a handle whose
/// owner cancelled it concurrently: cancellation only prevents future
/// dispatch, not one already in flight.
pub trait Selectable: Send + Sync {
    /// The underlying OS descriptor.
    fn raw_fd(&self) -> RawFd;

    /// The op mask the handle currently wants armed.
    fn interest(&self) -> Interest;

    /// Invoked when the descriptor becomes ready for one of the armed
    /// operations. Interest has already been disarmed; the handle must
    /// re-submit itself to be notified again.
    fn on_ready(&self);

    /// Invoked when registration failed or the watch entry was
    /// invalidated while a notification was in flight.
    fn on_failed(&self, error: io::Error);
}

#[cfg(test)]
mod tests {
    use super::Interest;

    #[test]
    fn interest_ops_combine() {
        let ops = Interest::READABLE | Interest::CONNECTABLE;

        assert!(ops.contains(Interest::READABLE));
        assert!(ops.contains(Interest::CONNECTABLE));
        assert!(!ops.contains(Interest::WRITABLE));
        assert!(!ops.is_empty());
    }

    #[test]
    fn accept_and_connect_lower_onto_read_and_write() {
        assert!(Interest::ACCEPTABLE.to_poll().read);
        assert!(!Interest::ACCEPTABLE.to_poll().write);

        assert!(Interest::CONNECTABLE.to_poll().write);
        assert!(!Interest::CONNECTABLE.to_poll().read);
    }

    #[test]
    fn empty_interest_lowers_to_nothing() {
        let poll = Interest::NONE.to_poll();

        assert!(!poll.read);
        assert!(!poll.write);
    }
}
