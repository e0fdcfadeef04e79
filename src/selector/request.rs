use crate::selector::handle::Selectable;

use std::sync::Arc;

/// A producer request awaiting application by the selector loop.
///
/// Cancellation carries the handle rather than a bare descriptor so
/// the loop can tell a stale cancel for a recycled descriptor apart
/// from a live one by pointer identity.
pub(crate) enum Request {
    /// Arm (or re-arm) the handle's current interest.
    Register(Arc<dyn Selectable>),

    /// Detach the handle's registration, if it is still the one
    /// associated with its descriptor.
    Cancel(Arc<dyn Selectable>),
}
