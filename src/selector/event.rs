/// A readiness event reported by the poller.
///
/// An `Event` carries readiness information for a registered
/// descriptor. It is produced by the poller and consumed by the
/// selector loop to resolve the registered handle.
pub(crate) struct Event {
    /// Token associated with the registered descriptor.
    ///
    /// This token identifies the registration inside the registry.
    pub(crate) token: usize,

    /// Indicates that the descriptor is readable.
    pub(crate) readable: bool,

    /// Indicates that the descriptor is writable.
    pub(crate) writable: bool,
}
