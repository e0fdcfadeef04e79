//! Callback dispatch.
//!
//! The selector loop never runs user callbacks itself: every ready or
//! failed handle is handed to a [`Dispatch`] implementation so callback
//! work cannot stall readiness detection.
//!
//! The crate ships [`ThreadPool`], a small fixed-size pool, but any
//! executor can be plugged in. The dispatcher is an explicitly
//! constructed dependency passed to the selector manager (there is no
//! process-global pool) and the caller owns its shutdown: stop the
//! selector first, the dispatcher second.

mod pool;

pub use pool::ThreadPool;

use std::error::Error;
use std::fmt;

/// A unit of callback work.
pub type Task = Box<dyn FnOnce() + Send>;

/// Error returned when a dispatcher refuses a task.
///
/// This happens once the dispatcher has shut down. The selector treats
/// it as a per-handle failure, never as a reason to stop the loop.
#[derive(Debug)]
pub struct Rejected;

impl fmt::Display for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task rejected, dispatcher is shut down")
    }
}

impl Error for Rejected {}

/// A concurrent task executor the selector can hand callbacks to.
///
/// No ordering guarantee is required between submitted tasks.
pub trait Dispatch: Send + Sync {
    /// Queues `task` for asynchronous execution.
    fn execute(&self, task: Task) -> Result<(), Rejected>;
}
