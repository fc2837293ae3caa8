//! Error taxonomy for the runtime (§7).

/// A type-erased error produced by a coroutine body or producer thunk.
///
/// Stored in a future's exception slot in place of a C++ `std::exception_ptr`.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by the future/promise/scheduler core.
#[derive(thiserror::Error, Debug)]
pub enum CoroError {
    /// A promise was dropped before it resolved its future.
    #[error("broken promise: future was never resolved")]
    BrokenPromise,

    /// A future was moved, given a second writer, or asked for a promise
    /// while it was not `Resolved` or `Deferred`.
    #[error("future is still pending")]
    StillPending,

    /// A scheduled target was invoked with `ok = false`, or a future was
    /// dropped while an awaiter was registered.
    #[error("awaited operation was canceled")]
    AwaitCanceled,

    /// `Scheduler::current()` was called with no scheduler bound to the
    /// calling thread.
    #[error("no scheduler is active on this thread")]
    NoActiveScheduler,

    /// The coroutine body (or producer thunk) raised an application error.
    #[error(transparent)]
    Failed(#[from] BoxError),
}

impl CoroError {
    pub fn failed<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        CoroError::Failed(Box::new(err))
    }

    pub fn is_broken_promise(&self) -> bool {
        matches!(self, CoroError::BrokenPromise)
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, CoroError::AwaitCanceled)
    }
}

/// A coroutine-friendly alias; most public operations return this.
pub type Result<T> = std::result::Result<T, CoroError>;
