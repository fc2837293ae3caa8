//! `DeferredFuture<T>` (§4.4): a future that does not start evaluating
//! until first accessed.

use std::future::Future as StdFuture;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::error::CoroError;
use crate::future::Future;
use crate::promise::Promise;
use crate::target::PreparedCoroutine;

/// Wraps a producer thunk that only runs once this future is first
/// `.await`ed, `.wait()`ed, or `.get()`-polled.
///
/// Internally this is just `Future::deferred` with a friendlier name and a
/// constructor that takes the thunk directly, matching the original's
/// distinct deferred-future type even though the state machine underneath
/// (`Deferred` state, see `src/future.rs`) is shared with `Future<T>`.
pub struct DeferredFuture<T: Clone + Send + 'static> {
    inner: Future<T>,
}

impl<T: Clone + Send + 'static> DeferredFuture<T> {
    pub fn new(
        thunk: impl FnOnce(Promise<T>) -> Option<PreparedCoroutine> + Send + 'static,
    ) -> Self {
        DeferredFuture {
            inner: Future::deferred(thunk),
        }
    }

    /// Run the thunk now (if it hasn't already run) and return the eager
    /// `Future<T>` underneath. Idempotent: calling twice just returns two
    /// handles to the same cell.
    pub fn into_future(self) -> Future<T> {
        self.inner
    }

    pub fn is_deferred(&self) -> bool {
        self.inner.is_deferred()
    }

    pub fn wait(&self) -> std::result::Result<T, CoroError> {
        self.inner.wait()
    }

    pub fn get(&self) -> std::result::Result<T, CoroError> {
        self.inner.get()
    }
}

impl<T: Clone + Send + 'static> StdFuture for DeferredFuture<T> {
    type Output = std::result::Result<T, CoroError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner).poll(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn thunk_runs_once_on_first_access() {
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = Arc::clone(&ran);
        let d = DeferredFuture::new(move |p| {
            ran2.store(true, Ordering::SeqCst);
            p.call(1);
            None
        });
        assert!(d.is_deferred());
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(d.wait().unwrap(), 1);
        assert!(ran.load(Ordering::SeqCst));
    }
}
