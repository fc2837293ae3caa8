//! `SharedFuture<T>` (§4.4): many consumers awaiting one underlying
//! future, each dispatched through its own slot in a [`TargetList`].

use std::future::Future as StdFuture;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::error::CoroError;
use crate::future::Future;
use crate::target::{Target, TargetList};

type SharedResult<T> = std::result::Result<T, CoroError>;

fn clone_result<T: Clone>(result: &SharedResult<T>) -> SharedResult<T> {
    match result {
        Ok(v) => Ok(v.clone()),
        Err(e) => Err(CoroError::failed_clone(e)),
    }
}

struct SharedCell<T: Clone + Send + 'static> {
    inner: Future<T>,
    consumers: TargetList<SharedResult<T>>,
    dispatcher_installed: AtomicBool,
}

/// A reference-counted future with fan-out consumer registration.
///
/// The first consumer to register a callback installs a single dispatcher
/// on the inner future; every later registration (before or after
/// resolution) goes through the shared `consumers` list instead of adding
/// another callback to the inner future.
pub struct SharedFuture<T: Clone + Send + 'static> {
    cell: Arc<SharedCell<T>>,
}

impl<T: Clone + Send + 'static> Clone for SharedFuture<T> {
    fn clone(&self) -> Self {
        SharedFuture {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T: Clone + Send + 'static> SharedFuture<T> {
    pub fn new(inner: Future<T>) -> Self {
        SharedFuture {
            cell: Arc::new(SharedCell {
                inner,
                consumers: TargetList::new(),
                dispatcher_installed: AtomicBool::new(false),
            }),
        }
    }

    fn dispatch(cell: &Arc<SharedCell<T>>) {
        let result = cell.inner.get();
        for target in cell.consumers.drain_and_disable() {
            target.activate(clone_result(&result));
        }
    }

    fn ensure_dispatcher(&self) {
        if self
            .cell
            .dispatcher_installed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let cell = Arc::clone(&self.cell);
            let cell2 = Arc::clone(&cell);
            let installed = self.cell.inner.set_callback(move || Self::dispatch(&cell));
            if !installed {
                // Inner future was already resolved: nothing will ever
                // invoke the callback above, so dispatch synchronously now.
                Self::dispatch(&cell2);
            }
        }
    }

    /// Register a consumer callback. Returns `true` if it will run later,
    /// `false` if it ran inline because the future was already resolved.
    pub fn set_callback(&self, cb: impl FnOnce(SharedResult<T>) + Send + 'static) -> bool {
        self.ensure_dispatcher();
        match self.cell.consumers.push(Target::from_fn(move |r| {
            cb(r);
            None
        })) {
            Ok(()) => true,
            Err(target) => {
                let result = self.cell.inner.get();
                target.activate(result);
                false
            }
        }
    }

    pub fn wait(&self) -> SharedResult<T> {
        self.cell.inner.wait()
    }

    pub fn get(&self) -> SharedResult<T> {
        self.cell.inner.get()
    }

    pub fn has_value(&self) -> bool {
        self.cell.inner.has_value()
    }
}

impl<T: Clone + Send + 'static> StdFuture for SharedFuture<T> {
    type Output = SharedResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let waker = cx.waker().clone();
        let slot = Arc::new(std::sync::Mutex::new(None));
        let slot2 = Arc::clone(&slot);
        let installed = self.set_callback(move |r| {
            *slot2.lock().unwrap() = Some(r);
            waker.wake();
        });
        if installed {
            Poll::Pending
        } else {
            Poll::Ready(slot.lock().unwrap().take().expect(
                "SharedFuture::set_callback returned false without invoking the callback",
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn all_registered_consumers_see_the_result() {
        let (f, p) = Future::pending();
        let shared = SharedFuture::new(f);
        let seen = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let seen = Arc::clone(&seen);
            shared.set_callback(move |r| {
                assert_eq!(r.unwrap(), 9);
                seen.fetch_add(1, Ordering::SeqCst);
            });
        }
        p.call(9);
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn late_registration_after_resolution_fires_inline() {
        let f = Future::ready(4);
        let shared = SharedFuture::new(f);
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = Arc::clone(&fired);
        let installed = shared.set_callback(move |r| {
            assert_eq!(r.unwrap(), 4);
            fired2.fetch_add(1, Ordering::SeqCst);
        });
        assert!(!installed);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
