//! Producer coroutines (§4.5).
//!
//! Rust's own `async fn`/`async {}` blocks already are the "lazily
//! producing coroutine" this system is built around; `Async` only supplies
//! the glue that writes a driven future's result into a `Promise<T>`,
//! matching the role the teacher's `FunctionCoroutine::resume` plays when
//! it forwards an inner future's `Poll::Ready(t)` into its result sender
//! (`src/function_coroutine/mod.rs`).

use std::future::Future as StdFuture;

use crate::deferred::DeferredFuture;
use crate::future::Future;
use crate::scheduler::{spawn_driven, Scheduler};
use crate::shared::SharedFuture;

/// Namespace for the four ways to get a coroutine body running.
pub struct Async;

impl Async {
    /// Block the calling thread until `body` completes, returning its
    /// output directly. Uses a throwaway single-task executor parked on
    /// this thread — no `Scheduler` required.
    pub fn run<T>(body: impl StdFuture<Output = T> + Send + 'static) -> T
    where
        T: Send + 'static,
    {
        let mut body = Box::pin(body);
        let thread = std::thread::current();
        let waker = crate::waker::thread_unparker(thread);
        let mut cx = std::task::Context::from_waker(&waker);
        loop {
            match body.as_mut().poll(&mut cx) {
                std::task::Poll::Ready(value) => return value,
                std::task::Poll::Pending => std::thread::park(),
            }
        }
    }

    /// Spawn `body` onto `scheduler` eagerly, returning an already-running
    /// `Future<T>`.
    pub fn start<T>(scheduler: &Scheduler, body: impl StdFuture<Output = T> + Send + 'static) -> Future<T>
    where
        T: Clone + Send + 'static,
    {
        let (future, promise) = Future::pending();
        spawn_driven(scheduler.clone(), body, move |value| {
            promise.call(value);
        });
        future
    }

    /// Wrap `body` so nothing runs until the returned future is first
    /// accessed; the body is then driven on `Scheduler::current()`, which
    /// must be set on the accessing thread.
    pub fn defer_start<T>(
        body: impl StdFuture<Output = T> + Send + 'static,
    ) -> DeferredFuture<T>
    where
        T: Clone + Send + 'static,
    {
        DeferredFuture::new(move |promise| {
            match Scheduler::current() {
                Ok(scheduler) => spawn_driven(scheduler, body, move |value| {
                    promise.call(value);
                }),
                Err(_) => {
                    let value = Async::run(body);
                    promise.call(value);
                }
            }
            None
        })
    }

    /// As `start`, but returns a `SharedFuture<T>` so many consumers can
    /// await the same run.
    pub fn shared_start<T>(
        scheduler: &Scheduler,
        body: impl StdFuture<Output = T> + Send + 'static,
    ) -> SharedFuture<T>
    where
        T: Clone + Send + 'static,
    {
        SharedFuture::new(Async::start(scheduler, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_drives_an_async_block_to_completion() {
        let result = Async::run(async {
            let a = 1;
            let b = 2;
            a + b
        });
        assert_eq!(result, 3);
    }

    #[test]
    fn start_resolves_on_the_scheduler() {
        let scheduler = Scheduler::new(2);
        let future = Async::start(&scheduler, async { 41 + 1 });
        assert_eq!(future.wait().unwrap(), 42);
    }

    #[test]
    fn shared_start_fans_out_to_many_consumers() {
        let scheduler = Scheduler::new(2);
        let shared = Async::shared_start(&scheduler, async { 7 });
        let a = shared.clone();
        let b = shared.clone();
        assert_eq!(a.wait().unwrap(), 7);
        assert_eq!(b.wait().unwrap(), 7);
    }

    #[test]
    fn defer_start_does_not_run_without_a_current_scheduler_until_accessed() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let started = Arc::new(AtomicBool::new(false));
        let started2 = Arc::clone(&started);
        let deferred = Async::defer_start(async move {
            started2.store(true, Ordering::SeqCst);
            5
        });
        assert!(!started.load(Ordering::SeqCst));
        assert_eq!(deferred.get().unwrap(), 5);
        assert!(started.load(Ordering::SeqCst));
    }

    #[test]
    fn defer_start_runs_on_the_current_scheduler_when_set() {
        let scheduler = Scheduler::new(2);
        let _guard = scheduler.enter();
        let deferred = Async::defer_start(async { 9 });
        assert_eq!(deferred.get().unwrap(), 9);
    }
}
