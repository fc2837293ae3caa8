//! `Generator<T>` and `Collector<T, R>` (§4.6): coroutines that produce (or
//! consume) a lazy sequence of values, expressed as a chain of `LazyFuture`
//! pull slots rather than a language-level `co_yield`.
//!
//! Rust has no stable generator syntax, so the producer/consumer body is an
//! ordinary `async` block parameterized over a handle
//! (`GeneratorHandle`/`CollectorHandle`) whose `yield_value`/`next_value`
//! methods are themselves hand-written `Future` impls, the same "drive a
//! boxed future forward one step at a time" shape `producer.rs`'s
//! `spawn_driven` uses for ordinary coroutine bodies — grounded on the
//! teacher's `Scope`/`Fib` "yield a `WaitingReason`, get resumed later"
//! protocol (`examples/zaclegarssure-Corentin/src/function_coroutine/scope.rs`),
//! generalized from bevy-tick-shaped reasons to a single generic pull slot.

use std::future::Future as StdFuture;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;

use crate::error::CoroError;
use crate::future::Future;
use crate::promise::Promise;

type PullSlot<T> = Arc<Mutex<Option<Promise<T>>>>;

/// Handle passed into a generator body, used to produce values one at a
/// time (`yield_value(v).await`).
pub struct GeneratorHandle<T: Clone + Send + 'static> {
    pull: PullSlot<T>,
}

impl<T: Clone + Send + 'static> GeneratorHandle<T> {
    /// Resolve the currently-installed pull with `value` and suspend the
    /// body until the next pull installs a fresh one.
    pub fn yield_value(&self, value: T) -> YieldValue<T> {
        YieldValue {
            pull: Arc::clone(&self.pull),
            value: Some(value),
        }
    }
}

/// The future behind `yield_value`. First poll hands `value` to whichever
/// promise is currently installed and reports `Pending`; a later poll
/// (driven by the next `Generator::next()`) reports `Ready` once a new
/// promise has replaced it.
pub struct YieldValue<T: Clone + Send + 'static> {
    pull: PullSlot<T>,
    value: Option<T>,
}

impl<T: Clone + Send + 'static> StdFuture for YieldValue<T> {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        if let Some(value) = self.value.take() {
            let promise = self
                .pull
                .lock()
                .take()
                .expect("yield_value called with no pull installed");
            promise.call(value);
            Poll::Pending
        } else if self.pull.lock().is_some() {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

/// A coroutine producing a lazy sequence of `T`s (§4.6).
///
/// `next()` installs a fresh pull and drives the body one step; the body
/// suspends at each `yield_value(v).await` until the following pull. Falling
/// off the end of the body (or calling `finish()`) ends the stream: every
/// pull after that resolves broken (`CoroError::AwaitCanceled`), matching
/// invariant 7 ("pulling after end-of-stream yields no value indefinitely").
pub struct Generator<T: Clone + Send + 'static> {
    body: Mutex<Option<Pin<Box<dyn StdFuture<Output = ()> + Send>>>>,
    pull: PullSlot<T>,
    finished: AtomicBool,
}

impl<T: Clone + Send + 'static> Generator<T> {
    pub fn new<F>(make_body: impl FnOnce(GeneratorHandle<T>) -> F) -> Self
    where
        F: StdFuture<Output = ()> + Send + 'static,
    {
        let pull: PullSlot<T> = Arc::new(Mutex::new(None));
        let handle = GeneratorHandle {
            pull: Arc::clone(&pull),
        };
        Generator {
            body: Mutex::new(Some(Box::pin(make_body(handle)))),
            pull,
            finished: AtomicBool::new(false),
        }
    }

    /// Pull the next value. Returns a `Future<T>` resolved once the body
    /// yields (or broken if the stream has already ended).
    pub fn next(&self) -> Future<T> {
        if self.finished.load(Ordering::Acquire) {
            return Future::from_exception(CoroError::AwaitCanceled);
        }
        let (future, promise) = Future::pending();
        *self.pull.lock() = Some(promise);
        self.drive();
        future
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    fn drive(&self) {
        let mut guard = self.body.lock();
        let Some(body) = guard.as_mut() else {
            return;
        };
        // The body is driven synchronously: `next()` installs a promise then
        // calls `drive()` directly, so a real wakeup is never needed here.
        let waker = crate::waker::from_fn(|| {});
        let mut cx = Context::from_waker(&waker);
        if let Poll::Ready(()) = body.as_mut().poll(&mut cx) {
            self.finished.store(true, Ordering::Release);
            *guard = None;
            if let Some(p) = self.pull.lock().take() {
                drop(p); // implicit cancel(): resolves NotSet
            }
        }
    }
}

/// Blocking iterator over a generator, performing one synchronous `wait()`
/// per item (§4.6, §6).
pub struct GeneratorIter<'a, T: Clone + Send + 'static> {
    generator: &'a Generator<T>,
}

impl<'a, T: Clone + Send + 'static> Iterator for GeneratorIter<'a, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.generator.next().wait().ok()
    }
}

impl<'a, T: Clone + Send + 'static> IntoIterator for &'a Generator<T> {
    type Item = T;
    type IntoIter = GeneratorIter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        GeneratorIter { generator: self }
    }
}

enum PushState<T> {
    Empty,
    Value(T),
    Closed,
}

/// Handle passed into a collector body, used to consume pushed values one
/// at a time (`next_value().await` returns `None` once closed).
pub struct CollectorHandle<T: Clone + Send + 'static> {
    push: Arc<Mutex<PushState<T>>>,
}

impl<T: Clone + Send + 'static> CollectorHandle<T> {
    pub fn next_value(&self) -> NextValue<T> {
        NextValue {
            push: Arc::clone(&self.push),
        }
    }
}

pub struct NextValue<T: Clone + Send + 'static> {
    push: Arc<Mutex<PushState<T>>>,
}

impl<T: Clone + Send + 'static> StdFuture for NextValue<T> {
    type Output = Option<T>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<T>> {
        let mut guard = self.push.lock();
        match std::mem::replace(&mut *guard, PushState::Empty) {
            PushState::Value(v) => Poll::Ready(Some(v)),
            PushState::Closed => {
                *guard = PushState::Closed;
                Poll::Ready(None)
            }
            PushState::Empty => Poll::Pending,
        }
    }
}

/// The dual of `Generator`: a coroutine that consumes pushed values and
/// eventually returns a result (§4.6).
pub struct Collector<T: Clone + Send + 'static, R: Clone + Send + 'static> {
    body: Mutex<Option<Pin<Box<dyn StdFuture<Output = R> + Send>>>>,
    push: Arc<Mutex<PushState<T>>>,
    result: Future<R>,
    promise: Mutex<Option<Promise<R>>>,
}

impl<T: Clone + Send + 'static, R: Clone + Send + 'static> Collector<T, R> {
    pub fn new<F>(make_body: impl FnOnce(CollectorHandle<T>) -> F) -> Self
    where
        F: StdFuture<Output = R> + Send + 'static,
    {
        let push = Arc::new(Mutex::new(PushState::Empty));
        let handle = CollectorHandle {
            push: Arc::clone(&push),
        };
        let (result, promise) = Future::pending();
        Collector {
            body: Mutex::new(Some(Box::pin(make_body(handle)))),
            push,
            result,
            promise: Mutex::new(Some(promise)),
        }
    }

    /// Push a value into the collector, resuming its body if it is
    /// currently awaiting one.
    pub fn push(&self, value: T) {
        *self.push.lock() = PushState::Value(value);
        self.drive();
    }

    /// Signal end-of-input; the body's next `next_value()` sees `None`.
    pub fn close(&self) {
        {
            let mut guard = self.push.lock();
            if !matches!(*guard, PushState::Closed) {
                *guard = PushState::Closed;
            }
        }
        self.drive();
    }

    /// The eventual result, available once the body returns.
    pub fn result(&self) -> Future<R> {
        self.result.clone()
    }

    fn drive(&self) {
        let mut guard = self.body.lock();
        let Some(body) = guard.as_mut() else {
            return;
        };
        let waker = crate::waker::from_fn(|| {});
        let mut cx = Context::from_waker(&waker);
        if let Poll::Ready(value) = body.as_mut().poll(&mut cx) {
            *guard = None;
            if let Some(p) = self.promise.lock().take() {
                p.call(value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fibonacci(count: usize) -> Generator<u64> {
        Generator::new(move |handle| async move {
            let (mut a, mut b) = (1u64, 1u64);
            for _ in 0..count {
                handle.yield_value(a).await;
                let next = a + b;
                a = b;
                b = next;
            }
        })
    }

    #[test]
    fn fibonacci_yields_ten_values_in_order() {
        let gen = fibonacci(10);
        let values: Vec<u64> = (&gen).into_iter().collect();
        assert_eq!(values, vec![1, 1, 2, 3, 5, 8, 13, 21, 34, 55]);
        assert!(gen.is_finished());
    }

    #[test]
    fn pulling_past_end_of_stream_stays_broken() {
        let gen = fibonacci(1);
        assert_eq!(gen.next().wait().unwrap(), 1);
        assert!(gen.next().wait().is_err());
        assert!(gen.next().wait().is_err());
    }

    #[test]
    fn collector_sums_pushed_values_until_closed() {
        let collector: Collector<i32, i32> = Collector::new(|handle| async move {
            let mut total = 0;
            while let Some(v) = handle.next_value().await {
                total += v;
            }
            total
        });
        collector.push(1);
        collector.push(2);
        collector.push(3);
        collector.close();
        assert_eq!(collector.result().wait().unwrap(), 6);
    }
}
