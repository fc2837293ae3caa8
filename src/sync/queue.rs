//! `Queue<T>` (§4.8): an async FIFO channel.
//!
//! Grounded on `examples/original_source/src/coro/queue.h`: an item FIFO
//! plus an awaiter FIFO under one lock, `push` resolving the oldest waiter
//! directly instead of buffering when one is present, and `close` breaking
//! every waiter still pending (optionally with a caller-supplied reason).

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::error::CoroError;
use crate::future::Future;
use crate::promise::Promise;

struct State<T> {
    items: VecDeque<T>,
    waiters: VecDeque<Promise<T>>,
    closed: bool,
    close_reason: Option<CoroError>,
}

/// An async multi-producer, multi-consumer FIFO queue.
pub struct Queue<T: Clone + Send + 'static> {
    state: Mutex<State<T>>,
}

impl<T: Clone + Send + 'static> Queue<T> {
    pub fn new() -> Self {
        Queue {
            state: Mutex::new(State {
                items: VecDeque::new(),
                waiters: VecDeque::new(),
                closed: false,
                close_reason: None,
            }),
        }
    }

    /// Push an item, resolving the oldest pending `pop()` directly if one
    /// exists. Pushing into a closed queue still succeeds (the original's
    /// "still possible to push and pop without blocking" contract).
    pub fn push(&self, value: T) {
        let mut state = self.state.lock();
        match state.waiters.pop_front() {
            Some(promise) => {
                drop(state);
                promise.call(value);
            }
            None => state.items.push_back(value),
        }
    }

    /// Push only if the queue is not closed; returns `false` if closed.
    pub fn try_push(&self, value: T) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        match state.waiters.pop_front() {
            Some(promise) => {
                drop(state);
                promise.call(value);
            }
            None => state.items.push_back(value),
        }
        true
    }

    /// Pop the next item. Resolves immediately if one is buffered; else
    /// suspends until `push` or `close`.
    pub fn pop(&self) -> Future<T> {
        let mut state = self.state.lock();
        if let Some(item) = state.items.pop_front() {
            return Future::ready(item);
        }
        if state.closed {
            let err = match &state.close_reason {
                Some(reason) => CoroError::failed_clone(reason),
                None => CoroError::BrokenPromise,
            };
            return Future::from_exception(err);
        }
        let (future, promise) = Future::pending();
        state.waiters.push_back(promise);
        future
    }

    /// Pop without suspending: `Some(item)` if one is buffered, `None`
    /// otherwise (including when closed with nothing left).
    pub fn try_pop(&self) -> Option<T> {
        self.state.lock().items.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn clear(&self) {
        self.state.lock().items.clear();
    }

    /// Close the queue: every pending `pop()` is rejected now, and every
    /// future `pop()` against an empty queue is rejected immediately.
    pub fn close(&self) {
        self.close_with(None)
    }

    pub fn close_with(&self, reason: Option<CoroError>) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        let waiters = std::mem::take(&mut state.waiters);
        state.close_reason = reason;
        let rejections: Vec<CoroError> = waiters
            .iter()
            .map(|_| match &state.close_reason {
                Some(r) => CoroError::failed_clone(r),
                None => CoroError::BrokenPromise,
            })
            .collect();
        drop(state);
        for (promise, err) in waiters.into_iter().zip(rejections) {
            promise.reject(err);
        }
    }

    pub fn reopen(&self) {
        let mut state = self.state.lock();
        state.closed = false;
        state.close_reason = None;
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl<T: Clone + Send + 'static> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_before_pop_buffers_the_item() {
        let q = Queue::new();
        q.push(1);
        q.push(2);
        assert_eq!(q.pop().wait().unwrap(), 1);
        assert_eq!(q.pop().wait().unwrap(), 2);
    }

    #[test]
    fn pop_before_push_suspends_then_resolves() {
        let q = std::sync::Arc::new(Queue::new());
        let q2 = std::sync::Arc::clone(&q);
        let handle = std::thread::spawn(move || q2.pop().wait().unwrap());
        std::thread::sleep(std::time::Duration::from_millis(50));
        q.push(42);
        assert_eq!(handle.join().unwrap(), 42);
    }

    #[test]
    fn close_breaks_pending_and_future_pops() {
        let q = std::sync::Arc::new(Queue::<i32>::new());
        let q2 = std::sync::Arc::clone(&q);
        let handle = std::thread::spawn(move || q2.pop().wait());
        std::thread::sleep(std::time::Duration::from_millis(50));
        q.close();
        assert!(handle.join().unwrap().is_err());
        assert!(q.pop().wait().is_err());
    }

    #[test]
    fn try_pop_never_blocks() {
        let q: Queue<i32> = Queue::new();
        assert!(q.try_pop().is_none());
        q.push(9);
        assert_eq!(q.try_pop(), Some(9));
    }
}
