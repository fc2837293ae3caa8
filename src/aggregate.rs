//! Fan-in combinators (§4.9): `all_of`, `any_of`, `each_of`, and
//! `Aggregator<T>`.
//!
//! `Aggregator` is grounded on the teacher's `ParAnd`/`ParOr`
//! (`src/coroutine/par_and.rs`, `par_or.rs`) for the "multiplex N
//! sub-coroutines into one resumption" shape, and on
//! `src/rework/executor/mod.rs`'s `waiting_on_all`/`waiting_on_first`
//! bookkeeping for tracking completion with `tinyset::SetU64`
//! (`others.remove(id.to_bits()); if others.is_empty() { ... }`) rather than
//! a counter — the rewrite keeps a `SetU64` of still-pending indices and
//! checks `is_empty()` the same way.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tinyset::SetU64;

use crate::error::CoroError;
use crate::future::Future;
use crate::generator::Generator;
use crate::promise::Promise;

/// Resolves once every input future has resolved (success or failure).
pub fn all_of<T: Clone + Send + 'static>(futures: Vec<Future<T>>) -> Future<()> {
    let total = futures.len();
    if total == 0 {
        return Future::ready(());
    }
    let (result, promise) = Future::pending();
    let remaining = Arc::new(Mutex::new(total));
    let promise = Arc::new(Mutex::new(Some(promise)));
    for f in futures {
        let remaining = Arc::clone(&remaining);
        let promise = Arc::clone(&promise);
        f.then(move |_| {
            let mut left = remaining.lock();
            *left -= 1;
            if *left == 0 {
                if let Some(p) = promise.lock().take() {
                    p.call(());
                }
            }
        });
    }
    result
}

/// Resolves with the value (or error) of whichever input future resolves
/// first; the rest are left to resolve on their own but their outcome is
/// discarded. Resolves broken immediately if `futures` is empty.
pub fn any_of<T: Clone + Send + 'static>(futures: Vec<Future<T>>) -> Future<T> {
    if futures.is_empty() {
        return Future::from_exception(CoroError::BrokenPromise);
    }
    let (result, promise) = Future::pending();
    let promise = Arc::new(Mutex::new(Some(promise)));
    for f in futures {
        let promise = Arc::clone(&promise);
        f.then(move |r| {
            if let Some(p) = promise.lock().take() {
                match r {
                    Ok(v) => {
                        p.call(v.clone());
                    }
                    Err(e) => {
                        p.reject(CoroError::failed_clone(e));
                    }
                }
            }
        });
    }
    result
}

struct EachState<T: Clone + Send + 'static> {
    pending: usize,
    ready: VecDeque<Future<T>>,
    waiting: Option<Promise<Option<Future<T>>>>,
}

/// Drains a set of input futures in the order they finish. Each item
/// yielded is the already-resolved future itself (not its unwrapped
/// value), so a caller can still distinguish success from failure via
/// `.get()`.
pub struct EachOf<T: Clone + Send + 'static> {
    state: Arc<Mutex<EachState<T>>>,
}

impl<T: Clone + Send + 'static> EachOf<T> {
    pub fn new(futures: Vec<Future<T>>) -> Self {
        let state = Arc::new(Mutex::new(EachState {
            pending: futures.len(),
            ready: VecDeque::new(),
            waiting: None,
        }));
        for f in futures {
            let state2 = Arc::clone(&state);
            let finished = f.clone();
            f.then(move |_| {
                let mut guard = state2.lock();
                guard.pending -= 1;
                match guard.waiting.take() {
                    Some(p) => {
                        drop(guard);
                        p.call(Some(finished));
                    }
                    None => guard.ready.push_back(finished),
                }
            });
        }
        EachOf { state }
    }

    /// The next future to finish, or `None` once every input has finished.
    pub fn next(&self) -> Future<Option<Future<T>>> {
        let mut guard = self.state.lock();
        if let Some(f) = guard.ready.pop_front() {
            return Future::ready(Some(f));
        }
        if guard.pending == 0 {
            return Future::ready(None);
        }
        let (future, promise) = Future::pending();
        guard.waiting = Some(promise);
        future
    }
}

pub fn each_of<T: Clone + Send + 'static>(futures: Vec<Future<T>>) -> EachOf<T> {
    EachOf::new(futures)
}

/// Blocking iterator over [`EachOf`], one synchronous `wait()` per item.
pub struct EachOfIter<T: Clone + Send + 'static> {
    each: EachOf<T>,
}

impl<T: Clone + Send + 'static> Iterator for EachOfIter<T> {
    type Item = Future<T>;

    fn next(&mut self) -> Option<Future<T>> {
        self.each.next().wait().ok().flatten()
    }
}

impl<T: Clone + Send + 'static> IntoIterator for EachOf<T> {
    type Item = Future<T>;
    type IntoIter = EachOfIter<T>;

    fn into_iter(self) -> EachOfIter<T> {
        EachOfIter { each: self }
    }
}

struct AggregatorState<T> {
    pending_indices: SetU64,
    ready: VecDeque<(usize, T)>,
    waiting: Option<Promise<Option<(usize, T)>>>,
}

/// Multiplexes N generators into a single stream of `(index, value)` pairs
/// (§4.9): every input is pulled concurrently, and each time one yields, it
/// is immediately pulled again. The aggregate stream ends once every input
/// generator has finished.
pub struct Aggregator<T: Clone + Send + 'static> {
    generators: Vec<Generator<T>>,
    state: Mutex<AggregatorState<T>>,
}

impl<T: Clone + Send + 'static> Aggregator<T> {
    pub fn new(generators: Vec<Generator<T>>) -> Arc<Self> {
        let mut pending_indices = SetU64::new();
        for i in 0..generators.len() {
            pending_indices.insert(i as u64);
        }
        let this = Arc::new(Aggregator {
            generators,
            state: Mutex::new(AggregatorState {
                pending_indices,
                ready: VecDeque::new(),
                waiting: None,
            }),
        });
        for i in 0..this.generators.len() {
            Self::pull(&this, i);
        }
        this
    }

    fn pull(this: &Arc<Self>, index: usize) {
        let future = this.generators[index].next();
        let this2 = Arc::clone(this);
        future.then(move |result| match result {
            Ok(value) => Self::on_ready(&this2, index, value.clone()),
            Err(_) => Self::on_finished(&this2, index),
        });
    }

    fn on_ready(this: &Arc<Self>, index: usize, value: T) {
        let waiting = {
            let mut state = this.state.lock();
            match state.waiting.take() {
                Some(p) => Some(p),
                None => {
                    state.ready.push_back((index, value.clone()));
                    None
                }
            }
        };
        if let Some(p) = waiting {
            p.call(Some((index, value)));
        }
        Self::pull(this, index);
    }

    fn on_finished(this: &Arc<Self>, index: usize) {
        let waiting = {
            let mut state = this.state.lock();
            state.pending_indices.remove(index as u64);
            if state.pending_indices.is_empty() {
                state.waiting.take()
            } else {
                None
            }
        };
        if let Some(p) = waiting {
            p.call(None);
        }
    }

    /// The next `(index, value)` to become available, or `None` once every
    /// input generator has finished.
    pub fn next(self: &Arc<Self>) -> Future<Option<(usize, T)>> {
        let mut state = self.state.lock();
        if let Some(item) = state.ready.pop_front() {
            return Future::ready(Some(item));
        }
        if state.pending_indices.is_empty() {
            return Future::ready(None);
        }
        let (future, promise) = Future::pending();
        state.waiting = Some(promise);
        future
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_of_resolves_once_per_input() {
        let (a, pa) = Future::<i32>::pending();
        let (b, pb) = Future::<i32>::pending();
        let joined = all_of(vec![a, b]);
        assert!(joined.is_pending());
        pa.call(1);
        assert!(joined.is_pending());
        pb.call(2);
        assert!(joined.wait().is_ok());
    }

    #[test]
    fn all_of_empty_resolves_immediately() {
        let joined: Future<()> = all_of(Vec::<Future<i32>>::new());
        assert!(joined.has_value());
    }

    #[test]
    fn any_of_takes_the_first_to_resolve() {
        let (a, pa) = Future::<i32>::pending();
        let (b, pb) = Future::<i32>::pending();
        let winner = any_of(vec![a, b]);
        pa.call(7);
        assert_eq!(winner.wait().unwrap(), 7);
        drop(pb);
    }

    #[test]
    fn each_of_drains_in_finish_order() {
        let (a, pa) = Future::<i32>::pending();
        let (b, pb) = Future::<i32>::pending();
        let (c, pc) = Future::<i32>::pending();
        let each = each_of(vec![a, b, c]);

        pb.call(2);
        let first = each.next().wait().unwrap().unwrap();
        assert_eq!(first.get().unwrap(), 2);

        pc.call(3);
        let second = each.next().wait().unwrap().unwrap();
        assert_eq!(second.get().unwrap(), 3);

        pa.call(1);
        let third = each.next().wait().unwrap().unwrap();
        assert_eq!(third.get().unwrap(), 1);

        assert!(each.next().wait().unwrap().is_none());
    }

    fn counting_generator(start: u64, count: usize) -> Generator<u64> {
        Generator::new(move |handle| async move {
            for i in 0..count {
                handle.yield_value(start + i as u64).await;
            }
        })
    }

    #[test]
    fn aggregator_multiplexes_multiple_generators() {
        let aggregator = Aggregator::new(vec![counting_generator(0, 2), counting_generator(100, 1)]);
        let mut seen = Vec::new();
        loop {
            match aggregator.next().wait().unwrap() {
                Some(item) => seen.push(item),
                None => break,
            }
        }
        seen.sort();
        assert_eq!(seen, vec![(0, 0), (0, 1), (1, 100)]);
    }
}
