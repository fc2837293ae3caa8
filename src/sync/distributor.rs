//! `Distributor<T>` (§4.8): fan a single event out to every currently
//! subscribed one-shot future.
//!
//! Grounded on `examples/original_source/src/coro/distributor.h`:
//! subscribers are a `Vec<(Promise, id)>` swapped out and drained on every
//! `publish`/`drop_all`, so a subscription only ever sees one event — a
//! coroutine that wants the next one re-subscribes immediately after
//! resumption. `distributor_queue` bridges that one-shot contract into a
//! buffered [`Queue`](super::Queue) by auto-resubscribing after each
//! receipt; `DistributorQueue` below plays the same role.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::CoroError;
use crate::future::Future;
use crate::promise::Promise;

/// Opaque subscriber identity, usable with [`Distributor::unsubscribe`].
pub type SubscriberId = u64;

struct State<T> {
    subscribers: Vec<(SubscriberId, Promise<T>)>,
    next_id: SubscriberId,
}

/// Publishes a single event to every coroutine currently subscribed.
pub struct Distributor<T: Clone + Send + 'static> {
    state: Mutex<State<T>>,
}

impl<T: Clone + Send + 'static> Distributor<T> {
    pub fn new() -> Self {
        Distributor {
            state: Mutex::new(State {
                subscribers: Vec::new(),
                next_id: 0,
            }),
        }
    }

    /// Subscribe for the next event. The returned future resolves exactly
    /// once; resubscribe afterward to keep receiving events.
    pub fn subscribe(&self) -> (Future<T>, SubscriberId) {
        let (future, promise) = Future::pending();
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.subscribers.push((id, promise));
        (future, id)
    }

    /// Remove a subscriber before it has been delivered an event, breaking
    /// its promise. Returns `false` if the id was not found (already fired
    /// or never existed).
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut state = self.state.lock();
        if let Some(pos) = state.subscribers.iter().position(|(sid, _)| *sid == id) {
            let (_, promise) = state.subscribers.swap_remove(pos);
            drop(state);
            drop(promise); // implicit cancel -> BrokenPromise
            true
        } else {
            false
        }
    }

    /// Deliver `value` to every currently subscribed future, then clear the
    /// subscriber list (each subscription is one-shot).
    pub fn publish(&self, value: T) {
        let subscribers = std::mem::take(&mut self.state.lock().subscribers);
        for (_, promise) in subscribers {
            promise.call(value.clone());
        }
    }

    /// Broadcast end-of-stream: every subscriber's future breaks.
    pub fn drop_all(&self) {
        let subscribers = std::mem::take(&mut self.state.lock().subscribers);
        for (_, promise) in subscribers {
            drop(promise);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }
}

impl<T: Clone + Send + 'static> Default for Distributor<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Bridges a [`Distributor<T>`]'s one-shot subscriptions into a buffered
/// pull queue: every delivered event is pushed, and the adapter
/// immediately resubscribes for the next one.
pub struct DistributorQueue<T: Clone + Send + 'static> {
    queue: Arc<super::queue::Queue<T>>,
}

impl<T: Clone + Send + 'static> DistributorQueue<T> {
    pub fn new(distributor: Arc<Distributor<T>>) -> Self {
        let queue = Arc::new(super::queue::Queue::new());
        spawn_relay(distributor, Arc::clone(&queue));
        DistributorQueue { queue }
    }

    pub fn pop(&self) -> Future<T> {
        self.queue.pop()
    }

    pub fn try_pop(&self) -> Option<T> {
        self.queue.try_pop()
    }
}

fn spawn_relay<T: Clone + Send + 'static>(
    distributor: Arc<Distributor<T>>,
    queue: Arc<super::queue::Queue<T>>,
) {
    let (future, _id) = distributor.subscribe();
    future.then(move |result| match result {
        Ok(value) => {
            queue.push(value.clone());
            spawn_relay(distributor, queue);
        }
        Err(CoroError::BrokenPromise) => queue.close(),
        Err(_) => queue.close(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_resolves_every_current_subscriber() {
        let dist = Distributor::new();
        let (a, _) = dist.subscribe();
        let (b, _) = dist.subscribe();
        let (late, _) = dist.subscribe();
        dist.publish(5);
        assert_eq!(a.wait().unwrap(), 5);
        assert_eq!(b.wait().unwrap(), 5);
        assert_eq!(late.wait().unwrap(), 5);

        let (after, _) = dist.subscribe();
        assert!(after.is_pending());
    }

    #[test]
    fn unsubscribe_breaks_the_promise_without_publishing() {
        let dist = Distributor::new();
        let (future, id) = dist.subscribe();
        assert!(dist.unsubscribe(id));
        assert!(future.get().is_err());
        assert!(!dist.unsubscribe(id));
    }

    #[test]
    fn distributor_queue_buffers_every_publish() {
        let dist = Arc::new(Distributor::new());
        let bridge = DistributorQueue::new(Arc::clone(&dist));
        dist.publish(1);
        dist.publish(2);
        assert_eq!(bridge.pop().wait().unwrap(), 1);
        assert_eq!(bridge.pop().wait().unwrap(), 2);
    }
}
