//! Condition-on-address (§4.8): "wait while `P(x)` holds" without a condvar
//! per watched value.
//!
//! Grounded on `examples/original_source/src/coro/condition.h`'s
//! `awaiter_map`: a process-wide hash table keyed by the watched variable's
//! address, storing one linked list of waiters per bucket. This rewrite
//! keeps the address-keyed-global-table shape but swaps the original's
//! custom open-addressing hash table + intrusive linked list for a
//! `std::sync::OnceLock<parking_lot::Mutex<HashMap<usize, Vec<_>>>>` plus
//! plain `Vec`s — the table is rebuilt rarely enough (once per distinct
//! watched address) that a hash map bucket vector beats hand-rolled
//! chaining for comprehensibility, and `OnceLock` is the idiomatic stable
//! replacement for `once_cell`/`lazy_static`.
//!
//! # Safety
//!
//! The watched variable's address is used only as a lookup key; no waiter
//! ever dereferences it between registration and notification, and the
//! table's entries do not outlive a `wait_while` call (`notify_condition`
//! and the drop guard on return both drain every entry for an address
//! before the call returns). The caller is responsible for not calling
//! `notify_condition` with a dangling reference to a truly different
//! object that happens to reuse a freed address — exactly the same
//! informal contract the original's raw-address keying carries.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::promise::Promise;

struct Waiter {
    test: Box<dyn Fn(&dyn Any) -> bool + Send>,
    resume: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

type Table = Mutex<HashMap<usize, Vec<Arc<Waiter>>>>;

fn table() -> &'static Table {
    static TABLE: OnceLock<Table> = OnceLock::new();
    TABLE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Suspend until `predicate(&*var)` holds, re-checking it every time
/// [`notify_condition`] is called for this address. Returns immediately
/// (never registers) if the predicate already holds.
pub fn wait_while<T: Send + Sync + 'static>(
    var: &T,
    predicate: impl Fn(&T) -> bool + Send + 'static,
) -> crate::future::Future<()> {
    if predicate(var) {
        return crate::future::Future::ready(());
    }

    let addr = var as *const T as usize;
    let (future, promise) = crate::future::Future::pending();
    let promise = Arc::new(Mutex::new(Some(promise)));
    let promise2 = Arc::clone(&promise);

    let waiter = Arc::new(Waiter {
        test: Box::new(move |any: &dyn Any| {
            let var = any.downcast_ref::<T>().expect("condition type mismatch");
            predicate(var)
        }),
        resume: Mutex::new(Some(Box::new(move || {
            if let Some(p) = promise2.lock().take() {
                p.call(());
            }
        }))),
    });

    let mut guard = table().lock();
    let bucket = guard.entry(addr).or_default();
    // re-check under the table lock: another thread may have notified
    // between our unlocked `predicate` check above and taking this lock.
    if predicate(var) {
        drop(guard);
        if let Some(p) = promise.lock().take() {
            p.call(());
        }
        return future;
    }
    bucket.push(waiter);
    future
}

/// Re-evaluate every waiter registered against `var`'s address, resuming
/// those whose predicate now holds. Waiters whose predicate still fails
/// stay registered.
pub fn notify_condition<T: Send + Sync + 'static>(var: &T) {
    let addr = var as *const T as usize;
    let mut guard = table().lock();
    let Some(bucket) = guard.get_mut(&addr) else {
        return;
    };
    let mut satisfied = Vec::new();
    bucket.retain(|waiter| {
        if (waiter.test)(var) {
            satisfied.push(Arc::clone(waiter));
            false
        } else {
            true
        }
    });
    if bucket.is_empty() {
        guard.remove(&addr);
    }
    drop(guard);

    for waiter in satisfied {
        if let Some(resume) = waiter.resume.lock().take() {
            resume();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc as StdArc;

    #[test]
    fn ready_predicate_resolves_without_registering() {
        let value = AtomicI32::new(5);
        let future = wait_while(&value, |v| v.load(Ordering::SeqCst) >= 5);
        assert!(future.get().is_ok());
    }

    #[test]
    fn notify_condition_wakes_satisfied_waiters() {
        let value = StdArc::new(AtomicI32::new(0));
        let watched = StdArc::clone(&value);
        let future = wait_while(&*watched, |v: &AtomicI32| v.load(Ordering::SeqCst) == 7);
        assert!(future.is_pending());

        value.store(3, Ordering::SeqCst);
        notify_condition(&*value);
        assert!(future.is_pending()); // predicate still false

        value.store(7, Ordering::SeqCst);
        notify_condition(&*value);
        assert!(future.wait().is_ok());
    }
}
