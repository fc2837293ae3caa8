//! Notification targets: the uniform callback shape used for every
//! cross-component wakeup (§3, §4.1), and the move-only "prepared
//! coroutine" handle used to model symmetric transfer (glossary).

use std::fmt;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

/// A coroutine that is ready to run but has not been resumed yet.
///
/// Move-only by construction (it owns a boxed resume action). Dropping one
/// without calling [`resume`](PreparedCoroutine::resume) still runs the
/// resume action — the runtime never silently drops ready work.
#[must_use = "a PreparedCoroutine does nothing until resumed (or dropped)"]
pub struct PreparedCoroutine {
    resume: Option<Box<dyn FnOnce() + Send>>,
}

impl PreparedCoroutine {
    pub fn new(resume: impl FnOnce() + Send + 'static) -> Self {
        Self {
            resume: Some(Box::new(resume)),
        }
    }

    /// Consume this handle and run its resume action now (a direct,
    /// "symmetric transfer" style tail resume).
    pub fn resume(mut self) {
        if let Some(f) = self.resume.take() {
            f();
        }
    }
}

impl fmt::Debug for PreparedCoroutine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedCoroutine").finish_non_exhaustive()
    }
}

impl Drop for PreparedCoroutine {
    fn drop(&mut self) {
        if let Some(f) = self.resume.take() {
            f();
        }
    }
}

/// A single cross-component wakeup, bound to a subject of type `S`.
///
/// Activation is consuming: a `Target` can fire exactly once. Firing may
/// produce a [`PreparedCoroutine`] that the caller is responsible for
/// resuming (directly, or by handing it to a scheduler).
pub enum Target<S> {
    /// A plain callback, e.g. one installed by `Future::set_callback`.
    Callback(Box<dyn FnOnce(S) -> Option<PreparedCoroutine> + Send>),
    /// A target that unblocks a thread parked in `Future::wait`.
    Sync(Arc<SyncWaitCell<S>>),
}

impl<S: Send + 'static> Target<S> {
    pub fn from_fn(f: impl FnOnce(S) -> Option<PreparedCoroutine> + Send + 'static) -> Self {
        Target::Callback(Box::new(f))
    }

    /// Build a target paired with a handle a thread can block on.
    pub fn sync_wait() -> (Self, SyncWait<S>) {
        let cell = Arc::new(SyncWaitCell {
            state: Mutex::new(None),
            ready: Condvar::new(),
        });
        (Target::Sync(Arc::clone(&cell)), SyncWait { cell })
    }

    /// Consume the target, delivering `subject`. Self-invalidating.
    pub fn activate(self, subject: S) -> Option<PreparedCoroutine> {
        match self {
            Target::Callback(f) => f(subject),
            Target::Sync(cell) => {
                let mut guard = cell.state.lock();
                *guard = Some(subject);
                cell.ready.notify_all();
                None
            }
        }
    }
}

/// The condvar-backed cell behind a [`Target::Sync`].
pub struct SyncWaitCell<S> {
    state: Mutex<Option<S>>,
    ready: Condvar,
}

/// A handle a thread can use to block until its paired [`Target`] fires.
pub struct SyncWait<S> {
    cell: Arc<SyncWaitCell<S>>,
}

impl<S> SyncWait<S> {
    /// Block the calling thread until the paired target is activated,
    /// returning the delivered subject.
    pub fn wait(self) -> S {
        let mut guard = self.cell.state.lock();
        loop {
            if let Some(subject) = guard.take() {
                return subject;
            }
            self.cell.ready.wait(&mut guard);
        }
    }
}

/// A list of [`Target`]s that can be pushed to concurrently and drained
/// exactly once (§4.1: push / drain-and-disable).
///
/// Guarded by a short mutex critical section rather than a lock-free
/// Treiber stack — see `DESIGN.md`, Open Question 1.
pub struct TargetList<S> {
    inner: Mutex<ListState<S>>,
}

enum ListState<S> {
    Active(Vec<Target<S>>),
    Disabled,
}

impl<S> Default for TargetList<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> TargetList<S> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ListState::Active(Vec::new())),
        }
    }

    /// Push a target onto the list. Fails (returning the target back) if
    /// the list has already been disabled.
    pub fn push(&self, target: Target<S>) -> std::result::Result<(), Target<S>> {
        let mut guard = self.inner.lock();
        match &mut *guard {
            ListState::Active(list) => {
                list.push(target);
                Ok(())
            }
            ListState::Disabled => Err(target),
        }
    }

    /// Atomically take every currently-registered target and mark the list
    /// disabled, so that any later `push` fails instead of silently
    /// queuing behind a dispatch that already happened.
    pub fn drain_and_disable(&self) -> Vec<Target<S>> {
        let mut guard = self.inner.lock();
        match std::mem::replace(&mut *guard, ListState::Disabled) {
            ListState::Active(list) => list,
            ListState::Disabled => Vec::new(),
        }
    }

    pub fn is_disabled(&self) -> bool {
        matches!(*self.inner.lock(), ListState::Disabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn push_then_drain_fires_once() {
        let list: TargetList<i32> = TargetList::new();
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = Arc::clone(&fired);
        list.push(Target::from_fn(move |v| {
            assert_eq!(v, 42);
            fired2.store(true, Ordering::SeqCst);
            None
        }))
        .unwrap();

        let drained = list.drain_and_disable();
        assert_eq!(drained.len(), 1);
        for t in drained {
            t.activate(42);
        }
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn push_after_disable_fails() {
        let list: TargetList<i32> = TargetList::new();
        list.drain_and_disable();
        let err = list.push(Target::from_fn(|_| None));
        assert!(err.is_err());
    }

    #[test]
    fn prepared_coroutine_resumes_on_drop() {
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = Arc::clone(&ran);
        {
            let _p = PreparedCoroutine::new(move || ran2.store(true, Ordering::SeqCst));
        }
        assert!(ran.load(Ordering::SeqCst));
    }
}
