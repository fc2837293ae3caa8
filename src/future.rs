//! The future/promise state machine (§4.2, §4.10).
//!
//! Grounded on the teacher's `once_channel.rs` tagged-state one-shot
//! channel, generalized from its four states (`INIT`/`DONE`/`DROP_SND`/
//! `DROP_REC`) to the five this runtime needs (`Resolved`/`Deferred`/
//! `Pending`/`Awaited`/`Evaluating`). Unlike the original C++ and unlike
//! the teacher's `UnsafeCell`-based slot, the payload here lives behind a
//! `parking_lot::Mutex` rather than an atomic state word plus raw cell —
//! the same "short lock beats hand-rolled unsafe" call made for
//! `TargetList` (see `DESIGN.md`, Open Question 1).

use std::future::Future as StdFuture;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Waker};

use parking_lot::{Condvar, Mutex};

use crate::error::{CoroError, Result as CoroResult};
use crate::promise::{Notify, Promise};
use crate::target::PreparedCoroutine;

pub(crate) type DeferredThunk<T> =
    Box<dyn FnOnce(Promise<T>) -> Option<PreparedCoroutine> + Send>;

/// What a resolved future is holding: a value, an application error, or
/// nothing (a broken promise / cancellation).
pub(crate) enum Slot<T> {
    Value(T),
    Exception(CoroError),
    NotSet,
}

impl<T: Clone> Clone for Slot<T> {
    fn clone(&self) -> Self {
        match self {
            Slot::Value(v) => Slot::Value(v.clone()),
            Slot::Exception(e) => Slot::Exception(CoroError::failed_clone(e)),
            Slot::NotSet => Slot::NotSet,
        }
    }
}

pub(crate) enum State<T> {
    Pending,
    Awaited(Waker),
    Deferred(DeferredThunk<T>),
    Resolved(Slot<T>),
    /// Transient: held only while a transition is in progress, so a
    /// re-entrant access during e.g. a deferred thunk panics loudly
    /// instead of silently corrupting state.
    Evaluating,
}

impl<T> State<T> {
    fn name(&self) -> &'static str {
        match self {
            State::Pending => "pending",
            State::Awaited(_) => "awaited",
            State::Deferred(_) => "deferred",
            State::Resolved(_) => "resolved",
            State::Evaluating => "evaluating",
        }
    }
}

pub(crate) struct Inner<T: Clone> {
    state: State<T>,
    chain: Vec<Weak<FutureCell<T>>>,
}

/// The heap cell backing every `Future<T>`/`Promise<T>` pair.
pub(crate) struct FutureCell<T: Clone + Send + 'static> {
    inner: Mutex<Inner<T>>,
    ready: Condvar,
}

impl<T: Clone + Send + 'static> FutureCell<T> {
    fn new(state: State<T>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                state,
                chain: Vec::new(),
            }),
            ready: Condvar::new(),
        })
    }

    /// Push another future onto this cell's fan-out chain (`promise += promise`, §4.2).
    pub(crate) fn push_chain(self: &Arc<Self>, other: Arc<FutureCell<T>>) {
        self.inner.lock().chain.push(Arc::downgrade(&other));
    }

    /// Resolve with `slot`, waking any registered awaiter and fanning the
    /// value out to every chained future. Returns a `PreparedCoroutine` for
    /// the primary awaiter, if any, so the caller (`Promise::call`) decides
    /// how to resume it.
    pub(crate) fn resolve(self: &Arc<Self>, slot: Slot<T>) -> Option<PreparedCoroutine> {
        let mut guard = self.inner.lock();
        let previous = std::mem::replace(&mut guard.state, State::Evaluating);
        let waker = match previous {
            State::Awaited(w) => Some(w),
            State::Resolved(_) => previous_cant_resolve_twice(),
            _ => None,
        };
        guard.state = State::Resolved(slot.clone());
        let chain = std::mem::take(&mut guard.chain);
        drop(guard);

        self.ready.notify_all();

        for weak in chain {
            if let Some(child) = weak.upgrade() {
                child.resolve(slot.clone());
            }
        }

        waker.map(|w| PreparedCoroutine::new(move || w.wake()))
    }

    fn register_waker(self: &Arc<Self>, waker: &Waker) -> RegisterOutcome<T> {
        loop {
            let mut guard = self.inner.lock();
            match std::mem::replace(&mut guard.state, State::Evaluating) {
                State::Resolved(slot) => {
                    guard.state = State::Resolved(slot.clone());
                    return RegisterOutcome::AlreadyResolved(slot);
                }
                State::Pending => {
                    guard.state = State::Awaited(waker.clone());
                    return RegisterOutcome::Installed;
                }
                State::Awaited(_) => {
                    guard.state = State::Awaited(waker.clone());
                    return RegisterOutcome::Installed;
                }
                State::Deferred(thunk) => {
                    drop(guard);
                    run_deferred(self, thunk);
                    continue;
                }
                State::Evaluating => {
                    guard.state = State::Evaluating;
                    return RegisterOutcome::ConcurrentAccess;
                }
            }
        }
    }
}

fn previous_cant_resolve_twice() -> ! {
    panic!("FutureCell resolved twice: exactly one writer may transition Pending/Awaited to Resolved");
}

enum RegisterOutcome<T> {
    Installed,
    AlreadyResolved(Slot<T>),
    ConcurrentAccess,
}

fn run_deferred<T: Clone + Send + 'static>(cell: &Arc<FutureCell<T>>, thunk: DeferredThunk<T>) {
    {
        let mut guard = cell.inner.lock();
        guard.state = State::Pending;
    }
    let promise = Promise::from_cell(Arc::clone(cell));
    if let Some(prepared) = thunk(promise) {
        prepared.resume();
    }
}

/// A future result: `T` on success or a [`CoroError`] describing why it
/// never produced one.
pub struct Future<T: Clone + Send + 'static> {
    pub(crate) cell: Arc<FutureCell<T>>,
}

impl<T: Clone + Send + 'static> Clone for Future<T> {
    fn clone(&self) -> Self {
        Future {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T: Clone + Send + 'static> Future<T> {
    pub fn ready(value: T) -> Self {
        Future {
            cell: FutureCell::new(State::Resolved(Slot::Value(value))),
        }
    }

    pub fn from_exception(err: CoroError) -> Self {
        Future {
            cell: FutureCell::new(State::Resolved(Slot::Exception(err))),
        }
    }

    /// A future with no initial value, paired with the `Promise<T>` that
    /// resolves it.
    pub fn pending() -> (Self, Promise<T>) {
        let cell = FutureCell::new(State::Pending);
        let promise = Promise::from_cell(Arc::clone(&cell));
        (Future { cell }, promise)
    }

    /// A future that does not start evaluating until first accessed.
    pub fn deferred(
        thunk: impl FnOnce(Promise<T>) -> Option<PreparedCoroutine> + Send + 'static,
    ) -> Self {
        Future {
            cell: FutureCell::new(State::Deferred(Box::new(thunk))),
        }
    }

    /// Take a fresh promise for this future, recycling it back to
    /// `Pending`. Only valid from `Resolved` or `Deferred`.
    pub fn get_promise(&self) -> CoroResult<Promise<T>> {
        let mut guard = self.cell.inner.lock();
        match &guard.state {
            State::Resolved(_) | State::Deferred(_) => {
                guard.state = State::Pending;
                drop(guard);
                Ok(Promise::from_cell(Arc::clone(&self.cell)))
            }
            _ => Err(CoroError::StillPending),
        }
    }

    /// Install a plain no-argument callback, run once the future resolves.
    /// Returns `false` (and does *not* invoke `cb`) if already resolved.
    pub fn set_callback(&self, cb: impl FnOnce() + Send + 'static) -> bool {
        let waker = crate::waker::from_fn(cb);
        match self.cell.register_waker(&waker) {
            RegisterOutcome::Installed => true,
            RegisterOutcome::AlreadyResolved(_) => false,
            RegisterOutcome::ConcurrentAccess => {
                panic!("Future::set_callback: concurrent registration")
            }
        }
    }

    /// Install a callback receiving the eventual result. Returns `true` if
    /// the future was still pending (`cb` will run later, from the
    /// resolving writer's context), `false` if it was already resolved (in
    /// which case `cb` ran inline, synchronously, before this call
    /// returns) — the same deferred-vs-inline distinction `set_callback`
    /// makes, surfaced on the return value per §4.2/§8.
    pub fn then(&self, cb: impl FnOnce(&std::result::Result<T, CoroError>) + Send + 'static) -> bool
    where
        T: 'static,
    {
        let cb = Arc::new(std::sync::Mutex::new(Some(cb)));
        let cell = Arc::clone(&self.cell);
        let cb2 = Arc::clone(&cb);
        let installed = self.set_callback(move || {
            let guard = cell.inner.lock();
            if let State::Resolved(slot) = &guard.state {
                let result = match slot {
                    Slot::Value(v) => Ok(v.clone()),
                    Slot::Exception(e) => Err(CoroError::failed_clone(e)),
                    Slot::NotSet => Err(CoroError::BrokenPromise),
                };
                drop(guard);
                if let Some(cb) = cb2.lock().unwrap().take() {
                    cb(&result);
                }
            }
        });
        if !installed {
            let guard = self.cell.inner.lock();
            if let State::Resolved(slot) = &guard.state {
                let result = match slot {
                    Slot::Value(v) => Ok(v.clone()),
                    Slot::Exception(e) => Err(CoroError::failed_clone(e)),
                    Slot::NotSet => Err(CoroError::BrokenPromise),
                };
                drop(guard);
                if let Some(cb) = cb.lock().unwrap().take() {
                    cb(&result);
                }
            }
        }
        installed
    }

    /// Block the calling thread until this future resolves.
    pub fn wait(&self) -> std::result::Result<T, CoroError> {
        self.start_if_deferred();
        let mut guard = self.cell.inner.lock();
        loop {
            match &guard.state {
                State::Resolved(_) => break,
                _ => self.cell.ready.wait(&mut guard),
            }
        }
        match &guard.state {
            State::Resolved(Slot::Value(v)) => Ok(v.clone()),
            State::Resolved(Slot::Exception(e)) => Err(CoroError::failed_clone(e)),
            State::Resolved(Slot::NotSet) => Err(CoroError::BrokenPromise),
            _ => unreachable!(),
        }
    }

    /// Read the value now; `Err(StillPending)`-shaped-as-`AwaitCanceled` is
    /// never returned here — use `wait`/`.await` for anything not yet
    /// resolved. Starts evaluation first if this future is still `Deferred`
    /// (§4.4: accessing a deferred future via `get`/`wait`/`.await` all
    /// implicitly start it).
    pub fn get(&self) -> std::result::Result<T, CoroError> {
        self.start_if_deferred();
        let guard = self.cell.inner.lock();
        match &guard.state {
            State::Resolved(Slot::Value(v)) => Ok(v.clone()),
            State::Resolved(Slot::Exception(e)) => Err(CoroError::failed_clone(e)),
            State::Resolved(Slot::NotSet) => Err(CoroError::BrokenPromise),
            _ => Err(CoroError::StillPending),
        }
    }

    pub fn has_value(&self) -> bool {
        matches!(self.cell.inner.lock().state, State::Resolved(Slot::Value(_)))
    }

    pub fn has_exception(&self) -> bool {
        matches!(
            self.cell.inner.lock().state,
            State::Resolved(Slot::Exception(_))
        )
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.cell.inner.lock().state, State::Pending)
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self.cell.inner.lock().state, State::Deferred(_))
    }

    pub fn is_awaited(&self) -> bool {
        matches!(self.cell.inner.lock().state, State::Awaited(_))
    }

    /// Resolve `promise` with this future's eventual result.
    pub fn forward_to(&self, promise: Promise<T>) {
        let shared = Arc::new(std::sync::Mutex::new(Some(promise)));
        let this = self.clone();
        let shared2 = Arc::clone(&shared);
        let installed = self.set_callback(move || {
            if let Some(promise) = shared2.lock().unwrap().take() {
                match this.get() {
                    Ok(v) => promise.call(v),
                    Err(e) => promise.reject(e),
                }
            }
        });
        if !installed {
            if let Some(promise) = shared.lock().unwrap().take() {
                match self.get() {
                    Ok(v) => promise.call(v),
                    Err(e) => promise.reject(e),
                }
            }
        }
    }

    /// Resolve `promise` with `map_fn` applied to this future's value.
    pub fn convert_to<U, F>(&self, promise: Promise<U>, map_fn: F)
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let shared = Arc::new(std::sync::Mutex::new(Some((promise, map_fn))));
        let this = self.clone();
        let shared2 = Arc::clone(&shared);
        let installed = self.set_callback(move || {
            if let Some((promise, map_fn)) = shared2.lock().unwrap().take() {
                match this.get() {
                    Ok(v) => promise.call(map_fn(v)),
                    Err(e) => promise.reject(e),
                }
            }
        });
        if !installed {
            if let Some((promise, map_fn)) = shared.lock().unwrap().take() {
                match self.get() {
                    Ok(v) => promise.call(map_fn(v)),
                    Err(e) => promise.reject(e),
                }
            }
        }
    }

    fn start_if_deferred(&self) {
        let thunk = {
            let mut guard = self.cell.inner.lock();
            match std::mem::replace(&mut guard.state, State::Evaluating) {
                State::Deferred(thunk) => Some(thunk),
                other => {
                    guard.state = other;
                    None
                }
            }
        };
        if let Some(thunk) = thunk {
            run_deferred(&self.cell, thunk);
        }
    }
}

impl<T: Clone + Send + 'static> StdFuture for Future<T> {
    type Output = std::result::Result<T, CoroError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.start_if_deferred();
        match self.cell.register_waker(cx.waker()) {
            RegisterOutcome::Installed => Poll::Pending,
            RegisterOutcome::AlreadyResolved(slot) => Poll::Ready(match slot {
                Slot::Value(v) => Ok(v),
                Slot::Exception(e) => Err(e),
                Slot::NotSet => Err(CoroError::BrokenPromise),
            }),
            RegisterOutcome::ConcurrentAccess => {
                panic!("Future polled concurrently from two tasks")
            }
        }
    }
}

impl CoroError {
    /// `CoroError` does not implement `Clone` (its `Failed` variant boxes a
    /// `dyn Error`), but every chained/`then`/`wait` consumer needs its own
    /// copy of the stored exception. Re-render it as a detached
    /// `CoroError::Failed(String)`-backed error instead of cloning the
    /// trait object.
    pub(crate) fn failed_clone(err: &CoroError) -> CoroError {
        match err {
            CoroError::BrokenPromise => CoroError::BrokenPromise,
            CoroError::StillPending => CoroError::StillPending,
            CoroError::AwaitCanceled => CoroError::AwaitCanceled,
            CoroError::NoActiveScheduler => CoroError::NoActiveScheduler,
            CoroError::Failed(e) => CoroError::Failed(Box::new(DetachedError(e.to_string()))),
        }
    }
}

#[derive(Debug)]
struct DetachedError(String);

impl std::fmt::Display for DetachedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for DetachedError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_future_has_value() {
        let f = Future::ready(7);
        assert!(f.has_value());
        assert_eq!(f.get().unwrap(), 7);
    }

    #[test]
    fn pending_future_resolves_via_promise() {
        let (f, p) = Future::pending();
        assert!(f.is_pending());
        p.call(5);
        assert_eq!(f.wait().unwrap(), 5);
    }

    #[test]
    fn dropped_promise_breaks_future() {
        let (f, p) = Future::<i32>::pending();
        drop(p);
        assert!(matches!(f.get(), Err(CoroError::BrokenPromise)));
    }

    #[test]
    fn then_runs_inline_when_already_resolved() {
        let f = Future::ready(3);
        let seen = std::sync::Arc::new(std::sync::atomic::AtomicI32::new(0));
        let seen2 = std::sync::Arc::clone(&seen);
        let deferred = f.then(move |r| {
            seen2.store(*r.as_ref().unwrap(), std::sync::atomic::Ordering::SeqCst);
        });
        assert!(!deferred);
        assert_eq!(seen.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[test]
    fn then_reports_deferred_when_still_pending() {
        let (f, p) = Future::<i32>::pending();
        let seen = std::sync::Arc::new(std::sync::atomic::AtomicI32::new(0));
        let seen2 = std::sync::Arc::clone(&seen);
        let deferred = f.then(move |r| {
            seen2.store(*r.as_ref().unwrap(), std::sync::atomic::Ordering::SeqCst);
        });
        assert!(deferred);
        assert_eq!(seen.load(std::sync::atomic::Ordering::SeqCst), 0);
        p.call(8);
        assert_eq!(seen.load(std::sync::atomic::Ordering::SeqCst), 8);
    }

    #[test]
    fn deferred_future_runs_only_once_accessed() {
        let ran = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let ran2 = std::sync::Arc::clone(&ran);
        let f = Future::deferred(move |p| {
            ran2.store(true, std::sync::atomic::Ordering::SeqCst);
            p.call(9);
            None
        });
        assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(f.wait().unwrap(), 9);
        assert!(ran.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn chained_promise_resolves_both_futures() {
        let (a, pa) = Future::pending();
        let (b, pb) = Future::pending();
        let mut pa = pa;
        pa += pb;
        pa.call(11);
        assert_eq!(a.wait().unwrap(), 11);
        assert_eq!(b.wait().unwrap(), 11);
    }
}
