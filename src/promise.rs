//! `Promise<T>` and the `Notify` RAII delivery token (§4.3).
//!
//! Grounded on the teacher's `once_channel.rs` sender half (`OnceSender<T>`):
//! a promise owns a strong reference to the shared cell and resolves it
//! exactly once, either explicitly or via `Drop`.

use std::marker::PhantomData;
use std::ops::AddAssign;
use std::sync::Arc;

use crate::error::CoroError;
use crate::future::{FutureCell, Slot};
use crate::target::PreparedCoroutine;

/// A handle that resolves a [`crate::future::Future`]'s shared cell.
///
/// Dropping a `Promise` that was never called resolves its future with
/// [`CoroError::BrokenPromise`] (§4.3: "cancelled / broken").
pub struct Promise<T: Clone + Send + 'static> {
    cell: Option<Arc<FutureCell<T>>>,
    atomic: bool,
}

impl<T: Clone + Send + 'static> Promise<T> {
    pub(crate) fn from_cell(cell: Arc<FutureCell<T>>) -> Self {
        Promise {
            cell: Some(cell),
            atomic: false,
        }
    }

    /// Mark this promise as expecting concurrent writers to the promise
    /// handle itself (see `DESIGN.md`, Open Question 5). Purely advisory
    /// bookkeeping today; `+=` always takes the cell's internal lock
    /// regardless of this flag.
    pub fn atomic(mut self) -> Self {
        self.atomic = true;
        self
    }

    pub fn local(mut self) -> Self {
        self.atomic = false;
        self
    }

    pub fn is_atomic(&self) -> bool {
        self.atomic
    }

    fn claim(&mut self) -> Arc<FutureCell<T>> {
        self.cell.take().expect("Promise already called")
    }

    /// Resolve the paired future with a value.
    pub fn call(mut self, value: T) -> Notify<T> {
        let cell = self.claim();
        Notify::new(cell.resolve(Slot::Value(value)))
    }

    /// Resolve the paired future with an application error.
    pub fn reject(mut self, err: CoroError) -> Notify<T> {
        let cell = self.claim();
        Notify::new(cell.resolve(Slot::Exception(err)))
    }

    /// Resolve the paired future as cancelled (`NotSet`), the same outcome
    /// as an implicit drop, but explicit and at a point of the caller's
    /// choosing.
    pub fn cancel(mut self) -> Notify<T> {
        let cell = self.claim();
        Notify::new(cell.resolve(Slot::NotSet))
    }

    /// Detach this promise from its "broken on drop" contract, handing back
    /// a `Future<T>` bound to the same cell for manual resumption protocols
    /// (the sync primitives use this to stash a future on the side while
    /// keeping a promise to resolve it later).
    pub fn release(mut self) -> crate::future::Future<T> {
        let cell = self.claim();
        crate::future::Future { cell }
    }
}

impl<T: Clone + Send + 'static> AddAssign<Promise<T>> for Promise<T> {
    /// Merge `other`'s future into this promise's fan-out chain: the next
    /// `call`/`reject`/`cancel` on `self` resolves both futures. `other` is
    /// consumed; its own broken-promise-on-drop behavior is suppressed
    /// since its future is now resolved transitively through the chain.
    fn add_assign(&mut self, mut other: Promise<T>) {
        let target = self.cell.as_ref().expect("Promise already called");
        let joined = other.cell.take().expect("Promise already called");
        target.push_chain(joined);
    }
}

impl<T: Clone + Send + 'static> Drop for Promise<T> {
    fn drop(&mut self) {
        if let Some(cell) = self.cell.take() {
            // Default resumption: run inline. Nothing here needs a
            // scheduler decision since nobody is around to ask for one.
            if let Some(prepared) = cell.resolve(Slot::NotSet) {
                prepared.resume();
            }
        }
    }
}

/// The RAII token returned by `Promise::call`/`reject`/`cancel`.
///
/// Firing the corresponding awaiter is deferred until this token is
/// dropped or explicitly delivered, so the caller gets to choose *how*
/// the awaiter is resumed (inline, handed to a scheduler, etc.) rather
/// than having it happen synchronously inside `call`.
#[must_use = "a Notify defers resumption until dropped or delivered"]
pub struct Notify<T> {
    prepared: Option<PreparedCoroutine>,
    _marker: PhantomData<T>,
}

impl<T> Notify<T> {
    fn new(prepared: Option<PreparedCoroutine>) -> Self {
        Notify {
            prepared,
            _marker: PhantomData,
        }
    }

    /// Hand the prepared resumption (if any) to `resume`, e.g. a
    /// scheduler's `schedule` closure, instead of running it inline.
    pub fn deliver(mut self, resume: impl FnOnce(PreparedCoroutine)) {
        if let Some(prepared) = self.prepared.take() {
            resume(prepared);
        }
    }

    /// Extract the prepared resumption for a symmetric-transfer-style tail
    /// call, e.g. from inside a `poll`.
    pub fn into_symmetric_handle(mut self) -> Option<PreparedCoroutine> {
        self.prepared.take()
    }
}

impl<T> Drop for Notify<T> {
    fn drop(&mut self) {
        if let Some(prepared) = self.prepared.take() {
            prepared.resume();
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::future::Future;

    #[test]
    fn chaining_resolves_both_consumers() {
        let (a, pa) = Future::pending();
        let (b, pb) = Future::pending();
        let mut pa = pa;
        pa += pb;
        pa.call(4);
        assert_eq!(a.wait().unwrap(), 4);
        assert_eq!(b.wait().unwrap(), 4);
    }

    #[test]
    fn atomic_flag_roundtrips() {
        let (_f, p) = Future::<i32>::pending();
        let p = p.atomic();
        assert!(p.is_atomic());
        let p = p.local();
        assert!(!p.is_atomic());
    }
}
