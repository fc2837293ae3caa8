//! A one-shot, callback-firing `std::task::Waker`.
//!
//! The teacher's `coroutine/waker.rs` builds a `RawWaker` whose `wake` does
//! nothing (the executor polls on its own schedule regardless of the
//! waker). `Future::set_callback`/`then` need the opposite: a waker whose
//! `wake` runs a caller-supplied closure exactly once. Same `RawWakerVTable`
//! shape, generalized payload.

use std::sync::{Arc, Mutex};
use std::task::{RawWaker, RawWakerVTable, Waker};

type Job = Mutex<Option<Box<dyn FnOnce() + Send>>>;

pub(crate) fn from_fn(f: impl FnOnce() + Send + 'static) -> Waker {
    let job: Arc<Job> = Arc::new(Mutex::new(Some(Box::new(f))));
    unsafe { Waker::from_raw(raw_waker(job)) }
}

fn raw_waker(job: Arc<Job>) -> RawWaker {
    RawWaker::new(Arc::into_raw(job) as *const (), &VTABLE)
}

static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, wake, wake_by_ref, drop_job);

unsafe fn clone(ptr: *const ()) -> RawWaker {
    let job = Arc::from_raw(ptr as *const Job);
    let cloned = Arc::clone(&job);
    std::mem::forget(job);
    raw_waker(cloned)
}

unsafe fn wake(ptr: *const ()) {
    let job = Arc::from_raw(ptr as *const Job);
    run(&job);
}

unsafe fn wake_by_ref(ptr: *const ()) {
    let job = Arc::from_raw(ptr as *const Job);
    run(&job);
    std::mem::forget(job);
}

unsafe fn drop_job(ptr: *const ()) {
    drop(Arc::from_raw(ptr as *const Job));
}

fn run(job: &Arc<Job>) {
    if let Some(f) = job.lock().unwrap().take() {
        f();
    }
}

/// A repeatable waker that unparks a specific thread. Used by the
/// throwaway single-task executor behind `Async::run` (§4.5), where the
/// same waker may legitimately fire more than once across a future's
/// lifetime (unlike the one-shot callback waker above).
pub(crate) fn thread_unparker(thread: std::thread::Thread) -> Waker {
    let thread: Arc<std::thread::Thread> = Arc::new(thread);
    unsafe { Waker::from_raw(thread_raw_waker(thread)) }
}

fn thread_raw_waker(thread: Arc<std::thread::Thread>) -> RawWaker {
    RawWaker::new(Arc::into_raw(thread) as *const (), &THREAD_VTABLE)
}

static THREAD_VTABLE: RawWakerVTable =
    RawWakerVTable::new(thread_clone, thread_wake, thread_wake_by_ref, thread_drop);

unsafe fn thread_clone(ptr: *const ()) -> RawWaker {
    let thread = Arc::from_raw(ptr as *const std::thread::Thread);
    let cloned = Arc::clone(&thread);
    std::mem::forget(thread);
    thread_raw_waker(cloned)
}

unsafe fn thread_wake(ptr: *const ()) {
    let thread = Arc::from_raw(ptr as *const std::thread::Thread);
    thread.unpark();
}

unsafe fn thread_wake_by_ref(ptr: *const ()) {
    let thread = Arc::from_raw(ptr as *const std::thread::Thread);
    thread.unpark();
    std::mem::forget(thread);
}

unsafe fn thread_drop(ptr: *const ()) {
    drop(Arc::from_raw(ptr as *const std::thread::Thread));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::task::Context;

    #[test]
    fn wake_runs_the_closure_once() {
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = Arc::clone(&ran);
        let waker = from_fn(move || ran2.store(true, Ordering::SeqCst));
        let _cx = Context::from_waker(&waker);
        waker.wake_by_ref();
        assert!(ran.load(Ordering::SeqCst));
        // idempotent: second wake is a no-op, not a double-fire.
        waker.wake_by_ref();
    }
}
