//! The scheduler and thread pool (§4.7).
//!
//! Grounded on the teacher's `Executor::tick`/`run` dispatch loop
//! (`src/executor/mod.rs`), generalized from one ECS-system call per frame
//! to a free-running pool of OS worker threads plus a timer heap, and on
//! `examples/redbaron-coio-rs/src/runtime/processor.rs`'s
//! `Processor::schedule` loop shape for the worker-thread body itself
//! (see `worker.rs`).

mod timer;
mod worker;

use std::future::Future as StdFuture;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use log::{debug, trace};
use parking_lot::Mutex;

pub use timer::TimerId;
use timer::TimerWheel;

use crate::error::{CoroError, Result as CoroResult};
use crate::target::Target;

/// A unit of queued work. The `bool` is `true` for an ordinary activation
/// and `false` when the scheduler is draining work on shutdown or
/// cancelling a timer — mirrors the original's `ok` parameter threaded
/// through every target activation.
pub(crate) type Job = Box<dyn FnOnce(bool) + Send>;

thread_local! {
    static CURRENT: std::cell::RefCell<Option<Scheduler>> = std::cell::RefCell::new(None);
}

struct Inner {
    queue_tx: Sender<Job>,
    queue_rx: Receiver<Job>,
    timers: Mutex<TimerWheel>,
    unblock_targets: Mutex<std::collections::HashMap<u64, Target<bool>>>,
    next_id: AtomicU64,
    idle_workers: AtomicUsize,
    worker_count: usize,
    shutting_down: AtomicBool,
}

impl Drop for Inner {
    fn drop(&mut self) {
        debug!("scheduler: last handle dropped, shutting down {} worker(s)", self.worker_count);
        self.shutting_down.store(true, Ordering::Release);
        while let Ok(job) = self.queue_rx.try_recv() {
            job(false);
        }
        for job in self.timers.lock().drain_all() {
            job(false);
        }
        for (_, target) in self.unblock_targets.lock().drain() {
            target.activate(false);
        }
    }
}

/// A pool of worker threads plus a timer heap, driving every `Future<T>`
/// awaiter and deferred producer coroutine spawned onto it.
///
/// Cloning a `Scheduler` clones a handle to the same pool (`Arc<Inner>`);
/// worker threads themselves hold only a `Weak<Inner>`, so dropping every
/// `Scheduler` handle — not the worker threads — is what triggers shutdown
/// (`Inner::drop`, above).
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

pub struct SchedulerBuilder {
    worker_threads: usize,
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        SchedulerBuilder {
            worker_threads: threads,
        }
    }
}

impl SchedulerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn worker_threads(mut self, n: usize) -> Self {
        self.worker_threads = n.max(1);
        self
    }

    pub fn build(self) -> Scheduler {
        debug!("scheduler: starting {} worker thread(s)", self.worker_threads);
        let (queue_tx, queue_rx) = crossbeam_channel::unbounded();
        let inner = Arc::new(Inner {
            queue_tx,
            queue_rx,
            timers: Mutex::new(TimerWheel::default()),
            unblock_targets: Mutex::new(std::collections::HashMap::new()),
            next_id: AtomicU64::new(0),
            idle_workers: AtomicUsize::new(0),
            worker_count: self.worker_threads,
            shutting_down: AtomicBool::new(false),
        });
        let scheduler = Scheduler {
            inner: Arc::clone(&inner),
        };
        for _ in 0..self.worker_threads {
            spawn_worker(&scheduler, Arc::downgrade(&inner));
        }
        scheduler
    }
}

fn spawn_worker(scheduler: &Scheduler, weak: Weak<Inner>) -> JoinHandle<()> {
    let scheduler = scheduler.clone();
    std::thread::spawn(move || {
        let _guard = scheduler.enter();
        worker::run(weak);
    })
}

/// RAII guard restoring the previous thread-local `Scheduler::current()`
/// value when dropped.
pub struct SchedulerGuard {
    previous: Option<Scheduler>,
}

impl Drop for SchedulerGuard {
    fn drop(&mut self) {
        CURRENT.with(|cell| *cell.borrow_mut() = self.previous.take());
    }
}

/// A handle returned by `register_unblock`, used to `unregister_unblock` it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnblockId(u64);

impl Scheduler {
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::new()
    }

    pub fn new(worker_threads: usize) -> Self {
        SchedulerBuilder::new().worker_threads(worker_threads).build()
    }

    /// Bind this scheduler as `Scheduler::current()` for the calling
    /// thread until the returned guard drops.
    pub fn enter(&self) -> SchedulerGuard {
        let previous = CURRENT.with(|cell| cell.borrow_mut().replace(self.clone()));
        SchedulerGuard { previous }
    }

    /// The scheduler bound to the calling thread, if any.
    pub fn current() -> CoroResult<Scheduler> {
        CURRENT.with(|cell| cell.borrow().clone().ok_or(CoroError::NoActiveScheduler))
    }

    /// Enqueue a plain callable onto the FIFO job queue.
    pub fn schedule(&self, job: impl FnOnce() + Send + 'static) {
        self.enqueue(Box::new(move |_ok| job()));
    }

    fn enqueue(&self, job: Job) {
        let _ = self.inner.queue_tx.send(job);
        if self.inner.idle_workers.load(Ordering::Acquire) == 0 {
            let mut targets = self.inner.unblock_targets.lock();
            if let Some((&id, _)) = targets.iter().next() {
                if let Some(target) = targets.remove(&id) {
                    drop(targets);
                    target.activate(true);
                }
            }
        }
    }

    /// Push `job` onto the timer heap, to run at `deadline`. `job` receives
    /// `true` if it fired at its deadline, `false` if cancelled or the
    /// scheduler shut down first.
    pub fn schedule_at(&self, deadline: Instant, job: impl FnOnce(bool) + Send + 'static) -> TimerId {
        let id = TimerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.timers.lock().push(deadline, id, Box::new(job));
        id
    }

    /// Cancel a pending timer; the job (if still pending) is invoked with
    /// `ok = false`. Returns whether a timer with this id was found.
    pub fn cancel(&self, id: TimerId) -> bool {
        match self.inner.timers.lock().cancel(id) {
            Some(job) => {
                trace!("scheduler: cancelled timer {:?}", id);
                job(false);
                true
            }
            None => false,
        }
    }

    /// A future that resolves once `deadline` is reached.
    pub fn sleep_until(&self, deadline: Instant) -> crate::future::Future<()> {
        let (future, promise) = crate::future::Future::pending();
        self.schedule_at(deadline, move |ok| {
            if ok {
                promise.call(());
            } else {
                promise.reject(CoroError::AwaitCanceled);
            }
        });
        future
    }

    pub fn sleep_for(&self, duration: Duration) -> crate::future::Future<()> {
        self.sleep_until(Instant::now() + duration)
    }

    /// Suspend the caller and re-enqueue its waker, giving other queued
    /// work a chance to run first.
    pub fn yield_now(&self) -> YieldNow {
        YieldNow {
            scheduler: self.clone(),
            yielded: false,
        }
    }

    /// Drive `future` to completion, helping drain this scheduler's queue
    /// on the calling thread instead of blocking it uselessly (§4.7).
    pub fn block_on<T: Send + 'static>(
        &self,
        future: impl StdFuture<Output = T> + Send + 'static,
    ) -> T {
        let (tx, rx) = oneshot::channel();
        spawn_driven(self.clone(), future, move |v| {
            let _ = tx.send(v);
        });
        loop {
            match self.inner.queue_rx.try_recv() {
                Ok(job) => job(true),
                Err(_) => match rx.recv_timeout(Duration::from_millis(5)) {
                    Ok(v) => return v,
                    Err(oneshot::RecvTimeoutError::Timeout) => continue,
                    Err(oneshot::RecvTimeoutError::Disconnected) => {
                        panic!("block_on: task dropped its result sender")
                    }
                },
            }
        }
    }

    pub fn register_unblock(&self, target: Target<bool>) -> UnblockId {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.unblock_targets.lock().insert(id, target);
        UnblockId(id)
    }

    pub fn unregister_unblock(&self, id: UnblockId) {
        self.inner.unblock_targets.lock().remove(&id.0);
    }

    pub fn is_idle(&self) -> bool {
        self.inner.idle_workers.load(Ordering::Acquire) == self.inner.worker_count
    }

    pub fn idle_worker_count(&self) -> usize {
        self.inner.idle_workers.load(Ordering::Acquire)
    }

    /// How often an idle worker re-checks for shutdown/new timers when no
    /// timer deadline is pending.
    pub fn idle_interval(&self) -> Duration {
        worker::IDLE_POLL
    }
}

/// Returned by `Scheduler::yield_now`.
pub struct YieldNow {
    scheduler: Scheduler,
    yielded: bool,
}

impl StdFuture for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        let waker = cx.waker().clone();
        self.scheduler.schedule(move || waker.wake());
        Poll::Pending
    }
}

struct Driver<T> {
    future: Mutex<Option<Pin<Box<dyn StdFuture<Output = T> + Send>>>>,
    done: Mutex<Option<Box<dyn FnOnce(T) + Send>>>,
    scheduler: Scheduler,
}

/// Drive an arbitrary future to completion on `scheduler`, calling `done`
/// exactly once with its output. Shared by `Scheduler::block_on` and
/// `Async::start`/`shared_start` (§4.5) — this is the Rust-native
/// equivalent of the teacher's `FunctionCoroutine::resume`.
pub(crate) fn spawn_driven<T: Send + 'static>(
    scheduler: Scheduler,
    future: impl StdFuture<Output = T> + Send + 'static,
    done: impl FnOnce(T) + Send + 'static,
) {
    let driver = Arc::new(Driver {
        future: Mutex::new(Some(Box::pin(future))),
        done: Mutex::new(Some(Box::new(done))),
        scheduler,
    });
    poll_driver(driver);
}

fn poll_driver<T: Send + 'static>(driver: Arc<Driver<T>>) {
    let driver_for_wake = Arc::clone(&driver);
    let waker = crate::waker::from_fn(move || {
        let scheduler = driver_for_wake.scheduler.clone();
        let driver_for_poll = Arc::clone(&driver_for_wake);
        scheduler.schedule(move || poll_driver(driver_for_poll));
    });
    let mut cx = Context::from_waker(&waker);

    let mut guard = driver.future.lock();
    let Some(fut) = guard.as_mut() else {
        return;
    };
    match fut.as_mut().poll(&mut cx) {
        Poll::Ready(value) => {
            *guard = None;
            drop(guard);
            if let Some(done) = driver.done.lock().take() {
                done(value);
            }
        }
        Poll::Pending => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_on_drives_an_async_block_to_completion() {
        let scheduler = Scheduler::new(2);
        let result = scheduler.block_on(async { 1 + 1 });
        assert_eq!(result, 2);
    }

    #[test]
    fn sleep_for_resolves_after_its_duration() {
        let scheduler = Scheduler::new(2);
        let started = Instant::now();
        scheduler.block_on(scheduler.sleep_for(Duration::from_millis(20)));
        assert!(started.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn cancelling_a_timer_runs_its_job_with_ok_false() {
        let scheduler = Scheduler::new(1);
        let (future, promise) = crate::future::Future::pending();
        let promise = Mutex::new(Some(promise));
        let id = scheduler.schedule_at(Instant::now() + Duration::from_secs(60), move |ok| {
            if let Some(p) = promise.lock().take() {
                if ok {
                    p.call(());
                } else {
                    p.reject(CoroError::AwaitCanceled);
                }
            }
        });
        assert!(scheduler.cancel(id));
        assert!(future.wait().is_err());
        assert!(!scheduler.cancel(id));
    }

    #[test]
    fn yield_now_suspends_and_resumes_the_caller() {
        let scheduler = Scheduler::new(1);
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = Arc::clone(&ran);
        let inner = scheduler.clone();
        scheduler.block_on(async move {
            assert!(!ran2.load(Ordering::SeqCst));
            inner.yield_now().await;
            ran2.store(true, Ordering::SeqCst);
        });
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn current_is_unset_outside_a_worker_thread() {
        assert!(Scheduler::current().is_err());
    }
}
