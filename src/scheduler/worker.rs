//! One worker OS thread's loop (§4.7).
//!
//! Grounded on the teacher's `Executor::tick`/`run` dispatch loop
//! (`src/executor/mod.rs`) — pop ready work, process it, re-check for more
//! — generalized from "one ECS system call per frame" to a free-running OS
//! thread, and on `examples/redbaron-coio-rs/src/runtime/processor.rs`'s
//! `Processor::schedule` loop shape (pop queue, check for more, park).

use std::sync::atomic::Ordering;
use std::sync::Weak;
use std::time::{Duration, Instant};

use crossbeam_channel::RecvTimeoutError;
use log::trace;

use super::Inner;

/// Workers re-check the shutdown flag at least this often even with no
/// timer deadline pending, so `Scheduler` shutdown doesn't need to fake a
/// channel close to wake every parked worker.
pub(super) const IDLE_POLL: Duration = Duration::from_millis(200);

/// Workers hold only a `Weak<Inner>`: the pool's `Arc<Inner>` is owned by
/// `Scheduler` handles, so the last handle dropping (not the last worker
/// exiting) is what triggers `Inner::drop`'s shutdown/drain. A worker
/// simply stops once the pool it serves has gone away.
pub(super) fn run(inner: Weak<Inner>) {
    trace!("worker: starting");
    loop {
        let Some(inner) = inner.upgrade() else {
            trace!("worker: pool dropped, exiting");
            return;
        };

        if inner.shutting_down.load(Ordering::Acquire) {
            trace!("worker: pool shutting down, exiting");
            return;
        }

        if let Ok(job) = inner.queue_rx.try_recv() {
            job(true);
            continue;
        }

        let now = Instant::now();
        let expired = inner.timers.lock().drain_expired(now);
        if !expired.is_empty() {
            trace!("worker: {} timer(s) expired", expired.len());
            for job in expired {
                job(true);
            }
            continue;
        }

        let deadline = inner.timers.lock().next_deadline();
        let timeout = match deadline {
            Some(d) => d.saturating_duration_since(Instant::now()).min(IDLE_POLL),
            None => IDLE_POLL,
        };

        inner.idle_workers.fetch_add(1, Ordering::SeqCst);
        let recv = inner.queue_rx.recv_timeout(timeout);
        inner.idle_workers.fetch_sub(1, Ordering::SeqCst);

        match recv {
            Ok(job) => job(true),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                trace!("worker: queue disconnected, exiting");
                return;
            }
        }
    }
}
