//! `Semaphore`/`SemaphorePermit` (§4.8).
//!
//! Grounded on `examples/original_source/src/coro/semaphore.h`: a counter
//! plus FIFO wait queue under one lock. The original hands back a bare
//! `future<void>` and leaves `release()` to the caller; this rewrite wraps
//! the released unit into an RAII `SemaphorePermit` (consistent with how
//! `Mutex` turned `ownership` into `MutexGuard`) so a permit returned to the
//! pool automatically on drop instead of requiring an explicit call.

use std::collections::VecDeque;
use std::future::Future as StdFuture;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;

use crate::future::Future;
use crate::promise::Promise;

struct State {
    count: u64,
    waiters: VecDeque<Promise<()>>,
}

/// A counting semaphore usable across `.await` points.
pub struct Semaphore {
    state: Mutex<State>,
}

impl Semaphore {
    pub fn new(count: u64) -> Self {
        Semaphore {
            state: Mutex::new(State {
                count,
                waiters: VecDeque::new(),
            }),
        }
    }

    pub fn try_acquire(self: &Arc<Self>) -> Option<SemaphorePermit> {
        let mut state = self.state.lock();
        if state.count == 0 {
            None
        } else {
            state.count -= 1;
            Some(SemaphorePermit {
                semaphore: Arc::clone(self),
            })
        }
    }

    pub fn acquire(self: &Arc<Self>) -> Acquire {
        Acquire {
            semaphore: Arc::clone(self),
            waiting: None,
        }
    }

    pub fn acquire_sync(self: &Arc<Self>) -> SemaphorePermit {
        match self.acquire_or_queue() {
            Ok(permit) => permit,
            Err(signal) => {
                signal.wait().expect("semaphore signal broken");
                SemaphorePermit {
                    semaphore: Arc::clone(self),
                }
            }
        }
    }

    /// Current availability: positive means immediately acquirable,
    /// negative (as `-n`) means `n` coroutines are already queued.
    pub fn get(&self) -> i64 {
        let state = self.state.lock();
        if state.count > 0 {
            state.count as i64
        } else {
            -(state.waiters.len() as i64)
        }
    }

    fn acquire_or_queue(self: &Arc<Self>) -> Result<SemaphorePermit, Future<()>> {
        let mut state = self.state.lock();
        if state.count > 0 {
            state.count -= 1;
            Ok(SemaphorePermit {
                semaphore: Arc::clone(self),
            })
        } else {
            let (signal, promise) = Future::pending();
            state.waiters.push_back(promise);
            Err(signal)
        }
    }

    fn release(&self) {
        let mut state = self.state.lock();
        match state.waiters.pop_front() {
            Some(promise) => {
                drop(state);
                promise.call(());
            }
            None => state.count += 1,
        }
    }
}

/// A held permit; returns itself to the semaphore on drop.
pub struct SemaphorePermit {
    semaphore: Arc<Semaphore>,
}

impl Drop for SemaphorePermit {
    fn drop(&mut self) {
        self.semaphore.release();
    }
}

enum AcquireState {
    Waiting(Future<()>),
}

/// The future behind `Semaphore::acquire`.
pub struct Acquire {
    semaphore: Arc<Semaphore>,
    waiting: Option<Pin<Box<AcquireState>>>,
}

impl StdFuture for Acquire {
    type Output = SemaphorePermit;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<SemaphorePermit> {
        loop {
            match self.waiting.take() {
                None => match self.semaphore.acquire_or_queue() {
                    Ok(permit) => return Poll::Ready(permit),
                    Err(signal) => {
                        self.waiting = Some(Box::pin(AcquireState::Waiting(signal)));
                    }
                },
                Some(mut boxed) => {
                    let AcquireState::Waiting(signal) = boxed.as_mut().get_mut();
                    match Pin::new(signal).poll(cx) {
                        Poll::Ready(res) => {
                            res.expect("semaphore signal broken");
                            return Poll::Ready(SemaphorePermit {
                                semaphore: Arc::clone(&self.semaphore),
                            });
                        }
                        Poll::Pending => {
                            self.waiting = Some(boxed);
                            return Poll::Pending;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_acquire_respects_counter() {
        let sem = Arc::new(Semaphore::new(1));
        let permit = sem.try_acquire().unwrap();
        assert!(sem.try_acquire().is_none());
        drop(permit);
        assert!(sem.try_acquire().is_some());
    }

    #[test]
    fn release_without_waiters_increments_counter() {
        let sem = Arc::new(Semaphore::new(0));
        assert_eq!(sem.get(), 0);
        let permit = sem.acquire_sync();
        drop(permit);
    }

    #[test]
    fn get_reports_negative_queue_depth() {
        let sem = Arc::new(Semaphore::new(0));
        let sem2 = Arc::clone(&sem);
        let handle = std::thread::spawn(move || {
            let _permit = sem2.acquire_sync();
        });
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(sem.get(), -1);
        sem.release();
        handle.join().unwrap();
    }
}
