//! A coroutine runtime core: futures and promises, deferred and shared
//! futures, producer coroutines, generators/collectors, a thread-pool
//! scheduler, coordination primitives (mutex, semaphore, queue,
//! distributor, condition-on-address), and fan-in combinators
//! (`all_of`/`any_of`/`each_of`/`Aggregator`).
//!
//! See each module for the component it covers; `error` holds the shared
//! [`CoroError`] taxonomy every fallible operation here returns.

pub mod aggregate;
pub mod deferred;
pub mod error;
pub mod generator;
pub mod producer;
pub mod scheduler;
pub mod shared;
pub mod sync;

mod future;
mod promise;
mod target;
mod waker;

pub use aggregate::{all_of, any_of, each_of, Aggregator, EachOf, EachOfIter};
pub use deferred::DeferredFuture;
pub use error::{CoroError, Result};
pub use future::Future;
pub use generator::{Collector, CollectorHandle, Generator, GeneratorHandle, GeneratorIter};
pub use producer::Async;
pub use promise::{Notify, Promise};
pub use scheduler::{Scheduler, SchedulerBuilder, TimerId};
pub use shared::SharedFuture;
pub use target::PreparedCoroutine;
