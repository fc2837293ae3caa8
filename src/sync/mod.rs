//! Coordination primitives built on top of the future/promise core (§4.8):
//! `Mutex`, `Semaphore`, `Queue`, `Distributor`, and condition-on-address.

mod condition;
mod distributor;
mod mutex;
mod queue;
mod semaphore;

pub use condition::{notify_condition, wait_while};
pub use distributor::{Distributor, DistributorQueue, SubscriberId};
pub use mutex::{Lock, Mutex, MutexGuard};
pub use queue::Queue;
pub use semaphore::{Acquire, Semaphore, SemaphorePermit};
