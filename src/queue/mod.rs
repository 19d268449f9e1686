//! Bounded work queue
//!
//! A fixed-capacity multi-producer multi-consumer FIFO whose blocking
//! contract is expressed through ops: a put or get that cannot finish
//! immediately leaves the caller's op ACTIVE and completes it later.
//!
//! Guarantees:
//! - `enqueued - dequeued` always equals the number of resident items
//! - Resident items never exceed `capacity + producers_max`
//! - Items, parked producers and parked consumers are each strictly FIFO
//! - After `end`, gets drain the remaining items and then fail

mod bounded;
mod config;
mod errors;

pub use bounded::{BoundedQueue, QueueGuard, QueueSlot};
pub use config::QueueConfig;
pub use errors::{QueueError, QueueResult};
