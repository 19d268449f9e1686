//! aerotx - batched transaction execution engine
//!
//! Layers, leaf first:
//!
//! - `credit`: transaction size estimates and their arithmetic
//! - `op`: composable completion objects with AND/OR sets
//! - `queue`: bounded MPMC queue blocking through ops
//! - `locality`: serialized execution lanes
//! - `tx`: the transaction engine a pool drives
//! - `memlog`: in-memory group-committing engine
//! - `bulk`: the multi-worker batching pool
//!
//! `observability` and `errno` are shared by all of them; `cli` is the
//! `aerotx` binary.

pub mod bulk;
pub mod cli;
pub mod credit;
pub mod errno;
pub mod locality;
pub mod memlog;
pub mod observability;
pub mod op;
pub mod queue;
pub mod tx;
