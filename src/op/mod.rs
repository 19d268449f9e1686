//! Completion ops
//!
//! An op is a one-shot asynchronous completion signal with a three-state
//! machine:
//!
//! ```text
//! INIT --active()--> ACTIVE --done()--> DONE
//!   ^                                     |
//!   +---------------reset()---------------+
//! ```
//!
//! Ops compose into trees. `make_set_and` / `make_set_or` turn an INIT op
//! into an ACTIVE set whose completion is driven by its children: an AND
//! set completes after every child completed, an OR set completes on the
//! first child and detaches the rest.
//!
//! # Ownership
//!
//! Ops live in an `OpArena` and are addressed by generational `OpId`s.
//! `Op` is the owning handle (dropping it finalizes the op). `OpHandle`
//! is a cheap non-owning reference used by queues, sets and callbacks;
//! once the owner finalizes the op every handle to it reports
//! `OpError::StaleHandle`.
//!
//! A set holds the membership of its children, never their lifetime.
//! A child keeps a plain back-reference to its set.
//!
//! # Completion order
//!
//! Completion runs as an explicit dispatch loop instead of re-entrant
//! locking. For each completed op: the state flips to DONE under the
//! arena lock, `on_done` runs unlocked, the parent's trigger condition is
//! evaluated under the lock, and `on_gc` runs last with no lock held, so
//! a gc callback may finalize the op it is called for. A triggered parent
//! completes (including its own callbacks) before the child's `on_gc`.

mod arena;
mod errors;
mod handle;

pub use arena::{OpArena, OpGuard};
pub use errors::{OpError, OpResult};
pub use handle::{Op, OpHandle};

use std::fmt;
use std::sync::Arc;

/// Op state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpState {
    Init,
    Active,
    Done,
}

/// Op kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    /// Completed explicitly with `done()`
    Normal,
    /// Completes after every child completed
    SetAnd,
    /// Completes after the first child completed
    SetOr,
}

impl OpKind {
    /// True for AND and OR sets
    pub fn is_set(&self) -> bool {
        !matches!(self, OpKind::Normal)
    }
}

/// Callback slots on an op
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackKind {
    /// Fired on INIT -> ACTIVE
    Active,
    /// Fired on ACTIVE -> DONE, before the parent is notified
    Done,
    /// Fired last, with no lock held
    Gc,
}

/// Callback attached to an op
///
/// Callbacks survive `reset()` and fire once per usage cycle.
pub type OpCallback = Arc<dyn Fn(&OpHandle) + Send + Sync>;

/// Generational op identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpId {
    index: u32,
    generation: u32,
}

impl OpId {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub(crate) fn index(&self) -> usize {
        self.index as usize
    }

    pub(crate) fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op#{}.{}", self.index, self.generation)
    }
}
