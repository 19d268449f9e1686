//! Arena of completion nodes
//!
//! One mutex guards every node of an arena. Callbacks never run under
//! it; they run between the locked phases of the dispatch loop in
//! `complete`.

use std::fmt;
use std::mem;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError, TryLockError};
use std::thread::{self, ThreadId};

use super::errors::{OpError, OpResult};
use super::handle::OpHandle;
use super::{CallbackKind, OpCallback, OpId, OpKind, OpState};
use crate::observability::{log_event_with_fields, Event};

const INIT_OR_DONE: &[OpState] = &[OpState::Init, OpState::Done];
const ACTIVE: &[OpState] = &[OpState::Active];
const DONE: &[OpState] = &[OpState::Done];
const INIT: &[OpState] = &[OpState::Init];

struct Node {
    state: OpState,
    kind: OpKind,
    rc: Option<i32>,
    parent: Option<OpId>,
    children: Vec<OpId>,
    addition_finished: bool,
    triggered_by: Option<OpId>,
    /// `on_done` ran and the parent was notified; `wait` returns after this
    settled: bool,
    /// Thread running the completion dispatch until `settled`
    completer: Option<ThreadId>,
    /// Finalized from its own `on_done`; removed once settled
    release_on_settle: bool,
    on_active: Option<OpCallback>,
    on_done: Option<OpCallback>,
    on_gc: Option<OpCallback>,
}

impl Node {
    fn new() -> Self {
        Self {
            state: OpState::Init,
            kind: OpKind::Normal,
            rc: None,
            parent: None,
            children: Vec::new(),
            addition_finished: false,
            triggered_by: None,
            settled: false,
            completer: None,
            release_on_settle: false,
            on_active: None,
            on_done: None,
            on_gc: None,
        }
    }

    fn expect_state(&self, id: OpId, expected: &'static [OpState]) -> OpResult<()> {
        if expected.contains(&self.state) {
            Ok(())
        } else {
            Err(OpError::InvalidState {
                op: id,
                expected,
                actual: self.state,
            })
        }
    }

    /// DONE, but `on_done` or the parent notification is still running
    fn in_flight(&self) -> bool {
        self.state == OpState::Done && !self.settled
    }

    fn callback(&self, kind: CallbackKind) -> Option<OpCallback> {
        match kind {
            CallbackKind::Active => self.on_active.clone(),
            CallbackKind::Done => self.on_done.clone(),
            CallbackKind::Gc => self.on_gc.clone(),
        }
    }
}

struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Node storage with a free list
pub(crate) struct Slots {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl Slots {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }

    fn get(&self, id: OpId) -> OpResult<&Node> {
        self.slots
            .get(id.index())
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.node.as_ref())
            .ok_or(OpError::StaleHandle(id))
    }

    fn get_mut(&mut self, id: OpId) -> OpResult<&mut Node> {
        self.slots
            .get_mut(id.index())
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.node.as_mut())
            .ok_or(OpError::StaleHandle(id))
    }

    fn insert(&mut self) -> OpId {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(Node::new());
            return OpId::new(index, slot.generation);
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            node: Some(Node::new()),
        });
        OpId::new(index, 0)
    }

    fn remove(&mut self, id: OpId) -> OpResult<Node> {
        let slot = self
            .slots
            .get_mut(id.index())
            .filter(|slot| slot.generation == id.generation())
            .ok_or(OpError::StaleHandle(id))?;
        let node = slot.node.take().ok_or(OpError::StaleHandle(id))?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index() as u32);
        self.live -= 1;
        Ok(node)
    }

    /// Removes `child` from its set and clears its back-reference
    fn unlink(&mut self, child: OpId) {
        let parent = match self.get_mut(child) {
            Ok(node) => node.parent.take(),
            Err(_) => None,
        };
        if let Some(parent) = parent {
            if let Ok(node) = self.get_mut(parent) {
                node.children.retain(|c| *c != child);
            }
        }
    }

    /// Clears the back-reference of every child of `set`
    fn orphan_children(&mut self, set: OpId) {
        let children = match self.get_mut(set) {
            Ok(node) => mem::take(&mut node.children),
            Err(_) => Vec::new(),
        };
        for child in children {
            if let Ok(node) = self.get_mut(child) {
                node.parent = None;
            }
        }
    }

    /// Notifies `parent` that `child` completed
    ///
    /// Returns the parent when its trigger condition became true.
    /// Nothing happens until addition is finished: the child stays in
    /// the set and `set_add_finish` picks it up.
    fn propagate(&mut self, child: OpId, parent: OpId) -> Option<OpId> {
        let node = self.get_mut(parent).ok()?;
        if !node.addition_finished || node.triggered_by.is_some() {
            return None;
        }
        node.children.retain(|c| *c != child);
        let trigger = match node.kind {
            OpKind::SetOr => true,
            OpKind::SetAnd => node.children.is_empty(),
            OpKind::Normal => false,
        };
        if trigger {
            node.triggered_by = Some(child);
        }
        if let Ok(child_node) = self.get_mut(child) {
            child_node.parent = None;
        }
        trigger.then_some(parent)
    }
}

/// Storage and synchronization domain for ops
pub struct OpArena {
    slots: Mutex<Slots>,
    settled: Condvar,
}

impl fmt::Debug for OpArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpArena").field("live", &self.live()).finish()
    }
}

static GLOBAL_ARENA: OnceLock<Arc<OpArena>> = OnceLock::new();

impl OpArena {
    /// Create an empty arena
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            slots: Mutex::new(Slots::new()),
            settled: Condvar::new(),
        })
    }

    /// Process-wide arena used by `Op::new`
    pub fn global() -> &'static Arc<OpArena> {
        GLOBAL_ARENA.get_or_init(OpArena::new)
    }

    /// Number of ops currently allocated
    pub fn live(&self) -> usize {
        self.lock_slots().live
    }

    fn lock_slots(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle(self: &Arc<Self>, id: OpId) -> OpHandle {
        OpHandle::new(Arc::clone(self), id)
    }

    pub(crate) fn alloc(&self) -> OpId {
        self.lock_slots().insert()
    }

    /// Takes the arena lock once `id` is not mid-completion
    ///
    /// Waits while another thread dispatches the op's completion. The
    /// dispatching thread itself gets the lock at once, with the op
    /// still in flight.
    fn lock_settled(&self, id: OpId) -> OpResult<MutexGuard<'_, Slots>> {
        let mut slots = self.lock_slots();
        loop {
            let node = slots.get(id)?;
            if !node.in_flight() || node.completer == Some(thread::current().id()) {
                return Ok(slots);
            }
            slots = self
                .settled
                .wait(slots)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Removes a settled op, or marks an in-flight one for removal
    fn remove_settled(slots: &mut Slots, id: OpId) -> OpResult<()> {
        let node = slots.get_mut(id)?;
        if node.in_flight() {
            // Finalized from its own on_done; the dispatch loop removes it
            node.release_on_settle = true;
            return Ok(());
        }
        slots.unlink(id);
        slots.orphan_children(id);
        slots.remove(id).map(|_| ())
    }

    /// Finalizes an INIT or DONE op
    ///
    /// A DONE op still completing on another thread is waited for, so
    /// its set is notified before the op goes away.
    pub(crate) fn release(&self, id: OpId) -> OpResult<()> {
        let mut slots = self.lock_settled(id)?;
        slots.get(id)?.expect_state(id, INIT_OR_DONE)?;
        Self::remove_settled(&mut slots, id)
    }

    /// Drives a still ACTIVE op through DONE, then finalizes it
    pub(crate) fn abandon(self: &Arc<Self>, id: OpId) {
        let state = self.lock_slots().get(id).map(|node| node.state);
        if state == Ok(OpState::Active) {
            log_event_with_fields(Event::OpAbandoned, &[("op", &id.to_string())]);
            if let Err(e) = self.complete(id, false) {
                log_event_with_fields(
                    Event::OpAbandoned,
                    &[("error", &e.to_string()), ("op", &id.to_string())],
                );
            }
        }
        if let Ok(mut slots) = self.lock_settled(id) {
            let _ = Self::remove_settled(&mut slots, id);
        }
    }

    pub(crate) fn reset(&self, id: OpId) -> OpResult<()> {
        let mut slots = self.lock_settled(id)?;
        let node = slots.get(id)?;
        node.expect_state(id, INIT_OR_DONE)?;
        if node.in_flight() {
            return Err(OpError::CompletionInProgress(id));
        }
        slots.unlink(id);
        slots.orphan_children(id);
        let node = slots.get_mut(id)?;
        node.state = OpState::Init;
        node.kind = OpKind::Normal;
        node.rc = None;
        node.addition_finished = false;
        node.triggered_by = None;
        node.settled = false;
        Ok(())
    }

    pub(crate) fn callback_set(&self, id: OpId, kind: CallbackKind, cb: OpCallback) -> OpResult<()> {
        let mut slots = self.lock_slots();
        let node = slots.get_mut(id)?;
        let slot = match kind {
            CallbackKind::Active => &mut node.on_active,
            CallbackKind::Done => &mut node.on_done,
            CallbackKind::Gc => &mut node.on_gc,
        };
        if slot.is_some() {
            return Err(OpError::CallbackAlreadySet(id));
        }
        *slot = Some(cb);
        Ok(())
    }

    pub(crate) fn active(self: &Arc<Self>, id: OpId) -> OpResult<()> {
        let on_active = {
            let mut slots = self.lock_slots();
            let node = slots.get_mut(id)?;
            if node.kind != OpKind::Normal {
                return Err(OpError::InvalidKind {
                    op: id,
                    expected: OpKind::Normal,
                    actual: node.kind,
                });
            }
            node.expect_state(id, INIT)?;
            node.state = OpState::Active;
            node.callback(CallbackKind::Active)
        };
        if let Some(cb) = on_active {
            cb(&self.handle(id));
        }
        Ok(())
    }

    pub(crate) fn done(self: &Arc<Self>, id: OpId) -> OpResult<()> {
        self.complete(id, true)
    }

    pub(crate) fn make_set(self: &Arc<Self>, id: OpId, kind: OpKind) -> OpResult<()> {
        debug_assert!(kind.is_set());
        let on_active = {
            let mut slots = self.lock_slots();
            let node = slots.get_mut(id)?;
            if node.kind != OpKind::Normal {
                return Err(OpError::InvalidKind {
                    op: id,
                    expected: OpKind::Normal,
                    actual: node.kind,
                });
            }
            node.expect_state(id, INIT)?;
            node.kind = kind;
            node.state = OpState::Active;
            node.callback(CallbackKind::Active)
        };
        if let Some(cb) = on_active {
            cb(&self.handle(id));
        }
        Ok(())
    }

    pub(crate) fn set_add(&self, parent: OpId, child: OpId) -> OpResult<()> {
        if parent == child {
            return Err(OpError::SelfAttach(parent));
        }
        let mut slots = self.lock_slots();
        let set = slots.get(parent)?;
        if !set.kind.is_set() {
            return Err(OpError::NotSetKind(parent));
        }
        if set.state == OpState::Done || set.triggered_by.is_some() {
            return Err(OpError::ParentDone(parent));
        }
        if set.addition_finished {
            return Err(OpError::AdditionFinished(parent));
        }
        let node = slots.get_mut(child)?;
        if let Some(existing) = node.parent {
            return Err(OpError::AlreadyAttached {
                child,
                parent: existing,
            });
        }
        node.parent = Some(parent);
        slots.get_mut(parent)?.children.push(child);
        Ok(())
    }

    pub(crate) fn set_add_finish(self: &Arc<Self>, parent: OpId) -> OpResult<()> {
        let triggered = {
            let mut slots = self.lock_slots();
            let set = slots.get_mut(parent)?;
            if !set.kind.is_set() {
                return Err(OpError::NotSetKind(parent));
            }
            if set.state == OpState::Done || set.triggered_by.is_some() {
                return Err(OpError::ParentDone(parent));
            }
            if set.addition_finished {
                return Err(OpError::AdditionFinished(parent));
            }
            if set.children.is_empty() {
                return Err(OpError::EmptySet(parent));
            }
            set.addition_finished = true;

            // Children that completed before addition finished are still
            // linked; their completion is consumed here.
            let children = set.children.clone();
            let mut triggered = false;
            for child in children {
                let settled = slots
                    .get(child)
                    .map(|node| node.state == OpState::Done && node.settled)
                    .unwrap_or(false);
                if settled && slots.propagate(child, parent).is_some() {
                    triggered = true;
                    break;
                }
            }
            triggered
        };
        if triggered {
            self.complete(parent, false)?;
        }
        Ok(())
    }

    /// Completes `first` and every set it triggers
    fn complete(self: &Arc<Self>, first: OpId, require_normal: bool) -> OpResult<()> {
        let mut pending = vec![first];
        let mut gc_callbacks: Vec<(OpCallback, OpId)> = Vec::new();
        let mut check_kind = require_normal;

        while let Some(id) = pending.pop() {
            let on_done = {
                let mut slots = self.lock_slots();
                let node = slots.get_mut(id)?;
                if check_kind && node.kind != OpKind::Normal {
                    return Err(OpError::InvalidKind {
                        op: id,
                        expected: OpKind::Normal,
                        actual: node.kind,
                    });
                }
                node.expect_state(id, ACTIVE)?;
                node.state = OpState::Done;
                node.completer = Some(thread::current().id());
                let on_done = node.callback(CallbackKind::Done);
                // OR sets detach the children that did not trigger them
                if node.kind.is_set() {
                    slots.orphan_children(id);
                }
                on_done
            };
            check_kind = false;

            if let Some(cb) = on_done {
                cb(&self.handle(id));
            }

            let on_gc = {
                let mut slots = self.lock_slots();
                let node = slots.get_mut(id)?;
                node.settled = true;
                node.completer = None;
                let parent = node.parent;
                let release = node.release_on_settle;
                let on_gc = node.callback(CallbackKind::Gc);
                if let Some(parent) = parent {
                    if let Some(triggered) = slots.propagate(id, parent) {
                        pending.push(triggered);
                    }
                }
                if release {
                    slots.unlink(id);
                    slots.orphan_children(id);
                    let _ = slots.remove(id);
                }
                self.settled.notify_all();
                on_gc
            };
            if let Some(cb) = on_gc {
                gc_callbacks.push((cb, id));
            }
        }

        // Innermost last: a triggered set is collected before its trigger
        for (cb, id) in gc_callbacks.into_iter().rev() {
            cb(&self.handle(id));
        }
        Ok(())
    }

    pub(crate) fn wait(&self, id: OpId) -> OpResult<()> {
        let mut slots = self.lock_slots();
        loop {
            let node = slots.get(id)?;
            if node.state == OpState::Done && node.settled {
                return Ok(());
            }
            slots = self
                .settled
                .wait(slots)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub(crate) fn rc_set(&self, id: OpId, rc: i32) -> OpResult<()> {
        let mut slots = self.lock_slots();
        let node = slots.get_mut(id)?;
        node.expect_state(id, ACTIVE)?;
        if node.rc.is_some() {
            return Err(OpError::RcAlreadySet(id));
        }
        node.rc = Some(rc);
        Ok(())
    }

    pub(crate) fn rc(&self, id: OpId) -> OpResult<i32> {
        let slots = self.lock_slots();
        let node = slots.get(id)?;
        node.expect_state(id, DONE)?;
        node.rc.ok_or(OpError::RcNotSet(id))
    }

    pub(crate) fn state(&self, id: OpId) -> OpResult<OpState> {
        self.lock_slots().get(id).map(|node| node.state)
    }

    pub(crate) fn kind(&self, id: OpId) -> OpResult<OpKind> {
        self.lock_slots().get(id).map(|node| node.kind)
    }

    pub(crate) fn triggered_by(&self, id: OpId) -> OpResult<Option<OpId>> {
        self.lock_slots().get(id).map(|node| node.triggered_by)
    }

    pub(crate) fn parent(&self, id: OpId) -> OpResult<Option<OpId>> {
        self.lock_slots().get(id).map(|node| node.parent)
    }

    pub(crate) fn children(&self, id: OpId) -> OpResult<Vec<OpId>> {
        self.lock_slots().get(id).map(|node| node.children.clone())
    }

    pub(crate) fn lock(&self, id: OpId) -> OpResult<OpGuard<'_>> {
        let slots = self.lock_slots();
        slots.get(id)?;
        Ok(OpGuard { slots, id })
    }

    pub(crate) fn is_locked(&self) -> bool {
        matches!(self.slots.try_lock(), Err(TryLockError::WouldBlock))
    }
}

/// Read access to an op while its arena lock is held
///
/// No other op of the same arena can change state while the guard
/// lives. Calling into the arena from the holding thread deadlocks.
pub struct OpGuard<'a> {
    slots: MutexGuard<'a, Slots>,
    id: OpId,
}

impl OpGuard<'_> {
    fn node(&self) -> &Node {
        // Existence was checked when the guard was taken and the lock is
        // still held.
        match self.slots.get(self.id) {
            Ok(node) => node,
            Err(_) => unreachable!("op released while its lock is held"),
        }
    }

    /// Current state
    pub fn state(&self) -> OpState {
        self.node().state
    }

    /// Current kind
    pub fn kind(&self) -> OpKind {
        self.node().kind
    }

    /// Result code, if set
    pub fn rc(&self) -> Option<i32> {
        self.node().rc
    }

    /// Set this op belongs to
    pub fn parent(&self) -> Option<OpId> {
        self.node().parent
    }

    /// Children still linked to this set
    pub fn children(&self) -> &[OpId] {
        &self.node().children
    }

    /// Child whose completion triggered this set
    pub fn triggered_by(&self) -> Option<OpId> {
        self.node().triggered_by
    }
}
