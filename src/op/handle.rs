//! Owning and non-owning op handles

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use super::arena::{OpArena, OpGuard};
use super::errors::{OpError, OpResult};
use super::{CallbackKind, OpCallback, OpId, OpKind, OpState};

/// Non-owning reference to an op
///
/// Cloning a handle never extends the op's lifetime; the `Op` owner
/// decides when it is finalized.
#[derive(Clone)]
pub struct OpHandle {
    arena: Arc<OpArena>,
    id: OpId,
}

impl OpHandle {
    pub(crate) fn new(arena: Arc<OpArena>, id: OpId) -> Self {
        Self { arena, id }
    }

    /// Identifier of the op
    pub fn id(&self) -> OpId {
        self.id
    }

    /// Arena the op lives in
    pub fn arena(&self) -> &Arc<OpArena> {
        &self.arena
    }

    /// INIT -> ACTIVE, fires `on_active`
    pub fn active(&self) -> OpResult<()> {
        self.arena.active(self.id)
    }

    /// ACTIVE -> DONE for a NORMAL op, fires `on_done`, notifies the
    /// parent set and fires `on_gc`
    pub fn done(&self) -> OpResult<()> {
        self.arena.done(self.id)
    }

    /// `active()` followed by `done()`
    pub fn active_done(&self) -> OpResult<()> {
        self.active()?;
        self.done()
    }

    /// Returns a DONE op to INIT, dropping set links and the result code
    ///
    /// Callbacks are kept.
    pub fn reset(&self) -> OpResult<()> {
        self.arena.reset(self.id)
    }

    /// Blocks until the op is DONE and its `on_done` callback returned
    pub fn wait(&self) -> OpResult<()> {
        self.arena.wait(self.id)
    }

    /// Turns an INIT op into an ACTIVE AND set
    pub fn make_set_and(&self) -> OpResult<()> {
        self.arena.make_set(self.id, OpKind::SetAnd)
    }

    /// Turns an INIT op into an ACTIVE OR set
    pub fn make_set_or(&self) -> OpResult<()> {
        self.arena.make_set(self.id, OpKind::SetOr)
    }

    /// Adds `child` to this set
    pub fn set_add(&self, child: &OpHandle) -> OpResult<()> {
        if !Arc::ptr_eq(&self.arena, &child.arena) {
            return Err(OpError::ForeignArena(child.id));
        }
        self.arena.set_add(self.id, child.id)
    }

    /// Declares that no more children will be added
    ///
    /// Children that already completed are accounted immediately, so
    /// the set may complete inside this call.
    pub fn set_add_finish(&self) -> OpResult<()> {
        self.arena.set_add_finish(self.id)
    }

    /// Sets the result code; once per ACTIVE period
    pub fn rc_set(&self, rc: i32) -> OpResult<()> {
        self.arena.rc_set(self.id, rc)
    }

    /// Result code of a DONE op
    pub fn rc(&self) -> OpResult<i32> {
        self.arena.rc(self.id)
    }

    /// Registers a callback; each slot can be set once
    pub fn callback_set<F>(&self, kind: CallbackKind, cb: F) -> OpResult<()>
    where
        F: Fn(&OpHandle) + Send + Sync + 'static,
    {
        let cb: OpCallback = Arc::new(cb);
        self.arena.callback_set(self.id, kind, cb)
    }

    /// Current state
    pub fn state(&self) -> OpResult<OpState> {
        self.arena.state(self.id)
    }

    /// Current kind
    pub fn kind(&self) -> OpResult<OpKind> {
        self.arena.kind(self.id)
    }

    /// True once DONE
    pub fn is_done(&self) -> bool {
        matches!(self.state(), Ok(OpState::Done))
    }

    /// Child that completed this set
    pub fn triggered_by(&self) -> OpResult<Option<OpId>> {
        self.arena.triggered_by(self.id)
    }

    /// Set this op is currently linked to
    pub fn parent(&self) -> OpResult<Option<OpId>> {
        self.arena.parent(self.id)
    }

    /// Children still linked to this set
    pub fn children(&self) -> OpResult<Vec<OpId>> {
        self.arena.children(self.id)
    }

    /// Takes the op's serialization lock
    ///
    /// The lock is shared by every op of the arena.
    pub fn lock(&self) -> OpResult<OpGuard<'_>> {
        self.arena.lock(self.id)
    }

    /// Whether the op's lock is currently held by anyone
    pub fn is_locked(&self) -> bool {
        self.arena.is_locked()
    }
}

impl PartialEq for OpHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && Arc::ptr_eq(&self.arena, &other.arena)
    }
}

impl Eq for OpHandle {}

impl fmt::Debug for OpHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OpHandle({})", self.id)
    }
}

/// Owning op
///
/// Dropping an `Op` finalizes it. An op dropped while ACTIVE is first
/// driven through DONE so that its set and callbacks observe a
/// completion.
pub struct Op {
    handle: OpHandle,
    released: bool,
}

impl Op {
    /// New INIT op in the process-wide arena
    pub fn new() -> Self {
        Self::in_arena(OpArena::global())
    }

    /// New INIT op in `arena`
    pub fn in_arena(arena: &Arc<OpArena>) -> Self {
        let id = arena.alloc();
        Self {
            handle: OpHandle::new(Arc::clone(arena), id),
            released: false,
        }
    }

    /// Non-owning handle to this op
    pub fn handle(&self) -> OpHandle {
        self.handle.clone()
    }

    /// Finalizes the op; it must be INIT or DONE
    ///
    /// A DONE op whose completion is still dispatching on another thread
    /// is waited for. Called from the op's own `on_done`, the op is
    /// removed as soon as its set has been notified.
    pub fn fini(mut self) -> OpResult<()> {
        self.handle.arena.release(self.handle.id)?;
        self.released = true;
        Ok(())
    }

    /// Runs `action` with a fresh op and waits for it to complete
    pub fn sync<F>(action: F) -> OpResult<()>
    where
        F: FnOnce(&OpHandle),
    {
        let op = Op::new();
        action(&op);
        op.wait()?;
        op.fini()
    }

    /// Like `sync`, returning the op's result code
    pub fn sync_rc<F>(action: F) -> OpResult<i32>
    where
        F: FnOnce(&OpHandle),
    {
        let op = Op::new();
        action(&op);
        op.wait()?;
        let rc = op.rc();
        op.fini()?;
        rc
    }
}

impl Default for Op {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for Op {
    type Target = OpHandle;

    fn deref(&self) -> &OpHandle {
        &self.handle
    }
}

impl fmt::Debug for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Op({})", self.handle.id)
    }
}

impl Drop for Op {
    fn drop(&mut self) {
        if !self.released {
            self.handle.arena.abandon(self.handle.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::thread;

    fn arena_op(arena: &Arc<OpArena>) -> Op {
        Op::in_arena(arena)
    }

    // ==================== State Machine Tests ====================

    #[test]
    fn test_normal_lifecycle() {
        let op = Op::new();
        assert_eq!(op.state().unwrap(), OpState::Init);
        op.active().unwrap();
        assert_eq!(op.state().unwrap(), OpState::Active);
        op.done().unwrap();
        assert!(op.is_done());
        op.wait().unwrap();
        op.fini().unwrap();
    }

    #[test]
    fn test_done_requires_active() {
        let op = Op::new();
        let err = op.done().unwrap_err();
        assert!(matches!(
            err,
            OpError::InvalidState {
                actual: OpState::Init,
                ..
            }
        ));
    }

    #[test]
    fn test_done_twice_is_rejected() {
        let op = Op::new();
        op.active_done().unwrap();
        assert!(matches!(
            op.done().unwrap_err(),
            OpError::InvalidState {
                actual: OpState::Done,
                ..
            }
        ));
    }

    #[test]
    fn test_fini_active_is_rejected() {
        let arena = OpArena::new();
        let op = arena_op(&arena);
        op.active().unwrap();
        let handle = op.handle();
        assert!(op.fini().is_err());
        // the failed fini dropped the op, which forced it through DONE
        assert!(matches!(handle.state(), Err(OpError::StaleHandle(_))));
        assert_eq!(arena.live(), 0);
    }

    #[test]
    fn test_reset_recycles_op() {
        let op = Op::new();
        op.active().unwrap();
        op.rc_set(-5).unwrap();
        op.done().unwrap();
        assert_eq!(op.rc().unwrap(), -5);

        op.reset().unwrap();
        assert_eq!(op.state().unwrap(), OpState::Init);
        op.active().unwrap();
        op.done().unwrap();
        assert_eq!(op.rc().unwrap_err(), OpError::RcNotSet(op.id()));
    }

    #[test]
    fn test_reset_active_is_rejected() {
        let op = Op::new();
        op.active().unwrap();
        assert!(op.reset().is_err());
        op.done().unwrap();
    }

    // ==================== Result Code Tests ====================

    #[test]
    fn test_rc_set_once() {
        let op = Op::new();
        op.active().unwrap();
        op.rc_set(0).unwrap();
        assert_eq!(op.rc_set(1).unwrap_err(), OpError::RcAlreadySet(op.id()));
        op.done().unwrap();
    }

    #[test]
    fn test_rc_requires_done() {
        let op = Op::new();
        op.active().unwrap();
        op.rc_set(3).unwrap();
        assert!(op.rc().is_err());
        op.done().unwrap();
        assert_eq!(op.rc().unwrap(), 3);
    }

    #[test]
    fn test_rc_set_requires_active() {
        let op = Op::new();
        assert!(op.rc_set(1).is_err());
    }

    // ==================== Callback Tests ====================

    #[test]
    fn test_callbacks_fire_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let op = Op::new();
        for (kind, name) in [
            (CallbackKind::Active, "active"),
            (CallbackKind::Done, "done"),
            (CallbackKind::Gc, "gc"),
        ] {
            let log = Arc::clone(&log);
            op.callback_set(kind, move |_| log.lock().unwrap().push(name))
                .unwrap();
        }
        op.active_done().unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["active", "done", "gc"]);
    }

    #[test]
    fn test_callback_set_twice_is_rejected() {
        let op = Op::new();
        op.callback_set(CallbackKind::Done, |_| {}).unwrap();
        assert_eq!(
            op.callback_set(CallbackKind::Done, |_| {}).unwrap_err(),
            OpError::CallbackAlreadySet(op.id())
        );
    }

    #[test]
    fn test_callbacks_survive_reset() {
        let count = Arc::new(AtomicUsize::new(0));
        let op = Op::new();
        let c = Arc::clone(&count);
        op.callback_set(CallbackKind::Done, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        for _ in 0..3 {
            op.active_done().unwrap();
            op.reset().unwrap();
        }
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_gc_callback_may_finalize_op() {
        let arena = OpArena::new();
        let slot: Arc<Mutex<Option<Op>>> = Arc::new(Mutex::new(None));
        let op = arena_op(&arena);
        let s = Arc::clone(&slot);
        op.callback_set(CallbackKind::Gc, move |_| {
            if let Some(op) = s.lock().unwrap().take() {
                op.fini().unwrap();
            }
        })
        .unwrap();
        let handle = op.handle();
        *slot.lock().unwrap() = Some(op);

        handle.active_done().unwrap();
        assert_eq!(arena.live(), 0);
    }

    #[test]
    fn test_fini_waits_for_completion_on_other_thread() {
        let arena = OpArena::new();
        let set = arena_op(&arena);
        set.make_set_and().unwrap();
        let child = arena_op(&arena);
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        child
            .callback_set(CallbackKind::Done, move |_| {
                entered_tx.send(()).unwrap();
                thread::sleep(std::time::Duration::from_millis(50));
            })
            .unwrap();
        child.active().unwrap();
        set.set_add(&child).unwrap();
        set.set_add_finish().unwrap();

        let handle = child.handle();
        let completer = thread::spawn(move || handle.done());
        entered_rx.recv().unwrap();
        assert!(child.is_done());

        // on_done is still sleeping; fini returns once the set was notified
        child.fini().unwrap();
        assert!(set.is_done());
        completer.join().unwrap().unwrap();
        set.fini().unwrap();
        assert_eq!(arena.live(), 0);
    }

    #[test]
    fn test_fini_from_own_done_callback_notifies_set() {
        let arena = OpArena::new();
        let set = arena_op(&arena);
        set.make_set_and().unwrap();
        let slot: Arc<Mutex<Option<Op>>> = Arc::new(Mutex::new(None));
        let child = arena_op(&arena);
        let s = Arc::clone(&slot);
        child
            .callback_set(CallbackKind::Done, move |_| {
                if let Some(op) = s.lock().unwrap().take() {
                    op.fini().unwrap();
                }
            })
            .unwrap();
        child.active().unwrap();
        set.set_add(&child).unwrap();
        set.set_add_finish().unwrap();
        let handle = child.handle();
        *slot.lock().unwrap() = Some(child);

        handle.done().unwrap();
        assert!(set.is_done());
        assert_eq!(set.triggered_by().unwrap(), Some(handle.id()));
        assert!(matches!(handle.state(), Err(OpError::StaleHandle(_))));
        set.fini().unwrap();
        assert_eq!(arena.live(), 0);
    }

    // ==================== Wait Tests ====================

    #[test]
    fn test_wait_blocks_until_done() {
        let op = Op::new();
        op.active().unwrap();
        let handle = op.handle();
        let t = thread::spawn(move || {
            thread::sleep(std::time::Duration::from_millis(20));
            handle.rc_set(7).unwrap();
            handle.done().unwrap();
        });
        op.wait().unwrap();
        assert_eq!(op.rc().unwrap(), 7);
        t.join().unwrap();
    }

    #[test]
    fn test_sync_helpers() {
        Op::sync(|op| op.active_done().unwrap()).unwrap();
        let rc = Op::sync_rc(|op| {
            op.active().unwrap();
            op.rc_set(-28).unwrap();
            op.done().unwrap();
        })
        .unwrap();
        assert_eq!(rc, -28);
    }

    // ==================== Lock Tests ====================

    #[test]
    fn test_lock_guard() {
        let arena = OpArena::new();
        let op = arena_op(&arena);
        op.active().unwrap();
        {
            let guard = op.lock().unwrap();
            assert_eq!(guard.state(), OpState::Active);
            assert_eq!(guard.kind(), OpKind::Normal);
            assert!(op.is_locked());
        }
        assert!(!op.is_locked());
        op.done().unwrap();
    }

    // ==================== Handle Tests ====================

    #[test]
    fn test_stale_handle_after_fini() {
        let op = Op::new();
        let handle = op.handle();
        op.fini().unwrap();
        assert!(matches!(handle.active(), Err(OpError::StaleHandle(_))));
    }

    #[test]
    fn test_slot_reuse_bumps_generation() {
        let arena = OpArena::new();
        let first = arena_op(&arena);
        let stale = first.handle();
        first.fini().unwrap();

        let second = arena_op(&arena);
        assert_ne!(second.id(), stale.id());
        assert!(stale.state().is_err());
        assert_eq!(second.state().unwrap(), OpState::Init);
    }

    #[test]
    fn test_foreign_arena_rejected() {
        let a = OpArena::new();
        let b = OpArena::new();
        let set = arena_op(&a);
        let child = arena_op(&b);
        set.make_set_and().unwrap();
        assert!(matches!(
            set.set_add(&child),
            Err(OpError::ForeignArena(_))
        ));
    }
}
