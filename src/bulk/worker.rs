//! Worker state and steps

use std::mem;
use std::sync::{Arc, MutexGuard, PoisonError};

use super::placement::Placement;
use super::pool::{BulkShared, BulkState};
use super::{BulkItem, BulkWork, WorkerContext};
use crate::errno;
use crate::observability::{event_enabled, log_event_with_fields, Event};
use crate::op::{CallbackKind, Op, OpHandle, OpResult, OpState};
use crate::queue::QueueSlot;
use crate::tx::{Transaction, TxError, TxResult};

/// Continuation a worker runs next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Step {
    Fetch,
    Init,
    Close,
    Gc,
    Finish,
}

impl Step {
    fn as_str(&self) -> &'static str {
        match self {
            Step::Fetch => "fetch",
            Step::Init => "init",
            Step::Close => "close",
            Step::Gc => "gc",
            Step::Finish => "finish",
        }
    }
}

pub(super) struct Worker<T> {
    pub(super) items: Vec<BulkItem<T>>,
    pub(super) tx: Option<Box<dyn Transaction>>,
    pub(super) tx_id: Option<u64>,
    pub(super) rc: i32,
    pub(super) done: bool,
    /// Reused across fetches; its DONE callback schedules the next step
    pub(super) fetch_op: Op,
    pub(super) slot: QueueSlot<BulkItem<T>>,
}

impl<T> Worker<T> {
    pub(super) fn new(items_per_tx_max: usize) -> Self {
        Self {
            items: Vec::with_capacity(items_per_tx_max),
            tx: None,
            tx_id: None,
            rc: errno::OK,
            done: false,
            fetch_op: Op::new(),
            slot: QueueSlot::new(),
        }
    }
}

/// Brings a completed fetch op back to INIT
fn recycle(op: &OpHandle) -> OpResult<()> {
    if op.state()? != OpState::Init {
        // The get may still be finishing on the producer's thread
        op.wait()?;
        op.reset()?;
    }
    Ok(())
}

impl<W: BulkWork> BulkShared<W> {
    pub(super) fn lock_state(&self) -> MutexGuard<'_, BulkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn lock_worker(&self, index: usize) -> MutexGuard<'_, Worker<W::Item>> {
        self.workers[index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn failed(&self) -> bool {
        self.lock_state().tx_failed
    }

    fn context(&self, index: usize, tx_id: u64) -> WorkerContext {
        let Placement {
            worker,
            partition,
            locality,
        } = self.placements[index];
        WorkerContext {
            worker,
            partition,
            locality,
            tx_id,
        }
    }

    /// Makes every worker's fetch op schedule `init` or `finish` on
    /// completion
    pub(super) fn install_callbacks(self: &Arc<Self>) -> OpResult<()> {
        for index in 0..self.workers.len() {
            let worker = self.lock_worker(index);
            let weak = Arc::downgrade(self);
            let slot = worker.slot.clone();
            worker.fetch_op.callback_set(CallbackKind::Done, move |_| {
                if let Some(shared) = weak.upgrade() {
                    // An empty slot means the queue was closed and drained
                    let next = if slot.is_filled() {
                        Step::Init
                    } else {
                        Step::Finish
                    };
                    shared.schedule(index, next);
                }
            })?;
        }
        Ok(())
    }

    /// Posts `step` for worker `index` onto its home lane
    pub(super) fn schedule(self: &Arc<Self>, index: usize, step: Step) {
        let lane = self.placements[index].locality;
        let shared = Arc::clone(self);
        self.scheduler
            .post(lane, Box::new(move || shared.run_step(index, step)));
    }

    fn run_step(self: &Arc<Self>, index: usize, step: Step) {
        if event_enabled(Event::BulkWorkerStep) {
            log_event_with_fields(
                Event::BulkWorkerStep,
                &[("step", step.as_str()), ("worker", &index.to_string())],
            );
        }
        match step {
            Step::Fetch => self.fetch(index),
            Step::Init => self.init(index),
            Step::Close => self.close(index),
            Step::Gc => self.gc(index),
            Step::Finish => self.finish(index),
        }
    }

    fn fetch(self: &Arc<Self>, index: usize) {
        if self.failed() {
            return self.finish(index);
        }
        let partition = self.placements[index].partition;
        let prepared = {
            let worker = self.lock_worker(index);
            recycle(&worker.fetch_op).map(|()| (worker.fetch_op.handle(), worker.slot.clone()))
        };
        let result = match prepared {
            Ok((op, slot)) => self.queues[partition]
                .lock()
                .get(&op, &slot)
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(reason) = result {
            self.fail_worker(index, errno::EIO, &reason);
        }
    }

    fn init(self: &Arc<Self>, index: usize) {
        let first = self.lock_worker(index).slot.take();
        let Some(first) = first else {
            return self.finish(index);
        };
        if self.failed() {
            // The item was fetched after the pool failed; it never runs
            self.metrics.add_items_abandoned(1);
            return self.finish(index);
        }

        let partition = self.placements[index].partition;
        let mut credit = first.credit;
        let mut payload = first.payload;
        let mut batch = vec![first];
        {
            let mut queue = self.queues[partition].lock();
            while batch.len() < self.config.items_per_tx_max {
                let stop = match queue.peek() {
                    None => true,
                    Some(next) => {
                        self.engine.should_break(&credit, &next.credit)
                            || self.engine.payload_should_break(payload, next.payload)
                    }
                };
                if stop {
                    break;
                }
                match queue.try_get() {
                    Ok(Some(item)) => {
                        credit += item.credit;
                        payload = payload.saturating_add(item.payload);
                        batch.push(item);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        log_event_with_fields(
                            Event::BulkItemFailed,
                            &[("error", &e.to_string()), ("worker", &index.to_string())],
                        );
                        break;
                    }
                }
            }
        }

        self.metrics.record_batch(batch.len() as u64);
        if event_enabled(Event::BulkBatchOpen) {
            log_event_with_fields(
                Event::BulkBatchOpen,
                &[
                    ("credit", &credit.to_string()),
                    ("items", &batch.len().to_string()),
                    ("payload", &payload.to_string()),
                    ("worker", &index.to_string()),
                ],
            );
        }
        self.lock_worker(index).items = batch;

        let shared = Arc::clone(self);
        self.engine.open(
            credit,
            payload,
            Box::new(move |result| shared.opened(index, result)),
        );
    }

    fn opened(self: &Arc<Self>, index: usize, result: TxResult<Box<dyn Transaction>>) {
        match result {
            Ok(tx) => {
                self.metrics.increment_tx_opened();
                {
                    let mut worker = self.lock_worker(index);
                    worker.tx_id = Some(tx.id());
                    worker.tx = Some(tx);
                }
                self.schedule(index, Step::Close);
            }
            Err(e) => self.open_failed(index, e),
        }
    }

    fn open_failed(self: &Arc<Self>, index: usize, error: TxError) {
        self.metrics.increment_tx_open_failed();
        self.tx_failed(index, Event::TxOpenFailed, error);
    }

    /// Stops the whole pool after a transaction failed
    ///
    /// The worker's batch is abandoned, every partition is drained and
    /// the worker finishes with the error's result code.
    fn tx_failed(self: &Arc<Self>, index: usize, event: Event, error: TxError) {
        let rc = error.rc();
        log_event_with_fields(
            event,
            &[
                ("error", &error.to_string()),
                ("pool", &self.id.to_string()),
                ("rc", &rc.to_string()),
                ("worker", &index.to_string()),
            ],
        );

        self.lock_state().tx_failed = true;
        let abandoned = {
            let mut worker = self.lock_worker(index);
            if worker.rc == errno::OK {
                worker.rc = rc;
            }
            let abandoned = worker.items.len();
            worker.items.clear();
            abandoned
        };
        self.metrics.add_items_abandoned(abandoned as u64);
        self.drain_queues();
        self.schedule(index, Step::Finish);
    }

    fn close(self: &Arc<Self>, index: usize) {
        let (tx, mut items) = {
            let mut worker = self.lock_worker(index);
            (worker.tx.take(), mem::take(&mut worker.items))
        };
        let Some(mut tx) = tx else {
            return self.fail_worker(index, errno::EIO, "close without an open transaction");
        };

        let ctx = self.context(index, tx.id());
        for item in &mut items {
            let op = Op::new();
            self.work.execute(&mut *tx, &mut item.item, &ctx, &op);
            let rc = match op.wait() {
                Ok(()) => op.rc().unwrap_or(errno::OK),
                Err(_) => errno::EIO,
            };
            if rc != errno::OK {
                log_event_with_fields(
                    Event::BulkItemFailed,
                    &[
                        ("rc", &rc.to_string()),
                        ("tx", &ctx.tx_id.to_string()),
                        ("worker", &index.to_string()),
                    ],
                );
            }
            self.metrics.increment_items_executed();
            if let Err(e) = op.fini() {
                log_event_with_fields(
                    Event::BulkItemFailed,
                    &[("error", &e.to_string()), ("worker", &index.to_string())],
                );
            }
        }

        self.lock_worker(index).items = items;
        let shared = Arc::clone(self);
        tx.close(Box::new(move |result| shared.persistent(index, result)));
    }

    fn persistent(self: &Arc<Self>, index: usize, result: TxResult<u64>) {
        let tx_id = match result {
            Ok(tx_id) => tx_id,
            Err(e) => {
                self.metrics.increment_tx_close_failed();
                return self.tx_failed(index, Event::TxCloseFailed, e);
            }
        };
        self.metrics.increment_tx_persistent();
        if event_enabled(Event::TxPersistent) {
            log_event_with_fields(
                Event::TxPersistent,
                &[("tx", &tx_id.to_string()), ("worker", &index.to_string())],
            );
        }
        self.schedule(index, Step::Gc);
    }

    fn gc(self: &Arc<Self>, index: usize) {
        let (items, tx_id) = {
            let mut worker = self.lock_worker(index);
            (mem::take(&mut worker.items), worker.tx_id.take())
        };
        let ctx = self.context(index, tx_id.unwrap_or_default());
        for item in items {
            self.work.done(item.item, &ctx);
            self.metrics.increment_items_done();
        }
        self.fetch(index);
    }

    fn fail_worker(self: &Arc<Self>, index: usize, rc: i32, reason: &str) {
        log_event_with_fields(
            Event::BulkItemFailed,
            &[
                ("error", reason),
                ("rc", &rc.to_string()),
                ("worker", &index.to_string()),
            ],
        );
        {
            let mut worker = self.lock_worker(index);
            if worker.rc == errno::OK {
                worker.rc = rc;
            }
        }
        self.finish(index);
    }

    /// Takes every resident item out of every partition and closes it
    ///
    /// Parked producers complete; parked consumers complete empty.
    /// Calling it again does nothing.
    pub(super) fn drain_queues(&self) {
        for (partition, queue) in self.queues.iter().enumerate() {
            let mut guard = queue.lock();
            let drained = guard.drain();
            let ended = guard.end();
            drop(guard);

            match drained {
                Ok(items) if !items.is_empty() => {
                    self.metrics.add_items_abandoned(items.len() as u64);
                    log_event_with_fields(
                        Event::QueueDrained,
                        &[
                            ("items", &items.len().to_string()),
                            ("partition", &partition.to_string()),
                        ],
                    );
                }
                Ok(_) => {}
                Err(e) => log_event_with_fields(
                    Event::QueueDrained,
                    &[("error", &e.to_string()), ("partition", &partition.to_string())],
                ),
            }
            if let Err(e) = ended {
                log_event_with_fields(
                    Event::QueueDrained,
                    &[("error", &e.to_string()), ("partition", &partition.to_string())],
                );
            }
        }
    }

    fn finish(self: &Arc<Self>, index: usize) {
        let completion = {
            let mut state = self.lock_state();
            let mut worker = self.lock_worker(index);
            if worker.done {
                return;
            }
            worker.done = true;
            state.finished += 1;
            if state.rc == errno::OK && worker.rc != errno::OK {
                state.rc = worker.rc;
            }
            log_event_with_fields(
                Event::BulkWorkerFinished,
                &[
                    ("finished", &state.finished.to_string()),
                    ("rc", &worker.rc.to_string()),
                    ("worker", &index.to_string()),
                ],
            );
            debug_assert!(state.finished <= self.workers.len());
            if state.finished == self.workers.len() {
                state.done = true;
                state.running = false;
                state.run_op.take().map(|op| (op, state.rc))
            } else {
                None
            }
        };

        if let Some((op, rc)) = completion {
            self.drain_queues();
            log_event_with_fields(
                Event::BulkComplete,
                &[
                    ("metrics", &self.metrics.to_json()),
                    ("pool", &self.id.to_string()),
                    ("rc", &rc.to_string()),
                ],
            );
            if let Err(e) = op.rc_set(rc).and_then(|()| op.done()) {
                log_event_with_fields(
                    Event::BulkItemFailed,
                    &[("error", &e.to_string()), ("pool", &self.id.to_string())],
                );
            }
        }
    }
}
