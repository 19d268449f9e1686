//! The bulk pool

use std::fmt;
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use super::config::BulkConfig;
use super::errors::{BulkError, BulkResult};
use super::placement::{placement, Placement};
use super::worker::{Step, Worker};
use super::{BulkItem, BulkWork};
use crate::credit::TxCredit;
use crate::errno;
use crate::locality::Scheduler;
use crate::observability::{log_event_with_fields, BulkMetrics, Event, MetricsSnapshot};
use crate::op::OpHandle;
use crate::queue::{BoundedQueue, QueueError, QueueResult};
use crate::tx::TxEngine;

#[derive(Debug, Default)]
pub(super) struct BulkState {
    pub(super) running: bool,
    pub(super) ended: bool,
    pub(super) tx_failed: bool,
    pub(super) finished: usize,
    pub(super) done: bool,
    pub(super) rc: i32,
    pub(super) run_op: Option<OpHandle>,
}

pub(super) struct BulkShared<W: BulkWork> {
    pub(super) id: Uuid,
    pub(super) config: BulkConfig,
    pub(super) work: W,
    pub(super) engine: Arc<dyn TxEngine>,
    pub(super) scheduler: Arc<dyn Scheduler>,
    pub(super) placements: Vec<Placement>,
    pub(super) queues: Vec<BoundedQueue<BulkItem<W::Item>>>,
    pub(super) workers: Vec<Mutex<Worker<W::Item>>>,
    pub(super) state: Mutex<BulkState>,
    pub(super) metrics: BulkMetrics,
}

/// Multi-worker batching transaction pool
///
/// # Example
///
/// ```ignore
/// let pool = TxBulk::new(config, work, engine, scheduler)?;
/// let run = Op::new();
/// pool.run(&run)?;
/// for item in items {
///     Op::sync(|op| {
///         pool.put(op, credit, 0, partition, item).ok();
///     })?;
/// }
/// pool.end()?;
/// run.wait()?;
/// pool.status()?;
/// pool.fini()?;
/// ```
pub struct TxBulk<W: BulkWork> {
    shared: Arc<BulkShared<W>>,
}

impl<W: BulkWork> TxBulk<W> {
    /// Builds the pool: partition queues, placement and workers
    ///
    /// Nothing runs until `run`. Items may be put before that.
    pub fn new(
        config: BulkConfig,
        work: W,
        engine: Arc<dyn TxEngine>,
        scheduler: Arc<dyn Scheduler>,
    ) -> BulkResult<Self> {
        config.validate()?;
        let localities = scheduler.lanes();
        let placements = placement(config.workers, config.partitions, localities);
        if placements.len() != config.workers {
            return Err(BulkError::InvalidConfig(format!(
                "cannot place {} workers on {} localities",
                config.workers, localities
            )));
        }

        let queue_config = config.partition_queue();
        let queues = (0..config.partitions)
            .map(|_| BoundedQueue::new(queue_config))
            .collect::<QueueResult<Vec<_>>>()?;
        let workers = (0..config.workers)
            .map(|_| Mutex::new(Worker::new(config.items_per_tx_max)))
            .collect();

        let shared = Arc::new(BulkShared {
            id: Uuid::new_v4(),
            config,
            work,
            engine,
            scheduler,
            placements,
            queues,
            workers,
            state: Mutex::new(BulkState::default()),
            metrics: BulkMetrics::new(),
        });
        shared.install_callbacks()?;

        log_event_with_fields(
            Event::BulkInit,
            &[
                ("localities", &localities.to_string()),
                ("partitions", &config.partitions.to_string()),
                ("pool", &shared.id.to_string()),
                ("workers", &config.workers.to_string()),
            ],
        );
        Ok(Self { shared })
    }

    /// Pool identifier used in log lines
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// Configuration the pool was built with
    pub fn config(&self) -> &BulkConfig {
        &self.shared.config
    }

    /// Partition and locality of every worker
    pub fn placements(&self) -> &[Placement] {
        &self.shared.placements
    }

    /// Starts every worker
    ///
    /// `op` is activated now and completes once every worker has
    /// finished, with the pool's result code. Its ACTIVE callback runs
    /// without the pool lock held.
    pub fn run(&self, op: &OpHandle) -> BulkResult<()> {
        {
            let mut state = self.shared.lock_state();
            if state.running || state.done {
                return Err(BulkError::AlreadyRunning);
            }
            state.running = true;
        }
        if let Err(e) = op.active() {
            self.shared.lock_state().running = false;
            return Err(e.into());
        }
        // No worker is scheduled yet, so nothing can finish before this
        self.shared.lock_state().run_op = Some(op.clone());

        log_event_with_fields(
            Event::BulkRunBegin,
            &[
                ("pool", &self.shared.id.to_string()),
                ("workers", &self.shared.workers.len().to_string()),
            ],
        );
        for index in 0..self.shared.workers.len() {
            self.shared.schedule(index, Step::Fetch);
        }
        Ok(())
    }

    /// Queues `item` on `partition`
    ///
    /// `op` completes once the item is stored; it stays ACTIVE while the
    /// partition is full. Returns `Ok(false)` when the pool already
    /// failed: `op` is completed and the item is dropped.
    pub fn put(
        &self,
        op: &OpHandle,
        credit: TxCredit,
        payload: u64,
        partition: usize,
        item: W::Item,
    ) -> BulkResult<bool> {
        let queue = self
            .shared
            .queues
            .get(partition)
            .ok_or(BulkError::InvalidPartition {
                partition,
                partitions: self.shared.queues.len(),
            })?;
        if self.shared.failed() {
            return self.reject(op, partition);
        }

        let item = BulkItem {
            item,
            credit,
            payload,
        };
        let result = queue.lock().put(op, item);
        match result {
            Ok(()) => {
                self.shared.metrics.increment_items_accepted();
                Ok(true)
            }
            // Failed between the check and the put
            Err(QueueError::Closed) if self.shared.failed() => self.reject(op, partition),
            Err(e) => Err(e.into()),
        }
    }

    fn reject(&self, op: &OpHandle, partition: usize) -> BulkResult<bool> {
        op.active_done()?;
        self.shared.metrics.increment_items_rejected();
        log_event_with_fields(
            Event::BulkPutRejected,
            &[
                ("partition", &partition.to_string()),
                ("pool", &self.shared.id.to_string()),
            ],
        );
        Ok(false)
    }

    /// Closes every partition
    ///
    /// Workers finish once their partition is drained. Ending an ended
    /// pool does nothing.
    pub fn end(&self) -> BulkResult<()> {
        {
            let mut state = self.shared.lock_state();
            if state.ended {
                return Ok(());
            }
            state.ended = true;
        }
        for queue in &self.shared.queues {
            queue.lock().end()?;
        }
        log_event_with_fields(Event::BulkEnd, &[("pool", &self.shared.id.to_string())]);
        Ok(())
    }

    /// Outcome of a finished pool
    pub fn status(&self) -> BulkResult<()> {
        match self.rc()? {
            errno::OK => Ok(()),
            rc => Err(BulkError::TxOpenFailed { rc }),
        }
    }

    /// Result code of a finished pool
    pub fn rc(&self) -> BulkResult<i32> {
        let state = self.shared.lock_state();
        if !state.done {
            return Err(BulkError::NotFinished);
        }
        Ok(state.rc)
    }

    /// Whether a transaction open failed
    pub fn is_failed(&self) -> bool {
        self.shared.failed()
    }

    /// Current counters
    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Finalizes a pool that is not running
    ///
    /// Fails when workers are still running or a partition still holds
    /// items.
    pub fn fini(self) -> BulkResult<()> {
        if self.shared.lock_state().running {
            return Err(BulkError::NotFinished);
        }
        for queue in &self.shared.queues {
            let guard = queue.lock();
            if !guard.is_empty() {
                return Err(QueueError::NotDrained {
                    remaining: guard.enqueued() - guard.dequeued(),
                }
                .into());
            }
        }
        Ok(())
    }
}

impl<W: BulkWork> Drop for TxBulk<W> {
    fn drop(&mut self) {
        // Parked workers finish and complete the run op
        let _ = self.end();
    }
}

impl<W: BulkWork> fmt::Debug for TxBulk<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxBulk")
            .field("id", &self.shared.id)
            .field("config", &self.shared.config)
            .field("state", &*self.shared.lock_state())
            .finish()
    }
}
