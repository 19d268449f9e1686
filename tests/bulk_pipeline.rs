//! Bulk Pipeline Tests
//!
//! Drives `TxBulk` end to end on locality lanes against the in-memory log:
//! - Batches stop exactly where the engine's break predicate says
//! - `done` runs once per item, in put order within a partition
//! - Every transaction holds items of a single partition
//! - Every committed record verifies

use aerotx::bulk::{BulkConfig, BulkWork, TxBulk, WorkerContext};
use aerotx::credit::TxCredit;
use aerotx::errno;
use aerotx::locality::{LocalityPool, Scheduler};
use aerotx::memlog::{MemLog, MemLogConfig};
use aerotx::op::{Op, OpHandle};
use aerotx::queue::QueueConfig;
use aerotx::tx::{Transaction, TxEngine};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

// =============================================================================
// Test Utilities
// =============================================================================

const ITEM_BYTES: usize = 101;

#[derive(Debug)]
struct TestItem {
    index: usize,
    partition: usize,
    data: Vec<u8>,
}

/// Records where each item ran and where it completed
#[derive(Clone, Default)]
struct Recorder {
    executed: Arc<Mutex<Vec<(usize, WorkerContext)>>>,
    done: Arc<Mutex<Vec<(usize, usize, WorkerContext)>>>,
}

impl Recorder {
    fn executed(&self) -> Vec<(usize, WorkerContext)> {
        self.executed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn done(&self) -> Vec<(usize, usize, WorkerContext)> {
        self.done
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl BulkWork for Recorder {
    type Item = TestItem;

    fn execute(
        &self,
        tx: &mut dyn Transaction,
        item: &mut TestItem,
        ctx: &WorkerContext,
        op: &OpHandle,
    ) {
        let offset = (item.index * ITEM_BYTES) as u64;
        let rc = match tx.capture(offset, &item.data) {
            Ok(()) => errno::OK,
            Err(e) => e.rc(),
        };
        self.executed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((item.index, *ctx));
        op.active().unwrap();
        op.rc_set(rc).unwrap();
        op.done().unwrap();
    }

    fn done(&self, item: TestItem, ctx: &WorkerContext) {
        self.done
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((item.index, item.partition, *ctx));
    }
}

fn start_log(regions: u64, bytes: u64) -> Arc<MemLog> {
    Arc::new(
        MemLog::start(MemLogConfig {
            tx_size_max: TxCredit::new(regions, bytes),
            ..MemLogConfig::default()
        })
        .expect("start log"),
    )
}

fn item(index: usize, partition: usize) -> TestItem {
    TestItem {
        index,
        partition,
        data: vec![(index % 251) as u8; ITEM_BYTES],
    }
}

fn put(pool: &TxBulk<Recorder>, item: TestItem) {
    let op = Op::new();
    let partition = item.partition;
    let accepted = pool
        .put(
            &op,
            TxCredit::of_bytes(ITEM_BYTES as u64),
            0,
            partition,
            item,
        )
        .expect("put");
    assert!(accepted);
    op.wait().expect("wait put");
    op.fini().expect("fini put");
}

fn finish(pool: &TxBulk<Recorder>, run_op: Op) -> i32 {
    pool.end().expect("end");
    run_op.wait().expect("wait run");
    let rc = run_op.rc().expect("run rc");
    run_op.fini().expect("fini run");
    rc
}

// =============================================================================
// Batching
// =============================================================================

#[test]
fn test_items_batched_by_engine_limit() {
    const ITEMS: usize = 10;
    let lanes = LocalityPool::new(2).unwrap();
    let scheduler: Arc<dyn Scheduler> = Arc::new(lanes);
    // Three items of 101 bytes overflow 300 bytes, two do not
    let log = start_log(100, 300);
    let engine: Arc<dyn TxEngine> = log.clone();
    let work = Recorder::default();

    let pool = TxBulk::new(
        BulkConfig::new(1, 1, 10),
        work.clone(),
        engine,
        scheduler,
    )
    .unwrap();
    for index in 0..ITEMS {
        put(&pool, item(index, 0));
    }

    let run_op = Op::new();
    pool.run(&run_op).unwrap();
    assert_eq!(finish(&pool, run_op), errno::OK);
    pool.status().unwrap();

    let done = work.done();
    let order: Vec<usize> = done.iter().map(|(index, _, _)| *index).collect();
    assert_eq!(order, (0..ITEMS).collect::<Vec<_>>());

    let mut by_tx: BTreeMap<u64, Vec<usize>> = BTreeMap::new();
    for (index, _, ctx) in &done {
        by_tx.entry(ctx.tx_id).or_default().push(*index);
    }
    let batches: Vec<Vec<usize>> = by_tx.into_values().collect();
    assert_eq!(
        batches,
        vec![vec![0, 1], vec![2, 3], vec![4, 5], vec![6, 7], vec![8, 9]]
    );

    let records = log.records();
    assert_eq!(records.len(), 5);
    for (record, batch) in records.iter().zip(&batches) {
        assert!(record.verify());
        let offsets: Vec<u64> = record.regions.iter().map(|r| r.offset).collect();
        let expected: Vec<u64> = batch.iter().map(|i| (i * ITEM_BYTES) as u64).collect();
        assert_eq!(offsets, expected);
    }

    let metrics = pool.metrics();
    assert_eq!(metrics.tx_opened, 5);
    assert_eq!(metrics.items_done, ITEMS as u64);
    assert_eq!(metrics.largest_batch, 2);
    pool.fini().unwrap();
}

#[test]
fn test_item_cap_limits_batches() {
    let scheduler: Arc<dyn Scheduler> = Arc::new(LocalityPool::new(1).unwrap());
    let log = start_log(1000, 1 << 20);
    let engine: Arc<dyn TxEngine> = log.clone();
    let work = Recorder::default();

    let pool = TxBulk::new(BulkConfig::new(1, 1, 3), work.clone(), engine, scheduler).unwrap();
    for index in 0..7 {
        put(&pool, item(index, 0));
    }
    let run_op = Op::new();
    pool.run(&run_op).unwrap();
    assert_eq!(finish(&pool, run_op), errno::OK);

    let sizes: Vec<usize> = log.records().iter().map(|r| r.regions.len()).collect();
    assert_eq!(sizes, vec![3, 3, 1]);
    assert_eq!(work.done().len(), 7);
    pool.fini().unwrap();
}

// =============================================================================
// Concurrent Producers
// =============================================================================

#[test]
fn test_concurrent_producers_delivered_exactly_once() {
    const WORKERS: usize = 6;
    const PARTITIONS: usize = 3;
    const PER_PARTITION: usize = 200;

    let scheduler: Arc<dyn Scheduler> = Arc::new(LocalityPool::new(3).unwrap());
    let log = start_log(16, 4096);
    let engine: Arc<dyn TxEngine> = log.clone();
    let work = Recorder::default();
    let config = BulkConfig {
        workers: WORKERS,
        partitions: PARTITIONS,
        items_per_tx_max: 8,
        queue: QueueConfig::new(4, 1, WORKERS),
    };

    let pool = Arc::new(TxBulk::new(config, work.clone(), engine, scheduler).unwrap());
    let run_op = Op::new();
    pool.run(&run_op).unwrap();

    let producers: Vec<_> = (0..PARTITIONS)
        .map(|partition| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                for seq in 0..PER_PARTITION {
                    put(&pool, item(partition * PER_PARTITION + seq, partition));
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }
    assert_eq!(finish(&pool, run_op), errno::OK);

    let done = work.done();
    assert_eq!(done.len(), PARTITIONS * PER_PARTITION);
    let unique: HashSet<usize> = done.iter().map(|(index, _, _)| *index).collect();
    assert_eq!(unique.len(), PARTITIONS * PER_PARTITION);

    // A transaction never mixes partitions and is served by the
    // partition's own worker
    let mut tx_partition: BTreeMap<u64, usize> = BTreeMap::new();
    for (_, partition, ctx) in &done {
        assert_eq!(*partition, ctx.partition);
        assert_eq!(pool.placements()[ctx.worker].partition, *partition);
        let seen = *tx_partition.entry(ctx.tx_id).or_insert(*partition);
        assert_eq!(seen, *partition);
    }

    assert_eq!(work.executed().len(), PARTITIONS * PER_PARTITION);
    assert!(log.verify());
    assert_eq!(log.records().len() as u64, pool.metrics().tx_opened);
    assert!(pool.metrics().largest_batch <= 8);

    let pool = Arc::try_unwrap(pool).expect("sole owner");
    pool.fini().unwrap();
}
