//! CLI command implementations
//!
//! `run` wires the pieces together the way an embedding engine would:
//! lanes from `LocalityPool`, transactions from `MemLog`, one producer
//! thread per partition feeding `TxBulk`, and a work type that captures
//! each item's bytes into its transaction.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::bulk::{placement, BulkWork, Placement, TxBulk, WorkerContext};
use crate::credit::TxCredit;
use crate::errno;
use crate::locality::{LocalityPool, Scheduler};
use crate::memlog::{MemLog, MemLogStats};
use crate::observability::{log_event_with_fields, Event, Logger, MetricsSnapshot};
use crate::op::{Op, OpHandle, OpResult};
use crate::tx::{Transaction, TxEngine};

use super::args::Command;
use super::config::Config;
use super::errors::{CliError, CliResult};
use super::io::{write_error, write_response};

/// Run a CLI command
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Init { config } => init(&config),
        Command::Run { config } => run(&config),
        Command::Placement {
            workers,
            partitions,
            localities,
        } => show_placement(workers, partitions, localities),
    }
}

/// Write the default configuration to `config_path`
///
/// Refuses to overwrite an existing file.
pub fn init(config_path: &Path) -> CliResult<()> {
    if config_path.exists() {
        return Err(CliError::already_exists(config_path.display()));
    }
    let content = serde_json::to_string_pretty(&Config::default())?;
    fs::write(config_path, content).map_err(|e| {
        CliError::io_error(format!(
            "Failed to write config {}: {}",
            config_path.display(),
            e
        ))
    })?;

    write_response(json!({ "config": config_path.display().to_string() }))
}

/// Print the worker placement as JSON
pub fn show_placement(workers: usize, partitions: usize, localities: usize) -> CliResult<()> {
    if workers == 0 || partitions == 0 || localities == 0 {
        return Err(CliError::config_error(
            "workers, partitions and localities must be > 0",
        ));
    }
    write_response(json!({ "placements": placement(workers, partitions, localities) }))
}

/// Run the configured workload and print its report
///
/// A run whose pool failed still prints the report, as an error
/// response, and ends with a non-zero exit.
pub fn run(config_path: &Path) -> CliResult<()> {
    let config = Config::load(config_path)?;
    let report = run_workload(&config)?;
    let data = serde_json::to_value(&report)?;

    if report.rc == errno::OK {
        write_response(data)
    } else {
        let err = CliError::run_failed(format!(
            "pool stopped with rc {} ({})",
            report.rc, report.rc_name
        ));
        write_error(err.code_str(), err.message(), data)?;
        Err(err)
    }
}

/// Outcome of one workload run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub pool_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_ms: i64,
    pub rc: i32,
    pub rc_name: &'static str,
    pub items_submitted: u64,
    pub items_rejected: u64,
    pub items_done: u64,
    pub bytes_captured: u64,
    pub metrics: MetricsSnapshot,
    pub log: MemLogStats,
    pub log_verified: bool,
    pub placements: Vec<Placement>,
}

/// One synthetic work item
#[derive(Debug)]
pub struct WorkItem {
    pub data: Vec<u8>,
    pub payload: Vec<u8>,
}

/// Captures every item as one region at a running offset
#[derive(Debug, Default)]
pub struct CaptureWork {
    next_offset: AtomicU64,
    bytes: AtomicU64,
    done: AtomicU64,
}

impl CaptureWork {
    /// Bytes captured so far
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Items whose transaction became persistent
    pub fn done_count(&self) -> u64 {
        self.done.load(Ordering::Relaxed)
    }
}

fn complete(op: &OpHandle, rc: i32) -> OpResult<()> {
    op.active()?;
    op.rc_set(rc)?;
    op.done()
}

impl BulkWork for Arc<CaptureWork> {
    type Item = WorkItem;

    fn execute(
        &self,
        tx: &mut dyn Transaction,
        item: &mut WorkItem,
        _ctx: &WorkerContext,
        op: &OpHandle,
    ) {
        let len = item.data.len() as u64;
        let offset = self.next_offset.fetch_add(len, Ordering::Relaxed);
        let mut result = tx.capture(offset, &item.data);
        if result.is_ok() && !item.payload.is_empty() {
            result = tx.capture_payload(&item.payload);
        }
        let rc = match result {
            Ok(()) => {
                self.bytes.fetch_add(len, Ordering::Relaxed);
                errno::OK
            }
            Err(e) => e.rc(),
        };
        if let Err(e) = complete(op, rc) {
            log_event_with_fields(
                Event::BulkItemFailed,
                &[("error", &e.to_string()), ("op", &op.id().to_string())],
            );
        }
    }

    fn done(&self, _item: WorkItem, _ctx: &WorkerContext) {
        self.done.fetch_add(1, Ordering::Relaxed);
    }
}

/// Runs the configured workload to completion
pub fn run_workload(config: &Config) -> CliResult<RunReport> {
    Logger::set_min_severity(config.log_level);
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();

    let lanes = match config.localities {
        0 => LocalityPool::with_available_parallelism(),
        n => LocalityPool::new(n),
    }
    .map_err(|e| CliError::start_failed(e.to_string()))?;
    let scheduler: Arc<dyn Scheduler> = Arc::new(lanes);
    let log = Arc::new(
        MemLog::start(config.memlog_config()).map_err(|e| CliError::start_failed(e.to_string()))?,
    );
    let engine: Arc<dyn TxEngine> = log.clone();
    let work = Arc::new(CaptureWork::default());

    let pool = TxBulk::new(config.bulk_config(), Arc::clone(&work), engine, scheduler)
        .map_err(|e| CliError::start_failed(e.to_string()))?;
    let run_op = Op::new();
    pool.run(&run_op)
        .map_err(|e| CliError::start_failed(e.to_string()))?;

    let (submitted, rejected) = produce(&pool, config)?;

    pool.end().map_err(|e| CliError::run_failed(e.to_string()))?;
    run_op
        .wait()
        .map_err(|e| CliError::run_failed(e.to_string()))?;
    let rc = run_op.rc().unwrap_or(errno::EIO);
    let _ = run_op.fini();

    let finished_at = Utc::now();
    let report = RunReport {
        run_id,
        pool_id: pool.id(),
        started_at,
        finished_at,
        elapsed_ms: (finished_at - started_at).num_milliseconds(),
        rc,
        rc_name: errno::name(rc),
        items_submitted: submitted,
        items_rejected: rejected,
        items_done: work.done_count(),
        bytes_captured: work.bytes(),
        metrics: pool.metrics(),
        log: log.stats(),
        log_verified: log.verify(),
        placements: pool.placements().to_vec(),
    };
    pool.fini().map_err(|e| CliError::run_failed(e.to_string()))?;

    log_event_with_fields(
        Event::RunComplete,
        &[
            ("elapsed_ms", &report.elapsed_ms.to_string()),
            ("items_done", &report.items_done.to_string()),
            ("rc", &rc.to_string()),
            ("run_id", &run_id.to_string()),
        ],
    );
    Ok(report)
}

/// Puts the workload's items, one producer thread per partition
///
/// Item `i` goes to partition `i % partitions`. A producer stops at its
/// first rejected put. Returns (submitted, rejected).
fn produce(pool: &TxBulk<Arc<CaptureWork>>, config: &Config) -> CliResult<(u64, u64)> {
    let partitions = config.partitions as u64;
    let results: Vec<CliResult<(u64, u64)>> = thread::scope(|scope| {
        let producers: Vec<_> = (0..partitions)
            .map(|partition| {
                scope.spawn(move || -> CliResult<(u64, u64)> {
                    let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(partition));
                    let mut submitted = 0;
                    for _ in (partition..config.items).step_by(config.partitions) {
                        let len = rng.gen_range(1..=config.item_bytes_max);
                        let item = WorkItem {
                            data: (0..len).map(|_| rng.gen()).collect(),
                            payload: vec![0; config.item_payload as usize],
                        };
                        let op = Op::new();
                        let accepted = pool
                            .put(
                                &op,
                                TxCredit::of_bytes(len),
                                config.item_payload,
                                partition as usize,
                                item,
                            )
                            .map_err(|e| CliError::run_failed(e.to_string()))?;
                        op.wait()
                            .map_err(|e| CliError::run_failed(e.to_string()))?;
                        let _ = op.fini();
                        submitted += 1;
                        if !accepted {
                            return Ok((submitted, 1));
                        }
                    }
                    Ok((submitted, 0))
                })
            })
            .collect();
        producers
            .into_iter()
            .map(|producer| {
                producer
                    .join()
                    .unwrap_or_else(|_| Err(CliError::run_failed("producer panicked")))
            })
            .collect()
    });

    let mut totals = (0, 0);
    for result in results {
        let (submitted, rejected) = result?;
        totals.0 += submitted;
        totals.1 += rejected;
    }
    Ok(totals)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> Config {
        Config {
            workers: 2,
            partitions: 2,
            items_per_tx_max: 8,
            localities: 2,
            items: 200,
            item_bytes_max: 64,
            ..Config::default()
        }
    }

    #[test]
    fn test_run_workload_completes() {
        let report = run_workload(&small_config()).unwrap();
        assert_eq!(report.rc, errno::OK);
        assert_eq!(report.items_submitted, 200);
        assert_eq!(report.items_rejected, 0);
        assert_eq!(report.items_done, 200);
        assert_eq!(report.metrics.items_done, 200);
        assert_eq!(report.metrics.tx_opened, report.log.committed);
        assert!(report.metrics.largest_batch <= 8);
        assert!(report.log_verified);
    }

    #[test]
    fn test_run_workload_reports_open_failure() {
        let config = Config {
            fail_open_at: Some(1),
            ..small_config()
        };
        let report = run_workload(&config).unwrap();
        assert_eq!(report.rc, errno::ENOSPC);
        assert_eq!(report.rc_name, "ENOSPC");
        assert_eq!(report.metrics.tx_open_failed, 1);
    }

    #[test]
    fn test_oversized_item_fails_open_with_e2big() {
        let config = Config {
            workers: 1,
            partitions: 1,
            localities: 1,
            items: 1,
            item_bytes_max: 64,
            tx_bytes_max: 8,
            ..Config::default()
        };
        let report = run_workload(&config).unwrap();
        // The single item draws between 1 and 64 bytes
        if report.metrics.tx_open_failed == 1 {
            assert_eq!(report.rc, errno::E2BIG);
            assert_eq!(report.items_done, 0);
        } else {
            assert_eq!(report.rc, errno::OK);
            assert_eq!(report.items_done, 1);
        }
    }
}
