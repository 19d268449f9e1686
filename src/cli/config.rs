//! Configuration file for the `run` command
//!
//! Every field has a default, so `{}` is a valid configuration.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::bulk::BulkConfig;
use crate::credit::TxCredit;
use crate::memlog::{FailurePlan, MemLogConfig};
use crate::observability::{log_event_with_fields, Event, Severity};
use crate::queue::QueueConfig;

use super::errors::{CliError, CliResult};

/// Workload, pool and log settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Number of workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Number of partitions
    #[serde(default = "default_partitions")]
    pub partitions: usize,

    /// Most items batched into one transaction
    #[serde(default = "default_items_per_tx_max")]
    pub items_per_tx_max: usize,

    /// Items a partition queue holds before producers park
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Producers that may be parked on one partition
    #[serde(default = "default_producers_max")]
    pub producers_max: usize,

    /// Locality lanes; 0 means one per available CPU
    #[serde(default)]
    pub localities: usize,

    /// Items submitted by the workload
    #[serde(default = "default_items")]
    pub items: u64,

    /// Largest captured region per item; sizes are drawn from 1..=max
    #[serde(default = "default_item_bytes_max")]
    pub item_bytes_max: u64,

    /// Payload bytes per item
    #[serde(default)]
    pub item_payload: u64,

    /// Region limit of one transaction
    #[serde(default = "default_tx_regions_max")]
    pub tx_regions_max: u64,

    /// Byte limit of one transaction
    #[serde(default = "default_tx_bytes_max")]
    pub tx_bytes_max: u64,

    /// Payload limit of one transaction
    #[serde(default = "default_payload_max")]
    pub payload_max: u64,

    /// Most transactions flushed as one group
    #[serde(default = "default_group_max")]
    pub group_max: usize,

    /// Seed for item sizes
    #[serde(default)]
    pub seed: u64,

    /// Make the n-th transaction open fail (1-based)
    #[serde(default)]
    pub fail_open_at: Option<u64>,

    /// Minimum severity written to the log
    #[serde(default = "default_log_level")]
    pub log_level: Severity,
}

fn default_workers() -> usize {
    4
}
fn default_partitions() -> usize {
    4
}
fn default_items_per_tx_max() -> usize {
    32
}
fn default_queue_capacity() -> usize {
    64
}
fn default_producers_max() -> usize {
    8
}
fn default_items() -> u64 {
    10_000
}
fn default_item_bytes_max() -> u64 {
    256
}
fn default_tx_regions_max() -> u64 {
    256
}
fn default_tx_bytes_max() -> u64 {
    1 << 20
} // 1MB
fn default_payload_max() -> u64 {
    64 * 1024
}
fn default_group_max() -> usize {
    64
}
fn default_log_level() -> Severity {
    Severity::Warn
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            partitions: default_partitions(),
            items_per_tx_max: default_items_per_tx_max(),
            queue_capacity: default_queue_capacity(),
            producers_max: default_producers_max(),
            localities: 0,
            items: default_items(),
            item_bytes_max: default_item_bytes_max(),
            item_payload: 0,
            tx_regions_max: default_tx_regions_max(),
            tx_bytes_max: default_tx_bytes_max(),
            payload_max: default_payload_max(),
            group_max: default_group_max(),
            seed: 0,
            fail_open_at: None,
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> CliResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| CliError::config_error(format!("Failed to read config: {}", e)))?;

        let config: Config = serde_json::from_str(&content)
            .map_err(|e| CliError::config_error(format!("Invalid config JSON: {}", e)))?;

        config.validate()?;

        log_event_with_fields(
            Event::ConfigLoaded,
            &[
                ("partitions", &config.partitions.to_string()),
                ("path", &path.display().to_string()),
                ("workers", &config.workers.to_string()),
            ],
        );
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> CliResult<()> {
        self.bulk_config()
            .validate()
            .map_err(|e| CliError::config_error(e.to_string()))?;
        self.memlog_config()
            .validate()
            .map_err(|e| CliError::config_error(e.to_string()))?;

        if self.item_bytes_max == 0 {
            return Err(CliError::config_error("item_bytes_max must be > 0"));
        }
        if self.fail_open_at == Some(0) {
            return Err(CliError::config_error("fail_open_at is 1-based"));
        }
        Ok(())
    }

    /// Pool configuration
    pub fn bulk_config(&self) -> BulkConfig {
        BulkConfig {
            workers: self.workers,
            partitions: self.partitions,
            items_per_tx_max: self.items_per_tx_max,
            queue: QueueConfig::new(self.queue_capacity, self.producers_max, self.workers),
        }
    }

    /// Log configuration
    pub fn memlog_config(&self) -> MemLogConfig {
        MemLogConfig {
            tx_size_max: TxCredit::new(self.tx_regions_max, self.tx_bytes_max),
            payload_max: self.payload_max,
            group_max: self.group_max,
            fail_open: self
                .fail_open_at
                .map(FailurePlan::NthOpen)
                .unwrap_or(FailurePlan::Never),
        }
    }
}
