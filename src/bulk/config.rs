//! Bulk pool configuration

use serde::{Deserialize, Serialize};

use super::errors::{BulkError, BulkResult};
use crate::queue::QueueConfig;

/// Configuration for a `TxBulk` pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkConfig {
    /// Number of workers.
    pub workers: usize,
    /// Number of partitions, each with its own queue.
    pub partitions: usize,
    /// Most items batched into one transaction.
    pub items_per_tx_max: usize,
    /// Per-partition queue limits. `consumers_max` is ignored: every
    /// partition queue admits one parked consumer per worker.
    pub queue: QueueConfig,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            partitions: 4,
            items_per_tx_max: 32,
            queue: QueueConfig::default(),
        }
    }
}

impl BulkConfig {
    /// Create a config with explicit worker and partition counts.
    pub fn new(workers: usize, partitions: usize, items_per_tx_max: usize) -> Self {
        Self {
            workers,
            partitions,
            items_per_tx_max,
            queue: QueueConfig::default(),
        }
    }

    /// Queue config used for every partition.
    pub fn partition_queue(&self) -> QueueConfig {
        QueueConfig {
            consumers_max: self.workers,
            ..self.queue
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> BulkResult<()> {
        if self.workers == 0 {
            return Err(BulkError::InvalidConfig("workers must be > 0".into()));
        }
        if self.partitions == 0 {
            return Err(BulkError::InvalidConfig("partitions must be > 0".into()));
        }
        if self.partitions > self.workers {
            return Err(BulkError::InvalidConfig(format!(
                "partitions ({}) must not exceed workers ({})",
                self.partitions, self.workers
            )));
        }
        if self.items_per_tx_max == 0 {
            return Err(BulkError::InvalidConfig(
                "items_per_tx_max must be > 0".into(),
            ));
        }
        self.partition_queue().validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QueueError;

    #[test]
    fn test_default_is_valid() {
        assert!(BulkConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partition_queue_derives_consumers() {
        let mut config = BulkConfig::new(6, 2, 8);
        config.queue.consumers_max = 1;
        let queue = config.partition_queue();
        assert_eq!(queue.consumers_max, 6);
        assert_eq!(queue.capacity, config.queue.capacity);
    }

    #[test]
    fn test_rejects_bad_counts() {
        assert!(BulkConfig::new(0, 1, 1).validate().is_err());
        assert!(BulkConfig::new(1, 0, 1).validate().is_err());
        assert!(BulkConfig::new(2, 3, 1).validate().is_err());
        assert!(BulkConfig::new(2, 2, 0).validate().is_err());
    }

    #[test]
    fn test_rejects_bad_queue() {
        let mut config = BulkConfig::new(2, 2, 4);
        config.queue.capacity = 0;
        assert!(matches!(
            config.validate(),
            Err(BulkError::Queue(QueueError::InvalidConfig(_)))
        ));
    }

    #[test]
    fn test_serde_roundtrip() {
        let config = BulkConfig::new(8, 2, 16);
        let json = serde_json::to_string(&config).unwrap();
        let parsed: BulkConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }
}
