//! Queue configuration

use serde::{Deserialize, Serialize};

use super::errors::{QueueError, QueueResult};

/// Configuration for a bounded queue.
///
/// The item type fixes the item size, so only counts are configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Logical capacity. A put onto a queue holding this many items
    /// parks the producer.
    pub capacity: usize,
    /// Maximum number of producers parked at once. Each gets a spare
    /// slot so its item is stored even though the queue is full.
    pub producers_max: usize,
    /// Maximum number of consumers parked at once.
    pub consumers_max: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 64,
            producers_max: 8,
            consumers_max: 8,
        }
    }
}

impl QueueConfig {
    /// Create a config with explicit limits.
    pub fn new(capacity: usize, producers_max: usize, consumers_max: usize) -> Self {
        Self {
            capacity,
            producers_max,
            consumers_max,
        }
    }

    /// Total preallocated item slots.
    pub fn slots(&self) -> usize {
        self.capacity.saturating_add(self.producers_max)
    }

    /// Rejects zero limits.
    pub fn validate(&self) -> QueueResult<()> {
        if self.capacity == 0 {
            return Err(QueueError::InvalidConfig("capacity must be > 0".into()));
        }
        if self.producers_max == 0 {
            return Err(QueueError::InvalidConfig("producers_max must be > 0".into()));
        }
        if self.consumers_max == 0 {
            return Err(QueueError::InvalidConfig("consumers_max must be > 0".into()));
        }
        Ok(())
    }
}
