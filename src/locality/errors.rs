//! Locality error types

use std::io;

use thiserror::Error;

/// Result type for locality operations
pub type LocalityResult<T> = Result<T, LocalityError>;

/// Locality errors
#[derive(Debug, Error)]
pub enum LocalityError {
    /// A pool needs at least one lane
    #[error("Locality pool needs at least one lane")]
    NoLanes,

    /// Lane runtime or thread could not be created
    #[error("Failed to start lane {lane}: {source}")]
    Spawn {
        lane: usize,
        #[source]
        source: io::Error,
    },
}

impl LocalityError {
    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            LocalityError::NoLanes => "AERO_TX_LOCALITY_CONFIG",
            LocalityError::Spawn { .. } => "AERO_TX_LOCALITY_SPAWN",
        }
    }
}
