//! CLI-specific error types
//!
//! All CLI errors end the process with exit code 1.

use std::fmt;
use std::io;

/// CLI error codes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliErrorCode {
    /// Configuration file error
    ConfigError,
    /// I/O error (files, stdout)
    IoError,
    /// Refused to overwrite an existing config
    AlreadyExists,
    /// Pool, log or lanes could not be started
    StartFailed,
    /// Workload ran but the pool reported a failure
    RunFailed,
}

impl CliErrorCode {
    /// Get the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigError => "AERO_TX_CLI_CONFIG_ERROR",
            Self::IoError => "AERO_TX_CLI_IO_ERROR",
            Self::AlreadyExists => "AERO_TX_CLI_ALREADY_EXISTS",
            Self::StartFailed => "AERO_TX_CLI_START_FAILED",
            Self::RunFailed => "AERO_TX_CLI_RUN_FAILED",
        }
    }
}

/// CLI error
#[derive(Debug)]
pub struct CliError {
    code: CliErrorCode,
    message: String,
}

impl CliError {
    /// Create a new CLI error
    pub fn new(code: CliErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Config error
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::ConfigError, msg)
    }

    /// I/O error
    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::IoError, msg)
    }

    /// Config file already present
    pub fn already_exists(path: impl fmt::Display) -> Self {
        Self::new(
            CliErrorCode::AlreadyExists,
            format!("Config file already exists: {}", path),
        )
    }

    /// Start failed
    pub fn start_failed(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::StartFailed, msg)
    }

    /// Run failed
    pub fn run_failed(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::RunFailed, msg)
    }

    /// Get the error code
    pub fn code(&self) -> &CliErrorCode {
        &self.code
    }

    /// Get the error code string
    pub fn code_str(&self) -> &'static str {
        self.code.code()
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.code(), self.message)
    }
}

impl std::error::Error for CliError {}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        Self::io_error(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        Self::io_error(format!("JSON error: {}", e))
    }
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;
