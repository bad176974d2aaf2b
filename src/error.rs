//! Error handling for lanscore
//!
//! Discovery and probing failures propagate to the caller with the external
//! tool's diagnostic text preserved verbatim. Enrichment lookups (vendor,
//! hostname) never surface errors; they collapse to empty strings at the call
//! site and only use [`ScanError::LookupFailure`] internally.

use std::time::Duration;
use thiserror::Error;

/// Main error type for discovery, probing and configuration
#[derive(Debug, Error)]
pub enum ScanError {
    /// External binary is absent
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Hard wall-clock limit exceeded
    #[error("Scan timed out: {0}")]
    ScanTimeout(String),

    /// No output progress within the stall window
    #[error("Scan stalled: no output from {target} for {idle:?}")]
    ScanStalled { target: String, idle: Duration },

    /// Tool exited non-zero; carries the tool's stderr
    #[error("{0}")]
    ToolExecutionError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Lookup failed: {0}")]
    LookupFailure(String),

    #[error("Invalid option: {0}")]
    InvalidOption(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// A pool worker panicked or was cancelled before reporting
    #[error("Worker failed: {0}")]
    WorkerFailed(String),
}

impl ScanError {
    /// Short machine-readable kind, used in JSON reports
    pub fn kind(&self) -> &'static str {
        match self {
            ScanError::ToolNotFound(_) => "tool_not_found",
            ScanError::ScanTimeout(_) => "scan_timeout",
            ScanError::ScanStalled { .. } => "scan_stalled",
            ScanError::ToolExecutionError(_) => "tool_execution_error",
            ScanError::ParseError(_) => "parse_error",
            ScanError::LookupFailure(_) => "lookup_failure",
            ScanError::InvalidOption(_) => "invalid_option",
            ScanError::ConfigError(_) => "config_error",
            ScanError::IoError(_) => "io_error",
            ScanError::WorkerFailed(_) => "worker_failed",
        }
    }

    /// Whether the error came from the external tool itself rather than from
    /// supervision or configuration
    pub fn is_tool_failure(&self) -> bool {
        matches!(
            self,
            ScanError::ToolExecutionError(_) | ScanError::ParseError(_)
        )
    }
}

impl From<quick_xml::Error> for ScanError {
    fn from(err: quick_xml::Error) -> Self {
        ScanError::ParseError(err.to_string())
    }
}
