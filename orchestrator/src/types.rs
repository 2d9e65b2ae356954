//! Error definitions and shared result types for the sweep orchestrator
//!
//! Every fallible operation in the crate returns [`BenchResult`]. The error
//! variants mirror the failure classes an operator cares about: a bad sweep
//! configuration, a cluster that never came up, a broken result file, or a
//! subprocess that could not run.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use thiserror::Error;

/// Result type for orchestrator operations
pub type BenchResult<T> = Result<T, BenchError>;

/// Error taxonomy of the orchestrator
#[derive(Error, Debug)]
pub enum BenchError {
    #[error("Initialization error: {0}")]
    Initialization(String),

    /// Malformed or unsupported sweep/template configuration
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Cluster did not accept connections within the bound
    #[error("Deployment timeout: {pending:?} not listening after {timeout_secs}s")]
    DeploymentTimeout {
        pending: Vec<String>,
        timeout_secs: u64,
    },

    /// Benchmark client produced a result that fails validation
    #[error("Invalid benchmark result: {0}")]
    InvalidResult(String),

    /// A server or client subprocess could not start or exited abnormally
    #[error("Process failure ({program}): {message}")]
    ProcessFailure { program: String, message: String },

    #[error("Interrupted by operator")]
    Interrupted,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BenchError {
    pub fn process(program: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProcessFailure {
            program: program.into(),
            message: message.into(),
        }
    }

    /// Whether the error must stop the whole sweep rather than a single descriptor
    #[must_use]
    pub const fn aborts_sweep(&self) -> bool {
        matches!(self, Self::Interrupted | Self::Io(_) | Self::Json(_))
    }
}

/// Shared operator-interrupt flag
///
/// Set from the signal handler, polled by the sweep loop and by every
/// blocking wait so that in-flight clusters are torn down before exit.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Returns `Interrupted` once the flag is set
    pub fn check(&self) -> BenchResult<()> {
        if self.is_triggered() {
            Err(BenchError::Interrupted)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aborts_sweep() {
        assert!(BenchError::Interrupted.aborts_sweep());
        assert!(BenchError::Io(std::io::Error::other("disk full")).aborts_sweep());
        assert!(!BenchError::InvalidConfig("x".into()).aborts_sweep());
        assert!(!BenchError::InvalidResult("x".into()).aborts_sweep());
        assert!(!BenchError::DeploymentTimeout {
            pending: vec!["127.0.0.1:1".into()],
            timeout_secs: 20
        }
        .aborts_sweep());
    }

    #[test]
    fn test_stop_flag_shared_between_clones() {
        let flag = StopFlag::new();
        let handler_side = flag.clone();
        assert!(flag.check().is_ok());
        handler_side.trigger();
        assert!(matches!(flag.check(), Err(BenchError::Interrupted)));
    }

    #[test]
    fn test_display_names_endpoint() {
        let err = BenchError::DeploymentTimeout {
            pending: vec!["127.0.0.1:4242".into()],
            timeout_secs: 20,
        };
        let msg = err.to_string();
        assert!(msg.contains("127.0.0.1:4242"));
        assert!(msg.contains("20s"));
    }
}
