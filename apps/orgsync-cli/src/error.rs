//! CLI error types and exit codes

use orgsync_engine::{BackendError, ConfigError, SyncError};
use thiserror::Error;

/// Exit codes for the CLI
/// - 0: Success
/// - 1: General error
/// - 2: Run completed with failures
/// - 3: Backend unavailable
/// - 4: Validation error
/// - 5: Ledger error
pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Could not load snapshot: {0}")]
    Snapshot(String),

    #[error("Synchronization failed: {0}")]
    Sync(#[from] SyncError),

    #[error("Synchronization finished with {0} failure(s)")]
    CompletedWithFailures(usize),

    #[error("Could not write report: {0}")]
    Output(String),
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e.to_string())
    }
}

impl From<BackendError> for CliError {
    fn from(e: BackendError) -> Self {
        CliError::Snapshot(e.to_string())
    }
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::CompletedWithFailures(_) => 2,
            CliError::Sync(SyncError::Backend(_)) => 3,
            CliError::Config(_)
            | CliError::Validation(_)
            | CliError::Snapshot(_)
            | CliError::Sync(SyncError::Configuration(_) | SyncError::Model(_)) => 4,
            CliError::Sync(SyncError::Ledger(_)) => 5,
            CliError::Sync(_) | CliError::Output(_) => 1,
        }
    }

    /// Print the error to stderr.
    pub fn print(&self) {
        if std::env::var("NO_COLOR").is_err() {
            eprintln!("\x1b[31mError:\x1b[0m {self}");
        } else {
            eprintln!("Error: {self}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_backend_unavailable() {
        let err = CliError::Sync(SyncError::Backend(BackendError::unavailable("down")));
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_exit_code_validation() {
        assert_eq!(CliError::Validation("bad group".to_string()).exit_code(), 4);
        let err: CliError = ConfigError::invalid("ORGSYNC_PAGE_SIZE", "must be greater than zero").into();
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn test_exit_code_failures() {
        assert_eq!(CliError::CompletedWithFailures(3).exit_code(), 2);
        assert!(CliError::CompletedWithFailures(3).to_string().contains('3'));
    }
}
