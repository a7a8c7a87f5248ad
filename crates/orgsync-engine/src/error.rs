//! Sync error types.

use orgsync_core::{GroupId, OrgModelError};
use thiserror::Error;

use crate::backend::BackendError;
use crate::config::ConfigError;
use crate::ledger::LedgerError;
use crate::listener::RegistryError;

/// Errors that can occur during reconciliation.
///
/// Listener hook failures are deliberately absent: they are caught at the
/// hook-call boundary and only ever show up in the run report.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Identity backend could not be read.
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Activation ledger could not be read.
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// Malformed event type or identifier supplied by the caller.
    #[error("Invalid input: {0}")]
    Model(#[from] OrgModelError),

    /// Listener registration rejected.
    #[error("Listener registration error: {0}")]
    Registry(#[from] RegistryError),

    /// Group hierarchy deeper than the configured guard.
    #[error("Group {group_id} is nested {depth} levels deep, maximum is {max_depth}")]
    GroupDepthExceeded {
        group_id: GroupId,
        depth: usize,
        max_depth: usize,
    },
}

impl SyncError {
    /// Create a backend query error.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(BackendError::query(message))
    }

    /// True for errors that abort the whole call chain rather than a
    /// single batch item.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::Ledger(_)
                | SyncError::Configuration(_)
                | SyncError::Model(_)
                | SyncError::Registry(_)
        )
    }

    /// Check if this error is worth retrying by the caller.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Backend(e) => e.is_transient(),
            SyncError::Ledger(LedgerError::Io(_)) => true,
            _ => false,
        }
    }
}

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;
