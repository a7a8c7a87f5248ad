//! Engine configuration.
//!
//! Values are resolved once when the engine is built and passed down
//! explicitly; nothing in the engine reads process-wide state afterwards.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use thiserror::Error;

use orgsync_core::Workspace;

/// Environment variable names.
pub const ENV_WORKSPACE: &str = "ORGSYNC_WORKSPACE";
pub const ENV_LEDGER_ROOT: &str = "ORGSYNC_LEDGER_ROOT";
pub const ENV_SYNCHRONIZE_GROUPS: &str = "ORGSYNC_SYNCHRONIZE_GROUPS";
pub const ENV_PAGE_SIZE: &str = "ORGSYNC_PAGE_SIZE";
pub const ENV_MAX_GROUP_DEPTH: &str = "ORGSYNC_MAX_GROUP_DEPTH";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A value was present but invalid.
    #[error("Invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },
}

impl ConfigError {
    /// Create an invalid value error.
    pub fn invalid(var: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            var: var.into(),
            message: message.into(),
        }
    }
}

/// Configuration for the reconciliation engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgSyncConfig {
    /// Ledger scope.
    #[serde(default = "default_workspace")]
    pub workspace: String,
    /// Root directory of the filesystem ledger.
    #[serde(default = "default_ledger_root")]
    pub ledger_root: PathBuf,
    /// Run group reconciliation from [`crate::OrgSyncEngine::startup`].
    #[serde(default)]
    pub synchronize_groups: bool,
    /// Users loaded per page during enumeration.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Deepest group hierarchy the parent cascade will walk.
    #[serde(default = "default_max_group_depth")]
    pub max_group_depth: usize,
}

fn default_workspace() -> String {
    "collaboration".to_string()
}

fn default_ledger_root() -> PathBuf {
    PathBuf::from("orgsync-ledger")
}

fn default_page_size() -> usize {
    1000
}

fn default_max_group_depth() -> usize {
    64
}

impl Default for OrgSyncConfig {
    fn default() -> Self {
        Self {
            workspace: default_workspace(),
            ledger_root: default_ledger_root(),
            synchronize_groups: false,
            page_size: default_page_size(),
            max_group_depth: default_max_group_depth(),
        }
    }
}

impl OrgSyncConfig {
    /// Load configuration from `ORGSYNC_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is set to an unparsable value or
    /// the resulting configuration fails [`OrgSyncConfig::validate`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// Unset variables fall back to their default with a warning.
    ///
    /// # Errors
    ///
    /// Same as [`OrgSyncConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        match lookup(ENV_WORKSPACE) {
            Some(value) => config.workspace = value,
            None => tracing::warn!(
                var = ENV_WORKSPACE,
                default = %config.workspace,
                "Workspace not set, using default"
            ),
        }

        match lookup(ENV_LEDGER_ROOT) {
            Some(value) => config.ledger_root = PathBuf::from(value),
            None => tracing::warn!(
                var = ENV_LEDGER_ROOT,
                default = %config.ledger_root.display(),
                "Ledger root not set, using default"
            ),
        }

        match lookup(ENV_SYNCHRONIZE_GROUPS) {
            Some(value) => config.synchronize_groups = parse_bool(ENV_SYNCHRONIZE_GROUPS, &value)?,
            None => tracing::warn!(
                var = ENV_SYNCHRONIZE_GROUPS,
                "Group synchronization flag not set, using default: false"
            ),
        }

        if let Some(value) = lookup(ENV_PAGE_SIZE) {
            config.page_size = parse_usize(ENV_PAGE_SIZE, &value)?;
        }

        if let Some(value) = lookup(ENV_MAX_GROUP_DEPTH) {
            config.max_group_depth = parse_usize(ENV_MAX_GROUP_DEPTH, &value)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Fail fast on values the engine cannot work with.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for an empty or malformed workspace,
    /// a zero page size or a zero depth guard.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.workspace()?;
        if self.page_size == 0 {
            return Err(ConfigError::invalid(ENV_PAGE_SIZE, "must be greater than zero"));
        }
        if self.max_group_depth == 0 {
            return Err(ConfigError::invalid(
                ENV_MAX_GROUP_DEPTH,
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    /// The validated ledger scope.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if the workspace is unset or malformed.
    pub fn workspace(&self) -> Result<Workspace, ConfigError> {
        Workspace::new(self.workspace.clone()).map_err(|e| ConfigError::invalid(ENV_WORKSPACE, e.to_string()))
    }
}

fn parse_bool(var: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::invalid(var, format!("expected a boolean, got '{value}'"))),
    }
}

fn parse_usize(var: &str, value: &str) -> Result<usize, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::invalid(var, format!("expected a positive integer, got '{value}'")))
}
