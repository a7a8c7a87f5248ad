//! Error Types
//!
//! Errors raised while building or parsing organization model values.
//!
//! # Example
//!
//! ```
//! use orgsync_core::{EventType, OrgModelError};
//!
//! let err = "REMOVED".parse::<EventType>().unwrap_err();
//! assert!(matches!(err, OrgModelError::UnknownEventType { .. }));
//! ```

use serde::Serialize;
use thiserror::Error;

/// Standardized error type for the organization model.
///
/// Every variant is a caller mistake (malformed input), never a transient
/// condition, so none of them are worth retrying.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrgModelError {
    /// An identifier failed validation.
    #[error("Invalid {kind} identifier '{value}': {reason}")]
    InvalidIdentifier {
        /// The identifier type (e.g. "GroupId", "Username")
        kind: &'static str,
        /// The rejected value
        value: String,
        /// Why it was rejected
        reason: String,
    },

    /// Event type string is not one of ADDED, UPDATED, DELETED.
    #[error("Unknown event type '{value}', expected ADDED, UPDATED or DELETED")]
    UnknownEventType {
        /// The rejected value
        value: String,
    },

    /// Capability tag string does not name a listener capability.
    #[error("Unknown listener capability '{value}', expected user, group, membership or profile")]
    UnknownCapability {
        /// The rejected value
        value: String,
    },
}

impl OrgModelError {
    /// Create an invalid identifier error.
    pub fn invalid_identifier(
        kind: &'static str,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidIdentifier {
            kind,
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// Type alias for Results using [`OrgModelError`].
pub type Result<T> = std::result::Result<T, OrgModelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_identifier_display() {
        let error = OrgModelError::invalid_identifier("GroupId", "platform", "must start with '/'");
        assert_eq!(
            error.to_string(),
            "Invalid GroupId identifier 'platform': must start with '/'"
        );
    }

    #[test]
    fn test_unknown_event_type_display() {
        let error = OrgModelError::UnknownEventType {
            value: "REMOVED".to_string(),
        };
        assert!(error.to_string().contains("REMOVED"));
        assert!(error.to_string().contains("ADDED, UPDATED or DELETED"));
    }

    #[test]
    fn test_serialization_is_tagged() {
        let error = OrgModelError::UnknownCapability {
            value: "portlet".to_string(),
        };
        let json = serde_json::to_string(&error).unwrap();
        assert!(json.contains("\"type\":\"unknown_capability\""));
        assert!(json.contains("\"value\":\"portlet\""));
    }

    #[test]
    fn test_is_std_error() {
        let error = OrgModelError::UnknownEventType {
            value: String::new(),
        };
        let _: &dyn std::error::Error = &error;
    }
}
