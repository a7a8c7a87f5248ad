//! Identity backend abstraction.
//!
//! The engine consumes a directory through [`IdentityBackend`]. Backends that
//! sit on top of two physical stores can expose them through
//! [`IdentityBackend::identity_stores`] so the enumerator can page usernames
//! from the stores directly.

pub mod memory;
pub mod snapshot;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use orgsync_core::{Group, GroupId, Membership, MembershipType, User, UserProfile, Username};

pub use memory::{InMemoryBackend, InMemoryStore};
pub use snapshot::{DirectorySnapshot, StoreSnapshot};

/// Errors raised by an identity backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Backend temporarily unreachable.
    #[error("identity backend unavailable: {message}")]
    Unavailable { message: String },

    /// A lookup or listing failed.
    #[error("identity backend query failed: {message}")]
    Query { message: String },

    /// A directory snapshot could not be loaded.
    #[error("invalid directory snapshot {path}: {message}")]
    InvalidSnapshot { path: String, message: String },
}

impl BackendError {
    /// Create an unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Create a query error.
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
        }
    }

    /// Create an invalid snapshot error.
    pub fn invalid_snapshot(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidSnapshot {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Check if this error is transient (may succeed on retry).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Unavailable { .. })
    }
}

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// A window over a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// Number of results to skip.
    pub offset: usize,
    /// Maximum number of results to return.
    pub length: usize,
}

impl PageRequest {
    /// Create a page request.
    #[must_use]
    pub fn new(offset: usize, length: usize) -> Self {
        Self { offset, length }
    }

    /// Create a request for the first page.
    #[must_use]
    pub fn first(length: usize) -> Self {
        Self::new(0, length)
    }
}

/// One page of results plus the size of the full listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
}

impl<T> Page<T> {
    /// Create a page.
    #[must_use]
    pub fn new(items: Vec<T>, total: usize) -> Self {
        Self { items, total }
    }

    /// An empty listing.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(Vec::new(), 0)
    }
}

/// Role of a physical store behind a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreRole {
    /// Authoritative external directory.
    Primary,
    /// Internal store holding accounts created locally.
    Secondary,
}

/// A physical user store that can be paged directly.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Which side of the backend this store is.
    fn role(&self) -> StoreRole;

    /// Whether the store can be queried outside the backend's own call path.
    fn has_invocation_context(&self) -> bool;

    /// Number of users held by the store.
    async fn user_count(&self) -> BackendResult<usize>;

    /// Load one page of usernames.
    async fn load_usernames(&self, page: PageRequest) -> BackendResult<Vec<Username>>;
}

/// Read access to the live identity model.
///
/// `find_*` methods return `Ok(None)` when the entity does not exist and
/// `Err` only when existence could not be determined.
#[async_trait]
pub trait IdentityBackend: Send + Sync {
    /// List every group.
    async fn list_groups(&self) -> BackendResult<Vec<Group>>;

    /// Look up a group.
    async fn find_group(&self, id: &GroupId) -> BackendResult<Option<Group>>;

    /// Number of users, used to size page requests.
    async fn user_count(&self) -> BackendResult<usize>;

    /// Load one page of users.
    async fn list_users_page(&self, page: PageRequest) -> BackendResult<Page<User>>;

    /// Look up a user.
    async fn find_user(&self, username: &Username) -> BackendResult<Option<User>>;

    /// All memberships of a user.
    async fn list_memberships_for_user(&self, username: &Username) -> BackendResult<Vec<Membership>>;

    /// Memberships of a user in one group, any type.
    async fn find_memberships_by_user_and_group(
        &self,
        username: &Username,
        group_id: &GroupId,
    ) -> BackendResult<Vec<Membership>>;

    /// Look up one exact membership triple.
    async fn find_membership(
        &self,
        username: &Username,
        group_id: &GroupId,
        membership_type: &MembershipType,
    ) -> BackendResult<Option<Membership>>;

    /// Look up a user profile.
    async fn find_profile(&self, username: &Username) -> BackendResult<Option<UserProfile>>;

    /// Persist a profile.
    async fn save_profile(&self, profile: &UserProfile, is_new: bool) -> BackendResult<()>;

    /// Drop any read cache so the next enumeration sees fresh data.
    async fn invalidate_cache(&self) -> BackendResult<()>;

    /// Physical stores exposed for direct enumeration.
    fn identity_stores(&self) -> Vec<Arc<dyn IdentityStore>> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(BackendError::unavailable("ldap down").is_transient());
        assert!(!BackendError::query("bad filter").is_transient());
        assert!(!BackendError::invalid_snapshot("dir.json", "eof").is_transient());
    }

    #[test]
    fn test_page_request() {
        let page = PageRequest::first(1000);
        assert_eq!(page.offset, 0);
        assert_eq!(page.length, 1000);
        assert_eq!(PageRequest::new(2000, 500).offset, 2000);
    }

    #[test]
    fn test_empty_page() {
        let page: Page<User> = Page::empty();
        assert!(page.items.is_empty());
        assert_eq!(page.total, 0);
    }
}
