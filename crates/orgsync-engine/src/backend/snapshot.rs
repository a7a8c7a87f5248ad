//! JSON directory snapshots.
//!
//! A snapshot is a point-in-time export of a directory:
//!
//! ```json
//! {
//!   "groups": [{ "id": "/platform" }, { "id": "/platform/users", "label": "Users" }],
//!   "users": [{ "username": "john", "email": "john@example.com" }],
//!   "memberships": [{ "username": "john", "group_id": "/platform/users", "membership_type": "member" }],
//!   "profiles": [{ "username": "john", "attributes": { "title": "engineer" } }],
//!   "stores": [
//!     { "role": "primary", "usernames": ["john"] },
//!     { "role": "secondary", "usernames": [] }
//!   ]
//! }
//! ```
//!
//! `stores` is optional. When present, the loaded backend exposes them for
//! direct enumeration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use orgsync_core::{Group, Membership, User, UserProfile, Username};

use super::{BackendError, BackendResult, IdentityStore, InMemoryBackend, InMemoryStore, StoreRole};

/// One physical store in a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub role: StoreRole,
    #[serde(default)]
    pub usernames: Vec<Username>,
}

/// Point-in-time export of a directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectorySnapshot {
    #[serde(default)]
    pub groups: Vec<Group>,
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub memberships: Vec<Membership>,
    #[serde(default)]
    pub profiles: Vec<UserProfile>,
    #[serde(default)]
    pub stores: Vec<StoreSnapshot>,
}

impl DirectorySnapshot {
    /// Read and parse a snapshot file.
    ///
    /// # Errors
    ///
    /// Returns `BackendError::InvalidSnapshot` if the file cannot be read or parsed.
    pub async fn load(path: impl AsRef<Path>) -> BackendResult<Self> {
        let path = path.as_ref();
        let shown = path.display().to_string();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| BackendError::invalid_snapshot(&shown, e.to_string()))?;
        let snapshot: Self = serde_json::from_slice(&bytes)
            .map_err(|e| BackendError::invalid_snapshot(&shown, e.to_string()))?;

        tracing::debug!(
            path = %shown,
            groups = snapshot.groups.len(),
            users = snapshot.users.len(),
            memberships = snapshot.memberships.len(),
            "Loaded directory snapshot"
        );
        Ok(snapshot)
    }

    /// Build an in-memory backend from the snapshot.
    ///
    /// Groups without a declared parent get the one implied by their path.
    #[must_use]
    pub fn into_backend(self) -> InMemoryBackend {
        let mut backend = InMemoryBackend::new();

        for mut group in self.groups {
            if group.parent_id.is_none() {
                group.parent_id = group.id.parent();
            }
            if !group.has_consistent_parent() {
                tracing::warn!(
                    group_id = %group.id,
                    parent_id = ?group.parent_id,
                    "Declared parent does not match group path"
                );
            }
            if group.label.is_empty() {
                group.label = group.id.name().to_string();
            }
            backend = backend.with_group(group);
        }
        for user in self.users {
            backend = backend.with_user(user);
        }
        for membership in self.memberships {
            backend = backend.with_membership(membership);
        }
        for profile in self.profiles {
            backend = backend.with_profile(profile);
        }

        if !self.stores.is_empty() {
            let stores: Vec<Arc<dyn IdentityStore>> = self
                .stores
                .into_iter()
                .map(|s| Arc::new(InMemoryStore::new(s.role, s.usernames)) as Arc<dyn IdentityStore>)
                .collect();
            backend = backend.with_stores(stores);
        }

        backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::IdentityBackend;
    use std::io::Write;

    const SNAPSHOT: &str = r#"{
        "groups": [{ "id": "/platform" }, { "id": "/platform/users", "label": "Users" }],
        "users": [{ "username": "john" }],
        "memberships": [{ "username": "john", "group_id": "/platform/users", "membership_type": "member" }],
        "stores": [
            { "role": "primary", "usernames": ["john"] },
            { "role": "secondary" }
        ]
    }"#;

    #[tokio::test]
    async fn test_load_and_build() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SNAPSHOT.as_bytes()).unwrap();

        let snapshot = DirectorySnapshot::load(file.path()).await.unwrap();
        assert_eq!(snapshot.groups.len(), 2);
        assert_eq!(snapshot.stores.len(), 2);

        let backend = snapshot.into_backend();
        let group = backend
            .find_group(&"/platform/users".parse().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(group.parent_id.unwrap().as_str(), "/platform");
        assert_eq!(group.label, "Users");

        let root = backend
            .find_group(&"/platform".parse().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(root.label, "platform");
        assert_eq!(backend.identity_stores().len(), 2);
    }

    #[tokio::test]
    async fn test_load_rejects_invalid_identifiers() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{ "groups": [{ "id": "no-leading-slash" }] }"#)
            .unwrap();

        let err = DirectorySnapshot::load(file.path()).await.unwrap_err();
        assert!(matches!(err, BackendError::InvalidSnapshot { .. }));
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = DirectorySnapshot::load(dir.path().join("absent.json"))
            .await
            .unwrap_err();
        assert!(!err.is_transient());
    }
}
