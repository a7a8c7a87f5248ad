//! Activation ledger.
//!
//! The ledger records which entities have already been integrated. The
//! engine only reads it; entries are written by [`ActivationRecorder`], a
//! listener plugin registered after every other listener.

pub mod fs;
pub mod memory;

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;

use orgsync_core::{
    EntityKind, Group, GroupId, Membership, OrgModelError, User, UserProfile, Username, Workspace,
};

use crate::listener::{
    GroupListener, ListenerPlugin, ListenerRegistry, ListenerResult, MembershipListener,
    ProfileListener, UserListener,
};

pub use fs::FsLedger;
pub use memory::MemoryLedger;

/// Errors raised by ledger implementations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Underlying storage failed.
    #[error("Ledger I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored record could not be encoded or decoded.
    #[error("Ledger serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored record is unreadable.
    #[error("Corrupt ledger entry at {path}: {message}")]
    Corrupt { path: String, message: String },

    /// A stored identifier is malformed.
    #[error("Invalid ledger identifier: {0}")]
    Model(#[from] OrgModelError),
}

impl LedgerError {
    /// Create a corrupt entry error.
    pub fn corrupt(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// A record written to the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEntry {
    Group(GroupId),
    User(Username),
    Membership(Membership),
    Profile(Username),
}

impl LedgerEntry {
    /// Partition of the entry.
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        match self {
            LedgerEntry::Group(_) => EntityKind::Group,
            LedgerEntry::User(_) => EntityKind::User,
            LedgerEntry::Membership(_) => EntityKind::Membership,
            LedgerEntry::Profile(_) => EntityKind::Profile,
        }
    }

    /// Identifier of the entry within its partition.
    #[must_use]
    pub fn id(&self) -> String {
        match self {
            LedgerEntry::Group(id) => id.to_string(),
            LedgerEntry::User(username) | LedgerEntry::Profile(username) => username.to_string(),
            LedgerEntry::Membership(membership) => membership.id().to_string(),
        }
    }
}

/// Read side of the ledger.
///
/// Identifiers are the ledger form of each entity: the group path, the
/// username (users and profiles) and the canonical membership identifier.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Every activated identifier of a kind.
    async fn list_activated(&self, kind: EntityKind, scope: &Workspace) -> LedgerResult<BTreeSet<String>>;

    /// Whether one identifier is activated.
    async fn has_record(&self, kind: EntityKind, scope: &Workspace, id: &str) -> LedgerResult<bool>;

    /// Activated groups nested under `group_id`, at any depth.
    async fn activated_children(&self, scope: &Workspace, group_id: &GroupId) -> LedgerResult<Vec<GroupId>>;

    /// Activated memberships of a user.
    async fn activated_memberships_for_user(
        &self,
        scope: &Workspace,
        username: &Username,
    ) -> LedgerResult<Vec<Membership>>;

    /// Activated memberships in a group.
    async fn activated_memberships_for_group(
        &self,
        scope: &Workspace,
        group_id: &GroupId,
    ) -> LedgerResult<Vec<Membership>>;
}

/// Write side of the ledger.
#[async_trait]
pub trait LedgerWriter: Send + Sync {
    /// Record an entity as integrated.
    async fn mark_activated(&self, scope: &Workspace, entry: &LedgerEntry) -> LedgerResult<()>;

    /// Forget an entity. Clearing a missing entry is not an error.
    async fn clear(&self, kind: EntityKind, scope: &Workspace, id: &str) -> LedgerResult<()>;
}

/// Registration name of the recorder.
pub const RECORDER_NAME: &str = "activation-recorder";

/// Registration priority of the recorder. Runs after every other listener.
pub const RECORDER_PRIORITY: i32 = i32::MAX;

/// Listener plugin that keeps the ledger in step with dispatched events.
pub struct ActivationRecorder {
    writer: Arc<dyn LedgerWriter>,
    scope: Workspace,
}

impl ActivationRecorder {
    /// Create a recorder writing to `scope`.
    pub fn new(writer: Arc<dyn LedgerWriter>, scope: Workspace) -> Self {
        Self { writer, scope }
    }

    /// Register the recorder for every capability.
    pub fn register(self: Arc<Self>, registry: &mut ListenerRegistry) {
        registry.register(RECORDER_NAME, RECORDER_PRIORITY, ListenerPlugin::Group(self.clone()));
        registry.register(RECORDER_NAME, RECORDER_PRIORITY, ListenerPlugin::User(self.clone()));
        registry.register(RECORDER_NAME, RECORDER_PRIORITY, ListenerPlugin::Membership(self.clone()));
        registry.register(RECORDER_NAME, RECORDER_PRIORITY, ListenerPlugin::Profile(self));
    }

    async fn mark(&self, entry: LedgerEntry) -> ListenerResult<()> {
        tracing::debug!(kind = %entry.kind(), id = %entry.id(), scope = %self.scope, "Recording activation");
        self.writer.mark_activated(&self.scope, &entry).await?;
        Ok(())
    }

    async fn clear(&self, kind: EntityKind, id: String) -> ListenerResult<()> {
        tracing::debug!(kind = %kind, id = %id, scope = %self.scope, "Clearing activation");
        self.writer.clear(kind, &self.scope, &id).await?;
        Ok(())
    }
}

#[async_trait]
impl GroupListener for ActivationRecorder {
    async fn post_save(&self, group: &Group, _is_new: bool) -> ListenerResult<()> {
        self.mark(LedgerEntry::Group(group.id.clone())).await
    }

    async fn post_delete(&self, group: &Group) -> ListenerResult<()> {
        self.clear(EntityKind::Group, group.id.to_string()).await
    }
}

#[async_trait]
impl UserListener for ActivationRecorder {
    async fn post_save(&self, user: &User, _is_new: bool) -> ListenerResult<()> {
        self.mark(LedgerEntry::User(user.username.clone())).await
    }

    async fn post_delete(&self, user: &User) -> ListenerResult<()> {
        self.clear(EntityKind::User, user.username.to_string()).await
    }
}

#[async_trait]
impl MembershipListener for ActivationRecorder {
    async fn post_save(&self, membership: &Membership, _is_new: bool) -> ListenerResult<()> {
        self.mark(LedgerEntry::Membership(membership.clone())).await
    }

    async fn post_delete(&self, membership: &Membership) -> ListenerResult<()> {
        self.clear(EntityKind::Membership, membership.id().to_string())
            .await
    }
}

#[async_trait]
impl ProfileListener for ActivationRecorder {
    async fn post_save(&self, profile: &UserProfile, _is_new: bool) -> ListenerResult<()> {
        self.mark(LedgerEntry::Profile(profile.username.clone())).await
    }

    async fn post_delete(&self, profile: &UserProfile) -> ListenerResult<()> {
        self.clear(EntityKind::Profile, profile.username.to_string())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::{EntityRef, Hook};

    fn scope() -> Workspace {
        "collaboration".parse().unwrap()
    }

    #[test]
    fn test_entry_ids() {
        let membership = Membership::new(
            "john".parse().unwrap(),
            "/platform/users".parse().unwrap(),
            "member".parse().unwrap(),
        );
        let entry = LedgerEntry::Membership(membership);
        assert_eq!(entry.kind(), EntityKind::Membership);
        assert_eq!(entry.id(), "member:john:/platform/users");
        assert_eq!(LedgerEntry::Profile("john".parse().unwrap()).kind(), EntityKind::Profile);
    }

    #[test]
    fn test_recorder_registers_last_everywhere() {
        let ledger = Arc::new(MemoryLedger::new());
        let recorder = Arc::new(ActivationRecorder::new(ledger, scope()));
        let mut registry = ListenerRegistry::new();
        registry.register("audit", 100, ListenerPlugin::Group(recorder.clone()));
        recorder.register(&mut registry);

        for kind in EntityKind::ALL {
            let listeners = registry.listeners(kind);
            let last = listeners.last().unwrap();
            assert_eq!(last.name, RECORDER_NAME);
            assert_eq!(last.priority, RECORDER_PRIORITY);
        }
    }

    #[tokio::test]
    async fn test_recorder_marks_and_clears() {
        let ledger = Arc::new(MemoryLedger::new());
        let recorder = Arc::new(ActivationRecorder::new(ledger.clone(), scope()));
        let plugin = ListenerPlugin::User(recorder);
        let user = User::new("john".parse().unwrap());

        plugin.invoke(Hook::PreSave, EntityRef::User(&user), true).await.unwrap();
        assert!(!ledger.has_record(EntityKind::User, &scope(), "john").await.unwrap());

        plugin.invoke(Hook::PostSave, EntityRef::User(&user), true).await.unwrap();
        assert!(ledger.has_record(EntityKind::User, &scope(), "john").await.unwrap());

        plugin.invoke(Hook::PostDelete, EntityRef::User(&user), false).await.unwrap();
        assert!(!ledger.has_record(EntityKind::User, &scope(), "john").await.unwrap());
    }

    #[tokio::test]
    async fn test_recorder_surfaces_write_failures() {
        let ledger = Arc::new(MemoryLedger::new());
        ledger.set_fail_writes(true);
        let recorder = Arc::new(ActivationRecorder::new(ledger, scope()));
        let group = Group::new("/platform".parse().unwrap());

        let err = ListenerPlugin::Group(recorder)
            .invoke(Hook::PostSave, EntityRef::Group(&group), true)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::listener::ListenerError::Ledger(_)));
    }
}
