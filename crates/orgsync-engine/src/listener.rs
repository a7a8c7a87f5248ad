//! Listener plugins and their registry.
//!
//! One trait per entity kind, each with save and delete hook pairs defaulting
//! to no-ops. Plugins are registered by name with a priority; lower
//! priorities run first and re-registering a name replaces the previous
//! entry.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use thiserror::Error;

use orgsync_core::{EntityKind, Group, Membership, OrgModelError, User, UserProfile};

use crate::ledger::LedgerError;

/// Errors raised by listener hooks.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The hook reported a failure.
    #[error("Listener failed: {message}")]
    Failed { message: String },

    /// The hook could not write to the activation ledger.
    #[error("Ledger write failed: {0}")]
    Ledger(#[from] LedgerError),

    /// The plugin was handed an entity of another kind.
    #[error("Listener for {expected} entities cannot handle a {actual}")]
    WrongEntity {
        expected: EntityKind,
        actual: EntityKind,
    },
}

impl ListenerError {
    /// Create a failure.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

/// Result type for hooks.
pub type ListenerResult<T> = Result<T, ListenerError>;

/// Errors raised while registering listeners.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Declared capability is not an entity kind.
    #[error(transparent)]
    UnknownCapability(#[from] OrgModelError),

    /// Declared capability does not match the plugin implementation.
    #[error("Listener '{name}' declares capability {declared} but implements {actual}")]
    CapabilityMismatch {
        name: String,
        declared: EntityKind,
        actual: EntityKind,
    },

    /// Listener name is empty.
    #[error("Listener name must not be empty")]
    EmptyName,
}

macro_rules! define_listener {
    ($(#[$meta:meta])* $name:ident, $entity:ty) => {
        $(#[$meta])*
        #[async_trait]
        pub trait $name: Send + Sync {
            /// Called before listeners are told the entity was saved.
            async fn pre_save(&self, _entity: &$entity, _is_new: bool) -> ListenerResult<()> {
                Ok(())
            }

            /// Called once every listener has run `pre_save`.
            async fn post_save(&self, _entity: &$entity, _is_new: bool) -> ListenerResult<()> {
                Ok(())
            }

            /// Called before listeners are told the entity was deleted.
            async fn pre_delete(&self, _entity: &$entity) -> ListenerResult<()> {
                Ok(())
            }

            /// Called once every listener has run `pre_delete`.
            async fn post_delete(&self, _entity: &$entity) -> ListenerResult<()> {
                Ok(())
            }
        }
    };
}

define_listener!(
    /// Receives group lifecycle notifications.
    GroupListener,
    Group
);
define_listener!(
    /// Receives user lifecycle notifications.
    UserListener,
    User
);
define_listener!(
    /// Receives membership lifecycle notifications.
    MembershipListener,
    Membership
);
define_listener!(
    /// Receives user profile lifecycle notifications.
    ProfileListener,
    UserProfile
);

/// Which hook of a listener is being called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hook {
    PreSave,
    PostSave,
    PreDelete,
    PostDelete,
}

impl Hook {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Hook::PreSave => "pre_save",
            Hook::PostSave => "post_save",
            Hook::PreDelete => "pre_delete",
            Hook::PostDelete => "post_delete",
        }
    }
}

impl std::fmt::Display for Hook {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Borrowed entity handed to a hook.
#[derive(Debug, Clone, Copy)]
pub enum EntityRef<'a> {
    Group(&'a Group),
    User(&'a User),
    Membership(&'a Membership),
    Profile(&'a UserProfile),
}

impl EntityRef<'_> {
    /// Kind of the entity.
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityRef::Group(_) => EntityKind::Group,
            EntityRef::User(_) => EntityKind::User,
            EntityRef::Membership(_) => EntityKind::Membership,
            EntityRef::Profile(_) => EntityKind::Profile,
        }
    }

    /// Ledger identifier of the entity.
    #[must_use]
    pub fn id(&self) -> String {
        match self {
            EntityRef::Group(group) => group.id.to_string(),
            EntityRef::User(user) => user.username.to_string(),
            EntityRef::Membership(membership) => membership.id().to_string(),
            EntityRef::Profile(profile) => profile.username.to_string(),
        }
    }
}

/// A listener implementation tagged with its capability.
#[derive(Clone)]
pub enum ListenerPlugin {
    Group(Arc<dyn GroupListener>),
    User(Arc<dyn UserListener>),
    Membership(Arc<dyn MembershipListener>),
    Profile(Arc<dyn ProfileListener>),
}

impl ListenerPlugin {
    /// The entity kind this plugin handles.
    #[must_use]
    pub fn capability(&self) -> EntityKind {
        match self {
            ListenerPlugin::Group(_) => EntityKind::Group,
            ListenerPlugin::User(_) => EntityKind::User,
            ListenerPlugin::Membership(_) => EntityKind::Membership,
            ListenerPlugin::Profile(_) => EntityKind::Profile,
        }
    }

    /// Call one hook.
    ///
    /// `is_new` is ignored by the delete hooks.
    ///
    /// # Errors
    ///
    /// Returns whatever the hook returns, or `ListenerError::WrongEntity` if
    /// the entity kind differs from the plugin capability.
    pub async fn invoke(&self, hook: Hook, entity: EntityRef<'_>, is_new: bool) -> ListenerResult<()> {
        match (self, entity) {
            (ListenerPlugin::Group(l), EntityRef::Group(e)) => match hook {
                Hook::PreSave => l.pre_save(e, is_new).await,
                Hook::PostSave => l.post_save(e, is_new).await,
                Hook::PreDelete => l.pre_delete(e).await,
                Hook::PostDelete => l.post_delete(e).await,
            },
            (ListenerPlugin::User(l), EntityRef::User(e)) => match hook {
                Hook::PreSave => l.pre_save(e, is_new).await,
                Hook::PostSave => l.post_save(e, is_new).await,
                Hook::PreDelete => l.pre_delete(e).await,
                Hook::PostDelete => l.post_delete(e).await,
            },
            (ListenerPlugin::Membership(l), EntityRef::Membership(e)) => match hook {
                Hook::PreSave => l.pre_save(e, is_new).await,
                Hook::PostSave => l.post_save(e, is_new).await,
                Hook::PreDelete => l.pre_delete(e).await,
                Hook::PostDelete => l.post_delete(e).await,
            },
            (ListenerPlugin::Profile(l), EntityRef::Profile(e)) => match hook {
                Hook::PreSave => l.pre_save(e, is_new).await,
                Hook::PostSave => l.post_save(e, is_new).await,
                Hook::PreDelete => l.pre_delete(e).await,
                Hook::PostDelete => l.post_delete(e).await,
            },
            (plugin, entity) => Err(ListenerError::WrongEntity {
                expected: plugin.capability(),
                actual: entity.kind(),
            }),
        }
    }
}

impl Debug for ListenerPlugin {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ListenerPlugin").field(&self.capability()).finish()
    }
}

/// A listener as declared in plugin configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerDeclaration {
    pub name: String,
    #[serde(default)]
    pub priority: i32,
    /// One of `group`, `user`, `membership`, `profile`.
    pub capability: String,
}

/// A registered listener.
#[derive(Debug, Clone)]
pub struct Registration {
    pub name: String,
    pub priority: i32,
    pub plugin: ListenerPlugin,
}

/// Priority-ordered listeners, bucketed by capability.
#[derive(Debug, Default, Clone)]
pub struct ListenerRegistry {
    buckets: BTreeMap<EntityKind, Vec<Registration>>,
}

impl ListenerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin. Returns `true` if an entry with the same name was
    /// replaced.
    pub fn register(&mut self, name: impl Into<String>, priority: i32, plugin: ListenerPlugin) -> bool {
        let name = name.into();
        let bucket = self.buckets.entry(plugin.capability()).or_default();
        let registration = Registration {
            name,
            priority,
            plugin,
        };

        let replaced = match bucket.iter_mut().find(|r| r.name == registration.name) {
            Some(existing) => {
                tracing::debug!(listener = %registration.name, "Replacing registered listener");
                *existing = registration;
                true
            }
            None => {
                bucket.push(registration);
                false
            }
        };
        bucket.sort_by_key(|r| r.priority);
        replaced
    }

    /// Register a plugin from its declaration.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError` if the name is empty, the capability string is
    /// unknown or the capability does not match the plugin.
    pub fn register_declared(
        &mut self,
        declaration: &ListenerDeclaration,
        plugin: ListenerPlugin,
    ) -> Result<bool, RegistryError> {
        if declaration.name.trim().is_empty() {
            return Err(RegistryError::EmptyName);
        }
        let declared: EntityKind = declaration.capability.parse()?;
        if declared != plugin.capability() {
            return Err(RegistryError::CapabilityMismatch {
                name: declaration.name.clone(),
                declared,
                actual: plugin.capability(),
            });
        }
        Ok(self.register(declaration.name.clone(), declaration.priority, plugin))
    }

    /// Remove a listener. Returns `true` if it was registered.
    pub fn unregister(&mut self, kind: EntityKind, name: &str) -> bool {
        let Some(bucket) = self.buckets.get_mut(&kind) else {
            return false;
        };
        let before = bucket.len();
        bucket.retain(|r| r.name != name);
        bucket.len() != before
    }

    /// Listeners of one capability, lowest priority first.
    #[must_use]
    pub fn listeners(&self, kind: EntityKind) -> &[Registration] {
        self.buckets.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Total number of registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingGroupListener {
        saves: AtomicUsize,
    }

    #[async_trait]
    impl GroupListener for CountingGroupListener {
        async fn post_save(&self, _group: &Group, _is_new: bool) -> ListenerResult<()> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct NoopUserListener;

    #[async_trait]
    impl UserListener for NoopUserListener {}

    fn group_plugin() -> ListenerPlugin {
        ListenerPlugin::Group(Arc::new(CountingGroupListener::default()))
    }

    fn names(registry: &ListenerRegistry, kind: EntityKind) -> Vec<String> {
        registry.listeners(kind).iter().map(|r| r.name.clone()).collect()
    }

    #[test]
    fn test_priority_order_is_stable() {
        let mut registry = ListenerRegistry::new();
        registry.register("late", 10, group_plugin());
        registry.register("first", 1, group_plugin());
        registry.register("tie-a", 5, group_plugin());
        registry.register("tie-b", 5, group_plugin());

        assert_eq!(
            names(&registry, EntityKind::Group),
            vec!["first", "tie-a", "tie-b", "late"]
        );
        assert!(registry.listeners(EntityKind::User).is_empty());
    }

    #[test]
    fn test_reregistering_replaces() {
        let mut registry = ListenerRegistry::new();
        assert!(!registry.register("audit", 10, group_plugin()));
        registry.register("other", 5, group_plugin());
        assert!(registry.register("audit", 1, group_plugin()));

        assert_eq!(registry.len(), 2);
        assert_eq!(names(&registry, EntityKind::Group), vec!["audit", "other"]);
    }

    #[test]
    fn test_same_name_in_different_buckets() {
        let mut registry = ListenerRegistry::new();
        registry.register("audit", 1, group_plugin());
        registry.register("audit", 1, ListenerPlugin::User(Arc::new(NoopUserListener)));
        assert_eq!(registry.len(), 2);

        assert!(registry.unregister(EntityKind::User, "audit"));
        assert!(!registry.unregister(EntityKind::User, "audit"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_declared_validates_capability() {
        let mut registry = ListenerRegistry::new();
        let declaration = ListenerDeclaration {
            name: "mail".to_string(),
            priority: 3,
            capability: "group".to_string(),
        };
        assert!(registry.register_declared(&declaration, group_plugin()).is_ok());

        let mismatched = ListenerDeclaration {
            capability: "user".to_string(),
            ..declaration.clone()
        };
        let err = registry
            .register_declared(&mismatched, group_plugin())
            .unwrap_err();
        assert!(matches!(err, RegistryError::CapabilityMismatch { .. }));

        let unknown = ListenerDeclaration {
            capability: "portlet".to_string(),
            ..declaration.clone()
        };
        assert!(matches!(
            registry.register_declared(&unknown, group_plugin()),
            Err(RegistryError::UnknownCapability(_))
        ));

        let unnamed = ListenerDeclaration {
            name: " ".to_string(),
            ..declaration
        };
        assert!(matches!(
            registry.register_declared(&unnamed, group_plugin()),
            Err(RegistryError::EmptyName)
        ));
    }

    #[test]
    fn test_declaration_deserialize() {
        let declaration: ListenerDeclaration =
            serde_json::from_str(r#"{"name": "mail", "capability": "membership"}"#).unwrap();
        assert_eq!(declaration.priority, 0);
        assert_eq!(declaration.capability, "membership");
    }

    #[tokio::test]
    async fn test_invoke_dispatches_to_hook() {
        let listener = Arc::new(CountingGroupListener::default());
        let plugin = ListenerPlugin::Group(listener.clone());
        let group = Group::new("/platform".parse().unwrap());

        plugin.invoke(Hook::PreSave, EntityRef::Group(&group), true).await.unwrap();
        plugin.invoke(Hook::PostSave, EntityRef::Group(&group), true).await.unwrap();
        assert_eq!(listener.saves.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invoke_rejects_wrong_entity() {
        let user = User::new("john".parse().unwrap());
        let err = group_plugin()
            .invoke(Hook::PreSave, EntityRef::User(&user), true)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ListenerError::WrongEntity {
                expected: EntityKind::Group,
                actual: EntityKind::User
            }
        ));
    }

    #[test]
    fn test_entity_ref_ids() {
        let membership = Membership::new(
            "john".parse().unwrap(),
            "/platform/users".parse().unwrap(),
            "member".parse().unwrap(),
        );
        let entity = EntityRef::Membership(&membership);
        assert_eq!(entity.kind(), EntityKind::Membership);
        assert_eq!(entity.id(), "member:john:/platform/users");
    }
}
