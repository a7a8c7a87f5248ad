//! Listener plugins available to the command-line runner.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use orgsync_engine::{
    EntityKind, Group, GroupListener, ListenerDeclaration, ListenerPlugin, ListenerRegistry,
    ListenerResult, Membership, MembershipListener, ProfileListener, User, UserListener,
    UserProfile,
};

use crate::error::{CliError, CliResult};

/// Writes every notification to the log.
pub struct LogListener {
    name: String,
}

impl LogListener {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self { name: name.into() })
    }

    fn saved(&self, kind: EntityKind, id: &str, is_new: bool) {
        tracing::info!(listener = %self.name, kind = %kind, entity_id = %id, is_new, "Saved");
    }

    fn deleted(&self, kind: EntityKind, id: &str) {
        tracing::info!(listener = %self.name, kind = %kind, entity_id = %id, "Deleted");
    }
}

#[async_trait]
impl GroupListener for LogListener {
    async fn post_save(&self, group: &Group, is_new: bool) -> ListenerResult<()> {
        self.saved(EntityKind::Group, group.id.as_str(), is_new);
        Ok(())
    }

    async fn post_delete(&self, group: &Group) -> ListenerResult<()> {
        self.deleted(EntityKind::Group, group.id.as_str());
        Ok(())
    }
}

#[async_trait]
impl UserListener for LogListener {
    async fn post_save(&self, user: &User, is_new: bool) -> ListenerResult<()> {
        self.saved(EntityKind::User, user.username.as_str(), is_new);
        Ok(())
    }

    async fn post_delete(&self, user: &User) -> ListenerResult<()> {
        self.deleted(EntityKind::User, user.username.as_str());
        Ok(())
    }
}

#[async_trait]
impl MembershipListener for LogListener {
    async fn post_save(&self, membership: &Membership, is_new: bool) -> ListenerResult<()> {
        self.saved(EntityKind::Membership, membership.id().as_str(), is_new);
        Ok(())
    }

    async fn post_delete(&self, membership: &Membership) -> ListenerResult<()> {
        self.deleted(EntityKind::Membership, membership.id().as_str());
        Ok(())
    }
}

#[async_trait]
impl ProfileListener for LogListener {
    async fn post_save(&self, profile: &UserProfile, is_new: bool) -> ListenerResult<()> {
        self.saved(EntityKind::Profile, profile.username.as_str(), is_new);
        Ok(())
    }

    async fn post_delete(&self, profile: &UserProfile) -> ListenerResult<()> {
        self.deleted(EntityKind::Profile, profile.username.as_str());
        Ok(())
    }
}

fn plugin_for(kind: EntityKind, listener: Arc<LogListener>) -> ListenerPlugin {
    match kind {
        EntityKind::Group => ListenerPlugin::Group(listener),
        EntityKind::User => ListenerPlugin::User(listener),
        EntityKind::Membership => ListenerPlugin::Membership(listener),
        EntityKind::Profile => ListenerPlugin::Profile(listener),
    }
}

/// One logging listener per capability.
pub fn register_defaults(registry: &mut ListenerRegistry) {
    let listener = LogListener::new("log");
    for kind in EntityKind::ALL {
        registry.register("log", 0, plugin_for(kind, listener.clone()));
    }
}

/// Register logging listeners from a JSON array of declarations.
///
/// # Errors
///
/// Returns `CliError::Config` if the file cannot be read or parsed, and
/// `CliError::Validation` if a declaration is rejected.
pub async fn register_declared(registry: &mut ListenerRegistry, path: &Path) -> CliResult<()> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| CliError::Config(format!("{}: {e}", path.display())))?;
    let declarations: Vec<ListenerDeclaration> = serde_json::from_slice(&bytes)
        .map_err(|e| CliError::Config(format!("{}: {e}", path.display())))?;
    register_all(registry, &declarations)
}

fn register_all(registry: &mut ListenerRegistry, declarations: &[ListenerDeclaration]) -> CliResult<()> {
    for declaration in declarations {
        let kind: EntityKind = declaration
            .capability
            .parse()
            .map_err(|e| CliError::Validation(format!("listener '{}': {e}", declaration.name)))?;
        let plugin = plugin_for(kind, LogListener::new(declaration.name.clone()));
        registry
            .register_declared(declaration, plugin)
            .map_err(|e| CliError::Validation(e.to_string()))?;
        tracing::debug!(listener = %declaration.name, capability = %kind, "Listener registered");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_every_capability() {
        let mut registry = ListenerRegistry::new();
        register_defaults(&mut registry);
        assert_eq!(registry.len(), 4);
        for kind in EntityKind::ALL {
            assert_eq!(registry.listeners(kind)[0].name, "log");
        }
    }

    #[test]
    fn test_declarations() {
        let declarations: Vec<ListenerDeclaration> = serde_json::from_str(
            r#"[
                {"name": "audit", "priority": 5, "capability": "user"},
                {"name": "mirror", "capability": "group"}
            ]"#,
        )
        .unwrap();
        let mut registry = ListenerRegistry::new();
        register_all(&mut registry, &declarations).unwrap();

        assert_eq!(registry.listeners(EntityKind::User)[0].priority, 5);
        assert_eq!(registry.listeners(EntityKind::Group)[0].name, "mirror");
        assert!(registry.listeners(EntityKind::Profile).is_empty());
    }

    #[test]
    fn test_unknown_capability_is_rejected() {
        let declaration = ListenerDeclaration {
            name: "audit".to_string(),
            priority: 0,
            capability: "tenant".to_string(),
        };
        let err = register_all(&mut ListenerRegistry::new(), &[declaration]).unwrap_err();
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn test_empty_name_is_rejected() {
        let declaration = ListenerDeclaration {
            name: " ".to_string(),
            priority: 0,
            capability: "group".to_string(),
        };
        assert!(register_all(&mut ListenerRegistry::new(), &[declaration]).is_err());
    }
}
