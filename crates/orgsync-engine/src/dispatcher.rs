//! Listener dispatch.
//!
//! A save event runs `pre_save` on every listener of the entity's capability,
//! then `post_save` on every listener. A delete event does the same with
//! `pre_delete` and `post_delete`. Listeners run in priority order within
//! each phase, each call in its own transaction scope. A failing hook is
//! logged and recorded; the remaining calls still run.

use std::sync::Arc;
use tracing::{info, warn};

use orgsync_core::EventType;

use crate::listener::{EntityRef, Hook, ListenerRegistry};
use crate::statistics::{ListenerFailure, SyncReport};
use crate::transaction::{ScopeGuard, TransactionScope};

/// Calls registered listeners for one entity event.
pub struct Dispatcher {
    registry: Arc<ListenerRegistry>,
    scope: Arc<dyn TransactionScope>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ListenerRegistry>, scope: Arc<dyn TransactionScope>) -> Self {
        Self { registry, scope }
    }

    #[must_use]
    pub fn registry(&self) -> &ListenerRegistry {
        &self.registry
    }

    /// Run both phases for `entity`. Returns the number of failed hook calls.
    pub async fn dispatch(&self, entity: EntityRef<'_>, event: EventType, report: &mut SyncReport) -> usize {
        let kind = entity.kind();
        let entity_id = entity.id();
        let listeners = self.registry.listeners(kind);
        let phases = if event.is_save() {
            [Hook::PreSave, Hook::PostSave]
        } else {
            [Hook::PreDelete, Hook::PostDelete]
        };

        info!(
            kind = %kind,
            entity_id = %entity_id,
            event = %event,
            listeners = listeners.len(),
            "Invoking listeners"
        );
        report.record_dispatch(kind, event);

        let mut failures = 0;
        for hook in phases {
            for registration in listeners {
                let result = {
                    let _guard = ScopeGuard::enter(self.scope.as_ref());
                    registration.plugin.invoke(hook, entity, event.is_new()).await
                };
                if let Err(e) = result {
                    warn!(
                        listener = %registration.name,
                        hook = %hook,
                        kind = %kind,
                        entity_id = %entity_id,
                        error = %e,
                        "Listener hook failed"
                    );
                    report.record_listener_failure(ListenerFailure {
                        listener: registration.name.clone(),
                        hook,
                        kind,
                        entity_id: entity_id.clone(),
                        message: e.to_string(),
                    });
                    failures += 1;
                }
            }
        }
        failures
    }
}
