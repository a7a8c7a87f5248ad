//! Reconciliation orchestrator.
//!
//! Compares the identity backend with the activation ledger and drives the
//! dispatcher so that every listener sees each change exactly once:
//!
//! - groups before users, users before memberships
//! - parents before children on save, children before parents on delete
//! - no delete notification while the entity still exists in the backend

use chrono::Utc;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use orgsync_core::{
    EntityKind, EventType, Group, GroupId, Membership, User, UserProfile, Username, Workspace,
};

use crate::backend::{BackendResult, IdentityBackend};
use crate::config::{ConfigError, OrgSyncConfig};
use crate::diff::{diff_groups, diff_ordered, plan_user_memberships};
use crate::dispatcher::Dispatcher;
use crate::enumerator::{EnumerationStrategy, UserEnumerator};
use crate::error::{SyncError, SyncResult};
use crate::ledger::{ActivationRecorder, Ledger, LedgerError, LedgerWriter};
use crate::listener::{EntityRef, ListenerPlugin, ListenerRegistry};
use crate::statistics::SyncReport;
use crate::transaction::{NoTransaction, TransactionScope};

/// State carried through one public call.
struct Run {
    report: SyncReport,
    saved_groups: HashSet<GroupId>,
}

impl Run {
    fn new() -> Self {
        Self {
            report: SyncReport::new(),
            saved_groups: HashSet::new(),
        }
    }

    fn finish(mut self) -> SyncReport {
        self.report.finish();
        self.report
    }
}

/// Outcome of the user part of a user save.
enum UserSave {
    /// Backend has no such user; cascades are skipped.
    NotFound,
    /// User hooks ran or were not needed; cascades proceed.
    Done,
}

/// Builder for [`OrgSyncEngine`].
pub struct OrgSyncEngineBuilder {
    config: OrgSyncConfig,
    backend: Option<Arc<dyn IdentityBackend>>,
    ledger: Option<Arc<dyn Ledger>>,
    recorder: Option<Arc<dyn LedgerWriter>>,
    registry: ListenerRegistry,
    scope: Arc<dyn TransactionScope>,
}

impl OrgSyncEngineBuilder {
    fn new(config: OrgSyncConfig) -> Self {
        Self {
            config,
            backend: None,
            ledger: None,
            recorder: None,
            registry: ListenerRegistry::new(),
            scope: Arc::new(NoTransaction),
        }
    }

    /// Identity backend to reconcile.
    #[must_use]
    pub fn backend(mut self, backend: Arc<dyn IdentityBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Ledger to read. No recorder is registered.
    #[must_use]
    pub fn ledger(mut self, ledger: Arc<dyn Ledger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Ledger to read and write through an [`ActivationRecorder`].
    #[must_use]
    pub fn ledger_store<L>(mut self, ledger: Arc<L>) -> Self
    where
        L: Ledger + LedgerWriter + 'static,
    {
        self.ledger = Some(ledger.clone());
        self.recorder = Some(ledger);
        self
    }

    /// Register a listener.
    #[must_use]
    pub fn listener(mut self, name: impl Into<String>, priority: i32, plugin: ListenerPlugin) -> Self {
        self.registry.register(name, priority, plugin);
        self
    }

    /// Replace the listener registry.
    #[must_use]
    pub fn registry(mut self, registry: ListenerRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Scope wrapped around every call and every hook invocation.
    #[must_use]
    pub fn transaction_scope(mut self, scope: Arc<dyn TransactionScope>) -> Self {
        self.scope = scope;
        self
    }

    /// Validate the configuration and assemble the engine.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Configuration` if the configuration is invalid or
    /// the backend or ledger is missing.
    pub fn build(mut self) -> SyncResult<OrgSyncEngine> {
        self.config.validate()?;
        let workspace = self.config.workspace()?;
        let backend = self
            .backend
            .ok_or_else(|| ConfigError::invalid("backend", "an identity backend is required"))?;
        let ledger = self
            .ledger
            .ok_or_else(|| ConfigError::invalid("ledger", "an activation ledger is required"))?;

        if let Some(writer) = self.recorder {
            Arc::new(ActivationRecorder::new(writer, workspace.clone())).register(&mut self.registry);
        }

        let enumerator = UserEnumerator::new(backend.clone(), self.config.page_size);
        info!(
            workspace = %workspace,
            listeners = self.registry.len(),
            strategy = ?enumerator.strategy(),
            "Organization sync engine ready"
        );

        Ok(OrgSyncEngine {
            dispatcher: Dispatcher::new(Arc::new(self.registry), self.scope),
            config: self.config,
            workspace,
            backend,
            ledger,
            enumerator,
        })
    }
}

/// Reconciles an identity backend with the activation ledger.
///
/// Calls against the same workspace must not run concurrently.
pub struct OrgSyncEngine {
    config: OrgSyncConfig,
    workspace: Workspace,
    backend: Arc<dyn IdentityBackend>,
    ledger: Arc<dyn Ledger>,
    dispatcher: Dispatcher,
    enumerator: UserEnumerator,
}

impl OrgSyncEngine {
    /// Start building an engine.
    #[must_use]
    pub fn builder(config: OrgSyncConfig) -> OrgSyncEngineBuilder {
        OrgSyncEngineBuilder::new(config)
    }

    #[must_use]
    pub fn config(&self) -> &OrgSyncConfig {
        &self.config
    }

    #[must_use]
    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// User enumeration strategy selected at construction.
    #[must_use]
    pub fn enumeration_strategy(&self) -> EnumerationStrategy {
        self.enumerator.strategy()
    }

    /// Startup reconciliation. Runs group additions then group deletions
    /// when `synchronize_groups` is enabled. Never fails.
    #[instrument(skip(self))]
    pub async fn startup(&self) -> SyncReport {
        let mut run = Run::new();
        if !self.config.synchronize_groups {
            debug!("Group synchronization at startup is disabled");
            return run.finish();
        }

        for event in [EventType::Added, EventType::Deleted] {
            if let Err(e) = self.groups_batch(event, &mut run).await {
                error!(event = %event, error = %e, "Startup group synchronization failed");
            }
        }
        run.finish()
    }

    /// Full reconciliation: group additions, group deletions, user additions,
    /// user deletions.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error; later phases are not run.
    #[instrument(skip(self))]
    pub async fn sync_all(&self) -> SyncResult<SyncReport> {
        let mut run = Run::new();

        debug!("Searching for groups not yet integrated");
        self.groups_batch(EventType::Added, &mut run).await?;
        debug!("Searching for integrated groups removed from the backend");
        self.groups_batch(EventType::Deleted, &mut run).await?;
        debug!("Searching for users not yet integrated");
        self.users_batch(EventType::Added, &mut run).await?;
        debug!("Searching for integrated users removed from the backend");
        self.users_batch(EventType::Deleted, &mut run).await?;

        let report = run.finish();
        info!(
            run_id = %report.run_id,
            dispatched = report.total_dispatched(),
            guard_skips = report.guard_skips,
            failures = report.item_failures.len() + report.listener_failures.len(),
            "Organization sync complete"
        );
        Ok(report)
    }

    /// Reconcile every group for one event.
    ///
    /// # Errors
    ///
    /// Returns an error if the groups cannot be listed or the ledger cannot
    /// be read. Per-group failures are recorded in the report.
    #[instrument(skip(self))]
    pub async fn sync_all_groups(&self, event: EventType) -> SyncResult<SyncReport> {
        let mut run = Run::new();
        self.groups_batch(event, &mut run).await?;
        Ok(run.finish())
    }

    /// Reconcile one group.
    ///
    /// # Errors
    ///
    /// Returns backend, ledger and hierarchy errors.
    #[instrument(skip(self))]
    pub async fn sync_group(&self, group_id: &GroupId, event: EventType) -> SyncResult<SyncReport> {
        let mut run = Run::new();
        self.backend.invalidate_cache().await?;
        self.group_event(group_id, event, &mut run).await?;
        Ok(run.finish())
    }

    /// Reconcile every user for one event.
    ///
    /// # Errors
    ///
    /// Returns an error if users cannot be enumerated or the ledger cannot be
    /// read. Per-user failures are recorded in the report.
    #[instrument(skip(self))]
    pub async fn sync_all_users(&self, event: EventType) -> SyncResult<SyncReport> {
        let mut run = Run::new();
        self.users_batch(event, &mut run).await?;
        Ok(run.finish())
    }

    /// Reconcile one user together with the profile and memberships.
    ///
    /// # Errors
    ///
    /// Returns backend and ledger errors.
    #[instrument(skip(self))]
    pub async fn sync_user(&self, username: &Username, event: EventType) -> SyncResult<SyncReport> {
        let mut run = Run::new();
        self.backend.invalidate_cache().await?;
        self.user_event(username, event, &mut run).await?;
        Ok(run.finish())
    }

    /// Reconcile the memberships of a user in one group.
    ///
    /// # Errors
    ///
    /// Returns backend and ledger errors.
    #[instrument(skip(self))]
    pub async fn sync_membership(
        &self,
        username: &Username,
        group_id: &GroupId,
        event: EventType,
    ) -> SyncResult<SyncReport> {
        let mut run = Run::new();

        let activated: Vec<Membership> = self
            .ledger
            .activated_memberships_for_user(&self.workspace, username)
            .await?
            .into_iter()
            .filter(|m| &m.group_id == group_id)
            .collect();

        match event {
            EventType::Deleted => {
                if activated.is_empty() {
                    debug!("No integrated membership for this user and group");
                    return Ok(run.finish());
                }
                let reported = match self
                    .backend
                    .find_memberships_by_user_and_group(username, group_id)
                    .await
                {
                    Ok(reported) => reported,
                    Err(e) => {
                        warn!(error = %e, "Could not list backend memberships, relying on per-membership checks");
                        Vec::new()
                    }
                };
                for membership in activated.iter().filter(|m| !reported.contains(m)) {
                    self.delete_membership(membership, &mut run).await?;
                }
            }
            EventType::Added | EventType::Updated => {
                let is_new = event.is_new();
                let reported = self
                    .backend
                    .find_memberships_by_user_and_group(username, group_id)
                    .await?;
                if reported.is_empty() {
                    debug!("Backend has no membership for this user and group");
                    return Ok(run.finish());
                }
                if !is_new && activated.is_empty() {
                    debug!("No integrated membership to update for this user and group");
                    return Ok(run.finish());
                }
                for membership in &reported {
                    if is_new != activated.contains(membership) {
                        self.save_membership(membership, is_new, &mut run).await?;
                    }
                }
            }
        }
        Ok(run.finish())
    }

    /// Whether the ledger records the user as integrated.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Ledger` if the ledger cannot be read.
    pub async fn is_user_synced(&self, username: &Username) -> SyncResult<bool> {
        Ok(self
            .ledger
            .has_record(EntityKind::User, &self.workspace, username.as_str())
            .await?)
    }

    async fn groups_batch(&self, event: EventType, run: &mut Run) -> SyncResult<()> {
        self.backend.invalidate_cache().await?;
        let present: Vec<GroupId> = self
            .backend
            .list_groups()
            .await?
            .into_iter()
            .map(|g| g.id)
            .collect();
        let activated = self.activated_groups().await?;
        let delta = diff_groups(&present, &activated);
        let targets = delta.for_event(event);
        debug!(event = %event, count = targets.len(), "Group reconciliation batch");

        for group_id in targets {
            if let Err(e) = self.group_event(group_id, event, run).await {
                if e.is_fatal() {
                    return Err(e);
                }
                error!(group_id = %group_id, event = %event, error = %e, "Failed to synchronize group");
                run.report
                    .record_item_failure(EntityKind::Group, group_id.as_str(), event, e.to_string());
            }
        }
        Ok(())
    }

    async fn users_batch(&self, event: EventType, run: &mut Run) -> SyncResult<()> {
        let recorded = self.activated_users().await?;
        let present: Vec<Username> = match event {
            EventType::Added => self.enumerator.usernames_for_additions().await?,
            EventType::Updated | EventType::Deleted => {
                self.enumerator.usernames_present().await?.into_iter().collect()
            }
        };
        let delta = diff_ordered(&present, &recorded);
        let targets = delta.for_event(event);
        debug!(event = %event, count = targets.len(), "User reconciliation batch");

        for username in targets {
            if let Err(e) = self.user_event(username, event, run).await {
                if e.is_fatal() {
                    return Err(e);
                }
                error!(username = %username, event = %event, error = %e, "Failed to synchronize user");
                run.report
                    .record_item_failure(EntityKind::User, username.as_str(), event, e.to_string());
            }
        }
        Ok(())
    }

    async fn activated_groups(&self) -> SyncResult<BTreeSet<GroupId>> {
        let ids = self
            .ledger
            .list_activated(EntityKind::Group, &self.workspace)
            .await?;
        let parsed: BTreeSet<GroupId> = ids
            .into_iter()
            .map(|id| id.parse::<GroupId>())
            .collect::<Result<_, _>>()
            .map_err(LedgerError::from)?;
        Ok(parsed)
    }

    async fn activated_users(&self) -> SyncResult<BTreeSet<Username>> {
        let ids = self
            .ledger
            .list_activated(EntityKind::User, &self.workspace)
            .await?;
        let parsed: BTreeSet<Username> = ids
            .into_iter()
            .map(|id| id.parse::<Username>())
            .collect::<Result<_, _>>()
            .map_err(LedgerError::from)?;
        Ok(parsed)
    }

    async fn has_record(&self, kind: EntityKind, id: &str) -> SyncResult<bool> {
        Ok(self.ledger.has_record(kind, &self.workspace, id).await?)
    }

    /// Existence guard. True only when the backend confirms the entity is gone.
    fn confirm_absent<T>(&self, kind: EntityKind, id: &str, lookup: BackendResult<Option<T>>, run: &mut Run) -> bool {
        match lookup {
            Ok(None) => true,
            Ok(Some(_)) => {
                warn!(kind = %kind, entity_id = %id, "Entity still exists in the backend, delete listeners not invoked");
                run.report.record_guard_skip();
                false
            }
            Err(e) => {
                warn!(
                    kind = %kind,
                    entity_id = %id,
                    error = %e,
                    "Could not verify that the entity is gone, delete listeners not invoked"
                );
                run.report.record_guard_skip();
                false
            }
        }
    }

    async fn group_event(&self, group_id: &GroupId, event: EventType, run: &mut Run) -> SyncResult<()> {
        match event {
            EventType::Deleted => self.delete_group_tree(group_id, run).await,
            EventType::Added | EventType::Updated => {
                let Some(group) = self.backend.find_group(group_id).await? else {
                    warn!(group_id = %group_id, "Group not found in the backend");
                    run.report.record_not_found();
                    return Ok(());
                };
                self.save_group_with_parents(&group, event.is_new(), run).await
            }
        }
    }

    async fn save_group_with_parents(&self, group: &Group, is_new: bool, run: &mut Run) -> SyncResult<()> {
        let depth = group.id.depth();
        if depth > self.config.max_group_depth {
            return Err(SyncError::GroupDepthExceeded {
                group_id: group.id.clone(),
                depth,
                max_depth: self.config.max_group_depth,
            });
        }

        for ancestor_id in group.id.ancestors() {
            match self.backend.find_group(&ancestor_id).await? {
                Some(ancestor) => self.save_group(&ancestor, is_new, run).await?,
                None => warn!(
                    group_id = %group.id,
                    parent_id = %ancestor_id,
                    "Parent group not found in the backend, skipping it"
                ),
            }
        }
        self.save_group(group, is_new, run).await
    }

    async fn save_group(&self, group: &Group, is_new: bool, run: &mut Run) -> SyncResult<()> {
        if run.saved_groups.contains(&group.id) {
            return Ok(());
        }
        if is_new && self.has_record(EntityKind::Group, group.id.as_str()).await? {
            debug!(group_id = %group.id, "Group already integrated");
        } else {
            let event = if is_new { EventType::Added } else { EventType::Updated };
            self.dispatcher
                .dispatch(EntityRef::Group(group), event, &mut run.report)
                .await;
        }
        run.saved_groups.insert(group.id.clone());
        Ok(())
    }

    async fn delete_group_tree(&self, group_id: &GroupId, run: &mut Run) -> SyncResult<()> {
        let mut children = self
            .ledger
            .activated_children(&self.workspace, group_id)
            .await?;
        children.sort_by(|a, b| b.depth().cmp(&a.depth()).then_with(|| b.cmp(a)));

        for child in &children {
            self.delete_group(child, run).await?;
        }
        self.delete_group(group_id, run).await
    }

    async fn delete_group(&self, group_id: &GroupId, run: &mut Run) -> SyncResult<()> {
        let lookup = self.backend.find_group(group_id).await;
        if !self.confirm_absent(EntityKind::Group, group_id.as_str(), lookup, run) {
            return Ok(());
        }
        if !self.has_record(EntityKind::Group, group_id.as_str()).await? {
            debug!(group_id = %group_id, "Group not integrated or already deleted");
            return Ok(());
        }

        let memberships = self
            .ledger
            .activated_memberships_for_group(&self.workspace, group_id)
            .await?;
        for membership in &memberships {
            self.delete_membership(membership, run).await?;
        }

        let group = Group::new(group_id.clone());
        self.dispatcher
            .dispatch(EntityRef::Group(&group), EventType::Deleted, &mut run.report)
            .await;
        Ok(())
    }

    async fn user_event(&self, username: &Username, event: EventType, run: &mut Run) -> SyncResult<()> {
        match event {
            EventType::Deleted => self.delete_user(username, run).await,
            EventType::Added | EventType::Updated => {
                if let UserSave::NotFound = self.save_user(username, event.is_new(), run).await? {
                    return Ok(());
                }
                self.save_profile(username, event, run).await?;
                self.save_user_memberships(username, event, run).await
            }
        }
    }

    async fn save_user(&self, username: &Username, is_new: bool, run: &mut Run) -> SyncResult<UserSave> {
        if is_new && self.has_record(EntityKind::User, username.as_str()).await? {
            debug!(username = %username, "User already integrated");
            return Ok(UserSave::Done);
        }
        let Some(mut user) = self.backend.find_user(username).await? else {
            info!(username = %username, "User not found in the backend");
            run.report.record_not_found();
            return Ok(UserSave::NotFound);
        };
        user.default_created_at(Utc::now());

        let event = if is_new { EventType::Added } else { EventType::Updated };
        self.dispatcher
            .dispatch(EntityRef::User(&user), event, &mut run.report)
            .await;
        Ok(UserSave::Done)
    }

    async fn save_profile(&self, username: &Username, event: EventType, run: &mut Run) -> SyncResult<()> {
        let is_new = event.is_new();
        let mut profile = match self.backend.find_profile(username).await? {
            Some(profile) => profile,
            None => {
                debug!(username = %username, "Creating missing user profile");
                let created = UserProfile::new(username.clone());
                self.backend.save_profile(&created, is_new).await?;
                self.backend
                    .find_profile(username)
                    .await?
                    .unwrap_or(created)
            }
        };

        if is_new && self.has_record(EntityKind::Profile, username.as_str()).await? {
            debug!(username = %username, "User profile already integrated");
            return Ok(());
        }
        profile.ensure_attributes();
        self.dispatcher
            .dispatch(EntityRef::Profile(&profile), event, &mut run.report)
            .await;
        Ok(())
    }

    async fn save_user_memberships(&self, username: &Username, event: EventType, run: &mut Run) -> SyncResult<()> {
        let reported = self.backend.list_memberships_for_user(username).await?;
        let activated = self
            .ledger
            .activated_memberships_for_user(&self.workspace, username)
            .await?;

        for (membership, membership_event) in plan_user_memberships(event, &reported, &activated) {
            if let Err(e) = self
                .save_membership(&membership, membership_event.is_new(), run)
                .await
            {
                if e.is_fatal() {
                    return Err(e);
                }
                let id = membership.id();
                error!(membership_id = %id, error = %e, "Failed to synchronize membership");
                run.report.record_item_failure(
                    EntityKind::Membership,
                    id.as_str(),
                    membership_event,
                    e.to_string(),
                );
            }
        }
        Ok(())
    }

    /// Save hooks for one membership, activating its group and user first.
    async fn save_membership(&self, membership: &Membership, is_new: bool, run: &mut Run) -> SyncResult<()> {
        let found = self
            .backend
            .find_membership(&membership.username, &membership.group_id, &membership.membership_type)
            .await?;
        let Some(membership) = found else {
            debug!(membership_id = %membership.id(), "Membership not found in the backend");
            run.report.record_not_found();
            return Ok(());
        };

        if !self
            .has_record(EntityKind::Group, membership.group_id.as_str())
            .await?
        {
            self.group_event(&membership.group_id, EventType::Added, run).await?;
        }
        if !self
            .has_record(EntityKind::User, membership.username.as_str())
            .await?
        {
            self.save_user(&membership.username, true, run).await?;
        }

        let id = membership.id();
        if is_new && self.has_record(EntityKind::Membership, id.as_str()).await? {
            debug!(membership_id = %id, "Membership already integrated");
            return Ok(());
        }
        let event = if is_new { EventType::Added } else { EventType::Updated };
        self.dispatcher
            .dispatch(EntityRef::Membership(&membership), event, &mut run.report)
            .await;
        Ok(())
    }

    async fn delete_user(&self, username: &Username, run: &mut Run) -> SyncResult<()> {
        let lookup = self.backend.find_user(username).await;
        if !self.confirm_absent(EntityKind::User, username.as_str(), lookup, run) {
            return Ok(());
        }

        let memberships = self
            .ledger
            .activated_memberships_for_user(&self.workspace, username)
            .await?;
        for membership in &memberships {
            self.delete_membership(membership, run).await?;
        }
        self.delete_profile(username, run).await?;

        if !self.has_record(EntityKind::User, username.as_str()).await? {
            debug!(username = %username, "User not integrated or already deleted");
            return Ok(());
        }
        let user = User::new(username.clone());
        self.dispatcher
            .dispatch(EntityRef::User(&user), EventType::Deleted, &mut run.report)
            .await;
        Ok(())
    }

    async fn delete_profile(&self, username: &Username, run: &mut Run) -> SyncResult<()> {
        let lookup = self.backend.find_profile(username).await;
        if !self.confirm_absent(EntityKind::Profile, username.as_str(), lookup, run) {
            return Ok(());
        }
        if !self.has_record(EntityKind::Profile, username.as_str()).await? {
            return Ok(());
        }
        let mut profile = UserProfile::new(username.clone());
        profile.ensure_attributes();
        self.dispatcher
            .dispatch(EntityRef::Profile(&profile), EventType::Deleted, &mut run.report)
            .await;
        Ok(())
    }

    async fn delete_membership(&self, membership: &Membership, run: &mut Run) -> SyncResult<()> {
        let id = membership.id();
        let lookup = self
            .backend
            .find_membership(&membership.username, &membership.group_id, &membership.membership_type)
            .await;
        if !self.confirm_absent(EntityKind::Membership, id.as_str(), lookup, run) {
            return Ok(());
        }
        if !self.has_record(EntityKind::Membership, id.as_str()).await? {
            debug!(membership_id = %id, "Membership not integrated or already deleted");
            return Ok(());
        }
        self.dispatcher
            .dispatch(EntityRef::Membership(membership), EventType::Deleted, &mut run.report)
            .await;
        Ok(())
    }
}
