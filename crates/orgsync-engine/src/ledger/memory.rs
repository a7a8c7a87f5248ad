//! In-process ledger.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use orgsync_core::{EntityKind, GroupId, Membership, MembershipId, Username, Workspace};

use super::{Ledger, LedgerEntry, LedgerError, LedgerResult, LedgerWriter};

type Partition = (Workspace, EntityKind);

/// Ledger kept in memory, mainly for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    records: RwLock<BTreeMap<Partition, BTreeSet<String>>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every read fail with an I/O error.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every write fail with an I/O error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check(flag: &AtomicBool, operation: &str) -> LedgerResult<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(LedgerError::Io(io::Error::other(format!("{operation} disabled"))));
        }
        Ok(())
    }

    async fn memberships(&self, scope: &Workspace) -> LedgerResult<Vec<Membership>> {
        Self::check(&self.fail_reads, "reads")?;
        let records = self.records.read().await;
        let Some(ids) = records.get(&(scope.clone(), EntityKind::Membership)) else {
            return Ok(Vec::new());
        };
        ids.iter()
            .map(|id| -> LedgerResult<Membership> {
                let id: MembershipId = id.parse()?;
                Ok(Membership::from_id(&id)?)
            })
            .collect()
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn list_activated(&self, kind: EntityKind, scope: &Workspace) -> LedgerResult<BTreeSet<String>> {
        Self::check(&self.fail_reads, "reads")?;
        Ok(self
            .records
            .read()
            .await
            .get(&(scope.clone(), kind))
            .cloned()
            .unwrap_or_default())
    }

    async fn has_record(&self, kind: EntityKind, scope: &Workspace, id: &str) -> LedgerResult<bool> {
        Self::check(&self.fail_reads, "reads")?;
        Ok(self
            .records
            .read()
            .await
            .get(&(scope.clone(), kind))
            .is_some_and(|ids| ids.contains(id)))
    }

    async fn activated_children(&self, scope: &Workspace, group_id: &GroupId) -> LedgerResult<Vec<GroupId>> {
        let mut children = Vec::new();
        for id in self.list_activated(EntityKind::Group, scope).await? {
            let id: GroupId = id.parse()?;
            if group_id.is_ancestor_of(&id) {
                children.push(id);
            }
        }
        Ok(children)
    }

    async fn activated_memberships_for_user(
        &self,
        scope: &Workspace,
        username: &Username,
    ) -> LedgerResult<Vec<Membership>> {
        let mut memberships = self.memberships(scope).await?;
        memberships.retain(|m| &m.username == username);
        Ok(memberships)
    }

    async fn activated_memberships_for_group(
        &self,
        scope: &Workspace,
        group_id: &GroupId,
    ) -> LedgerResult<Vec<Membership>> {
        let mut memberships = self.memberships(scope).await?;
        memberships.retain(|m| &m.group_id == group_id);
        Ok(memberships)
    }
}

#[async_trait]
impl LedgerWriter for MemoryLedger {
    async fn mark_activated(&self, scope: &Workspace, entry: &LedgerEntry) -> LedgerResult<()> {
        Self::check(&self.fail_writes, "writes")?;
        self.records
            .write()
            .await
            .entry((scope.clone(), entry.kind()))
            .or_default()
            .insert(entry.id());
        Ok(())
    }

    async fn clear(&self, kind: EntityKind, scope: &Workspace, id: &str) -> LedgerResult<()> {
        Self::check(&self.fail_writes, "writes")?;
        if let Some(ids) = self.records.write().await.get_mut(&(scope.clone(), kind)) {
            ids.remove(id);
        }
        Ok(())
    }
}
