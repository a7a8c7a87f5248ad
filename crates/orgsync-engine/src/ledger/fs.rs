//! Filesystem ledger.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/<scope>/groups/platform/.activated
//! <root>/<scope>/groups/platform/users/.activated
//! <root>/<scope>/users/john/.activated
//! <root>/<scope>/users/john/.profile
//! <root>/<scope>/users/john/memberships.json
//! ```
//!
//! Group folders are nested by path, so every activated descendant of a
//! group lives below its folder. A folder without a marker only exists to
//! hold descendants.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;

use orgsync_core::{
    EntityKind, GroupId, Membership, MembershipId, MembershipType, Username, Workspace,
};

use super::{Ledger, LedgerEntry, LedgerError, LedgerResult, LedgerWriter};

const GROUPS_DIR: &str = "groups";
const USERS_DIR: &str = "users";
const ACTIVATED_MARKER: &str = ".activated";
const PROFILE_MARKER: &str = ".profile";
const MEMBERSHIPS_FILE: &str = "memberships.json";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
struct MembershipRecord {
    group_id: GroupId,
    membership_type: MembershipType,
}

/// Ledger persisted as a directory tree.
#[derive(Debug, Clone)]
pub struct FsLedger {
    root: PathBuf,
}

impl FsLedger {
    /// Create a ledger rooted at `root`. Directories are created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn groups_dir(&self, scope: &Workspace) -> PathBuf {
        self.root.join(scope.as_str()).join(GROUPS_DIR)
    }

    fn users_dir(&self, scope: &Workspace) -> PathBuf {
        self.root.join(scope.as_str()).join(USERS_DIR)
    }

    fn group_dir(&self, scope: &Workspace, group_id: &GroupId) -> PathBuf {
        group_id
            .segments()
            .fold(self.groups_dir(scope), |path, segment| path.join(segment))
    }

    fn user_dir(&self, scope: &Workspace, username: &Username) -> PathBuf {
        self.users_dir(scope).join(username.as_str())
    }

    async fn read_memberships(&self, user_dir: &Path) -> LedgerResult<BTreeSet<MembershipRecord>> {
        let path = user_dir.join(MEMBERSHIPS_FILE);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes)
            .map_err(|e| LedgerError::corrupt(path.display().to_string(), e.to_string()))
    }

    async fn write_memberships(&self, user_dir: &Path, records: &BTreeSet<MembershipRecord>) -> LedgerResult<()> {
        let path = user_dir.join(MEMBERSHIPS_FILE);
        if records.is_empty() {
            return remove_file_if_exists(&path).await;
        }
        fs::create_dir_all(user_dir).await?;
        let tmp = user_dir.join(format!("{MEMBERSHIPS_FILE}.tmp"));
        fs::write(&tmp, serde_json::to_vec_pretty(records)?).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Activated usernames that carry `marker`.
    async fn users_with_marker(&self, scope: &Workspace, marker: &str) -> LedgerResult<BTreeSet<String>> {
        let mut found = BTreeSet::new();
        for (username, dir) in self.user_dirs(scope).await? {
            if marker_present(&dir.join(marker)).await? {
                found.insert(username.into_inner());
            }
        }
        Ok(found)
    }

    async fn user_dirs(&self, scope: &Workspace) -> LedgerResult<Vec<(Username, PathBuf)>> {
        let users_dir = self.users_dir(scope);
        let mut entries = match fs::read_dir(&users_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut dirs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let path = entry.path();
            let name = entry.file_name().into_string().map_err(|_| {
                LedgerError::corrupt(path.display().to_string(), "user folder name is not UTF-8")
            })?;
            let username = Username::new(name)
                .map_err(|e| LedgerError::corrupt(path.display().to_string(), e.to_string()))?;
            dirs.push((username, path));
        }
        dirs.sort();
        Ok(dirs)
    }

    async fn memberships_in_scope(&self, scope: &Workspace) -> LedgerResult<Vec<Membership>> {
        let mut memberships = Vec::new();
        for (username, dir) in self.user_dirs(scope).await? {
            for record in self.read_memberships(&dir).await? {
                memberships.push(Membership::new(
                    username.clone(),
                    record.group_id,
                    record.membership_type,
                ));
            }
        }
        Ok(memberships)
    }

    /// Activated groups at or below `start`, found by walking the folder tree.
    async fn walk_groups(&self, scope: &Workspace, start: Option<&GroupId>) -> LedgerResult<Vec<GroupId>> {
        let base = self.groups_dir(scope);
        let start_dir = match start {
            Some(group_id) => self.group_dir(scope, group_id),
            None => base.clone(),
        };

        let mut found = Vec::new();
        let mut stack = vec![start_dir];
        while let Some(dir) = stack.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let hidden = entry.file_name().to_string_lossy().starts_with('.');
                if hidden || !entry.file_type().await?.is_dir() {
                    continue;
                }
                let path = entry.path();
                if marker_present(&path.join(ACTIVATED_MARKER)).await? {
                    found.push(group_id_from_path(&base, &path)?);
                }
                stack.push(path);
            }
        }
        found.sort();
        Ok(found)
    }
}

fn group_id_from_path(base: &Path, path: &Path) -> LedgerResult<GroupId> {
    let corrupt = |message: &str| LedgerError::corrupt(path.display().to_string(), message);
    let relative = path
        .strip_prefix(base)
        .map_err(|_| corrupt("group folder outside the groups directory"))?;

    let mut id = String::new();
    for component in relative.components() {
        let segment = component
            .as_os_str()
            .to_str()
            .ok_or_else(|| corrupt("group folder name is not UTF-8"))?;
        id.push('/');
        id.push_str(segment);
    }
    GroupId::new(id).map_err(|e| corrupt(&e.to_string()))
}

/// Markers are plain files; a folder with the same name does not count.
async fn marker_present(path: &Path) -> LedgerResult<bool> {
    match fs::metadata(path).await {
        Ok(metadata) => Ok(metadata.is_file()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

async fn remove_file_if_exists(path: &Path) -> LedgerResult<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Remove `dir` and its parents while they are empty, stopping at `stop`.
async fn prune_empty_dirs(dir: &Path, stop: &Path) -> LedgerResult<()> {
    let mut current = dir.to_path_buf();
    while current.starts_with(stop) && current != stop {
        let mut entries = match fs::read_dir(&current).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if entries.next_entry().await?.is_some() {
            return Ok(());
        }
        fs::remove_dir(&current).await?;
        if !current.pop() {
            break;
        }
    }
    Ok(())
}

#[async_trait]
impl Ledger for FsLedger {
    async fn list_activated(&self, kind: EntityKind, scope: &Workspace) -> LedgerResult<BTreeSet<String>> {
        match kind {
            EntityKind::Group => Ok(self
                .walk_groups(scope, None)
                .await?
                .into_iter()
                .map(GroupId::into_inner)
                .collect()),
            EntityKind::User => self.users_with_marker(scope, ACTIVATED_MARKER).await,
            EntityKind::Profile => self.users_with_marker(scope, PROFILE_MARKER).await,
            EntityKind::Membership => Ok(self
                .memberships_in_scope(scope)
                .await?
                .iter()
                .map(|m| m.id().to_string())
                .collect()),
        }
    }

    async fn has_record(&self, kind: EntityKind, scope: &Workspace, id: &str) -> LedgerResult<bool> {
        match kind {
            EntityKind::Group => {
                let group_id: GroupId = id.parse()?;
                marker_present(&self.group_dir(scope, &group_id).join(ACTIVATED_MARKER)).await
            }
            EntityKind::User | EntityKind::Profile => {
                let username: Username = id.parse()?;
                let marker = if kind == EntityKind::User {
                    ACTIVATED_MARKER
                } else {
                    PROFILE_MARKER
                };
                marker_present(&self.user_dir(scope, &username).join(marker)).await
            }
            EntityKind::Membership => {
                let membership_id: MembershipId = id.parse()?;
                let (membership_type, username, group_id) = membership_id.parts()?;
                let records = self.read_memberships(&self.user_dir(scope, &username)).await?;
                Ok(records.contains(&MembershipRecord {
                    group_id,
                    membership_type,
                }))
            }
        }
    }

    async fn activated_children(&self, scope: &Workspace, group_id: &GroupId) -> LedgerResult<Vec<GroupId>> {
        self.walk_groups(scope, Some(group_id)).await
    }

    async fn activated_memberships_for_user(
        &self,
        scope: &Workspace,
        username: &Username,
    ) -> LedgerResult<Vec<Membership>> {
        let records = self.read_memberships(&self.user_dir(scope, username)).await?;
        Ok(records
            .into_iter()
            .map(|r| Membership::new(username.clone(), r.group_id, r.membership_type))
            .collect())
    }

    async fn activated_memberships_for_group(
        &self,
        scope: &Workspace,
        group_id: &GroupId,
    ) -> LedgerResult<Vec<Membership>> {
        let mut memberships = self.memberships_in_scope(scope).await?;
        memberships.retain(|m| &m.group_id == group_id);
        Ok(memberships)
    }
}

#[async_trait]
impl LedgerWriter for FsLedger {
    async fn mark_activated(&self, scope: &Workspace, entry: &LedgerEntry) -> LedgerResult<()> {
        match entry {
            LedgerEntry::Group(group_id) => {
                let dir = self.group_dir(scope, group_id);
                fs::create_dir_all(&dir).await?;
                fs::write(dir.join(ACTIVATED_MARKER), b"").await?;
            }
            LedgerEntry::User(username) => {
                let dir = self.user_dir(scope, username);
                fs::create_dir_all(&dir).await?;
                fs::write(dir.join(ACTIVATED_MARKER), b"").await?;
            }
            LedgerEntry::Profile(username) => {
                let dir = self.user_dir(scope, username);
                fs::create_dir_all(&dir).await?;
                fs::write(dir.join(PROFILE_MARKER), b"").await?;
            }
            LedgerEntry::Membership(membership) => {
                let dir = self.user_dir(scope, &membership.username);
                let mut records = self.read_memberships(&dir).await?;
                let inserted = records.insert(MembershipRecord {
                    group_id: membership.group_id.clone(),
                    membership_type: membership.membership_type.clone(),
                });
                if inserted {
                    self.write_memberships(&dir, &records).await?;
                }
            }
        }
        Ok(())
    }

    async fn clear(&self, kind: EntityKind, scope: &Workspace, id: &str) -> LedgerResult<()> {
        match kind {
            EntityKind::Group => {
                let group_id: GroupId = id.parse()?;
                let dir = self.group_dir(scope, &group_id);
                remove_file_if_exists(&dir.join(ACTIVATED_MARKER)).await?;
                prune_empty_dirs(&dir, &self.groups_dir(scope)).await
            }
            EntityKind::User | EntityKind::Profile => {
                let username: Username = id.parse()?;
                let dir = self.user_dir(scope, &username);
                let marker = if kind == EntityKind::User {
                    ACTIVATED_MARKER
                } else {
                    PROFILE_MARKER
                };
                remove_file_if_exists(&dir.join(marker)).await?;
                prune_empty_dirs(&dir, &self.users_dir(scope)).await
            }
            EntityKind::Membership => {
                let membership_id: MembershipId = id.parse()?;
                let (membership_type, username, group_id) = membership_id.parts()?;
                let dir = self.user_dir(scope, &username);
                let mut records = self.read_memberships(&dir).await?;
                if records.remove(&MembershipRecord {
                    group_id,
                    membership_type,
                }) {
                    self.write_memberships(&dir, &records).await?;
                    prune_empty_dirs(&dir, &self.users_dir(scope)).await?;
                }
                Ok(())
            }
        }
    }
}
