//! In-memory identity backend.
//!
//! Backs the snapshot loader used by the CLI and serves as the backend for
//! tests. Read counters and failure switches let callers observe and
//! perturb the engine's access pattern.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use orgsync_core::{
    Group, GroupId, Membership, MembershipId, MembershipType, User, UserProfile, Username,
};

use super::{
    BackendError, BackendResult, IdentityBackend, IdentityStore, Page, PageRequest, StoreRole,
};

#[derive(Debug, Default)]
struct Directory {
    groups: BTreeMap<GroupId, Group>,
    users: BTreeMap<Username, User>,
    memberships: BTreeMap<MembershipId, Membership>,
    profiles: BTreeMap<Username, UserProfile>,
}

/// Identity backend holding the whole directory in memory.
#[derive(Default)]
pub struct InMemoryBackend {
    directory: RwLock<Directory>,
    stores: Vec<Arc<dyn IdentityStore>>,
    page_requests: Mutex<Vec<PageRequest>>,
    cache_invalidations: AtomicUsize,
    profile_saves: AtomicUsize,
    fail_lookups: AtomicBool,
    fail_listings: AtomicBool,
}

impl InMemoryBackend {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a group.
    #[must_use]
    pub fn with_group(mut self, group: Group) -> Self {
        self.directory.get_mut().groups.insert(group.id.clone(), group);
        self
    }

    /// Add a user.
    #[must_use]
    pub fn with_user(mut self, user: User) -> Self {
        self.directory
            .get_mut()
            .users
            .insert(user.username.clone(), user);
        self
    }

    /// Add a membership.
    #[must_use]
    pub fn with_membership(mut self, membership: Membership) -> Self {
        self.directory
            .get_mut()
            .memberships
            .insert(membership.id(), membership);
        self
    }

    /// Add a profile.
    #[must_use]
    pub fn with_profile(mut self, profile: UserProfile) -> Self {
        self.directory
            .get_mut()
            .profiles
            .insert(profile.username.clone(), profile);
        self
    }

    /// Expose physical stores for direct enumeration.
    #[must_use]
    pub fn with_stores(mut self, stores: Vec<Arc<dyn IdentityStore>>) -> Self {
        self.stores = stores;
        self
    }

    /// Add or replace a group.
    pub async fn insert_group(&self, group: Group) {
        self.directory
            .write()
            .await
            .groups
            .insert(group.id.clone(), group);
    }

    /// Remove a group.
    pub async fn remove_group(&self, id: &GroupId) -> Option<Group> {
        self.directory.write().await.groups.remove(id)
    }

    /// Add or replace a user.
    pub async fn insert_user(&self, user: User) {
        self.directory
            .write()
            .await
            .users
            .insert(user.username.clone(), user);
    }

    /// Remove a user together with the profile.
    pub async fn remove_user(&self, username: &Username) -> Option<User> {
        let mut directory = self.directory.write().await;
        directory.profiles.remove(username);
        directory.users.remove(username)
    }

    /// Add or replace a membership.
    pub async fn insert_membership(&self, membership: Membership) {
        self.directory
            .write()
            .await
            .memberships
            .insert(membership.id(), membership);
    }

    /// Remove a membership.
    pub async fn remove_membership(&self, id: &MembershipId) -> Option<Membership> {
        self.directory.write().await.memberships.remove(id)
    }

    /// Make every `find_*` call fail.
    pub fn set_fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }

    /// Make every listing call fail.
    pub fn set_fail_listings(&self, fail: bool) {
        self.fail_listings.store(fail, Ordering::SeqCst);
    }

    /// Page requests served by [`IdentityBackend::list_users_page`].
    pub async fn page_requests(&self) -> Vec<PageRequest> {
        self.page_requests.lock().await.clone()
    }

    /// Number of cache invalidations received.
    pub fn cache_invalidations(&self) -> usize {
        self.cache_invalidations.load(Ordering::SeqCst)
    }

    /// Number of profile saves received.
    pub fn profile_saves(&self) -> usize {
        self.profile_saves.load(Ordering::SeqCst)
    }

    fn check_lookup(&self) -> BackendResult<()> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(BackendError::unavailable("lookups disabled"));
        }
        Ok(())
    }

    fn check_listing(&self) -> BackendResult<()> {
        if self.fail_listings.load(Ordering::SeqCst) {
            return Err(BackendError::unavailable("listings disabled"));
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityBackend for InMemoryBackend {
    async fn list_groups(&self) -> BackendResult<Vec<Group>> {
        self.check_listing()?;
        Ok(self.directory.read().await.groups.values().cloned().collect())
    }

    async fn find_group(&self, id: &GroupId) -> BackendResult<Option<Group>> {
        self.check_lookup()?;
        Ok(self.directory.read().await.groups.get(id).cloned())
    }

    async fn user_count(&self) -> BackendResult<usize> {
        self.check_listing()?;
        Ok(self.directory.read().await.users.len())
    }

    async fn list_users_page(&self, page: PageRequest) -> BackendResult<Page<User>> {
        self.check_listing()?;
        self.page_requests.lock().await.push(page);
        let directory = self.directory.read().await;
        let items = directory
            .users
            .values()
            .skip(page.offset)
            .take(page.length)
            .cloned()
            .collect();
        Ok(Page::new(items, directory.users.len()))
    }

    async fn find_user(&self, username: &Username) -> BackendResult<Option<User>> {
        self.check_lookup()?;
        Ok(self.directory.read().await.users.get(username).cloned())
    }

    async fn list_memberships_for_user(&self, username: &Username) -> BackendResult<Vec<Membership>> {
        self.check_listing()?;
        Ok(self
            .directory
            .read()
            .await
            .memberships
            .values()
            .filter(|m| &m.username == username)
            .cloned()
            .collect())
    }

    async fn find_memberships_by_user_and_group(
        &self,
        username: &Username,
        group_id: &GroupId,
    ) -> BackendResult<Vec<Membership>> {
        self.check_lookup()?;
        Ok(self
            .directory
            .read()
            .await
            .memberships
            .values()
            .filter(|m| &m.username == username && &m.group_id == group_id)
            .cloned()
            .collect())
    }

    async fn find_membership(
        &self,
        username: &Username,
        group_id: &GroupId,
        membership_type: &MembershipType,
    ) -> BackendResult<Option<Membership>> {
        self.check_lookup()?;
        let id = MembershipId::compute(membership_type, username, group_id);
        Ok(self.directory.read().await.memberships.get(&id).cloned())
    }

    async fn find_profile(&self, username: &Username) -> BackendResult<Option<UserProfile>> {
        self.check_lookup()?;
        Ok(self.directory.read().await.profiles.get(username).cloned())
    }

    async fn save_profile(&self, profile: &UserProfile, _is_new: bool) -> BackendResult<()> {
        let mut directory = self.directory.write().await;
        if !directory.users.contains_key(&profile.username) {
            return Err(BackendError::query(format!(
                "cannot save profile of unknown user {}",
                profile.username
            )));
        }
        directory
            .profiles
            .insert(profile.username.clone(), profile.clone());
        self.profile_saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn invalidate_cache(&self) -> BackendResult<()> {
        self.cache_invalidations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn identity_stores(&self) -> Vec<Arc<dyn IdentityStore>> {
        self.stores.clone()
    }
}

/// A username-only store used to model one side of a dual-store backend.
pub struct InMemoryStore {
    role: StoreRole,
    invocation_context: bool,
    usernames: RwLock<Vec<Username>>,
    page_requests: Mutex<Vec<PageRequest>>,
}

impl InMemoryStore {
    /// Create a store with an invocation context.
    #[must_use]
    pub fn new(role: StoreRole, usernames: Vec<Username>) -> Self {
        Self {
            role,
            invocation_context: true,
            usernames: RwLock::new(usernames),
            page_requests: Mutex::new(Vec::new()),
        }
    }

    /// Drop the invocation context so probing falls back to generic enumeration.
    #[must_use]
    pub fn without_invocation_context(mut self) -> Self {
        self.invocation_context = false;
        self
    }

    /// Remove a username.
    pub async fn remove(&self, username: &Username) {
        self.usernames.write().await.retain(|u| u != username);
    }

    /// Page requests served so far.
    pub async fn page_requests(&self) -> Vec<PageRequest> {
        self.page_requests.lock().await.clone()
    }
}

#[async_trait]
impl IdentityStore for InMemoryStore {
    fn role(&self) -> StoreRole {
        self.role
    }

    fn has_invocation_context(&self) -> bool {
        self.invocation_context
    }

    async fn user_count(&self) -> BackendResult<usize> {
        Ok(self.usernames.read().await.len())
    }

    async fn load_usernames(&self, page: PageRequest) -> BackendResult<Vec<Username>> {
        self.page_requests.lock().await.push(page);
        Ok(self
            .usernames
            .read()
            .await
            .iter()
            .skip(page.offset)
            .take(page.length)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(value: &str) -> Username {
        value.parse().unwrap()
    }

    fn gid(value: &str) -> GroupId {
        value.parse().unwrap()
    }

    fn backend() -> InMemoryBackend {
        InMemoryBackend::new()
            .with_group(Group::new(gid("/platform")))
            .with_group(Group::new(gid("/platform/users")))
            .with_user(User::new(name("john")))
            .with_user(User::new(name("mary")))
            .with_membership(Membership::new(
                name("john"),
                gid("/platform/users"),
                "member".parse().unwrap(),
            ))
    }

    #[tokio::test]
    async fn test_lookups() {
        let backend = backend();
        assert!(backend.find_group(&gid("/platform")).await.unwrap().is_some());
        assert!(backend.find_group(&gid("/missing")).await.unwrap().is_none());
        assert!(backend.find_user(&name("john")).await.unwrap().is_some());

        let found = backend
            .find_membership(&name("john"), &gid("/platform/users"), &"member".parse().unwrap())
            .await
            .unwrap();
        assert!(found.is_some());

        let by_group = backend
            .find_memberships_by_user_and_group(&name("john"), &gid("/platform"))
            .await
            .unwrap();
        assert!(by_group.is_empty());
    }

    #[tokio::test]
    async fn test_paging_records_requests() {
        let backend = backend();
        let page = backend.list_users_page(PageRequest::new(1, 10)).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].username.as_str(), "mary");
        assert_eq!(backend.page_requests().await, vec![PageRequest::new(1, 10)]);
    }

    #[tokio::test]
    async fn test_failure_switches() {
        let backend = backend();
        backend.set_fail_lookups(true);
        let err = backend.find_user(&name("john")).await.unwrap_err();
        assert!(err.is_transient());
        assert!(backend.list_groups().await.is_ok());

        backend.set_fail_lookups(false);
        backend.set_fail_listings(true);
        assert!(backend.list_groups().await.is_err());
    }

    #[tokio::test]
    async fn test_save_profile_requires_user() {
        let backend = backend();
        backend
            .save_profile(&UserProfile::new(name("john")), true)
            .await
            .unwrap();
        assert_eq!(backend.profile_saves(), 1);
        assert!(backend
            .save_profile(&UserProfile::new(name("ghost")), true)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_store_paging() {
        let store = InMemoryStore::new(StoreRole::Primary, vec![name("a"), name("b"), name("c")]);
        assert_eq!(store.user_count().await.unwrap(), 3);
        let page = store.load_usernames(PageRequest::new(2, 5)).await.unwrap();
        assert_eq!(page, vec![name("c")]);

        store.remove(&name("a")).await;
        assert_eq!(store.user_count().await.unwrap(), 2);
    }
}
