//! Shared fixtures for orgsync-engine integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::{Arc, Mutex, Once};

use orgsync_engine::{
    EntityKind, Group, GroupId, GroupListener, Hook, ListenerError, ListenerPlugin,
    ListenerRegistry, ListenerResult, Membership, MembershipListener, ProfileListener, User,
    UserListener, UserProfile, Username,
};

static INIT: Once = Once::new();

/// Initialize logging for tests (once).
pub fn init_test_logging() {
    INIT.call_once(|| {
        if std::env::var("RUST_LOG").is_ok() {
            tracing_subscriber::fmt()
                .with_test_writer()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .try_init()
                .ok();
        }
    });
}

pub fn gid(value: &str) -> GroupId {
    value.parse().unwrap()
}

pub fn name(value: &str) -> Username {
    value.parse().unwrap()
}

pub fn group(value: &str) -> Group {
    Group::new(gid(value))
}

pub fn user(value: &str) -> User {
    User::new(name(value))
}

pub fn membership(user_name: &str, group_id: &str) -> Membership {
    Membership::new(name(user_name), gid(group_id), "member".parse().unwrap())
}

/// One hook call seen by a [`Journal`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub hook: Hook,
    pub kind: EntityKind,
    pub id: String,
    pub is_new: Option<bool>,
}

impl Call {
    /// `"<hook> <kind> <id>"`, e.g. `"post_save group /a"`.
    pub fn label(&self) -> String {
        format!("{} {} {}", self.hook, self.kind, self.id)
    }
}

/// Listener recording every hook call for all four capabilities.
#[derive(Default)]
pub struct Journal {
    calls: Mutex<Vec<Call>>,
    fail_on: Mutex<Vec<String>>,
}

impl Journal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail every hook call for the entity with this identifier.
    pub fn fail_on(&self, id: &str) {
        self.fail_on.lock().unwrap().push(id.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn labels(&self) -> Vec<String> {
        self.calls().iter().map(Call::label).collect()
    }

    /// Identifiers that received `hook` for `kind`, in call order.
    pub fn ids(&self, hook: Hook, kind: EntityKind) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.hook == hook && c.kind == kind)
            .map(|c| c.id)
            .collect()
    }

    pub fn position(&self, label: &str) -> Option<usize> {
        self.labels().iter().position(|l| l == label)
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn is_empty(&self) -> bool {
        self.calls.lock().unwrap().is_empty()
    }

    /// Register this journal for every capability.
    pub fn register(self: &Arc<Self>, registry: &mut ListenerRegistry, name: &str, priority: i32) {
        registry.register(name, priority, ListenerPlugin::Group(self.clone()));
        registry.register(name, priority, ListenerPlugin::User(self.clone()));
        registry.register(name, priority, ListenerPlugin::Membership(self.clone()));
        registry.register(name, priority, ListenerPlugin::Profile(self.clone()));
    }

    fn record(&self, hook: Hook, kind: EntityKind, id: String, is_new: Option<bool>) -> ListenerResult<()> {
        let fail = self.fail_on.lock().unwrap().contains(&id);
        self.calls.lock().unwrap().push(Call {
            hook,
            kind,
            id: id.clone(),
            is_new,
        });
        if fail {
            return Err(ListenerError::failed(format!("refusing {kind} {id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl GroupListener for Journal {
    async fn pre_save(&self, group: &Group, is_new: bool) -> ListenerResult<()> {
        self.record(Hook::PreSave, EntityKind::Group, group.id.to_string(), Some(is_new))
    }

    async fn post_save(&self, group: &Group, is_new: bool) -> ListenerResult<()> {
        self.record(Hook::PostSave, EntityKind::Group, group.id.to_string(), Some(is_new))
    }

    async fn pre_delete(&self, group: &Group) -> ListenerResult<()> {
        self.record(Hook::PreDelete, EntityKind::Group, group.id.to_string(), None)
    }

    async fn post_delete(&self, group: &Group) -> ListenerResult<()> {
        self.record(Hook::PostDelete, EntityKind::Group, group.id.to_string(), None)
    }
}

#[async_trait]
impl UserListener for Journal {
    async fn pre_save(&self, user: &User, is_new: bool) -> ListenerResult<()> {
        self.record(Hook::PreSave, EntityKind::User, user.username.to_string(), Some(is_new))
    }

    async fn post_save(&self, user: &User, is_new: bool) -> ListenerResult<()> {
        self.record(Hook::PostSave, EntityKind::User, user.username.to_string(), Some(is_new))
    }

    async fn pre_delete(&self, user: &User) -> ListenerResult<()> {
        self.record(Hook::PreDelete, EntityKind::User, user.username.to_string(), None)
    }

    async fn post_delete(&self, user: &User) -> ListenerResult<()> {
        self.record(Hook::PostDelete, EntityKind::User, user.username.to_string(), None)
    }
}

#[async_trait]
impl MembershipListener for Journal {
    async fn pre_save(&self, membership: &Membership, is_new: bool) -> ListenerResult<()> {
        self.record(Hook::PreSave, EntityKind::Membership, membership.id().to_string(), Some(is_new))
    }

    async fn post_save(&self, membership: &Membership, is_new: bool) -> ListenerResult<()> {
        self.record(Hook::PostSave, EntityKind::Membership, membership.id().to_string(), Some(is_new))
    }

    async fn pre_delete(&self, membership: &Membership) -> ListenerResult<()> {
        self.record(Hook::PreDelete, EntityKind::Membership, membership.id().to_string(), None)
    }

    async fn post_delete(&self, membership: &Membership) -> ListenerResult<()> {
        self.record(Hook::PostDelete, EntityKind::Membership, membership.id().to_string(), None)
    }
}

#[async_trait]
impl ProfileListener for Journal {
    async fn pre_save(&self, profile: &UserProfile, is_new: bool) -> ListenerResult<()> {
        if profile.attributes.is_none() {
            return Err(ListenerError::failed("profile attributes missing"));
        }
        self.record(Hook::PreSave, EntityKind::Profile, profile.username.to_string(), Some(is_new))
    }

    async fn post_save(&self, profile: &UserProfile, is_new: bool) -> ListenerResult<()> {
        self.record(Hook::PostSave, EntityKind::Profile, profile.username.to_string(), Some(is_new))
    }

    async fn pre_delete(&self, profile: &UserProfile) -> ListenerResult<()> {
        self.record(Hook::PreDelete, EntityKind::Profile, profile.username.to_string(), None)
    }

    async fn post_delete(&self, profile: &UserProfile) -> ListenerResult<()> {
        self.record(Hook::PostDelete, EntityKind::Profile, profile.username.to_string(), None)
    }
}
