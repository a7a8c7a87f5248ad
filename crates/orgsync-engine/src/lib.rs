//! # Organization Sync Engine
//!
//! Keeps downstream listener plugins in step with an identity backend.
//!
//! The engine diffs what the backend reports (groups, users, memberships,
//! profiles) against what an activation ledger says has already been
//! integrated, and calls the registered listeners for every addition,
//! update and deletion. A listener registered at the lowest priority, the
//! [`ActivationRecorder`], writes the ledger so that a later run only sees
//! what changed since.
//!
//! ## Ordering
//!
//! - groups are reconciled before users, users before memberships
//! - a parent group is saved before its children and deleted after them
//! - the `pre_*` hook of every listener runs before any `post_*` hook
//! - delete hooks never run while the backend still has the entity
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use orgsync_engine::{FsLedger, InMemoryBackend, OrgSyncConfig, OrgSyncEngine};
//!
//! let config = OrgSyncConfig::from_env()?;
//! let engine = OrgSyncEngine::builder(config.clone())
//!     .backend(Arc::new(InMemoryBackend::new()))
//!     .ledger_store(Arc::new(FsLedger::new(&config.ledger_root)))
//!     .build()?;
//!
//! let report = engine.sync_all().await?;
//! println!("{} hook sequences dispatched", report.total_dispatched());
//! ```
//!
//! ## Crate Organization
//!
//! - [`backend`] - Identity backend contract and in-memory/snapshot backends
//! - [`ledger`] - Activation ledger contract, memory and filesystem ledgers
//! - [`listener`] - Listener capabilities and the registry
//! - [`engine`] - The reconciliation orchestrator
//! - [`enumerator`] - Paged user enumeration
//! - [`diff`] - Set differences between backend and ledger
//! - [`dispatcher`] - Hook invocation with fault isolation
//! - [`transaction`] - Scopes wrapped around hook calls
//! - [`statistics`] - Run reports
//! - [`config`] - Environment-driven configuration

pub mod backend;
pub mod config;
pub mod diff;
pub mod dispatcher;
pub mod engine;
pub mod enumerator;
pub mod error;
pub mod ledger;
pub mod listener;
pub mod statistics;
pub mod transaction;

pub use backend::{
    BackendError, BackendResult, DirectorySnapshot, IdentityBackend, IdentityStore, InMemoryBackend,
    InMemoryStore, Page, PageRequest, StoreRole,
};
pub use config::{ConfigError, OrgSyncConfig};
pub use dispatcher::Dispatcher;
pub use engine::{OrgSyncEngine, OrgSyncEngineBuilder};
pub use enumerator::{EnumerationStrategy, UserEnumerator};
pub use error::{SyncError, SyncResult};
pub use ledger::{
    ActivationRecorder, FsLedger, Ledger, LedgerEntry, LedgerError, LedgerWriter, MemoryLedger,
};
pub use listener::{
    EntityRef, GroupListener, Hook, ListenerDeclaration, ListenerError, ListenerPlugin,
    ListenerRegistry, ListenerResult, MembershipListener, ProfileListener, RegistryError,
    UserListener,
};
pub use statistics::{ItemFailure, ListenerFailure, SyncReport};
pub use transaction::{
    LifecycleError, NoTransaction, ReentrantScope, RequestLifecycle, ScopeGuard, TransactionScope,
};

pub use orgsync_core::{
    EntityKind, EventType, Group, GroupId, Membership, MembershipId, MembershipType, User,
    UserProfile, Username, Workspace,
};
