//! User enumeration.
//!
//! Users are listed page by page, either through the backend's own listing
//! or, when the backend exposes a primary and a secondary store that can both
//! be queried directly, from those stores. The strategy is probed once when
//! the enumerator is built.

use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use orgsync_core::Username;

use crate::backend::{BackendResult, IdentityBackend, IdentityStore, PageRequest, StoreRole};

/// How users are enumerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnumerationStrategy {
    /// Page usernames from the primary and secondary stores.
    Direct,
    /// Page users through [`IdentityBackend::list_users_page`].
    Generic,
}

impl EnumerationStrategy {
    /// Pick a strategy from the stores a backend exposes.
    ///
    /// Direct requires exactly two stores, one of each role, both with an
    /// invocation context.
    #[must_use]
    pub fn probe(stores: &[Arc<dyn IdentityStore>]) -> Self {
        if split_stores(stores).is_some() {
            Self::Direct
        } else {
            Self::Generic
        }
    }
}

fn split_stores(stores: &[Arc<dyn IdentityStore>]) -> Option<DualStores> {
    if stores.len() != 2 || !stores.iter().all(|s| s.has_invocation_context()) {
        return None;
    }
    let primary = stores.iter().find(|s| s.role() == StoreRole::Primary)?;
    let secondary = stores.iter().find(|s| s.role() == StoreRole::Secondary)?;
    Some(DualStores {
        primary: Arc::clone(primary),
        secondary: Arc::clone(secondary),
    })
}

struct DualStores {
    primary: Arc<dyn IdentityStore>,
    secondary: Arc<dyn IdentityStore>,
}

/// Yields the page requests covering `total` items.
///
/// Produces exactly `ceil(total / page_size)` requests, the last one possibly
/// short.
#[derive(Debug, Clone)]
pub struct PageCursor {
    total: usize,
    page_size: usize,
    offset: usize,
}

impl PageCursor {
    /// Create a cursor. A zero page size yields nothing.
    #[must_use]
    pub fn new(total: usize, page_size: usize) -> Self {
        Self {
            total,
            page_size,
            offset: 0,
        }
    }
}

impl Iterator for PageCursor {
    type Item = PageRequest;

    fn next(&mut self) -> Option<PageRequest> {
        if self.page_size == 0 || self.offset >= self.total {
            return None;
        }
        let length = self.page_size.min(self.total - self.offset);
        let page = PageRequest::new(self.offset, length);
        self.offset += length;
        Some(page)
    }
}

/// Lists the usernames currently present in the backend.
pub struct UserEnumerator {
    backend: Arc<dyn IdentityBackend>,
    page_size: usize,
    stores: Option<DualStores>,
}

impl UserEnumerator {
    /// Build an enumerator, probing the backend's stores once.
    pub fn new(backend: Arc<dyn IdentityBackend>, page_size: usize) -> Self {
        let stores = split_stores(&backend.identity_stores());
        let enumerator = Self {
            backend,
            page_size,
            stores,
        };
        tracing::debug!(
            strategy = ?enumerator.strategy(),
            page_size,
            "User enumeration strategy selected"
        );
        enumerator
    }

    /// The strategy chosen at construction.
    #[must_use]
    pub fn strategy(&self) -> EnumerationStrategy {
        if self.stores.is_some() {
            EnumerationStrategy::Direct
        } else {
            EnumerationStrategy::Generic
        }
    }

    /// Usernames to consider for ADDED, in enumeration order.
    ///
    /// Under direct enumeration only the primary store is read.
    ///
    /// # Errors
    ///
    /// Returns the first backend error; a partial listing is never returned.
    pub async fn usernames_for_additions(&self) -> BackendResult<Vec<Username>> {
        self.backend.invalidate_cache().await?;
        let mut collector = Collector::default();
        match &self.stores {
            Some(stores) => self.page_store(stores.primary.as_ref(), &mut collector).await?,
            None => self.page_backend(&mut collector).await?,
        }
        Ok(collector.into_vec())
    }

    /// Usernames that count as present when detecting deletions.
    ///
    /// Under direct enumeration this is the union of both stores.
    ///
    /// # Errors
    ///
    /// Returns the first backend error.
    pub async fn usernames_present(&self) -> BackendResult<BTreeSet<Username>> {
        self.backend.invalidate_cache().await?;
        let mut collector = Collector::default();
        match &self.stores {
            Some(stores) => {
                self.page_store(stores.primary.as_ref(), &mut collector).await?;
                self.page_store(stores.secondary.as_ref(), &mut collector).await?;
            }
            None => self.page_backend(&mut collector).await?,
        }
        Ok(collector.into_vec().into_iter().collect())
    }

    async fn page_store(&self, store: &dyn IdentityStore, collector: &mut Collector) -> BackendResult<()> {
        let total = store.user_count().await?;
        for page in PageCursor::new(total, self.page_size) {
            tracing::debug!(role = ?store.role(), offset = page.offset, length = page.length, "Loading usernames");
            collector.extend(store.load_usernames(page).await?);
        }
        Ok(())
    }

    async fn page_backend(&self, collector: &mut Collector) -> BackendResult<()> {
        let total = self.backend.user_count().await?;
        for page in PageCursor::new(total, self.page_size) {
            tracing::debug!(offset = page.offset, length = page.length, "Loading users");
            let loaded = self.backend.list_users_page(page).await?;
            collector.extend(loaded.items.into_iter().map(|u| u.username));
        }
        Ok(())
    }
}

#[derive(Default)]
struct Collector {
    seen: HashSet<Username>,
    ordered: Vec<Username>,
}

impl Collector {
    fn extend(&mut self, usernames: impl IntoIterator<Item = Username>) {
        for username in usernames {
            if self.seen.insert(username.clone()) {
                self.ordered.push(username);
            }
        }
    }

    fn into_vec(self) -> Vec<Username> {
        self.ordered
    }
}
