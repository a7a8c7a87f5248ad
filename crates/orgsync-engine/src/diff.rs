//! Set differences between the backend and the ledger.
//!
//! Every function takes immutable snapshots and returns new collections.

use std::collections::{BTreeMap, BTreeSet};

use orgsync_core::{EventType, GroupId, Membership, MembershipId};

/// Partition of two snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta<T> {
    /// Present in the backend, not recorded.
    pub added: Vec<T>,
    /// Recorded, no longer present in the backend.
    pub deleted: Vec<T>,
    /// Present and recorded.
    pub retained: Vec<T>,
}

impl<T> Default for Delta<T> {
    fn default() -> Self {
        Self {
            added: Vec::new(),
            deleted: Vec::new(),
            retained: Vec::new(),
        }
    }
}

impl<T> Delta<T> {
    /// Entities to dispatch for `event`.
    ///
    /// UPDATED covers entities present on both sides.
    #[must_use]
    pub fn for_event(&self, event: EventType) -> &[T] {
        match event {
            EventType::Added => &self.added,
            EventType::Updated => &self.retained,
            EventType::Deleted => &self.deleted,
        }
    }
}

/// Diff an ordered listing against a recorded set.
///
/// `added` and `retained` keep the order of `present`; `deleted` is in
/// ascending order. Duplicates in `present` are dropped.
#[must_use]
pub fn diff_ordered<T: Ord + Clone>(present: &[T], recorded: &BTreeSet<T>) -> Delta<T> {
    let mut seen = BTreeSet::new();
    let mut delta = Delta::default();
    for item in present {
        if !seen.insert(item) {
            continue;
        }
        if recorded.contains(item) {
            delta.retained.push(item.clone());
        } else {
            delta.added.push(item.clone());
        }
    }
    delta.deleted = recorded
        .iter()
        .filter(|item| !seen.contains(item))
        .cloned()
        .collect();
    delta
}

/// Diff groups.
///
/// `added` and `retained` are sorted ascending, so a parent always precedes
/// its descendants. `deleted` is sorted descending, so descendants precede
/// their parent.
#[must_use]
pub fn diff_groups(present: &[GroupId], activated: &BTreeSet<GroupId>) -> Delta<GroupId> {
    let mut sorted = present.to_vec();
    sorted.sort();
    let mut delta = diff_ordered(&sorted, activated);
    delta.deleted.reverse();
    delta
}

/// Diff memberships by canonical identifier.
///
/// `added` and `retained` keep the order of `reported`, `deleted` keeps the
/// order of `activated`.
#[must_use]
pub fn diff_memberships(reported: &[Membership], activated: &[Membership]) -> Delta<Membership> {
    let activated_ids: BTreeSet<MembershipId> = activated.iter().map(Membership::id).collect();
    let mut reported_by_id: BTreeMap<MembershipId, &Membership> = BTreeMap::new();
    let mut delta = Delta::default();

    for membership in reported {
        let id = membership.id();
        if reported_by_id.insert(id.clone(), membership).is_some() {
            continue;
        }
        if activated_ids.contains(&id) {
            delta.retained.push(membership.clone());
        } else {
            delta.added.push(membership.clone());
        }
    }

    let mut emitted = BTreeSet::new();
    for membership in activated {
        let id = membership.id();
        if !reported_by_id.contains_key(&id) && emitted.insert(id) {
            delta.deleted.push(membership.clone());
        }
    }
    delta
}

/// Membership events for a user save cascade.
///
/// ADDED dispatches only unrecorded memberships. UPDATED re-notifies recorded
/// ones and dispatches unrecorded ones as ADDED.
#[must_use]
pub fn plan_user_memberships(
    event: EventType,
    reported: &[Membership],
    activated: &[Membership],
) -> Vec<(Membership, EventType)> {
    let delta = diff_memberships(reported, activated);
    match event {
        EventType::Added => delta
            .added
            .into_iter()
            .map(|m| (m, EventType::Added))
            .collect(),
        EventType::Updated => {
            let activated_ids: BTreeSet<MembershipId> = activated.iter().map(Membership::id).collect();
            let mut seen = BTreeSet::new();
            reported
                .iter()
                .filter(|m| seen.insert(m.id()))
                .map(|m| {
                    let event = if activated_ids.contains(&m.id()) {
                        EventType::Updated
                    } else {
                        EventType::Added
                    };
                    (m.clone(), event)
                })
                .collect()
        }
        EventType::Deleted => delta
            .deleted
            .into_iter()
            .map(|m| (m, EventType::Deleted))
            .collect(),
    }
}
