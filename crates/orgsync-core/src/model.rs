//! Organization model entities and event types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::error::{OrgModelError, Result};
use crate::ids::{GroupId, MembershipId, MembershipType, Username};

/// Lifecycle event driving which hook pair is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// Entity appeared in the backend.
    Added,
    /// Entity already integrated, re-notify.
    Updated,
    /// Entity disappeared from the backend.
    Deleted,
}

impl EventType {
    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Added => "ADDED",
            EventType::Updated => "UPDATED",
            EventType::Deleted => "DELETED",
        }
    }

    /// True for ADDED and UPDATED, which run the save hooks.
    #[must_use]
    pub fn is_save(&self) -> bool {
        !matches!(self, EventType::Deleted)
    }

    /// The `is_new` flag handed to save hooks.
    #[must_use]
    pub fn is_new(&self) -> bool {
        matches!(self, EventType::Added)
    }
}

impl Display for EventType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = OrgModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "ADDED" => Ok(EventType::Added),
            "UPDATED" => Ok(EventType::Updated),
            "DELETED" => Ok(EventType::Deleted),
            _ => Err(OrgModelError::UnknownEventType {
                value: s.to_string(),
            }),
        }
    }
}

/// Kind of organization entity. Doubles as the listener capability tag and
/// the ledger partition key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Group,
    User,
    Membership,
    Profile,
}

impl EntityKind {
    /// All kinds, in reconciliation order.
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Group,
        EntityKind::User,
        EntityKind::Membership,
        EntityKind::Profile,
    ];

    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Group => "group",
            EntityKind::User => "user",
            EntityKind::Membership => "membership",
            EntityKind::Profile => "profile",
        }
    }
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = OrgModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "group" => Ok(EntityKind::Group),
            "user" => Ok(EntityKind::User),
            "membership" => Ok(EntityKind::Membership),
            "profile" | "user_profile" => Ok(EntityKind::Profile),
            _ => Err(OrgModelError::UnknownCapability {
                value: s.to_string(),
            }),
        }
    }
}

/// A group of the organization tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Hierarchical identifier, also the ordering key.
    pub id: GroupId,
    /// Parent group, `None` for top-level groups.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<GroupId>,
    /// Display label.
    #[serde(default)]
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Group {
    /// Create a group whose parent is derived from its path.
    #[must_use]
    pub fn new(id: GroupId) -> Self {
        Self {
            parent_id: id.parent(),
            label: id.name().to_string(),
            id,
            description: None,
        }
    }

    /// Set the label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// True if the declared parent agrees with the identifier prefix.
    #[must_use]
    pub fn has_consistent_parent(&self) -> bool {
        self.parent_id == self.id.parent()
    }
}

/// A user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub username: Username,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Creation timestamp, defaulted at first sync when the backend has none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl User {
    /// Create a user with only a name.
    #[must_use]
    pub fn new(username: Username) -> Self {
        Self {
            username,
            first_name: None,
            last_name: None,
            email: None,
            created_at: None,
        }
    }

    /// Set first and last name.
    #[must_use]
    pub fn with_names(mut self, first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        self.first_name = Some(first_name.into());
        self.last_name = Some(last_name.into());
        self
    }

    /// Set the email.
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Fill `created_at` with `now` if the backend did not provide one.
    pub fn default_created_at(&mut self, now: DateTime<Utc>) {
        if self.created_at.is_none() {
            self.created_at = Some(now);
        }
    }
}

/// Free-form profile attributes of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub username: Username,
    /// `None` until the profile has been synchronized once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<BTreeMap<String, String>>,
}

impl UserProfile {
    /// Create an empty, never-synchronized profile.
    #[must_use]
    pub fn new(username: Username) -> Self {
        Self {
            username,
            attributes: None,
        }
    }

    /// Set one attribute.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), value.into());
        self
    }

    /// Make sure the attribute map exists.
    pub fn ensure_attributes(&mut self) -> &mut BTreeMap<String, String> {
        self.attributes.get_or_insert_with(BTreeMap::new)
    }
}

/// A (user, group, type) membership.
///
/// Equality and hashing only look at the canonical identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Membership {
    pub username: Username,
    pub group_id: GroupId,
    pub membership_type: MembershipType,
}

impl Membership {
    /// Create a membership from its triple.
    #[must_use]
    pub fn new(username: Username, group_id: GroupId, membership_type: MembershipType) -> Self {
        Self {
            username,
            group_id,
            membership_type,
        }
    }

    /// Canonical identifier derived from the triple.
    #[must_use]
    pub fn id(&self) -> MembershipId {
        MembershipId::compute(&self.membership_type, &self.username, &self.group_id)
    }

    /// Rebuild a membership from its canonical identifier.
    ///
    /// # Errors
    ///
    /// Returns `OrgModelError::InvalidIdentifier` if the identifier is malformed.
    pub fn from_id(id: &MembershipId) -> Result<Self> {
        let (membership_type, username, group_id) = id.parts()?;
        Ok(Self::new(username, group_id, membership_type))
    }
}

impl PartialEq for Membership {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Membership {}

impl Hash for Membership {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_parsing() {
        assert_eq!("ADDED".parse::<EventType>().unwrap(), EventType::Added);
        assert_eq!("updated".parse::<EventType>().unwrap(), EventType::Updated);
        assert_eq!(" Deleted ".parse::<EventType>().unwrap(), EventType::Deleted);
        assert!("REMOVED".parse::<EventType>().is_err());
        assert!("".parse::<EventType>().is_err());
    }

    #[test]
    fn test_event_type_flags() {
        assert!(EventType::Added.is_save());
        assert!(EventType::Added.is_new());
        assert!(EventType::Updated.is_save());
        assert!(!EventType::Updated.is_new());
        assert!(!EventType::Deleted.is_save());
    }

    #[test]
    fn test_event_type_serde() {
        let json = serde_json::to_string(&EventType::Deleted).unwrap();
        assert_eq!(json, "\"DELETED\"");
    }

    #[test]
    fn test_entity_kind_parsing() {
        assert_eq!("Group".parse::<EntityKind>().unwrap(), EntityKind::Group);
        assert_eq!("user_profile".parse::<EntityKind>().unwrap(), EntityKind::Profile);
        assert!("portlet".parse::<EntityKind>().is_err());
    }

    #[test]
    fn test_group_new_derives_parent() {
        let group = Group::new("/platform/users".parse().unwrap());
        assert_eq!(group.parent_id.as_ref().map(GroupId::as_str), Some("/platform"));
        assert_eq!(group.label, "users");
        assert!(group.has_consistent_parent());
    }

    #[test]
    fn test_user_created_at_defaulting() {
        let now = Utc::now();
        let mut user = User::new("john".parse().unwrap());
        user.default_created_at(now);
        assert_eq!(user.created_at, Some(now));

        let earlier = now - chrono::Duration::days(1);
        let mut user = User::new("mary".parse().unwrap());
        user.created_at = Some(earlier);
        user.default_created_at(now);
        assert_eq!(user.created_at, Some(earlier));
    }

    #[test]
    fn test_profile_attributes_absent_until_set() {
        let mut profile = UserProfile::new("john".parse().unwrap());
        assert!(profile.attributes.is_none());
        profile.ensure_attributes();
        assert_eq!(profile.attributes, Some(BTreeMap::new()));
    }

    #[test]
    fn test_membership_equality_uses_triple() {
        let a = Membership::new(
            "john".parse().unwrap(),
            "/platform/users".parse().unwrap(),
            "member".parse().unwrap(),
        );
        let b = Membership::from_id(&a.id()).unwrap();
        assert_eq!(a, b);

        let c = Membership::new(
            "john".parse().unwrap(),
            "/platform/users".parse().unwrap(),
            "manager".parse().unwrap(),
        );
        assert_ne!(a, c);
    }
}
