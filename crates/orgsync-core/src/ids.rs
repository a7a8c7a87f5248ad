//! Strongly Typed Identifiers
//!
//! Newtype identifiers for the organization model. Every type validates its
//! input on construction, so an identifier that exists is well formed.
//!
//! # Example
//!
//! ```
//! use orgsync_core::{GroupId, Username};
//!
//! let group: GroupId = "/platform/users".parse().unwrap();
//! assert_eq!(group.parent().unwrap().as_str(), "/platform");
//!
//! // Type safety: cannot pass a Username where a GroupId is expected
//! fn requires_group(id: &GroupId) -> usize {
//!     id.depth()
//! }
//! assert_eq!(requires_group(&group), 2);
//! ```

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::error::{OrgModelError, Result};

/// Separator between group path segments.
pub const GROUP_SEPARATOR: char = '/';

/// Separator between the parts of a canonical membership identifier.
pub const MEMBERSHIP_ID_SEPARATOR: char = ':';

/// Macro to define a validated string identifier type
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $validate:path) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Creates a validated identifier.
            ///
            /// # Errors
            ///
            /// Returns `OrgModelError::InvalidIdentifier` if the value is malformed.
            pub fn new(value: impl Into<String>) -> Result<Self> {
                let value = value.into();
                $validate(&value).map_err(|reason| {
                    OrgModelError::invalid_identifier(stringify!($name), value.clone(), reason)
                })?;
                Ok(Self(value))
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consumes the identifier, returning the inner string.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = OrgModelError;

            fn from_str(s: &str) -> Result<Self> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = OrgModelError;

            fn try_from(value: String) -> Result<Self> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

fn validate_name(value: &str) -> std::result::Result<(), &'static str> {
    if value.is_empty() {
        return Err("must not be empty");
    }
    if value.trim() != value {
        return Err("must not have leading or trailing whitespace");
    }
    if value == "." || value == ".." {
        return Err("must not be a relative path component");
    }
    if value.contains(GROUP_SEPARATOR) || value.contains(MEMBERSHIP_ID_SEPARATOR) {
        return Err("must not contain '/' or ':'");
    }
    if value.chars().any(char::is_control) {
        return Err("must not contain control characters");
    }
    Ok(())
}

fn validate_group_path(value: &str) -> std::result::Result<(), &'static str> {
    let Some(rest) = value.strip_prefix(GROUP_SEPARATOR) else {
        return Err("must start with '/'");
    };
    if rest.is_empty() {
        return Err("the root path is not a group");
    }
    for segment in rest.split(GROUP_SEPARATOR) {
        if segment.is_empty() {
            return Err("must not contain empty segments");
        }
        if segment.starts_with('.') {
            return Err("segments must not start with '.'");
        }
        if segment.chars().any(char::is_control) {
            return Err("must not contain control characters");
        }
    }
    Ok(())
}

define_id!(
    /// Unique user login name. The identity backend is authoritative for it.
    Username,
    validate_name
);

define_id!(
    /// Membership type name (e.g. `manager`, `member`, `*`).
    MembershipType,
    validate_name
);

define_id!(
    /// Ledger scope. All activation records live inside one workspace.
    Workspace,
    validate_name
);

define_id!(
    /// Hierarchical group path such as `/platform/users`.
    ///
    /// A child's identifier always has its parent's identifier as a prefix,
    /// which is what ancestor derivation and parent-first ordering rely on.
    GroupId,
    validate_group_path
);

impl GroupId {
    /// Last path segment.
    #[must_use]
    pub fn name(&self) -> &str {
        self.0
            .rsplit(GROUP_SEPARATOR)
            .next()
            .unwrap_or(self.0.as_str())
    }

    /// Parent derived from the path, `None` for top-level groups.
    #[must_use]
    pub fn parent(&self) -> Option<GroupId> {
        let (parent, _) = self.0.rsplit_once(GROUP_SEPARATOR)?;
        if parent.is_empty() {
            None
        } else {
            Some(Self(parent.to_string()))
        }
    }

    /// Number of path segments (`/a` is 1, `/a/b` is 2).
    #[must_use]
    pub fn depth(&self) -> usize {
        self.0.matches(GROUP_SEPARATOR).count()
    }

    /// Every ancestor, root first, excluding the group itself.
    #[must_use]
    pub fn ancestors(&self) -> Vec<GroupId> {
        self.0
            .match_indices(GROUP_SEPARATOR)
            .skip(1)
            .map(|(idx, _)| Self(self.0[..idx].to_string()))
            .collect()
    }

    /// True if `other` is nested (at any depth) below this group.
    #[must_use]
    pub fn is_ancestor_of(&self, other: &GroupId) -> bool {
        other
            .0
            .strip_prefix(self.0.as_str())
            .is_some_and(|rest| rest.starts_with(GROUP_SEPARATOR))
    }

    /// Path segments, root first.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(GROUP_SEPARATOR).skip(1)
    }

    /// Builds the identifier of a direct child.
    ///
    /// # Errors
    ///
    /// Returns `OrgModelError::InvalidIdentifier` if `name` is not a valid segment.
    pub fn child(&self, name: &str) -> Result<GroupId> {
        Self::new(format!("{}{GROUP_SEPARATOR}{name}", self.0))
    }
}

/// Canonical membership identifier, `"{type}:{user}:{group}"`.
///
/// It is a pure function of the membership triple, so two memberships with
/// equal triples always carry equal identifiers whatever their origin.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MembershipId(String);

impl MembershipId {
    /// Computes the identifier of a triple.
    #[must_use]
    pub fn compute(membership_type: &MembershipType, username: &Username, group_id: &GroupId) -> Self {
        Self(format!(
            "{membership_type}{MEMBERSHIP_ID_SEPARATOR}{username}{MEMBERSHIP_ID_SEPARATOR}{group_id}"
        ))
    }

    /// Splits the identifier back into its triple.
    ///
    /// # Errors
    ///
    /// Returns `OrgModelError::InvalidIdentifier` if any part is malformed.
    pub fn parts(&self) -> Result<(MembershipType, Username, GroupId)> {
        let mut parts = self.0.splitn(3, MEMBERSHIP_ID_SEPARATOR);
        let (Some(membership_type), Some(username), Some(group_id)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(OrgModelError::invalid_identifier(
                "MembershipId",
                self.0.clone(),
                "expected type:user:group",
            ));
        };
        Ok((
            MembershipType::new(membership_type)?,
            Username::new(username)?,
            GroupId::new(group_id)?,
        ))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for MembershipId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for MembershipId {
    type Err = OrgModelError;

    fn from_str(s: &str) -> Result<Self> {
        let id = Self(s.to_string());
        id.parts()?;
        Ok(id)
    }
}

impl TryFrom<String> for MembershipId {
    type Error = OrgModelError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<MembershipId> for String {
    fn from(id: MembershipId) -> Self {
        id.0
    }
}

impl Borrow<str> for MembershipId {
    fn borrow(&self) -> &str {
        &self.0
    }
}
