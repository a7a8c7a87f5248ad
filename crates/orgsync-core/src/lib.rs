//! orgsync Core Library
//!
//! Organization model shared by the reconciliation engine and its callers.
//!
//! # Modules
//!
//! - [`ids`] - Validated identifiers (GroupId, Username, MembershipId, Workspace)
//! - [`model`] - Entities (Group, User, UserProfile, Membership) and EventType
//! - [`error`] - Model errors (OrgModelError)
//!
//! # Example
//!
//! ```
//! use orgsync_core::{EventType, Group, GroupId, Membership};
//!
//! let group = Group::new("/platform/users".parse().unwrap());
//! assert_eq!(group.parent_id, Some("/platform".parse::<GroupId>().unwrap()));
//!
//! let membership = Membership::new(
//!     "john".parse().unwrap(),
//!     group.id.clone(),
//!     "member".parse().unwrap(),
//! );
//! assert_eq!(membership.id().as_str(), "member:john:/platform/users");
//!
//! assert!("added".parse::<EventType>().unwrap().is_new());
//! ```

pub mod error;
pub mod ids;
pub mod model;

pub use error::{OrgModelError, Result};
pub use ids::{GroupId, MembershipId, MembershipType, Username, Workspace};
pub use model::{EntityKind, EventType, Group, Membership, User, UserProfile};
