//! Time-bounded subject-to-group memberships.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use permgraph_core::EntityName;

/// A subject's participation in a group.
///
/// A membership whose expiration has passed is inactive but may still be
/// stored until something sweeps it; activity is always computed against a
/// reference time, never inferred from presence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Membership {
    pub member: EntityName,
    pub group: EntityName,
    pub expiration: Option<DateTime<Utc>>,
}

impl Membership {
    pub fn new(group: EntityName, member: EntityName, expiration: Option<DateTime<Utc>>) -> Self {
        Self {
            member,
            group,
            expiration,
        }
    }

    pub fn permanent(group: EntityName, member: EntityName) -> Self {
        Self::new(group, member, None)
    }

    /// Active iff permanent or expiring strictly after `at`.
    pub fn is_active(&self, at: DateTime<Utc>) -> bool {
        is_active(self.expiration, at)
    }

    pub fn status(&self, at: DateTime<Utc>) -> MemberStatus {
        MemberStatus {
            member: self.member.clone(),
            expiration: self.expiration,
            active: self.is_active(at),
        }
    }
}

/// Expiration predicate shared by memberships and listings.
pub fn is_active(expiration: Option<DateTime<Utc>>, at: DateTime<Utc>) -> bool {
    match expiration {
        None => true,
        Some(expires_at) => expires_at > at,
    }
}

/// A group member as shown in listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberStatus {
    pub member: EntityName,
    pub expiration: Option<DateTime<Utc>>,
    pub active: bool,
}
