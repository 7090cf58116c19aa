use serde::{Deserialize, Serialize};

use permgraph_core::DomainResult;

use crate::permissions::Permission;
use crate::scope::{Scope, Specificity};

/// A single declared grant (`value == true`) or denial (`value == false`).
///
/// An entry is identified by `(permission, scope)`; an entity holds at most one
/// entry per identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entry {
    pub permission: Permission,
    pub value: bool,
    pub scope: Scope,
}

impl Entry {
    pub fn new(permission: Permission, value: bool, scope: Scope) -> Self {
        Self {
            permission,
            value,
            scope,
        }
    }

    /// Global grant of `permission`.
    pub fn grant(permission: &str) -> DomainResult<Self> {
        Ok(Self::new(Permission::new(permission)?, true, Scope::global()))
    }

    /// Global denial of `permission`.
    pub fn deny(permission: &str) -> DomainResult<Self> {
        Ok(Self::new(Permission::new(permission)?, false, Scope::global()))
    }

    /// Parse a signed permission (`"-build"` denies) with an optional scope.
    pub fn parse(signed: &str, world: Option<&str>, region: Option<&str>) -> DomainResult<Self> {
        let (permission, value) = Permission::parse_signed(signed)?;
        Ok(Self::new(permission, value, Scope::new(world, region)?))
    }

    pub fn specificity(&self) -> Specificity {
        self.scope.specificity()
    }

    /// True when `other` targets the same permission in the same scope.
    pub fn same_target(&self, other: &Entry) -> bool {
        self.permission == other.permission && self.scope == other.scope
    }

    pub fn signed(&self) -> String {
        self.permission.signed(self.value)
    }
}

impl core::fmt::Display for Entry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}{}", self.scope, self.signed())
    }
}
