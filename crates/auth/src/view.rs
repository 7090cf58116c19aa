use std::sync::Arc;

use permgraph_core::{EntityKind, EntityName};

use crate::entity::PermissionEntity;
use crate::membership::Membership;

/// Read-only access to the hierarchy.
///
/// Implementations are snapshot reads against whatever backs the hierarchy:
/// each call observes committed state, and no call blocks on in-flight writers
/// beyond what the backing store's isolation requires.
pub trait HierarchyView {
    type Error;

    fn entity(
        &self,
        name: &EntityName,
        kind: EntityKind,
    ) -> Result<Option<PermissionEntity>, Self::Error>;

    /// All memberships (active or not) held by a subject.
    fn memberships_of(&self, subject: &EntityName) -> Result<Vec<Membership>, Self::Error>;

    /// All memberships (active or not) of a group. Empty when the group is missing.
    fn members_of(&self, group: &EntityName) -> Result<Vec<Membership>, Self::Error>;

    /// Every stored group.
    fn groups(&self) -> Result<Vec<PermissionEntity>, Self::Error>;
}

impl<V> HierarchyView for Arc<V>
where
    V: HierarchyView + ?Sized,
{
    type Error = V::Error;

    fn entity(
        &self,
        name: &EntityName,
        kind: EntityKind,
    ) -> Result<Option<PermissionEntity>, Self::Error> {
        (**self).entity(name, kind)
    }

    fn memberships_of(&self, subject: &EntityName) -> Result<Vec<Membership>, Self::Error> {
        (**self).memberships_of(subject)
    }

    fn members_of(&self, group: &EntityName) -> Result<Vec<Membership>, Self::Error> {
        (**self).members_of(group)
    }

    fn groups(&self) -> Result<Vec<PermissionEntity>, Self::Error> {
        (**self).groups()
    }
}

impl<V> HierarchyView for &V
where
    V: HierarchyView + ?Sized,
{
    type Error = V::Error;

    fn entity(
        &self,
        name: &EntityName,
        kind: EntityKind,
    ) -> Result<Option<PermissionEntity>, Self::Error> {
        (**self).entity(name, kind)
    }

    fn memberships_of(&self, subject: &EntityName) -> Result<Vec<Membership>, Self::Error> {
        (**self).memberships_of(subject)
    }

    fn members_of(&self, group: &EntityName) -> Result<Vec<Membership>, Self::Error> {
        (**self).members_of(group)
    }

    fn groups(&self) -> Result<Vec<PermissionEntity>, Self::Error> {
        (**self).groups()
    }
}
