use std::sync::Arc;

use thiserror::Error;

use permgraph_auth::{HierarchyView, Membership, PermissionEntity};
use permgraph_core::{DomainError, EntityKind, EntityName};

/// Hierarchy store operation error.
///
/// ## Error Categories
///
/// - **Conflict**: optimistic validation failed because a concurrent writer
///   committed first. Transient; the same work may succeed on retry.
/// - **Domain**: the operation is invalid against the current hierarchy
///   (missing group, cycle, malformed name). Terminal.
/// - **Backend**: the store itself failed (e.g. poisoned lock). Terminal.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("transaction conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("store backend failure: {0}")]
    Backend(String),
}

impl StoreError {
    /// Only transient conflicts are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }

    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            StoreError::Domain(e) => Some(e),
            _ => None,
        }
    }
}

/// A unit of work against the hierarchy.
///
/// Reads observe the transaction's own writes. Nothing becomes visible to
/// other readers until [`HierarchyTx::commit`] succeeds; dropping a transaction
/// without committing discards it.
///
/// Implementations must make `commit` fail with [`StoreError::Conflict`] when
/// anything this transaction read or wrote was changed by another committed
/// transaction in the meantime. Structural checks performed inside the
/// transaction (acyclicity, membership uniqueness) rely on this.
pub trait HierarchyTx {
    fn entity(
        &mut self,
        name: &EntityName,
        kind: EntityKind,
    ) -> Result<Option<PermissionEntity>, StoreError>;

    /// Insert or replace an entity (keyed by kind + name).
    fn put_entity(&mut self, entity: PermissionEntity) -> Result<(), StoreError>;

    /// Delete an entity and the entries it owns. Returns `true` if it existed.
    fn delete_entity(&mut self, name: &EntityName, kind: EntityKind) -> Result<bool, StoreError>;

    /// Every stored group.
    fn groups(&mut self) -> Result<Vec<PermissionEntity>, StoreError>;

    fn membership(
        &mut self,
        group: &EntityName,
        member: &EntityName,
    ) -> Result<Option<Membership>, StoreError>;

    /// Insert or replace the membership for `(group, member)`.
    fn put_membership(&mut self, membership: Membership) -> Result<(), StoreError>;

    /// Returns `true` if a membership record existed and was deleted.
    fn delete_membership(
        &mut self,
        group: &EntityName,
        member: &EntityName,
    ) -> Result<bool, StoreError>;

    fn members_of(&mut self, group: &EntityName) -> Result<Vec<Membership>, StoreError>;

    fn memberships_of(&mut self, member: &EntityName) -> Result<Vec<Membership>, StoreError>;

    fn all_memberships(&mut self) -> Result<Vec<Membership>, StoreError>;

    /// Atomically publish this transaction's writes.
    fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

/// Transactional hierarchy store (external collaborator contract).
///
/// - Snapshot reads through [`HierarchyView`] never take part in a transaction.
/// - Writes only happen through [`HierarchyStore::begin`] + [`HierarchyTx::commit`].
/// - There is no in-process locking above this: transactions are the only
///   concurrency-correctness mechanism.
pub trait HierarchyStore: HierarchyView<Error = StoreError> + Send + Sync {
    fn begin(&self) -> Result<Box<dyn HierarchyTx + '_>, StoreError>;
}

impl<S> HierarchyStore for Arc<S>
where
    S: HierarchyStore + ?Sized,
{
    fn begin(&self) -> Result<Box<dyn HierarchyTx + '_>, StoreError> {
        (**self).begin()
    }
}
