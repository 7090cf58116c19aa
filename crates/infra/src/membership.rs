//! Membership lifecycle: add, remove, list and sweep.
//!
//! Expiration is a read-time predicate (`Membership::is_active`); nothing here
//! depends on expired records having been swept.

use chrono::{DateTime, Utc};

use permgraph_auth::Membership;
use permgraph_core::EntityName;

use crate::mutator;
use crate::store::{HierarchyTx, StoreError};

/// Add `subject` to an existing `group`, or update the expiration of an
/// existing membership. Expired memberships are reactivated.
///
/// The subject is created if absent; a missing group is
/// [`permgraph_core::DomainError::MissingGroup`].
pub fn add_member(
    tx: &mut dyn HierarchyTx,
    group: &str,
    subject: &str,
    expiration: Option<DateTime<Utc>>,
) -> Result<Membership, StoreError> {
    let group = mutator::require_group(tx, &EntityName::new(group)?)?;
    let subject = mutator::create_subject_if_absent(tx, subject)?;

    let membership = Membership::new(group.name, subject.name, expiration);
    if tx.membership(&membership.group, &membership.member)?.as_ref() != Some(&membership) {
        tx.put_membership(membership.clone())?;
    }
    Ok(membership)
}

/// `true` iff a membership existed and was deleted.
///
/// A missing group and a missing membership both yield `false`; callers cannot
/// tell them apart.
pub fn remove_member(
    tx: &mut dyn HierarchyTx,
    group: &EntityName,
    subject: &EntityName,
) -> Result<bool, StoreError> {
    tx.delete_membership(group, subject)
}

/// Memberships of `group` ordered by member name. Empty for a missing group.
pub fn get_members(
    tx: &mut dyn HierarchyTx,
    group: &EntityName,
) -> Result<Vec<Membership>, StoreError> {
    let mut members = tx.members_of(group)?;
    sort_members(&mut members);
    Ok(members)
}

/// Physically delete every membership inactive at `at`, returning what was removed.
pub fn sweep_expired(
    tx: &mut dyn HierarchyTx,
    at: DateTime<Utc>,
) -> Result<Vec<Membership>, StoreError> {
    let mut removed = Vec::new();
    for membership in tx.all_memberships()? {
        if membership.is_active(at) {
            continue;
        }
        if tx.delete_membership(&membership.group, &membership.member)? {
            removed.push(membership);
        }
    }
    sort_members(&mut removed);
    Ok(removed)
}

/// Earliest expiration strictly after `at` among `memberships`.
pub fn next_expiration<'a>(
    memberships: impl IntoIterator<Item = &'a Membership>,
    at: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    memberships
        .into_iter()
        .filter_map(|m| m.expiration)
        .filter(|expires_at| *expires_at > at)
        .min()
}

pub fn sort_members(members: &mut [Membership]) {
    members.sort_by(|a, b| a.member.cmp(&b.member).then_with(|| a.group.cmp(&b.group)));
}
