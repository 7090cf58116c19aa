//! Structural edits of the group graph.
//!
//! Everything here runs inside a caller-provided [`HierarchyTx`]; nothing
//! commits on its own. Validation happens against the transaction's view, so
//! a concurrent edit that would invalidate a check makes the commit conflict
//! instead of slipping through.

use std::collections::HashSet;

use permgraph_auth::{Entry, Permission, PermissionEntity, Scope};
use permgraph_core::{DomainError, EntityKind, EntityName};

use crate::store::{HierarchyTx, StoreError};

/// Create a group. Returns `false` if one with the same name already exists.
pub fn create_group(tx: &mut dyn HierarchyTx, name: &str) -> Result<bool, StoreError> {
    let group = PermissionEntity::group(name)?;
    if tx.entity(&group.name, EntityKind::Group)?.is_some() {
        return Ok(false);
    }
    tx.put_entity(group)?;
    Ok(true)
}

/// Fetch a group, creating it when absent.
pub fn ensure_group(tx: &mut dyn HierarchyTx, name: &str) -> Result<PermissionEntity, StoreError> {
    ensure(tx, name, EntityKind::Group)
}

/// Fetch a subject, creating it when absent.
pub fn create_subject_if_absent(
    tx: &mut dyn HierarchyTx,
    name: &str,
) -> Result<PermissionEntity, StoreError> {
    ensure(tx, name, EntityKind::Subject)
}

fn ensure(
    tx: &mut dyn HierarchyTx,
    name: &str,
    kind: EntityKind,
) -> Result<PermissionEntity, StoreError> {
    let fresh = PermissionEntity::new(name, kind)?;
    if let Some(existing) = tx.entity(&fresh.name, kind)? {
        return Ok(existing);
    }
    tx.put_entity(fresh.clone())?;
    Ok(fresh)
}

/// Fetch a group that must already exist.
pub fn require_group(
    tx: &mut dyn HierarchyTx,
    name: &EntityName,
) -> Result<PermissionEntity, StoreError> {
    tx.entity(name, EntityKind::Group)?
        .ok_or_else(|| DomainError::missing_group(name.as_str()).into())
}

/// Parent chain of `group`, nearest first, excluding `group` itself.
///
/// Stops early at a missing group or at a group already seen, so a corrupted
/// graph still yields a finite answer.
pub fn ancestors(
    tx: &mut dyn HierarchyTx,
    group: &EntityName,
) -> Result<Vec<EntityName>, StoreError> {
    let mut chain = Vec::new();
    let mut seen = HashSet::from([group.clone()]);
    let mut next = tx.entity(group, EntityKind::Group)?.and_then(|g| g.parent);

    while let Some(name) = next {
        if !seen.insert(name.clone()) {
            break;
        }
        next = tx.entity(&name, EntityKind::Group)?.and_then(|g| g.parent);
        chain.push(name);
    }
    Ok(chain)
}

/// Point `group` at `parent`, or make it a root when `parent` is `None`.
///
/// Both groups are created if absent. Fails with
/// [`DomainError::CycleDetected`] when `group` is `parent` or one of its
/// ancestors; the link is left untouched in that case.
pub fn set_parent(
    tx: &mut dyn HierarchyTx,
    group: &str,
    parent: Option<&str>,
) -> Result<(), StoreError> {
    let mut child = ensure_group(tx, group)?;

    let parent = match parent {
        None => None,
        Some(raw) => {
            let parent_name = EntityName::new(raw)?;
            if parent_name == child.name {
                return Err(DomainError::cycle(child.name.as_str(), parent_name.as_str()).into());
            }
            ensure_group(tx, raw)?;
            if ancestors(tx, &parent_name)?.contains(&child.name) {
                return Err(DomainError::cycle(child.name.as_str(), parent_name.as_str()).into());
            }
            Some(parent_name)
        }
    };

    if child.parent == parent {
        return Ok(());
    }
    child.set_parent(parent)?;
    tx.put_entity(child)
}

/// Set a group's priority, creating the group if absent.
pub fn set_priority(
    tx: &mut dyn HierarchyTx,
    group: &str,
    priority: i32,
) -> Result<(), StoreError> {
    let mut entity = ensure_group(tx, group)?;
    if entity.priority == priority {
        return Ok(());
    }
    entity.set_priority(priority)?;
    tx.put_entity(entity)
}

/// What [`delete_group`] removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletedGroup {
    pub group: EntityName,
    /// Subjects whose membership in the group was deleted.
    pub members: Vec<EntityName>,
    /// Former children, now roots.
    pub orphans: Vec<EntityName>,
}

/// Delete a group with its entries and memberships; its children become roots.
///
/// Returns `None` if the group does not exist.
pub fn delete_group(
    tx: &mut dyn HierarchyTx,
    group: &EntityName,
) -> Result<Option<DeletedGroup>, StoreError> {
    if tx.entity(group, EntityKind::Group)?.is_none() {
        return Ok(None);
    }

    let mut members = Vec::new();
    for membership in tx.members_of(group)? {
        tx.delete_membership(&membership.group, &membership.member)?;
        members.push(membership.member);
    }

    let mut orphans = Vec::new();
    for mut child in tx.groups()? {
        if child.parent.as_ref() == Some(group) {
            child.set_parent(None)?;
            orphans.push(child.name.clone());
            tx.put_entity(child)?;
        }
    }

    tx.delete_entity(group, EntityKind::Group)?;
    members.sort();
    orphans.sort();
    Ok(Some(DeletedGroup {
        group: group.clone(),
        members,
        orphans,
    }))
}

/// Groups inheriting from `group`, directly or transitively.
pub fn descendants(
    tx: &mut dyn HierarchyTx,
    group: &EntityName,
) -> Result<Vec<EntityName>, StoreError> {
    let groups = tx.groups()?;
    let mut found: Vec<EntityName> = Vec::new();
    let mut frontier = vec![group.clone()];

    while let Some(current) = frontier.pop() {
        for g in &groups {
            if g.parent.as_ref() == Some(&current) && g.name != *group && !found.contains(&g.name) {
                found.push(g.name.clone());
                frontier.push(g.name.clone());
            }
        }
    }
    found.sort();
    Ok(found)
}

/// Add or replace an entry on an entity, creating the entity if absent.
///
/// Returns the entry previously declared for the same permission and scope.
pub fn add_entry(
    tx: &mut dyn HierarchyTx,
    name: &str,
    kind: EntityKind,
    entry: Entry,
) -> Result<Option<Entry>, StoreError> {
    let mut entity = ensure(tx, name, kind)?;
    if entity.entry(&entry.permission, &entry.scope) == Some(&entry) {
        return Ok(Some(entry));
    }
    let replaced = entity.set_entry(entry);
    tx.put_entity(entity)?;
    Ok(replaced)
}

/// Remove an entry. `false` when the entity or the entry does not exist.
pub fn remove_entry(
    tx: &mut dyn HierarchyTx,
    name: &EntityName,
    kind: EntityKind,
    permission: &Permission,
    scope: &Scope,
) -> Result<bool, StoreError> {
    let Some(mut entity) = tx.entity(name, kind)? else {
        return Ok(false);
    };
    if !entity.remove_entry(permission, scope) {
        return Ok(false);
    }
    tx.put_entity(entity)?;
    Ok(true)
}
