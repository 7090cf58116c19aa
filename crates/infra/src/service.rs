//! Application facade over the hierarchy.
//!
//! `PermissionService` is what a command layer calls into:
//!
//! - **Writes** run through the [`TransactionCoordinator`] (bounded retry on
//!   conflict, domain errors surfaced immediately) and notify the
//!   [`RefreshNotifier`] only after a successful commit.
//! - **Reads** go straight to the store's committed state and never block on
//!   in-flight transactions.
//!
//! Names are accepted as raw strings and normalized here; an invalid name is a
//! [`DomainError::Validation`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use permgraph_auth::{
    Entry, Explanation, HierarchyView, MemberStatus, Membership, Permission, PermissionEntity,
    PermissionResolver, PermissionState, ResolveQuery, ResolvedPermissions, Scope,
};
use permgraph_core::{DomainError, EntityKind, EntityName};

use crate::config::EngineConfig;
use crate::membership;
use crate::mutator;
use crate::notify::{NoopNotifier, RefreshNotifier};
use crate::store::{HierarchyStore, StoreError};
use crate::transaction::{TransactionCoordinator, TransactionError};

/// A group as presented by `show_group`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupDetails {
    pub name: EntityName,
    pub display_name: String,
    pub priority: i32,
    pub parent: Option<EntityName>,
    /// Parent as spelled when it was created; the normalized name if the
    /// parent record is missing.
    pub parent_display_name: Option<String>,
    /// Display order, after filtering.
    pub entries: Vec<Entry>,
}

pub struct PermissionService<S, N = NoopNotifier> {
    store: S,
    notifier: N,
    coordinator: TransactionCoordinator,
}

impl<S> PermissionService<S, NoopNotifier>
where
    S: HierarchyStore,
{
    /// Service with default configuration and no notifications.
    pub fn with_store(store: S) -> Self {
        Self::new(store, NoopNotifier, &EngineConfig::default())
    }
}

impl<S, N> PermissionService<S, N>
where
    S: HierarchyStore,
    N: RefreshNotifier,
{
    pub fn new(store: S, notifier: N, config: &EngineConfig) -> Self {
        Self {
            store,
            notifier,
            coordinator: TransactionCoordinator::new(config.retry.clone()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    pub fn resolver(&self) -> PermissionResolver<&S> {
        PermissionResolver::new(&self.store)
    }

    // ---------------------------------------------------------------------
    // Groups
    // ---------------------------------------------------------------------

    /// `false` if the group already exists.
    pub fn create_group(&self, name: &str) -> Result<bool, TransactionError> {
        let created = self
            .coordinator
            .execute(&self.store, |tx| mutator::create_group(tx, name))?;
        if created {
            info!(group = %name, "group created");
        }
        Ok(created)
    }

    /// `false` if the group does not exist.
    pub fn delete_group(&self, name: &str) -> Result<bool, TransactionError> {
        let group = EntityName::new(name)?;
        let Some(deleted) = self
            .coordinator
            .execute(&self.store, |tx| mutator::delete_group(tx, &group))?
        else {
            return Ok(false);
        };

        info!(
            group = %deleted.group,
            members = deleted.members.len(),
            orphans = deleted.orphans.len(),
            "group deleted"
        );
        for child in &deleted.orphans {
            self.notifier.refresh_affected_players(child);
        }
        for member in &deleted.members {
            self.notifier.refresh_player(member);
            self.notifier.refresh_expirations(member);
        }
        Ok(true)
    }

    /// Re-parent `group` (creating it and `parent` if needed), or clear its
    /// parent with `None`.
    pub fn set_parent(&self, group: &str, parent: Option<&str>) -> Result<(), TransactionError> {
        let name = EntityName::new(group)?;
        self.coordinator
            .execute(&self.store, |tx| mutator::set_parent(tx, group, parent))?;

        info!(group = %name, parent = ?parent, "group parent set");
        self.notifier.refresh_affected_players(&name);
        Ok(())
    }

    pub fn set_priority(&self, group: &str, priority: i32) -> Result<(), TransactionError> {
        let name = EntityName::new(group)?;
        self.coordinator
            .execute(&self.store, |tx| mutator::set_priority(tx, group, priority))?;

        info!(group = %name, priority, "group priority set");
        self.notifier.refresh_affected_players(&name);
        Ok(())
    }

    pub fn show_group(&self, name: &str, filter: Option<&str>) -> Result<GroupDetails, StoreError> {
        let group_name = EntityName::new(name)?;
        let group = self
            .store
            .entity(&group_name, EntityKind::Group)?
            .ok_or_else(|| DomainError::missing_group(group_name.as_str()))?;

        let parent_display_name = match &group.parent {
            None => None,
            Some(parent) => Some(
                self.store
                    .entity(parent, EntityKind::Group)?
                    .map(|p| p.display_name)
                    .unwrap_or_else(|| parent.to_string()),
            ),
        };

        Ok(GroupDetails {
            entries: group.sorted_entries(filter),
            name: group.name,
            display_name: group.display_name,
            priority: group.priority,
            parent: group.parent,
            parent_display_name,
        })
    }

    /// Every stored group, ordered by name.
    pub fn groups(&self) -> Result<Vec<PermissionEntity>, StoreError> {
        let mut groups = self.store.groups()?;
        groups.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(groups)
    }

    /// Subjects holding a membership (active or not) in `group` or in any
    /// group inheriting from it.
    pub fn affected_subjects(&self, group: &str) -> Result<Vec<EntityName>, StoreError> {
        let group = EntityName::new(group)?;
        // Read-only transaction; dropped without committing.
        let mut tx = self.store.begin()?;

        let mut groups = mutator::descendants(&mut *tx, &group)?;
        groups.push(group);

        let mut subjects = Vec::new();
        for g in &groups {
            subjects.extend(tx.members_of(g)?.into_iter().map(|m| m.member));
        }
        subjects.sort();
        subjects.dedup();
        Ok(subjects)
    }

    // ---------------------------------------------------------------------
    // Entities & entries
    // ---------------------------------------------------------------------

    pub fn get_entity(
        &self,
        name: &str,
        kind: EntityKind,
    ) -> Result<Option<PermissionEntity>, StoreError> {
        self.store.entity(&EntityName::new(name)?, kind)
    }

    pub fn create_subject_if_absent(
        &self,
        name: &str,
    ) -> Result<PermissionEntity, TransactionError> {
        self.coordinator
            .execute(&self.store, |tx| mutator::create_subject_if_absent(tx, name))
    }

    /// Declare `signed_permission` (a leading `-` denies) on an entity,
    /// creating the entity if absent. Returns the replaced entry, if any.
    pub fn grant(
        &self,
        name: &str,
        kind: EntityKind,
        signed_permission: &str,
        world: Option<&str>,
        region: Option<&str>,
    ) -> Result<Option<Entry>, TransactionError> {
        let owner = EntityName::new(name)?;
        let entry = Entry::parse(signed_permission, world, region)?;
        let replaced = self.coordinator.execute(&self.store, |tx| {
            mutator::add_entry(tx, name, kind, entry.clone())
        })?;

        info!(entity = %owner, kind = %kind, entry = %entry, "entry set");
        self.refresh_owner(&owner, kind);
        Ok(replaced)
    }

    /// Remove a declared entry. `false` when the entity or entry is missing.
    ///
    /// A leading `-` on `permission` is ignored: entries are identified by
    /// key and scope, not by value.
    pub fn revoke(
        &self,
        name: &str,
        kind: EntityKind,
        permission: &str,
        world: Option<&str>,
        region: Option<&str>,
    ) -> Result<bool, TransactionError> {
        let owner = EntityName::new(name)?;
        let (permission, _) = Permission::parse_signed(permission)?;
        let scope = Scope::new(world, region)?;
        let removed = self.coordinator.execute(&self.store, |tx| {
            mutator::remove_entry(tx, &owner, kind, &permission, &scope)
        })?;

        if removed {
            info!(
                entity = %owner,
                kind = %kind,
                permission = %permission,
                scope = %scope,
                "entry removed"
            );
            self.refresh_owner(&owner, kind);
        }
        Ok(removed)
    }

    fn refresh_owner(&self, owner: &EntityName, kind: EntityKind) {
        match kind {
            EntityKind::Group => self.notifier.refresh_affected_players(owner),
            EntityKind::Subject => self.notifier.refresh_player(owner),
        }
    }

    // ---------------------------------------------------------------------
    // Memberships
    // ---------------------------------------------------------------------

    /// Add `subject` to an existing `group` (upsert on the pair).
    pub fn add_member(
        &self,
        group: &str,
        subject: &str,
        expiration: Option<DateTime<Utc>>,
    ) -> Result<Membership, TransactionError> {
        let membership = self.coordinator.execute(&self.store, |tx| {
            membership::add_member(tx, group, subject, expiration)
        })?;

        info!(
            group = %membership.group,
            member = %membership.member,
            expiration = ?membership.expiration,
            "member added"
        );
        self.notifier.refresh_player(&membership.member);
        if membership.expiration.is_some() {
            self.notifier.refresh_expirations(&membership.member);
        }
        Ok(membership)
    }

    /// `true` iff a membership existed and was deleted. A missing group and a
    /// missing membership are both `false`.
    pub fn remove_member(&self, group: &str, subject: &str) -> Result<bool, TransactionError> {
        let group = EntityName::new(group)?;
        let subject = EntityName::new(subject)?;
        let removed = self.coordinator.execute(&self.store, |tx| {
            membership::remove_member(tx, &group, &subject)
        })?;

        if removed {
            info!(group = %group, member = %subject, "member removed");
            self.notifier.refresh_player(&subject);
            self.notifier.refresh_expirations(&subject);
        }
        Ok(removed)
    }

    /// Memberships of `group`, ordered by member. Empty for a missing group.
    pub fn get_members(&self, group: &str) -> Result<Vec<Membership>, StoreError> {
        let mut members = self.store.members_of(&EntityName::new(group)?)?;
        membership::sort_members(&mut members);
        Ok(members)
    }

    /// Member listing with active/expired status at `at`.
    pub fn members(&self, group: &str, at: DateTime<Utc>) -> Result<Vec<MemberStatus>, StoreError> {
        Ok(self
            .get_members(group)?
            .iter()
            .map(|m| m.status(at))
            .collect())
    }

    /// Delete memberships inactive at `at`. Returns how many were removed.
    pub fn sweep_expired(&self, at: DateTime<Utc>) -> Result<usize, TransactionError> {
        let removed = self
            .coordinator
            .execute(&self.store, |tx| membership::sweep_expired(tx, at))?;

        if !removed.is_empty() {
            info!(removed = removed.len(), "expired memberships swept");
        }
        let mut subjects: Vec<&EntityName> = removed.iter().map(|m| &m.member).collect();
        subjects.dedup();
        for subject in subjects {
            self.notifier.refresh_expirations(subject);
        }
        Ok(removed.len())
    }

    /// Earliest membership expiration of `subject` after `at`.
    pub fn next_expiration(
        &self,
        subject: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let memberships = self.store.memberships_of(&EntityName::new(subject)?)?;
        Ok(membership::next_expiration(&memberships, at))
    }

    // ---------------------------------------------------------------------
    // Resolution
    // ---------------------------------------------------------------------

    pub fn resolve(
        &self,
        subject: &str,
        query: &ResolveQuery,
    ) -> Result<ResolvedPermissions, StoreError> {
        self.resolver().resolve(&EntityName::new(subject)?, query)
    }

    pub fn has_permission(
        &self,
        subject: &str,
        permission: &str,
        query: &ResolveQuery,
    ) -> Result<PermissionState, StoreError> {
        let permission = Permission::new(permission)?;
        self.resolver()
            .has_permission(&EntityName::new(subject)?, &permission, query)
    }

    pub fn explain(
        &self,
        subject: &str,
        permission: &str,
        query: &ResolveQuery,
    ) -> Result<Explanation, StoreError> {
        let permission = Permission::new(permission)?;
        self.resolver()
            .explain(&EntityName::new(subject)?, &permission, query)
    }
}
