//! Groups and subjects, the owners of permission entries.

use serde::{Deserialize, Serialize};

use permgraph_core::{DomainError, DomainResult, EntityKind, EntityName};

use crate::display;
use crate::entry::Entry;
use crate::permissions::Permission;
use crate::scope::Scope;

/// A group or a subject together with the entries it declares.
///
/// `parent` is a by-name link resolved through the store, never an owning
/// reference. It is only meaningful for groups; subjects always have `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionEntity {
    pub name: EntityName,
    /// Name as originally spelled by whoever created the entity.
    pub display_name: String,
    pub kind: EntityKind,
    pub priority: i32,
    pub parent: Option<EntityName>,
    pub entries: Vec<Entry>,
}

impl PermissionEntity {
    pub fn group(display_name: &str) -> DomainResult<Self> {
        Self::new(display_name, EntityKind::Group)
    }

    pub fn subject(display_name: &str) -> DomainResult<Self> {
        Self::new(display_name, EntityKind::Subject)
    }

    pub fn new(display_name: &str, kind: EntityKind) -> DomainResult<Self> {
        let name = EntityName::new(display_name)?;
        Ok(Self {
            name,
            display_name: display_name.trim().to_string(),
            kind,
            priority: 0,
            parent: None,
            entries: Vec::new(),
        })
    }

    pub fn is_group(&self) -> bool {
        self.kind.is_group()
    }

    /// Set or clear the parent link.
    ///
    /// Only the local invariants are checked here (subjects have no parent, a
    /// group is not its own parent); ancestor-chain cycles need the whole graph
    /// and are checked by the mutation layer inside its transaction.
    pub fn set_parent(&mut self, parent: Option<EntityName>) -> DomainResult<()> {
        if let Some(p) = &parent {
            if !self.is_group() {
                return Err(DomainError::invariant(format!(
                    "subject {} cannot have a parent",
                    self.name
                )));
            }
            if *p == self.name {
                return Err(DomainError::cycle(self.name.as_str(), p.as_str()));
            }
        }
        self.parent = parent;
        Ok(())
    }

    pub fn set_priority(&mut self, priority: i32) -> DomainResult<()> {
        if !self.is_group() {
            return Err(DomainError::invariant(format!(
                "subject {} has no priority",
                self.name
            )));
        }
        self.priority = priority;
        Ok(())
    }

    /// Insert or replace the entry with the same `(permission, scope)`.
    ///
    /// Returns the replaced entry, if any.
    pub fn set_entry(&mut self, entry: Entry) -> Option<Entry> {
        match self.entries.iter_mut().find(|e| e.same_target(&entry)) {
            Some(existing) => Some(core::mem::replace(existing, entry)),
            None => {
                self.entries.push(entry);
                None
            }
        }
    }

    /// Remove the entry for `(permission, scope)`. Returns `true` if one existed.
    pub fn remove_entry(&mut self, permission: &Permission, scope: &Scope) -> bool {
        let before = self.entries.len();
        self.entries
            .retain(|e| !(e.permission == *permission && e.scope == *scope));
        self.entries.len() != before
    }

    pub fn entry(&self, permission: &Permission, scope: &Scope) -> Option<&Entry> {
        self.entries
            .iter()
            .find(|e| e.permission == *permission && e.scope == *scope)
    }

    /// Entries in display order, optionally filtered by substring.
    pub fn sorted_entries(&self, filter: Option<&str>) -> Vec<Entry> {
        let filter = display::normalize_filter(filter);
        let mut entries = display::sort_entries(&self.entries);
        if let Some(f) = filter {
            entries.retain(|e| display::entry_matches_filter(e, &f));
        }
        entries
    }

    /// Check the invariants a stored entity must satisfy.
    pub fn validate(&self) -> DomainResult<()> {
        if !self.is_group() && self.parent.is_some() {
            return Err(DomainError::invariant(format!(
                "subject {} cannot have a parent",
                self.name
            )));
        }
        if self.parent.as_ref() == Some(&self.name) {
            return Err(DomainError::cycle(self.name.as_str(), self.name.as_str()));
        }
        for (i, a) in self.entries.iter().enumerate() {
            if self.entries[i + 1..].iter().any(|b| a.same_target(b)) {
                return Err(DomainError::invariant(format!(
                    "{} declares {} more than once",
                    self.name,
                    a.permission
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_is_kept_alongside_normalized_name() {
        let group = PermissionEntity::group("  Admins ").unwrap();
        assert_eq!(group.name.as_str(), "admins");
        assert_eq!(group.display_name, "Admins");
        assert!(group.is_group());
    }

    #[test]
    fn set_entry_replaces_same_target() {
        let mut group = PermissionEntity::group("default").unwrap();
        assert!(group.set_entry(Entry::grant("build").unwrap()).is_none());
        let replaced = group.set_entry(Entry::deny("build").unwrap()).unwrap();
        assert!(replaced.value);
        assert_eq!(group.entries.len(), 1);
        assert!(!group.entries[0].value);

        group.set_entry(Entry::parse("build", Some("nether"), None).unwrap());
        assert_eq!(group.entries.len(), 2);
        assert!(group.validate().is_ok());
    }

    #[test]
    fn remove_entry_reports_presence() {
        let mut group = PermissionEntity::group("default").unwrap();
        group.set_entry(Entry::grant("chat").unwrap());
        let chat = Permission::new("chat").unwrap();
        assert!(group.remove_entry(&chat, &Scope::global()));
        assert!(!group.remove_entry(&chat, &Scope::global()));
    }

    #[test]
    fn subjects_cannot_have_parents_or_priorities() {
        let mut alice = PermissionEntity::subject("alice").unwrap();
        let admin = EntityName::new("admin").unwrap();
        assert!(matches!(
            alice.set_parent(Some(admin)),
            Err(DomainError::InvariantViolation(_))
        ));
        assert!(alice.set_priority(3).is_err());
        assert!(alice.set_parent(None).is_ok());
    }

    #[test]
    fn self_parent_is_a_cycle() {
        let mut group = PermissionEntity::group("mod").unwrap();
        let err = group.set_parent(Some(group.name.clone())).unwrap_err();
        assert!(matches!(err, DomainError::CycleDetected { .. }));
        assert!(group.parent.is_none());
    }

    #[test]
    fn sorted_entries_apply_filter() {
        let mut group = PermissionEntity::group("default").unwrap();
        group.set_entry(Entry::grant("chat").unwrap());
        group.set_entry(Entry::parse("build", Some("nether"), None).unwrap());
        let all = group.sorted_entries(None);
        assert_eq!(all[0].permission.as_str(), "build");
        let filtered = group.sorted_entries(Some("CHA"));
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].permission.as_str(), "chat");
    }
}
