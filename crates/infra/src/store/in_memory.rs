use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use permgraph_auth::{HierarchyView, Membership, PermissionEntity};
use permgraph_core::{EntityKind, EntityName, ExpectedVersion};

use super::r#trait::{HierarchyStore, HierarchyTx, StoreError};

type EntityKey = (EntityKind, EntityName);
/// `(group, member)`
type MembershipKey = (EntityName, EntityName);

/// Unit of optimistic validation.
///
/// Point records are versioned individually; the two table keys are bumped on
/// every write to their table so that scans conflict with concurrent inserts
/// and deletes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum RecordKey {
    Entity(EntityKind, EntityName),
    Membership(EntityName, EntityName),
    EntityTable,
    MembershipTable,
}

impl core::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RecordKey::Entity(kind, name) => write!(f, "{kind} {name}"),
            RecordKey::Membership(group, member) => write!(f, "membership {member} in {group}"),
            RecordKey::EntityTable => f.write_str("entity table"),
            RecordKey::MembershipTable => f.write_str("membership table"),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    entities: BTreeMap<EntityKey, PermissionEntity>,
    memberships: BTreeMap<MembershipKey, Membership>,
    /// Last commit that wrote each live record or table; absent means 0.
    ///
    /// Deleting a record drops its version. Versions are commit numbers, so a
    /// reader that saw the record sees a mismatch either way.
    versions: HashMap<RecordKey, u64>,
    commits: u64,
}

impl State {
    fn version(&self, key: &RecordKey) -> u64 {
        self.versions.get(key).copied().unwrap_or(0)
    }
}

/// In-memory hierarchy store with optimistic, serializable transactions.
///
/// Intended for tests/dev. Not optimized for performance.
#[derive(Debug, Default)]
pub struct InMemoryHierarchyStore {
    state: RwLock<State>,
}

impl InMemoryHierarchyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of write transactions committed so far.
    pub fn commit_count(&self) -> Result<u64, StoreError> {
        Ok(self.read()?.commits)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }
}

impl HierarchyView for InMemoryHierarchyStore {
    type Error = StoreError;

    fn entity(
        &self,
        name: &EntityName,
        kind: EntityKind,
    ) -> Result<Option<PermissionEntity>, StoreError> {
        Ok(self.read()?.entities.get(&(kind, name.clone())).cloned())
    }

    fn memberships_of(&self, subject: &EntityName) -> Result<Vec<Membership>, StoreError> {
        Ok(self
            .read()?
            .memberships
            .values()
            .filter(|m| m.member == *subject)
            .cloned()
            .collect())
    }

    fn members_of(&self, group: &EntityName) -> Result<Vec<Membership>, StoreError> {
        Ok(self
            .read()?
            .memberships
            .values()
            .filter(|m| m.group == *group)
            .cloned()
            .collect())
    }

    fn groups(&self) -> Result<Vec<PermissionEntity>, StoreError> {
        Ok(self
            .read()?
            .entities
            .values()
            .filter(|e| e.is_group())
            .cloned()
            .collect())
    }
}

impl HierarchyStore for InMemoryHierarchyStore {
    fn begin(&self) -> Result<Box<dyn HierarchyTx + '_>, StoreError> {
        Ok(Box::new(InMemoryTx {
            store: self,
            observed: HashMap::new(),
            entities: BTreeMap::new(),
            memberships: BTreeMap::new(),
        }))
    }
}

/// Buffered transaction: local writes + the version of every key it touched.
struct InMemoryTx<'a> {
    store: &'a InMemoryHierarchyStore,
    observed: HashMap<RecordKey, u64>,
    entities: BTreeMap<EntityKey, Option<PermissionEntity>>,
    memberships: BTreeMap<MembershipKey, Option<Membership>>,
}

impl InMemoryTx<'_> {
    /// Remember the first version seen for `key`.
    fn observe(&mut self, state: &State, key: RecordKey) {
        let version = state.version(&key);
        self.observed.entry(key).or_insert(version);
    }

    fn observe_key(&mut self, key: RecordKey) -> Result<(), StoreError> {
        let store = self.store;
        let state = store.read()?;
        self.observe(&state, key);
        Ok(())
    }

    fn scan_memberships(
        &mut self,
        include: impl Fn(&Membership) -> bool,
    ) -> Result<Vec<Membership>, StoreError> {
        let store = self.store;
        let mut merged: BTreeMap<MembershipKey, Membership> = {
            let state = store.read()?;
            self.observe(&state, RecordKey::MembershipTable);
            state
                .memberships
                .iter()
                .filter(|(_, m)| include(m))
                .map(|(k, m)| (k.clone(), m.clone()))
                .collect()
        };

        for (key, local) in &self.memberships {
            match local {
                Some(m) if include(m) => {
                    merged.insert(key.clone(), m.clone());
                }
                _ => {
                    merged.remove(key);
                }
            }
        }

        Ok(merged.into_values().collect())
    }
}

impl HierarchyTx for InMemoryTx<'_> {
    fn entity(
        &mut self,
        name: &EntityName,
        kind: EntityKind,
    ) -> Result<Option<PermissionEntity>, StoreError> {
        let key = (kind, name.clone());
        if let Some(local) = self.entities.get(&key) {
            return Ok(local.clone());
        }

        let store = self.store;
        let state = store.read()?;
        self.observe(&state, RecordKey::Entity(kind, name.clone()));
        Ok(state.entities.get(&key).cloned())
    }

    fn put_entity(&mut self, entity: PermissionEntity) -> Result<(), StoreError> {
        entity.validate()?;
        self.observe_key(RecordKey::Entity(entity.kind, entity.name.clone()))?;
        self.entities
            .insert((entity.kind, entity.name.clone()), Some(entity));
        Ok(())
    }

    fn delete_entity(&mut self, name: &EntityName, kind: EntityKind) -> Result<bool, StoreError> {
        let existed = self.entity(name, kind)?.is_some();
        if existed {
            self.entities.insert((kind, name.clone()), None);
        }
        Ok(existed)
    }

    fn groups(&mut self) -> Result<Vec<PermissionEntity>, StoreError> {
        let store = self.store;
        let mut merged: BTreeMap<EntityName, PermissionEntity> = {
            let state = store.read()?;
            self.observe(&state, RecordKey::EntityTable);
            state
                .entities
                .values()
                .filter(|e| e.is_group())
                .map(|e| (e.name.clone(), e.clone()))
                .collect()
        };

        for ((kind, name), local) in &self.entities {
            if !kind.is_group() {
                continue;
            }
            match local {
                Some(e) => {
                    merged.insert(name.clone(), e.clone());
                }
                None => {
                    merged.remove(name);
                }
            }
        }

        Ok(merged.into_values().collect())
    }

    fn membership(
        &mut self,
        group: &EntityName,
        member: &EntityName,
    ) -> Result<Option<Membership>, StoreError> {
        let key = (group.clone(), member.clone());
        if let Some(local) = self.memberships.get(&key) {
            return Ok(local.clone());
        }

        let store = self.store;
        let state = store.read()?;
        self.observe(&state, RecordKey::Membership(group.clone(), member.clone()));
        Ok(state.memberships.get(&key).cloned())
    }

    fn put_membership(&mut self, membership: Membership) -> Result<(), StoreError> {
        self.observe_key(RecordKey::Membership(
            membership.group.clone(),
            membership.member.clone(),
        ))?;
        self.memberships.insert(
            (membership.group.clone(), membership.member.clone()),
            Some(membership),
        );
        Ok(())
    }

    fn delete_membership(
        &mut self,
        group: &EntityName,
        member: &EntityName,
    ) -> Result<bool, StoreError> {
        let existed = self.membership(group, member)?.is_some();
        if existed {
            self.memberships
                .insert((group.clone(), member.clone()), None);
        }
        Ok(existed)
    }

    fn members_of(&mut self, group: &EntityName) -> Result<Vec<Membership>, StoreError> {
        self.scan_memberships(|m| m.group == *group)
    }

    fn memberships_of(&mut self, member: &EntityName) -> Result<Vec<Membership>, StoreError> {
        self.scan_memberships(|m| m.member == *member)
    }

    fn all_memberships(&mut self) -> Result<Vec<Membership>, StoreError> {
        self.scan_memberships(|_| true)
    }

    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let tx = *self;
        let mut state = tx.store.write()?;

        for (key, seen) in &tx.observed {
            let current = state.version(key);
            if !ExpectedVersion::Exact(*seen).matches(current) {
                return Err(StoreError::Conflict(format!(
                    "{key} changed concurrently (read at version {seen}, now {current})"
                )));
            }
        }

        if tx.entities.is_empty() && tx.memberships.is_empty() {
            return Ok(());
        }

        state.commits += 1;
        let version = state.commits;

        if !tx.entities.is_empty() {
            for ((kind, name), local) in tx.entities {
                let key = (kind, name.clone());
                let record = RecordKey::Entity(kind, name);
                match local {
                    Some(entity) => {
                        state.entities.insert(key, entity);
                        state.versions.insert(record, version);
                    }
                    None => {
                        state.entities.remove(&key);
                        state.versions.remove(&record);
                    }
                }
            }
            state.versions.insert(RecordKey::EntityTable, version);
        }

        if !tx.memberships.is_empty() {
            for ((group, member), local) in tx.memberships {
                let key = (group.clone(), member.clone());
                let record = RecordKey::Membership(group, member);
                match local {
                    Some(membership) => {
                        state.memberships.insert(key, membership);
                        state.versions.insert(record, version);
                    }
                    None => {
                        state.memberships.remove(&key);
                        state.versions.remove(&record);
                    }
                }
            }
            state.versions.insert(RecordKey::MembershipTable, version);
        }

        Ok(())
    }
}
