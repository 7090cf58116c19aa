//! Effective-permission resolution.
//!
//! Resolution composes the entries of every entity that contributes to a
//! subject, applied from lowest to highest precedence so that, per permission
//! key, the last write wins:
//!
//! 1. Active memberships are collected (reference time from the query).
//! 2. Each membership's group chain is walked to its root. A group reached via
//!    several memberships contributes once, at its smallest depth.
//! 3. Groups apply ordered by priority ascending; among equal priorities,
//!    deeper (more distant) groups apply first; names break remaining ties.
//! 4. The subject's own entries apply last, above any group priority.
//! 5. Within one entity, entries apply from least to most specific scope.
//!
//! - No IO beyond the injected [`HierarchyView`]
//! - No mutation
//! - Deterministic for a fixed view state and query

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use permgraph_core::{DomainResult, EntityKind, EntityName};

use crate::entity::PermissionEntity;
use crate::entry::Entry;
use crate::permissions::Permission;
use crate::scope::{self, Scope};
use crate::view::HierarchyView;

/// Where and when a resolution is evaluated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveQuery {
    pub world: Option<String>,
    pub region: Option<String>,
    /// Reference time for membership expiration.
    pub at: DateTime<Utc>,
}

impl ResolveQuery {
    pub fn new(
        world: Option<&str>,
        region: Option<&str>,
        at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        Ok(Self {
            world: scope::normalize("world", world)?,
            region: scope::normalize("region", region)?,
            at,
        })
    }

    /// Query with no world or region, evaluated at `at`.
    pub fn global(at: DateTime<Utc>) -> Self {
        Self {
            world: None,
            region: None,
            at,
        }
    }

    fn covers(&self, scope: &Scope) -> bool {
        scope.applies_to(self.world.as_deref(), self.region.as_deref())
    }
}

/// Tri-state answer for a single permission.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionState {
    Granted,
    Denied,
    Unset,
}

impl PermissionState {
    fn from_value(value: bool) -> Self {
        if value {
            PermissionState::Granted
        } else {
            PermissionState::Denied
        }
    }
}

/// An entity taking part in a resolution, in application order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Contributor {
    pub name: EntityName,
    pub kind: EntityKind,
    pub priority: i32,
    /// Distance from the subject's direct membership (0 = direct group).
    /// Always 0 for the subject itself.
    pub depth: usize,
}

/// An entry together with the entity it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedEntry {
    pub permission: Permission,
    pub value: bool,
    pub scope: Scope,
    pub source: EntityName,
    pub source_kind: EntityKind,
}

impl ResolvedEntry {
    fn from_entry(entry: &Entry, source: &Contributor) -> Self {
        Self {
            permission: entry.permission.clone(),
            value: entry.value,
            scope: entry.scope.clone(),
            source: source.name.clone(),
            source_kind: source.kind,
        }
    }

    pub fn to_entry(&self) -> Entry {
        Entry::new(self.permission.clone(), self.value, self.scope.clone())
    }
}

/// The effective permission set of a subject, keyed and ordered by permission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolvedPermissions {
    entries: BTreeMap<Permission, ResolvedEntry>,
}

impl ResolvedPermissions {
    pub fn state(&self, permission: &Permission) -> PermissionState {
        self.entries
            .get(permission)
            .map(|e| PermissionState::from_value(e.value))
            .unwrap_or(PermissionState::Unset)
    }

    pub fn get(&self, permission: &Permission) -> Option<&ResolvedEntry> {
        self.entries.get(permission)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResolvedEntry> {
        self.entries.values()
    }

    /// Effective entries, ordered by permission key.
    pub fn entries(&self) -> Vec<Entry> {
        self.entries.values().map(ResolvedEntry::to_entry).collect()
    }

    /// Permissions resolved to `true`.
    pub fn granted(&self) -> impl Iterator<Item = &Permission> {
        self.entries
            .values()
            .filter(|e| e.value)
            .map(|e| &e.permission)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Why a single permission resolved the way it did.
#[derive(Debug, Clone, Serialize)]
pub struct Explanation {
    pub subject: EntityName,
    pub permission: Permission,
    pub state: PermissionState,
    /// Every contributing entity, in application order.
    pub contributors: Vec<Contributor>,
    /// Every applicable entry for the permission, in application order.
    pub contributions: Vec<ResolvedEntry>,
    /// The last applied contribution, if any.
    pub winner: Option<ResolvedEntry>,
}

impl Explanation {
    pub fn reason(&self) -> String {
        match &self.winner {
            None => format!(
                "no entity contributing to {} declares '{}'",
                self.subject, self.permission
            ),
            Some(w) => {
                let overridden = self.contributions.len().saturating_sub(1);
                format!(
                    "'{}' is {} by {} {}{} (overriding {} other entr{})",
                    self.permission,
                    if w.value { "granted" } else { "denied" },
                    w.source_kind,
                    w.source,
                    if w.scope.is_global() {
                        String::new()
                    } else {
                        format!(" in scope {}", w.scope)
                    },
                    overridden,
                    if overridden == 1 { "y" } else { "ies" }
                )
            }
        }
    }
}

/// Computes effective permissions from a [`HierarchyView`].
#[derive(Debug, Clone)]
pub struct PermissionResolver<V> {
    view: V,
}

impl<V> PermissionResolver<V> {
    pub fn new(view: V) -> Self {
        Self { view }
    }

    pub fn view(&self) -> &V {
        &self.view
    }
}

impl<V> PermissionResolver<V>
where
    V: HierarchyView,
{
    /// Groups contributing to `subject` at `at`, in application order.
    pub fn effective_groups(
        &self,
        subject: &EntityName,
        at: DateTime<Utc>,
    ) -> Result<Vec<Contributor>, V::Error> {
        Ok(self
            .group_contributors(subject, at)?
            .into_iter()
            .map(|(c, _)| c)
            .collect())
    }

    /// Resolve every permission `subject` ends up with for `query`.
    ///
    /// A subject with no memberships and no entries resolves to the empty set.
    pub fn resolve(
        &self,
        subject: &EntityName,
        query: &ResolveQuery,
    ) -> Result<ResolvedPermissions, V::Error> {
        let mut resolved = ResolvedPermissions::default();
        for (contributor, entity) in self.contributors(subject, query.at)? {
            for entry in applicable_entries(&entity, query) {
                resolved.entries.insert(
                    entry.permission.clone(),
                    ResolvedEntry::from_entry(entry, &contributor),
                );
            }
        }

        debug!(
            subject = %subject,
            world = ?query.world,
            region = ?query.region,
            resolved = resolved.len(),
            "resolved permissions"
        );
        Ok(resolved)
    }

    pub fn has_permission(
        &self,
        subject: &EntityName,
        permission: &Permission,
        query: &ResolveQuery,
    ) -> Result<PermissionState, V::Error> {
        Ok(self.resolve(subject, query)?.state(permission))
    }

    /// Trace every contribution to `permission` for `subject`.
    pub fn explain(
        &self,
        subject: &EntityName,
        permission: &Permission,
        query: &ResolveQuery,
    ) -> Result<Explanation, V::Error> {
        let ordered = self.contributors(subject, query.at)?;

        let mut contributions = Vec::new();
        for (contributor, entity) in &ordered {
            for entry in applicable_entries(entity, query) {
                if entry.permission == *permission {
                    contributions.push(ResolvedEntry::from_entry(entry, contributor));
                }
            }
        }

        let winner = contributions.last().cloned();
        let state = winner
            .as_ref()
            .map(|w| PermissionState::from_value(w.value))
            .unwrap_or(PermissionState::Unset);

        Ok(Explanation {
            subject: subject.clone(),
            permission: permission.clone(),
            state,
            contributors: ordered.into_iter().map(|(c, _)| c).collect(),
            contributions,
            winner,
        })
    }

    /// All contributors in application order: groups, then the subject.
    fn contributors(
        &self,
        subject: &EntityName,
        at: DateTime<Utc>,
    ) -> Result<Vec<(Contributor, PermissionEntity)>, V::Error> {
        let mut ordered = self.group_contributors(subject, at)?;

        if let Some(entity) = self.view.entity(subject, EntityKind::Subject)? {
            ordered.push((
                Contributor {
                    name: entity.name.clone(),
                    kind: EntityKind::Subject,
                    priority: entity.priority,
                    depth: 0,
                },
                entity,
            ));
        }

        Ok(ordered)
    }

    fn group_contributors(
        &self,
        subject: &EntityName,
        at: DateTime<Utc>,
    ) -> Result<Vec<(Contributor, PermissionEntity)>, V::Error> {
        let mut direct: Vec<EntityName> = self
            .view
            .memberships_of(subject)?
            .into_iter()
            .filter(|m| m.is_active(at))
            .map(|m| m.group)
            .collect();
        direct.sort();
        direct.dedup();

        // Smallest depth at which each group is reachable.
        let mut reached: HashMap<EntityName, (PermissionEntity, usize)> = HashMap::new();

        for group in direct {
            let mut next = Some(group);
            let mut depth = 0usize;

            while let Some(name) = next.take() {
                match reached.get_mut(&name) {
                    // Already reached at least as close: its ancestors are too.
                    // This also terminates walks over a corrupted, cyclic chain.
                    Some((_, known)) if *known <= depth => break,
                    Some((entity, known)) => {
                        *known = depth;
                        next = entity.parent.clone();
                    }
                    None => match self.view.entity(&name, EntityKind::Group)? {
                        Some(entity) => {
                            next = entity.parent.clone();
                            reached.insert(name, (entity, depth));
                        }
                        None => {
                            warn!(
                                subject = %subject,
                                group = %name,
                                "group chain references a missing group"
                            );
                        }
                    },
                }
                depth += 1;
            }
        }

        let mut ordered: Vec<(Contributor, PermissionEntity)> = reached
            .into_values()
            .map(|(entity, depth)| {
                (
                    Contributor {
                        name: entity.name.clone(),
                        kind: EntityKind::Group,
                        priority: entity.priority,
                        depth,
                    },
                    entity,
                )
            })
            .collect();

        ordered.sort_by(|(a, _), (b, _)| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| b.depth.cmp(&a.depth))
                .then_with(|| a.name.cmp(&b.name))
        });

        Ok(ordered)
    }
}

/// Entries of `entity` covering the query, least specific first.
fn applicable_entries<'a>(entity: &'a PermissionEntity, query: &ResolveQuery) -> Vec<&'a Entry> {
    let mut entries: Vec<&Entry> = entity
        .entries
        .iter()
        .filter(|e| query.covers(&e.scope))
        .collect();
    entries.sort_by(|a, b| {
        a.specificity()
            .cmp(&b.specificity())
            .then_with(|| a.permission.cmp(&b.permission))
    });
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::Membership;
    use chrono::Duration;
    use proptest::prelude::*;
    use std::convert::Infallible;

    #[derive(Debug, Default, Clone)]
    struct MapView {
        entities: HashMap<(EntityKind, EntityName), PermissionEntity>,
        memberships: Vec<Membership>,
    }

    impl MapView {
        fn group(&mut self, name: &str, priority: i32, parent: Option<&str>, perms: &[&str]) {
            let mut group = PermissionEntity::group(name).unwrap();
            group.priority = priority;
            group.parent = parent.map(|p| EntityName::new(p).unwrap());
            for p in perms {
                group.set_entry(Entry::parse(p, None, None).unwrap());
            }
            self.put(group);
        }

        fn put(&mut self, entity: PermissionEntity) {
            self.entities
                .insert((entity.kind, entity.name.clone()), entity);
        }

        fn subject_entry(&mut self, subject: &str, entry: Entry) {
            let key = (EntityKind::Subject, n(subject));
            let entity = self
                .entities
                .entry(key)
                .or_insert_with(|| PermissionEntity::subject(subject).unwrap());
            entity.set_entry(entry);
        }

        fn group_entry(&mut self, group: &str, entry: Entry) {
            let key = (EntityKind::Group, n(group));
            self.entities.get_mut(&key).unwrap().set_entry(entry);
        }

        fn join(&mut self, subject: &str, group: &str, expiration: Option<DateTime<Utc>>) {
            self.memberships
                .push(Membership::new(n(group), n(subject), expiration));
        }
    }

    impl HierarchyView for MapView {
        type Error = Infallible;

        fn entity(
            &self,
            name: &EntityName,
            kind: EntityKind,
        ) -> Result<Option<PermissionEntity>, Infallible> {
            Ok(self.entities.get(&(kind, name.clone())).cloned())
        }

        fn memberships_of(&self, subject: &EntityName) -> Result<Vec<Membership>, Infallible> {
            Ok(self
                .memberships
                .iter()
                .filter(|m| m.member == *subject)
                .cloned()
                .collect())
        }

        fn members_of(&self, group: &EntityName) -> Result<Vec<Membership>, Infallible> {
            Ok(self
                .memberships
                .iter()
                .filter(|m| m.group == *group)
                .cloned()
                .collect())
        }

        fn groups(&self) -> Result<Vec<PermissionEntity>, Infallible> {
            Ok(self
                .entities
                .values()
                .filter(|e| e.is_group())
                .cloned()
                .collect())
        }
    }

    fn n(name: &str) -> EntityName {
        EntityName::new(name).unwrap()
    }

    fn p(perm: &str) -> Permission {
        Permission::new(perm).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn subject_in_two_groups_gets_both_grants() {
        let mut view = MapView::default();
        view.group("admin", 10, None, &["build"]);
        view.group("default", 0, None, &["chat"]);
        view.join("alice", "admin", None);
        view.join("alice", "default", None);

        let resolver = PermissionResolver::new(view);
        let resolved = resolver.resolve(&n("alice"), &ResolveQuery::global(now())).unwrap();

        assert_eq!(resolved.state(&p("build")), PermissionState::Granted);
        assert_eq!(resolved.state(&p("chat")), PermissionState::Granted);
        assert_eq!(resolved.len(), 2);
    }

    #[test]
    fn unknown_subject_resolves_to_empty_set() {
        let resolver = PermissionResolver::new(MapView::default());
        let resolved = resolver.resolve(&n("nobody"), &ResolveQuery::global(now())).unwrap();
        assert!(resolved.is_empty());
        assert_eq!(resolved.state(&p("chat")), PermissionState::Unset);
    }

    #[test]
    fn higher_priority_group_wins() {
        let mut view = MapView::default();
        view.group("admin", 10, None, &["build"]);
        view.group("default", 0, None, &["-build"]);
        view.join("alice", "admin", None);
        view.join("alice", "default", None);

        let resolver = PermissionResolver::new(view);
        let state = resolver
            .has_permission(&n("alice"), &p("build"), &ResolveQuery::global(now()))
            .unwrap();
        assert_eq!(state, PermissionState::Granted);
    }

    #[test]
    fn subject_entry_overrides_any_group_priority() {
        let mut view = MapView::default();
        view.group("admin", 1_000, None, &["build"]);
        view.join("alice", "admin", None);
        view.subject_entry("alice", Entry::deny("build").unwrap());

        let resolver = PermissionResolver::new(view);
        let explanation = resolver
            .explain(&n("alice"), &p("build"), &ResolveQuery::global(now()))
            .unwrap();
        assert_eq!(explanation.state, PermissionState::Denied);
        assert_eq!(explanation.contributions.len(), 2);
        let winner = explanation.winner.unwrap();
        assert_eq!(winner.source, n("alice"));
        assert_eq!(winner.source_kind, EntityKind::Subject);
    }

    #[test]
    fn subject_entry_beats_more_specific_group_entry() {
        let mut view = MapView::default();
        view.group("admin", 10, None, &[]);
        view.group_entry("admin", Entry::parse("build", Some("nether"), None).unwrap());
        view.join("alice", "admin", None);
        view.subject_entry("alice", Entry::deny("build").unwrap());

        let resolver = PermissionResolver::new(view);
        let query = ResolveQuery::new(Some("nether"), None, now()).unwrap();
        assert_eq!(
            resolver.has_permission(&n("alice"), &p("build"), &query).unwrap(),
            PermissionState::Denied
        );
    }

    #[test]
    fn child_overrides_parent_of_equal_priority() {
        let mut view = MapView::default();
        view.group("base", 0, None, &["-fly", "chat"]);
        view.group("vip", 0, Some("base"), &["fly"]);
        view.join("alice", "vip", None);

        let resolver = PermissionResolver::new(view);
        let resolved = resolver.resolve(&n("alice"), &ResolveQuery::global(now())).unwrap();
        assert_eq!(resolved.state(&p("fly")), PermissionState::Granted);
        assert_eq!(resolved.state(&p("chat")), PermissionState::Granted);

        let groups = resolver.effective_groups(&n("alice"), now()).unwrap();
        let names: Vec<&str> = groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["base", "vip"]);
        assert_eq!(groups[0].depth, 1);
        assert_eq!(groups[1].depth, 0);
    }

    #[test]
    fn world_specific_entry_beats_wildcard_only_in_that_world() {
        let mut view = MapView::default();
        view.group("default", 0, None, &["-build"]);
        view.group_entry("default", Entry::parse("build", Some("w"), None).unwrap());
        view.join("alice", "default", None);

        let resolver = PermissionResolver::new(view);
        let in_w = ResolveQuery::new(Some("w"), None, now()).unwrap();
        let in_other = ResolveQuery::new(Some("other"), None, now()).unwrap();

        assert_eq!(
            resolver.has_permission(&n("alice"), &p("build"), &in_w).unwrap(),
            PermissionState::Granted
        );
        assert_eq!(
            resolver.has_permission(&n("alice"), &p("build"), &in_other).unwrap(),
            PermissionState::Denied
        );
    }

    #[test]
    fn region_entry_beats_world_entry() {
        let mut view = MapView::default();
        view.group("default", 0, None, &[]);
        view.group_entry("default", Entry::parse("build", Some("w"), None).unwrap());
        view.group_entry(
            "default",
            Entry::parse("-build", Some("w"), Some("spawn")).unwrap(),
        );
        view.join("alice", "default", None);

        let resolver = PermissionResolver::new(view);
        let at_spawn = ResolveQuery::new(Some("w"), Some("spawn"), now()).unwrap();
        let elsewhere = ResolveQuery::new(Some("w"), Some("farm"), now()).unwrap();
        assert_eq!(
            resolver.has_permission(&n("alice"), &p("build"), &at_spawn).unwrap(),
            PermissionState::Denied
        );
        assert_eq!(
            resolver.has_permission(&n("alice"), &p("build"), &elsewhere).unwrap(),
            PermissionState::Granted
        );
    }

    #[test]
    fn expired_membership_contributes_nothing() {
        let mut view = MapView::default();
        let now = now();
        view.group("trial", 0, None, &["fly"]);
        view.group("default", 0, None, &["chat"]);
        view.join("alice", "trial", Some(now - Duration::seconds(1)));
        view.join("alice", "default", Some(now + Duration::seconds(1)));

        let resolver = PermissionResolver::new(view);
        let resolved = resolver.resolve(&n("alice"), &ResolveQuery::global(now)).unwrap();
        assert_eq!(resolved.state(&p("fly")), PermissionState::Unset);
        assert_eq!(resolved.state(&p("chat")), PermissionState::Granted);
    }

    #[test]
    fn diamond_membership_counts_shared_ancestor_once_at_nearest_depth() {
        let mut view = MapView::default();
        view.group("root", 0, None, &["chat"]);
        view.group("mid", 0, Some("root"), &[]);
        view.group("leaf", 0, Some("mid"), &[]);
        view.join("alice", "leaf", None);
        view.join("alice", "root", None);

        let resolver = PermissionResolver::new(view);
        let groups = resolver.effective_groups(&n("alice"), now()).unwrap();
        let roots: Vec<&Contributor> = groups.iter().filter(|g| g.name == n("root")).collect();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].depth, 0);
        assert_eq!(groups.len(), 3);
    }

    #[test]
    fn corrupted_cycle_and_dangling_parent_terminate() {
        let mut view = MapView::default();
        view.group("a", 0, Some("b"), &["one"]);
        view.group("b", 0, Some("a"), &["two"]);
        view.group("c", 0, Some("ghost"), &["three"]);
        view.join("alice", "a", None);
        view.join("alice", "c", None);

        let resolver = PermissionResolver::new(view);
        let resolved = resolver.resolve(&n("alice"), &ResolveQuery::global(now())).unwrap();
        assert_eq!(resolved.len(), 3);
    }

    #[test]
    fn explanation_reason_mentions_winner() {
        let mut view = MapView::default();
        view.group("admin", 10, None, &["build"]);
        view.join("alice", "admin", None);

        let resolver = PermissionResolver::new(view);
        let explanation = resolver
            .explain(&n("alice"), &p("build"), &ResolveQuery::global(now()))
            .unwrap();
        assert!(explanation.reason().contains("granted by group admin"));

        let unset = resolver
            .explain(&n("alice"), &p("fly"), &ResolveQuery::global(now()))
            .unwrap();
        assert_eq!(unset.state, PermissionState::Unset);
        assert!(unset.reason().contains("no entity"));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: resolving twice against the same state yields the same result.
        #[test]
        fn resolution_is_deterministic(
            priorities in prop::collection::vec(-5i32..5, 1..6),
            values in prop::collection::vec(any::<bool>(), 1..6),
        ) {
            let mut view = MapView::default();
            for (i, priority) in priorities.iter().enumerate() {
                let parent = if i > 0 { Some(format!("g{}", i - 1)) } else { None };
                let value = values[i % values.len()];
                let perm = if value { "build" } else { "-build" };
                view.group(&format!("g{i}"), *priority, parent.as_deref(), &[perm, "chat"]);
                view.join("alice", &format!("g{i}"), None);
            }

            let resolver = PermissionResolver::new(view);
            let query = ResolveQuery::global(Utc::now());
            let first = resolver.resolve(&n("alice"), &query).unwrap();
            let second = resolver.resolve(&n("alice"), &query).unwrap();
            prop_assert_eq!(first, second);
        }
    }
}
