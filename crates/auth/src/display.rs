//! Presentation ordering for declared entries.
//!
//! Nothing here feeds resolution; it only shapes listings.

use core::cmp::Ordering;

use crate::entry::Entry;

/// Stable display order: world (unset last), then region (unset last), then
/// permission key.
pub fn sort_entries<'a>(entries: impl IntoIterator<Item = &'a Entry>) -> Vec<Entry> {
    let mut sorted: Vec<Entry> = entries.into_iter().cloned().collect();
    sorted.sort_by(display_order);
    sorted
}

/// Comparator behind [`sort_entries`].
pub fn display_order(a: &Entry, b: &Entry) -> Ordering {
    nulls_last(a.scope.world.as_deref(), b.scope.world.as_deref())
        .then_with(|| nulls_last(a.scope.region.as_deref(), b.scope.region.as_deref()))
        .then_with(|| a.permission.cmp(&b.permission))
}

fn nulls_last(a: Option<&str>, b: Option<&str>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Normalize a user-supplied listing filter. Blank filters mean "no filter".
pub fn normalize_filter(filter: Option<&str>) -> Option<String> {
    filter
        .map(|f| f.trim().to_lowercase())
        .filter(|f| !f.is_empty())
}

/// Whether an entry's permission, world or region contains `filter`.
pub fn entry_matches_filter(entry: &Entry, filter: &str) -> bool {
    entry.permission.as_str().contains(filter)
        || entry.scope.world.as_deref().is_some_and(|w| w.contains(filter))
        || entry.scope.region.as_deref().is_some_and(|r| r.contains(filter))
}
