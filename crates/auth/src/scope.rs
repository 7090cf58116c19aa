//! World/region scoping of permission entries.

use serde::{Deserialize, Serialize};

use permgraph_core::{DomainError, DomainResult};

/// Where an entry applies.
///
/// `None` is a wildcard: a `None` world applies in every world, a `None`
/// region applies in every region of the matched world(s).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub world: Option<String>,
    pub region: Option<String>,
}

/// How narrowly a scope targets a query. Higher is more specific.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Specificity {
    Global,
    World,
    Region,
    WorldRegion,
}

impl Scope {
    /// Scope that applies everywhere.
    pub fn global() -> Self {
        Self::default()
    }

    pub fn new(world: Option<&str>, region: Option<&str>) -> DomainResult<Self> {
        Ok(Self {
            world: normalize("world", world)?,
            region: normalize("region", region)?,
        })
    }

    pub fn specificity(&self) -> Specificity {
        match (&self.world, &self.region) {
            (None, None) => Specificity::Global,
            (Some(_), None) => Specificity::World,
            (None, Some(_)) => Specificity::Region,
            (Some(_), Some(_)) => Specificity::WorldRegion,
        }
    }

    /// Whether this scope covers a query for `(world, region)`.
    ///
    /// Query values are expected to be normalized (see [`Scope::new`]). A
    /// scoped entry never applies to a query that leaves that dimension unset.
    pub fn applies_to(&self, world: Option<&str>, region: Option<&str>) -> bool {
        dimension_matches(self.world.as_deref(), world)
            && dimension_matches(self.region.as_deref(), region)
    }

    pub fn is_global(&self) -> bool {
        self.world.is_none() && self.region.is_none()
    }
}

fn dimension_matches(scoped: Option<&str>, queried: Option<&str>) -> bool {
    match (scoped, queried) {
        (None, _) => true,
        (Some(s), Some(q)) => s == q,
        (Some(_), None) => false,
    }
}

/// Normalize an optional scoping value: trimmed, lower-cased, blank means unset.
pub fn normalize(what: &str, value: Option<&str>) -> DomainResult<Option<String>> {
    let Some(value) = value.map(str::trim) else {
        return Ok(None);
    };
    if value.is_empty() {
        return Ok(None);
    }
    if value.chars().any(char::is_whitespace) {
        return Err(DomainError::validation(format!(
            "{what} '{value}' must not contain whitespace"
        )));
    }
    Ok(Some(value.to_lowercase()))
}

impl core::fmt::Display for Scope {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match (&self.world, &self.region) {
            (None, None) => Ok(()),
            (Some(w), None) => write!(f, "{w}:"),
            (None, Some(r)) => write!(f, "{r}/"),
            (Some(w), Some(r)) => write!(f, "{r}/{w}:"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn specificity_orders_region_over_world_over_global() {
        let global = Scope::global();
        let world = Scope::new(Some("nether"), None).unwrap();
        let region = Scope::new(None, Some("spawn")).unwrap();
        let both = Scope::new(Some("nether"), Some("spawn")).unwrap();

        assert!(global.specificity() < world.specificity());
        assert!(world.specificity() < region.specificity());
        assert!(region.specificity() < both.specificity());
    }

    #[test]
    fn wildcard_dimensions_match_anything() {
        let world = Scope::new(Some("Nether"), None).unwrap();
        assert!(world.applies_to(Some("nether"), None));
        assert!(world.applies_to(Some("nether"), Some("spawn")));
        assert!(!world.applies_to(Some("overworld"), None));
        assert!(!world.applies_to(None, None));
        assert!(Scope::global().applies_to(None, None));
        assert!(Scope::global().applies_to(Some("any"), Some("where")));
    }

    #[test]
    fn blank_values_are_unset() {
        let scope = Scope::new(Some("  "), Some("")).unwrap();
        assert!(scope.is_global());
        assert!(Scope::new(Some("two words"), None).is_err());
    }
}
