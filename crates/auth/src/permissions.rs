use serde::{Deserialize, Serialize};

use permgraph_core::{DomainError, DomainResult};

/// Prefix marking a denied permission in its signed textual form.
pub const NEGATION_MARKER: char = '-';

/// Permission key.
///
/// Keys are dot-delimited, case-insensitive strings (e.g. `"world.build"`).
/// The key itself never carries the negation marker: whether an entry grants
/// or denies is recorded on the [`Entry`](crate::Entry).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Permission(String);

impl Permission {
    pub fn new(raw: impl AsRef<str>) -> DomainResult<Self> {
        let key = raw.as_ref().trim();
        if key.is_empty() {
            return Err(DomainError::validation("permission must not be empty"));
        }
        if key.starts_with(NEGATION_MARKER) {
            return Err(DomainError::validation(format!(
                "permission key '{key}' must not carry the negation marker"
            )));
        }
        if key.chars().any(char::is_whitespace) {
            return Err(DomainError::validation(format!(
                "permission '{key}' must not contain whitespace"
            )));
        }
        if key.split('.').any(str::is_empty) {
            return Err(DomainError::validation(format!(
                "permission '{key}' has an empty segment"
            )));
        }
        Ok(Self(key.to_lowercase()))
    }

    /// Parse the signed form: `"-build"` denies `build`, `"build"` grants it.
    pub fn parse_signed(raw: &str) -> DomainResult<(Self, bool)> {
        let raw = raw.trim();
        match raw.strip_prefix(NEGATION_MARKER) {
            Some(rest) => Ok((Self::new(rest)?, false)),
            None => Ok((Self::new(raw)?, true)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Render the signed form for a given value.
    pub fn signed(&self, value: bool) -> String {
        if value {
            self.0.clone()
        } else {
            format!("{NEGATION_MARKER}{}", self.0)
        }
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Permission {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Permission> for String {
    fn from(value: Permission) -> Self {
        value.0
    }
}

impl core::str::FromStr for Permission {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_parsing_splits_marker_from_key() {
        let (perm, value) = Permission::parse_signed("-World.Build").unwrap();
        assert_eq!(perm.as_str(), "world.build");
        assert!(!value);

        let (perm, value) = Permission::parse_signed("chat").unwrap();
        assert_eq!(perm.as_str(), "chat");
        assert!(value);
    }

    #[test]
    fn malformed_keys_are_rejected() {
        assert!(Permission::new("").is_err());
        assert!(Permission::new("-chat").is_err());
        assert!(Permission::new("a..b").is_err());
        assert!(Permission::parse_signed("-").is_err());
        assert!(Permission::parse_signed("--chat").is_err());
    }

    #[test]
    fn signed_rendering() {
        let perm = Permission::new("build").unwrap();
        assert_eq!(perm.signed(true), "build");
        assert_eq!(perm.signed(false), "-build");
    }
}
