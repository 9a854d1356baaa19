//! Requested and covered domain name sets.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// Errors raised while normalizing a domain name.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("empty domain name")]
    Empty,

    #[error("invalid domain name '{0}': contains whitespace")]
    Whitespace(String),

    #[error("invalid domain name '{0}': empty label")]
    EmptyLabel(String),
}

/// Normalize a single domain name
///
/// Lower-cases, trims surrounding whitespace and a single trailing dot.
pub fn normalize_domain(raw: &str) -> Result<String, DomainError> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_suffix('.').unwrap_or(trimmed);
    if trimmed.is_empty() {
        return Err(DomainError::Empty);
    }
    if trimmed.chars().any(char::is_whitespace) {
        return Err(DomainError::Whitespace(raw.to_string()));
    }
    if trimmed.split('.').any(str::is_empty) {
        return Err(DomainError::EmptyLabel(raw.to_string()));
    }
    Ok(trimmed.to_ascii_lowercase())
}

/// An ordered, de-duplicated set of domain names
///
/// Keeps the order in which names were first given (the first name picks
/// the lineage directory) while comparing as a set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DomainSet(Vec<String>);

impl DomainSet {
    /// Build a set from raw names, normalizing and dropping duplicates
    pub fn parse<I, S>(names: I) -> Result<Self, DomainError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out: Vec<String> = Vec::new();
        for name in names {
            let normalized = normalize_domain(name.as_ref())?;
            if !out.contains(&normalized) {
                out.push(normalized);
            }
        }
        Ok(Self(out))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn first(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|n| n == name)
    }

    /// True when every name in `self` also appears in `other`
    pub fn is_subset(&self, other: &DomainSet) -> bool {
        self.iter().all(|n| other.contains(n))
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.0.clone()
    }

    fn sorted(&self) -> BTreeSet<&str> {
        self.iter().collect()
    }
}

impl PartialEq for DomainSet {
    fn eq(&self, other: &Self) -> bool {
        self.sorted() == other.sorted()
    }
}

impl Eq for DomainSet {}

impl fmt::Display for DomainSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_normalize_domain() {
        assert_eq!(normalize_domain("Example.COM.").unwrap(), "example.com");
        assert_eq!(normalize_domain("  a.com ").unwrap(), "a.com");
        assert_eq!(normalize_domain(""), Err(DomainError::Empty));
        assert!(matches!(
            normalize_domain("a..com"),
            Err(DomainError::EmptyLabel(_))
        ));
        assert!(matches!(
            normalize_domain("a com"),
            Err(DomainError::Whitespace(_))
        ));
    }

    #[test]
    fn test_parse_dedupes_and_keeps_order() {
        let set = DomainSet::parse(["www.a.com", "A.com", "www.a.com"]).unwrap();
        assert_eq!(set.as_slice(), ["www.a.com", "a.com"]);
        assert_eq!(set.first(), Some("www.a.com"));
    }

    #[test]
    fn test_equality_ignores_order() {
        let a = DomainSet::parse(["a.com", "b.com"]).unwrap();
        let b = DomainSet::parse(["b.com", "a.com"]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_subset_direction() {
        let small = DomainSet::parse(["a.com"]).unwrap();
        let big = DomainSet::parse(["a.com", "b.com"]).unwrap();
        assert!(small.is_subset(&big));
        assert!(!big.is_subset(&small));
        assert!(big.is_subset(&big));
    }

    proptest! {
        #[test]
        fn prop_parse_is_idempotent(names in proptest::collection::vec("[a-z]{1,8}\\.(com|org)", 0..6)) {
            let once = DomainSet::parse(&names).unwrap();
            let twice = DomainSet::parse(once.as_slice()).unwrap();
            prop_assert_eq!(once.as_slice(), twice.as_slice());
        }
    }
}
