//! Type-safe identifier newtypes for certward.
//!
//! These types keep the two identities the engine juggles apart: the
//! account registered with the certificate authority, and the on-disk
//! lineage a certificate belongs to.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Account identifier.
///
/// Identifies a registered account with a certificate authority. The
/// value is opaque to the engine; the account store derives it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert to owned String
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lineage name.
///
/// The directory name shared by `live/<name>`, `archive/<name>` and
/// `renewal/<name>.conf`. Usually the first domain of the original
/// request, possibly with a `-NNNN` suffix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LineageName(String);

impl LineageName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name with a numeric collision suffix, e.g. `example.com-0001`
    pub fn with_suffix(&self, n: u32) -> Self {
        Self(format!("{}-{:04}", self.0, n))
    }
}

impl fmt::Display for LineageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for LineageName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
