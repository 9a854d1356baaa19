//! Common types for certward.
//!
//! Identifiers, normalized domain sets and the small enums shared by the
//! configuration crate and the decision engine.

pub mod domains;
pub mod ids;
pub mod types;

pub use domains::{normalize_domain, DomainError, DomainSet};
pub use ids::{AccountId, LineageName};
pub use types::{Action, ArtifactKind, Verb};
