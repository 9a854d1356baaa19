//! Certward Engine Library
//!
//! Decides what to do when a TLS certificate is requested for a set of
//! domain names, and carries that decision out against an ACME CA.
//!
//! The engine is organised around a few seams:
//!
//! - **Matching**: find stored lineages that already cover the request
//! - **Resolution**: pick reinstall, renew or new certificate, asking the
//!   user through a [`Display`] where the flags leave room
//! - **Execution**: obtain the certificate and advance the lineage's
//!   `live/` links to the new version
//! - **Accounts**: choose or register the ACME account to act as
//! - **Plugins**: authenticators answer challenges, installers deploy
//!
//! # Example
//!
//! ```ignore
//! use certward_engine::{commands, Context, RequestContext};
//! use certward_common::Verb;
//!
//! let req = RequestContext::from_config(Verb::Certonly, &config);
//! let outcome = commands::dispatch(&services, &req).await;
//! ```

// ============================================================================
// Module Declarations
// ============================================================================

pub mod account;
pub mod acme;
pub mod cert;
pub mod commands;
pub mod context;
pub mod display;
pub mod errors;
pub mod executor;
pub mod guard;
pub mod lineage;
pub mod logging;
pub mod matcher;
pub mod outcome;
pub mod plugins;
pub mod protocol;
pub mod renew;
pub mod reporter;
pub mod resolver;

#[cfg(test)]
pub(crate) mod testutil;

// ============================================================================
// Public API Re-exports
// ============================================================================

// Requests and shared handles
pub use context::{Context, PolicyFlags, RequestContext, ResolutionResult};

// Commands
pub use commands::{dispatch, Services};
pub use outcome::{Enrollment, Outcome, CANCELLED_MESSAGE};

// Decision engine
pub use executor::RenewalExecutor;
pub use matcher::{classify, find_duplicative, Match};
pub use resolver::{resolve, should_renew, Decision};

// Storage
pub use account::{Account, AccountFileStorage, AccountStore};
pub use lineage::{CertificateLineage, LineageStore};

// User interaction
pub use display::{Display, MenuResponse, NoninteractiveDisplay, TerminalDisplay};
pub use reporter::{Priority, Reporter};

// CA access
pub use acme::InstantAcmeConnector;
pub use protocol::{AcmeConnector, CertificateChain, IssuedCertificate, ProtocolClient};

// Errors
pub use errors::EngineError;
