//! Error types for the certward engine
//!
//! One enum per concern, folded into [`EngineError`] at the command layer.
//! Whether an error is something the user caused (and should read verbatim)
//! or an unexpected fault is decided by [`EngineError::is_expected`].

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use certward_common::{AccountId, ArtifactKind, DomainError, LineageName};
use certward_config::RenewalConfigError;

/// Certificate parsing errors
#[derive(Debug, Error)]
pub enum CertError {
    #[error("Failed to read certificate {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse PEM: {0}")]
    Pem(String),

    #[error("Failed to parse certificate: {0}")]
    X509(String),

    #[error("Invalid expiry timestamp in certificate")]
    Timestamp,

    #[error("Certificate names are invalid: {0}")]
    Names(#[from] DomainError),
}

/// Lineage and account storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Record(#[from] RenewalConfigError),

    #[error(transparent)]
    Cert(#[from] CertError),

    #[error("Expected {0} to be a symlink")]
    NotASymlink(PathBuf),

    #[error("Symlink {link} points at missing file {target}")]
    MissingTarget { link: PathBuf, target: PathBuf },

    #[error("Version {version} of {kind} does not exist in the archive")]
    MissingVersion { kind: ArtifactKind, version: u32 },

    #[error("Lineage '{0}' is locked by another certward process")]
    Locked(LineageName),

    #[error("No lineage named '{0}'")]
    LineageNotFound(LineageName),

    #[error("Account {0} not found")]
    AccountNotFound(AccountId),

    #[error("No free lineage name left for '{0}'")]
    NameExhausted(String),

    #[error("Invalid storage structure: {0}")]
    InvalidStructure(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

/// Errors talking to the certificate authority
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("ACME protocol error: {0}")]
    Acme(String),

    #[error("Failed to create ACME account: {0}")]
    AccountCreation(String),

    #[error("Failed to create certificate order: {0}")]
    OrderCreation(String),

    #[error("Challenge validation failed for domain '{domain}': {message}")]
    ChallengeValidation { domain: String, message: String },

    #[error("Failed to finalize certificate: {0}")]
    Finalization(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("No HTTP-01 challenge available for domain '{0}'")]
    NoHttp01Challenge(String),

    #[error("An authenticator plugin is required to obtain certificates")]
    NoAuthenticator,

    #[error("Failed to fetch ACME directory: {0}")]
    Directory(String),

    #[error("Stored account credentials are unusable: {0}")]
    Credentials(String),

    #[error("Unusable private key: {0}")]
    PrivateKey(String),

    #[error("Failed to sign request: {0}")]
    Signing(String),

    #[error("Revocation rejected: {0}")]
    Revocation(String),

    #[error(transparent)]
    Cert(#[from] CertError),

    #[error(transparent)]
    Plugin(#[from] PluginError),
}

impl From<instant_acme::Error> for ProtocolError {
    fn from(e: instant_acme::Error) -> Self {
        ProtocolError::Acme(e.to_string())
    }
}

impl From<reqwest::Error> for ProtocolError {
    fn from(e: reqwest::Error) -> Self {
        ProtocolError::Directory(e.to_string())
    }
}

/// Authenticator and installer plugin errors
#[derive(Debug, Error)]
pub enum PluginError {
    /// No usable plugin for the requested verb
    #[error("{0}")]
    Selection(String),

    #[error("The {plugin} plugin is misconfigured: {message}")]
    Misconfigured { plugin: String, message: String },

    #[error("Plugin IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Command '{command}' failed: {status}")]
    CommandFailed { command: String, status: String },

    #[error("The {plugin} plugin does not support {operation}")]
    Unsupported { plugin: String, operation: String },
}

/// Prompt errors
#[derive(Debug, Error)]
pub enum DisplayError {
    /// A prompt was needed but the run is non-interactive
    #[error("Missing command line flag or config entry for this setting:\n{prompt}{hint}")]
    MissingFlag { prompt: String, hint: String },

    #[error("Failed to read from the terminal: {0}")]
    Io(#[from] io::Error),
}

impl DisplayError {
    pub fn missing_flag(prompt: &str, cli_flag: Option<&str>) -> Self {
        let hint = cli_flag
            .map(|flag| format!("\n\n(You can set this with the {} flag)", flag))
            .unwrap_or_default();
        DisplayError::MissingFlag {
            prompt: prompt.to_string(),
            hint,
        }
    }
}

/// Top-level engine error
#[derive(Debug, Error)]
pub enum EngineError {
    /// A condition the user has to fix; shown verbatim
    #[error("{0}")]
    Blocking(String),

    #[error(
        "You've asked to renew/replace a seemingly valid certificate with a test certificate \
         (domains: {names}). We will not do that unless you use the --break-my-certs flag!"
    )]
    StagingDowngrade { names: String },

    #[error("Certificate could not be obtained")]
    CertificateNotObtained,

    #[error("Unable to register an account with ACME server")]
    Registration(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("{failures} renew failure(s), {parse_failures} parse failure(s)")]
    RenewalFailures {
        failures: usize,
        parse_failures: usize,
    },

    #[error(transparent)]
    Display(#[from] DisplayError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error(transparent)]
    Cert(#[from] CertError),
}

impl EngineError {
    /// True for errors the user is expected to act on directly
    ///
    /// Everything else is reported as an unexpected error with a pointer
    /// to the log file.
    pub fn is_expected(&self) -> bool {
        match self {
            EngineError::Blocking(_)
            | EngineError::StagingDowngrade { .. }
            | EngineError::CertificateNotObtained
            | EngineError::Registration(_)
            | EngineError::RenewalFailures { .. } => true,
            EngineError::Display(DisplayError::MissingFlag { .. }) => true,
            EngineError::Plugin(PluginError::Selection(_)) => true,
            EngineError::Storage(StorageError::Locked(_)) => true,
            _ => false,
        }
    }
}
