//! Per-lineage renewal records
//!
//! Every certificate lineage has a TOML record at `renewal/<name>.conf`
//! that points at its stable paths and remembers how it was obtained.
//!
//! ```toml
//! version = "0.1.0"
//! archive_dir = "/etc/certward/archive/example.com"
//! cert = "/etc/certward/live/example.com/cert.pem"
//! privkey = "/etc/certward/live/example.com/privkey.pem"
//! chain = "/etc/certward/live/example.com/chain.pem"
//! fullchain = "/etc/certward/live/example.com/fullchain.pem"
//!
//! [renewalparams]
//! server = "https://acme-v02.api.letsencrypt.org/directory"
//! authenticator = "webroot"
//! ```
//!
//! `renewalparams.server` is mandatory: the staging safety check compares
//! it against the server of the next request, so a record without it is
//! rejected as broken rather than guessed at.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use certward_common::{AccountId, ArtifactKind};

/// Record format version written by this crate
pub const RENEWAL_RECORD_VERSION: &str = "0.1.0";

/// Errors reading or writing a renewal record
#[derive(Debug, Error)]
pub enum RenewalConfigError {
    #[error("IO error on renewal record {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("renewal record {path} is not valid TOML: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to serialize renewal record: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("renewal record {0} has no renewalparams.server")]
    MissingServer(PathBuf),
}

/// Parameters remembered from the request that created or last renewed a lineage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenewalParams {
    /// ACME directory URL used at issuance or last renewal
    #[serde(default)]
    pub server: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authenticator: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installer: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<AccountId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webroot_path: Option<PathBuf>,
}

/// Renewal record for one lineage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenewalConfig {
    #[serde(default = "default_version")]
    pub version: String,

    /// Directory holding the numbered versions
    pub archive_dir: PathBuf,

    /// Stable paths (symlinks into `archive_dir`)
    pub cert: PathBuf,
    pub privkey: PathBuf,
    pub chain: PathBuf,
    pub fullchain: PathBuf,

    /// Per-lineage override of the renewal window
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renew_before_expiry_days: Option<u32>,

    pub renewalparams: RenewalParams,
}

fn default_version() -> String {
    RENEWAL_RECORD_VERSION.to_string()
}

impl RenewalConfig {
    /// Parse a record from TOML text
    ///
    /// `path` is only used for error messages.
    pub fn from_toml(content: &str, path: &Path) -> Result<Self, RenewalConfigError> {
        let record: RenewalConfig =
            toml::from_str(content).map_err(|source| RenewalConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        if record.renewalparams.server.trim().is_empty() {
            return Err(RenewalConfigError::MissingServer(path.to_path_buf()));
        }

        Ok(record)
    }

    /// Read and parse a record from disk
    pub fn from_file(path: &Path) -> Result<Self, RenewalConfigError> {
        let content = fs::read_to_string(path).map_err(|source| RenewalConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content, path)
    }

    /// Serialize to TOML
    pub fn to_toml(&self) -> Result<String, RenewalConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Stable path for one artifact kind
    pub fn path_for(&self, kind: ArtifactKind) -> &Path {
        match kind {
            ArtifactKind::Cert => &self.cert,
            ArtifactKind::PrivKey => &self.privkey,
            ArtifactKind::Chain => &self.chain,
            ArtifactKind::Fullchain => &self.fullchain,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RenewalConfig {
        RenewalConfig {
            version: default_version(),
            archive_dir: PathBuf::from("/etc/certward/archive/a.com"),
            cert: PathBuf::from("/etc/certward/live/a.com/cert.pem"),
            privkey: PathBuf::from("/etc/certward/live/a.com/privkey.pem"),
            chain: PathBuf::from("/etc/certward/live/a.com/chain.pem"),
            fullchain: PathBuf::from("/etc/certward/live/a.com/fullchain.pem"),
            renew_before_expiry_days: None,
            renewalparams: RenewalParams {
                server: crate::directories::LETS_ENCRYPT_PRODUCTION.to_string(),
                authenticator: Some("webroot".to_string()),
                account: Some(AccountId::new("abc123")),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_record_survives_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.com.conf");
        let record = sample();
        std::fs::write(&path, record.to_toml().unwrap()).unwrap();

        let loaded = RenewalConfig::from_file(&path).unwrap();
        assert_eq!(loaded, record);
    }

    #[test]
    fn test_missing_server_is_rejected() {
        let content = r#"
            archive_dir = "/a"
            cert = "/c"
            privkey = "/k"
            chain = "/ch"
            fullchain = "/f"

            [renewalparams]
            authenticator = "webroot"
        "#;
        let err = RenewalConfig::from_toml(content, Path::new("a.conf")).unwrap_err();
        assert!(matches!(err, RenewalConfigError::MissingServer(_)));
    }

    #[test]
    fn test_garbage_is_a_parse_error() {
        let err = RenewalConfig::from_toml("cert = [", Path::new("x.conf")).unwrap_err();
        assert!(matches!(err, RenewalConfigError::Parse { .. }));
        assert!(err.to_string().contains("x.conf"));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = RenewalConfig::from_file(Path::new("/nonexistent/x.conf")).unwrap_err();
        assert!(matches!(err, RenewalConfigError::Io { .. }));
    }

    #[test]
    fn test_path_for_kind() {
        let record = sample();
        assert_eq!(
            record.path_for(ArtifactKind::Fullchain),
            Path::new("/etc/certward/live/a.com/fullchain.pem")
        );
    }
}
