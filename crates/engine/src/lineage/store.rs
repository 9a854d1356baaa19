//! File-backed lineage store
//!
//! Everything lives under `config_dir`. Directories holding private keys
//! are created `0700`, key files `0600`.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, trace, warn};

use certward_common::{ArtifactKind, DomainSet, LineageName};
use certward_config::{Config, RenewalConfig, RenewalParams, RENEWAL_RECORD_VERSION};

use super::files::{self, make_dir, write_atomic, PUBLIC_MODE, SECRET_MODE};
use super::{CertificateLineage, LineageLock};
use crate::cert;
use crate::errors::StorageError;

/// Highest numeric suffix tried when a lineage name is taken
const MAX_NAME_SUFFIX: u32 = 9999;

/// Lineage store rooted at a config directory
#[derive(Debug, Clone)]
pub struct LineageStore {
    live_dir: PathBuf,
    archive_dir: PathBuf,
    renewal_dir: PathBuf,
}

impl LineageStore {
    /// Open the store, creating `live/`, `archive/` and `renewal/` as needed
    pub fn new(config: &Config) -> Result<Self, StorageError> {
        let store = Self {
            live_dir: config.live_dir(),
            archive_dir: config.archive_dir(),
            renewal_dir: config.renewal_configs_dir(),
        };

        make_dir(&store.live_dir, 0o755)?;
        make_dir(&store.archive_dir, 0o700)?;
        make_dir(&store.renewal_dir, 0o755)?;

        debug!(
            config_dir = %config.config_dir.display(),
            "Opened lineage store"
        );

        Ok(store)
    }

    pub fn renewal_dir(&self) -> &Path {
        &self.renewal_dir
    }

    /// Renewal record paths, sorted by file name
    pub fn list(&self) -> Result<Vec<PathBuf>, StorageError> {
        let mut records = Vec::new();
        for entry in fs::read_dir(&self.renewal_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("conf") {
                records.push(path);
            }
        }
        records.sort();
        trace!(count = records.len(), "Listed renewal records");
        Ok(records)
    }

    pub fn load(&self, path: &Path) -> Result<CertificateLineage, StorageError> {
        CertificateLineage::load(path)
    }

    fn record_path(&self, name: &LineageName) -> PathBuf {
        self.renewal_dir.join(format!("{}.conf", name))
    }

    /// Load a lineage by name
    pub fn find(&self, name: &LineageName) -> Result<CertificateLineage, StorageError> {
        let path = self.record_path(name);
        if !path.exists() {
            return Err(StorageError::LineageNotFound(name.clone()));
        }
        self.load(&path)
    }

    /// Take the per-lineage lock
    pub fn lock(&self, name: &LineageName) -> Result<LineageLock, StorageError> {
        LineageLock::acquire(&self.renewal_dir, name)
    }

    fn dirs_taken(&self, name: &LineageName) -> bool {
        self.live_dir.join(name.as_str()).exists() || self.archive_dir.join(name.as_str()).exists()
    }

    /// Reserve a lineage name by creating its renewal record exclusively
    ///
    /// Concurrent runs asking for the same name end up with different
    /// suffixes. The claimed record is empty until the lineage is written.
    fn claim_name(&self, base: &str) -> Result<LineageName, StorageError> {
        let base = LineageName::new(base);
        let candidates =
            std::iter::once(base.clone()).chain((1..=MAX_NAME_SUFFIX).map(|n| base.with_suffix(n)));
        for candidate in candidates {
            if self.dirs_taken(&candidate) {
                continue;
            }
            if files::claim(&self.record_path(&candidate), PUBLIC_MODE)? {
                trace!(lineage = %candidate, "Claimed lineage name");
                return Ok(candidate);
            }
        }
        Err(StorageError::NameExhausted(base.to_string()))
    }

    /// Create a lineage at version 1
    ///
    /// The lineage is named after the first requested domain, with a
    /// `-0001` style suffix when that name is already in use.
    pub fn new_lineage(
        &self,
        domains: &DomainSet,
        cert_pem: &str,
        privkey_pem: &str,
        chain_pem: &str,
        params: RenewalParams,
        renew_before_expiry_days: Option<u32>,
    ) -> Result<CertificateLineage, StorageError> {
        let first = domains.first().ok_or_else(|| {
            StorageError::InvalidStructure("cannot create a lineage without domains".to_string())
        })?;
        let name = self.claim_name(first)?;
        let config_path = self.record_path(&name);

        let write_lineage = || -> Result<(), StorageError> {
            let archive = self.archive_dir.join(name.as_str());
            let live = self.live_dir.join(name.as_str());
            make_dir(&archive, 0o700)?;
            make_dir(&live, 0o755)?;

            let fullchain_pem = cert::fullchain(cert_pem, chain_pem);
            let record = RenewalConfig {
                version: RENEWAL_RECORD_VERSION.to_string(),
                archive_dir: archive.clone(),
                cert: live.join("cert.pem"),
                privkey: live.join("privkey.pem"),
                chain: live.join("chain.pem"),
                fullchain: live.join("fullchain.pem"),
                renew_before_expiry_days,
                renewalparams: params,
            };

            for kind in ArtifactKind::ALL {
                let (contents, mode) = match kind {
                    ArtifactKind::Cert => (cert_pem, PUBLIC_MODE),
                    ArtifactKind::Chain => (chain_pem, PUBLIC_MODE),
                    ArtifactKind::Fullchain => (fullchain_pem.as_str(), PUBLIC_MODE),
                    ArtifactKind::PrivKey => (privkey_pem, SECRET_MODE),
                };
                let target = archive.join(format!("{}1.pem", kind.stem()));
                write_atomic(&target, contents.as_bytes(), mode)?;
                files::symlink_atomic(&target, record.path_for(kind))?;
            }

            write_atomic(&config_path, record.to_toml()?.as_bytes(), PUBLIC_MODE)?;
            Ok(())
        };

        if let Err(e) = write_lineage() {
            warn!(lineage = %name, error = %e, "Failed to create lineage, releasing its name");
            let _ = fs::remove_file(&config_path);
            return Err(e);
        }

        info!(
            lineage = %name,
            domains = %domains,
            "Created new certificate lineage"
        );

        CertificateLineage::load(&config_path)
    }
}
