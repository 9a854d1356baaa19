//! Versioned certificate lineages
//!
//! A lineage is the history of certificates issued for one identity.
//!
//! # Directory Structure
//!
//! ```text
//! config_dir/
//! ├── renewal/
//! │   └── example.com.conf        # renewal record (TOML)
//! ├── live/
//! │   └── example.com/
//! │       ├── cert.pem      -> config_dir/archive/example.com/cert2.pem
//! │       ├── chain.pem     -> ...
//! │       ├── fullchain.pem -> ...
//! │       └── privkey.pem   -> ...
//! └── archive/
//!     └── example.com/
//!         ├── cert1.pem  chain1.pem  fullchain1.pem  privkey1.pem
//!         └── cert2.pem  chain2.pem  fullchain2.pem  privkey2.pem
//! ```
//!
//! New versions are written next to the old ones first
//! ([`CertificateLineage::save_successor`]) and only become live when every
//! stable symlink is repointed ([`CertificateLineage::update_all_links_to`]).

mod files;
mod lock;
mod store;

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, trace};

use certward_common::{ArtifactKind, DomainSet, LineageName};
use certward_config::{RenewalConfig, RenewalParams};

use crate::cert::{self, CertInfo};
use crate::errors::StorageError;

pub use files::{make_dir, unique_file, write_atomic, PUBLIC_MODE, SECRET_MODE};
pub use lock::LineageLock;
pub use store::LineageStore;

/// One on-disk certificate lineage
#[derive(Debug, Clone)]
pub struct CertificateLineage {
    name: LineageName,
    config_path: PathBuf,
    record: RenewalConfig,
    cert_info: CertInfo,
}

impl CertificateLineage {
    /// Load a lineage from its renewal record
    ///
    /// Fails when the record does not parse, when any stable path is not a
    /// symlink to an existing archive file, or when the current certificate
    /// names no domain.
    pub fn load(config_path: &Path) -> Result<Self, StorageError> {
        let record = RenewalConfig::from_file(config_path)?;
        let name = config_path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(LineageName::new)
            .ok_or_else(|| {
                StorageError::InvalidStructure(format!(
                    "renewal record {} has no usable file name",
                    config_path.display()
                ))
            })?;

        for kind in ArtifactKind::ALL {
            check_link(record.path_for(kind))?;
        }

        let cert_info = CertInfo::from_file(&record.cert)?;
        if cert_info.names.is_empty() {
            return Err(StorageError::InvalidStructure(format!(
                "certificate {} names no domain",
                record.cert.display()
            )));
        }

        trace!(
            lineage = %name,
            names = %cert_info.names,
            "Loaded certificate lineage"
        );

        Ok(Self {
            name,
            config_path: config_path.to_path_buf(),
            record,
            cert_info,
        })
    }

    pub fn name(&self) -> &LineageName {
        &self.name
    }

    /// Path of the renewal record
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn record(&self) -> &RenewalConfig {
        &self.record
    }

    /// Names covered by the currently active certificate
    pub fn names(&self) -> &DomainSet {
        &self.cert_info.names
    }

    /// Parsed currently active certificate
    pub fn cert_info(&self) -> &CertInfo {
        &self.cert_info
    }

    /// Server the lineage was obtained from or last renewed against
    pub fn server(&self) -> &str {
        &self.record.renewalparams.server
    }

    pub fn cert_path(&self) -> &Path {
        &self.record.cert
    }

    pub fn privkey_path(&self) -> &Path {
        &self.record.privkey
    }

    pub fn chain_path(&self) -> &Path {
        &self.record.chain
    }

    pub fn fullchain_path(&self) -> &Path {
        &self.record.fullchain
    }

    pub fn archive_dir(&self) -> &Path {
        &self.record.archive_dir
    }

    /// Renewal window, preferring the lineage's own override
    pub fn renew_before_days(&self, default_days: u32) -> u32 {
        self.record.renew_before_expiry_days.unwrap_or(default_days)
    }

    /// Archive path of one version of one artifact
    pub fn version_path(&self, kind: ArtifactKind, version: u32) -> PathBuf {
        self.record
            .archive_dir
            .join(format!("{}{}.pem", kind.stem(), version))
    }

    /// Archive file the stable path of `kind` currently points at
    pub fn current_target(&self, kind: ArtifactKind) -> Result<PathBuf, StorageError> {
        check_link(self.record.path_for(kind))
    }

    /// Version the stable path of `kind` currently points at
    pub fn current_version(&self, kind: ArtifactKind) -> Result<Option<u32>, StorageError> {
        let target = self.current_target(kind)?;
        Ok(target
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| parse_version(kind, n)))
    }

    /// Sorted versions of `kind` present in the archive
    pub fn available_versions(&self, kind: ArtifactKind) -> Result<Vec<u32>, StorageError> {
        let mut versions = Vec::new();
        for entry in fs::read_dir(&self.record.archive_dir)? {
            let entry = entry?;
            if let Some(version) = entry
                .file_name()
                .to_str()
                .and_then(|n| parse_version(kind, n))
            {
                versions.push(version);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }

    /// Highest version present for all four artifact kinds
    pub fn latest_common_version(&self) -> Result<Option<u32>, StorageError> {
        let mut common: Option<BTreeSet<u32>> = None;
        for kind in ArtifactKind::ALL {
            let versions: BTreeSet<u32> = self.available_versions(kind)?.into_iter().collect();
            common = Some(match common {
                None => versions,
                Some(acc) => acc.intersection(&versions).copied().collect(),
            });
        }
        Ok(common.and_then(|set| set.last().copied()))
    }

    /// First version number not used by any artifact kind
    ///
    /// Counting every kind means a partially written version is never
    /// reused or mistaken for a complete one.
    pub fn next_free_version(&self) -> Result<u32, StorageError> {
        let mut highest = 0;
        for kind in ArtifactKind::ALL {
            if let Some(max) = self.available_versions(kind)?.last() {
                highest = highest.max(*max);
            }
        }
        Ok(highest + 1)
    }

    /// Write a new version without repointing the stable paths
    ///
    /// Artifacts are written in [`ArtifactKind::ALL`] order, private key
    /// last. With `privkey_pem` of `None` the key of `prior_version` is
    /// carried over. The renewal record is updated with `params` once all
    /// artifacts exist. Returns the new version number.
    pub fn save_successor(
        &mut self,
        prior_version: u32,
        cert_pem: &str,
        privkey_pem: Option<&str>,
        chain_pem: &str,
        params: &RenewalParams,
    ) -> Result<u32, StorageError> {
        let target_version = self.next_free_version()?;

        let privkey = match privkey_pem {
            Some(key) => key.as_bytes().to_vec(),
            None => fs::read(self.version_path(ArtifactKind::PrivKey, prior_version))?,
        };
        let fullchain_pem = cert::fullchain(cert_pem, chain_pem);

        for kind in ArtifactKind::ALL {
            let (contents, mode) = match kind {
                ArtifactKind::Cert => (cert_pem.as_bytes(), PUBLIC_MODE),
                ArtifactKind::Chain => (chain_pem.as_bytes(), PUBLIC_MODE),
                ArtifactKind::Fullchain => (fullchain_pem.as_bytes(), PUBLIC_MODE),
                ArtifactKind::PrivKey => (privkey.as_slice(), SECRET_MODE),
            };
            write_atomic(&self.version_path(kind, target_version), contents, mode)?;
        }

        let mut record = self.record.clone();
        record.renewalparams = params.clone();
        write_atomic(
            &self.config_path,
            record.to_toml()?.as_bytes(),
            PUBLIC_MODE,
        )?;
        self.record = record;

        info!(
            lineage = %self.name,
            prior_version,
            version = target_version,
            "Saved successor certificate version"
        );

        Ok(target_version)
    }

    /// Atomically repoint every stable path at `version`
    pub fn update_all_links_to(&mut self, version: u32) -> Result<(), StorageError> {
        for kind in ArtifactKind::ALL {
            let target = self.version_path(kind, version);
            if !target.exists() {
                return Err(StorageError::MissingVersion { kind, version });
            }
        }

        for kind in ArtifactKind::ALL {
            let target = self.version_path(kind, version);
            files::symlink_atomic(&target, self.record.path_for(kind))?;
            debug!(
                lineage = %self.name,
                kind = %kind,
                target = %target.display(),
                "Repointed stable path"
            );
        }

        self.cert_info = CertInfo::from_file(&self.record.cert)?;

        info!(lineage = %self.name, version, "Updated lineage links");
        Ok(())
    }
}

fn resolve_link(link: &Path) -> Result<PathBuf, StorageError> {
    let target = fs::read_link(link)?;
    if target.is_absolute() {
        return Ok(target);
    }
    Ok(link
        .parent()
        .map(|parent| parent.join(&target))
        .unwrap_or(target))
}

fn check_link(link: &Path) -> Result<PathBuf, StorageError> {
    let meta = fs::symlink_metadata(link)?;
    if !meta.file_type().is_symlink() {
        return Err(StorageError::NotASymlink(link.to_path_buf()));
    }
    let target = resolve_link(link)?;
    if !target.exists() {
        return Err(StorageError::MissingTarget {
            link: link.to_path_buf(),
            target,
        });
    }
    Ok(target)
}

/// Parse `<stem><N>.pem` for the given kind
fn parse_version(kind: ArtifactKind, file_name: &str) -> Option<u32> {
    file_name
        .strip_prefix(kind.stem())?
        .strip_suffix(".pem")?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{mint_cert, new_store, params};

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version(ArtifactKind::Cert, "cert12.pem"), Some(12));
        assert_eq!(parse_version(ArtifactKind::Cert, "chain1.pem"), None);
        assert_eq!(parse_version(ArtifactKind::Chain, "chain1.pem"), Some(1));
        assert_eq!(parse_version(ArtifactKind::Fullchain, "fullchain3.pem"), Some(3));
        assert_eq!(parse_version(ArtifactKind::Cert, "cert.pem"), None);
    }

    #[test]
    fn test_fresh_lineage_is_version_one() {
        let (_dir, store) = new_store();
        let (cert, key) = mint_cert(&["a.com"], "a.com", 2099);
        let domains = DomainSet::parse(["a.com"]).unwrap();
        let lineage = store
            .new_lineage(&domains, &cert, &key, &cert, params(), None)
            .unwrap();

        assert_eq!(lineage.latest_common_version().unwrap(), Some(1));
        assert_eq!(lineage.current_version(ArtifactKind::Cert).unwrap(), Some(1));
        assert_eq!(lineage.names(), &domains);
    }

    #[test]
    fn test_nameless_certificate_is_rejected() {
        let (_dir, store) = new_store();
        let (cert, key) = mint_cert(&["a.com"], "a.com", 2099);
        let domains = DomainSet::parse(["a.com"]).unwrap();
        let lineage = store
            .new_lineage(&domains, &cert, &key, &cert, params(), None)
            .unwrap();

        let (nameless, _) = mint_cert(&[], "Example Corp", 2099);
        fs::write(lineage.version_path(ArtifactKind::Cert, 1), nameless).unwrap();

        assert!(matches!(
            CertificateLineage::load(lineage.config_path()),
            Err(StorageError::InvalidStructure(_))
        ));
    }

    #[test]
    fn test_successor_is_not_live_until_links_move() {
        let (_dir, store) = new_store();
        let (cert, key) = mint_cert(&["a.com"], "a.com", 2030);
        let domains = DomainSet::parse(["a.com"]).unwrap();
        let mut lineage = store
            .new_lineage(&domains, &cert, &key, &cert, params(), None)
            .unwrap();

        let (new_cert, new_key) = mint_cert(&["a.com"], "a.com", 2099);
        let version = lineage
            .save_successor(1, &new_cert, Some(&new_key), &new_cert, &params())
            .unwrap();
        assert_eq!(version, 2);
        assert_eq!(lineage.current_version(ArtifactKind::Cert).unwrap(), Some(1));
        assert_eq!(lineage.latest_common_version().unwrap(), Some(2));

        lineage.update_all_links_to(version).unwrap();
        for kind in ArtifactKind::ALL {
            assert_eq!(lineage.current_version(kind).unwrap(), Some(2));
        }
        assert_eq!(
            fs::read_to_string(lineage.cert_path()).unwrap(),
            new_cert
        );
        assert_eq!(
            fs::read_to_string(lineage.privkey_path()).unwrap(),
            new_key
        );
    }

    #[test]
    fn test_repeated_successors_count_up() {
        let (_dir, store) = new_store();
        let (cert, key) = mint_cert(&["a.com"], "a.com", 2099);
        let domains = DomainSet::parse(["a.com"]).unwrap();
        let mut lineage = store
            .new_lineage(&domains, &cert, &key, &cert, params(), None)
            .unwrap();

        for expected in 2..=4 {
            let prior = lineage.latest_common_version().unwrap().unwrap();
            let version = lineage
                .save_successor(prior, &cert, Some(&key), &cert, &params())
                .unwrap();
            lineage.update_all_links_to(version).unwrap();
            assert_eq!(version, expected);
            assert_eq!(lineage.latest_common_version().unwrap(), Some(expected));
        }
    }

    #[test]
    fn test_partial_version_is_skipped() {
        let (_dir, store) = new_store();
        let (cert, key) = mint_cert(&["a.com"], "a.com", 2099);
        let domains = DomainSet::parse(["a.com"]).unwrap();
        let mut lineage = store
            .new_lineage(&domains, &cert, &key, &cert, params(), None)
            .unwrap();

        // an interrupted save left only cert2.pem behind
        fs::write(lineage.version_path(ArtifactKind::Cert, 2), &cert).unwrap();
        assert_eq!(lineage.latest_common_version().unwrap(), Some(1));

        let version = lineage
            .save_successor(1, &cert, Some(&key), &cert, &params())
            .unwrap();
        assert_eq!(version, 3);
        assert_eq!(lineage.latest_common_version().unwrap(), Some(3));
    }

    #[test]
    fn test_successor_reuses_prior_key() {
        let (_dir, store) = new_store();
        let (cert, key) = mint_cert(&["a.com"], "a.com", 2099);
        let domains = DomainSet::parse(["a.com"]).unwrap();
        let mut lineage = store
            .new_lineage(&domains, &cert, &key, &cert, params(), None)
            .unwrap();

        let version = lineage
            .save_successor(1, &cert, None, &cert, &params())
            .unwrap();
        assert_eq!(
            fs::read_to_string(lineage.version_path(ArtifactKind::PrivKey, version)).unwrap(),
            key
        );
    }

    #[test]
    fn test_update_to_missing_version_fails() {
        let (_dir, store) = new_store();
        let (cert, key) = mint_cert(&["a.com"], "a.com", 2099);
        let domains = DomainSet::parse(["a.com"]).unwrap();
        let mut lineage = store
            .new_lineage(&domains, &cert, &key, &cert, params(), None)
            .unwrap();

        let err = lineage.update_all_links_to(7).unwrap_err();
        assert!(matches!(err, StorageError::MissingVersion { version: 7, .. }));
        assert_eq!(lineage.current_version(ArtifactKind::Cert).unwrap(), Some(1));
    }

    #[test]
    fn test_save_successor_updates_record() {
        let (_dir, store) = new_store();
        let (cert, key) = mint_cert(&["a.com"], "a.com", 2099);
        let domains = DomainSet::parse(["a.com"]).unwrap();
        let mut lineage = store
            .new_lineage(&domains, &cert, &key, &cert, params(), None)
            .unwrap();

        let mut updated = params();
        updated.installer = Some("command".to_string());
        lineage
            .save_successor(1, &cert, Some(&key), &cert, &updated)
            .unwrap();

        let reloaded = CertificateLineage::load(lineage.config_path()).unwrap();
        assert_eq!(reloaded.record().renewalparams.installer.as_deref(), Some("command"));
    }

    #[test]
    fn test_plain_file_is_broken_lineage() {
        let (_dir, store) = new_store();
        let (cert, key) = mint_cert(&["a.com"], "a.com", 2099);
        let domains = DomainSet::parse(["a.com"]).unwrap();
        let lineage = store
            .new_lineage(&domains, &cert, &key, &cert, params(), None)
            .unwrap();

        fs::remove_file(lineage.chain_path()).unwrap();
        fs::write(lineage.chain_path(), &cert).unwrap();

        let err = CertificateLineage::load(lineage.config_path()).unwrap_err();
        assert!(matches!(err, StorageError::NotASymlink(_)));
    }
}
