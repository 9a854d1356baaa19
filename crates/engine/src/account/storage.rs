//! File-backed account storage
//!
//! # Directory Structure
//!
//! ```text
//! accounts/
//! └── acme-v02.api.letsencrypt.org/
//!     └── directory/
//!         └── 3f2a.../
//!             ├── meta.json
//!             ├── regr.json
//!             └── credentials.json
//! ```
//!
//! Account directories are `0700` and every file in them `0600`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, trace, warn};

use certward_common::AccountId;
use certward_config::Config;

use super::{Account, AccountMeta, AccountStore, Registration};
use crate::errors::StorageError;
use crate::lineage::{make_dir, write_atomic, SECRET_MODE};

const ACCOUNT_DIR_MODE: u32 = 0o700;

/// Directory key for an ACME server URL
///
/// Host and path of the directory URL, so accounts for different CAs and
/// different endpoints on one CA never mix.
pub fn server_key(server: &str) -> PathBuf {
    match url::Url::parse(server) {
        Ok(url) => {
            let mut key = PathBuf::from(url.host_str().unwrap_or("unknown"));
            if let Some(segments) = url.path_segments() {
                for segment in segments.filter(|s| !s.is_empty() && *s != "." && *s != "..") {
                    key.push(segment);
                }
            }
            key
        }
        Err(_) => PathBuf::from(
            server
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
                .collect::<String>(),
        ),
    }
}

/// Accounts stored under `config_dir/accounts`
#[derive(Debug, Clone)]
pub struct AccountFileStorage {
    root: PathBuf,
}

impl AccountFileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.accounts_dir())
    }

    fn server_dir(&self, server: &str) -> PathBuf {
        self.root.join(server_key(server))
    }

    fn account_dir(&self, server: &str, id: &AccountId) -> PathBuf {
        self.server_dir(server).join(id.as_str())
    }

    fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, StorageError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn load_dir(&self, dir: &Path) -> Result<Account, StorageError> {
        let regr: Registration = Self::read_json(&dir.join("regr.json"))?;
        let meta: AccountMeta = Self::read_json(&dir.join("meta.json"))?;
        let credentials: serde_json::Value = Self::read_json(&dir.join("credentials.json"))?;
        let account = Account::new(regr, meta, credentials);

        let dir_name = dir.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if account.id.as_str() != dir_name {
            return Err(StorageError::InvalidStructure(format!(
                "account directory {} does not match its registration",
                dir.display()
            )));
        }
        Ok(account)
    }
}

impl AccountStore for AccountFileStorage {
    fn find_all(&self, server: &str) -> Result<Vec<Account>, StorageError> {
        let dir = self.server_dir(server);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                trace!(server = %server, "No accounts stored for server");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut dirs = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                dirs.push(entry.path());
            }
        }
        dirs.sort();

        let mut accounts = Vec::with_capacity(dirs.len());
        for path in dirs {
            match self.load_dir(&path) {
                Ok(account) => accounts.push(account),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable account"),
            }
        }
        debug!(server = %server, count = accounts.len(), "Found stored accounts");
        Ok(accounts)
    }

    fn load(&self, server: &str, id: &AccountId) -> Result<Account, StorageError> {
        let dir = self.account_dir(server, id);
        if !dir.is_dir() {
            return Err(StorageError::AccountNotFound(id.clone()));
        }
        self.load_dir(&dir)
    }

    fn save(&self, server: &str, account: &Account) -> Result<(), StorageError> {
        let dir = self.account_dir(server, &account.id);
        make_dir(&self.root, ACCOUNT_DIR_MODE)?;
        make_dir(&dir, ACCOUNT_DIR_MODE)?;

        write_atomic(
            &dir.join("regr.json"),
            serde_json::to_string_pretty(&account.regr)?.as_bytes(),
            SECRET_MODE,
        )?;
        write_atomic(
            &dir.join("meta.json"),
            serde_json::to_string_pretty(&account.meta)?.as_bytes(),
            SECRET_MODE,
        )?;
        write_atomic(
            &dir.join("credentials.json"),
            serde_json::to_string_pretty(&account.credentials)?.as_bytes(),
            SECRET_MODE,
        )?;

        info!(account = %account.id, server = %server, "Saved ACME account");
        Ok(())
    }
}
