//! ACME accounts
//!
//! An [`Account`] is the registration a certificate authority holds for
//! us: the account URL, the terms we agreed to, and the key material the
//! protocol adapter needs to sign requests. Accounts are kept per server
//! by an [`AccountStore`].

mod resolve;
mod storage;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use certward_common::AccountId;

use crate::errors::StorageError;

pub use resolve::{determine_account, existing_account, EMAIL_PROMPT};
pub use storage::{server_key, AccountFileStorage};

/// What the CA told us when the account was created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    /// Account URL
    pub uri: String,
    #[serde(default)]
    pub terms_of_service: Option<String>,
    #[serde(default)]
    pub contact: Vec<String>,
}

/// Local bookkeeping about an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountMeta {
    pub creation_dt: DateTime<Utc>,
    #[serde(default)]
    pub email: Option<String>,
}

/// A registered ACME account
#[derive(Debug, Clone)]
pub struct Account {
    pub id: AccountId,
    pub regr: Registration,
    pub meta: AccountMeta,
    /// Serialized key material, opaque to everything but the ACME adapter
    pub credentials: serde_json::Value,
}

impl Account {
    pub fn new(regr: Registration, meta: AccountMeta, credentials: serde_json::Value) -> Self {
        Self {
            id: account_id(&regr.uri),
            regr,
            meta,
            credentials,
        }
    }

    /// Short human label used in menus
    pub fn slug(&self) -> String {
        format!(
            "{} @ {} ({})",
            self.meta.email.as_deref().unwrap_or("(no email)"),
            self.meta.creation_dt.format("%Y-%m-%dT%H:%M:%SZ"),
            self.id
        )
    }
}

/// Stable identifier for an account URL
pub fn account_id(uri: &str) -> AccountId {
    let digest = Sha256::digest(uri.as_bytes());
    AccountId::new(hex::encode(&digest[..16]))
}

/// Persistence for accounts, keyed by ACME server
pub trait AccountStore: Send + Sync {
    /// Every account registered with `server`
    fn find_all(&self, server: &str) -> Result<Vec<Account>, StorageError>;

    fn load(&self, server: &str, id: &AccountId) -> Result<Account, StorageError>;

    fn save(&self, server: &str, account: &Account) -> Result<(), StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    pub(crate) fn sample(uri: &str, email: Option<&str>) -> Account {
        Account::new(
            Registration {
                uri: uri.to_string(),
                terms_of_service: Some("https://ca.example/tos.pdf".to_string()),
                contact: email.map(|e| format!("mailto:{}", e)).into_iter().collect(),
            },
            AccountMeta {
                creation_dt: Utc.with_ymd_and_hms(2016, 3, 1, 12, 0, 0).unwrap(),
                email: email.map(str::to_string),
            },
            serde_json::json!({ "id": uri }),
        )
    }

    #[test]
    fn test_account_id_is_stable_hex() {
        let a = account_id("https://ca.example/acct/1");
        assert_eq!(a, account_id("https://ca.example/acct/1"));
        assert_ne!(a, account_id("https://ca.example/acct/2"));
        assert_eq!(a.as_str().len(), 32);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_slug() {
        let account = sample("https://ca.example/acct/1", Some("admin@example.com"));
        let slug = account.slug();
        assert!(slug.starts_with("admin@example.com @ 2016-03-01T12:00:00Z ("));
        assert!(slug.ends_with(&format!("({})", account.id)));

        let anonymous = sample("https://ca.example/acct/2", None);
        assert!(anonymous.slug().starts_with("(no email)"));
    }
}
