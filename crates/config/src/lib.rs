//! Configuration for certward
//!
//! Two kinds of configuration live here:
//!
//! - [`Config`]: the tool's own settings (directories, ACME server, plugin
//!   choices), loaded from KDL, JSON or TOML.
//! - [`RenewalConfig`]: the per-lineage renewal record written next to
//!   every certificate lineage and read back by the decision engine.
//!
//! # Example
//!
//! ```kdl
//! paths {
//!     config-dir "/etc/certward"
//!     logs-dir "/var/log/certward"
//! }
//!
//! acme {
//!     email "admin@example.com"
//!     staging #false
//!     agree-tos #true
//!     renew-before-days 30
//! }
//!
//! plugins {
//!     authenticator "webroot"
//!     webroot-path "/var/www/html"
//!     installer "command"
//!     reload-command "systemctl reload nginx"
//! }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub mod kdl;
pub mod renewal;
pub mod validate;

pub use renewal::{RenewalConfig, RenewalConfigError, RenewalParams, RENEWAL_RECORD_VERSION};

/// ACME directory URLs for common providers
pub mod directories {
    /// Let's Encrypt production directory
    pub const LETS_ENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";

    /// Let's Encrypt staging directory (for testing)
    pub const LETS_ENCRYPT_STAGING: &str =
        "https://acme-staging-v02.api.letsencrypt.org/directory";
}

/// Default renewal window in days before expiry
pub const DEFAULT_RENEW_BEFORE_DAYS: u32 = 30;

/// Main certward configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Root of `live/`, `archive/`, `renewal/` and `accounts/`
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,

    /// Scratch space (lock files, temporary state)
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Directory holding the debug log file
    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,

    /// ACME directory URL used for new requests
    #[serde(default = "default_server")]
    pub server: String,

    /// Contact email for account registration
    #[serde(default)]
    pub email: Option<String>,

    /// Agree to the CA's terms of service without prompting
    #[serde(default)]
    pub agree_tos: bool,

    /// Register an account without a contact email
    #[serde(default)]
    pub register_without_email: bool,

    /// Renew when fewer than this many days remain
    #[serde(default = "default_renew_before_days")]
    pub renew_before_days: u32,

    /// Authenticator plugin name
    #[serde(default)]
    pub authenticator: Option<String>,

    /// Installer plugin name
    #[serde(default)]
    pub installer: Option<String>,

    /// Document root served on port 80 (webroot authenticator)
    #[serde(default)]
    pub webroot_path: Option<PathBuf>,

    /// Shell command run to reload the web server (command installer)
    #[serde(default)]
    pub reload_command: Option<String>,
}

fn default_config_dir() -> PathBuf {
    PathBuf::from("/etc/certward")
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("/var/lib/certward")
}

fn default_logs_dir() -> PathBuf {
    PathBuf::from("/var/log/certward")
}

fn default_server() -> String {
    directories::LETS_ENCRYPT_PRODUCTION.to_string()
}

fn default_renew_before_days() -> u32 {
    DEFAULT_RENEW_BEFORE_DAYS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_dir: default_config_dir(),
            work_dir: default_work_dir(),
            logs_dir: default_logs_dir(),
            server: default_server(),
            email: None,
            agree_tos: false,
            register_without_email: false,
            renew_before_days: default_renew_before_days(),
            authenticator: None,
            installer: None,
            webroot_path: None,
            reload_command: None,
        }
    }
}

// ============================================================================
// Config Implementation
// ============================================================================

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("kdl");

        match extension {
            "kdl" => Self::from_kdl(&content),
            "json" => Self::from_json(&content),
            "toml" => Self::from_toml(&content),
            _ => Err(anyhow::anyhow!("Unsupported config format: {}", extension)),
        }
    }

    /// Parse configuration from KDL format
    pub fn from_kdl(content: &str) -> Result<Self> {
        let doc: ::kdl::KdlDocument = content
            .parse()
            .map_err(|e: ::kdl::KdlError| anyhow::anyhow!("{}", kdl::render_parse_error(content, &e)))?;

        kdl::parse_kdl_document(&doc)
    }

    /// Parse configuration from JSON format
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Failed to parse JSON configuration")
    }

    /// Parse configuration from TOML format
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse TOML configuration")
    }

    /// Point new requests at the Let's Encrypt staging directory
    pub fn with_staging(mut self) -> Self {
        self.server = directories::LETS_ENCRYPT_STAGING.to_string();
        self
    }

    /// `live/` directory holding the stable symlinks
    pub fn live_dir(&self) -> PathBuf {
        self.config_dir.join("live")
    }

    /// `archive/` directory holding numbered certificate versions
    pub fn archive_dir(&self) -> PathBuf {
        self.config_dir.join("archive")
    }

    /// `renewal/` directory holding one record per lineage
    pub fn renewal_configs_dir(&self) -> PathBuf {
        self.config_dir.join("renewal")
    }

    /// `accounts/` directory holding registered ACME accounts
    pub fn accounts_dir(&self) -> PathBuf {
        self.config_dir.join("accounts")
    }

    /// Directory for raw certificates saved in CSR mode
    pub fn csr_output_dir(&self) -> PathBuf {
        self.work_dir.join("csr")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server, directories::LETS_ENCRYPT_PRODUCTION);
        assert_eq!(config.renew_before_days, 30);
        assert_eq!(config.live_dir(), PathBuf::from("/etc/certward/live"));
        assert_eq!(
            config.renewal_configs_dir(),
            PathBuf::from("/etc/certward/renewal")
        );
    }

    #[test]
    fn test_with_staging() {
        let config = Config::default().with_staging();
        assert_eq!(config.server, directories::LETS_ENCRYPT_STAGING);
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = Config::from_json(r#"{"email": "admin@example.com"}"#).unwrap();
        assert_eq!(config.email.as_deref(), Some("admin@example.com"));
        assert_eq!(config.config_dir, PathBuf::from("/etc/certward"));
    }

    #[test]
    fn test_from_toml() {
        let config = Config::from_toml(
            r#"
            config_dir = "/tmp/cw"
            renew_before_days = 14
            installer = "command"
            "#,
        )
        .unwrap();
        assert_eq!(config.config_dir, PathBuf::from("/tmp/cw"));
        assert_eq!(config.renew_before_days, 14);
        assert_eq!(config.installer.as_deref(), Some("command"));
    }

    #[test]
    fn test_from_file_dispatches_on_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("certward.kdl");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "acme {{\n    email \"ops@example.com\"\n}}").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.email.as_deref(), Some("ops@example.com"));
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("certward.ini");
        std::fs::write(&path, "").unwrap();
        let err = Config::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("Unsupported config format"));
    }
}
