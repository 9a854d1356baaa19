//! Webroot authenticator
//!
//! Answers HTTP-01 challenges by writing the key authorization under
//! `<webroot>/.well-known/acme-challenge/<token>` for the web server that
//! already serves the domain on port 80.

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, warn};

use certward_config::Config;

use super::Authenticator;
use crate::errors::PluginError;

/// Challenge directory relative to the webroot
pub const ACME_CHALLENGE_DIR: &str = ".well-known/acme-challenge";

/// Publishes challenge files in a document root
#[derive(Debug)]
pub struct WebrootAuthenticator {
    webroot: PathBuf,
    /// token -> file written for it
    pending: DashMap<String, PathBuf>,
}

impl WebrootAuthenticator {
    pub fn new(webroot: impl Into<PathBuf>) -> Self {
        Self {
            webroot: webroot.into(),
            pending: DashMap::new(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, PluginError> {
        let webroot = config
            .webroot_path
            .as_ref()
            .ok_or_else(|| PluginError::Misconfigured {
                plugin: "webroot".to_string(),
                message: "webroot_path is not set (use --webroot-path)".to_string(),
            })?;
        Ok(Self::new(webroot))
    }

    pub fn challenge_dir(&self) -> PathBuf {
        self.webroot.join(ACME_CHALLENGE_DIR)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[async_trait]
impl Authenticator for WebrootAuthenticator {
    fn name(&self) -> &str {
        "webroot"
    }

    async fn perform(
        &self,
        domain: &str,
        token: &str,
        key_authorization: &str,
    ) -> Result<(), PluginError> {
        if token.contains('/') || token.contains("..") {
            return Err(PluginError::Misconfigured {
                plugin: "webroot".to_string(),
                message: format!("refusing challenge token '{}'", token),
            });
        }

        let dir = self.challenge_dir();
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(token);
        tokio::fs::write(&path, key_authorization).await?;
        tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).await?;

        debug!(domain = %domain, path = %path.display(), "Wrote HTTP-01 challenge file");
        self.pending.insert(token.to_string(), path);
        Ok(())
    }

    async fn cleanup(&self, token: &str) -> Result<(), PluginError> {
        let Some((_, path)) = self.pending.remove(token) else {
            return Ok(());
        };
        if let Err(e) = tokio::fs::remove_file(&path).await {
            warn!(path = %path.display(), error = %e, "Failed to remove challenge file");
        } else {
            debug!(path = %path.display(), "Removed HTTP-01 challenge file");
        }
        Ok(())
    }
}
