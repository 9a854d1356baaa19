//! Authenticator and installer plugins
//!
//! Plugins are looked up by name in a static capability table. Each entry
//! says which roles it can fill and how to build it from the [`Config`].

mod command;
mod webroot;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use certward_common::Verb;
use certward_config::Config;

use crate::errors::PluginError;

pub use command::CommandInstaller;
pub use webroot::{WebrootAuthenticator, ACME_CHALLENGE_DIR};

/// Proves control of a domain for an HTTP-01 challenge
#[async_trait]
pub trait Authenticator: Send + Sync {
    fn name(&self) -> &str;

    /// Publish `key_authorization` for `token` on `domain`
    async fn perform(
        &self,
        domain: &str,
        token: &str,
        key_authorization: &str,
    ) -> Result<(), PluginError>;

    /// Withdraw a published challenge
    async fn cleanup(&self, token: &str) -> Result<(), PluginError>;
}

/// Paths handed to an installer for one certificate
#[derive(Debug, Clone, Copy)]
pub struct DeployPaths<'a> {
    pub cert: &'a Path,
    pub key: &'a Path,
    pub chain: Option<&'a Path>,
    pub fullchain: Option<&'a Path>,
}

/// Puts certificates into service on a web server
pub trait Installer: Send + Sync {
    fn name(&self) -> &str;

    fn deploy_certificate(&self, domain: &str, paths: DeployPaths<'_>) -> Result<(), PluginError>;

    /// Apply optional hardening such as HTTPS redirects
    fn enhance_config(&self, domains: &[String]) -> Result<(), PluginError>;

    /// Reload the server so deployed certificates take effect
    fn restart(&self) -> Result<(), PluginError>;

    fn rollback_checkpoints(&self, checkpoints: u32) -> Result<(), PluginError>;

    fn view_config_changes(&self) -> Result<(), PluginError>;
}

type AuthenticatorCtor = fn(&Config) -> Result<Arc<dyn Authenticator>, PluginError>;
type InstallerCtor = fn(&Config) -> Result<Arc<dyn Installer>, PluginError>;

/// One row of the capability table
pub struct PluginEntry {
    pub name: &'static str,
    pub description: &'static str,
    authenticator: Option<AuthenticatorCtor>,
    installer: Option<InstallerCtor>,
}

impl PluginEntry {
    pub fn is_authenticator(&self) -> bool {
        self.authenticator.is_some()
    }

    pub fn is_installer(&self) -> bool {
        self.installer.is_some()
    }
}

fn webroot_authenticator(config: &Config) -> Result<Arc<dyn Authenticator>, PluginError> {
    Ok(Arc::new(WebrootAuthenticator::from_config(config)?))
}

fn command_installer(config: &Config) -> Result<Arc<dyn Installer>, PluginError> {
    Ok(Arc::new(CommandInstaller::from_config(config)?))
}

/// Plugins known to this build
pub struct PluginRegistry {
    entries: Vec<PluginEntry>,
}

impl PluginRegistry {
    pub fn builtin() -> Self {
        Self {
            entries: vec![
                PluginEntry {
                    name: "webroot",
                    description: "Place challenge files in the webroot of a running server",
                    authenticator: Some(webroot_authenticator),
                    installer: None,
                },
                PluginEntry {
                    name: "command",
                    description: "Reload the web server with a shell command",
                    authenticator: None,
                    installer: Some(command_installer),
                },
            ],
        }
    }

    pub fn entries(&self) -> &[PluginEntry] {
        &self.entries
    }

    pub fn find(&self, name: &str) -> Option<&PluginEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    fn entry(&self, name: &str) -> Result<&PluginEntry, PluginError> {
        self.find(name).ok_or_else(|| {
            PluginError::Selection(format!(
                "The requested {} plugin does not appear to be installed",
                name
            ))
        })
    }

    pub fn authenticator(
        &self,
        name: &str,
        config: &Config,
    ) -> Result<Arc<dyn Authenticator>, PluginError> {
        let ctor = self.entry(name)?.authenticator.ok_or_else(|| {
            PluginError::Selection(format!("The {} plugin cannot be used as an authenticator", name))
        })?;
        debug!(plugin = name, "Initializing authenticator");
        ctor(config)
    }

    pub fn installer(&self, name: &str, config: &Config) -> Result<Arc<dyn Installer>, PluginError> {
        let ctor = self.entry(name)?.installer.ok_or_else(|| {
            PluginError::Selection(format!("The {} plugin cannot be used as an installer", name))
        })?;
        debug!(plugin = name, "Initializing installer");
        ctor(config)
    }
}

/// Plugins selected for one verb
#[derive(Clone, Default)]
pub struct SelectedPlugins {
    pub authenticator: Option<Arc<dyn Authenticator>>,
    pub installer: Option<Arc<dyn Installer>>,
}

/// Pick the plugins `verb` needs
///
/// `run` needs both roles, `certonly` and `renew` need an authenticator
/// and take an installer if one is named, the installer pass-through verbs
/// need an installer. A plugin that cannot be built is a selection error.
pub fn choose(
    registry: &PluginRegistry,
    verb: Verb,
    authenticator: Option<&str>,
    installer: Option<&str>,
    config: &Config,
) -> Result<SelectedPlugins, PluginError> {
    let (need_auth, need_installer) = match verb {
        Verb::Run => (true, true),
        Verb::Certonly | Verb::Renew => (true, false),
        Verb::Install | Verb::Rollback | Verb::ConfigChanges => (false, true),
        Verb::Revoke | Verb::Plugins => (false, false),
    };

    let authenticator = match (authenticator, need_auth) {
        (Some(name), true) => Some(build(registry.authenticator(name, config))?),
        (None, true) => {
            return Err(PluginError::Selection(
                "No authenticator selected. Pass --authenticator (for example \
                 --authenticator webroot) or set it in the config file"
                    .to_string(),
            ))
        }
        (_, false) => None,
    };

    let installer = match (installer, need_installer) {
        (Some(name), _) => Some(build(registry.installer(name, config))?),
        (None, true) => {
            return Err(PluginError::Selection(
                "No installer selected. Pass --installer (for example --installer command) \
                 or set it in the config file"
                    .to_string(),
            ))
        }
        (None, false) => None,
    };

    Ok(SelectedPlugins {
        authenticator,
        installer,
    })
}

/// Configuration problems found while building a plugin mean it cannot be
/// selected
fn build<T>(result: Result<T, PluginError>) -> Result<T, PluginError> {
    result.map_err(|e| match e {
        PluginError::Selection(_) => e,
        other => PluginError::Selection(format!("Could not select or initialize the plugin: {}", other)),
    })
}
