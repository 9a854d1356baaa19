//! Command installer
//!
//! The web server is expected to reference the stable `live/` paths
//! already, so deploying is bookkeeping and restarting runs the configured
//! reload command through `sh -c`.

use std::process::Command;

use tracing::{debug, info};

use certward_config::Config;

use super::{DeployPaths, Installer};
use crate::errors::PluginError;

/// Installer that reloads the server with a shell command
#[derive(Debug, Clone)]
pub struct CommandInstaller {
    reload_command: Option<String>,
}

impl CommandInstaller {
    pub fn new(reload_command: Option<String>) -> Self {
        Self { reload_command }
    }

    pub fn from_config(config: &Config) -> Result<Self, PluginError> {
        Ok(Self::new(config.reload_command.clone()))
    }

    fn unsupported(&self, operation: &str) -> PluginError {
        PluginError::Unsupported {
            plugin: self.name().to_string(),
            operation: operation.to_string(),
        }
    }
}

impl Installer for CommandInstaller {
    fn name(&self) -> &str {
        "command"
    }

    fn deploy_certificate(&self, domain: &str, paths: DeployPaths<'_>) -> Result<(), PluginError> {
        info!(
            domain = %domain,
            cert = %paths.cert.display(),
            key = %paths.key.display(),
            fullchain = ?paths.fullchain.map(|p| p.display().to_string()),
            "Certificate ready for the web server"
        );
        Ok(())
    }

    fn enhance_config(&self, domains: &[String]) -> Result<(), PluginError> {
        debug!(domains = ?domains, "No enhancements available for the command installer");
        Ok(())
    }

    fn restart(&self) -> Result<(), PluginError> {
        let Some(command) = &self.reload_command else {
            info!("No reload_command configured; skipping server reload");
            return Ok(());
        };

        debug!(command = %command, "Running reload command");
        let status = Command::new("sh").arg("-c").arg(command).status()?;
        if !status.success() {
            return Err(PluginError::CommandFailed {
                command: command.clone(),
                status: status.to_string(),
            });
        }
        info!(command = %command, "Web server reloaded");
        Ok(())
    }

    fn rollback_checkpoints(&self, _checkpoints: u32) -> Result<(), PluginError> {
        Err(self.unsupported("rollback"))
    }

    fn view_config_changes(&self) -> Result<(), PluginError> {
        Err(self.unsupported("config-changes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restart_runs_command() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("reloaded");
        let installer = CommandInstaller::new(Some(format!("touch {}", marker.display())));

        installer.restart().unwrap();
        assert!(marker.exists());
    }

    #[test]
    fn test_restart_failure() {
        let installer = CommandInstaller::new(Some("exit 3".to_string()));
        let err = installer.restart().unwrap_err();
        assert!(matches!(err, PluginError::CommandFailed { ref command, .. } if command == "exit 3"));
    }

    #[test]
    fn test_restart_without_command_is_noop() {
        CommandInstaller::new(None).restart().unwrap();
    }

    #[test]
    fn test_rollback_unsupported() {
        let err = CommandInstaller::new(None).rollback_checkpoints(1).unwrap_err();
        assert_eq!(err.to_string(), "The command plugin does not support rollback");
    }
}
