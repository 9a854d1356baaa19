//! Shared enums used across the engine and its configuration.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The four artifacts every lineage version consists of
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Cert,
    PrivKey,
    Chain,
    Fullchain,
}

impl ArtifactKind {
    /// All kinds, in the order they are written by a successor save.
    ///
    /// The private key comes last: a version is only "common" once every
    /// kind exists, so the key landing is what completes it.
    pub const ALL: [ArtifactKind; 4] = [
        ArtifactKind::Cert,
        ArtifactKind::Chain,
        ArtifactKind::Fullchain,
        ArtifactKind::PrivKey,
    ];

    /// File stem used in both `live/` and `archive/`
    pub fn stem(self) -> &'static str {
        match self {
            ArtifactKind::Cert => "cert",
            ArtifactKind::PrivKey => "privkey",
            ArtifactKind::Chain => "chain",
            ArtifactKind::Fullchain => "fullchain",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.stem())
    }
}

/// What the engine decided to do with a certificate request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Obtain a certificate for a brand-new lineage
    NewCert,
    /// Obtain a certificate and store it as the next lineage version
    Renew,
    /// Keep the certificate already on disk
    Reinstall,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::NewCert => "newcert",
            Action::Renew => "renew",
            Action::Reinstall => "reinstall",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entry verb that started the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verb {
    Run,
    Certonly,
    Renew,
    Install,
    Revoke,
    Rollback,
    ConfigChanges,
    Plugins,
}

impl Verb {
    pub fn as_str(self) -> &'static str {
        match self {
            Verb::Run => "run",
            Verb::Certonly => "certonly",
            Verb::Renew => "renew",
            Verb::Install => "install",
            Verb::Revoke => "revoke",
            Verb::Rollback => "rollback",
            Verb::ConfigChanges => "config_changes",
            Verb::Plugins => "plugins",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_private_key_written_last() {
        assert_eq!(ArtifactKind::ALL.last(), Some(&ArtifactKind::PrivKey));
    }

    #[test]
    fn test_action_names() {
        assert_eq!(Action::NewCert.to_string(), "newcert");
        assert_eq!(Action::Renew.to_string(), "renew");
        assert_eq!(Action::Reinstall.to_string(), "reinstall");
    }

    #[test]
    fn test_artifact_serialization() {
        let json = serde_json::to_string(&ArtifactKind::PrivKey).unwrap();
        assert_eq!(json, "\"privkey\"");
    }
}
