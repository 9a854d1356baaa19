//! Per-invocation context
//!
//! [`Context`] bundles the collaborators every entry point needs.
//! [`RequestContext`] describes what the user asked for and is never
//! mutated; values discovered while running go into [`ResolutionResult`].

use std::path::PathBuf;
use std::sync::Arc;

use certward_common::{AccountId, DomainSet, Verb};
use certward_config::{Config, RenewalParams};

use crate::display::Display;
use crate::lineage::CertificateLineage;
use crate::reporter::Reporter;

/// Collaborators shared by every component of a run
#[derive(Clone)]
pub struct Context {
    pub display: Arc<dyn Display>,
    pub reporter: Arc<Reporter>,
    pub config: Arc<Config>,
}

impl Context {
    pub fn new(display: Arc<dyn Display>, reporter: Arc<Reporter>, config: Arc<Config>) -> Self {
        Self {
            display,
            reporter,
            config,
        }
    }
}

/// User policy for duplicate handling and safety checks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PolicyFlags {
    /// Always obtain a separate certificate, ignoring existing lineages
    pub duplicate: bool,
    /// Replace a subset lineage without asking
    pub expand: bool,
    /// Reinstall an identical, not-yet-due certificate without asking
    pub reinstall: bool,
    /// Renew identical or subset lineages without asking
    pub renew_by_default: bool,
    /// Exercise the full flow without persisting anything
    pub dry_run: bool,
    /// Allow replacing a trusted certificate with a test one
    pub break_my_certs: bool,
    /// The request targets a staging CA
    pub staging: bool,
}

/// Immutable description of one request
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub verb: Verb,
    pub domains: DomainSet,
    pub policy: PolicyFlags,
    /// ACME directory URL for this request
    pub server: String,
    /// `server` was chosen on the command line and wins over renewal records
    pub explicit_server: bool,
    /// Explicitly selected account
    pub account: Option<AccountId>,
    pub email: Option<String>,
    pub register_without_email: bool,
    pub agree_tos: bool,
    /// Lineage chosen up front (the renew verb); skips duplicate detection
    pub lineage: Option<CertificateLineage>,
    pub authenticator: Option<String>,
    pub installer: Option<String>,
    pub webroot_path: Option<PathBuf>,
    /// Renewal window used when a lineage has no override
    pub renew_before_days: u32,
    pub csr: Option<PathBuf>,
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
    pub chain_path: Option<PathBuf>,
    pub fullchain_path: Option<PathBuf>,
    /// Installer checkpoints to undo (rollback)
    pub checkpoints: u32,
}

impl RequestContext {
    /// A request for `verb` with everything else taken from `config`
    pub fn from_config(verb: Verb, config: &Config) -> Self {
        Self {
            verb,
            domains: DomainSet::default(),
            policy: PolicyFlags::default(),
            server: config.server.clone(),
            explicit_server: false,
            account: None,
            email: config.email.clone(),
            register_without_email: config.register_without_email,
            agree_tos: config.agree_tos,
            lineage: None,
            authenticator: config.authenticator.clone(),
            installer: config.installer.clone(),
            webroot_path: config.webroot_path.clone(),
            renew_before_days: config.renew_before_days,
            csr: None,
            cert_path: None,
            key_path: None,
            chain_path: None,
            fullchain_path: None,
            checkpoints: 1,
        }
    }

    /// Parameters to remember in the renewal record
    pub fn renewal_params(&self, account: Option<&AccountId>) -> RenewalParams {
        RenewalParams {
            server: self.server.clone(),
            authenticator: self.authenticator.clone(),
            installer: self.installer.clone(),
            account: account.cloned().or_else(|| self.account.clone()),
            webroot_path: self.webroot_path.clone(),
        }
    }
}

/// Values discovered during a run
#[derive(Debug, Clone, Default)]
pub struct ResolutionResult {
    pub account: Option<AccountId>,
    pub domains: Option<DomainSet>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config() {
        let config = Config {
            email: Some("admin@example.com".to_string()),
            authenticator: Some("webroot".to_string()),
            renew_before_days: 21,
            ..Default::default()
        };
        let req = RequestContext::from_config(Verb::Certonly, &config);
        assert_eq!(req.email.as_deref(), Some("admin@example.com"));
        assert_eq!(req.renew_before_days, 21);
        assert_eq!(req.policy, PolicyFlags::default());
        assert!(req.lineage.is_none());
    }

    #[test]
    fn test_renewal_params_prefer_resolved_account() {
        let mut req = RequestContext::from_config(Verb::Run, &Config::default());
        req.account = Some(AccountId::new("explicit"));
        let resolved = AccountId::new("resolved");

        assert_eq!(
            req.renewal_params(Some(&resolved)).account,
            Some(resolved)
        );
        assert_eq!(
            req.renewal_params(None).account,
            Some(AccountId::new("explicit"))
        );
    }
}
