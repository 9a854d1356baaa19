//! Batch renewal of every stored lineage
//!
//! Walks the renewal records, renews the ones that are due, and keeps
//! going when one lineage fails. The run fails afterwards if anything did.

use std::path::PathBuf;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use certward_common::Verb;

use crate::commands::{self, Services};
use crate::context::RequestContext;
use crate::errors::EngineError;
use crate::lineage::CertificateLineage;
use crate::resolver;

/// What happened to each lineage in a batch
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RenewalSummary {
    pub renewed: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
    pub parse_failures: Vec<PathBuf>,
}

impl RenewalSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.parse_failures.is_empty()
    }

    /// Human readable report of the batch
    pub fn render(&self, dry_run: bool) -> String {
        let mut out = Vec::new();
        if dry_run {
            out.push("** DRY RUN: simulating 'certward renew' close to cert expiry".to_string());
            out.push("**          (The test certificates below have not been saved.)".to_string());
            out.push(String::new());
        }

        if !self.skipped.is_empty() {
            out.push("The following certs are not due for renewal yet:".to_string());
            out.extend(list(&self.skipped, "skipped"));
        }

        if self.renewed.is_empty() && self.failed.is_empty() {
            out.push("No renewals were attempted.".to_string());
        } else if self.failed.is_empty() {
            out.push(
                "Congratulations, all renewals succeeded. The following certs have been renewed:"
                    .to_string(),
            );
            out.extend(list(&self.renewed, "success"));
        } else {
            if !self.renewed.is_empty() {
                out.push("The following certs were successfully renewed:".to_string());
                out.extend(list(&self.renewed, "success"));
            }
            out.push("The following certs could not be renewed:".to_string());
            out.extend(list(&self.failed, "failure"));
        }

        if !self.parse_failures.is_empty() {
            out.push(
                "Additionally, the following renewal configuration files were invalid: "
                    .to_string(),
            );
            out.extend(list(&self.parse_failures, "parsefail"));
        }

        if dry_run {
            out.push("** DRY RUN: simulating 'certward renew' close to cert expiry".to_string());
            out.push("**          (The test certificates above have not been saved.)".to_string());
        }
        out.join("\n")
    }
}

fn list<'a>(paths: &'a [PathBuf], status: &'a str) -> impl Iterator<Item = String> + 'a {
    paths
        .iter()
        .map(move |path| format!("  {} ({})", path.display(), status))
}

/// Request for renewing one lineage
///
/// Plugins, account and server come from the lineage's record. A server
/// named on the command line, or any staging request (every dry run is
/// one), keeps its own server. The recorded account is only reused against
/// the server it was registered with.
pub fn lineage_request(template: &RequestContext, lineage: &CertificateLineage) -> RequestContext {
    let params = &lineage.record().renewalparams;
    let mut req = template.clone();
    req.verb = Verb::Renew;
    req.domains = lineage.names().clone();
    req.lineage = Some(lineage.clone());
    if !template.explicit_server && !template.policy.staging {
        req.server = params.server.clone();
    }
    if params.authenticator.is_some() {
        req.authenticator = params.authenticator.clone();
    }
    if params.installer.is_some() {
        req.installer = params.installer.clone();
    }
    if req.account.is_none() && req.server == params.server {
        req.account = params.account.clone();
    }
    if params.webroot_path.is_some() {
        req.webroot_path = params.webroot_path.clone();
    }
    req
}

/// Renew every due lineage
pub async fn renew_all(services: &Services, template: &RequestContext) -> Result<(), EngineError> {
    let summary = renew_lineages(services, template).await?;
    services
        .ctx
        .display
        .notification(&summary.render(template.policy.dry_run));

    if summary.is_success() {
        Ok(())
    } else {
        Err(EngineError::RenewalFailures {
            failures: summary.failed.len(),
            parse_failures: summary.parse_failures.len(),
        })
    }
}

/// Process each renewal record and collect what happened
pub async fn renew_lineages(
    services: &Services,
    template: &RequestContext,
) -> Result<RenewalSummary, EngineError> {
    let records = services.store.list()?;
    info!(count = records.len(), "Checking lineages for renewal");

    let mut summary = RenewalSummary::default();
    for path in records {
        let lineage = match services.store.load(&path) {
            Ok(lineage) => lineage,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Renewal conf file is broken. Skipping.");
                summary.parse_failures.push(path);
                continue;
            }
        };

        let req = lineage_request(template, &lineage);
        let fullchain = lineage.fullchain_path().to_path_buf();
        if !resolver::should_renew(&req, &lineage, Utc::now()) {
            debug!(lineage = %lineage.name(), "Certificate is still valid");
            summary.skipped.push(fullchain);
            continue;
        }

        info!(lineage = %lineage.name(), "Certificate needs renewal");
        match commands::obtain_cert(services, &req).await {
            Ok(_) => {
                info!(lineage = %lineage.name(), "Certificate renewed successfully");
                summary.renewed.push(fullchain);
            }
            Err(e) => {
                // Continue with the other lineages
                error!(lineage = %lineage.name(), error = %e, "Certificate renewal failed");
                summary.failed.push(fullchain);
            }
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{mint_cert, new_store, params};
    use certward_common::{AccountId, DomainSet};
    use certward_config::directories::{LETS_ENCRYPT_PRODUCTION, LETS_ENCRYPT_STAGING};
    use certward_config::Config;

    fn seeded_lineage(store: &crate::lineage::LineageStore) -> CertificateLineage {
        let (cert, key) = mint_cert(&["a.com", "www.a.com"], "a.com", 2099);
        let mut record_params = params();
        record_params.webroot_path = Some("/srv/a".into());
        record_params.account = Some(AccountId::new("prod-account"));
        store
            .new_lineage(
                &DomainSet::parse(["a.com", "www.a.com"]).unwrap(),
                &cert,
                &key,
                &cert,
                record_params,
                None,
            )
            .unwrap()
    }

    #[test]
    fn test_lineage_request_uses_record() {
        let (_dir, store) = new_store();
        let lineage = seeded_lineage(&store);

        let mut template = RequestContext::from_config(Verb::Renew, &Config::default());
        template.server = "https://example.invalid/directory".to_string();
        let req = lineage_request(&template, &lineage);
        assert_eq!(req.server, LETS_ENCRYPT_PRODUCTION);
        assert_eq!(req.account, Some(AccountId::new("prod-account")));
        assert_eq!(req.authenticator.as_deref(), Some("webroot"));
        assert_eq!(req.webroot_path, Some(PathBuf::from("/srv/a")));
        assert_eq!(req.domains.len(), 2);
        assert!(req.lineage.is_some());
    }

    #[test]
    fn test_staging_run_drops_production_account() {
        let (_dir, store) = new_store();
        let lineage = seeded_lineage(&store);

        let mut template = RequestContext::from_config(Verb::Renew, &Config::default());
        template.policy.staging = true;
        template.policy.dry_run = true;
        template.server = LETS_ENCRYPT_STAGING.to_string();
        let req = lineage_request(&template, &lineage);
        assert_eq!(req.server, LETS_ENCRYPT_STAGING);
        assert_eq!(req.account, None);
    }

    #[test]
    fn test_explicit_server_wins_over_record() {
        let (_dir, store) = new_store();
        let lineage = seeded_lineage(&store);

        let mut template = RequestContext::from_config(Verb::Renew, &Config::default());
        template.server = "https://ca.example/directory".to_string();
        template.explicit_server = true;
        let req = lineage_request(&template, &lineage);
        assert_eq!(req.server, "https://ca.example/directory");
        assert_eq!(req.account, None);

        template.server = LETS_ENCRYPT_PRODUCTION.to_string();
        let req = lineage_request(&template, &lineage);
        assert_eq!(req.account, Some(AccountId::new("prod-account")));
    }

    #[test]
    fn test_summary_render() {
        let summary = RenewalSummary {
            renewed: vec![PathBuf::from("/live/a/fullchain.pem")],
            skipped: vec![PathBuf::from("/live/b/fullchain.pem")],
            failed: vec![PathBuf::from("/live/c/fullchain.pem")],
            parse_failures: vec![PathBuf::from("/renewal/d.conf")],
        };
        let text = summary.render(false);
        assert!(text.contains("  /live/b/fullchain.pem (skipped)"));
        assert!(text.contains("The following certs were successfully renewed:"));
        assert!(text.contains("  /live/c/fullchain.pem (failure)"));
        assert!(text.contains("  /renewal/d.conf (parsefail)"));
        assert!(!summary.is_success());
    }

    #[test]
    fn test_summary_all_succeeded() {
        let summary = RenewalSummary {
            renewed: vec![PathBuf::from("/live/a/fullchain.pem")],
            ..Default::default()
        };
        let text = summary.render(true);
        assert!(text.starts_with("** DRY RUN"));
        assert!(text.contains("Congratulations, all renewals succeeded."));
        assert!(summary.is_success());
    }
}
