//! Renewal executor
//!
//! Carries out a [`Decision`]: obtains certificates from the CA and commits
//! them to the lineage store.

use std::path::Path;

use tracing::info;

use certward_common::{Action, DomainSet, Verb};

use crate::cert::CertInfo;
use crate::context::{Context, RequestContext, ResolutionResult};
use crate::errors::{CertError, EngineError, StorageError};
use crate::guard;
use crate::lineage::{CertificateLineage, LineageStore};
use crate::outcome::Enrollment;
use crate::protocol::ProtocolClient;
use crate::reporter::{Priority, Reporter};
use crate::resolver::Decision;

/// Executes decisions against one CA client and one lineage store
pub struct RenewalExecutor<'a> {
    ctx: &'a Context,
    store: &'a LineageStore,
    client: &'a dyn ProtocolClient,
}

impl<'a> RenewalExecutor<'a> {
    pub fn new(ctx: &'a Context, store: &'a LineageStore, client: &'a dyn ProtocolClient) -> Self {
        Self { ctx, store, client }
    }

    /// Execute `decision`; `Ok(None)` when it was a cancellation
    pub async fn execute(
        &self,
        req: &RequestContext,
        resolution: &ResolutionResult,
        decision: Decision,
    ) -> Result<Option<Enrollment>, EngineError> {
        let domains = resolution.domains.as_ref().unwrap_or(&req.domains);

        let enrollment = match decision {
            Decision::Cancelled => return Ok(None),
            Decision::Reinstall(lineage) => {
                info!(lineage = %lineage.name(), "Keeping existing certificate");
                return Ok(Some(Enrollment {
                    action: Action::Reinstall,
                    lineage: Some(lineage),
                }));
            }
            Decision::Renew(lineage) => self.renew(req, resolution, domains, lineage).await?,
            Decision::NewCert => self.new_cert(req, resolution, domains).await?,
        };

        if !req.policy.dry_run && req.verb != Verb::Renew {
            if let Some(lineage) = &enrollment.lineage {
                report_new_cert(
                    &self.ctx.reporter,
                    lineage.cert_path(),
                    Some(lineage.fullchain_path()),
                )?;
            }
        }

        Ok(Some(enrollment))
    }

    async fn renew(
        &self,
        req: &RequestContext,
        resolution: &ResolutionResult,
        domains: &DomainSet,
        mut lineage: CertificateLineage,
    ) -> Result<Enrollment, EngineError> {
        guard::avoid_invalidating_lineage(
            &req.server,
            lineage.server(),
            lineage.cert_info(),
            req.policy.break_my_certs,
        )?;

        // Held from before the CA call until the links have moved
        let _lock = if req.policy.dry_run {
            None
        } else {
            Some(self.store.lock(lineage.name())?)
        };

        let issued = self
            .client
            .obtain_certificate(domains)
            .await?
            .ok_or(EngineError::CertificateNotObtained)?;

        if req.policy.dry_run {
            info!(
                lineage = %lineage.name(),
                live_dir = %lineage.cert_path().parent().unwrap_or(lineage.cert_path()).display(),
                "Dry run: skipping updating lineage"
            );
        } else {
            let prior = lineage.latest_common_version()?.ok_or_else(|| {
                StorageError::InvalidStructure(format!(
                    "lineage '{}' has no complete version",
                    lineage.name()
                ))
            })?;
            let version = lineage.save_successor(
                prior,
                &issued.certificate.cert_pem,
                Some(&issued.key_pem),
                &issued.certificate.chain_pem,
                &req.renewal_params(resolution.account.as_ref()),
            )?;
            lineage.update_all_links_to(version)?;
        }

        Ok(Enrollment {
            action: Action::Renew,
            lineage: Some(lineage),
        })
    }

    async fn new_cert(
        &self,
        req: &RequestContext,
        resolution: &ResolutionResult,
        domains: &DomainSet,
    ) -> Result<Enrollment, EngineError> {
        let issued = self
            .client
            .obtain_certificate(domains)
            .await?
            .ok_or(EngineError::CertificateNotObtained)?;

        if req.policy.dry_run {
            info!(domains = %domains, "Dry run: skipping creating lineage");
            return Ok(Enrollment {
                action: Action::NewCert,
                lineage: None,
            });
        }

        let lineage = self.store.new_lineage(
            domains,
            &issued.certificate.cert_pem,
            &issued.key_pem,
            &issued.certificate.chain_pem,
            req.renewal_params(resolution.account.as_ref()),
            None,
        )?;

        Ok(Enrollment {
            action: Action::NewCert,
            lineage: Some(lineage),
        })
    }
}

/// Tell the user where a new certificate landed and when it expires
///
/// Points at the full chain when there is one, since that is what web
/// servers want.
pub fn report_new_cert(
    reporter: &Reporter,
    cert_path: &Path,
    fullchain_path: Option<&Path>,
) -> Result<(), CertError> {
    let expiry = CertInfo::from_file(cert_path)?.not_after.date_naive();
    let (and_chain, path) = match fullchain_path {
        Some(fullchain) => ("and chain have", fullchain),
        None => ("has", cert_path),
    };
    reporter.add_message(
        format!(
            "Congratulations! Your certificate {} been saved at {}. Your cert will expire \
             on {}. To obtain a new version of the certificate in the future, simply run \
             certward again.",
            and_chain,
            path.display(),
            expiry
        ),
        Priority::Medium,
    );
    Ok(())
}
