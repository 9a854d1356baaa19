//! Action resolution
//!
//! Decides whether a request becomes a new certificate, a renewal of an
//! existing lineage, or a reinstall of what is already on disk. User
//! cancellation is a [`Decision`] like any other.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use certward_common::{Action, DomainSet, Verb};

use crate::context::{Context, RequestContext};
use crate::display::MenuResponse;
use crate::errors::EngineError;
use crate::lineage::{CertificateLineage, LineageStore};
use crate::matcher::{self, Match};
use crate::reporter::Priority;

/// What to do with a request
#[derive(Debug, Clone)]
pub enum Decision {
    NewCert,
    Renew(CertificateLineage),
    Reinstall(CertificateLineage),
    Cancelled,
}

impl Decision {
    /// The action taken, `None` when cancelled
    pub fn action(&self) -> Option<Action> {
        match self {
            Decision::NewCert => Some(Action::NewCert),
            Decision::Renew(_) => Some(Action::Renew),
            Decision::Reinstall(_) => Some(Action::Reinstall),
            Decision::Cancelled => None,
        }
    }

    pub fn lineage(&self) -> Option<&CertificateLineage> {
        match self {
            Decision::Renew(lineage) | Decision::Reinstall(lineage) => Some(lineage),
            Decision::NewCert | Decision::Cancelled => None,
        }
    }
}

/// Whether a lineage is due for renewal
///
/// Due when the request forces renewal, when it is a dry run, or when the
/// certificate expires within the lineage's renewal window.
pub fn should_renew(req: &RequestContext, lineage: &CertificateLineage, now: DateTime<Utc>) -> bool {
    if req.policy.renew_by_default {
        debug!(lineage = %lineage.name(), "Renewal forced by renew-by-default");
        return true;
    }
    let window = lineage.renew_before_days(req.renew_before_days);
    if lineage.cert_info().expires_within(window, now) {
        info!(
            lineage = %lineage.name(),
            not_after = %lineage.cert_info().not_after,
            window_days = window,
            "Certificate is due for renewal"
        );
        return true;
    }
    if req.policy.dry_run {
        debug!(lineage = %lineage.name(), "Dry run treats certificate as due");
        return true;
    }
    false
}

/// Resolve a request to a [`Decision`]
///
/// An explicitly chosen lineage is always renewed.
pub fn resolve(
    ctx: &Context,
    req: &RequestContext,
    store: &LineageStore,
) -> Result<Decision, EngineError> {
    if let Some(lineage) = &req.lineage {
        return Ok(Decision::Renew(lineage.clone()));
    }
    treat_as_renewal(ctx, req, &req.domains, store)
}

/// Classify `domains` against existing lineages and ask the user when the
/// policy flags leave the answer open
pub fn treat_as_renewal(
    ctx: &Context,
    req: &RequestContext,
    domains: &DomainSet,
    store: &LineageStore,
) -> Result<Decision, EngineError> {
    if req.policy.duplicate {
        return Ok(Decision::NewCert);
    }

    match matcher::find_duplicative(store, domains)? {
        Match::None => Ok(Decision::NewCert),
        Match::Identical(lineage) => handle_identical(ctx, req, lineage),
        Match::Subset(lineage) => handle_subset(ctx, req, domains, lineage),
    }
}

fn handle_identical(
    ctx: &Context,
    req: &RequestContext,
    lineage: CertificateLineage,
) -> Result<Decision, EngineError> {
    if should_renew(req, &lineage, Utc::now()) {
        return Ok(Decision::Renew(lineage));
    }
    if req.policy.reinstall {
        return Ok(Decision::Reinstall(lineage));
    }

    let question = format!(
        "You have an existing certificate that contains exactly the same domains you \
         requested and isn't close to expiry.\n(ref: {})\n\nWhat would you like to do?",
        lineage.config_path().display()
    );
    let keep = match req.verb {
        Verb::Run => "Attempt to reinstall this existing certificate",
        _ => "Keep the existing certificate for now",
    };
    let choices = vec![
        keep.to_string(),
        "Renew & replace the cert (limit ~5 per 7 days)".to_string(),
    ];

    match ctx.display.menu(&question, &choices, Some(0), None)? {
        MenuResponse::Ok(0) => Ok(Decision::Reinstall(lineage)),
        MenuResponse::Ok(_) => Ok(Decision::Renew(lineage)),
        MenuResponse::Cancel => Ok(Decision::Cancelled),
    }
}

fn handle_subset(
    ctx: &Context,
    req: &RequestContext,
    domains: &DomainSet,
    lineage: CertificateLineage,
) -> Result<Decision, EngineError> {
    if req.policy.expand || req.policy.renew_by_default {
        return Ok(Decision::Renew(lineage));
    }

    let existing = lineage.names().to_string();
    let question = format!(
        "You have an existing certificate that contains a portion of the domains you \
         requested (ref: {})\n\nIt contains these names: {}\n\nYou requested these names \
         for the new certificate: {}.\n\nDo you want to expand and replace this existing \
         certificate with the new certificate?",
        lineage.config_path().display(),
        existing,
        domains
    );

    if ctx.display.yesno(
        &question,
        "Expand",
        "Cancel",
        Some("--expand (or in some cases, --duplicate)"),
    )? {
        return Ok(Decision::Renew(lineage));
    }

    let mut args = std::env::args();
    let program = args.next().unwrap_or_else(|| "certward".to_string());
    let rest: Vec<String> = args.collect();
    ctx.reporter.add_message(
        format!(
            "To obtain a new certificate that contains these names without replacing your \
             existing certificate for {}, you must use the --duplicate option.\n\n\
             For example:\n\n{} --duplicate {}",
            existing,
            program,
            rest.join(" ")
        ),
        Priority::High,
    );
    Ok(Decision::Cancelled)
}
