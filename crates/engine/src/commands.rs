//! Verb entry points
//!
//! Each verb picks its plugins, resolves the account it acts as, and then
//! drives the resolver and executor. [`dispatch`] folds the result into an
//! [`Outcome`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use certward_common::{Action, ArtifactKind, DomainSet, Verb};
use certward_config::Config;

use crate::account::{determine_account, existing_account, AccountStore};
use crate::cert;
use crate::context::{Context, RequestContext, ResolutionResult};
use crate::errors::{CertError, EngineError, PluginError, StorageError};
use crate::executor::{report_new_cert, RenewalExecutor};
use crate::lineage::{make_dir, unique_file, LineageStore, PUBLIC_MODE};
use crate::outcome::{Enrollment, Outcome};
use crate::plugins::{self, Authenticator, DeployPaths, Installer, PluginRegistry};
use crate::protocol::{AcmeConnector, CertificateChain, ProtocolClient};
use crate::renew;
use crate::reporter::{Priority, Reporter};
use crate::resolver;

/// Everything a command needs besides the request itself
pub struct Services {
    pub ctx: Context,
    pub store: LineageStore,
    pub accounts: Arc<dyn AccountStore>,
    pub connector: Arc<dyn AcmeConnector>,
    pub plugins: PluginRegistry,
}

/// Run the verb named by `req`
pub async fn dispatch(services: &Services, req: &RequestContext) -> Outcome {
    if req.policy.dry_run && !matches!(req.verb, Verb::Certonly | Verb::Renew) {
        return Outcome::Fatal(EngineError::Blocking(
            "--dry-run currently only works with the 'certonly' or 'renew' subcommands".to_string(),
        ));
    }

    debug!(verb = %req.verb.as_str(), domains = %req.domains, "Dispatching command");
    match req.verb {
        Verb::Run => Outcome::from_result(run(services, req).await),
        Verb::Certonly => Outcome::from_result(obtain_cert(services, req).await),
        Verb::Renew => completed(renew::renew_all(services, req).await),
        Verb::Install => completed(install(services, req)),
        Verb::Revoke => completed(revoke(services, req).await),
        Verb::Rollback => completed(rollback(services, req)),
        Verb::ConfigChanges => completed(config_changes(services, req)),
        Verb::Plugins => completed(plugins_cmd(services)),
    }
}

fn completed(result: Result<(), EngineError>) -> Outcome {
    match result {
        Ok(()) => Outcome::Success(None),
        Err(e) => Outcome::from_result(Err(e)),
    }
}

// ============================================================================
// Certificate verbs
// ============================================================================

/// Obtain a certificate and install it
pub async fn run(
    services: &Services,
    req: &RequestContext,
) -> Result<Option<Enrollment>, EngineError> {
    let selected = plugins::choose(
        &services.plugins,
        Verb::Run,
        req.authenticator.as_deref(),
        req.installer.as_deref(),
        &plugin_config(services, req),
    )?;
    let installer = selected
        .installer
        .clone()
        .ok_or_else(|| PluginError::Selection("No installer selected".to_string()))?;

    let domains = find_domains(req)?;
    let (client, resolution) = init_client(services, req, selected.authenticator, &domains).await?;

    let decision = resolver::resolve(&services.ctx, req, &services.store)?;
    let executor = RenewalExecutor::new(&services.ctx, &services.store, client.as_ref());
    let Some(enrollment) = executor.execute(req, &resolution, decision).await? else {
        return Ok(None);
    };

    if let Some(lineage) = &enrollment.lineage {
        deploy_certificate(
            installer.as_ref(),
            &domains,
            DeployPaths {
                cert: lineage.cert_path(),
                key: lineage.privkey_path(),
                chain: Some(lineage.chain_path()),
                fullchain: Some(lineage.fullchain_path()),
            },
        )?;
        installer.enhance_config(domains.as_slice())?;

        if lineage.available_versions(ArtifactKind::Cert)?.len() == 1 {
            success_installation(&services.ctx, &domains);
        } else {
            success_renewal(&services.ctx, &domains, enrollment.action);
        }
    }

    suggest_donation_if_appropriate(&services.ctx.reporter, req, enrollment.action);
    Ok(Some(enrollment))
}

/// Obtain a certificate without installing it
///
/// Also the per-lineage body of `renew`, where the request carries the
/// lineage and the installer is only used to reload the server.
pub async fn obtain_cert(
    services: &Services,
    req: &RequestContext,
) -> Result<Option<Enrollment>, EngineError> {
    let selected = plugins::choose(
        &services.plugins,
        req.verb,
        req.authenticator.as_deref(),
        req.installer.as_deref(),
        &plugin_config(services, req),
    )
    .inspect_err(|e| info!(error = %e, "Could not choose appropriate plugin"))?;

    let enrollment = if let Some(csr_path) = &req.csr {
        let csr_der = cert::load_csr(csr_path)?;
        let domains = if req.domains.is_empty() {
            cert::csr_domains(&csr_der)?
        } else {
            req.domains.clone()
        };
        let (client, _) = init_client(services, req, selected.authenticator, &domains).await?;
        let chain = client.obtain_certificate_from_csr(&domains, &csr_der).await?;

        if req.policy.dry_run {
            info!(domains = %domains, "Dry run: skipping saving certificate");
        } else {
            let (cert_path, fullchain_path) = save_certificate(&services.ctx, req, &chain)?;
            report_new_cert(&services.ctx.reporter, &cert_path, Some(&fullchain_path))?;
        }
        Enrollment {
            action: Action::NewCert,
            lineage: None,
        }
    } else {
        let domains = find_domains(req)?;
        let (client, resolution) =
            init_client(services, req, selected.authenticator, &domains).await?;
        let decision = resolver::resolve(&services.ctx, req, &services.store)?;
        let executor = RenewalExecutor::new(&services.ctx, &services.store, client.as_ref());
        match executor.execute(req, &resolution, decision).await? {
            Some(enrollment) => enrollment,
            None => return Ok(None),
        }
    };

    if req.policy.dry_run {
        report_successful_dry_run(&services.ctx.reporter, req);
    } else if req.verb == Verb::Renew {
        if let Some(lineage) = &enrollment.lineage {
            let fullchain = lineage.fullchain_path().display();
            match &selected.installer {
                None => services.ctx.display.notification(&format!(
                    "new certificate deployed without reload, fullchain is {}",
                    fullchain
                )),
                Some(installer) => {
                    installer.restart()?;
                    services.ctx.display.notification(&format!(
                        "new certificate deployed with reload of {} server; fullchain is {}",
                        installer.name(),
                        fullchain
                    ));
                }
            }
        }
    }

    suggest_donation_if_appropriate(&services.ctx.reporter, req, enrollment.action);
    Ok(Some(enrollment))
}

// ============================================================================
// Installer verbs
// ============================================================================

/// Install a previously obtained certificate
pub fn install(services: &Services, req: &RequestContext) -> Result<(), EngineError> {
    let installer = require_installer(services, req)?;
    let domains = find_domains(req)?;
    let cert = req
        .cert_path
        .as_deref()
        .ok_or_else(|| EngineError::Blocking("--cert-path is required to install".to_string()))?;
    let key = req
        .key_path
        .as_deref()
        .ok_or_else(|| EngineError::Blocking("--key-path is required to install".to_string()))?;

    deploy_certificate(
        installer.as_ref(),
        &domains,
        DeployPaths {
            cert,
            key,
            chain: req.chain_path.as_deref(),
            fullchain: req.fullchain_path.as_deref(),
        },
    )?;
    installer.enhance_config(domains.as_slice())?;
    Ok(())
}

/// Undo installer changes
pub fn rollback(services: &Services, req: &RequestContext) -> Result<(), EngineError> {
    let installer = require_installer(services, req)?;
    installer.rollback_checkpoints(req.checkpoints)?;
    Ok(())
}

/// Show changes the installer made to the server configuration
pub fn config_changes(services: &Services, req: &RequestContext) -> Result<(), EngineError> {
    let installer = require_installer(services, req)?;
    installer.view_config_changes()?;
    Ok(())
}

fn require_installer(
    services: &Services,
    req: &RequestContext,
) -> Result<Arc<dyn Installer>, EngineError> {
    let selected = plugins::choose(
        &services.plugins,
        req.verb,
        None,
        req.installer.as_deref(),
        &plugin_config(services, req),
    )?;
    Ok(selected
        .installer
        .ok_or_else(|| PluginError::Selection("No installer selected".to_string()))?)
}

// ============================================================================
// Other verbs
// ============================================================================

/// Revoke the certificate at `--cert-path`
///
/// With `--key-path` the request is signed by the certificate's own key
/// and no account is involved. Otherwise an already registered account
/// signs it; revocation never registers one.
pub async fn revoke(services: &Services, req: &RequestContext) -> Result<(), EngineError> {
    let cert_path = req
        .cert_path
        .as_deref()
        .ok_or_else(|| EngineError::Blocking("--cert-path is required to revoke".to_string()))?;
    let cert_pem = read_pem(cert_path)?;

    if let Some(key_path) = req.key_path.as_deref() {
        let key_pem = read_pem(key_path)?;
        debug!(cert = %cert_path.display(), key = %key_path.display(), "Revoking using certificate key");
        services
            .connector
            .revoke_with_key(&req.server, &cert_pem, &key_pem)
            .await?;
    } else {
        let account = existing_account(&services.ctx, req, services.accounts.as_ref())?;
        debug!(cert = %cert_path.display(), account = %account.id, "Revoking using account key");
        let client = services.connector.connect(&req.server, &account, None).await?;
        client.revoke(&cert_pem).await?;
    }

    info!(cert = %cert_path.display(), "Certificate revoked");
    Ok(())
}

fn read_pem(path: &Path) -> Result<String, CertError> {
    std::fs::read_to_string(path).map_err(|source| CertError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// List the capability table
pub fn plugins_cmd(services: &Services) -> Result<(), EngineError> {
    let mut text = String::new();
    for entry in services.plugins.entries() {
        let mut roles = Vec::new();
        if entry.is_authenticator() {
            roles.push("authenticator");
        }
        if entry.is_installer() {
            roles.push("installer");
        }
        text.push_str(&format!(
            "* {}\nDescription: {}\nRoles: {}\n\n",
            entry.name,
            entry.description,
            roles.join(", ")
        ));
    }
    services.ctx.display.notification(text.trim_end());
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

/// Configuration plugins are built from, with request overrides applied
fn plugin_config(services: &Services, req: &RequestContext) -> Config {
    let mut config = (*services.ctx.config).clone();
    if req.webroot_path.is_some() {
        config.webroot_path = req.webroot_path.clone();
    }
    config
}

fn find_domains(req: &RequestContext) -> Result<DomainSet, EngineError> {
    if req.domains.is_empty() {
        return Err(EngineError::Blocking(
            "Please specify --domains, or --installer that will help in domain names \
             autodiscovery"
                .to_string(),
        ));
    }
    Ok(req.domains.clone())
}

/// Resolve the account and open a protocol client for it
async fn init_client(
    services: &Services,
    req: &RequestContext,
    authenticator: Option<Arc<dyn Authenticator>>,
    domains: &DomainSet,
) -> Result<(Box<dyn ProtocolClient>, ResolutionResult), EngineError> {
    let (account, client) = determine_account(
        &services.ctx,
        req,
        services.accounts.as_ref(),
        services.connector.as_ref(),
        authenticator.clone(),
    )
    .await?;

    let client = match client {
        Some(client) => client,
        None => {
            services
                .connector
                .connect(&req.server, &account, authenticator)
                .await?
        }
    };

    Ok((
        client,
        ResolutionResult {
            account: Some(account.id),
            domains: Some(domains.clone()),
        },
    ))
}

fn deploy_certificate(
    installer: &dyn Installer,
    domains: &DomainSet,
    paths: DeployPaths<'_>,
) -> Result<(), PluginError> {
    for domain in domains.iter() {
        installer.deploy_certificate(domain, paths)?;
    }
    installer.restart()
}

/// Save a CSR-mode certificate without clobbering existing files
///
/// Returns the certificate and full chain paths actually written.
fn save_certificate(
    ctx: &Context,
    req: &RequestContext,
    chain: &CertificateChain,
) -> Result<(PathBuf, PathBuf), EngineError> {
    let out_dir = ctx.config.csr_output_dir();
    let target = |given: &Option<PathBuf>, name: &str| {
        given.clone().unwrap_or_else(|| out_dir.join(name))
    };

    let cert_path = write_unique(&target(&req.cert_path, "cert.pem"), &chain.cert_pem)?;
    let chain_path = write_unique(&target(&req.chain_path, "chain.pem"), &chain.chain_pem)?;
    let fullchain_path = write_unique(
        &target(&req.fullchain_path, "fullchain.pem"),
        &chain.fullchain_pem(),
    )?;

    info!(
        cert = %cert_path.display(),
        chain = %chain_path.display(),
        fullchain = %fullchain_path.display(),
        "Saved certificate"
    );
    Ok((cert_path, fullchain_path))
}

fn write_unique(path: &Path, contents: &str) -> Result<PathBuf, EngineError> {
    use std::io::Write;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        make_dir(parent, 0o755).map_err(StorageError::from)?;
    }
    let (mut file, written) = unique_file(path, PUBLIC_MODE).map_err(StorageError::from)?;
    file.write_all(contents.as_bytes())
        .map_err(StorageError::from)?;
    Ok(written)
}

fn success_installation(ctx: &Context, domains: &DomainSet) {
    ctx.display.notification(&format!(
        "Congratulations! You have successfully enabled {}\n\n{}",
        join_https(domains),
        test_links(domains)
    ));
}

fn success_renewal(ctx: &Context, domains: &DomainSet, action: Action) {
    let verb = match action {
        Action::Reinstall => "reinstalled",
        _ => "renewed",
    };
    ctx.display.notification(&format!(
        "Your existing certificate has been successfully {}, and the new certificate has \
         been installed.\n\nThe new certificate covers the following domains: {}\n\n{}",
        verb,
        join_https(domains),
        test_links(domains)
    ));
}

fn join_https(domains: &DomainSet) -> String {
    let urls: Vec<String> = domains.iter().map(|d| format!("https://{}", d)).collect();
    match urls.split_last() {
        Some((last, rest)) if !rest.is_empty() => format!("{} and {}", rest.join(", "), last),
        Some((last, _)) => last.clone(),
        None => String::new(),
    }
}

fn test_links(domains: &DomainSet) -> String {
    let mut text = String::from("You should test your configuration at:");
    for domain in domains.iter() {
        text.push_str(&format!(
            "\nhttps://www.ssllabs.com/ssltest/analyze.html?d={}",
            domain
        ));
    }
    text
}

fn report_successful_dry_run(reporter: &Reporter, req: &RequestContext) {
    if req.verb != Verb::Renew {
        reporter.add_message_with("The dry run was successful.", Priority::High, false);
    }
}

/// Ask for a donation after real issuance
///
/// Never for staging runs or the unattended `renew` verb.
pub fn suggest_donation_if_appropriate(reporter: &Reporter, req: &RequestContext, action: Action) {
    if req.policy.staging || req.verb == Verb::Renew {
        return;
    }
    if !matches!(action, Action::Renew | Action::NewCert) {
        return;
    }
    reporter.add_message(
        "If you like Let's Encrypt, please consider supporting our work by:\n\n\
         Donating to ISRG / Let's Encrypt:   https://letsencrypt.org/donate\n\
         Donating to EFF:                    https://eff.org/donate-le\n\n",
        Priority::Low,
    );
}
