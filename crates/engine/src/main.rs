//! Certward - Main entry point
//!
//! Obtains, renews and installs TLS certificates from ACME certificate
//! authorities.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{debug, error, info, warn};

use certward_common::{AccountId, DomainSet, Verb};
use certward_config::{directories, validate::lint_config, Config};
use certward_engine::display::Display;
use certward_engine::guard;
use certward_engine::logging::{self, LogOptions};
use certward_engine::plugins::PluginRegistry;
use certward_engine::{
    commands, AccountFileStorage, Context, InstantAcmeConnector, LineageStore,
    NoninteractiveDisplay, Reporter, RequestContext, Services, TerminalDisplay,
};

/// Config file used when `--config` is not given
const DEFAULT_CONFIG_PATH: &str = "/etc/certward/certward.kdl";

/// Certward - ACME certificate manager
#[derive(Parser, Debug)]
#[command(name = "certward")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long = "config", env = "CERTWARD_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (debug level)
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,

    /// Show full error chains on failure
    #[arg(long = "debug", global = true)]
    debug: bool,

    /// Log to stderr as JSON lines
    #[arg(long = "log-json", global = true)]
    log_json: bool,

    /// Never prompt; fail with the flag to pass instead
    #[arg(short = 'n', long = "non-interactive", global = true)]
    non_interactive: bool,

    #[command(flatten)]
    request: RequestArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args, Debug)]
struct RequestArgs {
    /// ACME directory URL
    #[arg(long = "server", global = true)]
    server: Option<String>,

    /// Use the Let's Encrypt staging server
    #[arg(long = "staging", alias = "test-cert", global = true)]
    staging: bool,

    /// Test renewal against the staging server without saving anything
    #[arg(long = "dry-run", global = true)]
    dry_run: bool,

    /// Contact email for account registration
    #[arg(short = 'm', long = "email", global = true)]
    email: Option<String>,

    /// Agree to the ACME server's terms of service
    #[arg(long = "agree-tos", global = true)]
    agree_tos: bool,

    /// Register without a contact email
    #[arg(long = "register-unsafely-without-email", global = true)]
    register_without_email: bool,

    /// Account ID to use
    #[arg(long = "account", global = true)]
    account: Option<String>,

    /// Domain names, comma separated or repeated
    #[arg(short = 'd', long = "domains", alias = "domain", value_delimiter = ',', global = true)]
    domains: Vec<String>,

    /// Always create a new lineage, even when one covers the names
    #[arg(long = "duplicate", global = true)]
    duplicate: bool,

    /// Replace a lineage whose names are a subset of the request
    #[arg(long = "expand", global = true)]
    expand: bool,

    /// Reinstall an existing valid certificate without asking
    #[arg(long = "reinstall", global = true)]
    reinstall: bool,

    /// Renew a matching lineage even if it is not due
    #[arg(long = "renew-by-default", global = true)]
    renew_by_default: bool,

    /// Allow replacing a valid certificate with a staging one
    #[arg(long = "break-my-certs", global = true)]
    break_my_certs: bool,

    /// Authenticator plugin name
    #[arg(short = 'a', long = "authenticator", global = true)]
    authenticator: Option<String>,

    /// Installer plugin name
    #[arg(short = 'i', long = "installer", global = true)]
    installer: Option<String>,

    /// Document root for the webroot authenticator
    #[arg(short = 'w', long = "webroot-path", global = true)]
    webroot_path: Option<PathBuf>,

    /// Renew when fewer than this many days remain
    #[arg(long = "renew-before-days", global = true)]
    renew_before_days: Option<u32>,

    /// Certificate signing request (DER or PEM)
    #[arg(long = "csr", global = true)]
    csr: Option<PathBuf>,

    /// Certificate path (install, revoke and CSR output)
    #[arg(long = "cert-path", global = true)]
    cert_path: Option<PathBuf>,

    /// Private key path (install)
    #[arg(long = "key-path", global = true)]
    key_path: Option<PathBuf>,

    /// Chain path (install and CSR output)
    #[arg(long = "chain-path", global = true)]
    chain_path: Option<PathBuf>,

    /// Full chain path (install and CSR output)
    #[arg(long = "fullchain-path", global = true)]
    fullchain_path: Option<PathBuf>,

    /// Number of installer checkpoints to roll back
    #[arg(long = "checkpoints", default_value_t = 1, global = true)]
    checkpoints: u32,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Commands {
    /// Obtain and install a certificate (default)
    Run,
    /// Obtain a certificate without installing it
    #[command(alias = "auth")]
    Certonly,
    /// Renew every certificate that is close to expiry
    Renew,
    /// Install an existing certificate
    Install,
    /// Revoke a certificate
    Revoke,
    /// Roll back installer configuration checkpoints
    Rollback,
    /// Show configuration changes made by the installer
    ConfigChanges,
    /// List available plugins
    Plugins,
    /// Validate the configuration file and exit
    Test,
}

impl Commands {
    fn verb(self) -> Option<Verb> {
        match self {
            Commands::Run => Some(Verb::Run),
            Commands::Certonly => Some(Verb::Certonly),
            Commands::Renew => Some(Verb::Renew),
            Commands::Install => Some(Verb::Install),
            Commands::Revoke => Some(Verb::Revoke),
            Commands::Rollback => Some(Verb::Rollback),
            Commands::ConfigChanges => Some(Verb::ConfigChanges),
            Commands::Plugins => Some(Verb::Plugins),
            Commands::Test => None,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Run);

    let config = load_config(cli.config.as_deref())?;
    let Some(verb) = command.verb() else {
        return test_config(&config, cli.config.as_deref());
    };

    let log_guard = logging::init(
        &config.logs_dir,
        &LogOptions {
            verbose: cli.verbose,
            json: cli.log_json,
        },
    );
    debug!(log_file = ?log_guard.path(), verb = %verb, "certward starting");

    let lint = lint_config(&config);
    for warning in &lint.warnings {
        warn!("{}", warning);
    }
    if !lint.is_ok() {
        for e in &lint.errors {
            error!("{}", e);
        }
        anyhow::bail!("Configuration validation failed");
    }

    let req = build_request(verb, &cli.request, &config)?;
    let config = Arc::new(config);

    let display: Arc<dyn Display> = if cli.non_interactive || verb == Verb::Renew {
        Arc::new(NoninteractiveDisplay::new())
    } else {
        Arc::new(TerminalDisplay::new())
    };
    let reporter = Arc::new(Reporter::new());
    let services = Services {
        ctx: Context::new(display, reporter.clone(), config.clone()),
        store: LineageStore::new(&config).context("Failed to open certificate storage")?,
        accounts: Arc::new(AccountFileStorage::from_config(&config)),
        connector: Arc::new(InstantAcmeConnector::new()),
        plugins: PluginRegistry::builtin(),
    };

    let runtime = tokio::runtime::Runtime::new()?;
    let outcome = runtime.block_on(commands::dispatch(&services, &req));

    match outcome.exit_message(&config.logs_dir, cli.verbose, cli.debug) {
        None => {
            reporter.print_messages(false);
            info!(verb = %verb, "certward finished");
            Ok(())
        }
        Some(message) => {
            reporter.print_messages(true);
            eprintln!("{}", message);
            // exit() skips destructors
            drop(log_guard);
            std::process::exit(1);
        }
    }
}

/// Load the configuration file, falling back to defaults when none exists
fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load configuration file {}", path.display())),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => Config::from_file(DEFAULT_CONFIG_PATH)
            .with_context(|| format!("Failed to load configuration file {}", DEFAULT_CONFIG_PATH)),
        None => Ok(Config::default()),
    }
}

/// Lint the configuration and report the result
fn test_config(config: &Config, path: Option<&Path>) -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let result = lint_config(config);
    for warning in &result.warnings {
        warn!("{}", warning);
    }
    for e in &result.errors {
        error!("{}", e);
    }
    if !result.is_ok() {
        anyhow::bail!("Configuration validation failed");
    }

    info!("Configuration test successful:");
    info!("  - config dir: {}", config.config_dir.display());
    info!("  - server: {}", config.server);
    info!(
        "  - authenticator: {}",
        config.authenticator.as_deref().unwrap_or("(none)")
    );
    info!("  - installer: {}", config.installer.as_deref().unwrap_or("(none)"));

    println!(
        "certward: configuration file {} test is successful",
        path.map(|p| p.display().to_string())
            .unwrap_or_else(|| "(defaults)".to_string())
    );
    Ok(())
}

/// Merge command line flags over the configuration into a request
fn build_request(verb: Verb, args: &RequestArgs, config: &Config) -> Result<RequestContext> {
    let mut req = RequestContext::from_config(verb, config);

    req.domains = DomainSet::parse(&args.domains).context("Invalid --domains value")?;
    req.policy.duplicate = args.duplicate;
    req.policy.expand = args.expand;
    req.policy.reinstall = args.reinstall;
    req.policy.renew_by_default = args.renew_by_default;
    req.policy.break_my_certs = args.break_my_certs || args.dry_run;
    req.policy.dry_run = args.dry_run;
    let staging_requested = args.staging || args.dry_run;

    if let Some(server) = &args.server {
        if staging_requested && server != directories::LETS_ENCRYPT_STAGING {
            anyhow::bail!("--server value conflicts with --staging");
        }
        req.server = server.clone();
        req.explicit_server = true;
    } else if staging_requested {
        req.server = directories::LETS_ENCRYPT_STAGING.to_string();
        req.explicit_server = true;
    }
    req.policy.staging = staging_requested || guard::is_staging(&req.server);

    if args.email.is_some() {
        req.email = args.email.clone();
    }
    req.agree_tos |= args.agree_tos;
    req.register_without_email |= args.register_without_email;
    req.account = args.account.as_deref().map(AccountId::new);

    if args.authenticator.is_some() {
        req.authenticator = args.authenticator.clone();
    }
    if args.installer.is_some() {
        req.installer = args.installer.clone();
    }
    if args.webroot_path.is_some() {
        req.webroot_path = args.webroot_path.clone();
    }
    if let Some(days) = args.renew_before_days {
        req.renew_before_days = days;
    }

    req.csr = args.csr.clone();
    req.cert_path = args.cert_path.clone();
    req.key_path = args.key_path.clone();
    req.chain_path = args.chain_path.clone();
    req.fullchain_path = args.fullchain_path.clone();
    req.checkpoints = args.checkpoints;
    Ok(req)
}
