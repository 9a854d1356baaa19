//! Fixtures shared by the unit tests

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rcgen::{date_time_ymd, CertificateParams, DnType, KeyPair};
use tempfile::TempDir;

use certward_common::DomainSet;
use certward_config::directories::LETS_ENCRYPT_PRODUCTION;
use certward_config::{Config, RenewalParams};

use crate::context::Context;
use crate::display::{Display, MenuResponse, NoninteractiveDisplay};
use crate::errors::{DisplayError, ProtocolError};
use crate::lineage::LineageStore;
use crate::protocol::{CertificateChain, IssuedCertificate, ProtocolClient};
use crate::reporter::Reporter;

/// Self-signed certificate for `sans` expiring on January 1st of `year`
pub fn mint_cert(sans: &[&str], cn: &str, year: i32) -> (String, String) {
    let key = KeyPair::generate().unwrap();
    let mut params =
        CertificateParams::new(sans.iter().map(|s| s.to_string()).collect::<Vec<_>>()).unwrap();
    params.distinguished_name.push(DnType::CommonName, cn);
    params.not_before = date_time_ymd(year - 1, 1, 1);
    params.not_after = date_time_ymd(year, 1, 1);
    let cert = params.self_signed(&key).unwrap();
    (cert.pem(), key.serialize_pem())
}

/// Lineage store rooted in a fresh temporary directory
pub fn new_store() -> (TempDir, LineageStore) {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        config_dir: dir.path().join("config"),
        work_dir: dir.path().join("work"),
        logs_dir: dir.path().join("logs"),
        ..Config::default()
    };
    let store = LineageStore::new(&config).unwrap();
    (dir, store)
}

pub fn params() -> RenewalParams {
    RenewalParams {
        server: LETS_ENCRYPT_PRODUCTION.to_string(),
        authenticator: Some("webroot".to_string()),
        ..Default::default()
    }
}

pub fn context(display: ScriptedDisplay) -> (Context, Arc<ScriptedDisplay>) {
    let display = Arc::new(display);
    let ctx = Context::new(
        display.clone(),
        Arc::new(Reporter::new()),
        Arc::new(Config::default()),
    );
    (ctx, display)
}

pub fn noninteractive_context() -> (Context, Arc<Reporter>) {
    let reporter = Arc::new(Reporter::new());
    let ctx = Context::new(
        Arc::new(NoninteractiveDisplay::with_writer(io::sink())),
        reporter.clone(),
        Arc::new(Config::default()),
    );
    (ctx, reporter)
}

// ============================================================================
// Protocol client
// ============================================================================

/// Client that issues self-signed certificates without a CA
#[derive(Default)]
pub struct FakeClient {
    refuse: bool,
    obtained: AtomicUsize,
}

impl FakeClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Client whose orders finish without a certificate
    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::default()
        }
    }

    pub fn obtain_calls(&self) -> usize {
        self.obtained.load(Ordering::SeqCst)
    }
}

fn mint_for(domains: &DomainSet) -> (String, String) {
    let names: Vec<&str> = domains.iter().collect();
    mint_cert(&names, names.first().copied().unwrap_or("localhost"), 2099)
}

#[async_trait]
impl ProtocolClient for FakeClient {
    async fn obtain_certificate(
        &self,
        domains: &DomainSet,
    ) -> Result<Option<IssuedCertificate>, ProtocolError> {
        self.obtained.fetch_add(1, Ordering::SeqCst);
        if self.refuse {
            return Ok(None);
        }
        let (cert_pem, key_pem) = mint_for(domains);
        Ok(Some(IssuedCertificate {
            certificate: CertificateChain {
                chain_pem: cert_pem.clone(),
                cert_pem,
            },
            key_pem,
        }))
    }

    async fn obtain_certificate_from_csr(
        &self,
        domains: &DomainSet,
        _csr_der: &[u8],
    ) -> Result<CertificateChain, ProtocolError> {
        self.obtained.fetch_add(1, Ordering::SeqCst);
        let (cert_pem, _) = mint_for(domains);
        Ok(CertificateChain {
            chain_pem: cert_pem.clone(),
            cert_pem,
        })
    }

    async fn revoke(&self, _cert_pem: &str) -> Result<(), ProtocolError> {
        Ok(())
    }
}

// ============================================================================
// Display
// ============================================================================

/// Display answering from queued responses
///
/// Each prompt is recorded. An exhausted queue answers with a
/// missing-flag error, like an unattended run would.
#[derive(Default)]
pub struct ScriptedDisplay {
    menus: Mutex<VecDeque<MenuResponse>>,
    yesnos: Mutex<VecDeque<bool>>,
    inputs: Mutex<VecDeque<Option<String>>>,
    prompts: Mutex<Vec<String>>,
    notifications: Mutex<Vec<String>>,
}

impl ScriptedDisplay {
    pub fn with_menu(responses: impl IntoIterator<Item = MenuResponse>) -> Self {
        let display = Self::default();
        display.menus.lock().extend(responses);
        display
    }

    pub fn with_yesno(answers: impl IntoIterator<Item = bool>) -> Self {
        Self::default().and_yesno(answers)
    }

    pub fn and_yesno(self, answers: impl IntoIterator<Item = bool>) -> Self {
        self.yesnos.lock().extend(answers);
        self
    }

    pub fn and_input<'a>(self, answers: impl IntoIterator<Item = &'a str>) -> Self {
        self.inputs
            .lock()
            .extend(answers.into_iter().map(|a| Some(a.to_string())));
        self
    }

    pub fn and_cancelled_input(self) -> Self {
        self.inputs.lock().push_back(None);
        self
    }

    /// Every prompt shown so far; menus include their choices
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    pub fn notifications(&self) -> Vec<String> {
        self.notifications.lock().clone()
    }
}

impl Display for ScriptedDisplay {
    fn notification(&self, message: &str) {
        self.notifications.lock().push(message.to_string());
    }

    fn yesno(
        &self,
        message: &str,
        _yes_label: &str,
        _no_label: &str,
        cli_flag: Option<&str>,
    ) -> Result<bool, DisplayError> {
        self.prompts.lock().push(message.to_string());
        self.yesnos
            .lock()
            .pop_front()
            .ok_or_else(|| DisplayError::missing_flag(message, cli_flag))
    }

    fn menu(
        &self,
        message: &str,
        choices: &[String],
        _default: Option<usize>,
        cli_flag: Option<&str>,
    ) -> Result<MenuResponse, DisplayError> {
        self.prompts
            .lock()
            .push(format!("{}\n{}", message, choices.join("\n")));
        self.menus
            .lock()
            .pop_front()
            .ok_or_else(|| DisplayError::missing_flag(message, cli_flag))
    }

    fn input(&self, message: &str, cli_flag: Option<&str>) -> Result<Option<String>, DisplayError> {
        self.prompts.lock().push(message.to_string());
        self.inputs
            .lock()
            .pop_front()
            .ok_or_else(|| DisplayError::missing_flag(message, cli_flag))
    }
}
