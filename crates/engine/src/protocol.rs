//! Certificate authority protocol seam
//!
//! The engine talks to the CA only through [`ProtocolClient`] and
//! [`AcmeConnector`]; the `instant-acme` backed implementations live in
//! [`crate::acme`].

use std::sync::Arc;

use async_trait::async_trait;

use certward_common::DomainSet;

use crate::account::Account;
use crate::cert;
use crate::errors::ProtocolError;
use crate::plugins::Authenticator;

/// An issued certificate and the intermediates that go with it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateChain {
    pub cert_pem: String,
    pub chain_pem: String,
}

impl CertificateChain {
    /// Certificate followed by its chain
    pub fn fullchain_pem(&self) -> String {
        cert::fullchain(&self.cert_pem, &self.chain_pem)
    }
}

/// A certificate issued for a key generated on this host
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    pub certificate: CertificateChain,
    pub key_pem: String,
}

/// Client for an ACME certificate authority
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Obtain a certificate for `domains` with a freshly generated key
    ///
    /// `None` means the CA finished without producing a certificate.
    async fn obtain_certificate(
        &self,
        domains: &DomainSet,
    ) -> Result<Option<IssuedCertificate>, ProtocolError>;

    /// Obtain a certificate for a CSR supplied by the user
    async fn obtain_certificate_from_csr(
        &self,
        domains: &DomainSet,
        csr_der: &[u8],
    ) -> Result<CertificateChain, ProtocolError>;

    /// Revoke a PEM certificate with the account key
    async fn revoke(&self, cert_pem: &str) -> Result<(), ProtocolError>;
}

/// Opens protocol clients for accounts
#[async_trait]
pub trait AcmeConnector: Send + Sync {
    /// Terms of service link advertised by the server's directory
    async fn terms_of_service(&self, server: &str) -> Result<Option<String>, ProtocolError>;

    /// Register a new account, having agreed to the terms of service
    async fn register(
        &self,
        server: &str,
        email: Option<&str>,
        authenticator: Option<Arc<dyn Authenticator>>,
    ) -> Result<(Account, Box<dyn ProtocolClient>), ProtocolError>;

    /// Client for an account registered earlier
    async fn connect(
        &self,
        server: &str,
        account: &Account,
        authenticator: Option<Arc<dyn Authenticator>>,
    ) -> Result<Box<dyn ProtocolClient>, ProtocolError>;

    /// Revoke a PEM certificate by proving possession of its private key
    ///
    /// Needs no account on `server`.
    async fn revoke_with_key(
        &self,
        server: &str,
        cert_pem: &str,
        key_pem: &str,
    ) -> Result<(), ProtocolError>;
}
