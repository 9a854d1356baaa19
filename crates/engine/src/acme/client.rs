//! Protocol client on top of instant-acme
//!
//! Orders certificates with HTTP-01 challenges answered by the selected
//! authenticator plugin, then finalizes with a CSR and downloads the chain.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use instant_acme::{
    Account, AuthorizationStatus, ChallengeType, Identifier, NewOrder, Order, OrderStatus,
    RevocationRequest,
};
use rustls::pki_types::CertificateDer;
use tracing::{debug, error, info, trace, warn};

use certward_common::DomainSet;

use crate::cert::{self, CertInfo};
use crate::errors::{CertError, ProtocolError};
use crate::plugins::Authenticator;
use crate::protocol::{CertificateChain, IssuedCertificate, ProtocolClient};

/// Deadline for the certificate to be issued after finalization
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
/// Deadline for all challenges to validate
const CHALLENGE_TIMEOUT: Duration = Duration::from_secs(120);

/// ACME client bound to one account
pub struct AcmeProtocolClient {
    account: Account,
    authenticator: Option<Arc<dyn Authenticator>>,
}

impl AcmeProtocolClient {
    pub fn new(account: Account, authenticator: Option<Arc<dyn Authenticator>>) -> Self {
        Self {
            account,
            authenticator,
        }
    }

    /// Run an order for `domains` to completion and return the PEM chain
    async fn order(
        &self,
        domains: &DomainSet,
        csr_der: &[u8],
    ) -> Result<Option<String>, ProtocolError> {
        let authenticator = self
            .authenticator
            .as_ref()
            .ok_or(ProtocolError::NoAuthenticator)?;

        let identifiers: Vec<Identifier> = domains
            .iter()
            .map(|d| Identifier::Dns(d.to_string()))
            .collect();

        info!(domains = %domains, "Creating certificate order");
        let mut order = self
            .account
            .new_order(&NewOrder::new(&identifiers))
            .await
            .map_err(|e| ProtocolError::OrderCreation(e.to_string()))?;

        let mut tokens = Vec::new();
        let result = complete_order(&mut order, authenticator.as_ref(), &mut tokens, csr_der).await;

        for token in &tokens {
            if let Err(e) = authenticator.cleanup(token).await {
                warn!(token = %token, error = %e, "Challenge cleanup failed");
            }
        }
        result
    }
}

async fn complete_order(
    order: &mut Order,
    authenticator: &dyn Authenticator,
    tokens: &mut Vec<String>,
    csr_der: &[u8],
) -> Result<Option<String>, ProtocolError> {
    {
        let mut authorizations = order.authorizations();
        while let Some(result) = authorizations.next().await {
            let mut authz = result.map_err(|e| {
                ProtocolError::OrderCreation(format!("Failed to get authorization: {}", e))
            })?;

            let identifier = authz.identifier();
            let domain = match &identifier.identifier {
                Identifier::Dns(domain) => domain.clone(),
                _ => continue,
            };

            debug!(domain = %domain, status = ?authz.status, "Processing authorization");
            if authz.status == AuthorizationStatus::Valid {
                debug!(domain = %domain, "Authorization already valid");
                continue;
            }

            let mut challenge = authz
                .challenge(ChallengeType::Http01)
                .ok_or_else(|| ProtocolError::NoHttp01Challenge(domain.clone()))?;
            let key_authorization = challenge.key_authorization().as_str().to_string();
            let token = challenge.token.clone();

            authenticator
                .perform(&domain, &token, &key_authorization)
                .await?;
            tokens.push(token);

            challenge
                .set_ready()
                .await
                .map_err(|e| ProtocolError::ChallengeValidation {
                    domain: domain.clone(),
                    message: e.to_string(),
                })?;
        }
    }

    wait_for_order_ready(order).await?;

    order
        .finalize_csr(csr_der)
        .await
        .map_err(|e| ProtocolError::Finalization(format!("Failed to finalize order: {}", e)))?;

    let deadline = tokio::time::Instant::now() + DEFAULT_TIMEOUT;
    loop {
        let state = order
            .refresh()
            .await
            .map_err(|e| ProtocolError::Finalization(format!("Failed to refresh order: {}", e)))?;

        match state.status {
            OrderStatus::Valid => {
                return order.certificate().await.map_err(|e| {
                    ProtocolError::Finalization(format!("Failed to get certificate: {}", e))
                });
            }
            OrderStatus::Invalid => {
                return Err(ProtocolError::Finalization("Order became invalid".to_string()));
            }
            _ => {
                if tokio::time::Instant::now() > deadline {
                    return Err(ProtocolError::Timeout(
                        "Timed out waiting for certificate".to_string(),
                    ));
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

async fn wait_for_order_ready(order: &mut Order) -> Result<(), ProtocolError> {
    let deadline = tokio::time::Instant::now() + CHALLENGE_TIMEOUT;

    loop {
        let state = order
            .refresh()
            .await
            .map_err(|e| ProtocolError::OrderCreation(format!("Failed to refresh order: {}", e)))?;

        match state.status {
            OrderStatus::Ready | OrderStatus::Valid => {
                info!("Order is ready for finalization");
                return Ok(());
            }
            OrderStatus::Invalid => {
                error!("Order became invalid");
                return Err(ProtocolError::ChallengeValidation {
                    domain: "order".to_string(),
                    message: "Order became invalid".to_string(),
                });
            }
            OrderStatus::Pending | OrderStatus::Processing => {
                if tokio::time::Instant::now() > deadline {
                    return Err(ProtocolError::Timeout(
                        "Timed out waiting for order to become ready".to_string(),
                    ));
                }
                trace!(status = ?state.status, "Order not ready yet, waiting...");
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    }
}

fn into_chain(pem_chain: &str) -> Result<CertificateChain, ProtocolError> {
    let (cert_pem, chain_pem) = cert::split_chain(pem_chain)?;
    Ok(CertificateChain {
        cert_pem,
        chain_pem,
    })
}

#[async_trait]
impl ProtocolClient for AcmeProtocolClient {
    async fn obtain_certificate(
        &self,
        domains: &DomainSet,
    ) -> Result<Option<IssuedCertificate>, ProtocolError> {
        let key = rcgen::KeyPair::generate()
            .map_err(|e| ProtocolError::Finalization(format!("Failed to generate key: {}", e)))?;
        let params = rcgen::CertificateParams::new(domains.to_vec())
            .map_err(|e| ProtocolError::Finalization(format!("Failed to create CSR params: {}", e)))?;
        let csr = params
            .serialize_request(&key)
            .map_err(|e| ProtocolError::Finalization(format!("Failed to serialize CSR: {}", e)))?;

        let Some(pem_chain) = self.order(domains, csr.der()).await? else {
            warn!(domains = %domains, "Order completed without a certificate");
            return Ok(None);
        };

        let certificate = into_chain(&pem_chain)?;
        let expires = CertInfo::from_pem(certificate.cert_pem.as_bytes())?.not_after;
        info!(domains = %domains, expires = %expires, "Certificate issued successfully");

        Ok(Some(IssuedCertificate {
            certificate,
            key_pem: key.serialize_pem(),
        }))
    }

    async fn obtain_certificate_from_csr(
        &self,
        domains: &DomainSet,
        csr_der: &[u8],
    ) -> Result<CertificateChain, ProtocolError> {
        let pem_chain = self.order(domains, csr_der).await?.ok_or_else(|| {
            ProtocolError::Finalization("No certificate in response".to_string())
        })?;
        info!(domains = %domains, "Certificate issued for CSR");
        into_chain(&pem_chain)
    }

    async fn revoke(&self, cert_pem: &str) -> Result<(), ProtocolError> {
        let parsed = pem::parse(cert_pem).map_err(|e| CertError::Pem(e.to_string()))?;
        let der = CertificateDer::from(parsed.contents().to_vec());
        self.account
            .revoke(&RevocationRequest {
                certificate: &der,
                reason: None,
            })
            .await?;
        info!("Certificate revoked");
        Ok(())
    }
}
