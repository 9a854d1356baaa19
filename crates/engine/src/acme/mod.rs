//! ACME adapter
//!
//! Implements [`AcmeConnector`] and [`ProtocolClient`] with the
//! `instant-acme` crate. Account key material is carried as the JSON
//! serialization of [`instant_acme::AccountCredentials`].

mod client;
mod jws;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use instant_acme::{Account as AcmeAccount, AccountCredentials, NewAccount};
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, info};

use crate::account::{Account, AccountMeta, Registration};
use crate::errors::{CertError, ProtocolError};
use crate::plugins::Authenticator;
use crate::protocol::{AcmeConnector, ProtocolClient};

pub use client::AcmeProtocolClient;
use jws::{b64, Directory, KeySigner};

/// Connector talking to real ACME servers
#[derive(Debug, Clone, Default)]
pub struct InstantAcmeConnector {
    http: reqwest::Client,
}

impl InstantAcmeConnector {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AcmeConnector for InstantAcmeConnector {
    async fn terms_of_service(&self, server: &str) -> Result<Option<String>, ProtocolError> {
        debug!(server = %server, "Fetching ACME directory");
        let directory: serde_json::Value = self
            .http
            .get(server)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(directory
            .get("meta")
            .and_then(|meta| meta.get("termsOfService"))
            .and_then(|tos| tos.as_str())
            .map(str::to_string))
    }

    async fn register(
        &self,
        server: &str,
        email: Option<&str>,
        authenticator: Option<Arc<dyn Authenticator>>,
    ) -> Result<(Account, Box<dyn ProtocolClient>), ProtocolError> {
        let contact: Vec<String> = email
            .map(|e| format!("mailto:{}", e))
            .into_iter()
            .collect();
        let contact_refs: Vec<&str> = contact.iter().map(String::as_str).collect();

        info!(email = ?email, server = %server, "Creating new ACME account");
        let (acme_account, credentials) = AcmeAccount::builder()
            .map_err(|e| ProtocolError::AccountCreation(e.to_string()))?
            .create(
                &NewAccount {
                    contact: &contact_refs,
                    terms_of_service_agreed: true,
                    only_return_existing: false,
                },
                server.to_owned(),
                None,
            )
            .await
            .map_err(|e| ProtocolError::AccountCreation(e.to_string()))?;

        let credentials = serde_json::to_value(&credentials).map_err(|e| {
            ProtocolError::Credentials(format!("Failed to serialize credentials: {}", e))
        })?;
        let terms_of_service = self.terms_of_service(server).await.ok().flatten();

        let account = Account::new(
            Registration {
                uri: acme_account.id().to_string(),
                terms_of_service,
                contact,
            },
            AccountMeta {
                creation_dt: Utc::now(),
                email: email.map(str::to_string),
            },
            credentials,
        );

        Ok((
            account,
            Box::new(AcmeProtocolClient::new(acme_account, authenticator)),
        ))
    }

    async fn connect(
        &self,
        _server: &str,
        account: &Account,
        authenticator: Option<Arc<dyn Authenticator>>,
    ) -> Result<Box<dyn ProtocolClient>, ProtocolError> {
        let credentials: AccountCredentials = serde_json::from_value(account.credentials.clone())
            .map_err(|e| ProtocolError::Credentials(e.to_string()))?;

        let acme_account = AcmeAccount::builder()
            .map_err(|e| ProtocolError::Credentials(e.to_string()))?
            .from_credentials(credentials)
            .await
            .map_err(|e| ProtocolError::Credentials(e.to_string()))?;

        debug!(account = %account.id, "Loaded ACME account from credentials");
        Ok(Box::new(AcmeProtocolClient::new(acme_account, authenticator)))
    }

    async fn revoke_with_key(
        &self,
        server: &str,
        cert_pem: &str,
        key_pem: &str,
    ) -> Result<(), ProtocolError> {
        let signer = KeySigner::from_pem(key_pem)?;
        let cert_der = ::pem::parse(cert_pem)
            .map_err(|e| CertError::Pem(e.to_string()))?
            .into_contents();

        let directory: Directory = self
            .http
            .get(server)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let nonce_response = self
            .http
            .head(&directory.new_nonce)
            .send()
            .await?
            .error_for_status()?;
        let nonce = nonce_response
            .headers()
            .get("replay-nonce")
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| ProtocolError::Directory("no Replay-Nonce header".to_string()))?;

        let body = signer.sign_request(
            &directory.revoke_cert,
            nonce,
            &serde_json::json!({ "certificate": b64(&cert_der) }),
        )?;
        let body =
            serde_json::to_vec(&body).map_err(|e| ProtocolError::Signing(e.to_string()))?;

        debug!(url = %directory.revoke_cert, "Sending key-signed revocation");
        let response = self
            .http
            .post(&directory.revoke_cert)
            .header(CONTENT_TYPE, "application/jose+json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            info!(server = %server, "Certificate revoked with its own key");
            return Ok(());
        }
        let text = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<serde_json::Value>(&text)
            .ok()
            .and_then(|problem| problem.get("detail")?.as_str().map(str::to_string))
            .unwrap_or(text);
        Err(ProtocolError::Revocation(format!("{}: {}", status, detail)))
    }
}
