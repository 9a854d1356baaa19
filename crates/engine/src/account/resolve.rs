//! Picking the account a run acts as

use std::sync::Arc;

use tracing::{debug, info};

use super::{Account, AccountStore};
use crate::context::{Context, RequestContext};
use crate::display::MenuResponse;
use crate::errors::{DisplayError, EngineError};
use crate::plugins::Authenticator;
use crate::protocol::{AcmeConnector, ProtocolClient};

pub const EMAIL_PROMPT: &str =
    "Enter email address (used for urgent notices and lost key recovery)";

/// Select or register the account for this request
///
/// An explicitly requested account must exist. Otherwise a single stored
/// account is used as is, several are offered in a menu, and none means
/// registering a new one. Only a fresh registration comes with a ready
/// protocol client.
pub async fn determine_account(
    ctx: &Context,
    req: &RequestContext,
    store: &dyn AccountStore,
    connector: &dyn AcmeConnector,
    authenticator: Option<Arc<dyn Authenticator>>,
) -> Result<(Account, Option<Box<dyn ProtocolClient>>), EngineError> {
    if let Some(id) = &req.account {
        let account = store.load(&req.server, id)?;
        debug!(account = %account.id, "Using requested account");
        return Ok((account, None));
    }

    let mut accounts = store.find_all(&req.server)?;
    let account = match accounts.len() {
        0 => {
            let (account, client) = register(ctx, req, store, connector, authenticator).await?;
            return Ok((account, Some(client)));
        }
        1 => accounts.remove(0),
        _ => choose_account(ctx, accounts)?,
    };
    debug!(account = %account.id, "Picked account");
    Ok((account, None))
}

/// Select a stored account without ever registering one
pub fn existing_account(
    ctx: &Context,
    req: &RequestContext,
    store: &dyn AccountStore,
) -> Result<Account, EngineError> {
    if let Some(id) = &req.account {
        return Ok(store.load(&req.server, id)?);
    }

    let mut accounts = store.find_all(&req.server)?;
    match accounts.len() {
        0 => Err(EngineError::Blocking(format!(
            "No account is registered with {}. Use --key-path to revoke with the certificate's key",
            req.server
        ))),
        1 => Ok(accounts.remove(0)),
        _ => choose_account(ctx, accounts),
    }
}

fn choose_account(ctx: &Context, mut accounts: Vec<Account>) -> Result<Account, EngineError> {
    let labels: Vec<String> = accounts.iter().map(Account::slug).collect();
    match ctx
        .display
        .menu("Please choose an account", &labels, None, Some("--account"))?
    {
        MenuResponse::Ok(index) if index < accounts.len() => Ok(accounts.swap_remove(index)),
        _ => Err(EngineError::Blocking(
            "No account selected. Use --account to pick one".to_string(),
        )),
    }
}

fn get_email(ctx: &Context) -> Result<String, EngineError> {
    loop {
        match ctx.display.input(EMAIL_PROMPT, Some("--email"))? {
            Some(email) if is_plausible_email(&email) => return Ok(email),
            Some(_) => ctx
                .display
                .notification("There seem to be problems with that address."),
            None => {
                return Err(EngineError::Blocking(
                    "An e-mail address or --register-unsafely-without-email must be provided."
                        .to_string(),
                ))
            }
        }
    }
}

fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

async fn register(
    ctx: &Context,
    req: &RequestContext,
    store: &dyn AccountStore,
    connector: &dyn AcmeConnector,
    authenticator: Option<Arc<dyn Authenticator>>,
) -> Result<(Account, Box<dyn ProtocolClient>), EngineError> {
    let email = match &req.email {
        Some(email) => Some(email.clone()),
        None if req.register_without_email => None,
        None => Some(get_email(ctx)?),
    };

    let (account, client) = register_with_ca(ctx, req, connector, email.as_deref(), authenticator)
        .await
        .map_err(|e| match e {
            EngineError::Display(missing @ DisplayError::MissingFlag { .. }) => {
                EngineError::Display(missing)
            }
            other => {
                debug!(error = %other, "Registration failed");
                EngineError::Registration(Box::new(other))
            }
        })?;

    store.save(&req.server, &account)?;
    info!(
        account = %account.id,
        email = ?account.meta.email,
        created = %account.meta.creation_dt,
        "Registered new ACME account"
    );
    Ok((account, client))
}

async fn register_with_ca(
    ctx: &Context,
    req: &RequestContext,
    connector: &dyn AcmeConnector,
    email: Option<&str>,
    authenticator: Option<Arc<dyn Authenticator>>,
) -> Result<(Account, Box<dyn ProtocolClient>), EngineError> {
    if let Some(tos) = connector.terms_of_service(&req.server).await? {
        let agreed = req.agree_tos
            || ctx.display.yesno(
                &format!(
                    "Please read the Terms of Service at {}. You must agree in order to \
                     register with the ACME server at {}",
                    tos, req.server
                ),
                "Agree",
                "Cancel",
                Some("--agree-tos"),
            )?;
        if !agreed {
            return Err(EngineError::Blocking(
                "Registration cannot proceed without accepting Terms of Service.".to_string(),
            ));
        }
    }

    Ok(connector.register(&req.server, email, authenticator).await?)
}
