//! Staging safety guard
//!
//! Refuses to replace a trusted certificate with one from a test CA.

use tracing::{debug, warn};

use certward_config::directories::LETS_ENCRYPT_STAGING;

use crate::cert::CertInfo;
use crate::errors::EngineError;

/// Whether a directory URL looks like a staging endpoint
///
/// Any URL containing "staging" counts, so a production CA whose URL
/// happens to contain the word is treated as staging too.
pub fn is_staging(server: &str) -> bool {
    server == LETS_ENCRYPT_STAGING || server.to_lowercase().contains("staging")
}

/// Check that renewing against `target_server` would not downgrade a
/// lineage originally obtained from `original_server`
///
/// Only the staging-ward direction is checked. The installed certificate
/// counts as a test certificate when its issuer carries the "fake" marker.
pub fn avoid_invalidating_lineage(
    target_server: &str,
    original_server: &str,
    latest_cert: &CertInfo,
    break_my_certs: bool,
) -> Result<(), EngineError> {
    if !is_staging(target_server) {
        return Ok(());
    }

    let now_valid = !latest_cert.has_fake_issuer();
    if is_staging(original_server) && !now_valid {
        debug!(
            target_server = %target_server,
            "Lineage already holds a staging certificate"
        );
        return Ok(());
    }

    if break_my_certs {
        warn!(
            names = %latest_cert.names,
            target_server = %target_server,
            "Replacing a seemingly valid certificate with a test certificate (--break-my-certs)"
        );
        return Ok(());
    }

    Err(EngineError::StagingDowngrade {
        names: latest_cert.names.to_string(),
    })
}
