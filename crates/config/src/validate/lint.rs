//! Configuration linting
//!
//! Flags plugin and account settings that cannot work together.

use super::{ErrorCategory, ValidationError, ValidationResult, ValidationWarning};
use crate::Config;

/// Lint configuration for unusable or risky combinations
pub fn lint_config(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    match config.authenticator.as_deref() {
        Some("webroot") if config.webroot_path.is_none() => {
            result.add_error(ValidationError::new(
                ErrorCategory::Plugin,
                "The webroot authenticator requires 'webroot-path'",
            ));
        }
        _ => {}
    }

    match config.installer.as_deref() {
        Some("command") if config.reload_command.is_none() => {
            result.add_warning(ValidationWarning::new(
                "The command installer has no 'reload-command'; renewed certificates \
                 will be deployed without reloading the server",
            ));
        }
        _ => {}
    }

    if let Err(e) = url::Url::parse(&config.server) {
        result.add_error(ValidationError::new(
            ErrorCategory::Acme,
            format!("ACME server '{}' is not a valid URL: {}", config.server, e),
        ));
    }

    if config.email.is_some() && config.register_without_email {
        result.add_warning(ValidationWarning::new(
            "'email' is set together with 'register-without-email'; the email wins",
        ));
    }

    if config.renew_before_days == 0 {
        result.add_warning(ValidationWarning::new(
            "'renew-before-days' is 0; certificates will only renew once expired",
        ));
    }

    if config.logs_dir.starts_with(config.live_dir()) {
        result.add_error(ValidationError::new(
            ErrorCategory::Paths,
            "'logs-dir' must not live inside the live certificate directory",
        ));
    }

    result
}
