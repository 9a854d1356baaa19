//! Command outcomes and the messages shown on exit

use std::error::Error as _;
use std::path::Path;

use certward_common::Action;

use crate::errors::{EngineError, PluginError};
use crate::lineage::CertificateLineage;

/// Message shown when the user backs out of a prompt
pub const CANCELLED_MESSAGE: &str =
    "User chose to cancel the operation and may reinvoke the client.";

/// What a successful certificate flow produced
#[derive(Debug, Clone)]
pub struct Enrollment {
    pub action: Action,
    /// Absent for a dry-run new certificate and for CSR mode
    pub lineage: Option<CertificateLineage>,
}

/// Result of running one command
#[derive(Debug)]
pub enum Outcome {
    Success(Option<Enrollment>),
    Cancelled,
    PluginUnavailable(String),
    Fatal(EngineError),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// Fold an engine result into an outcome
    ///
    /// `Ok(None)` means the user cancelled.
    pub fn from_result(result: Result<Option<Enrollment>, EngineError>) -> Self {
        match result {
            Ok(Some(enrollment)) => Outcome::Success(Some(enrollment)),
            Ok(None) => Outcome::Cancelled,
            Err(EngineError::Plugin(PluginError::Selection(reason))) => {
                Outcome::PluginUnavailable(reason)
            }
            Err(e) => Outcome::Fatal(e),
        }
    }

    /// Message to print before exiting non-zero, `None` on success
    ///
    /// With `debug` the full error chain is shown. Otherwise unexpected
    /// errors are summarized with a pointer to `logs_dir`, and ACME
    /// problem codes are pruned unless `verbose`.
    pub fn exit_message(&self, logs_dir: &Path, verbose: bool, debug: bool) -> Option<String> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Cancelled => Some(CANCELLED_MESSAGE.to_string()),
            Outcome::PluginUnavailable(reason) => Some(reason.clone()),
            Outcome::Fatal(err) if debug => Some(error_chain(err)),
            Outcome::Fatal(err) if err.is_expected() => Some(err.to_string()),
            Outcome::Fatal(err) => {
                let mut text = err.to_string();
                if !verbose && text.contains("urn:") {
                    if let Some((_code, human)) = text.split_once(":: ") {
                        text = human.to_string();
                    }
                }
                Some(format!(
                    "An unexpected error occurred:\n{}\nPlease see the logfiles in {} for more details.",
                    text,
                    logs_dir.display()
                ))
            }
        }
    }
}

fn error_chain(err: &EngineError) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str("\n  caused by: ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ProtocolError;

    fn logs() -> &'static Path {
        Path::new("/var/log/certward")
    }

    #[test]
    fn test_success_has_no_message() {
        assert!(Outcome::Success(None)
            .exit_message(logs(), false, false)
            .is_none());
    }

    #[test]
    fn test_cancelled_message() {
        assert_eq!(
            Outcome::Cancelled.exit_message(logs(), false, false).unwrap(),
            CANCELLED_MESSAGE
        );
    }

    #[test]
    fn test_plugin_selection_becomes_unavailable() {
        let outcome = Outcome::from_result(Err(EngineError::Plugin(PluginError::Selection(
            "No installer".into(),
        ))));
        assert!(matches!(outcome, Outcome::PluginUnavailable(ref r) if r == "No installer"));
    }

    #[test]
    fn test_expected_error_is_verbatim() {
        let outcome = Outcome::Fatal(EngineError::CertificateNotObtained);
        assert_eq!(
            outcome.exit_message(logs(), false, false).unwrap(),
            "Certificate could not be obtained"
        );
    }

    #[test]
    fn test_acme_code_is_pruned() {
        let outcome = Outcome::Fatal(EngineError::Protocol(ProtocolError::Acme(
            "urn:acme:error:malformed :: The request message was malformed".into(),
        )));
        let msg = outcome.exit_message(logs(), false, false).unwrap();
        assert_eq!(
            msg,
            "An unexpected error occurred:\nThe request message was malformed\n\
             Please see the logfiles in /var/log/certward for more details."
        );

        let verbose = outcome.exit_message(logs(), true, false).unwrap();
        assert!(verbose.contains("urn:acme:error:malformed"));
    }

    #[test]
    fn test_debug_shows_chain() {
        let outcome = Outcome::Fatal(EngineError::Registration(Box::new(
            ProtocolError::AccountCreation("contact rejected".into()),
        )));
        let msg = outcome.exit_message(logs(), false, true).unwrap();
        assert!(msg.starts_with("Unable to register an account with ACME server"));
        assert!(msg.contains("caused by: Failed to create ACME account: contact rejected"));
    }
}
