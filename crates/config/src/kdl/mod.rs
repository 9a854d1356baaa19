//! KDL configuration parsing
//!
//! Turns a parsed KDL document into a [`Config`]. Three top-level blocks
//! are understood: `paths`, `acme` and `plugins`. Unknown blocks are a
//! hard error so typos do not silently fall back to defaults.

mod helpers;

use anyhow::{bail, Result};
use std::path::PathBuf;
use tracing::trace;

use crate::{directories, Config};

pub use helpers::{get_bool_entry, get_int_entry, get_string_entry, offset_to_line_col};

/// Convert a parsed KDL document to Config
pub fn parse_kdl_document(doc: &::kdl::KdlDocument) -> Result<Config> {
    let mut config = Config::default();

    for node in doc.nodes() {
        match node.name().value() {
            "paths" => parse_paths(node, &mut config),
            "acme" => parse_acme(node, &mut config)?,
            "plugins" => parse_plugins(node, &mut config),
            other => bail!(
                "Unknown configuration block '{}', expected one of: paths, acme, plugins",
                other
            ),
        }
    }

    Ok(config)
}

fn parse_paths(node: &::kdl::KdlNode, config: &mut Config) {
    trace!("Parsing paths block");

    if let Some(dir) = get_string_entry(node, "config-dir") {
        config.config_dir = PathBuf::from(dir);
    }
    if let Some(dir) = get_string_entry(node, "work-dir") {
        config.work_dir = PathBuf::from(dir);
    }
    if let Some(dir) = get_string_entry(node, "logs-dir") {
        config.logs_dir = PathBuf::from(dir);
    }
}

fn parse_acme(node: &::kdl::KdlNode, config: &mut Config) -> Result<()> {
    trace!("Parsing acme block");

    let staging = get_bool_entry(node, "staging").unwrap_or(false);
    match get_string_entry(node, "server") {
        Some(_) if staging => {
            bail!("'server' and 'staging #true' are mutually exclusive in the acme block")
        }
        Some(server) => config.server = server,
        None if staging => config.server = directories::LETS_ENCRYPT_STAGING.to_string(),
        None => {}
    }

    config.email = get_string_entry(node, "email").or(config.email.take());
    config.agree_tos = get_bool_entry(node, "agree-tos").unwrap_or(config.agree_tos);
    config.register_without_email = get_bool_entry(node, "register-without-email")
        .unwrap_or(config.register_without_email);

    if let Some(days) = get_int_entry(node, "renew-before-days") {
        config.renew_before_days = u32::try_from(days).map_err(|_| {
            anyhow::anyhow!("'renew-before-days' must be a non-negative number, got {}", days)
        })?;
    }

    trace!(
        server = %config.server,
        renew_before_days = config.renew_before_days,
        "Parsed acme block"
    );

    Ok(())
}

fn parse_plugins(node: &::kdl::KdlNode, config: &mut Config) {
    trace!("Parsing plugins block");

    config.authenticator = get_string_entry(node, "authenticator").or(config.authenticator.take());
    config.installer = get_string_entry(node, "installer").or(config.installer.take());
    config.webroot_path = get_string_entry(node, "webroot-path")
        .map(PathBuf::from)
        .or(config.webroot_path.take());
    config.reload_command = get_string_entry(node, "reload-command").or(config.reload_command.take());
}

/// Render a KDL parse error with the offending line and a caret
pub fn render_parse_error(content: &str, e: &::kdl::KdlError) -> String {
    use miette::Diagnostic;

    let mut error_msg = String::from("KDL configuration parse error:\n\n");
    let lines: Vec<&str> = content.lines().collect();
    let mut found_details = false;

    if let Some(related) = e.related() {
        for diagnostic in related {
            error_msg.push_str(&format!("  {}\n", diagnostic));
            found_details = true;

            if let Some(labels) = diagnostic.labels() {
                for label in labels {
                    let (line, col) = offset_to_line_col(content, label.offset());
                    error_msg.push_str(&format!("\n  --> at line {}, column {}\n", line, col));

                    if let Some(line_content) = lines.get(line.saturating_sub(1)) {
                        error_msg.push_str(&format!("{:>4} | {}\n", line, line_content));
                        error_msg.push_str(&format!(
                            "     | {}^",
                            " ".repeat(col.saturating_sub(1))
                        ));
                        if let Some(label_msg) = label.label() {
                            error_msg.push_str(&format!(" {}", label_msg));
                        }
                        error_msg.push('\n');
                    }
                }
            }

            if let Some(help) = diagnostic.help() {
                error_msg.push_str(&format!("\n  Help: {}\n", help));
            }
        }
    }

    if !found_details {
        error_msg.push_str(&format!("  {}\n", e));
    }

    error_msg
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> Result<Config> {
        Config::from_kdl(content)
    }

    #[test]
    fn test_full_document() {
        let config = parse(
            r#"
            paths {
                config-dir "/srv/certs"
                logs-dir "/srv/logs"
            }
            acme {
                email "admin@example.com"
                agree-tos #true
                renew-before-days 21
            }
            plugins {
                authenticator "webroot"
                webroot-path "/var/www/html"
                installer "command"
                reload-command "systemctl reload nginx"
            }
            "#,
        )
        .unwrap();

        assert_eq!(config.config_dir, PathBuf::from("/srv/certs"));
        assert_eq!(config.logs_dir, PathBuf::from("/srv/logs"));
        assert_eq!(config.email.as_deref(), Some("admin@example.com"));
        assert!(config.agree_tos);
        assert_eq!(config.renew_before_days, 21);
        assert_eq!(config.authenticator.as_deref(), Some("webroot"));
        assert_eq!(config.webroot_path, Some(PathBuf::from("/var/www/html")));
        assert_eq!(
            config.reload_command.as_deref(),
            Some("systemctl reload nginx")
        );
    }

    #[test]
    fn test_staging_flag_selects_staging_server() {
        let config = parse("acme {\n    staging #true\n}").unwrap();
        assert_eq!(config.server, directories::LETS_ENCRYPT_STAGING);
    }

    #[test]
    fn test_staging_and_server_conflict() {
        let err = parse("acme {\n    staging #true\n    server \"https://ca.example/dir\"\n}")
            .unwrap_err();
        assert!(err.to_string().contains("mutually exclusive"));
    }

    #[test]
    fn test_unknown_block_rejected() {
        let err = parse("listeners {\n}").unwrap_err();
        assert!(err.to_string().contains("Unknown configuration block"));
    }

    #[test]
    fn test_negative_renew_window_rejected() {
        assert!(parse("acme {\n    renew-before-days -3\n}").is_err());
    }

    #[test]
    fn test_parse_error_is_rendered() {
        let err = parse("acme {\n    email \"unterminated\n}").unwrap_err();
        assert!(err.to_string().contains("KDL configuration parse error"));
    }
}
