//! Configuration file loading and parsing.

use std::path::Path;

use anyhow::{Context, Result};

use super::model::AppConfig;
use crate::error::ConfigError;
use crate::validation::{validate_config, SystemCapabilities, ValidationIssue};

/// Loads the configuration file from disk and parses it.
///
/// A missing file is an error; an empty file yields the defaults.
pub fn load_from_path(path: &Path) -> Result<AppConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed {
        path: path.to_path_buf(),
        source: e,
    })?;

    if content.trim().is_empty() {
        return Ok(AppConfig::default());
    }

    let config: AppConfig =
        serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    Ok(config)
}

/// Loads the configuration and validates it against the tools found on this machine.
pub fn load_detected(path: &Path) -> Result<(AppConfig, SystemCapabilities)> {
    let config = load_from_path(path).context("Failed to load configuration")?;
    let capabilities = SystemCapabilities::detect(&config);
    let config = validate_loaded(config, &capabilities)?;
    Ok((config, capabilities))
}

/// Loads and fully validates the configuration file.
pub fn load_and_validate(path: &Path, capabilities: &SystemCapabilities) -> Result<AppConfig> {
    let config = load_from_path(path).context("Failed to load configuration")?;
    validate_loaded(config, capabilities)
}

fn validate_loaded(config: AppConfig, capabilities: &SystemCapabilities) -> Result<AppConfig> {
    let result = validate_config(&config, capabilities);

    for issue in result.warnings() {
        tracing::warn!(
            path = %issue.path,
            message = %issue.message,
            suggestion = ?issue.suggestion,
            "Config validation warning"
        );
    }

    let errors: Vec<_> = result.errors().collect();
    if !errors.is_empty() {
        let report = format_validation_errors(&errors);
        tracing::error!("{}", report);
        anyhow::bail!(ConfigError::ValidationFailed {
            error_count: errors.len()
        });
    }

    Ok(config)
}

/// Formats validation errors into a human-readable report.
fn format_validation_errors(errors: &[&ValidationIssue]) -> String {
    let mut report = String::from("\nConfig Validation Failed\n");
    report.push_str("========================\n\n");

    for error in errors {
        report.push_str(&format!("ERROR {}\n", error.path));
        report.push_str(&format!("  └─ {}\n", error.message));
        if let Some(suggestion) = &error.suggestion {
            report.push_str(&format!("     {}\n", suggestion));
        }
        report.push('\n');
    }

    report.push_str(&format!(
        "---\n{} error(s)\nConfig rejected.\n",
        errors.len()
    ));

    report
}
