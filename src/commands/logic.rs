//! Pure validation logic extracted from the facade handlers.
//!
//! These functions take plain parameters and no shared state, so they are
//! unit-testable without a runtime.

use std::str::FromStr;

use ipnetwork::IpNetwork;

use crate::config;
use crate::db::{Department, FirewallRule, NotificationSettings};
use crate::error::AppError;

/// Rule names end up in OS firewall commands, so they are kept to a safe
/// character set.
pub fn validate_rule_name(name: &str) -> Result<(), AppError> {
    if name.trim().is_empty() {
        return Err(AppError::InvalidField("rule name must not be empty".into()));
    }
    if name.len() > 255 {
        return Err(AppError::InvalidField(
            "rule name must be at most 255 characters".into(),
        ));
    }
    if name.chars().any(|c| c.is_control() || c == '"' || c == '|') {
        return Err(AppError::InvalidField(
            "rule name contains forbidden characters".into(),
        ));
    }
    Ok(())
}

pub fn validate_rule(rule: &FirewallRule) -> Result<(), AppError> {
    validate_rule_name(&rule.name)?;
    if rule.port == Some(0) {
        return Err(AppError::InvalidField("port must be between 1 and 65535".into()));
    }
    if let Some(path) = &rule.application_path {
        if path.trim().is_empty() {
            return Err(AppError::InvalidField(
                "application path must not be empty when given".into(),
            ));
        }
    }
    Ok(())
}

/// Normalize and validate a domain name. Returns the lowercased form used as
/// the canonical key everywhere downstream.
pub fn normalize_domain(raw: &str) -> Result<String, AppError> {
    let domain = raw.trim().trim_end_matches('.').to_ascii_lowercase();
    if domain.is_empty() || domain.len() > 253 {
        return Err(AppError::InvalidField(format!("invalid domain: {raw}")));
    }
    if domain.contains("://") || domain.contains('/') || domain.contains(' ') {
        return Err(AppError::InvalidField(format!(
            "expected a bare domain name, got: {raw}"
        )));
    }
    if !domain.contains('.') {
        return Err(AppError::InvalidField(format!(
            "domain must contain at least one dot: {raw}"
        )));
    }
    for label in domain.split('.') {
        let valid = !label.is_empty()
            && label.len() <= 63
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
            && !label.starts_with('-')
            && !label.ends_with('-');
        if !valid {
            return Err(AppError::InvalidField(format!("invalid domain: {raw}")));
        }
    }
    Ok(domain)
}

pub fn validate_department(dept: &Department) -> Result<(), AppError> {
    if dept.name.trim().is_empty() {
        return Err(AppError::InvalidField(
            "department name must not be empty".into(),
        ));
    }
    IpNetwork::from_str(&dept.subnet)
        .map_err(|e| AppError::InvalidField(format!("invalid subnet {}: {e}", dept.subnet)))?;
    Ok(())
}

pub fn validate_settings(settings: &NotificationSettings) -> Result<(), AppError> {
    let delay = settings.domain_blocked_delay_seconds;
    if !delay.is_finite() || delay < 0.0 {
        return Err(AppError::InvalidField(
            "notification delay must be a non-negative number".into(),
        ));
    }
    if settings.cooldown_seconds < config::MIN_COOLDOWN_SECS {
        return Err(AppError::InvalidField(format!(
            "cooldown must be at least {} seconds",
            config::MIN_COOLDOWN_SECS
        )));
    }
    Ok(())
}
