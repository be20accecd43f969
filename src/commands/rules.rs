//! Firewall rule and blocked-domain facade operations.
//!
//! Mutations follow enforce-then-persist: the OS effect is attempted first
//! and the store is only written once enforcement succeeds, so a rule the
//! store reports as present is actually in force. Each mutation serializes
//! on a per-key lock; reads take no lock.

use crate::db::{self, BlockedDomain, FirewallRule};
use crate::error::AppError;

use super::logic;
use super::state::AppState;

fn enforcement_failed(e: anyhow::Error) -> AppError {
    AppError::EnforcementFailed(e.to_string())
}

/// Create a rule and enforce it. Names are unique.
pub async fn add_firewall_rule(state: &AppState, rule: FirewallRule) -> Result<(), AppError> {
    logic::validate_rule(&rule)?;
    let lock = state.key_lock(&format!("rule:{}", rule.name));
    let _guard = lock.lock().await;

    if state.database.rule_exists(&rule.name)? {
        return Err(AppError::DuplicateName(format!(
            "a rule named '{}' already exists",
            rule.name
        )));
    }

    state.enforcer.apply_rule(&rule).map_err(enforcement_failed)?;
    if let Err(e) = state.database.insert_rule(&rule) {
        // Enforced but not persisted: undo the OS effect before reporting.
        if let Err(retract_err) = state.enforcer.retract_rule(&rule.name) {
            tracing::error!(
                "Rule '{}' could not be retracted after a store failure: {retract_err}",
                rule.name
            );
        }
        return Err(e.into());
    }
    tracing::info!("Added firewall rule '{}'", rule.name);
    Ok(())
}

/// Delete a rule and retract its enforcement.
pub async fn remove_firewall_rule(state: &AppState, name: &str) -> Result<(), AppError> {
    let lock = state.key_lock(&format!("rule:{name}"));
    let _guard = lock.lock().await;

    let Some(rule) = state.database.get_rule(name)? else {
        return Err(AppError::NotFound(format!("no rule named '{name}'")));
    };

    state
        .enforcer
        .retract_rule(&rule.name)
        .map_err(enforcement_failed)?;
    state.database.delete_rule(name)?;
    tracing::info!("Removed firewall rule '{name}'");
    Ok(())
}

/// Toggle a rule. Re-applies the rule so the OS state tracks the flag.
pub async fn set_rule_enabled(state: &AppState, name: &str, enabled: bool) -> Result<(), AppError> {
    let lock = state.key_lock(&format!("rule:{name}"));
    let _guard = lock.lock().await;

    let Some(mut rule) = state.database.get_rule(name)? else {
        return Err(AppError::NotFound(format!("no rule named '{name}'")));
    };
    rule.enabled = enabled;

    state.enforcer.apply_rule(&rule).map_err(enforcement_failed)?;
    state.database.set_rule_enabled(name, enabled)?;
    tracing::info!(
        "Firewall rule '{name}' {}",
        if enabled { "enabled" } else { "disabled" }
    );
    Ok(())
}

pub async fn get_firewall_rules(state: &AppState) -> Result<Vec<FirewallRule>, AppError> {
    Ok(state.database.list_rules()?)
}

/// Sinkhole a domain. Blocking an already-blocked domain is a no-op.
pub async fn block_domain(state: &AppState, domain: &str) -> Result<(), AppError> {
    let domain = logic::normalize_domain(domain)?;
    let lock = state.key_lock(&format!("domain:{domain}"));
    let _guard = lock.lock().await;

    if state.database.blocked_domain_exists(&domain)? {
        return Ok(());
    }

    let addresses = state
        .enforcer
        .block_domain(&domain)
        .map_err(enforcement_failed)?;
    let record = BlockedDomain {
        domain: domain.clone(),
        created_at: db::unix_timestamp(),
        addresses,
    };
    if let Err(e) = state.database.insert_blocked_domain(&record) {
        if let Err(unblock_err) = state.enforcer.unblock_domain(&domain) {
            tracing::error!(
                "Domain '{domain}' could not be unblocked after a store failure: {unblock_err}"
            );
        }
        return Err(e.into());
    }
    tracing::info!("Blocked domain '{domain}'");
    Ok(())
}

/// Remove a domain from the sinkhole. Unblocking an unknown domain is a no-op.
pub async fn unblock_domain(state: &AppState, domain: &str) -> Result<(), AppError> {
    let domain = logic::normalize_domain(domain)?;
    let lock = state.key_lock(&format!("domain:{domain}"));
    let _guard = lock.lock().await;

    if !state.database.blocked_domain_exists(&domain)? {
        return Ok(());
    }

    state
        .enforcer
        .unblock_domain(&domain)
        .map_err(enforcement_failed)?;
    state.database.delete_blocked_domain(&domain)?;
    tracing::info!("Unblocked domain '{domain}'");
    Ok(())
}

pub async fn get_blocked_domains(state: &AppState) -> Result<Vec<BlockedDomain>, AppError> {
    Ok(state.database.list_blocked_domains()?)
}
