//! Network segmentation facade: departments, devices, and the allow/block
//! policies between them.
//!
//! Segmentation is planning-level state consumed by the UI topology view; it
//! is persisted but not pushed to the OS enforcer.

use crate::db::{ConnectionRule, Department};
use crate::error::AppError;

use super::logic;
use super::state::AppState;

/// Create a department (with any initial devices). Names are unique.
pub async fn add_department(state: &AppState, dept: Department) -> Result<(), AppError> {
    logic::validate_department(&dept)?;
    if state.database.department_exists(&dept.name)? {
        return Err(AppError::DuplicateName(format!(
            "a department named '{}' already exists",
            dept.name
        )));
    }
    state.database.insert_department(&dept)?;
    tracing::info!("Added department '{}' ({})", dept.name, dept.subnet);
    Ok(())
}

/// Delete a department, its devices, and every connection rule touching it.
pub async fn remove_department(state: &AppState, name: &str) -> Result<(), AppError> {
    if !state.database.delete_department(name)? {
        return Err(AppError::NotFound(format!("no department named '{name}'")));
    }
    tracing::info!("Removed department '{name}'");
    Ok(())
}

pub async fn get_departments(state: &AppState) -> Result<Vec<Department>, AppError> {
    Ok(state.database.list_departments()?)
}

/// Attach a device to a department. Re-adding an existing device is a no-op.
pub async fn add_device(state: &AppState, department: &str, device: &str) -> Result<(), AppError> {
    if device.trim().is_empty() {
        return Err(AppError::InvalidField("device name must not be empty".into()));
    }
    if !state.database.insert_device(department, device)? {
        return Err(AppError::NotFound(format!(
            "no department named '{department}'"
        )));
    }
    Ok(())
}

pub async fn remove_device(
    state: &AppState,
    department: &str,
    device: &str,
) -> Result<(), AppError> {
    if state.database.delete_device(department, device)? == 0 {
        return Err(AppError::NotFound(format!(
            "no device '{device}' in department '{department}'"
        )));
    }
    Ok(())
}

/// Create a connection policy between two existing departments.
pub async fn add_connection_rule(state: &AppState, rule: ConnectionRule) -> Result<(), AppError> {
    if rule.port == Some(0) {
        return Err(AppError::InvalidField("port must be between 1 and 65535".into()));
    }
    for dept in [&rule.from, &rule.to] {
        if !state.database.department_exists(dept)? {
            return Err(AppError::NotFound(format!("no department named '{dept}'")));
        }
    }
    state.database.insert_connection_rule(&rule)?;
    tracing::info!("Added connection rule {} -> {}", rule.from, rule.to);
    Ok(())
}

pub async fn get_connection_rules(state: &AppState) -> Result<Vec<ConnectionRule>, AppError> {
    Ok(state.database.list_connection_rules()?)
}

/// Remove a connection rule by its position in the listed order.
pub async fn remove_connection_rule(state: &AppState, index: usize) -> Result<(), AppError> {
    let ids = state.database.connection_rule_ids()?;
    let Some(id) = ids.get(index) else {
        return Err(AppError::NotFound(format!(
            "no connection rule at index {index}"
        )));
    };
    state.database.delete_connection_rule(*id)?;
    tracing::info!("Removed connection rule at index {index}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::state::tests::test_state;
    use super::*;
    use crate::db::{ConnDirection, RuleAction, SegmentProtocol};

    fn make_dept(name: &str, subnet: &str) -> Department {
        Department {
            name: name.to_string(),
            subnet: subnet.to_string(),
            protocol: SegmentProtocol::All,
            action: RuleAction::Allow,
            description: String::new(),
            devices: vec![],
        }
    }

    fn make_conn(from: &str, to: &str) -> ConnectionRule {
        ConnectionRule {
            from: from.to_string(),
            to: to.to_string(),
            port: Some(443),
            direction: ConnDirection::Both,
            action: RuleAction::Allow,
        }
    }

    #[tokio::test]
    async fn test_department_lifecycle() {
        let (state, _enforcer, _tmp) = test_state();

        add_department(&state, make_dept("Engineering", "10.1.0.0/16")).await.unwrap();
        add_device(&state, "Engineering", "build-server").await.unwrap();
        add_device(&state, "Engineering", "build-server").await.unwrap();

        let depts = get_departments(&state).await.unwrap();
        assert_eq!(depts.len(), 1);
        assert_eq!(depts[0].devices, vec!["build-server"]);

        remove_device(&state, "Engineering", "build-server").await.unwrap();
        remove_department(&state, "Engineering").await.unwrap();
        assert!(get_departments(&state).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_department_rejected() {
        let (state, _enforcer, _tmp) = test_state();
        add_department(&state, make_dept("Sales", "10.2.0.0/16")).await.unwrap();
        let err = add_department(&state, make_dept("Sales", "10.3.0.0/16"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "DuplicateName");
    }

    #[tokio::test]
    async fn test_invalid_subnet_rejected() {
        let (state, _enforcer, _tmp) = test_state();
        let err = add_department(&state, make_dept("Bad", "10.1.0.0/99"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "InvalidField");
    }

    #[tokio::test]
    async fn test_device_errors() {
        let (state, _enforcer, _tmp) = test_state();
        let err = add_device(&state, "Missing", "laptop").await.unwrap_err();
        assert_eq!(err.kind(), "NotFound");

        add_department(&state, make_dept("HR", "10.4.0.0/24")).await.unwrap();
        let err = remove_device(&state, "HR", "nonexistent").await.unwrap_err();
        assert_eq!(err.kind(), "NotFound");
        let err = add_device(&state, "HR", "  ").await.unwrap_err();
        assert_eq!(err.kind(), "InvalidField");
    }

    #[tokio::test]
    async fn test_connection_rules_and_cascade() {
        let (state, _enforcer, _tmp) = test_state();
        add_department(&state, make_dept("A", "10.1.0.0/24")).await.unwrap();
        add_department(&state, make_dept("B", "10.2.0.0/24")).await.unwrap();

        add_connection_rule(&state, make_conn("A", "B")).await.unwrap();
        add_connection_rule(&state, make_conn("B", "A")).await.unwrap();
        assert_eq!(get_connection_rules(&state).await.unwrap().len(), 2);

        let err = add_connection_rule(&state, make_conn("A", "Ghost"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "NotFound");

        remove_connection_rule(&state, 0).await.unwrap();
        let remaining = get_connection_rules(&state).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].from, "B");

        // Deleting a department sweeps the rules that reference it.
        remove_department(&state, "A").await.unwrap();
        assert!(get_connection_rules(&state).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_connection_rule_out_of_range() {
        let (state, _enforcer, _tmp) = test_state();
        let err = remove_connection_rule(&state, 0).await.unwrap_err();
        assert_eq!(err.kind(), "NotFound");
    }
}
