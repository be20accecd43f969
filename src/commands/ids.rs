//! IDS lifecycle facade.

use serde::Serialize;

use crate::core::IdsState;
use crate::error::AppError;

use super::state::AppState;

/// Snapshot of the IDS engine as shown in the UI.
#[derive(Debug, Clone, Serialize)]
pub struct IdsStatus {
    /// True when our child is alive or an external instance was detected.
    pub active: bool,
    pub state: IdsState,
    pub last_error: Option<String>,
}

/// Launch the IDS engine.
pub async fn run_ids(state: &AppState) -> Result<(), AppError> {
    state.supervisor.run().await
}

/// Terminate the IDS engine. Safe to call when it is not running.
pub async fn kill_ids(state: &AppState) -> Result<(), AppError> {
    state.supervisor.kill().await
}

/// Whether an IDS engine is currently active.
pub async fn is_ids_active(state: &AppState) -> Result<bool, AppError> {
    Ok(state.supervisor.is_active().await)
}

pub async fn ids_status(state: &AppState) -> Result<IdsStatus, AppError> {
    Ok(IdsStatus {
        active: state.supervisor.is_active().await,
        state: state.supervisor.state().await,
        last_error: state.supervisor.last_error().await,
    })
}
