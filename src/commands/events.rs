//! Event facade: extraction, alert queries, and flow reports.

use serde::Serialize;

use crate::config;
use crate::core::aggregator::{match_blocked_domains, FlowReport};
use crate::db::{AlertPage, AlertQuery};
use crate::error::AppError;

use super::state::AppState;

/// Counts from one extraction pass.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractCounts {
    pub alerts: usize,
    pub flows: usize,
}

/// Pull new events out of the IDS log and request notifications for alerts
/// that hit a blocked domain. The background extraction loop calls this on a
/// timer; the UI can also trigger it for an immediate refresh.
pub async fn extract_events(state: &AppState) -> Result<ExtractCounts, AppError> {
    let summary = state.aggregator.extract()?;
    if !summary.alerts.is_empty() {
        let blocked = state.database.list_blocked_domains()?;
        for domain in match_blocked_domains(&summary.alerts, &blocked) {
            state.gate.notify_blocked_domain(&domain);
        }
    }
    Ok(ExtractCounts {
        alerts: summary.alerts.len(),
        flows: summary.flow_count,
    })
}

/// Every recorded alert, newest first. Prefer [`get_alerts`] for large
/// histories.
pub async fn read_alert_events(state: &AppState) -> Result<Vec<crate::db::AlertEvent>, AppError> {
    Ok(state.database.list_alerts()?)
}

/// One page of recorded alerts, newest first.
pub async fn get_alerts(state: &AppState, query: AlertQuery) -> Result<AlertPage, AppError> {
    Ok(state
        .database
        .read_alert_page(&query, config::ALERT_PAGE_SIZE)?)
}

/// Build and persist the top-talker report over a flow window.
pub async fn generate_flow_report(
    state: &AppState,
    from_ts: i64,
    to_ts: i64,
) -> Result<FlowReport, AppError> {
    if from_ts > to_ts {
        return Err(AppError::InvalidField(
            "report window start must not be after its end".into(),
        ));
    }
    state.aggregator.generate_report(from_ts, to_ts)
}

/// The last persisted flow report.
pub async fn get_flow_report(state: &AppState) -> Result<FlowReport, AppError> {
    state.aggregator.read_report()
}
