//! Notification settings and subscription facade.

use tokio::sync::broadcast;

use crate::core::Notification;
use crate::db::NotificationSettings;
use crate::error::AppError;

use super::logic;
use super::state::AppState;

pub async fn get_notification_settings(state: &AppState) -> Result<NotificationSettings, AppError> {
    Ok(state.gate.settings())
}

/// Validate, persist, and activate new notification settings.
pub async fn set_notification_settings(
    state: &AppState,
    settings: NotificationSettings,
) -> Result<(), AppError> {
    logic::validate_settings(&settings)?;
    state.database.save_notification_settings(&settings)?;
    state.gate.update_settings(settings);
    tracing::info!("Notification settings updated");
    Ok(())
}

/// Subscribe to delivered notifications. Each subscriber gets every message
/// emitted after the subscription.
pub fn subscribe_notifications(state: &AppState) -> broadcast::Receiver<Notification> {
    state.gate.subscribe()
}

/// Manually request a domain-blocked notification. Goes through the same
/// delay/cooldown gate as automatic requests.
pub async fn show_domain_blocked_notification(
    state: &AppState,
    domain: &str,
) -> Result<(), AppError> {
    let domain = logic::normalize_domain(domain)?;
    state.gate.notify_blocked_domain(&domain);
    Ok(())
}
