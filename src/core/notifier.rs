//! Rate-limited, optionally delayed user notifications.
//!
//! The gate sits between event detection and the UI: every candidate
//! notification passes a per-key cooldown, and blocked-domain notifications
//! can be delayed so a burst of alerts for the same domain collapses into a
//! single message. Delivery is a `tokio::sync::broadcast` channel the UI
//! layer subscribes to.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::db::NotificationSettings;

const CHANNEL_CAPACITY: usize = 64;

/// A user-facing notification as delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    /// Cooldown key, e.g. the blocked domain.
    pub key: String,
    pub message: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    DomainBlocked,
}

struct Inner {
    settings: RwLock<NotificationSettings>,
    /// Per-key time of the last delivered notification.
    last_emitted: DashMap<String, Instant>,
    /// Keys with a delayed notification in flight. Presence coalesces
    /// further requests for the same key.
    pending: DashMap<String, JoinHandle<()>>,
    tx: broadcast::Sender<Notification>,
}

/// Applies delay, coalescing, and cooldown to notification requests.
#[derive(Clone)]
pub struct NotificationGate {
    inner: Arc<Inner>,
}

impl NotificationGate {
    pub fn new(settings: NotificationSettings) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                settings: RwLock::new(settings),
                last_emitted: DashMap::new(),
                pending: DashMap::new(),
                tx,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.inner.tx.subscribe()
    }

    pub fn settings(&self) -> NotificationSettings {
        self.inner.settings.read().expect("settings lock").clone()
    }

    /// Replace the active settings. In-flight delayed notifications keep the
    /// delay and cooldown they were scheduled with.
    pub fn update_settings(&self, settings: NotificationSettings) {
        *self.inner.settings.write().expect("settings lock") = settings;
    }

    /// Request a "traffic to blocked domain" notification.
    ///
    /// Settings are snapshotted here. Zero delay delivers synchronously
    /// (subject to the cooldown); otherwise delivery is scheduled and any
    /// further request for the same domain inside the window is coalesced.
    pub fn notify_blocked_domain(&self, domain: &str) {
        let settings = self.settings();
        if !settings.enabled {
            return;
        }
        let cooldown = Duration::from_secs(settings.cooldown_seconds);
        let delay = Duration::from_secs_f64(settings.domain_blocked_delay_seconds.max(0.0));

        if delay.is_zero() {
            emit(&self.inner, domain, cooldown);
            return;
        }

        if self.inner.pending.contains_key(domain) {
            tracing::debug!("Notification for {domain} already pending, coalesced");
            return;
        }
        let inner = Arc::clone(&self.inner);
        let key = domain.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            emit(&inner, &key, cooldown);
            inner.pending.remove(&key);
        });
        self.inner.pending.insert(domain.to_string(), handle);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        for entry in self.pending.iter() {
            entry.value().abort();
        }
    }
}

fn emit(inner: &Inner, domain: &str, cooldown: Duration) {
    let now = Instant::now();
    if let Some(last) = inner.last_emitted.get(domain) {
        if now.duration_since(*last) < cooldown {
            tracing::debug!("Notification for {domain} suppressed by cooldown");
            return;
        }
    }
    inner.last_emitted.insert(domain.to_string(), now);
    let notification = Notification {
        kind: NotificationKind::DomainBlocked,
        key: domain.to_string(),
        message: format!("Blocked traffic to {domain} was detected"),
        timestamp: crate::db::unix_timestamp(),
    };
    tracing::info!("Notifying: {}", notification.message);
    // No subscribers is fine; the event is simply unobserved.
    let _ = inner.tx.send(notification);
}
