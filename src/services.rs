//! Background task lifecycle management.
//!
//! `BackgroundServices` owns the periodic tasks spawned at startup and aborts
//! them on shutdown:
//! 1. Event extractor: pulls new IDS events every few seconds and feeds the
//!    notification gate.
//! 2. Event pruner: hourly sweep of alerts/flows past the retention window.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::commands::{events, AppState};
use crate::config;

pub struct BackgroundServices {
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundServices {
    /// Spawn the extraction and pruning loops on the current runtime.
    pub fn start(state: &Arc<AppState>) -> Self {
        let handles = vec![
            Self::start_extractor(Arc::clone(state)),
            Self::start_pruner(Arc::clone(state)),
        ];
        Self { handles }
    }

    fn start_extractor(state: Arc<AppState>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(config::EXTRACT_INTERVAL_SECS));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = events::extract_events(&state).await {
                    tracing::warn!("Event extraction failed: {e}");
                }
            }
        })
    }

    fn start_pruner(state: Arc<AppState>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(config::PRUNE_INTERVAL_SECS));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = state.database.prune_old_events(config::EVENT_RETENTION_DAYS) {
                    tracing::warn!("Event pruning failed: {e}");
                }
            }
        })
    }

    /// Abort every background task. Idempotent.
    pub fn shutdown(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }
}

impl Drop for BackgroundServices {
    fn drop(&mut self) {
        self.shutdown();
    }
}
