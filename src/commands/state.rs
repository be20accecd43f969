//! Shared application state threaded through every facade operation.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::core::{EventAggregator, IdsSupervisor, NotificationGate, PolicyEnforcer};
use crate::db::Database;

/// Shared application state for the command facade.
pub struct AppState {
    pub database: Arc<Database>,
    pub enforcer: Arc<dyn PolicyEnforcer>,
    pub supervisor: Arc<IdsSupervisor>,
    pub aggregator: Arc<EventAggregator>,
    pub gate: NotificationGate,
    /// Per-key mutation locks so concurrent operations on the same rule or
    /// domain serialize while unrelated keys proceed in parallel.
    key_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl AppState {
    pub fn new(
        database: Arc<Database>,
        enforcer: Arc<dyn PolicyEnforcer>,
        supervisor: Arc<IdsSupervisor>,
        aggregator: Arc<EventAggregator>,
        gate: NotificationGate,
    ) -> Self {
        Self {
            database,
            enforcer,
            supervisor,
            aggregator,
            gate,
            key_locks: DashMap::new(),
        }
    }

    /// Lock handle for a mutation key (`rule:<name>` or `domain:<name>`).
    pub(crate) fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        self.key_locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
