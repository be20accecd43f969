//! NetSentry: security policy and event aggregation service.
//!
//! Backs a desktop security UI with firewall rule management, domain
//! blocking, network segmentation planning, IDS process supervision, and
//! alert/flow aggregation with rate-limited notifications. The UI bridge
//! calls into [`commands`]; [`SecurityService`] wires everything up.

pub mod commands;
pub mod config;
pub mod core;
pub mod db;
pub mod error;
pub mod services;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use commands::AppState;
use core::{EventAggregator, IdsConfig, IdsSupervisor, NotificationGate, OsEnforcer, PolicyEnforcer};
use services::BackgroundServices;

/// Install the tracing subscriber and a panic hook that records panics
/// before the default handler runs.
pub fn init_tracing() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!("PANIC in NetSentry: {info}");
        default_hook(info);
    }));

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "netsentry=info".into()),
        )
        .init();
}

/// Where the service keeps its state and how it reaches the host.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Directory for the database and generated reports.
    pub data_dir: PathBuf,
    /// Hosts file used for the domain sinkhole.
    pub hosts_path: PathBuf,
    /// The IDS event log to aggregate from.
    pub eve_log_path: PathBuf,
    pub ids: IdsConfig,
}

impl ServiceConfig {
    pub fn new(data_dir: PathBuf, eve_log_path: PathBuf, ids: IdsConfig) -> Self {
        Self {
            data_dir,
            hosts_path: default_hosts_path(),
            eve_log_path,
            ids,
        }
    }
}

fn default_hosts_path() -> PathBuf {
    #[cfg(windows)]
    {
        PathBuf::from(r"C:\Windows\System32\drivers\etc\hosts")
    }
    #[cfg(not(windows))]
    {
        PathBuf::from("/etc/hosts")
    }
}

/// The assembled service: shared state plus its background tasks.
pub struct SecurityService {
    state: Arc<AppState>,
    services: BackgroundServices,
}

impl SecurityService {
    /// Open the store, re-enforce persisted rules, and start the background
    /// loops. Must run inside a tokio runtime.
    pub async fn start(config: ServiceConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("creating {}", config.data_dir.display()))?;
        let db_path = config.data_dir.join(crate::config::DB_FILE_NAME);
        let database = Arc::new(db::Database::open(&db_path)?);
        tracing::info!("Database opened at {}", db_path.display());

        // Enforced state is rebuilt from the store at every startup so the OS
        // matches what the store reports even after a crash or reboot.
        let enforcer = Arc::new(OsEnforcer::new(config.hosts_path.clone()));
        let rules = database.list_rules()?;
        if let Err(e) = enforcer.restore(&rules) {
            tracing::warn!("Could not re-enforce {} persisted rules: {e}", rules.len());
        }

        let supervisor = Arc::new(IdsSupervisor::new(config.ids.clone()));
        let aggregator = Arc::new(EventAggregator::new(
            Arc::clone(&database),
            config.eve_log_path.clone(),
            config.data_dir.join(crate::config::REPORT_FILE_NAME),
        ));
        let gate = NotificationGate::new(database.load_notification_settings()?);

        let state = Arc::new(AppState::new(
            database,
            enforcer as Arc<dyn PolicyEnforcer>,
            supervisor,
            aggregator,
            gate,
        ));
        let services = BackgroundServices::start(&state);
        tracing::info!("NetSentry service started");
        Ok(Self { state, services })
    }

    /// Shared state for issuing facade operations.
    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Stop the background loops and terminate a supervised IDS process.
    pub async fn stop(&mut self) {
        self.services.shutdown();
        if let Err(e) = self.state.supervisor.kill().await {
            tracing::warn!("IDS shutdown failed: {e}");
        }
        tracing::info!("NetSentry service stopped");
    }
}
