//! IDS process lifecycle: spawn, monitor, terminate.
//!
//! The supervisor owns at most one IDS child process and tracks its lifecycle
//! through [`IdsState`]. A monitor task polls the child and flips the state to
//! `Stopped` (clean exit or kill) or `Failed` (non-zero exit) the moment the
//! process disappears, so status queries never report a phantom process.

use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use sysinfo::{ProcessesToUpdate, System};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use crate::config;
use crate::error::AppError;

/// Lifecycle states of the supervised IDS process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IdsState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

/// How to launch and monitor the IDS engine.
#[derive(Debug, Clone)]
pub struct IdsConfig {
    /// IDS binary, e.g. `suricata`.
    pub program: PathBuf,
    /// Arguments passed verbatim (config file, interface, log directory).
    pub args: Vec<String>,
    /// Process name used to detect instances not launched by us.
    pub process_name: String,
    /// When true, an externally running IDS counts as active.
    pub detect_external: bool,
}

impl IdsConfig {
    pub fn suricata(config_path: &str, interface: &str, log_dir: &str) -> Self {
        Self {
            program: PathBuf::from("suricata"),
            args: vec![
                "-c".into(),
                config_path.into(),
                "-i".into(),
                interface.into(),
                "-l".into(),
                log_dir.into(),
            ],
            process_name: "suricata".into(),
            detect_external: true,
        }
    }
}

struct Inner {
    state: IdsState,
    child: Option<Child>,
    /// Incremented on every run(); a monitor task only acts while its
    /// generation is current, so a stale monitor cannot clobber a restart.
    generation: u64,
    last_error: Option<String>,
}

/// Supervises a single IDS engine process.
pub struct IdsSupervisor {
    config: IdsConfig,
    inner: Arc<Mutex<Inner>>,
}

impl IdsSupervisor {
    pub fn new(config: IdsConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(Inner {
                state: IdsState::Stopped,
                child: None,
                generation: 0,
                last_error: None,
            })),
        }
    }

    /// Launch the IDS process. Only legal from `Stopped` or `Failed`.
    pub async fn run(&self) -> Result<(), AppError> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            IdsState::Stopped | IdsState::Failed => {}
            state => {
                return Err(AppError::AlreadyRunning(format!(
                    "IDS is {}",
                    state_name(state)
                )));
            }
        }

        inner.state = IdsState::Starting;
        inner.last_error = None;
        inner.generation += 1;
        let generation = inner.generation;

        let spawned = Command::new(&self.config.program)
            .args(&self.config.args)
            .kill_on_drop(true)
            .spawn();
        let child = match spawned {
            Ok(child) => child,
            Err(e) => {
                inner.state = IdsState::Failed;
                let message = format!("failed to launch {}: {e}", self.config.program.display());
                inner.last_error = Some(message.clone());
                return Err(AppError::Io(message));
            }
        };

        tracing::info!(
            pid = child.id().unwrap_or(0),
            program = %self.config.program.display(),
            "IDS process launched"
        );
        inner.child = Some(child);
        inner.state = IdsState::Running;
        drop(inner);

        let monitor = Arc::clone(&self.inner);
        tokio::spawn(async move {
            monitor_child(monitor, generation).await;
        });
        Ok(())
    }

    /// Terminate the IDS process. No-op when nothing is running.
    pub async fn kill(&self) -> Result<(), AppError> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            IdsState::Starting | IdsState::Running => {}
            _ => return Ok(()),
        }
        inner.state = IdsState::Stopping;
        let mut child = inner.child.take();
        // Invalidate the monitor so it does not race the kill.
        inner.generation += 1;
        drop(inner);

        if let Some(child) = child.as_mut() {
            if let Err(e) = child.kill().await {
                tracing::warn!("IDS kill failed: {e}");
            }
            let _ = child.wait().await;
        }

        let mut inner = self.inner.lock().await;
        inner.state = IdsState::Stopped;
        tracing::info!("IDS process terminated");
        Ok(())
    }

    /// Whether the IDS is active: our supervised child, or (when configured)
    /// an instance started outside the service.
    pub async fn is_active(&self) -> bool {
        let state = self.inner.lock().await.state;
        if matches!(state, IdsState::Starting | IdsState::Running) {
            return true;
        }
        self.config.detect_external && self.external_running()
    }

    pub async fn state(&self) -> IdsState {
        self.inner.lock().await.state
    }

    /// Why the last run ended in `Failed`, if it did.
    pub async fn last_error(&self) -> Option<String> {
        self.inner.lock().await.last_error.clone()
    }

    fn external_running(&self) -> bool {
        let mut sys = System::new();
        sys.refresh_processes(ProcessesToUpdate::All, true);
        let found = sys
            .processes_by_name(OsStr::new(&self.config.process_name))
            .next()
            .is_some();
        found
    }
}

/// Poll the child until it exits, then record the outcome. Stops acting as
/// soon as its generation goes stale (kill or restart happened).
async fn monitor_child(inner: Arc<Mutex<Inner>>, generation: u64) {
    loop {
        tokio::time::sleep(Duration::from_millis(config::IDS_POLL_INTERVAL_MS)).await;
        let mut guard = inner.lock().await;
        if guard.generation != generation {
            return;
        }
        let Some(child) = guard.child.as_mut() else {
            return;
        };
        match child.try_wait() {
            Ok(None) => {}
            Ok(Some(status)) => {
                guard.child = None;
                if status.success() {
                    guard.state = IdsState::Stopped;
                    tracing::info!("IDS process exited cleanly");
                } else {
                    guard.state = IdsState::Failed;
                    let message = format!("IDS process exited: {status}");
                    tracing::warn!("{message}");
                    guard.last_error = Some(message);
                }
                return;
            }
            Err(e) => {
                guard.child = None;
                guard.state = IdsState::Failed;
                let message = format!("IDS monitor error: {e}");
                tracing::warn!("{message}");
                guard.last_error = Some(message);
                return;
            }
        }
    }
}

fn state_name(state: IdsState) -> &'static str {
    match state {
        IdsState::Stopped => "stopped",
        IdsState::Starting => "starting",
        IdsState::Running => "running",
        IdsState::Stopping => "stopping",
        IdsState::Failed => "failed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sleeper(seconds: &str) -> IdsConfig {
        IdsConfig {
            program: PathBuf::from("/bin/sleep"),
            args: vec![seconds.to_string()],
            process_name: "netsentry-test-nonexistent".into(),
            detect_external: false,
        }
    }

    fn failing() -> IdsConfig {
        IdsConfig {
            program: PathBuf::from("/bin/false"),
            args: vec![],
            process_name: "netsentry-test-nonexistent".into(),
            detect_external: false,
        }
    }

    #[tokio::test]
    async fn test_run_then_kill() {
        let sup = IdsSupervisor::new(sleeper("30"));
        assert_eq!(sup.state().await, IdsState::Stopped);
        sup.run().await.unwrap();
        assert_eq!(sup.state().await, IdsState::Running);
        assert!(sup.is_active().await);
        sup.kill().await.unwrap();
        assert_eq!(sup.state().await, IdsState::Stopped);
        assert!(!sup.is_active().await);
    }

    #[tokio::test]
    async fn test_run_while_running_is_rejected() {
        let sup = IdsSupervisor::new(sleeper("30"));
        sup.run().await.unwrap();
        let err = sup.run().await.unwrap_err();
        assert_eq!(err.kind(), "AlreadyRunning");
        sup.kill().await.unwrap();
    }

    #[tokio::test]
    async fn test_external_detection_scans_the_process_table() {
        let sup = IdsSupervisor::new(IdsConfig {
            program: PathBuf::from("/bin/sleep"),
            args: vec!["30".into()],
            process_name: "netsentry-test-nonexistent".into(),
            detect_external: true,
        });
        // Nothing by that name is running, so the scan reports inactive.
        assert!(!sup.is_active().await);
    }

    #[tokio::test]
    async fn test_kill_when_stopped_is_noop() {
        let sup = IdsSupervisor::new(sleeper("30"));
        sup.kill().await.unwrap();
        assert_eq!(sup.state().await, IdsState::Stopped);
    }

    #[tokio::test]
    async fn test_missing_binary_fails() {
        let sup = IdsSupervisor::new(IdsConfig {
            program: PathBuf::from("/nonexistent/netsentry-ids"),
            args: vec![],
            process_name: "netsentry-test-nonexistent".into(),
            detect_external: false,
        });
        let err = sup.run().await.unwrap_err();
        assert_eq!(err.kind(), "Io");
        assert_eq!(sup.state().await, IdsState::Failed);
        assert!(sup.last_error().await.is_some());
    }

    #[tokio::test]
    async fn test_crash_is_detected_and_restartable() {
        let sup = IdsSupervisor::new(failing());
        sup.run().await.unwrap();
        // The monitor polls every IDS_POLL_INTERVAL_MS; give it a few rounds.
        for _ in 0..20 {
            if sup.state().await == IdsState::Failed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        assert_eq!(sup.state().await, IdsState::Failed);
        assert!(sup.last_error().await.is_some());

        // Failed is a restartable state.
        let sup2 = IdsSupervisor::new(sleeper("30"));
        sup2.run().await.unwrap();
        sup2.kill().await.unwrap();
    }

    #[tokio::test]
    async fn test_clean_exit_returns_to_stopped() {
        let sup = IdsSupervisor::new(sleeper("0"));
        sup.run().await.unwrap();
        for _ in 0..20 {
            if sup.state().await == IdsState::Stopped {
                break;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        assert_eq!(sup.state().await, IdsState::Stopped);
        assert!(sup.last_error().await.is_none());
    }
}
