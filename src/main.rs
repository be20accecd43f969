use std::path::PathBuf;

use netsentry::core::IdsConfig;
use netsentry::{init_tracing, SecurityService, ServiceConfig};

fn env_path(var: &str, default: &str) -> PathBuf {
    std::env::var_os(var)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(default))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let suricata_config = std::env::var("NETSENTRY_SURICATA_CONFIG")
        .unwrap_or_else(|_| "/etc/suricata/suricata.yaml".into());
    let interface = std::env::var("NETSENTRY_INTERFACE").unwrap_or_else(|_| "eth0".into());
    let log_dir = std::env::var("NETSENTRY_SURICATA_LOG_DIR")
        .unwrap_or_else(|_| "/var/log/suricata".into());

    let config = ServiceConfig::new(
        env_path("NETSENTRY_DATA_DIR", "/var/lib/netsentry"),
        PathBuf::from(&log_dir).join("eve.json"),
        IdsConfig::suricata(&suricata_config, &interface, &log_dir),
    );

    let mut service = SecurityService::start(config).await?;
    tokio::signal::ctrl_c().await?;
    service.stop().await;
    Ok(())
}
