//! Centralized runtime constants for netsentry.
//!
//! All tunable intervals, limits, and defaults are collected here so they can
//! be found and adjusted in a single place rather than scattered across modules.

/// Fixed page size for paginated alert reads.
pub const ALERT_PAGE_SIZE: usize = 1000;

/// Number of entries kept per dimension in a flow report.
pub const REPORT_TOP_N: usize = 5;

/// Default delay before a domain-blocked notification is shown (seconds).
pub const DEFAULT_NOTIFY_DELAY_SECS: f64 = 2.0;

/// Default minimum interval between repeated notifications for the same domain (seconds).
pub const DEFAULT_COOLDOWN_SECS: u64 = 30;

/// Lowest accepted cooldown when saving notification settings (seconds).
pub const MIN_COOLDOWN_SECS: u64 = 5;

/// Interval at which the background extractor drains the IDS event log (seconds).
pub const EXTRACT_INTERVAL_SECS: u64 = 5;

/// Interval at which stored alert/flow events are checked for pruning (seconds).
pub const PRUNE_INTERVAL_SECS: u64 = 3600;

/// Maximum age of stored alert/flow events before they are pruned (days).
pub const EVENT_RETENTION_DAYS: u64 = 90;

/// Interval at which the IDS supervisor polls its child for unexpected exit (milliseconds).
pub const IDS_POLL_INTERVAL_MS: u64 = 500;

/// Database file name under the service data directory.
pub const DB_FILE_NAME: &str = "netsentry.db";

/// Persisted flow report file name under the service data directory.
pub const REPORT_FILE_NAME: &str = "report.json";

/// Marker opening the managed sinkhole section of the hosts file.
pub const HOSTS_MARKER_BEGIN: &str = "# netsentry blocked domains -- begin";

/// Marker closing the managed sinkhole section of the hosts file.
pub const HOSTS_MARKER_END: &str = "# netsentry blocked domains -- end";

/// Address blocked domains are sinkholed to.
pub const SINKHOLE_ADDR: &str = "0.0.0.0";
