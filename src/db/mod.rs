//! SQLite persistence layer for policy state and IDS events.
//!
//! Uses `rusqlite` with bundled SQLite. Handles:
//! - Firewall rules and blocked domains (single source of truth for the enforcer)
//! - Network segmentation: departments, devices, inter-department rules
//! - Alert/flow events extracted from the IDS log, plus the extraction cursor
//! - Notification settings
//! - Auto-pruning of events older than the retention window

mod events;
mod rules;
mod segments;

use std::path::Path;
use std::sync::Mutex;

use anyhow::Result;
use rusqlite::Connection;

pub use events::{AlertEvent, AlertPage, AlertQuery, FlowRecord, NotificationSettings};
pub use rules::{BlockedDomain, Direction, FirewallRule, Protocol, RuleAction};
pub use segments::{ConnDirection, ConnectionRule, Department, SegmentProtocol};

/// Manages the SQLite database holding all persisted service state.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create the database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database. Used by tests and dry-run hosts.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS firewall_rules (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            description TEXT NOT NULL DEFAULT '',
            application_path TEXT,
            port INTEGER,
            protocol TEXT NOT NULL,
            direction TEXT NOT NULL,
            action TEXT NOT NULL,
            enabled INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS blocked_domains (
            domain TEXT PRIMARY KEY,
            created_at INTEGER NOT NULL,
            addresses TEXT NOT NULL DEFAULT '[]'
        );

        CREATE TABLE IF NOT EXISTS departments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            subnet TEXT NOT NULL,
            protocol TEXT NOT NULL,
            action TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT ''
        );

        CREATE TABLE IF NOT EXISTS devices (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            department_id INTEGER NOT NULL REFERENCES departments(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            UNIQUE(department_id, name)
        );

        CREATE TABLE IF NOT EXISTS connection_rules (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            from_department TEXT NOT NULL,
            to_department TEXT NOT NULL,
            port INTEGER,
            direction TEXT NOT NULL,
            action TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS alert_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp INTEGER NOT NULL,
            src_ip TEXT,
            dest_ip TEXT,
            src_port INTEGER,
            dest_port INTEGER,
            signature TEXT,
            category TEXT,
            severity INTEGER NOT NULL DEFAULT 3
        );
        CREATE INDEX IF NOT EXISTS idx_alert_timestamp ON alert_events(timestamp);
        CREATE INDEX IF NOT EXISTS idx_alert_severity ON alert_events(severity);

        CREATE TABLE IF NOT EXISTS flow_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            start_ts INTEGER NOT NULL,
            end_ts INTEGER NOT NULL,
            src_ip TEXT NOT NULL,
            dest_ip TEXT NOT NULL,
            src_port INTEGER NOT NULL,
            dest_port INTEGER NOT NULL,
            protocol TEXT NOT NULL,
            bytes_toserver INTEGER NOT NULL DEFAULT 0,
            bytes_toclient INTEGER NOT NULL DEFAULT 0,
            pkts_toserver INTEGER NOT NULL DEFAULT 0,
            pkts_toclient INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_flow_start ON flow_events(start_ts);

        CREATE TABLE IF NOT EXISTS event_cursor (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            byte_offset INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS notification_settings (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            delay_seconds REAL NOT NULL,
            cooldown_seconds INTEGER NOT NULL,
            enabled INTEGER NOT NULL
        );
        ",
    )?;

    // WAL for concurrent reads; FK enforcement for the device cascade.
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(())
}

/// Current Unix timestamp in seconds.
pub fn unix_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}
