//! Alert/flow event tables, the extraction cursor, and notification settings.
//!
//! Extracted batches commit atomically together with the new cursor offset so
//! that an interrupted extraction can re-run without duplicating events.

use anyhow::Result;
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

use crate::config;

use super::Database;

/// A single recorded IDS alert. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub id: i64,
    /// Event time as Unix seconds.
    pub timestamp: i64,
    pub src_ip: Option<String>,
    pub dest_ip: Option<String>,
    pub src_port: Option<u16>,
    pub dest_port: Option<u16>,
    pub signature: Option<String>,
    pub category: Option<String>,
    /// 1 = high, 2 = medium, 3 = informational.
    pub severity: u8,
}

/// A recorded flow summary (5-tuple plus volume).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowRecord {
    pub start_ts: i64,
    pub end_ts: i64,
    pub src_ip: String,
    pub dest_ip: String,
    pub src_port: u16,
    pub dest_port: u16,
    pub protocol: String,
    pub bytes_toserver: u64,
    pub bytes_toclient: u64,
    pub pkts_toserver: u64,
    pub pkts_toclient: u64,
}

/// Parameters for a paginated alert read.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertQuery {
    pub page: usize,
    pub severity: Option<u8>,
    /// Highest alert id included in the snapshot. Page 0 establishes it;
    /// later pages pass it back so concurrent appends cannot shift the window.
    pub anchor_id: Option<i64>,
}

/// One page of alerts, newest first, plus the snapshot anchor.
#[derive(Debug, Clone, Serialize)]
pub struct AlertPage {
    pub events: Vec<AlertEvent>,
    pub page: usize,
    pub page_size: usize,
    pub total: u64,
    pub anchor_id: i64,
}

/// User-facing notification policy. Single persisted row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationSettings {
    pub domain_blocked_delay_seconds: f64,
    pub cooldown_seconds: u64,
    pub enabled: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        NotificationSettings {
            domain_blocked_delay_seconds: config::DEFAULT_NOTIFY_DELAY_SECS,
            cooldown_seconds: config::DEFAULT_COOLDOWN_SECS,
            enabled: true,
        }
    }
}

fn map_alert_row(row: &Row) -> rusqlite::Result<AlertEvent> {
    Ok(AlertEvent {
        id: row.get(0)?,
        timestamp: row.get(1)?,
        src_ip: row.get(2)?,
        dest_ip: row.get(3)?,
        src_port: row.get(4)?,
        dest_port: row.get(5)?,
        signature: row.get(6)?,
        category: row.get(7)?,
        severity: row.get(8)?,
    })
}

const ALERT_COLUMNS: &str =
    "id, timestamp, src_ip, dest_ip, src_port, dest_port, signature, category, severity";

impl Database {
    /// Commit one extracted batch: alerts, flows, and the new cursor offset,
    /// atomically.
    pub fn commit_event_batch(
        &self,
        alerts: &[AlertEvent],
        flows: &[FlowRecord],
        new_offset: u64,
    ) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        {
            let mut alert_stmt = tx.prepare_cached(
                "INSERT INTO alert_events
                     (timestamp, src_ip, dest_ip, src_port, dest_port, signature, category, severity)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for a in alerts {
                alert_stmt.execute(params![
                    a.timestamp,
                    a.src_ip,
                    a.dest_ip,
                    a.src_port,
                    a.dest_port,
                    a.signature,
                    a.category,
                    a.severity,
                ])?;
            }

            let mut flow_stmt = tx.prepare_cached(
                "INSERT INTO flow_events
                     (start_ts, end_ts, src_ip, dest_ip, src_port, dest_port, protocol,
                      bytes_toserver, bytes_toclient, pkts_toserver, pkts_toclient)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )?;
            for f in flows {
                flow_stmt.execute(params![
                    f.start_ts,
                    f.end_ts,
                    f.src_ip,
                    f.dest_ip,
                    f.src_port,
                    f.dest_port,
                    f.protocol,
                    f.bytes_toserver,
                    f.bytes_toclient,
                    f.pkts_toserver,
                    f.pkts_toclient,
                ])?;
            }

            tx.execute(
                "INSERT INTO event_cursor (id, byte_offset) VALUES (1, ?1)
                 ON CONFLICT(id) DO UPDATE SET byte_offset = ?1",
                params![new_offset as i64],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Byte offset into the IDS event log up to which extraction has committed.
    pub fn event_cursor(&self) -> Result<u64> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached("SELECT byte_offset FROM event_cursor WHERE id = 1")?;
        let mut rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
        match rows.next() {
            Some(offset) => Ok(offset? as u64),
            None => Ok(0),
        }
    }

    /// All recorded alerts, most recent first.
    pub fn list_alerts(&self) -> Result<Vec<AlertEvent>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {ALERT_COLUMNS} FROM alert_events ORDER BY timestamp DESC, id DESC"
        ))?;
        let rows = stmt.query_map([], map_alert_row)?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// A single page of alerts against a fixed snapshot anchor.
    pub fn read_alert_page(&self, query: &AlertQuery, page_size: usize) -> Result<AlertPage> {
        let conn = self.lock();

        let anchor_id = match query.anchor_id {
            Some(anchor) => anchor,
            None => conn.query_row(
                "SELECT COALESCE(MAX(id), 0) FROM alert_events",
                [],
                |row| row.get(0),
            )?,
        };

        // Severity is passed twice so a single SQL string covers the
        // filtered and unfiltered cases (NULL means no filter).
        let total: u64 = conn.query_row(
            "SELECT COUNT(*) FROM alert_events
             WHERE id <= ?1 AND (?2 IS NULL OR severity = ?2)",
            params![anchor_id, query.severity],
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {ALERT_COLUMNS} FROM alert_events
             WHERE id <= ?1 AND (?2 IS NULL OR severity = ?2)
             ORDER BY timestamp DESC, id DESC
             LIMIT ?3 OFFSET ?4"
        ))?;
        let rows = stmt.query_map(
            params![
                anchor_id,
                query.severity,
                page_size as i64,
                (query.page * page_size) as i64
            ],
            map_alert_row,
        )?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }

        Ok(AlertPage {
            events,
            page: query.page,
            page_size,
            total,
            anchor_id,
        })
    }

    /// Flow records whose start time falls inside `[from, to]`, in recorded order.
    pub fn query_flows(&self, from_ts: i64, to_ts: i64) -> Result<Vec<FlowRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT start_ts, end_ts, src_ip, dest_ip, src_port, dest_port, protocol,
                    bytes_toserver, bytes_toclient, pkts_toserver, pkts_toclient
             FROM flow_events
             WHERE start_ts >= ?1 AND start_ts <= ?2
             ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![from_ts, to_ts], |row| {
            Ok(FlowRecord {
                start_ts: row.get(0)?,
                end_ts: row.get(1)?,
                src_ip: row.get(2)?,
                dest_ip: row.get(3)?,
                src_port: row.get(4)?,
                dest_port: row.get(5)?,
                protocol: row.get(6)?,
                bytes_toserver: row.get(7)?,
                bytes_toclient: row.get(8)?,
                pkts_toserver: row.get(9)?,
                pkts_toclient: row.get(10)?,
            })
        })?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// Prune alert/flow events older than the given number of days.
    pub fn prune_old_events(&self, max_age_days: u64) -> Result<usize> {
        let cutoff = super::unix_timestamp() - (max_age_days * 86400) as i64;
        let conn = self.lock();
        let mut deleted = conn.execute(
            "DELETE FROM alert_events WHERE timestamp < ?1",
            params![cutoff],
        )?;
        deleted += conn.execute(
            "DELETE FROM flow_events WHERE end_ts < ?1",
            params![cutoff],
        )?;
        if deleted > 0 {
            tracing::info!("Pruned {deleted} events older than {max_age_days} days");
        }
        Ok(deleted)
    }

    // ---- Notification settings ----

    /// Load the persisted settings row, falling back to defaults.
    pub fn load_notification_settings(&self) -> Result<NotificationSettings> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT delay_seconds, cooldown_seconds, enabled
             FROM notification_settings WHERE id = 1",
        )?;
        let mut rows = stmt.query_map([], |row| {
            Ok(NotificationSettings {
                domain_blocked_delay_seconds: row.get(0)?,
                cooldown_seconds: row.get::<_, i64>(1)? as u64,
                enabled: row.get::<_, i64>(2)? != 0,
            })
        })?;
        match rows.next() {
            Some(settings) => Ok(settings?),
            None => Ok(NotificationSettings::default()),
        }
    }

    pub fn save_notification_settings(&self, settings: &NotificationSettings) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO notification_settings (id, delay_seconds, cooldown_seconds, enabled)
             VALUES (1, ?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                 delay_seconds = ?1, cooldown_seconds = ?2, enabled = ?3",
            params![
                settings.domain_blocked_delay_seconds,
                settings.cooldown_seconds as i64,
                settings.enabled as i64,
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::open_memory_db;
    use super::*;

    pub fn make_alert(ts: i64, severity: u8) -> AlertEvent {
        AlertEvent {
            id: 0,
            timestamp: ts,
            src_ip: Some("10.0.0.1".into()),
            dest_ip: Some("93.184.216.34".into()),
            src_port: Some(50000),
            dest_port: Some(443),
            signature: Some("ET POLICY test".into()),
            category: Some("Policy".into()),
            severity,
        }
    }

    fn make_flow(start: i64, src: &str) -> FlowRecord {
        FlowRecord {
            start_ts: start,
            end_ts: start + 10,
            src_ip: src.into(),
            dest_ip: "8.8.8.8".into(),
            src_port: 1234,
            dest_port: 53,
            protocol: "UDP".into(),
            bytes_toserver: 100,
            bytes_toclient: 200,
            pkts_toserver: 2,
            pkts_toclient: 2,
        }
    }

    #[test]
    fn test_commit_batch_persists_events_and_cursor() {
        let db = open_memory_db();
        assert_eq!(db.event_cursor().unwrap(), 0);

        let alerts = vec![make_alert(1000, 1), make_alert(1005, 2)];
        let flows = vec![make_flow(1000, "10.0.0.1")];
        db.commit_event_batch(&alerts, &flows, 4096).unwrap();

        assert_eq!(db.event_cursor().unwrap(), 4096);
        assert_eq!(db.list_alerts().unwrap().len(), 2);
        assert_eq!(db.query_flows(0, 2000).unwrap().len(), 1);

        // Re-committing with a later offset only moves the cursor forward.
        db.commit_event_batch(&[], &[], 8192).unwrap();
        assert_eq!(db.event_cursor().unwrap(), 8192);
        assert_eq!(db.list_alerts().unwrap().len(), 2);
    }

    #[test]
    fn test_list_alerts_newest_first() {
        let db = open_memory_db();
        let alerts = vec![make_alert(1000, 1), make_alert(3000, 2), make_alert(2000, 3)];
        db.commit_event_batch(&alerts, &[], 1).unwrap();

        let listed = db.list_alerts().unwrap();
        let timestamps: Vec<_> = listed.iter().map(|a| a.timestamp).collect();
        assert_eq!(timestamps, vec![3000, 2000, 1000]);
    }

    #[test]
    fn test_alert_pagination_no_overlap_no_gap() {
        let db = open_memory_db();
        let alerts: Vec<_> = (0..1500).map(|i| make_alert(i, 2)).collect();
        db.commit_event_batch(&alerts, &[], 1).unwrap();

        let page0 = db
            .read_alert_page(&AlertQuery::default(), 1000)
            .unwrap();
        assert_eq!(page0.events.len(), 1000);
        assert_eq!(page0.total, 1500);
        // Newest first.
        assert_eq!(page0.events[0].timestamp, 1499);

        let page1 = db
            .read_alert_page(
                &AlertQuery {
                    page: 1,
                    severity: None,
                    anchor_id: Some(page0.anchor_id),
                },
                1000,
            )
            .unwrap();
        assert_eq!(page1.events.len(), 500);

        let mut ids: Vec<i64> = page0
            .events
            .iter()
            .chain(page1.events.iter())
            .map(|a| a.id)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 1500, "pages must cover every alert exactly once");
    }

    #[test]
    fn test_alert_pagination_stable_under_appends() {
        let db = open_memory_db();
        let alerts: Vec<_> = (0..10).map(|i| make_alert(i, 2)).collect();
        db.commit_event_batch(&alerts, &[], 1).unwrap();

        let page0 = db.read_alert_page(&AlertQuery::default(), 6).unwrap();
        assert_eq!(page0.events.len(), 6);

        // Concurrent append between page requests.
        db.commit_event_batch(&[make_alert(99, 1)], &[], 2).unwrap();

        let page1 = db
            .read_alert_page(
                &AlertQuery {
                    page: 1,
                    severity: None,
                    anchor_id: Some(page0.anchor_id),
                },
                6,
            )
            .unwrap();
        assert_eq!(page1.events.len(), 4, "new alert must not enter the snapshot");
        assert_eq!(page1.total, 10);
    }

    #[test]
    fn test_alert_page_severity_filter() {
        let db = open_memory_db();
        let alerts = vec![make_alert(1, 1), make_alert(2, 2), make_alert(3, 1)];
        db.commit_event_batch(&alerts, &[], 1).unwrap();

        let page = db
            .read_alert_page(
                &AlertQuery {
                    page: 0,
                    severity: Some(1),
                    anchor_id: None,
                },
                10,
            )
            .unwrap();
        assert_eq!(page.events.len(), 2);
        assert_eq!(page.total, 2);
        assert!(page.events.iter().all(|a| a.severity == 1));
    }

    #[test]
    fn test_query_flows_window() {
        let db = open_memory_db();
        let flows = vec![
            make_flow(100, "10.0.0.1"),
            make_flow(200, "10.0.0.2"),
            make_flow(300, "10.0.0.3"),
        ];
        db.commit_event_batch(&[], &flows, 1).unwrap();

        let windowed = db.query_flows(150, 250).unwrap();
        assert_eq!(windowed.len(), 1);
        assert_eq!(windowed[0].src_ip, "10.0.0.2");
    }

    #[test]
    fn test_prune_old_events() {
        let db = open_memory_db();
        let now = crate::db::unix_timestamp();
        let alerts = vec![make_alert(now - 100 * 86400, 1), make_alert(now, 2)];
        let flows = vec![make_flow(now - 100 * 86400, "10.0.0.1"), make_flow(now, "10.0.0.2")];
        db.commit_event_batch(&alerts, &flows, 1).unwrap();

        let deleted = db.prune_old_events(90).unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(db.list_alerts().unwrap().len(), 1);
        assert_eq!(db.query_flows(0, now + 1).unwrap().len(), 1);
    }

    #[test]
    fn test_notification_settings_default_then_round_trip() {
        let db = open_memory_db();
        let defaults = db.load_notification_settings().unwrap();
        assert_eq!(defaults, NotificationSettings::default());

        let custom = NotificationSettings {
            domain_blocked_delay_seconds: 0.5,
            cooldown_seconds: 45,
            enabled: false,
        };
        db.save_notification_settings(&custom).unwrap();
        assert_eq!(db.load_notification_settings().unwrap(), custom);

        // Save is an upsert.
        let again = NotificationSettings {
            cooldown_seconds: 60,
            ..custom.clone()
        };
        db.save_notification_settings(&again).unwrap();
        assert_eq!(db.load_notification_settings().unwrap(), again);
    }
}
