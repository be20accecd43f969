//! Extraction of alert/flow events from the IDS event log, plus flow reports.
//!
//! The IDS writes newline-delimited JSON records to a single append-only log.
//! [`EventAggregator::extract`] reads everything past the persisted byte
//! cursor, splits alert and flow records out, and commits the batch together
//! with the advanced cursor in one database transaction. Crash between
//! extraction and commit therefore re-reads the same bytes instead of losing
//! or duplicating events.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::DateTime;
use serde::{Deserialize, Serialize};

use crate::config;
use crate::db::{AlertEvent, BlockedDomain, Database, FlowRecord};
use crate::error::AppError;

// ---------------------------------------------------------------------------
// Raw IDS log records
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct EveRecord {
    timestamp: String,
    event_type: String,
    src_ip: Option<String>,
    src_port: Option<u16>,
    dest_ip: Option<String>,
    dest_port: Option<u16>,
    proto: Option<String>,
    alert: Option<EveAlert>,
    flow: Option<EveFlow>,
}

#[derive(Debug, Deserialize)]
struct EveAlert {
    signature: Option<String>,
    category: Option<String>,
    severity: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct EveFlow {
    start: Option<String>,
    end: Option<String>,
    #[serde(default)]
    bytes_toserver: u64,
    #[serde(default)]
    bytes_toclient: u64,
    #[serde(default)]
    pkts_toserver: u64,
    #[serde(default)]
    pkts_toclient: u64,
}

/// IDS timestamps look like `2024-05-01T12:30:45.123456+0000`.
fn parse_eve_timestamp(raw: &str) -> Option<i64> {
    DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z")
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map(|dt| dt.timestamp())
        .ok()
}

/// Severities outside the documented 1..=3 range are treated as informational.
fn clamp_severity(raw: Option<i64>) -> u8 {
    match raw {
        Some(s @ 1..=3) => s as u8,
        _ => 3,
    }
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

/// Result of one extraction pass.
#[derive(Debug, Default)]
pub struct ExtractSummary {
    /// Alerts committed by this pass, in log order.
    pub alerts: Vec<AlertEvent>,
    pub flow_count: usize,
}

/// Reads the IDS event log incrementally and materializes events into the
/// database.
pub struct EventAggregator {
    db: Arc<Database>,
    log_path: PathBuf,
    report_path: PathBuf,
    /// Serializes extraction passes. Two passes reading the same cursor would
    /// each commit the same bytes, storing every event twice.
    extract_lock: std::sync::Mutex<()>,
}

impl EventAggregator {
    pub fn new(db: Arc<Database>, log_path: PathBuf, report_path: PathBuf) -> Self {
        Self {
            db,
            log_path,
            report_path,
            extract_lock: std::sync::Mutex::new(()),
        }
    }

    /// Extract all complete records past the cursor and commit them.
    ///
    /// A missing log file is not an error (the IDS may not have started yet).
    /// A log shorter than the cursor means the IDS rotated it; extraction
    /// restarts from the beginning. The trailing line is only consumed once
    /// it ends in a newline, so a record the IDS is mid-write on is left for
    /// the next pass. Corrupt lines are skipped and logged, never fatal.
    pub fn extract(&self) -> Result<ExtractSummary, AppError> {
        let _pass = self.extract_lock.lock().unwrap();
        let mut cursor = self.db.event_cursor().map_err(AppError::from)?;

        let file = match File::open(&self.log_path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ExtractSummary::default());
            }
            Err(e) => return Err(e.into()),
        };

        let len = file.metadata()?.len();
        if len < cursor {
            tracing::info!(
                "IDS log {} shrank ({len} < {cursor}), assuming rotation",
                self.log_path.display()
            );
            cursor = 0;
        }
        if len == cursor {
            return Ok(ExtractSummary::default());
        }

        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(cursor))?;

        let mut alerts = Vec::new();
        let mut flows = Vec::new();
        let mut offset = cursor;
        let mut line = String::new();
        loop {
            line.clear();
            let read = reader.read_line(&mut line)?;
            if read == 0 {
                break;
            }
            if !line.ends_with('\n') {
                // Partial trailing record, picked up next pass.
                break;
            }
            offset += read as u64;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<EveRecord>(trimmed) {
                Ok(record) => self.collect(record, &mut alerts, &mut flows),
                Err(e) => {
                    tracing::warn!("Skipping malformed IDS log line at byte {offset}: {e}");
                }
            }
        }

        if offset == cursor && cursor != 0 {
            return Ok(ExtractSummary::default());
        }

        self.db
            .commit_event_batch(&alerts, &flows, offset)
            .map_err(AppError::from)?;
        if !alerts.is_empty() || !flows.is_empty() {
            tracing::debug!(
                alerts = alerts.len(),
                flows = flows.len(),
                "Extracted IDS events up to byte {offset}"
            );
        }
        Ok(ExtractSummary {
            flow_count: flows.len(),
            alerts,
        })
    }

    fn collect(&self, record: EveRecord, alerts: &mut Vec<AlertEvent>, flows: &mut Vec<FlowRecord>) {
        match record.event_type.as_str() {
            "alert" => {
                let Some(timestamp) = parse_eve_timestamp(&record.timestamp) else {
                    tracing::warn!("Alert with unparsable timestamp {:?} skipped", record.timestamp);
                    return;
                };
                let alert = record.alert.unwrap_or(EveAlert {
                    signature: None,
                    category: None,
                    severity: None,
                });
                alerts.push(AlertEvent {
                    id: 0,
                    timestamp,
                    src_ip: record.src_ip,
                    dest_ip: record.dest_ip,
                    src_port: record.src_port,
                    dest_port: record.dest_port,
                    signature: alert.signature,
                    category: alert.category,
                    severity: clamp_severity(alert.severity),
                });
            }
            "flow" => {
                let Some(flow) = record.flow else { return };
                let start_ts = flow
                    .start
                    .as_deref()
                    .and_then(parse_eve_timestamp)
                    .or_else(|| parse_eve_timestamp(&record.timestamp));
                let Some(start_ts) = start_ts else {
                    tracing::warn!("Flow with unparsable timestamps skipped");
                    return;
                };
                let end_ts = flow
                    .end
                    .as_deref()
                    .and_then(parse_eve_timestamp)
                    .unwrap_or(start_ts);
                let (Some(src_ip), Some(dest_ip)) = (record.src_ip, record.dest_ip) else {
                    return;
                };
                flows.push(FlowRecord {
                    start_ts,
                    end_ts,
                    src_ip,
                    dest_ip,
                    src_port: record.src_port.unwrap_or(0),
                    dest_port: record.dest_port.unwrap_or(0),
                    protocol: record.proto.unwrap_or_else(|| "UNKNOWN".into()),
                    bytes_toserver: flow.bytes_toserver,
                    bytes_toclient: flow.bytes_toclient,
                    pkts_toserver: flow.pkts_toserver,
                    pkts_toclient: flow.pkts_toclient,
                });
            }
            _ => {}
        }
    }

    /// Build the top-talker report over `[from_ts, to_ts]` and persist it.
    pub fn generate_report(&self, from_ts: i64, to_ts: i64) -> Result<FlowReport, AppError> {
        let flows = self.db.query_flows(from_ts, to_ts).map_err(AppError::from)?;
        if flows.is_empty() {
            return Err(AppError::NotFound(
                "no flow records in the requested window".into(),
            ));
        }

        let report = FlowReport::build(&flows, from_ts, to_ts, config::REPORT_TOP_N);

        let rendered = serde_json::to_vec_pretty(&report).map_err(anyhow::Error::from)?;
        let dir = self.report_path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&rendered)?;
        tmp.persist(&self.report_path)
            .map_err(|e| AppError::Io(e.to_string()))?;
        tracing::info!(
            "Flow report written to {} ({} flows)",
            self.report_path.display(),
            report.flow_count
        );
        Ok(report)
    }

    /// Load the last persisted report.
    pub fn read_report(&self) -> Result<FlowReport, AppError> {
        let content = match std::fs::read_to_string(&self.report_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AppError::NotFound("no report has been generated".into()));
            }
            Err(e) => return Err(e.into()),
        };
        let report = serde_json::from_str(&content)
            .map_err(|e| AppError::Io(format!("corrupt report file: {e}")))?;
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// Flow report
// ---------------------------------------------------------------------------

/// Persisted frequency report over a flow window, one top-N table per
/// dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowReport {
    pub time_start: i64,
    pub time_end: i64,
    pub flow_count: u64,
    pub top_sourceip: Vec<FreqEntry>,
    pub top_destinationip: Vec<FreqEntry>,
    pub top_sourceport: Vec<FreqEntry>,
    pub top_destinationport: Vec<FreqEntry>,
    /// Every protocol observed in the window, ranked like the top tables
    /// but never truncated.
    pub protocol: Vec<FreqEntry>,
}

/// One value of a report dimension with its occurrence count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreqEntry {
    pub name: String,
    pub frequency: u64,
}

impl FlowReport {
    /// Deterministic for a fixed input: frequency descending, ties broken by
    /// first appearance in the flow sequence.
    fn build(flows: &[FlowRecord], time_start: i64, time_end: i64, top_n: usize) -> Self {
        FlowReport {
            time_start,
            time_end,
            flow_count: flows.len() as u64,
            top_sourceip: top_frequencies(flows.iter().map(|f| f.src_ip.clone()), top_n),
            top_destinationip: top_frequencies(flows.iter().map(|f| f.dest_ip.clone()), top_n),
            top_sourceport: top_frequencies(flows.iter().map(|f| f.src_port.to_string()), top_n),
            top_destinationport: top_frequencies(
                flows.iter().map(|f| f.dest_port.to_string()),
                top_n,
            ),
            protocol: top_frequencies(flows.iter().map(|f| f.protocol.clone()), usize::MAX),
        }
    }
}

fn top_frequencies(values: impl Iterator<Item = String>, top_n: usize) -> Vec<FreqEntry> {
    let mut counts: HashMap<String, (u64, usize)> = HashMap::new();
    for (idx, value) in values.enumerate() {
        let entry = counts.entry(value).or_insert((0, idx));
        entry.0 += 1;
    }
    let mut ranked: Vec<(String, (u64, usize))> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));
    ranked
        .into_iter()
        .take(top_n)
        .map(|(name, (frequency, _))| FreqEntry { name, frequency })
        .collect()
}

/// Domains whose recorded addresses show up as the destination of an alert.
/// Feeds the notification gate after each extraction pass.
pub fn match_blocked_domains(alerts: &[AlertEvent], blocked: &[BlockedDomain]) -> Vec<String> {
    let mut matched = Vec::new();
    for domain in blocked {
        let hit = alerts.iter().any(|alert| {
            alert
                .dest_ip
                .as_deref()
                .is_some_and(|ip| domain.addresses.iter().any(|a| a == ip))
        });
        if hit && !matched.contains(&domain.domain) {
            matched.push(domain.domain.clone());
        }
    }
    matched
}
