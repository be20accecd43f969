//! Network segmentation tables: departments, their devices, and
//! inter-department connection rules.
//!
//! Deleting a department cascades: devices go through the foreign key, and
//! connection rules naming the department are removed in the same transaction.

use anyhow::Result;
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

use super::{Database, RuleAction};

/// Protocol selector for a department's default policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentProtocol {
    #[serde(rename = "ALL")]
    All,
    #[serde(rename = "TCP")]
    Tcp,
    #[serde(rename = "UDP")]
    Udp,
    #[serde(rename = "ICMP")]
    Icmp,
}

impl SegmentProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            SegmentProtocol::All => "ALL",
            SegmentProtocol::Tcp => "TCP",
            SegmentProtocol::Udp => "UDP",
            SegmentProtocol::Icmp => "ICMP",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ALL" => Some(SegmentProtocol::All),
            "TCP" => Some(SegmentProtocol::Tcp),
            "UDP" => Some(SegmentProtocol::Udp),
            "ICMP" => Some(SegmentProtocol::Icmp),
            _ => None,
        }
    }
}

/// Direction of an inter-department connection rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnDirection {
    Both,
    Inbound,
    Outbound,
}

impl ConnDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnDirection::Both => "Both",
            ConnDirection::Inbound => "Inbound",
            ConnDirection::Outbound => "Outbound",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Both" => Some(ConnDirection::Both),
            "Inbound" => Some(ConnDirection::Inbound),
            "Outbound" => Some(ConnDirection::Outbound),
            _ => None,
        }
    }
}

/// A network segment owning a subnet and a set of named devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Department {
    pub name: String,
    pub subnet: String,
    pub protocol: SegmentProtocol,
    pub action: RuleAction,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub devices: Vec<String>,
}

/// An allow/block policy between two departments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRule {
    pub from: String,
    pub to: String,
    pub port: Option<u16>,
    pub direction: ConnDirection,
    pub action: RuleAction,
}

fn bad_column(idx: usize, what: &str, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        format!("invalid {what}: {value}").into(),
    )
}

fn map_connection_row(row: &Row) -> rusqlite::Result<ConnectionRule> {
    let direction: String = row.get(3)?;
    let action: String = row.get(4)?;
    Ok(ConnectionRule {
        from: row.get(0)?,
        to: row.get(1)?,
        port: row.get(2)?,
        direction: ConnDirection::parse(&direction)
            .ok_or_else(|| bad_column(3, "direction", &direction))?,
        action: RuleAction::parse(&action).ok_or_else(|| bad_column(4, "action", &action))?,
    })
}

impl Database {
    /// Insert a department together with any initial devices, atomically.
    pub fn insert_department(&self, dept: &Department) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO departments (name, subnet, protocol, action, description)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                dept.name,
                dept.subnet,
                dept.protocol.as_str(),
                dept.action.as_str(),
                dept.description,
            ],
        )?;
        let dept_id = tx.last_insert_rowid();
        for device in &dept.devices {
            tx.execute(
                "INSERT OR IGNORE INTO devices (department_id, name) VALUES (?1, ?2)",
                params![dept_id, device],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn department_exists(&self, name: &str) -> Result<bool> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached("SELECT 1 FROM departments WHERE name = ?1 LIMIT 1")?;
        Ok(stmt.exists(params![name])?)
    }

    /// List departments with their devices, in insertion order.
    pub fn list_departments(&self) -> Result<Vec<Department>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, name, subnet, protocol, action, description
             FROM departments ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            let protocol: String = row.get(3)?;
            let action: String = row.get(4)?;
            Ok((
                row.get::<_, i64>(0)?,
                Department {
                    name: row.get(1)?,
                    subnet: row.get(2)?,
                    protocol: SegmentProtocol::parse(&protocol)
                        .ok_or_else(|| bad_column(3, "protocol", &protocol))?,
                    action: RuleAction::parse(&action)
                        .ok_or_else(|| bad_column(4, "action", &action))?,
                    description: row.get(5)?,
                    devices: Vec::new(),
                },
            ))
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }

        let mut dev_stmt = conn.prepare_cached(
            "SELECT name FROM devices WHERE department_id = ?1 ORDER BY id ASC",
        )?;
        let mut departments = Vec::with_capacity(results.len());
        for (id, mut dept) in results {
            let devices = dev_stmt.query_map(params![id], |row| row.get::<_, String>(0))?;
            for device in devices {
                dept.devices.push(device?);
            }
            departments.push(dept);
        }
        Ok(departments)
    }

    /// Delete a department and everything referencing it, in one transaction.
    /// Returns false when the department does not exist.
    pub fn delete_department(&self, name: &str) -> Result<bool> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let deleted = tx.execute("DELETE FROM departments WHERE name = ?1", params![name])?;
        if deleted > 0 {
            tx.execute(
                "DELETE FROM connection_rules WHERE from_department = ?1 OR to_department = ?1",
                params![name],
            )?;
        }
        tx.commit()?;
        Ok(deleted > 0)
    }

    /// Add a device to a department. Returns false when the department is
    /// missing; re-adding an existing device is a no-op.
    pub fn insert_device(&self, department: &str, device: &str) -> Result<bool> {
        let conn = self.lock();
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM departments WHERE name = ?1)",
            params![department],
            |row| row.get(0),
        )?;
        if !exists {
            return Ok(false);
        }
        conn.execute(
            "INSERT OR IGNORE INTO devices (department_id, name)
             SELECT id, ?2 FROM departments WHERE name = ?1",
            params![department, device],
        )?;
        Ok(true)
    }

    pub fn delete_device(&self, department: &str, device: &str) -> Result<usize> {
        let conn = self.lock();
        let deleted = conn.execute(
            "DELETE FROM devices WHERE name = ?2 AND department_id =
                 (SELECT id FROM departments WHERE name = ?1)",
            params![department, device],
        )?;
        Ok(deleted)
    }

    // ---- Connection rules ----

    pub fn insert_connection_rule(&self, rule: &ConnectionRule) -> Result<i64> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO connection_rules (from_department, to_department, port, direction, action)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                rule.from,
                rule.to,
                rule.port,
                rule.direction.as_str(),
                rule.action.as_str(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_connection_rules(&self) -> Result<Vec<ConnectionRule>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT from_department, to_department, port, direction, action
             FROM connection_rules ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([], map_connection_row)?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    pub fn delete_connection_rule(&self, id: i64) -> Result<usize> {
        let conn = self.lock();
        let deleted = conn.execute("DELETE FROM connection_rules WHERE id = ?1", params![id])?;
        Ok(deleted)
    }

    /// Ids of connection rules in listing order; the facade uses this to map
    /// a positional remove onto a row id.
    pub fn connection_rule_ids(&self) -> Result<Vec<i64>> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare_cached("SELECT id FROM connection_rules ORDER BY id ASC")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::open_memory_db;
    use super::*;

    fn make_department(name: &str, subnet: &str) -> Department {
        Department {
            name: name.to_string(),
            subnet: subnet.to_string(),
            protocol: SegmentProtocol::Tcp,
            action: RuleAction::Allow,
            description: String::new(),
            devices: Vec::new(),
        }
    }

    fn make_connection(from: &str, to: &str) -> ConnectionRule {
        ConnectionRule {
            from: from.to_string(),
            to: to.to_string(),
            port: Some(8080),
            direction: ConnDirection::Both,
            action: RuleAction::Allow,
        }
    }

    #[test]
    fn test_department_with_devices_round_trip() {
        let db = open_memory_db();
        db.insert_department(&make_department("IT", "192.168.1.0/24"))
            .unwrap();
        assert!(db.insert_device("IT", "Server-01").unwrap());
        assert!(db.insert_device("IT", "Printer-IT").unwrap());

        let departments = db.list_departments().unwrap();
        assert_eq!(departments.len(), 1);
        assert_eq!(departments[0].name, "IT");
        assert_eq!(departments[0].devices, vec!["Server-01", "Printer-IT"]);
    }

    #[test]
    fn test_insert_device_missing_department() {
        let db = open_memory_db();
        assert!(!db.insert_device("ghost", "Server-01").unwrap());
    }

    #[test]
    fn test_reinsert_device_is_noop() {
        let db = open_memory_db();
        db.insert_department(&make_department("IT", "192.168.1.0/24"))
            .unwrap();
        assert!(db.insert_device("IT", "Server-01").unwrap());
        assert!(db.insert_device("IT", "Server-01").unwrap());
        assert_eq!(db.list_departments().unwrap()[0].devices, vec!["Server-01"]);
    }

    #[test]
    fn test_delete_department_cascades_to_devices_and_rules() {
        let db = open_memory_db();
        db.insert_department(&make_department("IT", "192.168.1.0/24"))
            .unwrap();
        db.insert_department(&make_department("BA", "192.168.2.0/24"))
            .unwrap();
        db.insert_device("IT", "Server-01").unwrap();
        db.insert_connection_rule(&make_connection("IT", "BA")).unwrap();
        db.insert_connection_rule(&make_connection("BA", "IT")).unwrap();
        db.insert_connection_rule(&make_connection("BA", "BA")).unwrap();

        assert!(db.delete_department("IT").unwrap());
        assert!(!db.delete_department("IT").unwrap());

        // Only the BA->BA rule survives; IT devices are gone with the FK.
        let rules = db.list_connection_rules().unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].from, "BA");
        assert_eq!(rules[0].to, "BA");

        let departments = db.list_departments().unwrap();
        assert_eq!(departments.len(), 1);
        assert_eq!(departments[0].name, "BA");
    }

    #[test]
    fn test_connection_rule_listing_and_positional_ids() {
        let db = open_memory_db();
        db.insert_department(&make_department("IT", "192.168.1.0/24"))
            .unwrap();
        db.insert_department(&make_department("BA", "192.168.2.0/24"))
            .unwrap();
        let first = db.insert_connection_rule(&make_connection("IT", "BA")).unwrap();
        let second = db.insert_connection_rule(&make_connection("BA", "IT")).unwrap();

        assert_eq!(db.connection_rule_ids().unwrap(), vec![first, second]);
        assert_eq!(db.delete_connection_rule(first).unwrap(), 1);
        assert_eq!(db.connection_rule_ids().unwrap(), vec![second]);
    }

    #[test]
    fn test_segment_enums_serde_strings() {
        let dept = Department {
            protocol: SegmentProtocol::All,
            ..make_department("IT", "10.0.0.0/8")
        };
        let json = serde_json::to_value(&dept).unwrap();
        assert_eq!(json["protocol"], "ALL");
        assert_eq!(json["action"], "Allow");

        let rule = make_connection("IT", "BA");
        let json = serde_json::to_value(&rule).unwrap();
        assert_eq!(json["direction"], "Both");
    }
}
