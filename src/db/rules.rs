//! Firewall rule and blocked domain tables.
//!
//! Mutating facade operations enforce first and persist here second; these
//! functions therefore never touch the OS. Listing preserves insertion order.

use anyhow::Result;
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

use super::Database;

/// Transport protocol a firewall rule matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    #[serde(rename = "TCP")]
    Tcp,
    #[serde(rename = "UDP")]
    Udp,
    #[serde(rename = "ICMP")]
    Icmp,
    Any,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
            Protocol::Icmp => "ICMP",
            Protocol::Any => "Any",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "TCP" => Some(Protocol::Tcp),
            "UDP" => Some(Protocol::Udp),
            "ICMP" => Some(Protocol::Icmp),
            "Any" => Some(Protocol::Any),
            _ => None,
        }
    }
}

/// Traffic direction a firewall rule matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "Inbound",
            Direction::Outbound => "Outbound",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Inbound" => Some(Direction::Inbound),
            "Outbound" => Some(Direction::Outbound),
            _ => None,
        }
    }
}

/// What a matching rule does with the traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleAction {
    Allow,
    Block,
}

impl RuleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleAction::Allow => "Allow",
            RuleAction::Block => "Block",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Allow" => Some(RuleAction::Allow),
            "Block" => Some(RuleAction::Block),
            _ => None,
        }
    }
}

/// A single firewall rule. `name` is the unique key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallRule {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub application_path: Option<String>,
    pub port: Option<u16>,
    pub protocol: Protocol,
    pub direction: Direction,
    pub action: RuleAction,
    pub enabled: bool,
}

/// A blocked domain with the addresses it resolved to at block time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedDomain {
    pub domain: String,
    pub created_at: i64,
    pub addresses: Vec<String>,
}

fn bad_column(idx: usize, what: &str, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        format!("invalid {what}: {value}").into(),
    )
}

fn map_rule_row(row: &Row) -> rusqlite::Result<FirewallRule> {
    let protocol: String = row.get(4)?;
    let direction: String = row.get(5)?;
    let action: String = row.get(6)?;
    Ok(FirewallRule {
        name: row.get(0)?,
        description: row.get(1)?,
        application_path: row.get(2)?,
        port: row.get(3)?,
        protocol: Protocol::parse(&protocol).ok_or_else(|| bad_column(4, "protocol", &protocol))?,
        direction: Direction::parse(&direction)
            .ok_or_else(|| bad_column(5, "direction", &direction))?,
        action: RuleAction::parse(&action).ok_or_else(|| bad_column(6, "action", &action))?,
        enabled: row.get::<_, i64>(7)? != 0,
    })
}

const RULE_COLUMNS: &str =
    "name, description, application_path, port, protocol, direction, action, enabled";

impl Database {
    /// Insert a firewall rule. The name must not already exist.
    pub fn insert_rule(&self, rule: &FirewallRule) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO firewall_rules
                 (name, description, application_path, port, protocol, direction, action, enabled)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                rule.name,
                rule.description,
                rule.application_path,
                rule.port,
                rule.protocol.as_str(),
                rule.direction.as_str(),
                rule.action.as_str(),
                rule.enabled as i64,
            ],
        )?;
        Ok(())
    }

    pub fn rule_exists(&self, name: &str) -> Result<bool> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare_cached("SELECT 1 FROM firewall_rules WHERE name = ?1 LIMIT 1")?;
        Ok(stmt.exists(params![name])?)
    }

    pub fn get_rule(&self, name: &str) -> Result<Option<FirewallRule>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {RULE_COLUMNS} FROM firewall_rules WHERE name = ?1"
        ))?;
        let mut rows = stmt.query_map(params![name], map_rule_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// List all rules in insertion order.
    pub fn list_rules(&self) -> Result<Vec<FirewallRule>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {RULE_COLUMNS} FROM firewall_rules ORDER BY id ASC"
        ))?;
        let rows = stmt.query_map([], map_rule_row)?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// Delete a rule by name. Returns the number of rows removed (0 or 1).
    pub fn delete_rule(&self, name: &str) -> Result<usize> {
        let conn = self.lock();
        let deleted = conn.execute(
            "DELETE FROM firewall_rules WHERE name = ?1",
            params![name],
        )?;
        Ok(deleted)
    }

    /// Flip a rule's enabled flag. Returns the number of rows touched (0 or 1).
    pub fn set_rule_enabled(&self, name: &str, enabled: bool) -> Result<usize> {
        let conn = self.lock();
        let updated = conn.execute(
            "UPDATE firewall_rules SET enabled = ?2 WHERE name = ?1",
            params![name, enabled as i64],
        )?;
        Ok(updated)
    }

    // ---- Blocked domains ----

    pub fn insert_blocked_domain(&self, domain: &BlockedDomain) -> Result<()> {
        let addresses = serde_json::to_string(&domain.addresses)?;
        let conn = self.lock();
        conn.execute(
            "INSERT INTO blocked_domains (domain, created_at, addresses) VALUES (?1, ?2, ?3)",
            params![domain.domain, domain.created_at, addresses],
        )?;
        Ok(())
    }

    pub fn blocked_domain_exists(&self, domain: &str) -> Result<bool> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare_cached("SELECT 1 FROM blocked_domains WHERE domain = ?1 LIMIT 1")?;
        Ok(stmt.exists(params![domain])?)
    }

    pub fn delete_blocked_domain(&self, domain: &str) -> Result<usize> {
        let conn = self.lock();
        let deleted = conn.execute(
            "DELETE FROM blocked_domains WHERE domain = ?1",
            params![domain],
        )?;
        Ok(deleted)
    }

    /// List blocked domains, oldest first.
    pub fn list_blocked_domains(&self) -> Result<Vec<BlockedDomain>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT domain, created_at, addresses FROM blocked_domains
             ORDER BY created_at ASC, domain ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            let addresses: String = row.get(2)?;
            Ok(BlockedDomain {
                domain: row.get(0)?,
                created_at: row.get(1)?,
                addresses: serde_json::from_str(&addresses).unwrap_or_default(),
            })
        })?;
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

    fn make_rule(name: &str) -> FirewallRule {
        FirewallRule {
            name: name.to_string(),
            description: format!("rule {name}"),
            application_path: None,
            port: Some(443),
            protocol: Protocol::Tcp,
            direction: Direction::Outbound,
            action: RuleAction::Block,
            enabled: true,
        }
    }

    #[test]
    fn test_insert_and_list_preserves_insertion_order() {
        let db = open_memory_db();
        db.insert_rule(&make_rule("zeta")).unwrap();
        db.insert_rule(&make_rule("alpha")).unwrap();
        db.insert_rule(&make_rule("mid")).unwrap();

        let rules = db.list_rules().unwrap();
        let names: Vec<_> = rules.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_insert_duplicate_name_fails() {
        let db = open_memory_db();
        db.insert_rule(&make_rule("dup")).unwrap();
        assert!(db.insert_rule(&make_rule("dup")).is_err());
        assert_eq!(db.list_rules().unwrap().len(), 1);
    }

    #[test]
    fn test_get_rule_round_trip() {
        let db = open_memory_db();
        let rule = FirewallRule {
            application_path: Some(r"C:\apps\tool.exe".into()),
            port: None,
            protocol: Protocol::Any,
            direction: Direction::Inbound,
            action: RuleAction::Allow,
            enabled: false,
            ..make_rule("full")
        };
        db.insert_rule(&rule).unwrap();
        assert_eq!(db.get_rule("full").unwrap().unwrap(), rule);
        assert!(db.get_rule("absent").unwrap().is_none());
    }

    #[test]
    fn test_delete_and_set_enabled_report_row_counts() {
        let db = open_memory_db();
        db.insert_rule(&make_rule("r1")).unwrap();

        assert_eq!(db.set_rule_enabled("r1", false).unwrap(), 1);
        assert!(!db.get_rule("r1").unwrap().unwrap().enabled);
        assert_eq!(db.set_rule_enabled("ghost", true).unwrap(), 0);

        assert_eq!(db.delete_rule("r1").unwrap(), 1);
        assert_eq!(db.delete_rule("r1").unwrap(), 0);
        assert!(db.list_rules().unwrap().is_empty());
    }

    #[test]
    fn test_blocked_domain_round_trip() {
        let db = open_memory_db();
        let entry = BlockedDomain {
            domain: "example.com".into(),
            created_at: 1000,
            addresses: vec!["93.184.216.34".into()],
        };
        db.insert_blocked_domain(&entry).unwrap();

        assert!(db.blocked_domain_exists("example.com").unwrap());
        assert!(!db.blocked_domain_exists("other.com").unwrap());

        let listed = db.list_blocked_domains().unwrap();
        assert_eq!(listed, vec![entry]);

        assert_eq!(db.delete_blocked_domain("example.com").unwrap(), 1);
        assert_eq!(db.delete_blocked_domain("example.com").unwrap(), 0);
    }

    #[test]
    fn test_enum_serde_uses_ui_strings() {
        let rule = make_rule("json");
        let json = serde_json::to_value(&rule).unwrap();
        assert_eq!(json["protocol"], "TCP");
        assert_eq!(json["direction"], "Outbound");
        assert_eq!(json["action"], "Block");

        let back: FirewallRule = serde_json::from_value(json).unwrap();
        assert_eq!(back, rule);
    }

    #[test]
    fn test_enum_parse_rejects_unknown() {
        assert_eq!(Protocol::parse("tcp"), None);
        assert_eq!(Direction::parse("In"), None);
        assert_eq!(RuleAction::parse("Deny"), None);
        assert_eq!(Protocol::parse("ICMP"), Some(Protocol::Icmp));
    }
}
