//! Policy enforcement: translating store mutations into OS-level effects.
//!
//! [`PolicyEnforcer`] is the seam between the facade and the host network
//! stack. [`OsEnforcer`] regenerates the packet-filter ruleset from an
//! in-memory mirror (nft script on Unix, netsh per-rule commands on Windows)
//! and sinkholes blocked domains through the hosts file. [`MemoryEnforcer`]
//! implements the same contract without side effects for tests and dry-run
//! hosts.
//!
//! Contract: `apply_rule` is idempotent, `retract_rule`/`unblock_domain`
//! succeed when the target is already absent, and any failure leaves the
//! previously enforced state intact.

use std::fs;
use std::io::Write;
use std::net::ToSocketAddrs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use dashmap::DashMap;

use crate::config;
use crate::db::{Direction, FirewallRule, Protocol, RuleAction};

/// Seam between the Rule Store and the host network stack.
pub trait PolicyEnforcer: Send + Sync {
    /// Apply (or re-apply) a rule. Idempotent.
    fn apply_rule(&self, rule: &FirewallRule) -> Result<()>;

    /// Retract a rule by name. Already-absent rules are not an error.
    fn retract_rule(&self, name: &str) -> Result<()>;

    /// Sinkhole DNS resolution for a domain. Returns the addresses the domain
    /// resolved to at block time (possibly empty when resolution fails).
    fn block_domain(&self, domain: &str) -> Result<Vec<String>>;

    /// Restore normal resolution for a domain. Already-absent is not an error.
    fn unblock_domain(&self, domain: &str) -> Result<()>;
}

// ===========================================================================
// OS enforcer
// ===========================================================================

/// Enforces rules against the host firewall and hosts file.
pub struct OsEnforcer {
    /// Mirror of every applied rule; the full ruleset is regenerated from it
    /// so apply/retract are naturally idempotent.
    rules: DashMap<String, FirewallRule>,
    hosts: HostsSinkhole,
}

impl OsEnforcer {
    pub fn new(hosts_path: PathBuf) -> Self {
        Self {
            rules: DashMap::new(),
            hosts: HostsSinkhole::new(hosts_path),
        }
    }

    /// Seed the mirror from persisted rules at startup, re-applying them.
    pub fn restore(&self, rules: &[FirewallRule]) -> Result<()> {
        for rule in rules {
            self.rules.insert(rule.name.clone(), rule.clone());
        }
        self.sync()
    }

    #[cfg(not(windows))]
    fn sync(&self) -> Result<()> {
        let mut rules: Vec<FirewallRule> = self.rules.iter().map(|e| e.value().clone()).collect();
        rules.sort_by(|a, b| a.name.cmp(&b.name));
        let script = render_nft_ruleset(&rules);
        run_with_stdin("nft", &["-f", "-"], &script)
    }

    #[cfg(windows)]
    fn sync(&self) -> Result<()> {
        // netsh has no atomic ruleset load; replay every mirrored rule.
        for entry in self.rules.iter() {
            let rule = entry.value();
            let _ = run_command("netsh", &netsh_delete_args(&rule.name));
            run_command("netsh", &netsh_add_args(rule))?;
        }
        Ok(())
    }

    #[cfg(windows)]
    fn retract_os(&self, name: &str) -> Result<()> {
        // Deleting a rule that never reached the OS is fine.
        let _ = run_command("netsh", &netsh_delete_args(name));
        Ok(())
    }

    #[cfg(not(windows))]
    fn retract_os(&self, _name: &str) -> Result<()> {
        self.sync()
    }
}

impl PolicyEnforcer for OsEnforcer {
    fn apply_rule(&self, rule: &FirewallRule) -> Result<()> {
        let previous = self.rules.insert(rule.name.clone(), rule.clone());
        match self.sync() {
            Ok(()) => Ok(()),
            Err(e) => {
                // Roll the mirror back so enforced state matches the store.
                match previous {
                    Some(prev) => {
                        self.rules.insert(rule.name.clone(), prev);
                    }
                    None => {
                        self.rules.remove(&rule.name);
                    }
                }
                Err(e)
            }
        }
    }

    fn retract_rule(&self, name: &str) -> Result<()> {
        let previous = self.rules.remove(name);
        if previous.is_none() {
            return Ok(());
        }
        match self.retract_os(name) {
            Ok(()) => Ok(()),
            Err(e) => {
                if let Some((key, prev)) = previous {
                    self.rules.insert(key, prev);
                }
                Err(e)
            }
        }
    }

    fn block_domain(&self, domain: &str) -> Result<Vec<String>> {
        let addresses = resolve_addresses(domain);
        self.hosts.add(domain)?;
        Ok(addresses)
    }

    fn unblock_domain(&self, domain: &str) -> Result<()> {
        self.hosts.remove(domain)
    }
}

/// Best-effort resolution of a domain's current addresses, recorded so alert
/// traffic can later be matched back to the domain.
fn resolve_addresses(domain: &str) -> Vec<String> {
    let mut addresses: Vec<String> = match (domain, 443u16).to_socket_addrs() {
        Ok(addrs) => addrs.map(|a| a.ip().to_string()).collect(),
        Err(e) => {
            tracing::debug!("Could not resolve {domain}: {e}");
            Vec::new()
        }
    };
    addresses.sort();
    addresses.dedup();
    addresses
}

/// Render the full nftables ruleset for the mirrored rules.
///
/// Disabled rules are mirrored but not rendered, so enable/disable is a plain
/// re-apply. Kept OS-independent for testability.
pub(crate) fn render_nft_ruleset(rules: &[FirewallRule]) -> String {
    let mut input_rules = String::new();
    let mut output_rules = String::new();
    for rule in rules.iter().filter(|r| r.enabled) {
        let verdict = match rule.action {
            RuleAction::Allow => "accept",
            RuleAction::Block => "drop",
        };
        let mut matchers = String::new();
        match rule.protocol {
            Protocol::Any => {}
            Protocol::Icmp => matchers.push_str("meta l4proto icmp "),
            Protocol::Tcp => matchers.push_str("meta l4proto tcp "),
            Protocol::Udp => matchers.push_str("meta l4proto udp "),
        }
        if let Some(port) = rule.port {
            let proto = match rule.protocol {
                Protocol::Udp => "udp",
                // nft needs a concrete transport for a port match.
                _ => "tcp",
            };
            matchers.push_str(&format!("{proto} dport {port} "));
        }
        let line = format!("    {matchers}{verdict} comment \"{}\"\n", rule.name);
        match rule.direction {
            Direction::Inbound => input_rules.push_str(&line),
            Direction::Outbound => output_rules.push_str(&line),
        }
    }

    // `add table` first so the flush succeeds on a host that has never seen
    // our table; the declarative block then rebuilds the chains with the
    // rules inlined.
    let mut out = String::new();
    out.push_str("add table inet netsentry\n");
    out.push_str("flush table inet netsentry\n");
    out.push_str("table inet netsentry {\n");
    out.push_str("  chain input {\n");
    out.push_str("    type filter hook input priority 0; policy accept;\n");
    out.push_str(&input_rules);
    out.push_str("  }\n");
    out.push_str("  chain output {\n");
    out.push_str("    type filter hook output priority 0; policy accept;\n");
    out.push_str(&output_rules);
    out.push_str("  }\n");
    out.push_str("}\n");
    out
}

/// netsh argument list for adding a rule (Windows Firewall syntax).
pub(crate) fn netsh_add_args(rule: &FirewallRule) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "advfirewall".into(),
        "firewall".into(),
        "add".into(),
        "rule".into(),
        format!("name={}", rule.name),
        format!(
            "dir={}",
            match rule.direction {
                Direction::Inbound => "in",
                Direction::Outbound => "out",
            }
        ),
        format!("action={}", rule.action.as_str().to_lowercase()),
        format!("enable={}", if rule.enabled { "yes" } else { "no" }),
    ];
    if !rule.description.is_empty() {
        args.push(format!("description={}", rule.description));
    }
    if rule.protocol != Protocol::Any {
        args.push(format!("protocol={}", rule.protocol.as_str().to_lowercase()));
    }
    if let Some(path) = &rule.application_path {
        if !path.is_empty() {
            args.push(format!("program={path}"));
        }
    }
    if let Some(port) = rule.port {
        args.push(format!("localport={port}"));
    }
    args
}

pub(crate) fn netsh_delete_args(name: &str) -> Vec<String> {
    vec![
        "advfirewall".into(),
        "firewall".into(),
        "delete".into(),
        "rule".into(),
        format!("name={name}"),
    ]
}

#[allow(dead_code)]
fn run_command(program: &str, args: &[String]) -> Result<()> {
    let output = std::process::Command::new(program)
        .args(args)
        .output()
        .with_context(|| format!("failed to run {program}"))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("{program} failed: {}", stderr.trim());
    }
    Ok(())
}

#[allow(dead_code)]
fn run_with_stdin(program: &str, args: &[&str], input: &str) -> Result<()> {
    let mut child = std::process::Command::new(program)
        .args(args)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to spawn {program}"))?;
    child
        .stdin
        .take()
        .context("child stdin unavailable")?
        .write_all(input.as_bytes())?;
    let output = child.wait_with_output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("{program} failed: {}", stderr.trim());
    }
    Ok(())
}

// ===========================================================================
// Hosts-file sinkhole
// ===========================================================================

/// Manages the marked sinkhole section of the hosts file.
///
/// Entries live between [`config::HOSTS_MARKER_BEGIN`] and
/// [`config::HOSTS_MARKER_END`]; everything outside the section is preserved
/// byte-for-byte. Writes go through a temp file in the same directory and a
/// rename, so a crash never leaves a half-written hosts file.
pub struct HostsSinkhole {
    path: PathBuf,
}

impl HostsSinkhole {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn add(&self, domain: &str) -> Result<()> {
        self.edit(|entries| {
            if !entries.iter().any(|d| d == domain) {
                entries.push(domain.to_string());
            }
        })
    }

    pub fn remove(&self, domain: &str) -> Result<()> {
        self.edit(|entries| entries.retain(|d| d != domain))
    }

    /// Domains currently sinkholed in the managed section.
    pub fn entries(&self) -> Result<Vec<String>> {
        let content = self.read()?;
        Ok(parse_managed_section(&content).1)
    }

    fn read(&self) -> Result<String> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e).with_context(|| format!("reading {}", self.path.display())),
        }
    }

    fn edit(&self, mutate: impl FnOnce(&mut Vec<String>)) -> Result<()> {
        let content = self.read()?;
        let (rest, mut entries) = parse_managed_section(&content);
        mutate(&mut entries);
        let rendered = render_hosts(&rest, &entries);

        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("creating temp file in {}", dir.display()))?;
        tmp.write_all(rendered.as_bytes())?;
        tmp.persist(&self.path)
            .map_err(|e| e.error)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }
}

/// Split hosts content into (unmanaged content, managed sinkhole domains).
fn parse_managed_section(content: &str) -> (String, Vec<String>) {
    let mut rest = String::new();
    let mut entries = Vec::new();
    let mut in_section = false;
    for line in content.lines() {
        if line.trim() == config::HOSTS_MARKER_BEGIN {
            in_section = true;
            continue;
        }
        if line.trim() == config::HOSTS_MARKER_END {
            in_section = false;
            continue;
        }
        if in_section {
            if let Some(domain) = line.trim().split_whitespace().nth(1) {
                entries.push(domain.to_string());
            }
        } else {
            rest.push_str(line);
            rest.push('\n');
        }
    }
    (rest, entries)
}

fn render_hosts(rest: &str, entries: &[String]) -> String {
    let mut out = rest.to_string();
    if entries.is_empty() {
        return out;
    }
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(config::HOSTS_MARKER_BEGIN);
    out.push('\n');
    for domain in entries {
        out.push_str(&format!("{} {domain}\n", config::SINKHOLE_ADDR));
    }
    out.push_str(config::HOSTS_MARKER_END);
    out.push('\n');
    out
}

// ===========================================================================
// In-memory enforcer
// ===========================================================================

/// Side-effect-free [`PolicyEnforcer`] for tests and dry-run hosts.
///
/// Records what would have been enforced and can be told to fail, which the
/// facade tests use to verify transactional rollback.
#[derive(Default)]
pub struct MemoryEnforcer {
    applied: DashMap<String, FirewallRule>,
    domains: DashMap<String, Vec<String>>,
    fail: std::sync::atomic::AtomicBool,
}

impl MemoryEnforcer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent enforcement call fail until cleared.
    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn applied_rules(&self) -> Vec<String> {
        let mut names: Vec<String> = self.applied.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn blocked_domains(&self) -> Vec<String> {
        let mut domains: Vec<String> = self.domains.iter().map(|e| e.key().clone()).collect();
        domains.sort();
        domains
    }

    fn check(&self) -> Result<()> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            anyhow::bail!("enforcement unavailable");
        }
        Ok(())
    }
}

impl PolicyEnforcer for MemoryEnforcer {
    fn apply_rule(&self, rule: &FirewallRule) -> Result<()> {
        self.check()?;
        self.applied.insert(rule.name.clone(), rule.clone());
        Ok(())
    }

    fn retract_rule(&self, name: &str) -> Result<()> {
        self.check()?;
        self.applied.remove(name);
        Ok(())
    }

    fn block_domain(&self, domain: &str) -> Result<Vec<String>> {
        self.check()?;
        let addresses = vec![format!("203.0.113.{}", (domain.len() % 250) + 1)];
        self.domains.insert(domain.to_string(), addresses.clone());
        Ok(addresses)
    }

    fn unblock_domain(&self, domain: &str) -> Result<()> {
        self.check()?;
        self.domains.remove(domain);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_rule(name: &str, enabled: bool) -> FirewallRule {
        FirewallRule {
            name: name.to_string(),
            description: String::new(),
            application_path: None,
            port: Some(8080),
            protocol: Protocol::Tcp,
            direction: Direction::Inbound,
            action: RuleAction::Block,
            enabled,
        }
    }

    #[test]
    fn test_render_nft_skips_disabled_rules() {
        let rules = vec![make_rule("on", true), make_rule("off", false)];
        let script = render_nft_ruleset(&rules);
        assert!(script.contains("comment \"on\""));
        assert!(!script.contains("comment \"off\""));
        assert!(script.contains("tcp dport 8080 drop"));
    }

    #[test]
    fn test_render_nft_declares_table_before_flush() {
        let script = render_nft_ruleset(&[make_rule("r1", true)]);
        let add = script.find("add table inet netsentry").unwrap();
        let flush = script.find("flush table inet netsentry").unwrap();
        assert!(add < flush, "flush must not run before the table exists");
        // Rules live inside the chain blocks, never as top-level commands.
        assert!(!script.contains("add rule"));
    }

    #[test]
    fn test_render_nft_places_rules_in_direction_chains() {
        let mut outbound = make_rule("allow-out", true);
        outbound.direction = Direction::Outbound;
        outbound.action = RuleAction::Allow;
        outbound.port = None;
        let script = render_nft_ruleset(&[make_rule("block-in", true), outbound]);

        let input_at = script.find("chain input {").unwrap();
        let output_at = script.find("chain output {").unwrap();
        let in_rule = script.find("comment \"block-in\"").unwrap();
        let out_rule = script.find("meta l4proto tcp accept comment \"allow-out\"").unwrap();
        assert!(input_at < in_rule && in_rule < output_at);
        assert!(output_at < out_rule);
    }

    #[test]
    fn test_netsh_add_args_match_advfirewall_syntax() {
        let mut rule = make_rule("Block-Domain-example.com", true);
        rule.description = "Blocks connections".into();
        rule.direction = Direction::Outbound;
        let args = netsh_add_args(&rule);
        assert_eq!(args[0..4], ["advfirewall", "firewall", "add", "rule"]);
        assert!(args.contains(&"name=Block-Domain-example.com".to_string()));
        assert!(args.contains(&"dir=out".to_string()));
        assert!(args.contains(&"action=block".to_string()));
        assert!(args.contains(&"enable=yes".to_string()));
        assert!(args.contains(&"protocol=tcp".to_string()));
        assert!(args.contains(&"localport=8080".to_string()));
    }

    #[test]
    fn test_netsh_add_args_omit_empty_fields() {
        let mut rule = make_rule("minimal", false);
        rule.protocol = Protocol::Any;
        rule.port = None;
        let args = netsh_add_args(&rule);
        assert!(args.contains(&"enable=no".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("protocol=")));
        assert!(!args.iter().any(|a| a.starts_with("localport=")));
        assert!(!args.iter().any(|a| a.starts_with("description=")));
    }

    #[test]
    fn test_hosts_sinkhole_add_remove_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts");
        std::fs::write(&path, "127.0.0.1 localhost\n").unwrap();

        let hosts = HostsSinkhole::new(path.clone());
        hosts.add("example.com").unwrap();
        hosts.add("example.com").unwrap();
        hosts.add("tracker.net").unwrap();
        assert_eq!(hosts.entries().unwrap(), vec!["example.com", "tracker.net"]);

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("127.0.0.1 localhost\n"));
        assert!(content.contains("0.0.0.0 example.com"));

        hosts.remove("example.com").unwrap();
        hosts.remove("example.com").unwrap();
        assert_eq!(hosts.entries().unwrap(), vec!["tracker.net"]);

        hosts.remove("tracker.net").unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "127.0.0.1 localhost\n");
        assert!(!content.contains(config::HOSTS_MARKER_BEGIN));
    }

    #[test]
    fn test_hosts_sinkhole_missing_file_treated_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let hosts = HostsSinkhole::new(dir.path().join("hosts"));
        assert!(hosts.entries().unwrap().is_empty());
        hosts.add("example.com").unwrap();
        assert_eq!(hosts.entries().unwrap(), vec!["example.com"]);
    }

    #[test]
    fn test_memory_enforcer_rollback_switch() {
        let enforcer = MemoryEnforcer::new();
        enforcer.apply_rule(&make_rule("ok", true)).unwrap();
        assert_eq!(enforcer.applied_rules(), vec!["ok"]);

        enforcer.set_failing(true);
        assert!(enforcer.apply_rule(&make_rule("fails", true)).is_err());
        assert!(enforcer.block_domain("example.com").is_err());

        enforcer.set_failing(false);
        let addrs = enforcer.block_domain("example.com").unwrap();
        assert!(!addrs.is_empty());
        assert_eq!(enforcer.blocked_domains(), vec!["example.com"]);
        enforcer.unblock_domain("example.com").unwrap();
        assert!(enforcer.blocked_domains().is_empty());
    }

    #[test]
    fn test_retract_absent_rule_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let enforcer = OsEnforcer::new(dir.path().join("hosts"));
        // Nothing mirrored: must not shell out, must not fail.
        enforcer.retract_rule("never-applied").unwrap();
        enforcer.unblock_domain("never-blocked").unwrap();
    }
}
