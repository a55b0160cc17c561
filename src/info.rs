use std::process::Command;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use tracing::debug;

use crate::twingate::{TwingateCli, SERVICE};

/// Network interface the Twingate client brings up.
pub const INTERFACE: &str = "sdwan0";

const LABEL_WIDTH: usize = 18;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub status: String,
    pub connected_since: String,
    pub network: String,
    pub network_url: String,
    pub user: String,
    pub secure_dns: String,
    pub client_version: String,
    pub interface: String,
    pub ip_address: String,
    pub dns_servers: String,
    pub dns_domain: String,
    pub routes: String,
    pub resources: String,
}

impl Default for ConnectionInfo {
    fn default() -> Self {
        let dash = || "-".to_string();
        ConnectionInfo {
            status: "Unknown".into(),
            connected_since: dash(),
            network: dash(),
            network_url: dash(),
            user: dash(),
            secure_dns: dash(),
            client_version: dash(),
            interface: dash(),
            ip_address: dash(),
            dns_servers: dash(),
            dns_domain: dash(),
            routes: dash(),
            resources: dash(),
        }
    }
}

impl ConnectionInfo {
    /// Collects every field. Blocks for as long as the slowest source.
    pub fn gather(cli: &TwingateCli) -> Self {
        let mut info = ConnectionInfo::default();

        if let Ok(out) = cli.output(&["status", "-v", "-d"]) {
            info.apply_status(&out);
        }
        if let Ok(account) = cli.network_info() {
            info.user = account.user;
            info.network = account.network;
            info.network_url = account.url;
        }
        if let Some(version) = cli.output(&["version"]).ok().and_then(|out| parse_version(&out)) {
            info.client_version = version;
        }
        if let Some(out) = run("ip", &["addr", "show", INTERFACE]) {
            info.interface = INTERFACE.to_string();
            if let Some(addr) = parse_inet(&out) {
                info.ip_address = addr;
            }
        }
        if let Some(out) = run("resolvectl", &["status", INTERFACE]) {
            let (servers, domain) = parse_dns(&out);
            if let Some(servers) = servers {
                info.dns_servers = servers;
            }
            if let Some(domain) = domain {
                info.dns_domain = domain;
            }
        }
        if let Some(routes) = run("ip", &["route", "show", "dev", INTERFACE]).and_then(|out| parse_routes(&out)) {
            info.routes = routes;
        }
        if let Ok(resources) = cli.resources() {
            if !resources.is_empty() {
                info.resources = resources
                    .iter()
                    .map(|r| format!("{} ({})", r.name, r.address))
                    .collect::<Vec<_>>()
                    .join("\n");
            }
        }
        let started = run(
            "systemctl",
            &[
                "show",
                SERVICE,
                "--property=ActiveEnterTimestamp",
                "--timestamp=unix",
            ],
        )
        .and_then(|out| parse_start_timestamp(&out));
        if let Some(started) = started {
            info.connected_since = describe_start(started);
        }

        info
    }

    fn apply_status(&mut self, output: &str) {
        for line in output.lines().map(str::trim) {
            if line.starts_with("Online") || line.starts_with("online") {
                self.status = "Online".into();
            } else if line.starts_with("Offline") || line.starts_with("offline") {
                self.status = "Offline".into();
            }
            if let Some(dns) = line.strip_prefix("Secure DNS:") {
                self.secure_dns = dns.trim().to_string();
            }
        }
    }

    fn rows(&self) -> [Option<(&'static str, &str)>; 17] {
        [
            Some(("Status", self.status.as_str())),
            Some(("Connected since", self.connected_since.as_str())),
            None,
            Some(("User", self.user.as_str())),
            Some(("Network", self.network.as_str())),
            Some(("Network URL", self.network_url.as_str())),
            None,
            Some(("Interface", self.interface.as_str())),
            Some(("IP address", self.ip_address.as_str())),
            Some(("DNS servers", self.dns_servers.as_str())),
            Some(("DNS domain", self.dns_domain.as_str())),
            Some(("Secure DNS", self.secure_dns.as_str())),
            None,
            Some(("Routes", self.routes.as_str())),
            None,
            Some(("Resources", self.resources.as_str())),
            Some(("Client version", self.client_version.as_str())),
        ]
    }

    /// Aligned plain text for the info dialog and the clipboard. Values
    /// spanning several lines are indented to the value column.
    pub fn to_plain_text(&self) -> String {
        let indent = format!("\n{}", " ".repeat(LABEL_WIDTH));
        self.rows()
            .iter()
            .map(|row| match row {
                Some((label, value)) => format!(
                    "{:<width$}{}",
                    format!("{label}:"),
                    value.replace('\n', &indent),
                    width = LABEL_WIDTH
                ),
                None => String::new(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn run(program: &str, args: &[&str]) -> Option<String> {
    match Command::new(program).args(args).output() {
        Ok(out) if out.status.success() => Some(String::from_utf8_lossy(&out.stdout).into_owned()),
        Ok(out) => {
            debug!(program, status = %out.status, "command failed");
            None
        }
        Err(e) => {
            debug!(program, error = %e, "could not run command");
            None
        }
    }
}

pub fn escape_markup(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// First line of `twingate version`, e.g. `twingate 2025.342.178568 | 0.178.0`.
pub fn parse_version(output: &str) -> Option<String> {
    let first = output.trim().lines().next()?.trim();
    first
        .to_lowercase()
        .starts_with("twingate")
        .then(|| first.to_string())
}

/// Address following the first `inet` in `ip addr show` output.
pub fn parse_inet(output: &str) -> Option<String> {
    let mut words = output.split_whitespace();
    while let Some(word) = words.next() {
        if word == "inet" {
            return words.next().map(str::to_string);
        }
    }
    None
}

/// DNS servers (deduplicated, comma separated) and domain from `resolvectl status`.
pub fn parse_dns(output: &str) -> (Option<String>, Option<String>) {
    let mut servers: Vec<&str> = Vec::new();
    let mut domain = None;
    for line in output.lines().map(str::trim) {
        if let Some(found) = after(line, "DNS Servers:").or_else(|| after(line, "Current DNS Server:")) {
            if !found.is_empty() && !servers.contains(&found) {
                servers.push(found);
            }
        }
        if let Some(found) = after(line, "DNS Domain:") {
            domain = Some(found.to_string());
        }
    }
    let servers = (!servers.is_empty()).then(|| servers.join(", "));
    (servers, domain)
}

fn after<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    line.strip_prefix(prefix).map(str::trim)
}

/// Route destinations from `ip route show dev ...`, comma separated.
pub fn parse_routes(output: &str) -> Option<String> {
    let routes: Vec<&str> = output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .collect();
    (!routes.is_empty()).then(|| routes.join(", "))
}

/// Seconds since the epoch from `ActiveEnterTimestamp=@<secs>`. An inactive
/// unit reports an empty value.
pub fn parse_start_timestamp(output: &str) -> Option<i64> {
    let value = output.trim().strip_prefix("ActiveEnterTimestamp=")?;
    value.trim().trim_start_matches('@').parse().ok()
}

fn describe_start(started: i64) -> String {
    describe_since(started, Utc::now().timestamp())
}

/// `2026-02-10 18:52:02 (3h 4m ago)` in local time.
pub fn describe_since(started: i64, now: i64) -> String {
    let elapsed = Duration::from_secs(now.saturating_sub(started).max(0) as u64);
    match DateTime::from_timestamp(started, 0) {
        Some(at) => format!(
            "{} ({} ago)",
            at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
            format_duration(elapsed)
        ),
        None => "-".to_string(),
    }
}

pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        return format!("{secs} seconds");
    }
    if secs < 3600 {
        return format!("{} minutes", secs / 60);
    }
    let hours = secs / 3600;
    if hours < 24 {
        let mins = (secs / 60) % 60;
        if mins > 0 {
            return format!("{hours}h {mins}m");
        }
        return format!("{hours} hours");
    }
    let days = hours / 24;
    let rest = hours % 24;
    if rest > 0 {
        format!("{days}d {rest}h")
    } else {
        format!("{days} days")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_markup() {
        assert_eq!(escape_markup("a & <b>"), "a &amp; &lt;b&gt;");
        assert_eq!(escape_markup("plain"), "plain");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(42)), "42 seconds");
        assert_eq!(format_duration(Duration::from_secs(5 * 60 + 3)), "5 minutes");
        assert_eq!(format_duration(Duration::from_secs(3 * 3600 + 4 * 60)), "3h 4m");
        assert_eq!(format_duration(Duration::from_secs(2 * 3600)), "2 hours");
        assert_eq!(format_duration(Duration::from_secs(2 * 86400 + 5 * 3600)), "2d 5h");
        assert_eq!(format_duration(Duration::from_secs(86400)), "1 days");
    }

    #[test]
    fn test_status_lines() {
        let mut info = ConnectionInfo::default();
        info.apply_status("Online\nSecure DNS: enabled\nUser: alice\n");
        assert_eq!(info.status, "Online");
        assert_eq!(info.secure_dns, "enabled");

        let mut info = ConnectionInfo::default();
        info.apply_status("offline\n");
        assert_eq!(info.status, "Offline");
        assert_eq!(info.secure_dns, "-");
    }

    #[test]
    fn test_parse_version() {
        assert_eq!(
            parse_version("twingate 2025.342.178568 | 0.178.0\nmore\n").as_deref(),
            Some("twingate 2025.342.178568 | 0.178.0")
        );
        assert_eq!(parse_version("command not found"), None);
    }

    #[test]
    fn test_parse_inet() {
        let out = "4: sdwan0: <POINTOPOINT,UP> mtu 1500\n    link/none\n    inet 100.96.1.2/32 scope global sdwan0\n    inet6 fe80::1/64 scope link\n";
        assert_eq!(parse_inet(out).as_deref(), Some("100.96.1.2/32"));
        assert_eq!(parse_inet("link/none"), None);
    }

    #[test]
    fn test_parse_dns() {
        let out = "Link 4 (sdwan0)\n  Current DNS Server: 100.95.0.251\n         DNS Servers: 100.95.0.251\n          DNS Domain: corp.example\n";
        let (servers, domain) = parse_dns(out);
        assert_eq!(servers.as_deref(), Some("100.95.0.251"));
        assert_eq!(domain.as_deref(), Some("corp.example"));
        assert_eq!(parse_dns(""), (None, None));
    }

    #[test]
    fn test_parse_routes() {
        let out = "10.0.0.0/8 scope link\n100.96.0.0/12 proto kernel\n";
        assert_eq!(parse_routes(out).as_deref(), Some("10.0.0.0/8, 100.96.0.0/12"));
        assert_eq!(parse_routes("\n"), None);
    }

    #[test]
    fn test_parse_start_timestamp() {
        assert_eq!(parse_start_timestamp("ActiveEnterTimestamp=@1739210000\n"), Some(1739210000));
        assert_eq!(parse_start_timestamp("ActiveEnterTimestamp=\n"), None);
        assert_eq!(parse_start_timestamp("garbage"), None);
    }

    #[test]
    fn test_describe_since() {
        let text = describe_since(1_000_000, 1_000_000 + 3 * 3600 + 4 * 60);
        assert!(text.ends_with(" (3h 4m ago)"), "{text}");
        // clock skew never produces a negative duration
        assert!(describe_since(2_000, 1_000).ends_with("(0 seconds ago)"));
    }

    #[test]
    fn test_describe_start_uses_current_time() {
        let started = Utc::now().timestamp() - 5 * 60 - 10;
        let text = describe_start(started);
        assert!(text.ends_with(" (5 minutes ago)"), "{text}");
    }

    #[test]
    fn test_plain_text() {
        let info = ConnectionInfo {
            status: "Online".into(),
            network: "R&D <lab>".into(),
            resources: "wiki (wiki.internal)\ndb (10.0.0.5)".into(),
            ..ConnectionInfo::default()
        };
        let text = info.to_plain_text();
        assert!(text.starts_with("Status:           Online\n"), "{text}");
        assert!(text.contains("\nNetwork:          R&D <lab>\n"));
        assert!(text.contains("\n\nUser:             -"));
        assert!(text.contains(
            "Resources:        wiki (wiki.internal)\n                  db (10.0.0.5)\n"
        ));
        assert!(text.ends_with("Client version:   -"));
    }
}
