use std::process::Command;

use tracing::debug;

use crate::error::TrayError;

/// systemd unit of the Twingate client.
pub const SERVICE: &str = "twingate";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInfo {
    pub user: String,
    pub network: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub name: String,
    pub address: String,
    pub auth_status: String,
    pub needs_auth: bool,
}

impl Resource {
    /// Row shown in the resource picker.
    pub fn label(&self) -> String {
        let mut label = format!("{} | {}", self.name, self.address);
        if self.needs_auth {
            label.push_str(" [Locked]");
        }
        label
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExitNodes {
    pub available: Vec<String>,
    pub active: Option<String>,
}

impl ExitNodes {
    pub fn enabled(&self) -> bool {
        self.active.is_some()
    }
}

/// `systemctl is-enabled` prints `enabled` for units started at boot.
pub fn parse_unit_enabled(output: &str) -> bool {
    output.trim() == "enabled"
}

/// Connected iff the client reports `online`.
pub fn parse_status(output: &str) -> bool {
    output.trim().starts_with("online")
}

fn tsv_fields(line: &str) -> Vec<&str> {
    line.split('\t').map(str::trim).collect()
}

fn field_or_dash(fields: &[&str], index: usize) -> String {
    match fields.get(index) {
        Some(value) if !value.is_empty() => value.to_string(),
        _ => "-".to_string(),
    }
}

/// Parses `account list -d`: a header, then `user\tnetwork\turl` rows. The
/// first account wins.
pub fn parse_accounts(output: &str) -> Option<NetworkInfo> {
    let line = output.trim().lines().nth(1)?;
    let fields = tsv_fields(line);
    Some(NetworkInfo {
        user: field_or_dash(&fields, 0),
        network: field_or_dash(&fields, 1),
        url: field_or_dash(&fields, 2),
    })
}

/// Parses `resources -d`: a header, then `name\taddress\t...` rows with the
/// auth status in the fourth column (third when there are only three).
pub fn parse_resources(output: &str) -> Vec<Resource> {
    output
        .trim()
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields = tsv_fields(line.trim());
            if fields.len() < 2 || fields[0].is_empty() {
                return None;
            }
            let auth_status = fields
                .get(3)
                .or_else(|| fields.get(2))
                .map(|s| s.to_string())
                .unwrap_or_default();
            Some(Resource {
                name: fields[0].to_string(),
                address: fields[1].to_string(),
                needs_auth: auth_status.to_lowercase().contains("locked"),
                auth_status,
            })
        })
        .collect()
}

/// Parses `exit-node list -d`: `name\tlocation\tactive` rows, header lines
/// start with `Name`.
pub fn parse_exit_nodes(output: &str) -> ExitNodes {
    let mut nodes = ExitNodes::default();
    for line in output.trim().lines().map(str::trim) {
        if line.is_empty() || line.starts_with("Name") {
            continue;
        }
        let fields = tsv_fields(line);
        let name = fields[0].to_string();
        if fields.get(2) == Some(&"true") {
            nodes.active = Some(name.clone());
        }
        nodes.available.push(name);
    }
    nodes
}

#[derive(Debug, Clone)]
pub struct TwingateCli {
    program: String,
}

impl Default for TwingateCli {
    fn default() -> Self {
        Self::new("twingate")
    }
}

impl TwingateCli {
    pub fn new(program: impl Into<String>) -> Self {
        TwingateCli {
            program: program.into(),
        }
    }

    /// Runs the client and returns stdout and stderr combined.
    pub fn output(&self, args: &[&str]) -> Result<String, TrayError> {
        debug!(program = %self.program, ?args, "running");
        let out = Command::new(&self.program).args(args).output()?;
        let mut text = String::from_utf8_lossy(&out.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&out.stderr));
        if !out.status.success() {
            return Err(TrayError::Command(format!(
                "{} {} failed: {}",
                self.program,
                args.join(" "),
                text.trim()
            )));
        }
        Ok(text)
    }

    fn privileged(&self, args: &[&str]) -> Result<(), TrayError> {
        elevated(&self.program, args)
    }

    pub fn check_status(&self) -> Result<bool, TrayError> {
        self.output(&["status"]).map(|out| parse_status(&out))
    }

    pub fn connect(&self) -> Result<(), TrayError> {
        self.privileged(&["start"])?;
        // restarts the desktop client if there is one
        let _ = self.output(&["desktop-restart"]);
        Ok(())
    }

    pub fn disconnect(&self) -> Result<(), TrayError> {
        self.privileged(&["stop"])?;
        let _ = self.output(&["desktop-stop"]);
        Ok(())
    }

    pub fn network_info(&self) -> Result<NetworkInfo, TrayError> {
        let out = self.output(&["account", "list", "-d"])?;
        Ok(parse_accounts(&out).unwrap_or_else(|| NetworkInfo {
            user: "-".into(),
            network: "-".into(),
            url: "-".into(),
        }))
    }

    pub fn resources(&self) -> Result<Vec<Resource>, TrayError> {
        self.output(&["resources", "-d"]).map(|out| parse_resources(&out))
    }

    pub fn authenticate(&self, resource: &str) -> Result<(), TrayError> {
        self.output(&["auth", resource]).map(|_| ())
    }

    pub fn exit_nodes(&self) -> Result<ExitNodes, TrayError> {
        self.output(&["exit-node", "list", "-d"])
            .map(|out| parse_exit_nodes(&out))
    }

    pub fn start_exit_node(&self) -> Result<(), TrayError> {
        self.privileged(&["exit-node", "start"])
    }

    pub fn stop_exit_node(&self) -> Result<(), TrayError> {
        self.privileged(&["exit-node", "stop"])
    }

    pub fn switch_exit_node(&self, name: &str) -> Result<(), TrayError> {
        self.privileged(&["exit-node", "switch", name])
    }

    pub fn diagnostic_report(&self) -> Result<String, TrayError> {
        self.output(&["report"])
    }

    /// Whether the client service starts at boot. Anything but a clear
    /// `enabled` counts as off.
    pub fn auto_connect_enabled(&self) -> bool {
        match Command::new("systemctl").args(["is-enabled", SERVICE]).output() {
            Ok(out) => parse_unit_enabled(&String::from_utf8_lossy(&out.stdout)),
            Err(e) => {
                debug!(error = %e, "could not run systemctl");
                false
            }
        }
    }

    pub fn set_auto_connect(&self, enabled: bool) -> Result<(), TrayError> {
        let verb = if enabled { "enable" } else { "disable" };
        elevated("systemctl", &[verb, SERVICE])
    }
}

/// Runs `program` as root through pkexec, falling back to sudo.
fn elevated(program: &str, args: &[&str]) -> Result<(), TrayError> {
    for elevator in ["pkexec", "sudo"] {
        match Command::new(elevator).arg(program).args(args).status() {
            Ok(status) if status.success() => return Ok(()),
            Ok(status) => debug!(elevator, program, %status, ?args, "privileged command failed"),
            Err(e) => debug!(elevator, error = %e, "could not run elevator"),
        }
    }
    Err(TrayError::Command(format!("{program} {} failed", args.join(" "))))
}
