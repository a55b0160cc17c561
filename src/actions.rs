use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{error, info, warn};

use crate::desktop::Desktop;
use crate::dispatch::{CommandHandler, TrayCommand};
use crate::info::{self, ConnectionInfo};
use crate::monitor::{Refresh, RefreshSender};
use crate::twingate::{ExitNodes, Resource, TwingateCli};

const ACTIVE_SUFFIX: &str = " (active)";
const START_EXIT_NODE: &str = "Start Exit Node";
const STOP_EXIT_NODE: &str = "Stop Exit Node";
const OPTION_SEPARATOR: &str = "---";

pub struct Actions {
    cli: TwingateCli,
    desktop: Desktop,
    refresh: RefreshSender,
    shutdown: Arc<Notify>,
}

impl Actions {
    pub fn new(
        cli: TwingateCli,
        desktop: Desktop,
        refresh: RefreshSender,
        shutdown: Arc<Notify>,
    ) -> Self {
        Actions {
            cli,
            desktop,
            refresh,
            shutdown,
        }
    }

    fn request(&self, refresh: Refresh) {
        if self.refresh.send(refresh).is_err() {
            warn!(?refresh, "status monitor is gone");
        }
    }

    fn connect(&self) {
        if let Err(e) = self.cli.connect() {
            warn!(error = %e, "connect failed");
            self.desktop
                .notify("Connection Failed", &format!("Failed to connect: {e}"));
        }
    }

    fn disconnect(&self) {
        if let Err(e) = self.cli.disconnect() {
            warn!(error = %e, "disconnect failed");
            self.desktop
                .notify("Disconnection Failed", &format!("Failed to disconnect: {e}"));
        }
    }

    fn show_connection_info(&self) {
        let info = ConnectionInfo::gather(&self.cli);
        self.desktop
            .show_copyable("Twingate Connection Information", &info.to_plain_text());
    }

    fn start_exit_node(&self) {
        match self.cli.start_exit_node() {
            Ok(()) => self
                .desktop
                .notify("Exit Node Started", "All traffic is now routed through Twingate"),
            Err(e) => {
                warn!(error = %e, "failed to start exit node");
                self.desktop
                    .notify("Exit Node Failed", &format!("Failed to start exit node: {e}"));
            }
        }
    }

    fn stop_exit_node(&self) {
        match self.cli.stop_exit_node() {
            Ok(()) => self
                .desktop
                .notify("Exit Node Stopped", "Split tunnel mode restored"),
            Err(e) => {
                warn!(error = %e, "failed to stop exit node");
                self.desktop
                    .notify("Exit Node Failed", &format!("Failed to stop exit node: {e}"));
            }
        }
    }

    fn list_exit_nodes(&self) {
        let Some(nodes) = self.exit_nodes() else {
            return;
        };
        if nodes.available.is_empty() {
            self.desktop.show_message("Exit Nodes", "No exit nodes available");
            return;
        }
        let Some(choice) = self.desktop.choose(
            "Exit Nodes",
            "Select an action:",
            "Option",
            &exit_node_actions(&nodes),
        ) else {
            return;
        };
        match ExitNodeChoice::parse(&choice) {
            ExitNodeChoice::Start => self.start_exit_node(),
            ExitNodeChoice::Stop => self.stop_exit_node(),
            ExitNodeChoice::Switch(name) => self.switch_to(name),
            ExitNodeChoice::Nothing => {}
        }
    }

    fn switch_exit_node(&self) {
        let Some(nodes) = self.exit_nodes() else {
            return;
        };
        if nodes.available.is_empty() {
            self.desktop.notify("Exit Node Error", "No exit nodes available");
            return;
        }
        let Some(choice) = self.desktop.choose(
            "Switch Exit Node",
            "Select an exit node:",
            "Node",
            &exit_node_options(&nodes),
        ) else {
            return;
        };
        self.switch_to(exit_node_from_choice(&choice));
    }

    fn exit_nodes(&self) -> Option<ExitNodes> {
        match self.cli.exit_nodes() {
            Ok(nodes) => Some(nodes),
            Err(e) => {
                warn!(error = %e, "failed to list exit nodes");
                self.desktop
                    .notify("Exit Node Error", &format!("Failed to get exit nodes: {e}"));
                None
            }
        }
    }

    fn switch_to(&self, name: &str) {
        match self.cli.switch_exit_node(name) {
            Ok(()) => self
                .desktop
                .notify("Exit Node Switched", &format!("Now using exit node: {name}")),
            Err(e) => {
                warn!(error = %e, node = name, "failed to switch exit node");
                self.desktop.notify(
                    "Exit Node Failed",
                    &format!("Failed to switch to {name}: {e}"),
                );
            }
        }
    }

    fn set_auto_connect(&self, enabled: bool) {
        match self.cli.set_auto_connect(enabled) {
            Ok(()) if enabled => self.desktop.notify(
                "Auto-connect Enabled",
                "Twingate will connect automatically at startup",
            ),
            Ok(()) => self.desktop.notify(
                "Auto-connect Disabled",
                "Twingate will no longer connect at startup",
            ),
            Err(e) => {
                warn!(error = %e, enabled, "failed to change auto-connect");
                self.desktop.notify(
                    "Auto-connect Error",
                    &format!("Failed to change auto-connect: {e}"),
                );
            }
        }
        self.request(Refresh::AutoConnect);
    }

    fn show_resources(&self) {
        let resources = match self.cli.resources() {
            Ok(resources) => resources,
            Err(e) => {
                warn!(error = %e, "failed to list resources");
                self.desktop
                    .notify("Resources Error", &format!("Failed to get resources: {e}"));
                return;
            }
        };
        if resources.is_empty() {
            self.desktop.show_message("Resources", "No resources available");
            return;
        }
        let labels: Vec<String> = resources.iter().map(Resource::label).collect();
        let Some(choice) = self.desktop.choose(
            "Twingate Resources",
            "Available resources (select to authenticate locked resources):",
            "Resource",
            &labels,
        ) else {
            return;
        };
        let Some(resource) = select_resource(&resources, &choice) else {
            warn!(%choice, "selection does not match any resource");
            return;
        };
        if !resource.needs_auth {
            return;
        }
        match self.cli.authenticate(&resource.name) {
            Ok(()) => self.desktop.notify(
                "Authentication Started",
                &format!("Authentication initiated for {}", resource.name),
            ),
            Err(e) => {
                warn!(error = %e, resource = %resource.name, "authentication failed");
                self.desktop.notify(
                    "Authentication Failed",
                    &format!("Failed to authenticate {}: {e}", resource.name),
                );
            }
        }
    }

    fn open_web_admin(&self) {
        let url = match self.cli.network_info() {
            Ok(network) if network.url != "-" => network.url,
            Ok(_) => {
                self.desktop.notify("Web Admin Error", "Network URL not available");
                return;
            }
            Err(e) => {
                warn!(error = %e, "failed to get network info");
                self.desktop
                    .notify("Web Admin Error", &format!("Failed to get network info: {e}"));
                return;
            }
        };
        if let Err(e) = self.desktop.open_url(&url) {
            warn!(error = %e, %url, "failed to open web admin");
            self.desktop
                .notify("Web Admin Error", &format!("Failed to open browser: {e}"));
        }
    }

    fn diagnostic_report(&self) {
        match self.cli.diagnostic_report() {
            Ok(_) => self
                .desktop
                .notify("Diagnostic Report", "Diagnostic report generated successfully"),
            Err(e) => {
                error!(error = %e, "failed to generate diagnostic report");
                self.desktop.notify(
                    "Diagnostic Report Failed",
                    &format!("Failed to generate report: {e}"),
                );
            }
        }
    }

    fn show_about(&self) {
        let client = self
            .cli
            .output(&["version"])
            .ok()
            .and_then(|out| info::parse_version(&out));
        self.desktop.show_message("About Twingate Tray", &about_text(client.as_deref()));
    }
}

impl CommandHandler for Actions {
    fn handle(&self, command: TrayCommand) {
        info!(?command, "menu command");
        match command {
            TrayCommand::Connect => self.connect(),
            TrayCommand::Disconnect => self.disconnect(),
            TrayCommand::ShowConnectionInfo => self.show_connection_info(),
            TrayCommand::RefreshStatus => self.request(Refresh::Status),
            TrayCommand::StartExitNode => self.start_exit_node(),
            TrayCommand::StopExitNode => self.stop_exit_node(),
            TrayCommand::ListExitNodes => self.list_exit_nodes(),
            TrayCommand::SwitchExitNode => self.switch_exit_node(),
            TrayCommand::ShowResources => self.show_resources(),
            TrayCommand::OpenWebAdmin => self.open_web_admin(),
            TrayCommand::DiagnosticReport => self.diagnostic_report(),
            TrayCommand::SetAutoConnect(enabled) => self.set_auto_connect(enabled),
            TrayCommand::MenuOpening => self.request(Refresh::MenuOpening),
            TrayCommand::ShowAbout => self.show_about(),
            TrayCommand::Quit => self.shutdown.notify_one(),
        }
    }
}

/// Picker rows for the exit nodes, the active one marked.
pub fn exit_node_options(nodes: &ExitNodes) -> Vec<String> {
    nodes
        .available
        .iter()
        .map(|name| {
            if nodes.active.as_deref() == Some(name.as_str()) {
                format!("{name}{ACTIVE_SUFFIX}")
            } else {
                name.clone()
            }
        })
        .collect()
}

pub fn exit_node_from_choice(choice: &str) -> &str {
    choice.strip_suffix(ACTIVE_SUFFIX).unwrap_or(choice)
}

/// Rows of the exit node list: the start or stop action, a separator, then
/// the nodes.
pub fn exit_node_actions(nodes: &ExitNodes) -> Vec<String> {
    let toggle = if nodes.enabled() {
        STOP_EXIT_NODE
    } else {
        START_EXIT_NODE
    };
    [toggle.to_string(), OPTION_SEPARATOR.to_string()]
        .into_iter()
        .chain(exit_node_options(nodes))
        .collect()
}

#[derive(Debug, PartialEq, Eq)]
pub enum ExitNodeChoice<'a> {
    Start,
    Stop,
    Switch(&'a str),
    Nothing,
}

impl<'a> ExitNodeChoice<'a> {
    pub fn parse(choice: &'a str) -> Self {
        match choice {
            START_EXIT_NODE => ExitNodeChoice::Start,
            STOP_EXIT_NODE => ExitNodeChoice::Stop,
            OPTION_SEPARATOR | "" => ExitNodeChoice::Nothing,
            node => ExitNodeChoice::Switch(exit_node_from_choice(node)),
        }
    }
}

/// The resource whose picker row is exactly `choice`.
pub fn select_resource<'a>(resources: &'a [Resource], choice: &str) -> Option<&'a Resource> {
    resources.iter().find(|resource| resource.label() == choice)
}

pub fn about_text(client_version: Option<&str>) -> String {
    format!(
        "Twingate Tray {}\n\n{}\n\nClient: {}",
        env!("CARGO_PKG_VERSION"),
        env!("CARGO_PKG_DESCRIPTION"),
        client_version.unwrap_or("not installed"),
    )
}
