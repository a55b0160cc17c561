use std::collections::BTreeMap;
use std::time::Duration;

use tracing::debug;

use crate::dispatch::{Dispatcher, TrayCommand};
use crate::state::{SharedState, TrayState};

pub const ROOT_ID: i32 = 0;
pub const TOGGLE_ID: i32 = 1;
pub const CONNECTION_INFO_ID: i32 = 3;
pub const STATUS_ID: i32 = 4;
pub const EXIT_NODE_ID: i32 = 6;
pub const RESOURCES_ID: i32 = 7;
pub const WEB_ADMIN_ID: i32 = 8;
pub const DIAGNOSTIC_REPORT_ID: i32 = 9;
pub const ABOUT_ID: i32 = 11;
pub const QUIT_ID: i32 = 13;
pub const NETWORK_ID: i32 = 14;
pub const CONNECTION_TIME_ID: i32 = 15;
pub const REFRESH_ID: i32 = 16;
pub const AUTO_CONNECT_ID: i32 = 17;

// Exit node submenu items live in 100..200 so they never collide with the
// top level entries.
pub const EXIT_NODE_START_ID: i32 = 101;
pub const EXIT_NODE_STOP_ID: i32 = 102;
pub const EXIT_NODE_SWITCH_ID: i32 = 103;
pub const EXIT_NODE_LIST_ID: i32 = 104;

pub const CLICKED: &str = "clicked";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Action,
    Separator,
    SubmenuRoot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Label {
    None,
    Fixed(&'static str),
    ByConnection {
        connected: &'static str,
        disconnected: &'static str,
    },
    Network,
    ConnectionTime,
}

impl Label {
    fn text(self, state: &TrayState) -> Option<String> {
        match self {
            Label::None => None,
            Label::Fixed(label) => Some(label.to_string()),
            Label::ByConnection {
                connected,
                disconnected,
            } => {
                let label = if state.connected() { connected } else { disconnected };
                Some(label.to_string())
            }
            Label::Network => Some(format!("Network: {}", state.network().unwrap_or("-"))),
            Label::ConnectionTime => Some(format!(
                "Connected for: {}",
                state.connection_time().unwrap_or("just now")
            )),
        }
    }
}

/// When an item is enabled or visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Availability {
    Always,
    Never,
    WhenConnected,
}

impl Availability {
    fn holds(self, state: &TrayState) -> bool {
        match self {
            Availability::Always => true,
            Availability::Never => false,
            Availability::WhenConnected => state.connected(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    None,
    ToggleConnection,
    ToggleAutoConnect,
    Run(TrayCommand),
}

#[derive(Debug, Clone)]
pub struct MenuItem {
    pub id: i32,
    pub kind: ItemKind,
    label: Label,
    enabled: Availability,
    visible: Availability,
    checkmark: bool,
    pub children: Vec<i32>,
    action: Action,
}

impl MenuItem {
    fn new(id: i32, kind: ItemKind) -> Self {
        MenuItem {
            id,
            kind,
            label: Label::None,
            enabled: Availability::Always,
            visible: Availability::Always,
            checkmark: false,
            children: Vec::new(),
            action: Action::None,
        }
    }

    fn separator(id: i32) -> Self {
        MenuItem::new(id, ItemKind::Separator)
    }

    fn action(id: i32, label: &'static str, command: TrayCommand) -> Self {
        MenuItem {
            label: Label::Fixed(label),
            action: Action::Run(command),
            ..MenuItem::new(id, ItemKind::Action)
        }
    }

    /// A disabled entry that only shows information.
    fn detail(id: i32, label: Label) -> Self {
        MenuItem {
            label,
            enabled: Availability::Never,
            ..MenuItem::new(id, ItemKind::Action)
        }
    }

    fn when_connected(self) -> Self {
        MenuItem {
            enabled: Availability::WhenConnected,
            ..self
        }
    }

    fn shown_when_connected(self) -> Self {
        MenuItem {
            visible: Availability::WhenConnected,
            ..self
        }
    }

    pub fn label(&self, state: &TrayState) -> Option<String> {
        self.label.text(state)
    }

    pub fn enabled(&self, state: &TrayState) -> bool {
        self.enabled.holds(state)
    }

    pub fn visible(&self, state: &TrayState) -> bool {
        self.visible.holds(state)
    }

    /// Every property the item currently has.
    pub fn properties(&self, state: &TrayState) -> ItemProperties {
        let mut props = ItemProperties::new();
        if self.kind == ItemKind::Separator {
            props.insert("type".into(), PropertyValue::Text("separator".into()));
            props.insert("visible".into(), PropertyValue::Flag(self.visible(state)));
            return props;
        }
        if self.kind == ItemKind::SubmenuRoot {
            props.insert("children-display".into(), PropertyValue::Text("submenu".into()));
        }
        if let Some(label) = self.label(state) {
            props.insert("label".into(), PropertyValue::Text(label));
            props.insert("enabled".into(), PropertyValue::Flag(self.enabled(state)));
            props.insert("visible".into(), PropertyValue::Flag(self.visible(state)));
        }
        if self.checkmark {
            props.insert("toggle-type".into(), PropertyValue::Text("checkmark".into()));
            props.insert(
                "toggle-state".into(),
                PropertyValue::Number(i32::from(state.auto_connect())),
            );
        }
        props
    }
}

/// Property values used by menu items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    Text(String),
    Flag(bool),
    Number(i32),
}

impl From<PropertyValue> for zvariant::Value<'static> {
    fn from(value: PropertyValue) -> Self {
        match value {
            PropertyValue::Text(text) => zvariant::Value::from(text),
            PropertyValue::Flag(flag) => zvariant::Value::from(flag),
            PropertyValue::Number(number) => zvariant::Value::from(number),
        }
    }
}

pub type ItemProperties = BTreeMap<String, PropertyValue>;

/// One node of a `GetLayout` answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutNode {
    pub id: i32,
    pub properties: ItemProperties,
    pub children: Vec<LayoutNode>,
}

/// Short connection time for the menu: `45s`, `12m`, `3h 4m`, `2d 5h`.
pub fn elapsed_label(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    if secs < 60 {
        return format!("{secs}s");
    }
    if secs < 3600 {
        return format!("{}m", secs / 60);
    }
    let hours = secs / 3600;
    if hours < 24 {
        return match (secs / 60) % 60 {
            0 => format!("{hours}h"),
            mins => format!("{hours}h {mins}m"),
        };
    }
    match hours % 24 {
        0 => format!("{}d", hours / 24),
        rest => format!("{}d {rest}h", hours / 24),
    }
}

/// The item tree of the tray menu.
pub struct MenuModel {
    items: BTreeMap<i32, MenuItem>,
    state: SharedState,
    dispatcher: Dispatcher,
}

fn default_items() -> Vec<MenuItem> {
    vec![
        MenuItem {
            children: vec![
                TOGGLE_ID,
                2,
                NETWORK_ID,
                CONNECTION_TIME_ID,
                STATUS_ID,
                5,
                REFRESH_ID,
                CONNECTION_INFO_ID,
                18,
                EXIT_NODE_ID,
                RESOURCES_ID,
                19,
                WEB_ADMIN_ID,
                DIAGNOSTIC_REPORT_ID,
                AUTO_CONNECT_ID,
                10,
                ABOUT_ID,
                12,
                QUIT_ID,
            ],
            ..MenuItem::new(ROOT_ID, ItemKind::SubmenuRoot)
        },
        MenuItem {
            label: Label::ByConnection {
                connected: "Disconnect",
                disconnected: "Connect",
            },
            action: Action::ToggleConnection,
            ..MenuItem::new(TOGGLE_ID, ItemKind::Action)
        },
        MenuItem::separator(2),
        MenuItem::detail(NETWORK_ID, Label::Network).shown_when_connected(),
        MenuItem::detail(CONNECTION_TIME_ID, Label::ConnectionTime).shown_when_connected(),
        MenuItem::detail(
            STATUS_ID,
            Label::ByConnection {
                connected: "Status: Connected",
                disconnected: "Status: Disconnected",
            },
        ),
        MenuItem::separator(5),
        MenuItem::action(REFRESH_ID, "Refresh Status", TrayCommand::RefreshStatus),
        MenuItem::action(
            CONNECTION_INFO_ID,
            "Connection Info...",
            TrayCommand::ShowConnectionInfo,
        ),
        MenuItem::separator(18),
        MenuItem {
            label: Label::Fixed("Exit Node"),
            enabled: Availability::WhenConnected,
            children: vec![
                EXIT_NODE_START_ID,
                EXIT_NODE_STOP_ID,
                EXIT_NODE_LIST_ID,
                EXIT_NODE_SWITCH_ID,
            ],
            ..MenuItem::new(EXIT_NODE_ID, ItemKind::SubmenuRoot)
        },
        MenuItem::action(EXIT_NODE_START_ID, "Start Exit Node", TrayCommand::StartExitNode)
            .when_connected(),
        MenuItem::action(EXIT_NODE_STOP_ID, "Stop Exit Node", TrayCommand::StopExitNode)
            .when_connected(),
        MenuItem::action(EXIT_NODE_LIST_ID, "Exit Nodes...", TrayCommand::ListExitNodes)
            .when_connected(),
        MenuItem::action(
            EXIT_NODE_SWITCH_ID,
            "Switch Exit Node...",
            TrayCommand::SwitchExitNode,
        )
        .when_connected(),
        MenuItem::action(RESOURCES_ID, "Resources...", TrayCommand::ShowResources)
            .when_connected(),
        MenuItem::separator(19),
        MenuItem::action(WEB_ADMIN_ID, "Open Web Admin", TrayCommand::OpenWebAdmin),
        MenuItem::action(
            DIAGNOSTIC_REPORT_ID,
            "Generate Diagnostic Report",
            TrayCommand::DiagnosticReport,
        ),
        MenuItem {
            label: Label::Fixed("Auto-connect"),
            checkmark: true,
            action: Action::ToggleAutoConnect,
            ..MenuItem::new(AUTO_CONNECT_ID, ItemKind::Action)
        },
        MenuItem::separator(10),
        MenuItem::action(ABOUT_ID, "About", TrayCommand::ShowAbout),
        MenuItem::separator(12),
        MenuItem::action(QUIT_ID, "Quit", TrayCommand::Quit),
    ]
}

impl MenuModel {
    pub fn new(state: SharedState, dispatcher: Dispatcher) -> Self {
        MenuModel {
            items: default_items().into_iter().map(|item| (item.id, item)).collect(),
            state,
            dispatcher,
        }
    }

    /// Returns the current revision and the tree below `parent_id`.
    ///
    /// A negative `depth` means unlimited, `0` returns the node alone. An
    /// empty `filter` includes every property. `None` if the parent is unknown.
    pub fn get_layout(&self, parent_id: i32, depth: i32, filter: &[String]) -> Option<(u32, LayoutNode)> {
        let snapshot = self.state.snapshot();
        debug!(parent_id, depth, ?filter, revision = snapshot.menu_revision(), "GetLayout");
        let node = self.layout_node(parent_id, depth, filter, &snapshot)?;
        Some((snapshot.menu_revision(), node))
    }

    fn layout_node(&self, id: i32, depth: i32, filter: &[String], state: &TrayState) -> Option<LayoutNode> {
        let item = self.items.get(&id)?;
        let children = if depth == 0 {
            Vec::new()
        } else {
            let below = if depth < 0 { depth } else { depth - 1 };
            item.children
                .iter()
                .filter_map(|child| self.layout_node(*child, below, filter, state))
                .collect()
        };
        Some(LayoutNode {
            id,
            properties: filtered(item.properties(state), filter),
            children,
        })
    }

    /// Properties of every known id in `ids`; unknown ids are skipped.
    pub fn get_group_properties(&self, ids: &[i32], filter: &[String]) -> Vec<(i32, ItemProperties)> {
        let state = self.state.snapshot();
        debug!(?ids, ?filter, "GetGroupProperties");
        ids.iter()
            .filter_map(|id| self.items.get(id))
            .map(|item| (item.id, filtered(item.properties(&state), filter)))
            .collect()
    }

    /// Single property lookup. Unknown ids and names yield `None`.
    pub fn get_property(&self, id: i32, name: &str) -> Option<PropertyValue> {
        let item = self.items.get(&id)?;
        item.properties(&self.state.snapshot()).remove(name)
    }

    /// Handles a menu event and dispatches the resulting command, if any.
    ///
    /// The command runs as an independent unit of work; this returns before
    /// it necessarily completes.
    pub fn event(&self, id: i32, event_kind: &str) -> Option<TrayCommand> {
        debug!(id, event_kind, "menu event");
        if event_kind != CLICKED || id == ROOT_ID {
            return None;
        }
        let command = match self.items.get(&id)?.action {
            Action::None => return None,
            Action::ToggleConnection => {
                if self.state.connected() {
                    TrayCommand::Disconnect
                } else {
                    TrayCommand::Connect
                }
            }
            Action::ToggleAutoConnect => {
                TrayCommand::SetAutoConnect(!self.state.snapshot().auto_connect())
            }
            Action::Run(command) => command,
        };
        self.dispatcher.submit(command);
        Some(command)
    }

    /// Applies [`event`](Self::event) to each entry in order. Dispatch is
    /// best effort, so the returned list of failed ids is always empty.
    pub fn event_group<'a, I>(&self, events: I) -> Vec<i32>
    where
        I: IntoIterator<Item = (i32, &'a str)>,
    {
        for (id, event_kind) in events {
            self.event(id, event_kind);
        }
        Vec::new()
    }

    /// Always asks for an update. Opening the top level menu also
    /// dispatches [`TrayCommand::MenuOpening`] so the details get refreshed.
    pub fn about_to_show(&self, id: i32) -> bool {
        if id == ROOT_ID {
            self.dispatcher.submit(TrayCommand::MenuOpening);
        }
        true
    }

    /// Returns `(ids needing an update, ids with errors)`.
    pub fn about_to_show_group(&self, ids: &[i32]) -> (Vec<i32>, Vec<i32>) {
        if ids.contains(&ROOT_ID) {
            self.dispatcher.submit(TrayCommand::MenuOpening);
        }
        (ids.to_vec(), Vec::new())
    }
}

fn filtered(mut props: ItemProperties, filter: &[String]) -> ItemProperties {
    if !filter.is_empty() {
        props.retain(|name, _| filter.contains(name));
    }
    props
}
