use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, Mutex, Notify};
use tracing::{debug, info};
use zvariant::{ObjectPath, Value};

use crate::bus::{BusSession, ITEM_INTERFACE, MENU_INTERFACE, MENU_PATH};
use crate::dispatch::{CommandHandler, Dispatcher};
use crate::error::TrayError;
use crate::icon::{self, IconPixmap};
use crate::menu::{self, MenuModel};
use crate::properties::{PropertyEntry, PropertyRegistry};
use crate::state::SharedState;

pub const TITLE: &str = "Twingate";
pub const ITEM_ID: &str = "twingate-indicator";
pub const CATEGORY: &str = "Communications";
pub const STATUS: &str = "Active";
pub const TOOLTIP_CONNECTED: &str = "Twingate - Connected";
pub const TOOLTIP_DISCONNECTED: &str = "Twingate - Disconnected";

/// dbusmenu protocol version implemented by the menu object.
pub const MENU_VERSION: u32 = 3;

/// Change notifications the bus session turns into signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraySignal {
    NewIcon,
    NewToolTip,
    LayoutUpdated { revision: u32, parent: i32 },
}

/// Receiving half of the tray's signal channel, handed to [`StatusTray::start`].
pub type SignalReceiver = mpsc::UnboundedReceiver<TraySignal>;

/// `ToolTip` property layout: `(sa(iiay)ss)`.
#[derive(Debug, Clone, PartialEq, Eq, zvariant::Type, zvariant::Value)]
pub struct ToolTip {
    pub icon_name: String,
    pub icon_pixmap: Vec<IconPixmap>,
    pub title: String,
    pub description: String,
}

pub fn tooltip_for(connected: bool) -> ToolTip {
    ToolTip {
        icon_name: String::new(),
        icon_pixmap: Vec::new(),
        title: TITLE.to_string(),
        description: if connected {
            TOOLTIP_CONNECTED
        } else {
            TOOLTIP_DISCONNECTED
        }
        .to_string(),
    }
}

/// The tray state machine: owns the connection state, the menu model and
/// the bus session, and is the only place that changes the state.
pub struct StatusTray {
    state: SharedState,
    menu: MenuModel,
    signals: mpsc::UnboundedSender<TraySignal>,
    session: Mutex<Option<BusSession>>,
    lost: Arc<Notify>,
}

impl StatusTray {
    pub fn new(handler: Arc<dyn CommandHandler>) -> (Arc<Self>, SignalReceiver) {
        let state = SharedState::new();
        let (signals, receiver) = mpsc::unbounded_channel();
        let tray = StatusTray {
            menu: MenuModel::new(state.clone(), Dispatcher::new(handler)),
            state,
            signals,
            session: Mutex::new(None),
            lost: Arc::new(Notify::new()),
        };
        (Arc::new(tray), receiver)
    }

    pub fn menu(&self) -> &MenuModel {
        &self.menu
    }

    pub fn connected(&self) -> bool {
        self.state.connected()
    }

    pub fn menu_revision(&self) -> u32 {
        self.state.menu_revision()
    }

    /// Acquires the bus name, exports both objects and registers with the
    /// watcher. Calling it on a started tray does nothing.
    pub async fn start(self: &Arc<Self>, signals: SignalReceiver) -> Result<(), TrayError> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            return Ok(());
        }
        *session = Some(BusSession::open(Arc::clone(self), signals, Arc::clone(&self.lost)).await?);
        info!("system tray initialized");
        Ok(())
    }

    /// Records a new connection state.
    ///
    /// Nothing happens when `connected` equals the committed value. Otherwise
    /// the icon is re-rendered, the menu revision bumped, and the icon,
    /// tooltip and layout change signals are queued.
    pub fn update_status(&self, connected: bool) {
        if self.state.connected() == connected {
            return;
        }
        let Some(revision) = self.state.commit(connected, icon::render(connected)) else {
            return;
        };
        for signal in [
            TraySignal::NewIcon,
            TraySignal::NewToolTip,
            TraySignal::LayoutUpdated {
                revision,
                parent: menu::ROOT_ID,
            },
        ] {
            // the receiver is gone once the session stopped
            let _ = self.signals.send(signal);
        }
        info!(
            revision,
            "tray status updated: {}",
            if connected {
                "connected to Twingate"
            } else {
                "disconnected from Twingate"
            }
        );
    }

    /// Shows the network name in the menu.
    pub fn set_network(&self, network: Option<String>) {
        if let Some(revision) = self.state.set_network(network) {
            self.layout_changed(revision);
        }
    }

    /// Reflects whether the client service starts at boot.
    pub fn set_auto_connect(&self, enabled: bool) {
        if let Some(revision) = self.state.set_auto_connect(enabled) {
            self.layout_changed(revision);
        }
    }

    /// Brings the "Connected for" entry up to date.
    pub fn refresh_connection_time(&self) {
        self.refresh_connection_time_at(Instant::now());
    }

    fn refresh_connection_time_at(&self, now: Instant) {
        let Some(since) = self.state.connected_since() else {
            return;
        };
        let elapsed = menu::elapsed_label(now.saturating_duration_since(since));
        if let Some(revision) = self.state.set_connection_time(elapsed) {
            self.layout_changed(revision);
        }
    }

    fn layout_changed(&self, revision: u32) {
        debug!(revision, "menu details changed");
        let _ = self.signals.send(TraySignal::LayoutUpdated {
            revision,
            parent: menu::ROOT_ID,
        });
    }

    /// Releases the bus connection. Safe to call repeatedly or before `start`.
    pub async fn stop(&self) {
        if let Some(session) = self.session.lock().await.take() {
            session.close().await;
        }
    }

    /// Completes when the bus connection of a started tray goes away.
    pub async fn connection_lost(&self) {
        self.lost.notified().await;
    }

    /// Properties of the item object.
    pub fn item_properties(&self) -> PropertyRegistry {
        let icon_state = self.state.clone();
        let tooltip_state = self.state.clone();
        let no_pixmaps = || Value::from(Vec::<IconPixmap>::new());
        PropertyRegistry::new()
            .with(ITEM_INTERFACE, "Category", PropertyEntry::fixed(CATEGORY))
            .with(ITEM_INTERFACE, "Id", PropertyEntry::fixed(ITEM_ID))
            .with(ITEM_INTERFACE, "Title", PropertyEntry::fixed(TITLE))
            .with(ITEM_INTERFACE, "Status", PropertyEntry::fixed(STATUS))
            .with(ITEM_INTERFACE, "WindowId", PropertyEntry::fixed(0i32))
            .with(ITEM_INTERFACE, "IconName", PropertyEntry::fixed(""))
            .with(
                ITEM_INTERFACE,
                "IconPixmap",
                PropertyEntry::dynamic(move || Value::from(vec![(*icon_state.icon()).clone()])),
            )
            .with(ITEM_INTERFACE, "OverlayIconName", PropertyEntry::fixed(""))
            .with(ITEM_INTERFACE, "OverlayIconPixmap", PropertyEntry::Static(no_pixmaps()))
            .with(ITEM_INTERFACE, "AttentionIconName", PropertyEntry::fixed(""))
            .with(ITEM_INTERFACE, "AttentionIconPixmap", PropertyEntry::Static(no_pixmaps()))
            .with(ITEM_INTERFACE, "AttentionMovieName", PropertyEntry::fixed(""))
            .with(
                ITEM_INTERFACE,
                "ToolTip",
                PropertyEntry::dynamic(move || Value::from(tooltip_for(tooltip_state.connected()))),
            )
            .with(
                ITEM_INTERFACE,
                "Menu",
                PropertyEntry::fixed(ObjectPath::from_static_str_unchecked(MENU_PATH)),
            )
            .with(ITEM_INTERFACE, "ItemIsMenu", PropertyEntry::fixed(true))
    }

    /// Properties of the menu object.
    pub fn menu_properties(&self) -> PropertyRegistry {
        PropertyRegistry::new()
            .with(MENU_INTERFACE, "Version", PropertyEntry::fixed(MENU_VERSION))
            .with(MENU_INTERFACE, "TextDirection", PropertyEntry::fixed("ltr"))
            .with(MENU_INTERFACE, "Status", PropertyEntry::fixed("normal"))
            .with(
                MENU_INTERFACE,
                "IconThemePath",
                PropertyEntry::fixed(Vec::<String>::new()),
            )
    }

    // With ItemIsMenu set, shells open the menu themselves; these are only
    // logged for the ones that call them anyway.

    pub fn activate(&self, x: i32, y: i32) {
        debug!(x, y, "tray icon activated");
    }

    pub fn secondary_activate(&self, x: i32, y: i32) {
        debug!(x, y, "tray icon secondary activated");
    }

    pub fn context_menu(&self, x: i32, y: i32) {
        debug!(x, y, "tray icon context menu requested");
    }

    pub fn scroll(&self, delta: i32, orientation: &str) {
        debug!(delta, orientation, "tray icon scrolled");
    }
}
