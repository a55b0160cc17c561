use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;

use crate::icon::{self, IconPixmap};

/// Everything the tray shows: connection flag, icon, the details listed in
/// the menu and the menu revision.
///
/// The icon always belongs to the committed `connected` value. Every change
/// that alters the menu bumps `menu_revision` in the same write.
#[derive(Debug, Clone)]
pub struct TrayState {
    connected: bool,
    icon: Arc<IconPixmap>,
    menu_revision: u32,
    network: Option<String>,
    connected_since: Option<Instant>,
    connection_time: Option<String>,
    auto_connect: bool,
}

impl TrayState {
    fn new() -> Self {
        TrayState {
            connected: false,
            icon: Arc::new(icon::render(false)),
            menu_revision: 1,
            network: None,
            connected_since: None,
            connection_time: None,
            auto_connect: false,
        }
    }

    pub fn connected(&self) -> bool {
        self.connected
    }

    pub fn icon(&self) -> Arc<IconPixmap> {
        Arc::clone(&self.icon)
    }

    pub fn menu_revision(&self) -> u32 {
        self.menu_revision
    }

    pub fn network(&self) -> Option<&str> {
        self.network.as_deref()
    }

    /// Connection time as last published, `None` right after connecting.
    pub fn connection_time(&self) -> Option<&str> {
        self.connection_time.as_deref()
    }

    pub fn auto_connect(&self) -> bool {
        self.auto_connect
    }

    fn bump(&mut self) -> u32 {
        self.menu_revision = self.menu_revision.wrapping_add(1);
        self.menu_revision
    }
}

/// Reader/writer handle on the single [`TrayState`] of the process.
#[derive(Debug, Clone)]
pub struct SharedState {
    inner: Arc<RwLock<TrayState>>,
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedState {
    pub fn new() -> Self {
        SharedState {
            inner: Arc::new(RwLock::new(TrayState::new())),
        }
    }

    pub fn connected(&self) -> bool {
        self.inner.read().connected
    }

    pub fn icon(&self) -> Arc<IconPixmap> {
        self.inner.read().icon()
    }

    pub fn menu_revision(&self) -> u32 {
        self.inner.read().menu_revision
    }

    pub fn connected_since(&self) -> Option<Instant> {
        self.inner.read().connected_since
    }

    /// Consistent copy of the whole state taken under one read lock.
    pub fn snapshot(&self) -> TrayState {
        self.inner.read().clone()
    }

    /// Commits a new connection state together with its icon.
    ///
    /// Returns the new revision, or `None` when `connected` was already the
    /// committed value. Connecting starts the connection clock, disconnecting
    /// clears it.
    pub fn commit(&self, connected: bool, icon: IconPixmap) -> Option<u32> {
        let mut state = self.inner.write();
        if state.connected == connected {
            return None;
        }
        state.connected = connected;
        state.icon = Arc::new(icon);
        state.connected_since = connected.then(Instant::now);
        state.connection_time = None;
        Some(state.bump())
    }

    pub fn set_network(&self, network: Option<String>) -> Option<u32> {
        let mut state = self.inner.write();
        if state.network == network {
            return None;
        }
        state.network = network;
        Some(state.bump())
    }

    pub fn set_auto_connect(&self, enabled: bool) -> Option<u32> {
        let mut state = self.inner.write();
        if state.auto_connect == enabled {
            return None;
        }
        state.auto_connect = enabled;
        Some(state.bump())
    }

    /// Publishes a new connection time. Ignored while disconnected.
    pub fn set_connection_time(&self, elapsed: String) -> Option<u32> {
        let mut state = self.inner.write();
        if !state.connected || state.connection_time.as_deref() == Some(elapsed.as_str()) {
            return None;
        }
        state.connection_time = Some(elapsed);
        Some(state.bump())
    }
}
