use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::desktop::Desktop;
use crate::error::TrayError;
use crate::tray::StatusTray;
use crate::twingate::TwingateCli;

/// How often the "Connected for" entry is brought up to date.
pub const CONNECTION_TIME_INTERVAL: Duration = Duration::from_secs(30);

/// Work the menu asks the monitor to do out of turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refresh {
    /// Check the connection now and confirm with a notification.
    Status,
    /// The menu is about to open.
    MenuOpening,
    AutoConnect,
}

pub type RefreshSender = mpsc::UnboundedSender<Refresh>;
pub type RefreshReceiver = mpsc::UnboundedReceiver<Refresh>;

pub fn refresh_channel() -> (RefreshSender, RefreshReceiver) {
    mpsc::unbounded_channel()
}

/// Keeps the tray in step with the client: polls the status, tracks the
/// network name, connection time and auto-connect setting, and notifies on
/// connection changes.
pub struct Monitor {
    tray: Arc<StatusTray>,
    cli: TwingateCli,
    desktop: Desktop,
    previous: Option<bool>,
    failing: bool,
}

impl Monitor {
    pub fn new(tray: Arc<StatusTray>, cli: TwingateCli, desktop: Desktop) -> Self {
        Monitor {
            tray,
            cli,
            desktop,
            previous: None,
            failing: false,
        }
    }

    /// Runs until the task is aborted.
    pub async fn run(mut self, every: Duration, mut requests: RefreshReceiver) {
        let mut poll = tokio::time::interval(every);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut clock = tokio::time::interval(CONNECTION_TIME_INTERVAL);
        clock.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.refresh_auto_connect().await;
        loop {
            tokio::select! {
                _ = poll.tick() => self.poll().await,
                _ = clock.tick() => self.tray.refresh_connection_time(),
                Some(request) = requests.recv() => self.handle(request).await,
            }
        }
    }

    async fn handle(&mut self, request: Refresh) {
        debug!(?request, "refresh requested");
        match request {
            Refresh::Status => {
                info!("refreshing status");
                self.poll().await;
                self.refresh_network().await;
                self.notify("Status Refreshed", "Twingate status has been refreshed");
            }
            Refresh::MenuOpening => {
                self.tray.refresh_connection_time();
                self.refresh_auto_connect().await;
            }
            Refresh::AutoConnect => self.refresh_auto_connect().await,
        }
    }

    async fn poll(&mut self) {
        let cli = self.cli.clone();
        match tokio::task::spawn_blocking(move || cli.check_status()).await {
            Ok(result) => {
                if self.observe(result) == Some(true) {
                    self.refresh_network().await;
                }
            }
            Err(e) => error!(error = %e, "status check panicked"),
        }
    }

    /// Applies one status check to the tray. Returns the state when it
    /// differs from the previous check, including the very first one.
    ///
    /// Notifications go out for changes only, never for the first check.
    pub fn observe(&mut self, result: Result<bool, TrayError>) -> Option<bool> {
        let connected = match result {
            Ok(connected) => {
                self.failing = false;
                connected
            }
            Err(e) => {
                // a client that is not running counts as disconnected
                if !self.failing {
                    warn!(error = %e, "status check failed");
                }
                self.failing = true;
                false
            }
        };
        self.tray.update_status(connected);

        let previous = self.previous.replace(connected);
        if previous == Some(connected) {
            return None;
        }
        debug!(connected, "observed connection state");
        if previous.is_some() {
            if connected {
                self.notify("Twingate Connected", "You are now connected to Twingate");
            } else {
                self.notify(
                    "Twingate Disconnected",
                    "You are now disconnected from Twingate",
                );
            }
        }
        Some(connected)
    }

    fn notify(&self, title: &'static str, body: &'static str) {
        let desktop = self.desktop.clone();
        drop(tokio::task::spawn_blocking(move || desktop.notify(title, body)));
    }

    async fn refresh_network(&self) {
        let cli = self.cli.clone();
        match tokio::task::spawn_blocking(move || cli.network_info()).await {
            Ok(Ok(network)) => {
                let name = (network.network != "-").then_some(network.network);
                self.tray.set_network(name);
            }
            Ok(Err(e)) => warn!(error = %e, "failed to get network info"),
            Err(e) => error!(error = %e, "network lookup panicked"),
        }
    }

    async fn refresh_auto_connect(&self) {
        let cli = self.cli.clone();
        match tokio::task::spawn_blocking(move || cli.auto_connect_enabled()).await {
            Ok(enabled) => self.tray.set_auto_connect(enabled),
            Err(e) => error!(error = %e, "auto-connect lookup panicked"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::dispatch::testing::RecordingHandler;

    fn monitor() -> (Monitor, Arc<StatusTray>) {
        let (handler, _) = RecordingHandler::new();
        let (tray, _signals) = StatusTray::new(handler);
        let desktop = Desktop::new(&Config {
            notifications: false,
            ..Config::default()
        });
        let monitor = Monitor::new(
            Arc::clone(&tray),
            TwingateCli::new("twingate-tray-test-does-not-exist"),
            desktop,
        );
        (monitor, tray)
    }

    #[tokio::test]
    async fn test_observe_reports_changes() {
        let (mut monitor, tray) = monitor();
        assert_eq!(monitor.observe(Ok(false)), Some(false));
        assert_eq!(monitor.observe(Ok(false)), None);
        assert_eq!(monitor.observe(Ok(true)), Some(true));
        assert!(tray.connected());
        assert_eq!(monitor.observe(Ok(true)), None);
        assert_eq!(tray.menu_revision(), 2);
    }

    #[tokio::test]
    async fn test_failed_check_counts_as_disconnected() {
        let (mut monitor, tray) = monitor();
        monitor.observe(Ok(true));
        let failure = || Err(TrayError::Command("twingate status failed".into()));
        assert_eq!(monitor.observe(failure()), Some(false));
        assert!(!tray.connected());
        assert_eq!(monitor.observe(failure()), None);
        assert!(monitor.failing);
        monitor.observe(Ok(false));
        assert!(!monitor.failing);
    }

    #[tokio::test]
    async fn test_menu_opening_refreshes_connection_time() {
        let (mut monitor, tray) = monitor();
        monitor.observe(Ok(true));
        let revision = tray.menu_revision();
        monitor.handle(Refresh::MenuOpening).await;
        assert!(tray.menu_revision() > revision);
    }
}
