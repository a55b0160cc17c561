pub mod actions;
pub mod bus;
pub mod config;
pub mod desktop;
pub mod dispatch;
pub mod error;
pub mod icon;
pub mod info;
pub mod lockfile;
pub mod logging;
pub mod menu;
pub mod monitor;
pub mod properties;
pub mod state;
pub mod tray;
pub mod twingate;
