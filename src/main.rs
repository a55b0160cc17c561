use clap::{Arg, Command};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Notify;
use tracing::{error, info};

use twingate_tray::actions::Actions;
use twingate_tray::config::Config;
use twingate_tray::desktop::Desktop;
use twingate_tray::dispatch;
use twingate_tray::error::TrayError;
use twingate_tray::lockfile::LockFile;
use twingate_tray::logging;
use twingate_tray::monitor::{self, Monitor};
use twingate_tray::tray::StatusTray;
use twingate_tray::twingate::TwingateCli;

fn main() -> ExitCode {
    logging::init();
    // menu commands still running on the blocking pool are not waited for
    let outcome = dispatch::block_on(run()).map_err(TrayError::from).and_then(|r| r);
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), TrayError> {
    let matches = Command::new(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .author(env!("CARGO_PKG_AUTHORS"))
        .about("A tray application for monitoring and controlling Twingate.")
        .arg(
            Arg::new("refresh_interval")
                .long("refresh_interval")
                .required(false)
                .help("Set the status refresh interval (in milliseconds)")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new("notifications")
                .long("notifications")
                .required(false)
                .help("Show a desktop notification when the connection state changes.")
                .value_parser(clap::value_parser!(bool)),
        )
        .get_matches();

    let mut lock = LockFile::new();
    lock.acquire()?;

    let mut config = Config::load()?;
    if let Some(interval) = matches.get_one::<u64>("refresh_interval") {
        config.poll_interval_ms = *interval;
    }
    if let Some(notifications) = matches.get_one::<bool>("notifications") {
        config.notifications = *notifications;
    }
    info!(?config, "starting Twingate tray");

    let shutdown = Arc::new(Notify::new());
    let cli = TwingateCli::new(config.cli.clone());
    let desktop = Desktop::new(&config);
    let (refresh, requests) = monitor::refresh_channel();
    let actions = Actions::new(
        cli.clone(),
        desktop.clone(),
        refresh,
        Arc::clone(&shutdown),
    );
    let (tray, signals) = StatusTray::new(Arc::new(actions));
    tray.start(signals).await?;

    let poller = tokio::spawn(
        Monitor::new(Arc::clone(&tray), cli, desktop).run(config.poll_interval(), requests),
    );
    let outcome = wait_for_exit(&tray, &shutdown).await;

    info!("cleaning up");
    poller.abort();
    tray.stop().await;
    lock.release();
    outcome
}

async fn wait_for_exit(tray: &StatusTray, shutdown: &Notify) -> Result<(), TrayError> {
    let mut terminate = signal(SignalKind::terminate())?;
    let mut quit = signal(SignalKind::quit())?;
    tokio::select! {
        _ = shutdown.notified() => info!("quit requested"),
        _ = tokio::signal::ctrl_c() => info!("received SIGINT, shutting down"),
        _ = terminate.recv() => info!("received SIGTERM, shutting down"),
        _ = quit.recv() => info!("received SIGQUIT, shutting down"),
        _ = tray.connection_lost() => {
            return Err(TrayError::Bus(zbus::Error::Failure(
                "session bus connection lost".into(),
            )));
        }
    }
    Ok(())
}
