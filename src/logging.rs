use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter used when `RUST_LOG` is unset: `info` for this crate (`debug` in
/// debug builds), `warn` for everything else.
///
/// zbus is held at `error`. It warns on every start because the bus name is
/// requested without a zbus object server, which this crate never creates.
fn default_filter() -> String {
    let level = if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    };
    format!("warn,zbus=error,twingate_tray={level}")
}

/// Installs the global subscriber. Call once, before anything logs.
/// `RUST_LOG` overrides the default filter, e.g. `RUST_LOG=twingate_tray=trace`.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter()));

    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact();

    // a second call (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::registry().with(filter).with(layer).try_init();
}
