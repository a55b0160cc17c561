use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

/// How long a finished runtime waits for blocking work before leaving it behind.
pub const SHUTDOWN_GRACE: Duration = Duration::from_millis(250);

/// Commands produced by menu clicks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrayCommand {
    Connect,
    Disconnect,
    ShowConnectionInfo,
    RefreshStatus,
    StartExitNode,
    StopExitNode,
    ListExitNodes,
    SwitchExitNode,
    ShowResources,
    OpenWebAdmin,
    DiagnosticReport,
    SetAutoConnect(bool),
    MenuOpening,
    ShowAbout,
    Quit,
}

/// Executes tray commands. Implementations may block (run external programs,
/// wait on dialogs); they are always called off the bus dispatch path.
pub trait CommandHandler: Send + Sync {
    fn handle(&self, command: TrayCommand);
}

#[derive(Clone)]
pub struct Dispatcher {
    handler: Arc<dyn CommandHandler>,
}

impl Dispatcher {
    pub fn new(handler: Arc<dyn CommandHandler>) -> Self {
        Dispatcher { handler }
    }

    /// Runs `command` on the blocking pool and returns immediately.
    ///
    /// The command may still be running (or not yet started) when this
    /// returns. Must be called from within a tokio runtime.
    pub fn submit(&self, command: TrayCommand) {
        debug!(?command, "dispatching tray command");
        let handler = Arc::clone(&self.handler);
        drop(tokio::task::spawn_blocking(move || handler.handle(command)));
    }
}

/// Runs `future` to completion on a new multi-thread runtime.
///
/// Commands still running on the blocking pool afterwards, such as an open
/// dialog or a pending password prompt, are abandoned after
/// [`SHUTDOWN_GRACE`] instead of keeping the process alive.
pub fn block_on<F: Future>(future: F) -> std::io::Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let output = runtime.block_on(future);
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    Ok(output)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::mpsc;
    use std::time::Duration;

    /// Records every command it receives.
    pub struct RecordingHandler {
        tx: Mutex<mpsc::Sender<TrayCommand>>,
    }

    impl RecordingHandler {
        pub fn new() -> (Arc<Self>, Recorded) {
            let (tx, rx) = mpsc::channel();
            (
                Arc::new(RecordingHandler { tx: Mutex::new(tx) }),
                Recorded { rx },
            )
        }
    }

    impl CommandHandler for RecordingHandler {
        fn handle(&self, command: TrayCommand) {
            let _ = self.tx.lock().send(command);
        }
    }

    pub struct Recorded {
        rx: mpsc::Receiver<TrayCommand>,
    }

    impl Recorded {
        pub fn next(&self) -> Option<TrayCommand> {
            self.rx.recv_timeout(Duration::from_secs(2)).ok()
        }

        /// Waits a little, then returns everything received so far.
        pub fn settle(&self) -> Vec<TrayCommand> {
            std::thread::sleep(Duration::from_millis(100));
            self.rx.try_iter().collect()
        }
    }
}
