use thistermination::TerminationFull;

#[derive(TerminationFull)]
pub enum TrayError {
    #[termination(msg("D-Bus error: {0}"))]
    Bus(#[from] zbus::Error),
    #[termination(msg("Could not acquire bus name {0}."))]
    BusName(String),
    #[termination(msg("Failed to export object: {0}"))]
    Export(String),
    #[termination(msg("I/O error: {0}"))]
    Io(#[from] std::io::Error),
    #[termination(msg("Invalid configuration: {0}"))]
    Config(String),
    #[termination(msg("twingate_tray is already running (pid {0})."))]
    AlreadyRunning(u32),
    #[termination(msg("{0}"))]
    Command(String),
}
