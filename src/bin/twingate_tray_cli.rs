use clap::Command;

use twingate_tray::config::Config;
use twingate_tray::logging;
use twingate_tray::twingate::TwingateCli;

fn main() {
    logging::init();

    let matches = Command::new("twingate_tray_cli")
        .version(env!("CARGO_PKG_VERSION"))
        .author(env!("CARGO_PKG_AUTHORS"))
        .about("A CLI application for checking and controlling the Twingate connection.")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(Command::new("status").about("Print whether Twingate is connected."))
        .subcommand(Command::new("connect").about("Start the Twingate client."))
        .subcommand(Command::new("disconnect").about("Stop the Twingate client."))
        .get_matches();

    let config = match Config::load() {
        Ok(config) => config,
        Err(error) => {
            eprintln!("{error}");
            std::process::exit(1);
        }
    };
    let cli = TwingateCli::new(config.cli);

    let result = match matches.subcommand_name() {
        Some("status") => cli.check_status().map(|connected| {
            println!("{}", if connected { "connected" } else { "disconnected" });
        }),
        Some("connect") => cli.connect().map(|()| println!("Connection initiated")),
        Some("disconnect") => cli.disconnect().map(|()| println!("Disconnection initiated")),
        _ => Ok(()),
    };
    if let Err(error) = result {
        eprintln!("{error}");
        std::process::exit(1);
    }
}
