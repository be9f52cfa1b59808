//! ## Geobus connect
//!
//! Interactive tool to inspect and call objects on a D-Bus bus.
//!
//! ## Usage
//! ```sh
//! Geobus connect
//!
//! Usage: geobus-connect [OPTIONS] <TARGET_SERVICE> [PATH]
//!
//! Arguments:
//!   <TARGET_SERVICE>  Service to connect to. A leading dot stands for `org.freedesktop`
//!   [PATH]            Object path [default: /]
//!
//! Options:
//!   -l, --log-level <LOG_LEVEL>  Log level: OFF, ERROR, WARN, INFO, DEBUG, TRACE [default: WARN]
//!       --system                 Use the system bus instead of the session bus
//!       --address <ADDRESS>      Bus address, e.g. `unix:path=/run/dbus/system_bus_socket`
//!   -h, --help                   Print help
//!   -V, --version                Print version
//! ```
//!

use clap::{self, Parser};
use colored::*;
use log::{LevelFilter, *};
use rustyline::{error::ReadlineError, ColorMode, Config, DefaultEditor};

use geobus_lib::{BusScope, Connection, Schema};

mod commands;

use commands::{execute, print_help, Command};

/// Geobus connect
#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
pub struct Args {
    /// Log level: OFF, ERROR, WARN, INFO, DEBUG, TRACE
    #[clap(short, long, default_value_t = LevelFilter::Warn)]
    pub log_level: log::LevelFilter,

    /// Use the system bus instead of the session bus
    #[clap(long, conflicts_with = "address")]
    pub system: bool,

    /// Bus address, e.g. `unix:path=/run/dbus/system_bus_socket`
    #[clap(long)]
    pub address: Option<String>,

    /// Service to connect to. A leading dot stands for `org.freedesktop`
    #[clap()]
    pub target_service: String,

    /// Object path
    #[clap(default_value = "/")]
    pub path: String,
}

impl Args {
    fn scope(&self) -> BusScope {
        match (&self.address, self.system) {
            (Some(address), _) => BusScope::Address(address.clone()),
            (None, true) => BusScope::System,
            (None, false) => BusScope::Session,
        }
    }
}

#[tokio::main]
async fn main() -> rustyline::Result<()> {
    let args = Args::parse();

    pretty_env_logger::formatted_builder()
        .filter_level(args.log_level)
        .init();

    debug!("Starting geobus connect");

    let connection = match Connection::connect(args.scope()).await {
        Ok(connection) => connection,
        Err(err) => {
            eprintln!("Failed to connect to the bus: {err}");
            return Ok(());
        }
    };

    match Schema::builtin() {
        Ok(schema) => connection.set_schema(schema).await,
        Err(err) => warn!("Failed to load interface descriptions: {err}"),
    }

    let proxy = match connection.get(&args.target_service, &args.path) {
        Ok(proxy) => proxy,
        Err(err) => {
            eprintln!("Invalid target: {err}");
            connection.shutdown().await;
            return Ok(());
        }
    };

    if let Err(err) = proxy.ping().await {
        warn!("Target service doesn't answer: {err}");
    }

    // Signals are printed in background while reading user input
    let dispatch_connection = connection.clone();
    tokio::spawn(async move {
        if let Err(err) = dispatch_connection.run().await {
            error!("Connection lost: {err}");
        }
    });

    debug!("Succesfully connected to {}", proxy.service_name());
    print_help();

    let config = Config::builder().color_mode(ColorMode::Enabled).build();
    let mut rl = DefaultEditor::with_config(config)?;

    loop {
        let readline = rl.readline(&format!("{}", ">> ".bright_green()));
        match readline {
            Ok(line) => {
                let quit = match Command::parse(&line) {
                    Ok(command) => execute(&proxy, command).await,
                    Err(err) => {
                        eprintln!("{err}");
                        false
                    }
                };

                if quit {
                    break;
                }

                rl.add_history_entry(line.as_str())?;
            }
            Err(ReadlineError::Interrupted) => {
                println!("CTRL-C");
                break;
            }
            Err(ReadlineError::Eof) => {
                println!("CTRL-D");
                break;
            }
            Err(err) => {
                println!("Error: {:?}", err);
                break;
            }
        }
    }

    connection.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_arguments() {
        let args = Args::parse_from(["geobus-connect", ".GeoClue2"]);
        assert_eq!(args.path, "/");
        assert_eq!(args.scope(), BusScope::Session);

        let args = Args::parse_from([
            "geobus-connect",
            "--system",
            ".GeoClue2",
            "/org/freedesktop/GeoClue2/Manager",
        ]);
        assert_eq!(args.path, "/org/freedesktop/GeoClue2/Manager");
        assert_eq!(args.scope(), BusScope::System);
    }
}
