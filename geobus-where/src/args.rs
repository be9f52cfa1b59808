use std::path::PathBuf;

use clap::Parser;
use log::LevelFilter;

use geobus_lib::{BusScope, DEFAULT_DESKTOP_ID, GEOCLUE_SERVICE_NAME};

use crate::client::ClientSettings;

/// Geobus location watcher
#[derive(Parser, Debug, Clone)]
#[clap(version, about, long_about = None)]
pub struct Args {
    /// Log level: OFF, ERROR, WARN, INFO, DEBUG, TRACE
    #[clap(short, long, value_parser, default_value_t = LevelFilter::Warn)]
    pub log_level: LevelFilter,

    /// Use the system bus instead of the session bus
    #[clap(long, conflicts_with = "address")]
    pub system: bool,

    /// Bus address, e.g. `unix:path=/run/dbus/system_bus_socket`
    #[clap(long, value_parser)]
    pub address: Option<String>,

    /// Location service name. A leading dot stands for `org.freedesktop`
    #[clap(long, value_parser, default_value = GEOCLUE_SERVICE_NAME)]
    pub service: String,

    /// Desktop id to identify the client with
    #[clap(long, value_parser, default_value = DEFAULT_DESKTOP_ID)]
    pub desktop_id: String,

    /// Minimal distance between location updates in meters
    #[clap(long, value_parser, default_value_t = 0)]
    pub distance_threshold: u32,

    /// Minimal time between location updates in seconds
    #[clap(long, value_parser, default_value_t = 0)]
    pub time_threshold: u32,

    /// Requested accuracy level: 1 country, 4 city, 5 neighborhood, 6 street, 8 exact
    #[clap(long, value_parser)]
    pub accuracy_level: Option<u32>,

    /// Additional interface description files
    #[clap(long, value_parser)]
    pub schema: Vec<PathBuf>,

    /// Print JSON lines instead of text
    #[clap(long)]
    pub json: bool,
}

impl Args {
    pub fn scope(&self) -> BusScope {
        match (&self.address, self.system) {
            (Some(address), _) => BusScope::Address(address.clone()),
            (None, true) => BusScope::System,
            (None, false) => BusScope::Session,
        }
    }

    pub fn settings(&self) -> ClientSettings {
        ClientSettings {
            desktop_id: self.desktop_id.clone(),
            distance_threshold: self.distance_threshold,
            time_threshold: self.time_threshold,
            accuracy_level: self.accuracy_level,
        }
    }
}
