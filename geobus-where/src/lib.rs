//! GeoClue2 location watcher.
//!
//! Asks the location service manager for a client, configures and starts it,
//! and reports every location the service sends.
//!
//! ```no_run
//! use geobus_lib::{BusScope, Connection};
//! use geobus_where::{client::ClientSettings, output::Output, start_watching};
//!
//! async fn example() -> geobus_lib::Result<()> {
//!     let connection = Connection::connect(BusScope::Session).await?;
//!
//!     let client = start_watching(
//!         &connection,
//!         ".GeoClue2",
//!         &ClientSettings::default(),
//!         Output::Text,
//!     )
//!     .await?;
//!
//!     connection.run().await?;
//!     client.stop().await
//! }
//! ```
use std::path::PathBuf;

use log::debug;

use geobus_lib::{Connection, Schema};

pub mod args;
pub mod client;
pub mod location;
pub mod output;

use client::{ClientSettings, LocationClient};
use output::Output;

/// Builtin interface descriptions extended with the given files
pub fn load_schema(files: &[PathBuf]) -> geobus_lib::Result<Schema> {
    let mut schema = Schema::builtin()?;

    for file in files {
        schema.merge(Schema::from_file(file)?);
    }

    Ok(schema)
}

/// Get a location client, print its properties, configure and start it.
/// Location updates are printed while the `connection` runs
pub async fn start_watching(
    connection: &Connection,
    service_name: &str,
    settings: &ClientSettings,
    output: Output,
) -> geobus_lib::Result<LocationClient> {
    let client = LocationClient::create(connection, service_name).await?;
    output.print_client(client.path(), &client.properties().await?);

    client.configure(settings).await?;

    client
        .watch(move |report| {
            output.print_location(&report);
            async { Ok(()) }
        })
        .await?;

    client.start().await?;
    debug!("Waiting for location updates");

    Ok(client)
}
