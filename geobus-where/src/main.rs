//! ## Geobus where
//!
//! Prints GeoClue2 location updates.
//!
//! ## Usage
//! ```sh
//! geobus-where --distance-threshold 100000 --accuracy-level 4
//! geobus-where --system --json
//! ```
//!

use clap::Parser;
use log::{debug, error, warn};

use geobus_lib::Connection;
use geobus_where::{args::Args, load_schema, output::Output, start_watching};

#[tokio::main(flavor = "current_thread")]
async fn main() -> geobus_lib::Result<()> {
    let args = Args::parse();

    pretty_env_logger::formatted_builder()
        .filter_level(args.log_level)
        .init();

    debug!("Starting location watcher");

    let schema = load_schema(&args.schema)?;

    let connection = Connection::connect(args.scope()).await?;
    connection.set_schema(schema).await;

    let client = start_watching(
        &connection,
        &args.service,
        &args.settings(),
        Output::new(args.json),
    )
    .await?;

    let result = tokio::select! {
        result = connection.run() => result,
        _ = tokio::signal::ctrl_c() => {
            debug!("Interrupted");
            connection.stop();
            Ok(())
        }
    };

    if let Err(err) = &result {
        error!("Connection lost: {err}");
    } else if let Err(err) = client.stop().await {
        warn!("Failed to stop location client: {err}");
    }

    connection.shutdown().await;
    result
}
