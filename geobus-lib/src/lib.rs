//! ## Geobus lib
//!
//! A library to call remote objects on a message bus
//!
//! The library connects to a D-Bus session or system bus (see [BusScope]), or to an in-process
//! [LocalBus], which is mostly useful for tests.
//!
//! To connect call [Connection::connect]. A [Connection] is cheap to clone and hands out [Proxy]
//! handles to remote objects with [Connection::get]. Getting a proxy doesn't make any calls.
//!
//! ### Proxy
//! A proxy is bound to a service name and an object path, and exposes the following methods:
//! - [Proxy::call] to call a method;
//! - [Proxy::get_property], [Proxy::set_property], and [Proxy::get_all_properties] to use object properties;
//! - [Proxy::subscribe] to subscribe to the object signals. [Proxy::on_properties_changed] subscribes to property changes.
//!
//! Service names starting with a dot are expanded with `org.freedesktop` prefix: `.GeoClue2` means `org.freedesktop.GeoClue2`.
//!
//! ### Interface descriptions
//! If a connection has a [Schema] (see [Connection::set_schema]), calls to described interfaces are validated before
//! sending, and replies are checked after receiving. Calling an undescribed member fails with [Error::NotFound], passing
//! a value of a wrong type fails with [Error::TypeMismatch]. [Schema::builtin] describes standard freedesktop
//! interfaces and GeoClue2.
//!
//! ### Signals
//! In order to receive signals you need to run the connection dispatch loop with [Connection::run]. Handlers are called
//! one at a time in the order signals arrive. A failing or panicking handler is logged and doesn't affect other handlers.
//!
//! ```no_run
//! use geobus_lib::{BusScope, Connection, GEOCLUE_CLIENT_INTERFACE, GEOCLUE_LOCATION_UPDATED_SIGNAL};
//!
//! async fn example() -> geobus_lib::Result<()> {
//!     let connection = Connection::connect(BusScope::System).await?;
//!     let client = connection.get(".GeoClue2", "/org/freedesktop/GeoClue2/Client/1")?;
//!
//!     client
//!         .subscribe(GEOCLUE_CLIENT_INTERFACE, GEOCLUE_LOCATION_UPDATED_SIGNAL, |signal| async move {
//!             println!("New location: {:?}", signal.arg(1));
//!             Ok(())
//!         })
//!         .await?;
//!
//!     tokio::select! {
//!         result = connection.run() => result?,
//!         _ = tokio::signal::ctrl_c() => connection.stop(),
//!     }
//!
//!     connection.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ### Features
//! `dbus` feature (enabled by default) provides D-Bus transport. Without it only [LocalBus] is available.
//!

pub mod connection;
pub mod local;
pub mod proxy;
pub mod subscription;
pub mod transport;

pub use geobus_common::*;

pub use connection::{BusScope, Connection};
pub use local::{LocalBus, LocalService, LocalSignal};
pub use proxy::{PropertiesChanged, Proxy};
pub use subscription::{MatchRule, SignalMessage, SubscriptionToken};
