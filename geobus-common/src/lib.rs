pub mod errors;
pub mod names;
pub mod schema;
pub mod signature;
pub mod value;

pub use errors::{Error, Result};
pub use schema::{Access, InterfaceDescription, Schema};
pub use value::{PropertyMap, Value};

pub const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";
pub const INTROSPECTABLE_INTERFACE: &str = "org.freedesktop.DBus.Introspectable";
pub const PEER_INTERFACE: &str = "org.freedesktop.DBus.Peer";

pub const GET_METHOD: &str = "Get";
pub const GET_ALL_METHOD: &str = "GetAll";
pub const SET_METHOD: &str = "Set";
pub const INTROSPECT_METHOD: &str = "Introspect";
pub const PING_METHOD: &str = "Ping";
pub const GET_MACHINE_ID_METHOD: &str = "GetMachineId";
pub const PROPERTIES_CHANGED_SIGNAL: &str = "PropertiesChanged";

/// Bus daemon name. Signals emitted by the bus itself carry it as the sender
pub const DBUS_SERVICE_NAME: &str = "org.freedesktop.DBus";
pub const DBUS_PATH: &str = "/org/freedesktop/DBus";
pub const DBUS_INTERFACE: &str = "org.freedesktop.DBus";
pub const NAME_OWNER_CHANGED_SIGNAL: &str = "NameOwnerChanged";

/// Prefix prepended to service names starting with a dot
pub const FREEDESKTOP_PREFIX: &str = "org.freedesktop";

pub const GEOCLUE_SERVICE_NAME: &str = "org.freedesktop.GeoClue2";
pub const GEOCLUE_MANAGER_PATH: &str = "/org/freedesktop/GeoClue2/Manager";
pub const GEOCLUE_MANAGER_INTERFACE: &str = "org.freedesktop.GeoClue2.Manager";
pub const GEOCLUE_CLIENT_INTERFACE: &str = "org.freedesktop.GeoClue2.Client";
pub const GEOCLUE_LOCATION_INTERFACE: &str = "org.freedesktop.GeoClue2.Location";
pub const GEOCLUE_LOCATION_UPDATED_SIGNAL: &str = "LocationUpdated";

pub const DEFAULT_DESKTOP_ID: &str = "w00t";
