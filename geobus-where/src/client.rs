use std::sync::Arc;

use futures::{lock::Mutex, Future};
use log::{debug, info};

use geobus_lib::{
    Connection, Error, PropertyMap, Proxy, SignalMessage, SubscriptionToken, Value,
    DEFAULT_DESKTOP_ID, GEOCLUE_CLIENT_INTERFACE, GEOCLUE_LOCATION_INTERFACE,
    GEOCLUE_LOCATION_UPDATED_SIGNAL, GEOCLUE_MANAGER_INTERFACE, GEOCLUE_MANAGER_PATH,
};

use crate::location::LocationReport;

const GET_CLIENT_METHOD: &str = "GetClient";
const START_METHOD: &str = "Start";
const STOP_METHOD: &str = "Stop";

/// Path of the `Location` property, when there is no location yet
const NO_LOCATION_PATH: &str = "/";

/// Client properties to set before starting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub desktop_id: String,
    pub distance_threshold: u32,
    pub time_threshold: u32,
    /// Service default if not set
    pub accuracy_level: Option<u32>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            desktop_id: DEFAULT_DESKTOP_ID.into(),
            distance_threshold: 0,
            time_threshold: 0,
            accuracy_level: None,
        }
    }
}

/// Location client session, given out by the location service manager
pub struct LocationClient {
    connection: Connection,
    proxy: Proxy,
}

impl LocationClient {
    /// Ask the service manager for a client
    pub async fn create(connection: &Connection, service_name: &str) -> geobus_lib::Result<Self> {
        let manager = connection.get(service_name, GEOCLUE_MANAGER_PATH)?;

        let path = match manager
            .call_single(GEOCLUE_MANAGER_INTERFACE, GET_CLIENT_METHOD, vec![])
            .await?
        {
            Value::ObjectPath(path) => path,
            other => {
                return Err(Error::TypeMismatch(format!(
                    "{GET_CLIENT_METHOD} returned '{}' instead of an object path",
                    other.signature()
                )))
            }
        };

        info!("Got location client {path}");

        Ok(Self {
            connection: connection.clone(),
            proxy: manager.connection().get(manager.service_name(), &path)?,
        })
    }

    pub fn path(&self) -> &str {
        self.proxy.path()
    }

    pub async fn properties(&self) -> geobus_lib::Result<PropertyMap> {
        self.proxy
            .get_all_properties(GEOCLUE_CLIENT_INTERFACE)
            .await
    }

    pub async fn configure(&self, settings: &ClientSettings) -> geobus_lib::Result<()> {
        debug!("Configuring {}: {settings:?}", self.path());

        self.proxy
            .set_property(
                GEOCLUE_CLIENT_INTERFACE,
                "DesktopId",
                settings.desktop_id.as_str(),
            )
            .await?;
        self.proxy
            .set_property(
                GEOCLUE_CLIENT_INTERFACE,
                "DistanceThreshold",
                settings.distance_threshold,
            )
            .await?;
        self.proxy
            .set_property(
                GEOCLUE_CLIENT_INTERFACE,
                "TimeThreshold",
                settings.time_threshold,
            )
            .await?;

        if let Some(level) = settings.accuracy_level {
            self.proxy
                .set_property(GEOCLUE_CLIENT_INTERFACE, "RequestedAccuracyLevel", level)
                .await?;
        }

        Ok(())
    }

    /// Call `handler` with the new location on every location update.
    ///
    /// **Note**: Subscribe before [Self::start] not to miss the first update
    pub async fn watch<F, Fr>(&self, handler: F) -> geobus_lib::Result<SubscriptionToken>
    where
        F: FnMut(LocationReport) -> Fr + Send + 'static,
        Fr: Future<Output = geobus_lib::Result<()>> + Send + 'static,
    {
        let connection = self.connection.clone();
        let service_name = self.proxy.service_name().to_owned();
        let handler = Arc::new(Mutex::new(handler));

        self.proxy
            .subscribe(
                GEOCLUE_CLIENT_INTERFACE,
                GEOCLUE_LOCATION_UPDATED_SIGNAL,
                move |signal: SignalMessage| {
                    let connection = connection.clone();
                    let service_name = service_name.clone();
                    let handler = handler.clone();

                    async move {
                        let path = updated_location_path(&signal)?;
                        let report = fetch_location(&connection, &service_name, &path).await?;

                        let mut handler = handler.lock().await;
                        (*handler)(report).await
                    }
                },
            )
            .await
    }

    pub async fn start(&self) -> geobus_lib::Result<()> {
        self.proxy
            .call(GEOCLUE_CLIENT_INTERFACE, START_METHOD, vec![])
            .await?;

        info!("Location client {} started", self.path());
        Ok(())
    }

    pub async fn stop(&self) -> geobus_lib::Result<()> {
        self.proxy
            .call(GEOCLUE_CLIENT_INTERFACE, STOP_METHOD, vec![])
            .await?;

        info!("Location client {} stopped", self.path());
        Ok(())
    }

    /// Current location, if the service has one
    pub async fn location(&self) -> geobus_lib::Result<Option<LocationReport>> {
        let path = match self
            .proxy
            .get_property(GEOCLUE_CLIENT_INTERFACE, "Location")
            .await?
        {
            Value::ObjectPath(path) => path,
            other => {
                return Err(Error::TypeMismatch(format!(
                    "Location property is '{}' instead of an object path",
                    other.signature()
                )))
            }
        };

        if path == NO_LOCATION_PATH {
            return Ok(None);
        }

        fetch_location(&self.connection, self.proxy.service_name(), &path)
            .await
            .map(Some)
    }
}

/// Read all properties of a location object. Makes a new proxy for every location
pub async fn fetch_location(
    connection: &Connection,
    service_name: &str,
    path: &str,
) -> geobus_lib::Result<LocationReport> {
    let properties = connection
        .get(service_name, path)?
        .get_all_properties(GEOCLUE_LOCATION_INTERFACE)
        .await?;

    Ok(LocationReport {
        path: path.to_owned(),
        properties,
    })
}

/// `LocationUpdated(old, new)` new location path
fn updated_location_path(signal: &SignalMessage) -> geobus_lib::Result<String> {
    match signal.args.as_slice() {
        [Value::ObjectPath(_), Value::ObjectPath(new)] => Ok(new.clone()),
        _ => Err(Error::TypeMismatch(format!(
            "Invalid {GEOCLUE_LOCATION_UPDATED_SIGNAL} signature '{}'",
            signal.signature()
        ))),
    }
}
