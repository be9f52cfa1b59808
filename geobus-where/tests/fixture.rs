use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};

use geobus_lib::{
    Connection, InterfaceDescription, LocalBus, LocalService, PropertyMap, Schema, Value,
    GEOCLUE_CLIENT_INTERFACE, GEOCLUE_LOCATION_INTERFACE, GEOCLUE_LOCATION_UPDATED_SIGNAL,
    GEOCLUE_MANAGER_INTERFACE, GEOCLUE_MANAGER_PATH, GEOCLUE_SERVICE_NAME,
};
use log::LevelFilter;
use rstest::fixture;

pub const LATITUDE: f64 = 52.5186;
pub const LONGITUDE: f64 = 13.4081;
pub const ACCURACY: f64 = 40.0;

const CLIENT_PATH_PREFIX: &str = "/org/freedesktop/GeoClue2/Client/";

/// Location service on a local bus, which reports a fixed location
/// to every started client
pub struct Fixture {
    bus: LocalBus,
    service: LocalService,
    connection: Connection,
}

impl Fixture {
    pub async fn new(log_level: LevelFilter) -> Self {
        let _ = pretty_env_logger::formatted_builder()
            .filter_level(log_level)
            .try_init();

        let bus = LocalBus::new();
        let service = bus
            .register_service(GEOCLUE_SERVICE_NAME)
            .await
            .expect("Failed to register location service");

        service
            .serve_description(
                GEOCLUE_MANAGER_PATH,
                &description(GEOCLUE_MANAGER_INTERFACE),
                PropertyMap::from([
                    ("InUse".into(), Value::Bool(false)),
                    ("AvailableAccuracyLevel".into(), Value::UInt32(8)),
                ]),
            )
            .await
            .expect("Failed to serve manager");

        let counter = Arc::new(AtomicU32::new(0));
        let service_handle = service.clone();
        service
            .register_method(
                GEOCLUE_MANAGER_PATH,
                GEOCLUE_MANAGER_INTERFACE,
                "GetClient",
                "",
                "o",
                move |_, _| {
                    let service = service_handle.clone();
                    let id = counter.fetch_add(1, Ordering::SeqCst);

                    async move {
                        let path = format!("{CLIENT_PATH_PREFIX}{id}");
                        add_client(&service, &path).await?;

                        Ok(vec![Value::object_path(&path)?])
                    }
                },
            )
            .await
            .expect("Failed to register method");

        let connection = bus.connect().await.expect("Failed to connect");
        connection.set_schema(schema()).await;

        Self {
            bus,
            service,
            connection,
        }
    }

    pub fn bus(&self) -> &LocalBus {
        &self.bus
    }

    pub fn service(&self) -> &LocalService {
        &self.service
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Run the connection dispatch loop in background
    pub fn spawn_dispatch(&self) -> tokio::task::JoinHandle<geobus_lib::Result<()>> {
        let connection = self.connection.clone();
        tokio::spawn(async move { connection.run().await })
    }
}

pub fn schema() -> Schema {
    Schema::builtin().expect("Invalid builtin schema")
}

fn description(interface: &str) -> InterfaceDescription {
    schema()
        .require(interface)
        .expect("No builtin interface")
        .clone()
}

async fn add_client(service: &LocalService, path: &str) -> geobus_lib::Result<()> {
    service
        .serve_description(
            path,
            &description(GEOCLUE_CLIENT_INTERFACE),
            PropertyMap::from([
                ("Location".into(), Value::object_path("/")?),
                ("DistanceThreshold".into(), Value::UInt32(0)),
                ("TimeThreshold".into(), Value::UInt32(0)),
                ("DesktopId".into(), Value::from("")),
                ("RequestedAccuracyLevel".into(), Value::UInt32(0)),
                ("Active".into(), Value::Bool(false)),
            ]),
        )
        .await?;

    let location_updated = service
        .register_signal(
            path,
            GEOCLUE_CLIENT_INTERFACE,
            GEOCLUE_LOCATION_UPDATED_SIGNAL,
            "oo",
        )
        .await?;

    let service_handle = service.clone();
    let client_path = path.to_owned();
    service
        .register_method(path, GEOCLUE_CLIENT_INTERFACE, "Start", "", "", move |_, _| {
            let service = service_handle.clone();
            let client_path = client_path.clone();
            let location_updated = location_updated.clone();

            async move {
                let location_path = format!("{client_path}/Location/0");
                add_location(&service, &location_path).await?;

                service
                    .set_property(
                        &client_path,
                        GEOCLUE_CLIENT_INTERFACE,
                        "Location",
                        Value::object_path(&location_path)?,
                    )
                    .await?;
                service
                    .set_property(&client_path, GEOCLUE_CLIENT_INTERFACE, "Active", true)
                    .await?;

                location_updated
                    .emit(vec![
                        Value::object_path("/")?,
                        Value::object_path(&location_path)?,
                    ])
                    .await?;

                Ok(vec![])
            }
        })
        .await?;

    let service_handle = service.clone();
    let client_path = path.to_owned();
    service
        .register_method(path, GEOCLUE_CLIENT_INTERFACE, "Stop", "", "", move |_, _| {
            let service = service_handle.clone();
            let client_path = client_path.clone();

            async move {
                service
                    .set_property(&client_path, GEOCLUE_CLIENT_INTERFACE, "Active", false)
                    .await?;
                service
                    .set_property(
                        &client_path,
                        GEOCLUE_CLIENT_INTERFACE,
                        "Location",
                        Value::object_path("/")?,
                    )
                    .await?;

                Ok(vec![])
            }
        })
        .await
}

async fn add_location(service: &LocalService, path: &str) -> geobus_lib::Result<()> {
    service
        .serve_description(
            path,
            &description(GEOCLUE_LOCATION_INTERFACE),
            PropertyMap::from([
                ("Latitude".into(), Value::Double(LATITUDE)),
                ("Longitude".into(), Value::Double(LONGITUDE)),
                ("Accuracy".into(), Value::Double(ACCURACY)),
                ("Altitude".into(), Value::Double(34.0)),
                ("Speed".into(), Value::Double(-1.0)),
                ("Heading".into(), Value::Double(-1.0)),
                ("Description".into(), Value::from("Alexanderplatz")),
                (
                    "Timestamp".into(),
                    Value::Struct(vec![Value::UInt64(1571000000), Value::UInt64(0)]),
                ),
            ]),
        )
        .await
}

#[fixture]
pub async fn make_fixture() -> Fixture {
    Fixture::new(LevelFilter::Debug).await
}
