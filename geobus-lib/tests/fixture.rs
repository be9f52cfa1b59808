use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};

use geobus_lib::{Access, Connection, Error, LocalBus, LocalService, LocalSignal, Schema, Value};
use log::LevelFilter;
use rstest::fixture;

pub const SERVICE_NAME: &str = "org.example.svc";
pub const MANAGER_PATH: &str = "/Manager";
pub const MANAGER_INTERFACE: &str = "org.example.Manager";
pub const CLIENT_INTERFACE: &str = "org.example.Client";
pub const DENIED_FAULT: &str = "org.example.Error.Denied";

const SCHEMA: &str = r#"
{
    "version": 1,
    "interfaces": [
        {
            "name": "org.example.Manager",
            "methods": [
                { "name": "GetClient", "out": [{ "name": "client", "type": "o" }] },
                { "name": "Fail" }
            ],
            "signals": [{ "name": "Tick", "args": [{ "name": "count", "type": "u" }] }],
            "properties": [{ "name": "InUse", "type": "b", "access": "read" }]
        },
        {
            "name": "org.example.Client",
            "methods": [{ "name": "Start" }, { "name": "Stop" }],
            "properties": [
                { "name": "DistanceThreshold", "type": "u", "access": "readwrite" },
                { "name": "TimeThreshold", "type": "u", "access": "readwrite" },
                { "name": "DesktopId", "type": "s", "access": "readwrite" },
                { "name": "RequestedAccuracyLevel", "type": "u", "access": "readwrite" },
                { "name": "Active", "type": "b", "access": "read" }
            ]
        }
    ]
}
"#;

/// Fake service with a manager object, which creates client objects on request
pub struct Fixture {
    bus: LocalBus,
    service: LocalService,
    connection: Connection,
    tick: LocalSignal,
}

impl Fixture {
    pub async fn new(log_level: LevelFilter) -> Self {
        let _ = pretty_env_logger::formatted_builder()
            .filter_level(log_level)
            .try_init();

        let bus = LocalBus::new();
        let service = bus
            .register_service(SERVICE_NAME)
            .await
            .expect("Failed to register service");

        service
            .register_property(MANAGER_PATH, MANAGER_INTERFACE, "InUse", false, Access::Read)
            .await
            .expect("Failed to register property");

        let tick = service
            .register_signal(MANAGER_PATH, MANAGER_INTERFACE, "Tick", "u")
            .await
            .expect("Failed to register signal");

        let counter = Arc::new(AtomicU32::new(0));
        let service_handle = service.clone();
        service
            .register_method(
                MANAGER_PATH,
                MANAGER_INTERFACE,
                "GetClient",
                "",
                "o",
                move |_, _| {
                    let service = service_handle.clone();
                    let id = counter.fetch_add(1, Ordering::SeqCst);

                    async move {
                        let path = format!("/Client/{id}");
                        add_client(&service, &path).await?;

                        Ok(vec![Value::object_path(&path)?])
                    }
                },
            )
            .await
            .expect("Failed to register method");

        service
            .register_method(
                MANAGER_PATH,
                MANAGER_INTERFACE,
                "Fail",
                "",
                "",
                |_, _| async { Err(Error::remote(DENIED_FAULT, "Not allowed")) },
            )
            .await
            .expect("Failed to register method");

        let connection = bus.connect().await.expect("Failed to connect");

        Self {
            bus,
            service,
            connection,
            tick,
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

    pub fn tick(&self) -> &LocalSignal {
        &self.tick
    }

    pub fn schema() -> Schema {
        Schema::parse(SCHEMA).expect("Invalid test schema")
    }

    /// Ask the manager for a client object path
    pub async fn new_client(&self) -> String {
        let reply = self
            .connection
            .get(SERVICE_NAME, MANAGER_PATH)
            .expect("Invalid manager path")
            .call_single(MANAGER_INTERFACE, "GetClient", vec![])
            .await
            .expect("Failed to get client");

        reply
            .as_object_path()
            .expect("Client path is not an object path")
            .to_owned()
    }
}

async fn add_client(service: &LocalService, path: &str) -> geobus_lib::Result<()> {
    for (name, value, access) in [
        ("DistanceThreshold", Value::UInt32(0), Access::ReadWrite),
        ("TimeThreshold", Value::UInt32(0), Access::ReadWrite),
        ("DesktopId", Value::from(""), Access::ReadWrite),
        ("RequestedAccuracyLevel", Value::UInt32(0), Access::ReadWrite),
        ("Active", Value::Bool(false), Access::Read),
    ] {
        service
            .register_property(path, CLIENT_INTERFACE, name, value, access)
            .await?;
    }

    let service_handle = service.clone();
    let client_path = path.to_owned();
    service
        .register_method(path, CLIENT_INTERFACE, "Start", "", "", move |_, _| {
            let service = service_handle.clone();
            let path = client_path.clone();

            async move {
                service
                    .set_property(&path, CLIENT_INTERFACE, "Active", true)
                    .await?;
                Ok(vec![])
            }
        })
        .await
}

#[fixture]
pub async fn make_fixture() -> Fixture {
    Fixture::new(LevelFilter::Debug).await
}

#[fixture]
pub async fn make_warn_fixture() -> Fixture {
    Fixture::new(LevelFilter::Warn).await
}
