use std::time::Duration;

use geobus_lib::{Error, Value, PEER_INTERFACE};
use rstest::rstest;
use tokio::time;

mod fixture;
use fixture::{
    make_fixture, Fixture, CLIENT_INTERFACE, DENIED_FAULT, MANAGER_INTERFACE, MANAGER_PATH,
    SERVICE_NAME,
};

#[rstest]
#[awt]
#[tokio::test(flavor = "multi_thread")]
async fn test_client_setup(
    #[from(make_fixture)]
    #[future]
    fixture: Fixture,
) {
    let manager = fixture
        .connection()
        .get(SERVICE_NAME, MANAGER_PATH)
        .expect("Invalid manager path");

    let client_path = manager
        .call_single(MANAGER_INTERFACE, "GetClient", vec![])
        .await
        .expect("Failed to get client");
    assert_eq!(client_path, Value::ObjectPath("/Client/0".into()));

    let client = fixture
        .connection()
        .get(SERVICE_NAME, "/Client/0")
        .expect("Invalid client path");

    client
        .set_property(CLIENT_INTERFACE, "DesktopId", "w00t")
        .await
        .expect("Failed to set desktop id");
    client
        .call(CLIENT_INTERFACE, "Start", vec![])
        .await
        .expect("Failed to start client");

    assert_eq!(
        client
            .get_property(CLIENT_INTERFACE, "Active")
            .await
            .expect("Failed to get property"),
        Value::Bool(true)
    );

    // Each request makes a new client
    assert_eq!(fixture.new_client().await, "/Client/1");
}

#[rstest]
#[awt]
#[tokio::test(flavor = "multi_thread")]
async fn test_missing_objects(
    #[from(make_fixture)]
    #[future]
    fixture: Fixture,
) {
    let connection = fixture.connection();

    // Invalid names fail without a call
    assert!(matches!(
        connection.get(SERVICE_NAME, "Manager"),
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        connection.get("svc", MANAGER_PATH),
        Err(Error::NotFound(_))
    ));

    let missing_object = connection.get(SERVICE_NAME, "/Nope").unwrap();
    assert!(matches!(
        missing_object
            .call(MANAGER_INTERFACE, "GetClient", vec![])
            .await,
        Err(Error::NotFound(_))
    ));

    let missing_service = connection.get("org.example.nope", MANAGER_PATH).unwrap();
    assert!(matches!(
        missing_service
            .call(MANAGER_INTERFACE, "GetClient", vec![])
            .await,
        Err(Error::NotFound(_))
    ));

    let manager = connection.get(SERVICE_NAME, MANAGER_PATH).unwrap();
    assert!(matches!(
        manager.call(MANAGER_INTERFACE, "Frobnicate", vec![]).await,
        Err(Error::NotFound(_))
    ));

    // Arguments don't match the method signature
    assert!(matches!(
        manager
            .call(MANAGER_INTERFACE, "GetClient", vec![42u32.into()])
            .await,
        Err(Error::TypeMismatch(_))
    ));
}

#[rstest]
#[awt]
#[tokio::test(flavor = "multi_thread")]
async fn test_stale_proxy(
    #[from(make_fixture)]
    #[future]
    fixture: Fixture,
) {
    let client_path = fixture.new_client().await;
    let client = fixture
        .connection()
        .get(SERVICE_NAME, &client_path)
        .unwrap();

    client
        .get_property(CLIENT_INTERFACE, "Active")
        .await
        .expect("Failed to get property");

    fixture
        .service()
        .remove_object(&client_path)
        .await
        .expect("Failed to remove client");

    assert!(matches!(
        client.get_property(CLIENT_INTERFACE, "Active").await,
        Err(Error::NotFound(_))
    ));

    // Service left the bus
    fixture.service().unregister().await;

    let manager = fixture
        .connection()
        .get(SERVICE_NAME, MANAGER_PATH)
        .unwrap();
    assert!(matches!(
        manager.call(MANAGER_INTERFACE, "GetClient", vec![]).await,
        Err(Error::NotFound(_))
    ));
}

#[rstest]
#[awt]
#[tokio::test(flavor = "multi_thread")]
async fn test_remote_fault(
    #[from(make_fixture)]
    #[future]
    fixture: Fixture,
) {
    let manager = fixture
        .connection()
        .get(SERVICE_NAME, MANAGER_PATH)
        .unwrap();

    match manager.call(MANAGER_INTERFACE, "Fail", vec![]).await {
        Err(Error::Remote { code, message }) => {
            assert_eq!(code, DENIED_FAULT);
            assert_eq!(message, "Not allowed");
        }
        result => panic!("Unexpected fault result: {result:?}"),
    }
}

#[rstest]
#[awt]
#[tokio::test(flavor = "multi_thread")]
async fn test_described_calls(
    #[from(make_fixture)]
    #[future]
    fixture: Fixture,
) {
    let connection = fixture.connection();
    connection.set_schema(Fixture::schema()).await;

    let manager = connection.get(SERVICE_NAME, MANAGER_PATH).unwrap();

    // Fails before reaching the bus
    assert!(matches!(
        manager.call(MANAGER_INTERFACE, "Frobnicate", vec![]).await,
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        manager
            .call(MANAGER_INTERFACE, "GetClient", vec!["client".into()])
            .await,
        Err(Error::TypeMismatch(_))
    ));

    assert_eq!(
        manager
            .call(MANAGER_INTERFACE, "GetClient", vec![])
            .await
            .expect("Failed to get client"),
        vec![Value::ObjectPath("/Client/0".into())]
    );

    // Service doesn't implement a described method
    let client = connection.get(SERVICE_NAME, "/Client/0").unwrap();
    assert!(matches!(
        client.call(CLIENT_INTERFACE, "Stop", vec![]).await,
        Err(Error::NotFound(_))
    ));
}

#[rstest]
#[awt]
#[tokio::test(flavor = "multi_thread")]
async fn test_introspection(
    #[from(make_fixture)]
    #[future]
    fixture: Fixture,
) {
    fixture.new_client().await;

    let connection = fixture.connection();
    let manager = connection.get(SERVICE_NAME, MANAGER_PATH).unwrap();

    manager.ping().await.expect("Failed to ping");
    assert!(matches!(
        manager.call(PEER_INTERFACE, "Frobnicate", vec![]).await,
        Err(Error::NotFound(_))
    ));

    let xml = manager.introspect().await.expect("Failed to introspect");
    assert!(xml.contains(r#"<interface name="org.example.Manager">"#));
    assert!(xml.contains(r#"<method name="GetClient">"#));
    assert!(xml.contains(r#"<signal name="Tick">"#));
    assert!(xml.contains(r#"<interface name="org.freedesktop.DBus.Properties">"#));

    let root = connection.get(SERVICE_NAME, "/").unwrap();
    let xml = root.introspect().await.expect("Failed to introspect");
    assert!(xml.contains(r#"<node name="Manager"/>"#));
    assert!(xml.contains(r#"<node name="Client"/>"#));
}

#[rstest]
#[awt]
#[tokio::test(flavor = "multi_thread")]
async fn test_reply_signature(
    #[from(make_fixture)]
    #[future]
    fixture: Fixture,
) {
    let service = fixture.service();
    service
        .register_method("/Calc", "org.example.Calc", "Add", "uu", "u", |_, args| async move {
            Ok(vec![args.iter().filter_map(Value::as_u32).sum::<u32>().into()])
        })
        .await
        .unwrap();
    service
        .register_method("/Calc", "org.example.Calc", "Broken", "", "u", |_, _| async {
            Ok(vec![Value::from("not a number")])
        })
        .await
        .unwrap();

    let calc = fixture.connection().get(SERVICE_NAME, "/Calc").unwrap();

    assert_eq!(
        calc.call_single("org.example.Calc", "Add", vec![1u32.into(), 2u32.into()])
            .await
            .unwrap(),
        Value::UInt32(3)
    );
    assert!(matches!(
        calc.call("org.example.Calc", "Broken", vec![]).await,
        Err(Error::TypeMismatch(_))
    ));
}

#[rstest]
#[awt]
#[tokio::test(flavor = "multi_thread")]
async fn test_reentrant_method(
    #[from(make_fixture)]
    #[future]
    fixture: Fixture,
) {
    let connection = fixture.connection().clone();

    // Counts down by calling itself
    fixture
        .service()
        .register_method(
            "/Countdown",
            "org.example.Countdown",
            "Count",
            "u",
            "u",
            move |_, args| {
                let connection = connection.clone();

                async move {
                    let count = args.first().and_then(Value::as_u32).unwrap_or_default();
                    if count == 0 {
                        return Ok(vec![0u32.into()]);
                    }

                    let rest = connection
                        .get(SERVICE_NAME, "/Countdown")?
                        .call_single("org.example.Countdown", "Count", vec![(count - 1).into()])
                        .await?;

                    Ok(vec![(rest.as_u32().unwrap_or_default() + 1).into()])
                }
            },
        )
        .await
        .unwrap();

    let countdown = fixture.connection().get(SERVICE_NAME, "/Countdown").unwrap();
    let result = time::timeout(
        Duration::from_secs(1),
        countdown.call_single("org.example.Countdown", "Count", vec![3u32.into()]),
    )
    .await
    .expect("Nested call deadlocked")
    .unwrap();

    assert_eq!(result, Value::UInt32(3));
}
