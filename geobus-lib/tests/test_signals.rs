use std::time::Duration;

use geobus_lib::{Error, MatchRule, PropertiesChanged, PropertyMap, SignalMessage, Value};
use rstest::rstest;
use tokio::time;

mod fixture;
use fixture::{make_fixture, Fixture, CLIENT_INTERFACE, MANAGER_INTERFACE, MANAGER_PATH, SERVICE_NAME};

const TIMEOUT: Duration = Duration::from_secs(1);

async fn receive<T>(receiver: &async_channel::Receiver<T>) -> T {
    time::timeout(TIMEOUT, receiver.recv())
        .await
        .expect("Signal timeout")
        .expect("Channel closed")
}

async fn emit_ticks(fixture: &Fixture, ticks: std::ops::RangeInclusive<u32>) {
    for tick in ticks {
        fixture
            .tick()
            .emit(vec![tick.into()])
            .await
            .expect("Failed to emit signal");
    }
}

#[rstest]
#[awt]
#[tokio::test(flavor = "multi_thread")]
async fn test_signal_order(
    #[from(make_fixture)]
    #[future]
    fixture: Fixture,
) {
    let connection = fixture.connection().clone();
    let manager = connection.get(SERVICE_NAME, MANAGER_PATH).unwrap();

    let (sender, receiver) = async_channel::unbounded();
    manager
        .subscribe(MANAGER_INTERFACE, "Tick", move |signal| {
            let _ = sender.try_send(signal.arg(0).and_then(Value::as_u32));
            async { Ok(()) }
        })
        .await
        .expect("Failed to subscribe");

    // Invalid signal name
    assert!(matches!(
        manager.subscribe(MANAGER_INTERFACE, "no-signal", |_| async { Ok(()) }).await,
        Err(Error::NotFound(_))
    ));

    let loop_connection = connection.clone();
    let dispatch = tokio::spawn(async move { loop_connection.run().await });

    emit_ticks(&fixture, 1..=10).await;

    for expected in 1..=10 {
        assert_eq!(receive(&receiver).await, Some(expected));
    }

    // Exactly once
    time::sleep(Duration::from_millis(50)).await;
    assert!(receiver.is_empty());

    // Only a single loop at a time
    assert!(matches!(connection.run().await, Err(Error::Connection(_))));

    connection.stop();
    assert!(dispatch.await.unwrap().is_ok());
    assert!(connection.is_stopped());
}

#[rstest]
#[awt]
#[tokio::test(flavor = "multi_thread")]
async fn test_unsubscribe(
    #[from(make_fixture)]
    #[future]
    fixture: Fixture,
) {
    let connection = fixture.connection().clone();
    let manager = connection.get(SERVICE_NAME, MANAGER_PATH).unwrap();

    let (sender, receiver) = async_channel::unbounded();
    let token = manager
        .subscribe(MANAGER_INTERFACE, "Tick", move |signal| {
            let _ = sender.try_send(signal.arg(0).and_then(Value::as_u32));
            async { Ok(()) }
        })
        .await
        .expect("Failed to subscribe");

    let loop_connection = connection.clone();
    tokio::spawn(async move { loop_connection.run().await });

    emit_ticks(&fixture, 1..=1).await;
    assert_eq!(receive(&receiver).await, Some(1));

    connection
        .unsubscribe(token)
        .await
        .expect("Failed to unsubscribe");
    assert_eq!(connection.subscription_count().await, 0);

    assert!(matches!(
        connection.unsubscribe(token).await,
        Err(Error::NotFound(_))
    ));

    emit_ticks(&fixture, 2..=3).await;
    time::sleep(Duration::from_millis(50)).await;
    assert!(receiver.is_empty());

    connection.shutdown().await;
}

#[rstest]
#[awt]
#[tokio::test(flavor = "multi_thread")]
async fn test_unsubscribe_during_dispatch(
    #[from(make_fixture)]
    #[future]
    fixture: Fixture,
) {
    let connection = fixture.connection().clone();

    // Unsubscribes the next subscription on the first tick
    let (calls_sender, calls) = async_channel::unbounded();
    let (victim_sender, victim_token) = async_channel::bounded(1);
    let handler_connection = connection.clone();
    connection
        .subscribe("Tick", move |signal| {
            let _ = calls_sender.try_send(signal.arg(0).and_then(Value::as_u32));
            let token = victim_token.try_recv().ok();
            let connection = handler_connection.clone();

            async move {
                if let Some(token) = token {
                    connection.unsubscribe(token).await?;
                }
                Ok(())
            }
        })
        .await
        .expect("Failed to subscribe");

    let (victim_calls_sender, victim_calls) = async_channel::unbounded::<SignalMessage>();
    let victim = connection
        .subscribe("Tick", move |signal| {
            let _ = victim_calls_sender.try_send(signal);
            async { Ok(()) }
        })
        .await
        .expect("Failed to subscribe");
    victim_sender.try_send(victim).unwrap();

    // Unsubscribes itself
    let (own_calls_sender, own_calls) = async_channel::unbounded();
    let (own_sender, own_token) = async_channel::bounded(1);
    let handler_connection = connection.clone();
    let own = connection
        .subscribe("Tick", move |signal| {
            let _ = own_calls_sender.try_send(signal.arg(0).and_then(Value::as_u32));
            let token = own_token.try_recv().ok();
            let connection = handler_connection.clone();

            async move {
                if let Some(token) = token {
                    connection.unsubscribe(token).await?;
                }
                Ok(())
            }
        })
        .await
        .expect("Failed to subscribe");
    own_sender.try_send(own).unwrap();

    let loop_connection = connection.clone();
    tokio::spawn(async move { loop_connection.run().await });

    emit_ticks(&fixture, 1..=3).await;

    for expected in 1..=3 {
        assert_eq!(receive(&calls).await, Some(expected));
    }
    assert_eq!(receive(&own_calls).await, Some(1));

    time::sleep(Duration::from_millis(50)).await;
    assert!(victim_calls.is_empty());
    assert!(own_calls.is_empty());
    assert_eq!(connection.subscription_count().await, 1);

    assert!(matches!(
        connection.unsubscribe(victim).await,
        Err(Error::NotFound(_))
    ));

    connection.shutdown().await;
}

#[rstest]
#[awt]
#[tokio::test(flavor = "multi_thread")]
async fn test_sender_filter(
    #[from(make_fixture)]
    #[future]
    fixture: Fixture,
) {
    let bus = fixture.bus();
    let connection = fixture.connection().clone();

    let first = bus.register_service("org.example.a").await.unwrap();
    let second = bus.register_service("org.example.b").await.unwrap();

    let first_signal = first
        .register_signal("/Obj", "org.example.I", "Sig", "u")
        .await
        .unwrap();
    second
        .register_signal("/Obj", "org.example.I", "Sig", "u")
        .await
        .unwrap();

    let mut receivers = vec![];
    for service_name in ["org.example.a", "org.example.b"] {
        let (sender, receiver) = async_channel::unbounded();
        connection
            .get(service_name, "/Obj")
            .unwrap()
            .subscribe("org.example.I", "Sig", move |signal| {
                let _ = sender.try_send(signal.sender);
                async { Ok(()) }
            })
            .await
            .expect("Failed to subscribe");

        receivers.push(receiver);
    }

    assert_eq!(
        connection.name_owner("org.example.a").await.as_deref(),
        Some(first.unique_name())
    );

    let loop_connection = connection.clone();
    tokio::spawn(async move { loop_connection.run().await });

    first_signal.emit(vec![1u32.into()]).await.unwrap();

    assert_eq!(receive(&receivers[0]).await, first.unique_name());
    time::sleep(Duration::from_millis(50)).await;
    assert!(receivers[1].is_empty());

    // New owner of the name
    first.unregister().await;
    let replacement = bus.register_service("org.example.a").await.unwrap();
    let replacement_signal = replacement
        .register_signal("/Obj", "org.example.I", "Sig", "u")
        .await
        .unwrap();

    replacement_signal.emit(vec![2u32.into()]).await.unwrap();

    assert_eq!(receive(&receivers[0]).await, replacement.unique_name());
    assert_eq!(
        connection.name_owner("org.example.a").await.as_deref(),
        Some(replacement.unique_name())
    );
    assert!(receivers[1].is_empty());

    connection.shutdown().await;
}

#[rstest]
#[awt]
#[tokio::test(flavor = "multi_thread")]
async fn test_failing_handlers(
    #[from(make_fixture)]
    #[future]
    fixture: Fixture,
) {
    let connection = fixture.connection().clone();

    connection
        .subscribe(MatchRule::signal("Tick"), |signal| async move {
            if let Some(tick) = signal.arg(0).and_then(Value::as_u32) {
                panic!("Handler panic on tick {tick}");
            }

            Ok(())
        })
        .await
        .expect("Failed to subscribe");

    connection
        .subscribe("Tick", |_| async {
            Err(Error::TypeMismatch("Handler failure".into()))
        })
        .await
        .expect("Failed to subscribe");

    let (sender, receiver) = async_channel::unbounded();
    connection
        .subscribe("Tick", move |signal| {
            let _ = sender.try_send(signal.arg(0).and_then(Value::as_u32));
            async { Ok(()) }
        })
        .await
        .expect("Failed to subscribe");

    let loop_connection = connection.clone();
    let dispatch = tokio::spawn(async move { loop_connection.run().await });

    emit_ticks(&fixture, 1..=3).await;

    for expected in 1..=3 {
        assert_eq!(receive(&receiver).await, Some(expected));
    }

    // The loop survives
    assert!(!dispatch.is_finished());
    assert_eq!(connection.subscription_count().await, 3);

    connection.shutdown().await;
}

#[rstest]
#[awt]
#[tokio::test(flavor = "multi_thread")]
async fn test_properties_changed(
    #[from(make_fixture)]
    #[future]
    fixture: Fixture,
) {
    let client_path = fixture.new_client().await;

    let connection = fixture.connection().clone();
    let client = connection.get(SERVICE_NAME, &client_path).unwrap();

    let (sender, receiver) = async_channel::unbounded();
    client
        .on_properties_changed(move |changed| {
            let _ = sender.try_send(changed);
            async { Ok(()) }
        })
        .await
        .expect("Failed to subscribe");

    let loop_connection = connection.clone();
    tokio::spawn(async move { loop_connection.run().await });

    client
        .set_property(CLIENT_INTERFACE, "DistanceThreshold", 100u32)
        .await
        .unwrap();
    client.call(CLIENT_INTERFACE, "Start", vec![]).await.unwrap();

    assert_eq!(
        receive(&receiver).await,
        PropertiesChanged {
            interface: CLIENT_INTERFACE.into(),
            changed: PropertyMap::from([("DistanceThreshold".into(), Value::UInt32(100))]),
            invalidated: vec![],
        }
    );
    assert_eq!(
        receive(&receiver).await,
        PropertiesChanged {
            interface: CLIENT_INTERFACE.into(),
            changed: PropertyMap::from([("Active".into(), Value::Bool(true))]),
            invalidated: vec![],
        }
    );

    // Same value doesn't notify
    client
        .set_property(CLIENT_INTERFACE, "DistanceThreshold", 100u32)
        .await
        .unwrap();
    time::sleep(Duration::from_millis(50)).await;
    assert!(receiver.is_empty());

    connection.shutdown().await;
}

#[rstest]
#[awt]
#[tokio::test(flavor = "multi_thread")]
async fn test_bus_shutdown(
    #[from(make_fixture)]
    #[future]
    fixture: Fixture,
) {
    let connection = fixture.connection().clone();
    connection
        .subscribe("Tick", |_| async { Ok(()) })
        .await
        .expect("Failed to subscribe");

    let loop_connection = connection.clone();
    let dispatch = tokio::spawn(async move { loop_connection.run().await });

    fixture.bus().shutdown().await;

    let result = time::timeout(TIMEOUT, dispatch)
        .await
        .expect("Dispatch loop didn't stop")
        .unwrap();
    assert!(matches!(result, Err(Error::Connection(_))));

    let manager = connection.get(SERVICE_NAME, MANAGER_PATH).unwrap();
    assert!(matches!(
        manager.call(MANAGER_INTERFACE, "GetClient", vec![]).await,
        Err(Error::Connection(_))
    ));
}
