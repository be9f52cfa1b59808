//! D-Bus transport on top of zbus

use std::sync::atomic::{AtomicBool, Ordering};

use async_channel::{Receiver, Sender};
use futures::{future::BoxFuture, FutureExt, StreamExt};
use log::{debug, trace, warn};
use tokio::task::JoinHandle;
use zbus::{
    fdo::DBusProxy,
    message::Type as MessageType,
    names::BusName,
    zvariant::{self, StructureBuilder},
    Message, MessageStream,
};

use geobus_common::{Error, Value};

use crate::{
    connection::BusScope,
    subscription::{MatchRule, SignalMessage},
    transport::{MethodCall, SignalStream, Transport},
};

pub struct DbusTransport {
    connection: zbus::Connection,
    closed: AtomicBool,
    /// Signals read from the bus, queued until the dispatch loop takes them
    signals: Receiver<SignalMessage>,
    reader: JoinHandle<()>,
}

impl DbusTransport {
    pub async fn connect(scope: &BusScope) -> crate::Result<Self> {
        debug!("Connecting to the {scope:?} bus");

        let connection = match scope {
            BusScope::Session => zbus::Connection::session().await,
            BusScope::System => zbus::Connection::system().await,
            BusScope::Address(address) => {
                match zbus::connection::Builder::address(address.as_str()) {
                    Ok(builder) => builder.build().await,
                    Err(e) => Err(e),
                }
            }
        }
        .map_err(|e| Error::Connection(format!("Failed to connect to the {scope:?} bus: {e}")))?;

        let (sender, signals) = async_channel::unbounded();
        let reader = tokio::spawn(read_messages(MessageStream::from(&connection), sender));

        Ok(Self {
            connection,
            closed: AtomicBool::new(false),
            signals,
            reader,
        })
    }

    fn check_open(&self) -> crate::Result<()> {
        if self.closed.load(Ordering::Relaxed) {
            Err(Error::Connection("Connection is closed".into()))
        } else {
            Ok(())
        }
    }

    async fn dbus_proxy(&self) -> crate::Result<DBusProxy<'static>> {
        DBusProxy::new(&self.connection).await.map_err(from_zbus)
    }
}

impl Transport for DbusTransport {
    fn unique_name(&self) -> Option<String> {
        self.connection.unique_name().map(|name| name.to_string())
    }

    fn call(&self, call: MethodCall) -> BoxFuture<'_, crate::Result<Vec<Value>>> {
        async move {
            self.check_open()?;

            let destination = Some(call.destination.as_str());
            let path = call.path.as_str();
            let interface = Some(call.interface.as_str());
            let member = call.member.as_str();

            let reply = if call.args.is_empty() {
                self.connection
                    .call_method(destination, path, interface, member, &())
                    .await
            } else {
                let body = to_structure(&call.args)?;
                self.connection
                    .call_method(destination, path, interface, member, &body)
                    .await
            }
            .map_err(from_zbus)?;

            body_values(&reply)
        }
        .boxed()
    }

    fn add_match(&self, rule: MatchRule) -> BoxFuture<'_, crate::Result<()>> {
        async move {
            self.check_open()?;
            debug!("Adding match rule {rule}");

            let dbus_rule = to_match_rule(&rule)?;
            self.dbus_proxy()
                .await?
                .add_match_rule(dbus_rule)
                .await
                .map_err(|e| from_zbus(e.into()))
        }
        .boxed()
    }

    fn remove_match(&self, rule: MatchRule) -> BoxFuture<'_, crate::Result<()>> {
        async move {
            self.check_open()?;
            debug!("Removing match rule {rule}");

            let dbus_rule = to_match_rule(&rule)?;
            self.dbus_proxy()
                .await?
                .remove_match_rule(dbus_rule)
                .await
                .map_err(|e| from_zbus(e.into()))
        }
        .boxed()
    }

    fn name_owner(&self, name: &str) -> BoxFuture<'_, crate::Result<Option<String>>> {
        let name = name.to_owned();

        async move {
            self.check_open()?;

            let bus_name =
                BusName::try_from(name.as_str()).map_err(|e| from_zbus(e.into()))?;

            match self.dbus_proxy().await?.get_name_owner(bus_name).await {
                Ok(owner) => Ok(Some(owner.to_string())),
                Err(zbus::fdo::Error::NameHasNoOwner(_)) => Ok(None),
                Err(e) => Err(from_zbus(e.into())),
            }
        }
        .boxed()
    }

    fn signals(&self) -> crate::Result<SignalStream> {
        self.check_open()?;
        Ok(self.signals.clone().boxed())
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        async move {
            if self.closed.swap(true, Ordering::Relaxed) {
                return;
            }

            self.reader.abort();
            if let Err(e) = self.connection.clone().close().await {
                warn!("Failed to close bus connection: {e}");
            }
        }
        .boxed()
    }
}

impl Drop for DbusTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Keep reading the connection message stream. zbus blocks the socket once the stream
/// queue is full, so every message is taken out and signals are forwarded to `sender`
async fn read_messages(mut stream: MessageStream, sender: Sender<SignalMessage>) {
    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                warn!("Failed to receive a message: {e}");
                continue;
            }
        };

        if message.message_type() != MessageType::Signal {
            continue;
        }

        match signal_message(&message) {
            Ok(signal) => {
                trace!("Queued {}.{} from {}", signal.interface, signal.member, signal.sender);

                if sender.send(signal).await.is_err() {
                    break;
                }
            }
            Err(e) => warn!("Dropping undecodable signal: {e}"),
        }
    }

    debug!("Bus message stream closed");
}

fn from_zbus(error: zbus::Error) -> Error {
    match error {
        zbus::Error::MethodError(name, detail, _) => {
            Error::from_fault(name.as_str(), detail.unwrap_or_default())
        }
        zbus::Error::FDO(e) => Error::remote(geobus_common::errors::FAILED_FAULT, e.to_string()),
        zbus::Error::Variant(e) => Error::TypeMismatch(e.to_string()),
        zbus::Error::Names(e) => Error::NotFound(e.to_string()),
        e => Error::Connection(e.to_string()),
    }
}

fn to_match_rule(rule: &MatchRule) -> crate::Result<zbus::MatchRule<'_>> {
    let mut builder = zbus::MatchRule::builder().msg_type(MessageType::Signal);

    if let Some(sender) = &rule.sender {
        builder = builder.sender(sender.as_str()).map_err(from_zbus)?;
    }
    if let Some(path) = &rule.path {
        builder = builder.path(path.as_str()).map_err(from_zbus)?;
    }
    if let Some(interface) = &rule.interface {
        builder = builder.interface(interface.as_str()).map_err(from_zbus)?;
    }
    if let Some(member) = &rule.member {
        builder = builder.member(member.as_str()).map_err(from_zbus)?;
    }

    Ok(builder.build())
}

fn signal_message(message: &Message) -> crate::Result<SignalMessage> {
    let header = message.header();

    Ok(SignalMessage {
        sender: header.sender().map(|name| name.to_string()).unwrap_or_default(),
        path: header.path().map(|path| path.to_string()).unwrap_or_default(),
        interface: header
            .interface()
            .map(|name| name.to_string())
            .unwrap_or_default(),
        member: header.member().map(|name| name.to_string()).unwrap_or_default(),
        args: body_values(message)?,
    })
}

fn body_values(message: &Message) -> crate::Result<Vec<Value>> {
    let body = message.body();

    if body.signature().to_string().is_empty() {
        return Ok(vec![]);
    }

    let structure: zvariant::Structure<'_> = body.deserialize().map_err(from_zbus)?;
    structure.fields().iter().map(from_zvariant).collect()
}

fn to_structure(values: &[Value]) -> crate::Result<zvariant::Structure<'static>> {
    let mut builder = StructureBuilder::new();
    for value in values {
        builder = builder.append_field(to_zvariant(value)?);
    }

    builder
        .build()
        .map_err(|e| Error::TypeMismatch(e.to_string()))
}

fn to_zvariant(value: &Value) -> crate::Result<zvariant::Value<'static>> {
    let result = match value {
        Value::Byte(value) => zvariant::Value::U8(*value),
        Value::Bool(value) => zvariant::Value::Bool(*value),
        Value::Int16(value) => zvariant::Value::I16(*value),
        Value::UInt16(value) => zvariant::Value::U16(*value),
        Value::Int32(value) => zvariant::Value::I32(*value),
        Value::UInt32(value) => zvariant::Value::U32(*value),
        Value::Int64(value) => zvariant::Value::I64(*value),
        Value::UInt64(value) => zvariant::Value::U64(*value),
        Value::Double(value) => zvariant::Value::F64(*value),
        Value::Str(value) => zvariant::Value::from(value.clone()),
        Value::ObjectPath(path) => zvariant::Value::ObjectPath(
            zvariant::ObjectPath::try_from(path.clone())
                .map_err(|e| Error::TypeMismatch(e.to_string()))?,
        ),
        Value::Signature(signature) => zvariant::Value::Signature(
            zvariant::Signature::try_from(signature.as_str())
                .map_err(|e| Error::TypeMismatch(e.to_string()))?,
        ),
        Value::Variant(inner) => zvariant::Value::Value(Box::new(to_zvariant(inner)?)),
        Value::Struct(fields) => zvariant::Value::Structure(to_structure(fields)?),
        Value::Array { .. } | Value::Dict { .. } => {
            return Err(Error::TypeMismatch(format!(
                "Can't send '{}' values over D-Bus: container arguments are not supported",
                value.signature()
            )))
        }
    };

    Ok(result)
}

fn from_zvariant(value: &zvariant::Value<'_>) -> crate::Result<Value> {
    let result = match value {
        zvariant::Value::U8(value) => Value::Byte(*value),
        zvariant::Value::Bool(value) => Value::Bool(*value),
        zvariant::Value::I16(value) => Value::Int16(*value),
        zvariant::Value::U16(value) => Value::UInt16(*value),
        zvariant::Value::I32(value) => Value::Int32(*value),
        zvariant::Value::U32(value) => Value::UInt32(*value),
        zvariant::Value::I64(value) => Value::Int64(*value),
        zvariant::Value::U64(value) => Value::UInt64(*value),
        zvariant::Value::F64(value) => Value::Double(*value),
        zvariant::Value::Str(value) => Value::Str(value.as_str().to_owned()),
        zvariant::Value::ObjectPath(path) => Value::ObjectPath(path.as_str().to_owned()),
        zvariant::Value::Signature(signature) => Value::Signature(signature.to_string()),
        zvariant::Value::Value(inner) => Value::variant(from_zvariant(inner)?),
        zvariant::Value::Array(array) => Value::Array {
            element: value
                .value_signature()
                .to_string()
                .get(1..)
                .unwrap_or_default()
                .to_owned(),
            items: array
                .iter()
                .map(from_zvariant)
                .collect::<crate::Result<_>>()?,
        },
        zvariant::Value::Dict(dict) => {
            let signature = value.value_signature().to_string();
            // a{KV}: key is a single basic type
            let key = signature.get(2..3).unwrap_or_default().to_owned();
            let value_signature = signature
                .get(3..signature.len().saturating_sub(1))
                .unwrap_or_default()
                .to_owned();

            Value::Dict {
                key,
                value: value_signature,
                entries: dict
                    .iter()
                    .map(|(k, v)| Ok((from_zvariant(k)?, from_zvariant(v)?)))
                    .collect::<crate::Result<_>>()?,
            }
        }
        zvariant::Value::Structure(structure) => Value::Struct(
            structure
                .fields()
                .iter()
                .map(from_zvariant)
                .collect::<crate::Result<_>>()?,
        ),
        other => {
            return Err(Error::TypeMismatch(format!(
                "Unsupported value type '{}'",
                other.value_signature()
            )))
        }
    };

    Ok(result)
}
