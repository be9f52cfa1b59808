//! In-process message bus.
//!
//! Services and connections attached to the same [LocalBus] talk to each other without a bus
//! daemon. Every exported object gets standard `Properties`, `Introspectable`, and `Peer`
//! interfaces, and bus faults use standard D-Bus error names, so a [Connection] behaves the
//! same as with a D-Bus transport.
//!
//! ```no_run
//! use geobus_lib::{local::LocalBus, Access};
//!
//! # async fn example() -> geobus_lib::Result<()> {
//! let bus = LocalBus::new();
//!
//! let service = bus.register_service("org.example.Counter").await?;
//! service
//!     .register_property("/Counter", "org.example.Counter", "Count", 0u32, Access::Read)
//!     .await?;
//!
//! let connection = bus.connect().await?;
//! let count = connection
//!     .get("org.example.Counter", "/Counter")?
//!     .get_property("org.example.Counter", "Count")
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod object;
mod service;

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt::Write as _,
    sync::Arc,
};

use async_channel::{Receiver, Sender};
use futures::{future::BoxFuture, lock::Mutex, FutureExt, StreamExt};
use log::{debug, info, trace, warn};

use geobus_common::{
    errors::{
        ACCESS_DENIED_FAULT, INVALID_ARGS_FAULT, NAME_HAS_NO_OWNER_FAULT, NAME_TAKEN_FAULT,
        PROPERTY_READ_ONLY_FAULT, SERVICE_UNKNOWN_FAULT, UNKNOWN_INTERFACE_FAULT,
        UNKNOWN_METHOD_FAULT, UNKNOWN_OBJECT_FAULT, UNKNOWN_PROPERTY_FAULT,
    },
    names, Error, PropertyMap, Schema, Value, DBUS_INTERFACE, DBUS_PATH, DBUS_SERVICE_NAME,
    GET_ALL_METHOD, GET_MACHINE_ID_METHOD, GET_METHOD, INTROSPECTABLE_INTERFACE,
    INTROSPECT_METHOD, NAME_OWNER_CHANGED_SIGNAL, PEER_INTERFACE, PING_METHOD,
    PROPERTIES_CHANGED_SIGNAL, PROPERTIES_INTERFACE, SET_METHOD,
};

use crate::{
    subscription::{MatchRule, SignalMessage},
    transport::{MethodCall, SignalStream, Transport},
    Connection,
};

use object::{MethodHandler, Object};
pub use service::{LocalService, LocalSignal};

const MACHINE_ID: &str = "67656f6275736c6f63616c6275730000";

const INTROSPECTION_DOCTYPE: &str = r#"<!DOCTYPE node PUBLIC "-//freedesktop//DTD D-BUS Object Introspection 1.0//EN"
 "http://www.freedesktop.org/standards/dbus/1.0/introspect.dtd">"#;

struct Peer {
    inbox: Sender<SignalMessage>,
    rules: Vec<MatchRule>,
}

enum Route {
    Reply(Vec<Value>),
    Handler {
        handler: MethodHandler,
        args: Vec<Value>,
        /// Reply signature the method is registered with
        out_signature: String,
    },
}

#[derive(Default)]
struct BusState {
    next_peer: u64,
    /// Unique name to peer
    peers: HashMap<String, Peer>,
    /// Well-known name to owner unique name
    names: HashMap<String, String>,
    /// Owner unique name to exported objects by path
    objects: HashMap<String, BTreeMap<String, Object>>,
    closed: bool,
}

impl BusState {
    fn add_peer(&mut self) -> crate::Result<(String, Receiver<SignalMessage>)> {
        if self.closed {
            return Err(Error::Connection("Bus is shut down".into()));
        }

        let unique_name = format!(":1.{}", self.next_peer);
        self.next_peer += 1;

        let (inbox, receiver) = async_channel::unbounded();
        self.peers.insert(
            unique_name.clone(),
            Peer {
                inbox,
                rules: vec![],
            },
        );

        debug!("New peer {unique_name}");
        Ok((unique_name, receiver))
    }

    /// Drop the peer with its names and objects. Closes the peer signal stream
    fn remove_peer(&mut self, unique_name: &str) {
        if self.peers.remove(unique_name).is_none() {
            return;
        }

        let released: Vec<String> = self
            .names
            .iter()
            .filter(|(_, owner)| *owner == unique_name)
            .map(|(name, _)| name.clone())
            .collect();

        for name in released {
            self.names.remove(&name);
            debug!("Name {name} released by {unique_name}");

            self.name_owner_changed(&name, unique_name, "");
        }
        self.objects.remove(unique_name);

        debug!("Peer {unique_name} left");
    }

    fn check_peer(&self, unique_name: &str) -> crate::Result<()> {
        if self.peers.contains_key(unique_name) {
            Ok(())
        } else {
            Err(Error::Connection(format!("{unique_name} is disconnected")))
        }
    }

    fn resolve(&self, name: &str) -> crate::Result<String> {
        if name.starts_with(':') {
            return match self.peers.contains_key(name) {
                true => Ok(name.to_owned()),
                false => Err(Error::from_fault(
                    NAME_HAS_NO_OWNER_FAULT,
                    format!("Name {name} has no owner"),
                )),
            };
        }

        self.names.get(name).cloned().ok_or_else(|| {
            Error::from_fault(
                SERVICE_UNKNOWN_FAULT,
                format!("The name {name} was not provided by any .service files"),
            )
        })
    }

    fn name_owner(&self, name: &str) -> Option<String> {
        if name.starts_with(':') {
            return self.peers.contains_key(name).then(|| name.to_owned());
        }

        self.names.get(name).cloned()
    }

    /// Notify about a name owner change. Empty `old` or `new` stand for no owner
    fn name_owner_changed(&self, name: &str, old: &str, new: &str) {
        self.broadcast(SignalMessage {
            sender: DBUS_SERVICE_NAME.to_owned(),
            path: DBUS_PATH.to_owned(),
            interface: DBUS_INTERFACE.to_owned(),
            member: NAME_OWNER_CHANGED_SIGNAL.to_owned(),
            args: vec![name.into(), old.into(), new.into()],
        });
    }

    /// Route a signal to the peers with matching rules
    fn broadcast(&self, message: SignalMessage) {
        trace!(
            "Broadcasting {}.{} from {}",
            message.interface,
            message.member,
            message.sender
        );

        for (unique_name, peer) in self.peers.iter() {
            let accepted = peer
                .rules
                .iter()
                .any(|rule| rule.matches(&message, |name| self.names.get(name).cloned()));

            if accepted && peer.inbox.try_send(message.clone()).is_err() {
                warn!("Peer {unique_name} doesn't receive signals anymore");
            }
        }
    }

    fn object_mut(&mut self, owner: &str, path: &str) -> crate::Result<&mut Object> {
        self.check_peer(owner)?;

        if !names::is_valid_object_path(path) {
            return Err(Error::NotFound(format!("Invalid object path '{path}'")));
        }

        Ok(self
            .objects
            .entry(owner.to_owned())
            .or_default()
            .entry(path.to_owned())
            .or_default())
    }

    fn object(&self, owner: &str, path: &str) -> crate::Result<&Object> {
        self.objects
            .get(owner)
            .and_then(|objects| objects.get(path))
            .ok_or_else(|| {
                Error::from_fault(UNKNOWN_OBJECT_FAULT, format!("Unknown object '{path}'"))
            })
    }

    fn interface(&self, owner: &str, path: &str, name: &str) -> crate::Result<&object::Interface> {
        self.object(owner, path)?
            .interfaces
            .get(name)
            .ok_or_else(|| {
                Error::from_fault(
                    UNKNOWN_INTERFACE_FAULT,
                    format!("Object '{path}' has no interface '{name}'"),
                )
            })
    }

    fn route(&mut self, call: MethodCall) -> crate::Result<Route> {
        let owner = self.resolve(&call.destination)?;

        match call.interface.as_str() {
            PEER_INTERFACE => return peer_call(&call).map(Route::Reply),
            INTROSPECTABLE_INTERFACE if call.member == INTROSPECT_METHOD => {
                return Ok(Route::Reply(vec![Value::Str(
                    self.introspect(&owner, &call.path)?,
                )]))
            }
            PROPERTIES_INTERFACE => return self.properties_call(&owner, call).map(Route::Reply),
            _ => {}
        }

        let interface = self.interface(&owner, &call.path, &call.interface)?;
        let method = interface.description.method(&call.member).map_err(|e| {
            Error::from_fault(UNKNOWN_METHOD_FAULT, e.message())
        })?;

        if method.in_signature() != call.signature() {
            return Err(Error::from_fault(
                INVALID_ARGS_FAULT,
                format!(
                    "{}.{} expects '{}', got '{}'",
                    call.interface,
                    call.member,
                    method.in_signature(),
                    call.signature()
                ),
            ));
        }

        let handler = interface.handlers.get(&call.member).cloned().ok_or_else(|| {
            Error::from_fault(
                UNKNOWN_METHOD_FAULT,
                format!("{}.{} is not implemented", call.interface, call.member),
            )
        })?;

        Ok(Route::Handler {
            handler,
            out_signature: method.out_signature(),
            args: call.args,
        })
    }

    fn properties_call(&mut self, owner: &str, call: MethodCall) -> crate::Result<Vec<Value>> {
        match (call.member.as_str(), call.args.as_slice()) {
            (GET_METHOD, [Value::Str(interface), Value::Str(name)]) => {
                let interface = self.interface(owner, &call.path, interface)?;
                let property = interface.description.property(name).map_err(|e| {
                    Error::from_fault(UNKNOWN_PROPERTY_FAULT, e.message())
                })?;

                if !property.access.readable() {
                    return Err(Error::from_fault(
                        ACCESS_DENIED_FAULT,
                        format!("Property {name} is write-only"),
                    ));
                }

                let value = interface.values.get(name).cloned().ok_or_else(|| {
                    Error::from_fault(UNKNOWN_PROPERTY_FAULT, format!("{name} has no value"))
                })?;

                Ok(vec![Value::variant(value)])
            }
            (GET_ALL_METHOD, [Value::Str(interface)]) => {
                let interface = self.interface(owner, &call.path, interface)?;
                Ok(vec![interface.readable_values().into()])
            }
            (SET_METHOD, [Value::Str(interface), Value::Str(name), Value::Variant(value)]) => {
                self.set_property(owner, &call.path, interface, name, (**value).clone(), true)?;
                Ok(vec![])
            }
            (GET_METHOD | GET_ALL_METHOD | SET_METHOD, _) => Err(Error::from_fault(
                INVALID_ARGS_FAULT,
                format!(
                    "Invalid {PROPERTIES_INTERFACE}.{} arguments '{}'",
                    call.member,
                    call.signature()
                ),
            )),
            (member, _) => Err(Error::from_fault(
                UNKNOWN_METHOD_FAULT,
                format!("{PROPERTIES_INTERFACE} has no method '{member}'"),
            )),
        }
    }

    /// Update a property value. Readable properties notify about the change
    fn set_property(
        &mut self,
        owner: &str,
        path: &str,
        interface_name: &str,
        name: &str,
        value: Value,
        check_access: bool,
    ) -> crate::Result<()> {
        let interface = self
            .objects
            .get_mut(owner)
            .and_then(|objects| objects.get_mut(path))
            .ok_or_else(|| {
                Error::from_fault(UNKNOWN_OBJECT_FAULT, format!("Unknown object '{path}'"))
            })?
            .interfaces
            .get_mut(interface_name)
            .ok_or_else(|| {
                Error::from_fault(
                    UNKNOWN_INTERFACE_FAULT,
                    format!("Object '{path}' has no interface '{interface_name}'"),
                )
            })?;

        let property = interface
            .description
            .property(name)
            .map_err(|e| Error::from_fault(UNKNOWN_PROPERTY_FAULT, e.message()))?;

        if check_access && !property.access.writable() {
            return Err(Error::from_fault(
                PROPERTY_READ_ONLY_FAULT,
                format!("Property {interface_name}.{name} is read-only"),
            ));
        }

        if property.signature != value.signature() {
            return Err(Error::from_fault(
                INVALID_ARGS_FAULT,
                format!(
                    "Property {interface_name}.{name} is '{}', got '{}'",
                    property.signature,
                    value.signature()
                ),
            ));
        }

        let readable = property.access.readable();
        let previous = interface.values.insert(name.to_owned(), value.clone());

        if readable && previous.as_ref() != Some(&value) {
            debug!("{path} {interface_name}.{name} changed to {value}");

            let changed = PropertyMap::from([(name.to_owned(), value)]);
            self.broadcast(SignalMessage {
                sender: owner.to_owned(),
                path: path.to_owned(),
                interface: PROPERTIES_INTERFACE.to_owned(),
                member: PROPERTIES_CHANGED_SIGNAL.to_owned(),
                args: vec![
                    interface_name.into(),
                    changed.into(),
                    Value::Array {
                        element: "s".into(),
                        items: vec![],
                    },
                ],
            });
        }

        Ok(())
    }

    fn introspect(&self, owner: &str, path: &str) -> crate::Result<String> {
        let objects = self.objects.get(owner);
        let object = objects.and_then(|objects| objects.get(path));

        let children: BTreeSet<&str> = objects
            .into_iter()
            .flat_map(|objects| objects.keys())
            .filter_map(|child| child_name(path, child))
            .collect();

        if object.is_none() && children.is_empty() && path != "/" {
            return Err(Error::from_fault(
                UNKNOWN_OBJECT_FAULT,
                format!("Unknown object '{path}'"),
            ));
        }

        let mut xml = format!("{INTROSPECTION_DOCTYPE}\n<node>\n");

        match Schema::builtin() {
            Ok(schema) => {
                for name in [PROPERTIES_INTERFACE, INTROSPECTABLE_INTERFACE, PEER_INTERFACE] {
                    if let Some(interface) = schema.interface(name) {
                        xml.push_str(&interface.to_xml(2));
                    }
                }
            }
            Err(e) => warn!("Failed to load standard interface descriptions: {e}"),
        }

        for interface in object.iter().flat_map(|object| object.interfaces.values()) {
            xml.push_str(&interface.description.to_xml(2));
        }

        for child in children {
            let _ = writeln!(xml, "  <node name=\"{child}\"/>");
        }

        xml.push_str("</node>\n");
        Ok(xml)
    }
}

fn peer_call(call: &MethodCall) -> crate::Result<Vec<Value>> {
    match call.member.as_str() {
        PING_METHOD => Ok(vec![]),
        GET_MACHINE_ID_METHOD => Ok(vec![MACHINE_ID.into()]),
        member => Err(Error::from_fault(
            UNKNOWN_METHOD_FAULT,
            format!("{PEER_INTERFACE} has no method '{member}'"),
        )),
    }
}

/// First path element of `path` under `parent`
fn child_name<'a>(parent: &str, path: &'a str) -> Option<&'a str> {
    let prefix = match parent {
        "/" => "/".to_owned(),
        parent => format!("{parent}/"),
    };

    path.strip_prefix(prefix.as_str())?
        .split('/')
        .next()
        .filter(|child| !child.is_empty())
}

/// In-process bus. Cheap to clone, all clones are the same bus
#[derive(Clone, Default)]
pub struct LocalBus {
    state: Arc<Mutex<BusState>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new peer
    pub async fn transport(&self) -> crate::Result<LocalTransport> {
        let (unique_name, inbox) = self.state.lock().await.add_peer()?;

        Ok(LocalTransport {
            bus: self.clone(),
            unique_name,
            inbox,
        })
    }

    /// Attach a new peer and make a connection on top of it
    pub async fn connect(&self) -> crate::Result<Connection> {
        Connection::with_transport(Arc::new(self.transport().await?))
    }

    /// Attach a new peer, which owns `name`
    pub async fn register_service(&self, name: &str) -> crate::Result<LocalService> {
        if name.starts_with(':') || !names::is_valid_bus_name(name) {
            return Err(Error::NotFound(format!("Invalid service name '{name}'")));
        }

        let mut state = self.state.lock().await;
        if let Some(owner) = state.names.get(name) {
            return Err(Error::remote(
                NAME_TAKEN_FAULT,
                format!("Name {name} is already owned by {owner}"),
            ));
        }

        // Services don't subscribe, so the inbox is never read
        let (unique_name, _) = state.add_peer()?;
        state.names.insert(name.to_owned(), unique_name.clone());
        state.name_owner_changed(name, "", &unique_name);

        info!("Service {name} registered as {unique_name}");
        Ok(LocalService::new(self.clone(), name, unique_name))
    }

    /// Disconnect every peer. Connection dispatch loops return [Error::Connection]
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;

        state.closed = true;
        state.peers.clear();
        state.names.clear();
        state.objects.clear();

        info!("Local bus shut down");
    }
}

/// A peer of a [LocalBus]
pub struct LocalTransport {
    bus: LocalBus,
    unique_name: String,
    inbox: Receiver<SignalMessage>,
}

impl Transport for LocalTransport {
    fn unique_name(&self) -> Option<String> {
        Some(self.unique_name.clone())
    }

    fn call(&self, call: MethodCall) -> BoxFuture<'_, crate::Result<Vec<Value>>> {
        async move {
            let method = format!("{}.{}", call.interface, call.member);
            let route = {
                let mut state = self.bus.state.lock().await;
                state.check_peer(&self.unique_name)?;
                state.route(call)?
            };

            match route {
                Route::Reply(reply) => Ok(reply),
                // Bus state is unlocked, so the handler can use the bus
                Route::Handler {
                    handler,
                    args,
                    out_signature,
                } => {
                    let reply = handler(self.unique_name.clone(), args)
                        .await
                        .map_err(|e| Error::from_fault(e.fault_name(), e.message()))?;

                    let signature: String = reply.iter().map(Value::signature).collect();
                    if signature != out_signature {
                        warn!("{method} replied with '{signature}' instead of '{out_signature}'");

                        return Err(Error::from_fault(
                            INVALID_ARGS_FAULT,
                            format!("{method} returns '{out_signature}', got '{signature}'"),
                        ));
                    }

                    Ok(reply)
                }
            }
        }
        .boxed()
    }

    fn add_match(&self, rule: MatchRule) -> BoxFuture<'_, crate::Result<()>> {
        async move {
            let mut state = self.bus.state.lock().await;
            state.check_peer(&self.unique_name)?;

            if let Some(peer) = state.peers.get_mut(&self.unique_name) {
                trace!("{} adds match rule {rule}", self.unique_name);
                peer.rules.push(rule);
            }

            Ok(())
        }
        .boxed()
    }

    fn remove_match(&self, rule: MatchRule) -> BoxFuture<'_, crate::Result<()>> {
        async move {
            let mut state = self.bus.state.lock().await;
            state.check_peer(&self.unique_name)?;

            if let Some(peer) = state.peers.get_mut(&self.unique_name) {
                if let Some(position) = peer.rules.iter().position(|r| r == &rule) {
                    trace!("{} removes match rule {rule}", self.unique_name);
                    peer.rules.remove(position);
                }
            }

            Ok(())
        }
        .boxed()
    }

    fn name_owner(&self, name: &str) -> BoxFuture<'_, crate::Result<Option<String>>> {
        let name = name.to_owned();

        async move {
            let state = self.bus.state.lock().await;
            state.check_peer(&self.unique_name)?;

            Ok(state.name_owner(&name))
        }
        .boxed()
    }

    fn signals(&self) -> crate::Result<SignalStream> {
        Ok(self.inbox.clone().boxed())
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        async move { self.bus.state.lock().await.remove_peer(&self.unique_name) }.boxed()
    }
}
