use std::fmt::{self, Debug, Formatter};

use futures::Future;
use log::{debug, info};

use geobus_common::{
    errors::PROPERTY_READ_ONLY_FAULT, names, Error, PropertyMap, Value, GET_ALL_METHOD,
    GET_METHOD, INTROSPECTABLE_INTERFACE, INTROSPECT_METHOD, PEER_INTERFACE, PING_METHOD,
    PROPERTIES_CHANGED_SIGNAL, PROPERTIES_INTERFACE, SET_METHOD,
};

use crate::{
    subscription::{MatchRule, SignalMessage, SubscriptionToken},
    transport::MethodCall,
    Connection,
};

/// `PropertiesChanged` notification content
#[derive(Debug, Clone, PartialEq)]
pub struct PropertiesChanged {
    pub interface: String,
    pub changed: PropertyMap,
    pub invalidated: Vec<String>,
}

impl TryFrom<&SignalMessage> for PropertiesChanged {
    type Error = Error;

    fn try_from(message: &SignalMessage) -> crate::Result<Self> {
        match message.args.as_slice() {
            [Value::Str(interface), changed @ Value::Dict { .. }, Value::Array { items, .. }] => {
                Ok(Self {
                    interface: interface.clone(),
                    changed: property_map(changed.clone())?,
                    invalidated: items
                        .iter()
                        .filter_map(|item| item.as_str().map(str::to_owned))
                        .collect(),
                })
            }
            _ => Err(Error::TypeMismatch(format!(
                "Invalid {PROPERTIES_CHANGED_SIGNAL} signature '{}'",
                message.signature()
            ))),
        }
    }
}

/// Remote object handle. Doesn't own the connection, and is cheap to construct.
///
/// If the connection has a [geobus_common::Schema] describing the interface, calls are validated
/// before sending: unknown members fail with [Error::NotFound], values of a wrong type with
/// [Error::TypeMismatch]
#[derive(Clone)]
pub struct Proxy {
    connection: Connection,
    service_name: String,
    path: String,
}

impl Proxy {
    pub(crate) fn new(connection: Connection, service_name: String, path: String) -> Self {
        Self {
            connection,
            service_name,
            path,
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Call a remote method. Returns reply arguments
    pub async fn call(
        &self,
        interface: &str,
        method: &str,
        args: Vec<Value>,
    ) -> crate::Result<Vec<Value>> {
        names::check_member(interface, method)?;

        let schema = self.connection.schema().await;
        let out_signature = match schema.interface(interface) {
            Some(description) => {
                let method_description = description.method(method)?;
                check_signature(
                    &format!("{interface}.{method} arguments"),
                    &method_description.in_signature(),
                    &signature_of(&args),
                )?;

                Some(method_description.out_signature())
            }
            None => None,
        };

        let reply = self
            .connection
            .call(MethodCall::new(
                &self.service_name,
                &self.path,
                interface,
                method,
                args,
            ))
            .await?;

        if let Some(out_signature) = out_signature {
            check_signature(
                &format!("{interface}.{method} reply"),
                &out_signature,
                &signature_of(&reply),
            )?;
        }

        Ok(reply)
    }

    /// Call a method, which returns exactly one value
    pub async fn call_single(
        &self,
        interface: &str,
        method: &str,
        args: Vec<Value>,
    ) -> crate::Result<Value> {
        let mut reply = self.call(interface, method, args).await?;

        if reply.len() != 1 {
            return Err(Error::TypeMismatch(format!(
                "{interface}.{method} returned {} values, expected one",
                reply.len()
            )));
        }

        Ok(reply.remove(0))
    }

    pub async fn get_property(&self, interface: &str, name: &str) -> crate::Result<Value> {
        names::check_member(interface, name)?;

        let schema = self.connection.schema().await;
        let declared = match schema.interface(interface) {
            Some(description) => Some(description.property(name)?.signature.clone()),
            None => None,
        };

        let value = match self
            .call_single(
                PROPERTIES_INTERFACE,
                GET_METHOD,
                vec![interface.into(), name.into()],
            )
            .await?
        {
            value @ Value::Variant(_) => unwrap_variant(value),
            other => {
                return Err(Error::TypeMismatch(format!(
                    "Expected a variant from {PROPERTIES_INTERFACE}.{GET_METHOD}, got '{}'",
                    other.signature()
                )))
            }
        };

        if let Some(signature) = declared {
            check_signature(&format!("{interface}.{name}"), &signature, &value.signature())?;
        }

        Ok(value)
    }

    /// Set a property value. Fails with [Error::TypeMismatch] if the value type
    /// doesn't match the property type
    pub async fn set_property<V: Into<Value>>(
        &self,
        interface: &str,
        name: &str,
        value: V,
    ) -> crate::Result<()> {
        names::check_member(interface, name)?;
        let value = value.into();

        let schema = self.connection.schema().await;
        if let Some(description) = schema.interface(interface) {
            let property = description.property(name)?;

            if !property.access.writable() {
                return Err(Error::remote(
                    PROPERTY_READ_ONLY_FAULT,
                    format!("{interface}.{name} is read-only"),
                ));
            }

            check_signature(
                &format!("{interface}.{name}"),
                &property.signature,
                &value.signature(),
            )?;
        }

        debug!("Setting {interface}.{name} of {} to {value}", self.path);

        self.call(
            PROPERTIES_INTERFACE,
            SET_METHOD,
            vec![interface.into(), name.into(), Value::variant(value)],
        )
        .await?;

        Ok(())
    }

    pub async fn get_all_properties(&self, interface: &str) -> crate::Result<PropertyMap> {
        if !names::is_valid_interface_name(interface) {
            return Err(Error::NotFound(format!("Invalid interface name '{interface}'")));
        }

        let properties = property_map(
            self.call_single(PROPERTIES_INTERFACE, GET_ALL_METHOD, vec![interface.into()])
                .await?,
        )?;

        let schema = self.connection.schema().await;
        if let Some(description) = schema.interface(interface) {
            for (name, value) in properties.iter() {
                // Services may expose more than described
                if let Ok(property) = description.property(name) {
                    check_signature(
                        &format!("{interface}.{name}"),
                        &property.signature,
                        &value.signature(),
                    )?;
                }
            }
        }

        Ok(properties)
    }

    /// Introspection XML of the remote object
    pub async fn introspect(&self) -> crate::Result<String> {
        match self
            .call_single(INTROSPECTABLE_INTERFACE, INTROSPECT_METHOD, vec![])
            .await?
        {
            Value::Str(xml) => Ok(xml),
            other => Err(Error::TypeMismatch(format!(
                "Expected introspection XML, got '{}'",
                other.signature()
            ))),
        }
    }

    pub async fn ping(&self) -> crate::Result<()> {
        self.call(PEER_INTERFACE, PING_METHOD, vec![]).await?;
        Ok(())
    }

    /// Check that the remote object exposes every readable property of the described
    /// `interface` with the described type
    pub async fn validate(&self, interface: &str) -> crate::Result<()> {
        let schema = self.connection.schema().await;
        let description = schema.require(interface)?;

        let properties = self.get_all_properties(interface).await?;

        for property in description.properties.iter() {
            if !property.access.readable() {
                continue;
            }

            match properties.get(&property.name) {
                Some(value) => check_signature(
                    &format!("{interface}.{}", property.name),
                    &property.signature,
                    &value.signature(),
                )?,
                None => {
                    return Err(Error::NotFound(format!(
                        "{} at {} doesn't expose {interface}.{}",
                        self.service_name, self.path, property.name
                    )))
                }
            }
        }

        info!(
            "{} at {} matches {interface} description",
            self.service_name, self.path
        );

        Ok(())
    }

    /// Subscribe to a signal of this object
    pub async fn subscribe<F, Fr>(
        &self,
        interface: &str,
        signal: &str,
        handler: F,
    ) -> crate::Result<SubscriptionToken>
    where
        F: FnMut(SignalMessage) -> Fr + Send + 'static,
        Fr: Future<Output = crate::Result<()>> + Send + 'static,
    {
        names::check_member(interface, signal)?;

        let schema = self.connection.schema().await;
        if let Some(description) = schema.interface(interface) {
            description.signal(signal)?;
        }

        let rule = MatchRule::signal(signal)
            .with_sender(&self.service_name)
            .with_path(&self.path)
            .with_interface(interface);

        self.connection.subscribe(rule, handler).await
    }

    /// Subscribe to the standard property change notifications of this object
    pub async fn on_properties_changed<F, Fr>(
        &self,
        mut handler: F,
    ) -> crate::Result<SubscriptionToken>
    where
        F: FnMut(PropertiesChanged) -> Fr + Send + 'static,
        Fr: Future<Output = crate::Result<()>> + Send + 'static,
    {
        self.subscribe(
            PROPERTIES_INTERFACE,
            PROPERTIES_CHANGED_SIGNAL,
            move |message: SignalMessage| {
                let future = PropertiesChanged::try_from(&message).map(&mut handler);

                async move {
                    match future {
                        Ok(future) => future.await,
                        Err(e) => Err(e),
                    }
                }
            },
        )
        .await
    }
}

impl Debug for Proxy {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Proxy: {}{}", self.service_name, self.path)
    }
}

fn signature_of(values: &[Value]) -> String {
    values.iter().map(Value::signature).collect()
}

fn check_signature(context: &str, declared: &str, actual: &str) -> crate::Result<()> {
    if declared == actual {
        Ok(())
    } else {
        Err(Error::TypeMismatch(format!(
            "{context}: expected '{declared}', got '{actual}'"
        )))
    }
}

fn unwrap_variant(value: Value) -> Value {
    match value {
        Value::Variant(inner) => *inner,
        value => value,
    }
}

/// Convert an `a{sv}` dictionary into a property map
fn property_map(value: Value) -> crate::Result<PropertyMap> {
    match value {
        Value::Dict { key, value, entries } if key == "s" && value == "v" => entries
            .into_iter()
            .map(|(name, value)| match name {
                Value::Str(name) => Ok((name, unwrap_variant(value))),
                other => Err(Error::TypeMismatch(format!(
                    "Invalid property name '{other}'"
                ))),
            })
            .collect(),
        other => Err(Error::TypeMismatch(format!(
            "Expected 'a{{sv}}' properties, got '{}'",
            other.signature()
        ))),
    }
}
