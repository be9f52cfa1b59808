use futures::Future;
use log::{debug, info};

use geobus_common::{names, Access, Error, InterfaceDescription, PropertyMap, Value};

use super::{object::method_handler, LocalBus};
use crate::subscription::SignalMessage;

/// Service on a [LocalBus], which owns a well-known name and exports objects
#[derive(Clone)]
pub struct LocalService {
    bus: LocalBus,
    name: String,
    unique_name: String,
}

impl LocalService {
    pub(crate) fn new(bus: LocalBus, name: &str, unique_name: String) -> Self {
        Self {
            bus,
            name: name.to_owned(),
            unique_name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unique_name(&self) -> &str {
        &self.unique_name
    }

    /// Register a method. The handler receives unique name of the caller and call arguments,
    /// which are guaranteed to match `in_signature`. The reply must match `out_signature`.
    ///
    /// Calls aren't serialized: the handler may run concurrently with itself, and may call
    /// its own method again
    pub async fn register_method<F, Fr>(
        &self,
        path: &str,
        interface: &str,
        method: &str,
        in_signature: &str,
        out_signature: &str,
        function: F,
    ) -> crate::Result<()>
    where
        F: Fn(String, Vec<Value>) -> Fr + Send + Sync + 'static,
        Fr: Future<Output = crate::Result<Vec<Value>>> + Send + 'static,
    {
        names::check_member(interface, method)?;

        self.bus
            .state
            .lock()
            .await
            .object_mut(&self.unique_name, path)?
            .interface_mut(interface)
            .add_method(method, in_signature, out_signature, method_handler(function))?;

        debug!("{} registered method {path} {interface}.{method}", self.name);
        Ok(())
    }

    pub async fn register_property<V: Into<Value>>(
        &self,
        path: &str,
        interface: &str,
        name: &str,
        value: V,
        access: Access,
    ) -> crate::Result<()> {
        names::check_member(interface, name)?;

        self.bus
            .state
            .lock()
            .await
            .object_mut(&self.unique_name, path)?
            .interface_mut(interface)
            .add_property(name, value.into(), access)?;

        debug!("{} registered property {path} {interface}.{name}", self.name);
        Ok(())
    }

    pub async fn register_signal(
        &self,
        path: &str,
        interface: &str,
        name: &str,
        signature: &str,
    ) -> crate::Result<LocalSignal> {
        names::check_member(interface, name)?;

        self.bus
            .state
            .lock()
            .await
            .object_mut(&self.unique_name, path)?
            .interface_mut(interface)
            .add_signal(name, signature)?;

        debug!("{} registered signal {path} {interface}.{name}", self.name);

        Ok(LocalSignal {
            bus: self.bus.clone(),
            sender: self.unique_name.clone(),
            path: path.to_owned(),
            interface: interface.to_owned(),
            member: name.to_owned(),
            signature: signature.to_owned(),
        })
    }

    /// Export an object implementing `description` with initial property `values`.
    /// Described methods without registered handlers fail as unknown
    pub async fn serve_description(
        &self,
        path: &str,
        description: &InterfaceDescription,
        values: PropertyMap,
    ) -> crate::Result<()> {
        self.bus
            .state
            .lock()
            .await
            .object_mut(&self.unique_name, path)?
            .interface_mut(&description.name)
            .describe(description, values)?;

        debug!("{} serves {} at {path}", self.name, description.name);
        Ok(())
    }

    /// Server side property update. Ignores access rights, notifies subscribers on change
    pub async fn set_property<V: Into<Value>>(
        &self,
        path: &str,
        interface: &str,
        name: &str,
        value: V,
    ) -> crate::Result<()> {
        self.bus.state.lock().await.set_property(
            &self.unique_name,
            path,
            interface,
            name,
            value.into(),
            false,
        )
    }

    pub async fn property(&self, path: &str, interface: &str, name: &str) -> crate::Result<Value> {
        self.bus
            .state
            .lock()
            .await
            .interface(&self.unique_name, path, interface)?
            .values
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("{interface} has no property '{name}'")))
    }

    /// Stop exporting an object. Subsequent calls to the object fail as unknown
    pub async fn remove_object(&self, path: &str) -> crate::Result<()> {
        self.bus
            .state
            .lock()
            .await
            .objects
            .get_mut(&self.unique_name)
            .and_then(|objects| objects.remove(path))
            .map(|_| debug!("{} removed {path}", self.name))
            .ok_or_else(|| Error::NotFound(format!("{} has no object '{path}'", self.name)))
    }

    /// Leave the bus, releasing the name and all objects
    pub async fn unregister(&self) {
        self.bus.state.lock().await.remove_peer(&self.unique_name);
        info!("Service {} unregistered", self.name);
    }
}

/// Handle to emit a registered signal
#[derive(Clone)]
pub struct LocalSignal {
    bus: LocalBus,
    sender: String,
    path: String,
    interface: String,
    member: String,
    signature: String,
}

impl LocalSignal {
    pub async fn emit(&self, args: Vec<Value>) -> crate::Result<()> {
        let message = SignalMessage {
            sender: self.sender.clone(),
            path: self.path.clone(),
            interface: self.interface.clone(),
            member: self.member.clone(),
            args,
        };

        if message.signature() != self.signature {
            return Err(Error::TypeMismatch(format!(
                "{}.{} is '{}', got '{}'",
                self.interface,
                self.member,
                self.signature,
                message.signature()
            )));
        }

        debug!(
            "Emitting {}.{} at {}",
            self.interface, self.member, self.path
        );

        let state = self.bus.state.lock().await;
        state.check_peer(&self.sender)?;
        state.broadcast(message);

        Ok(())
    }
}
