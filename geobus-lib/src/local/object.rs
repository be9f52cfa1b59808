use std::{collections::BTreeMap, sync::Arc};

use futures::{future::BoxFuture, Future, FutureExt};

use geobus_common::{
    schema::{Arg, MethodDescription, PropertyDescription, SignalDescription},
    signature, Access, Error, InterfaceDescription, PropertyMap, Value,
};

pub(crate) type MethodHandler =
    Arc<dyn Fn(String, Vec<Value>) -> BoxFuture<'static, crate::Result<Vec<Value>>> + Send + Sync>;

/// Wrap a user method into a shareable handler. Calls run concurrently
pub(crate) fn method_handler<F, Fr>(function: F) -> MethodHandler
where
    F: Fn(String, Vec<Value>) -> Fr + Send + Sync + 'static,
    Fr: Future<Output = crate::Result<Vec<Value>>> + Send + 'static,
{
    Arc::new(move |sender: String, args: Vec<Value>| function(sender, args).boxed())
}

/// Interface exported on a local object
#[derive(Default)]
pub(crate) struct Interface {
    pub description: InterfaceDescription,
    pub handlers: BTreeMap<String, MethodHandler>,
    pub values: PropertyMap,
}

impl Interface {
    fn new(name: &str) -> Self {
        Self {
            description: InterfaceDescription {
                name: name.to_owned(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn add_method(
        &mut self,
        name: &str,
        in_signature: &str,
        out_signature: &str,
        handler: MethodHandler,
    ) -> crate::Result<()> {
        if self.handlers.contains_key(name) {
            return Err(Error::InvalidDescription(format!(
                "Method {}.{name} is already registered",
                self.description.name
            )));
        }

        self.description
            .methods
            .retain(|method| method.name != name);
        self.description.methods.push(MethodDescription {
            name: name.to_owned(),
            inputs: args(in_signature)?,
            outputs: args(out_signature)?,
        });
        self.handlers.insert(name.to_owned(), handler);

        Ok(())
    }

    pub fn add_property(&mut self, name: &str, value: Value, access: Access) -> crate::Result<()> {
        if self.description.property(name).is_ok() {
            return Err(Error::InvalidDescription(format!(
                "Property {}.{name} is already registered",
                self.description.name
            )));
        }

        self.description.properties.push(PropertyDescription {
            name: name.to_owned(),
            signature: value.signature(),
            access,
        });
        self.values.insert(name.to_owned(), value);

        Ok(())
    }

    /// Add a signal. Already described signals with the same signature are kept
    pub fn add_signal(&mut self, name: &str, signature: &str) -> crate::Result<()> {
        if let Ok(signal) = self.description.signal(name) {
            if signal.signature() == signature {
                return Ok(());
            }

            return Err(Error::InvalidDescription(format!(
                "Signal {}.{name} is already registered with '{}'",
                self.description.name,
                signal.signature()
            )));
        }

        self.description.signals.push(SignalDescription {
            name: name.to_owned(),
            args: args(signature)?,
        });

        Ok(())
    }

    /// Replace the interface description. Readable properties need initial `values`
    pub fn describe(
        &mut self,
        description: &InterfaceDescription,
        mut values: PropertyMap,
    ) -> crate::Result<()> {
        let mut checked = PropertyMap::new();

        for property in description.properties.iter() {
            match values.remove(&property.name) {
                Some(value) if value.signature() == property.signature => {
                    checked.insert(property.name.clone(), value);
                }
                Some(value) => {
                    return Err(Error::TypeMismatch(format!(
                        "{}.{} is '{}', got '{}'",
                        description.name,
                        property.name,
                        property.signature,
                        value.signature()
                    )))
                }
                None if property.access.readable() => {
                    return Err(Error::InvalidDescription(format!(
                        "No initial value for {}.{}",
                        description.name, property.name
                    )))
                }
                None => {}
            }
        }

        if let Some(name) = values.keys().next() {
            return Err(Error::InvalidDescription(format!(
                "{} doesn't describe property {name}",
                description.name
            )));
        }

        self.handlers
            .retain(|name, _| description.method(name).is_ok());
        self.description = description.clone();
        self.values = checked;

        Ok(())
    }

    /// Readable properties
    pub fn readable_values(&self) -> PropertyMap {
        self.description
            .properties
            .iter()
            .filter(|property| property.access.readable())
            .filter_map(|property| {
                self.values
                    .get(&property.name)
                    .map(|value| (property.name.clone(), value.clone()))
            })
            .collect()
    }
}

/// Object exported by a local service
#[derive(Default)]
pub(crate) struct Object {
    pub interfaces: BTreeMap<String, Interface>,
}

impl Object {
    pub fn interface_mut(&mut self, name: &str) -> &mut Interface {
        self.interfaces
            .entry(name.to_owned())
            .or_insert_with(|| Interface::new(name))
    }
}

fn args(signature: &str) -> crate::Result<Vec<Arg>> {
    Ok(signature::split(signature)?
        .into_iter()
        .enumerate()
        .map(|(i, signature)| Arg {
            name: format!("arg{i}"),
            signature: signature.to_owned(),
        })
        .collect())
}
