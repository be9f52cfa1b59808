//! Interface descriptions.
//!
//! Remote interfaces are described by versioned JSON files, which are loaded at startup.
//! Each file has the following format:
//! ```json
//! {
//!     "version": 1,
//!     "interfaces": [
//!         {
//!             "name": "org.freedesktop.GeoClue2.Client",
//!             "methods": [{ "name": "Start", "in": [], "out": [] }],
//!             "signals": [{ "name": "LocationUpdated", "args": [{ "name": "old", "type": "o" }] }],
//!             "properties": [{ "name": "DesktopId", "type": "s", "access": "readwrite" }]
//!         }
//!     ]
//! }
//! ```
//! `in`, `out`, `args`, `methods`, `signals`, and `properties` may be omitted if empty.

use std::{
    collections::BTreeMap,
    fmt::{self, Display, Write as _},
    fs,
    path::Path,
};

use colored::*;
use json::JsonValue;
use log::*;

use crate::{names, signature, Error, Result};

pub const SCHEMA_VERSION: u32 = 1;

const VERSION_KEY: &str = "version";
const INTERFACES_KEY: &str = "interfaces";
const NAME_KEY: &str = "name";
const TYPE_KEY: &str = "type";
const ACCESS_KEY: &str = "access";
const METHODS_KEY: &str = "methods";
const SIGNALS_KEY: &str = "signals";
const PROPERTIES_KEY: &str = "properties";
const IN_KEY: &str = "in";
const OUT_KEY: &str = "out";
const ARGS_KEY: &str = "args";

const FREEDESKTOP_DESCRIPTION: &str = include_str!("../interfaces/freedesktop.json");
const GEOCLUE2_DESCRIPTION: &str = include_str!("../interfaces/geoclue2.json");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
    ReadWrite,
}

impl Access {
    pub fn readable(&self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    pub fn writable(&self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::ReadWrite => "readwrite",
        }
    }

    fn parse(access: &str) -> Option<Self> {
        match access {
            "read" => Some(Self::Read),
            "write" => Some(Self::Write),
            "readwrite" => Some(Self::ReadWrite),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Arg {
    pub name: String,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodDescription {
    pub name: String,
    pub inputs: Vec<Arg>,
    pub outputs: Vec<Arg>,
}

impl MethodDescription {
    pub fn in_signature(&self) -> String {
        self.inputs.iter().map(|arg| arg.signature.as_str()).collect()
    }

    pub fn out_signature(&self) -> String {
        self.outputs.iter().map(|arg| arg.signature.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDescription {
    pub name: String,
    pub signature: String,
    pub access: Access,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignalDescription {
    pub name: String,
    pub args: Vec<Arg>,
}

impl SignalDescription {
    pub fn signature(&self) -> String {
        self.args.iter().map(|arg| arg.signature.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct InterfaceDescription {
    pub name: String,
    pub methods: Vec<MethodDescription>,
    pub properties: Vec<PropertyDescription>,
    pub signals: Vec<SignalDescription>,
}

impl InterfaceDescription {
    pub fn method(&self, name: &str) -> Result<&MethodDescription> {
        self.methods
            .iter()
            .find(|method| method.name == name)
            .ok_or_else(|| Error::NotFound(format!("{} has no method '{name}'", self.name)))
    }

    pub fn property(&self, name: &str) -> Result<&PropertyDescription> {
        self.properties
            .iter()
            .find(|property| property.name == name)
            .ok_or_else(|| Error::NotFound(format!("{} has no property '{name}'", self.name)))
    }

    pub fn signal(&self, name: &str) -> Result<&SignalDescription> {
        self.signals
            .iter()
            .find(|signal| signal.name == name)
            .ok_or_else(|| Error::NotFound(format!("{} has no signal '{name}'", self.name)))
    }

    /// Introspection XML `<interface>` element
    pub fn to_xml(&self, indent: usize) -> String {
        let pad = " ".repeat(indent);
        let mut xml = String::new();

        let _ = writeln!(xml, "{pad}<interface name=\"{}\">", self.name);
        for method in self.methods.iter() {
            if method.inputs.is_empty() && method.outputs.is_empty() {
                let _ = writeln!(xml, "{pad}  <method name=\"{}\"/>", method.name);
                continue;
            }

            let _ = writeln!(xml, "{pad}  <method name=\"{}\">", method.name);
            for (direction, args) in [("in", &method.inputs), ("out", &method.outputs)] {
                for arg in args.iter() {
                    let _ = writeln!(
                        xml,
                        "{pad}    <arg type=\"{}\" name=\"{}\" direction=\"{direction}\"/>",
                        arg.signature, arg.name
                    );
                }
            }
            let _ = writeln!(xml, "{pad}  </method>");
        }

        for signal in self.signals.iter() {
            let _ = writeln!(xml, "{pad}  <signal name=\"{}\">", signal.name);
            for arg in signal.args.iter() {
                let _ = writeln!(
                    xml,
                    "{pad}    <arg type=\"{}\" name=\"{}\"/>",
                    arg.signature, arg.name
                );
            }
            let _ = writeln!(xml, "{pad}  </signal>");
        }

        for property in self.properties.iter() {
            let _ = writeln!(
                xml,
                "{pad}  <property type=\"{}\" name=\"{}\" access=\"{}\"/>",
                property.signature,
                property.name,
                property.access.as_str()
            );
        }
        let _ = writeln!(xml, "{pad}</interface>");

        xml
    }
}

impl Display for InterfaceDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.name.bold())?;

        writeln!(f, "{}:", "methods".bright_blue())?;
        for method in self.methods.iter() {
            writeln!(
                f,
                "\t{}({}) -> ({})",
                method.name,
                method.in_signature(),
                method.out_signature()
            )?;
        }

        writeln!(f, "{}:", "signals".bright_yellow())?;
        for signal in self.signals.iter() {
            writeln!(f, "\t{}({})", signal.name, signal.signature())?;
        }

        writeln!(f, "{}:", "properties".bright_green())?;
        for property in self.properties.iter() {
            writeln!(
                f,
                "\t{}: {} [{}]",
                property.name,
                property.signature,
                property.access.as_str()
            )?;
        }

        Ok(())
    }
}

/// A set of interface descriptions keyed by interface name
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Schema {
    interfaces: BTreeMap<String, InterfaceDescription>,
}

impl Schema {
    /// Standard freedesktop interfaces and GeoClue2 interfaces
    pub fn builtin() -> Result<Self> {
        let mut schema = Self::parse(FREEDESKTOP_DESCRIPTION)?;
        schema.merge(Self::parse(GEOCLUE2_DESCRIPTION)?);
        Ok(schema)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading interface description from {path:?}");

        let text = fs::read_to_string(path).map_err(|e| {
            Error::InvalidDescription(format!("Failed to read {path:?}: {}", e))
        })?;

        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let json = json::parse(text).map_err(|parse_error| {
            warn!("Failed to parse interface description: {parse_error}");
            Error::InvalidDescription(parse_error.to_string())
        })?;

        match json[VERSION_KEY].as_u32() {
            Some(SCHEMA_VERSION) => {}
            Some(version) => {
                return Err(Error::InvalidDescription(format!(
                    "Unsupported description version {version}. Expected {SCHEMA_VERSION}"
                )))
            }
            None => {
                return Err(Error::InvalidDescription(format!(
                    "Missing `{VERSION_KEY}` entry"
                )))
            }
        }

        if !json[INTERFACES_KEY].is_array() {
            return Err(Error::InvalidDescription(format!(
                "Invalid `{INTERFACES_KEY}` entry. Expected array, got `{}`",
                json[INTERFACES_KEY]
            )));
        }

        let mut schema = Self::default();
        for interface_json in json[INTERFACES_KEY].members() {
            let interface = parse_interface(interface_json)?;

            if schema.interfaces.contains_key(&interface.name) {
                return Err(Error::InvalidDescription(format!(
                    "Interface {} described twice",
                    interface.name
                )));
            }

            schema.insert(interface);
        }

        Ok(schema)
    }

    /// Add interfaces of `other`. Interfaces with the same name are replaced
    pub fn merge(&mut self, other: Schema) {
        self.interfaces.extend(other.interfaces)
    }

    pub fn insert(&mut self, interface: InterfaceDescription) {
        self.interfaces.insert(interface.name.clone(), interface);
    }

    pub fn interface(&self, name: &str) -> Option<&InterfaceDescription> {
        self.interfaces.get(name)
    }

    /// Same as [Self::interface], but fails with [Error::NotFound] for unknown interfaces
    pub fn require(&self, name: &str) -> Result<&InterfaceDescription> {
        self.interface(name).ok_or_else(|| {
            Error::NotFound(format!("Interface {name} is missing from the description"))
        })
    }

    pub fn interfaces(&self) -> impl Iterator<Item = &InterfaceDescription> {
        self.interfaces.values()
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }
}

fn string_entry<'a>(json: &'a JsonValue, key: &str, context: &str) -> Result<&'a str> {
    json[key].as_str().ok_or_else(|| {
        Error::InvalidDescription(format!(
            "Invalid `{key}` entry in {context}. Expected string, got `{}`",
            json[key]
        ))
    })
}

/// Optional array entry. Missing key is an empty array
fn array_entry<'a>(
    json: &'a JsonValue,
    key: &str,
    context: &str,
) -> Result<impl Iterator<Item = &'a JsonValue>> {
    if !json[key].is_null() && !json[key].is_array() {
        return Err(Error::InvalidDescription(format!(
            "Invalid `{key}` entry in {context}. Expected array, got `{}`",
            json[key]
        )));
    }

    Ok(json[key].members())
}

fn parse_signature(json: &JsonValue, context: &str) -> Result<String> {
    let signature = string_entry(json, TYPE_KEY, context)?;

    if !signature::is_single(signature) {
        return Err(Error::InvalidDescription(format!(
            "Invalid type `{signature}` in {context}. Expected single complete type"
        )));
    }

    Ok(signature.to_owned())
}

fn parse_args(json: &JsonValue, key: &str, context: &str) -> Result<Vec<Arg>> {
    array_entry(json, key, context)?
        .enumerate()
        .map(|(i, arg)| {
            let name = arg[NAME_KEY].as_str().unwrap_or_default().to_owned();
            let signature = parse_signature(arg, &format!("{context} argument {i}"))?;

            Ok(Arg { name, signature })
        })
        .collect()
}

fn parse_member_name(json: &JsonValue, context: &str) -> Result<String> {
    let name = string_entry(json, NAME_KEY, context)?;

    if !names::is_valid_member_name(name) {
        return Err(Error::InvalidDescription(format!(
            "Invalid member name `{name}` in {context}"
        )));
    }

    Ok(name.to_owned())
}

fn parse_interface(json: &JsonValue) -> Result<InterfaceDescription> {
    let name = string_entry(json, NAME_KEY, "interface")?;
    if !names::is_valid_interface_name(name) {
        return Err(Error::InvalidDescription(format!(
            "Invalid interface name `{name}`"
        )));
    }

    trace!("Parsing interface {name}");

    let methods = array_entry(json, METHODS_KEY, name)?
        .map(|method| {
            let method_name = parse_member_name(method, name)?;
            let context = format!("{name}.{method_name}");

            Ok(MethodDescription {
                inputs: parse_args(method, IN_KEY, &context)?,
                outputs: parse_args(method, OUT_KEY, &context)?,
                name: method_name,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let signals = array_entry(json, SIGNALS_KEY, name)?
        .map(|signal| {
            let signal_name = parse_member_name(signal, name)?;
            let context = format!("{name}.{signal_name}");

            Ok(SignalDescription {
                args: parse_args(signal, ARGS_KEY, &context)?,
                name: signal_name,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let properties = array_entry(json, PROPERTIES_KEY, name)?
        .map(|property| {
            let property_name = parse_member_name(property, name)?;
            let context = format!("{name}.{property_name}");

            let access = string_entry(property, ACCESS_KEY, &context)?;
            let access = Access::parse(access).ok_or_else(|| {
                Error::InvalidDescription(format!(
                    "Invalid access `{access}` in {context}. Expected read, write, or readwrite"
                ))
            })?;

            Ok(PropertyDescription {
                signature: parse_signature(property, &context)?,
                name: property_name,
                access,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(InterfaceDescription {
        name: name.to_owned(),
        methods,
        properties,
        signals,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GEOCLUE_CLIENT_INTERFACE, GEOCLUE_MANAGER_INTERFACE, PROPERTIES_INTERFACE};

    #[test]
    fn builtin_descriptions() {
        let schema = Schema::builtin().expect("Builtin descriptions must parse");

        let manager = schema.require(GEOCLUE_MANAGER_INTERFACE).unwrap();
        assert_eq!(manager.method("GetClient").unwrap().out_signature(), "o");

        let client = schema.require(GEOCLUE_CLIENT_INTERFACE).unwrap();
        assert_eq!(client.signal("LocationUpdated").unwrap().signature(), "oo");
        assert_eq!(client.property("DesktopId").unwrap().signature, "s");
        assert!(client.property("DistanceThreshold").unwrap().access.writable());
        assert!(!client.property("Active").unwrap().access.writable());

        let properties = schema.require(PROPERTIES_INTERFACE).unwrap();
        assert_eq!(properties.method("Set").unwrap().in_signature(), "ssv");

        assert!(matches!(client.method("Frobnicate"), Err(Error::NotFound(_))));
        assert!(matches!(
            schema.require("org.example.Missing"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn reject_invalid_descriptions() {
        let invalid = [
            "not json",
            r#"{ "interfaces": [] }"#,
            r#"{ "version": 2, "interfaces": [] }"#,
            r#"{ "version": 1, "interfaces": {} }"#,
            r#"{ "version": 1, "interfaces": [{ "name": "NoDots" }] }"#,
            r#"{ "version": 1, "interfaces": [{ "name": "a.b", "properties": [{ "name": "P", "type": "uu", "access": "read" }] }] }"#,
            r#"{ "version": 1, "interfaces": [{ "name": "a.b", "properties": [{ "name": "P", "type": "u", "access": "sometimes" }] }] }"#,
            r#"{ "version": 1, "interfaces": [{ "name": "a.b" }, { "name": "a.b" }] }"#,
        ];

        for text in invalid {
            assert!(
                matches!(Schema::parse(text), Err(Error::InvalidDescription(_))),
                "Accepted {text}"
            );
        }
    }

    #[test]
    fn introspection_xml() {
        let schema = Schema::builtin().unwrap();
        let xml = schema.require(GEOCLUE_CLIENT_INTERFACE).unwrap().to_xml(2);

        assert!(xml.starts_with("  <interface name=\"org.freedesktop.GeoClue2.Client\">"));
        assert!(xml.contains("<method name=\"Start\"/>"));
        assert!(xml.contains("<arg type=\"o\" name=\"new\"/>"));
        assert!(xml.contains("<property type=\"u\" name=\"DistanceThreshold\" access=\"readwrite\"/>"));
    }
}
