use std::{
    collections::BTreeMap,
    fmt::{self, Display, Formatter},
};

use serde::{
    ser::{SerializeMap, SerializeSeq},
    Serialize, Serializer,
};

use crate::{names, signature, Error, Result};

/// Result of a `GetAll` call: property name to value
pub type PropertyMap = BTreeMap<String, Value>;

/// A bus value. Each value knows its type signature, see [Value::signature]
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Byte(u8),
    Bool(bool),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Double(f64),
    Str(String),
    ObjectPath(String),
    Signature(String),
    Variant(Box<Value>),
    /// Homogeneous array. `element` keeps the type of empty arrays
    Array {
        element: String,
        items: Vec<Value>,
    },
    Dict {
        key: String,
        value: String,
        entries: Vec<(Value, Value)>,
    },
    Struct(Vec<Value>),
}

impl Value {
    pub fn signature(&self) -> String {
        match self {
            Self::Byte(_) => "y".into(),
            Self::Bool(_) => "b".into(),
            Self::Int16(_) => "n".into(),
            Self::UInt16(_) => "q".into(),
            Self::Int32(_) => "i".into(),
            Self::UInt32(_) => "u".into(),
            Self::Int64(_) => "x".into(),
            Self::UInt64(_) => "t".into(),
            Self::Double(_) => "d".into(),
            Self::Str(_) => "s".into(),
            Self::ObjectPath(_) => "o".into(),
            Self::Signature(_) => "g".into(),
            Self::Variant(_) => "v".into(),
            Self::Array { element, .. } => format!("a{element}"),
            Self::Dict { key, value, .. } => format!("a{{{key}{value}}}"),
            Self::Struct(fields) => {
                let fields: String = fields.iter().map(Value::signature).collect();
                format!("({fields})")
            }
        }
    }

    pub fn object_path(path: &str) -> Result<Self> {
        if names::is_valid_object_path(path) {
            Ok(Self::ObjectPath(path.to_owned()))
        } else {
            Err(Error::TypeMismatch(format!("Invalid object path '{path}'")))
        }
    }

    pub fn variant(value: Value) -> Self {
        Self::Variant(Box::new(value))
    }

    /// Make an array, checking every item has `element` type
    pub fn array(element: &str, items: Vec<Value>) -> Result<Self> {
        if !signature::is_single(element) {
            return Err(Error::TypeMismatch(format!(
                "Invalid array element type '{element}'"
            )));
        }

        if let Some(item) = items.iter().find(|item| item.signature() != element) {
            return Err(Error::TypeMismatch(format!(
                "Array of '{element}' can't hold '{}'",
                item.signature()
            )));
        }

        Ok(Self::Array {
            element: element.to_owned(),
            items,
        })
    }

    /// Make a dictionary, checking every entry has `key` and `value` types
    pub fn dict(key: &str, value: &str, entries: Vec<(Value, Value)>) -> Result<Self> {
        if !signature::is_valid(&format!("a{{{key}{value}}}")) {
            return Err(Error::TypeMismatch(format!(
                "Invalid dictionary type 'a{{{key}{value}}}'"
            )));
        }

        for (k, v) in entries.iter() {
            if k.signature() != key || v.signature() != value {
                return Err(Error::TypeMismatch(format!(
                    "Dictionary 'a{{{key}{value}}}' can't hold '{}' => '{}'",
                    k.signature(),
                    v.signature()
                )));
            }
        }

        Ok(Self::Dict {
            key: key.to_owned(),
            value: value.to_owned(),
            entries,
        })
    }

    /// Parse a basic value from text with a given signature: `parse("u", "100")`
    pub fn parse(signature: &str, text: &str) -> Result<Self> {
        let mismatch = |e: &dyn Display| {
            Error::TypeMismatch(format!("Can't parse '{text}' as '{signature}': {e}"))
        };

        let value = match signature {
            "y" => Self::Byte(text.parse().map_err(|e| mismatch(&e))?),
            "b" => Self::Bool(text.parse().map_err(|e| mismatch(&e))?),
            "n" => Self::Int16(text.parse().map_err(|e| mismatch(&e))?),
            "q" => Self::UInt16(text.parse().map_err(|e| mismatch(&e))?),
            "i" => Self::Int32(text.parse().map_err(|e| mismatch(&e))?),
            "u" => Self::UInt32(text.parse().map_err(|e| mismatch(&e))?),
            "x" => Self::Int64(text.parse().map_err(|e| mismatch(&e))?),
            "t" => Self::UInt64(text.parse().map_err(|e| mismatch(&e))?),
            "d" => Self::Double(text.parse().map_err(|e| mismatch(&e))?),
            "s" => Self::Str(text.to_owned()),
            "o" => Self::object_path(text)?,
            "g" if signature::is_valid(text) => Self::Signature(text.to_owned()),
            "g" => return Err(mismatch(&"invalid signature")),
            _ => return Err(mismatch(&"only basic types can be parsed")),
        };

        Ok(value)
    }

    /// Parse a `SIG:TEXT` pair, e.g. `u:100`
    pub fn parse_typed(input: &str) -> Result<Self> {
        match input.split_once(':') {
            Some((signature, text)) => Self::parse(signature, text),
            None => Err(Error::TypeMismatch(format!(
                "Expected 'SIGNATURE:VALUE', got '{input}'"
            ))),
        }
    }

    /// Strip variant wrappers
    pub fn flatten(self) -> Self {
        match self {
            Self::Variant(inner) => inner.flatten(),
            value => value,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::UInt32(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::UInt64(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Double(value) => Some(*value),
            _ => None,
        }
    }

    /// String content of a string, object path, or signature
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(value) | Self::ObjectPath(value) | Self::Signature(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_object_path(&self) -> Option<&str> {
        match self {
            Self::ObjectPath(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_fields(&self) -> Option<&[Value]> {
        match self {
            Self::Struct(fields) => Some(fields),
            _ => None,
        }
    }
}

impl From<PropertyMap> for Value {
    fn from(properties: PropertyMap) -> Self {
        Self::Dict {
            key: "s".into(),
            value: "v".into(),
            entries: properties
                .into_iter()
                .map(|(name, value)| (Value::Str(name), Value::variant(value)))
                .collect(),
        }
    }
}

macro_rules! from_primitive {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Self::$variant(value)
                }
            }
        )*
    };
}

from_primitive!(
    u8 => Byte,
    bool => Bool,
    i16 => Int16,
    u16 => UInt16,
    i32 => Int32,
    u32 => UInt32,
    i64 => Int64,
    u64 => UInt64,
    f64 => Double,
    String => Str,
);

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

fn write_quoted(f: &mut Formatter<'_>, text: &str) -> fmt::Result {
    write!(f, "'")?;
    for c in text.chars() {
        match c {
            '\'' | '\\' => write!(f, "\\{c}")?,
            c => write!(f, "{c}")?,
        }
    }
    write!(f, "'")
}

/// GVariant text format
impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Byte(value) => write!(f, "0x{value:02x}"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int16(value) => write!(f, "{value}"),
            Self::UInt16(value) => write!(f, "{value}"),
            Self::Int32(value) => write!(f, "{value}"),
            Self::UInt32(value) => write!(f, "{value}"),
            Self::Int64(value) => write!(f, "{value}"),
            Self::UInt64(value) => write!(f, "{value}"),
            Self::Double(value) => write!(f, "{value:?}"),
            Self::Str(value) => write_quoted(f, value),
            Self::ObjectPath(value) => {
                write!(f, "objectpath ")?;
                write_quoted(f, value)
            }
            Self::Signature(value) => {
                write!(f, "signature ")?;
                write_quoted(f, value)
            }
            Self::Variant(value) => write!(f, "<{value}>"),
            Self::Array { items, .. } if items.is_empty() => write!(f, "@{} []", self.signature()),
            Self::Array { items, .. } => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Dict { entries, .. } if entries.is_empty() => {
                write!(f, "@{} {{}}", self.signature())
            }
            Self::Dict { entries, .. } => {
                write!(f, "{{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                write!(f, "}}")
            }
            Self::Struct(fields) => {
                write!(f, "(")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{field}")?;
                }
                if fields.len() == 1 {
                    write!(f, ",")?;
                }
                write!(f, ")")
            }
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Byte(value) => serializer.serialize_u8(*value),
            Self::Bool(value) => serializer.serialize_bool(*value),
            Self::Int16(value) => serializer.serialize_i16(*value),
            Self::UInt16(value) => serializer.serialize_u16(*value),
            Self::Int32(value) => serializer.serialize_i32(*value),
            Self::UInt32(value) => serializer.serialize_u32(*value),
            Self::Int64(value) => serializer.serialize_i64(*value),
            Self::UInt64(value) => serializer.serialize_u64(*value),
            Self::Double(value) => serializer.serialize_f64(*value),
            Self::Str(value) | Self::ObjectPath(value) | Self::Signature(value) => {
                serializer.serialize_str(value)
            }
            Self::Variant(value) => value.serialize(serializer),
            Self::Array { items, .. } => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Struct(fields) => {
                let mut seq = serializer.serialize_seq(Some(fields.len()))?;
                for field in fields {
                    seq.serialize_element(field)?;
                }
                seq.end()
            }
            Self::Dict { entries, .. } => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
        }
    }
}
