use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

pub const FAILED_FAULT: &str = "org.freedesktop.DBus.Error.Failed";
pub const SERVICE_UNKNOWN_FAULT: &str = "org.freedesktop.DBus.Error.ServiceUnknown";
pub const NAME_HAS_NO_OWNER_FAULT: &str = "org.freedesktop.DBus.Error.NameHasNoOwner";
pub const UNKNOWN_OBJECT_FAULT: &str = "org.freedesktop.DBus.Error.UnknownObject";
pub const UNKNOWN_INTERFACE_FAULT: &str = "org.freedesktop.DBus.Error.UnknownInterface";
pub const UNKNOWN_METHOD_FAULT: &str = "org.freedesktop.DBus.Error.UnknownMethod";
pub const UNKNOWN_PROPERTY_FAULT: &str = "org.freedesktop.DBus.Error.UnknownProperty";
pub const INVALID_ARGS_FAULT: &str = "org.freedesktop.DBus.Error.InvalidArgs";
pub const INVALID_SIGNATURE_FAULT: &str = "org.freedesktop.DBus.Error.InvalidSignature";
pub const PROPERTY_READ_ONLY_FAULT: &str = "org.freedesktop.DBus.Error.PropertyReadOnly";
pub const ACCESS_DENIED_FAULT: &str = "org.freedesktop.DBus.Error.AccessDenied";
pub const NAME_TAKEN_FAULT: &str = "org.freedesktop.DBus.Error.AddressInUse";
pub const DISCONNECTED_FAULT: &str = "org.freedesktop.DBus.Error.Disconnected";
pub const NO_REPLY_FAULT: &str = "org.freedesktop.DBus.Error.NoReply";
pub const TIMEOUT_FAULT: &str = "org.freedesktop.DBus.Error.Timeout";

#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    #[error("Bus connection error: {0}")]
    Connection(String),
    #[error("Remote fault {code}: {message}")]
    Remote { code: String, message: String },
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid interface description: {0}")]
    InvalidDescription(String),
}

impl Error {
    /// Classify a named bus fault into the error taxonomy
    pub fn from_fault(name: &str, message: impl Into<String>) -> Self {
        let message = message.into();

        match name {
            SERVICE_UNKNOWN_FAULT
            | NAME_HAS_NO_OWNER_FAULT
            | UNKNOWN_OBJECT_FAULT
            | UNKNOWN_INTERFACE_FAULT
            | UNKNOWN_METHOD_FAULT
            | UNKNOWN_PROPERTY_FAULT => Self::NotFound(message),
            INVALID_ARGS_FAULT | INVALID_SIGNATURE_FAULT => Self::TypeMismatch(message),
            DISCONNECTED_FAULT | NO_REPLY_FAULT | TIMEOUT_FAULT => Self::Connection(message),
            _ => Self::Remote {
                code: name.to_owned(),
                message,
            },
        }
    }

    /// Fault name used to report the error over the bus
    pub fn fault_name(&self) -> &str {
        match self {
            Self::Connection(_) => DISCONNECTED_FAULT,
            Self::Remote { code, .. } => code,
            Self::TypeMismatch(_) => INVALID_ARGS_FAULT,
            Self::NotFound(_) => UNKNOWN_METHOD_FAULT,
            Self::InvalidDescription(_) => FAILED_FAULT,
        }
    }

    /// Human readable part of the error, without the taxonomy prefix
    pub fn message(&self) -> &str {
        match self {
            Self::Connection(message)
            | Self::TypeMismatch(message)
            | Self::NotFound(message)
            | Self::InvalidDescription(message) => message,
            Self::Remote { message, .. } => message,
        }
    }

    pub fn remote(code: &str, message: impl Into<String>) -> Self {
        Self::Remote {
            code: code.to_owned(),
            message: message.into(),
        }
    }
}
