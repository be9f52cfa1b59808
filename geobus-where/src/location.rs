use std::fmt::{self, Display, Formatter};

use colored::*;
use serde::Serialize;

use geobus_lib::{PropertyMap, Value};

/// Location object properties
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationReport {
    pub path: String,
    pub properties: PropertyMap,
}

impl LocationReport {
    fn double(&self, name: &str) -> Option<f64> {
        self.properties.get(name).and_then(Value::as_f64)
    }

    pub fn latitude(&self) -> Option<f64> {
        self.double("Latitude")
    }

    pub fn longitude(&self) -> Option<f64> {
        self.double("Longitude")
    }

    /// Accuracy radius in meters
    pub fn accuracy(&self) -> Option<f64> {
        self.double("Accuracy")
    }

    pub fn description(&self) -> Option<&str> {
        self.properties.get("Description").and_then(Value::as_str)
    }

    /// Seconds since the Epoch
    pub fn timestamp(&self) -> Option<u64> {
        match self.properties.get("Timestamp")?.as_fields()? {
            [seconds, _] => seconds.as_u64(),
            _ => None,
        }
    }
}

impl Display for LocationReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", "Location".bright_green(), self.path)?;

        if let (Some(latitude), Some(longitude)) = (self.latitude(), self.longitude()) {
            write!(f, " {latitude:.6}, {longitude:.6}")?;
        }
        if let Some(accuracy) = self.accuracy() {
            write!(f, " ±{accuracy}m")?;
        }
        writeln!(f)?;

        write_properties(f, &self.properties)
    }
}

pub(crate) fn write_properties(f: &mut Formatter<'_>, properties: &PropertyMap) -> fmt::Result {
    for (name, value) in properties.iter() {
        writeln!(f, "\t{}: {value}", name.bold())?;
    }

    Ok(())
}
