use std::fmt::{self, Display, Formatter};

use colored::*;
use serde_json::json;

use geobus_lib::PropertyMap;

use crate::location::{write_properties, LocationReport};

/// Output format of the watcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Output {
    Text,
    /// JSON object per line
    Json,
}

struct Client<'a> {
    path: &'a str,
    properties: &'a PropertyMap,
}

impl Display for Client<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {}", "Client".bright_blue(), self.path)?;
        write_properties(f, self.properties)
    }
}

impl Output {
    pub fn new(json: bool) -> Self {
        if json {
            Self::Json
        } else {
            Self::Text
        }
    }

    pub fn format_client(&self, path: &str, properties: &PropertyMap) -> String {
        match self {
            Self::Text => Client { path, properties }.to_string(),
            Self::Json => json!({ "client": path, "properties": properties }).to_string(),
        }
    }

    pub fn format_location(&self, report: &LocationReport) -> String {
        match self {
            Self::Text => report.to_string(),
            Self::Json => json!({ "location": report }).to_string(),
        }
    }

    pub fn print_client(&self, path: &str, properties: &PropertyMap) {
        print_line(self.format_client(path, properties))
    }

    pub fn print_location(&self, report: &LocationReport) {
        print_line(self.format_location(report))
    }
}

fn print_line(text: String) {
    println!("{}", text.trim_end())
}
