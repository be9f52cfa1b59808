//! Bus name, object path, interface and member name rules

use crate::{Error, Result, FREEDESKTOP_PREFIX};

const MAX_NAME_LEN: usize = 255;

/// Expand a service name, which starts with a dot, into a `org.freedesktop` name.
/// `.GeoClue2` becomes `org.freedesktop.GeoClue2`
pub fn expand_service_name(name: &str) -> String {
    if name.starts_with('.') {
        format!("{FREEDESKTOP_PREFIX}{name}")
    } else {
        name.to_owned()
    }
}

pub fn is_valid_object_path(path: &str) -> bool {
    if path == "/" {
        return true;
    }

    match path.strip_prefix('/') {
        Some(rest) => rest.split('/').all(|element| {
            !element.is_empty()
                && element
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
        }),
        None => false,
    }
}

pub fn is_valid_bus_name(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return false;
    }

    // Unique connection name
    if let Some(rest) = name.strip_prefix(':') {
        return dotted_elements(rest, |element| {
            element
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        });
    }

    dotted_elements(name, |element| {
        !element.starts_with(|c: char| c.is_ascii_digit())
            && element
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    })
}

pub fn is_valid_interface_name(name: &str) -> bool {
    name.len() <= MAX_NAME_LEN && dotted_elements(name, is_valid_member_name)
}

pub fn is_valid_member_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn dotted_elements<F: Fn(&str) -> bool>(name: &str, check: F) -> bool {
    let elements: Vec<&str> = name.split('.').collect();
    elements.len() >= 2 && elements.iter().all(|element| !element.is_empty() && check(element))
}

/// Check service name and object path of a remote object
pub fn check_object(service_name: &str, path: &str) -> Result<()> {
    if !is_valid_bus_name(service_name) {
        return Err(Error::NotFound(format!(
            "Invalid service name '{service_name}'"
        )));
    }

    if !is_valid_object_path(path) {
        return Err(Error::NotFound(format!("Invalid object path '{path}'")));
    }

    Ok(())
}

pub fn check_member(interface: &str, member: &str) -> Result<()> {
    if !is_valid_interface_name(interface) {
        return Err(Error::NotFound(format!("Invalid interface name '{interface}'")));
    }

    if !is_valid_member_name(member) {
        return Err(Error::NotFound(format!("Invalid member name '{member}'")));
    }

    Ok(())
}
