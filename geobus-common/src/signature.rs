//! D-Bus type signatures
//!
//! A signature is a string of type codes: basic types `y b n q i u x t d s o g`, variants `v`,
//! arrays `aT`, dictionaries `a{KV}` and structs `(T...)`.

use crate::{Error, Result};

const MAX_SIGNATURE_LEN: usize = 255;
const BASIC_TYPES: &[u8] = b"ybnqiuxtdsog";

pub fn is_basic(code: char) -> bool {
    code.is_ascii() && BASIC_TYPES.contains(&(code as u8))
}

/// Split a signature into single complete types, e.g. `sa{sv}as` into `s`, `a{sv}`, `as`
pub fn split(signature: &str) -> Result<Vec<&str>> {
    if signature.len() > MAX_SIGNATURE_LEN {
        return Err(Error::TypeMismatch(format!(
            "Signature is longer than {MAX_SIGNATURE_LEN} characters"
        )));
    }

    let bytes = signature.as_bytes();
    let mut result = Vec::new();
    let mut position = 0;

    while position < bytes.len() {
        let len = complete_type_len(&bytes[position..]).ok_or_else(|| {
            Error::TypeMismatch(format!("Invalid signature '{signature}' at {position}"))
        })?;

        result.push(&signature[position..position + len]);
        position += len;
    }

    Ok(result)
}

/// Check if a signature describes exactly one complete type
pub fn is_single(signature: &str) -> bool {
    matches!(split(signature), Ok(types) if types.len() == 1)
}

pub fn is_valid(signature: &str) -> bool {
    split(signature).is_ok()
}

fn complete_type_len(bytes: &[u8]) -> Option<usize> {
    match *bytes.first()? {
        b'v' => Some(1),
        code if BASIC_TYPES.contains(&code) => Some(1),
        b'a' => match bytes.get(1)? {
            b'{' => {
                let key = *bytes.get(2)?;
                if !BASIC_TYPES.contains(&key) {
                    return None;
                }

                let value_len = complete_type_len(&bytes[3..])?;
                if *bytes.get(3 + value_len)? != b'}' {
                    return None;
                }

                Some(4 + value_len)
            }
            _ => Some(1 + complete_type_len(&bytes[1..])?),
        },
        b'(' => {
            let mut position = 1;
            while *bytes.get(position)? != b')' {
                position += complete_type_len(&bytes[position..])?;
            }

            // Empty structs are not allowed
            if position == 1 {
                None
            } else {
                Some(position + 1)
            }
        }
        _ => None,
    }
}
