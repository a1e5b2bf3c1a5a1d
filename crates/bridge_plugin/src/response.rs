//! Response routing: turns the outcome of an invoke into the text that is
//! handed to the script side.
//!
//! A response is never dropped. An absent payload becomes `null`, and a
//! payload that fails to serialize is replaced by the serialization error
//! itself, rendered as a script template literal.

use serde::Serialize;
use strum_macros::{AsRefStr, Display};
use thiserror::Error;
use tracing::warn;

/// Which of the two callbacks a response targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ResponseKind {
    Success,
    Error,
}

/// The payload could not be turned into text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to serialize payload: {0}")]
pub struct SerializationFailed(pub String);

/// Serialize a payload to its JSON text. `None` is the literal `null`.
pub fn serialize_payload<T: Serialize + ?Sized>(payload: Option<&T>) -> Result<String, SerializationFailed> {
    match payload {
        None => Ok("null".to_string()),
        Some(value) => serde_json::to_string(value).map_err(|err| SerializationFailed(err.to_string())),
    }
}

/// The text delivered for a payload, downgrading a serialization failure to
/// the escaped failure description.
pub fn payload_text<T: Serialize + ?Sized>(payload: Option<&T>) -> String {
    match serialize_payload(payload) {
        Ok(text) => text,
        Err(SerializationFailed(description)) => {
            warn!(error = %description, "payload could not be serialized, delivering the error instead");
            escape_failure(&description)
        }
    }
}

/// Render `description` as a backtick template literal that evaluates to
/// exactly `description`.
pub fn escape_failure(description: &str) -> String {
    let mut out = String::with_capacity(description.len() + 2);
    out.push('`');
    let mut chars = description.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.push_str("\\\\"),
            '`' => out.push_str("\\`"),
            '$' if chars.peek() == Some(&'{') => out.push_str("\\$"),
            _ => out.push(c),
        }
    }
    out.push('`');
    out
}
