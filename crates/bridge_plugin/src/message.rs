use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Arguments handed to a plugin method: an externally defined key/value map.
pub type StructuredMap = Map<String, Value>;

/// Opaque numeric handle the host maps onto a script function named `_<id>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct CallbackId(pub u64);

impl CallbackId {
    /// The script-side function this callback id names.
    pub fn function_name(&self) -> String {
        format!("_{}", self.0)
    }
}

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "_{}", self.0)
    }
}

impl From<u64> for CallbackId {
    fn from(id: u64) -> Self {
        CallbackId(id)
    }
}

/// One script execution waiting to run on a surface's owning thread:
/// call `function` with the already serialized `payload`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptCall {
    pub function: CallbackId,
    pub payload: String,
}

impl ScriptCall {
    pub fn new(function: CallbackId, payload: impl Into<String>) -> Self {
        Self { function, payload: payload.into() }
    }

    /// Renders the call as the script text a surface evaluates.
    pub fn to_script(&self) -> String {
        format!("window['{}']({})", self.function.function_name(), self.payload)
    }
}
