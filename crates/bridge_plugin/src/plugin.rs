use std::{collections::{BTreeSet, HashMap}, fmt, sync::Arc};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;

use crate::{invoke::Invoke, surface::SurfaceRef};

/// What log levels are supported?
/// Higher‐value variants are more severe.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord, Default, EnumString, AsRefStr, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LogLevel {
    Trace = 0,
    Debug = 1,
    #[default]
    Info = 2,
    Warn = 3,
    Error = 4,
    Critical = 5,
}

impl LogLevel {
    /// The `EnvFilter` directive for this level. `Critical` has no tracing
    /// counterpart and maps onto `error`.
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error | LogLevel::Critical => "error",
        }
    }
}

/// Errors a plugin can return from `load` or from a fallible method.
///
/// The display text of `Failed` is the plugin's own message, unchanged: that
/// text is what the script side receives when a fallible method fails.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PluginError {
    /// The method signalled a failure.
    #[error("{0}")]
    Failed(String),

    /// The invoke arguments did not match what the method expects.
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    /// Something went wrong reading or writing JSON.
    #[error("JSON error: {0}")]
    Json(String),

    /// The plugin could not attach to a surface.
    #[error("load failed: {0}")]
    Load(String),
}

impl PluginError {
    pub fn failed(message: impl Into<String>) -> Self {
        PluginError::Failed(message.into())
    }
}

impl From<serde_json::Error> for PluginError {
    fn from(err: serde_json::Error) -> PluginError {
        PluginError::Json(err.to_string())
    }
}

/// A method that only receives the invoke. Any failure has to be reported
/// by the method itself through `Invoke::reject`.
pub type SimpleMethod<P> = Arc<dyn Fn(&P, Invoke) + Send + Sync>;

/// A method that can return a structured failure. The bridge rejects the
/// invoke on its behalf when it returns `Err`.
pub type FallibleMethod<P> = Arc<dyn Fn(&P, Invoke) -> Result<(), PluginError> + Send + Sync>;

/// The capability table a plugin hands over at registration time:
/// method name to typed method, tagged by calling convention.
///
/// ```ignore
/// impl Plugin for Battery {
///     fn methods() -> MethodTable<Self> {
///         MethodTable::new()
///             .simple("getLevel", Battery::get_level)
///             .fallible("calibrate", Battery::calibrate)
///     }
/// }
/// ```
pub struct MethodTable<P> {
    fallible: HashMap<String, FallibleMethod<P>>,
    simple: HashMap<String, SimpleMethod<P>>,
}

impl<P> MethodTable<P> {
    pub fn new() -> Self {
        Self {
            fallible: HashMap::new(),
            simple: HashMap::new(),
        }
    }

    /// Add a method using the simple calling convention.
    pub fn simple<F>(mut self, name: impl Into<String>, method: F) -> Self
    where
        F: Fn(&P, Invoke) + Send + Sync + 'static,
    {
        self.simple.insert(name.into(), Arc::new(method));
        self
    }

    /// Add a method using the fallible calling convention.
    pub fn fallible<F>(mut self, name: impl Into<String>, method: F) -> Self
    where
        F: Fn(&P, Invoke) -> Result<(), PluginError> + Send + Sync + 'static,
    {
        self.fallible.insert(name.into(), Arc::new(method));
        self
    }

    pub fn get_fallible(&self, name: &str) -> Option<&FallibleMethod<P>> {
        self.fallible.get(name)
    }

    pub fn get_simple(&self, name: &str) -> Option<&SimpleMethod<P>> {
        self.simple.get(name)
    }

    /// Every method name, sorted, listed once even when both conventions
    /// are registered under it.
    pub fn names(&self) -> Vec<String> {
        self.fallible
            .keys()
            .chain(self.simple.keys())
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.fallible.is_empty() && self.simple.is_empty()
    }
}

impl<P> Default for MethodTable<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> fmt::Debug for MethodTable<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodTable")
            .field("fallible", &self.fallible.keys().collect::<Vec<_>>())
            .field("simple", &self.simple.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// The one trait plugin authors implement.
pub trait Plugin: Send + Sync + Sized + 'static {
    /// Called once the plugin is attached to a script surface.
    fn load(&self, surface: &SurfaceRef) -> Result<(), PluginError> {
        let _ = surface;
        Ok(())
    }

    /// The methods this plugin answers, by name.
    fn methods() -> MethodTable<Self>;
}
