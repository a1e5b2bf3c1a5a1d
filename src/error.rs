use bridge_plugin::PluginError;
use thiserror::Error;

/// Why an invocation did not complete normally, or a registration was refused.
///
/// The display text of the dispatch errors is exactly what the script side
/// receives in the rejection payload.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    #[error("Plugin {0} not initialized")]
    PluginNotRegistered(String),

    #[error("No method {method} found for plugin {plugin}")]
    MethodNotFound { plugin: String, method: String },

    /// A fallible method returned an error. `source` is the plugin's own error.
    #[error("{source}")]
    MethodThrew {
        plugin: String,
        method: String,
        source: PluginError,
    },

    /// Only raised under `DuplicatePolicy::Reject`.
    #[error("plugin `{0}` is already registered")]
    DuplicatePlugin(String),
}

impl BridgeError {
    /// Short machine-readable name used in the invoke event log.
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::PluginNotRegistered(_) => "plugin_not_registered",
            BridgeError::MethodNotFound { .. } => "method_not_found",
            BridgeError::MethodThrew { .. } => "method_threw",
            BridgeError::DuplicatePlugin(_) => "duplicate_plugin",
        }
    }
}
