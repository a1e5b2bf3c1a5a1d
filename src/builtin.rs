//! Plugins that ship with the bridge binary.
use std::sync::Mutex;

use bridge_plugin::{Invoke, MethodTable, Plugin, PluginError, SurfaceRef};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::{bridge::Bridge, error::BridgeError};

/// Answers with what it was given.
#[derive(Debug, Default)]
pub struct EchoPlugin;

impl EchoPlugin {
    fn echo(&self, invoke: Invoke) {
        let args = invoke.args().clone();
        answer(invoke.resolve(args), &invoke);
    }

    fn ping(&self, invoke: Invoke) {
        answer(invoke.resolve("pong"), &invoke);
    }

    fn fail(&self, invoke: Invoke) -> Result<(), PluginError> {
        let message = invoke
            .get::<String>("message")
            .unwrap_or_else(|| "echo failure requested".to_string());
        Err(PluginError::Failed(message))
    }
}

impl Plugin for EchoPlugin {
    fn methods() -> MethodTable<Self> {
        MethodTable::new()
            .simple("echo", Self::echo)
            .simple("ping", Self::ping)
            .fallible("fail", Self::fail)
    }
}

/// Facts about the running bridge.
#[derive(Debug)]
pub struct AppPlugin {
    name: String,
    version: String,
    surfaces: Mutex<Vec<String>>,
}

#[derive(Deserialize)]
struct GreetArgs {
    name: String,
    #[serde(default)]
    excited: bool,
}

impl AppPlugin {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            surfaces: Mutex::new(Vec::new()),
        }
    }

    fn version(&self, invoke: Invoke) {
        answer(invoke.resolve(json!({"name": self.name, "version": self.version})), &invoke);
    }

    fn surfaces(&self, invoke: Invoke) {
        let surfaces = match self.surfaces.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        answer(invoke.resolve(surfaces), &invoke);
    }

    fn greet(&self, invoke: Invoke) -> Result<(), PluginError> {
        let args: GreetArgs = invoke.parse_args()?;
        let mark = if args.excited { "!" } else { "." };
        answer(invoke.resolve(format!("Hello, {}{mark}", args.name)), &invoke);
        Ok(())
    }
}

impl Plugin for AppPlugin {
    fn load(&self, surface: &SurfaceRef) -> Result<(), PluginError> {
        let mut surfaces = self
            .surfaces
            .lock()
            .map_err(|_| PluginError::Load("surface list poisoned".into()))?;
        surfaces.push(surface.label().to_string());
        Ok(())
    }

    fn methods() -> MethodTable<Self> {
        MethodTable::new()
            .simple("version", Self::version)
            .simple("surfaces", Self::surfaces)
            .fallible("greet", Self::greet)
    }
}

fn answer(result: Result<(), bridge_plugin::InvokeError>, invoke: &Invoke) {
    if let Err(err) = result {
        warn!(invoke = %invoke.id(), error = %err, "built-in plugin could not answer");
    }
}

/// Register the built-in plugins. They load once a surface is created.
pub fn register_builtins(bridge: &Bridge) -> Result<(), BridgeError> {
    bridge.register_plugin(None, "echo", EchoPlugin)?;
    bridge.register_plugin(None, "app", AppPlugin::new(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")))?;
    Ok(())
}
