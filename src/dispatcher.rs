use bridge_plugin::Invoke;
use tracing::{debug, warn};

use crate::{
    error::BridgeError,
    registry::{BoundMethod, Registry},
};

/// Resolves `plugin.method` against the registry and calls it.
///
/// Resolution order:
/// 1. unknown plugin: reject with `PluginNotRegistered`
/// 2. fallible method: call it, reject with `MethodThrew` if it fails
/// 3. simple method: call it, the method answers on its own
/// 4. otherwise reject with `MethodNotFound`
#[derive(Clone, Debug)]
pub struct Dispatcher {
    registry: Registry,
}

impl Dispatcher {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Route `call` to `plugin.method`. Every `Err` returned here has already
    /// been delivered to the script side through `call.reject`.
    pub fn dispatch(&self, plugin: &str, method: &str, call: Invoke) -> Result<(), BridgeError> {
        let Some(handle) = self.registry.get(plugin) else {
            return Err(reject(&call, BridgeError::PluginNotRegistered(plugin.to_string())));
        };

        match handle.lookup(method) {
            Some(BoundMethod::Fallible(run)) => {
                debug!(plugin, method, invoke = %call.id(), convention = "fallible", "dispatching");
                run(call.clone()).map_err(|source| {
                    reject(
                        &call,
                        BridgeError::MethodThrew {
                            plugin: plugin.to_string(),
                            method: method.to_string(),
                            source,
                        },
                    )
                })
            }
            Some(BoundMethod::Simple(run)) => {
                debug!(plugin, method, invoke = %call.id(), convention = "simple", "dispatching");
                run(call);
                Ok(())
            }
            None => Err(reject(
                &call,
                BridgeError::MethodNotFound {
                    plugin: plugin.to_string(),
                    method: method.to_string(),
                },
            )),
        }
    }
}

fn reject(call: &Invoke, err: BridgeError) -> BridgeError {
    if let Err(delivery) = call.reject(err.to_string()) {
        warn!(invoke = %call.id(), error = %err, %delivery, "rejection was not delivered");
    }
    err
}
