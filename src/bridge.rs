//! The host-facing context object. One `Bridge` is created at start-up and
//! every boundary entry point goes through it.

use std::time::Instant;

use bridge_plugin::{CallbackId, Invoke, Plugin, PluginError, StructuredMap, SurfaceRef};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{Level, debug, info};
use uuid::Uuid;

use crate::{
    config::BridgeConfig,
    dispatcher::Dispatcher,
    error::BridgeError,
    logger::INVOKE_TARGET,
    registry::{PluginInfo, Registry},
};

/// A fallible method failed. Sent on the side error channel in addition to
/// the rejection the script side receives.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodFailure {
    pub invoke: Uuid,
    pub plugin: String,
    pub method: String,
    pub error: PluginError,
}

#[derive(Clone, Debug)]
pub struct Bridge {
    config: BridgeConfig,
    dispatcher: Dispatcher,
    failures: UnboundedSender<MethodFailure>,
}

impl Bridge {
    /// Create the bridge and the receiving end of its side error channel.
    /// Dropping the receiver is fine; failures are then only logged.
    pub fn new(config: BridgeConfig) -> (Self, UnboundedReceiver<MethodFailure>) {
        let (tx, rx) = unbounded_channel();
        let registry = Registry::new(config.duplicate_policy);
        (
            Self {
                config,
                dispatcher: Dispatcher::new(registry),
                failures: tx,
            },
            rx,
        )
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        self.dispatcher.registry()
    }

    /// A new script surface exists: load every plugin still waiting for one.
    pub fn notify_surface_created(&self, surface: &SurfaceRef) -> usize {
        let loaded = self.registry().on_surface_created(surface);
        info!(surface = %surface.label(), loaded, "surface created");
        loaded
    }

    /// Register `plugin` under `name`, loading it into `surface` right away
    /// when one is given.
    pub fn register_plugin<P: Plugin>(
        &self,
        surface: Option<&SurfaceRef>,
        name: impl Into<String>,
        plugin: P,
    ) -> Result<(), BridgeError> {
        self.registry().register(name, plugin, surface).map(|_| ())
    }

    /// The cross-boundary call. The outcome always reaches the script side
    /// through `callback` or `error`; the return value mirrors it for the host.
    #[tracing::instrument(name = "invoke_plugin", skip(self, surface, payload), fields(surface = %surface.label()))]
    pub fn invoke_plugin(
        &self,
        surface: &SurfaceRef,
        plugin: &str,
        method: &str,
        payload: StructuredMap,
        callback: CallbackId,
        error: CallbackId,
    ) -> Result<(), BridgeError> {
        let call = Invoke::new(surface.clone(), plugin, method, payload, callback, error);
        let invoke = call.id();
        let started = Instant::now();

        let result = self.dispatcher.dispatch(plugin, method, call);

        let latency_ms = started.elapsed().as_secs_f64() * 1_000.0;
        let outcome = match &result {
            Ok(()) => "dispatched",
            Err(err) => err.kind(),
        };
        tracing::event!(
            target: INVOKE_TARGET,
            Level::INFO,
            invoke = %invoke,
            plugin,
            method,
            outcome,
            latency_ms,
        );

        if let Err(BridgeError::MethodThrew { source, .. }) = &result {
            let failure = MethodFailure {
                invoke,
                plugin: plugin.to_string(),
                method: method.to_string(),
                error: source.clone(),
            };
            if self.failures.send(failure).is_err() {
                debug!(%invoke, "nobody is listening for method failures");
            }
        }
        result
    }

    pub fn plugins(&self) -> Vec<PluginInfo> {
        self.registry().describe()
    }

    /// Unregister every plugin.
    pub fn clear(&self) {
        info!(plugins = self.registry().len(), "clearing bridge");
        self.registry().clear();
    }
}
