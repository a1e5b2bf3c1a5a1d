//! Test doubles for hosts and plugins: a surface that records what it was
//! asked to evaluate, and a plugin that records what was called on it.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread::{self, ThreadId},
};

use serde_json::Value;

use crate::{
    invoke::Invoke,
    message::{CallbackId, StructuredMap},
    plugin::{MethodTable, Plugin, PluginError},
    surface::{ScriptSurface, SurfaceDriver, SurfaceRef, attach},
};

/// Records every script it evaluates together with the evaluating thread.
/// Clones share the same transcript.
#[derive(Clone, Default)]
pub struct RecordingSurface {
    scripts: Arc<Mutex<Vec<(String, ThreadId)>>>,
}

impl RecordingSurface {
    pub fn scripts(&self) -> Vec<String> {
        self.scripts.lock().unwrap().iter().map(|(s, _)| s.clone()).collect()
    }

    pub fn threads(&self) -> Vec<ThreadId> {
        self.scripts.lock().unwrap().iter().map(|(_, t)| *t).collect()
    }
}

impl ScriptSurface for RecordingSurface {
    fn evaluate_script(&mut self, script: &str) {
        self.scripts
            .lock()
            .unwrap()
            .push((script.to_string(), thread::current().id()));
    }
}

/// Attach a fresh `RecordingSurface` and keep a handle on its transcript.
pub fn recording_surface(label: &str) -> (SurfaceRef, SurfaceDriver<RecordingSurface>, RecordingSurface) {
    let recorder = RecordingSurface::default();
    let (surface, driver) = attach(label, recorder.clone());
    (surface, driver, recorder)
}

/// An invoke answering to callback `_1` on success and `_2` on error.
pub fn invoke_with_args(surface: &SurfaceRef, plugin: &str, method: &str, args: Value) -> Invoke {
    let args = match args {
        Value::Object(map) => map,
        _ => StructuredMap::new(),
    };
    Invoke::new(surface.clone(), plugin, method, args, CallbackId(1), CallbackId(2))
}

/// Shared record of what happened to a `ProbePlugin`.
#[derive(Clone, Default)]
pub struct Probe {
    loads: Arc<AtomicUsize>,
    calls: Arc<Mutex<Vec<String>>>,
    fail_load: Arc<AtomicBool>,
}

impl Probe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `load` fail.
    pub fn fail_loads(&self, fail: bool) {
        self.fail_load.store(fail, Ordering::SeqCst);
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }
}

/// A plugin exposing one method per interesting dispatch path:
///
/// * `echo` (simple) resolves with its arguments
/// * `silent` (simple) never answers
/// * `explode` (fallible) fails with the `message` argument, or `boom`
/// * `answerThenFail` (fallible) resolves and then returns an error anyway
/// * `both` is registered as simple and as fallible; the fallible one resolves `"fallible"`
pub struct ProbePlugin {
    probe: Probe,
}

impl ProbePlugin {
    pub fn new(probe: Probe) -> Self {
        Self { probe }
    }

    fn echo(&self, invoke: Invoke) {
        self.probe.record("echo");
        let args = invoke.args().clone();
        let _ = invoke.resolve(args);
    }

    fn silent(&self, _invoke: Invoke) {
        self.probe.record("silent");
    }

    fn explode(&self, invoke: Invoke) -> Result<(), PluginError> {
        self.probe.record("explode");
        let message = invoke.get::<String>("message").unwrap_or_else(|| "boom".to_string());
        Err(PluginError::failed(message))
    }

    fn answer_then_fail(&self, invoke: Invoke) -> Result<(), PluginError> {
        self.probe.record("answerThenFail");
        let _ = invoke.resolve("done");
        Err(PluginError::failed("too late"))
    }

    fn both_simple(&self, invoke: Invoke) {
        self.probe.record("both:simple");
        let _ = invoke.resolve("simple");
    }

    fn both_fallible(&self, invoke: Invoke) -> Result<(), PluginError> {
        self.probe.record("both:fallible");
        let _ = invoke.resolve("fallible");
        Ok(())
    }
}

impl Plugin for ProbePlugin {
    fn load(&self, _surface: &SurfaceRef) -> Result<(), PluginError> {
        self.probe.loads.fetch_add(1, Ordering::SeqCst);
        if self.probe.fail_load.load(Ordering::SeqCst) {
            return Err(PluginError::Load("probe refused to load".into()));
        }
        Ok(())
    }

    fn methods() -> MethodTable<Self> {
        MethodTable::new()
            .simple("echo", Self::echo)
            .simple("silent", Self::silent)
            .fallible("explode", Self::explode)
            .fallible("answerThenFail", Self::answer_then_fail)
            .simple("both", Self::both_simple)
            .fallible("both", Self::both_fallible)
    }
}
