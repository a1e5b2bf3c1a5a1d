//! Registry: the name → handle table every entry point goes through.
use std::{
    fmt,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    thread::{self, ThreadId},
};

use bridge_plugin::{Invoke, MethodTable, Plugin, PluginError, SurfaceRef};
use dashmap::{DashMap, mapref::entry::Entry};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use tracing::{error, info, warn};

use crate::error::BridgeError;

/// What `register` does when the name is already taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema, EnumString, AsRefStr, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum DuplicatePolicy {
    /// Last write wins; the previous handle is discarded even if loaded.
    #[default]
    Replace,
    /// Keep the existing handle and refuse the new one.
    Reject,
}

/// A method bound to its plugin instance, ready to be called.
pub(crate) enum BoundMethod<'a> {
    Fallible(Box<dyn Fn(Invoke) -> Result<(), PluginError> + 'a>),
    Simple(Box<dyn Fn(Invoke) + 'a>),
}

trait PluginInstance: Send + Sync {
    fn load(&self, surface: &SurfaceRef) -> Result<(), PluginError>;
    fn lookup(&self, method: &str) -> Option<BoundMethod<'_>>;
    fn method_names(&self) -> Vec<String>;
}

struct TypedInstance<P: Plugin> {
    plugin: P,
    methods: MethodTable<P>,
}

impl<P: Plugin> PluginInstance for TypedInstance<P> {
    fn load(&self, surface: &SurfaceRef) -> Result<(), PluginError> {
        self.plugin.load(surface)
    }

    // fallible first: when both conventions exist the richer one wins
    fn lookup(&self, method: &str) -> Option<BoundMethod<'_>> {
        if let Some(m) = self.methods.get_fallible(method) {
            return Some(BoundMethod::Fallible(Box::new(move |invoke: Invoke| m(&self.plugin, invoke))));
        }
        self.methods
            .get_simple(method)
            .map(|m| BoundMethod::Simple(Box::new(move |invoke: Invoke| m(&self.plugin, invoke))))
    }

    fn method_names(&self) -> Vec<String> {
        self.methods.names()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadState {
    Unloaded,
    /// `load` is running on this thread.
    Loading(ThreadId),
    Loaded,
}

/// Per-plugin record: the instance, its method table and whether it has been
/// loaded into a surface.
pub struct Handle {
    name: String,
    instance: Box<dyn PluginInstance>,
    state: Mutex<LoadState>,
    settled: Condvar,
}

impl Handle {
    fn new<P: Plugin>(name: String, plugin: P) -> Self {
        Self {
            name,
            instance: Box::new(TypedInstance { plugin, methods: P::methods() }),
            state: Mutex::new(LoadState::Unloaded),
            settled: Condvar::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `true` only once a load has succeeded; a load still running does not count.
    pub fn is_loaded(&self) -> bool {
        *self.state() == LoadState::Loaded
    }

    fn state(&self) -> MutexGuard<'_, LoadState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn methods(&self) -> Vec<String> {
        self.instance.method_names()
    }

    /// Load into `surface` unless already loaded. Returns `true` when this
    /// call performed the load.
    ///
    /// While another thread is loading, this waits for the outcome: a success
    /// means there is nothing left to do, a failure means this surface gets
    /// its own attempt. A failed load leaves the handle unloaded so the next
    /// surface retries. Re-entering from the plugin's own `load` is a no-op.
    pub fn load(&self, surface: &SurfaceRef) -> bool {
        let me = thread::current().id();
        let mut state = self.state();
        loop {
            match *state {
                LoadState::Loaded => return false,
                LoadState::Loading(owner) if owner == me => return false,
                LoadState::Loading(_) => {
                    state = self.settled.wait(state).unwrap_or_else(PoisonError::into_inner);
                }
                LoadState::Unloaded => break,
            }
        }
        *state = LoadState::Loading(me);
        drop(state);

        let result = self.instance.load(surface);

        let mut state = self.state();
        let loaded = match result {
            Ok(()) => {
                info!(plugin = %self.name, surface = %surface.label(), "plugin loaded");
                *state = LoadState::Loaded;
                true
            }
            Err(err) => {
                error!(plugin = %self.name, surface = %surface.label(), error = %err, "plugin failed to load");
                *state = LoadState::Unloaded;
                false
            }
        };
        drop(state);
        self.settled.notify_all();
        loaded
    }

    pub(crate) fn lookup(&self, method: &str) -> Option<BoundMethod<'_>> {
        self.instance.lookup(method)
    }

    pub fn info(&self) -> PluginInfo {
        PluginInfo {
            name: self.name.clone(),
            loaded: self.is_loaded(),
            methods: self.methods(),
        }
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("name", &self.name)
            .field("loaded", &self.is_loaded())
            .field("methods", &self.methods())
            .finish()
    }
}

/// Snapshot of one registered plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PluginInfo {
    pub name: String,
    pub loaded: bool,
    pub methods: Vec<String>,
}

/// Thread-safe plugin table. Clones share the same table.
///
/// No plugin code ever runs while a map shard is locked: handles are cloned
/// out first, so a plugin may call back into the registry from `load` or
/// from a method.
#[derive(Clone, Debug, Default)]
pub struct Registry {
    handles: Arc<DashMap<String, Arc<Handle>>>,
    policy: DuplicatePolicy,
}

impl Registry {
    pub fn new(policy: DuplicatePolicy) -> Self {
        Self {
            handles: Arc::new(DashMap::new()),
            policy,
        }
    }

    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    /// Register `plugin` under `name`, loading it right away when a surface
    /// is given. Returns the handle it replaced, if any.
    pub fn register<P: Plugin>(
        &self,
        name: impl Into<String>,
        plugin: P,
        surface: Option<&SurfaceRef>,
    ) -> Result<Option<Arc<Handle>>, BridgeError> {
        let name = name.into();
        let handle = Arc::new(Handle::new(name.clone(), plugin));

        let replaced = match self.policy {
            DuplicatePolicy::Replace => self.handles.insert(name.clone(), handle.clone()),
            DuplicatePolicy::Reject => match self.handles.entry(name.clone()) {
                Entry::Occupied(_) => {
                    warn!(plugin = %name, "refusing duplicate registration");
                    return Err(BridgeError::DuplicatePlugin(name));
                }
                Entry::Vacant(slot) => {
                    slot.insert(handle.clone());
                    None
                }
            },
        };

        if let Some(old) = &replaced {
            warn!(plugin = %name, was_loaded = old.is_loaded(), "replaced existing plugin");
        }
        info!(plugin = %name, methods = ?handle.methods(), "plugin registered");

        if let Some(surface) = surface {
            handle.load(surface);
        }
        Ok(replaced)
    }

    /// Load every handle that is not loaded yet. Returns how many loaded.
    pub fn on_surface_created(&self, surface: &SurfaceRef) -> usize {
        let pending: Vec<Arc<Handle>> = self
            .handles
            .iter()
            .filter(|kv| !kv.value().is_loaded())
            .map(|kv| kv.value().clone())
            .collect();

        pending.iter().filter(|handle| handle.load(surface)).count()
    }

    pub fn get(&self, name: &str) -> Option<Arc<Handle>> {
        self.handles.get(name).map(|kv| kv.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handles.contains_key(name)
    }

    /// Sorted plugin names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handles.iter().map(|kv| kv.key().clone()).collect();
        names.sort();
        names
    }

    pub fn describe(&self) -> Vec<PluginInfo> {
        let mut infos: Vec<PluginInfo> = self.handles.iter().map(|kv| kv.value().info()).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn unregister(&self, name: &str) -> Option<Arc<Handle>> {
        let removed = self.handles.remove(name).map(|(_, handle)| handle);
        if removed.is_some() {
            info!(plugin = %name, "plugin unregistered");
        }
        removed
    }

    /// Drop every handle.
    pub fn clear(&self) {
        self.handles.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Barrier, thread, time::Duration};

    use bridge_plugin::plugin_test_util::{Probe, ProbePlugin, recording_surface};

    use super::*;

    #[test]
    fn register_without_surface_stays_unloaded() {
        let registry = Registry::default();
        let probe = Probe::new();

        let replaced = registry.register("probe", ProbePlugin::new(probe.clone()), None).unwrap();

        assert!(replaced.is_none());
        assert!(!registry.get("probe").unwrap().is_loaded());
        assert_eq!(probe.loads(), 0);
    }

    #[test]
    fn register_with_surface_loads_immediately() {
        let registry = Registry::default();
        let probe = Probe::new();
        let (surface, _driver, _recorder) = recording_surface("main");

        registry.register("probe", ProbePlugin::new(probe.clone()), Some(&surface)).unwrap();

        assert!(registry.get("probe").unwrap().is_loaded());
        assert_eq!(probe.loads(), 1);
        assert_eq!(registry.on_surface_created(&surface), 0);
        assert_eq!(probe.loads(), 1);
    }

    #[test]
    fn surface_created_twice_loads_each_handle_once() {
        let registry = Registry::default();
        let (a, b) = (Probe::new(), Probe::new());
        registry.register("a", ProbePlugin::new(a.clone()), None).unwrap();
        registry.register("b", ProbePlugin::new(b.clone()), None).unwrap();
        let (surface, _driver, _recorder) = recording_surface("main");

        assert_eq!(registry.on_surface_created(&surface), 2);
        assert_eq!(registry.on_surface_created(&surface), 0);

        assert_eq!((a.loads(), b.loads()), (1, 1));
        assert!(registry.describe().iter().all(|info| info.loaded));
    }

    #[test]
    fn overlapping_surfaces_never_double_load() {
        let registry = Registry::default();
        let probes: Vec<Probe> = (0..8).map(|_| Probe::new()).collect();
        for (i, probe) in probes.iter().enumerate() {
            registry.register(format!("p{i}"), ProbePlugin::new(probe.clone()), None).unwrap();
        }

        let barrier = Arc::new(Barrier::new(4));
        let workers: Vec<_> = (0..4)
            .map(|i| {
                let registry = registry.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    let (surface, _driver, _recorder) = recording_surface(&format!("s{i}"));
                    barrier.wait();
                    registry.on_surface_created(&surface)
                })
            })
            .collect();
        let loaded: usize = workers.into_iter().map(|w| w.join().unwrap()).sum();

        assert_eq!(loaded, 8);
        assert!(probes.iter().all(|p| p.loads() == 1));
    }

    #[test]
    fn failed_load_is_retried_by_next_surface() {
        let registry = Registry::default();
        let probe = Probe::new();
        probe.fail_loads(true);
        registry.register("flaky", ProbePlugin::new(probe.clone()), None).unwrap();
        let (surface, _driver, _recorder) = recording_surface("main");

        assert_eq!(registry.on_surface_created(&surface), 0);
        assert!(!registry.get("flaky").unwrap().is_loaded());

        probe.fail_loads(false);
        assert_eq!(registry.on_surface_created(&surface), 1);
        assert!(registry.get("flaky").unwrap().is_loaded());
        assert_eq!(probe.loads(), 2);
    }

    /// Fails on surface "a" after a pause, succeeds everywhere else.
    struct SlowOnA {
        attempts: Arc<Mutex<Vec<String>>>,
    }

    impl Plugin for SlowOnA {
        fn load(&self, surface: &SurfaceRef) -> Result<(), PluginError> {
            self.attempts.lock().unwrap().push(surface.label().to_string());
            if surface.label() == "a" {
                thread::sleep(Duration::from_millis(200));
                return Err(PluginError::Load("a is not ready".into()));
            }
            Ok(())
        }

        fn methods() -> MethodTable<Self> {
            MethodTable::new()
        }
    }

    #[test]
    fn surface_created_during_a_failing_load_still_gets_the_plugin() {
        let registry = Registry::default();
        let attempts = Arc::new(Mutex::new(Vec::new()));
        registry.register("slow", SlowOnA { attempts: attempts.clone() }, None).unwrap();
        let (a, _driver_a, _recorder_a) = recording_surface("a");
        let (b, _driver_b, _recorder_b) = recording_surface("b");

        let first = {
            let registry = registry.clone();
            thread::spawn(move || registry.on_surface_created(&a))
        };
        while attempts.lock().unwrap().is_empty() {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!registry.get("slow").unwrap().is_loaded());
        assert!(!registry.describe()[0].loaded);

        assert_eq!(registry.on_surface_created(&b), 1);

        assert_eq!(first.join().unwrap(), 0);
        assert!(registry.get("slow").unwrap().is_loaded());
        assert_eq!(*attempts.lock().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn replace_policy_is_last_write_wins() {
        let registry = Registry::new(DuplicatePolicy::Replace);
        let (first, second) = (Probe::new(), Probe::new());
        let (surface, _driver, _recorder) = recording_surface("main");

        registry.register("cam", ProbePlugin::new(first.clone()), Some(&surface)).unwrap();
        let replaced = registry.register("cam", ProbePlugin::new(second.clone()), None).unwrap();

        assert!(replaced.unwrap().is_loaded());
        assert_eq!(registry.len(), 1);
        assert!(!registry.get("cam").unwrap().is_loaded());
        assert_eq!(registry.on_surface_created(&surface), 1);
        assert_eq!((first.loads(), second.loads()), (1, 1));
    }

    #[test]
    fn reject_policy_keeps_the_first_plugin() {
        let registry = Registry::new(DuplicatePolicy::Reject);
        let (first, second) = (Probe::new(), Probe::new());
        let (surface, _driver, _recorder) = recording_surface("main");

        registry.register("cam", ProbePlugin::new(first.clone()), None).unwrap();
        let err = registry
            .register("cam", ProbePlugin::new(second.clone()), Some(&surface))
            .unwrap_err();

        assert_eq!(err, BridgeError::DuplicatePlugin("cam".into()));
        assert_eq!(second.loads(), 0);
        registry.on_surface_created(&surface);
        assert_eq!(first.loads(), 1);
    }

    #[test]
    fn names_describe_unregister_and_clear() {
        let registry = Registry::default();
        registry.register("zeta", ProbePlugin::new(Probe::new()), None).unwrap();
        registry.register("alpha", ProbePlugin::new(Probe::new()), None).unwrap();

        assert_eq!(registry.names(), vec!["alpha".to_string(), "zeta".to_string()]);
        let infos = registry.describe();
        assert_eq!(infos[0].name, "alpha");
        assert!(infos[0].methods.contains(&"echo".to_string()));

        assert!(registry.unregister("alpha").is_some());
        assert!(registry.unregister("alpha").is_none());
        assert!(!registry.contains("alpha"));

        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn duplicate_policy_parses() {
        assert_eq!("Reject".parse::<DuplicatePolicy>().unwrap(), DuplicatePolicy::Reject);
        assert_eq!("replace".parse::<DuplicatePolicy>().unwrap(), DuplicatePolicy::Replace);
        assert!("merge".parse::<DuplicatePolicy>().is_err());
    }
}
