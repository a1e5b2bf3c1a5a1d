use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
};

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use strum_macros::{AsRefStr, Display};
use thiserror::Error;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::{
    message::{CallbackId, ScriptCall, StructuredMap},
    plugin::PluginError,
    response::{ResponseKind, payload_text},
    surface::{SurfaceError, SurfaceRef},
};

/// Where an invoke is in its lifecycle. Only `Pending` ever transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, Display)]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum InvokeState {
    Pending = 0,
    Resolved = 1,
    Rejected = 2,
}

impl InvokeState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => InvokeState::Pending,
            1 => InvokeState::Resolved,
            _ => InvokeState::Rejected,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvokeError {
    /// `resolve`/`reject` was called on an invoke that already answered.
    #[error("invoke {invoke} was already {state}")]
    AlreadyResponded { invoke: Uuid, state: InvokeState },

    /// The response was accepted but its surface is gone.
    #[error(transparent)]
    Surface(#[from] SurfaceError),
}

struct Inner {
    id: Uuid,
    plugin: String,
    method: String,
    args: StructuredMap,
    callback: CallbackId,
    error: CallbackId,
    state: AtomicU8,
    surface: SurfaceRef,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if InvokeState::from_u8(*self.state.get_mut()) == InvokeState::Pending {
            warn!(
                invoke = %self.id,
                plugin = %self.plugin,
                method = %self.method,
                "invoke dropped without a response; the script side will never hear back"
            );
        }
    }
}

/// One pending cross-boundary call.
///
/// Cloning is cheap and every clone refers to the same call, so a plugin can
/// keep an `Invoke` and answer it later from any thread. Exactly one of
/// `resolve`/`reject` is delivered; later attempts fail with
/// `InvokeError::AlreadyResponded`.
#[derive(Clone)]
pub struct Invoke {
    inner: Arc<Inner>,
}

impl Invoke {
    pub fn new(
        surface: SurfaceRef,
        plugin: impl Into<String>,
        method: impl Into<String>,
        args: StructuredMap,
        callback: CallbackId,
        error: CallbackId,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: Uuid::new_v4(),
                plugin: plugin.into(),
                method: method.into(),
                args,
                callback,
                error,
                state: AtomicU8::new(InvokeState::Pending as u8),
                surface,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn plugin(&self) -> &str {
        &self.inner.plugin
    }

    pub fn method(&self) -> &str {
        &self.inner.method
    }

    pub fn callback(&self) -> CallbackId {
        self.inner.callback
    }

    pub fn error_callback(&self) -> CallbackId {
        self.inner.error
    }

    pub fn surface(&self) -> &SurfaceRef {
        &self.inner.surface
    }

    pub fn state(&self) -> InvokeState {
        InvokeState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    pub fn is_pending(&self) -> bool {
        self.state() == InvokeState::Pending
    }

    pub fn args(&self) -> &StructuredMap {
        &self.inner.args
    }

    /// A single argument, converted to `T`. `None` when missing or of the
    /// wrong shape.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.inner
            .args
            .get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// All arguments, converted to `T`.
    pub fn parse_args<T: DeserializeOwned>(&self) -> Result<T, PluginError> {
        serde_json::from_value(Value::Object(self.inner.args.clone()))
            .map_err(|err| PluginError::InvalidArgs(err.to_string()))
    }

    pub fn resolve<T: Serialize>(&self, value: T) -> Result<(), InvokeError> {
        self.respond(ResponseKind::Success, Some(&value))
    }

    /// Resolve with `null`.
    pub fn resolve_empty(&self) -> Result<(), InvokeError> {
        self.respond::<()>(ResponseKind::Success, None)
    }

    pub fn reject<T: Serialize>(&self, value: T) -> Result<(), InvokeError> {
        self.respond(ResponseKind::Error, Some(&value))
    }

    /// Reject with `null`.
    pub fn reject_empty(&self) -> Result<(), InvokeError> {
        self.respond::<()>(ResponseKind::Error, None)
    }

    fn target(&self, kind: ResponseKind) -> CallbackId {
        match kind {
            ResponseKind::Success => self.inner.callback,
            ResponseKind::Error => self.inner.error,
        }
    }

    fn respond<T: Serialize + ?Sized>(&self, kind: ResponseKind, payload: Option<&T>) -> Result<(), InvokeError> {
        let next = match kind {
            ResponseKind::Success => InvokeState::Resolved,
            ResponseKind::Error => InvokeState::Rejected,
        };
        if let Err(current) = self.inner.state.compare_exchange(
            InvokeState::Pending as u8,
            next as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            let state = InvokeState::from_u8(current);
            error!(
                invoke = %self.inner.id,
                plugin = %self.inner.plugin,
                method = %self.inner.method,
                %state,
                attempted = %kind,
                "invoke answered more than once; dropping the second response"
            );
            return Err(InvokeError::AlreadyResponded { invoke: self.inner.id, state });
        }

        let call = ScriptCall::new(self.target(kind), payload_text(payload));
        debug!(
            invoke = %self.inner.id,
            plugin = %self.inner.plugin,
            method = %self.inner.method,
            outcome = %kind,
            function = %call.function,
            "responding"
        );
        self.inner.surface.schedule(call)?;
        Ok(())
    }
}

impl fmt::Debug for Invoke {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invoke")
            .field("id", &self.inner.id)
            .field("plugin", &self.inner.plugin)
            .field("method", &self.inner.method)
            .field("callback", &self.inner.callback)
            .field("error", &self.inner.error)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use serde::Deserialize;
    use serde_json::json;

    use super::*;
    use crate::plugin_test_util::{invoke_with_args, recording_surface};

    #[test]
    fn resolve_targets_the_success_callback() {
        let (surface, mut driver, recorder) = recording_surface("main");
        let invoke = Invoke::new(surface, "Battery", "getLevel", StructuredMap::new(), CallbackId(10), CallbackId(11));

        invoke.resolve(42).unwrap();

        assert_eq!(invoke.state(), InvokeState::Resolved);
        assert_eq!(driver.run_pending(), 1);
        assert_eq!(recorder.scripts(), vec!["window['_10'](42)".to_string()]);
    }

    #[test]
    fn reject_targets_the_error_callback() {
        let (surface, mut driver, recorder) = recording_surface("main");
        let invoke = Invoke::new(surface, "Camera", "capture", StructuredMap::new(), CallbackId(1), CallbackId(2));

        invoke.reject("PermissionDenied").unwrap();

        driver.run_pending();
        assert_eq!(invoke.state(), InvokeState::Rejected);
        assert_eq!(recorder.scripts(), vec!["window['_2'](\"PermissionDenied\")".to_string()]);
    }

    #[test]
    fn empty_responses_deliver_null() {
        let (surface, mut driver, recorder) = recording_surface("main");
        invoke_with_args(&surface, "p", "a", json!({})).resolve_empty().unwrap();
        invoke_with_args(&surface, "p", "b", json!({})).reject_empty().unwrap();

        driver.run_pending();
        assert_eq!(
            recorder.scripts(),
            vec!["window['_1'](null)".to_string(), "window['_2'](null)".to_string()]
        );
    }

    #[test]
    fn second_terminal_call_is_refused() {
        let (surface, mut driver, recorder) = recording_surface("main");
        let invoke = invoke_with_args(&surface, "Battery", "getLevel", json!({}));

        invoke.resolve(1).unwrap();
        let again = invoke.clone().reject("late");

        assert_eq!(
            again,
            Err(InvokeError::AlreadyResponded { invoke: invoke.id(), state: InvokeState::Resolved })
        );
        assert_eq!(driver.run_pending(), 1);
        assert_eq!(recorder.scripts(), vec!["window['_1'](1)".to_string()]);
    }

    #[test]
    fn unserializable_payload_still_fires_callback() {
        use serde::ser::{Error as _, Serializer};

        struct Broken;
        impl Serialize for Broken {
            fn serialize<S: Serializer>(&self, _s: S) -> Result<S::Ok, S::Error> {
                Err(S::Error::custom("cannot encode `frame`"))
            }
        }

        let (surface, mut driver, recorder) = recording_surface("main");
        let invoke = invoke_with_args(&surface, "Camera", "capture", json!({}));

        invoke.resolve(Broken).unwrap();

        assert_eq!(driver.run_pending(), 1);
        assert_eq!(recorder.scripts(), vec!["window['_1'](`cannot encode \\`frame\\``)".to_string()]);
    }

    #[test]
    fn resolve_from_worker_runs_on_driver_thread() {
        let (surface, mut driver, recorder) = recording_surface("main");
        let invoke = invoke_with_args(&surface, "Battery", "getLevel", json!({}));

        let worker = invoke.clone();
        let worker_thread = thread::spawn(move || {
            worker.resolve(json!({"level": 80})).unwrap();
            thread::current().id()
        })
        .join()
        .unwrap();

        assert_eq!(driver.run_pending(), 1);
        let threads = recorder.threads();
        assert_eq!(threads, vec![thread::current().id()]);
        assert_ne!(threads[0], worker_thread);
    }

    #[test]
    fn closed_surface_still_counts_as_answered() {
        let (surface, driver, _recorder) = recording_surface("main");
        let invoke = invoke_with_args(&surface, "Battery", "getLevel", json!({}));
        drop(driver);

        assert_eq!(
            invoke.resolve(1),
            Err(InvokeError::Surface(SurfaceError::Closed("main".into())))
        );
        assert_eq!(invoke.state(), InvokeState::Resolved);
    }

    #[test]
    fn dropping_a_pending_invoke_schedules_nothing() {
        let (surface, mut driver, recorder) = recording_surface("main");
        drop(invoke_with_args(&surface, "Battery", "getLevel", json!({})));

        assert_eq!(driver.run_pending(), 0);
        assert!(recorder.scripts().is_empty());
    }

    #[test]
    fn typed_argument_access() {
        #[derive(Deserialize, Debug, PartialEq)]
        struct Capture {
            quality: u8,
            flash: bool,
        }

        let (surface, _driver, _recorder) = recording_surface("main");
        let invoke = invoke_with_args(&surface, "Camera", "capture", json!({"quality": 90, "flash": true}));

        assert_eq!(invoke.get::<u8>("quality"), Some(90));
        assert_eq!(invoke.get::<String>("quality"), None);
        assert_eq!(invoke.get::<bool>("missing"), None);
        assert_eq!(invoke.parse_args::<Capture>().unwrap(), Capture { quality: 90, flash: true });

        let bad = invoke_with_args(&surface, "Camera", "capture", json!({"quality": "high"}));
        assert!(matches!(bad.parse_args::<Capture>(), Err(PluginError::InvalidArgs(_))));
        bad.resolve_empty().unwrap();
        invoke.resolve_empty().unwrap();
    }
}
