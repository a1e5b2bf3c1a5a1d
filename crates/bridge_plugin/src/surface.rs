//! The script surface boundary.
//!
//! A surface can only be driven from the thread that owns it. `attach` splits
//! it into a `SurfaceRef`, which any thread may clone and schedule calls on,
//! and a `SurfaceDriver`, which stays with the owning thread and executes the
//! scheduled calls in order.

use std::{fmt, sync::Arc};

use thiserror::Error;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{debug, trace};

use crate::message::ScriptCall;

/// Something that can evaluate script text. Implementations are not required
/// to be `Send`; they never leave the driver's thread.
pub trait ScriptSurface {
    fn evaluate_script(&mut self, script: &str);
}

impl<F: FnMut(&str)> ScriptSurface for F {
    fn evaluate_script(&mut self, script: &str) {
        self(script)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SurfaceError {
    #[error("surface `{0}` is closed")]
    Closed(String),
}

/// Thread-safe handle to an attached surface.
#[derive(Clone)]
pub struct SurfaceRef {
    label: Arc<str>,
    tx: UnboundedSender<ScriptCall>,
}

impl SurfaceRef {
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Queue a call for the owning thread. Never blocks.
    pub fn schedule(&self, call: ScriptCall) -> Result<(), SurfaceError> {
        trace!(surface = %self.label, function = %call.function, "scheduling script call");
        self.tx
            .send(call)
            .map_err(|_| SurfaceError::Closed(self.label.to_string()))
    }

    /// `true` once the driver has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Whether both handles point at the same attached surface.
    pub fn same_surface(&self, other: &SurfaceRef) -> bool {
        self.tx.same_channel(&other.tx)
    }
}

impl fmt::Debug for SurfaceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SurfaceRef")
            .field("label", &self.label)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Owning-thread side of an attached surface.
pub struct SurfaceDriver<S> {
    label: Arc<str>,
    surface: S,
    rx: UnboundedReceiver<ScriptCall>,
    executed: usize,
}

/// Attach `surface` under `label`.
pub fn attach<S: ScriptSurface>(label: impl Into<String>, surface: S) -> (SurfaceRef, SurfaceDriver<S>) {
    let label: Arc<str> = Arc::from(label.into());
    let (tx, rx) = unbounded_channel();
    debug!(surface = %label, "surface attached");
    (
        SurfaceRef { label: label.clone(), tx },
        SurfaceDriver { label, surface, rx, executed: 0 },
    )
}

impl<S: ScriptSurface> SurfaceDriver<S> {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    /// Total number of calls this driver has executed.
    pub fn executed(&self) -> usize {
        self.executed
    }

    /// Execute every call queued so far and return how many ran.
    /// Meant to be hooked into the host's own event loop.
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(call) = self.rx.try_recv() {
            self.execute(call);
            ran += 1;
        }
        ran
    }

    /// Execute calls as they arrive until every `SurfaceRef` is gone, then
    /// hand the surface back.
    pub async fn run(mut self) -> S {
        while let Some(call) = self.rx.recv().await {
            self.execute(call);
        }
        debug!(surface = %self.label, executed = self.executed, "surface driver finished");
        self.surface
    }

    pub fn into_surface(self) -> S {
        self.surface
    }

    fn execute(&mut self, call: ScriptCall) {
        let script = call.to_script();
        trace!(surface = %self.label, %script, "evaluating script");
        self.surface.evaluate_script(&script);
        self.executed += 1;
    }
}

impl<S> fmt::Debug for SurfaceDriver<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SurfaceDriver")
            .field("label", &self.label)
            .field("executed", &self.executed)
            .finish()
    }
}
