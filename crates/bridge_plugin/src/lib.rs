pub mod invoke;
pub mod message;
pub mod plugin;
pub mod response;
pub mod surface;

#[cfg(any(test, feature = "test-utils"))]
pub mod plugin_test_util;

pub use invoke::{Invoke, InvokeError, InvokeState};
pub use message::{CallbackId, ScriptCall, StructuredMap};
pub use plugin::{LogLevel, MethodTable, Plugin, PluginError};
pub use surface::{ScriptSurface, SurfaceDriver, SurfaceError, SurfaceRef, attach};
