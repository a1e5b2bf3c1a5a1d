use std::{fs, path::PathBuf};

use anyhow::Result;
use bridge_plugin::LogLevel;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};

/// Target of the one-line-per-invoke JSON report.
pub const INVOKE_TARGET: &str = "invoke";

pub const LOG_FILE: &str = "plugin-bridge.log";
pub const INVOKE_FILE: &str = "plugin-bridge-invokes.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub struct LogConfig {
    pub log_level: LogLevel,
    /// When set, logs go to daily rolling files in this directory instead of stderr.
    pub log_dir: Option<PathBuf>,
}

impl LogConfig {
    pub fn new(log_level: LogLevel, log_dir: Option<PathBuf>) -> Self {
        Self { log_level, log_dir }
    }

    /// `RUST_LOG` wins over the configured level.
    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.log_level.as_directive()))
    }
}

/// Install the global subscriber.
///
/// Without a log dir everything is written to stderr. With one, text logs go
/// to `plugin-bridge.log` and every dispatched invoke is reported as a JSON
/// line (target `invoke`) in `plugin-bridge-invokes.json`, both rotated daily.
pub fn init_tracing(config: &LogConfig) -> Result<()> {
    match &config.log_dir {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            let txt_appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(LOG_FILE)
                .build(dir)?;
            let json_appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(INVOKE_FILE)
                .build(dir)?;

            let txt_layer = fmt::layer()
                .with_writer(txt_appender)
                .with_ansi(false)
                .with_filter(config.env_filter());
            let json_layer = fmt::layer()
                .json()
                .with_writer(json_appender)
                .with_target(true)
                .with_filter(EnvFilter::new(format!("{INVOKE_TARGET}=info")));

            Registry::default().with(txt_layer).with(json_layer).try_init()?;
        }
        None => {
            let stderr_layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(config.env_filter());
            Registry::default().with(stderr_layer).try_init()?;
        }
    }
    Ok(())
}
