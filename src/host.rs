//! A scripted stand-in for the embedding host: reads host events (one JSON
//! object per line) and drives the bridge with them.

use std::{
    collections::HashMap,
    fs::File,
    io::{self, BufRead, BufReader, Write},
    path::PathBuf,
};

use anyhow::{Context, Result, bail};
use bridge_plugin::{CallbackId, ScriptSurface, StructuredMap, SurfaceDriver, SurfaceRef, attach};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{bridge::Bridge, error::BridgeError};

/// What the host tells the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum HostEvent {
    /// A script surface came up.
    SurfaceCreated { label: String },
    /// The script side called `plugin.method`.
    Invoke {
        surface: String,
        plugin: String,
        method: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<StructuredMap>,
        callback: CallbackId,
        error: CallbackId,
    },
}

/// The effect of one event.
#[derive(Debug, Default, PartialEq)]
pub struct Applied {
    /// Scripts evaluated on surfaces while handling the event.
    pub scripts: usize,
    /// Set when the invoke was rejected by the bridge itself.
    pub rejection: Option<BridgeError>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplaySummary {
    pub events: usize,
    pub scripts: usize,
    pub rejected: usize,
}

type SurfaceFactory<S> = Box<dyn FnMut(&str) -> S>;

/// Owns the surfaces of a replay and pumps their drivers after each event.
pub struct HostSession<S: ScriptSurface> {
    bridge: Bridge,
    factory: SurfaceFactory<S>,
    surfaces: HashMap<String, (SurfaceRef, SurfaceDriver<S>)>,
}

impl<S: ScriptSurface> HostSession<S> {
    pub fn new(bridge: Bridge, factory: impl FnMut(&str) -> S + 'static) -> Self {
        Self {
            bridge,
            factory: Box::new(factory),
            surfaces: HashMap::new(),
        }
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    pub fn surface(&self, label: &str) -> Option<&S> {
        self.surfaces.get(label).map(|(_, driver)| driver.surface())
    }

    pub fn apply(&mut self, event: HostEvent) -> Result<Applied> {
        match event {
            HostEvent::SurfaceCreated { label } => {
                if self.surfaces.contains_key(&label) {
                    bail!("surface `{label}` already exists");
                }
                let (surface, driver) = attach(label.clone(), (self.factory)(&label));
                self.bridge.notify_surface_created(&surface);
                self.surfaces.insert(label, (surface, driver));
                Ok(Applied { scripts: self.pump(), rejection: None })
            }
            HostEvent::Invoke { surface, plugin, method, payload, callback, error } => {
                let Some((target, _)) = self.surfaces.get(&surface) else {
                    bail!("invoke on unknown surface `{surface}`");
                };
                let target = target.clone();
                let rejection = self
                    .bridge
                    .invoke_plugin(&target, &plugin, &method, payload.unwrap_or_default(), callback, error)
                    .err();
                if let Some(err) = &rejection {
                    debug!(%plugin, %method, kind = err.kind(), "invoke rejected");
                }
                Ok(Applied { scripts: self.pump(), rejection })
            }
        }
    }

    /// Apply every event in `input`. Blank lines and lines starting with `#`
    /// are skipped.
    pub fn replay<R: BufRead>(&mut self, input: R) -> Result<ReplaySummary> {
        let mut summary = ReplaySummary::default();
        for (index, line) in input.lines().enumerate() {
            let line_no = index + 1;
            let line = line.with_context(|| format!("reading line {line_no}"))?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let event: HostEvent =
                serde_json::from_str(trimmed).with_context(|| format!("line {line_no}: not a host event"))?;
            let applied = self.apply(event).with_context(|| format!("line {line_no}"))?;
            summary.events += 1;
            summary.scripts += applied.scripts;
            if applied.rejection.is_some() {
                summary.rejected += 1;
            }
        }
        info!(events = summary.events, scripts = summary.scripts, rejected = summary.rejected, "replay finished");
        Ok(summary)
    }

    fn pump(&mut self) -> usize {
        self.surfaces
            .values_mut()
            .map(|(_, driver)| driver.run_pending())
            .sum()
    }
}

/// Replay `file`, or stdin when `None`, against `bridge` with every surface
/// printing to stdout. Reading happens on tokio's blocking pool; the bridge is
/// cleared once the input is exhausted.
pub async fn replay_to_stdout(bridge: Bridge, file: Option<PathBuf>) -> Result<ReplaySummary> {
    tokio::task::spawn_blocking(move || -> Result<ReplaySummary> {
        let mut session = HostSession::new(bridge, StdoutSurface::new);
        let summary = match &file {
            Some(path) => {
                let input = File::open(path).with_context(|| format!("opening {}", path.display()))?;
                session.replay(BufReader::new(input))
            }
            None => session.replay(io::stdin().lock()),
        };
        session.bridge().clear();
        summary
    })
    .await?
}

/// Prints each script it is asked to evaluate, prefixed by its label.
#[derive(Debug)]
pub struct StdoutSurface {
    label: String,
}

impl StdoutSurface {
    pub fn new(label: &str) -> Self {
        Self { label: label.to_string() }
    }
}

impl ScriptSurface for StdoutSurface {
    fn evaluate_script(&mut self, script: &str) {
        let mut out = std::io::stdout().lock();
        if let Err(err) = writeln!(out, "[{}] {script}", self.label) {
            warn!(surface = %self.label, error = %err, "could not write script");
        }
    }
}
