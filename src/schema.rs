use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Error;
use schemars::{JsonSchema, schema_for};

use crate::{config::BridgeConfig, host::HostEvent, registry::PluginInfo};

/// The entry point invoked by `main.rs` for `Commands::Schema`.
/// Returns the files it wrote.
pub fn write_schema(out_dir: &Path) -> Result<Vec<PathBuf>, Error> {
    fs::create_dir_all(out_dir)?;
    Ok(vec![
        write_one::<HostEvent>(out_dir, "host-event")?,
        write_one::<PluginInfo>(out_dir, "plugin-info")?,
        write_one::<BridgeConfig>(out_dir, "bridge-config")?,
    ])
}

fn write_one<T: JsonSchema>(out_dir: &Path, name: &str) -> Result<PathBuf, Error> {
    let schema = schema_for!(T);
    let path = out_dir.join(format!("{name}.schema.json"));
    fs::write(&path, serde_json::to_string_pretty(&schema)?)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use serde_json::Value;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn writes_host_event_schema() {
        let dir = tempdir().unwrap();
        let written = write_schema(dir.path()).unwrap();
        assert_eq!(written.len(), 3);

        let text = fs::read_to_string(dir.path().join("host-event.schema.json")).unwrap();
        let schema: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(schema["title"], "HostEvent");
        assert!(text.contains("surface_created"));
        assert!(text.contains("\"op\""));
    }
}
