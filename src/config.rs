use std::{env, fmt, path::PathBuf};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use bridge_plugin::LogLevel;
use dashmap::DashMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{logger::LogConfig, registry::DuplicatePolicy};

/// A key/value configuration source.
#[async_trait]
pub trait ConfigManagerType: Send + Sync + fmt::Debug {
    async fn as_vec(&self) -> Vec<(String, String)> {
        let mut config = vec![];
        for key in self.keys().await {
            if let Some(value) = self.get(&key).await {
                config.push((key, value));
            }
        }
        config
    }
    async fn keys(&self) -> Vec<String>;
    async fn get(&self, key: &str) -> Option<String>;
    async fn del(&self, key: &str);
    async fn set(&self, key: &str, value: &str) -> Result<(), String>;
}

#[derive(Debug)]
pub struct ConfigManager(pub Box<dyn ConfigManagerType>);

/// Reads the process environment, seeded once from an optional `.env` file.
/// Writes only touch the running process.
#[derive(Debug)]
pub struct EnvConfigManager {
    env_file: PathBuf,
}

impl EnvConfigManager {
    pub fn new(env_file: PathBuf) -> Box<Self> {
        if env_file.exists() {
            match dotenvy::from_path(&env_file) {
                Ok(()) => info!("Loaded .env from {}", env_file.display()),
                Err(err) => warn!("could not parse {}: {err}", env_file.display()),
            }
        }
        Box::new(Self { env_file })
    }
}

#[async_trait]
impl ConfigManagerType for EnvConfigManager {
    async fn keys(&self) -> Vec<String> {
        env::vars().map(|(k, _)| k).collect()
    }

    async fn get(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), String> {
        unsafe {
            env::set_var(key, value);
        };
        Ok(())
    }

    async fn del(&self, key: &str) {
        unsafe {
            env::remove_var(key);
        };
    }
}

#[derive(Debug, Default)]
pub struct MapConfigManager {
    map: DashMap<String, String>,
}

impl MapConfigManager {
    pub fn new() -> Box<Self> {
        Box::default()
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Box<Self> {
        let mgr = Self::new();
        for (k, v) in pairs {
            mgr.map.insert(k.to_string(), v.to_string());
        }
        mgr
    }
}

#[async_trait]
impl ConfigManagerType for MapConfigManager {
    async fn keys(&self) -> Vec<String> {
        self.map.iter().map(|entry| entry.key().clone()).collect()
    }

    async fn get(&self, key: &str) -> Option<String> {
        self.map.get(key).map(|v| v.clone())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), String> {
        self.map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn del(&self, key: &str) {
        self.map.remove(key);
    }
}

/// Settings the bridge reads at start-up.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BridgeConfig {
    pub duplicate_policy: DuplicatePolicy,
    pub log: LogConfig,
}

impl BridgeConfig {
    pub const DUPLICATE_POLICY: &'static str = "BRIDGE_DUPLICATE_POLICY";
    pub const LOG_LEVEL: &'static str = "BRIDGE_LOG_LEVEL";
    pub const LOG_DIR: &'static str = "BRIDGE_LOG_DIR";

    /// Build the configuration from `config`. Missing keys keep their
    /// defaults, malformed values are errors.
    pub async fn load(config: &ConfigManager) -> Result<Self> {
        let mut cfg = Self::default();

        if let Some(raw) = config.0.get(Self::DUPLICATE_POLICY).await {
            cfg.duplicate_policy = raw.trim().parse().map_err(|_| {
                anyhow!("invalid {} `{raw}`: expected `replace` or `reject`", Self::DUPLICATE_POLICY)
            })?;
        }
        if let Some(raw) = config.0.get(Self::LOG_LEVEL).await {
            cfg.log.log_level = raw
                .trim()
                .parse::<LogLevel>()
                .map_err(|_| anyhow!("invalid {} `{raw}`", Self::LOG_LEVEL))?;
        }
        if let Some(raw) = config.0.get(Self::LOG_DIR).await {
            let raw = raw.trim();
            if !raw.is_empty() {
                cfg.log.log_dir = Some(PathBuf::from(raw));
            }
        }
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::write;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_map_config_manager_basic() {
        let mgr = MapConfigManager::new();

        mgr.set("foo", "bar").await.unwrap();
        assert_eq!(mgr.get("foo").await, Some("bar".to_string()));

        mgr.set("foo", "baz").await.unwrap();
        assert_eq!(mgr.get("foo").await, Some("baz".to_string()));

        assert_eq!(mgr.keys().await, vec!["foo".to_string()]);

        mgr.del("foo").await;
        assert_eq!(mgr.get("foo").await, None);
    }

    #[tokio::test]
    async fn test_map_config_manager_as_vec() {
        let mgr = MapConfigManager::from_pairs([("a", "1"), ("b", "2")]);

        let mut config = mgr.as_vec().await;
        config.sort(); // ensure deterministic order for test

        assert_eq!(
            config,
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_env_config_manager_reads_env_file() {
        let dir = tempdir().unwrap();
        let env_path = dir.path().join(".env");
        write(&env_path, "BRIDGE_TEST_ENV_FILE_KEY=from-file\n").unwrap();

        let mgr = EnvConfigManager::new(env_path);

        assert_eq!(mgr.get("BRIDGE_TEST_ENV_FILE_KEY").await, Some("from-file".to_string()));
        mgr.del("BRIDGE_TEST_ENV_FILE_KEY").await;
        assert_eq!(mgr.get("BRIDGE_TEST_ENV_FILE_KEY").await, None);
    }

    #[tokio::test]
    async fn test_bridge_config_defaults() {
        let config = ConfigManager(MapConfigManager::new());
        let cfg = BridgeConfig::load(&config).await.unwrap();

        assert_eq!(cfg, BridgeConfig::default());
        assert_eq!(cfg.duplicate_policy, DuplicatePolicy::Replace);
        assert_eq!(cfg.log.log_level, LogLevel::Info);
        assert!(cfg.log.log_dir.is_none());
    }

    #[tokio::test]
    async fn test_bridge_config_reads_every_key() {
        let config = ConfigManager(MapConfigManager::from_pairs([
            (BridgeConfig::DUPLICATE_POLICY, " Reject "),
            (BridgeConfig::LOG_LEVEL, "debug"),
            (BridgeConfig::LOG_DIR, "/tmp/bridge-logs"),
        ]));
        let cfg = BridgeConfig::load(&config).await.unwrap();

        assert_eq!(cfg.duplicate_policy, DuplicatePolicy::Reject);
        assert_eq!(cfg.log.log_level, LogLevel::Debug);
        assert_eq!(cfg.log.log_dir, Some(PathBuf::from("/tmp/bridge-logs")));
    }

    #[tokio::test]
    async fn test_bridge_config_rejects_bad_values() {
        let config = ConfigManager(MapConfigManager::from_pairs([(BridgeConfig::DUPLICATE_POLICY, "merge")]));
        let err = BridgeConfig::load(&config).await.unwrap_err();
        assert!(err.to_string().contains("BRIDGE_DUPLICATE_POLICY"));

        let config = ConfigManager(MapConfigManager::from_pairs([(BridgeConfig::LOG_LEVEL, "loud")]));
        assert!(BridgeConfig::load(&config).await.is_err());
    }
}
