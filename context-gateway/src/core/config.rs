use anyhow::{Result, bail};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use context_memory::{BackendKind, CacheConfig, ContextConfig, StorageConfig};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

const DATA_DIR: &str = ".mcp-ai-collab";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub storage: StorageSettings,
    pub context: ContextSettings,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageSettings {
    pub backend: String,
    pub file_root: PathBuf,
    pub database_path: PathBuf,
    pub cache_ttl_seconds: u64,
    #[serde(default)]
    pub cache_window: Option<usize>,
    pub cache_max_entries: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ContextSettings {
    pub retention_limit: usize,
    pub stale_after_days: u64,
    pub maintenance_interval_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct LogConfig {
    #[serde(default)]
    pub format: LogFormat,
}

fn data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(DATA_DIR))
        .unwrap_or_else(|| PathBuf::from(DATA_DIR))
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        Self::defaults()?
            .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::with_prefix("CONTEXT_KEEPER").separator("__"))
            .build()?
            .try_deserialize()
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        let data_dir = data_dir();

        Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8765)?
            .set_default("storage.backend", "file")?
            .set_default(
                "storage.file_root",
                data_dir.join("contexts").to_string_lossy().into_owned(),
            )?
            .set_default(
                "storage.database_path",
                data_dir.join("context.db").to_string_lossy().into_owned(),
            )?
            .set_default("storage.cache_ttl_seconds", 3600)?
            .set_default("storage.cache_max_entries", 1000)?
            .set_default("context.retention_limit", 20)?
            .set_default("context.stale_after_days", 30)?
            .set_default("context.maintenance_interval_seconds", 300)?
            .set_default("log.format", "pretty")
    }

    pub fn storage_config(&self) -> Result<StorageConfig> {
        let storage = &self.storage;
        let config = match storage.backend.parse::<BackendKind>()? {
            BackendKind::File => StorageConfig::File {
                root: storage.file_root.clone(),
            },
            BackendKind::Sqlite => StorageConfig::Sqlite {
                path: storage.database_path.clone(),
            },
            BackendKind::Tiered => StorageConfig::Tiered {
                path: storage.database_path.clone(),
                cache: CacheConfig {
                    ttl: Duration::from_secs(storage.cache_ttl_seconds),
                    window: storage.cache_window,
                    max_entries: storage.cache_max_entries,
                },
            },
        };
        Ok(config)
    }

    pub fn context_config(&self) -> Result<ContextConfig> {
        let config = ContextConfig {
            retention_limit: self.context.retention_limit,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.context.stale_after_days * 24 * 60 * 60)
    }

    pub fn maintenance_interval(&self) -> Result<Duration> {
        if self.context.maintenance_interval_seconds == 0 {
            bail!("context.maintenance_interval_seconds must be at least 1");
        }
        Ok(Duration::from_secs(
            self.context.maintenance_interval_seconds,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn with_toml(toml: &str) -> Settings {
        Settings::defaults()
            .unwrap()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let settings = with_toml("");
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 8765);
        assert_eq!(settings.context.retention_limit, 20);
        assert_eq!(settings.log.format, LogFormat::Pretty);
        assert!(settings.storage.file_root.ends_with("contexts"));
        assert!(settings.storage.cache_window.is_none());
        assert!(matches!(
            settings.storage_config().unwrap(),
            StorageConfig::File { .. }
        ));
        assert_eq!(settings.stale_after(), Duration::from_secs(30 * 86400));
    }

    #[test]
    fn test_tiered_backend_from_file() {
        let settings = with_toml(
            r#"
            [storage]
            backend = "tiered"
            cache_ttl_seconds = 60
            cache_window = 8

            [log]
            format = "json"
            "#,
        );

        assert_eq!(settings.log.format, LogFormat::Json);
        match settings.storage_config().unwrap() {
            StorageConfig::Tiered { path, cache } => {
                assert!(path.ends_with("context.db"));
                assert_eq!(cache.ttl, Duration::from_secs(60));
                assert_eq!(cache.window, Some(8));
                assert_eq!(cache.max_entries, 1000);
            },
            other => panic!("unexpected storage config: {other:?}"),
        }
    }

    #[test]
    fn test_invalid_values_rejected() {
        let settings = with_toml(
            r#"
            [storage]
            backend = "redis"

            [context]
            retention_limit = 0
            maintenance_interval_seconds = 0
            "#,
        );

        assert!(settings.storage_config().is_err());
        assert!(settings.context_config().is_err());
        assert!(settings.maintenance_interval().is_err());
    }
}
