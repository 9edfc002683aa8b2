use crate::error::GitSyncError;
use crate::odb::Database;
use crate::odb::localstore::ObjectStoreDatabase;
use crate::odb::mongo::MongoDatabase;
use serde::{Deserialize, Serialize};
use std::env::var;
use std::sync::Arc;
use std::time::Duration;

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(default)]
pub struct AppConfig {
    pub node: NodeConfig,
    pub storage: StorageConfig,
    pub fetcher: FetcherConfig,
    pub sync: SyncConfig,
    pub producer: ProducerConfig,
    pub push: PushConfig,
}

impl AppConfig {
    /// Loads the configuration named by `CONFIG_FILE` (default `config.toml`).
    ///
    /// A missing file is replaced by the defaults, which are also written back to
    /// disk. A file that exists but does not parse is an error.
    pub fn load() -> Result<Self, GitSyncError> {
        let config_file_path = var("CONFIG_FILE").unwrap_or("config.toml".to_string());
        let config_content = match std::fs::read_to_string(&config_file_path) {
            Ok(content) => content,
            Err(_) => {
                let config = AppConfig::default();
                config.save()?;
                return Ok(config);
            }
        };
        Self::from_toml(&config_content)
    }

    pub fn from_toml(content: &str) -> Result<Self, GitSyncError> {
        Ok(toml::from_str(content)?)
    }

    pub fn save(&self) -> Result<(), GitSyncError> {
        let config_file_path = var("CONFIG_FILE").unwrap_or("config.toml".to_string());
        let toml_str = toml::to_string_pretty(self)
            .map_err(|e| GitSyncError::Config(e.to_string()))?;
        std::fs::write(config_file_path, toml_str)?;
        Ok(())
    }
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(default)]
pub struct NodeConfig {
    /// Prefix under which this node answers push and admin commands. Also the
    /// custodian recorded for branches created here.
    pub cmd_prefix: String,
    /// Optional second command prefix for clients on the same host.
    pub local_cmd_prefix: Option<String>,
    pub git_prefix: String,
    /// Period of the task metrics log line; `0` turns it off.
    pub metrics_interval_secs: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            cmd_prefix: "/gitsync/node".to_string(),
            local_cmd_prefix: Some("/localhost/gitsync".to_string()),
            git_prefix: "/git".to_string(),
            metrics_interval_secs: 60,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    Memory,
    Local { path: String },
    Mongodb { url: String, database: String },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Local {
            path: "./data".to_string(),
        }
    }
}

impl StorageConfig {
    pub async fn open(&self) -> Result<Arc<dyn Database>, GitSyncError> {
        match self {
            StorageConfig::Memory => Ok(Arc::new(ObjectStoreDatabase::in_memory())),
            StorageConfig::Local { path } => Ok(Arc::new(ObjectStoreDatabase::local(path)?)),
            StorageConfig::Mongodb { url, database } => {
                let db = MongoDatabase::connect(url, database).await?;
                db.ensure_index(crate::odb::OBJECTS_COLLECTION).await?;
                db.ensure_index(crate::odb::REPOS_COLLECTION).await?;
                Ok(Arc::new(db))
            }
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(default)]
pub struct FetcherConfig {
    pub max_in_flight: usize,
    pub attempts: u32,
    pub retry_interval_ms: u64,
    pub request_lifetime_ms: u64,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 20,
            attempts: 3,
            retry_interval_ms: 1000,
            request_lifetime_ms: 4000,
        }
    }
}

impl FetcherConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn request_lifetime(&self) -> Duration {
        Duration::from_millis(self.request_lifetime_ms)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(default)]
pub struct SyncConfig {
    pub min_interval_ms: u64,
    pub max_interval_ms: u64,
    pub lifetime_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 1000,
            max_interval_ms: 2000,
            lifetime_ms: 1000,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(default)]
pub struct ProducerConfig {
    pub freshness_ms: u64,
    pub segment_size: usize,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            freshness_ms: 60000,
            segment_size: 8000,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(default)]
pub struct PushConfig {
    /// How long a finished push outcome stays queryable.
    pub status_retention_secs: u64,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            status_retention_secs: 3600,
        }
    }
}
