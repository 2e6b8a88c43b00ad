use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub web: WebConfig,
    pub storage: StorageConfig,
    pub cache: CacheConfig,
    pub tasks: TasksConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
    pub base_url: String,
    /// Callers presenting this key in `X-Api-Key` are treated as
    /// authenticated for cache partitioning. Not an access control.
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub coactivation_path: PathBuf,
    pub connectivity_path: PathBuf,
    pub decoding_path: PathBuf,
    pub scatterplot_path: PathBuf,
    pub gene_path: PathBuf,
    pub voxel_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Response cache time-to-live in seconds
    pub ttl_seconds: u64,
    /// Upper bound on cached responses held at once
    pub capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TasksConfig {
    /// External analysis tool invoked for coactivation/decoding/scatter jobs
    pub tool_command: String,
    /// Hard limit on a single job's run time
    pub execution_timeout_seconds: u64,
    /// How long a request handler waits for a job before degrading
    pub wait_timeout_seconds: u64,
    /// Queue depth before submissions start failing fast
    pub queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://./neuromap.db".to_string(),
                max_connections: Some(10),
            },
            web: WebConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                base_url: "http://localhost:8080".to_string(),
                api_key: None,
            },
            storage: StorageConfig {
                coactivation_path: PathBuf::from("./data/images/coactivation"),
                connectivity_path: PathBuf::from("./data/images/fcmri"),
                decoding_path: PathBuf::from("./data/decoding"),
                scatterplot_path: PathBuf::from("./data/scatterplots"),
                gene_path: PathBuf::from("./data/images/genes"),
                voxel_path: PathBuf::from("./data/voxel"),
            },
            cache: CacheConfig {
                ttl_seconds: 3600,
                capacity: 10_000,
            },
            tasks: TasksConfig {
                tool_command: "neurotool".to_string(),
                execution_timeout_seconds: 600,
                wait_timeout_seconds: 120,
                queue_capacity: 256,
            },
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_file =
            std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".to_string());

        if std::path::Path::new(&config_file).exists() {
            let contents = std::fs::read_to_string(&config_file)?;
            Ok(toml::from_str(&contents)?)
        } else {
            let default_config = Self::default();
            let contents = toml::to_string_pretty(&default_config)?;
            std::fs::create_dir_all("./data/images")?;
            std::fs::create_dir_all("./data/decoding")?;
            std::fs::write(&config_file, contents)?;
            Ok(default_config)
        }
    }
}
