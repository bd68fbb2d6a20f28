// src/config_mod.rs
// Layered application configuration: built-in defaults, an optional TOML
// file, then MINDPATH__SECTION__KEY environment variables.

use std::fmt;
use std::path::Path;

use config::{Config, Environment, File};
use grid_engine::{GridBounds, GridError};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILE: &str = "mindpath.toml";
pub const ENV_PREFIX: &str = "MINDPATH";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid grid settings: {0}")]
    Grid(#[from] GridError),

    #[error("Invalid setting {key}: {reason}")]
    Invalid { key: String, reason: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageSettings,
    pub cortex: CortexConfig,
    pub block: CommandBlockSettings,
    pub grid: GridSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Directory holding `index.html`, the page script and the wasm package.
    pub static_dir: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            static_dir: "static".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// `memory` or `sqlite`.
    pub backend: String,
    pub sqlite_path: String,
    pub collection: String,
    /// Template served to a `ready` event that names no id.
    pub default_password_id: i64,
    /// Clear the collection and insert the demo document at startup.
    pub seed_on_start: bool,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            sqlite_path: "./mindpath.sqlite".to_string(),
            collection: "passwords".to_string(),
            default_password_id: 99,
            seed_on_start: false,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CortexConfig {
    pub enabled: bool,
    pub url: String,
    pub client_id: String,
    pub client_secret: String,
    pub license: Option<String>,
    pub debit: u32,
    /// Training profile loaded after the session opens.
    pub profile: Option<String>,
    /// The local Cortex service presents a self-signed certificate.
    pub accept_invalid_certs: bool,
    pub request_timeout_ms: u64,
}

impl Default for CortexConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "wss://localhost:6868".to_string(),
            client_id: String::new(),
            client_secret: String::new(),
            license: None,
            debit: 1,
            profile: None,
            accept_invalid_certs: true,
            request_timeout_ms: 10_000,
        }
    }
}

impl fmt::Debug for CortexConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CortexConfig")
            .field("enabled", &self.enabled)
            .field("url", &self.url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("debit", &self.debit)
            .field("profile", &self.profile)
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandBlockSettings {
    pub block_time_ms: u64,
    /// A command whose accumulated power exceeds this ends the block early.
    pub threshold: f64,
    /// Upper bound accepted from clients overriding `block_time_ms`.
    pub max_block_time_ms: u64,
}

impl Default for CommandBlockSettings {
    fn default() -> Self {
        Self {
            block_time_ms: 8000,
            threshold: 30.0,
            max_block_time_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GridSettings {
    pub xpoints: i32,
    pub ypoints: i32,
    pub path_length: usize,
}

impl Default for GridSettings {
    fn default() -> Self {
        Self { xpoints: 5, ypoints: 5, path_length: 8 }
    }
}

impl GridSettings {
    pub fn bounds(&self) -> Result<GridBounds, GridError> {
        GridBounds::new(self.xpoints, self.ypoints)
    }
}

impl AppConfig {
    /// Load configuration. An explicit `path` must exist; otherwise
    /// `mindpath.toml` in the working directory is used when present.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(p) => File::from(p).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let loaded: AppConfig = Config::builder()
            .add_source(Config::try_from(&AppConfig::default())?)
            .add_source(file)
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__").try_parsing(true))
            .build()?
            .try_deserialize()?;

        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let bounds = self.grid.bounds()?;
        if self.grid.path_length >= bounds.node_count() {
            return Err(ConfigError::Invalid {
                key: "grid.path_length".to_string(),
                reason: format!("must be below {}", bounds.node_count()),
            });
        }
        if !matches!(self.storage.backend.as_str(), "memory" | "sqlite") {
            return Err(ConfigError::Invalid {
                key: "storage.backend".to_string(),
                reason: format!("unknown backend '{}'", self.storage.backend),
            });
        }
        if self.block.block_time_ms == 0 || self.block.block_time_ms > self.block.max_block_time_ms {
            return Err(ConfigError::Invalid {
                key: "block.block_time_ms".to_string(),
                reason: format!("must be between 1 and {}", self.block.max_block_time_ms),
            });
        }
        Ok(())
    }
}
