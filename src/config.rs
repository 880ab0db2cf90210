//! Configuration types for convert-relay
//!
//! Every field has a default, so `Config::default()` runs out of the box.
//! [`Config::from_env`] layers an optional JSON file and environment
//! overrides on top of the defaults.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, time::Duration};
use utoipa::ToSchema;

/// Main configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct Config {
    /// HTTP API settings
    #[serde(default)]
    pub api: ApiConfig,

    /// Temporary artifact storage and reaping
    #[serde(default)]
    pub storage: StorageConfig,

    /// External tool invocation
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Push channel settings
    #[serde(default)]
    pub events: EventsConfig,
}

/// REST API configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiConfig {
    /// Address to bind to (default: 0.0.0.0:5000)
    #[serde(default = "default_bind_address")]
    #[schema(value_type = String)]
    pub bind_address: SocketAddr,

    /// Enable CORS for browser access (default: true)
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed CORS origins (default: ["*"])
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Enable Swagger UI at /swagger-ui (default: true)
    #[serde(default = "default_true")]
    pub swagger_ui: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            cors_enabled: true,
            cors_origins: default_cors_origins(),
            swagger_ui: true,
        }
    }
}

/// Temporary artifact storage
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct StorageConfig {
    /// Root directory for in-progress artifacts (default: "./temp")
    #[serde(default = "default_temp_dir")]
    #[schema(value_type = String)]
    pub temp_dir: PathBuf,

    /// How often the reaper sweeps the temp root, in seconds (default: 3600)
    #[serde(default = "default_reap_interval", with = "duration_serde")]
    #[schema(value_type = u64)]
    pub reap_interval: Duration,

    /// Age after which an entry is considered stale, in seconds (default: 3600)
    #[serde(default = "default_max_artifact_age", with = "duration_serde")]
    #[schema(value_type = u64)]
    pub max_artifact_age: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            temp_dir: default_temp_dir(),
            reap_interval: default_reap_interval(),
            max_artifact_age: default_max_artifact_age(),
        }
    }
}

/// External tool configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ToolsConfig {
    /// Path to the yt-dlp compatible binary (auto-detected on PATH if None)
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub tool_path: Option<PathBuf>,

    /// Cookie jar passed to both stages when the file exists
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub cookies_file: Option<PathBuf>,

    /// Format selector for the fetch+mux stage (default: "bestvideo+bestaudio/best")
    #[serde(default = "default_format")]
    pub format: String,

    /// Container produced by the mux step; also the artifact extension (default: "mp4")
    #[serde(default = "default_merge_output_format")]
    pub merge_output_format: String,

    /// Per-stage timeout in seconds (None = wait indefinitely)
    #[serde(default, with = "optional_duration_serde")]
    #[schema(value_type = Option<u64>)]
    pub stage_timeout: Option<Duration>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            tool_path: None,
            cookies_file: None,
            format: default_format(),
            merge_output_format: default_merge_output_format(),
            stage_timeout: None,
        }
    }
}

/// Push channel configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct EventsConfig {
    /// Keep-alive comment interval in seconds (default: 15)
    #[serde(default = "default_keep_alive", with = "duration_serde")]
    #[schema(value_type = u64)]
    pub keep_alive: Duration,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            keep_alive: default_keep_alive(),
        }
    }
}

/// Environment overrides recognised by [`Config::from_env`]
#[derive(Debug, Default, Deserialize)]
struct EnvOverrides {
    port: Option<u16>,
    relay_config: Option<PathBuf>,
    relay_temp_dir: Option<PathBuf>,
    relay_tool_path: Option<PathBuf>,
    relay_cookies_file: Option<PathBuf>,
    relay_stage_timeout_secs: Option<u64>,
}

impl Config {
    /// Build the configuration from the process environment
    ///
    /// Order of precedence (last wins):
    /// 1. built-in defaults
    /// 2. JSON file named by `RELAY_CONFIG`
    /// 3. `PORT`, `RELAY_TEMP_DIR`, `RELAY_TOOL_PATH`, `RELAY_COOKIES_FILE`,
    ///    `RELAY_STAGE_TIMEOUT_SECS`
    ///
    /// A `.env` file in the working directory is loaded first if present.
    pub fn from_env() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!(path = %path.display(), "loaded .env file"),
            Err(e) if e.not_found() => {}
            Err(e) => tracing::warn!(error = %e, "Failed to load .env file"),
        }

        let overrides: EnvOverrides = envy::from_env().map_err(|e| Error::Config {
            message: e.to_string(),
            key: None,
        })?;

        let config = match &overrides.relay_config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        let config = config.with_overrides(overrides);
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("cannot read {}: {}", path.display(), e),
            key: Some("RELAY_CONFIG".to_string()),
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| Error::Config {
            message: format!("invalid config file {}: {}", path.display(), e),
            key: Some("RELAY_CONFIG".to_string()),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that cannot drive the relay
    ///
    /// Periodic tasks need a non-zero period, and a zero stage timeout would
    /// fail every job before the tool starts.
    pub fn validate(&self) -> Result<()> {
        let zero_durations = [
            ("storage.reap_interval", Some(self.storage.reap_interval)),
            ("events.keep_alive", Some(self.events.keep_alive)),
            ("tools.stage_timeout", self.tools.stage_timeout),
        ];
        for (key, value) in zero_durations {
            if value.is_some_and(|d| d.is_zero()) {
                return Err(Error::Config {
                    message: format!("{key} must be greater than zero"),
                    key: Some(key.to_string()),
                });
            }
        }
        if self.tools.merge_output_format.trim().is_empty() {
            return Err(Error::Config {
                message: "tools.merge_output_format must not be empty".to_string(),
                key: Some("tools.merge_output_format".to_string()),
            });
        }
        Ok(())
    }

    fn with_overrides(mut self, overrides: EnvOverrides) -> Self {
        if let Some(port) = overrides.port {
            self.api.bind_address.set_port(port);
        }
        if let Some(dir) = overrides.relay_temp_dir {
            self.storage.temp_dir = dir;
        }
        if let Some(path) = overrides.relay_tool_path {
            self.tools.tool_path = Some(path);
        }
        if let Some(path) = overrides.relay_cookies_file {
            self.tools.cookies_file = Some(path);
        }
        if let Some(secs) = overrides.relay_stage_timeout_secs {
            self.tools.stage_timeout = Some(Duration::from_secs(secs));
        }
        self
    }

    /// Extension of produced artifacts (the merge output container)
    pub fn artifact_extension(&self) -> &str {
        &self.tools.merge_output_format
    }
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 5000))
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_true() -> bool {
    true
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("./temp")
}

fn default_reap_interval() -> Duration {
    Duration::from_secs(3600)
}

fn default_max_artifact_age() -> Duration {
    Duration::from_secs(3600)
}

fn default_format() -> String {
    "bestvideo+bestaudio/best".to_string()
}

fn default_merge_output_format() -> String {
    "mp4".to_string()
}

fn default_keep_alive() -> Duration {
    Duration::from_secs(15)
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Optional Duration serialization helper
mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}
