use anyhow::{Context, Result};
use relay_hub::{HubConfig, SlowConsumerPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   config.toml:     [hub]
//                    pong_wait_secs = 30
//
//   env var:         SOCIAL_HUB__PONG_WAIT_SECS=30   (double underscore = nesting)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub hub: HubFileConfig,
    #[serde(default)]
    pub database: DatabaseFileConfig,
}

/// Listener settings (lives under `[server]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Interval between expired-session sweeps (0 = never)
    #[serde(default = "default_session_sweep_secs")]
    pub session_sweep_secs: u64,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            session_sweep_secs: default_session_sweep_secs(),
        }
    }
}

/// Message hub tunables (lives under `[hub]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HubFileConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    #[serde(default = "default_pong_wait_secs")]
    pub pong_wait_secs: u64,
    /// Keepalive interval in milliseconds; derived from `pong_wait_secs` when unset
    #[serde(default)]
    pub ping_period_ms: Option<u64>,
    #[serde(default = "default_write_wait_secs")]
    pub write_wait_secs: u64,
    #[serde(default = "default_max_coalesce")]
    pub max_coalesce: usize,
    #[serde(default)]
    pub slow_consumer: SlowConsumerPolicy,
}

impl Default for HubFileConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            max_message_size: default_max_message_size(),
            pong_wait_secs: default_pong_wait_secs(),
            ping_period_ms: None,
            write_wait_secs: default_write_wait_secs(),
            max_coalesce: default_max_coalesce(),
            slow_consumer: SlowConsumerPolicy::default(),
        }
    }
}

/// Database pool settings (lives under `[database]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseFileConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseFileConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_session_sweep_secs() -> u64 {
    3600
}
fn default_queue_capacity() -> usize {
    256
}
fn default_max_message_size() -> usize {
    512
}
fn default_pong_wait_secs() -> u64 {
    60
}
fn default_write_wait_secs() -> u64 {
    10
}
fn default_max_coalesce() -> usize {
    256
}
fn default_max_connections() -> u32 {
    5
}

/// Build a figment that layers: defaults → config.toml → SOCIAL_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `SOCIAL_SERVER__PORT=9000`  →  `server.port = 9000`
///   `SOCIAL_HUB__SLOW_CONSUMER=drop`  →  `hub.slow_consumer = "drop"`
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("SOCIAL_").split("__"))
}

impl FileConfig {
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to render config as TOML")
    }
}

// =============================================================================
// Runtime config structs (derived from FileConfig)
// =============================================================================

impl HubFileConfig {
    /// Runtime hub configuration. Fails if the keepalive timings are inconsistent.
    pub fn to_hub_config(&self) -> Result<HubConfig> {
        let pong_wait = Duration::from_secs(self.pong_wait_secs);
        let mut config = HubConfig::with_pong_wait(pong_wait);
        config.queue_capacity = self.queue_capacity;
        config.max_message_size = self.max_message_size;
        config.write_wait = Duration::from_secs(self.write_wait_secs);
        config.max_coalesce = self.max_coalesce.max(1);
        config.slow_consumer = self.slow_consumer;
        if let Some(ms) = self.ping_period_ms {
            config.ping_period = Duration::from_millis(ms);
        }
        config.validate().context("Invalid [hub] configuration")?;
        Ok(config)
    }
}

/// Server configuration for runtime behavior.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Expired-session sweep interval (None = disabled)
    pub session_sweep: Option<Duration>,
}

impl ServerConfig {
    pub fn from_file(fc: &ServerFileConfig) -> Self {
        Self {
            host: fc.host.clone(),
            port: fc.port,
            session_sweep: if fc.session_sweep_secs == 0 {
                None
            } else {
                Some(Duration::from_secs(fc.session_sweep_secs))
            },
        }
    }
}

// =============================================================================
// Directory layout config (not tunable via figment, derived from --data-dir)
// =============================================================================

#[derive(Clone, Debug)]
pub struct SocialConfig {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
}

impl SocialConfig {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("Could not find home directory")?
                .join(".social"),
        };

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        let db_path = data_dir.join("social.db");

        info!("Data directory: {}", data_dir.display());

        Ok(Self { data_dir, db_path })
    }

    pub fn db_url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.db_path.display())
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }
}
