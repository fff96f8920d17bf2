//! Server configuration.
//!
//! Configuration can be loaded from:
//! - TOML configuration file (`huddle.toml`, `/etc/huddle/huddle.toml`,
//!   `~/.config/huddle/huddle.toml`, or the path in `HUDDLE_CONFIG`)
//! - Plain deployment variables (`PORT`, `REDIS_URL`, `AUTH_TOKEN`, ...)
//! - Environment variables (`HUDDLE_*`, `__` between section and key,
//!   e.g. `HUDDLE_STORE__REDIS_URL`)
//!
//! Later sources override earlier ones.

use anyhow::{bail, Context, Result};
use huddle_core::HubConfig;
use huddle_transport::PumpSettings;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "HUDDLE_CONFIG";

const CONFIG_PATHS: [&str; 3] = [
    "huddle.toml",
    "/etc/huddle/huddle.toml",
    "~/.config/huddle/huddle.toml",
];

/// Unprefixed variables set by hosting platforms, and the keys they fill.
const DEPLOYMENT_VARS: [(&str, &str); 8] = [
    ("PORT", "port"),
    ("REDIS_URL", "store.redis_url"),
    ("AUTH_TOKEN", "security.auth_token"),
    ("ALLOWED_ORIGINS", "security.allowed_origins"),
    ("RATE_LIMIT", "security.rate_limit_per_minute"),
    ("MAX_MESSAGE_SIZE", "limits.max_message_size"),
    ("MESSAGE_TTL_HOURS", "store.ttl_hours"),
    ("MAX_MESSAGES_PER_ROOM", "store.max_messages_per_room"),
];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,

    /// Directory served at `/` for the web client. Nothing is served when unset.
    #[serde(default)]
    pub static_dir: Option<PathBuf>,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// History store configuration.
    #[serde(default)]
    pub store: StoreConfig,

    /// Admission control.
    #[serde(default)]
    pub security: SecurityConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum inbound WebSocket message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Per-client outbound queue capacity, in frames.
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,

    /// History messages replayed to a joining client.
    #[serde(default = "default_history_replay")]
    pub history_replay: usize,

    /// Hub intake queue capacity.
    #[serde(default = "default_queue")]
    pub intake_queue: usize,

    /// Persistence writer queue capacity.
    #[serde(default = "default_queue")]
    pub persistence_queue: usize,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// How long to wait for any frame from a client, in milliseconds.
    /// Pings are sent at 9/10 of this.
    #[serde(default = "default_pong_wait")]
    pub pong_wait_ms: u64,

    /// Deadline for a single write, in milliseconds.
    #[serde(default = "default_write_wait")]
    pub write_wait_ms: u64,
}

/// History store backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Keep no history.
    None,
    /// In-process history, lost on restart.
    Memory,
    /// Redis lists.
    Redis,
}

/// History store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backend to use. Defaults to `redis` when `redis_url` is set, otherwise `none`.
    #[serde(default)]
    pub backend: Option<StoreBackend>,

    /// Redis connection URL.
    #[serde(default)]
    pub redis_url: Option<String>,

    /// How long history is kept, in hours.
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: u64,

    /// Maximum messages kept per room.
    #[serde(default = "default_max_messages_per_room")]
    pub max_messages_per_room: usize,

    /// Deadline for a single save, in milliseconds.
    #[serde(default = "default_save_timeout")]
    pub save_timeout_ms: u64,

    /// Deadline for loading history, in milliseconds.
    #[serde(default = "default_load_timeout")]
    pub load_timeout_ms: u64,
}

/// Admission control configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Allowed `Origin` values; `*` allows any.
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,

    /// Shared secret required to connect. Authentication is off when unset.
    #[serde(default)]
    pub auth_token: Option<String>,

    /// Connection attempts allowed per source per minute.
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: u32,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_message_size() -> usize {
    4096
}

fn default_outbound_queue() -> usize {
    256
}

fn default_history_replay() -> usize {
    50
}

fn default_queue() -> usize {
    1024
}

fn default_pong_wait() -> u64 {
    60_000 // 60 seconds
}

fn default_write_wait() -> u64 {
    10_000 // 10 seconds
}

fn default_ttl_hours() -> u64 {
    24
}

fn default_max_messages_per_room() -> usize {
    100
}

fn default_save_timeout() -> u64 {
    2_000
}

fn default_load_timeout() -> u64 {
    5_000
}

fn default_allowed_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_rate_limit() -> u32 {
    60
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            websocket_path: default_ws_path(),
            static_dir: None,
            limits: LimitsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            store: StoreConfig::default(),
            security: SecurityConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            outbound_queue: default_outbound_queue(),
            history_replay: default_history_replay(),
            intake_queue: default_queue(),
            persistence_queue: default_queue(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            pong_wait_ms: default_pong_wait(),
            write_wait_ms: default_write_wait(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: None,
            redis_url: None,
            ttl_hours: default_ttl_hours(),
            max_messages_per_room: default_max_messages_per_room(),
            save_timeout_ms: default_save_timeout(),
            load_timeout_ms: default_load_timeout(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_allowed_origins(),
            auth_token: None,
            rate_limit_per_minute: default_rate_limit(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl StoreConfig {
    /// The backend in effect once defaults are applied.
    #[must_use]
    pub fn effective_backend(&self) -> StoreBackend {
        match (self.backend, self.redis_url.as_deref()) {
            (Some(backend), _) => backend,
            (None, Some(url)) if !url.is_empty() => StoreBackend::Redis,
            (None, _) => StoreBackend::None,
        }
    }

    /// History time-to-live.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_hours.saturating_mul(3600))
    }
}

impl Config {
    /// Load configuration from the first config file found, with environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or if
    /// the result is invalid.
    pub fn load() -> Result<Self> {
        let path = Self::find_file();
        Self::load_from(path.as_deref())
    }

    /// Load configuration from an optional file, with environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed, an override has the
    /// wrong type, or the result is invalid.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        Self::load_layered(path, DeploymentEnv::from_process())
    }

    fn load_layered(path: Option<&Path>, deployment: DeploymentEnv) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(deployment).add_source(
            config::Environment::with_prefix("HUDDLE")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("security.allowed_origins")
                .try_parsing(true),
        );

        let config: Config = builder
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let shown = path.display();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {shown}"))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {shown}"))?;

        config.validate()?;
        Ok(config)
    }

    fn find_file() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            let expanded = shellexpand::tilde(&path);
            return Some(PathBuf::from(expanded.as_ref()));
        }

        CONFIG_PATHS.iter().find_map(|path| {
            let expanded = shellexpand::tilde(path);
            let path = Path::new(expanded.as_ref());
            path.exists().then(|| path.to_path_buf())
        })
    }

    /// Check values that would make the server misbehave.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if !self.websocket_path.starts_with('/') {
            bail!(
                "websocket_path must start with '/': {}",
                self.websocket_path
            );
        }
        if self.limits.max_message_size == 0 {
            bail!("limits.max_message_size must be greater than zero");
        }
        if self.limits.outbound_queue == 0 {
            bail!("limits.outbound_queue must be greater than zero");
        }
        if self.limits.history_replay >= self.limits.outbound_queue {
            bail!(
                "limits.history_replay ({}) must be smaller than limits.outbound_queue ({})",
                self.limits.history_replay,
                self.limits.outbound_queue
            );
        }
        if self.heartbeat.pong_wait_ms < 10 {
            bail!(
                "heartbeat.pong_wait_ms is too small: {}",
                self.heartbeat.pong_wait_ms
            );
        }
        if self.heartbeat.write_wait_ms == 0 {
            bail!("heartbeat.write_wait_ms must be greater than zero");
        }
        if self.store.ttl_hours == 0 {
            bail!("store.ttl_hours must be greater than zero");
        }
        if let Some(dir) = &self.static_dir {
            if !dir.is_dir() {
                bail!("static_dir is not a directory: {}", dir.display());
            }
        }
        if self.security.rate_limit_per_minute == 0 {
            bail!("security.rate_limit_per_minute must be greater than zero");
        }
        if self.store.effective_backend() == StoreBackend::Redis
            && self.store.redis_url.as_deref().map_or(true, str::is_empty)
        {
            bail!("store.backend is redis but store.redis_url is not set");
        }
        Ok(())
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a valid socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid host:port: {}:{}", self.host, self.port))
    }

    /// Whether a request with this `Origin` header may connect.
    ///
    /// Requests without an `Origin` (non-browser clients) are allowed.
    #[must_use]
    pub fn is_origin_allowed(&self, origin: Option<&str>) -> bool {
        let Some(origin) = origin else {
            return true;
        };
        self.security
            .allowed_origins
            .iter()
            .any(|allowed| allowed == "*" || allowed == origin)
    }

    /// The configured shared secret, if authentication is on.
    #[must_use]
    pub fn auth_token(&self) -> Option<&str> {
        self.security
            .auth_token
            .as_deref()
            .filter(|token| !token.is_empty())
    }

    /// Session settings derived from the heartbeat and limit sections.
    #[must_use]
    pub fn pump_settings(&self) -> PumpSettings {
        PumpSettings {
            write_wait: Duration::from_millis(self.heartbeat.write_wait_ms),
            outbound_capacity: self.limits.outbound_queue,
            history_limit: self.limits.history_replay,
            ..PumpSettings::with_pong_wait(Duration::from_millis(self.heartbeat.pong_wait_ms))
        }
    }

    /// Hub settings derived from the limit and store sections.
    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            intake_capacity: self.limits.intake_queue,
            persistence_capacity: self.limits.persistence_queue,
            save_timeout: Duration::from_millis(self.store.save_timeout_ms),
            load_timeout: Duration::from_millis(self.store.load_timeout_ms),
        }
    }
}

/// Configuration source for [`DEPLOYMENT_VARS`].
///
/// Empty values are ignored. `ALLOWED_ORIGINS` is a comma separated list.
#[derive(Debug, Clone, Default)]
struct DeploymentEnv {
    vars: HashMap<String, String>,
}

impl DeploymentEnv {
    fn from_process() -> Self {
        Self::new(DEPLOYMENT_VARS.iter().filter_map(|(var, _)| {
            std::env::var(var)
                .ok()
                .map(|value| (var.to_string(), value))
        }))
    }

    fn new(vars: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            vars: vars.into_iter().collect(),
        }
    }
}

impl config::Source for DeploymentEnv {
    fn clone_into_box(&self) -> Box<dyn config::Source + Send + Sync> {
        Box::new(self.clone())
    }

    fn collect(&self) -> Result<config::Map<String, config::Value>, config::ConfigError> {
        let source = "deployment environment".to_string();
        let mut values = config::Map::new();

        for (var, key) in DEPLOYMENT_VARS {
            let value = self.vars.get(var).map_or("", |v| v.trim());
            if value.is_empty() {
                continue;
            }
            let kind = if key == "security.allowed_origins" {
                config::ValueKind::Array(
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|o| !o.is_empty())
                        .map(|o| config::Value::new(Some(&source), o.to_string()))
                        .collect(),
                )
            } else {
                config::ValueKind::String(value.to_string())
            };
            values.insert(key.to_string(), config::Value::new(Some(&source), kind));
        }

        Ok(values)
    }
}
