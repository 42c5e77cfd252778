//! Shared configuration for the yarbo CLI.
//!
//! TOML profiles merged with `YARBO_` environment variables, and
//! translation to the runtime config types in `yarbo_core`. The CLI adds
//! flag-aware overrides on top; core never reads files.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use yarbo_core::{
    ClientConfig, DiscoveryConfig, Endpoint, ReconnectConfig, SessionConfig, TransportConfig,
};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{name}' not found (available: {available})")]
    ProfileNotFound { name: String, available: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when `--profile` is not given.
    pub default_profile: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    /// Named robot profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Command acknowledgement and handshake bound, in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Broker CONNACK bound, in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    #[serde(default = "default_true")]
    pub auto_controller: bool,

    #[serde(default)]
    pub discovery: DiscoveryDefaults,

    #[serde(default)]
    pub reconnect: ReconnectDefaults,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            namespace: default_namespace(),
            port: default_port(),
            timeout: default_timeout(),
            connect_timeout: default_connect_timeout(),
            auto_controller: true,
            discovery: DiscoveryDefaults::default(),
            reconnect: ReconnectDefaults::default(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_namespace() -> String {
    SessionConfig::default().namespace
}
fn default_port() -> u16 {
    DiscoveryConfig::default().port
}
fn default_timeout() -> u64 {
    SessionConfig::default().command_timeout.as_secs()
}
fn default_connect_timeout() -> u64 {
    SessionConfig::default().connect_timeout.as_secs()
}
fn default_true() -> bool {
    true
}

/// `[defaults.discovery]`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscoveryDefaults {
    /// Replaces the built-in seed list when set.
    pub seed_hosts: Option<Vec<String>>,

    /// CIDR ranges to scan instead of the attached networks.
    #[serde(default)]
    pub subnets: Vec<String>,

    #[serde(default = "default_true")]
    pub scan_local_subnets: bool,

    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    #[serde(default = "default_sniff_timeout_ms")]
    pub sniff_timeout_ms: u64,

    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default = "default_max_hosts")]
    pub max_hosts_per_network: usize,

    #[serde(default = "default_min_prefix_len")]
    pub min_prefix_len: u8,

    #[serde(default)]
    pub force_large_networks: bool,

    /// Replaces the built-in base-station hostname hints when set.
    pub hostname_hints: Option<Vec<String>>,
}

impl Default for DiscoveryDefaults {
    fn default() -> Self {
        Self {
            seed_hosts: None,
            subnets: Vec::new(),
            scan_local_subnets: true,
            probe_timeout_ms: default_probe_timeout_ms(),
            sniff_timeout_ms: default_sniff_timeout_ms(),
            max_concurrency: default_max_concurrency(),
            max_hosts_per_network: default_max_hosts(),
            min_prefix_len: default_min_prefix_len(),
            force_large_networks: false,
            hostname_hints: None,
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
fn default_probe_timeout_ms() -> u64 {
    millis(DiscoveryConfig::default().connect_timeout)
}
fn default_sniff_timeout_ms() -> u64 {
    millis(DiscoveryConfig::default().sniff_timeout)
}
fn default_max_concurrency() -> usize {
    DiscoveryConfig::default().max_concurrency
}
fn default_max_hosts() -> usize {
    DiscoveryConfig::default().max_hosts_per_network
}
fn default_min_prefix_len() -> u8 {
    DiscoveryConfig::default().min_prefix_len
}

/// `[defaults.reconnect]`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReconnectDefaults {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Unset means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectDefaults {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_retries: None,
        }
    }
}

fn default_initial_delay_ms() -> u64 {
    millis(ReconnectConfig::default().initial_delay)
}
fn default_max_delay_ms() -> u64 {
    millis(ReconnectConfig::default().max_delay)
}

/// A named robot.
///
/// Every field is optional: a profile without a broker means "discover it".
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Broker host (e.g., "192.168.1.24").
    pub broker: Option<String>,

    /// Device serial number.
    pub serial: Option<String>,

    /// Override broker port.
    pub port: Option<u16>,

    /// Override topic namespace.
    pub namespace: Option<String>,

    /// Override command timeout, in seconds.
    pub timeout: Option<u64>,

    /// Override the automatic controller handshake.
    pub auto_controller: Option<bool>,

    /// CIDR ranges to scan when discovering this robot.
    pub subnets: Option<Vec<String>>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "yarbo", "yarbo").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("yarbo");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` + environment. A missing file yields the defaults.
///
/// Nested keys use a double underscore: `YARBO_DEFAULTS__TIMEOUT=10`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("YARBO_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Profile resolution ──────────────────────────────────────────────

impl Config {
    /// Profile name in effect: the explicit request, else the configured
    /// default, else `"default"`.
    pub fn active_profile_name(&self, requested: Option<&str>) -> String {
        requested
            .map(str::to_owned)
            .or_else(|| self.default_profile.clone())
            .unwrap_or_else(|| "default".into())
    }

    /// Look up a profile by name.
    pub fn profile(&self, name: &str) -> Result<&Profile, ConfigError> {
        self.profiles.get(name).ok_or_else(|| {
            let mut names: Vec<&str> = self.profiles.keys().map(String::as_str).collect();
            names.sort_unstable();
            ConfigError::ProfileNotFound {
                name: name.into(),
                available: if names.is_empty() {
                    "none".into()
                } else {
                    names.join(", ")
                },
            }
        })
    }
}

impl Defaults {
    /// Session tuning with `profile` overrides applied.
    pub fn session_config(&self, profile: Option<&Profile>) -> SessionConfig {
        SessionConfig {
            namespace: profile
                .and_then(|p| p.namespace.clone())
                .unwrap_or_else(|| self.namespace.clone()),
            connect_timeout: Duration::from_secs(self.connect_timeout),
            command_timeout: Duration::from_secs(
                profile.and_then(|p| p.timeout).unwrap_or(self.timeout),
            ),
            auto_controller: profile
                .and_then(|p| p.auto_controller)
                .unwrap_or(self.auto_controller),
            ..SessionConfig::default()
        }
    }

    /// Discovery tuning with `profile` overrides applied.
    pub fn discovery_config(&self, profile: Option<&Profile>) -> DiscoveryConfig {
        let d = &self.discovery;
        let base = DiscoveryConfig::default();
        DiscoveryConfig {
            namespace: profile
                .and_then(|p| p.namespace.clone())
                .unwrap_or_else(|| self.namespace.clone()),
            port: profile.and_then(|p| p.port).unwrap_or(self.port),
            seed_hosts: d.seed_hosts.clone().unwrap_or(base.seed_hosts),
            subnets: profile
                .and_then(|p| p.subnets.clone())
                .unwrap_or_else(|| d.subnets.clone()),
            scan_local_subnets: d.scan_local_subnets,
            connect_timeout: Duration::from_millis(d.probe_timeout_ms),
            sniff_timeout: Duration::from_millis(d.sniff_timeout_ms),
            max_concurrency: d.max_concurrency,
            min_prefix_len: d.min_prefix_len,
            force_large_networks: d.force_large_networks,
            max_hosts_per_network: d.max_hosts_per_network,
            secondary_hostname_hints: d
                .hostname_hints
                .clone()
                .unwrap_or(base.secondary_hostname_hints),
            ..base
        }
    }

    pub fn reconnect_config(&self) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(self.reconnect.initial_delay_ms),
            max_delay: Duration::from_millis(self.reconnect.max_delay_ms),
            max_retries: self.reconnect.max_retries,
        }
    }
}

/// Build a `ClientConfig` from a profile, with no CLI flag overrides.
///
/// The profile must name both a broker and a serial; otherwise the
/// caller has to discover them first.
pub fn profile_to_client_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<ClientConfig, ConfigError> {
    let broker = profile
        .broker
        .as_deref()
        .filter(|b| !b.trim().is_empty())
        .ok_or_else(|| ConfigError::Validation {
            field: "broker".into(),
            reason: format!("profile '{profile_name}' has no broker"),
        })?;
    let serial = profile
        .serial
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ConfigError::Validation {
            field: "serial".into(),
            reason: format!("profile '{profile_name}' has no serial"),
        })?;

    let port = profile.port.unwrap_or(defaults.port);
    Ok(ClientConfig {
        endpoint: Endpoint::new(broker.trim(), port).with_serial(serial.trim()),
        session: defaults.session_config(Some(profile)),
        transport: TransportConfig::default(),
        reconnect: defaults.reconnect_config(),
    })
}

// ── Tests ───────────────────────────────────────────────────────────
