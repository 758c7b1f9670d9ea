//! Shared configuration for racelobby tools.
//!
//! A TOML file at the platform config path, overlaid with `RACELOBBY_*`
//! environment variables, translated into `racelobby_core::OnlineConfig`
//! plus the transport settings the CLI needs to build its sources.

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use racelobby_core::OnlineConfig;

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

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
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Base URL of the master lobby list.
    #[serde(default = "default_lobby_url")]
    pub lobby_url: String,

    /// Directory holding file-backed lists. Defaults to the platform data dir.
    pub lists_dir: Option<PathBuf>,

    /// HTTP request timeout, seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    #[serde(default)]
    pub defaults: Defaults,

    #[serde(default)]
    pub lan: Lan,

    #[serde(default)]
    pub online: Online,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lobby_url: default_lobby_url(),
            lists_dir: None,
            timeout: default_timeout(),
            defaults: Defaults::default(),
            lan: Lan::default(),
            online: Online::default(),
        }
    }
}

fn default_lobby_url() -> String {
    "http://93.57.10.21".into()
}
fn default_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}

/// LAN broadcast discovery.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Lan {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_port_start")]
    pub port_start: u16,

    #[serde(default = "default_port_end")]
    pub port_end: u16,

    /// How long replies are collected, milliseconds.
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

impl Default for Lan {
    fn default() -> Self {
        Self {
            enabled: true,
            port_start: default_port_start(),
            port_end: default_port_end(),
            window_ms: default_window_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_port_start() -> u16 {
    9456
}
fn default_port_end() -> u16 {
    9458
}
fn default_window_ms() -> u64 {
    3000
}

/// The `[online]` table, mirroring `OnlineConfig` with plain numbers.
/// Missing keys fall back to `OnlineConfig::default()`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct Online {
    pub ping_concurrency: Option<usize>,
    pub ping_concurrency_single_socket: Option<usize>,
    pub single_socket: Option<bool>,
    pub ping_timeout_ms: Option<u64>,
    pub pause_during_race: Option<bool>,
    pub fix_names: Option<bool>,
    pub pack_concurrency: Option<usize>,
    pub cancel_debounce_ms: Option<u64>,
    pub ping_max_passes: Option<u32>,
    pub pause_poll_ms: Option<u64>,
    pub missing_sources_cap: Option<usize>,
    pub list_extension: Option<String>,
    pub list_watch_debounce_ms: Option<u64>,
}

// ── Config file path ────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "racelobby", "racelobby")
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Where lists live when `lists_dir` is not set.
pub fn default_lists_dir() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("lists"),
        |dirs| dirs.data_dir().join("lists"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("racelobby");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from an explicit file + environment. A missing file is not an error.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("RACELOBBY_").split("__"));

    let config: Config = figment.extract()?;
    config.validate()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<PathBuf, ConfigError> {
    let path = config_path();
    save_config_to(cfg, &path)?;
    Ok(path)
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Translation ─────────────────────────────────────────────────────

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.lobby_url()?;
        if self.lan.port_start > self.lan.port_end {
            return Err(ConfigError::Validation {
                field: "lan.port_start".into(),
                reason: format!(
                    "{} is above lan.port_end ({})",
                    self.lan.port_start, self.lan.port_end
                ),
            });
        }
        if self.online.list_extension.as_deref().is_some_and(|e| e.trim_start_matches('.').is_empty()) {
            return Err(ConfigError::Validation {
                field: "online.list_extension".into(),
                reason: "must not be empty".into(),
            });
        }
        Ok(())
    }

    pub fn lobby_url(&self) -> Result<Url, ConfigError> {
        self.lobby_url.parse().map_err(|_| ConfigError::Validation {
            field: "lobby_url".into(),
            reason: format!("invalid URL: {}", self.lobby_url),
        })
    }

    pub fn lists_dir(&self) -> PathBuf {
        self.lists_dir.clone().unwrap_or_else(default_lists_dir)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout.max(1))
    }

    pub fn lan_ports(&self) -> RangeInclusive<u16> {
        self.lan.port_start..=self.lan.port_end
    }

    pub fn lan_window(&self) -> Duration {
        Duration::from_millis(self.lan.window_ms)
    }

    /// Build the core's tuning struct, keeping its defaults for unset keys.
    pub fn to_online_config(&self) -> OnlineConfig {
        let o = &self.online;
        let d = OnlineConfig::default();
        let ms = |value: Option<u64>, fallback: Duration| value.map_or(fallback, Duration::from_millis);
        OnlineConfig {
            ping_concurrency: o.ping_concurrency.unwrap_or(d.ping_concurrency),
            ping_concurrency_single_socket: o
                .ping_concurrency_single_socket
                .unwrap_or(d.ping_concurrency_single_socket),
            single_socket: o.single_socket.unwrap_or(d.single_socket),
            ping_timeout: ms(o.ping_timeout_ms, d.ping_timeout),
            pause_during_race: o.pause_during_race.unwrap_or(d.pause_during_race),
            fix_names: o.fix_names.unwrap_or(d.fix_names),
            pack_concurrency: o.pack_concurrency.unwrap_or(d.pack_concurrency),
            cancel_debounce: ms(o.cancel_debounce_ms, d.cancel_debounce),
            ping_max_passes: o.ping_max_passes.unwrap_or(d.ping_max_passes),
            pause_poll_interval: ms(o.pause_poll_ms, d.pause_poll_interval),
            missing_sources_cap: o.missing_sources_cap.unwrap_or(d.missing_sources_cap),
            list_extension: o
                .list_extension
                .as_deref()
                .map_or(d.list_extension, |e| e.trim_start_matches('.').to_owned()),
            list_watch_debounce: ms(o.list_watch_debounce_ms, d.list_watch_debounce),
        }
    }
}
