//! Runtime configuration.
//!
//! Settings are read from a TOML file and then overridden by `SYNC_*`
//! environment variables (a `.env` file is honoured when present). Every
//! section has defaults, so a deployment can be configured from the
//! environment alone.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub vault: VaultConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub push: PushConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VaultConfig {
    #[serde(default = "default_vault_root")]
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    /// Folder name overrides per classification group code.
    #[serde(default)]
    pub group_folders: BTreeMap<String, String>,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            root: default_vault_root(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            group_folders: BTreeMap::new(),
        }
    }
}

fn default_vault_root() -> PathBuf {
    PathBuf::from("./vault")
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            timeout_ms: default_timeout_ms(),
            max_connections: default_max_connections(),
        }
    }
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("./data/sync.sqlite")
}
fn default_timeout_ms() -> u64 {
    5_000
}
fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_sync_on_start")]
    pub sync_on_start: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            sync_on_start: default_sync_on_start(),
        }
    }
}

impl AgentConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

fn default_debounce_ms() -> u64 {
    1_000
}
fn default_sync_on_start() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_backoff_factor() -> f64 {
    2.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct HealthConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:3001".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct PushConfig {
    #[serde(default = "default_push_limit")]
    pub default_limit: usize,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            default_limit: default_push_limit(),
        }
    }
}

fn default_push_limit() -> usize {
    200
}

/// Load configuration from `path`, apply environment overrides and validate.
///
/// A missing file is not an error: defaults plus environment variables are
/// used instead. A file that exists but does not parse is.
pub fn load_config(path: &Path) -> Result<Config> {
    dotenvy::dotenv().ok();

    let mut config: Config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content).with_context(|| "Failed to parse config file")?
    } else {
        Config::default()
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate(&config)?;
    Ok(config)
}

/// Apply `SYNC_*` overrides. `lookup` is injected so tests do not touch the
/// process environment.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("SYNC_VAULT_ROOT") {
        config.vault.root = PathBuf::from(v);
    }
    if let Some(v) = lookup("SYNC_STORE_PATH") {
        config.store.path = PathBuf::from(v);
    }
    if let Some(v) = lookup("SYNC_STORE_TIMEOUT_MS") {
        config.store.timeout_ms = parse_env("SYNC_STORE_TIMEOUT_MS", &v)?;
    }
    if let Some(v) = lookup("SYNC_DEBOUNCE_MS") {
        config.agent.debounce_ms = parse_env("SYNC_DEBOUNCE_MS", &v)?;
    }
    if let Some(v) = lookup("SYNC_ON_START") {
        config.agent.sync_on_start = parse_env("SYNC_ON_START", &v.to_ascii_lowercase())?;
    }
    if let Some(v) = lookup("SYNC_RETRY_MAX_ATTEMPTS") {
        config.retry.max_attempts = parse_env("SYNC_RETRY_MAX_ATTEMPTS", &v)?;
    }
    if let Some(v) = lookup("SYNC_RETRY_BASE_DELAY_MS") {
        config.retry.base_delay_ms = parse_env("SYNC_RETRY_BASE_DELAY_MS", &v)?;
    }
    if let Some(v) = lookup("SYNC_RETRY_MAX_DELAY_MS") {
        config.retry.max_delay_ms = parse_env("SYNC_RETRY_MAX_DELAY_MS", &v)?;
    }
    if let Some(v) = lookup("SYNC_HEALTH_BIND") {
        config.health.bind = v;
    }
    Ok(())
}

fn parse_env<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| anyhow::anyhow!("invalid value for {}: '{}' ({})", key, value, e))
}

fn validate(config: &Config) -> Result<()> {
    if config.retry.max_attempts == 0 {
        bail!("retry.max_attempts must be >= 1");
    }
    if config.retry.backoff_factor < 1.0 {
        bail!("retry.backoff_factor must be >= 1.0");
    }
    if config.agent.debounce_ms == 0 {
        bail!("agent.debounce_ms must be > 0");
    }
    if config.store.timeout_ms == 0 {
        bail!("store.timeout_ms must be > 0");
    }
    if config.push.default_limit == 0 {
        bail!("push.default_limit must be > 0");
    }
    config
        .health
        .bind
        .parse::<SocketAddr>()
        .with_context(|| format!("health.bind is not a socket address: {}", config.health.bind))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(validate(&config).is_ok());
        assert_eq!(config.agent.debounce_ms, 1_000);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.push.default_limit, 200);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [vault]
            root = "/srv/vault"

            [vault.group_folders]
            CV = "Cardio"
            "#,
        )
        .unwrap();
        assert_eq!(config.vault.root, PathBuf::from("/srv/vault"));
        assert_eq!(config.vault.include_globs, vec!["**/*.md".to_string()]);
        assert_eq!(config.vault.group_folders.get("CV").unwrap(), "Cardio");
        assert_eq!(config.health.bind, "127.0.0.1:3001");
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        apply_env_overrides(&mut config, |key| match key {
            "SYNC_VAULT_ROOT" => Some("/data/vault".to_string()),
            "SYNC_DEBOUNCE_MS" => Some("250".to_string()),
            "SYNC_ON_START" => Some("FALSE".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.vault.root, PathBuf::from("/data/vault"));
        assert_eq!(config.agent.debounce_ms, 250);
        assert!(!config.agent.sync_on_start);
    }

    #[test]
    fn test_bad_env_value_is_an_error() {
        let mut config = Config::default();
        let result = apply_env_overrides(&mut config, |key| {
            (key == "SYNC_RETRY_MAX_ATTEMPTS").then(|| "lots".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_rejects_bad_bind() {
        let mut config = Config::default();
        config.health.bind = "not an address".to_string();
        assert!(validate(&config).is_err());
    }
}
