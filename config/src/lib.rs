//! Mintbridge Configuration
//!
//! Shared configuration crate for the settlement service.
//!
//! Handles loading configuration from:
//! 1. MB_CONFIG env var (explicit path)
//! 2. ./config.toml (current directory)
//! 3. ~/.mintbridge/config.toml (user home)
//!
//! Environment variables take precedence over TOML config.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use std::{env, fs};

const CONFIG_FILE_NAME: &str = "config.toml";
const CONFIG_DIR_NAME: &str = ".mintbridge";

// ============================================================================
// Default Constants
// ============================================================================

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_DB_PATH: &str = "./mintbridge-db";
const DEFAULT_COORDINATOR_URL: &str = "http://localhost:8090";

pub const DEFAULT_DENOMINATIONS: [u64; 13] = [
    1, 3, 5, 10, 50, 100, 300, 500, 1000, 5000, 10000, 20000, 40000,
];
const DEFAULT_TREE_HEIGHT: usize = 20;
const DEFAULT_VISIBILITY_ATTEMPTS: u32 = 10;
const DEFAULT_VISIBILITY_BASE_DELAY_MS: u64 = 500;
const DEFAULT_VISIBILITY_MAX_DELAY_MS: u64 = 10_000;
const DEFAULT_VISIBILITY_JITTER_MS: u64 = 250;
const DEFAULT_PROVE_TIMEOUT_SECS: u64 = 300;
const DEFAULT_LEDGER_TIMEOUT_SECS: u64 = 30;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
const DEFAULT_ROOT_HISTORY_SIZE: usize = 30;

// ============================================================================
// Config Structs
// ============================================================================

/// Root configuration structure (matches TOML layout)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MintbridgeConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub settlement: SettlementConfig,
    #[serde(default)]
    pub prover: ProverConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
}

/// HTTP API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Enables minting and other ledger shortcuts
    #[serde(default)]
    pub dev_mode: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.into(),
            port: DEFAULT_PORT,
            dev_mode: false,
        }
    }
}

fn default_host() -> String {
    DEFAULT_HOST.into()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}

/// Where institution records and transfer journals live
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Rocksdb,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "rocksdb" => Ok(Self::Rocksdb),
            other => Err(format!("unknown storage backend: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            path: DEFAULT_DB_PATH.into(),
        }
    }
}

fn default_db_path() -> String {
    DEFAULT_DB_PATH.into()
}

/// Settlement orchestration parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementConfig {
    #[serde(default = "default_denominations")]
    pub denominations: Vec<u64>,
    #[serde(default = "default_tree_height")]
    pub tree_height: usize,
    /// Attempts at finding a leg's deposit before giving up
    #[serde(default = "default_visibility_attempts")]
    pub visibility_max_attempts: u32,
    #[serde(default = "default_visibility_base_delay")]
    pub visibility_base_delay_ms: u64,
    #[serde(default = "default_visibility_max_delay")]
    pub visibility_max_delay_ms: u64,
    #[serde(default = "default_visibility_jitter")]
    pub visibility_jitter_ms: u64,
    #[serde(default = "default_prove_timeout")]
    pub prove_timeout_secs: u64,
    #[serde(default = "default_ledger_timeout")]
    pub ledger_timeout_secs: u64,
    /// Hex-encoded X25519 secret used to seal deposit preimages
    #[serde(default)]
    pub sealing_key: Option<String>,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            denominations: DEFAULT_DENOMINATIONS.to_vec(),
            tree_height: DEFAULT_TREE_HEIGHT,
            visibility_max_attempts: DEFAULT_VISIBILITY_ATTEMPTS,
            visibility_base_delay_ms: DEFAULT_VISIBILITY_BASE_DELAY_MS,
            visibility_max_delay_ms: DEFAULT_VISIBILITY_MAX_DELAY_MS,
            visibility_jitter_ms: DEFAULT_VISIBILITY_JITTER_MS,
            prove_timeout_secs: DEFAULT_PROVE_TIMEOUT_SECS,
            ledger_timeout_secs: DEFAULT_LEDGER_TIMEOUT_SECS,
            sealing_key: None,
        }
    }
}

impl SettlementConfig {
    pub fn prove_timeout(&self) -> Duration {
        Duration::from_secs(self.prove_timeout_secs)
    }

    pub fn ledger_timeout(&self) -> Duration {
        Duration::from_secs(self.ledger_timeout_secs)
    }
}

fn default_denominations() -> Vec<u64> {
    DEFAULT_DENOMINATIONS.to_vec()
}
fn default_tree_height() -> usize {
    DEFAULT_TREE_HEIGHT
}
fn default_visibility_attempts() -> u32 {
    DEFAULT_VISIBILITY_ATTEMPTS
}
fn default_visibility_base_delay() -> u64 {
    DEFAULT_VISIBILITY_BASE_DELAY_MS
}
fn default_visibility_max_delay() -> u64 {
    DEFAULT_VISIBILITY_MAX_DELAY_MS
}
fn default_visibility_jitter() -> u64 {
    DEFAULT_VISIBILITY_JITTER_MS
}
fn default_prove_timeout() -> u64 {
    DEFAULT_PROVE_TIMEOUT_SECS
}
fn default_ledger_timeout() -> u64 {
    DEFAULT_LEDGER_TIMEOUT_SECS
}

/// Prover mode for TOML config
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProverMode {
    #[default]
    Mock,
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProverConfig {
    #[serde(default)]
    pub mode: ProverMode,
    #[serde(default = "default_coordinator_url")]
    pub coordinator_url: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Circuit definition handed to the prover
    #[serde(default)]
    pub circuit_path: Option<String>,
    #[serde(default)]
    pub proving_key_path: Option<String>,
}

impl Default for ProverConfig {
    fn default() -> Self {
        Self {
            mode: ProverMode::Mock,
            coordinator_url: DEFAULT_COORDINATOR_URL.into(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            circuit_path: None,
            proving_key_path: None,
        }
    }
}

fn default_coordinator_url() -> String {
    DEFAULT_COORDINATOR_URL.into()
}
fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

/// In-process ledger used for development
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Delay between a deposit's inclusion and its event becoming queryable
    #[serde(default)]
    pub visibility_lag_ms: u64,
    #[serde(default = "default_root_history_size")]
    pub root_history_size: usize,
}

impl LedgerConfig {
    pub fn visibility_lag(&self) -> Duration {
        Duration::from_millis(self.visibility_lag_ms)
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            visibility_lag_ms: 0,
            root_history_size: DEFAULT_ROOT_HISTORY_SIZE,
        }
    }
}

fn default_root_history_size() -> usize {
    DEFAULT_ROOT_HISTORY_SIZE
}

// ============================================================================
// Environment Variable Helpers
// ============================================================================

type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Set field from env var if present
fn env_string(lookup: Lookup, key: &str, field: &mut String) {
    if let Some(v) = lookup(key) {
        *field = v;
    }
}

/// Set Option<String> from env var if present
fn env_option_string(lookup: Lookup, key: &str, field: &mut Option<String>) {
    if let Some(v) = lookup(key) {
        *field = Some(v);
    }
}

/// Set field from env var if present and parseable
fn env_parse<T: FromStr>(lookup: Lookup, key: &str, field: &mut T) {
    if let Some(v) = lookup(key) {
        match v.parse() {
            Ok(parsed) => *field = parsed,
            Err(_) => log::warn!("Ignoring unparseable {}={}", key, v),
        }
    }
}

/// Check if env var is set to a truthy value ("1" or "true")
fn env_bool(lookup: Lookup, key: &str) -> Option<bool> {
    lookup(key).map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

/// Comma-separated list, e.g. `MB_DENOMINATIONS=1,5,10`
fn env_list<T: FromStr>(lookup: Lookup, key: &str, field: &mut Vec<T>) {
    if let Some(v) = lookup(key) {
        let parsed: Result<Vec<T>, _> = v.split(',').map(|s| s.trim().parse()).collect();
        match parsed {
            Ok(list) => *field = list,
            Err(_) => log::warn!("Ignoring unparseable {}={}", key, v),
        }
    }
}

// ============================================================================
// Implementation
// ============================================================================

impl MintbridgeConfig {
    /// Load configuration from config file with env var overrides
    pub fn load() -> Result<Self> {
        let mut config = match Self::find_config_file() {
            Some(path) => {
                log::info!("Loading config from: {}", path.display());
                Self::parse_file(&path)?
            }
            None => {
                log::info!("No config file found, using defaults and environment variables");
                Self::default()
            }
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific file path
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::parse_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn parse_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Find the config file path
    fn find_config_file() -> Option<PathBuf> {
        // 1. Check MB_CONFIG env var
        if let Ok(path) = env::var("MB_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
            log::warn!("MB_CONFIG points to missing file: {}", path.display());
        }

        // 2. Check ./config.toml (current directory)
        let local_path = PathBuf::from(CONFIG_FILE_NAME);
        if local_path.exists() {
            return Some(local_path);
        }

        // 3. Check ~/.mintbridge/config.toml
        Self::default_config_path().filter(|p| p.exists())
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(&|key: &str| env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: Lookup) {
        // API
        env_string(lookup, "MB_API_HOST", &mut self.api.host);
        env_parse(lookup, "MB_API_PORT", &mut self.api.port);
        if let Some(v) = env_bool(lookup, "MB_DEV_MODE") {
            self.api.dev_mode = v;
        }

        // Database
        env_parse(lookup, "MB_DB_BACKEND", &mut self.database.backend);
        env_string(lookup, "MB_DB_PATH", &mut self.database.path);

        // Settlement
        env_list(lookup, "MB_DENOMINATIONS", &mut self.settlement.denominations);
        env_parse(lookup, "MB_TREE_HEIGHT", &mut self.settlement.tree_height);
        env_parse(
            lookup,
            "MB_VISIBILITY_ATTEMPTS",
            &mut self.settlement.visibility_max_attempts,
        );
        env_parse(
            lookup,
            "MB_VISIBILITY_BASE_DELAY_MS",
            &mut self.settlement.visibility_base_delay_ms,
        );
        env_parse(
            lookup,
            "MB_PROVE_TIMEOUT_SECS",
            &mut self.settlement.prove_timeout_secs,
        );
        env_parse(
            lookup,
            "MB_LEDGER_TIMEOUT_SECS",
            &mut self.settlement.ledger_timeout_secs,
        );
        env_option_string(lookup, "MB_SEALING_KEY", &mut self.settlement.sealing_key);

        // Prover
        if let Some(v) = lookup("MB_PROVER_MODE") {
            self.prover.mode = match v.to_ascii_lowercase().as_str() {
                "remote" => ProverMode::Remote,
                _ => ProverMode::Mock,
            };
        }
        env_string(lookup, "MB_PROVER_URL", &mut self.prover.coordinator_url);
        env_option_string(lookup, "MB_CIRCUIT_PATH", &mut self.prover.circuit_path);
        env_option_string(
            lookup,
            "MB_PROVING_KEY_PATH",
            &mut self.prover.proving_key_path,
        );

        // Ledger
        env_parse(
            lookup,
            "MB_VISIBILITY_LAG_MS",
            &mut self.ledger.visibility_lag_ms,
        );
    }

    /// Get the default config file path
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Generate a sample config file
    pub fn generate_sample() -> String {
        let mut sample = Self::default();
        sample.api.dev_mode = true;
        sample.prover.circuit_path = Some("./circuits/withdraw.json".into());
        sample.prover.proving_key_path = Some("./circuits/withdraw_proving_key.bin".into());
        toml::to_string_pretty(&sample).unwrap_or_default()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = MintbridgeConfig::default();
        assert_eq!(config.api.port, DEFAULT_PORT);
        assert_eq!(config.database.backend, StorageBackend::Memory);
        assert_eq!(config.prover.mode, ProverMode::Mock);
        assert_eq!(config.settlement.denominations, DEFAULT_DENOMINATIONS.to_vec());
        assert_eq!(config.settlement.tree_height, 20);
        assert_eq!(config.ledger.root_history_size, 30);
    }

    #[test]
    fn test_generate_sample() {
        let sample = MintbridgeConfig::generate_sample();
        assert!(sample.contains("[api]"));
        assert!(sample.contains("[database]"));
        assert!(sample.contains("[settlement]"));
        assert!(sample.contains("[prover]"));
        assert!(sample.contains("[ledger]"));
    }

    #[test]
    fn test_parse_sample() {
        let sample = MintbridgeConfig::generate_sample();
        let parsed: MintbridgeConfig = toml::from_str(&sample).unwrap();
        assert!(parsed.api.dev_mode);
        assert_eq!(parsed.settlement.visibility_max_attempts, DEFAULT_VISIBILITY_ATTEMPTS);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let parsed: MintbridgeConfig = toml::from_str(
            r#"
            [settlement]
            denominations = [1, 10, 100]

            [prover]
            mode = "remote"
            "#,
        )
        .unwrap();

        assert_eq!(parsed.settlement.denominations, vec![1, 10, 100]);
        assert_eq!(parsed.settlement.tree_height, DEFAULT_TREE_HEIGHT);
        assert_eq!(parsed.prover.mode, ProverMode::Remote);
        assert_eq!(parsed.api.host, DEFAULT_HOST);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = MintbridgeConfig::default();
        let lookup = lookup_from(&[
            ("MB_API_PORT", "9090"),
            ("MB_DEV_MODE", "true"),
            ("MB_DB_BACKEND", "rocksdb"),
            ("MB_DENOMINATIONS", "1, 5,25"),
            ("MB_PROVER_MODE", "REMOTE"),
            ("MB_VISIBILITY_LAG_MS", "1500"),
        ]);
        config.apply_overrides(&lookup);

        assert_eq!(config.api.port, 9090);
        assert!(config.api.dev_mode);
        assert_eq!(config.database.backend, StorageBackend::Rocksdb);
        assert_eq!(config.settlement.denominations, vec![1, 5, 25]);
        assert_eq!(config.prover.mode, ProverMode::Remote);
        assert_eq!(config.ledger.visibility_lag_ms, 1500);
    }

    #[test]
    fn test_bad_env_values_are_ignored() {
        let mut config = MintbridgeConfig::default();
        let lookup = lookup_from(&[
            ("MB_API_PORT", "not-a-port"),
            ("MB_DENOMINATIONS", "1,two,3"),
        ]);
        config.apply_overrides(&lookup);

        assert_eq!(config.api.port, DEFAULT_PORT);
        assert_eq!(config.settlement.denominations, DEFAULT_DENOMINATIONS.to_vec());
    }

    #[test]
    fn test_load_from_file() {
        let path = env::temp_dir().join(format!("mintbridge-config-{}.toml", std::process::id()));
        fs::write(&path, "[api]\nport = 7000\n").unwrap();

        let config = MintbridgeConfig::parse_file(&path).unwrap();
        assert_eq!(config.api.port, 7000);

        fs::remove_file(&path).unwrap();
        assert!(MintbridgeConfig::parse_file(&path).is_err());
    }
}
