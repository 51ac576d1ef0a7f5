use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::models::errors::ScanError;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://sonicx_scanner.db";
pub const DEFAULT_WINDOW: u64 = 20;
pub const DEFAULT_FIRST_SCANNABLE_HEIGHT: u64 = 1;
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub address: String,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: "0.0.0.0".to_string(),
            port: 9100,
        }
    }
}

/// Raw configuration as read from `config.yml` and `SCANNER_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub rpc_url: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default)]
    pub target_address: Option<String>,
    #[serde(default)]
    pub known_deployer: Option<String>,
    #[serde(default = "default_token_markers")]
    pub token_markers: Vec<String>,
    #[serde(default = "default_window")]
    pub default_window: u64,
    #[serde(default = "default_first_scannable_height")]
    pub first_scannable_height: u64,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_detect_tokens")]
    pub detect_tokens: bool,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Validated, typed settings the scanner runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannerSettings {
    /// `None` disables filtering: every transaction is relevant.
    pub target_address: Option<Address>,
    pub known_deployer: Option<Address>,
    pub token_markers: Vec<String>,
    pub default_window: u64,
    pub first_scannable_height: u64,
    pub max_concurrency: usize,
    pub detect_tokens: bool,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            target_address: None,
            known_deployer: None,
            token_markers: default_token_markers(),
            default_window: DEFAULT_WINDOW,
            first_scannable_height: DEFAULT_FIRST_SCANNABLE_HEIGHT,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            detect_tokens: true,
        }
    }
}

impl Config {
    pub fn rpc_url(&self) -> Result<Url, ScanError> {
        if self.rpc_url.trim().is_empty() {
            return Err(ScanError::configuration("rpc_url is required"));
        }
        self.rpc_url
            .trim()
            .parse()
            .map_err(|e| ScanError::configuration(format!("invalid rpc_url '{}': {e}", self.rpc_url)))
    }

    pub fn scanner_settings(&self) -> Result<ScannerSettings, ScanError> {
        if self.max_concurrency == 0 {
            return Err(ScanError::configuration("max_concurrency must be at least 1"));
        }

        Ok(ScannerSettings {
            target_address: parse_optional_address("target_address", self.target_address.as_deref())?,
            known_deployer: parse_optional_address("known_deployer", self.known_deployer.as_deref())?,
            token_markers: self
                .token_markers
                .iter()
                .map(|marker| marker.trim().to_lowercase())
                .filter(|marker| !marker.is_empty())
                .collect(),
            default_window: self.default_window,
            first_scannable_height: self.first_scannable_height,
            max_concurrency: self.max_concurrency,
            detect_tokens: self.detect_tokens,
        })
    }
}

/// Addresses compare by bytes once parsed, so any hex casing is accepted here.
fn parse_optional_address(field: &str, value: Option<&str>) -> Result<Option<Address>, ScanError> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => raw
            .parse::<Address>()
            .map(Some)
            .map_err(|e| ScanError::configuration(format!("invalid {field} '{raw}': {e}"))),
    }
}

fn default_database_url() -> String {
    DEFAULT_DATABASE_URL.to_string()
}

fn default_token_markers() -> Vec<String> {
    vec!["sonicx".to_string(), "sonic".to_string(), "sonix".to_string()]
}

const fn default_window() -> u64 {
    DEFAULT_WINDOW
}

const fn default_first_scannable_height() -> u64 {
    DEFAULT_FIRST_SCANNABLE_HEIGHT
}

const fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

const fn default_detect_tokens() -> bool {
    true
}
