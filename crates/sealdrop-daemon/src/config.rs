use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use sealdrop_core::contribution::PresaleCapConfig;
use sealdrop_core::storage::PersistFailurePolicy;
use sealdrop_core::wallet::validate_wallet;

use crate::gates::EligibilityConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("decode {path}: {source}")]
    Decode {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

const MIN_OPERATOR_TOKEN_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub listen: String,
    pub data_dir: PathBuf,
    pub max_body_bytes: usize,
    pub rate_limit_rps: u32,
    /// Wallet that funds allocations and receives contributions.
    pub treasury_wallet: Option<String>,
    /// Allocation for wallets without a seeded record.
    pub default_allocation: u64,
    pub require_eligibility_proof: bool,
    pub allocations_path: Option<PathBuf>,
    pub persist_failure_policy: PersistFailurePolicy,
    /// Bearer token for the operator routes. They are disabled when unset.
    pub operator_token: Option<String>,
    pub eligibility: EligibilityConfig,
    pub presale: PresaleCapConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".to_string(),
            data_dir: PathBuf::from("./data"),
            max_body_bytes: 4_096,
            rate_limit_rps: 20,
            treasury_wallet: None,
            default_allocation: 1_000 * sealdrop_core::UNITS_PER_WHOLE,
            require_eligibility_proof: true,
            allocations_path: None,
            persist_failure_policy: PersistFailurePolicy::Reject,
            operator_token: None,
            eligibility: EligibilityConfig::default(),
            presale: PresaleCapConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Defaults, then the JSON file at `path` if given, then `SEALDROP_*`
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut cfg = match path {
            Some(path) => {
                let bytes = fs::read(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                serde_json::from_slice(&bytes).map_err(|source| ConfigError::Decode {
                    path: path.to_path_buf(),
                    source,
                })?
            }
            None => Self::default(),
        };
        cfg.apply_env();
        Ok(cfg)
    }

    pub fn apply_env(&mut self) {
        if let Ok(treasury) = std::env::var("SEALDROP_TREASURY_WALLET") {
            if !treasury.trim().is_empty() {
                self.treasury_wallet = Some(treasury.trim().to_string());
            }
        }
        if let Ok(raw) = std::env::var("SEALDROP_PERSIST_FAILURE_POLICY") {
            if raw.eq_ignore_ascii_case("degrade_to_ephemeral") {
                self.persist_failure_policy = PersistFailurePolicy::DegradeToEphemeral;
            } else if raw.eq_ignore_ascii_case("reject") {
                self.persist_failure_policy = PersistFailurePolicy::Reject;
            }
        }
        if let Ok(token) = std::env::var("SEALDROP_OPERATOR_TOKEN") {
            if !token.trim().is_empty() {
                self.operator_token = Some(token.trim().to_string());
            }
        }
        self.rate_limit_rps = read_env_u32("SEALDROP_RATE_LIMIT_RPS", self.rate_limit_rps);
        self.default_allocation =
            read_env_u64("SEALDROP_DEFAULT_ALLOCATION", self.default_allocation);
        self.max_body_bytes = read_env_usize("SEALDROP_MAX_BODY_BYTES", self.max_body_bytes);
    }

    /// Startup checks. Anything failing here is fatal; no request is served.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let treasury = self
            .treasury_wallet
            .as_deref()
            .ok_or_else(|| ConfigError::Invalid("treasury_wallet is required".to_string()))?;
        validate_wallet(treasury)
            .map_err(|e| ConfigError::Invalid(format!("treasury_wallet: {e}")))?;
        if self.max_body_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max_body_bytes must be positive".to_string(),
            ));
        }
        if self.rate_limit_rps == 0 {
            return Err(ConfigError::Invalid(
                "rate_limit_rps must be positive".to_string(),
            ));
        }
        if let Some(token) = self.operator_token.as_deref() {
            if token.len() < MIN_OPERATOR_TOKEN_LEN {
                return Err(ConfigError::Invalid(format!(
                    "operator_token must be at least {MIN_OPERATOR_TOKEN_LEN} characters"
                )));
            }
        }
        self.presale
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct AllocationsFile {
    allocations: BTreeMap<String, u64>,
}

/// Reads `{"allocations": {"<wallet>": <amount>}}`.
pub fn load_allocations(path: &Path) -> Result<BTreeMap<String, u64>, ConfigError> {
    let bytes = fs::read(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let file: AllocationsFile =
        serde_json::from_slice(&bytes).map_err(|source| ConfigError::Decode {
            path: path.to_path_buf(),
            source,
        })?;
    for wallet in file.allocations.keys() {
        validate_wallet(wallet)
            .map_err(|e| ConfigError::Invalid(format!("allocation for {wallet}: {e}")))?;
    }
    Ok(file.allocations)
}

fn read_env_u64(key: &str, default_value: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.parse::<u64>().ok())
        .unwrap_or(default_value)
}

fn read_env_u32(key: &str, default_value: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.parse::<u32>().ok())
        .unwrap_or(default_value)
}

fn read_env_usize(key: &str, default_value: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.parse::<usize>().ok())
        .unwrap_or(default_value)
}
