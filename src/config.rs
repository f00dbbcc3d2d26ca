//! Configuration for the billing sidecar: CLI arguments plus a JSON config file, with
//! secret-bearing fields resolvable from an environment variable (`LiteralOrEnv`).

use std::fs;
use std::net::IpAddr;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use alloy_primitives::{Address, B256};
use clap::Parser;
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "billing-sidecar")]
#[command(about = "Sandbox usage-billing sidecar")]
struct CliArgs {
    /// Path to the JSON configuration file
    #[arg(long, short, env = "CONFIG", default_value = "config.json")]
    config: PathBuf,
}

/// A transparent wrapper that resolves `$VAR` / `${VAR}` environment variable references
/// during deserialization, falling back to the literal string otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteralOrEnv<T>(T);

impl<T> LiteralOrEnv<T> {
    pub fn into_inner(self) -> T {
        self.0
    }

    fn parse_env_var_syntax(s: &str) -> Option<String> {
        if let Some(stripped) = s.strip_prefix("${") {
            stripped.strip_suffix('}').map(str::to_string)
        } else if let Some(var_name) = s.strip_prefix('$') {
            (!var_name.is_empty() && var_name.chars().all(|c| c.is_alphanumeric() || c == '_'))
                .then(|| var_name.to_string())
        } else {
            None
        }
    }
}

impl<T> Deref for LiteralOrEnv<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'de, T> Deserialize<'de> for LiteralOrEnv<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let value = if let Some(var_name) = Self::parse_env_var_syntax(&s) {
            std::env::var(&var_name).map_err(|_| {
                serde::de::Error::custom(format!(
                    "environment variable '{var_name}' not found (referenced as '{s}')"
                ))
            })?
        } else {
            s
        };
        value
            .parse::<T>()
            .map_err(|e| serde::de::Error::custom(format!("failed to parse value: {e}")))
    }
}

impl<T: Serialize> Serialize for LiteralOrEnv<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.serialize(serializer)
    }
}

/// A validated 32-byte EVM private key, hex-encoded with a `0x` prefix.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvmPrivateKey(B256);

impl EvmPrivateKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_ref()
    }
}

impl FromStr for EvmPrivateKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        B256::from_str(s).map(Self).map_err(|e| format!("invalid evm private key: {e}"))
    }
}

/// Redis connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub url: Url,
    #[serde(default)]
    pub password: Option<LiteralOrEnv<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProvisioningConfig {
    pub base_url: Url,
    pub admin_key: LiteralOrEnv<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub rpc_url: Url,
    pub settlement_contract: Address,
    pub chain_id: u64,
    pub tee_signer_key: LiteralOrEnv<EvmPrivateKey>,
    pub provider_address: Address,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PricingConfig {
    /// Flat fee charged at session creation, as a decimal-string unsigned integer.
    pub create_fee: String,
    /// Per-second usage price, as a decimal-string unsigned integer.
    pub compute_price_per_sec: String,
    /// Minimum on-chain balance required to create a sandbox. `None` disables the gate.
    #[serde(default)]
    pub minimum_balance: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "config_defaults::default_port")]
    pub port: u16,
    #[serde(default = "config_defaults::default_host")]
    pub host: IpAddr,
    #[serde(default = "config_defaults::default_voucher_interval_secs")]
    pub voucher_interval_secs: u64,
    pub store: StoreConfig,
    pub provisioning: ProvisioningConfig,
    pub chain: ChainConfig,
    pub pricing: PricingConfig,
}

mod config_defaults {
    use std::env;
    use std::net::IpAddr;

    pub const DEFAULT_PORT: u16 = 8080;
    pub const DEFAULT_HOST: &str = "0.0.0.0";
    pub const DEFAULT_VOUCHER_INTERVAL_SECS: u64 = 60;

    pub fn default_port() -> u16 {
        env::var("PORT").ok().and_then(|s| s.parse().ok()).unwrap_or(DEFAULT_PORT)
    }

    pub fn default_host() -> IpAddr {
        env::var("HOST")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(IpAddr::V4(DEFAULT_HOST.parse().unwrap()))
    }

    pub fn default_voucher_interval_secs() -> u64 {
        env::var("VOUCHER_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_VOUCHER_INTERVAL_SECS)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file at {0}: {1}")]
    FileRead(PathBuf, std::io::Error),
    #[error("failed to parse config file: {0}")]
    JsonParse(#[from] serde_json::Error),
    #[error("invalid pricing value: {0}")]
    BadPricing(String),
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let cli_args = CliArgs::parse();
        let path = Path::new(&cli_args.config)
            .canonicalize()
            .map_err(|e| ConfigError::FileRead(cli_args.config.clone(), e))?;
        Self::load_from_path(path)
    }

    fn load_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(&path).map_err(|e| ConfigError::FileRead(path, e))?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }
}
