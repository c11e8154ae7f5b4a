use std::{net::Ipv4Addr, path::PathBuf, str::FromStr, time::Duration};

use clap::{Parser, command};
use serde::Deserialize;
use services::{TrackerConfig, types::ChainScope};
use storage::DbConfig;
use url::Url;

use crate::errors::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub eth: Eth,
    pub app: App,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.app.max_missed_passes == 0 {
            return Err(Error::Other(
                "max_missed_passes must be at least 1".to_string(),
            ));
        }

        if self.app.max_concurrent_lookups == 0 {
            return Err(Error::Other(
                "max_concurrent_lookups must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            max_missed_passes: self.app.max_missed_passes,
            max_concurrent_lookups: self.app.max_concurrent_lookups,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Eth {
    /// URL to an Ethereum RPC endpoint.
    #[serde(deserialize_with = "parse_url")]
    pub rpc: Url,
    /// Records are kept apart per chain scope, usually the hex chain id.
    #[serde(deserialize_with = "parse_chain_scope")]
    pub chain_scope: ChainScope,
}

fn parse_chain_scope<'de, D>(deserializer: D) -> std::result::Result<ChainScope, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let scope: String = Deserialize::deserialize(deserializer)?;
    ChainScope::new(&scope).map_err(|e| {
        let msg = format!("Failed to parse chain scope '{scope}': {e}");
        serde::de::Error::custom(msg)
    })
}

fn parse_url<'de, D>(deserializer: D) -> std::result::Result<Url, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let url_str: String = Deserialize::deserialize(deserializer)?;
    Url::from_str(&url_str).map_err(|e| {
        let msg = format!("Failed to parse URL '{url_str}': {e};");
        serde::de::Error::custom(msg)
    })
}

#[derive(Debug, Clone, Deserialize)]
pub struct App {
    /// Port used by the started server
    pub port: u16,
    /// IPv4 address on which the server will listen for connections
    pub host: Ipv4Addr,
    /// Postgres database configuration
    pub db: DbConfig,
    /// How often submitted transactions are checked for receipts
    #[serde(deserialize_with = "human_readable_duration")]
    pub reconcile_interval: Duration,
    /// How often submitted transactions are broadcast again
    #[serde(deserialize_with = "human_readable_duration")]
    pub resubmit_interval: Duration,
    #[serde(default = "default_max_missed_passes")]
    pub max_missed_passes: u32,
    #[serde(default = "default_max_concurrent_lookups")]
    pub max_concurrent_lookups: usize,
}

fn default_max_missed_passes() -> u32 {
    TrackerConfig::default().max_missed_passes
}

fn default_max_concurrent_lookups() -> usize {
    TrackerConfig::default().max_concurrent_lookups
}

fn human_readable_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let duration_str: String = Deserialize::deserialize(deserializer)?;
    humantime::parse_duration(&duration_str).map_err(|e| {
        let msg = format!("Failed to parse duration '{duration_str}': {e};");
        serde::de::Error::custom(msg)
    })
}

#[derive(Debug, Clone)]
pub struct Internal {
    pub eth_errors_before_unhealthy: usize,
}

impl Default for Internal {
    fn default() -> Self {
        Self {
            eth_errors_before_unhealthy: 3,
        }
    }
}

#[derive(Parser)]
#[command(
    name = "tx-tracker",
    version,
    about,
    propagate_version = true,
    arg_required_else_help(true)
)]
struct Cli {
    #[arg(value_name = "FILE", help = "Path to the configuration file")]
    config_path: PathBuf,
}

pub fn parse() -> Result<Config> {
    let cli = Cli::parse();

    let config = config::Config::builder()
        .add_source(config::File::from(cli.config_path))
        .add_source(config::Environment::with_prefix("TRACKER").separator("__"))
        .build()?;

    let config: Config = config.try_deserialize()?;
    config.validate()?;

    Ok(config)
}
