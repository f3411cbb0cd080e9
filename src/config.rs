//! Runtime configuration from command-line flags and `COINGATE_*` environment
//! variables.

use std::time::Duration;

use clap::Parser;
use thiserror::Error;

use crate::retry::RetryPolicy;
use crate::upstream::Endpoints;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid upstream URL '{url}': {reason}")]
    UpstreamUrl { url: String, reason: String },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
}

/// Caching gateway in front of the CoinGecko market-data API.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "coingate")]
#[command(about = "Caching, retrying gateway for crypto market data")]
#[command(version)]
pub struct Config {
    /// Address the gateway listens on
    #[arg(long, env = "COINGATE_LISTEN", default_value = "127.0.0.1:3000")]
    pub listen: String,

    /// Base URL of the market-data API
    #[arg(
        long,
        env = "COINGATE_UPSTREAM_URL",
        default_value = "https://api.coingecko.com/api/v3"
    )]
    pub upstream_url: String,

    /// Bound on each individual upstream attempt, in seconds
    #[arg(long, env = "COINGATE_UPSTREAM_TIMEOUT_SECS", default_value_t = 10)]
    pub upstream_timeout_secs: u64,

    /// Freshness window for coin listings, coin details and trending, in seconds
    #[arg(long, env = "COINGATE_COINS_TTL_SECS", default_value_t = 30)]
    pub coins_ttl_secs: u64,

    /// Freshness window for global market data, in seconds
    #[arg(long, env = "COINGATE_GLOBAL_TTL_SECS", default_value_t = 60)]
    pub global_ttl_secs: u64,

    /// Upstream attempts per logical request, including the first
    #[arg(long, env = "COINGATE_MAX_ATTEMPTS", default_value_t = 3)]
    pub max_attempts: u32,

    /// Longest single wait between attempts, in seconds; caps `Retry-After`
    #[arg(long, env = "COINGATE_MAX_RETRY_AFTER_SECS", default_value_t = 60)]
    pub max_retry_after_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:3000".to_owned(),
            upstream_url: "https://api.coingecko.com/api/v3".to_owned(),
            upstream_timeout_secs: 10,
            coins_ttl_secs: 30,
            global_ttl_secs: 60,
            max_attempts: 3,
            max_retry_after_secs: 60,
        }
    }
}

impl Config {
    /// Rejects settings the gateway cannot run with.
    ///
    /// Zero freshness windows are allowed; they disable caching but keep
    /// coalescing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.upstream_timeout_secs == 0 {
            return Err(ConfigError::Zero {
                field: "upstream timeout",
            });
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Zero {
                field: "max attempts",
            });
        }
        self.endpoints().map(|_| ())
    }

    pub fn endpoints(&self) -> Result<Endpoints, ConfigError> {
        Endpoints::new(&self.upstream_url)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(self.max_attempts)
            .with_max_delay(Duration::from_secs(self.max_retry_after_secs))
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }

    pub fn coins_ttl(&self) -> Duration {
        Duration::from_secs(self.coins_ttl_secs)
    }

    pub fn global_ttl(&self) -> Duration {
        Duration::from_secs(self.global_ttl_secs)
    }
}
