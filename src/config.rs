use std::env;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

fn get_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn get_env_bool(key: &str, default: bool) -> bool {
    match get_env(key) {
        None => default,
        Some(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "y" | "on"),
    }
}

fn get_env_f64(key: &str, default: f64) -> Result<f64> {
    match get_env(key) {
        None => Ok(default),
        Some(v) => Ok(v
            .parse::<f64>()
            .map_err(|e| anyhow!("{key} invalid float: {e}"))?),
    }
}

fn get_env_u64(key: &str, default: u64) -> Result<u64> {
    match get_env(key) {
        None => Ok(default),
        Some(v) => Ok(v
            .parse::<u64>()
            .map_err(|e| anyhow!("{key} invalid int: {e}"))?),
    }
}

fn get_env_u16(key: &str, default: u16) -> Result<u16> {
    match get_env(key) {
        None => Ok(default),
        Some(v) => Ok(v
            .parse::<u16>()
            .map_err(|e| anyhow!("{key} invalid port: {e}"))?),
    }
}

fn get_env_usize(key: &str, default: usize) -> Result<usize> {
    match get_env(key) {
        None => Ok(default),
        Some(v) => Ok(v
            .parse::<usize>()
            .map_err(|e| anyhow!("{key} invalid int: {e}"))?),
    }
}

fn get_env_string(key: &str, default: &str) -> String {
    get_env(key).unwrap_or_else(|| default.to_string())
}

/// One wallet the slow net-worth poller keeps refreshed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchedWallet {
    pub address: String,
    pub chain_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // HTTP server
    pub http_host: String,
    pub http_port: u16,

    // Storage
    pub sqlite_path: String,

    // Upstream services
    pub candles_base_url: String,
    pub net_worth_base_url: String,
    pub orderbook_base_url: String,
    pub upstream_timeout_ms: u64,
    pub upstream_max_retries: usize,
    pub upstream_retry_base_ms: u64,

    // Pollers (interval tiers by data volatility)
    pub pollers_enabled: bool,
    pub poll_fast_secs: u64,   // trades/prices snapshots
    pub poll_medium_secs: u64, // configurations + strategy tree
    pub poll_slow_secs: u64,   // wallet net worth
    pub poll_backoff_cap_secs: u64,
    pub poll_jitter_frac: f64,

    // Mirror cache
    pub series_window: usize,

    // Wallets mirrored by the slow tier. Format: "0xabc..:1,0xdef..:8453"
    pub watch_wallets: Vec<WatchedWallet>,
}

impl Settings {
    pub fn load() -> Result<Self> {
        let s = Self {
            http_host: get_env_string("HTTP_HOST", "127.0.0.1"),
            http_port: get_env_u16("HTTP_PORT", 8000)?,
            sqlite_path: get_env_string("SQLITE_PATH", "./data/dexwatch.sqlite"),
            candles_base_url: get_env_string("CANDLES_BASE_URL", "https://candles.example.com"),
            net_worth_base_url: get_env_string(
                "NET_WORTH_BASE_URL",
                "https://networth.example.com",
            ),
            orderbook_base_url: get_env_string("ORDERBOOK_BASE_URL", "http://127.0.0.1:9010"),
            upstream_timeout_ms: get_env_u64("UPSTREAM_TIMEOUT_MS", 5_000)?,
            upstream_max_retries: get_env_usize("UPSTREAM_MAX_RETRIES", 2)?,
            upstream_retry_base_ms: get_env_u64("UPSTREAM_RETRY_BASE_MS", 250)?,
            pollers_enabled: get_env_bool("POLLERS_ENABLED", true),
            poll_fast_secs: get_env_u64("POLL_FAST_SECS", 5)?,
            poll_medium_secs: get_env_u64("POLL_MEDIUM_SECS", 45)?,
            poll_slow_secs: get_env_u64("POLL_SLOW_SECS", 1_800)?,
            poll_backoff_cap_secs: get_env_u64("POLL_BACKOFF_CAP_SECS", 300)?,
            poll_jitter_frac: get_env_f64("POLL_JITTER_FRAC", 0.2)?,
            series_window: get_env_usize("SERIES_WINDOW", 60)?,
            watch_wallets: parse_watch_wallets(&get_env_string("WATCH_WALLETS", ""))?,
        };

        s.validate()?;
        Ok(s)
    }

    pub fn validate(&self) -> Result<()> {
        if self.upstream_timeout_ms < 1 {
            return Err(anyhow!(
                "UPSTREAM_TIMEOUT_MS must be >= 1 (got {})",
                self.upstream_timeout_ms
            ));
        }
        if self.upstream_retry_base_ms < 1 {
            return Err(anyhow!(
                "UPSTREAM_RETRY_BASE_MS must be >= 1 (got {})",
                self.upstream_retry_base_ms
            ));
        }
        if self.upstream_max_retries > 10 {
            return Err(anyhow!(
                "UPSTREAM_MAX_RETRIES must be <= 10 (got {})",
                self.upstream_max_retries
            ));
        }
        if self.poll_fast_secs < 1 || self.poll_medium_secs < 1 || self.poll_slow_secs < 1 {
            return Err(anyhow!(
                "poll intervals must be >= 1s (fast={} medium={} slow={})",
                self.poll_fast_secs,
                self.poll_medium_secs,
                self.poll_slow_secs
            ));
        }
        if self.poll_backoff_cap_secs < self.poll_fast_secs {
            return Err(anyhow!(
                "POLL_BACKOFF_CAP_SECS must be >= POLL_FAST_SECS (cap={} fast={})",
                self.poll_backoff_cap_secs,
                self.poll_fast_secs
            ));
        }
        if !self.poll_jitter_frac.is_finite()
            || self.poll_jitter_frac < 0.0
            || self.poll_jitter_frac > 1.0
        {
            return Err(anyhow!(
                "POLL_JITTER_FRAC must be in [0,1] (got {})",
                self.poll_jitter_frac
            ));
        }
        if self.series_window < 2 {
            return Err(anyhow!(
                "SERIES_WINDOW must be >= 2 (got {})",
                self.series_window
            ));
        }
        Ok(())
    }
}

fn parse_watch_wallets(raw: &str) -> Result<Vec<WatchedWallet>> {
    let mut out = Vec::new();
    for part in raw.split(',').map(|p| p.trim()).filter(|p| !p.is_empty()) {
        let (address, chain) = part
            .split_once(':')
            .ok_or_else(|| anyhow!("WATCH_WALLETS entry missing ':chain_id' (got {part})"))?;
        let chain_id = chain
            .trim()
            .parse::<u64>()
            .map_err(|e| anyhow!("WATCH_WALLETS chain id invalid in {part}: {e}"))?;
        out.push(WatchedWallet {
            address: address.trim().to_string(),
            chain_id,
        });
    }
    Ok(out)
}
