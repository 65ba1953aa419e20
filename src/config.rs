//! Environment-driven configuration. Secrets (signing key, API keys) only
//! ever come from the environment and are never written to the store.
//!
//! Key resolution supports the `_FILE` variant: `CHAINCLAW_PRIVATE_KEY_FILE`
//! points at a file containing the key, so the key never shows up in `env`
//! output inside containers.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use crate::model::UserLimits;

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub data_dir: PathBuf,
    pub log_level: String,
    /// chain_id -> RPC URL, overriding the built-in defaults.
    pub rpc_overrides: HashMap<u64, String>,

    pub risk_api_url: Option<String>,
    pub risk_api_key: Option<String>,
    pub sim_api_url: Option<String>,
    pub sim_api_key: Option<String>,
    pub quote_api_url: Option<String>,
    pub quote_api_key: Option<String>,
    pub price_api_url: Option<String>,

    pub dca_poll_interval: Duration,
    pub limit_poll_interval: Duration,
    pub whale_poll_interval: Duration,
    pub signal_poll_interval: Duration,

    pub default_limits: UserLimits,
    pub confirm_threshold: f64,
    pub risk_cache_ttl: Duration,
    pub snipe_min_liquidity_usd: f64,
    pub delivery_max_attempts: u32,
    pub alert_channel: String,

    pub mev_protect: bool,
    pub mev_relay_url: Option<String>,

    pub shutdown_timeout: Duration,

    /// Hot signing key. Required for `run`; absent for read-only commands.
    pub private_key: Option<String>,
}

impl AgentConfig {
    pub fn from_env() -> Result<Self> {
        let rpc_overrides = parse_rpc_overrides(&env_or("CHAINCLAW_RPC_OVERRIDES", ""))?;

        let default_limits = UserLimits {
            max_per_tx_usd: env_parse("CHAINCLAW_MAX_PER_TX_USD", 1_000.0)?,
            max_per_day_usd: env_parse("CHAINCLAW_MAX_PER_DAY_USD", 5_000.0)?,
            cooldown_seconds: env_parse("CHAINCLAW_COOLDOWN_SECONDS", 30u64)?,
            slippage_bps: env_parse("CHAINCLAW_SLIPPAGE_BPS", 100u32)?,
        };

        Ok(AgentConfig {
            data_dir: PathBuf::from(env_or("CHAINCLAW_DATA_DIR", "data")),
            log_level: env_or("CHAINCLAW_LOG", "info"),
            rpc_overrides,

            risk_api_url: env_opt("CHAINCLAW_RISK_API_URL"),
            risk_api_key: env_opt("CHAINCLAW_RISK_API_KEY"),
            sim_api_url: env_opt("CHAINCLAW_SIM_API_URL"),
            sim_api_key: env_opt("CHAINCLAW_SIM_API_KEY"),
            quote_api_url: env_opt("CHAINCLAW_QUOTE_API_URL"),
            quote_api_key: env_opt("CHAINCLAW_QUOTE_API_KEY"),
            price_api_url: env_opt("CHAINCLAW_PRICE_API_URL"),

            dca_poll_interval: Duration::from_millis(env_parse("CHAINCLAW_DCA_POLL_MS", 60_000u64)?),
            limit_poll_interval: Duration::from_millis(env_parse("CHAINCLAW_LIMIT_POLL_MS", 15_000u64)?),
            whale_poll_interval: Duration::from_millis(env_parse("CHAINCLAW_WHALE_POLL_MS", 12_000u64)?),
            signal_poll_interval: Duration::from_millis(env_parse("CHAINCLAW_SIGNAL_POLL_MS", 30_000u64)?),

            default_limits,
            confirm_threshold: env_parse("CHAINCLAW_CONFIRM_THRESHOLD", 0.5)?,
            risk_cache_ttl: Duration::from_secs(env_parse("CHAINCLAW_RISK_CACHE_TTL_SECS", 600u64)?),
            snipe_min_liquidity_usd: env_parse("CHAINCLAW_SNIPE_MIN_LIQUIDITY_USD", 5_000.0)?,
            delivery_max_attempts: env_parse("CHAINCLAW_DELIVERY_MAX_ATTEMPTS", 5u32)?,
            alert_channel: env_or("CHAINCLAW_ALERT_CHANNEL", "telegram"),

            mev_protect: env_parse("CHAINCLAW_MEV_PROTECT", false)?,
            mev_relay_url: env_opt("CHAINCLAW_MEV_RELAY_URL"),

            shutdown_timeout: Duration::from_secs(env_parse("CHAINCLAW_SHUTDOWN_TIMEOUT_SECS", 30u64)?),

            private_key: resolve_private_key()?,
        })
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("chainclaw.db")
    }

    /// The signing key, or a setup error for commands that need one.
    pub fn require_private_key(&self) -> Result<&str> {
        self.private_key.as_deref().ok_or_else(|| {
            anyhow::anyhow!(
                "signing key not configured. Set CHAINCLAW_PRIVATE_KEY or \
                 CHAINCLAW_PRIVATE_KEY_FILE pointing to a file containing the key."
            )
        })
    }
}

/// `CHAINCLAW_PRIVATE_KEY` directly, or `CHAINCLAW_PRIVATE_KEY_FILE` as a
/// path. The `_FILE` form is preferred in containers.
fn resolve_private_key() -> Result<Option<String>> {
    if let Ok(pk) = std::env::var("CHAINCLAW_PRIVATE_KEY") {
        return Ok(Some(pk.trim().to_string()));
    }
    if let Ok(path) = std::env::var("CHAINCLAW_PRIVATE_KEY_FILE") {
        let pk = std::fs::read_to_string(&path)
            .with_context(|| format!("reading private key from {path}"))?;
        return Ok(Some(pk.trim().to_string()));
    }
    Ok(None)
}

/// Comma list of `chain_id=url` pairs.
fn parse_rpc_overrides(raw: &str) -> Result<HashMap<u64, String>> {
    let mut out = HashMap::new();
    for pair in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let Some((chain, url)) = pair.split_once('=') else {
            bail!("bad RPC override '{pair}', expected chain_id=url");
        };
        let chain_id: u64 =
            chain.trim().parse().with_context(|| format!("bad chain id in '{pair}'"))?;
        out.insert(chain_id, url.trim().to_string());
    }
    Ok(out)
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("bad value for {key}: {e}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_overrides_parse() {
        let overrides =
            parse_rpc_overrides("1=https://rpc.example, 8453=https://base.example").unwrap();
        assert_eq!(overrides.len(), 2);
        assert_eq!(overrides[&1], "https://rpc.example");
        assert_eq!(overrides[&8453], "https://base.example");

        assert!(parse_rpc_overrides("").unwrap().is_empty());
        assert!(parse_rpc_overrides("nonsense").is_err());
        assert!(parse_rpc_overrides("abc=https://x").is_err());
    }
}
