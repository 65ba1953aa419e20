//! USD price lookups with a short in-memory cache. Guardrail conversion,
//! DCA value averaging, limit-order triggers, and whale USD valuation all
//! read through here.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;

use crate::chain::chain_name;
use crate::now_ms;

const DEFAULT_PRICE_API: &str = "https://coins.llama.fi";
const CACHE_TTL_MS: i64 = 30_000;
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Price source seam. The production implementation talks to a
/// llama.fi-compatible endpoint; tests pin prices.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// USD price of the chain's native token.
    async fn native_price_usd(&self, chain_id: u64) -> Result<f64>;

    /// USD price of an ERC-20 by address.
    async fn token_price_usd(&self, chain_id: u64, token: &str) -> Result<f64>;
}

// ── HTTP implementation ────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct PricesResponse {
    coins: std::collections::HashMap<String, CoinPrice>,
}

#[derive(Debug, Deserialize)]
struct CoinPrice {
    price: f64,
}

pub struct HttpPriceFeed {
    client: reqwest::Client,
    base_url: String,
    cache: DashMap<String, (f64, i64)>,
}

impl HttpPriceFeed {
    pub fn new(base_url: Option<&str>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent("chainclaw/0.1")
            .build()
            .context("creating price feed HTTP client")?;
        Ok(HttpPriceFeed {
            client,
            base_url: base_url.unwrap_or(DEFAULT_PRICE_API).trim_end_matches('/').to_string(),
            cache: DashMap::new(),
        })
    }

    /// llama.fi coin key: `ethereum:0x...` for tokens,
    /// `coingecko:<native>` for gas tokens.
    fn native_key(chain_id: u64) -> Result<String> {
        let slug = match chain_id {
            1 | 10 | 8453 | 42161 => "ethereum",
            56 => "binancecoin",
            137 => "matic-network",
            _ => bail!("no native price mapping for chain {chain_id}"),
        };
        Ok(format!("coingecko:{slug}"))
    }

    async fn fetch(&self, key: &str) -> Result<f64> {
        if let Some(entry) = self.cache.get(key) {
            let (price, at) = *entry;
            if now_ms() - at < CACHE_TTL_MS {
                return Ok(price);
            }
        }

        let url = format!("{}/prices/current/{key}", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("price feed request")?
            .error_for_status()
            .context("price feed status")?
            .json::<PricesResponse>()
            .await
            .context("price feed payload")?;

        let price = resp
            .coins
            .get(key)
            .map(|c| c.price)
            .ok_or_else(|| anyhow::anyhow!("no price for {key}"))?;

        self.cache.insert(key.to_string(), (price, now_ms()));
        Ok(price)
    }
}

#[async_trait]
impl PriceFeed for HttpPriceFeed {
    async fn native_price_usd(&self, chain_id: u64) -> Result<f64> {
        self.fetch(&Self::native_key(chain_id)?).await
    }

    async fn token_price_usd(&self, chain_id: u64, token: &str) -> Result<f64> {
        let key = format!("{}:{}", chain_name(chain_id), token.to_lowercase());
        self.fetch(&key).await
    }
}

// ── Test fake ──────────────────────────────────────────────────────

/// Fixed-price feed for tests and dry runs.
#[derive(Default)]
pub struct StaticPriceFeed {
    native: DashMap<u64, f64>,
    tokens: DashMap<(u64, String), f64>,
}

impl StaticPriceFeed {
    pub fn with_native(self, chain_id: u64, price: f64) -> Self {
        self.native.insert(chain_id, price);
        self
    }

    pub fn with_token(self, chain_id: u64, token: &str, price: f64) -> Self {
        self.tokens.insert((chain_id, token.to_lowercase()), price);
        self
    }

    pub fn set_token(&self, chain_id: u64, token: &str, price: f64) {
        self.tokens.insert((chain_id, token.to_lowercase()), price);
    }
}

#[async_trait]
impl PriceFeed for StaticPriceFeed {
    async fn native_price_usd(&self, chain_id: u64) -> Result<f64> {
        self.native
            .get(&chain_id)
            .map(|p| *p)
            .ok_or_else(|| anyhow::anyhow!("no native price for chain {chain_id}"))
    }

    async fn token_price_usd(&self, chain_id: u64, token: &str) -> Result<f64> {
        self.tokens
            .get(&(chain_id, token.to_lowercase()))
            .map(|p| *p)
            .ok_or_else(|| anyhow::anyhow!("no price for {token}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_feed_round_trips() {
        let feed = StaticPriceFeed::default()
            .with_native(1, 2_500.0)
            .with_token(1, "0xAbC", 1.25);
        assert_eq!(feed.native_price_usd(1).await.unwrap(), 2_500.0);
        assert_eq!(feed.token_price_usd(1, "0xabc").await.unwrap(), 1.25);
        assert!(feed.native_price_usd(137).await.is_err());
    }

    #[test]
    fn native_keys_cover_supported_chains() {
        for chain in [1, 10, 56, 137, 8453, 42161] {
            assert!(HttpPriceFeed::native_key(chain).is_ok());
        }
        assert!(HttpPriceFeed::native_key(424242).is_err());
    }
}
