//! Swap quote aggregator client. Background engines use it to turn
//! "buy X with Y" into a concrete router transaction; the executor never
//! sees the aggregator, only the resulting `TransactionRequest`.

use std::time::Duration;

use alloy::hex;
use alloy::primitives::{Address, Bytes, U256};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::Deserialize;

use crate::model::TransactionRequest;

const DEFAULT_QUOTE_API: &str = "https://li.quest/v1";
const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// What a skill or engine asks the aggregator for.
#[derive(Debug, Clone)]
pub struct QuoteQuery {
    pub chain_id: u64,
    /// Token to sell; `None` spends the native token.
    pub from_token: Option<Address>,
    /// Token to buy.
    pub to_token: Address,
    /// Amount of `from_token` (or native) in smallest unit.
    pub amount: U256,
    pub from_address: Address,
    pub slippage_bps: u32,
}

/// A routed swap: expected output and the transaction that performs it.
#[derive(Debug, Clone)]
pub struct SwapQuote {
    pub to_amount: U256,
    pub tx: TransactionRequest,
}

/// Aggregator seam; HTTP implementation plus test fakes.
#[async_trait]
pub trait QuoteClient: Send + Sync {
    async fn quote(&self, query: &QuoteQuery) -> Result<SwapQuote>;
}

// ── HTTP implementation (LiFi-compatible) ──────────────────────────

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    estimate: QuoteEstimate,
    #[serde(rename = "transactionRequest")]
    transaction_request: Option<WireTxRequest>,
}

#[derive(Debug, Deserialize)]
struct QuoteEstimate {
    #[serde(rename = "toAmount")]
    to_amount: String,
}

#[derive(Debug, Deserialize)]
struct WireTxRequest {
    to: String,
    data: String,
    value: String,
    #[serde(rename = "gasLimit")]
    gas_limit: Option<String>,
}

/// Native token placeholder the aggregator understands.
const NATIVE_PLACEHOLDER: Address = Address::ZERO;

pub struct HttpQuoteClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpQuoteClient {
    pub fn new(base_url: Option<&str>, api_key: Option<&str>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent("chainclaw/0.1")
            .build()
            .context("creating quote HTTP client")?;
        Ok(HttpQuoteClient {
            client,
            base_url: base_url.unwrap_or(DEFAULT_QUOTE_API).trim_end_matches('/').to_string(),
            api_key: api_key.map(String::from),
        })
    }
}

#[async_trait]
impl QuoteClient for HttpQuoteClient {
    async fn quote(&self, query: &QuoteQuery) -> Result<SwapQuote> {
        let from_token = query.from_token.unwrap_or(NATIVE_PLACEHOLDER);
        let slippage = query.slippage_bps as f64 / 10_000.0;

        let mut req = self
            .client
            .get(format!("{}/quote", self.base_url))
            .query(&[
                ("fromChain", query.chain_id.to_string()),
                ("toChain", query.chain_id.to_string()),
                ("fromToken", format!("{from_token:?}")),
                ("toToken", format!("{:?}", query.to_token)),
                ("fromAmount", query.amount.to_string()),
                ("fromAddress", format!("{:?}", query.from_address)),
                ("slippage", slippage.to_string()),
            ]);
        if let Some(key) = &self.api_key {
            req = req.header("x-lifi-api-key", key);
        }

        let resp = req
            .send()
            .await
            .context("quote request")?
            .error_for_status()
            .context("quote status")?
            .json::<QuoteResponse>()
            .await
            .context("quote payload")?;

        let wire = resp
            .transaction_request
            .ok_or_else(|| anyhow!("aggregator returned no transaction"))?;

        let to: Address = wire.to.parse().map_err(|e| anyhow!("bad quote tx.to: {e}"))?;
        let data = Bytes::from(
            hex::decode(wire.data.trim_start_matches("0x")).context("bad quote calldata")?,
        );
        let value = parse_wire_amount(&wire.value)?;
        let gas_limit = wire.gas_limit.as_deref().and_then(parse_wire_gas);

        let mut tx = TransactionRequest::call(query.chain_id, query.from_address, to, value, data);
        tx.gas_limit = gas_limit;

        Ok(SwapQuote {
            to_amount: resp
                .estimate
                .to_amount
                .parse()
                .map_err(|e| anyhow!("bad toAmount: {e}"))?,
            tx,
        })
    }
}

/// Aggregators send amounts as either decimal or 0x-hex strings.
fn parse_wire_amount(s: &str) -> Result<U256> {
    if let Some(hex_str) = s.strip_prefix("0x") {
        U256::from_str_radix(hex_str, 16).map_err(|e| anyhow!("bad hex amount {s}: {e}"))
    } else {
        s.parse().map_err(|e| anyhow!("bad amount {s}: {e}"))
    }
}

fn parse_wire_gas(s: &str) -> Option<u64> {
    s.parse()
        .ok()
        .or_else(|| s.strip_prefix("0x").and_then(|h| u64::from_str_radix(h, 16).ok()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_amounts_parse_both_encodings() {
        assert_eq!(parse_wire_amount("1000").unwrap(), U256::from(1000));
        assert_eq!(parse_wire_amount("0x3e8").unwrap(), U256::from(1000));
        assert!(parse_wire_amount("not-a-number").is_err());

        assert_eq!(parse_wire_gas("21000"), Some(21_000));
        assert_eq!(parse_wire_gas("0x5208"), Some(21_000));
        assert_eq!(parse_wire_gas("junk"), None);
    }
}
