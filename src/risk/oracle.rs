use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::Deserialize;

use crate::model::{RiskDimension, RiskLevel, RiskReport};
use crate::now_ts;

const DEFAULT_ORACLE_API: &str = "https://api.gopluslabs.io/api/v1";
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// External risk source seam. Returns a fully-shaped report; caching is the
/// engine's job.
#[async_trait]
pub trait RiskOracle: Send + Sync {
    async fn get_token_risk(&self, chain_id: u64, contract: &str) -> Result<RiskReport>;
}

// ── HTTP implementation ────────────────────────────────────────────

/// Wire shape of a token-security payload. Numeric flags arrive as "0"/"1"
/// strings; taxes as fractional strings.
#[derive(Debug, Deserialize)]
struct OracleResponse {
    result: std::collections::HashMap<String, TokenSecurity>,
}

#[derive(Debug, Default, Deserialize)]
struct TokenSecurity {
    #[serde(default)]
    is_honeypot: Option<String>,
    #[serde(default)]
    buy_tax: Option<String>,
    #[serde(default)]
    sell_tax: Option<String>,
    #[serde(default)]
    is_open_source: Option<String>,
    #[serde(default)]
    owner_change_balance: Option<String>,
    #[serde(default)]
    can_take_back_ownership: Option<String>,
    #[serde(default)]
    is_mintable: Option<String>,
    #[serde(default)]
    lp_total_supply: Option<String>,
    #[serde(default)]
    total_liquidity_usd: Option<String>,
}

pub struct HttpRiskOracle {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpRiskOracle {
    pub fn new(base_url: Option<&str>, api_key: Option<&str>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent("chainclaw/0.1")
            .build()
            .context("creating risk oracle HTTP client")?;
        Ok(HttpRiskOracle {
            client,
            base_url: base_url.unwrap_or(DEFAULT_ORACLE_API).trim_end_matches('/').to_string(),
            api_key: api_key.map(String::from),
        })
    }
}

#[async_trait]
impl RiskOracle for HttpRiskOracle {
    async fn get_token_risk(&self, chain_id: u64, contract: &str) -> Result<RiskReport> {
        let contract = contract.to_lowercase();
        let mut req = self
            .client
            .get(format!("{}/token_security/{chain_id}", self.base_url))
            .query(&[("contract_addresses", contract.as_str())]);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", key);
        }

        let resp = req
            .send()
            .await
            .context("risk oracle request")?
            .error_for_status()
            .context("risk oracle status")?
            .json::<OracleResponse>()
            .await
            .context("risk oracle payload")?;

        let security = resp
            .result
            .get(&contract)
            .ok_or_else(|| anyhow!("oracle has no data for {contract}"))?;

        Ok(build_report(chain_id, &contract, security))
    }
}

fn flag(value: &Option<String>) -> bool {
    value.as_deref() == Some("1")
}

fn fraction(value: &Option<String>) -> f64 {
    value.as_deref().and_then(|s| s.parse::<f64>().ok()).unwrap_or(0.0)
}

/// Fold the wire payload into a scored report. Each adverse finding
/// contributes a dimension; the overall score is the capped sum.
fn build_report(chain_id: u64, contract: &str, sec: &TokenSecurity) -> RiskReport {
    let mut dimensions = Vec::new();
    let mut push = |name: &str, score: f64, detail: Option<String>| {
        dimensions.push(RiskDimension { name: name.to_string(), score, detail });
    };

    let is_honeypot = flag(&sec.is_honeypot);
    if is_honeypot {
        push("honeypot", 100.0, Some("sell simulation fails".into()));
    }

    let buy_tax = fraction(&sec.buy_tax);
    if buy_tax > 0.0 {
        push("buy_tax", (buy_tax * 200.0).min(60.0), Some(format!("{:.1}%", buy_tax * 100.0)));
    }
    let sell_tax = fraction(&sec.sell_tax);
    if sell_tax > 0.0 {
        push("sell_tax", (sell_tax * 250.0).min(80.0), Some(format!("{:.1}%", sell_tax * 100.0)));
    }

    let source_verified = flag(&sec.is_open_source);
    if !source_verified {
        push("unverified_source", 30.0, None);
    }

    let owner_can_modify = flag(&sec.owner_change_balance)
        || flag(&sec.can_take_back_ownership)
        || flag(&sec.is_mintable);
    if owner_can_modify {
        push("owner_privileges", 40.0, Some("owner can mint or modify balances".into()));
    }

    let liquidity_usd = sec
        .total_liquidity_usd
        .as_deref()
        .or(sec.lp_total_supply.as_deref())
        .and_then(|s| s.parse::<f64>().ok());
    if let Some(liq) = liquidity_usd {
        if liq < 10_000.0 {
            push("thin_liquidity", 25.0, Some(format!("${liq:.0}")));
        }
    }

    let overall_score = if is_honeypot {
        100.0
    } else {
        dimensions.iter().map(|d| d.score).sum::<f64>().min(100.0)
    };

    RiskReport {
        chain_id,
        contract: contract.to_string(),
        overall_score,
        risk_level: RiskLevel::from_score(overall_score),
        dimensions,
        is_honeypot,
        has_buy_tax: buy_tax > 0.0,
        has_sell_tax: sell_tax > 0.0,
        source_verified,
        owner_can_modify,
        liquidity_usd,
        cached_at: now_ts(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn honeypot_pins_score_to_critical() {
        let sec = TokenSecurity {
            is_honeypot: Some("1".into()),
            is_open_source: Some("1".into()),
            ..Default::default()
        };
        let report = build_report(1, "0xbad", &sec);
        assert!(report.is_honeypot);
        assert_eq!(report.overall_score, 100.0);
        assert_eq!(report.risk_level, RiskLevel::Critical);
        assert!(report.is_permanent());
    }

    #[test]
    fn clean_token_scores_safe() {
        let sec = TokenSecurity {
            is_honeypot: Some("0".into()),
            is_open_source: Some("1".into()),
            buy_tax: Some("0".into()),
            sell_tax: Some("0".into()),
            total_liquidity_usd: Some("2500000".into()),
            ..Default::default()
        };
        let report = build_report(1, "0xgood", &sec);
        assert_eq!(report.risk_level, RiskLevel::Safe);
        assert!(report.source_verified);
        assert_eq!(report.liquidity_usd, Some(2_500_000.0));
    }

    #[test]
    fn taxes_and_privileges_accumulate() {
        let sec = TokenSecurity {
            is_honeypot: Some("0".into()),
            is_open_source: Some("0".into()),
            sell_tax: Some("0.10".into()),
            is_mintable: Some("1".into()),
            ..Default::default()
        };
        let report = build_report(1, "0xmeh", &sec);
        assert!(report.has_sell_tax);
        assert!(report.owner_can_modify);
        assert!(!report.source_verified);
        // 25 (sell tax) + 30 (unverified) + 40 (owner) = 95 -> critical
        assert_eq!(report.risk_level, RiskLevel::Critical);
    }
}
