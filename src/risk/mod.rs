//! Contract/token risk evaluation: read-through cached oracle reports,
//! user allow/block lists, and the deterministic formatter confirmations
//! embed.

pub mod oracle;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::warn;

use crate::model::{ContractAction, RiskLevel, RiskReport};
use crate::now_ts;
use crate::store::Store;

use oracle::RiskOracle;

const ORACLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of `should_block`.
#[derive(Debug, Clone)]
pub struct BlockDecision {
    pub blocked: bool,
    pub reason: Option<String>,
}

impl BlockDecision {
    fn pass() -> Self {
        BlockDecision { blocked: false, reason: None }
    }

    fn block(reason: impl Into<String>) -> Self {
        BlockDecision { blocked: true, reason: Some(reason.into()) }
    }
}

pub struct RiskEngine {
    store: Store,
    oracle: Arc<dyn RiskOracle>,
    cache_ttl: Duration,
}

impl RiskEngine {
    pub fn new(store: Store, oracle: Arc<dyn RiskOracle>, cache_ttl: Duration) -> Self {
        RiskEngine { store, oracle, cache_ttl }
    }

    /// Read-through report lookup. Fresh cache entries are returned as-is;
    /// honeypot/critical entries never expire. A dead oracle degrades to
    /// the stale cache when one exists.
    pub async fn analyze(&self, chain_id: u64, contract: &str) -> Result<RiskReport> {
        let contract = contract.to_lowercase();

        let cached = self.store.get_risk_report(chain_id, &contract).await?;
        if let Some(report) = &cached {
            let fresh = now_ts() - report.cached_at < self.cache_ttl.as_secs() as i64;
            if fresh || report.is_permanent() {
                return Ok(report.clone());
            }
        }

        let fetched =
            tokio::time::timeout(ORACLE_TIMEOUT, self.oracle.get_token_risk(chain_id, &contract))
                .await
                .map_err(|_| anyhow::anyhow!("risk oracle timed out"))
                .and_then(|r| r);

        match fetched {
            Ok(report) => {
                self.store.put_risk_report(&report).await?;
                Ok(report)
            }
            Err(err) => {
                if let Some(stale) = cached {
                    warn!(chain_id, contract, %err, "risk oracle unavailable, using stale report");
                    return Ok(stale);
                }
                Err(err).context("risk oracle lookup")
            }
        }
    }

    /// Contract-list precedence first (block > allow), then the report:
    /// honeypots and critical-risk contracts are refused. An unreachable
    /// oracle with no cached report degrades to not-blocked.
    pub async fn should_block(
        &self,
        _user_id: &str,
        chain_id: u64,
        contract: &str,
    ) -> Result<BlockDecision> {
        if let Some(rule) = self.store.get_contract_rule(chain_id, contract).await? {
            return Ok(match rule.action {
                ContractAction::Block => {
                    BlockDecision::block(format!("contract is block-listed: {}", rule.reason))
                }
                ContractAction::Allow => BlockDecision::pass(),
            });
        }

        let report = match self.analyze(chain_id, contract).await {
            Ok(report) => report,
            Err(err) => {
                warn!(chain_id, contract, %err, "risk analysis unavailable, allowing");
                return Ok(BlockDecision::pass());
            }
        };

        if report.is_honeypot {
            return Ok(BlockDecision::block("token is a honeypot (cannot sell)"));
        }
        if report.risk_level == RiskLevel::Critical {
            return Ok(BlockDecision::block(format!(
                "critical risk score {:.0}/100",
                report.overall_score
            )));
        }

        Ok(BlockDecision::pass())
    }

    /// Medium/high risk deserves a warning but not an automatic block.
    pub fn needs_warning(report: &RiskReport) -> bool {
        matches!(report.risk_level, RiskLevel::Medium | RiskLevel::High)
    }

    /// Stable, deterministic rendering used inside confirmation prompts.
    pub fn format_report(report: &RiskReport) -> String {
        let mut out = format!(
            "Risk {:.0}/100 ({})",
            report.overall_score,
            report.risk_level.as_str()
        );
        if report.is_honeypot {
            out.push_str(" | HONEYPOT");
        }
        if report.has_buy_tax || report.has_sell_tax {
            out.push_str(" | taxed transfers");
        }
        if !report.source_verified {
            out.push_str(" | unverified source");
        }
        if report.owner_can_modify {
            out.push_str(" | owner privileges");
        }
        for dim in &report.dimensions {
            match &dim.detail {
                Some(detail) => {
                    out.push_str(&format!("\n  - {} ({:.0}): {}", dim.name, dim.score, detail))
                }
                None => out.push_str(&format!("\n  - {} ({:.0})", dim.name, dim.score)),
            }
        }
        out
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::testing::*;
    use super::*;

    const TOKEN: &str = "0x1234000000000000000000000000000000005678";

    fn engine(oracle: Arc<dyn RiskOracle>) -> (RiskEngine, Store) {
        let store = Store::open_in_memory().unwrap();
        (RiskEngine::new(store.clone(), oracle, Duration::from_secs(600)), store)
    }

    #[tokio::test]
    async fn analyze_is_idempotent_within_ttl() {
        let oracle = Arc::new(FixedOracle::new(report(RiskLevel::Low, false)));
        let (engine, _store) = engine(oracle.clone());

        let first = engine.analyze(1, TOKEN).await.unwrap();
        let second = engine.analyze(1, TOKEN).await.unwrap();

        assert_eq!(oracle.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[tokio::test]
    async fn honeypot_blocks_and_never_refetches() {
        let oracle = Arc::new(FixedOracle::new(report(RiskLevel::Critical, true)));
        let (engine, store) = engine(oracle.clone());

        let decision = engine.should_block("u", 1, TOKEN).await.unwrap();
        assert!(decision.blocked);
        assert!(decision.reason.unwrap().contains("honeypot"));

        // Age the entry far past the TTL; permanent entries still stick.
        let mut aged = store.get_risk_report(1, TOKEN).await.unwrap().unwrap();
        aged.cached_at = 0;
        store.put_risk_report(&aged).await.unwrap();

        engine.analyze(1, TOKEN).await.unwrap();
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn block_list_overrides_clean_report() {
        let oracle = Arc::new(FixedOracle::new(report(RiskLevel::Safe, false)));
        let (engine, store) = engine(oracle);

        store
            .upsert_contract_rule(1, TOKEN, ContractAction::Block, "user ban")
            .await
            .unwrap();
        let decision = engine.should_block("u", 1, TOKEN).await.unwrap();
        assert!(decision.blocked);
        assert!(decision.reason.unwrap().contains("block-listed"));
    }

    #[tokio::test]
    async fn allow_list_overrides_risky_report() {
        let oracle = Arc::new(FixedOracle::new(report(RiskLevel::Critical, true)));
        let (engine, store) = engine(oracle);

        store
            .upsert_contract_rule(1, TOKEN, ContractAction::Allow, "reviewed")
            .await
            .unwrap();
        let decision = engine.should_block("u", 1, TOKEN).await.unwrap();
        assert!(!decision.blocked);
    }

    #[tokio::test]
    async fn dead_oracle_degrades_to_pass() {
        let (engine, _store) = engine(Arc::new(DownOracle));
        let decision = engine.should_block("u", 1, TOKEN).await.unwrap();
        assert!(!decision.blocked);
    }

    #[tokio::test]
    async fn formatter_is_deterministic() {
        let r = report(RiskLevel::Medium, false);
        assert_eq!(RiskEngine::format_report(&r), RiskEngine::format_report(&r));
        assert!(RiskEngine::format_report(&r).starts_with("Risk 45/100 (medium)"));
        assert!(RiskEngine::needs_warning(&r));
        assert!(!RiskEngine::needs_warning(&report(RiskLevel::Low, false)));
    }
}
