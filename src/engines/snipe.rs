//! One-shot token buys with mandatory safety. Manual snipes may downgrade
//! warnings to prompts; auto-snipes always run the full risk stack, hold a
//! strict anti-rug policy, and consume their execution slots atomically so
//! parallel triggers can never overshoot `max_executions`.

use std::sync::Arc;

use alloy::primitives::{Address, U256};
use anyhow::{Context, Result};
use tracing::{info, warn};
use uuid::Uuid;

use crate::executor::events::{NoopObserver, TxObserver};
use crate::executor::{AntiRugPolicy, ExecMeta, Executor};
use crate::model::{ExecOutcome, JobStatus, Snipe};
use crate::quotes::{QuoteClient, QuoteQuery};
use crate::risk::RiskEngine;
use crate::signer::Signer;
use crate::store::Store;

/// A manual snipe request.
#[derive(Debug, Clone)]
pub struct SnipeRequest {
    pub user_id: String,
    pub wallet_address: Address,
    pub chain_id: u64,
    pub token: Address,
    /// Native wei to spend.
    pub amount: U256,
    /// Manual callers may opt out of the risk lookup; auto-snipes cannot.
    pub skip_risk: bool,
}

pub struct SnipeManager {
    store: Store,
    executor: Arc<Executor>,
    risk: Arc<RiskEngine>,
    quotes: Arc<dyn QuoteClient>,
    signer: Arc<dyn Signer>,
    min_liquidity_usd: f64,
    slippage_bps: u32,
}

impl SnipeManager {
    pub fn new(
        store: Store,
        executor: Arc<Executor>,
        risk: Arc<RiskEngine>,
        quotes: Arc<dyn QuoteClient>,
        signer: Arc<dyn Signer>,
        min_liquidity_usd: f64,
        slippage_bps: u32,
    ) -> Self {
        SnipeManager { store, executor, risk, quotes, signer, min_liquidity_usd, slippage_bps }
    }

    // ── Manual snipes ───────────────────────────────────────────────

    /// Execute a one-shot buy. Risk warnings flow to the observer (the user
    /// can wave them through); the liquidity floor is not negotiable.
    pub async fn snipe(
        &self,
        req: SnipeRequest,
        observer: Arc<dyn TxObserver>,
    ) -> Result<ExecOutcome> {
        let snipe = Snipe {
            id: Uuid::new_v4().to_string(),
            user_id: req.user_id.clone(),
            wallet_address: format!("{:?}", req.wallet_address),
            chain_id: req.chain_id,
            token: format!("{:?}", req.token),
            amount: req.amount.to_string(),
            status: JobStatus::Active,
            tx_hash: None,
            error: None,
            created_at: 0,
            updated_at: 0,
        };
        self.store.insert_snipe(&snipe).await?;

        if !req.skip_risk {
            if let Some(reason) = self.safety_block(&req.user_id, req.chain_id, req.token).await? {
                self.store
                    .settle_snipe(&snipe.id, JobStatus::Failed, None, Some(&reason))
                    .await?;
                return Ok(ExecOutcome::rejected(None, reason));
            }
        }

        let outcome = self
            .buy(
                &req.user_id,
                req.wallet_address,
                req.chain_id,
                req.token,
                req.amount,
                AntiRugPolicy { token: req.token, strict: false },
                observer,
            )
            .await?;

        let (status, hash, error) = if outcome.success {
            (JobStatus::Filled, outcome.hash.as_deref(), None)
        } else {
            (JobStatus::Failed, None, Some(outcome.message.as_str()))
        };
        self.store.settle_snipe(&snipe.id, status, hash, error).await?;
        Ok(outcome)
    }

    // ── Auto-snipes ─────────────────────────────────────────────────

    /// Fire every active auto-snipe config for `(chain_id, token)`. Each
    /// config claims its execution slot atomically before touching the
    /// executor, so a trigger racing an exhausted config does nothing.
    /// Returns the number of executions attempted.
    pub async fn fire_auto_snipes(&self, chain_id: u64, token: Address) -> Result<usize> {
        let configs = self.store.active_auto_snipes(chain_id, &format!("{token:?}")).await?;
        let mut fired = 0;

        for config in configs {
            // Safety first, always: no caller can switch this off.
            if let Some(reason) = self.safety_block(&config.user_id, chain_id, token).await? {
                warn!(config = %config.id, reason, "auto-snipe blocked");
                if reason.contains("liquidity") {
                    // Liquidity may still arrive; leave the config armed.
                    continue;
                }
                self.store.set_auto_snipe_status(&config.id, JobStatus::Failed).await?;
                continue;
            }

            if !self.store.consume_auto_snipe_slot(&config.id).await? {
                info!(config = %config.id, "auto-snipe already exhausted");
                continue;
            }
            fired += 1;

            let wallet: Address = config.wallet_address.parse().context("wallet address")?;
            let amount: U256 = config.amount.parse().context("snipe amount")?;
            let outcome = self
                .buy(
                    &config.user_id,
                    wallet,
                    chain_id,
                    token,
                    amount,
                    AntiRugPolicy { token, strict: true },
                    Arc::new(NoopObserver),
                )
                .await?;

            let snipe = Snipe {
                id: Uuid::new_v4().to_string(),
                user_id: config.user_id.clone(),
                wallet_address: config.wallet_address.clone(),
                chain_id,
                token: format!("{token:?}"),
                amount: config.amount.clone(),
                status: if outcome.success { JobStatus::Filled } else { JobStatus::Failed },
                tx_hash: outcome.hash.clone(),
                error: if outcome.success { None } else { Some(outcome.message.clone()) },
                created_at: 0,
                updated_at: 0,
            };
            self.store.insert_snipe(&snipe).await?;
        }
        Ok(fired)
    }

    /// The non-negotiable gate: risk block or thin liquidity.
    async fn safety_block(
        &self,
        user_id: &str,
        chain_id: u64,
        token: Address,
    ) -> Result<Option<String>> {
        let contract = format!("{token:?}");
        let decision = self.risk.should_block(user_id, chain_id, &contract).await?;
        if decision.blocked {
            return Ok(Some(format!(
                "Risk engine blocked this snipe: {}",
                decision.reason.unwrap_or_else(|| "blocked".into())
            )));
        }

        if let Ok(report) = self.risk.analyze(chain_id, &contract).await {
            if let Some(liquidity) = report.liquidity_usd {
                if liquidity < self.min_liquidity_usd {
                    return Ok(Some(format!(
                        "liquidity ${liquidity:.0} below the ${:.0} floor",
                        self.min_liquidity_usd
                    )));
                }
            }
        }
        Ok(None)
    }

    #[allow(clippy::too_many_arguments)]
    async fn buy(
        &self,
        user_id: &str,
        wallet: Address,
        chain_id: u64,
        token: Address,
        amount: U256,
        anti_rug: AntiRugPolicy,
        observer: Arc<dyn TxObserver>,
    ) -> Result<ExecOutcome> {
        let quote = self
            .quotes
            .quote(&QuoteQuery {
                chain_id,
                from_token: None,
                to_token: token,
                amount,
                from_address: wallet,
                slippage_bps: self.slippage_bps,
            })
            .await
            .context("snipe quote")?;

        let mut meta = ExecMeta::new(user_id, "snipe", format!("snipe {token:?}"));
        meta.anti_rug = Some(anti_rug);
        Ok(self.executor.execute(quote.tx, self.signer.clone(), meta, observer).await)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::model::RiskLevel;
    use crate::risk::testing::{FixedOracle, report};
    use crate::store::snipes::sample_auto;
    use crate::test_support::{TestChain, TestQuoteClient, TestSigner, test_executor};

    use super::*;

    fn manager_with(level: RiskLevel, honeypot: bool, liquidity: Option<f64>) -> (Store, SnipeManager, Arc<TestSigner>) {
        let store = Store::open_in_memory().unwrap();
        let chain = Arc::new(TestChain::new(8453));
        let executor = test_executor(&store, chain);
        let signer = Arc::new(TestSigner::new());

        let mut oracle_report = report(level, honeypot);
        oracle_report.liquidity_usd = liquidity;
        let risk = Arc::new(RiskEngine::new(
            store.clone(),
            Arc::new(FixedOracle::new(oracle_report)),
            Duration::from_secs(600),
        ));

        let manager = SnipeManager::new(
            store.clone(),
            executor,
            risk,
            Arc::new(TestQuoteClient::with_rate(2.0)),
            signer.clone(),
            5_000.0,
            300,
        );
        (store, manager, signer)
    }

    fn token() -> Address {
        "0xBBbBBBbbBBBbbbBbbBbbbbBBbBbbbbBbBbbBBbB0".parse().unwrap()
    }

    #[tokio::test]
    async fn manual_snipe_fills_and_settles() {
        let (store, manager, _signer) = manager_with(RiskLevel::Low, false, Some(50_000.0));

        let outcome = manager
            .snipe(
                SnipeRequest {
                    user_id: "user-1".into(),
                    wallet_address: Address::new([1u8; 20]),
                    chain_id: 8453,
                    token: token(),
                    amount: U256::from(10u64).pow(U256::from(17u64)),
                    skip_risk: false,
                },
                Arc::new(NoopObserver),
            )
            .await
            .unwrap();

        assert!(outcome.success, "{}", outcome.message);
        let counts = store.table_counts().await.unwrap();
        let snipes = counts.iter().find(|(t, _)| t == "snipes").unwrap().1;
        assert_eq!(snipes, 1);
    }

    #[tokio::test]
    async fn honeypot_blocks_manual_snipe() {
        let (_store, manager, signer) = manager_with(RiskLevel::Critical, true, Some(50_000.0));

        let outcome = manager
            .snipe(
                SnipeRequest {
                    user_id: "user-1".into(),
                    wallet_address: Address::new([1u8; 20]),
                    chain_id: 8453,
                    token: token(),
                    amount: U256::from(100u64),
                    skip_risk: false,
                },
                Arc::new(NoopObserver),
            )
            .await
            .unwrap();

        assert!(!outcome.success);
        assert!(outcome.message.contains("Risk engine blocked"));
        assert!(signer.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn thin_liquidity_blocks_but_keeps_auto_config_armed() {
        let (store, manager, signer) = manager_with(RiskLevel::Low, false, Some(1_000.0));
        store.insert_auto_snipe(&sample_auto("as-liq", 3)).await.unwrap();

        let fired = manager.fire_auto_snipes(8453, token()).await.unwrap();
        assert_eq!(fired, 0);
        assert!(signer.sent.lock().unwrap().is_empty());

        let config = store.get_auto_snipe("as-liq").await.unwrap().unwrap();
        assert_eq!(config.status, JobStatus::Active);
        assert_eq!(config.executed_count, 0);
    }

    #[tokio::test]
    async fn parallel_triggers_respect_max_executions() {
        let (store, manager, _signer) = manager_with(RiskLevel::Low, false, Some(50_000.0));
        store.insert_auto_snipe(&sample_auto("as-max", 2)).await.unwrap();

        let manager = Arc::new(manager);
        let mut handles = Vec::new();
        for _ in 0..3 {
            let manager = manager.clone();
            handles.push(tokio::spawn(async move {
                manager.fire_auto_snipes(8453, token()).await.unwrap()
            }));
        }
        let mut total = 0;
        for h in handles {
            total += h.await.unwrap();
        }

        assert_eq!(total, 2);
        let config = store.get_auto_snipe("as-max").await.unwrap().unwrap();
        assert_eq!(config.executed_count, 2);
        assert_eq!(config.status, JobStatus::Exhausted);
    }

    #[tokio::test]
    async fn skip_risk_bypasses_the_manual_pre_gate() {
        let (_store, manager, signer) = manager_with(RiskLevel::Critical, true, Some(50_000.0));

        let request = SnipeRequest {
            user_id: "user-1".into(),
            wallet_address: Address::new([1u8; 20]),
            chain_id: 8453,
            token: token(),
            amount: U256::from(100u64),
            skip_risk: true,
        };

        // skip_risk lets a manual snipe through the pre-gate.
        let outcome = manager.snipe(request.clone(), Arc::new(NoopObserver)).await.unwrap();
        assert!(outcome.success, "{}", outcome.message);
        assert_eq!(signer.sent.lock().unwrap().len(), 1);

        // The same request without the flag is blocked before the executor.
        let blocked = manager
            .snipe(SnipeRequest { skip_risk: false, ..request }, Arc::new(NoopObserver))
            .await
            .unwrap();
        assert!(!blocked.success);
        assert_eq!(signer.sent.lock().unwrap().len(), 1);
    }
}
