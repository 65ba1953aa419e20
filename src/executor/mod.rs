//! The transaction execution pipeline. Every mutating action in the system
//! funnels through [`Executor::execute`], which runs a fixed stage order —
//! lock, simulate, risk, guardrails, persist, confirm, sign, broadcast,
//! await receipt — and is the only code path that touches a signer.
//!
//! Concurrency contract: one invocation is fully sequential and holds its
//! position lock across every suspension point (this is the documented
//! exception to the no-lock-across-await rule). Invocations for different
//! position keys run freely in parallel; the same key serializes.

pub mod events;

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use anyhow::Context;
use tracing::{info, warn};

use crate::chain::gas::GasOptimizer;
use crate::chain::{ChainRegistry, MAINNET_CHAIN_ID, chain_name};
use crate::error::PipelineError;
use crate::guardrails::{Guardrails, value_usd};
use crate::lock::{LockKey, PositionLocks};
use crate::model::{ExecOutcome, SimulationResult, TransactionRequest, TxStatus};
use crate::nonce::NonceManager;
use crate::prices::PriceFeed;
use crate::risk::RiskEngine;
use crate::signer::{SendRequest, Signer};
use crate::sim::Simulator;
use crate::store::Store;
use crate::store::tx_log::NewTxRecord;

use events::{TxEvent, TxEventBus, TxObserver};

const LOCK_TIMEOUT: Duration = Duration::from_secs(30);
const RECEIPT_TIMEOUT: Duration = Duration::from_secs(120);
/// Broadcast gas = simulation estimate plus this headroom.
const GAS_BUFFER_NUM: u64 = 110;
const GAS_BUFFER_DEN: u64 = 100;
/// Anti-rug: block or warn when the round trip loses more than this.
const MAX_NET_LOSS_PCT: f64 = 20.0;

// ── Inputs ─────────────────────────────────────────────────────────

/// Who is executing and why; attached to the persistent record.
#[derive(Debug, Clone)]
pub struct ExecMeta {
    pub user_id: String,
    pub skill_name: String,
    pub intent_description: String,
    /// USD price of the chain's native token. Resolved from the price feed
    /// when absent.
    pub native_price_usd: Option<f64>,
    /// Attach a buy-then-sell-all simulation to the simulate stage.
    pub anti_rug: Option<AntiRugPolicy>,
}

impl ExecMeta {
    pub fn new(
        user_id: impl Into<String>,
        skill_name: impl Into<String>,
        intent: impl Into<String>,
    ) -> Self {
        ExecMeta {
            user_id: user_id.into(),
            skill_name: skill_name.into(),
            intent_description: intent.into(),
            native_price_usd: None,
            anti_rug: None,
        }
    }
}

/// Sell-simulation policy for token buys. `strict` blocks on a bad result
/// (auto flows); otherwise the user is warned and may proceed.
#[derive(Debug, Clone)]
pub struct AntiRugPolicy {
    pub token: Address,
    pub strict: bool,
}

/// MEV-protected routing configuration.
#[derive(Debug, Clone, Default)]
pub struct MevConfig {
    pub enabled: bool,
    pub relay_url: Option<String>,
}

// ── Executor ───────────────────────────────────────────────────────

pub struct Executor {
    store: Store,
    chains: Arc<ChainRegistry>,
    nonces: NonceManager,
    locks: PositionLocks,
    risk: Arc<RiskEngine>,
    sim: Arc<Simulator>,
    guardrails: Arc<Guardrails>,
    prices: Arc<dyn PriceFeed>,
    gas: Option<GasOptimizer>,
    mev: MevConfig,
    events: TxEventBus,
}

impl Executor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Store,
        chains: Arc<ChainRegistry>,
        risk: Arc<RiskEngine>,
        sim: Arc<Simulator>,
        guardrails: Arc<Guardrails>,
        prices: Arc<dyn PriceFeed>,
        gas: Option<GasOptimizer>,
        mev: MevConfig,
    ) -> Self {
        Executor {
            store,
            nonces: NonceManager::new(chains.clone()),
            chains,
            locks: PositionLocks::new(),
            risk,
            sim,
            guardrails,
            prices,
            gas,
            mev,
            events: TxEventBus::new(),
        }
    }

    pub fn events(&self) -> &TxEventBus {
        &self.events
    }

    /// Run the full pipeline. Always returns a structured outcome; no panic
    /// escapes the scope holding the position lock.
    pub async fn execute(
        &self,
        tx: TransactionRequest,
        signer: Arc<dyn Signer>,
        meta: ExecMeta,
        observer: Arc<dyn TxObserver>,
    ) -> ExecOutcome {
        if let Err(err) = validate(&tx) {
            return ExecOutcome::rejected(None, err.to_string());
        }

        // Stage 0: position lock. Held (via drop guard) across every
        // subsequent stage and released on all exit paths.
        let target = tx.to.map(|a| format!("{a:?}")).unwrap_or_else(|| "native".into());
        let key = LockKey::new(&meta.user_id, tx.chain_id, target);
        let Some(_held) = self.locks.acquire(key.clone(), LOCK_TIMEOUT).await else {
            return ExecOutcome::rejected(None, PipelineError::LockBusy.to_string());
        };

        let mut ctx = TxCtx::default();
        match self.run_stages(&tx, signer, &meta, observer.as_ref(), &mut ctx).await {
            Ok(outcome) => outcome,
            Err(err) => {
                info!(user = %meta.user_id, key = %key, %err, "pipeline stopped");
                ExecOutcome {
                    tx_id: ctx.tx_id,
                    hash: ctx.hash.clone(),
                    success: false,
                    message: err.to_string(),
                }
            }
        }
    }

    /// Stages 1-11. Any `Err` stops the pipeline; `ctx` carries whatever
    /// identity exists so the caller's outcome can reference it.
    async fn run_stages(
        &self,
        tx: &TransactionRequest,
        signer: Arc<dyn Signer>,
        meta: &ExecMeta,
        observer: &dyn TxObserver,
        ctx: &mut TxCtx,
    ) -> Result<ExecOutcome, PipelineError> {
        let native_price = self.resolve_native_price(tx.chain_id, meta).await;
        let usd = value_usd(tx.value_native, native_price);

        // Stage 1: simulate.
        self.events.publish(TxEvent::BeforeSimulate {
            user_id: meta.user_id.clone(),
            chain_id: tx.chain_id,
        });
        let sim_result = self.sim.simulate(tx).await;
        self.events.publish(TxEvent::AfterSimulate {
            user_id: meta.user_id.clone(),
            chain_id: tx.chain_id,
            success: sim_result.success,
        });

        if !sim_result.success {
            let reason = sim_result.error.clone().unwrap_or_else(|| "execution reverted".into());
            return Err(PipelineError::SimulationFail(reason));
        }

        let preview = build_preview(tx, &sim_result, usd, &meta.intent_description);
        observer.on_simulated(&sim_result, &preview).await;

        // Stage 1b: optional sell-after-buy bundle attached by snipes.
        if let Some(policy) = &meta.anti_rug {
            let rug = self.sim.simulate_sell_after_buy(tx, policy.token).await;
            let bad = !rug.can_sell || rug.net_loss_pct > MAX_NET_LOSS_PCT;
            if bad {
                let detail = if rug.can_sell {
                    format!("round trip loses {:.1}% of value", rug.net_loss_pct)
                } else {
                    format!(
                        "cannot sell token: {}",
                        rug.warning.clone().unwrap_or_else(|| "sell reverts".into())
                    )
                };
                if policy.strict {
                    return Err(PipelineError::RiskBlock(detail));
                }
                if !observer.on_risk_warning(&detail).await {
                    return Err(PipelineError::UserRejected("after sell-risk warning".into()));
                }
            }
        }

        // Stage 2: risk — only contract interactions have a counterparty
        // worth scoring.
        if tx.has_data() {
            if let Some(to) = tx.to {
                let contract = format!("{to:?}");
                let decision = self
                    .risk
                    .should_block(&meta.user_id, tx.chain_id, &contract)
                    .await
                    .context("risk decision")?;
                if decision.blocked {
                    return Err(PipelineError::RiskBlock(
                        decision.reason.unwrap_or_else(|| "blocked".into()),
                    ));
                }

                if let Ok(report) = self.risk.analyze(tx.chain_id, &contract).await {
                    if RiskEngine::needs_warning(&report)
                        && !observer.on_risk_warning(&RiskEngine::format_report(&report)).await
                    {
                        return Err(PipelineError::UserRejected("after risk warning".into()));
                    }
                }
            }
        }

        // Stage 3: guardrails.
        let checks = self
            .guardrails
            .check(&meta.user_id, tx, native_price)
            .await
            .context("guardrail evaluation")?;
        observer.on_guardrails(&checks).await;
        let failed: Vec<&str> =
            checks.iter().filter(|c| !c.passed).map(|c| c.message.as_str()).collect();
        if !failed.is_empty() {
            return Err(PipelineError::GuardrailFail(format!(
                "Guardrail checks failed: {}",
                failed.join("; ")
            )));
        }

        // Stage 4: persist the request with its audit snapshots.
        let tx_id = self
            .store
            .insert_tx(NewTxRecord {
                user_id: meta.user_id.clone(),
                skill_name: meta.skill_name.clone(),
                intent_description: meta.intent_description.clone(),
                chain_id: tx.chain_id,
                from: format!("{:?}", tx.from),
                to: tx.to.map(|a| format!("{a:?}")),
                value_native: tx.value_native.to_string(),
                value_usd: usd,
                simulation_json: serde_json::to_string(&sim_result).ok(),
                guardrails_json: serde_json::to_string(&checks).ok(),
            })
            .await
            .context("persisting transaction record")?;
        ctx.tx_id = Some(tx_id);
        self.store.set_tx_status(tx_id, TxStatus::Simulated).await.context("status")?;

        // Stage 5: confirmation gate for large values.
        let limits = self.guardrails.limits_for(&meta.user_id).await.context("limits")?;
        if self.guardrails.requires_confirmation(usd, &limits)
            && !observer.on_confirmation_required(&preview, tx_id).await
        {
            self.store.set_tx_status(tx_id, TxStatus::Rejected).await.context("status")?;
            return Err(PipelineError::UserRejected("transaction not confirmed".into()));
        }
        self.store.set_tx_status(tx_id, TxStatus::Approved).await.context("status")?;

        // Stage 6: non-automatic signers get their own approval prompt.
        if !signer.is_automatic() {
            let prompt = format!("approve with {} signer:\n{preview}", signer.kind());
            if !observer.on_confirmation_required(&prompt, tx_id).await {
                self.store.set_tx_status(tx_id, TxStatus::Rejected).await.context("status")?;
                return Err(PipelineError::UserRejected("signer approval declined".into()));
            }
        }

        // Stage 7: fee estimation.
        let fees = match &self.gas {
            Some(optimizer) => {
                let client = self.chains.get(tx.chain_id).context("chain client")?;
                match optimizer.estimate(client.as_ref(), tx.gas_strategy).await {
                    Ok(fees) => Some(fees),
                    Err(err) => {
                        warn!(chain = tx.chain_id, %err, "fee estimation failed, deferring to signer");
                        None
                    }
                }
            }
            None => None,
        };

        // Stage 8: MEV routing — private relay only on the public L1 and
        // only for contract interactions.
        let rpc_url = if self.mev.enabled
            && tx.chain_id == MAINNET_CHAIN_ID
            && tx.has_data()
            && self.mev.relay_url.is_some()
        {
            self.mev.relay_url.clone()
        } else {
            self.chains.rpc_url(tx.chain_id).map(String::from)
        };

        // Stage 9: nonce.
        let lease = self.nonces.acquire(tx.chain_id, tx.from).await.context("nonce")?;
        let nonce = lease.value();

        // Stage 10: broadcast.
        let gas = sim_result.gas_estimate * GAS_BUFFER_NUM / GAS_BUFFER_DEN;
        self.events.publish(TxEvent::BeforeBroadcast { tx_id });
        let send = SendRequest {
            chain_id: tx.chain_id,
            to: tx.to,
            value: tx.value_native,
            data: tx.data.clone(),
            gas,
            nonce,
            max_fee_per_gas: fees.map(|f| f.max_fee_per_gas),
            max_priority_fee_per_gas: fees.map(|f| f.max_priority_fee_per_gas),
            rpc_url,
        };

        let hash = match signer.send(send).await {
            Ok(hash) => hash,
            Err(err) => {
                if err.is_nonce_mismatch() {
                    if let Err(resync_err) = lease.resync(&self.chains).await {
                        warn!(chain = tx.chain_id, %resync_err, "nonce resync failed");
                    }
                }
                let msg = PipelineError::Broadcast(err.to_string()).to_string();
                self.store.mark_tx_failed(tx_id, &msg).await.context("status")?;
                observer.on_failed(&msg).await;
                self.events.publish(TxEvent::Failed { tx_id: Some(tx_id), error: msg.clone() });
                return Err(PipelineError::Broadcast(err.to_string()));
            }
        };
        lease.commit();

        let hash_str = format!("{hash:?}");
        ctx.hash = Some(hash_str.clone());
        self.store.mark_tx_broadcast(tx_id, &hash_str).await.context("status")?;
        self.guardrails.record_tx_sent(&meta.user_id).await.context("stamping send")?;
        observer.on_broadcast(&hash_str).await;
        self.events.publish(TxEvent::Broadcast { tx_id, hash: hash_str.clone() });
        info!(tx_id, hash = %hash_str, chain = %chain_name(tx.chain_id), "broadcast");

        // Stage 11: await the receipt.
        let client = self.chains.get(tx.chain_id).context("chain client")?;
        let receipt = client.wait_for_receipt(hash, RECEIPT_TIMEOUT).await;

        match receipt {
            Ok(Some(receipt)) if receipt.success => {
                let gas_cost_usd = if native_price > 0.0 {
                    Some(
                        receipt.gas_used as f64 * receipt.effective_gas_price as f64 * native_price
                            / 1e18,
                    )
                } else {
                    None
                };
                self.store
                    .mark_tx_confirmed(
                        tx_id,
                        receipt.gas_used,
                        receipt.effective_gas_price,
                        gas_cost_usd,
                        receipt.block_number,
                    )
                    .await
                    .context("status")?;
                observer.on_confirmed(&hash_str, receipt.block_number).await;
                self.events.publish(TxEvent::Confirmed {
                    tx_id,
                    hash: hash_str.clone(),
                    block_number: receipt.block_number,
                });
                Ok(ExecOutcome {
                    tx_id: Some(tx_id),
                    hash: Some(hash_str),
                    success: true,
                    message: format!("confirmed in block {}", receipt.block_number),
                })
            }
            Ok(Some(_reverted)) => {
                self.store.mark_tx_failed(tx_id, "reverted").await.context("status")?;
                observer.on_failed("reverted").await;
                self.events
                    .publish(TxEvent::Failed { tx_id: Some(tx_id), error: "reverted".into() });
                Err(PipelineError::Reverted)
            }
            Ok(None) => {
                // The tx may still land; the hash stays on the record for a
                // later reconciliation pass.
                self.store.mark_tx_failed(tx_id, "timeout").await.context("status")?;
                observer.on_failed("timeout").await;
                self.events
                    .publish(TxEvent::Failed { tx_id: Some(tx_id), error: "timeout".into() });
                Err(PipelineError::ReceiptTimeout)
            }
            Err(err) => {
                let msg = format!("receipt lookup failed: {err}");
                self.store.mark_tx_failed(tx_id, &msg).await.context("status")?;
                observer.on_failed(&msg).await;
                self.events.publish(TxEvent::Failed { tx_id: Some(tx_id), error: msg.clone() });
                Err(PipelineError::ReceiptTimeout)
            }
        }
    }

    async fn resolve_native_price(&self, chain_id: u64, meta: &ExecMeta) -> f64 {
        if let Some(price) = meta.native_price_usd {
            return price;
        }
        match self.prices.native_price_usd(chain_id).await {
            Ok(price) => price,
            Err(err) => {
                warn!(chain_id, %err, "native price unavailable, USD guardrails degrade to zero");
                0.0
            }
        }
    }
}

#[derive(Default)]
struct TxCtx {
    tx_id: Option<i64>,
    hash: Option<String>,
}

fn validate(tx: &TransactionRequest) -> Result<(), PipelineError> {
    if tx.chain_id == 0 {
        return Err(PipelineError::Validation("chain id 0 is not a chain".into()));
    }
    if tx.to.is_none() && !tx.has_data() {
        return Err(PipelineError::Validation(
            "transaction has no recipient and no contract deployment data".into(),
        ));
    }
    Ok(())
}

/// Human preview embedded in confirmation prompts and the `on_simulated`
/// callback. Deterministic for a given input.
fn build_preview(
    tx: &TransactionRequest,
    sim: &SimulationResult,
    usd: f64,
    intent: &str,
) -> String {
    let mut out = String::new();
    if !intent.is_empty() {
        out.push_str(intent);
        out.push('\n');
    }
    out.push_str(&format!(
        "chain: {} | to: {} | value: ${usd:.2} | est. gas: {}",
        chain_name(tx.chain_id),
        tx.to.map(|a| format!("{a:?}")).unwrap_or_else(|| "(deploy)".into()),
        sim.gas_estimate,
    ));
    for change in &sim.balance_changes {
        let arrow = match change.direction {
            crate::model::FlowDirection::In => "+",
            crate::model::FlowDirection::Out => "-",
        };
        out.push_str(&format!("\n  {arrow}{} {}", change.amount, change.token));
    }
    out
}
