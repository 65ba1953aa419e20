//! Transaction dry runs. A bundle-simulation service backs the real thing;
//! when it is unreachable the simulator degrades to a local gas estimate so
//! the pipeline keeps moving (flagged, never silently).

use std::time::Duration;

use alloy::primitives::{Address, Bytes, U256};
use alloy::sol;
use alloy::sol_types::SolCall;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::chain::{canonical_router, wrapped_native};
use crate::model::{
    AntiRugResult, BalanceChange, FlowDirection, SimulationResult, TransactionRequest,
};

const SIM_TIMEOUT: Duration = Duration::from_secs(15);
const FALLBACK_GAS: u64 = 200_000;
/// Round-trip cost of two 0.30% pool legs, treated as baseline (not tax).
const BASELINE_SWAP_FEE_PCT: f64 = 0.6;

sol! {
    function approve(address spender, uint256 amount) external returns (bool);
    function swapExactTokensForETHSupportingFeeOnTransferTokens(
        uint256 amountIn,
        uint256 amountOutMin,
        address[] path,
        address to,
        uint256 deadline
    ) external;
}

// ── Backend seam ───────────────────────────────────────────────────

/// One transaction inside a simulated bundle.
#[derive(Debug, Clone, Serialize)]
pub struct BundleTx {
    pub from: Address,
    pub to: Option<Address>,
    pub value: U256,
    pub data: Option<Bytes>,
    pub gas: u64,
}

/// Per-transaction result from the backend.
#[derive(Debug, Clone, Deserialize)]
pub struct BundleOutcome {
    pub success: bool,
    pub gas_used: u64,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub balance_changes: Vec<BalanceChange>,
}

/// External simulation service. Tests and degraded deployments run without
/// one.
#[async_trait]
pub trait SimulationBackend: Send + Sync {
    async fn simulate_bundle(&self, chain_id: u64, txs: &[BundleTx]) -> Result<Vec<BundleOutcome>>;
}

// ── HTTP backend ───────────────────────────────────────────────────

#[derive(Serialize)]
struct BundleRequest<'a> {
    chain_id: u64,
    transactions: &'a [BundleTx],
}

#[derive(Deserialize)]
struct BundleResponse {
    results: Vec<BundleOutcome>,
}

pub struct HttpSimulationBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpSimulationBackend {
    pub fn new(base_url: &str, api_key: Option<&str>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(SIM_TIMEOUT)
            .user_agent("chainclaw/0.1")
            .build()
            .context("creating simulation HTTP client")?;
        Ok(HttpSimulationBackend {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.map(String::from),
        })
    }
}

#[async_trait]
impl SimulationBackend for HttpSimulationBackend {
    async fn simulate_bundle(&self, chain_id: u64, txs: &[BundleTx]) -> Result<Vec<BundleOutcome>> {
        let mut req = self
            .client
            .post(format!("{}/simulate-bundle", self.base_url))
            .json(&BundleRequest { chain_id, transactions: txs });
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {key}"));
        }

        let resp = req
            .send()
            .await
            .context("simulation request")?
            .error_for_status()
            .context("simulation status")?
            .json::<BundleResponse>()
            .await
            .context("simulation payload")?;

        if resp.results.len() != txs.len() {
            anyhow::bail!(
                "simulation returned {} results for {} transactions",
                resp.results.len(),
                txs.len()
            );
        }
        Ok(resp.results)
    }
}

// ── Simulator ──────────────────────────────────────────────────────

pub struct Simulator {
    backend: Option<std::sync::Arc<dyn SimulationBackend>>,
}

impl Simulator {
    pub fn new(backend: Option<std::sync::Arc<dyn SimulationBackend>>) -> Self {
        Simulator { backend }
    }

    /// Dry-run one transaction. Never errors: backend failure falls back to
    /// a local estimate with `success = true`.
    pub async fn simulate(&self, tx: &TransactionRequest) -> SimulationResult {
        if let Some(backend) = &self.backend {
            let bundle = [to_bundle_tx(tx)];
            match tokio::time::timeout(SIM_TIMEOUT, backend.simulate_bundle(tx.chain_id, &bundle))
                .await
            {
                Ok(Ok(mut outcomes)) if !outcomes.is_empty() => {
                    let outcome = outcomes.remove(0);
                    return SimulationResult {
                        success: outcome.success,
                        gas_estimate: outcome.gas_used,
                        balance_changes: outcome.balance_changes,
                        error: outcome.error,
                    };
                }
                Ok(Ok(_)) => warn!("simulation backend returned no results, falling back"),
                Ok(Err(err)) => warn!(%err, "simulation backend failed, falling back"),
                Err(_) => warn!("simulation backend timed out, falling back"),
            }
        }
        local_fallback(tx)
    }

    /// Bundle-simulate buy → approve → sell-all against the chain's
    /// canonical router. Detects tokens that cannot be exited (honeypots)
    /// and quantifies the round-trip haircut.
    pub async fn simulate_sell_after_buy(
        &self,
        buy_tx: &TransactionRequest,
        token: Address,
    ) -> AntiRugResult {
        let Some(backend) = &self.backend else {
            return unavailable("simulation service not configured");
        };
        let (Some(router), Some(_wnative)) =
            (canonical_router(buy_tx.chain_id), wrapped_native(buy_tx.chain_id))
        else {
            return unavailable("no canonical router for this chain");
        };

        let bundle = build_sell_bundle(buy_tx, token, router, buy_tx.chain_id);
        let outcomes = match tokio::time::timeout(
            SIM_TIMEOUT,
            backend.simulate_bundle(buy_tx.chain_id, &bundle),
        )
        .await
        {
            Ok(Ok(outcomes)) if outcomes.len() == bundle.len() => outcomes,
            Ok(Ok(_)) | Ok(Err(_)) | Err(_) => {
                return unavailable("simulation service unavailable");
            }
        };

        let token_key = format!("{token:?}").to_lowercase();
        let buy_received = sum_changes(&outcomes[0].balance_changes, &token_key, FlowDirection::In);
        let sell = &outcomes[2];
        let sell_received = sum_changes(&sell.balance_changes, "native", FlowDirection::In);

        let can_sell = outcomes[0].success && outcomes[1].success && sell.success
            && sell_received > U256::ZERO;

        let spent = buy_tx.value_native.to::<u128>() as f64;
        let recovered = sell_received.to::<u128>() as f64;
        let net_loss_pct = if spent > 0.0 {
            ((spent - recovered) / spent * 100.0).max(0.0)
        } else {
            0.0
        };
        let sell_tax_pct = (net_loss_pct - BASELINE_SWAP_FEE_PCT).max(0.0);

        AntiRugResult {
            can_sell,
            sell_tax_pct,
            net_loss_pct,
            buy_received: buy_received.to_string(),
            sell_received: sell_received.to_string(),
            warning: if can_sell {
                None
            } else {
                Some(sell.error.clone().unwrap_or_else(|| "sell leg reverted".into()))
            },
        }
    }
}

fn to_bundle_tx(tx: &TransactionRequest) -> BundleTx {
    BundleTx {
        from: tx.from,
        to: tx.to,
        value: tx.value_native,
        data: tx.data.clone(),
        gas: tx.gas_limit.unwrap_or(FALLBACK_GAS),
    }
}

/// No external service: assume success, estimate gas locally, and report
/// the native outflow when value moves.
fn local_fallback(tx: &TransactionRequest) -> SimulationResult {
    let mut balance_changes = Vec::new();
    if tx.value_native > U256::ZERO {
        balance_changes.push(BalanceChange {
            token: "native".into(),
            amount: tx.value_native.to_string(),
            direction: FlowDirection::Out,
        });
    }
    SimulationResult {
        success: true,
        gas_estimate: tx.gas_limit.unwrap_or(FALLBACK_GAS),
        balance_changes,
        error: None,
    }
}

fn unavailable(reason: &str) -> AntiRugResult {
    AntiRugResult {
        can_sell: true,
        sell_tax_pct: 0.0,
        net_loss_pct: 0.0,
        buy_received: "0".into(),
        sell_received: "0".into(),
        warning: Some(reason.to_string()),
    }
}

fn build_sell_bundle(
    buy_tx: &TransactionRequest,
    token: Address,
    router: Address,
    chain_id: u64,
) -> Vec<BundleTx> {
    let approve_data = approveCall { spender: router, amount: U256::MAX }.abi_encode();

    let deadline = U256::from(crate::now_ts() as u64 + 300);
    let path = vec![token, wrapped_native(chain_id).unwrap_or(Address::ZERO)];
    // amountIn = 0 is a marker: the backend substitutes the post-buy balance.
    let sell_data = swapExactTokensForETHSupportingFeeOnTransferTokensCall {
        amountIn: U256::ZERO,
        amountOutMin: U256::ZERO,
        path,
        to: buy_tx.from,
        deadline,
    }
    .abi_encode();

    vec![
        to_bundle_tx(buy_tx),
        BundleTx {
            from: buy_tx.from,
            to: Some(token),
            value: U256::ZERO,
            data: Some(Bytes::from(approve_data)),
            gas: 80_000,
        },
        BundleTx {
            from: buy_tx.from,
            to: Some(router),
            value: U256::ZERO,
            data: Some(Bytes::from(sell_data)),
            gas: 300_000,
        },
    ]
}

fn sum_changes(changes: &[BalanceChange], token_key: &str, direction: FlowDirection) -> U256 {
    changes
        .iter()
        .filter(|c| c.direction == direction && c.token.to_lowercase() == token_key)
        .filter_map(|c| c.amount.parse::<U256>().ok())
        .fold(U256::ZERO, |acc, v| acc + v)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Backend fake replaying canned outcomes.
    pub struct ScriptedBackend {
        pub outcomes: Vec<BundleOutcome>,
    }

    #[async_trait]
    impl SimulationBackend for ScriptedBackend {
        async fn simulate_bundle(
            &self,
            _chain_id: u64,
            txs: &[BundleTx],
        ) -> Result<Vec<BundleOutcome>> {
            if self.outcomes.len() != txs.len() {
                return Err(anyhow!("scripted backend shape mismatch"));
            }
            Ok(self.outcomes.clone())
        }
    }

    pub fn ok_outcome(gas: u64, changes: Vec<BalanceChange>) -> BundleOutcome {
        BundleOutcome { success: true, gas_used: gas, error: None, balance_changes: changes }
    }

    pub fn revert_outcome(error: &str) -> BundleOutcome {
        BundleOutcome {
            success: false,
            gas_used: 0,
            error: Some(error.into()),
            balance_changes: vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::testing::*;
    use super::*;

    fn buy_tx(value: u64) -> TransactionRequest {
        TransactionRequest {
            chain_id: 1,
            from: Address::new([1u8; 20]),
            to: Some(Address::new([2u8; 20])),
            value_native: U256::from(value),
            data: Some(Bytes::from(vec![0x12, 0x34])),
            gas_limit: None,
            gas_strategy: Default::default(),
        }
    }

    #[tokio::test]
    async fn backend_result_is_passed_through() {
        let backend = ScriptedBackend {
            outcomes: vec![ok_outcome(
                180_000,
                vec![BalanceChange {
                    token: "native".into(),
                    amount: "100".into(),
                    direction: FlowDirection::Out,
                }],
            )],
        };
        let sim = Simulator::new(Some(Arc::new(backend)));

        let result = sim.simulate(&buy_tx(100)).await;
        assert!(result.success);
        assert_eq!(result.gas_estimate, 180_000);
        assert_eq!(result.balance_changes.len(), 1);
    }

    #[tokio::test]
    async fn revert_is_reported_not_masked() {
        let backend = ScriptedBackend { outcomes: vec![revert_outcome("transfer amount exceeds balance")] };
        let sim = Simulator::new(Some(Arc::new(backend)));

        let result = sim.simulate(&buy_tx(100)).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("transfer amount exceeds balance"));
    }

    #[tokio::test]
    async fn missing_backend_falls_back_to_local_estimate() {
        let sim = Simulator::new(None);
        let result = sim.simulate(&buy_tx(100)).await;
        assert!(result.success);
        assert_eq!(result.gas_estimate, FALLBACK_GAS);
        assert_eq!(result.balance_changes[0].token, "native");
        assert_eq!(result.balance_changes[0].amount, "100");

        // Explicit gas limit wins over the constant.
        let mut tx = buy_tx(0);
        tx.gas_limit = Some(65_000);
        let result = sim.simulate(&tx).await;
        assert_eq!(result.gas_estimate, 65_000);
        assert!(result.balance_changes.is_empty());
    }

    #[tokio::test]
    async fn anti_rug_flags_unsellable_token() {
        let token = Address::new([9u8; 20]);
        let token_key = format!("{token:?}");
        let backend = ScriptedBackend {
            outcomes: vec![
                ok_outcome(
                    150_000,
                    vec![BalanceChange {
                        token: token_key,
                        amount: "1000000".into(),
                        direction: FlowDirection::In,
                    }],
                ),
                ok_outcome(45_000, vec![]),
                revert_outcome("TRANSFER_FROM_FAILED"),
            ],
        };
        let sim = Simulator::new(Some(Arc::new(backend)));

        let result = sim.simulate_sell_after_buy(&buy_tx(1_000_000), token).await;
        assert!(!result.can_sell);
        assert_eq!(result.buy_received, "1000000");
        assert_eq!(result.warning.as_deref(), Some("TRANSFER_FROM_FAILED"));
    }

    #[tokio::test]
    async fn anti_rug_computes_round_trip_loss() {
        let token = Address::new([9u8; 20]);
        let token_key = format!("{token:?}");
        let backend = ScriptedBackend {
            outcomes: vec![
                ok_outcome(
                    150_000,
                    vec![BalanceChange {
                        token: token_key,
                        amount: "1000000".into(),
                        direction: FlowDirection::In,
                    }],
                ),
                ok_outcome(45_000, vec![]),
                ok_outcome(
                    200_000,
                    vec![BalanceChange {
                        token: "native".into(),
                        amount: "900000".into(), // 10% haircut on the way out
                        direction: FlowDirection::In,
                    }],
                ),
            ],
        };
        let sim = Simulator::new(Some(Arc::new(backend)));

        let result = sim.simulate_sell_after_buy(&buy_tx(1_000_000), token).await;
        assert!(result.can_sell);
        assert!((result.net_loss_pct - 10.0).abs() < 0.01);
        assert!((result.sell_tax_pct - (10.0 - BASELINE_SWAP_FEE_PCT)).abs() < 0.01);
    }

    #[tokio::test]
    async fn anti_rug_degrades_with_warning() {
        let sim = Simulator::new(None);
        let result = sim.simulate_sell_after_buy(&buy_tx(100), Address::new([9u8; 20])).await;
        assert!(result.can_sell);
        assert!(result.warning.is_some());
    }
}
