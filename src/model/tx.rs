use alloy::primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};

// ── Transaction request ─────────────────────────────────────────────

/// Fee urgency for EIP-1559 fee estimation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GasStrategy {
    Slow,
    #[default]
    Standard,
    Fast,
}

/// Ephemeral input to the executor. Skills and background engines build one
/// of these; the executor owns everything that happens after.
#[derive(Debug, Clone)]
pub struct TransactionRequest {
    pub chain_id: u64,
    pub from: Address,
    pub to: Option<Address>,
    /// Native value in wei.
    pub value_native: U256,
    pub data: Option<Bytes>,
    pub gas_limit: Option<u64>,
    pub gas_strategy: GasStrategy,
}

impl TransactionRequest {
    /// Plain native transfer.
    pub fn transfer(chain_id: u64, from: Address, to: Address, value: U256) -> Self {
        TransactionRequest {
            chain_id,
            from,
            to: Some(to),
            value_native: value,
            data: None,
            gas_limit: None,
            gas_strategy: GasStrategy::Standard,
        }
    }

    /// Contract call with calldata.
    pub fn call(chain_id: u64, from: Address, to: Address, value: U256, data: Bytes) -> Self {
        TransactionRequest {
            chain_id,
            from,
            to: Some(to),
            value_native: value,
            data: Some(data),
            gas_limit: None,
            gas_strategy: GasStrategy::Standard,
        }
    }

    /// Whether this request carries calldata (contract interaction).
    pub fn has_data(&self) -> bool {
        self.data.as_ref().is_some_and(|d| !d.is_empty())
    }
}

// ── Transaction record lifecycle ────────────────────────────────────

/// Persistent lifecycle state. Transitions follow a fixed DAG:
/// pending → simulated → {approved → broadcast → {confirmed | failed}}
///                     | rejected | failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Simulated,
    Approved,
    Rejected,
    Broadcast,
    Confirmed,
    Failed,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "pending",
            TxStatus::Simulated => "simulated",
            TxStatus::Approved => "approved",
            TxStatus::Rejected => "rejected",
            TxStatus::Broadcast => "broadcast",
            TxStatus::Confirmed => "confirmed",
            TxStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TxStatus::Pending),
            "simulated" => Some(TxStatus::Simulated),
            "approved" => Some(TxStatus::Approved),
            "rejected" => Some(TxStatus::Rejected),
            "broadcast" => Some(TxStatus::Broadcast),
            "confirmed" => Some(TxStatus::Confirmed),
            "failed" => Some(TxStatus::Failed),
            _ => None,
        }
    }

    /// Legal next states under the lifecycle DAG.
    pub fn can_transition_to(&self, next: TxStatus) -> bool {
        use TxStatus::*;
        matches!(
            (self, next),
            (Pending, Simulated)
                | (Pending, Failed)
                | (Simulated, Approved)
                | (Simulated, Rejected)
                | (Simulated, Failed)
                | (Approved, Broadcast)
                | (Approved, Rejected)
                | (Approved, Failed)
                | (Broadcast, Confirmed)
                | (Broadcast, Failed)
        )
    }

    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TxStatus::Confirmed | TxStatus::Rejected | TxStatus::Failed)
    }
}

/// Persistent audit record for one pipeline run. Keyed by rowid.
#[derive(Debug, Clone)]
pub struct TransactionRecord {
    pub tx_id: i64,
    pub user_id: String,
    pub skill_name: String,
    pub intent_description: String,
    pub chain_id: u64,
    pub from: String,
    pub to: Option<String>,
    /// Native value in wei, decimal string.
    pub value_native: String,
    /// USD value at persist time; the daily-cap guardrail sums this.
    pub value_usd: f64,
    pub simulation_json: Option<String>,
    pub guardrails_json: Option<String>,
    pub status: TxStatus,
    pub hash: Option<String>,
    pub gas_used: Option<u64>,
    pub effective_gas_price: Option<u128>,
    pub gas_cost_usd: Option<f64>,
    pub block_number: Option<u64>,
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

// ── Simulation ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowDirection {
    In,
    Out,
}

/// One expected token movement from a simulated transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceChange {
    /// Token address or "native".
    pub token: String,
    /// Amount in smallest unit, decimal string.
    pub amount: String,
    pub direction: FlowDirection,
}

/// Outcome of a dry run. Stored verbatim in the transaction record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationResult {
    pub success: bool,
    pub gas_estimate: u64,
    pub balance_changes: Vec<BalanceChange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of the buy-then-sell-all bundle used to detect honeypots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AntiRugResult {
    pub can_sell: bool,
    pub sell_tax_pct: f64,
    pub net_loss_pct: f64,
    /// Tokens received by the buy leg, smallest unit.
    pub buy_received: String,
    /// Native received by the sell leg, wei.
    pub sell_received: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

// ── Guardrail checks ────────────────────────────────────────────────

/// One guardrail rule evaluation. The full list is persisted with the record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Check {
    pub rule: String,
    pub passed: bool,
    pub message: String,
}

// ── Executor outcome ────────────────────────────────────────────────

/// What the executor hands back to every caller. Never a panic, never a bare
/// error: rejected and failed runs come back as `success = false` with an
/// actionable message.
#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub tx_id: Option<i64>,
    pub hash: Option<String>,
    pub success: bool,
    pub message: String,
}

impl ExecOutcome {
    pub fn rejected(tx_id: Option<i64>, message: impl Into<String>) -> Self {
        ExecOutcome { tx_id, hash: None, success: false, message: message.into() }
    }
}
