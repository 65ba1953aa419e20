use serde::{Deserialize, Serialize};

// ── Risk report ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Safe,
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Safe => "safe",
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "safe" => Some(RiskLevel::Safe),
            "low" => Some(RiskLevel::Low),
            "medium" => Some(RiskLevel::Medium),
            "high" => Some(RiskLevel::High),
            "critical" => Some(RiskLevel::Critical),
            _ => None,
        }
    }

    /// Bucket an overall 0-100 score into a level.
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s < 15.0 => RiskLevel::Safe,
            s if s < 35.0 => RiskLevel::Low,
            s if s < 60.0 => RiskLevel::Medium,
            s if s < 85.0 => RiskLevel::High,
            _ => RiskLevel::Critical,
        }
    }
}

/// One scored axis of a risk report (ownership, taxes, liquidity, …).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskDimension {
    pub name: String,
    /// 0 (clean) to 100 (certain rug).
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Cached evaluation of a contract/token, keyed by `(chain_id, contract)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskReport {
    pub chain_id: u64,
    /// Lowercase hex contract address.
    pub contract: String,
    pub overall_score: f64,
    pub risk_level: RiskLevel,
    pub dimensions: Vec<RiskDimension>,
    pub is_honeypot: bool,
    pub has_buy_tax: bool,
    pub has_sell_tax: bool,
    pub source_verified: bool,
    pub owner_can_modify: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liquidity_usd: Option<f64>,
    pub cached_at: i64,
}

impl RiskReport {
    /// Entries this bad are never refreshed; once known, always blocked.
    pub fn is_permanent(&self) -> bool {
        self.is_honeypot || self.risk_level == RiskLevel::Critical
    }
}

// ── Contract allow/block list ───────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractAction {
    Allow,
    Block,
}

impl ContractAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractAction::Allow => "allow",
            ContractAction::Block => "block",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "allow" => Some(ContractAction::Allow),
            "block" => Some(ContractAction::Block),
            _ => None,
        }
    }
}

/// One allow/block list row. Block entries take precedence over allow
/// entries, which take precedence over the risk-derived decision.
#[derive(Debug, Clone)]
pub struct ContractRule {
    pub address: String,
    pub chain_id: u64,
    pub action: ContractAction,
    pub reason: String,
    pub added_at: i64,
}
