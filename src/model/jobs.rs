use serde::{Deserialize, Serialize};

// ── Shared job status ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Active,
    Paused,
    Completed,
    Cancelled,
    Exhausted,
    Filled,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Active => "active",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Exhausted => "exhausted",
            JobStatus::Filled => "filled",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(JobStatus::Active),
            "paused" => Some(JobStatus::Paused),
            "completed" => Some(JobStatus::Completed),
            "cancelled" => Some(JobStatus::Cancelled),
            "exhausted" => Some(JobStatus::Exhausted),
            "filled" => Some(JobStatus::Filled),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

// ── DCA ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DcaFrequency {
    Hourly,
    Daily,
    Weekly,
}

impl DcaFrequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            DcaFrequency::Hourly => "hourly",
            DcaFrequency::Daily => "daily",
            DcaFrequency::Weekly => "weekly",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "hourly" => Some(DcaFrequency::Hourly),
            "daily" => Some(DcaFrequency::Daily),
            "weekly" => Some(DcaFrequency::Weekly),
            _ => None,
        }
    }

    pub fn interval_ms(&self) -> i64 {
        match self {
            DcaFrequency::Hourly => 3_600_000,
            DcaFrequency::Daily => 86_400_000,
            DcaFrequency::Weekly => 604_800_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DcaStrategy {
    /// Buy `amount` every round.
    Fixed,
    /// Value averaging: buy whatever brings holdings to `amount × round`.
    Smart,
}

impl DcaStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DcaStrategy::Fixed => "fixed",
            DcaStrategy::Smart => "smart",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fixed" => Some(DcaStrategy::Fixed),
            "smart" => Some(DcaStrategy::Smart),
            _ => None,
        }
    }
}

/// A recurring swap job. `next_execution_at` (unix ms) is the scheduler key.
#[derive(Debug, Clone)]
pub struct DcaJob {
    pub id: String,
    pub user_id: String,
    pub wallet_address: String,
    pub from_token: String,
    pub to_token: String,
    /// Smallest-unit amount of `from_token`: per-round buy for `fixed`,
    /// per-round value target for `smart`.
    pub amount: String,
    pub chain_id: u64,
    pub frequency: DcaFrequency,
    pub interval_ms: i64,
    pub strategy: DcaStrategy,
    pub status: JobStatus,
    pub total_executions: u32,
    pub max_executions: Option<u32>,
    /// Cumulative `from_token` spent, smallest unit.
    pub total_spent: String,
    /// Running average fill price in `from_token` per `to_token`.
    pub avg_price: Option<f64>,
    pub last_executed_at: Option<i64>,
    pub next_execution_at: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

// ── Limit orders ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerDirection {
    /// Fire when price rises to or above the trigger.
    Above,
    /// Fire when price falls to or below the trigger.
    Below,
}

impl TriggerDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerDirection::Above => "above",
            TriggerDirection::Below => "below",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "above" => Some(TriggerDirection::Above),
            "below" => Some(TriggerDirection::Below),
            _ => None,
        }
    }

    pub fn is_met(&self, current: f64, trigger: f64) -> bool {
        match self {
            TriggerDirection::Above => current >= trigger,
            TriggerDirection::Below => current <= trigger,
        }
    }
}

/// A swap armed on a price trigger.
#[derive(Debug, Clone)]
pub struct LimitOrder {
    pub id: String,
    pub user_id: String,
    pub wallet_address: String,
    pub chain_id: u64,
    pub from_token: String,
    pub to_token: String,
    /// Smallest-unit amount of `from_token`.
    pub amount: String,
    /// USD price of `to_token` that arms the order.
    pub trigger_price: f64,
    pub direction: TriggerDirection,
    pub status: JobStatus,
    pub fill_tx_hash: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

// ── Whale watches ───────────────────────────────────────────────────

/// A watched on-chain address with alert threshold and optional copy-trade.
#[derive(Debug, Clone)]
pub struct WhaleWatch {
    pub id: String,
    pub user_id: String,
    pub chain_id: u64,
    /// Lowercase hex address being watched.
    pub address: String,
    pub label: Option<String>,
    /// Alert when a matched tx moves at least this much.
    pub min_value_usd: f64,
    pub auto_copy: bool,
    /// Native wei spent per copy-trade, smallest unit.
    pub copy_amount: String,
    pub copy_max_daily: u32,
    pub copies_today: u32,
    /// UTC day (YYYY-MM-DD) the counter applies to.
    pub copies_day: String,
    pub status: JobStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

// ── Snipes ──────────────────────────────────────────────────────────

/// A one-shot token buy with mandatory safety checks.
#[derive(Debug, Clone)]
pub struct Snipe {
    pub id: String,
    pub user_id: String,
    pub wallet_address: String,
    pub chain_id: u64,
    pub token: String,
    /// Native wei to spend.
    pub amount: String,
    pub status: JobStatus,
    pub tx_hash: Option<String>,
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Standing instruction to snipe a token automatically, bounded by
/// `max_executions`. The counter and the exhausted transition are one atomic
/// statement so parallel triggers cannot overshoot.
#[derive(Debug, Clone)]
pub struct AutoSnipe {
    pub id: String,
    pub user_id: String,
    pub wallet_address: String,
    pub chain_id: u64,
    pub token: String,
    /// Native wei per execution.
    pub amount: String,
    pub max_executions: u32,
    pub executed_count: u32,
    pub status: JobStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_direction_comparison() {
        assert!(TriggerDirection::Above.is_met(101.0, 100.0));
        assert!(TriggerDirection::Above.is_met(100.0, 100.0));
        assert!(!TriggerDirection::Above.is_met(99.0, 100.0));
        assert!(TriggerDirection::Below.is_met(99.0, 100.0));
        assert!(!TriggerDirection::Below.is_met(101.0, 100.0));
    }

    #[test]
    fn frequency_intervals() {
        assert_eq!(DcaFrequency::Hourly.interval_ms(), 3_600_000);
        assert_eq!(DcaFrequency::Daily.interval_ms(), 86_400_000);
        assert_eq!(DcaFrequency::Weekly.interval_ms(), 604_800_000);
    }
}
