use serde::{Deserialize, Serialize};

/// Per-user spend policy. A missing row means the defaults apply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserLimits {
    pub max_per_tx_usd: f64,
    pub max_per_day_usd: f64,
    pub cooldown_seconds: u64,
    pub slippage_bps: u32,
}

impl Default for UserLimits {
    fn default() -> Self {
        UserLimits {
            max_per_tx_usd: 1_000.0,
            max_per_day_usd: 5_000.0,
            cooldown_seconds: 30,
            slippage_bps: 100,
        }
    }
}
