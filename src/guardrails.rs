//! Per-user spend policy: per-transaction cap, rolling daily cap, and a
//! send cooldown, evaluated in that fixed order so the check list is a
//! deterministic function of the inputs.

use alloy::primitives::U256;
use anyhow::Result;

use crate::model::{Check, TransactionRequest, UserLimits};
use crate::now_ts;
use crate::store::Store;

const DAY_SECS: i64 = 86_400;

pub struct Guardrails {
    store: Store,
    defaults: UserLimits,
    /// Fraction of `max_per_tx_usd` above which an explicit confirmation is
    /// demanded.
    confirm_threshold: f64,
}

impl Guardrails {
    pub fn new(store: Store, defaults: UserLimits, confirm_threshold: f64) -> Self {
        Guardrails { store, defaults, confirm_threshold }
    }

    pub async fn limits_for(&self, user_id: &str) -> Result<UserLimits> {
        Ok(self.store.get_limits(user_id).await?.unwrap_or_else(|| self.defaults.clone()))
    }

    /// Evaluate all three rules. Order and messages are stable; a failed
    /// rule never short-circuits the rest, so callers always see the full
    /// picture.
    pub async fn check(
        &self,
        user_id: &str,
        tx: &TransactionRequest,
        native_price_usd: f64,
    ) -> Result<Vec<Check>> {
        let limits = self.limits_for(user_id).await?;
        let value_usd = value_usd(tx.value_native, native_price_usd);
        let mut checks = Vec::with_capacity(3);

        // 1. Per-transaction cap.
        checks.push(if value_usd <= limits.max_per_tx_usd {
            Check {
                rule: "max_per_tx".into(),
                passed: true,
                message: format!("${value_usd:.2} within per-tx limit of ${:.2}", limits.max_per_tx_usd),
            }
        } else {
            Check {
                rule: "max_per_tx".into(),
                passed: false,
                message: format!(
                    "value ${value_usd:.2} exceeds per-tx limit of ${:.2}",
                    limits.max_per_tx_usd
                ),
            }
        });

        // 2. Rolling 24h cap over already-sent transactions plus this one.
        let spent = self.store.sum_recent_value_usd(user_id, DAY_SECS).await?;
        let would_be = spent + value_usd;
        checks.push(if would_be <= limits.max_per_day_usd {
            Check {
                rule: "max_per_day".into(),
                passed: true,
                message: format!(
                    "${would_be:.2} of ${:.2} daily limit used",
                    limits.max_per_day_usd
                ),
            }
        } else {
            Check {
                rule: "max_per_day".into(),
                passed: false,
                message: format!(
                    "would exceed daily limit: ${spent:.2} spent + ${value_usd:.2} > ${:.2}",
                    limits.max_per_day_usd
                ),
            }
        });

        // 3. Cooldown since the last send.
        let last_sent = self.store.last_tx_sent_at(user_id).await?;
        let elapsed = last_sent.map(|t| now_ts() - t);
        let cooldown = limits.cooldown_seconds as i64;
        checks.push(match elapsed {
            Some(e) if e < cooldown => Check {
                rule: "cooldown".into(),
                passed: false,
                message: format!("cooldown: wait {}s between transactions", cooldown - e),
            },
            _ => Check { rule: "cooldown".into(), passed: true, message: "cooldown clear".into() },
        });

        Ok(checks)
    }

    /// Large transactions need an explicit yes even when every check passes.
    pub fn requires_confirmation(&self, value_usd: f64, limits: &UserLimits) -> bool {
        value_usd > self.confirm_threshold * limits.max_per_tx_usd
    }

    /// Stamp the user's last-send time. Called right after broadcast.
    pub async fn record_tx_sent(&self, user_id: &str) -> Result<()> {
        self.store.stamp_tx_sent(user_id, &self.defaults).await
    }
}

/// Wei to USD at the given native price.
pub fn value_usd(value_wei: U256, native_price_usd: f64) -> f64 {
    value_wei.to::<u128>() as f64 / 1e18 * native_price_usd
}
