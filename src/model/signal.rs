use serde::{Deserialize, Serialize};

// ── Trading signals ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalSide {
    Buy,
    Sell,
}

impl SignalSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalSide::Buy => "buy",
            SignalSide::Sell => "sell",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "buy" => Some(SignalSide::Buy),
            "sell" => Some(SignalSide::Sell),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalStatus {
    Open,
    Closed,
    Expired,
}

impl SignalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalStatus::Open => "open",
            SignalStatus::Closed => "closed",
            SignalStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(SignalStatus::Open),
            "closed" => Some(SignalStatus::Closed),
            "expired" => Some(SignalStatus::Expired),
            _ => None,
        }
    }
}

/// A published trading call. `(provider_id, tx_hash)` is unique; verification
/// checks the hash on-chain before the signal counts as verified.
#[derive(Debug, Clone)]
pub struct Signal {
    pub id: i64,
    pub provider_id: String,
    pub chain_id: u64,
    pub token: String,
    pub side: SignalSide,
    pub entry_price: f64,
    pub tx_hash: Option<String>,
    pub verified: bool,
    pub collateral_usd: f64,
    pub leverage: f64,
    pub status: SignalStatus,
    pub exit_price: Option<f64>,
    pub pnl_pct: Option<f64>,
    pub opened_at: i64,
    pub closed_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Signal {
    /// Leveraged percent return at a given exit price.
    pub fn pnl_at(&self, exit: f64) -> f64 {
        let raw = match self.side {
            SignalSide::Buy => (exit - self.entry_price) / self.entry_price,
            SignalSide::Sell => (self.entry_price - exit) / self.entry_price,
        };
        raw * 100.0 * self.leverage
    }
}

/// Aggregate record for a signal provider, recomputed on every close.
#[derive(Debug, Clone)]
pub struct SignalProvider {
    pub id: String,
    pub display_name: String,
    pub total_signals: u32,
    pub closed_signals: u32,
    pub wins: u32,
    pub losses: u32,
    pub avg_return_pct: f64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A user following a provider's signals.
#[derive(Debug, Clone)]
pub struct SignalSubscription {
    pub id: String,
    pub user_id: String,
    pub provider_id: String,
    /// Delivery channel for notifications ("telegram", "discord", …).
    pub channel: String,
    pub last_notified_id: i64,
    pub last_notified_close_at: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(side: SignalSide, entry: f64, leverage: f64) -> Signal {
        Signal {
            id: 1,
            provider_id: "prov".into(),
            chain_id: 1,
            token: "0xabc".into(),
            side,
            entry_price: entry,
            tx_hash: None,
            verified: false,
            collateral_usd: 100.0,
            leverage,
            status: SignalStatus::Open,
            exit_price: None,
            pnl_pct: None,
            opened_at: 0,
            closed_at: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn pnl_long() {
        let s = signal(SignalSide::Buy, 100.0, 1.0);
        assert_eq!(s.pnl_at(110.0), 10.0);
        assert_eq!(s.pnl_at(90.0), -10.0);
    }

    #[test]
    fn pnl_short_with_leverage() {
        let s = signal(SignalSide::Sell, 100.0, 3.0);
        assert_eq!(s.pnl_at(90.0), 30.0);
        assert_eq!(s.pnl_at(110.0), -30.0);
    }
}
