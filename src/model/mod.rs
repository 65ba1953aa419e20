pub mod jobs;
pub mod limits;
pub mod risk;
pub mod signal;
pub mod tx;

pub use jobs::*;
pub use limits::UserLimits;
pub use risk::*;
pub use signal::*;
pub use tx::*;

use serde::{Deserialize, Serialize};

// ── Delivery queue ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DeliveryStatus::Pending),
            "sent" => Some(DeliveryStatus::Sent),
            "failed" => Some(DeliveryStatus::Failed),
            _ => None,
        }
    }
}

/// A user notification awaiting at-least-once delivery.
#[derive(Debug, Clone)]
pub struct DeliveryQueueEntry {
    pub id: String,
    pub channel: String,
    pub recipient_id: String,
    pub message: String,
    pub status: DeliveryStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}
