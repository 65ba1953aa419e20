//! Typed pipeline events. Two consumers: the per-invocation observer (a
//! trait with no-op defaults, standing in for optional callbacks) and the
//! process-wide broadcast bus other components can subscribe to.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::model::{Check, SimulationResult};

// ── Broadcast bus ──────────────────────────────────────────────────

/// Closed event types; payloads are concrete records, never loose maps.
#[derive(Debug, Clone)]
pub enum TxEvent {
    BeforeSimulate { user_id: String, chain_id: u64 },
    AfterSimulate { user_id: String, chain_id: u64, success: bool },
    BeforeBroadcast { tx_id: i64 },
    Broadcast { tx_id: i64, hash: String },
    Confirmed { tx_id: i64, hash: String, block_number: u64 },
    Failed { tx_id: Option<i64>, error: String },
}

/// Process-wide publish/subscribe registry for pipeline events.
#[derive(Clone)]
pub struct TxEventBus {
    tx: broadcast::Sender<TxEvent>,
}

impl Default for TxEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl TxEventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        TxEventBus { tx }
    }

    /// Publishing with no subscribers is fine; events are advisory.
    pub fn publish(&self, event: TxEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TxEvent> {
        self.tx.subscribe()
    }
}

// ── Per-invocation observer ────────────────────────────────────────

/// Progress callbacks for one pipeline run. Every method has a no-op
/// default, and the boolean gates default to proceed, so callers implement
/// only what their channel supports.
#[async_trait]
pub trait TxObserver: Send + Sync {
    async fn on_simulated(&self, _result: &SimulationResult, _preview: &str) {}

    async fn on_guardrails(&self, _checks: &[Check]) {}

    /// A medium/high risk report was produced. Return false to abort.
    async fn on_risk_warning(&self, _warning: &str) -> bool {
        true
    }

    /// A confirmation is required (large value, or a manual signer).
    /// Return false to reject the transaction.
    async fn on_confirmation_required(&self, _preview: &str, _tx_id: i64) -> bool {
        true
    }

    async fn on_broadcast(&self, _hash: &str) {}

    async fn on_confirmed(&self, _hash: &str, _block_number: u64) {}

    async fn on_failed(&self, _error: &str) {}
}

/// Observer that accepts everything silently; used by background engines.
pub struct NoopObserver;

#[async_trait]
impl TxObserver for NoopObserver {}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bus_delivers_to_subscribers() {
        let bus = TxEventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(TxEvent::Broadcast { tx_id: 7, hash: "0xaa".into() });

        match rx.recv().await.unwrap() {
            TxEvent::Broadcast { tx_id, hash } => {
                assert_eq!(tx_id, 7);
                assert_eq!(hash, "0xaa");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn noop_observer_defaults_proceed() {
        let obs = NoopObserver;
        assert!(obs.on_risk_warning("risky").await);
        assert!(obs.on_confirmation_required("preview", 1).await);
    }
}
