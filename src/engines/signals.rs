//! Trading signals: providers publish calls backed by an on-chain proof,
//! subscribers get open/close notifications with realized PnL, and provider
//! stats feed a leaderboard. A background tick pushes notifications and
//! expires signals that stay open for more than seven days.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, B256, b256};
use anyhow::{Context, Result, bail};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::chain::ChainRegistry;
use crate::chain::client::TxReceipt;
use crate::chain::known_stables;
use crate::delivery::{DeliveryQueue, NotificationSender};
use crate::model::{Signal, SignalProvider, SignalSide, SignalSubscription};
use crate::now_ts;
use crate::store::Store;
use crate::store::signals::NewSignal;

/// `keccak256("Transfer(address,address,uint256)")`
const TRANSFER_TOPIC: B256 =
    b256!("ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef");

const SIGNAL_TTL_SECS: i64 = 7 * 24 * 3600;
const LEADERBOARD_MIN_CLOSED: u32 = 5;

/// Result of closing a signal.
#[derive(Debug, Clone)]
pub struct CloseResult {
    pub success: bool,
    pub pnl_pct: Option<f64>,
}

pub struct SignalsEngine {
    store: Store,
    chains: Arc<ChainRegistry>,
    delivery: DeliveryQueue,
    notifier: Arc<dyn NotificationSender>,
    poll_interval: Duration,
}

impl SignalsEngine {
    pub fn new(
        store: Store,
        chains: Arc<ChainRegistry>,
        delivery: DeliveryQueue,
        notifier: Arc<dyn NotificationSender>,
        poll_interval: Duration,
    ) -> Self {
        SignalsEngine { store, chains, delivery, notifier, poll_interval }
    }

    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let engine = self.clone();
            super::run_poll_loop("signals", self.poll_interval, shutdown, move || {
                let engine = engine.clone();
                async move { engine.tick().await }
            })
            .await;
        })
    }

    // ── Publishing ──────────────────────────────────────────────────

    /// Publish a signal. The provider row is upserted (identity preserved);
    /// a transaction hash, when supplied, is verified on-chain and may
    /// refine the entry price from the fill's transfer events.
    #[allow(clippy::too_many_arguments)]
    pub async fn publish(
        &self,
        provider_id: &str,
        display_name: &str,
        wallet: Address,
        chain_id: u64,
        token: Address,
        side: SignalSide,
        entry_price: f64,
        tx_hash: Option<B256>,
        collateral_usd: f64,
        leverage: f64,
    ) -> Result<i64> {
        self.store.upsert_signal_provider(provider_id, display_name).await?;

        let mut entry = entry_price;
        let mut verified = false;
        if let Some(hash) = tx_hash {
            match self.verify_on_chain(chain_id, hash, wallet).await {
                Ok(receipt) => {
                    verified = true;
                    if let Some(effective) = extract_entry_price(&receipt, chain_id, token) {
                        entry = effective;
                    }
                }
                Err(err) => bail!("signal proof rejected: {err}"),
            }
        }

        let id = self
            .store
            .insert_signal(NewSignal {
                provider_id: provider_id.into(),
                chain_id,
                token: format!("{token:?}"),
                side,
                entry_price: entry,
                tx_hash: tx_hash.map(|h| format!("{h:?}")),
                collateral_usd,
                leverage,
            })
            .await?;
        if verified {
            self.store.mark_signal_verified(id).await?;
        }
        self.store.recompute_provider_stats(provider_id).await?;
        info!(signal = id, provider = provider_id, verified, "signal published");
        Ok(id)
    }

    /// The receipt must exist, have succeeded, and involve the provider's
    /// wallet (as sender or inside any log topic/data).
    async fn verify_on_chain(
        &self,
        chain_id: u64,
        hash: B256,
        wallet: Address,
    ) -> Result<TxReceipt> {
        let client = self.chains.get(chain_id)?;
        let receipt = client
            .get_receipt(hash)
            .await
            .context("receipt lookup")?
            .ok_or_else(|| anyhow::anyhow!("transaction not found"))?;

        if !receipt.success {
            bail!("transaction reverted");
        }
        if !address_in_receipt(&receipt, wallet) {
            bail!("wallet not involved in transaction");
        }
        Ok(receipt)
    }

    // ── Closing ─────────────────────────────────────────────────────

    /// Close a signal at an exit price. Closing an already-closed signal
    /// reports `success: false` and changes nothing.
    pub async fn close(&self, signal_id: i64, exit_price: f64) -> Result<CloseResult> {
        let Some(signal) = self.store.get_signal(signal_id).await? else {
            return Ok(CloseResult { success: false, pnl_pct: None });
        };

        let pnl = signal.pnl_at(exit_price);
        if !self.store.close_signal(signal_id, exit_price, pnl).await? {
            return Ok(CloseResult { success: false, pnl_pct: None });
        }
        self.store.recompute_provider_stats(&signal.provider_id).await?;
        info!(signal = signal_id, pnl_pct = pnl, "signal closed");
        Ok(CloseResult { success: true, pnl_pct: Some(pnl) })
    }

    pub async fn leaderboard(&self) -> Result<Vec<SignalProvider>> {
        self.store.provider_leaderboard(LEADERBOARD_MIN_CLOSED).await
    }

    // ── Background tick ─────────────────────────────────────────────

    pub async fn tick(&self) {
        if let Err(err) = self.expire_stale().await {
            warn!(%err, "signal expiry failed");
        }
        let subs = match self.store.all_subscriptions().await {
            Ok(subs) => subs,
            Err(err) => {
                warn!(%err, "subscription query failed");
                return;
            }
        };
        for sub in subs {
            if let Err(err) = self.notify_subscription(&sub).await {
                warn!(subscription = %sub.id, %err, "subscriber notification failed");
            }
        }
    }

    async fn expire_stale(&self) -> Result<()> {
        let n = self.store.expire_signals_before(now_ts() - SIGNAL_TTL_SECS).await?;
        if n > 0 {
            info!(count = n, "expired stale signals");
        }
        Ok(())
    }

    async fn notify_subscription(&self, sub: &SignalSubscription) -> Result<()> {
        let mut last_id = sub.last_notified_id;
        for signal in self.store.signals_after(&sub.provider_id, sub.last_notified_id).await? {
            self.delivery
                .push(
                    self.notifier.as_ref(),
                    &sub.channel,
                    &sub.user_id,
                    &format_open(&signal, &sub.provider_id),
                )
                .await?;
            last_id = last_id.max(signal.id);
        }

        let mut last_close = sub.last_notified_close_at;
        for signal in
            self.store.signals_closed_since(&sub.provider_id, sub.last_notified_close_at).await?
        {
            self.delivery
                .push(
                    self.notifier.as_ref(),
                    &sub.channel,
                    &sub.user_id,
                    &format_close(&signal, &sub.provider_id),
                )
                .await?;
            last_close = last_close.max(signal.closed_at.unwrap_or(last_close));
        }

        if last_id != sub.last_notified_id || last_close != sub.last_notified_close_at {
            self.store.update_subscription_cursor(&sub.id, last_id, last_close).await?;
        }
        Ok(())
    }
}

fn format_open(signal: &Signal, provider: &str) -> String {
    format!(
        "Signal from {provider}: {} {} at {} ({}x{})",
        signal.side.as_str(),
        signal.token,
        signal.entry_price,
        signal.leverage,
        if signal.verified { ", verified" } else { "" },
    )
}

fn format_close(signal: &Signal, provider: &str) -> String {
    let pnl = signal.pnl_pct.unwrap_or(0.0);
    format!(
        "Signal closed by {provider}: {} {} at {} -> {:+.2}%",
        signal.side.as_str(),
        signal.token,
        signal.exit_price.unwrap_or(0.0),
        pnl,
    )
}

/// Wallet involvement: the sender, any log topic carrying the address, or a
/// 20-byte match inside log data.
fn address_in_receipt(receipt: &TxReceipt, wallet: Address) -> bool {
    if receipt.from == wallet {
        return true;
    }
    let needle = wallet.as_slice();
    receipt.logs.iter().any(|log| {
        log.topics.iter().any(|t| &t.as_slice()[12..] == needle)
            || log.data.windows(20).any(|w| w == needle)
    })
}

/// Effective entry price from a fill's transfer events: the ratio between
/// the recognized stable-coin leg and the target-token leg (raw units).
fn extract_entry_price(receipt: &TxReceipt, chain_id: u64, token: Address) -> Option<f64> {
    let stables = known_stables(chain_id);
    let mut stable_amount: Option<f64> = None;
    let mut token_amount: Option<f64> = None;

    for log in &receipt.logs {
        if log.topics.first() != Some(&TRANSFER_TOPIC) || log.data.len() < 32 {
            continue;
        }
        let amount =
            alloy::primitives::U256::from_be_slice(&log.data[..32]).to::<u128>() as f64;
        if amount == 0.0 {
            continue;
        }
        if stables.contains(&log.address) {
            stable_amount.get_or_insert(amount);
        } else if log.address == token {
            token_amount.get_or_insert(amount);
        }
    }

    match (stable_amount, token_amount) {
        (Some(quote), Some(base)) => Some(quote / base),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use alloy::primitives::Bytes;

    use crate::chain::client::{ChainClient, ReceiptLog};
    use crate::delivery::testing::RecordingSender;
    use crate::test_support::TestChain;

    use super::*;

    const PROVIDER_WALLET: Address = Address::new([0xAB; 20]);
    const TOKEN: Address = Address::new([0xCD; 20]);

    fn usdc() -> Address {
        known_stables(1)[0]
    }

    fn transfer_log(token: Address, amount: u128) -> ReceiptLog {
        let mut data = [0u8; 32];
        data[16..].copy_from_slice(&amount.to_be_bytes());
        ReceiptLog {
            address: token,
            topics: vec![TRANSFER_TOPIC, B256::ZERO, B256::ZERO],
            data: Bytes::from(data.to_vec()),
        }
    }

    fn fill_receipt(hash: B256, success: bool) -> TxReceipt {
        TxReceipt {
            hash,
            success,
            from: PROVIDER_WALLET,
            to: None,
            gas_used: 100_000,
            effective_gas_price: 1,
            block_number: 10,
            logs: vec![
                transfer_log(usdc(), 3_000_000_000), // 3000 USDC (6 decimals)
                transfer_log(TOKEN, 1_500_000_000),  // 1500 tokens
            ],
        }
    }

    struct Rig {
        store: Store,
        engine: SignalsEngine,
        chain: Arc<TestChain>,
        sender: Arc<RecordingSender>,
    }

    fn rig() -> Rig {
        let store = Store::open_in_memory().unwrap();
        let chain = Arc::new(TestChain::new(1));
        let mut clients: HashMap<u64, Arc<dyn ChainClient>> = HashMap::new();
        clients.insert(1, chain.clone());
        let sender = Arc::new(RecordingSender::new());
        let engine = SignalsEngine::new(
            store.clone(),
            Arc::new(ChainRegistry::with_clients(clients)),
            DeliveryQueue::new(store.clone(), 3),
            sender.clone(),
            Duration::from_secs(30),
        );
        Rig { store, engine, chain, sender }
    }

    async fn publish_simple(r: &Rig, hash: Option<B256>) -> Result<i64> {
        r.engine
            .publish("prov", "Prov", PROVIDER_WALLET, 1, TOKEN, SignalSide::Buy, 2.0, hash, 500.0, 2.0)
            .await
    }

    #[tokio::test]
    async fn verified_publish_extracts_entry_price() {
        let r = rig();
        let hash = B256::repeat_byte(0x01);
        r.chain.receipts.lock().unwrap().insert(hash, fill_receipt(hash, true));

        let id = publish_simple(&r, Some(hash)).await.unwrap();
        let signal = r.store.get_signal(id).await.unwrap().unwrap();
        assert!(signal.verified);
        // 3_000_000_000 / 1_500_000_000 = 2.0 quote per token.
        assert_eq!(signal.entry_price, 2.0);
    }

    #[tokio::test]
    async fn reverted_proof_is_rejected() {
        let r = rig();
        let hash = B256::repeat_byte(0x02);
        r.chain.receipts.lock().unwrap().insert(hash, fill_receipt(hash, false));

        let err = publish_simple(&r, Some(hash)).await.unwrap_err();
        assert!(err.to_string().contains("signal proof rejected"));
    }

    #[tokio::test]
    async fn foreign_wallet_proof_is_rejected() {
        let r = rig();
        let hash = B256::repeat_byte(0x03);
        let mut receipt = fill_receipt(hash, true);
        receipt.from = Address::new([0x99; 20]);
        receipt.logs.clear();
        r.chain.receipts.lock().unwrap().insert(hash, receipt);

        assert!(publish_simple(&r, Some(hash)).await.is_err());
    }

    #[tokio::test]
    async fn close_computes_leveraged_pnl_once() {
        let r = rig();
        let id = publish_simple(&r, None).await.unwrap();

        // buy at 2.0, exit 2.4, 2x leverage => +40%.
        let result = r.engine.close(id, 2.4).await.unwrap();
        assert!(result.success);
        assert!((result.pnl_pct.unwrap() - 40.0).abs() < 1e-9);

        // Second close: no state change.
        let again = r.engine.close(id, 99.0).await.unwrap();
        assert!(!again.success);
        let signal = r.store.get_signal(id).await.unwrap().unwrap();
        assert_eq!(signal.exit_price, Some(2.4));

        let prov = r.store.get_signal_provider("prov").await.unwrap().unwrap();
        assert_eq!(prov.closed_signals, 1);
        assert_eq!(prov.wins, 1);
    }

    #[tokio::test]
    async fn tick_notifies_opens_and_closes_once() {
        let r = rig();
        r.store.upsert_signal_provider("prov", "Prov").await.unwrap();
        r.store
            .insert_subscription(&SignalSubscription {
                id: "sub1".into(),
                user_id: "follower".into(),
                provider_id: "prov".into(),
                channel: "telegram".into(),
                last_notified_id: 0,
                last_notified_close_at: 0,
                created_at: 0,
                updated_at: 0,
            })
            .await
            .unwrap();

        let id = publish_simple(&r, None).await.unwrap();
        r.engine.tick().await;
        assert_eq!(r.sender.sent.lock().unwrap().len(), 1);

        // No duplicate notification for the same signal.
        r.engine.tick().await;
        assert_eq!(r.sender.sent.lock().unwrap().len(), 1);

        r.engine.close(id, 2.6).await.unwrap();
        r.engine.tick().await;
        let sent = r.sender.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert!(sent[1].1.contains("Signal closed"));
        assert!(sent[1].1.contains("+60.00%"));
    }

    #[tokio::test]
    async fn week_old_signals_expire() {
        let r = rig();
        let id = publish_simple(&r, None).await.unwrap();
        {
            // Backdate the open far enough to cross the TTL.
            let conn = r.store.conn().await;
            conn.execute(
                "UPDATE signals SET opened_at = ?2 WHERE id = ?1",
                rusqlite::params![id, now_ts() - SIGNAL_TTL_SECS - 10],
            )
            .unwrap();
        }

        r.engine.tick().await;
        let signal = r.store.get_signal(id).await.unwrap().unwrap();
        assert_eq!(signal.status, crate::model::SignalStatus::Expired);

        // Expired is terminal for close.
        assert!(!r.engine.close(id, 3.0).await.unwrap().success);
    }
}
