//! Whale watching: per-chain block polling with address matching. Matched
//! transactions above a watch's USD threshold raise alerts through the
//! durable delivery queue; watches with auto-copy enabled mirror the
//! whale's DEX buys, bounded by an atomically claimed daily slot and the
//! usual risk pipeline.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::eips::BlockNumberOrTag;
use alloy::primitives::{Address, U256};
use alloy::sol;
use alloy::sol_types::SolCall;
use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::chain::client::BlockTx;
use crate::chain::{ChainRegistry, chain_name};
use crate::delivery::{DeliveryQueue, NotificationSender};
use crate::executor::events::NoopObserver;
use crate::executor::{ExecMeta, Executor};
use crate::model::WhaleWatch;
use crate::prices::PriceFeed;
use crate::quotes::{QuoteClient, QuoteQuery};
use crate::risk::RiskEngine;
use crate::signer::Signer;
use crate::store::Store;

use super::flow::FlowTracker;

sol! {
    function swapExactETHForTokens(
        uint256 amountOutMin, address[] path, address to, uint256 deadline);
    function swapExactETHForTokensSupportingFeeOnTransferTokens(
        uint256 amountOutMin, address[] path, address to, uint256 deadline);
    function swapExactTokensForTokens(
        uint256 amountIn, uint256 amountOutMin, address[] path, address to, uint256 deadline);
    function swapExactTokensForTokensSupportingFeeOnTransferTokens(
        uint256 amountIn, uint256 amountOutMin, address[] path, address to, uint256 deadline);
}

pub struct WhaleEngine {
    store: Store,
    chains: Arc<ChainRegistry>,
    executor: Arc<Executor>,
    quotes: Arc<dyn QuoteClient>,
    prices: Arc<dyn PriceFeed>,
    risk: Arc<RiskEngine>,
    delivery: DeliveryQueue,
    notifier: Arc<dyn NotificationSender>,
    signer: Arc<dyn Signer>,
    flow: FlowTracker,
    last_blocks: Mutex<HashMap<u64, u64>>,
    poll_interval: Duration,
    alert_channel: String,
    copy_slippage_bps: u32,
}

impl WhaleEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Store,
        chains: Arc<ChainRegistry>,
        executor: Arc<Executor>,
        quotes: Arc<dyn QuoteClient>,
        prices: Arc<dyn PriceFeed>,
        risk: Arc<RiskEngine>,
        delivery: DeliveryQueue,
        notifier: Arc<dyn NotificationSender>,
        signer: Arc<dyn Signer>,
        poll_interval: Duration,
        alert_channel: String,
        copy_slippage_bps: u32,
    ) -> Self {
        WhaleEngine {
            store,
            chains,
            executor,
            quotes,
            prices,
            risk,
            delivery,
            notifier,
            signer,
            flow: FlowTracker::new(),
            last_blocks: Mutex::new(HashMap::new()),
            poll_interval,
            alert_channel,
            copy_slippage_bps,
        }
    }

    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let engine = self.clone();
            super::run_poll_loop("whales", self.poll_interval, shutdown, move || {
                let engine = engine.clone();
                async move { engine.tick().await }
            })
            .await;
        })
    }

    pub async fn tick(&self) {
        let chain_ids = match self.store.watched_chain_ids().await {
            Ok(ids) => ids,
            Err(err) => {
                warn!(%err, "whale work-set query failed");
                return;
            }
        };
        for chain_id in chain_ids {
            if let Err(err) = self.process_chain(chain_id).await {
                warn!(chain_id, %err, "whale chain scan failed");
            }
        }
    }

    async fn process_chain(&self, chain_id: u64) -> Result<()> {
        let client = self.chains.get(chain_id)?;
        let Some(block) = client.get_block_with_txs(BlockNumberOrTag::Latest).await? else {
            return Ok(());
        };

        // Only ever move forward; a repeated head is a no-op.
        {
            let mut last = self.last_blocks.lock().unwrap();
            let entry = last.entry(chain_id).or_insert(0);
            if block.number <= *entry {
                return Ok(());
            }
            *entry = block.number;
        }

        let watches = self.store.active_whale_watches(chain_id).await?;
        if watches.is_empty() {
            return Ok(());
        }
        let native_price = self.prices.native_price_usd(chain_id).await.unwrap_or(0.0);

        for tx in &block.txs {
            for watch in &watches {
                if let Err(err) = self.match_tx(watch, tx, native_price).await {
                    warn!(watch = %watch.id, %err, "whale match handling failed");
                }
            }
        }
        Ok(())
    }

    async fn match_tx(&self, watch: &WhaleWatch, tx: &BlockTx, native_price: f64) -> Result<()> {
        let addr: Address = watch.address.parse().context("watch address")?;
        let is_sender = tx.from == addr;
        let is_receiver = tx.to == Some(addr);
        if !is_sender && !is_receiver {
            return Ok(());
        }

        let value_usd = tx.value.to::<u128>() as f64 / 1e18 * native_price;
        let signed = if is_receiver { value_usd } else { -value_usd };
        let signals = self.flow.record(watch.chain_id, &watch.address, signed, crate::now_ms());

        if value_usd >= watch.min_value_usd && watch.min_value_usd > 0.0 {
            let who = watch.label.clone().unwrap_or_else(|| short_addr(&watch.address));
            let direction = if is_sender { "sent" } else { "received" };
            let mut message = format!(
                "Whale alert: {who} {direction} ${value_usd:.0} on {} (tx {})",
                chain_name(watch.chain_id),
                tx.hash,
            );
            if !signals.is_empty() {
                let tags: Vec<&str> = signals.iter().map(|s| s.describe()).collect();
                message.push_str(&format!(" [{}]", tags.join(", ")));
            }
            self.delivery
                .push(self.notifier.as_ref(), &self.alert_channel, &watch.user_id, &message)
                .await?;
        }

        if watch.auto_copy && is_sender {
            if let Some(token) = swap_target_token(&tx.input) {
                self.copy_trade(watch, token).await?;
            }
        }
        Ok(())
    }

    async fn copy_trade(&self, watch: &WhaleWatch, token: Address) -> Result<()> {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        if !self.store.claim_copy_slot(&watch.id, &today).await? {
            info!(watch = %watch.id, "daily copy limit reached, skipping");
            return Ok(());
        }

        let decision = self
            .risk
            .should_block(&watch.user_id, watch.chain_id, &format!("{token:?}"))
            .await?;
        if decision.blocked {
            warn!(watch = %watch.id, ?token, reason = ?decision.reason, "copy-trade blocked by risk");
            return Ok(());
        }

        let amount: U256 = watch.copy_amount.parse().context("copy amount")?;
        if amount.is_zero() {
            return Ok(());
        }

        let quote = self
            .quotes
            .quote(&QuoteQuery {
                chain_id: watch.chain_id,
                from_token: None,
                to_token: token,
                amount,
                from_address: self.signer.address(),
                slippage_bps: self.copy_slippage_bps,
            })
            .await
            .context("copy-trade quote")?;

        let meta = ExecMeta::new(
            watch.user_id.clone(),
            "whale_copy",
            format!("copy whale {} into {token:?}", watch.address),
        );
        let outcome =
            self.executor.execute(quote.tx, self.signer.clone(), meta, Arc::new(NoopObserver)).await;
        if outcome.success {
            info!(watch = %watch.id, hash = ?outcome.hash, "copy-trade broadcast");
        } else {
            warn!(watch = %watch.id, message = %outcome.message, "copy-trade failed");
        }
        Ok(())
    }
}

/// If the calldata is a recognized DEX router swap, the token being bought
/// (the last hop of the path).
pub fn swap_target_token(input: &[u8]) -> Option<Address> {
    if input.len() < 4 {
        return None;
    }
    let selector: [u8; 4] = input[..4].try_into().ok()?;

    let path = match selector {
        s if s == swapExactETHForTokensCall::SELECTOR => {
            swapExactETHForTokensCall::abi_decode(input).ok()?.path
        }
        s if s == swapExactETHForTokensSupportingFeeOnTransferTokensCall::SELECTOR => {
            swapExactETHForTokensSupportingFeeOnTransferTokensCall::abi_decode(input).ok()?.path
        }
        s if s == swapExactTokensForTokensCall::SELECTOR => {
            swapExactTokensForTokensCall::abi_decode(input).ok()?.path
        }
        s if s == swapExactTokensForTokensSupportingFeeOnTransferTokensCall::SELECTOR => {
            swapExactTokensForTokensSupportingFeeOnTransferTokensCall::abi_decode(input).ok()?.path
        }
        _ => return None,
    };
    path.last().copied()
}

fn short_addr(addr: &str) -> String {
    if addr.len() > 10 {
        format!("{}...{}", &addr[..6], &addr[addr.len() - 4..])
    } else {
        addr.to_string()
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::{B256, Bytes};

    use crate::chain::client::{BlockWithTxs, ChainClient};
    use crate::delivery::testing::RecordingSender;
    use crate::model::RiskLevel;
    use crate::prices::StaticPriceFeed;
    use crate::risk::testing::{FixedOracle, report};
    use crate::store::whales::sample_watch;
    use crate::test_support::{TestChain, TestQuoteClient, TestSigner, test_executor};

    use super::*;

    const WHALE: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    fn swap_calldata(token: Address) -> Bytes {
        let call = swapExactETHForTokensCall {
            amountOutMin: U256::ZERO,
            path: vec![Address::new([0x11; 20]), token],
            to: Address::new([0x22; 20]),
            deadline: U256::from(9_999_999_999u64),
        };
        Bytes::from(call.abi_encode())
    }

    fn block(number: u64, txs: Vec<BlockTx>) -> BlockWithTxs {
        BlockWithTxs { number, timestamp: 0, txs }
    }

    fn native_move(from: &str, to: &str, eth: f64) -> BlockTx {
        BlockTx {
            hash: B256::repeat_byte(0x77),
            from: from.parse().unwrap(),
            to: Some(to.parse().unwrap()),
            value: U256::from((eth * 1e18) as u128),
            input: Bytes::new(),
        }
    }

    struct Rig {
        store: Store,
        engine: WhaleEngine,
        chain: Arc<TestChain>,
        sender: Arc<RecordingSender>,
        signer: Arc<TestSigner>,
    }

    fn rig() -> Rig {
        let store = Store::open_in_memory().unwrap();
        let chain = Arc::new(TestChain::new(1));
        let executor = test_executor(&store, chain.clone());

        let mut clients: HashMap<u64, Arc<dyn ChainClient>> = HashMap::new();
        clients.insert(1, chain.clone());
        let chains = Arc::new(ChainRegistry::with_clients(clients));

        let sender = Arc::new(RecordingSender::new());
        let signer = Arc::new(TestSigner::new());
        let risk = Arc::new(RiskEngine::new(
            store.clone(),
            Arc::new(FixedOracle::new(report(RiskLevel::Low, false))),
            Duration::from_secs(600),
        ));
        let engine = WhaleEngine::new(
            store.clone(),
            chains,
            executor,
            Arc::new(TestQuoteClient::with_rate(2.0)),
            Arc::new(StaticPriceFeed::default().with_native(1, 2_500.0)),
            risk,
            DeliveryQueue::new(store.clone(), 3),
            sender.clone(),
            signer.clone(),
            Duration::from_secs(5),
            "telegram".into(),
            100,
        );
        Rig { store, engine, chain, sender, signer }
    }

    #[tokio::test]
    async fn threshold_crossing_raises_alert() {
        let r = rig();
        r.store.insert_whale_watch(&sample_watch("w1", 0)).await.unwrap();

        // $250k move from the watched address (threshold $100k).
        r.chain.push_block(block(1, vec![native_move(WHALE, "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb", 100.0)]));
        r.engine.tick().await;

        let sent = r.sender.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "user-1");
        assert!(sent[0].1.contains("Whale alert"));
        assert!(sent[0].1.contains("sent $250000"));
    }

    #[tokio::test]
    async fn below_threshold_stays_quiet() {
        let r = rig();
        r.store.insert_whale_watch(&sample_watch("w2", 0)).await.unwrap();

        r.chain.push_block(block(1, vec![native_move(WHALE, "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb", 1.0)]));
        r.engine.tick().await;

        assert!(r.sender.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn repeated_head_block_is_not_reprocessed() {
        let r = rig();
        r.store.insert_whale_watch(&sample_watch("w3", 0)).await.unwrap();

        r.chain.push_block(block(5, vec![native_move(WHALE, "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb", 100.0)]));
        r.engine.tick().await;
        r.engine.tick().await;

        assert_eq!(r.sender.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn whale_swap_triggers_copy_trade() {
        let r = rig();
        let watch = sample_watch("w4", 2);
        r.store.insert_whale_watch(&watch).await.unwrap();

        let token = Address::new([0xCC; 20]);
        let mut tx = native_move(WHALE, "0x7a250d5630b4cf539739df2c5dacb4c659f2488d", 100.0);
        tx.input = swap_calldata(token);
        r.chain.push_block(block(1, vec![tx]));

        r.engine.tick().await;

        // One copy-trade broadcast through the pipeline.
        assert_eq!(r.signer.sent.lock().unwrap().len(), 1);
        let watch = {
            let all = r.store.active_whale_watches(1).await.unwrap();
            all.into_iter().find(|w| w.id == "w4").unwrap()
        };
        assert_eq!(watch.copies_today, 1);
    }

    #[tokio::test]
    async fn copy_respects_daily_cap() {
        let r = rig();
        r.store.insert_whale_watch(&sample_watch("w5", 1)).await.unwrap();
        let token = Address::new([0xCC; 20]);

        for n in 1..=3u64 {
            let mut tx = native_move(WHALE, "0x7a250d5630b4cf539739df2c5dacb4c659f2488d", 100.0);
            tx.input = swap_calldata(token);
            r.chain.push_block(block(n, vec![tx]));
            r.engine.tick().await;
        }

        assert_eq!(r.signer.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn copy_blocked_for_honeypot_target() {
        let store = Store::open_in_memory().unwrap();
        let chain = Arc::new(TestChain::new(1));
        let executor = test_executor(&store, chain.clone());
        let mut clients: HashMap<u64, Arc<dyn ChainClient>> = HashMap::new();
        clients.insert(1, chain.clone());
        let signer = Arc::new(TestSigner::new());
        let engine = WhaleEngine::new(
            store.clone(),
            Arc::new(ChainRegistry::with_clients(clients)),
            executor,
            Arc::new(TestQuoteClient::with_rate(2.0)),
            Arc::new(StaticPriceFeed::default().with_native(1, 2_500.0)),
            Arc::new(RiskEngine::new(
                store.clone(),
                Arc::new(FixedOracle::new(report(RiskLevel::Critical, true))),
                Duration::from_secs(600),
            )),
            DeliveryQueue::new(store.clone(), 3),
            Arc::new(RecordingSender::new()),
            signer.clone(),
            Duration::from_secs(5),
            "telegram".into(),
            100,
        );

        store.insert_whale_watch(&sample_watch("w6", 5)).await.unwrap();
        let mut tx = native_move(WHALE, "0x7a250d5630b4cf539739df2c5dacb4c659f2488d", 100.0);
        tx.input = swap_calldata(Address::new([0xCC; 20]));
        chain.push_block(block(1, vec![tx]));

        engine.tick().await;

        assert!(signer.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn swap_detection_extracts_last_hop() {
        let token = Address::new([0xCC; 20]);
        assert_eq!(swap_target_token(&swap_calldata(token)), Some(token));
        assert_eq!(swap_target_token(&[0xde, 0xad, 0xbe, 0xef, 0x00]), None);
        assert_eq!(swap_target_token(&[]), None);
    }
}
