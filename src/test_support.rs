//! Shared fixtures for engine tests: a mock chain, an always-ok signer, a
//! scripted quote client, and an executor wired over all of them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::eips::BlockNumberOrTag;
use alloy::primitives::{Address, B256, Bytes, U256};
use anyhow::Result;
use async_trait::async_trait;

use crate::chain::ChainRegistry;
use crate::chain::client::{BlockWithTxs, ChainClient, TxReceipt};
use crate::error::SignerError;
use crate::executor::{Executor, MevConfig};
use crate::guardrails::Guardrails;
use crate::model::{RiskLevel, TransactionRequest, UserLimits};
use crate::prices::StaticPriceFeed;
use crate::quotes::{QuoteClient, QuoteQuery, SwapQuote};
use crate::risk::RiskEngine;
use crate::risk::testing::{FixedOracle, report};
use crate::signer::{SendRequest, Signer};
use crate::sim::Simulator;
use crate::store::Store;

// ── Chain ──────────────────────────────────────────────────────────

/// Chain fake: hands out queued blocks and instant success receipts.
pub struct TestChain {
    pub chain_id: u64,
    pub blocks: Mutex<Vec<BlockWithTxs>>,
    pub receipts: Mutex<HashMap<B256, TxReceipt>>,
}

impl TestChain {
    pub fn new(chain_id: u64) -> Self {
        TestChain { chain_id, blocks: Mutex::new(Vec::new()), receipts: Mutex::new(HashMap::new()) }
    }

    pub fn push_block(&self, block: BlockWithTxs) {
        self.blocks.lock().unwrap().push(block);
    }
}

#[async_trait]
impl ChainClient for TestChain {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }
    async fn get_balance(&self, _addr: Address) -> Result<U256> {
        Ok(U256::from(10).pow(U256::from(20)))
    }
    async fn read_contract(&self, _to: Address, _data: Bytes) -> Result<Bytes> {
        Ok(Bytes::new())
    }
    async fn get_block_number(&self) -> Result<u64> {
        Ok(self.blocks.lock().unwrap().last().map(|b| b.number).unwrap_or(0))
    }
    async fn get_block_with_txs(&self, _n: BlockNumberOrTag) -> Result<Option<BlockWithTxs>> {
        Ok(self.blocks.lock().unwrap().last().cloned())
    }
    async fn estimate_base_fee(&self) -> Result<u128> {
        Ok(10_000_000_000)
    }
    async fn wait_for_receipt(&self, hash: B256, _t: Duration) -> Result<Option<TxReceipt>> {
        if let Some(r) = self.receipts.lock().unwrap().get(&hash) {
            return Ok(Some(r.clone()));
        }
        Ok(Some(TxReceipt {
            hash,
            success: true,
            from: Address::ZERO,
            to: None,
            gas_used: 120_000,
            effective_gas_price: 15_000_000_000,
            block_number: 1,
            logs: vec![],
        }))
    }
    async fn get_receipt(&self, hash: B256) -> Result<Option<TxReceipt>> {
        Ok(self.receipts.lock().unwrap().get(&hash).cloned())
    }
    async fn get_transaction_count(&self, _addr: Address, _pending: bool) -> Result<u64> {
        Ok(0)
    }
}

// ── Signer ─────────────────────────────────────────────────────────

pub struct TestSigner {
    pub sent: Mutex<Vec<SendRequest>>,
    counter: Mutex<u8>,
}

impl TestSigner {
    pub fn new() -> Self {
        TestSigner { sent: Mutex::new(Vec::new()), counter: Mutex::new(0) }
    }
}

#[async_trait]
impl Signer for TestSigner {
    fn kind(&self) -> &str {
        "test"
    }
    fn is_automatic(&self) -> bool {
        true
    }
    fn address(&self) -> Address {
        Address::new([1u8; 20])
    }
    async fn send(&self, req: SendRequest) -> Result<B256, SignerError> {
        self.sent.lock().unwrap().push(req);
        let mut counter = self.counter.lock().unwrap();
        *counter += 1;
        Ok(B256::repeat_byte(*counter))
    }
}

// ── Quote client ───────────────────────────────────────────────────

/// Quote fake: a fixed `to_amount` per unit, or an outage.
pub struct TestQuoteClient {
    /// to_amount = floor(amount x rate)
    pub rate: Mutex<f64>,
    pub down: Mutex<bool>,
    pub served: Mutex<Vec<QuoteQuery>>,
}

impl TestQuoteClient {
    pub fn with_rate(rate: f64) -> Self {
        TestQuoteClient { rate: Mutex::new(rate), down: Mutex::new(false), served: Mutex::new(Vec::new()) }
    }
}

#[async_trait]
impl QuoteClient for TestQuoteClient {
    async fn quote(&self, query: &QuoteQuery) -> Result<SwapQuote> {
        if *self.down.lock().unwrap() {
            anyhow::bail!("aggregator offline");
        }
        self.served.lock().unwrap().push(query.clone());
        let rate = *self.rate.lock().unwrap();
        let amount = query.amount.to::<u128>() as f64;
        let to_amount = U256::from((amount * rate) as u128);

        let tx = TransactionRequest::call(
            query.chain_id,
            query.from_address,
            Address::new([0xEE; 20]),
            if query.from_token.is_none() { query.amount } else { U256::ZERO },
            Bytes::from(vec![0x38, 0xed, 0x17, 0x39]),
        );
        Ok(SwapQuote { to_amount, tx })
    }
}

// ── Executor harness ───────────────────────────────────────────────

pub fn permissive_limits() -> UserLimits {
    UserLimits {
        max_per_tx_usd: 1_000_000.0,
        max_per_day_usd: 10_000_000.0,
        cooldown_seconds: 0,
        slippage_bps: 100,
    }
}

/// Executor over the test chain: low-risk oracle, local-fallback simulator,
/// generous guardrails, $2500 native / $1 stable prices.
pub fn test_executor(store: &Store, chain: Arc<TestChain>) -> Arc<Executor> {
    let chain_id = chain.chain_id;
    let mut clients: HashMap<u64, Arc<dyn ChainClient>> = HashMap::new();
    clients.insert(chain_id, chain);
    let chains = Arc::new(ChainRegistry::with_clients(clients));

    let risk = Arc::new(RiskEngine::new(
        store.clone(),
        Arc::new(FixedOracle::new(report(RiskLevel::Low, false))),
        Duration::from_secs(600),
    ));
    let sim = Arc::new(Simulator::new(None));
    let guardrails = Arc::new(Guardrails::new(store.clone(), permissive_limits(), 0.5));
    let prices = Arc::new(
        StaticPriceFeed::default()
            .with_native(chain_id, 2_500.0),
    );

    Arc::new(Executor::new(
        store.clone(),
        chains,
        risk,
        sim,
        guardrails,
        prices,
        None,
        MevConfig::default(),
    ))
}
