use std::time::Duration;

use alloy::consensus::Transaction as _;
use alloy::eips::BlockNumberOrTag;
use alloy::primitives::{Address, B256, Bytes, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::TransactionInput;
use anyhow::{Context, Result};
use async_trait::async_trait;

// ── Wire-facing views ──────────────────────────────────────────────
//
// The trait boundary exposes plain structs rather than provider types so
// engines and tests never depend on RPC response shapes.

/// A mined transaction as seen in a fetched block.
#[derive(Debug, Clone)]
pub struct BlockTx {
    pub hash: B256,
    pub from: Address,
    pub to: Option<Address>,
    pub value: U256,
    pub input: Bytes,
}

/// A block with its full transaction bodies.
#[derive(Debug, Clone)]
pub struct BlockWithTxs {
    pub number: u64,
    pub timestamp: u64,
    pub txs: Vec<BlockTx>,
}

/// One log entry from a receipt.
#[derive(Debug, Clone)]
pub struct ReceiptLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
}

/// The subset of a receipt the pipeline consumes.
#[derive(Debug, Clone)]
pub struct TxReceipt {
    pub hash: B256,
    pub success: bool,
    pub from: Address,
    pub to: Option<Address>,
    pub gas_used: u64,
    pub effective_gas_price: u128,
    pub block_number: u64,
    pub logs: Vec<ReceiptLog>,
}

// ── Chain client contract ──────────────────────────────────────────

/// Read/broadcast access to one chain. The production implementation wraps
/// an alloy HTTP provider; tests substitute fakes.
#[async_trait]
pub trait ChainClient: Send + Sync {
    fn chain_id(&self) -> u64;

    async fn get_balance(&self, addr: Address) -> Result<U256>;

    /// `eth_call` against a contract with prebuilt calldata.
    async fn read_contract(&self, to: Address, data: Bytes) -> Result<Bytes>;

    async fn get_block_number(&self) -> Result<u64>;

    /// Latest block including full transaction bodies.
    async fn get_block_with_txs(&self, number: BlockNumberOrTag) -> Result<Option<BlockWithTxs>>;

    /// Base fee of the latest block, in wei.
    async fn estimate_base_fee(&self) -> Result<u128>;

    /// Poll for a receipt until `timeout` elapses. `Ok(None)` on timeout.
    async fn wait_for_receipt(&self, hash: B256, timeout: Duration) -> Result<Option<TxReceipt>>;

    /// Receipt lookup without waiting.
    async fn get_receipt(&self, hash: B256) -> Result<Option<TxReceipt>>;

    async fn get_transaction_count(&self, addr: Address, pending: bool) -> Result<u64>;
}

// ── Alloy-backed implementation ────────────────────────────────────

const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(3);

pub struct EvmChainClient {
    chain_id: u64,
    provider: DynProvider,
}

impl EvmChainClient {
    pub fn connect(chain_id: u64, rpc_url: &str) -> Result<Self> {
        let url = rpc_url
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid RPC URL for chain {chain_id}: {e}"))?;
        let provider = ProviderBuilder::new().connect_http(url).erased();
        Ok(EvmChainClient { chain_id, provider })
    }
}

#[async_trait]
impl ChainClient for EvmChainClient {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn get_balance(&self, addr: Address) -> Result<U256> {
        self.provider.get_balance(addr).await.context("eth_getBalance")
    }

    async fn read_contract(&self, to: Address, data: Bytes) -> Result<Bytes> {
        let call = alloy::rpc::types::TransactionRequest {
            to: Some(to.into()),
            input: TransactionInput::new(data),
            ..Default::default()
        };
        self.provider.call(call).await.context("eth_call")
    }

    async fn get_block_number(&self) -> Result<u64> {
        self.provider.get_block_number().await.context("eth_blockNumber")
    }

    async fn get_block_with_txs(&self, number: BlockNumberOrTag) -> Result<Option<BlockWithTxs>> {
        let block = self
            .provider
            .get_block_by_number(number)
            .full()
            .await
            .context("eth_getBlockByNumber")?;

        let Some(block) = block else { return Ok(None) };

        let txs = block
            .transactions
            .txns()
            .map(|tx| BlockTx {
                hash: *tx.inner.tx_hash(),
                from: tx.inner.signer(),
                to: tx.to(),
                value: tx.value(),
                input: tx.input().clone(),
            })
            .collect();

        Ok(Some(BlockWithTxs {
            number: block.header.number,
            timestamp: block.header.timestamp,
            txs,
        }))
    }

    async fn estimate_base_fee(&self) -> Result<u128> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Latest)
            .await
            .context("eth_getBlockByNumber")?
            .ok_or_else(|| anyhow::anyhow!("chain {} has no latest block", self.chain_id))?;
        Ok(block.header.base_fee_per_gas.unwrap_or_default() as u128)
    }

    async fn wait_for_receipt(&self, hash: B256, timeout: Duration) -> Result<Option<TxReceipt>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(receipt) = self.get_receipt(hash).await? {
                return Ok(Some(receipt));
            }
            if tokio::time::Instant::now() + RECEIPT_POLL_INTERVAL > deadline {
                return Ok(None);
            }
            tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
        }
    }

    async fn get_receipt(&self, hash: B256) -> Result<Option<TxReceipt>> {
        let receipt = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .context("eth_getTransactionReceipt")?;

        let Some(receipt) = receipt else { return Ok(None) };

        let logs = receipt
            .inner
            .logs()
            .iter()
            .map(|log| ReceiptLog {
                address: log.address(),
                topics: log.topics().to_vec(),
                data: log.data().data.clone(),
            })
            .collect();

        Ok(Some(TxReceipt {
            hash,
            success: receipt.status(),
            from: receipt.from,
            to: receipt.to,
            gas_used: receipt.gas_used,
            effective_gas_price: receipt.effective_gas_price,
            block_number: receipt.block_number.unwrap_or_default(),
            logs,
        }))
    }

    async fn get_transaction_count(&self, addr: Address, pending: bool) -> Result<u64> {
        let call = self.provider.get_transaction_count(addr);
        let count = if pending {
            call.pending().await.context("eth_getTransactionCount")?
        } else {
            call.await.context("eth_getTransactionCount")?
        };
        Ok(count)
    }
}
