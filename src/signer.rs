//! The opaque signing capability the executor consumes. Wallet custody
//! lives outside the core; the pipeline only ever calls `send`.

use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, B256, Bytes, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;

use crate::error::SignerError;

/// Everything the executor hands a signer for one broadcast.
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub chain_id: u64,
    pub to: Option<Address>,
    pub value: U256,
    pub data: Option<Bytes>,
    pub gas: u64,
    pub nonce: u64,
    pub max_fee_per_gas: Option<u128>,
    pub max_priority_fee_per_gas: Option<u128>,
    /// Override endpoint (MEV-protected relay, per-chain override).
    pub rpc_url: Option<String>,
}

/// A signing capability. `is_automatic` distinguishes hot keys from
/// hardware/multisig flows that need an out-of-band approval prompt.
#[async_trait]
pub trait Signer: Send + Sync {
    fn kind(&self) -> &str;

    fn is_automatic(&self) -> bool;

    fn address(&self) -> Address;

    /// Sign and broadcast; returns the transaction hash.
    async fn send(&self, req: SendRequest) -> Result<B256, SignerError>;
}

// ── Local key signer ───────────────────────────────────────────────

/// Hot-key signer backed by an in-process private key. The key arrives via
/// environment configuration and is never persisted.
pub struct LocalSigner {
    signer: PrivateKeySigner,
    default_rpc: String,
}

impl LocalSigner {
    pub fn new(private_key: &str, default_rpc: impl Into<String>) -> Result<Self, SignerError> {
        let signer: PrivateKeySigner = private_key
            .parse()
            .map_err(|e| SignerError::Rejected(format!("invalid private key: {e}")))?;
        Ok(LocalSigner { signer, default_rpc: default_rpc.into() })
    }
}

#[async_trait]
impl Signer for LocalSigner {
    fn kind(&self) -> &str {
        "local"
    }

    fn is_automatic(&self) -> bool {
        true
    }

    fn address(&self) -> Address {
        self.signer.address()
    }

    async fn send(&self, req: SendRequest) -> Result<B256, SignerError> {
        let rpc = req.rpc_url.as_deref().unwrap_or(&self.default_rpc);
        let url = rpc
            .parse()
            .map_err(|e| SignerError::Rpc(format!("invalid rpc url {rpc}: {e}")))?;

        let wallet = EthereumWallet::from(self.signer.clone());
        let provider = ProviderBuilder::new().wallet(wallet).connect_http(url);

        let mut tx = alloy::rpc::types::TransactionRequest::default()
            .with_chain_id(req.chain_id)
            .with_value(req.value)
            .with_gas_limit(req.gas)
            .with_nonce(req.nonce);
        if let Some(to) = req.to {
            tx = tx.with_to(to);
        }
        if let Some(data) = req.data {
            tx = tx.with_input(data);
        }
        if let Some(max_fee) = req.max_fee_per_gas {
            tx = tx.with_max_fee_per_gas(max_fee);
        }
        if let Some(tip) = req.max_priority_fee_per_gas {
            tx = tx.with_max_priority_fee_per_gas(tip);
        }

        let pending = provider.send_transaction(tx).await.map_err(classify_rpc_error)?;
        Ok(*pending.tx_hash())
    }
}

/// Broadcast errors that mention the nonce get their own class so the nonce
/// manager can resynchronize.
fn classify_rpc_error(err: impl std::fmt::Display) -> SignerError {
    let msg = err.to_string();
    let lower = msg.to_lowercase();
    if lower.contains("nonce too low") || lower.contains("nonce too high") || lower.contains("invalid nonce")
    {
        SignerError::NonceMismatch(msg)
    } else {
        SignerError::Rpc(msg)
    }
}
