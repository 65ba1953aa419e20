use thiserror::Error;

/// Everything that can stop the execution pipeline.
///
/// The variants up to `GuardrailFail` reject the request before anything is
/// persisted; from `UserRejected` on, a transaction record exists and carries
/// the terminal status.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed request: unknown chain, invalid address, missing field.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The position lock could not be acquired within its bound.
    #[error("another operation is in progress for this position")]
    LockBusy,

    /// The simulator says the transaction would revert.
    #[error("transaction would fail: {0}")]
    SimulationFail(String),

    /// The risk engine or the contract block list refused the target.
    #[error("Risk engine blocked this transaction: {0}")]
    RiskBlock(String),

    /// One or more guardrail checks failed. Carries the joined reasons.
    #[error("{0}")]
    GuardrailFail(String),

    /// A confirmation callback returned false.
    #[error("cancelled: {0}")]
    UserRejected(String),

    /// The signer or the RPC endpoint rejected the broadcast.
    #[error("broadcast failed: {0}")]
    Broadcast(String),

    /// The receipt came back with status = reverted.
    #[error("reverted")]
    Reverted,

    /// No receipt within the wait bound. The tx may still land on-chain.
    #[error("timeout")]
    ReceiptTimeout,

    /// An external dependency (oracle, simulator, aggregator) is down and no
    /// safe fallback applies.
    #[error("external service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Store or chain plumbing failure.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl PipelineError {
    /// Whether a transaction record exists when this error is returned.
    pub fn is_persisted(&self) -> bool {
        matches!(
            self,
            PipelineError::UserRejected(_)
                | PipelineError::Broadcast(_)
                | PipelineError::Reverted
                | PipelineError::ReceiptTimeout
        )
    }
}

/// Errors surfaced by a [`crate::signer::Signer`] capability.
#[derive(Debug, Error)]
pub enum SignerError {
    #[error("nonce mismatch: {0}")]
    NonceMismatch(String),

    #[error("rejected by signer: {0}")]
    Rejected(String),

    #[error("rpc error: {0}")]
    Rpc(String),
}

impl SignerError {
    /// Broadcast errors that indicate the account nonce is out of sync.
    pub fn is_nonce_mismatch(&self) -> bool {
        matches!(self, SignerError::NonceMismatch(_))
    }
}
