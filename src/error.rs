//! Error types for the superblock agent

use thiserror::Error;

/// Main error type for the agent
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Could not resolve address of contract {contract}: {message}")]
    ContractResolution { contract: String, message: String },

    #[error("Contract {contract} at {address} failed liveness check")]
    ContractLiveness { contract: String, address: String },

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Ledger chain RPC error: {0}")]
    LedgerRpc(String),

    #[error("Coin chain RPC error: {0}")]
    CoinRpc(String),

    #[error("Event parsing error: {0}")]
    EventParsing(String),

    #[error("Contract error: {0}")]
    Contract(String),

    #[error("No checkpoint has been persisted yet")]
    CheckpointNotFound,

    #[error("Checkpoint I/O error: {0}")]
    CheckpointIo(#[from] std::io::Error),

    #[error("Invalid coin address {address}: {message}")]
    InvalidAddress { address: String, message: String },

    #[error("Insufficient inputs: have {have}, need {need}")]
    InsufficientInputs { have: u64, need: u64 },

    #[error("Transaction build error: {0}")]
    TransactionBuild(String),

    #[error(transparent)]
    Broadcast(#[from] BroadcastError),

    #[error("Submission rejected: {0}")]
    Submission(String),

    #[error("Data integrity violation: {0}")]
    DataIntegrity(String),

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AgentError {
    /// Errors that must abort process initialization
    pub fn is_startup_fatal(&self) -> bool {
        matches!(
            self,
            AgentError::Config(_)
                | AgentError::ContractResolution { .. }
                | AgentError::ContractLiveness { .. }
                | AgentError::Wallet(_)
        )
    }

    /// Check if error is worth retrying on the next tick
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgentError::LedgerRpc(_)
                | AgentError::CoinRpc(_)
                | AgentError::EventParsing(_)
                | AgentError::CheckpointIo(_)
                | AgentError::Timeout { .. }
        ) || matches!(self, AgentError::Broadcast(e) if e.is_transient())
    }

    /// Programming-error class failures that must never be swallowed
    pub fn is_data_integrity(&self) -> bool {
        matches!(self, AgentError::DataIntegrity(_))
    }
}

/// Failure reported by a coin-chain broadcast capability
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BroadcastError {
    /// Inputs already consumed, or the exact transaction is already known
    #[error("transaction {txid} conflicts with spent inputs: {reason}")]
    AlreadySpent { txid: String, reason: String },

    #[error("transaction {txid} rejected: {reason}")]
    Rejected { txid: String, reason: String },

    #[error("broadcast transport failure: {0}")]
    Transport(String),
}

impl BroadcastError {
    /// The transaction (or one spending the same inputs) was already accepted
    pub fn is_duplicate(&self) -> bool {
        matches!(self, BroadcastError::AlreadySpent { .. })
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, BroadcastError::Transport(_))
    }
}

/// Result type for agent operations
pub type AgentResult<T> = Result<T, AgentError>;
