//! Ledger chain module - the bridge contracts' side
//!
//! This module provides:
//! - Contract bindings and address resolution
//! - A failover JSON-RPC transport
//! - Gas price selection
//! - The bridge client used by the unlock processor and the relay tasks

pub mod client;
pub mod contracts;
pub mod gas;
pub mod provider;

pub use client::{BridgeClient, LedgerAccounts};
pub use contracts::ContractAddresses;
pub use provider::FailoverClient;

pub use crate::events::UnlockRequestEvent;

use crate::coin::{MerkleProof, RawHeader, Utxo};
use crate::error::{AgentError, AgentResult};
use crate::events::LedgerEvent;
use crate::superblock::{Superblock, SuperblockStatus};

use async_trait::async_trait;
use bitcoin::{BlockHash, Transaction, Txid};
use ethers::types::{Address, H256, U256};
use serde::Serialize;
use std::str::FromStr;

/// A withdrawal requested on the ledger chain, with its UTXOs resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnlockRequest {
    pub id: u64,
    pub operator_key_hash: [u8; 20],
    /// Base58check coin chain address receiving the payout
    pub destination: String,
    pub value: u64,
    pub fee: u64,
    /// Operator outputs the contract selected to fund the withdrawal
    pub selected_utxos: Vec<Utxo>,
}

/// Best header the relay contract knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteTip {
    pub height: u64,
    pub hash: BlockHash,
}

/// A superblock as stored by the superblocks contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSuperblock {
    pub merkle_root: H256,
    pub accumulated_work: U256,
    pub timestamp: u64,
    pub last_hash: H256,
    pub parent_id: H256,
    pub submitter: Address,
    pub status: SuperblockStatus,
}

/// Contract-side superblock transitions an agent may trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuperblockAction {
    Confirm,
    Challenge,
    SemiApprove,
    Invalidate,
}

impl SuperblockAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuperblockAction::Confirm => "confirm",
            SuperblockAction::Challenge => "challenge",
            SuperblockAction::SemiApprove => "semi_approve",
            SuperblockAction::Invalidate => "invalidate",
        }
    }
}

impl FromStr for SuperblockAction {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "confirm" => Ok(SuperblockAction::Confirm),
            "challenge" => Ok(SuperblockAction::Challenge),
            "semi_approve" => Ok(SuperblockAction::SemiApprove),
            "invalidate" => Ok(SuperblockAction::Invalidate),
            other => Err(AgentError::Config(format!(
                "unknown superblock action {}",
                other
            ))),
        }
    }
}

/// Ledger reads the unlock processor depends on
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UnlockSource: Send + Sync {
    async fn is_syncing(&self) -> AgentResult<bool>;

    async fn block_number(&self) -> AgentResult<u64>;

    /// Unlock request events in `[from, to]`, in log order
    async fn unlock_requests(&self, from: u64, to: u64) -> AgentResult<Vec<UnlockRequestEvent>>;

    /// Full unlock request with its selected UTXOs
    async fn unlock(&self, id: u64) -> AgentResult<UnlockRequest>;
}

/// Submission of coin chain data to the ledger contracts
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BridgeRelay: Send + Sync {
    async fn is_remote_syncing(&self) -> AgentResult<bool>;

    async fn ledger_height(&self) -> AgentResult<u64>;

    /// Re-read the node's gas price suggestion; applies to later writes
    async fn refresh_gas_price(&self) -> AgentResult<U256>;

    async fn remote_chain_tip(&self) -> AgentResult<RemoteTip>;

    /// Block locator of the relay contract, most recent first
    async fn remote_locator(&self) -> AgentResult<Vec<BlockHash>>;

    /// Store headers one at a time, each after the previous one's receipt.
    /// Returns how many were accepted before a rejection stopped the run.
    async fn relay_headers(&self, headers: &[RawHeader]) -> AgentResult<usize>;

    /// Submit a transaction with its inclusion proof without waiting for
    /// the outcome
    async fn relay_transaction(
        &self,
        tx: &Transaction,
        block_hash: BlockHash,
        proof: &MerkleProof,
    ) -> AgentResult<()>;

    async fn was_processed(&self, txid: Txid) -> AgentResult<bool>;

    async fn best_superblock(&self) -> AgentResult<H256>;

    async fn superblock(&self, id: H256) -> AgentResult<RemoteSuperblock>;

    async fn superblock_status(&self, id: H256) -> AgentResult<SuperblockStatus>;

    /// Propose a superblock and wait for its receipt; returns the ledger tx hash
    async fn propose_superblock(&self, superblock: &Superblock) -> AgentResult<H256>;

    async fn superblock_action(&self, action: SuperblockAction, id: H256) -> AgentResult<H256>;

    /// Superblock lifecycle events in `[from, to]`
    async fn superblock_events(&self, from: u64, to: u64) -> AgentResult<Vec<LedgerEvent>>;
}
