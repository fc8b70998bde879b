//! Ledger contract event types and parsing
//!
//! Defines the events emitted by the bridge token and superblocks contracts
//! that the agent reacts to.

use crate::error::{AgentError, AgentResult};
use crate::ledger::contracts::{SuperblocksEvents, UnlockRequestFilter};
use crate::superblock::SuperblockStatus;

use ethers::abi::RawLog;
use ethers::contract::{EthEvent, EthLogDecode};
use ethers::types::{Address, Log, H256, U256};
use serde::Serialize;

/// An unlock request emitted by the token contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UnlockRequestEvent {
    pub id: u64,
    /// HASH160 of the operator key the request is addressed to
    pub operator_key_hash: [u8; 20],
    pub block_number: u64,
    pub tx_hash: H256,
}

/// Events emitted by the ledger contracts
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum LedgerEvent {
    UnlockRequest(UnlockRequestEvent),

    NewSuperblock {
        superblock_id: H256,
        who: Address,
        block_number: u64,
        tx_hash: H256,
    },

    ApprovedSuperblock {
        superblock_id: H256,
        who: Address,
        block_number: u64,
        tx_hash: H256,
    },

    ChallengeSuperblock {
        superblock_id: H256,
        who: Address,
        block_number: u64,
        tx_hash: H256,
    },

    SemiApprovedSuperblock {
        superblock_id: H256,
        who: Address,
        block_number: u64,
        tx_hash: H256,
    },

    InvalidSuperblock {
        superblock_id: H256,
        who: Address,
        block_number: u64,
        tx_hash: H256,
    },

    /// The contract refused a superblock operation
    ErrorSuperblock {
        superblock_id: H256,
        code: U256,
        block_number: u64,
        tx_hash: H256,
    },
}

impl LedgerEvent {
    /// Get event name for metrics
    pub fn name(&self) -> &'static str {
        match self {
            LedgerEvent::UnlockRequest(_) => "unlock_request",
            LedgerEvent::NewSuperblock { .. } => "new_superblock",
            LedgerEvent::ApprovedSuperblock { .. } => "approved_superblock",
            LedgerEvent::ChallengeSuperblock { .. } => "challenge_superblock",
            LedgerEvent::SemiApprovedSuperblock { .. } => "semi_approved_superblock",
            LedgerEvent::InvalidSuperblock { .. } => "invalid_superblock",
            LedgerEvent::ErrorSuperblock { .. } => "error_superblock",
        }
    }

    pub fn block_number(&self) -> u64 {
        match self {
            LedgerEvent::UnlockRequest(e) => e.block_number,
            LedgerEvent::NewSuperblock { block_number, .. }
            | LedgerEvent::ApprovedSuperblock { block_number, .. }
            | LedgerEvent::ChallengeSuperblock { block_number, .. }
            | LedgerEvent::SemiApprovedSuperblock { block_number, .. }
            | LedgerEvent::InvalidSuperblock { block_number, .. }
            | LedgerEvent::ErrorSuperblock { block_number, .. } => *block_number,
        }
    }

    pub fn superblock_id(&self) -> Option<H256> {
        match self {
            LedgerEvent::UnlockRequest(_) => None,
            LedgerEvent::NewSuperblock { superblock_id, .. }
            | LedgerEvent::ApprovedSuperblock { superblock_id, .. }
            | LedgerEvent::ChallengeSuperblock { superblock_id, .. }
            | LedgerEvent::SemiApprovedSuperblock { superblock_id, .. }
            | LedgerEvent::InvalidSuperblock { superblock_id, .. }
            | LedgerEvent::ErrorSuperblock { superblock_id, .. } => Some(*superblock_id),
        }
    }

    /// Status the contract moved the superblock into, if any
    pub fn superblock_status(&self) -> Option<SuperblockStatus> {
        match self {
            LedgerEvent::NewSuperblock { .. } => Some(SuperblockStatus::New),
            LedgerEvent::ApprovedSuperblock { .. } => Some(SuperblockStatus::Approved),
            LedgerEvent::ChallengeSuperblock { .. } => Some(SuperblockStatus::InBattle),
            LedgerEvent::SemiApprovedSuperblock { .. } => Some(SuperblockStatus::SemiApproved),
            LedgerEvent::InvalidSuperblock { .. } => Some(SuperblockStatus::Invalid),
            LedgerEvent::UnlockRequest(_) | LedgerEvent::ErrorSuperblock { .. } => None,
        }
    }
}

/// Parser for logs of the bridge contracts
pub struct EventParser;

impl EventParser {
    /// Topic filtering unlock requests
    pub fn unlock_request_topic() -> H256 {
        UnlockRequestFilter::signature()
    }

    /// Parse a token contract log into an unlock request
    pub fn parse_unlock_request(log: &Log) -> AgentResult<UnlockRequestEvent> {
        let (block_number, tx_hash) = Self::position(log)?;
        let decoded = <UnlockRequestFilter as EthLogDecode>::decode_log(&RawLog::from(log.clone()))
            .map_err(|e| AgentError::EventParsing(format!("UnlockRequest: {}", e)))?;

        if decoded.id > U256::from(u64::MAX) {
            return Err(AgentError::EventParsing(format!(
                "unlock id {} out of range",
                decoded.id
            )));
        }

        Ok(UnlockRequestEvent {
            id: decoded.id.as_u64(),
            operator_key_hash: decoded.operator_public_key_hash,
            block_number,
            tx_hash,
        })
    }

    /// Parse a superblocks contract log
    pub fn parse_superblock_event(log: &Log) -> AgentResult<LedgerEvent> {
        let (block_number, tx_hash) = Self::position(log)?;
        let decoded = SuperblocksEvents::decode_log(&RawLog::from(log.clone()))
            .map_err(|e| AgentError::EventParsing(format!("superblock event: {}", e)))?;

        let event = match decoded {
            SuperblocksEvents::NewSuperblockFilter(e) => LedgerEvent::NewSuperblock {
                superblock_id: H256(e.superblock_id),
                who: e.who,
                block_number,
                tx_hash,
            },
            SuperblocksEvents::ApprovedSuperblockFilter(e) => LedgerEvent::ApprovedSuperblock {
                superblock_id: H256(e.superblock_id),
                who: e.who,
                block_number,
                tx_hash,
            },
            SuperblocksEvents::ChallengeSuperblockFilter(e) => LedgerEvent::ChallengeSuperblock {
                superblock_id: H256(e.superblock_id),
                who: e.who,
                block_number,
                tx_hash,
            },
            SuperblocksEvents::SemiApprovedSuperblockFilter(e) => {
                LedgerEvent::SemiApprovedSuperblock {
                    superblock_id: H256(e.superblock_id),
                    who: e.who,
                    block_number,
                    tx_hash,
                }
            }
            SuperblocksEvents::InvalidSuperblockFilter(e) => LedgerEvent::InvalidSuperblock {
                superblock_id: H256(e.superblock_id),
                who: e.who,
                block_number,
                tx_hash,
            },
            SuperblocksEvents::ErrorSuperblockFilter(e) => LedgerEvent::ErrorSuperblock {
                superblock_id: H256(e.superblock_id),
                code: e.err,
                block_number,
                tx_hash,
            },
        };
        Ok(event)
    }

    /// Logs from a pending block carry no position and are rejected
    fn position(log: &Log) -> AgentResult<(u64, H256)> {
        let block_number = log
            .block_number
            .ok_or_else(|| AgentError::EventParsing("log without block number".to_string()))?;
        let tx_hash = log
            .transaction_hash
            .ok_or_else(|| AgentError::EventParsing("log without tx hash".to_string()))?;
        Ok((block_number.as_u64(), tx_hash))
    }
}
