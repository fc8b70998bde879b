//! Superblocks - fixed-interval aggregates of the coin header chain
//!
//! A superblock commits to a run of consecutive coin chain headers whose
//! timestamps fall in the same hour. Superblocks chain to each other through
//! their parent id, and the ledger contract tracks their status.

pub mod chain;

pub use chain::{build_chain, SuperblockChain};

use crate::coin::{merkle::merkle_root, Header};
use crate::error::{AgentError, AgentResult};

use bitcoin::hashes::Hash;
use bitcoin::BlockHash;
use ethers::types::{Address, H256, U256};
use lazy_static::lazy_static;
use serde::Serialize;
use sha3::{Digest, Keccak256};

lazy_static! {
    /// Parent id of the first superblock: keccak-256 of 64 ASCII zeros
    pub static ref GENESIS_PARENT_ID: H256 = keccak(&[b'0'; 64]);
}

/// Lifecycle status of a superblock, as stored by the ledger contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuperblockStatus {
    /// Not registered with the contract
    Unknown = 0,
    New = 1,
    InBattle = 2,
    SemiApproved = 3,
    Approved = 4,
    Invalid = 5,
}

impl SuperblockStatus {
    pub const ALL: [SuperblockStatus; 6] = [
        SuperblockStatus::Unknown,
        SuperblockStatus::New,
        SuperblockStatus::InBattle,
        SuperblockStatus::SemiApproved,
        SuperblockStatus::Approved,
        SuperblockStatus::Invalid,
    ];

    /// No further transition can happen
    pub fn is_final(&self) -> bool {
        matches!(self, SuperblockStatus::Approved | SuperblockStatus::Invalid)
    }

    pub fn is_registered(&self) -> bool {
        !matches!(self, SuperblockStatus::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SuperblockStatus::Unknown => "unknown",
            SuperblockStatus::New => "new",
            SuperblockStatus::InBattle => "in_battle",
            SuperblockStatus::SemiApproved => "semi_approved",
            SuperblockStatus::Approved => "approved",
            SuperblockStatus::Invalid => "invalid",
        }
    }
}

impl TryFrom<u8> for SuperblockStatus {
    type Error = AgentError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SuperblockStatus::Unknown),
            1 => Ok(SuperblockStatus::New),
            2 => Ok(SuperblockStatus::InBattle),
            3 => Ok(SuperblockStatus::SemiApproved),
            4 => Ok(SuperblockStatus::Approved),
            5 => Ok(SuperblockStatus::Invalid),
            other => Err(AgentError::Contract(format!(
                "unknown superblock status {}",
                other
            ))),
        }
    }
}

/// An aggregate of consecutive coin chain headers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Superblock {
    pub id: H256,
    /// Merkle root over the contained header hashes
    pub merkle_root: H256,
    pub accumulated_work: U256,
    /// Timestamp of the first contained header
    pub timestamp: u64,
    /// Hash of the last contained header
    pub last_hash: H256,
    pub parent_id: H256,
    /// Set once the superblock has been seen on the ledger
    pub submitter: Option<Address>,
    pub first_height: u64,
    pub last_height: u64,
}

impl Superblock {
    /// Close a bucket of headers into a superblock
    pub fn from_headers(
        headers: &[Header],
        accumulated_work: U256,
        parent_id: H256,
    ) -> AgentResult<Self> {
        let (first, last) = match (headers.first(), headers.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => {
                return Err(AgentError::Internal(
                    "cannot build a superblock from no headers".to_string(),
                ))
            }
        };

        let root = merkle_root(headers.iter().map(|h| h.hash.to_raw_hash())).ok_or_else(|| {
            AgentError::Internal("empty merkle tree".to_string())
        })?;

        let merkle_root = bytes32(root.to_byte_array());
        let last_hash = block_hash_bytes32(&last.hash);
        let timestamp = first.time as u64;

        Ok(Self {
            id: superblock_id(merkle_root, accumulated_work, timestamp, last_hash, parent_id),
            merkle_root,
            accumulated_work,
            timestamp,
            last_hash,
            parent_id,
            submitter: None,
            first_height: first.height,
            last_height: last.height,
        })
    }

    pub fn header_count(&self) -> u64 {
        self.last_height - self.first_height + 1
    }
}

/// Content hash of a superblock, packed the way the contract's
/// `calcSuperblockId` packs it
pub fn superblock_id(
    merkle_root: H256,
    accumulated_work: U256,
    timestamp: u64,
    last_hash: H256,
    parent_id: H256,
) -> H256 {
    let mut packed = Vec::with_capacity(160);
    packed.extend_from_slice(merkle_root.as_bytes());
    packed.extend_from_slice(&uint_bytes(accumulated_work));
    packed.extend_from_slice(&uint_bytes(U256::from(timestamp)));
    packed.extend_from_slice(last_hash.as_bytes());
    packed.extend_from_slice(parent_id.as_bytes());
    keccak(&packed)
}

/// A coin chain hash in internal byte order, as the contract's bytes32
/// (display order)
fn bytes32(internal: [u8; 32]) -> H256 {
    let mut display = internal;
    display.reverse();
    H256(display)
}

pub fn block_hash_bytes32(hash: &BlockHash) -> H256 {
    bytes32(hash.to_byte_array())
}

fn uint_bytes(value: U256) -> [u8; 32] {
    let mut out = [0u8; 32];
    value.to_big_endian(&mut out);
    out
}

fn keccak(data: &[u8]) -> H256 {
    H256::from_slice(&Keccak256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coin::testing::header;

    #[test]
    fn test_genesis_parent_id() {
        assert_eq!(
            format!("{:?}", *GENESIS_PARENT_ID),
            format!("{:?}", keccak("0".repeat(64).as_bytes()))
        );
        assert_ne!(*GENESIS_PARENT_ID, H256::zero());
    }

    #[test]
    fn test_status_from_contract_value() {
        assert_eq!(
            SuperblockStatus::try_from(4u8).unwrap(),
            SuperblockStatus::Approved
        );
        assert!(SuperblockStatus::try_from(9u8).is_err());
        assert!(SuperblockStatus::Invalid.is_final());
        assert!(!SuperblockStatus::Unknown.is_registered());
    }

    #[test]
    fn test_from_headers_takes_first_time_and_last_hash() {
        let headers = vec![header(10, 1_000, 5), header(11, 1_100, 6), header(12, 900, 7)];
        let sb = Superblock::from_headers(&headers, U256::from(5), *GENESIS_PARENT_ID).unwrap();

        assert_eq!(sb.timestamp, 1_000);
        assert_eq!(sb.last_hash, block_hash_bytes32(&headers[2].hash));
        assert_eq!((sb.first_height, sb.last_height), (10, 12));
        assert_eq!(sb.header_count(), 3);
        assert_eq!(
            sb.id,
            superblock_id(
                sb.merkle_root,
                U256::from(5),
                1_000,
                sb.last_hash,
                *GENESIS_PARENT_ID
            )
        );
    }

    #[test]
    fn test_id_depends_on_parent() {
        let headers = vec![header(1, 1_000, 1)];
        let a = Superblock::from_headers(&headers, U256::one(), *GENESIS_PARENT_ID).unwrap();
        let b = Superblock::from_headers(&headers, U256::one(), H256::repeat_byte(1)).unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(a.merkle_root, b.merkle_root);
    }

    #[test]
    fn test_single_header_root_is_its_hash() {
        let headers = vec![header(1, 1_000, 1)];
        let sb = Superblock::from_headers(&headers, U256::one(), *GENESIS_PARENT_ID).unwrap();
        assert_eq!(sb.merkle_root, block_hash_bytes32(&headers[0].hash));
        assert!(Superblock::from_headers(&[], U256::one(), *GENESIS_PARENT_ID).is_err());
    }
}
