//! Coin chain module - the UTXO side of the bridge
//!
//! This module provides:
//! - Header and UTXO types as read from the coin node
//! - Withdrawal transaction construction and signing
//! - Merkle inclusion proofs for relayed transactions
//! - JSON-RPC node access and transaction broadcast

pub mod builder;
pub mod merkle;
pub mod rpc;
#[cfg(test)]
pub(crate) mod testing;

pub use builder::{CoinTransactionBuilder, OperatorKey};
pub use merkle::MerkleProof;
pub use rpc::{CoinRpcNode, PeerGroupBroadcaster};

use crate::error::{AgentError, AgentResult, BroadcastError};

use async_trait::async_trait;
use bitcoin::consensus::encode::serialize;
use bitcoin::hashes::Hash;
use bitcoin::{BlockHash, Transaction, Txid};
use lazy_static::lazy_static;
use ethers::types::U256;
use serde::Serialize;

/// A coin chain block header as reported by the node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub height: u64,
    pub hash: BlockHash,
    /// Block timestamp, unix seconds
    pub time: u32,
    /// Cumulative chain work up to and including this block
    pub chain_work: U256,
    /// Parent chain header when the block is merge-mined
    pub merge_parent: Option<bitcoin::block::Header>,
}

/// Length of a serialized block header without merge-mining data
pub const HEADER_LEN: usize = 80;

lazy_static! {
    // N = 1024, r = 1, p = 1
    static ref SCRYPT_PARAMS: scrypt::Params =
        scrypt::Params::new(10, 1, 1).expect("static scrypt parameters");
}

/// Scrypt proof-of-work digest of an 80-byte header, in internal byte order
pub fn scrypt_hash(header: &[u8]) -> AgentResult<[u8; 32]> {
    if header.len() != HEADER_LEN {
        return Err(AgentError::DataIntegrity(format!(
            "header is {} bytes, expected {}",
            header.len(),
            HEADER_LEN
        )));
    }
    let mut digest = [0u8; 32];
    scrypt::scrypt(header, header, &SCRYPT_PARAMS, &mut digest)
        .map_err(|e| AgentError::Internal(format!("scrypt: {}", e)))?;
    Ok(digest)
}

/// A header together with its consensus serialization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawHeader {
    pub header: Header,
    pub bytes: Vec<u8>,
}

impl RawHeader {
    /// Scrypt hash the relay contract checks proof-of-work against
    ///
    /// Merge-mined blocks are secured by their parent chain header, so the
    /// parent is hashed instead of the block's own header.
    pub fn scrypt_proof_hash(&self) -> AgentResult<[u8; 32]> {
        match &self.header.merge_parent {
            Some(parent) => scrypt_hash(&serialize(parent)),
            None => {
                let own = self.bytes.get(..HEADER_LEN).ok_or_else(|| {
                    AgentError::DataIntegrity(format!(
                        "header {} is only {} bytes",
                        self.header.hash,
                        self.bytes.len()
                    ))
                })?;
                scrypt_hash(own)
            }
        }
    }
}

/// An unspent output owned by the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Utxo {
    pub txid: Txid,
    pub vout: u32,
    pub value: u64,
}

/// Read access to an already-connected coin chain node
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CoinNode: Send + Sync {
    /// Height of the node's best chain tip
    async fn best_height(&self) -> AgentResult<u64>;

    /// Header of the best chain at `height`
    async fn header_at(&self, height: u64) -> AgentResult<Header>;

    /// Header by hash, `None` unless it is part of the best chain
    async fn header_by_hash(&self, hash: BlockHash) -> AgentResult<Option<Header>>;

    /// Consensus serialization of a header
    async fn raw_header(&self, hash: BlockHash) -> AgentResult<Vec<u8>>;

    /// Transaction ids of a block, in block order
    async fn block_txids(&self, hash: BlockHash) -> AgentResult<Vec<Txid>>;

    async fn transaction(&self, txid: Txid) -> AgentResult<Transaction>;
}

/// Capability to hand a signed transaction to the coin network
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn broadcast(&self, tx: &Transaction) -> Result<Txid, BroadcastError>;
}

/// Convert a hash in internal byte order to the contract's uint256 form
///
/// The contract stores hashes as the integer whose big-endian bytes are the
/// hash's display order.
pub fn hash_to_uint(internal: [u8; 32]) -> U256 {
    let mut display = internal;
    display.reverse();
    U256::from_big_endian(&display)
}

/// Convert a contract uint256 back into a coin chain block hash
///
/// The integer is widened to 32 big-endian bytes (left-padded with zeros),
/// which is the hash's display order.
pub fn block_hash_from_uint(value: U256) -> BlockHash {
    BlockHash::from_byte_array(internal_from_uint(value))
}

pub fn txid_from_uint(value: U256) -> Txid {
    Txid::from_byte_array(internal_from_uint(value))
}

fn internal_from_uint(value: U256) -> [u8; 32] {
    let mut internal = [0u8; 32];
    value.to_big_endian(&mut internal);
    internal.reverse();
    internal
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_hash_uint_roundtrip_keeps_display_order() {
        let hash = BlockHash::from_str(
            "1a91e3dace36e2be3bf030a65679fe821aa1d6ef92e7c9902eb318182c355691",
        )
        .unwrap();

        let value = hash_to_uint(hash.to_byte_array());
        assert_eq!(
            value,
            U256::from_str_radix(
                "1a91e3dace36e2be3bf030a65679fe821aa1d6ef92e7c9902eb318182c355691",
                16
            )
            .unwrap()
        );
        assert_eq!(block_hash_from_uint(value), hash);
    }

    #[test]
    fn test_small_uint_is_left_padded() {
        let hash = block_hash_from_uint(U256::from(0xabcu64));
        assert_eq!(
            hash.to_string(),
            "0000000000000000000000000000000000000000000000000000000000000abc"
        );
    }

    // Dogecoin genesis block
    const GENESIS_HEADER: &str = "010000000000000000000000000000000000000000000000000000000000000000000000696ad20e2dd4365c7459b4a4a5af743d5e92c6da3229e6532cd605f6533f2a5b24a6a152f0ff0f1e67860100";
    const GENESIS_HASH: &str = "1a91e3dace36e2be3bf030a65679fe821aa1d6ef92e7c9902eb318182c355691";
    const GENESIS_SCRYPT: &str = "0000026f3f7874ca0c251314eaed2d2fcf83d7da3acfaacf59417d485310b448";

    fn genesis() -> (bitcoin::block::Header, Vec<u8>) {
        let bytes = hex::decode(GENESIS_HEADER).unwrap();
        let header: bitcoin::block::Header = bitcoin::consensus::deserialize(&bytes).unwrap();
        (header, bytes)
    }

    fn header(hash: BlockHash) -> Header {
        Header {
            height: 1,
            hash,
            time: 0,
            chain_work: U256::one(),
            merge_parent: None,
        }
    }

    #[test]
    fn test_scrypt_hash_of_known_header() {
        let (header, bytes) = genesis();
        assert_eq!(header.block_hash().to_string(), GENESIS_HASH);

        let digest = scrypt_hash(&bytes).unwrap();
        let value = hash_to_uint(digest);
        assert_eq!(value, U256::from_str_radix(GENESIS_SCRYPT, 16).unwrap());
        // Meets the header's own difficulty target
        let target = U256::from_str_radix(
            "00000ffff0000000000000000000000000000000000000000000000000000000",
            16,
        )
        .unwrap();
        assert!(value < target);
    }

    #[test]
    fn test_scrypt_hash_rejects_wrong_length() {
        assert!(scrypt_hash(&[0u8; 79]).unwrap_err().is_data_integrity());
    }

    #[test]
    fn test_scrypt_proof_hash_prefers_merge_parent() {
        let (parent, parent_bytes) = genesis();
        let own_bytes = vec![7u8; HEADER_LEN];
        let own = BlockHash::from_byte_array([1u8; 32]);

        let mut raw = RawHeader {
            header: header(own),
            bytes: own_bytes.clone(),
        };
        assert_eq!(
            raw.scrypt_proof_hash().unwrap(),
            scrypt_hash(&own_bytes).unwrap()
        );

        raw.header.merge_parent = Some(parent);
        assert_eq!(
            raw.scrypt_proof_hash().unwrap(),
            scrypt_hash(&parent_bytes).unwrap()
        );
    }

    #[test]
    fn test_short_raw_header_is_integrity_error() {
        let raw = RawHeader {
            header: header(BlockHash::from_byte_array([1u8; 32])),
            bytes: vec![0u8; 40],
        };
        assert!(raw.scrypt_proof_hash().unwrap_err().is_data_integrity());
    }
}
