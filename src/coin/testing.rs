//! In-memory coin node for tests

use super::{CoinNode, Header};
use crate::error::{AgentError, AgentResult};

use async_trait::async_trait;
use bitcoin::hashes::Hash;
use bitcoin::{BlockHash, Transaction, Txid};
use ethers::types::U256;
use std::collections::{BTreeMap, HashMap};

/// Header with a hash derived from its height
pub(crate) fn header(height: u64, time: u32, work: u64) -> Header {
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&height.to_le_bytes());
    bytes[31] = 0xaa;
    Header {
        height,
        hash: BlockHash::from_byte_array(bytes),
        time,
        chain_work: U256::from(work),
        merge_parent: None,
    }
}

/// Linear chain held in memory; the highest stored header is the tip
#[derive(Default)]
pub(crate) struct InMemoryCoinNode {
    headers: BTreeMap<u64, Header>,
    block_txs: HashMap<BlockHash, Vec<Txid>>,
    transactions: HashMap<Txid, Transaction>,
}

impl InMemoryCoinNode {
    /// Chain of headers at heights `0..times.len()` with work growing by one
    pub(crate) fn with_times(times: &[u32]) -> Self {
        let mut node = Self::default();
        for (height, time) in times.iter().enumerate() {
            node.push(header(height as u64, *time, height as u64 + 1));
        }
        node
    }

    pub(crate) fn push(&mut self, header: Header) {
        self.headers.insert(header.height, header);
    }

    pub(crate) fn header(&self, height: u64) -> Header {
        self.headers[&height].clone()
    }

    /// Put `txs` into the block at `height`
    pub(crate) fn add_block_transactions(&mut self, height: u64, txs: Vec<Transaction>) {
        let hash = self.headers[&height].hash;
        let ids = txs.iter().map(|tx| tx.compute_txid()).collect();
        self.block_txs.insert(hash, ids);
        for tx in txs {
            self.transactions.insert(tx.compute_txid(), tx);
        }
    }
}

#[async_trait]
impl CoinNode for InMemoryCoinNode {
    async fn best_height(&self) -> AgentResult<u64> {
        Ok(self.headers.keys().next_back().copied().unwrap_or(0))
    }

    async fn header_at(&self, height: u64) -> AgentResult<Header> {
        self.headers
            .get(&height)
            .cloned()
            .ok_or_else(|| AgentError::CoinRpc(format!("no header at {}", height)))
    }

    async fn header_by_hash(&self, hash: BlockHash) -> AgentResult<Option<Header>> {
        Ok(self.headers.values().find(|h| h.hash == hash).cloned())
    }

    async fn raw_header(&self, hash: BlockHash) -> AgentResult<Vec<u8>> {
        let header = self
            .header_by_hash(hash)
            .await?
            .ok_or_else(|| AgentError::CoinRpc(format!("unknown block {}", hash)))?;
        let mut raw = vec![0u8; 80];
        raw[..8].copy_from_slice(&header.height.to_le_bytes());
        Ok(raw)
    }

    async fn block_txids(&self, hash: BlockHash) -> AgentResult<Vec<Txid>> {
        Ok(self.block_txs.get(&hash).cloned().unwrap_or_default())
    }

    async fn transaction(&self, txid: Txid) -> AgentResult<Transaction> {
        self.transactions
            .get(&txid)
            .cloned()
            .ok_or_else(|| AgentError::CoinRpc(format!("unknown tx {}", txid)))
    }
}
