//! Merkle inclusion proofs over coin chain transaction ids

use crate::error::{AgentError, AgentResult};

use bitcoin::hashes::{sha256d, Hash, HashEngine};
use bitcoin::Txid;
use ethers::types::U256;

/// Path of sibling hashes proving a transaction's position in a block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleProof {
    /// Position of the transaction within the block
    pub index: u32,
    /// Siblings from the leaf level upwards
    pub siblings: Vec<sha256d::Hash>,
}

impl MerkleProof {
    /// Build the proof for the transaction at `index` of `txids`
    pub fn build(txids: &[Txid], index: usize) -> AgentResult<Self> {
        if index >= txids.len() {
            return Err(AgentError::Internal(format!(
                "merkle index {} out of range for {} transactions",
                index,
                txids.len()
            )));
        }

        let mut level: Vec<sha256d::Hash> = txids.iter().map(|t| t.to_raw_hash()).collect();
        let mut position = index;
        let mut siblings = Vec::new();

        while level.len() > 1 {
            // Odd levels pair their last node with itself
            let sibling = if position % 2 == 0 {
                level.get(position + 1).unwrap_or(&level[position])
            } else {
                &level[position - 1]
            };
            siblings.push(*sibling);

            level = level
                .chunks(2)
                .map(|pair| hash_pair(&pair[0], pair.get(1).unwrap_or(&pair[0])))
                .collect();
            position /= 2;
        }

        Ok(Self {
            index: index as u32,
            siblings,
        })
    }

    /// Fold the proof back up to the block's merkle root
    #[cfg(test)]
    pub fn root_for(&self, txid: Txid) -> sha256d::Hash {
        let mut node = txid.to_raw_hash();
        let mut position = self.index;
        for sibling in &self.siblings {
            node = if position % 2 == 0 {
                hash_pair(&node, sibling)
            } else {
                hash_pair(sibling, &node)
            };
            position /= 2;
        }
        node
    }

    /// Siblings in the contract's uint256 form
    pub fn siblings_as_uint(&self) -> Vec<U256> {
        self.siblings
            .iter()
            .map(|s| super::hash_to_uint(s.to_byte_array()))
            .collect()
    }
}

/// Merkle root over a list of hashes, `None` for an empty list
pub fn merkle_root<I>(hashes: I) -> Option<sha256d::Hash>
where
    I: IntoIterator<Item = sha256d::Hash>,
{
    bitcoin::merkle_tree::calculate_root(hashes.into_iter())
}

fn hash_pair(left: &sha256d::Hash, right: &sha256d::Hash) -> sha256d::Hash {
    let mut engine = sha256d::Hash::engine();
    engine.input(left.as_byte_array());
    engine.input(right.as_byte_array());
    sha256d::Hash::from_engine(engine)
}
