//! Superblock chain construction and lookup

use super::{Superblock, SuperblockStatus, GENESIS_PARENT_ID};
use crate::coin::{CoinNode, Header};
use crate::error::{AgentError, AgentResult};

use chrono::{DateTime, Duration, DurationRound, Utc};
use dashmap::DashMap;
use ethers::types::{Address, H256, U256};
use std::collections::HashMap;
use tracing::{debug, info};

/// Partition the coin header chain from `start_height` into superblocks
///
/// A bucket collects headers while their hour (timestamp truncated to the
/// hour) is not later than the hour of the bucket's first header. The header
/// at the tip height is never included: it opens the next bucket, which stays
/// open until the chain grows past it.
pub async fn build_chain<N>(node: &N, start_height: u64) -> AgentResult<SuperblockChain>
where
    N: CoinNode + ?Sized,
{
    let tip = node.best_height().await?;
    if tip <= start_height {
        info!(
            "Coin tip {} is not above start height {}, no superblocks to build",
            tip, start_height
        );
        return Ok(SuperblockChain::new(Vec::new()));
    }

    let mut superblocks = Vec::new();
    let mut height = start_height;
    let mut first = node.header_at(height).await?;
    let mut previous_work = first.chain_work;
    let mut parent_id = *GENESIS_PARENT_ID;

    while height < tip {
        let bucket_hour = hour_of(&first)?;
        let accumulated_work = first.chain_work;
        let mut bucket: Vec<Header> = Vec::new();
        let mut current = first;

        while height < tip && hour_of(&current)? <= bucket_hour {
            bucket.push(current);
            height += 1;
            current = node.header_at(height).await?;
            check_work(previous_work, &current)?;
            previous_work = current.chain_work;
        }

        let superblock = Superblock::from_headers(&bucket, accumulated_work, parent_id)?;
        debug!(
            "Superblock {:?} covers {} headers at heights {}..={}",
            superblock.id,
            superblock.header_count(),
            superblock.first_height,
            superblock.last_height
        );
        parent_id = superblock.id;
        superblocks.push(superblock);

        first = current;
    }

    crate::metrics::set_superblocks_built(superblocks.len());
    info!(
        "Built {} superblocks over coin heights {}..{}",
        superblocks.len(),
        start_height,
        tip
    );
    Ok(SuperblockChain::new(superblocks))
}

fn hour_of(header: &Header) -> AgentResult<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(header.time as i64, 0)
        .and_then(|t| t.duration_trunc(Duration::hours(1)).ok())
        .ok_or_else(|| {
            AgentError::DataIntegrity(format!(
                "header {} has unusable timestamp {}",
                header.height, header.time
            ))
        })
}

fn check_work(previous: U256, header: &Header) -> AgentResult<()> {
    if header.chain_work < previous {
        return Err(AgentError::DataIntegrity(format!(
            "chain work decreased at height {}: {} < {}",
            header.height, header.chain_work, previous
        )));
    }
    Ok(())
}

/// The locally built superblock chain, with contract-reported state
///
/// The superblocks themselves are fixed once built; status and submitter
/// updates arrive from ledger events and may come from any task.
pub struct SuperblockChain {
    superblocks: Vec<Superblock>,
    index: HashMap<H256, usize>,
    statuses: DashMap<H256, SuperblockStatus>,
    submitters: DashMap<H256, Address>,
}

impl SuperblockChain {
    pub fn new(superblocks: Vec<Superblock>) -> Self {
        let index = superblocks
            .iter()
            .enumerate()
            .map(|(i, sb)| (sb.id, i))
            .collect();

        Self {
            superblocks,
            index,
            statuses: DashMap::new(),
            submitters: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.superblocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.superblocks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Superblock> {
        self.superblocks.iter()
    }

    pub fn first(&self) -> Option<&Superblock> {
        self.superblocks.first()
    }

    /// Most recent closed superblock
    pub fn tip(&self) -> Option<&Superblock> {
        self.superblocks.last()
    }

    pub fn get(&self, id: &H256) -> Option<&Superblock> {
        self.position(id).map(|i| &self.superblocks[i])
    }

    pub fn position(&self, id: &H256) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Successor of `id`, if both are part of the local chain
    pub fn next_after(&self, id: &H256) -> Option<&Superblock> {
        self.position(id).and_then(|i| self.superblocks.get(i + 1))
    }

    pub fn status(&self, id: &H256) -> SuperblockStatus {
        self.statuses
            .get(id)
            .map(|s| *s)
            .unwrap_or(SuperblockStatus::Unknown)
    }

    /// Record a contract-reported status; false when `id` is not local
    pub fn set_status(&self, id: &H256, status: SuperblockStatus) -> bool {
        if !self.index.contains_key(id) {
            return false;
        }
        self.statuses.insert(*id, status);
        true
    }

    pub fn record_submitter(&self, id: &H256, who: Address) {
        if self.index.contains_key(id) {
            self.submitters.insert(*id, who);
        }
    }

    pub fn submitter(&self, id: &H256) -> Option<Address> {
        self.submitters.get(id).map(|a| *a)
    }

    /// Number of local superblocks per reported status
    pub fn status_counts(&self) -> HashMap<SuperblockStatus, usize> {
        let mut counts = HashMap::new();
        for sb in &self.superblocks {
            *counts.entry(self.status(&sb.id)).or_insert(0) += 1;
        }
        counts
    }
}
