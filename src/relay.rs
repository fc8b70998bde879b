//! Relay of coin chain data to the ledger contracts
//!
//! Each tick refreshes the gas price and then, as enabled:
//! - pushes the coin headers following the relay contract's best known block
//! - follows superblock events and proposes the next local superblock
//! - relays lock transactions paying the operator, with inclusion proofs

use crate::coin::{CoinNode, MerkleProof, RawHeader};
use crate::config::RelayConfig;
use crate::error::{AgentError, AgentResult};
use crate::events::LedgerEvent;
use crate::ledger::{BridgeRelay, SuperblockAction};
use crate::scheduler::{PeriodicTask, TickOutcome};
use crate::superblock::{SuperblockChain, SuperblockStatus};

use async_trait::async_trait;
use bitcoin::{ScriptBuf, Transaction};
use ethers::types::{Address, H256};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where lock transactions are searched for
#[derive(Debug, Clone)]
pub struct LockScan {
    /// Script of the operator outputs lock transactions pay to
    pub script: ScriptBuf,
    pub next_height: u64,
    /// Coin confirmations required before a block is scanned
    pub confirmations: u64,
}

pub struct RelayTask<R: ?Sized, N: ?Sized> {
    relay: Arc<R>,
    node: Arc<N>,
    chain: Arc<SuperblockChain>,
    config: RelayConfig,
    /// Last ledger block whose superblock events were applied
    last_event_block: u64,
    /// Ledger confirmations required before events are applied
    event_confirmations: u64,
    lock_scan: Option<LockScan>,
}

impl<R, N> RelayTask<R, N>
where
    R: BridgeRelay + ?Sized,
    N: CoinNode + ?Sized,
{
    pub fn new(
        relay: Arc<R>,
        node: Arc<N>,
        chain: Arc<SuperblockChain>,
        config: RelayConfig,
        event_start_block: u64,
    ) -> Self {
        Self {
            relay,
            node,
            chain,
            config,
            last_event_block: event_start_block,
            event_confirmations: 0,
            lock_scan: None,
        }
    }

    pub fn with_event_confirmations(mut self, confirmations: u64) -> Self {
        self.event_confirmations = confirmations;
        self
    }

    pub fn with_lock_scan(mut self, scan: LockScan) -> Self {
        self.lock_scan = Some(scan);
        self
    }

    pub async fn run_once(&mut self) -> AgentResult<TickOutcome> {
        if self.relay.is_remote_syncing().await? {
            info!("Ledger node is syncing, skipping relay");
            return Ok(TickOutcome::Syncing);
        }
        self.relay.refresh_gas_price().await?;

        let mut progressed = false;
        if self.config.headers_enabled {
            progressed |= self.sync_headers().await? > 0;
        }
        if self.config.superblocks_enabled {
            progressed |= self.sync_superblocks().await?;
        }
        if self.config.lock_txs_enabled && self.lock_scan.is_some() {
            progressed |= self.scan_lock_txs().await? > 0;
        }

        Ok(if progressed {
            TickOutcome::Progressed
        } else {
            TickOutcome::Idle
        })
    }

    /// Relay up to one batch of headers past the common ancestor
    async fn sync_headers(&self) -> AgentResult<usize> {
        let locator = self.relay.remote_locator().await?;

        let mut ancestor = None;
        for hash in locator {
            if let Some(header) = self.node.header_by_hash(hash).await? {
                ancestor = Some(header);
                break;
            }
        }
        let ancestor = ancestor.ok_or_else(|| {
            AgentError::DataIntegrity(
                "relay contract locator shares no block with the coin node".to_string(),
            )
        })?;

        let best = self.node.best_height().await?;
        let last = best.min(ancestor.height + self.config.header_batch_size);
        if last <= ancestor.height {
            debug!("Relay contract is at the coin tip {}", ancestor.height);
            return Ok(0);
        }

        let mut headers = Vec::new();
        for height in ancestor.height + 1..=last {
            let header = self.node.header_at(height).await?;
            let bytes = self.node.raw_header(header.hash).await?;
            headers.push(RawHeader { header, bytes });
        }

        let accepted = self.relay.relay_headers(&headers).await?;
        info!(
            "Relayed {} of {} headers after height {}",
            accepted,
            headers.len(),
            ancestor.height
        );
        Ok(accepted)
    }

    async fn sync_superblocks(&mut self) -> AgentResult<bool> {
        let mut progressed = self.apply_superblock_events().await?;
        progressed |= self.propose_next().await?;

        crate::metrics::set_superblock_states(&self.chain.status_counts());
        Ok(progressed)
    }

    /// Apply confirmed superblock events, one bounded query at a time
    async fn apply_superblock_events(&mut self) -> AgentResult<bool> {
        let height = self.relay.ledger_height().await?;
        let safe = height.saturating_sub(self.event_confirmations);

        let mut progressed = false;
        while self.last_event_block < safe {
            let from = self.last_event_block + 1;
            let to = safe.min(self.last_event_block + self.config.event_batch_size.max(1));
            let events = self.relay.superblock_events(from, to).await?;
            for event in &events {
                progressed |= self.apply_event(event).await?;
            }
            self.last_event_block = to;
        }
        Ok(progressed)
    }

    async fn apply_event(&self, event: &LedgerEvent) -> AgentResult<bool> {
        if let LedgerEvent::ErrorSuperblock {
            superblock_id,
            code,
            ..
        } = event
        {
            warn!("Superblock {:?} operation failed with code {}", superblock_id, code);
            return Ok(false);
        }

        let (id, status) = match (event.superblock_id(), event.superblock_status()) {
            (Some(id), Some(status)) => (id, status),
            _ => return Ok(false),
        };
        let local = self.chain.set_status(&id, status);
        debug!(
            "{} for {:?} at ledger block {} (local: {})",
            event.name(),
            id,
            event.block_number(),
            local
        );
        if local && status.is_final() {
            info!("Superblock {:?} is now {}", id, status.as_str());
        }

        if let LedgerEvent::NewSuperblock { who, .. } = event {
            if local {
                self.chain.record_submitter(&id, *who);
            } else if self.config.challenge_enabled {
                return self.challenge_if_conflicting(id, *who).await;
            }
        }
        Ok(false)
    }

    /// Challenge a foreign superblock whose parent has a different local successor
    ///
    /// A superblock building on a parent the local chain does not hold, or on
    /// the local tip, covers headers this agent has not summarized and is left
    /// alone.
    async fn challenge_if_conflicting(&self, id: H256, who: Address) -> AgentResult<bool> {
        let remote = self.relay.superblock(id).await?;
        let successor = match self.chain.first() {
            Some(first) if first.parent_id == remote.parent_id => Some(first),
            _ if self.chain.get(&remote.parent_id).is_some() => {
                self.chain.next_after(&remote.parent_id)
            }
            _ => {
                debug!(
                    "Superblock {:?} builds on {:?}, which is not in the local chain",
                    id, remote.parent_id
                );
                return Ok(false);
            }
        };

        let local = match successor {
            Some(local) => local,
            None => {
                debug!("Superblock {:?} extends past the local tip", id);
                return Ok(false);
            }
        };

        warn!(
            "Superblock {:?} from {:?} conflicts with local {:?}, challenging",
            id, who, local.id
        );
        self.relay
            .superblock_action(SuperblockAction::Challenge, id)
            .await?;
        Ok(true)
    }

    /// Propose the local successor of the contract's best superblock
    async fn propose_next(&self) -> AgentResult<bool> {
        let best = self.relay.best_superblock().await?;
        let next = if self.chain.get(&best).is_some() {
            self.chain.next_after(&best)
        } else if best.is_zero() {
            self.chain.first()
        } else {
            let remote = self.relay.superblock(best).await?;
            warn!(
                "Best superblock {:?} ({}, last block {:?}, from {:?}) is not in the local chain",
                best,
                remote.status.as_str(),
                remote.last_hash,
                remote.submitter
            );
            return Ok(false);
        };

        let next = match next {
            Some(superblock) => superblock,
            None => {
                debug!("No local superblock past {:?}", best);
                return Ok(false);
            }
        };

        let status = self.relay.superblock_status(next.id).await?;
        if status.is_registered() {
            self.chain.set_status(&next.id, status);
            debug!(
                "Superblock {:?} already registered as {}",
                next.id,
                status.as_str()
            );
            return Ok(false);
        }

        let tx_hash = self.relay.propose_superblock(next).await?;
        self.chain.set_status(&next.id, SuperblockStatus::New);
        info!("Proposed superblock {:?} in {:?}", next.id, tx_hash);
        Ok(true)
    }

    /// Scan confirmed coin blocks for unprocessed lock transactions
    async fn scan_lock_txs(&mut self) -> AgentResult<usize> {
        let mut scan = match self.lock_scan.clone() {
            Some(scan) => scan,
            None => return Ok(0),
        };

        let tip = self.node.best_height().await?;
        let mut safe = tip.saturating_sub(scan.confirmations);
        if self.config.headers_enabled {
            // The relay contract verifies against blocks it already stores
            safe = safe.min(self.relay.remote_chain_tip().await?.height);
        }
        if scan.next_height > safe {
            return Ok(0);
        }

        let last = safe.min(scan.next_height + self.config.lock_scan_batch_size.max(1) - 1);
        let mut relayed = 0;
        for height in scan.next_height..=last {
            relayed += self.scan_block(height, &scan.script).await?;
            scan.next_height = height + 1;
            self.lock_scan = Some(scan.clone());
        }
        Ok(relayed)
    }

    async fn scan_block(&self, height: u64, script: &ScriptBuf) -> AgentResult<usize> {
        let header = self.node.header_at(height).await?;
        let txids = self.node.block_txids(header.hash).await?;

        let mut relayed = 0;
        // Index 0 is the coinbase
        for (index, txid) in txids.iter().enumerate().skip(1) {
            let tx = self.node.transaction(*txid).await?;
            if !pays_to(&tx, script) {
                continue;
            }
            if self.relay.was_processed(*txid).await? {
                debug!("Lock tx {} was already processed", txid);
                continue;
            }

            let proof = MerkleProof::build(&txids, index)?;
            self.relay
                .relay_transaction(&tx, header.hash, &proof)
                .await?;
            relayed += 1;
        }
        Ok(relayed)
    }
}

fn pays_to(tx: &Transaction, script: &ScriptBuf) -> bool {
    tx.output.iter().any(|out| &out.script_pubkey == script)
}

#[async_trait]
impl<R, N> PeriodicTask for RelayTask<R, N>
where
    R: BridgeRelay + ?Sized + 'static,
    N: CoinNode + ?Sized + 'static,
{
    fn name(&self) -> &'static str {
        "relay"
    }

    async fn tick(&mut self) -> AgentResult<TickOutcome> {
        self.run_once().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coin::builder::tests::operator;
    use crate::coin::testing::InMemoryCoinNode;
    use crate::ledger::{MockBridgeRelay, RemoteSuperblock, RemoteTip};
    use crate::superblock::build_chain;
    use bitcoin::hashes::Hash;
    use bitcoin::{
        absolute, transaction, Amount, BlockHash, OutPoint, Sequence, TxIn, TxOut, Txid, Witness,
    };
    use ethers::types::{Address, H256, U256};
    use mockall::predicate::eq;

    const HOUR: u32 = 3600;
    const BASE: u32 = 1_500_000_000 - (1_500_000_000 % HOUR);

    fn node(len: u32) -> InMemoryCoinNode {
        let times: Vec<u32> = (0..len).map(|i| BASE + i * 1800).collect();
        InMemoryCoinNode::with_times(&times)
    }

    fn config() -> RelayConfig {
        RelayConfig {
            headers_enabled: false,
            superblocks_enabled: false,
            challenge_enabled: false,
            lock_txs_enabled: false,
            header_batch_size: 3,
            lock_scan_batch_size: 10,
            event_batch_size: 100,
            receipt_timeout_secs: 5,
        }
    }

    fn relay() -> MockBridgeRelay {
        let mut relay = MockBridgeRelay::new();
        relay.expect_is_remote_syncing().returning(|| Ok(false));
        relay
            .expect_refresh_gas_price()
            .returning(|| Ok(U256::from(20_000_000_000u64)));
        relay
    }

    fn payment(seed: u8, script: ScriptBuf) -> Transaction {
        Transaction {
            version: transaction::Version::ONE,
            lock_time: absolute::LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::new(Txid::from_byte_array([seed; 32]), 0),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(1_000 + seed as u64),
                script_pubkey: script,
            }],
        }
    }

    fn remote_superblock(status: SuperblockStatus) -> RemoteSuperblock {
        remote_child(status, H256::zero())
    }

    fn remote_child(status: SuperblockStatus, parent_id: H256) -> RemoteSuperblock {
        RemoteSuperblock {
            merkle_root: H256::repeat_byte(0x10),
            accumulated_work: U256::from(1_000u64),
            timestamp: BASE as u64,
            last_hash: H256::repeat_byte(0x11),
            parent_id,
            submitter: Address::repeat_byte(2),
            status,
        }
    }

    fn new_superblock(id: H256) -> LedgerEvent {
        LedgerEvent::NewSuperblock {
            superblock_id: id,
            who: Address::repeat_byte(2),
            block_number: 9,
            tx_hash: H256::zero(),
        }
    }

    async fn task(
        relay: MockBridgeRelay,
        node: InMemoryCoinNode,
        config: RelayConfig,
    ) -> RelayTask<MockBridgeRelay, InMemoryCoinNode> {
        let chain = build_chain(&node, 0).await.unwrap();
        RelayTask::new(
            Arc::new(relay),
            Arc::new(node),
            Arc::new(chain),
            config,
            0,
        )
    }

    #[tokio::test]
    async fn test_syncing_ledger_skips_relay() {
        let mut relay = MockBridgeRelay::new();
        relay.expect_is_remote_syncing().returning(|| Ok(true));
        relay.expect_refresh_gas_price().never();
        relay.expect_remote_locator().never();

        let mut config = config();
        config.headers_enabled = true;
        let mut task = task(relay, node(4), config).await;
        assert_eq!(task.run_once().await.unwrap(), TickOutcome::Syncing);
    }

    #[tokio::test]
    async fn test_headers_follow_common_ancestor() {
        let node = node(10);
        let ancestor = node.header(4).hash;

        let mut relay = relay();
        relay
            .expect_remote_locator()
            .returning(move || Ok(vec![BlockHash::from_byte_array([0xfe; 32]), ancestor]));
        relay
            .expect_relay_headers()
            .withf(|headers: &[RawHeader]| {
                headers.iter().map(|h| h.header.height).collect::<Vec<_>>() == vec![5, 6, 7]
                    && headers.iter().all(|h| h.bytes.len() == 80)
            })
            .times(1)
            .returning(|headers| Ok(headers.len()));

        let mut config = config();
        config.headers_enabled = true;
        let mut task = task(relay, node, config).await;
        assert_eq!(task.run_once().await.unwrap(), TickOutcome::Progressed);
    }

    #[tokio::test]
    async fn test_headers_idle_at_tip() {
        let node = node(6);
        let tip = node.header(5).hash;

        let mut relay = relay();
        relay.expect_remote_locator().returning(move || Ok(vec![tip]));
        relay.expect_relay_headers().never();

        let mut config = config();
        config.headers_enabled = true;
        let mut task = task(relay, node, config).await;
        assert_eq!(task.run_once().await.unwrap(), TickOutcome::Idle);
    }

    #[tokio::test]
    async fn test_unknown_locator_is_integrity_error() {
        let mut relay = relay();
        relay
            .expect_remote_locator()
            .returning(|| Ok(vec![BlockHash::from_byte_array([0xfe; 32])]));

        let mut config = config();
        config.headers_enabled = true;
        let mut task = task(relay, node(5), config).await;
        assert!(task.run_once().await.unwrap_err().is_data_integrity());
    }

    #[tokio::test]
    async fn test_proposes_successor_of_remote_best() {
        let node = node(12);
        let chain = build_chain(&node, 0).await.unwrap();
        let ids: Vec<H256> = chain.iter().map(|sb| sb.id).collect();
        let (first, second) = (ids[0], ids[1]);

        let mut relay = relay();
        relay.expect_ledger_height().returning(|| Ok(50));
        relay
            .expect_superblock_events()
            .with(eq(1), eq(50))
            .times(1)
            .returning(move |_, _| {
                Ok(vec![LedgerEvent::ApprovedSuperblock {
                    superblock_id: first,
                    who: Address::repeat_byte(1),
                    block_number: 40,
                    tx_hash: H256::zero(),
                }])
            });
        relay.expect_best_superblock().returning(move || Ok(first));
        relay
            .expect_superblock_status()
            .with(eq(second))
            .returning(|_| Ok(SuperblockStatus::Unknown));
        relay
            .expect_propose_superblock()
            .withf(move |sb| sb.id == second && sb.parent_id == first)
            .times(1)
            .returning(|_| Ok(H256::repeat_byte(0x77)));

        let mut config = config();
        config.superblocks_enabled = true;
        let chain = Arc::new(chain);
        let mut task = RelayTask::new(Arc::new(relay), Arc::new(node), chain.clone(), config, 0);

        assert_eq!(task.run_once().await.unwrap(), TickOutcome::Progressed);
        assert_eq!(chain.status(&first), SuperblockStatus::Approved);
        assert_eq!(chain.status(&second), SuperblockStatus::New);
    }

    #[tokio::test]
    async fn test_registered_successor_is_not_reproposed() {
        let node = node(12);
        let chain = build_chain(&node, 0).await.unwrap();
        let first = chain.first().unwrap().id;

        let mut relay = relay();
        relay.expect_ledger_height().returning(|| Ok(0));
        relay.expect_best_superblock().returning(move || Ok(first));
        relay
            .expect_superblock_status()
            .returning(|_| Ok(SuperblockStatus::InBattle));
        relay.expect_propose_superblock().never();

        let mut config = config();
        config.superblocks_enabled = true;
        let mut task = task(relay, node, config).await;
        assert_eq!(task.run_once().await.unwrap(), TickOutcome::Idle);
    }

    #[tokio::test]
    async fn test_empty_contract_gets_first_superblock() {
        let node = node(12);
        let chain = build_chain(&node, 0).await.unwrap();
        let first = chain.first().unwrap().id;

        let mut relay = relay();
        relay.expect_ledger_height().returning(|| Ok(0));
        relay.expect_best_superblock().returning(|| Ok(H256::zero()));
        relay
            .expect_superblock_status()
            .returning(|_| Ok(SuperblockStatus::Unknown));
        relay
            .expect_propose_superblock()
            .withf(move |sb| sb.id == first)
            .times(1)
            .returning(|_| Ok(H256::repeat_byte(1)));

        let mut config = config();
        config.superblocks_enabled = true;
        let mut task = task(relay, node, config).await;
        assert_eq!(task.run_once().await.unwrap(), TickOutcome::Progressed);
    }

    #[tokio::test]
    async fn test_conflicting_superblock_is_challenged_when_enabled() {
        let node = node(12);
        let chain = build_chain(&node, 0).await.unwrap();
        let first = chain.first().unwrap().id;
        let foreign = H256::repeat_byte(0xcc);

        let mut relay = relay();
        relay.expect_ledger_height().returning(|| Ok(10));
        relay
            .expect_superblock_events()
            .returning(move |_, _| Ok(vec![new_superblock(foreign)]));
        // Same parent as the local second superblock, different content
        relay
            .expect_superblock()
            .with(eq(foreign))
            .times(1)
            .returning(move |_| Ok(remote_child(SuperblockStatus::New, first)));
        relay
            .expect_superblock_action()
            .with(eq(SuperblockAction::Challenge), eq(foreign))
            .times(1)
            .returning(|_, _| Ok(H256::repeat_byte(3)));
        relay
            .expect_best_superblock()
            .returning(|| Ok(H256::repeat_byte(0xdd)));
        relay
            .expect_superblock()
            .with(eq(H256::repeat_byte(0xdd)))
            .times(1)
            .returning(|_| Ok(remote_superblock(SuperblockStatus::New)));
        relay.expect_propose_superblock().never();

        let mut config = config();
        config.superblocks_enabled = true;
        config.challenge_enabled = true;
        let mut task = task(relay, node, config).await;
        assert_eq!(task.run_once().await.unwrap(), TickOutcome::Progressed);
    }

    #[tokio::test]
    async fn test_superblocks_past_local_tip_are_not_challenged() {
        let local = build_chain(&node(12), 0).await.unwrap();
        let longer = build_chain(&node(20), 0).await.unwrap();
        let ids: Vec<H256> = longer.iter().map(|sb| sb.id).collect();
        let local_tip = local.tip().unwrap().id;

        // The successor of the local tip and a superblock further ahead
        let next = ids[local.len()];
        let ahead = *ids.last().unwrap();
        assert_eq!(ids[local.len() - 1], local_tip);
        let ahead_parent = ids[ids.len() - 2];

        let mut relay = relay();
        relay.expect_ledger_height().returning(|| Ok(10));
        relay
            .expect_superblock_events()
            .returning(move |_, _| Ok(vec![new_superblock(next), new_superblock(ahead)]));
        relay
            .expect_superblock()
            .with(eq(next))
            .returning(move |_| Ok(remote_child(SuperblockStatus::New, local_tip)));
        relay
            .expect_superblock()
            .with(eq(ahead))
            .returning(move |_| Ok(remote_child(SuperblockStatus::New, ahead_parent)));
        relay.expect_superblock_action().never();
        relay.expect_best_superblock().returning(move || Ok(local_tip));

        let mut config = config();
        config.superblocks_enabled = true;
        config.challenge_enabled = true;
        let mut task = task(relay, node(12), config).await;
        assert_eq!(task.run_once().await.unwrap(), TickOutcome::Idle);
    }

    #[tokio::test]
    async fn test_superblock_events_are_queried_in_confirmed_batches() {
        let mut relay = relay();
        relay.expect_ledger_height().returning(|| Ok(250));
        let mut seq = mockall::Sequence::new();
        for (from, to) in [(1, 100), (101, 200), (201, 245)] {
            relay
                .expect_superblock_events()
                .with(eq(from), eq(to))
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, _| Ok(vec![]));
        }
        relay.expect_best_superblock().returning(|| Ok(H256::zero()));
        relay
            .expect_superblock_status()
            .returning(|_| Ok(SuperblockStatus::Approved));

        let mut config = config();
        config.superblocks_enabled = true;
        let mut task = task(relay, node(12), config).await.with_event_confirmations(5);
        assert_eq!(task.run_once().await.unwrap(), TickOutcome::Idle);
        assert_eq!(task.last_event_block, 245);
    }

    #[tokio::test]
    async fn test_lock_txs_are_relayed_with_proof() {
        let script = operator().script_pubkey();
        let mut node = node(8);
        let coinbase = payment(1, ScriptBuf::new());
        let lock = payment(2, script.clone());
        let other = payment(3, ScriptBuf::new());
        let seen = payment(4, script.clone());
        node.add_block_transactions(
            2,
            vec![coinbase, lock.clone(), other, seen.clone()],
        );
        let block_hash = node.header(2).hash;
        let (lock_id, seen_id) = (lock.compute_txid(), seen.compute_txid());

        let mut relay = relay();
        relay
            .expect_was_processed()
            .returning(move |txid| Ok(txid == seen_id));
        relay
            .expect_relay_transaction()
            .withf(move |tx, hash, proof| {
                tx.compute_txid() == lock_id && *hash == block_hash && proof.index == 1
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let mut config = config();
        config.lock_txs_enabled = true;
        let mut task = task(relay, node, config).await.with_lock_scan(LockScan {
            script,
            next_height: 0,
            confirmations: 2,
        });

        assert_eq!(task.run_once().await.unwrap(), TickOutcome::Progressed);
        // Tip 7 with two confirmations leaves heights up to 5 scanned
        assert_eq!(task.lock_scan.as_ref().unwrap().next_height, 6);
    }

    #[tokio::test]
    async fn test_lock_scan_bounded_by_relayed_headers() {
        let node = node(8);
        let (remote_height, remote_hash) = (3, node.header(3).hash);

        let mut relay = relay();
        relay
            .expect_remote_locator()
            .returning(move || Ok(vec![remote_hash]));
        relay.expect_relay_headers().returning(|_| Ok(0));
        relay.expect_remote_chain_tip().returning(move || {
            Ok(RemoteTip {
                height: remote_height,
                hash: remote_hash,
            })
        });

        let mut config = config();
        config.headers_enabled = true;
        config.lock_txs_enabled = true;
        let mut task = task(relay, node, config).await.with_lock_scan(LockScan {
            script: operator().script_pubkey(),
            next_height: 0,
            confirmations: 0,
        });

        assert_eq!(task.run_once().await.unwrap(), TickOutcome::Idle);
        assert_eq!(task.lock_scan.as_ref().unwrap().next_height, 4);
    }
}
