//! Unlock event processor
//!
//! Turns unlock requests addressed to this operator into signed coin chain
//! withdrawals. Progress is tracked by a checkpoint: the highest ledger block
//! whose unlock events were all handled. The checkpoint only moves after a
//! whole window succeeded and was persisted, so a failed tick is retried in
//! full on the next one.

use crate::checkpoint::CheckpointStore;
use crate::coin::{Broadcaster, CoinTransactionBuilder};
use crate::error::AgentResult;
use crate::events::LedgerEvent;
use crate::ledger::{UnlockRequestEvent, UnlockSource};
use crate::scheduler::{PeriodicTask, TickOutcome};

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub struct UnlockProcessor<S: ?Sized, B: ?Sized> {
    source: Arc<S>,
    broadcaster: Arc<B>,
    builder: CoinTransactionBuilder,
    store: CheckpointStore,
    /// Blocks kept between the ledger tip and the processing window
    confirmations: u64,
    checkpoint: u64,
    checkpoint_tx: watch::Sender<u64>,
}

impl<S, B> UnlockProcessor<S, B>
where
    S: UnlockSource + ?Sized,
    B: Broadcaster + ?Sized,
{
    /// Create a processor resuming from the persisted checkpoint, or from
    /// `initial_checkpoint` when none was saved yet
    pub async fn new(
        source: Arc<S>,
        broadcaster: Arc<B>,
        builder: CoinTransactionBuilder,
        store: CheckpointStore,
        initial_checkpoint: u64,
        confirmations: u64,
    ) -> AgentResult<Self> {
        let checkpoint = store.load_or(initial_checkpoint).await?;
        info!(
            "Unlock processor starting from checkpoint {} ({:?})",
            checkpoint,
            store.path()
        );
        crate::metrics::set_checkpoint(checkpoint);

        let (checkpoint_tx, _) = watch::channel(checkpoint);
        Ok(Self {
            source,
            broadcaster,
            builder,
            store,
            confirmations,
            checkpoint,
            checkpoint_tx,
        })
    }

    pub fn checkpoint(&self) -> u64 {
        self.checkpoint
    }

    /// Receiver following every checkpoint advance
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.checkpoint_tx.subscribe()
    }

    /// Process one window of confirmed ledger blocks
    pub async fn process_window(&mut self) -> AgentResult<TickOutcome> {
        if self.source.is_syncing().await? {
            info!("Ledger node is syncing, skipping unlock processing");
            return Ok(TickOutcome::Syncing);
        }

        let height = self.source.block_number().await?;
        let from_block = self.checkpoint + 1;
        let to_block = height.saturating_sub(self.confirmations);
        if from_block > to_block {
            debug!(
                "No confirmed blocks past checkpoint {} (ledger at {})",
                self.checkpoint, height
            );
            return Ok(TickOutcome::Idle);
        }

        let events = self.source.unlock_requests(from_block, to_block).await?;
        debug!(
            "Blocks {} to {}: {} unlock requests",
            from_block,
            to_block,
            events.len()
        );

        let operator = self.builder.operator().pubkey_hash_bytes();
        for event in &events {
            crate::metrics::record_event(&LedgerEvent::UnlockRequest(*event));
            if event.operator_key_hash != operator {
                debug!("Unlock {} is for another operator", event.id);
                crate::metrics::record_unlock("foreign");
                continue;
            }
            self.handle_unlock(event).await?;
        }

        self.store.save(to_block).await?;
        self.checkpoint = to_block;
        self.checkpoint_tx.send_replace(to_block);
        crate::metrics::set_checkpoint(to_block);

        info!("Unlock checkpoint advanced to {}", to_block);
        Ok(TickOutcome::Progressed)
    }

    async fn handle_unlock(&self, event: &UnlockRequestEvent) -> AgentResult<()> {
        let unlock = self.source.unlock(event.id).await?;
        let tx = self.builder.build(&unlock)?;
        let txid = tx.compute_txid();

        info!(
            "Unlock {}: paying {} (fee {}) to {} in {}",
            unlock.id, unlock.value, unlock.fee, unlock.destination, txid
        );

        match self.broadcaster.broadcast(&tx).await {
            Ok(_) => {
                crate::metrics::record_broadcast("accepted");
                crate::metrics::record_unlock("processed");
                Ok(())
            }
            Err(e) if e.is_duplicate() => {
                warn!("Unlock {} was already paid out: {}", unlock.id, e);
                crate::metrics::record_broadcast("duplicate");
                crate::metrics::record_unlock("processed");
                Ok(())
            }
            Err(e) => {
                crate::metrics::record_broadcast("failed");
                Err(e.into())
            }
        }
    }
}

#[async_trait]
impl<S, B> PeriodicTask for UnlockProcessor<S, B>
where
    S: UnlockSource + ?Sized + 'static,
    B: Broadcaster + ?Sized + 'static,
{
    fn name(&self) -> &'static str {
        "unlock_processor"
    }

    async fn tick(&mut self) -> AgentResult<TickOutcome> {
        self.process_window().await
    }
}
