//! Bridge client over the ledger contracts

use super::contracts::{
    ApprovedSuperblockFilter, BridgeToken, ChallengeSuperblockFilter, CoinRelay,
    ContractAddresses, ErrorSuperblockFilter, InvalidSuperblockFilter, NewSuperblockFilter,
    SemiApprovedSuperblockFilter, Superblocks,
};
use super::gas::GasPriceOracle;
use super::{
    BridgeRelay, RemoteSuperblock, RemoteTip, SuperblockAction, UnlockRequest, UnlockSource,
};
use crate::coin::{
    block_hash_from_uint, hash_to_uint, txid_from_uint, MerkleProof, RawHeader, Utxo,
};
use crate::config::{AccountsConfig, LedgerConfig};
use crate::error::{AgentError, AgentResult};
use crate::events::{EventParser, LedgerEvent, UnlockRequestEvent};
use crate::superblock::{Superblock, SuperblockStatus};

use async_trait::async_trait;
use bitcoin::consensus::encode::serialize;
use bitcoin::hashes::Hash;
use bitcoin::{BlockHash, Transaction, Txid};
use ethers::abi::Detokenize;
use ethers::contract::{ContractCall, EthEvent};
use ethers::providers::Middleware;
use ethers::types::{Address, Bytes, Filter, SyncingStatus, TransactionReceipt, H256, U256, U64};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Ledger identities used for writes, managed by the ledger node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerAccounts {
    pub general_purpose: Address,
    pub relay_txs: Address,
    pub claimant: Address,
}

impl LedgerAccounts {
    pub fn from_config(config: &AccountsConfig) -> AgentResult<Self> {
        let parse = |role: &str, value: &str| {
            value
                .parse::<Address>()
                .map_err(|e| AgentError::Config(format!("Invalid {} account {}: {}", role, value, e)))
        };

        Ok(Self {
            general_purpose: parse("general purpose", &config.general_purpose)?,
            relay_txs: parse("relay tx", &config.relay_txs)?,
            claimant: parse("claimant", &config.claimant)?,
        })
    }
}

/// Client for the relay, token and superblocks contracts
pub struct BridgeClient<M> {
    client: Arc<M>,
    relay: CoinRelay<M>,
    token: BridgeToken<M>,
    superblocks: Superblocks<M>,
    addresses: ContractAddresses,
    accounts: LedgerAccounts,
    gas: GasPriceOracle,
    gas_limit: U256,
    receipt_timeout: Duration,
}

impl<M: Middleware + 'static> BridgeClient<M> {
    pub fn new(
        client: Arc<M>,
        addresses: ContractAddresses,
        accounts: LedgerAccounts,
        config: &LedgerConfig,
        receipt_timeout: Duration,
    ) -> Self {
        Self {
            relay: CoinRelay::new(addresses.relay, client.clone()),
            token: BridgeToken::new(addresses.token, client.clone()),
            superblocks: Superblocks::new(addresses.superblocks, client.clone()),
            client,
            addresses,
            accounts,
            gas: GasPriceOracle::new(U256::from(config.gas_price_minimum)),
            gas_limit: U256::from(config.gas_limit),
            receipt_timeout,
        }
    }

    pub fn addresses(&self) -> &ContractAddresses {
        &self.addresses
    }

    pub fn accounts(&self) -> &LedgerAccounts {
        &self.accounts
    }

    /// Apply identity, gas limit and the current gas price to a write
    async fn prepare<D: Detokenize>(
        &self,
        call: ContractCall<M, D>,
        from: Address,
    ) -> ContractCall<M, D> {
        call.from(from)
            .legacy()
            .gas(self.gas_limit)
            .gas_price(self.gas.current().await)
    }

    /// Send a write and wait for its receipt
    async fn send_and_confirm<D: Detokenize>(
        &self,
        call: ContractCall<M, D>,
        what: &str,
    ) -> AgentResult<TransactionReceipt> {
        let pending = call
            .send()
            .await
            .map_err(|e| AgentError::Submission(format!("{}: {}", what, e)))?;
        let tx_hash = pending.tx_hash();
        debug!("Sent {} in {:?}", what, tx_hash);

        let receipt = timeout(self.receipt_timeout, pending)
            .await
            .map_err(|_| AgentError::Timeout {
                operation: format!("{} receipt {:?}", what, tx_hash),
            })?
            .map_err(|e| AgentError::LedgerRpc(e.to_string()))?
            .ok_or_else(|| AgentError::Submission(format!("{} {:?} was dropped", what, tx_hash)))?;

        if receipt.status == Some(U64::zero()) {
            return Err(AgentError::Submission(format!(
                "{} {:?} reverted",
                what, tx_hash
            )));
        }
        Ok(receipt)
    }

    async fn logs(&self, filter: Filter) -> AgentResult<Vec<ethers::types::Log>> {
        self.client
            .get_logs(&filter)
            .await
            .map_err(|e| AgentError::LedgerRpc(format!("eth_getLogs: {}", e)))
    }
}

fn read_error(what: &str, e: impl std::fmt::Display) -> AgentError {
    AgentError::LedgerRpc(format!("{}: {}", what, e))
}

fn to_u64(value: U256, what: &str) -> AgentResult<u64> {
    if value > U256::from(u64::MAX) {
        return Err(AgentError::Contract(format!(
            "{} {} does not fit in 64 bits",
            what, value
        )));
    }
    Ok(value.as_u64())
}

#[async_trait]
impl<M: Middleware + 'static> UnlockSource for BridgeClient<M> {
    async fn is_syncing(&self) -> AgentResult<bool> {
        let status = self
            .client
            .syncing()
            .await
            .map_err(|e| read_error("eth_syncing", e))?;
        Ok(!matches!(status, SyncingStatus::IsFalse))
    }

    async fn block_number(&self) -> AgentResult<u64> {
        let number = self
            .client
            .get_block_number()
            .await
            .map_err(|e| read_error("eth_blockNumber", e))?;
        crate::metrics::set_ledger_height(number.as_u64());
        Ok(number.as_u64())
    }

    async fn unlock_requests(&self, from: u64, to: u64) -> AgentResult<Vec<UnlockRequestEvent>> {
        let filter = Filter::new()
            .address(self.addresses.token)
            .topic0(EventParser::unlock_request_topic())
            .from_block(from)
            .to_block(to);

        self.logs(filter)
            .await?
            .iter()
            .map(EventParser::parse_unlock_request)
            .collect()
    }

    async fn unlock(&self, id: u64) -> AgentResult<UnlockRequest> {
        let (_, destination, value, fee, _, utxo_indexes, operator_key_hash) = self
            .token
            .get_unlock(U256::from(id))
            .call()
            .await
            .map_err(|e| read_error("getUnlock", e))?;

        let mut selected_utxos = Vec::with_capacity(utxo_indexes.len());
        for index in utxo_indexes {
            let (utxo_value, tx_hash, vout) = self
                .token
                .get_utxo(operator_key_hash, U256::from(index))
                .call()
                .await
                .map_err(|e| read_error("getUtxo", e))?;

            selected_utxos.push(Utxo {
                txid: txid_from_uint(tx_hash),
                vout,
                value: to_u64(utxo_value, "utxo value")?,
            });
        }

        Ok(UnlockRequest {
            id,
            operator_key_hash,
            destination,
            value: to_u64(value, "unlock value")?,
            fee: to_u64(fee, "unlock fee")?,
            selected_utxos,
        })
    }
}

#[async_trait]
impl<M: Middleware + 'static> BridgeRelay for BridgeClient<M> {
    async fn is_remote_syncing(&self) -> AgentResult<bool> {
        UnlockSource::is_syncing(self).await
    }

    async fn ledger_height(&self) -> AgentResult<u64> {
        UnlockSource::block_number(self).await
    }

    async fn refresh_gas_price(&self) -> AgentResult<U256> {
        self.gas.refresh(self.client.as_ref()).await
    }

    async fn remote_chain_tip(&self) -> AgentResult<RemoteTip> {
        let height = self
            .relay
            .get_best_block_height()
            .call()
            .await
            .map_err(|e| read_error("getBestBlockHeight", e))?;
        let hash = self
            .relay
            .get_best_block_hash()
            .call()
            .await
            .map_err(|e| read_error("getBestBlockHash", e))?;

        Ok(RemoteTip {
            height: to_u64(height, "remote height")?,
            hash: block_hash_from_uint(hash),
        })
    }

    async fn remote_locator(&self) -> AgentResult<Vec<BlockHash>> {
        let locator = self
            .relay
            .get_block_locator()
            .call()
            .await
            .map_err(|e| read_error("getBlockLocator", e))?;
        Ok(locator.into_iter().map(block_hash_from_uint).collect())
    }

    async fn relay_headers(&self, headers: &[RawHeader]) -> AgentResult<usize> {
        let (first, last) = match (headers.first(), headers.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Ok(0),
        };
        info!(
            "Relaying headers {} to {}",
            first.header.hash, last.header.hash
        );

        let mut accepted = 0;
        for raw in headers {
            let call = self.relay.store_block_header(
                Bytes::from(raw.bytes.clone()),
                hash_to_uint(raw.scrypt_proof_hash()?),
                self.accounts.claimant,
            );
            let call = self.prepare(call, self.accounts.general_purpose).await;

            match self.send_and_confirm(call, "storeBlockHeader").await {
                Ok(receipt) => {
                    accepted += 1;
                    crate::metrics::record_relay_submission("header", "accepted");
                    debug!(
                        "Header {} stored in {:?}",
                        raw.header.hash, receipt.transaction_hash
                    );
                }
                Err(AgentError::Submission(reason)) => {
                    crate::metrics::record_relay_submission("header", "rejected");
                    warn!(
                        "Header {} rejected, stopping run: {}",
                        raw.header.hash, reason
                    );
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(accepted)
    }

    async fn relay_transaction(
        &self,
        tx: &Transaction,
        block_hash: BlockHash,
        proof: &MerkleProof,
    ) -> AgentResult<()> {
        let txid = tx.compute_txid();
        info!("Relaying coin tx {} from block {}", txid, block_hash);

        let call = self.relay.relay_tx(
            Bytes::from(serialize(tx)),
            U256::from(proof.index),
            proof.siblings_as_uint(),
            hash_to_uint(block_hash.to_byte_array()),
            self.addresses.token,
        );
        let call = self.prepare(call, self.accounts.relay_txs).await;
        let receipt_timeout = self.receipt_timeout;

        tokio::spawn(async move {
            let pending = match call.send().await {
                Ok(pending) => pending,
                Err(e) => {
                    crate::metrics::record_relay_submission("transaction", "rejected");
                    error!("relayTx for {} failed: {}", txid, e);
                    return;
                }
            };
            info!("Sent relayTx {} in {:?}", txid, pending.tx_hash());

            match timeout(receipt_timeout, pending).await {
                Ok(Ok(Some(receipt))) if receipt.status != Some(U64::zero()) => {
                    crate::metrics::record_relay_submission("transaction", "accepted");
                    info!(
                        "RelayTx receipt for {}: block {:?}, gas used {:?}",
                        txid, receipt.block_number, receipt.gas_used
                    );
                }
                Ok(Ok(Some(receipt))) => {
                    crate::metrics::record_relay_submission("transaction", "rejected");
                    warn!("RelayTx for {} reverted in {:?}", txid, receipt.transaction_hash);
                }
                Ok(Ok(None)) => warn!("RelayTx for {} was dropped", txid),
                Ok(Err(e)) => warn!("RelayTx receipt for {} failed: {}", txid, e),
                Err(_) => warn!("RelayTx receipt for {} timed out", txid),
            }
        });

        Ok(())
    }

    async fn was_processed(&self, txid: Txid) -> AgentResult<bool> {
        self.token
            .was_lock_tx_processed(hash_to_uint(txid.to_byte_array()))
            .call()
            .await
            .map_err(|e| read_error("wasLockTxProcessed", e))
    }

    async fn best_superblock(&self) -> AgentResult<H256> {
        let id = self
            .superblocks
            .get_best_superblock()
            .call()
            .await
            .map_err(|e| read_error("getBestSuperblock", e))?;
        Ok(H256(id))
    }

    async fn superblock(&self, id: H256) -> AgentResult<RemoteSuperblock> {
        let (merkle_root, accumulated_work, timestamp, last_hash, parent_id, submitter, status) =
            self.superblocks
                .get_superblock(id.0)
                .call()
                .await
                .map_err(|e| read_error("getSuperblock", e))?;

        Ok(RemoteSuperblock {
            merkle_root: H256(merkle_root),
            accumulated_work,
            timestamp: to_u64(timestamp, "superblock timestamp")?,
            last_hash: H256(last_hash),
            parent_id: H256(parent_id),
            submitter,
            status: SuperblockStatus::try_from(status)?,
        })
    }

    async fn superblock_status(&self, id: H256) -> AgentResult<SuperblockStatus> {
        let status = self
            .superblocks
            .get_superblock_status(id.0)
            .call()
            .await
            .map_err(|e| read_error("getSuperblockStatus", e))?;
        SuperblockStatus::try_from(status)
    }

    async fn propose_superblock(&self, superblock: &Superblock) -> AgentResult<H256> {
        info!(
            "Proposing superblock {:?} (heights {}..={})",
            superblock.id, superblock.first_height, superblock.last_height
        );

        let call = self.superblocks.propose(
            superblock.merkle_root.0,
            superblock.accumulated_work,
            U256::from(superblock.timestamp),
            superblock.last_hash.0,
            superblock.parent_id.0,
            self.accounts.general_purpose,
        );
        let call = self.prepare(call, self.accounts.general_purpose).await;

        let result = self.send_and_confirm(call, "propose").await;
        let outcome = if result.is_ok() { "accepted" } else { "rejected" };
        crate::metrics::record_relay_submission("superblock", outcome);

        Ok(result?.transaction_hash)
    }

    async fn superblock_action(&self, action: SuperblockAction, id: H256) -> AgentResult<H256> {
        let call = match action {
            SuperblockAction::Confirm => self.superblocks.confirm(id.0),
            SuperblockAction::Challenge => self.superblocks.challenge(id.0),
            SuperblockAction::SemiApprove => self.superblocks.semi_approve(id.0),
            SuperblockAction::Invalidate => self.superblocks.invalidate(id.0),
        };
        let call = self.prepare(call, self.accounts.general_purpose).await;

        info!("Sending {} for superblock {:?}", action.as_str(), id);
        let result = self.send_and_confirm(call, action.as_str()).await;
        let outcome = if result.is_ok() { "accepted" } else { "rejected" };
        crate::metrics::record_relay_submission(action.as_str(), outcome);

        Ok(result?.transaction_hash)
    }

    async fn superblock_events(&self, from: u64, to: u64) -> AgentResult<Vec<LedgerEvent>> {
        let topics = vec![
            NewSuperblockFilter::signature(),
            ApprovedSuperblockFilter::signature(),
            ChallengeSuperblockFilter::signature(),
            SemiApprovedSuperblockFilter::signature(),
            InvalidSuperblockFilter::signature(),
            ErrorSuperblockFilter::signature(),
        ];
        let filter = Filter::new()
            .address(self.addresses.superblocks)
            .topic0(topics)
            .from_block(from)
            .to_block(to);

        let events = self
            .logs(filter)
            .await?
            .iter()
            .map(EventParser::parse_superblock_event)
            .collect::<AgentResult<Vec<_>>>()?;

        for event in &events {
            crate::metrics::record_event(event);
        }
        Ok(events)
    }
}
