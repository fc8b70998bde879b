//! JSON-RPC access to the coin chain node and transaction broadcast

use super::{Broadcaster, CoinNode, Header};
use crate::error::{AgentError, AgentResult, BroadcastError};

use async_trait::async_trait;
use bitcoin::consensus::{deserialize, encode::serialize_hex};
use bitcoin::{BlockHash, Transaction, Txid};
use ethers::providers::{Authorization, Http, HttpClientError, JsonRpcClient, RpcError};
use ethers::types::U256;
use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

/// Block not found
const RPC_INVALID_ADDRESS_OR_KEY: i64 = -5;
/// Inputs missing or already spent
const RPC_VERIFY_ERROR: i64 = -25;
/// Transaction already in block chain
const RPC_VERIFY_ALREADY_IN_CHAIN: i64 = -27;

#[derive(Debug, Deserialize)]
struct HeaderJson {
    hash: String,
    height: u64,
    time: u32,
    chainwork: String,
    confirmations: i64,
    #[serde(default)]
    auxpow: Option<AuxPowJson>,
}

#[derive(Debug, Deserialize)]
struct AuxPowJson {
    parentblock: String,
}

#[derive(Debug, Deserialize)]
struct BlockJson {
    tx: Vec<String>,
}

/// Coin chain node reached over its JSON-RPC interface
pub struct CoinRpcNode {
    url: String,
    client: Http,
}

impl CoinRpcNode {
    pub fn new(url: &str, user: Option<&str>, password: Option<&str>) -> AgentResult<Self> {
        let parsed = Url::parse(url)
            .map_err(|e| AgentError::Config(format!("Invalid coin RPC url {}: {}", url, e)))?;

        let client = match (user, password) {
            (Some(user), Some(password)) => {
                Http::new_with_auth(parsed, Authorization::basic(user, password))
                    .map_err(|e| AgentError::Config(e.to_string()))?
            }
            _ => Http::new(parsed),
        };

        debug!("Coin RPC client configured for {}", url);
        Ok(Self {
            url: url.to_string(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call<R: DeserializeOwned + Send>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<R, HttpClientError> {
        self.client.request(method, params).await
    }

    async fn request<R: DeserializeOwned + Send>(
        &self,
        method: &str,
        params: Value,
    ) -> AgentResult<R> {
        self.call(method, params)
            .await
            .map_err(|e| AgentError::CoinRpc(format!("{} via {}: {}", method, self.url, e)))
    }

    fn parse_header(&self, raw: HeaderJson) -> AgentResult<Header> {
        let hash = BlockHash::from_str(&raw.hash)
            .map_err(|e| AgentError::CoinRpc(format!("bad block hash {}: {}", raw.hash, e)))?;
        let chain_work = U256::from_str_radix(&raw.chainwork, 16)
            .map_err(|e| AgentError::CoinRpc(format!("bad chainwork {}: {}", raw.chainwork, e)))?;

        let merge_parent = match raw.auxpow {
            Some(auxpow) => {
                let bytes = hex::decode(&auxpow.parentblock)
                    .map_err(|e| AgentError::CoinRpc(format!("bad auxpow parent: {}", e)))?;
                let parent: bitcoin::block::Header = deserialize(&bytes)
                    .map_err(|e| AgentError::CoinRpc(format!("bad auxpow parent: {}", e)))?;
                Some(parent)
            }
            None => None,
        };

        Ok(Header {
            height: raw.height,
            hash,
            time: raw.time,
            chain_work,
            merge_parent,
        })
    }
}

#[async_trait]
impl CoinNode for CoinRpcNode {
    async fn best_height(&self) -> AgentResult<u64> {
        self.request("getblockcount", json!([])).await
    }

    async fn header_at(&self, height: u64) -> AgentResult<Header> {
        let hash: String = self.request("getblockhash", json!([height])).await?;
        let raw: HeaderJson = self.request("getblockheader", json!([hash, true])).await?;
        self.parse_header(raw)
    }

    async fn header_by_hash(&self, hash: BlockHash) -> AgentResult<Option<Header>> {
        let result: Result<HeaderJson, HttpClientError> = self
            .call("getblockheader", json!([hash.to_string(), true]))
            .await;

        match result {
            // Negative confirmations mark blocks outside the best chain
            Ok(raw) if raw.confirmations < 0 => Ok(None),
            Ok(raw) => self.parse_header(raw).map(Some),
            Err(e)
                if e.as_error_response().map(|r| r.code) == Some(RPC_INVALID_ADDRESS_OR_KEY) =>
            {
                Ok(None)
            }
            Err(e) => Err(AgentError::CoinRpc(format!(
                "getblockheader via {}: {}",
                self.url, e
            ))),
        }
    }

    async fn raw_header(&self, hash: BlockHash) -> AgentResult<Vec<u8>> {
        let hex_header: String = self
            .request("getblockheader", json!([hash.to_string(), false]))
            .await?;
        hex::decode(&hex_header)
            .map_err(|e| AgentError::CoinRpc(format!("bad header hex for {}: {}", hash, e)))
    }

    async fn block_txids(&self, hash: BlockHash) -> AgentResult<Vec<Txid>> {
        let block: BlockJson = self
            .request("getblock", json!([hash.to_string(), true]))
            .await?;
        block
            .tx
            .iter()
            .map(|id| {
                Txid::from_str(id)
                    .map_err(|e| AgentError::CoinRpc(format!("bad txid {}: {}", id, e)))
            })
            .collect()
    }

    async fn transaction(&self, txid: Txid) -> AgentResult<Transaction> {
        let hex_tx: String = self
            .request("getrawtransaction", json!([txid.to_string(), false]))
            .await?;
        let bytes = hex::decode(&hex_tx)
            .map_err(|e| AgentError::CoinRpc(format!("bad tx hex for {}: {}", txid, e)))?;
        deserialize(&bytes)
            .map_err(|e| AgentError::CoinRpc(format!("bad tx encoding for {}: {}", txid, e)))
    }
}

#[async_trait]
impl Broadcaster for CoinRpcNode {
    async fn broadcast(&self, tx: &Transaction) -> Result<Txid, BroadcastError> {
        let txid = tx.compute_txid();
        let result: Result<String, HttpClientError> = self
            .call("sendrawtransaction", json!([serialize_hex(tx)]))
            .await;

        match result {
            Ok(_) => {
                info!("Broadcast coin tx {} via {}", txid, self.url);
                Ok(txid)
            }
            Err(e) => match e.as_error_response() {
                Some(rpc) if is_missing_inputs(rpc.code, &rpc.message) => {
                    // Only a copy of this very transaction makes the inputs safe to skip
                    match self.transaction(txid).await {
                        Ok(_) => Err(BroadcastError::AlreadySpent {
                            txid: txid.to_string(),
                            reason: format!("{} (transaction known to {})", rpc.message, self.url),
                        }),
                        Err(_) => Err(classify_rejection(txid, rpc.code, &rpc.message)),
                    }
                }
                Some(rpc) => Err(classify_rejection(txid, rpc.code, &rpc.message)),
                None => Err(BroadcastError::Transport(format!("{}: {}", self.url, e))),
            },
        }
    }
}

/// Rejection that cannot tell unseen inputs from spent ones
pub(crate) fn is_missing_inputs(code: i64, message: &str) -> bool {
    let lower = message.to_lowercase();
    code == RPC_VERIFY_ERROR
        || lower.contains("missing inputs")
        || lower.contains("missingorspent")
}

/// Map a node rejection onto the broadcast error taxonomy
///
/// Only rejections naming this exact transaction count as duplicates.
pub(crate) fn classify_rejection(txid: Txid, code: i64, message: &str) -> BroadcastError {
    let lower = message.to_lowercase();
    let already_broadcast = code == RPC_VERIFY_ALREADY_IN_CHAIN
        || lower.contains("already in block chain")
        || lower.contains("txn-already-in-mempool")
        || lower.contains("txn-already-known")
        || lower.contains("already known");

    if already_broadcast {
        BroadcastError::AlreadySpent {
            txid: txid.to_string(),
            reason: message.to_string(),
        }
    } else {
        BroadcastError::Rejected {
            txid: txid.to_string(),
            reason: format!("{} (code {})", message, code),
        }
    }
}

/// Broadcasts through every peer of a group, succeeding if any peer accepts
pub struct PeerGroupBroadcaster {
    peers: Vec<Arc<dyn Broadcaster>>,
}

impl PeerGroupBroadcaster {
    pub fn new(peers: Vec<Arc<dyn Broadcaster>>) -> Self {
        Self { peers }
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[async_trait]
impl Broadcaster for PeerGroupBroadcaster {
    async fn broadcast(&self, tx: &Transaction) -> Result<Txid, BroadcastError> {
        if self.peers.is_empty() {
            return Err(BroadcastError::Transport("peer group is empty".to_string()));
        }

        let results = join_all(self.peers.iter().map(|peer| peer.broadcast(tx))).await;

        let mut duplicate = None;
        let mut first_error = None;
        for result in results {
            match result {
                Ok(txid) => return Ok(txid),
                Err(e) if e.is_duplicate() => duplicate = duplicate.or(Some(e)),
                Err(e) => {
                    warn!("Peer rejected coin tx {}: {}", tx.compute_txid(), e);
                    first_error = first_error.or(Some(e));
                }
            }
        }

        Err(duplicate
            .or(first_error)
            .unwrap_or_else(|| BroadcastError::Transport("no peer responded".to_string())))
    }
}
