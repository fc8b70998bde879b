//! Ledger JSON-RPC transport with multi-endpoint failover

use crate::error::{AgentError, AgentResult};

use async_trait::async_trait;
use ethers::providers::{Http, HttpClientError, JsonRpcClient, Provider, RpcError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// JSON-RPC transport rotating across endpoints on transport failures
///
/// A JSON-RPC error response means the node answered, so it is returned as-is
/// without trying the next endpoint.
#[derive(Debug)]
pub struct FailoverClient {
    endpoints: Vec<(String, Http)>,
    current: AtomicUsize,
}

impl FailoverClient {
    pub fn new(urls: &[String]) -> AgentResult<Self> {
        let mut endpoints = Vec::new();
        for url in urls {
            match Url::parse(url) {
                Ok(parsed) => {
                    debug!("Added ledger RPC endpoint: {}", url);
                    endpoints.push((url.clone(), Http::new(parsed)));
                }
                Err(e) => warn!("Skipping invalid ledger RPC url {}: {}", url, e),
            }
        }

        if endpoints.is_empty() {
            return Err(AgentError::Config(
                "No valid ledger RPC endpoints".to_string(),
            ));
        }

        Ok(Self {
            endpoints,
            current: AtomicUsize::new(0),
        })
    }

    /// Wrap the transport in an ethers provider
    pub fn into_provider(self) -> Provider<Self> {
        Provider::new(self).interval(Duration::from_millis(500))
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    /// Index of the endpoint requests currently go to
    pub fn active(&self) -> usize {
        self.current.load(Ordering::Relaxed) % self.endpoints.len()
    }

    fn failover(&self, from: usize) {
        let next = (from + 1) % self.endpoints.len();
        // Only the first failing caller advances the cursor
        if self
            .current
            .compare_exchange(from, next, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            warn!(
                "Ledger RPC failover from {} to {}",
                self.endpoints[from].0, self.endpoints[next].0
            );
        }
    }
}

#[async_trait]
impl JsonRpcClient for FailoverClient {
    type Error = HttpClientError;

    async fn request<T, R>(&self, method: &str, params: T) -> Result<R, Self::Error>
    where
        T: Debug + Serialize + Send + Sync,
        R: DeserializeOwned + Send,
    {
        let mut last_error = None;
        for _ in 0..self.endpoints.len() {
            let index = self.active();
            let (url, client) = &self.endpoints[index];

            match client.request(method, &params).await {
                Ok(result) => return Ok(result),
                Err(e) if e.as_error_response().is_some() => return Err(e),
                Err(e) => {
                    warn!("Ledger RPC {} failed on {}: {}", method, url, e);
                    self.failover(index);
                    last_error = Some(e);
                }
            }
        }

        // Loop ran at least once because endpoints is never empty
        Err(last_error.unwrap_or_else(|| HttpClientError::SerdeJson {
            err: serde::de::Error::custom("no ledger endpoints"),
            text: String::new(),
        }))
    }
}
