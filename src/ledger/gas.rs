//! Gas price selection for ledger writes

use crate::error::{AgentError, AgentResult};

use ethers::providers::Middleware;
use ethers::types::U256;
use tokio::sync::RwLock;
use tracing::debug;

/// Use the node's suggestion when it is above the floor, else the floor
pub fn select_gas_price(suggested: U256, floor: U256) -> U256 {
    if suggested > floor {
        suggested
    } else {
        floor
    }
}

/// Gas price applied to every ledger write, refreshed from the node
pub struct GasPriceOracle {
    floor: U256,
    current: RwLock<U256>,
}

impl GasPriceOracle {
    pub fn new(floor: U256) -> Self {
        Self {
            floor,
            current: RwLock::new(floor),
        }
    }

    /// Price used for the next write
    pub async fn current(&self) -> U256 {
        *self.current.read().await
    }

    /// Ask the node for its suggestion and store the selected price
    pub async fn refresh<M: Middleware>(&self, client: &M) -> AgentResult<U256> {
        let suggested = client
            .get_gas_price()
            .await
            .map_err(|e| AgentError::LedgerRpc(format!("eth_gasPrice: {}", e)))?;

        let price = select_gas_price(suggested, self.floor);
        *self.current.write().await = price;

        crate::metrics::set_gas_price(price);
        debug!("Gas price: suggested {}, using {}", suggested, price);
        Ok(price)
    }
}
