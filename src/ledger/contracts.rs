//! Bridge contract bindings and address resolution

use crate::config::LedgerConfig;
use crate::error::{AgentError, AgentResult};

use ethers::prelude::abigen;
use ethers::providers::Middleware;
use ethers::types::Address;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

abigen!(
    CoinRelay,
    r#"[
        function getBestBlockHeight() external view returns (uint256)
        function getBestBlockHash() external view returns (uint256)
        function getBlockLocator() external view returns (uint256[])
        function storeBlockHeader(bytes blockHeader, uint256 proposedScryptBlockHash, address truebitClaimantAddress) external returns (uint256)
        function relayTx(bytes txBytes, uint256 txIndex, uint256[] siblings, uint256 txBlockHash, address targetContract) external returns (uint256)
    ]"#
);

abigen!(
    BridgeToken,
    r#"[
        event UnlockRequest(uint256 id, bytes20 operatorPublicKeyHash)
        function wasLockTxProcessed(uint256 txHash) external view returns (bool)
        function getUnlock(uint256 index) external view returns (address, string, uint256, uint256, uint256, uint32[], bytes20)
        function getUtxo(bytes20 operatorPublicKeyHash, uint256 index) external view returns (uint256, uint256, uint32)
    ]"#
);

abigen!(
    Superblocks,
    r#"[
        event NewSuperblock(bytes32 superblockId, address who)
        event ApprovedSuperblock(bytes32 superblockId, address who)
        event ChallengeSuperblock(bytes32 superblockId, address who)
        event SemiApprovedSuperblock(bytes32 superblockId, address who)
        event InvalidSuperblock(bytes32 superblockId, address who)
        event ErrorSuperblock(bytes32 superblockId, uint256 err)
        function propose(bytes32 _blocksMerkleRoot, uint256 _accumulatedWork, uint256 _timestamp, bytes32 _lastHash, bytes32 _parentId, address submitter) external returns (uint256, bytes32)
        function confirm(bytes32 _superblockId) external returns (uint256, bytes32)
        function challenge(bytes32 _superblockId) external returns (uint256, bytes32)
        function semiApprove(bytes32 _superblockId) external returns (uint256, bytes32)
        function invalidate(bytes32 _superblockId) external returns (uint256, bytes32)
        function getBestSuperblock() external view returns (bytes32)
        function getSuperblock(bytes32 superblockId) external view returns (bytes32, uint256, uint256, bytes32, bytes32, address, uint8)
        function getSuperblockStatus(bytes32 _superblockId) external view returns (uint8)
    ]"#
);

/// The contracts the agent talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeContract {
    Relay,
    Token,
    Superblocks,
}

impl BridgeContract {
    /// Name of the contract's build artifact
    pub fn artifact_name(&self) -> &'static str {
        match self {
            BridgeContract::Relay => "DogeRelay",
            BridgeContract::Token => "DogeToken",
            BridgeContract::Superblocks => "DogeSuperblocks",
        }
    }

    fn configured<'a>(&self, config: &'a LedgerConfig) -> Option<&'a String> {
        match self {
            BridgeContract::Relay => config.contracts.relay.as_ref(),
            BridgeContract::Token => config.contracts.token.as_ref(),
            BridgeContract::Superblocks => config.contracts.superblocks.as_ref(),
        }
    }
}

impl std::fmt::Display for BridgeContract {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.artifact_name())
    }
}

/// Resolved addresses of every bridge contract
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContractAddresses {
    pub relay: Address,
    pub token: Address,
    pub superblocks: Address,
}

#[derive(Debug, Deserialize)]
struct BuildArtifact {
    #[serde(default)]
    networks: BTreeMap<String, ArtifactNetwork>,
}

#[derive(Debug, Deserialize)]
struct ArtifactNetwork {
    address: String,
}

impl ContractAddresses {
    /// Resolve every contract from configuration, falling back to build artifacts
    pub fn resolve(config: &LedgerConfig) -> AgentResult<Self> {
        Ok(Self {
            relay: resolve_address(BridgeContract::Relay, config)?,
            token: resolve_address(BridgeContract::Token, config)?,
            superblocks: resolve_address(BridgeContract::Superblocks, config)?,
        })
    }

    /// Fail unless code is deployed at every address
    pub async fn check_liveness<M: Middleware>(&self, client: &M) -> AgentResult<()> {
        for (contract, address) in [
            (BridgeContract::Relay, self.relay),
            (BridgeContract::Token, self.token),
            (BridgeContract::Superblocks, self.superblocks),
        ] {
            let code = client
                .get_code(address, None)
                .await
                .map_err(|e| AgentError::LedgerRpc(e.to_string()))?;

            if code.as_ref().is_empty() {
                return Err(AgentError::ContractLiveness {
                    contract: contract.to_string(),
                    address: format!("{:?}", address),
                });
            }
            debug!("{} has {} bytes of code at {:?}", contract, code.len(), address);
        }

        info!("All bridge contracts are deployed");
        Ok(())
    }
}

fn resolve_address(contract: BridgeContract, config: &LedgerConfig) -> AgentResult<Address> {
    let resolution_error = |message: String| AgentError::ContractResolution {
        contract: contract.to_string(),
        message,
    };

    let raw = match contract.configured(config) {
        Some(address) => address.clone(),
        None => {
            let directory = config.build_contracts_directory.as_ref().ok_or_else(|| {
                resolution_error("no address and no build directory configured".to_string())
            })?;
            artifact_address(directory, contract).map_err(resolution_error)?
        }
    };

    raw.parse::<Address>()
        .map_err(|e| resolution_error(format!("invalid address {}: {}", raw, e)))
}

/// Address of the first network entry in a truffle build artifact
fn artifact_address(directory: &Path, contract: BridgeContract) -> Result<String, String> {
    let path = directory.join(format!("{}.json", contract.artifact_name()));
    let contents = std::fs::read_to_string(&path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    let artifact: BuildArtifact = serde_json::from_str(&contents)
        .map_err(|e| format!("cannot parse {}: {}", path.display(), e))?;

    artifact
        .networks
        .into_values()
        .next()
        .map(|network| network.address)
        .ok_or_else(|| format!("{} lists no deployed networks", path.display()))
}
