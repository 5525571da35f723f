//! Chain module - the ledger client seam and its JSON-RPC implementation
//!
//! This module provides:
//! - The `ChainClient` trait every engine component talks to
//! - Immutable contract handles and transaction handles
//! - Cancellable, idempotently closable event subscriptions
//! - An ethers-based client with multi-RPC failover and log polling

pub mod listener;
pub mod provider;
#[cfg(test)]
pub(crate) mod sim;
pub mod subscription;
pub mod types;

pub use provider::EthersChainClient;
pub use subscription::EventSubscription;
pub use types::{
    BlockRef, ContractHandle, DeploymentStatus, EventFilter, PendingDeployment, TxHandle, TxId,
    TxStatus,
};

use crate::artifacts::ContractArtifact;
use crate::error::EngineResult;

use async_trait::async_trait;
use ethers::abi::Token;
use ethers::types::{Address, U256};

/// Primitive operations the engine needs from a ledger node.
///
/// Implementations are shared read-only (`Arc`) by every component; none of
/// the methods require exclusive access.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Latest mined block known to the node
    async fn latest_block(&self) -> EngineResult<BlockRef>;

    /// Submit creation code; the address is assigned later, at mining time
    async fn deploy(
        &self,
        artifact: &ContractArtifact,
        constructor_args: &[Token],
        sender: Address,
        gas_limit: U256,
    ) -> EngineResult<PendingDeployment>;

    /// Check whether a pending deployment has been mined
    async fn poll_deployment(&self, pending: &PendingDeployment) -> EngineResult<DeploymentStatus>;

    /// Submit a state-changing transaction
    async fn call(
        &self,
        contract: &ContractHandle,
        method: &str,
        args: &[Token],
        sender: Address,
        gas_limit: U256,
    ) -> EngineResult<TxHandle>;

    /// Receipt status of a submitted call
    async fn tx_status(&self, tx: TxId) -> EngineResult<TxStatus>;

    /// Stream decoded events emitted by the filtered contracts
    async fn subscribe_events(&self, filter: EventFilter) -> EngineResult<EventSubscription>;

    /// Evaluate a view method without submitting a transaction
    async fn read_only_call(
        &self,
        contract: &ContractHandle,
        method: &str,
        args: &[Token],
    ) -> EngineResult<Vec<Token>>;
}
