//! JSON-RPC chain client with multi-RPC failover

use super::listener::LogPoller;
use super::{
    BlockRef, ChainClient, ContractHandle, DeploymentStatus, EventFilter, EventSubscription,
    PendingDeployment, TxHandle, TxId, TxStatus,
};
use crate::artifacts::ContractArtifact;
use crate::config::ChainConfig;
use crate::error::{EngineError, EngineResult};

use async_trait::async_trait;
use ethers::abi::Token;
use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Capacity of each subscription's event buffer
const SUBSCRIPTION_BUFFER: usize = 1024;

/// Multi-provider wrapper with automatic failover
pub struct HttpFailover {
    /// HTTP providers (multiple for failover)
    providers: Vec<Provider<Http>>,
    /// Current active provider index
    current: AtomicUsize,
}

impl HttpFailover {
    pub fn new(rpc_urls: &[String]) -> EngineResult<Self> {
        let mut providers = Vec::new();

        for url in rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    providers.push(provider.interval(Duration::from_millis(100)));
                    debug!("Added HTTP provider: {}", url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if providers.is_empty() {
            return Err(EngineError::ChainConnection {
                message: "No valid RPC providers".to_string(),
            });
        }

        Ok(Self {
            providers,
            current: AtomicUsize::new(0),
        })
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current.load(Ordering::Relaxed);
        &self.providers[idx % self.providers.len()]
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        let current = self.current.load(Ordering::Relaxed);
        let next = (current + 1) % self.providers.len();
        self.current.store(next, Ordering::Relaxed);
        warn!("Failover to RPC provider {}", next);
    }

    /// Get current block number with failover
    pub async fn get_block_number(&self) -> EngineResult<u64> {
        for _ in 0..self.providers.len() {
            match self.http().get_block_number().await {
                Ok(block) => return Ok(block.as_u64()),
                Err(e) => {
                    warn!("Failed to get block number: {}", e);
                    self.failover();
                }
            }
        }

        Err(EngineError::ChainConnection {
            message: "All providers failed".to_string(),
        })
    }

    /// Get logs for a filter with failover
    pub async fn get_logs(&self, filter: &Filter) -> EngineResult<Vec<Log>> {
        for _ in 0..self.providers.len() {
            match self.http().get_logs(filter).await {
                Ok(logs) => return Ok(logs),
                Err(e) => {
                    warn!("Failed to get logs: {}", e);
                    self.failover();
                }
            }
        }

        Err(EngineError::ChainConnection {
            message: "All providers failed to get logs".to_string(),
        })
    }
}

/// Chain client for an Ethereum-compatible node holding unlocked accounts
pub struct EthersChainClient {
    rpc: Arc<HttpFailover>,
    log_poll_interval: Duration,
    submit_timeout: Duration,
}

impl EthersChainClient {
    /// Create a new client from chain configuration
    pub fn new(config: &ChainConfig) -> EngineResult<Self> {
        let rpc = HttpFailover::new(&config.rpc_urls)?;
        info!("Chain client initialised with {} RPC endpoint(s)", config.rpc_urls.len());

        Ok(Self {
            rpc: Arc::new(rpc),
            log_poll_interval: Duration::from_millis(config.log_poll_interval_ms),
            submit_timeout: Duration::from_secs(config.submit_timeout_secs),
        })
    }

    /// Accounts managed by the node
    pub async fn accounts(&self) -> EngineResult<Vec<Address>> {
        self.rpc
            .http()
            .get_accounts()
            .await
            .map_err(|e| EngineError::ChainConnection {
                message: format!("eth_accounts: {}", e),
            })
    }

    /// Unlock every node account for the lifetime of the node process
    pub async fn unlock_all(&self, password: &str) -> EngineResult<usize> {
        let accounts = self.accounts().await?;
        for account in &accounts {
            let unlocked: bool = self
                .rpc
                .http()
                .request("personal_unlockAccount", (account, password, 0u64))
                .await
                .map_err(|e| EngineError::ChainConnection {
                    message: format!("personal_unlockAccount {:?}: {}", account, e),
                })?;
            if !unlocked {
                warn!("Node refused to unlock {:?}", account);
            }
        }
        info!("Unlocked {} account(s)", accounts.len());
        Ok(accounts.len())
    }

    async fn send(
        &self,
        tx: TransactionRequest,
        target: &str,
        operation: &str,
    ) -> EngineResult<TxHash> {
        match timeout(self.submit_timeout, self.rpc.http().send_transaction(tx, None)).await {
            Ok(Ok(pending)) => {
                let tx_hash = pending.tx_hash();
                crate::metrics::record_tx_submitted(operation);
                debug!("{} on {} submitted as {:?}", operation, target, tx_hash);
                Ok(tx_hash)
            }
            Ok(Err(e)) => {
                crate::metrics::record_tx_rejected(operation);
                error!("{} on {} rejected: {}", operation, target, e);
                Err(EngineError::Submission {
                    target: target.to_string(),
                    operation: operation.to_string(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                warn!("{} on {}: no submission acknowledgement", operation, target);
                Err(EngineError::PendingTimeout {
                    target: target.to_string(),
                    operation: format!("{} submission", operation),
                    waited: self.submit_timeout,
                })
            }
        }
    }
}

fn abi_error(target: &str, operation: &str, e: impl std::fmt::Display) -> EngineError {
    EngineError::Abi {
        target: target.to_string(),
        operation: operation.to_string(),
        message: e.to_string(),
    }
}

#[async_trait]
impl ChainClient for EthersChainClient {
    async fn latest_block(&self) -> EngineResult<BlockRef> {
        let block = self
            .rpc
            .http()
            .get_block(BlockNumber::Latest)
            .await
            .map_err(|e| EngineError::ChainConnection {
                message: e.to_string(),
            })?
            .ok_or_else(|| EngineError::ChainConnection {
                message: "No latest block".to_string(),
            })?;

        Ok(BlockRef {
            number: block.number.map(|n| n.as_u64()).unwrap_or(0),
            timestamp: block.timestamp.as_u64(),
        })
    }

    async fn deploy(
        &self,
        artifact: &ContractArtifact,
        constructor_args: &[Token],
        sender: Address,
        gas_limit: U256,
    ) -> EngineResult<PendingDeployment> {
        let data = match artifact.abi.constructor() {
            Some(constructor) => constructor
                .encode_input(artifact.bytecode.to_vec(), constructor_args)
                .map_err(|e| abi_error(&artifact.name, "deploy", e))?,
            None if constructor_args.is_empty() => artifact.bytecode.to_vec(),
            None => {
                return Err(abi_error(
                    &artifact.name,
                    "deploy",
                    "constructor arguments given but ABI declares no constructor",
                ))
            }
        };

        let tx = TransactionRequest::new()
            .from(sender)
            .data(data)
            .gas(gas_limit);
        let submitted_tx = self.send(tx, &artifact.name, "deploy").await?;

        Ok(PendingDeployment {
            artifact: artifact.name.clone(),
            submitted_tx,
            resolved_address: None,
        })
    }

    async fn poll_deployment(&self, pending: &PendingDeployment) -> EngineResult<DeploymentStatus> {
        if let Some(address) = pending.resolved_address {
            return Ok(DeploymentStatus::Deployed(address));
        }

        let receipt = self
            .rpc
            .http()
            .get_transaction_receipt(pending.submitted_tx)
            .await
            .map_err(|e| EngineError::ChainConnection {
                message: e.to_string(),
            })?;

        Ok(match receipt {
            None => DeploymentStatus::Pending,
            Some(receipt) if receipt.status == Some(0u64.into()) => {
                DeploymentStatus::Failed(format!("creation tx {:?} reverted", pending.submitted_tx))
            }
            Some(receipt) => match receipt.contract_address {
                Some(address) => DeploymentStatus::Deployed(address),
                None => DeploymentStatus::Failed(format!(
                    "receipt for {:?} carries no contract address",
                    pending.submitted_tx
                )),
            },
        })
    }

    async fn call(
        &self,
        contract: &ContractHandle,
        method: &str,
        args: &[Token],
        sender: Address,
        gas_limit: U256,
    ) -> EngineResult<TxHandle> {
        let target = contract.describe();
        let data = contract
            .function(method)?
            .encode_input(args)
            .map_err(|e| abi_error(&target, method, e))?;

        let tx = TransactionRequest::new()
            .from(sender)
            .to(contract.address())
            .data(data)
            .gas(gas_limit);
        let id = self.send(tx, &target, method).await?;

        Ok(TxHandle {
            id,
            submitter: sender,
            contract: contract.address(),
            method: method.to_string(),
            args: args.to_vec(),
        })
    }

    async fn tx_status(&self, tx: TxId) -> EngineResult<TxStatus> {
        let receipt = self
            .rpc
            .http()
            .get_transaction_receipt(tx)
            .await
            .map_err(|e| EngineError::ChainConnection {
                message: e.to_string(),
            })?;

        Ok(match receipt {
            None => TxStatus::Pending,
            Some(receipt) if receipt.status == Some(0u64.into()) => TxStatus::Reverted(format!(
                "tx {:?} reverted in block {}",
                tx,
                receipt.block_number.map(|n| n.as_u64()).unwrap_or_default()
            )),
            Some(_) => TxStatus::Succeeded,
        })
    }

    async fn subscribe_events(&self, filter: EventFilter) -> EngineResult<EventSubscription> {
        let (sender, subscription) = EventSubscription::channel(SUBSCRIPTION_BUFFER);
        let poller = LogPoller::new(self.rpc.clone(), filter, self.log_poll_interval);
        tokio::spawn(poller.run(sender));
        Ok(subscription)
    }

    async fn read_only_call(
        &self,
        contract: &ContractHandle,
        method: &str,
        args: &[Token],
    ) -> EngineResult<Vec<Token>> {
        let target = contract.describe();
        let function = contract.function(method)?;
        let data = function
            .encode_input(args)
            .map_err(|e| abi_error(&target, method, e))?;

        let tx: TypedTransaction = TransactionRequest::new()
            .to(contract.address())
            .data(data)
            .into();
        let output = self
            .rpc
            .http()
            .call(&tx, None)
            .await
            .map_err(|e| EngineError::ChainConnection {
                message: format!("eth_call {} on {}: {}", method, target, e),
            })?;

        function
            .decode_output(output.as_ref())
            .map_err(|e| abi_error(&target, method, e))
    }
}
