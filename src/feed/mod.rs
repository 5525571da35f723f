//! Key/value feed contract
//!
//! Keys are the Keccak-256 hash of a label, e.g. `launchedOn`. The feed
//! stores bare values; it keeps no record of when a value was written, so
//! entries carry the block timestamp at which they were observed.

use crate::chain::{ChainClient, ContractHandle, TxHandle};
use crate::error::{EngineError, EngineResult};

use ethers::abi::Token;
use ethers::types::{Address, H256, U256};
use sha3::{Digest, Keccak256};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::debug;

/// A value read from the feed
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEntry {
    pub key: H256,
    pub value: U256,
    /// Timestamp of the latest block at read time, not of the write
    pub timestamp: u64,
}

/// Content key for a feed label
pub fn key(label: &str) -> H256 {
    H256::from_slice(&Keccak256::digest(label.as_bytes()))
}

#[derive(Clone)]
pub struct FeedHandle {
    contract: ContractHandle,
    client: Arc<dyn ChainClient>,
    gas_limit: U256,
}

impl FeedHandle {
    pub fn new(contract: ContractHandle, client: Arc<dyn ChainClient>, gas_limit: U256) -> Self {
        Self {
            contract,
            client,
            gas_limit,
        }
    }

    pub fn contract(&self) -> &ContractHandle {
        &self.contract
    }

    /// Overwrite the value stored under `label`
    pub async fn set(&self, label: &str, value: U256, sender: Address) -> EngineResult<TxHandle> {
        let tx = self
            .client
            .call(
                &self.contract,
                "set",
                &[Token::FixedBytes(key(label).as_bytes().to_vec()), Token::Uint(value)],
                sender,
                self.gas_limit,
            )
            .await?;
        debug!("Feed {} <- {} sent as {:?}", label, value, tx.id);
        Ok(tx)
    }

    pub async fn get(&self, label: &str) -> EngineResult<FeedEntry> {
        let key = key(label);
        let output = self
            .client
            .read_only_call(&self.contract, "get", &[Token::FixedBytes(key.as_bytes().to_vec())])
            .await?;
        let value = match output.first() {
            Some(Token::Uint(v)) => *v,
            other => {
                return Err(EngineError::Abi {
                    target: self.contract.describe(),
                    operation: "get".to_string(),
                    message: format!("expected uint, got {:?}", other),
                })
            }
        };
        let block = self.client.latest_block().await?;
        Ok(FeedEntry {
            key,
            value,
            timestamp: block.timestamp,
        })
    }

    /// Poll until `label` holds a non-zero value, within `bound`
    pub async fn await_value(
        &self,
        label: &str,
        bound: Duration,
        poll_interval: Duration,
    ) -> EngineResult<FeedEntry> {
        let wait = async {
            loop {
                let entry = self.get(label).await?;
                if !entry.value.is_zero() {
                    return Ok(entry);
                }
                sleep(poll_interval).await;
            }
        };

        timeout(bound, wait)
            .await
            .unwrap_or_else(|_| {
                Err(EngineError::PendingTimeout {
                    target: self.contract.describe(),
                    operation: format!("feed value {}", label),
                    waited: bound,
                })
            })
    }
}
