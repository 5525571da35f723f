//! Handles and records exchanged with the chain client

use crate::error::{EngineError, EngineResult};

use ethers::abi::{Abi, Function, Token};
use ethers::types::{Address, H256};
use std::fmt;
use std::sync::Arc;

/// Transaction hash, used as the correlation key
pub type TxId = H256;

/// A deployed contract bound to its interface. Immutable once bound.
#[derive(Clone)]
pub struct ContractHandle {
    name: Arc<str>,
    address: Address,
    abi: Arc<Abi>,
}

impl ContractHandle {
    pub fn new(name: &str, address: Address, abi: Arc<Abi>) -> Self {
        Self {
            name: Arc::from(name),
            address,
            abi,
        }
    }

    /// Artifact name the handle was bound from
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn abi(&self) -> &Abi {
        &self.abi
    }

    pub fn has_method(&self, method: &str) -> bool {
        self.abi.functions.contains_key(method)
    }

    /// Look up a method; overloaded names resolve to the first declaration
    pub fn function(&self, method: &str) -> EngineResult<&Function> {
        self.abi
            .function(method)
            .map_err(|_| EngineError::UnknownMethod {
                contract: self.describe(),
                method: method.to_string(),
            })
    }

    /// `Name@0x…` label used in logs and errors
    pub fn describe(&self) -> String {
        format!("{}@{:?}", self.name, self.address)
    }
}

impl fmt::Debug for ContractHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContractHandle")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("methods", &self.abi.functions.len())
            .finish()
    }
}

impl PartialEq for ContractHandle {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address && self.name == other.name
    }
}

/// A creation transaction waiting for its address
#[derive(Debug, Clone, PartialEq)]
pub struct PendingDeployment {
    pub artifact: String,
    pub submitted_tx: TxId,
    pub resolved_address: Option<Address>,
}

/// Outcome of one deployment poll
#[derive(Debug, Clone, PartialEq)]
pub enum DeploymentStatus {
    /// Not mined yet; keep waiting
    Pending,
    Deployed(Address),
    /// Mined but failed, or dropped by the node
    Failed(String),
}

/// A submitted transaction. Created at submission time and never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct TxHandle {
    pub id: TxId,
    pub submitter: Address,
    pub contract: Address,
    pub method: String,
    pub args: Vec<Token>,
}

/// Receipt status of a submitted call
#[derive(Debug, Clone, PartialEq)]
pub enum TxStatus {
    /// No receipt yet
    Pending,
    Succeeded,
    /// Mined with status 0; reverted transactions emit no events
    Reverted(String),
}

/// Block number and timestamp of a mined block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRef {
    pub number: u64,
    pub timestamp: u64,
}

/// Contracts and block range an event subscription covers
#[derive(Debug, Clone)]
pub struct EventFilter {
    pub contracts: Vec<ContractHandle>,
    pub from_block: u64,
    /// `None` keeps the subscription open on new blocks
    pub to_block: Option<u64>,
}

impl EventFilter {
    pub fn new(contracts: Vec<ContractHandle>, from_block: u64) -> Self {
        let mut unique: Vec<ContractHandle> = Vec::with_capacity(contracts.len());
        for contract in contracts {
            if !unique.iter().any(|c| c.address() == contract.address()) {
                unique.push(contract);
            }
        }
        Self {
            contracts: unique,
            from_block,
            to_block: None,
        }
    }

    pub fn until(mut self, to_block: u64) -> Self {
        self.to_block = Some(to_block);
        self
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.contracts.iter().map(|c| c.address()).collect()
    }

    pub fn covers(&self, address: Address, block_number: u64) -> bool {
        block_number >= self.from_block
            && self.to_block.map_or(true, |to| block_number <= to)
            && self.contracts.iter().any(|c| c.address() == address)
    }
}
