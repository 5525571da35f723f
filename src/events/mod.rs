//! Contract event types and parsing
//!
//! Events are decoded generically from each contract's ABI: the engine only
//! relies on the originating transaction, the emitting contract, the event
//! name and the named arguments.

use crate::chain::{ContractHandle, TxId};
use crate::error::{EngineError, EngineResult};

use ethers::abi::{RawLog, Token};
use ethers::types::{Address, Log, H256, U256};
use std::collections::HashMap;
use tracing::debug;

/// Name given to logs whose topic is not in the contract ABI
pub const UNKNOWN_EVENT: &str = "unknown";

/// One named event argument, in declaration order
#[derive(Debug, Clone, PartialEq)]
pub struct EventArg {
    pub name: String,
    pub value: Token,
}

/// An event delivered by the chain, in delivery order
#[derive(Debug, Clone, PartialEq)]
pub struct ChainEvent {
    /// Transaction that emitted the event
    pub origin_tx: TxId,
    pub contract: Address,
    pub name: String,
    pub args: Vec<EventArg>,
    pub block_number: u64,
    pub log_index: u64,
}

impl ChainEvent {
    pub fn arg(&self, name: &str) -> Option<&Token> {
        self.args.iter().find(|a| a.name == name).map(|a| &a.value)
    }

    pub fn uint_arg(&self, name: &str) -> Option<U256> {
        match self.arg(name)? {
            Token::Uint(v) | Token::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn address_arg(&self, name: &str) -> Option<Address> {
        match self.arg(name)? {
            Token::Address(a) => Some(*a),
            _ => None,
        }
    }

    /// Positional access, for events whose argument names vary by contract version
    pub fn arg_at(&self, index: usize) -> Option<&Token> {
        self.args.get(index).map(|a| &a.value)
    }

    pub fn is_from(&self, contract: Address) -> bool {
        self.contract == contract
    }
}

/// Decodes raw logs into `ChainEvent`s using the ABIs of the watched contracts
pub struct EventParser {
    contracts: HashMap<Address, ContractHandle>,
}

impl EventParser {
    pub fn new(contracts: &[ContractHandle]) -> Self {
        Self {
            contracts: contracts
                .iter()
                .map(|c| (c.address(), c.clone()))
                .collect(),
        }
    }

    /// Parse a log entry into a ChainEvent
    pub fn parse_log(&self, log: &Log) -> EngineResult<ChainEvent> {
        let origin_tx = log.transaction_hash.ok_or_else(|| {
            EngineError::EventDecoding(format!(
                "log from {:?} has no transaction hash (pending block?)",
                log.address
            ))
        })?;
        let block_number = log.block_number.map(|b| b.as_u64()).unwrap_or(0);
        let log_index = log.log_index.map(|i| i.as_u64()).unwrap_or(0);

        let contract = self.contracts.get(&log.address).ok_or_else(|| {
            EngineError::EventDecoding(format!("log from unwatched contract {:?}", log.address))
        })?;

        let topic = log.topics.first().copied().unwrap_or_default();
        let (name, args) = match Self::decode(contract, topic, log)? {
            Some(decoded) => decoded,
            None => {
                debug!(
                    "Unrecognised topic {:?} from {}",
                    topic,
                    contract.describe()
                );
                (UNKNOWN_EVENT.to_string(), Vec::new())
            }
        };

        Ok(ChainEvent {
            origin_tx,
            contract: log.address,
            name,
            args,
            block_number,
            log_index,
        })
    }

    fn decode(
        contract: &ContractHandle,
        topic: H256,
        log: &Log,
    ) -> EngineResult<Option<(String, Vec<EventArg>)>> {
        let Some(event) = contract.abi().events().find(|e| e.signature() == topic) else {
            return Ok(None);
        };

        let raw = RawLog {
            topics: log.topics.clone(),
            data: log.data.to_vec(),
        };
        let parsed = event.parse_log(raw).map_err(|e| {
            EngineError::EventDecoding(format!(
                "{} from {}: {}",
                event.name,
                contract.describe(),
                e
            ))
        })?;

        let args = parsed
            .params
            .into_iter()
            .map(|p| EventArg {
                name: p.name,
                value: p.value,
            })
            .collect();
        Ok(Some((event.name.clone(), args)))
    }
}
