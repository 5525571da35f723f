//! Event matching rules for correlated calls

use crate::chain::ContractHandle;
use crate::events::ChainEvent;

use ethers::types::{Address, U256};

/// Shape of an event that resolves a call. Empty fields match anything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventPattern {
    pub contract: Option<Address>,
    pub name: Option<String>,
    pub uint_args: Vec<(String, U256)>,
}

impl EventPattern {
    /// Any event of the transaction
    pub fn any() -> Self {
        Self::default()
    }

    pub fn named(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Self::default()
        }
    }

    pub fn from_contract(mut self, contract: Address) -> Self {
        self.contract = Some(contract);
        self
    }

    /// Require a uint argument, e.g. the agreement id an event refers to
    pub fn with_uint(mut self, arg: &str, value: U256) -> Self {
        self.uint_args.push((arg.to_string(), value));
        self
    }

    pub fn matches(&self, event: &ChainEvent) -> bool {
        self.contract.map_or(true, |c| event.contract == c)
            && self.name.as_deref().map_or(true, |n| event.name == n)
            && self
                .uint_args
                .iter()
                .all(|(arg, value)| event.uint_arg(arg) == Some(*value))
    }
}

/// Which events a correlated call waits for, and which contracts besides
/// the called one it listens to.
///
/// Matching only ever considers events whose origin is the submitted
/// transaction; the matcher narrows those further.
#[derive(Debug, Clone)]
pub struct EventMatcher {
    required: Vec<EventPattern>,
    watched: Vec<ContractHandle>,
}

impl EventMatcher {
    /// Resolve on the first event of the transaction
    pub fn any_event() -> Self {
        Self {
            required: vec![EventPattern::any()],
            watched: Vec::new(),
        }
    }

    /// Resolve only once every required pattern has been seen
    pub fn requiring(patterns: Vec<EventPattern>) -> Self {
        Self {
            required: patterns,
            watched: Vec::new(),
        }
    }

    pub fn require(mut self, pattern: EventPattern) -> Self {
        self.required.push(pattern);
        self
    }

    /// Also subscribe to events emitted by `contract`, e.g. token transfers
    /// caused by an engine call
    pub fn watch(mut self, contract: ContractHandle) -> Self {
        self.watched.push(contract);
        self
    }

    pub fn watched(&self) -> &[ContractHandle] {
        &self.watched
    }

    pub fn required(&self) -> &[EventPattern] {
        &self.required
    }

    /// True once each required pattern matches at least one collected event
    pub fn is_satisfied(&self, events: &[ChainEvent]) -> bool {
        self.required
            .iter()
            .all(|pattern| events.iter().any(|e| pattern.matches(e)))
    }
}
