//! Agreement identifiers and terms

use crate::token::TokenHandle;

use ethers::abi::Token;
use ethers::types::{Address, U256};
use serde::Serialize;
use std::fmt;

/// Id of an instrument created by the engine's contract-creation entry point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ContractId(pub U256);

/// Id the engine assigns when a contract is registered into an agreement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct AgreementId(pub U256);

impl fmt::Display for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for AgreementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for AgreementId {
    fn from(id: u64) -> Self {
        AgreementId(U256::from(id))
    }
}

impl From<u64> for ContractId {
    fn from(id: u64) -> Self {
        ContractId(U256::from(id))
    }
}

/// Terms of an FX forward between two labelled parties
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FxForwardTerms {
    pub party_a: String,
    pub party_b: String,
    pub base: String,
    pub quote: String,
    /// Unix timestamp, seconds
    pub maturity: u64,
    pub notional: U256,
    pub tenor: U256,
}

impl FxForwardTerms {
    pub(crate) fn to_tokens(&self) -> Vec<Token> {
        vec![
            Token::String(self.party_a.clone()),
            Token::String(self.party_b.clone()),
            Token::String(self.base.clone()),
            Token::String(self.quote.clone()),
            Token::Uint(U256::from(self.maturity)),
            Token::Uint(self.notional),
            Token::Uint(self.tenor),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Counterparty {
    pub label: String,
    pub address: Address,
}

impl Counterparty {
    pub fn new(label: &str, address: Address) -> Self {
        Self {
            label: label.to_string(),
            address,
        }
    }
}

/// Everything `register` binds together under one agreement
#[derive(Clone)]
pub struct Registration {
    pub contract_id: ContractId,
    pub party_a: Counterparty,
    pub party_b: Counterparty,
    pub base: TokenHandle,
    pub quote: TokenHandle,
    pub feed_label: String,
    pub feed: Address,
}

impl Registration {
    pub(crate) fn to_tokens(&self) -> Vec<Token> {
        vec![
            Token::Uint(self.contract_id.0),
            Token::String(self.party_a.label.clone()),
            Token::Address(self.party_a.address),
            Token::String(self.party_b.label.clone()),
            Token::Address(self.party_b.address),
            Token::String(self.base.symbol().to_string()),
            Token::Address(self.base.address()),
            Token::String(self.quote.symbol().to_string()),
            Token::Address(self.quote.address()),
            Token::String(self.feed_label.clone()),
            Token::Address(self.feed),
        ]
    }

    pub fn tokens(&self) -> [&TokenHandle; 2] {
        [&self.base, &self.quote]
    }

    pub fn parties(&self) -> [&Counterparty; 2] {
        [&self.party_a, &self.party_b]
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("contract_id", &self.contract_id)
            .field("party_a", &self.party_a)
            .field("party_b", &self.party_b)
            .field("base", &self.base.symbol())
            .field("quote", &self.quote.symbol())
            .field("feed", &self.feed)
            .finish()
    }
}

/// Settlement status the engine keeps for each agreement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RecordStatus {
    Open,
    Executed,
    Killed,
}

/// An agreement as stored by the engine's `agreements` view
#[derive(Debug, Clone, PartialEq)]
pub struct AgreementRecord {
    pub contract_id: ContractId,
    pub party_a: Counterparty,
    pub party_b: Counterparty,
    /// Symbol and token address of each currency leg
    pub base: (String, Address),
    pub quote: (String, Address),
    pub feed_label: String,
    pub feed: Address,
    pub signed_a: bool,
    pub signed_b: bool,
    pub status: RecordStatus,
}

impl AgreementRecord {
    /// Decode the view's outputs: the `register` arguments followed by both
    /// signature flags and the status code
    pub(crate) fn from_tokens(output: Vec<Token>) -> Result<Self, String> {
        let outputs: [Token; 14] = output
            .try_into()
            .map_err(|o: Vec<Token>| format!("expected 14 outputs, got {}", o.len()))?;
        let [contract_id, name_a, party_a, name_b, party_b, ccy_a, token_a, ccy_b, token_b, feed_name, feed, signed_a, signed_b, status] =
            outputs;

        let uint = |t: Token, what: &str| {
            t.into_uint()
                .ok_or_else(|| format!("{} is not a uint", what))
        };
        let string = |t: Token, what: &str| {
            t.into_string()
                .ok_or_else(|| format!("{} is not a string", what))
        };
        let address = |t: Token, what: &str| {
            t.into_address()
                .ok_or_else(|| format!("{} is not an address", what))
        };
        let boolean = |t: Token, what: &str| {
            t.into_bool()
                .ok_or_else(|| format!("{} is not a bool", what))
        };

        let status = match uint(status, "status")?.low_u64() {
            0 => RecordStatus::Open,
            1 => RecordStatus::Executed,
            2 => RecordStatus::Killed,
            other => return Err(format!("unknown status code {}", other)),
        };
        let party_a = Counterparty {
            label: string(name_a, "nameA")?,
            address: address(party_a, "partyA")?,
        };
        if party_a.address.is_zero() {
            return Err("no such agreement".to_string());
        }

        Ok(Self {
            contract_id: ContractId(uint(contract_id, "contractId")?),
            party_a,
            party_b: Counterparty {
                label: string(name_b, "nameB")?,
                address: address(party_b, "partyB")?,
            },
            base: (string(ccy_a, "ccyA")?, address(token_a, "tokenA")?),
            quote: (string(ccy_b, "ccyB")?, address(token_b, "tokenB")?),
            feed_label: string(feed_name, "feedName")?,
            feed: address(feed, "feed")?,
            signed_a: boolean(signed_a, "signedA")?,
            signed_b: boolean(signed_b, "signedB")?,
            status,
        })
    }
}
