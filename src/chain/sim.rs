//! In-memory ledger for tests
//!
//! Implements the engine, currency token and feed contracts directly in Rust
//! and serves them through `ChainClient`. Transactions are either mined on
//! submission (rejections then surface as submission errors, like a node's
//! gas estimation) or queued until a test mines them in a chosen order.

use super::{
    BlockRef, ChainClient, ContractHandle, DeploymentStatus, EventFilter, EventSubscription,
    PendingDeployment, TxHandle, TxId, TxStatus,
};
use crate::artifacts::{ContractArtifact, ContractSource};
use crate::error::{EngineError, EngineResult};
use crate::events::{ChainEvent, EventArg};

use async_trait::async_trait;
use ethers::abi::{Abi, Token};
use ethers::types::{Address, Bytes, H256, U256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

pub(crate) const ENGINE: &str = "ContractEngine";
pub(crate) const TOKEN: &str = "CurrencyToken";
pub(crate) const FEED: &str = "SimpleFeed";

pub(crate) const ENGINE_ABI: &str = r#"[
  {"type":"function","name":"fxForwardContract","stateMutability":"nonpayable","outputs":[],"inputs":[
    {"name":"partyA","type":"string"},{"name":"partyB","type":"string"},
    {"name":"base","type":"string"},{"name":"quote","type":"string"},
    {"name":"maturity","type":"uint256"},{"name":"notional","type":"uint256"},
    {"name":"tenor","type":"uint256"}]},
  {"type":"function","name":"register","stateMutability":"nonpayable","outputs":[],"inputs":[
    {"name":"contractId","type":"uint256"},
    {"name":"nameA","type":"string"},{"name":"partyA","type":"address"},
    {"name":"nameB","type":"string"},{"name":"partyB","type":"address"},
    {"name":"ccyA","type":"string"},{"name":"tokenA","type":"address"},
    {"name":"ccyB","type":"string"},{"name":"tokenB","type":"address"},
    {"name":"feedName","type":"string"},{"name":"feed","type":"address"}]},
  {"type":"function","name":"sign","stateMutability":"nonpayable","outputs":[],"inputs":[
    {"name":"agreementId","type":"uint256"}]},
  {"type":"function","name":"execute","stateMutability":"nonpayable","outputs":[],"inputs":[
    {"name":"agreementId","type":"uint256"}]},
  {"type":"function","name":"evaluate","stateMutability":"nonpayable","outputs":[],"inputs":[
    {"name":"agreementId","type":"uint256"}]},
  {"type":"function","name":"kill","stateMutability":"nonpayable","outputs":[],"inputs":[
    {"name":"agreementId","type":"uint256"}]},
  {"type":"function","name":"agreements","stateMutability":"view","inputs":[
    {"name":"agreementId","type":"uint256"}],"outputs":[
    {"name":"contractId","type":"uint256"},
    {"name":"nameA","type":"string"},{"name":"partyA","type":"address"},
    {"name":"nameB","type":"string"},{"name":"partyB","type":"address"},
    {"name":"ccyA","type":"string"},{"name":"tokenA","type":"address"},
    {"name":"ccyB","type":"string"},{"name":"tokenB","type":"address"},
    {"name":"feedName","type":"string"},{"name":"feed","type":"address"},
    {"name":"signedA","type":"bool"},{"name":"signedB","type":"bool"},
    {"name":"status","type":"uint8"}]},
  {"type":"event","name":"ContractCreated","anonymous":false,"inputs":[
    {"name":"contractId","type":"uint256","indexed":false}]},
  {"type":"event","name":"AgreementRegistered","anonymous":false,"inputs":[
    {"name":"agreementId","type":"uint256","indexed":false},
    {"name":"contractId","type":"uint256","indexed":false}]},
  {"type":"event","name":"AgreementSigned","anonymous":false,"inputs":[
    {"name":"agreementId","type":"uint256","indexed":false},
    {"name":"party","type":"address","indexed":false}]},
  {"type":"event","name":"AgreementExecuted","anonymous":false,"inputs":[
    {"name":"agreementId","type":"uint256","indexed":false}]},
  {"type":"event","name":"AgreementKilled","anonymous":false,"inputs":[
    {"name":"agreementId","type":"uint256","indexed":false}]}
]"#;

pub(crate) const TOKEN_ABI: &str = r#"[
  {"type":"constructor","stateMutability":"nonpayable","inputs":[{"name":"name","type":"string"}]},
  {"type":"function","name":"name","stateMutability":"view","inputs":[],
   "outputs":[{"name":"","type":"string"}]},
  {"type":"function","name":"balanceOf","stateMutability":"view",
   "inputs":[{"name":"owner","type":"address"}],"outputs":[{"name":"","type":"uint256"}]},
  {"type":"function","name":"permissions","stateMutability":"view",
   "inputs":[{"name":"owner","type":"address"},{"name":"spender","type":"address"}],
   "outputs":[{"name":"","type":"bool"}]},
  {"type":"function","name":"permit","stateMutability":"nonpayable","outputs":[],
   "inputs":[{"name":"spender","type":"address"},{"name":"authorized","type":"bool"}]},
  {"type":"function","name":"endow","stateMutability":"nonpayable","outputs":[],
   "inputs":[{"name":"recipient","type":"address"},{"name":"amount","type":"uint256"}]},
  {"type":"function","name":"transferFrom","stateMutability":"nonpayable",
   "inputs":[{"name":"from","type":"address"},{"name":"to","type":"address"},
             {"name":"value","type":"uint256"}],
   "outputs":[{"name":"","type":"bool"}]},
  {"type":"event","name":"Transfer","anonymous":false,"inputs":[
    {"name":"from","type":"address","indexed":true},
    {"name":"to","type":"address","indexed":true},
    {"name":"value","type":"uint256","indexed":false}]},
  {"type":"event","name":"Permission","anonymous":false,"inputs":[
    {"name":"owner","type":"address","indexed":true},
    {"name":"spender","type":"address","indexed":true},
    {"name":"authorized","type":"bool","indexed":false}]},
  {"type":"event","name":"Endowment","anonymous":false,"inputs":[
    {"name":"recipient","type":"address","indexed":true},
    {"name":"amount","type":"uint256","indexed":false}]}
]"#;

pub(crate) const FEED_ABI: &str = r#"[
  {"type":"function","name":"set","stateMutability":"nonpayable","outputs":[],
   "inputs":[{"name":"key","type":"bytes32"},{"name":"value","type":"uint256"}]},
  {"type":"function","name":"get","stateMutability":"view",
   "inputs":[{"name":"key","type":"bytes32"}],"outputs":[{"name":"","type":"uint256"}]}
]"#;

pub(crate) fn master() -> Address {
    Address::from_low_u64_be(0xa0)
}

pub(crate) fn party_a() -> Address {
    Address::from_low_u64_be(0xa1)
}

pub(crate) fn party_b() -> Address {
    Address::from_low_u64_be(0xa2)
}

pub(crate) fn outsider() -> Address {
    Address::from_low_u64_be(0xa9)
}

/// Artifacts for the simulated contracts
pub(crate) struct SimArtifacts;

impl ContractSource for SimArtifacts {
    fn abi(&self, name: &str) -> EngineResult<Arc<Abi>> {
        let raw = match name {
            ENGINE => ENGINE_ABI,
            TOKEN => TOKEN_ABI,
            FEED => FEED_ABI,
            other => {
                return Err(EngineError::Artifact {
                    name: other.to_string(),
                    message: "no such simulated contract".to_string(),
                })
            }
        };
        let abi: Abi = serde_json::from_str(raw).map_err(|e| EngineError::Artifact {
            name: name.to_string(),
            message: e.to_string(),
        })?;
        Ok(Arc::new(abi))
    }

    fn bytecode(&self, _name: &str) -> EngineResult<Bytes> {
        Ok(Bytes::from(vec![0x60, 0x60, 0x60, 0x40]))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum RowStatus {
    Open,
    Executed,
    Killed,
}

#[derive(Debug, Clone)]
struct AgreementRow {
    /// Arguments of the `register` call, in order
    registered_with: Vec<Token>,
    party_a: Address,
    party_b: Address,
    token_a: Address,
    signed_a: bool,
    signed_b: bool,
    notional: U256,
    status: RowStatus,
}

#[derive(Default)]
struct EngineState {
    forwards: HashMap<U256, U256>,
    agreements: Vec<AgreementRow>,
}

struct TokenState {
    name: String,
    deployer: Address,
    balances: HashMap<Address, U256>,
    permissions: HashMap<(Address, Address), bool>,
}

#[derive(Default)]
struct FeedState {
    values: HashMap<H256, U256>,
}

#[derive(Clone, Copy)]
enum Kind {
    Engine,
    Token,
    Feed,
    Missing,
}

enum SimContract {
    Engine(EngineState),
    Token(TokenState),
    Feed(FeedState),
}

struct SimDeployment {
    artifact: String,
    creator: Address,
    args: Vec<Token>,
    polls_left: Option<u32>,
    address: Option<Address>,
}

struct Subscriber {
    filter: EventFilter,
    sender: mpsc::Sender<ChainEvent>,
}

/// Event produced by executing a transaction, before it is placed in a block
struct Emitted {
    contract: Address,
    name: &'static str,
    args: Vec<(&'static str, Token)>,
}

struct SimState {
    block: u64,
    timestamp: u64,
    next_tx: u64,
    next_address: u64,
    next_contract_id: u64,
    auto_mine: bool,
    deploy_latency: Option<u32>,
    fail_deploys: bool,
    rejections: HashMap<String, String>,
    contracts: HashMap<Address, SimContract>,
    deployments: HashMap<TxId, SimDeployment>,
    queue: Vec<TxHandle>,
    receipts: HashMap<TxId, TxStatus>,
    history: Vec<ChainEvent>,
    subscribers: Vec<Subscriber>,
    subscriptions_opened: usize,
}

pub(crate) struct SimChain {
    state: Mutex<SimState>,
}

fn uint(args: &[Token], i: usize) -> Result<U256, String> {
    match args.get(i) {
        Some(Token::Uint(v)) => Ok(*v),
        other => Err(format!("argument {} is not a uint: {:?}", i, other)),
    }
}

fn address(args: &[Token], i: usize) -> Result<Address, String> {
    match args.get(i) {
        Some(Token::Address(a)) => Ok(*a),
        other => Err(format!("argument {} is not an address: {:?}", i, other)),
    }
}

fn boolean(args: &[Token], i: usize) -> Result<bool, String> {
    match args.get(i) {
        Some(Token::Bool(b)) => Ok(*b),
        other => Err(format!("argument {} is not a bool: {:?}", i, other)),
    }
}

fn bytes32(args: &[Token], i: usize) -> Result<H256, String> {
    match args.get(i) {
        Some(Token::FixedBytes(b)) if b.len() == 32 => Ok(H256::from_slice(b)),
        other => Err(format!("argument {} is not bytes32: {:?}", i, other)),
    }
}

impl SimChain {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                block: 100,
                timestamp: 1_700_000_000,
                next_tx: 1,
                next_address: 1,
                next_contract_id: 0,
                auto_mine: true,
                deploy_latency: Some(2),
                fail_deploys: false,
                rejections: HashMap::new(),
                contracts: HashMap::new(),
                deployments: HashMap::new(),
                queue: Vec::new(),
                receipts: HashMap::new(),
                history: Vec::new(),
                subscribers: Vec::new(),
                subscriptions_opened: 0,
            }),
        }
    }

    /// Queue transactions until a test mines them
    pub(crate) fn manual_mining(self) -> Self {
        self.lock().auto_mine = false;
        self
    }

    /// Polls before a deployment gets its address; `None` never mines it
    pub(crate) fn with_deploy_latency(self, polls: Option<u32>) -> Self {
        self.lock().deploy_latency = polls;
        self
    }

    pub(crate) fn failing_deploys(self) -> Self {
        self.lock().fail_deploys = true;
        self
    }

    pub(crate) fn with_next_contract_id(self, id: u64) -> Self {
        self.lock().next_contract_id = id;
        self
    }

    /// Reject every submission of `method` outright
    pub(crate) fn reject(&self, method: &str, reason: &str) {
        self.lock()
            .rejections
            .insert(method.to_string(), reason.to_string());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().expect("sim state poisoned")
    }

    /// Install a contract without going through deployment polling
    pub(crate) fn install(&self, artifact: &str, creator: Address, args: &[Token]) -> ContractHandle {
        let abi = SimArtifacts.abi(artifact).expect("simulated artifact");
        let mut st = self.lock();
        let address = st.create_contract(artifact, creator, args);
        ContractHandle::new(artifact, address, abi)
    }

    /// Credit a token balance directly
    pub(crate) fn mint(&self, token: Address, owner: Address, amount: u64) {
        let mut st = self.lock();
        if let Some(SimContract::Token(t)) = st.contracts.get_mut(&token) {
            *t.balances.entry(owner).or_default() += U256::from(amount);
        }
    }

    pub(crate) fn balance(&self, token: Address, owner: Address) -> U256 {
        match self.lock().contracts.get(&token) {
            Some(SimContract::Token(t)) => t.balances.get(&owner).copied().unwrap_or_default(),
            _ => U256::zero(),
        }
    }

    pub(crate) fn queued(&self) -> Vec<TxHandle> {
        self.lock().queue.clone()
    }

    /// Mine one queued transaction, whatever its queue position
    pub(crate) fn mine(&self, tx: TxId) -> Result<(), String> {
        let mut st = self.lock();
        let pos = st
            .queue
            .iter()
            .position(|q| q.id == tx)
            .ok_or_else(|| format!("{:?} not queued", tx))?;
        let handle = st.queue.remove(pos);
        match st.execute(&handle) {
            Ok(emitted) => {
                st.commit(&handle, emitted);
                Ok(())
            }
            Err(reason) => {
                // Reverted: the block is still produced, without events
                st.block += 1;
                st.timestamp += 15;
                st.receipts.insert(tx, TxStatus::Reverted(reason.clone()));
                Err(reason)
            }
        }
    }

    /// Drop the sending side of every open subscription, as a node does
    /// when its filter expires
    pub(crate) fn end_subscriptions(&self) {
        self.lock().subscribers.clear();
    }

    /// Open subscriptions whose receiver has not been closed or dropped
    pub(crate) fn active_subscriptions(&self) -> usize {
        let mut st = self.lock();
        st.subscribers.retain(|s| !s.sender.is_closed());
        st.subscribers.len()
    }

    pub(crate) fn subscriptions_opened(&self) -> usize {
        self.lock().subscriptions_opened
    }
}

impl SimState {
    fn next_tx_id(&mut self) -> TxId {
        let id = H256::from_low_u64_be(0x7000 + self.next_tx);
        self.next_tx += 1;
        id
    }

    fn create_contract(&mut self, artifact: &str, creator: Address, args: &[Token]) -> Address {
        let address = Address::from_low_u64_be(0x1000 + self.next_address);
        self.next_address += 1;
        let contract = match artifact {
            ENGINE => SimContract::Engine(EngineState::default()),
            TOKEN => SimContract::Token(TokenState {
                name: match args.first() {
                    Some(Token::String(s)) => s.clone(),
                    _ => String::new(),
                },
                deployer: creator,
                balances: HashMap::new(),
                permissions: HashMap::new(),
            }),
            _ => SimContract::Feed(FeedState::default()),
        };
        self.contracts.insert(address, contract);
        address
    }

    fn engine(&mut self, at: Address) -> Result<&mut EngineState, String> {
        match self.contracts.get_mut(&at) {
            Some(SimContract::Engine(e)) => Ok(e),
            _ => Err("not an engine".to_string()),
        }
    }

    fn token(&mut self, at: Address) -> Result<&mut TokenState, String> {
        match self.contracts.get_mut(&at) {
            Some(SimContract::Token(t)) => Ok(t),
            _ => Err(format!("{:?} is not a token", at)),
        }
    }

    /// Validate and apply a transaction; nothing is mutated when it reverts
    fn execute(&mut self, tx: &TxHandle) -> Result<Vec<Emitted>, String> {
        let at = tx.contract;
        let args = &tx.args;
        let kind = match self.contracts.get(&at) {
            Some(SimContract::Engine(_)) => Kind::Engine,
            Some(SimContract::Token(_)) => Kind::Token,
            Some(SimContract::Feed(_)) => Kind::Feed,
            None => Kind::Missing,
        };
        match (kind, tx.method.as_str()) {
            (Kind::Engine, "fxForwardContract") => {
                let notional = uint(args, 5)?;
                let id = U256::from(self.next_contract_id);
                self.next_contract_id += 1;
                self.engine(at)?.forwards.insert(id, notional);
                Ok(vec![Emitted {
                    contract: at,
                    name: "ContractCreated",
                    args: vec![("contractId", Token::Uint(id))],
                }])
            }
            (Kind::Engine, "register") => {
                let contract_id = uint(args, 0)?;
                let party_a = address(args, 2)?;
                let party_b = address(args, 4)?;
                let token_a = address(args, 6)?;
                let engine = self.engine(at)?;
                let notional = *engine
                    .forwards
                    .get(&contract_id)
                    .ok_or_else(|| format!("unknown contract id {}", contract_id))?;
                let id = U256::from(engine.agreements.len());
                engine.agreements.push(AgreementRow {
                    registered_with: args.to_vec(),
                    party_a,
                    party_b,
                    token_a,
                    signed_a: false,
                    signed_b: false,
                    notional,
                    status: RowStatus::Open,
                });
                Ok(vec![Emitted {
                    contract: at,
                    name: "AgreementRegistered",
                    args: vec![
                        ("agreementId", Token::Uint(id)),
                        ("contractId", Token::Uint(contract_id)),
                    ],
                }])
            }
            (Kind::Engine, "sign") => {
                let id = uint(args, 0)?;
                let sender = tx.submitter;
                let row = self.open_row(at, id)?;
                if sender == row.party_a {
                    row.signed_a = true;
                } else if sender == row.party_b {
                    row.signed_b = true;
                } else {
                    return Err("sender is not a party".to_string());
                }
                Ok(vec![Emitted {
                    contract: at,
                    name: "AgreementSigned",
                    args: vec![("agreementId", Token::Uint(id)), ("party", Token::Address(sender))],
                }])
            }
            (Kind::Engine, "execute" | "evaluate") => {
                let id = uint(args, 0)?;
                let row = self.open_row(at, id)?.clone();
                if !(row.signed_a && row.signed_b) {
                    return Err("agreement not fully signed".to_string());
                }
                let token = self.token(row.token_a)?;
                if !token
                    .permissions
                    .get(&(row.party_a, at))
                    .copied()
                    .unwrap_or(false)
                {
                    return Err("engine not permitted".to_string());
                }
                let balance = token.balances.get(&row.party_a).copied().unwrap_or_default();
                if balance < row.notional {
                    return Err("insufficient balance".to_string());
                }
                token.balances.insert(row.party_a, balance - row.notional);
                *token.balances.entry(row.party_b).or_default() += row.notional;
                self.open_row(at, id)?.status = RowStatus::Executed;
                Ok(vec![
                    Emitted {
                        contract: row.token_a,
                        name: "Transfer",
                        args: vec![
                            ("from", Token::Address(row.party_a)),
                            ("to", Token::Address(row.party_b)),
                            ("value", Token::Uint(row.notional)),
                        ],
                    },
                    Emitted {
                        contract: at,
                        name: "AgreementExecuted",
                        args: vec![("agreementId", Token::Uint(id))],
                    },
                ])
            }
            (Kind::Engine, "kill") => {
                let id = uint(args, 0)?;
                let sender = tx.submitter;
                let row = self.open_row(at, id)?;
                if sender != row.party_a && sender != row.party_b {
                    return Err("sender is not a party".to_string());
                }
                row.status = RowStatus::Killed;
                Ok(vec![Emitted {
                    contract: at,
                    name: "AgreementKilled",
                    args: vec![("agreementId", Token::Uint(id))],
                }])
            }
            (Kind::Token, "permit") => {
                let spender = address(args, 0)?;
                let authorized = boolean(args, 1)?;
                let owner = tx.submitter;
                self.token(at)?
                    .permissions
                    .insert((owner, spender), authorized);
                Ok(vec![Emitted {
                    contract: at,
                    name: "Permission",
                    args: vec![
                        ("owner", Token::Address(owner)),
                        ("spender", Token::Address(spender)),
                        ("authorized", Token::Bool(authorized)),
                    ],
                }])
            }
            (Kind::Token, "endow") => {
                let recipient = address(args, 0)?;
                let amount = uint(args, 1)?;
                let token = self.token(at)?;
                if tx.submitter != token.deployer {
                    return Err("only the deployer may endow".to_string());
                }
                *token.balances.entry(recipient).or_default() += amount;
                Ok(vec![Emitted {
                    contract: at,
                    name: "Endowment",
                    args: vec![("recipient", Token::Address(recipient)), ("amount", Token::Uint(amount))],
                }])
            }
            (Kind::Token, "transferFrom") => {
                let from = address(args, 0)?;
                let to = address(args, 1)?;
                let value = uint(args, 2)?;
                let sender = tx.submitter;
                let token = self.token(at)?;
                let allowed = sender == from
                    || token.permissions.get(&(from, sender)).copied().unwrap_or(false);
                if !allowed {
                    return Err("transfer not permitted".to_string());
                }
                let balance = token.balances.get(&from).copied().unwrap_or_default();
                if balance < value {
                    return Err("insufficient balance".to_string());
                }
                token.balances.insert(from, balance - value);
                *token.balances.entry(to).or_default() += value;
                Ok(vec![Emitted {
                    contract: at,
                    name: "Transfer",
                    args: vec![
                        ("from", Token::Address(from)),
                        ("to", Token::Address(to)),
                        ("value", Token::Uint(value)),
                    ],
                }])
            }
            (Kind::Feed, "set") => {
                let key = bytes32(args, 0)?;
                let value = uint(args, 1)?;
                if let Some(SimContract::Feed(feed)) = self.contracts.get_mut(&at) {
                    feed.values.insert(key, value);
                }
                Ok(Vec::new())
            }
            (Kind::Missing, _) => Err(format!("no contract at {:?}", at)),
            (_, method) => Err(format!("method {} not simulated", method)),
        }
    }

    fn open_row(&mut self, at: Address, id: U256) -> Result<&mut AgreementRow, String> {
        let engine = self.engine(at)?;
        let row = engine
            .agreements
            .get_mut(id.as_usize())
            .ok_or_else(|| format!("unknown agreement {}", id))?;
        match row.status {
            RowStatus::Open => Ok(row),
            RowStatus::Executed => Err("agreement already executed".to_string()),
            RowStatus::Killed => Err("agreement killed".to_string()),
        }
    }

    /// Place the transaction in a new block and deliver its events
    fn commit(&mut self, tx: &TxHandle, emitted: Vec<Emitted>) {
        self.block += 1;
        self.timestamp += 15;
        self.receipts.insert(tx.id, TxStatus::Succeeded);
        let events: Vec<ChainEvent> = emitted
            .into_iter()
            .enumerate()
            .map(|(i, e)| ChainEvent {
                origin_tx: tx.id,
                contract: e.contract,
                name: e.name.to_string(),
                args: e
                    .args
                    .into_iter()
                    .map(|(name, value)| EventArg {
                        name: name.to_string(),
                        value,
                    })
                    .collect(),
                block_number: self.block,
                log_index: i as u64,
            })
            .collect();

        self.subscribers.retain(|s| !s.sender.is_closed());
        for event in &events {
            for sub in &self.subscribers {
                if sub.filter.covers(event.contract, event.block_number) {
                    let _ = sub.sender.try_send(event.clone());
                }
            }
        }
        self.history.extend(events);
    }

    fn view(&self, at: Address, method: &str, args: &[Token]) -> Result<Vec<Token>, String> {
        match (self.contracts.get(&at), method) {
            (Some(SimContract::Token(t)), "name") => Ok(vec![Token::String(t.name.clone())]),
            (Some(SimContract::Token(t)), "balanceOf") => {
                let owner = address(args, 0)?;
                Ok(vec![Token::Uint(
                    t.balances.get(&owner).copied().unwrap_or_default(),
                )])
            }
            (Some(SimContract::Token(t)), "permissions") => {
                let owner = address(args, 0)?;
                let spender = address(args, 1)?;
                Ok(vec![Token::Bool(
                    t.permissions.get(&(owner, spender)).copied().unwrap_or(false),
                )])
            }
            (Some(SimContract::Engine(e)), "agreements") => {
                let id = uint(args, 0)?;
                let row = e
                    .agreements
                    .get(id.as_usize())
                    .ok_or_else(|| format!("unknown agreement {}", id))?;
                let status = match row.status {
                    RowStatus::Open => 0u8,
                    RowStatus::Executed => 1,
                    RowStatus::Killed => 2,
                };
                let mut output = row.registered_with.clone();
                output.extend([
                    Token::Bool(row.signed_a),
                    Token::Bool(row.signed_b),
                    Token::Uint(U256::from(status)),
                ]);
                Ok(output)
            }
            (Some(SimContract::Feed(f)), "get") => {
                let key = bytes32(args, 0)?;
                Ok(vec![Token::Uint(f.values.get(&key).copied().unwrap_or_default())])
            }
            _ => Err(format!("{} is not a simulated view", method)),
        }
    }
}

#[async_trait]
impl ChainClient for SimChain {
    async fn latest_block(&self) -> EngineResult<BlockRef> {
        let st = self.lock();
        Ok(BlockRef {
            number: st.block,
            timestamp: st.timestamp,
        })
    }

    async fn deploy(
        &self,
        artifact: &ContractArtifact,
        constructor_args: &[Token],
        sender: Address,
        _gas_limit: U256,
    ) -> EngineResult<PendingDeployment> {
        let mut st = self.lock();
        if st.fail_deploys {
            return Err(EngineError::Submission {
                target: artifact.name.clone(),
                operation: "deploy".to_string(),
                reason: "sender account locked".to_string(),
            });
        }
        let id = st.next_tx_id();
        let polls_left = st.deploy_latency;
        st.deployments.insert(
            id,
            SimDeployment {
                artifact: artifact.name.clone(),
                creator: sender,
                args: constructor_args.to_vec(),
                polls_left,
                address: None,
            },
        );
        Ok(PendingDeployment {
            artifact: artifact.name.clone(),
            submitted_tx: id,
            resolved_address: None,
        })
    }

    async fn poll_deployment(&self, pending: &PendingDeployment) -> EngineResult<DeploymentStatus> {
        let mut st = self.lock();
        let Some(deployment) = st.deployments.get_mut(&pending.submitted_tx) else {
            return Ok(DeploymentStatus::Failed("unknown creation tx".to_string()));
        };
        if let Some(address) = deployment.address {
            return Ok(DeploymentStatus::Deployed(address));
        }
        let polls_left = deployment.polls_left;
        match polls_left {
            None => Ok(DeploymentStatus::Pending),
            Some(n) if n > 0 => {
                deployment.polls_left = Some(n - 1);
                Ok(DeploymentStatus::Pending)
            }
            Some(_) => {
                let artifact = deployment.artifact.clone();
                let creator = deployment.creator;
                let args = deployment.args.clone();
                let address = st.create_contract(&artifact, creator, &args);
                st.block += 1;
                if let Some(d) = st.deployments.get_mut(&pending.submitted_tx) {
                    d.address = Some(address);
                }
                Ok(DeploymentStatus::Deployed(address))
            }
        }
    }

    async fn call(
        &self,
        contract: &ContractHandle,
        method: &str,
        args: &[Token],
        sender: Address,
        _gas_limit: U256,
    ) -> EngineResult<TxHandle> {
        contract.function(method)?;
        let mut st = self.lock();
        let rejection = |reason: String| EngineError::Submission {
            target: contract.describe(),
            operation: method.to_string(),
            reason,
        };
        if let Some(reason) = st.rejections.get(method) {
            return Err(rejection(reason.clone()));
        }
        if !st.contracts.contains_key(&contract.address()) {
            return Err(rejection("no code at address".to_string()));
        }

        let handle = TxHandle {
            id: st.next_tx_id(),
            submitter: sender,
            contract: contract.address(),
            method: method.to_string(),
            args: args.to_vec(),
        };
        if st.auto_mine {
            let emitted = st.execute(&handle).map_err(rejection)?;
            st.commit(&handle, emitted);
        } else {
            st.queue.push(handle.clone());
        }
        Ok(handle)
    }

    async fn tx_status(&self, tx: TxId) -> EngineResult<TxStatus> {
        Ok(self
            .lock()
            .receipts
            .get(&tx)
            .cloned()
            .unwrap_or(TxStatus::Pending))
    }

    async fn subscribe_events(&self, filter: EventFilter) -> EngineResult<EventSubscription> {
        let (sender, subscription) = EventSubscription::channel(1024);
        let mut st = self.lock();
        st.subscriptions_opened += 1;
        for event in st
            .history
            .iter()
            .filter(|e| filter.covers(e.contract, e.block_number))
        {
            let _ = sender.try_send(event.clone());
        }
        let exhausted = filter.to_block.is_some_and(|to| to <= st.block);
        if !exhausted {
            st.subscribers.push(Subscriber { filter, sender });
        }
        Ok(subscription)
    }

    async fn read_only_call(
        &self,
        contract: &ContractHandle,
        method: &str,
        args: &[Token],
    ) -> EngineResult<Vec<Token>> {
        contract.function(method)?;
        self.lock()
            .view(contract.address(), method, args)
            .map_err(|message| EngineError::Abi {
                target: contract.describe(),
                operation: method.to_string(),
                message,
            })
    }
}
