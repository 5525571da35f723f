//! Coordinator driving agreements through the engine contract

use super::lifecycle::{AgreementLifecycle, AgreementState, Party, SignCheck};
use super::terms::{AgreementId, AgreementRecord, ContractId, FxForwardTerms, Registration};
use crate::chain::{ContractHandle, TxHandle};
use crate::correlation::{
    CallRequest, CancelToken, Correlated, EventMatcher, EventPattern, TransactionCorrelator,
};
use crate::error::{EngineError, EngineResult};
use crate::events::ChainEvent;
use crate::token::TokenHandle;

use ethers::abi::Token;
use ethers::types::{Address, U256};
use tracing::{info, warn};

/// Event argument carrying the id assigned by `fxForwardContract`
pub const CONTRACT_ID_ARG: &str = "contractId";
/// Event argument carrying the id assigned by `register`
pub const AGREEMENT_ID_ARG: &str = "agreementId";
/// Token event emitted for every balance movement
pub const TRANSFER_EVENT: &str = "Transfer";

/// A token movement observed while settling an agreement
#[derive(Debug, Clone, PartialEq)]
pub struct TokenTransfer {
    pub symbol: String,
    pub token: Address,
    pub from: Address,
    pub to: Address,
    pub value: U256,
}

/// Outcome of a settled agreement
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub tx: TxHandle,
    pub transfers: Vec<TokenTransfer>,
    pub events: Vec<ChainEvent>,
}

/// The deployed engine contract
#[derive(Clone)]
pub struct AgreementEngine {
    contract: ContractHandle,
    correlator: TransactionCorrelator,
    gas_limit: U256,
}

impl AgreementEngine {
    pub fn new(contract: ContractHandle, correlator: TransactionCorrelator, gas_limit: U256) -> Self {
        Self {
            contract,
            correlator,
            gas_limit,
        }
    }

    pub fn contract(&self) -> &ContractHandle {
        &self.contract
    }

    pub fn address(&self) -> Address {
        self.contract.address()
    }

    async fn submit(
        &self,
        method: &str,
        args: Vec<Token>,
        sender: Address,
        matcher: EventMatcher,
    ) -> EngineResult<Correlated> {
        let request = CallRequest::new(&self.contract, method, args, sender, self.gas_limit);
        self.correlator
            .submit_and_await(request, matcher, &CancelToken::never())
            .await
    }

    fn own_event(&self) -> EventPattern {
        EventPattern::any().from_contract(self.address())
    }

    fn assigned_id(correlated: &Correlated, arg: &str) -> Option<U256> {
        correlated.events.iter().find_map(|e| e.uint_arg(arg))
    }

    /// Create an FX forward instrument; the chain assigns its id
    pub async fn create_fx_forward(
        &self,
        terms: &FxForwardTerms,
        sender: Address,
    ) -> EngineResult<ContractId> {
        let target = format!("fx forward {}/{}", terms.base, terms.quote);
        let correlated = self
            .submit(
                "fxForwardContract",
                terms.to_tokens(),
                sender,
                EventMatcher::requiring(vec![self.own_event()]),
            )
            .await
            .map_err(|e| e.with_target(target.clone()))?;

        let id = Self::assigned_id(&correlated, CONTRACT_ID_ARG).ok_or_else(|| {
            EngineError::EventDecoding(format!(
                "{}: no {} in events of {:?}",
                target, CONTRACT_ID_ARG, correlated.tx.id
            ))
        })?;
        info!(
            "Created {} {} between {} and {} as contract {}",
            terms.base, terms.quote, terms.party_a, terms.party_b, id
        );
        Ok(ContractId(id))
    }

    /// Register an existing contract id into a new agreement.
    ///
    /// Fails with the chain's rejection when the contract id was never
    /// created; nothing is recorded in that case.
    pub async fn register(
        &self,
        registration: Registration,
        sender: Address,
    ) -> EngineResult<Agreement> {
        let target = format!("contract {}", registration.contract_id);
        let mut lifecycle = AgreementLifecycle::new();

        let correlated = self
            .submit(
                "register",
                registration.to_tokens(),
                sender,
                EventMatcher::requiring(vec![self.own_event()]),
            )
            .await
            .map_err(|e| e.with_target(target.clone()))?;

        let id = Self::assigned_id(&correlated, AGREEMENT_ID_ARG).ok_or_else(|| {
            EngineError::EventDecoding(format!(
                "{}: no {} in events of {:?}",
                target, AGREEMENT_ID_ARG, correlated.tx.id
            ))
        })?;
        lifecycle
            .registered()
            .map_err(|condition| EngineError::precondition(&target, "register", condition))?;
        crate::metrics::record_transition("registered");
        info!("Registered {} as agreement {}", target, id);

        let mut agreement = Agreement {
            id: AgreementId(id),
            registration,
            lifecycle,
            engine: self.clone(),
        };
        // The agreement exists on chain now; a failed lookup only delays `Permitted`
        if let Err(e) = agreement.refresh_permissions().await {
            warn!("{}: permission check failed: {}", agreement.label(), e);
        }
        Ok(agreement)
    }
}

impl AgreementEngine {
    /// What the engine stores for agreement `id`
    pub async fn record(&self, id: AgreementId) -> EngineResult<AgreementRecord> {
        let target = format!("agreement {}", id);
        let output = self
            .correlator
            .client()
            .read_only_call(&self.contract, "agreements", &[Token::Uint(id.0)])
            .await
            .map_err(|e| e.with_target(target.clone()))?;
        AgreementRecord::from_tokens(output).map_err(|message| EngineError::Abi {
            target,
            operation: "agreements".to_string(),
            message,
        })
    }

    /// Bind an agreement registered in an earlier run. Its state is rebuilt
    /// from the engine's record; both currency legs must be among `tokens`.
    pub async fn agreement(
        &self,
        id: AgreementId,
        tokens: &[TokenHandle],
    ) -> EngineResult<Agreement> {
        let record = self.record(id).await?;
        let leg = |(symbol, address): &(String, Address)| {
            tokens
                .iter()
                .find(|t| t.address() == *address)
                .cloned()
                .ok_or_else(|| {
                    EngineError::Config(format!(
                        "agreement {}: token {} at {:?} is not bound",
                        id, symbol, address
                    ))
                })
        };
        let registration = Registration {
            contract_id: record.contract_id,
            base: leg(&record.base)?,
            quote: leg(&record.quote)?,
            party_a: record.party_a,
            party_b: record.party_b,
            feed_label: record.feed_label,
            feed: record.feed,
        };

        let mut agreement = Agreement {
            id,
            registration,
            lifecycle: AgreementLifecycle::restore(
                record.signed_a,
                record.signed_b,
                record.status,
            ),
            engine: self.clone(),
        };
        info!(
            "Bound {} on contract {}, {}",
            agreement.label(),
            record.contract_id,
            agreement.state()
        );
        if let Err(e) = agreement.refresh_permissions().await {
            warn!("{}: permission check failed: {}", agreement.label(), e);
        }
        Ok(agreement)
    }
}

/// One registered agreement and its locally tracked state
pub struct Agreement {
    id: AgreementId,
    registration: Registration,
    lifecycle: AgreementLifecycle,
    engine: AgreementEngine,
}

impl std::fmt::Debug for Agreement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agreement")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("registration", &self.registration)
            .finish()
    }
}

impl Agreement {
    pub fn id(&self) -> AgreementId {
        self.id
    }

    pub fn state(&self) -> AgreementState {
        self.lifecycle.state()
    }

    pub fn registration(&self) -> &Registration {
        &self.registration
    }

    pub fn has_signed(&self, party: Party) -> bool {
        self.lifecycle.has_signed(party)
    }

    fn label(&self) -> String {
        format!("agreement {}", self.id)
    }

    fn party(&self, address: Address, operation: &str) -> EngineResult<Party> {
        if address == self.registration.party_a.address {
            Ok(Party::A)
        } else if address == self.registration.party_b.address {
            Ok(Party::B)
        } else {
            Err(EngineError::precondition(
                self.label(),
                operation,
                format!("{:?} is not a counterparty", address),
            ))
        }
    }

    /// First token/party pair that has not authorised the engine, if any
    async fn missing_permission(&self) -> EngineResult<Option<String>> {
        let engine = self.engine.address();
        for token in self.registration.tokens() {
            for party in self.registration.parties() {
                if !token.is_authorized(party.address, engine).await? {
                    return Ok(Some(format!(
                        "token {} does not authorise the engine for {}",
                        token.symbol(),
                        party.label
                    )));
                }
            }
        }
        Ok(None)
    }

    /// Move to `Permitted` once every token authorises the engine for both parties
    pub async fn refresh_permissions(&mut self) -> EngineResult<AgreementState> {
        if self.state() == AgreementState::Registered
            && self.missing_permission().await?.is_none()
            && self.lifecycle.permitted()
        {
            crate::metrics::record_transition("permitted");
            info!("{} permitted on all tokens", self.label());
        }
        Ok(self.state())
    }

    /// Sign as `signer`. Returns `None` without submitting anything when the
    /// party's signature is already recorded.
    pub async fn sign(&mut self, signer: Address) -> EngineResult<Option<TxHandle>> {
        let party = self.party(signer, "sign")?;
        match self.lifecycle.check_sign(party) {
            Ok(SignCheck::AlreadySigned) => {
                info!("{}: party {:?} already signed", self.label(), party);
                return Ok(None);
            }
            Ok(SignCheck::Submit) => {}
            Err(condition) => {
                return Err(EngineError::precondition(self.label(), "sign", condition))
            }
        }

        let correlated = self
            .engine
            .submit(
                "sign",
                vec![Token::Uint(self.id.0)],
                signer,
                EventMatcher::requiring(vec![self.engine.own_event()]),
            )
            .await
            .map_err(|e| e.with_target(self.label()))?;

        let state = self.lifecycle.signed(party);
        crate::metrics::record_transition("signed");
        info!("{} signed by party {:?}, now {}", self.label(), party, state);
        Ok(Some(correlated.tx))
    }

    /// Settle the agreement, moving the notional between the parties
    pub async fn execute(&mut self, sender: Address) -> EngineResult<ExecutionReport> {
        self.settle("execute", sender).await
    }

    /// Settlement under the older engine method name
    pub async fn evaluate(&mut self, sender: Address) -> EngineResult<ExecutionReport> {
        self.settle("evaluate", sender).await
    }

    async fn settle(&mut self, method: &str, sender: Address) -> EngineResult<ExecutionReport> {
        self.lifecycle
            .check_execute()
            .map_err(|condition| EngineError::precondition(self.label(), method, condition))?;
        if let Some(condition) = self.missing_permission().await? {
            return Err(EngineError::precondition(self.label(), method, condition));
        }

        let matcher = EventMatcher::requiring(vec![self.engine.own_event()])
            .watch(self.registration.base.contract().clone())
            .watch(self.registration.quote.contract().clone());

        // A rejection (e.g. insufficient balance) leaves the agreement FullySigned
        let correlated = match self
            .engine
            .submit(method, vec![Token::Uint(self.id.0)], sender, matcher)
            .await
        {
            Ok(correlated) => correlated,
            Err(e) => {
                warn!("{} not settled, still {}: {}", self.label(), self.state(), e);
                return Err(e.with_target(self.label()));
            }
        };

        let transfers = self.transfers(&correlated.events);
        self.lifecycle.executed();
        crate::metrics::record_transition("executed");
        info!(
            "{} executed with {} transfer(s)",
            self.label(),
            transfers.len()
        );

        Ok(ExecutionReport {
            tx: correlated.tx,
            transfers,
            events: correlated.events,
        })
    }

    fn transfers(&self, events: &[ChainEvent]) -> Vec<TokenTransfer> {
        events
            .iter()
            .filter(|e| e.name == TRANSFER_EVENT)
            .filter_map(|e| {
                let token = self
                    .registration
                    .tokens()
                    .into_iter()
                    .find(|t| e.is_from(t.address()))?;
                let address_at = |i| match e.arg_at(i) {
                    Some(Token::Address(a)) => Some(*a),
                    _ => None,
                };
                let value = match e.arg_at(2) {
                    Some(Token::Uint(v)) => *v,
                    _ => return None,
                };
                Some(TokenTransfer {
                    symbol: token.symbol().to_string(),
                    token: token.address(),
                    from: address_at(0)?,
                    to: address_at(1)?,
                    value,
                })
            })
            .collect()
    }

    /// Terminate the agreement from any non-terminal state
    pub async fn kill(&mut self, sender: Address) -> EngineResult<TxHandle> {
        self.party(sender, "kill")?;
        self.lifecycle
            .check_kill()
            .map_err(|condition| EngineError::precondition(self.label(), "kill", condition))?;

        let correlated = self
            .engine
            .submit(
                "kill",
                vec![Token::Uint(self.id.0)],
                sender,
                EventMatcher::requiring(vec![self.engine.own_event()]),
            )
            .await
            .map_err(|e| e.with_target(self.label()))?;

        self.lifecycle.killed();
        crate::metrics::record_transition("killed");
        info!("{} killed", self.label());
        Ok(correlated.tx)
    }
}
