//! Handle over one deployed currency token

use super::PermissionLedger;
use crate::chain::{ContractHandle, TxHandle};
use crate::correlation::{
    CallRequest, CancelToken, Correlated, EventMatcher, EventPattern, TransactionCorrelator,
};
use crate::error::{EngineError, EngineResult};

use ethers::abi::Token;
use ethers::types::{Address, U256};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, info};

/// A currency token, e.g. USD, bound to its contract
#[derive(Clone)]
pub struct TokenHandle {
    symbol: String,
    contract: ContractHandle,
    /// Account that deployed the token, when this session knows it
    deployer: Option<Address>,
    correlator: TransactionCorrelator,
    ledger: Arc<PermissionLedger>,
    gas_limit: U256,
}

impl TokenHandle {
    pub fn new(
        symbol: &str,
        contract: ContractHandle,
        deployer: Option<Address>,
        correlator: TransactionCorrelator,
        ledger: Arc<PermissionLedger>,
        gas_limit: U256,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            contract,
            deployer,
            correlator,
            ledger,
            gas_limit,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn contract(&self) -> &ContractHandle {
        &self.contract
    }

    pub fn address(&self) -> Address {
        self.contract.address()
    }

    fn label(&self) -> String {
        format!("token {}", self.symbol)
    }

    /// Grant or revoke `spender`'s authority over `owner`'s balance.
    ///
    /// Setting the value already in place is accepted and changes nothing.
    pub async fn permit(
        &self,
        spender: Address,
        authorized: bool,
        owner: Address,
    ) -> EngineResult<TxHandle> {
        let request = CallRequest::new(
            &self.contract,
            "permit",
            vec![Token::Address(spender), Token::Bool(authorized)],
            owner,
            self.gas_limit,
        );
        let matcher = EventMatcher::requiring(vec![
            EventPattern::any().from_contract(self.contract.address())
        ]);
        let resolved = self
            .correlator
            .submit_and_await(request, matcher, &CancelToken::never())
            .await
            .map_err(|e| e.with_target(self.label()))?;

        self.ledger
            .record(self.address(), owner, spender, authorized);
        info!(
            "{}: {:?} {} {:?}",
            self.label(),
            owner,
            if authorized { "permitted" } else { "revoked" },
            spender
        );
        Ok(resolved.tx)
    }

    /// Whether `spender` may move `owner`'s balance.
    ///
    /// A grant already in the ledger answers directly. Anything else is read
    /// from the token's `permissions` view, since the owner may have granted
    /// it from another session since.
    pub async fn is_authorized(&self, owner: Address, spender: Address) -> EngineResult<bool> {
        if self.ledger.get(self.address(), owner, spender) == Some(true) {
            return Ok(true);
        }

        let output = self
            .correlator
            .client()
            .read_only_call(
                &self.contract,
                "permissions",
                &[Token::Address(owner), Token::Address(spender)],
            )
            .await
            .map_err(|e| e.with_target(self.label()))?;
        let authorized = match output.first() {
            Some(Token::Bool(b)) => *b,
            other => {
                return Err(EngineError::Abi {
                    target: self.label(),
                    operation: "permissions".to_string(),
                    message: format!("expected bool, got {:?}", other),
                })
            }
        };

        self.ledger
            .record(self.address(), owner, spender, authorized);
        Ok(authorized)
    }

    pub async fn balance_of(&self, owner: Address) -> EngineResult<U256> {
        let output = self
            .correlator
            .client()
            .read_only_call(&self.contract, "balanceOf", &[Token::Address(owner)])
            .await
            .map_err(|e| e.with_target(self.label()))?;
        match output.first() {
            Some(Token::Uint(v)) => Ok(*v),
            other => Err(EngineError::Abi {
                target: self.label(),
                operation: "balanceOf".to_string(),
                message: format!("expected uint, got {:?}", other),
            }),
        }
    }

    /// Name the token was deployed with
    pub async fn name(&self) -> EngineResult<String> {
        let output = self
            .correlator
            .client()
            .read_only_call(&self.contract, "name", &[])
            .await?;
        match output.into_iter().next() {
            Some(Token::String(name)) => Ok(name),
            other => Err(EngineError::Abi {
                target: self.label(),
                operation: "name".to_string(),
                message: format!("expected string, got {:?}", other),
            }),
        }
    }

    /// Mint `amount` to `recipient`. Only the deployer may endow; the
    /// transaction is submitted without waiting for it to be mined.
    pub async fn endow(
        &self,
        recipient: Address,
        amount: U256,
        sender: Address,
    ) -> EngineResult<TxHandle> {
        match self.deployer {
            Some(deployer) if deployer != sender => {
                return Err(EngineError::precondition(
                    self.label(),
                    "endow",
                    format!("{:?} is not the deployer {:?}", sender, deployer),
                ))
            }
            _ => {}
        }

        let tx = self
            .correlator
            .client()
            .call(
                &self.contract,
                "endow",
                &[Token::Address(recipient), Token::Uint(amount)],
                sender,
                self.gas_limit,
            )
            .await
            .map_err(|e| e.with_target(self.label()))?;
        debug!("{}: endow {} to {:?} sent", self.label(), amount, recipient);
        Ok(tx)
    }

    /// Move `value` from `from` to `to` on `sender`'s authority
    pub async fn transfer_from(
        &self,
        from: Address,
        to: Address,
        value: U256,
        sender: Address,
    ) -> EngineResult<Correlated> {
        let request = CallRequest::new(
            &self.contract,
            "transferFrom",
            vec![Token::Address(from), Token::Address(to), Token::Uint(value)],
            sender,
            self.gas_limit,
        );
        let matcher = EventMatcher::requiring(vec![
            EventPattern::named("Transfer").from_contract(self.address())
        ]);
        self.correlator
            .submit_and_await(request, matcher, &CancelToken::never())
            .await
            .map_err(|e| e.with_target(self.label()))
    }

    /// Poll until `owner` holds at least `minimum`, within `bound`
    pub async fn await_balance(
        &self,
        owner: Address,
        minimum: U256,
        bound: Duration,
        poll_interval: Duration,
    ) -> EngineResult<U256> {
        let wait = async {
            loop {
                let balance = self.balance_of(owner).await?;
                if balance >= minimum {
                    return Ok(balance);
                }
                debug!(
                    "{}: {:?} holds {}, waiting for {}",
                    self.label(),
                    owner,
                    balance,
                    minimum
                );
                sleep(poll_interval).await;
            }
        };

        match timeout(bound, wait).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::PendingTimeout {
                target: self.label(),
                operation: format!("balance of {:?}", owner),
                waited: bound,
            }),
        }
    }
}
