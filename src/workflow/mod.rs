//! Operator workflows
//!
//! Bootstraps a fresh set of contracts, drives a portfolio of FX forwards
//! through their full lifecycle, and reports balances and permissions.

mod balances;
mod bootstrap;
mod portfolio;
mod steps;

pub use balances::{balances, BalanceLine};
pub use bootstrap::bootstrap;
pub use portfolio::{run_portfolio, ForwardOutcome, TransferLine};
pub use steps::{
    create_forwards, evaluate_agreements, kill_agreements, permit_engine, register_forwards,
    sign_agreements, StepOutcome,
};

use crate::agreement::{Agreement, AgreementEngine, AgreementId};
use crate::config::{AccountsConfig, BoundsConfig, DeploymentConfig};
use crate::correlation::TransactionCorrelator;
use crate::deploy::DeploymentTracker;
use crate::error::{EngineError, EngineResult};
use crate::feed::FeedHandle;
use crate::token::{PermissionLedger, TokenHandle};

use ethers::types::Address;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Node accounts playing each role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accounts {
    /// Deploys contracts and endows parties
    pub master: Address,
    pub party_a: Address,
    pub party_b: Address,
}

impl Accounts {
    /// Pick the configured indices out of the node's account list
    pub fn resolve(node_accounts: &[Address], config: &AccountsConfig) -> EngineResult<Self> {
        let pick = |index: usize, role: &str| {
            node_accounts.get(index).copied().ok_or_else(|| {
                EngineError::Config(format!(
                    "{} account index {} out of range, node has {} account(s)",
                    role,
                    index,
                    node_accounts.len()
                ))
            })
        };
        Ok(Self {
            master: pick(config.master, "master")?,
            party_a: pick(config.party_a, "party_a")?,
            party_b: pick(config.party_b, "party_b")?,
        })
    }
}

/// Bound contracts of one deployment
#[derive(Clone)]
pub struct Session {
    pub engine: AgreementEngine,
    pub feed: FeedHandle,
    /// Symbol -> token
    pub tokens: BTreeMap<String, TokenHandle>,
    pub correlator: TransactionCorrelator,
    pub ledger: Arc<PermissionLedger>,
}

impl Session {
    /// Bind contracts recorded after an earlier bootstrap
    pub fn bind(
        record: &DeploymentConfig,
        tracker: &DeploymentTracker,
        correlator: TransactionCorrelator,
        bounds: &BoundsConfig,
        artifacts: &crate::config::ArtifactsConfig,
    ) -> EngineResult<Self> {
        let ledger = Arc::new(PermissionLedger::new());
        let engine = AgreementEngine::new(
            tracker.at(&artifacts.engine, parse_address("engine", &record.engine)?)?,
            correlator.clone(),
            bounds.engine_gas(),
        );
        let feed = FeedHandle::new(
            tracker.at(&artifacts.feed, parse_address("feed", &record.feed)?)?,
            correlator.client().clone(),
            bounds.call_gas(),
        );

        let mut tokens = BTreeMap::new();
        for (symbol, address) in &record.tokens {
            let contract = tracker.at(&artifacts.token, parse_address(symbol, address)?)?;
            tokens.insert(
                symbol.clone(),
                TokenHandle::new(
                    symbol,
                    contract,
                    None,
                    correlator.clone(),
                    ledger.clone(),
                    bounds.token_gas(),
                ),
            );
        }
        info!(
            "Bound engine at {}, feed and {} token(s)",
            record.engine,
            tokens.len()
        );

        Ok(Self {
            engine,
            feed,
            tokens,
            correlator,
            ledger,
        })
    }

    /// Agreement registered in an earlier run, with its stored state
    pub async fn agreement(&self, id: AgreementId) -> EngineResult<Agreement> {
        let tokens: Vec<TokenHandle> = self.tokens.values().cloned().collect();
        self.engine.agreement(id, &tokens).await
    }

    pub fn token(&self, symbol: &str) -> EngineResult<&TokenHandle> {
        self.tokens
            .get(symbol)
            .ok_or_else(|| EngineError::Config(format!("no token {} in this deployment", symbol)))
    }

    /// Addresses to record under `[deployment]` for later runs
    pub fn record(&self) -> DeploymentConfig {
        DeploymentConfig {
            engine: format!("{:?}", self.engine.address()),
            feed: format!("{:?}", self.feed.contract().address()),
            tokens: self
                .tokens
                .iter()
                .map(|(symbol, token)| (symbol.clone(), format!("{:?}", token.address())))
                .collect(),
            contracts: Vec::new(),
            agreements: Vec::new(),
        }
    }
}

fn parse_address(what: &str, raw: &str) -> EngineResult<Address> {
    raw.parse::<Address>()
        .map_err(|e| EngineError::Config(format!("invalid {} address {}: {}", what, raw, e)))
}
