//! Fresh deployment of the engine, feed and currency tokens

use super::{Accounts, Session};
use crate::agreement::AgreementEngine;
use crate::config::Settings;
use crate::correlation::TransactionCorrelator;
use crate::deploy::DeploymentTracker;
use crate::error::{EngineError, EngineResult};
use crate::feed::FeedHandle;
use crate::token::{PermissionLedger, TokenHandle};

use ethers::abi::Token;
use ethers::types::U256;
use futures::future::try_join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Deploy everything in parallel, endow both parties on every token and
/// stamp the launch time into the feed.
///
/// Returns once the endowments and the feed value are visible on chain.
pub async fn bootstrap(
    settings: &Settings,
    tracker: &DeploymentTracker,
    correlator: TransactionCorrelator,
    accounts: &Accounts,
) -> EngineResult<Session> {
    let artifacts = &settings.artifacts;
    let bounds = &settings.bounds;
    let plan = &settings.bootstrap;
    info!(
        "Bootstrapping {}, {} and {} token(s)",
        artifacts.engine,
        artifacts.feed,
        plan.tokens.len()
    );

    let token_deployments = plan.tokens.iter().map(|symbol| async move {
        let contract = tracker
            .deploy(
                &artifacts.token,
                &[Token::String(symbol.clone())],
                accounts.master,
                bounds.token_gas(),
            )
            .await?;
        info!("Token {} deployed at {:?}", symbol, contract.address());
        Ok::<_, EngineError>((symbol.clone(), contract))
    });

    let (engine_contract, feed_contract, token_contracts) = tokio::try_join!(
        tracker.deploy(&artifacts.engine, &[], accounts.master, bounds.engine_gas()),
        tracker.deploy(&artifacts.feed, &[], accounts.master, bounds.call_gas()),
        try_join_all(token_deployments),
    )?;
    info!(
        "{} deployed at {:?}, {} at {:?}",
        artifacts.engine,
        engine_contract.address(),
        artifacts.feed,
        feed_contract.address()
    );

    let ledger = Arc::new(PermissionLedger::new());
    let engine = AgreementEngine::new(engine_contract, correlator.clone(), bounds.engine_gas());
    let feed = FeedHandle::new(feed_contract, correlator.client().clone(), bounds.call_gas());
    let tokens: BTreeMap<String, TokenHandle> = token_contracts
        .into_iter()
        .map(|(symbol, contract)| {
            let token = TokenHandle::new(
                &symbol,
                contract,
                Some(accounts.master),
                correlator.clone(),
                ledger.clone(),
                bounds.token_gas(),
            );
            (symbol, token)
        })
        .collect();

    let endowment = U256::from(plan.endowment);
    for token in tokens.values() {
        for party in [accounts.party_a, accounts.party_b] {
            token.endow(party, endowment, accounts.master).await?;
        }
    }

    let launched = correlator.client().latest_block().await?;
    feed.set(&plan.feed_label, U256::from(launched.timestamp), accounts.master)
        .await?;

    let settle = Duration::from_secs(plan.settle_timeout_secs);
    let poll = bounds.deploy_poll_interval();
    let balance_waits = tokens.values().flat_map(|token| {
        [accounts.party_a, accounts.party_b]
            .into_iter()
            .map(move |party| token.await_balance(party, endowment, settle, poll))
    });
    try_join_all(balance_waits).await?;
    let entry = feed.await_value(&plan.feed_label, settle, poll).await?;
    info!(
        "Bootstrap complete: parties endowed with {} on {} token(s), {} = {}",
        endowment,
        tokens.len(),
        plan.feed_label,
        entry.value
    );

    Ok(Session {
        engine,
        feed,
        tokens,
        correlator,
        ledger,
    })
}
