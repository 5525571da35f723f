//! Full lifecycle of a portfolio of FX forwards

use super::steps::permit_engine;
use super::{Accounts, Session};
use crate::agreement::{
    Agreement, AgreementId, AgreementState, ContractId, Counterparty, ExecutionReport,
    FxForwardTerms, Registration, TokenTransfer,
};
use crate::config::{BootstrapConfig, ForwardConfig};
use crate::error::EngineResult;

use chrono::Utc;
use ethers::types::U256;
use futures::future::try_join_all;
use serde::Serialize;

/// What happened to one forward
#[derive(Debug, Clone, Serialize)]
pub struct ForwardOutcome {
    pub contract_id: ContractId,
    pub agreement_id: AgreementId,
    pub state: AgreementState,
    pub transfers: Vec<TransferLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferLine {
    pub symbol: String,
    pub from: String,
    pub to: String,
    pub value: String,
}

impl ForwardOutcome {
    pub(super) fn settled(agreement: &Agreement, report: &ExecutionReport) -> Self {
        Self {
            contract_id: agreement.registration().contract_id,
            agreement_id: agreement.id(),
            state: agreement.state(),
            transfers: report.transfers.iter().map(TransferLine::from).collect(),
        }
    }
}

impl From<&TokenTransfer> for TransferLine {
    fn from(t: &TokenTransfer) -> Self {
        Self {
            symbol: t.symbol.clone(),
            from: format!("{:?}", t.from),
            to: format!("{:?}", t.to),
            value: t.value.to_string(),
        }
    }
}

/// Permit the engine on every token for both parties, then create,
/// register, sign and execute each forward. Forwards run concurrently.
pub async fn run_portfolio(
    session: &Session,
    forwards: &[ForwardConfig],
    plan: &BootstrapConfig,
    accounts: &Accounts,
) -> EngineResult<Vec<ForwardOutcome>> {
    permit_engine(session, accounts).await?;

    let runs = forwards
        .iter()
        .map(|forward| run_forward(session, forward, plan, accounts));
    try_join_all(runs).await
}

/// Terms of a configured forward, maturing `maturity_offset_secs` from now
pub(super) fn forward_terms(forward: &ForwardConfig) -> FxForwardTerms {
    let maturity = Utc::now().timestamp() + forward.maturity_offset_secs;
    FxForwardTerms {
        party_a: forward.party_a.clone(),
        party_b: forward.party_b.clone(),
        base: forward.base.clone(),
        quote: forward.quote.clone(),
        maturity: u64::try_from(maturity).unwrap_or_default(),
        notional: U256::from(forward.notional),
        tenor: U256::from(forward.tenor),
    }
}

pub(super) fn registration(
    session: &Session,
    forward: &ForwardConfig,
    contract_id: ContractId,
    plan: &BootstrapConfig,
    accounts: &Accounts,
) -> EngineResult<Registration> {
    Ok(Registration {
        contract_id,
        party_a: Counterparty::new(&forward.party_a, accounts.party_a),
        party_b: Counterparty::new(&forward.party_b, accounts.party_b),
        base: session.token(&forward.base)?.clone(),
        quote: session.token(&forward.quote)?.clone(),
        feed_label: plan.feed_label.clone(),
        feed: session.feed.contract().address(),
    })
}

async fn run_forward(
    session: &Session,
    forward: &ForwardConfig,
    plan: &BootstrapConfig,
    accounts: &Accounts,
) -> EngineResult<ForwardOutcome> {
    let contract_id = session
        .engine
        .create_fx_forward(&forward_terms(forward), accounts.master)
        .await?;
    let registration = registration(session, forward, contract_id, plan, accounts)?;

    let mut agreement = session
        .engine
        .register(registration, accounts.master)
        .await?;
    agreement.sign(accounts.party_a).await?;
    agreement.sign(accounts.party_b).await?;
    let report = agreement.execute(accounts.master).await?;

    Ok(ForwardOutcome::settled(&agreement, &report))
}
