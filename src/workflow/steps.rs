//! Single lifecycle steps over recorded contract and agreement ids
//!
//! Each step runs on its own against a bound deployment, so parties can
//! permit, sign, kill or settle in separate runs from separate accounts.

use super::portfolio::{forward_terms, registration};
use super::{Accounts, ForwardOutcome, Session};
use crate::agreement::{AgreementId, AgreementState, ContractId};
use crate::config::{BootstrapConfig, ForwardConfig};
use crate::error::{EngineError, EngineResult};

use ethers::types::Address;
use futures::future::try_join_all;
use serde::Serialize;
use tracing::info;

/// State of one agreement after a step
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepOutcome {
    pub agreement_id: AgreementId,
    pub state: AgreementState,
    /// Transaction submitted by the step, if any
    pub tx: Option<String>,
}

/// Permit the engine on every token of the session for both parties
pub async fn permit_engine(session: &Session, accounts: &Accounts) -> EngineResult<usize> {
    let engine = session.engine.address();
    let mut granted = 0;
    for token in session.tokens.values() {
        for party in [accounts.party_a, accounts.party_b] {
            token.permit(engine, true, party).await?;
            granted += 1;
        }
    }
    info!(
        "Engine permitted on {} token(s) for both parties",
        session.tokens.len()
    );
    Ok(granted)
}

/// Create one instrument per configured forward, in order
pub async fn create_forwards(
    session: &Session,
    forwards: &[ForwardConfig],
    accounts: &Accounts,
) -> EngineResult<Vec<ContractId>> {
    let creations = forwards.iter().map(|forward| async move {
        let terms = forward_terms(forward);
        session
            .engine
            .create_fx_forward(&terms, accounts.master)
            .await
    });
    try_join_all(creations).await
}

/// Register each recorded contract id with the forward at the same position
pub async fn register_forwards(
    session: &Session,
    contracts: &[ContractId],
    forwards: &[ForwardConfig],
    plan: &BootstrapConfig,
    accounts: &Accounts,
) -> EngineResult<Vec<AgreementId>> {
    if contracts.len() != forwards.len() {
        return Err(EngineError::Config(format!(
            "{} recorded contract id(s) for {} configured forward(s)",
            contracts.len(),
            forwards.len()
        )));
    }

    let registrations = contracts
        .iter()
        .zip(forwards)
        .map(|(contract_id, forward)| async move {
            let registration = registration(session, forward, *contract_id, plan, accounts)?;
            let agreement = session
                .engine
                .register(registration, accounts.master)
                .await?;
            Ok::<_, EngineError>(agreement.id())
        });
    try_join_all(registrations).await
}

/// Sign every agreement as `signer`; agreements already signed by that
/// party submit nothing
pub async fn sign_agreements(
    session: &Session,
    ids: &[AgreementId],
    signer: Address,
) -> EngineResult<Vec<StepOutcome>> {
    let signs = ids.iter().map(|id| async move {
        let mut agreement = session.agreement(*id).await?;
        let tx = agreement.sign(signer).await?;
        Ok::<_, EngineError>(StepOutcome {
            agreement_id: *id,
            state: agreement.state(),
            tx: tx.map(|tx| format!("{:?}", tx.id)),
        })
    });
    try_join_all(signs).await
}

/// Kill every agreement on behalf of `sender`, one of its counterparties
pub async fn kill_agreements(
    session: &Session,
    ids: &[AgreementId],
    sender: Address,
) -> EngineResult<Vec<StepOutcome>> {
    let kills = ids.iter().map(|id| async move {
        let mut agreement = session.agreement(*id).await?;
        let tx = agreement.kill(sender).await?;
        Ok::<_, EngineError>(StepOutcome {
            agreement_id: *id,
            state: agreement.state(),
            tx: Some(format!("{:?}", tx.id)),
        })
    });
    try_join_all(kills).await
}

/// Settle every agreement through `evaluate`
pub async fn evaluate_agreements(
    session: &Session,
    ids: &[AgreementId],
    sender: Address,
) -> EngineResult<Vec<ForwardOutcome>> {
    let settlements = ids.iter().map(|id| async move {
        let mut agreement = session.agreement(*id).await?;
        let report = agreement.evaluate(sender).await?;
        Ok::<_, EngineError>(ForwardOutcome::settled(&agreement, &report))
    });
    try_join_all(settlements).await
}
