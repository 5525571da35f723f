//! Balance and permission report

use super::{Accounts, Session};
use crate::error::EngineResult;

use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalanceLine {
    pub symbol: String,
    pub party: String,
    pub balance: String,
    /// Whether the engine may move this party's balance
    pub engine_authorized: bool,
}

/// Balance of both parties on every token of the session
pub async fn balances(session: &Session, accounts: &Accounts) -> EngineResult<Vec<BalanceLine>> {
    let engine = session.engine.address();
    let mut lines = Vec::new();
    for (symbol, token) in &session.tokens {
        for party in [accounts.party_a, accounts.party_b] {
            let balance = token.balance_of(party).await?;
            let engine_authorized = token.is_authorized(party, engine).await?;
            debug!("{} {:?}: {}", symbol, party, balance);
            lines.push(BalanceLine {
                symbol: symbol.clone(),
                party: format!("{:?}", party),
                balance: balance.to_string(),
                engine_authorized,
            });
        }
    }
    Ok(lines)
}
