//! Agreement coordination
//!
//! Drives FX forward agreements through the engine contract: creation of
//! the underlying instrument, registration, signatures by both parties,
//! settlement and termination. Every transition is applied only after the
//! transaction that causes it has been correlated with its events.

mod engine;
mod lifecycle;
mod terms;

pub use engine::{
    Agreement, AgreementEngine, ExecutionReport, TokenTransfer, AGREEMENT_ID_ARG,
    CONTRACT_ID_ARG, TRANSFER_EVENT,
};
pub use lifecycle::{AgreementLifecycle, AgreementState, Party, SignCheck};
pub use terms::{
    AgreementId, AgreementRecord, ContractId, Counterparty, FxForwardTerms, RecordStatus,
    Registration,
};
