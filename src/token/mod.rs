//! Currency tokens and the permissions parties grant the engine on them

mod handle;
mod ledger;

pub use handle::TokenHandle;
pub use ledger::PermissionLedger;
