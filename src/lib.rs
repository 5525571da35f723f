//! FX agreement engine
//!
//! Deploys and binds the contracts of an agreement engine on an
//! Ethereum-compatible ledger, correlates every submitted transaction with
//! the events it emitted, and drives multi-party FX forward agreements
//! through registration, signature, settlement and termination.

pub mod agreement;
pub mod artifacts;
pub mod chain;
pub mod config;
pub mod correlation;
pub mod deploy;
pub mod error;
pub mod events;
pub mod feed;
pub mod metrics;
pub mod token;
pub mod workflow;

pub use error::{EngineError, EngineResult};
