//! Transaction correlation
//!
//! This module provides:
//! - Event patterns and matchers describing which events resolve a call
//! - Cancellation tokens for callers that give up early
//! - The correlator that submits a call and resolves its own events

mod cancel;
mod correlator;
mod matcher;

pub use cancel::CancelToken;
pub use correlator::{CallRequest, Correlated, TransactionCorrelator};
pub use matcher::{EventMatcher, EventPattern};
