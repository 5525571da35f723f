//! Deployment tracking
//!
//! Submits creation transactions and waits, within a configured bound, until
//! the node reports the address the contract was mined at.

mod tracker;

pub use tracker::DeploymentTracker;
