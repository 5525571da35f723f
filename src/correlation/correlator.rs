//! Submit-and-await correlation of transactions with their events

use super::{CancelToken, EventMatcher};
use crate::chain::{
    ChainClient, ContractHandle, EventFilter, EventSubscription, TxHandle, TxStatus,
};
use crate::error::{EngineError, EngineResult};
use crate::events::ChainEvent;

use ethers::abi::Token;
use ethers::types::{Address, U256};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{debug, trace, warn};

/// Default interval between receipt checks of an unresolved call
pub const DEFAULT_RECEIPT_POLL: Duration = Duration::from_secs(1);

/// A state-changing call to submit
#[derive(Debug, Clone)]
pub struct CallRequest {
    pub contract: ContractHandle,
    pub method: String,
    pub args: Vec<Token>,
    pub sender: Address,
    pub gas_limit: U256,
}

impl CallRequest {
    pub fn new(
        contract: &ContractHandle,
        method: &str,
        args: Vec<Token>,
        sender: Address,
        gas_limit: U256,
    ) -> Self {
        Self {
            contract: contract.clone(),
            method: method.to_string(),
            args,
            sender,
            gas_limit,
        }
    }
}

/// A submitted transaction together with the events it emitted
#[derive(Debug, Clone)]
pub struct Correlated {
    pub tx: TxHandle,
    /// Events originating from `tx`, in delivery order
    pub events: Vec<ChainEvent>,
}

impl Correlated {
    pub fn first_named(&self, name: &str) -> Option<&ChainEvent> {
        self.events.iter().find(|e| e.name == name)
    }

    pub fn named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a ChainEvent> + 'a {
        self.events.iter().filter(move |e| e.name == name)
    }
}

enum Outcome {
    Matched(Vec<ChainEvent>),
    Reverted(String),
    StreamEnded,
    TimedOut,
    Cancelled,
}

/// Resolves each submitted call to the events its own transaction emitted.
///
/// The chain's event feed is shared by every transaction touching the same
/// contracts, so events are matched on their originating transaction id and
/// never on arrival order. Every subscription opened here is closed before
/// the call returns, whatever the outcome.
#[derive(Clone)]
pub struct TransactionCorrelator {
    client: Arc<dyn ChainClient>,
    timeout: Duration,
    receipt_poll: Duration,
}

impl TransactionCorrelator {
    pub fn new(client: Arc<dyn ChainClient>, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            receipt_poll: DEFAULT_RECEIPT_POLL,
        }
    }

    /// Check the receipt of an unresolved call every `interval`
    pub fn with_receipt_poll(mut self, interval: Duration) -> Self {
        self.receipt_poll = interval;
        self
    }

    pub fn client(&self) -> &Arc<dyn ChainClient> {
        &self.client
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Submit `request` and wait for the events `matcher` asks for.
    ///
    /// A rejected submission fails immediately without subscribing. A call
    /// that is accepted but reverts when mined resolves as a submission
    /// failure as soon as its receipt shows it.
    pub async fn submit_and_await(
        &self,
        request: CallRequest,
        matcher: EventMatcher,
        cancel: &CancelToken,
    ) -> EngineResult<Correlated> {
        let target = request.contract.describe();
        let method = request.method.clone();

        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled {
                target,
                operation: method,
            });
        }

        // Subscribing from the block before submission replays events mined
        // between the call and the subscription
        let from = self.client.latest_block().await?;

        let tx = match self
            .client
            .call(
                &request.contract,
                &method,
                &request.args,
                request.sender,
                request.gas_limit,
            )
            .await
        {
            Ok(tx) => tx,
            Err(e) => {
                crate::metrics::record_correlation(&method, "rejected");
                return Err(e);
            }
        };
        debug!("{} on {} sent as {:?}", method, target, tx.id);

        let mut contracts = vec![request.contract.clone()];
        contracts.extend(matcher.watched().iter().cloned());
        let filter = EventFilter::new(contracts, from.number);
        let mut subscription = self.client.subscribe_events(filter).await?;

        let started = Instant::now();
        let outcome = tokio::select! {
            collected = timeout(self.timeout, collect(&mut subscription, &tx, &matcher)) => {
                match collected {
                    Ok(Some(events)) => Outcome::Matched(events),
                    Ok(None) => Outcome::StreamEnded,
                    Err(_) => Outcome::TimedOut,
                }
            }
            reason = reverted(self.client.as_ref(), &tx, self.receipt_poll) => {
                Outcome::Reverted(reason)
            }
            _ = cancel.cancelled() => Outcome::Cancelled,
        };
        subscription.close();

        let tx_label = format!("{:?}", tx.id);
        match outcome {
            Outcome::Matched(events) => {
                crate::metrics::record_correlation(&method, "matched");
                crate::metrics::record_correlation_latency(
                    &method,
                    started.elapsed().as_secs_f64(),
                );
                debug!(
                    "{} on {} resolved with {} event(s)",
                    method,
                    target,
                    events.len()
                );
                Ok(Correlated { tx, events })
            }
            Outcome::Reverted(reason) => {
                crate::metrics::record_correlation(&method, "reverted");
                crate::metrics::record_tx_rejected(&method);
                warn!("{} on {} reverted: {}", method, target, reason);
                Err(EngineError::Submission {
                    target,
                    operation: method,
                    reason,
                })
            }
            Outcome::StreamEnded => {
                crate::metrics::record_correlation(&method, "stream_ended");
                warn!("Event stream for {} on {} ended before a match", method, target);
                Err(EngineError::CorrelationFailure {
                    target,
                    operation: method,
                    tx: tx_label,
                    reason: "event stream ended before a matching event".to_string(),
                })
            }
            Outcome::TimedOut => {
                crate::metrics::record_correlation(&method, "timeout");
                warn!(
                    "No event for {} on {} (tx {}) within {:?}",
                    method, target, tx_label, self.timeout
                );
                Err(EngineError::PendingTimeout {
                    target,
                    operation: method,
                    waited: self.timeout,
                })
            }
            Outcome::Cancelled => {
                crate::metrics::record_correlation(&method, "cancelled");
                debug!("{} on {} cancelled by caller", method, target);
                Err(EngineError::Cancelled {
                    target,
                    operation: method,
                })
            }
        }
    }
}

/// Resolves only once the receipt reports a revert. A successful receipt
/// leaves the outcome to the event stream.
async fn reverted(client: &dyn ChainClient, tx: &TxHandle, interval: Duration) -> String {
    loop {
        match client.tx_status(tx.id).await {
            Ok(TxStatus::Reverted(reason)) => return reason,
            Ok(TxStatus::Succeeded) => return std::future::pending().await,
            Ok(TxStatus::Pending) => {}
            Err(e) => warn!("Receipt check for {:?} failed: {}", tx.id, e),
        }
        sleep(interval).await;
    }
}

/// Gather the transaction's events until the matcher is satisfied, then take
/// whatever else of the same transaction is already buffered.
async fn collect(
    subscription: &mut EventSubscription,
    tx: &TxHandle,
    matcher: &EventMatcher,
) -> Option<Vec<ChainEvent>> {
    let mut events = Vec::new();
    while let Some(event) = subscription.next().await {
        if event.origin_tx != tx.id {
            trace!("Skipping {} from unrelated tx {:?}", event.name, event.origin_tx);
            continue;
        }
        events.push(event);
        if matcher.is_satisfied(&events) {
            while let Some(extra) = subscription.try_next() {
                if extra.origin_tx == tx.id {
                    events.push(extra);
                }
            }
            return Some(events);
        }
    }
    None
}
