//! Log polling that feeds one event subscription

use super::provider::HttpFailover;
use super::EventFilter;
use crate::events::{ChainEvent, EventParser};

use ethers::types::Filter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Maximum number of blocks requested per `eth_getLogs` call
const MAX_BLOCK_SPAN: u64 = 1000;

/// Polls `eth_getLogs` over a block range and forwards decoded events.
///
/// The poller exits when the subscription is closed, when the range's upper
/// bound has been delivered, or when the receiver stops accepting events.
pub struct LogPoller {
    rpc: Arc<HttpFailover>,
    filter: EventFilter,
    parser: EventParser,
    poll_interval: Duration,
}

impl LogPoller {
    pub fn new(rpc: Arc<HttpFailover>, filter: EventFilter, poll_interval: Duration) -> Self {
        let parser = EventParser::new(&filter.contracts);
        Self {
            rpc,
            filter,
            parser,
            poll_interval,
        }
    }

    pub async fn run(self, sender: mpsc::Sender<ChainEvent>) {
        let addresses = self.filter.addresses();
        let mut next_block = self.filter.from_block;

        loop {
            if sender.is_closed() {
                break;
            }

            let current_block = match self.rpc.get_block_number().await {
                Ok(b) => b,
                Err(e) => {
                    warn!("Failed to get block number: {}", e);
                    if !self.pause(&sender).await {
                        break;
                    }
                    continue;
                }
            };
            crate::metrics::record_block_height(current_block);

            // Only process if we have new blocks
            if current_block < next_block {
                if !self.pause(&sender).await {
                    break;
                }
                continue;
            }

            let mut to_block = std::cmp::min(current_block, next_block + MAX_BLOCK_SPAN - 1);
            if let Some(limit) = self.filter.to_block {
                to_block = std::cmp::min(to_block, limit);
            }

            debug!(
                "Polling logs for {:?} in blocks {} to {}",
                addresses, next_block, to_block
            );

            let filter = Filter::new()
                .address(addresses.clone())
                .from_block(next_block)
                .to_block(to_block);

            match self.rpc.get_logs(&filter).await {
                Ok(logs) => {
                    for log in logs {
                        let event = match self.parser.parse_log(&log) {
                            Ok(event) => event,
                            Err(e) => {
                                error!("Failed to process log: {}", e);
                                continue;
                            }
                        };
                        crate::metrics::record_event(&event.name);
                        if sender.send(event).await.is_err() {
                            return;
                        }
                    }
                    next_block = to_block + 1;
                }
                Err(e) => {
                    // Range stays where it was and is retried next round
                    warn!("Failed to get logs: {}", e);
                }
            }

            if self.filter.to_block.is_some_and(|limit| next_block > limit) {
                debug!("Block range for {:?} exhausted", addresses);
                break;
            }

            if !self.pause(&sender).await {
                break;
            }
        }
    }

    /// Sleep one poll interval; false when the subscription closed meanwhile
    async fn pause(&self, sender: &mpsc::Sender<ChainEvent>) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.poll_interval) => true,
            _ = sender.closed() => false,
        }
    }
}
