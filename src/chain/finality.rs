//! Confirmation tracking after submission
//!
//! A submitted transaction moves through:
//! - Pending: no receipt yet
//! - Included: mined, receipt known
//! - Confirmed: head is at least `depth` blocks past the receipt block
//!
//! Either wait is bounded, and so is every poll inside it. A timeout
//! after inclusion keeps the receipt.

use super::ChainClient;
use crate::shutdown::cancelled;

use ethers::types::{TransactionReceipt, H256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

/// Where a submitted transaction ended up
#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmationState {
    /// No receipt seen yet; returned when tracking is cancelled early
    Pending,
    /// Receipt polling was not requested
    Submitted,
    Included(TransactionReceipt),
    Confirmed {
        receipt: TransactionReceipt,
        depth: u64,
    },
    /// No receipt within the receipt timeout
    TimedOut,
    /// Mined, but the requested depth was not reached in time
    TimedOutWaitingDepth {
        receipt: TransactionReceipt,
        depth: u64,
    },
}

impl ConfirmationState {
    pub fn receipt(&self) -> Option<&TransactionReceipt> {
        match self {
            ConfirmationState::Included(receipt)
            | ConfirmationState::Confirmed { receipt, .. }
            | ConfirmationState::TimedOutWaitingDepth { receipt, .. } => Some(receipt),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ConfirmationState::TimedOut | ConfirmationState::TimedOutWaitingDepth { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            ConfirmationState::Pending => "pending",
            ConfirmationState::Submitted => "submitted",
            ConfirmationState::Included(_) => "included",
            ConfirmationState::Confirmed { .. } => "confirmed",
            ConfirmationState::TimedOut => "timed_out",
            ConfirmationState::TimedOutWaitingDepth { .. } => "timed_out_waiting_depth",
        }
    }
}

/// Tracker timing
#[derive(Debug, Clone, Copy)]
pub struct TrackerSettings {
    /// Bound on the wait for the first receipt
    pub receipt_timeout: Duration,
    /// Bound on the wait for confirming blocks, counted from inclusion
    pub depth_timeout: Duration,
    /// Fixed cadence for both waits
    pub poll_interval: Duration,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            receipt_timeout: Duration::from_secs(300),
            depth_timeout: Duration::from_secs(600),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Follows one submitted transaction to its terminal state
pub struct ConfirmationTracker {
    client: Arc<dyn ChainClient>,
    settings: TrackerSettings,
}

impl ConfirmationTracker {
    pub fn new(client: Arc<dyn ChainClient>, settings: TrackerSettings) -> Self {
        Self { client, settings }
    }

    /// Track `tx_hash` until `depth` confirming blocks.
    ///
    /// A negative depth skips receipt polling, zero stops at inclusion.
    pub async fn track(
        &self,
        tx_hash: H256,
        depth: i64,
        shutdown: &mut watch::Receiver<bool>,
    ) -> ConfirmationState {
        if depth < 0 {
            info!("Not waiting for receipt of {:?}", tx_hash);
            return ConfirmationState::Submitted;
        }

        let receipt = match self.wait_for_receipt(tx_hash, shutdown).await {
            Ok(receipt) => receipt,
            Err(state) => return state,
        };

        let Some(receipt_block) = receipt.block_number.map(|n| n.as_u64()) else {
            warn!("Receipt for {:?} carries no block number", tx_hash);
            return ConfirmationState::Included(receipt);
        };
        info!("Transaction {:?} included in block {}", tx_hash, receipt_block);

        if depth == 0 {
            return ConfirmationState::Included(receipt);
        }

        self.wait_for_depth(receipt, receipt_block, depth as u64, shutdown)
            .await
    }

    async fn wait_for_receipt(
        &self,
        tx_hash: H256,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<TransactionReceipt, ConfirmationState> {
        let deadline = Instant::now() + self.settings.receipt_timeout;

        loop {
            let polled = tokio::select! {
                polled = self.client.receipt(tx_hash) => polled,
                _ = sleep_until(deadline) => {
                    warn!("Timeout waiting for receipt of {:?}", tx_hash);
                    return Err(ConfirmationState::TimedOut);
                }
                _ = cancelled(shutdown) => return Err(ConfirmationState::Pending),
            };

            match polled {
                Ok(Some(receipt)) => return Ok(receipt),
                Ok(None) => debug!("Transaction {:?} not mined yet", tx_hash),
                Err(e) => warn!("Failed to fetch receipt for {:?}: {}", tx_hash, e),
            }

            let now = Instant::now();
            if now >= deadline {
                warn!("Timeout waiting for receipt of {:?}", tx_hash);
                return Err(ConfirmationState::TimedOut);
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.poll_interval.min(deadline - now)) => {}
                _ = cancelled(shutdown) => return Err(ConfirmationState::Pending),
            }
        }
    }

    async fn wait_for_depth(
        &self,
        receipt: TransactionReceipt,
        receipt_block: u64,
        depth: u64,
        shutdown: &mut watch::Receiver<bool>,
    ) -> ConfirmationState {
        let deadline = Instant::now() + self.settings.depth_timeout;
        let mut reached = 0;

        loop {
            let now = Instant::now();
            if now >= deadline {
                warn!(
                    "Timeout waiting for {} confirmations of {:?}",
                    depth, receipt.transaction_hash
                );
                return ConfirmationState::TimedOutWaitingDepth {
                    receipt,
                    depth: reached,
                };
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.poll_interval.min(deadline - now)) => {}
                _ = cancelled(shutdown) => return ConfirmationState::Included(receipt),
            }

            let polled = tokio::select! {
                polled = self.client.latest_header() => polled,
                _ = sleep_until(deadline) => continue,
                _ = cancelled(shutdown) => return ConfirmationState::Included(receipt),
            };

            match polled {
                Ok(header) => {
                    reached = header.number.saturating_sub(receipt_block);
                    if reached >= depth {
                        info!(
                            "Transaction {:?} confirmed ({} confirmations)",
                            receipt.transaction_hash, reached
                        );
                        return ConfirmationState::Confirmed { receipt, depth: reached };
                    }
                    debug!(
                        "Transaction {:?} has {} / {} confirmations",
                        receipt.transaction_hash, reached, depth
                    );
                }
                Err(e) => warn!("Failed to poll chain head: {}", e),
            }
        }
    }
}
