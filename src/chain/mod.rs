//! Chain module - abstract chain access and the polling stages built on it
//!
//! This module provides:
//! - The `ChainClient` capability consumed by the pipeline
//! - A JSON-RPC implementation with multi-endpoint failover
//! - The block-height gate run before submission
//! - Confirmation tracking after submission

pub mod finality;
pub mod gate;
pub mod provider;

pub use finality::{ConfirmationState, ConfirmationTracker, TrackerSettings};
pub use gate::wait_for_height;
pub use provider::EthersClient;

use crate::error::TxResult;
use crate::units::UnitAmount;

use async_trait::async_trait;
use ethers::types::{Address, Bytes, TransactionReceipt, H256, U256};

/// Latest block header fields the pipeline needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub number: u64,
    /// Present on chains with dynamic fees
    pub base_fee: Option<U256>,
}

/// Candidate call used for gas estimation and `eth_call`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallRequest {
    pub from: Option<Address>,
    /// Absent for contract creation
    pub to: Option<Address>,
    pub value: U256,
    pub data: Bytes,
}

/// Chain node capability used by every stage of the pipeline
///
/// Implementations must be safe for concurrent read-only queries.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Next usable nonce, counting pending transactions
    async fn pending_nonce(&self, address: Address) -> TxResult<u64>;

    async fn chain_id(&self) -> TxResult<u64>;

    async fn estimate_gas(&self, call: &CallRequest) -> TxResult<u64>;

    /// Suggested legacy gas price, in gwei
    async fn suggest_gas_price(&self) -> TxResult<UnitAmount>;

    /// Suggested priority tip, in gwei
    async fn suggest_priority_fee(&self) -> TxResult<UnitAmount>;

    async fn latest_header(&self) -> TxResult<BlockHeader>;

    /// Native balance, in ether
    async fn balance(&self, address: Address) -> TxResult<UnitAmount>;

    async fn submit_raw_transaction(&self, raw: Bytes) -> TxResult<H256>;

    async fn receipt(&self, tx_hash: H256) -> TxResult<Option<TransactionReceipt>>;

    /// Read-only call against the latest state
    async fn call(&self, call: &CallRequest) -> TxResult<Bytes>;
}

/// Node that accepts every request and never answers
#[cfg(test)]
pub(crate) struct StalledClient;

#[cfg(test)]
#[async_trait]
impl ChainClient for StalledClient {
    async fn pending_nonce(&self, _: Address) -> TxResult<u64> {
        std::future::pending().await
    }
    async fn chain_id(&self) -> TxResult<u64> {
        std::future::pending().await
    }
    async fn estimate_gas(&self, _: &CallRequest) -> TxResult<u64> {
        std::future::pending().await
    }
    async fn suggest_gas_price(&self) -> TxResult<UnitAmount> {
        std::future::pending().await
    }
    async fn suggest_priority_fee(&self) -> TxResult<UnitAmount> {
        std::future::pending().await
    }
    async fn latest_header(&self) -> TxResult<BlockHeader> {
        std::future::pending().await
    }
    async fn balance(&self, _: Address) -> TxResult<UnitAmount> {
        std::future::pending().await
    }
    async fn submit_raw_transaction(&self, _: Bytes) -> TxResult<H256> {
        std::future::pending().await
    }
    async fn receipt(&self, _: H256) -> TxResult<Option<TransactionReceipt>> {
        std::future::pending().await
    }
    async fn call(&self, _: &CallRequest) -> TxResult<Bytes> {
        std::future::pending().await
    }
}
