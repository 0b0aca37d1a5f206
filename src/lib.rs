//! ether-tx - Transaction builder for Ethereum-style chains
//!
//! Turns human-friendly inputs (decimal amounts, symbolic gas policies, ABI
//! call descriptions) into signed transactions, broadcasts them and follows
//! them to the requested confirmation depth.

pub mod abi;
pub mod chain;
pub mod config;
pub mod error;
pub mod metrics;
pub mod shutdown;
pub mod tx;
pub mod units;

pub use error::{TxError, TxResult};
