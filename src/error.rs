//! Error types for transaction building, signing and tracking

use thiserror::Error;

/// Main error type for the transaction pipeline
#[derive(Error, Debug)]
pub enum TxError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Conflicting gas options: {0}")]
    ConflictingGasOptions(String),

    #[error("Method {method} expects {expected} arguments, got {got}")]
    ArityMismatch {
        method: String,
        expected: usize,
        got: usize,
    },

    #[error("Method {method} declares {expected} outputs, got {got} results")]
    OutputArityMismatch {
        method: String,
        expected: usize,
        got: usize,
    },

    #[error("Unsupported ABI type: {0}")]
    UnsupportedAbiType(String),

    #[error("Method {0} not found in interface")]
    MethodNotFound(String),

    #[error("Invalid {kind} argument {value:?}: {reason}")]
    InvalidArgument {
        kind: String,
        value: String,
        reason: String,
    },

    #[error("Output {name} is not of declared type {expected}")]
    TypeAssertionFailed { name: String, expected: String },

    #[error("Invalid ABI: {0}")]
    InvalidAbi(String),

    #[error("Latest block header carries no base fee")]
    NoBaseFee,

    #[error("Insufficient balance: have {have}, need more than {need}")]
    InsufficientBalance { have: String, need: String },

    #[error("Signing rejected on the device")]
    UserRejected,

    #[error("Signing device disconnected: {0}")]
    DeviceDisconnected(String),

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Broadcast failed: {0}")]
    BroadcastFailed(String),

    #[error("RPC error during {operation}: {message}")]
    Rpc { operation: String, message: String },

    #[error("Block height {target} not reached before timeout (last seen: {last_seen:?})")]
    GateTimedOut { target: u64, last_seen: Option<u64> },

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Cancelled: {0}")]
    Cancelled(String),
}

impl TxError {
    /// Errors raised before any network call is made
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            TxError::InvalidAmount(_)
                | TxError::ConflictingGasOptions(_)
                | TxError::ArityMismatch { .. }
                | TxError::OutputArityMismatch { .. }
                | TxError::UnsupportedAbiType(_)
                | TxError::MethodNotFound(_)
                | TxError::InvalidArgument { .. }
                | TxError::TypeAssertionFailed { .. }
                | TxError::InvalidAbi(_)
        )
    }

    /// Check if the caller may resubmit after this error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TxError::Rpc { .. }
                | TxError::Timeout { .. }
                | TxError::BroadcastFailed(_)
                | TxError::GateTimedOut { .. }
                | TxError::DeviceDisconnected(_)
        )
    }

    pub(crate) fn rpc(operation: &str, err: impl std::fmt::Display) -> Self {
        TxError::Rpc {
            operation: operation.to_string(),
            message: err.to_string(),
        }
    }

    pub(crate) fn timeout(operation: &str) -> Self {
        TxError::Timeout {
            operation: operation.to_string(),
        }
    }
}

/// Result type for pipeline operations
pub type TxResult<T> = Result<T, TxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_are_not_retryable() {
        let err = TxError::ConflictingGasOptions("gas limit with ratio".to_string());
        assert!(err.is_validation());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_network_errors_are_retryable() {
        assert!(TxError::rpc("query nonce", "connection refused").is_retryable());
        assert!(TxError::timeout("broadcast").is_retryable());
        assert!(!TxError::UserRejected.is_retryable());
        assert!(!TxError::NoBaseFee.is_validation());
    }
}
