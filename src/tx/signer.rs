//! Local-key, hardware-device and offline signing

use super::{TransactionIntent, TxShape};
use crate::error::{TxError, TxResult};
use crate::shutdown::cancelled;

use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, Signature, H256};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info};

/// Failures reported by an external signing device
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("rejected on device")]
    UserRejected,
    #[error("device disconnected: {0}")]
    Disconnected(String),
    #[error("{0}")]
    Other(String),
}

impl From<DeviceError> for TxError {
    fn from(err: DeviceError) -> Self {
        match err {
            DeviceError::UserRejected => TxError::UserRejected,
            DeviceError::Disconnected(reason) => TxError::DeviceDisconnected(reason),
            DeviceError::Other(reason) => TxError::Wallet(reason),
        }
    }
}

/// Session with an external signer that waits for physical confirmation
#[async_trait]
pub trait DeviceSigner: Send + Sync {
    fn address(&self) -> Address;

    /// Sign a legacy transaction; may block until the user confirms
    async fn sign_transaction(&self, tx: &TypedTransaction) -> Result<Signature, DeviceError>;
}

/// Key held outside this process.
///
/// Shown the signing hash, answers with a 65-byte `r || s || v`
/// signature. `v` may be 0/1 or 27/28.
#[async_trait]
pub trait ExternalSigner: Send + Sync {
    fn address(&self) -> Address;

    async fn signature_for(&self, sighash: H256, tx: &TypedTransaction) -> TxResult<Vec<u8>>;
}

/// The ways a transaction can be signed
#[derive(Clone)]
pub enum SignerHandle {
    Local(LocalWallet),
    Hardware(Arc<dyn DeviceSigner>),
    Offline(Arc<dyn ExternalSigner>),
}

impl SignerHandle {
    pub fn address(&self) -> Address {
        match self {
            SignerHandle::Local(wallet) => wallet.address(),
            SignerHandle::Hardware(device) => device.address(),
            SignerHandle::Offline(external) => external.address(),
        }
    }

    /// Only the legacy shape is accepted by devices
    pub fn is_hardware(&self) -> bool {
        matches!(self, SignerHandle::Hardware(_))
    }

    /// Sign `tx`, built from `intent`.
    ///
    /// Device and offline signing are bounded by `sign_timeout` and by
    /// shutdown. Device failures are reported as-is, never retried.
    pub async fn sign(
        &self,
        intent: &TransactionIntent,
        tx: TypedTransaction,
        sign_timeout: Duration,
        shutdown: &mut watch::Receiver<bool>,
    ) -> TxResult<SignedTransaction> {
        let signature = match self {
            SignerHandle::Local(wallet) => wallet
                .clone()
                .with_chain_id(intent.chain_id)
                .sign_transaction_sync(&tx)
                .map_err(|e| TxError::Wallet(format!("failed to sign transaction: {}", e)))?,
            SignerHandle::Hardware(device) => {
                info!("Please confirm the transaction on your device");
                tokio::select! {
                    result = timeout(sign_timeout, device.sign_transaction(&tx)) => match result {
                        Ok(signed) => signed?,
                        Err(_) => return Err(TxError::timeout("device signature")),
                    },
                    _ = cancelled(shutdown) => {
                        return Err(TxError::Cancelled("device signing".to_string()));
                    }
                }
            }
            SignerHandle::Offline(external) => {
                let sighash = tx.sighash();
                info!("Hash to be signed: {:?}", sighash);
                let raw = tokio::select! {
                    result = timeout(sign_timeout, external.signature_for(sighash, &tx)) => match result {
                        Ok(raw) => raw?,
                        Err(_) => return Err(TxError::timeout("offline signature")),
                    },
                    _ = cancelled(shutdown) => {
                        return Err(TxError::Cancelled("offline signing".to_string()));
                    }
                };
                return attach_signature(intent, tx, &raw);
            }
        };

        let signed = SignedTransaction::new(TxShape::of(intent), tx, signature);
        debug!("Signed transaction {:?}", signed.hash);
        Ok(signed)
    }
}

/// Combine `tx` with a signature made elsewhere over its signing hash.
///
/// The signature must recover to `intent.from`.
pub fn attach_signature(
    intent: &TransactionIntent,
    tx: TypedTransaction,
    raw: &[u8],
) -> TxResult<SignedTransaction> {
    if raw.len() != 65 {
        return Err(TxError::Wallet(format!(
            "signature must be 65 bytes, got {}",
            raw.len()
        )));
    }
    let mut signature = Signature::try_from(raw)
        .map_err(|e| TxError::Wallet(format!("invalid signature: {}", e)))?;

    let parity = match signature.v {
        0 | 1 => signature.v,
        27 | 28 => signature.v - 27,
        v => return Err(TxError::Wallet(format!("unsupported recovery id {}", v))),
    };
    // EIP-155 form; typed envelopes reduce it back to the parity bit
    signature.v = parity + intent.chain_id * 2 + 35;

    let signer = signature
        .recover(tx.sighash())
        .map_err(|e| TxError::Wallet(format!("invalid signature: {}", e)))?;
    if signer != intent.from {
        return Err(TxError::Wallet(format!(
            "signature is from {:?}, expected {:?}",
            signer, intent.from
        )));
    }

    let signed = SignedTransaction::new(TxShape::of(intent), tx, signature);
    debug!("Attached external signature to {:?}", signed.hash);
    Ok(signed)
}

/// A signed transaction and its derived identity
#[derive(Debug, Clone, PartialEq)]
pub struct SignedTransaction {
    pub shape: TxShape,
    pub tx: TypedTransaction,
    pub signature: Signature,
    pub hash: H256,
    /// Raw envelope bytes sent to the node
    pub raw: Bytes,
}

impl SignedTransaction {
    pub fn new(shape: TxShape, tx: TypedTransaction, signature: Signature) -> Self {
        Self {
            shape,
            hash: tx.hash(&signature),
            raw: tx.rlp_signed(&signature),
            tx,
            signature,
        }
    }
}
