//! End-to-end send pipeline: resolve, assemble, approve, gate, sign, broadcast, track

use super::gas::GasResolver;
use super::signer::{SignedTransaction, SignerHandle};
use super::{assemble, BuildRequest, TransactionIntent, TxShape};
use crate::chain::{wait_for_height, ChainClient, ConfirmationState, ConfirmationTracker, TrackerSettings};
use crate::error::{TxError, TxResult};
use crate::metrics;

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, H256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{error, info, warn};

/// Interactive go/no-go before anything is signed
#[async_trait]
pub trait Approval: Send + Sync {
    /// `true` to send the summarized transaction
    async fn confirm(&self, summary: &str) -> TxResult<bool>;
}

/// Timeouts for the pipeline stages
#[derive(Debug, Clone, Copy)]
pub struct SenderSettings {
    /// Bound for one resolution stage and for the broadcast
    pub rpc_timeout: Duration,
    /// Bound for hardware signing
    pub sign_timeout: Duration,
    pub tracker: TrackerSettings,
}

impl Default for SenderSettings {
    fn default() -> Self {
        Self {
            rpc_timeout: Duration::from_secs(30),
            sign_timeout: Duration::from_secs(120),
            tracker: TrackerSettings::default(),
        }
    }
}

/// One send, as handed over by the command line layer
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub build: BuildRequest,
    /// Hold submission until the head reaches this block
    pub wait_height: Option<u64>,
    pub height_poll_interval: Duration,
    pub height_timeout: Duration,
    /// Negative: do not wait for a receipt
    pub confirmations: i64,
    /// Skip the approval prompt
    pub no_confirm: bool,
}

/// Result of a broadcast transaction
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub tx_hash: H256,
    pub shape: TxShape,
    pub summary: String,
    /// Set for deployments
    pub contract_address: Option<Address>,
    pub state: ConfirmationState,
}

/// Transaction sender for one chain and one signer
pub struct TransactionSender {
    client: Arc<dyn ChainClient>,
    signer: SignerHandle,
    approval: Arc<dyn Approval>,
    resolver: GasResolver,
    tracker: ConfirmationTracker,
    settings: SenderSettings,
}

impl TransactionSender {
    pub fn new(
        client: Arc<dyn ChainClient>,
        signer: SignerHandle,
        approval: Arc<dyn Approval>,
        settings: SenderSettings,
    ) -> Self {
        info!(
            "Transaction sender initialized with {} wallet: {:?}",
            match &signer {
                SignerHandle::Local(_) => "local",
                SignerHandle::Hardware(_) => "hardware",
                SignerHandle::Offline(_) => "offline",
            },
            signer.address()
        );
        Self {
            resolver: GasResolver::new(client.clone(), settings.rpc_timeout),
            tracker: ConfirmationTracker::new(client.clone(), settings.tracker),
            client,
            signer,
            approval,
            settings,
        }
    }

    /// Resolve and assemble without signing
    pub async fn build(&self, request: &BuildRequest) -> TxResult<(TransactionIntent, TypedTransaction)> {
        if request.from != self.signer.address() {
            return Err(TxError::Wallet(format!(
                "sender {:?} does not match signer {:?}",
                request.from,
                self.signer.address()
            )));
        }

        let mut request = request.clone();
        request.hardware = self.signer.is_hardware();

        let resolved = self.resolver.resolve(&request).await?;
        let intent = TransactionIntent::new(&request, resolved);
        let tx = assemble(&intent);
        Ok((intent, tx))
    }

    /// Push a signed transaction to the node; never retried
    pub async fn broadcast(&self, signed: &SignedTransaction) -> TxResult<H256> {
        let submitted = timeout(
            self.settings.rpc_timeout,
            self.client.submit_raw_transaction(signed.raw.clone()),
        )
        .await
        .map_err(|_| TxError::BroadcastFailed("timeout".to_string()))?;

        match submitted {
            Ok(tx_hash) => Ok(tx_hash),
            Err(TxError::BroadcastFailed(reason)) => Err(TxError::BroadcastFailed(reason)),
            Err(e) => Err(TxError::BroadcastFailed(e.to_string())),
        }
    }

    /// Run the whole pipeline for one transaction
    pub async fn send(
        &self,
        request: SendRequest,
        shutdown: &mut watch::Receiver<bool>,
    ) -> TxResult<SendOutcome> {
        let (intent, tx) = match self.build(&request.build).await {
            Ok(built) => built,
            Err(e) => {
                metrics::record_build_failed(e.is_validation());
                return Err(e);
            }
        };

        let shape = TxShape::of(&intent);
        let summary = intent.to_string();
        let contract_address = intent.contract_address();
        info!("Transaction to be sent ({})\n{}", shape, summary);

        if !request.no_confirm && !self.approval.confirm(&summary).await? {
            info!("Transaction not sent");
            return Err(TxError::Cancelled("declined by user".to_string()));
        }

        wait_for_height(
            self.client.as_ref(),
            request.wait_height,
            request.height_poll_interval,
            request.height_timeout,
            shutdown,
        )
        .await?;

        let signed = self
            .signer
            .sign(&intent, tx, self.settings.sign_timeout, shutdown)
            .await?;

        let tx_hash = match self.broadcast(&signed).await {
            Ok(hash) => hash,
            Err(e) => {
                error!("Failed to send transaction {:?}: {}", signed.hash, e);
                return Err(e);
            }
        };
        metrics::record_tx_submitted(intent.chain_id);
        info!("Transaction sent: {:?}", tx_hash);
        if let Some(contract) = contract_address {
            info!("Contract will be deployed at {:?}", contract);
        }
        if tx_hash != signed.hash {
            warn!("Node reported hash {:?}, computed {:?}", tx_hash, signed.hash);
        }

        let state = self
            .tracker
            .track(tx_hash, request.confirmations, shutdown)
            .await;
        match &state {
            ConfirmationState::Included(_) | ConfirmationState::Confirmed { .. } => {
                metrics::record_tx_confirmed(intent.chain_id)
            }
            s if s.is_timeout() => metrics::record_confirmation_timeout(intent.chain_id),
            _ => {}
        }

        Ok(SendOutcome {
            tx_hash,
            shape,
            summary,
            contract_address,
            state,
        })
    }
}
