//! ether-tx - Send one configured transaction on an Ethereum-style chain
//!
//! Reads the settings file, resolves the `[transaction]` section against the
//! network, asks for approval and follows the transaction to its requested
//! confirmation depth.

use anyhow::{Context, Result};
use async_trait::async_trait;
use ethers::signers::LocalWallet;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, H256};
use std::env;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use ether_tx::chain::{ChainClient, EthersClient};
use ether_tx::config::Settings;
use ether_tx::metrics;
use ether_tx::shutdown::Shutdown;
use ether_tx::abi::parse_address;
use ether_tx::tx::{Approval, ExternalSigner, SignerHandle, TransactionSender};
use ether_tx::{TxError, TxResult};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting ether-tx v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration for network {} ({} RPC endpoints)",
        settings.network.name,
        settings.network.rpc_urls.len()
    );

    let client: Arc<dyn ChainClient> = Arc::new(EthersClient::new(&settings.network)?);
    let chain_id = client
        .chain_id()
        .await
        .context("Failed to reach the network")?;
    info!("Connected to {} (chain {})", settings.network.name, chain_id);

    let Some(transaction) = settings.transaction.clone() else {
        info!("No [transaction] configured, nothing to send");
        return Ok(());
    };

    let signer = load_signer(&settings)?;
    let request = transaction
        .to_request(signer.address())
        .context("Invalid [transaction] section")?;

    let shutdown = Shutdown::new();
    shutdown.listen();
    let mut shutdown_rx = shutdown.subscribe();

    let sender = TransactionSender::new(
        client,
        signer,
        Arc::new(StdinApproval),
        settings.pipeline.sender_settings(),
    );

    let result = sender.send(request, &mut shutdown_rx).await;
    match &result {
        Ok(outcome) => {
            info!(
                "Transaction {:?} finished as {}",
                outcome.tx_hash,
                outcome.state.name()
            );
            if let Some(contract) = outcome.contract_address {
                info!("Contract address: {:?}", contract);
            }
            if let Some(explorer) = &settings.network.explorer_url {
                info!("{}/tx/{:?}", explorer.trim_end_matches('/'), outcome.tx_hash);
            }
            if outcome.state.is_timeout() {
                warn!("Confirmation wait timed out; the transaction may still land");
            }
        }
        Err(e) => error!("Transaction failed: {}", e),
    }

    if settings.metrics.enabled {
        info!("Metrics:\n{}", metrics::render());
    }

    result.map(|_| ()).context("Transaction was not completed")
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,ether_tx=debug,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

fn load_signer(settings: &Settings) -> Result<SignerHandle> {
    if let Some(address) = &settings.wallet.offline_address {
        let address = parse_address(address).context("Invalid wallet.offline_address")?;
        info!("Signing offline for {:?}", address);
        return Ok(SignerHandle::Offline(Arc::new(StdinSigner { address })));
    }
    Ok(SignerHandle::Local(load_wallet(settings)?))
}

fn load_wallet(settings: &Settings) -> Result<LocalWallet> {
    let key_env = settings
        .wallet
        .private_key_env
        .as_deref()
        .context("wallet.private_key_env is not configured")?;
    let key = env::var(key_env).with_context(|| format!("{} is not set", key_env))?;
    key.trim()
        .trim_start_matches("0x")
        .parse::<LocalWallet>()
        .with_context(|| format!("{} does not hold a valid private key", key_env))
}

/// Asks on the terminal before anything is signed
struct StdinApproval;

#[async_trait]
impl Approval for StdinApproval {
    async fn confirm(&self, summary: &str) -> TxResult<bool> {
        let prompt_failed = |e: std::io::Error| TxError::Cancelled(format!("approval prompt: {}", e));

        {
            let mut stdout = std::io::stdout();
            writeln!(stdout, "{}", summary).map_err(prompt_failed)?;
            write!(stdout, "Send ? [y/N] ").map_err(prompt_failed)?;
            stdout.flush().map_err(prompt_failed)?;
        }

        let mut answer = String::new();
        BufReader::new(tokio::io::stdin())
            .read_line(&mut answer)
            .await
            .map_err(prompt_failed)?;

        let answer = answer.trim().to_ascii_lowercase();
        Ok(answer == "y" || answer == "yes")
    }
}

/// Prints the signing hash and reads the signature made by another tool
struct StdinSigner {
    address: Address,
}

#[async_trait]
impl ExternalSigner for StdinSigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn signature_for(&self, sighash: H256, tx: &TypedTransaction) -> TxResult<Vec<u8>> {
        let prompt_failed = |e: std::io::Error| TxError::Wallet(format!("signature prompt: {}", e));

        {
            let mut stdout = std::io::stdout();
            writeln!(stdout, "Hash to be signed: {:?}", sighash).map_err(prompt_failed)?;
            if let Ok(json) = serde_json::to_string(tx) {
                writeln!(stdout, "Transaction json: {}", json).map_err(prompt_failed)?;
            }
            write!(stdout, "Enter signature: ").map_err(prompt_failed)?;
            stdout.flush().map_err(prompt_failed)?;
        }

        let mut line = String::new();
        BufReader::new(tokio::io::stdin())
            .read_line(&mut line)
            .await
            .map_err(prompt_failed)?;

        let digits = line.trim().trim_start_matches("0x");
        hex::decode(digits).map_err(|e| TxError::Wallet(format!("invalid signature: {}", e)))
    }
}
