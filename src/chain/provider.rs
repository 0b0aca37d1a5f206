//! JSON-RPC chain client with multi-endpoint failover

use super::{BlockHeader, CallRequest, ChainClient};
use crate::config::NetworkConfig;
use crate::error::{TxError, TxResult};
use crate::units::{Unit, UnitAmount};

use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider, ProviderError};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, BlockNumber, Bytes, TransactionReceipt, TransactionRequest, H256, U256};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Chain client over one or more HTTP endpoints
pub struct EthersClient {
    /// Network name, for logs
    network: String,
    /// HTTP providers (multiple for failover)
    providers: Vec<Provider<Http>>,
    /// Current active provider index
    current: AtomicUsize,
}

impl EthersClient {
    /// Create a client for every parsable endpoint of the network
    pub fn new(config: &NetworkConfig) -> TxResult<Self> {
        let mut providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    providers.push(provider.interval(Duration::from_millis(100)));
                    debug!("Added HTTP provider for {}: {}", config.name, url);
                }
                Err(e) => warn!("Failed to create provider for {}: {}", url, e),
            }
        }

        if providers.is_empty() {
            return Err(TxError::Config(format!(
                "no valid RPC endpoints for network {}",
                config.name
            )));
        }

        Ok(Self {
            network: config.name.clone(),
            providers,
            current: AtomicUsize::new(0),
        })
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current.load(Ordering::Relaxed);
        &self.providers[idx % self.providers.len()]
    }

    /// Switch to the next endpoint
    pub fn failover(&self) {
        let current = self.current.load(Ordering::Relaxed);
        let next = (current + 1) % self.providers.len();
        self.current.store(next, Ordering::Relaxed);
        warn!("{} failover to provider {}", self.network, next);
    }

    /// Run a read against each endpoint in turn until one answers
    async fn read<T, F, Fut>(&self, operation: &str, f: F) -> TxResult<T>
    where
        F: Fn(Provider<Http>) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut last_error = None;
        for _ in 0..self.providers.len() {
            match f(self.http().clone()).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!("Failed to {} on {}: {}", operation, self.network, e);
                    last_error = Some(e.to_string());
                    self.failover();
                }
            }
        }

        Err(TxError::rpc(
            operation,
            last_error.unwrap_or_else(|| "no providers".to_string()),
        ))
    }
}

#[async_trait]
impl ChainClient for EthersClient {
    async fn pending_nonce(&self, address: Address) -> TxResult<u64> {
        let nonce = self
            .read("query nonce", |p| async move {
                p.get_transaction_count(address, Some(BlockNumber::Pending.into()))
                    .await
            })
            .await?;
        narrow("query nonce", nonce)
    }

    async fn chain_id(&self) -> TxResult<u64> {
        let id = self
            .read("query chain id", |p| async move { p.get_chainid().await })
            .await?;
        narrow("query chain id", id)
    }

    async fn estimate_gas(&self, call: &CallRequest) -> TxResult<u64> {
        let tx = typed_call(call);
        let gas = self
            .read("estimate gas", |p| {
                let tx = tx.clone();
                async move { p.estimate_gas(&tx, None).await }
            })
            .await?;
        narrow("estimate gas", gas)
    }

    async fn suggest_gas_price(&self) -> TxResult<UnitAmount> {
        let price = self
            .read("suggest gas price", |p| async move { p.get_gas_price().await })
            .await?;
        Ok(UnitAmount::from_base(price, Unit::Gwei))
    }

    async fn suggest_priority_fee(&self) -> TxResult<UnitAmount> {
        let tip = self
            .read("suggest priority fee", |p| async move {
                p.request::<_, U256>("eth_maxPriorityFeePerGas", ()).await
            })
            .await?;
        Ok(UnitAmount::from_base(tip, Unit::Gwei))
    }

    async fn latest_header(&self) -> TxResult<BlockHeader> {
        let block = self
            .read("fetch latest header", |p| async move {
                p.get_block(BlockNumber::Latest).await
            })
            .await?
            .ok_or_else(|| TxError::rpc("fetch latest header", "no latest block"))?;

        let number = block
            .number
            .ok_or_else(|| TxError::rpc("fetch latest header", "latest block has no number"))?;

        Ok(BlockHeader {
            number: number.as_u64(),
            base_fee: block.base_fee_per_gas,
        })
    }

    async fn balance(&self, address: Address) -> TxResult<UnitAmount> {
        let balance = self
            .read("query balance", |p| async move { p.get_balance(address, None).await })
            .await?;
        Ok(UnitAmount::from_base(balance, Unit::Ether))
    }

    /// Submission never fails over: a second endpoint could see the same transaction twice
    async fn submit_raw_transaction(&self, raw: Bytes) -> TxResult<H256> {
        let pending = self
            .http()
            .send_raw_transaction(raw)
            .await
            .map_err(|e| TxError::BroadcastFailed(e.to_string()))?;
        Ok(pending.tx_hash())
    }

    async fn receipt(&self, tx_hash: H256) -> TxResult<Option<TransactionReceipt>> {
        self.read("fetch receipt", |p| async move {
            p.get_transaction_receipt(tx_hash).await
        })
        .await
    }

    async fn call(&self, call: &CallRequest) -> TxResult<Bytes> {
        let tx = typed_call(call);
        self.read("call contract", |p| {
            let tx = tx.clone();
            async move { p.call(&tx, None).await }
        })
        .await
    }
}

fn typed_call(call: &CallRequest) -> TypedTransaction {
    let mut request = TransactionRequest::new()
        .value(call.value)
        .data(call.data.clone());
    if let Some(from) = call.from {
        request = request.from(from);
    }
    if let Some(to) = call.to {
        request = request.to(to);
    }
    request.into()
}

fn narrow(operation: &str, value: U256) -> TxResult<u64> {
    if value > U256::from(u64::MAX) {
        return Err(TxError::rpc(operation, format!("{} exceeds 64 bits", value)));
    }
    Ok(value.as_u64())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network(urls: &[&str]) -> NetworkConfig {
        NetworkConfig {
            name: "testnet".to_string(),
            rpc_urls: urls.iter().map(|u| u.to_string()).collect(),
            symbol: "ETH".to_string(),
            explorer_url: None,
        }
    }

    #[test]
    fn test_rejects_networks_without_valid_endpoints() {
        assert!(matches!(
            EthersClient::new(&network(&[])),
            Err(TxError::Config(_))
        ));
        assert!(EthersClient::new(&network(&["not a url"])).is_err());
    }

    #[test]
    fn test_failover_rotates_endpoints() {
        let client =
            EthersClient::new(&network(&["http://127.0.0.1:8545", "bad url", "http://127.0.0.1:8546"]))
                .unwrap();
        assert_eq!(client.providers.len(), 2);

        assert_eq!(client.http().url().port(), Some(8545));
        client.failover();
        assert_eq!(client.http().url().port(), Some(8546));
        client.failover();
        assert_eq!(client.http().url().port(), Some(8545));
    }

    #[test]
    fn test_typed_call_carries_fields() {
        let to = Address::repeat_byte(0x11);
        let call = CallRequest {
            from: None,
            to: Some(to),
            value: U256::from(7),
            data: Bytes::from(vec![0xde, 0xad]),
        };
        let tx = typed_call(&call);
        assert_eq!(tx.to_addr(), Some(&to));
        assert_eq!(tx.value(), Some(&U256::from(7)));
        assert_eq!(tx.data(), Some(&call.data));
        assert_eq!(tx.from(), None);
    }

    #[test]
    fn test_narrow_rejects_wide_values() {
        assert_eq!(narrow("query nonce", U256::from(5)).unwrap(), 5);
        assert!(narrow("query nonce", U256::MAX).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_endpoints_surface_rpc_error() {
        let client = EthersClient::new(&network(&["http://127.0.0.1:1"])).unwrap();
        let err = client.chain_id().await.unwrap_err();
        assert!(matches!(err, TxError::Rpc { .. }));
        assert!(err.is_retryable());
    }
}
