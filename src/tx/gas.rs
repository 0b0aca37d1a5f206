//! Gas policy validation and resolution
//!
//! Resolution order: nonce, chain id, gas limit (then limit ratio), fee
//! fields by mode, fee ratio, then the send-all value. Every chain lookup
//! shares one timeout.

use super::BuildRequest;
use crate::chain::{CallRequest, ChainClient};
use crate::error::{TxError, TxResult};
use crate::units::{to_base_units, Ratio, Unit, UnitAmount};

use ethers::types::U256;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Requested fee pricing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeeMode {
    /// Dynamic fees when the chain reports a base fee, legacy otherwise
    Auto,
    Legacy {
        price: Option<UnitAmount>,
    },
    DynamicFee {
        tip: Option<UnitAmount>,
        cap: Option<UnitAmount>,
    },
}

/// Gas request for one build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GasPolicy {
    pub mode: FeeMode,
    /// Applied to every resolved fee field
    pub fee_ratio: Option<Ratio>,
    pub gas_limit: Option<u64>,
    /// Applied to the estimated or explicit limit
    pub gas_limit_ratio: Option<Ratio>,
    /// Send the whole balance minus fees
    pub send_all: bool,
}

impl Default for GasPolicy {
    fn default() -> Self {
        Self {
            mode: FeeMode::Auto,
            fee_ratio: None,
            gas_limit: None,
            gas_limit_ratio: None,
            send_all: false,
        }
    }
}

impl GasPolicy {
    /// Reject option combinations before anything touches the network
    pub fn validate(&self, data: &[u8]) -> TxResult<()> {
        if self.gas_limit.is_some() && self.gas_limit_ratio.is_some() {
            return Err(TxError::ConflictingGasOptions(
                "gas limit conflicts with gas limit ratio".to_string(),
            ));
        }

        if self.send_all {
            if !matches!(self.mode, FeeMode::Legacy { .. }) {
                return Err(TxError::ConflictingGasOptions(
                    "send all only works in legacy gas mode".to_string(),
                ));
            }
            if !data.is_empty() {
                return Err(TxError::ConflictingGasOptions(
                    "send all does not support call data".to_string(),
                ));
            }
        }

        Ok(())
    }
}

/// Gas options as given on the command line or in the settings file
///
/// Fee values are in gwei.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GasOptions {
    /// `auto`, `legacy` or `eip1559`
    #[serde(default)]
    pub mode: Option<String>,
    pub gas_price: Option<String>,
    pub gas_tip_cap: Option<String>,
    pub gas_fee_cap: Option<String>,
    pub gas_limit: Option<String>,
    pub gas_limit_ratio: Option<String>,
    pub gas_ratio: Option<String>,
    #[serde(default)]
    pub send_all: bool,
}

impl GasOptions {
    pub fn into_policy(self) -> TxResult<GasPolicy> {
        let mode_name = self.mode.as_deref().unwrap_or("auto");
        let conflict = |field: &str| {
            Err(TxError::ConflictingGasOptions(format!(
                "no need for {} in {} gas mode",
                field, mode_name
            )))
        };

        let mode = match mode_name {
            "auto" => {
                if self.gas_tip_cap.is_some() {
                    return conflict("gas tip cap");
                }
                if self.gas_fee_cap.is_some() {
                    return conflict("gas fee cap");
                }
                if self.gas_price.is_some() {
                    return conflict("gas price");
                }
                FeeMode::Auto
            }
            "legacy" => {
                if self.gas_tip_cap.is_some() {
                    return conflict("gas tip cap");
                }
                if self.gas_fee_cap.is_some() {
                    return conflict("gas fee cap");
                }
                FeeMode::Legacy {
                    price: gwei(self.gas_price.as_deref())?,
                }
            }
            "eip1559" => {
                if self.gas_price.is_some() {
                    return conflict("gas price");
                }
                FeeMode::DynamicFee {
                    tip: gwei(self.gas_tip_cap.as_deref())?,
                    cap: gwei(self.gas_fee_cap.as_deref())?,
                }
            }
            other => {
                return Err(TxError::ConflictingGasOptions(format!(
                    "invalid gas mode: {}",
                    other
                )))
            }
        };

        let gas_limit = self
            .gas_limit
            .as_deref()
            .map(|limit| {
                limit
                    .trim()
                    .parse::<u64>()
                    .map_err(|e| TxError::InvalidAmount(format!("gas limit {}: {}", limit, e)))
            })
            .transpose()?;

        Ok(GasPolicy {
            mode,
            fee_ratio: self.gas_ratio.as_deref().map(str::parse).transpose()?,
            gas_limit,
            gas_limit_ratio: self.gas_limit_ratio.as_deref().map(str::parse).transpose()?,
            send_all: self.send_all,
        })
    }
}

fn gwei(amount: Option<&str>) -> TxResult<Option<UnitAmount>> {
    amount.map(|a| to_base_units(a, Unit::Gwei)).transpose()
}

/// Fully resolved fee fields, in wei per gas
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedFees {
    Legacy {
        gas_price: U256,
    },
    DynamicFee {
        max_priority_fee: U256,
        max_fee: U256,
    },
}

impl ResolvedFees {
    /// Multiply every fee field by `ratio`
    pub fn scale(self, ratio: &Ratio) -> TxResult<Self> {
        Ok(match self {
            ResolvedFees::Legacy { gas_price } => ResolvedFees::Legacy {
                gas_price: ratio.apply(gas_price)?,
            },
            ResolvedFees::DynamicFee {
                max_priority_fee,
                max_fee,
            } => ResolvedFees::DynamicFee {
                max_priority_fee: ratio.apply(max_priority_fee)?,
                max_fee: ratio.apply(max_fee)?,
            },
        })
    }

    /// Highest price per gas the sender may pay
    pub fn max_price(&self) -> U256 {
        match self {
            ResolvedFees::Legacy { gas_price } => *gas_price,
            ResolvedFees::DynamicFee { max_fee, .. } => *max_fee,
        }
    }
}

impl fmt::Display for ResolvedFees {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let gwei = |v: U256| UnitAmount::from_base(v, Unit::Gwei);
        match self {
            ResolvedFees::Legacy { gas_price } => write!(f, "gas price {}", gwei(*gas_price)),
            ResolvedFees::DynamicFee {
                max_priority_fee,
                max_fee,
            } => write!(
                f,
                "tip cap {}, fee cap {}",
                gwei(*max_priority_fee),
                gwei(*max_fee)
            ),
        }
    }
}

/// Everything the assembler needs beyond the request itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPolicy {
    pub nonce: u64,
    pub chain_id: u64,
    pub gas_limit: u64,
    pub fees: ResolvedFees,
    /// Final value in ether; differs from the request under send-all
    pub value: UnitAmount,
}

/// Resolves a gas policy against the chain
pub struct GasResolver {
    client: Arc<dyn ChainClient>,
    rpc_timeout: Duration,
}

impl GasResolver {
    pub fn new(client: Arc<dyn ChainClient>, rpc_timeout: Duration) -> Self {
        Self {
            client,
            rpc_timeout,
        }
    }

    pub async fn resolve(&self, request: &BuildRequest) -> TxResult<ResolvedPolicy> {
        request.policy.validate(&request.data)?;
        let value = request.value.convert(Unit::Ether)?;

        match timeout(self.rpc_timeout, self.resolve_with_chain(request, value)).await {
            Ok(result) => result,
            Err(_) => Err(TxError::timeout("resolve transaction parameters")),
        }
    }

    async fn resolve_with_chain(
        &self,
        request: &BuildRequest,
        value: UnitAmount,
    ) -> TxResult<ResolvedPolicy> {
        let policy = &request.policy;

        let nonce = match request.nonce {
            Some(nonce) => nonce,
            None => {
                debug!("query nonce..");
                self.client.pending_nonce(request.from).await?
            }
        };
        debug!("nonce: {}", nonce);

        let chain_id = match request.chain_id {
            Some(id) => id,
            None => {
                debug!("query chain id..");
                self.client.chain_id().await?
            }
        };
        debug!("chain id: {}", chain_id);

        let mut gas_limit = match policy.gas_limit {
            Some(limit) => limit,
            None => {
                let call = CallRequest {
                    from: Some(request.from),
                    to: request.to,
                    value: if policy.send_all {
                        U256::zero()
                    } else {
                        value.value()
                    },
                    data: request.data.clone(),
                };
                self.client.estimate_gas(&call).await?
            }
        };
        if let Some(ratio) = &policy.gas_limit_ratio {
            gas_limit = ratio.apply_u64(gas_limit)?;
            debug!("gas limit scaled by {}", ratio);
        }
        debug!("gas limit: {}", gas_limit);

        let mut fees = self.resolve_fees(&policy.mode, request.hardware).await?;
        if let Some(ratio) = &policy.fee_ratio {
            fees = fees.scale(ratio)?;
            debug!("after gas ratio {}: {}", ratio, fees);
        }
        debug!("fees: {}", fees);

        let value = if policy.send_all {
            self.send_all_value(request, gas_limit, &fees).await?
        } else {
            value
        };

        Ok(ResolvedPolicy {
            nonce,
            chain_id,
            gas_limit,
            fees,
            value,
        })
    }

    async fn resolve_fees(&self, mode: &FeeMode, hardware: bool) -> TxResult<ResolvedFees> {
        let mode = match mode {
            FeeMode::Legacy { .. } => mode.clone(),
            _ if hardware => {
                if matches!(mode, FeeMode::DynamicFee { tip, cap } if tip.is_some() || cap.is_some()) {
                    warn!("Hardware signer only supports legacy transactions; ignoring tip and fee cap");
                }
                info!("Hardware signer: forcing legacy gas mode");
                FeeMode::Legacy { price: None }
            }
            _ => mode.clone(),
        };

        match mode {
            FeeMode::Auto => {
                info!("Gas mode: auto");
                let header = self.client.latest_header().await?;
                match header.base_fee {
                    Some(base_fee) => {
                        debug!("chain supports dynamic fees, base fee {}", base_fee);
                        let tip = self.client.suggest_priority_fee().await?.value();
                        Ok(ResolvedFees::DynamicFee {
                            max_priority_fee: tip,
                            max_fee: fee_cap(tip, base_fee)?,
                        })
                    }
                    None => {
                        debug!("chain has no base fee, using legacy pricing");
                        let gas_price = self.client.suggest_gas_price().await?.value();
                        Ok(ResolvedFees::Legacy { gas_price })
                    }
                }
            }
            FeeMode::Legacy { price } => {
                info!("Gas mode: legacy");
                let gas_price = match price {
                    Some(price) => price.value(),
                    None => self.client.suggest_gas_price().await?.value(),
                };
                Ok(ResolvedFees::Legacy { gas_price })
            }
            FeeMode::DynamicFee { tip, cap } => {
                info!("Gas mode: eip1559");
                let tip = match tip {
                    Some(tip) => tip.value(),
                    None => self.client.suggest_priority_fee().await?.value(),
                };
                let cap = match cap {
                    Some(cap) => cap.value(),
                    None => {
                        let header = self.client.latest_header().await?;
                        let base_fee = header.base_fee.ok_or(TxError::NoBaseFee)?;
                        fee_cap(tip, base_fee)?
                    }
                };
                Ok(ResolvedFees::DynamicFee {
                    max_priority_fee: tip,
                    max_fee: cap,
                })
            }
        }
    }

    async fn send_all_value(
        &self,
        request: &BuildRequest,
        gas_limit: u64,
        fees: &ResolvedFees,
    ) -> TxResult<UnitAmount> {
        let ResolvedFees::Legacy { gas_price } = fees else {
            return Err(TxError::ConflictingGasOptions(
                "send all only works in legacy gas mode".to_string(),
            ));
        };

        info!("sendAll mode");
        let balance = self.client.balance(request.from).await?;
        let fee = UnitAmount::from_base(*gas_price, Unit::Gwei)
            .mul_gas(gas_limit)?
            .convert(Unit::Ether)?;
        info!("sendAll tx fee: {}", fee);

        let value = balance
            .checked_sub(&fee)?
            .filter(|remaining| !remaining.is_zero())
            .ok_or_else(|| TxError::InsufficientBalance {
                have: balance.to_string(),
                need: fee.to_string(),
            })?;
        info!("sendAll value: {}", value);
        Ok(value)
    }
}

/// tip + 2 x base fee
fn fee_cap(tip: U256, base_fee: U256) -> TxResult<U256> {
    base_fee
        .checked_mul(U256::from(2))
        .and_then(|doubled| doubled.checked_add(tip))
        .ok_or_else(|| TxError::InvalidAmount("fee cap overflow".to_string()))
}
