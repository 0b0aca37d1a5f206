//! Transaction building, signing and submission

pub mod assembler;
pub mod gas;
pub mod sender;
pub mod signer;

pub use assembler::{assemble, TxShape};
pub use gas::{FeeMode, GasOptions, GasPolicy, GasResolver, ResolvedFees, ResolvedPolicy};
pub use sender::{Approval, SendOutcome, SendRequest, SenderSettings, TransactionSender};
pub use signer::{
    attach_signature, DeviceError, DeviceSigner, ExternalSigner, SignedTransaction, SignerHandle,
};

use crate::error::TxResult;
use crate::units::{Unit, UnitAmount};

use ethers::types::{Address, Bytes};
use ethers::utils::get_contract_address;
use std::fmt;

/// Caller input for one build, before any chain lookups
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub from: Address,
    /// Absent for contract creation
    pub to: Option<Address>,
    /// Native-coin amount; replaced under send-all
    pub value: UnitAmount,
    pub data: Bytes,
    pub policy: GasPolicy,
    pub nonce: Option<u64>,
    pub chain_id: Option<u64>,
    /// Signing happens on an external device that only takes legacy transactions
    pub hardware: bool,
}

/// Fully resolved transaction, ready for assembly
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionIntent {
    pub from: Address,
    pub to: Option<Address>,
    pub value: UnitAmount,
    pub data: Bytes,
    pub nonce: u64,
    pub chain_id: u64,
    pub gas_limit: u64,
    pub fees: ResolvedFees,
    pub hardware: bool,
}

impl TransactionIntent {
    pub fn new(request: &BuildRequest, resolved: ResolvedPolicy) -> Self {
        Self {
            from: request.from,
            to: request.to,
            value: resolved.value,
            data: request.data.clone(),
            nonce: resolved.nonce,
            chain_id: resolved.chain_id,
            gas_limit: resolved.gas_limit,
            fees: resolved.fees,
            hardware: request.hardware,
        }
    }

    /// Address a deployment will create, derived from sender and nonce
    pub fn contract_address(&self) -> Option<Address> {
        match self.to {
            Some(_) => None,
            None => Some(get_contract_address(self.from, self.nonce)),
        }
    }

    /// Value plus the most the fees can cost, in ether
    pub fn max_cost(&self) -> TxResult<UnitAmount> {
        let fee = UnitAmount::from_base(self.fees.max_price(), Unit::Gwei)
            .mul_gas(self.gas_limit)?
            .convert(Unit::Ether)?;
        self.value.checked_add(&fee)
    }
}

impl fmt::Display for TransactionIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let to = match self.to {
            Some(to) => format!("{:?}", to),
            None => "<contract creation>".to_string(),
        };
        writeln!(f, "from:      {:?}", self.from)?;
        writeln!(f, "to:        {}", to)?;
        if let Some(contract) = self.contract_address() {
            writeln!(f, "contract:  {:?}", contract)?;
        }
        writeln!(f, "value:     {}", self.value)?;
        writeln!(f, "data:      {} bytes", self.data.len())?;
        writeln!(f, "nonce:     {}", self.nonce)?;
        writeln!(f, "chain id:  {}", self.chain_id)?;
        writeln!(f, "gas limit: {}", self.gas_limit)?;
        write!(f, "fees:      {}", self.fees)
    }
}
