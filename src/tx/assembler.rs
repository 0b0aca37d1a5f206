//! Wire shape selection for a resolved transaction

use super::{ResolvedFees, TransactionIntent};

use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::transaction::eip2930::{AccessList, Eip2930TransactionRequest};
use ethers::types::{Eip1559TransactionRequest, TransactionRequest};
use std::fmt;
use tracing::info;

/// The three envelopes a transaction can be sent in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxShape {
    /// Plain RLP list, EIP-155 replay protection through `v`
    Legacy,
    /// EIP-2930 envelope with an empty access list
    ReplayProtected,
    /// EIP-1559 envelope
    DynamicFee,
}

impl TxShape {
    /// Shape chosen for an intent: hardware signers get legacy, otherwise the fee model decides
    pub fn of(intent: &TransactionIntent) -> Self {
        if intent.hardware {
            return TxShape::Legacy;
        }
        match intent.fees {
            ResolvedFees::Legacy { .. } => TxShape::ReplayProtected,
            ResolvedFees::DynamicFee { .. } => TxShape::DynamicFee,
        }
    }
}

impl fmt::Display for TxShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxShape::Legacy => write!(f, "legacy"),
            TxShape::ReplayProtected => write!(f, "accessList"),
            TxShape::DynamicFee => write!(f, "dynamicFee (eip1559)"),
        }
    }
}

/// Build the unsigned transaction for `intent`
pub fn assemble(intent: &TransactionIntent) -> TypedTransaction {
    let shape = TxShape::of(intent);
    info!("Transaction type: {}", shape);

    match (shape, intent.fees) {
        (TxShape::DynamicFee, ResolvedFees::DynamicFee { max_priority_fee, max_fee }) => {
            let mut tx = Eip1559TransactionRequest::new()
                .from(intent.from)
                .nonce(intent.nonce)
                .gas(intent.gas_limit)
                .value(intent.value.value())
                .data(intent.data.clone())
                .max_priority_fee_per_gas(max_priority_fee)
                .max_fee_per_gas(max_fee)
                .chain_id(intent.chain_id);
            if let Some(to) = intent.to {
                tx = tx.to(to);
            }
            TypedTransaction::Eip1559(tx)
        }
        (TxShape::ReplayProtected, fees) => TypedTransaction::Eip2930(
            Eip2930TransactionRequest::new(legacy_request(intent, fees), AccessList::default()),
        ),
        (_, fees) => TypedTransaction::Legacy(legacy_request(intent, fees)),
    }
}

fn legacy_request(intent: &TransactionIntent, fees: ResolvedFees) -> TransactionRequest {
    let mut tx = TransactionRequest::new()
        .from(intent.from)
        .nonce(intent.nonce)
        .gas(intent.gas_limit)
        .gas_price(fees.max_price())
        .value(intent.value.value())
        .data(intent.data.clone())
        .chain_id(intent.chain_id);
    if let Some(to) = intent.to {
        tx = tx.to(to);
    }
    tx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::{to_base_units, Unit};
    use ethers::types::{Address, Bytes, U256, U64};

    fn intent(fees: ResolvedFees, hardware: bool) -> TransactionIntent {
        TransactionIntent {
            from: Address::repeat_byte(0x01),
            to: Some(Address::repeat_byte(0x02)),
            value: to_base_units("1.5", Unit::Ether).unwrap(),
            data: Bytes::default(),
            nonce: 9,
            chain_id: 5,
            gas_limit: 21_000,
            fees,
            hardware,
        }
    }

    fn legacy_fees() -> ResolvedFees {
        ResolvedFees::Legacy {
            gas_price: U256::from(20_000_000_000u64),
        }
    }

    fn dynamic_fees() -> ResolvedFees {
        ResolvedFees::DynamicFee {
            max_priority_fee: U256::from(5),
            max_fee: U256::from(205),
        }
    }

    #[test]
    fn test_local_legacy_uses_access_list_envelope() {
        let tx = assemble(&intent(legacy_fees(), false));
        assert!(matches!(tx, TypedTransaction::Eip2930(_)));
        assert_eq!(tx.gas_price(), Some(U256::from(20_000_000_000u64)));
        assert_eq!(tx.chain_id(), Some(U64::from(5)));
        assert_eq!(tx.rlp().as_ref()[0], 0x01);
    }

    #[test]
    fn test_dynamic_fee_envelope() {
        let tx = assemble(&intent(dynamic_fees(), false));
        let TypedTransaction::Eip1559(ref inner) = tx else {
            panic!("expected dynamic fee shape, got {:?}", tx);
        };
        assert_eq!(inner.max_priority_fee_per_gas, Some(U256::from(5)));
        assert_eq!(inner.max_fee_per_gas, Some(U256::from(205)));
        assert_eq!(tx.nonce(), Some(&U256::from(9)));
        assert_eq!(tx.rlp().as_ref()[0], 0x02);
    }

    #[test]
    fn test_hardware_gets_legacy_with_chain_id() {
        let intent = intent(legacy_fees(), true);
        assert_eq!(TxShape::of(&intent), TxShape::Legacy);
        let tx = assemble(&intent);
        assert!(matches!(tx, TypedTransaction::Legacy(_)));
        assert_eq!(tx.chain_id(), Some(U64::from(5)));
        assert!(tx.rlp().as_ref()[0] >= 0xc0);
    }

    #[test]
    fn test_contract_creation_has_no_recipient() {
        let mut creation = intent(dynamic_fees(), false);
        creation.to = None;
        creation.data = Bytes::from(vec![0x60, 0x80]);
        let tx = assemble(&creation);
        assert!(tx.to().is_none());
        assert_eq!(tx.data(), Some(&creation.data));
    }
}
