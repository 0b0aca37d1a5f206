//! Read-only contract calls and ERC-20 helpers

use super::codec::{decode_return_data, encode_function, AbiCall, ContractInterface, NamedValue};
use crate::chain::{CallRequest, ChainClient};
use crate::error::{TxError, TxResult};
use crate::units::{to_base_units, Unit, UnitAmount};

use ethers::types::{Address, U256};
use tracing::{debug, info};

const ERC20_ABI: &str = r#"[
    {"type":"function","name":"name","stateMutability":"view","inputs":[],"outputs":[{"name":"","type":"string"}]},
    {"type":"function","name":"symbol","stateMutability":"view","inputs":[],"outputs":[{"name":"","type":"string"}]},
    {"type":"function","name":"decimals","stateMutability":"view","inputs":[],"outputs":[{"name":"","type":"uint8"}]},
    {"type":"function","name":"totalSupply","stateMutability":"view","inputs":[],"outputs":[{"name":"","type":"uint256"}]},
    {"type":"function","name":"balanceOf","stateMutability":"view",
     "inputs":[{"name":"owner","type":"address"}],"outputs":[{"name":"balance","type":"uint256"}]},
    {"type":"function","name":"allowance","stateMutability":"view",
     "inputs":[{"name":"owner","type":"address"},{"name":"spender","type":"address"}],
     "outputs":[{"name":"remaining","type":"uint256"}]},
    {"type":"function","name":"transfer","stateMutability":"nonpayable",
     "inputs":[{"name":"to","type":"address"},{"name":"value","type":"uint256"}],
     "outputs":[{"name":"success","type":"bool"}]},
    {"type":"function","name":"approve","stateMutability":"nonpayable",
     "inputs":[{"name":"spender","type":"address"},{"name":"value","type":"uint256"}],
     "outputs":[{"name":"success","type":"bool"}]},
    {"type":"function","name":"transferFrom","stateMutability":"nonpayable",
     "inputs":[{"name":"from","type":"address"},{"name":"to","type":"address"},{"name":"value","type":"uint256"}],
     "outputs":[{"name":"success","type":"bool"}]}
]"#;

/// Call `method` on `contract` against the latest state and render the outputs
pub async fn read_contract<C: ChainClient + ?Sized>(
    client: &C,
    contract: Address,
    interface: &ContractInterface,
    method: Option<&str>,
    args: &[String],
) -> TxResult<Vec<NamedValue>> {
    let (function, implicit_method) = interface.method(method, args.len())?;
    let call = encode_function(function, implicit_method, args)?;
    debug!("call {} on {:?}", call.signature, contract);

    let returned = client
        .call(&CallRequest {
            from: None,
            to: Some(contract),
            value: U256::zero(),
            data: call.data(),
        })
        .await?;

    decode_return_data(function, &returned)
}

/// ERC-20 token at a fixed address
pub struct Erc20 {
    address: Address,
    interface: ContractInterface,
}

impl Erc20 {
    pub fn new(address: Address) -> TxResult<Self> {
        Ok(Self {
            address,
            interface: ContractInterface::from_json(ERC20_ABI)?,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    async fn read_one<C: ChainClient + ?Sized>(
        &self,
        client: &C,
        method: &str,
        args: &[String],
    ) -> TxResult<String> {
        info!("call erc20 {}", method);
        let values = read_contract(client, self.address, &self.interface, Some(method), args).await?;
        let got = values.len();
        values
            .into_iter()
            .next()
            .map(|v| v.value)
            .ok_or_else(|| TxError::OutputArityMismatch {
                method: method.to_string(),
                expected: 1,
                got,
            })
    }

    async fn read_amount<C: ChainClient + ?Sized>(
        &self,
        client: &C,
        method: &str,
        args: &[String],
        unit: Unit,
    ) -> TxResult<UnitAmount> {
        let raw = self.read_one(client, method, args).await?;
        let value = U256::from_dec_str(&raw)
            .map_err(|e| TxError::InvalidAbi(format!("{} returned {:?}: {}", method, raw, e)))?;
        Ok(UnitAmount::from_base(value, unit))
    }

    pub async fn name<C: ChainClient + ?Sized>(&self, client: &C) -> TxResult<String> {
        self.read_one(client, "name", &[]).await
    }

    pub async fn symbol<C: ChainClient + ?Sized>(&self, client: &C) -> TxResult<String> {
        self.read_one(client, "symbol", &[]).await
    }

    pub async fn decimals<C: ChainClient + ?Sized>(&self, client: &C) -> TxResult<u8> {
        let raw = self.read_one(client, "decimals", &[]).await?;
        raw.parse()
            .map_err(|e| TxError::InvalidAbi(format!("decimals returned {:?}: {}", raw, e)))
    }

    /// Unit scale declared by the token
    pub async fn unit<C: ChainClient + ?Sized>(&self, client: &C) -> TxResult<Unit> {
        Unit::token(self.decimals(client).await?)
    }

    pub async fn total_supply<C: ChainClient + ?Sized>(
        &self,
        client: &C,
        unit: Unit,
    ) -> TxResult<UnitAmount> {
        self.read_amount(client, "totalSupply", &[], unit).await
    }

    pub async fn balance_of<C: ChainClient + ?Sized>(
        &self,
        client: &C,
        owner: Address,
        unit: Unit,
    ) -> TxResult<UnitAmount> {
        self.read_amount(client, "balanceOf", &[hex_address(owner)], unit)
            .await
    }

    pub async fn allowance<C: ChainClient + ?Sized>(
        &self,
        client: &C,
        owner: Address,
        spender: Address,
        unit: Unit,
    ) -> TxResult<UnitAmount> {
        self.read_amount(
            client,
            "allowance",
            &[hex_address(owner), hex_address(spender)],
            unit,
        )
        .await
    }

    /// Call data moving `amount` (human decimal in `unit`) to `to`
    pub fn transfer(&self, to: Address, amount: &str, unit: Unit) -> TxResult<AbiCall> {
        let amount = to_base_units(amount, unit)?;
        self.interface.encode_call(
            Some("transfer"),
            &[hex_address(to), amount.value().to_string()],
        )
    }

    pub fn approve(&self, spender: Address, amount: &str, unit: Unit) -> TxResult<AbiCall> {
        let amount = to_base_units(amount, unit)?;
        self.interface.encode_call(
            Some("approve"),
            &[hex_address(spender), amount.value().to_string()],
        )
    }

    pub fn transfer_from(
        &self,
        from: Address,
        to: Address,
        amount: &str,
        unit: Unit,
    ) -> TxResult<AbiCall> {
        let amount = to_base_units(amount, unit)?;
        self.interface.encode_call(
            Some("transferFrom"),
            &[hex_address(from), hex_address(to), amount.value().to_string()],
        )
    }
}

fn hex_address(address: Address) -> String {
    format!("{:#x}", address)
}
