//! Configuration management for ether-tx
//!
//! Loads configuration from TOML files with environment variable substitution.

use crate::abi::{encode, encode_by_signature, parse_address, CallSource, ContractInterface};
use crate::chain::TrackerSettings;
use crate::error::{TxError, TxResult};
use crate::tx::{BuildRequest, GasOptions, SendRequest, SenderSettings};
use crate::units::{to_base_units, Unit};

use anyhow::{Context, Result};
use ethers::types::{Address, Bytes};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub network: NetworkConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    pub transaction: Option<TransactionConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    pub name: String,
    /// Tried in order; reads fail over to the next one
    pub rpc_urls: Vec<String>,
    #[serde(default = "default_symbol")]
    pub symbol: String,
    pub explorer_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WalletConfig {
    /// Env var holding the hex private key
    pub private_key_env: Option<String>,
    /// Sign elsewhere: the hash is printed and the signature read back.
    /// Takes precedence over `private_key_env`.
    pub offline_address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_secs: u64,
    #[serde(default = "default_receipt_timeout")]
    pub receipt_timeout_secs: u64,
    /// At least `receipt_timeout_secs`
    #[serde(default = "default_depth_timeout")]
    pub depth_timeout_secs: u64,
    #[serde(default = "default_sign_timeout")]
    pub sign_timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
}

/// One transaction described with human-friendly values
#[derive(Debug, Clone, Deserialize)]
pub struct TransactionConfig {
    /// Omit to deploy `data` as a contract
    pub to: Option<String>,
    /// Amount in ether
    #[serde(default = "default_value")]
    pub value: String,
    /// Method signature such as `transfer(address,uint256)`
    pub signature: Option<String>,
    /// Contract ABI: a JSON file path or the JSON itself
    pub abi: Option<String>,
    /// Method of `abi`; may be omitted when it has only one
    pub method: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    /// Raw hex call data
    pub data: Option<String>,
    #[serde(default)]
    pub gas: GasOptions,
    pub nonce: Option<u64>,
    pub chain_id: Option<u64>,
    pub wait_height: Option<u64>,
    #[serde(default = "default_height_poll_ms")]
    pub height_poll_interval_ms: u64,
    #[serde(default = "default_height_timeout")]
    pub height_timeout_secs: u64,
    #[serde(default)]
    pub confirmations: i64,
    #[serde(default)]
    pub no_confirm: bool,
}

fn default_symbol() -> String {
    "ETH".to_string()
}

fn default_rpc_timeout() -> u64 {
    30
}

fn default_receipt_timeout() -> u64 {
    300
}

fn default_depth_timeout() -> u64 {
    600
}

fn default_sign_timeout() -> u64 {
    120
}

fn default_value() -> String {
    "0".to_string()
}

fn default_height_poll_ms() -> u64 {
    1000
}

fn default_height_timeout() -> u64 {
    3600
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            rpc_timeout_secs: default_rpc_timeout(),
            receipt_timeout_secs: default_receipt_timeout(),
            depth_timeout_secs: default_depth_timeout(),
            sign_timeout_secs: default_sign_timeout(),
        }
    }
}

impl PipelineConfig {
    pub fn sender_settings(&self) -> SenderSettings {
        SenderSettings {
            rpc_timeout: Duration::from_secs(self.rpc_timeout_secs),
            sign_timeout: Duration::from_secs(self.sign_timeout_secs),
            tracker: TrackerSettings {
                receipt_timeout: Duration::from_secs(self.receipt_timeout_secs),
                depth_timeout: Duration::from_secs(self.depth_timeout_secs),
                ..TrackerSettings::default()
            },
        }
    }
}

impl Settings {
    /// Load settings from the file named by `ETHER_TX_CONFIG`
    pub fn load() -> Result<Self> {
        let config_path = env::var("ETHER_TX_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));
        Self::load_from(&config_path)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        // Substitute environment variables
        let config_str = substitute_env_vars(&config_str);

        let settings: Settings = toml::from_str(&config_str)
            .with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.network.rpc_urls.is_empty() {
            anyhow::bail!("Network {} has no RPC URLs configured", self.network.name);
        }

        let pipeline = &self.pipeline;
        for (name, secs) in [
            ("rpc_timeout_secs", pipeline.rpc_timeout_secs),
            ("receipt_timeout_secs", pipeline.receipt_timeout_secs),
            ("depth_timeout_secs", pipeline.depth_timeout_secs),
            ("sign_timeout_secs", pipeline.sign_timeout_secs),
        ] {
            if secs == 0 {
                anyhow::bail!("pipeline.{} must be greater than zero", name);
            }
        }
        if pipeline.depth_timeout_secs < pipeline.receipt_timeout_secs {
            anyhow::bail!(
                "pipeline.depth_timeout_secs ({}) must not be shorter than receipt_timeout_secs ({})",
                pipeline.depth_timeout_secs,
                pipeline.receipt_timeout_secs
            );
        }

        if let Some(address) = &self.wallet.offline_address {
            parse_address(address).context("Invalid wallet.offline_address")?;
        }

        if let Some(tx) = &self.transaction {
            tx.call_data()?;
            if tx.wait_height.is_some() && tx.height_poll_interval_ms == 0 {
                anyhow::bail!("transaction.height_poll_interval_ms must be greater than zero");
            }
        }

        Ok(())
    }
}

impl TransactionConfig {
    /// Turn the configured strings into a send request from `from`
    pub fn to_request(&self, from: Address) -> TxResult<SendRequest> {
        let to = self.to.as_deref().map(parse_address).transpose()?;

        let data = match self.call_data()? {
            Some(CallData::Signature(signature)) => {
                encode_by_signature(signature, &self.args)?.data()
            }
            Some(CallData::Abi(source)) => {
                let interface = load_interface(source)?;
                encode(
                    CallSource::Interface(&interface),
                    self.method.as_deref(),
                    &self.args,
                )?
                .data()
            }
            Some(CallData::Raw(raw)) => parse_hex_data(raw)?,
            None => {
                if !self.args.is_empty() {
                    return Err(TxError::Config(
                        "transaction.args given without a signature or abi".to_string(),
                    ));
                }
                Bytes::default()
            }
        };

        if to.is_none() && data.is_empty() {
            return Err(TxError::Config(
                "a transaction without a recipient must carry contract code".to_string(),
            ));
        }

        Ok(SendRequest {
            build: BuildRequest {
                from,
                to,
                value: to_base_units(&self.value, Unit::Ether)?,
                data,
                policy: self.gas.clone().into_policy()?,
                nonce: self.nonce,
                chain_id: self.chain_id,
                hardware: false,
            },
            wait_height: self.wait_height,
            height_poll_interval: Duration::from_millis(self.height_poll_interval_ms),
            height_timeout: Duration::from_secs(self.height_timeout_secs),
            confirmations: self.confirmations,
            no_confirm: self.no_confirm,
        })
    }
}

/// Where the call data of a configured transaction comes from
enum CallData<'a> {
    Signature(&'a str),
    Abi(&'a str),
    Raw(&'a str),
}

impl TransactionConfig {
    /// At most one of `signature`, `abi` and `data` may be set
    fn call_data(&self) -> TxResult<Option<CallData<'_>>> {
        let given: Vec<(&str, CallData<'_>)> = [
            ("signature", self.signature.as_deref().map(CallData::Signature)),
            ("abi", self.abi.as_deref().map(CallData::Abi)),
            ("data", self.data.as_deref().map(CallData::Raw)),
        ]
        .into_iter()
        .filter_map(|(name, source)| source.map(|source| (name, source)))
        .collect();

        if given.len() > 1 {
            let names: Vec<String> = given
                .iter()
                .map(|(name, _)| format!("transaction.{}", name))
                .collect();
            return Err(TxError::Config(format!("{} are exclusive", names.join(" and "))));
        }
        if self.method.is_some() && self.abi.is_none() {
            return Err(TxError::Config(
                "transaction.method needs transaction.abi".to_string(),
            ));
        }
        Ok(given.into_iter().next().map(|(_, source)| source))
    }
}

/// Inline JSON when it looks like JSON, a file path otherwise
fn load_interface(source: &str) -> TxResult<ContractInterface> {
    let trimmed = source.trim();
    if trimmed.starts_with('[') || trimmed.starts_with('{') {
        return ContractInterface::from_json(trimmed);
    }
    let json = std::fs::read_to_string(trimmed)
        .map_err(|e| TxError::Config(format!("failed to read abi file {}: {}", trimmed, e)))?;
    ContractInterface::from_json(&json)
}

fn parse_hex_data(raw: &str) -> TxResult<Bytes> {
    let digits = raw.trim().trim_start_matches("0x");
    hex::decode(digits)
        .map(Bytes::from)
        .map_err(|e| TxError::InvalidArgument {
            kind: "data".to_string(),
            value: raw.to_string(),
            reason: e.to_string(),
        })
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::FeeMode;
    use ethers::types::U256;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    const MINIMAL: &str = r#"
        [network]
        name = "devnet"
        rpc_urls = ["http://127.0.0.1:8545"]
    "#;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("ETHER_TX_TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${ETHER_TX_TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input);
        assert_eq!(result, "url = \"https://api.example.com/test_value/endpoint\"");
    }

    #[test]
    fn test_minimal_file_gets_defaults() {
        let file = write_config(MINIMAL);
        let settings = Settings::load_from(file.path()).unwrap();

        assert_eq!(settings.network.symbol, "ETH");
        assert_eq!(settings.pipeline.rpc_timeout_secs, 30);
        assert!(!settings.metrics.enabled);
        assert!(settings.transaction.is_none());

        let sender = settings.pipeline.sender_settings();
        assert_eq!(sender.tracker.receipt_timeout, Duration::from_secs(300));
        assert_eq!(sender.tracker.depth_timeout, Duration::from_secs(600));
        assert_eq!(sender.tracker.poll_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_rejects_empty_rpc_list_and_zero_timeouts() {
        let file = write_config(
            r#"
            [network]
            name = "devnet"
            rpc_urls = []
        "#,
        );
        assert!(Settings::load_from(file.path()).is_err());

        let file = write_config(&format!("{}\n[pipeline]\nsign_timeout_secs = 0\n", MINIMAL));
        let err = Settings::load_from(file.path()).unwrap_err();
        assert!(err.to_string().contains("sign_timeout_secs"));
    }

    #[test]
    fn test_depth_wait_may_not_be_shorter_than_receipt_wait() {
        let file = write_config(&format!(
            "{}
[pipeline]
receipt_timeout_secs = 900
",
            MINIMAL
        ));
        let err = Settings::load_from(file.path()).unwrap_err();
        assert!(err.to_string().contains("depth_timeout_secs"));

        let file = write_config(&format!(
            "{}
[pipeline]
receipt_timeout_secs = 900
depth_timeout_secs = 900
",
            MINIMAL
        ));
        assert!(Settings::load_from(file.path()).is_ok());
    }

    #[test]
    fn test_offline_address_must_parse() {
        let file = write_config(&format!(
            "{}
[wallet]
offline_address = \"0x1234\"
",
            MINIMAL
        ));
        assert!(Settings::load_from(file.path()).is_err());

        let file = write_config(&format!(
            "{}
[wallet]
offline_address = \"0x1111111111111111111111111111111111111111\"
",
            MINIMAL
        ));
        let settings = Settings::load_from(file.path()).unwrap();
        assert!(settings.wallet.offline_address.is_some());
    }

    #[test]
    fn test_transaction_section_becomes_request() {
        let file = write_config(&format!(
            r#"{}
            [transaction]
            to = "0x2222222222222222222222222222222222222222"
            value = "0.5"
            signature = "transfer(address,uint256)"
            args = ["0x3333333333333333333333333333333333333333", "1000"]
            confirmations = 2

            [transaction.gas]
            mode = "eip1559"
            gas_tip_cap = "1.5"
            gas_limit = "60000"
        "#,
            MINIMAL
        ));
        let settings = Settings::load_from(file.path()).unwrap();
        let from = Address::repeat_byte(0x11);
        let request = settings.transaction.unwrap().to_request(from).unwrap();

        assert_eq!(request.build.from, from);
        assert_eq!(request.build.to, Some(Address::repeat_byte(0x22)));
        assert_eq!(
            request.build.value.value(),
            U256::from(500_000_000_000_000_000u64)
        );
        assert_eq!(hex::encode(&request.build.data[..4]), "a9059cbb");
        assert_eq!(request.build.policy.gas_limit, Some(60_000));
        assert!(matches!(request.build.policy.mode, FeeMode::DynamicFee { .. }));
        assert_eq!(request.confirmations, 2);
        assert!(request.wait_height.is_none());
    }

    #[test]
    fn test_conflicting_transaction_fields() {
        let base = TransactionConfig {
            to: Some("0x2222222222222222222222222222222222222222".to_string()),
            value: "0".to_string(),
            signature: None,
            abi: None,
            method: None,
            args: vec![],
            data: None,
            gas: GasOptions::default(),
            nonce: None,
            chain_id: None,
            wait_height: None,
            height_poll_interval_ms: 1000,
            height_timeout_secs: 60,
            confirmations: 0,
            no_confirm: true,
        };
        let from = Address::repeat_byte(0x11);

        let stray_args = TransactionConfig {
            args: vec!["1".to_string()],
            ..base.clone()
        };
        assert!(matches!(stray_args.to_request(from), Err(TxError::Config(_))));

        let deploy_nothing = TransactionConfig { to: None, ..base.clone() };
        assert!(matches!(deploy_nothing.to_request(from), Err(TxError::Config(_))));

        let bad_hex = TransactionConfig {
            data: Some("0xzz".to_string()),
            ..base.clone()
        };
        assert!(matches!(
            bad_hex.to_request(from),
            Err(TxError::InvalidArgument { .. })
        ));

        let legacy_with_tip = TransactionConfig {
            gas: GasOptions {
                mode: Some("legacy".to_string()),
                gas_tip_cap: Some("1".to_string()),
                ..GasOptions::default()
            },
            ..base
        };
        assert!(matches!(
            legacy_with_tip.to_request(from),
            Err(TxError::ConflictingGasOptions(_))
        ));
    }

    const TRANSFER_ABI: &str = r#"[{"type":"function","name":"transfer","stateMutability":"nonpayable",
        "inputs":[{"name":"to","type":"address"},{"name":"value","type":"uint256"}],
        "outputs":[{"name":"","type":"bool"}]}]"#;

    fn abi_call(abi: &str, method: Option<&str>) -> TransactionConfig {
        TransactionConfig {
            to: Some("0x2222222222222222222222222222222222222222".to_string()),
            value: "0".to_string(),
            signature: None,
            abi: Some(abi.to_string()),
            method: method.map(str::to_string),
            args: vec![
                "0x3333333333333333333333333333333333333333".to_string(),
                "1000".to_string(),
            ],
            data: None,
            gas: GasOptions::default(),
            nonce: None,
            chain_id: None,
            wait_height: None,
            height_poll_interval_ms: 1000,
            height_timeout_secs: 60,
            confirmations: 0,
            no_confirm: true,
        }
    }

    #[test]
    fn test_abi_method_encodes_like_signature() {
        let from = Address::repeat_byte(0x11);
        let by_signature = TransactionConfig {
            abi: None,
            signature: Some("transfer(address,uint256)".to_string()),
            ..abi_call(TRANSFER_ABI, None)
        }
        .to_request(from)
        .unwrap();

        let inline = abi_call(TRANSFER_ABI, Some("transfer")).to_request(from).unwrap();
        assert_eq!(inline.build.data, by_signature.build.data);

        let abi_file = write_config(TRANSFER_ABI);
        let path = abi_file.path().to_string_lossy().to_string();
        let from_file = abi_call(&path, None).to_request(from).unwrap();
        assert_eq!(from_file.build.data, by_signature.build.data);

        let missing = abi_call("/nonexistent/erc20.json", None);
        assert!(matches!(missing.to_request(from), Err(TxError::Config(_))));
    }

    #[test]
    fn test_call_data_sources_are_exclusive() {
        let from = Address::repeat_byte(0x11);

        let with_signature = TransactionConfig {
            signature: Some("transfer(address,uint256)".to_string()),
            ..abi_call(TRANSFER_ABI, None)
        };
        assert!(matches!(with_signature.to_request(from), Err(TxError::Config(_))));

        let with_data = TransactionConfig {
            data: Some("0xa9059cbb".to_string()),
            ..abi_call(TRANSFER_ABI, None)
        };
        assert!(matches!(with_data.to_request(from), Err(TxError::Config(_))));

        let method_alone = TransactionConfig {
            abi: None,
            ..abi_call(TRANSFER_ABI, Some("transfer"))
        };
        assert!(matches!(method_alone.to_request(from), Err(TxError::Config(_))));

        let file = write_config(&format!(
            r#"{}
            [transaction]
            to = "0x2222222222222222222222222222222222222222"
            signature = "transfer(address,uint256)"
            data = "0xa9059cbb"
        "#,
            MINIMAL
        ));
        let err = Settings::load_from(file.path()).unwrap_err();
        assert!(err.to_string().contains("exclusive"));
    }
}
