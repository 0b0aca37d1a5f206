//! Closed set of ABI argument types and their string parse/display rules

use crate::error::{TxError, TxResult};

use ethers::abi::{ParamType, Token};
use ethers::types::{Address, I256, U256};
use ethers::utils::to_checksum;
use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;

lazy_static! {
    static ref ADDRESS_RE: Regex = Regex::new(r"^0x[0-9a-fA-F]{40}$").unwrap();
}

/// Widths up to this many bits are parsed through native integers
const NATIVE_BITS: usize = 64;

/// Supported ABI argument types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbiKind {
    Bool,
    Uint(usize),
    Int(usize),
    Address,
    Bytes,
    FixedBytes(usize),
    String,
    /// One-dimensional dynamic array of a scalar kind
    Array(Box<AbiKind>),
    /// Anything outside the set above, kept for error reporting
    Unsupported(String),
}

impl AbiKind {
    /// Look up the strategy for a canonical type name
    pub fn parse(type_name: &str) -> AbiKind {
        let name = type_name.trim();
        if let Some(inner) = name.strip_suffix("[]") {
            let inner_kind = AbiKind::parse_scalar(inner);
            return match inner_kind {
                AbiKind::Unsupported(_) => AbiKind::Unsupported(name.to_string()),
                scalar => AbiKind::Array(Box::new(scalar)),
            };
        }
        AbiKind::parse_scalar(name)
    }

    fn parse_scalar(name: &str) -> AbiKind {
        match name {
            "bool" => AbiKind::Bool,
            "address" => AbiKind::Address,
            "bytes" => AbiKind::Bytes,
            "string" => AbiKind::String,
            "uint" => AbiKind::Uint(256),
            "int" => AbiKind::Int(256),
            _ => {
                let int_width = |bits: usize| bits > 0 && bits <= 256 && bits % 8 == 0;
                if let Some(bits) = sized(name, "uint", int_width) {
                    AbiKind::Uint(bits)
                } else if let Some(bits) = sized(name, "int", int_width) {
                    AbiKind::Int(bits)
                } else if let Some(size) = sized(name, "bytes", |n| n > 0 && n <= 32) {
                    AbiKind::FixedBytes(size)
                } else {
                    AbiKind::Unsupported(name.to_string())
                }
            }
        }
    }

    /// Map a parsed interface parameter onto the supported set
    pub fn from_param(param: &ParamType) -> AbiKind {
        match param {
            ParamType::Bool => AbiKind::Bool,
            ParamType::Uint(bits) => AbiKind::Uint(*bits),
            ParamType::Int(bits) => AbiKind::Int(*bits),
            ParamType::Address => AbiKind::Address,
            ParamType::Bytes => AbiKind::Bytes,
            ParamType::FixedBytes(size) => AbiKind::FixedBytes(*size),
            ParamType::String => AbiKind::String,
            ParamType::Array(inner) => match AbiKind::from_param(inner) {
                AbiKind::Array(_) | AbiKind::Unsupported(_) => {
                    AbiKind::Unsupported(param.to_string())
                }
                scalar => AbiKind::Array(Box::new(scalar)),
            },
            ParamType::FixedArray(..) | ParamType::Tuple(_) => {
                AbiKind::Unsupported(param.to_string())
            }
        }
    }

    /// Types accepted by the selector-only signature mode
    pub fn allowed_in_signature(&self) -> bool {
        match self {
            AbiKind::Address
            | AbiKind::Uint(_)
            | AbiKind::FixedBytes(32)
            | AbiKind::Bytes
            | AbiKind::String => true,
            AbiKind::Array(inner) => inner.allowed_in_signature(),
            _ => false,
        }
    }

    /// Fail early for kinds outside the supported set
    pub fn ensure_supported(&self) -> TxResult<()> {
        match self {
            AbiKind::Unsupported(name) => Err(TxError::UnsupportedAbiType(name.clone())),
            _ => Ok(()),
        }
    }

    /// Parse a human string argument into a token of this kind
    pub fn tokenize(&self, arg: &str) -> TxResult<Token> {
        match self {
            AbiKind::Bool => match arg {
                "true" => Ok(Token::Bool(true)),
                "false" => Ok(Token::Bool(false)),
                _ => Err(self.invalid(arg, "expected true or false")),
            },
            AbiKind::Uint(bits) => self.parse_uint(*bits, arg).map(Token::Uint),
            AbiKind::Int(bits) => self
                .parse_int(*bits, arg)
                .map(|v| Token::Int(v.into_raw())),
            AbiKind::Address => parse_address(arg).map(Token::Address),
            AbiKind::Bytes => self.decode_hex(arg).map(Token::Bytes),
            AbiKind::FixedBytes(size) => {
                let bytes = self.decode_hex(arg)?;
                if bytes.len() != *size {
                    return Err(self.invalid(
                        arg,
                        &format!("expected {} bytes, got {}", size, bytes.len()),
                    ));
                }
                Ok(Token::FixedBytes(bytes))
            }
            AbiKind::String => Ok(Token::String(arg.to_string())),
            AbiKind::Array(inner) => {
                let items: Vec<String> = serde_json::from_str(arg)
                    .map_err(|e| self.invalid(arg, &format!("expected JSON array of strings: {}", e)))?;
                let tokens = items
                    .iter()
                    .map(|item| inner.tokenize(item))
                    .collect::<TxResult<Vec<_>>>()?;
                Ok(Token::Array(tokens))
            }
            AbiKind::Unsupported(name) => Err(TxError::UnsupportedAbiType(name.clone())),
        }
    }

    /// Render a decoded token, asserting it matches this kind
    pub fn display(&self, name: &str, token: &Token) -> TxResult<String> {
        let mismatch = || TxError::TypeAssertionFailed {
            name: name.to_string(),
            expected: self.to_string(),
        };

        match (self, token) {
            (AbiKind::Bool, Token::Bool(v)) => Ok(v.to_string()),
            (AbiKind::Uint(bits), Token::Uint(v)) => {
                if !fits_unsigned(*v, *bits) {
                    return Err(mismatch());
                }
                Ok(v.to_string())
            }
            (AbiKind::Int(bits), Token::Int(raw)) => {
                let v = I256::from_raw(*raw);
                if !fits_signed(v, *bits) {
                    return Err(mismatch());
                }
                Ok(v.to_string())
            }
            (AbiKind::Address, Token::Address(addr)) => Ok(to_checksum(addr, None)),
            (AbiKind::Bytes, Token::Bytes(bytes)) => Ok(format!("0x{}", hex::encode(bytes))),
            (AbiKind::FixedBytes(size), Token::FixedBytes(bytes)) if bytes.len() == *size => {
                Ok(format!("0x{}", hex::encode(bytes)))
            }
            (AbiKind::String, Token::String(s)) => Ok(s.clone()),
            (AbiKind::Array(inner), Token::Array(items)) => {
                let rendered = items
                    .iter()
                    .map(|item| inner.display(name, item))
                    .collect::<TxResult<Vec<_>>>()?;
                serde_json::to_string(&rendered)
                    .map_err(|e| TxError::InvalidAbi(format!("render array: {}", e)))
            }
            (AbiKind::Unsupported(type_name), _) => {
                Err(TxError::UnsupportedAbiType(type_name.clone()))
            }
            _ => Err(mismatch()),
        }
    }

    fn parse_uint(&self, bits: usize, arg: &str) -> TxResult<U256> {
        let value = if bits <= NATIVE_BITS {
            let v: u64 = arg
                .parse()
                .map_err(|e| self.invalid(arg, &format!("{}", e)))?;
            U256::from(v)
        } else {
            U256::from_dec_str(arg).map_err(|e| self.invalid(arg, &format!("{}", e)))?
        };
        if !fits_unsigned(value, bits) {
            return Err(self.invalid(arg, &format!("does not fit in {} bits", bits)));
        }
        Ok(value)
    }

    fn parse_int(&self, bits: usize, arg: &str) -> TxResult<I256> {
        let value = if bits <= NATIVE_BITS {
            let v: i64 = arg
                .parse()
                .map_err(|e| self.invalid(arg, &format!("{}", e)))?;
            I256::from(v)
        } else {
            I256::from_dec_str(arg).map_err(|e| self.invalid(arg, &format!("{}", e)))?
        };
        if !fits_signed(value, bits) {
            return Err(self.invalid(arg, &format!("does not fit in {} bits", bits)));
        }
        Ok(value)
    }

    fn decode_hex(&self, arg: &str) -> TxResult<Vec<u8>> {
        let digits = arg.strip_prefix("0x").unwrap_or(arg);
        hex::decode(digits).map_err(|e| self.invalid(arg, &format!("{}", e)))
    }

    fn invalid(&self, arg: &str, reason: &str) -> TxError {
        TxError::InvalidArgument {
            kind: self.to_string(),
            value: arg.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for AbiKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbiKind::Bool => write!(f, "bool"),
            AbiKind::Uint(bits) => write!(f, "uint{}", bits),
            AbiKind::Int(bits) => write!(f, "int{}", bits),
            AbiKind::Address => write!(f, "address"),
            AbiKind::Bytes => write!(f, "bytes"),
            AbiKind::FixedBytes(size) => write!(f, "bytes{}", size),
            AbiKind::String => write!(f, "string"),
            AbiKind::Array(inner) => write!(f, "{}[]", inner),
            AbiKind::Unsupported(name) => write!(f, "{}", name),
        }
    }
}

/// Validate the `0x` + 40 hex digit form, then convert
pub fn parse_address(arg: &str) -> TxResult<Address> {
    if !ADDRESS_RE.is_match(arg) {
        return Err(TxError::InvalidArgument {
            kind: "address".to_string(),
            value: arg.to_string(),
            reason: "expected 0x followed by 40 hex digits".to_string(),
        });
    }
    arg.parse::<Address>().map_err(|e| TxError::InvalidArgument {
        kind: "address".to_string(),
        value: arg.to_string(),
        reason: e.to_string(),
    })
}

/// Width suffix of names like `uint64` or `bytes32`
fn sized(name: &str, prefix: &str, valid: impl Fn(usize) -> bool) -> Option<usize> {
    name.strip_prefix(prefix)
        .and_then(|width| width.parse::<usize>().ok())
        .filter(|width| valid(*width))
}

fn fits_unsigned(value: U256, bits: usize) -> bool {
    bits >= 256 || (value >> bits).is_zero()
}

fn fits_signed(value: I256, bits: usize) -> bool {
    if bits >= 256 {
        return true;
    }
    let limit = I256::from_raw(U256::one() << (bits - 1));
    value >= -limit && value < limit
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_type_names() {
        assert_eq!(AbiKind::parse("uint256"), AbiKind::Uint(256));
        assert_eq!(AbiKind::parse("uint"), AbiKind::Uint(256));
        assert_eq!(AbiKind::parse("int24"), AbiKind::Int(24));
        assert_eq!(AbiKind::parse("bytes32"), AbiKind::FixedBytes(32));
        assert_eq!(
            AbiKind::parse("address[]"),
            AbiKind::Array(Box::new(AbiKind::Address))
        );
        for unsupported in ["uint7", "uint512", "bytes33", "(uint256,address)", "uint256[][]", "address[2]"] {
            assert!(
                matches!(AbiKind::parse(unsupported), AbiKind::Unsupported(_)),
                "accepted {}",
                unsupported
            );
        }
    }

    #[test]
    fn test_nested_params_are_unsupported() {
        let nested = ParamType::Array(Box::new(ParamType::Array(Box::new(ParamType::Uint(256)))));
        assert!(matches!(AbiKind::from_param(&nested), AbiKind::Unsupported(_)));
        let tuple = ParamType::Tuple(vec![ParamType::Address]);
        let err = AbiKind::from_param(&tuple).tokenize("x").unwrap_err();
        assert!(matches!(err, TxError::UnsupportedAbiType(_)));
    }

    #[test]
    fn test_native_and_big_integer_paths_agree() {
        for value in ["0", "1", "255", "18446744073709551615"] {
            let native = AbiKind::Uint(64).tokenize(value).unwrap();
            let big = AbiKind::Uint(72).tokenize(value).unwrap();
            assert_eq!(ethers::abi::encode(&[native]), ethers::abi::encode(&[big]));
        }
        for value in ["-1", "-9223372036854775808", "9223372036854775807"] {
            let native = AbiKind::Int(64).tokenize(value).unwrap();
            let big = AbiKind::Int(128).tokenize(value).unwrap();
            assert_eq!(ethers::abi::encode(&[native]), ethers::abi::encode(&[big]));
        }
    }

    #[test]
    fn test_integer_range_is_checked() {
        assert!(AbiKind::Uint(8).tokenize("255").is_ok());
        assert!(AbiKind::Uint(8).tokenize("256").is_err());
        assert!(AbiKind::Uint(8).tokenize("-1").is_err());
        assert!(AbiKind::Int(8).tokenize("-128").is_ok());
        assert!(AbiKind::Int(8).tokenize("128").is_err());
        assert!(AbiKind::Uint(96).tokenize(&(U256::one() << 96).to_string()).is_err());
        assert!(AbiKind::Int(256).tokenize("-1").is_ok());
    }

    #[test]
    fn test_address_pattern_is_enforced() {
        let ok = AbiKind::Address.tokenize("0x00000000000000000000000000000000000000ab");
        assert!(ok.is_ok());
        for bad in [
            "00000000000000000000000000000000000000ab",
            "0x00ab",
            "0xZZ000000000000000000000000000000000000ab",
        ] {
            assert!(matches!(
                AbiKind::Address.tokenize(bad),
                Err(TxError::InvalidArgument { .. })
            ));
        }
    }

    #[test]
    fn test_bytes_and_arrays() {
        assert_eq!(
            AbiKind::Bytes.tokenize("0x1234").unwrap(),
            Token::Bytes(vec![0x12, 0x34])
        );
        assert!(AbiKind::FixedBytes(32).tokenize("0x1234").is_err());

        let kind = AbiKind::parse("uint256[]");
        assert_eq!(
            kind.tokenize(r#"["1", "2"]"#).unwrap(),
            Token::Array(vec![Token::Uint(U256::from(1)), Token::Uint(U256::from(2))])
        );
        assert!(kind.tokenize("[1, 2]").is_err());
    }

    #[test]
    fn test_display_asserts_type() {
        let rendered = AbiKind::Int(256)
            .display("delta", &Token::Int(I256::from(-5).into_raw()))
            .unwrap();
        assert_eq!(rendered, "-5");

        let err = AbiKind::Uint(256)
            .display("amount", &Token::String("5".to_string()))
            .unwrap_err();
        assert!(matches!(err, TxError::TypeAssertionFailed { .. }));

        let too_wide = AbiKind::Uint(8).display("small", &Token::Uint(U256::from(300)));
        assert!(too_wide.is_err());

        let list = AbiKind::parse("string[]")
            .display(
                "names",
                &Token::Array(vec![Token::String("a".into()), Token::String("b".into())]),
            )
            .unwrap();
        assert_eq!(list, r#"["a","b"]"#);
    }
}
