//! Call data encoding from human string arguments and display decoding of results

use super::kind::AbiKind;
use crate::error::{TxError, TxResult};

use ethers::abi::{Abi, Function, Token};
use ethers::types::Bytes;
use serde::Serialize;
use sha3::{Digest, Keccak256};
use tracing::{debug, warn};

/// Parsed contract interface (ABI JSON)
#[derive(Debug, Clone)]
pub struct ContractInterface {
    abi: Abi,
}

/// Where argument types come from when encoding a call
#[derive(Debug, Clone, Copy)]
pub enum CallSource<'a> {
    /// Bare canonical signature such as `transfer(address,uint256)`
    Signature(&'a str),
    /// Full interface description
    Interface(&'a ContractInterface),
}

/// An encoded method call: selector plus typed arguments
#[derive(Debug, Clone, PartialEq)]
pub struct AbiCall {
    pub signature: String,
    pub selector: [u8; 4],
    pub arguments: Vec<(AbiKind, Token)>,
    /// Set when the interface's only method was used regardless of the requested name
    pub implicit_method: bool,
}

impl AbiCall {
    /// Selector followed by the ABI-encoded arguments
    pub fn data(&self) -> Bytes {
        let tokens: Vec<Token> = self.arguments.iter().map(|(_, t)| t.clone()).collect();
        let mut data = self.selector.to_vec();
        data.extend(ethers::abi::encode(&tokens));
        data.into()
    }
}

/// A decoded output rendered for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamedValue {
    pub name: String,
    pub value: String,
}

impl ContractInterface {
    pub fn from_json(json: &str) -> TxResult<Self> {
        let abi: Abi =
            serde_json::from_str(json).map_err(|e| TxError::InvalidAbi(e.to_string()))?;
        Ok(Self { abi })
    }

    pub fn method_count(&self) -> usize {
        self.abi.functions().count()
    }

    /// Resolve the method to call.
    ///
    /// An interface with exactly one method uses it whatever name was
    /// requested; the override is logged and flagged on the returned call.
    pub fn method(&self, name: Option<&str>, arity: usize) -> TxResult<(&Function, bool)> {
        let requested = name.filter(|n| !n.is_empty());

        if self.method_count() == 1 {
            if let Some(only) = self.abi.functions().next() {
                let overridden = requested.map_or(false, |n| n != only.name);
                if overridden {
                    warn!(
                        "Interface has a single method {}; ignoring requested method {:?}",
                        only.name, requested
                    );
                }
                return Ok((only, overridden));
            }
        }

        let name = requested.ok_or_else(|| TxError::MethodNotFound("<unspecified>".to_string()))?;
        let overloads = self
            .abi
            .functions
            .get(name)
            .ok_or_else(|| TxError::MethodNotFound(name.to_string()))?;

        match overloads.as_slice() {
            [single] => Ok((single, false)),
            _ => overloads
                .iter()
                .find(|f| f.inputs.len() == arity)
                .map(|f| (f, false))
                .ok_or_else(|| TxError::ArityMismatch {
                    method: name.to_string(),
                    expected: overloads.first().map_or(0, |f| f.inputs.len()),
                    got: arity,
                }),
        }
    }

    /// Encode a call to `method` with human string arguments
    pub fn encode_call(&self, method: Option<&str>, args: &[String]) -> TxResult<AbiCall> {
        let (function, implicit_method) = self.method(method, args.len())?;
        encode_function(function, implicit_method, args)
    }
}

/// Encode a call to an already resolved interface method
pub(crate) fn encode_function(
    function: &Function,
    implicit_method: bool,
    args: &[String],
) -> TxResult<AbiCall> {
    let kinds: Vec<AbiKind> = function
        .inputs
        .iter()
        .map(|p| AbiKind::from_param(&p.kind))
        .collect();

    let signature = canonical_signature(&function.name, &kinds);
    let arguments = tokenize_args(&signature, &kinds, args)?;

    Ok(AbiCall {
        signature,
        selector: function.short_signature(),
        arguments,
        implicit_method,
    })
}

/// Encode a call from either a bare signature or an interface
pub fn encode(source: CallSource<'_>, method: Option<&str>, args: &[String]) -> TxResult<AbiCall> {
    match source {
        CallSource::Signature(signature) => encode_by_signature(signature, args),
        CallSource::Interface(interface) => interface.encode_call(method, args),
    }
}

/// Encode a call from a canonical signature without an interface description
pub fn encode_by_signature(signature: &str, args: &[String]) -> TxResult<AbiCall> {
    let signature: String = signature.chars().filter(|c| !c.is_whitespace()).collect();
    let (name, kinds) = parse_signature(&signature)?;

    for kind in &kinds {
        if !kind.allowed_in_signature() {
            return Err(TxError::UnsupportedAbiType(kind.to_string()));
        }
    }

    let canonical = canonical_signature(name, &kinds);
    let arguments = tokenize_args(&canonical, &kinds, args)?;

    Ok(AbiCall {
        selector: selector(&canonical),
        signature: canonical,
        arguments,
        implicit_method: false,
    })
}

/// First four bytes of the Keccak-256 hash of a canonical signature
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = Keccak256::digest(signature.as_bytes());
    let mut out = [0u8; 4];
    out.copy_from_slice(&hash[..4]);
    out
}

/// Render raw results of `function` as `(outputName, displayString)` pairs
pub fn decode(function: &Function, results: &[Token]) -> TxResult<Vec<NamedValue>> {
    if results.len() != function.outputs.len() {
        return Err(TxError::OutputArityMismatch {
            method: function.name.clone(),
            expected: function.outputs.len(),
            got: results.len(),
        });
    }

    function
        .outputs
        .iter()
        .zip(results)
        .enumerate()
        .map(|(i, (output, token))| {
            let name = if output.name.is_empty() {
                format!("output{}", i)
            } else {
                output.name.clone()
            };
            let value = AbiKind::from_param(&output.kind).display(&name, token)?;
            Ok(NamedValue { name, value })
        })
        .collect()
}

/// Decode raw return bytes of `function` and render them
pub fn decode_return_data(function: &Function, data: &[u8]) -> TxResult<Vec<NamedValue>> {
    let tokens = function
        .decode_output(data)
        .map_err(|e| TxError::InvalidAbi(format!("decode {} output: {}", function.name, e)))?;
    decode(function, &tokens)
}

fn parse_signature(signature: &str) -> TxResult<(&str, Vec<AbiKind>)> {
    let invalid = || TxError::InvalidAbi(format!("malformed signature {:?}", signature));

    let open = signature.find('(').ok_or_else(invalid)?;
    let name = &signature[..open];
    let inner = signature[open + 1..].strip_suffix(')').ok_or_else(invalid)?;
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(invalid());
    }

    let kinds = if inner.is_empty() {
        Vec::new()
    } else {
        inner.split(',').map(AbiKind::parse).collect()
    };
    Ok((name, kinds))
}

fn canonical_signature(name: &str, kinds: &[AbiKind]) -> String {
    let types: Vec<String> = kinds.iter().map(|k| k.to_string()).collect();
    format!("{}({})", name, types.join(","))
}

fn tokenize_args(
    signature: &str,
    kinds: &[AbiKind],
    args: &[String],
) -> TxResult<Vec<(AbiKind, Token)>> {
    if kinds.len() != args.len() {
        return Err(TxError::ArityMismatch {
            method: signature.to_string(),
            expected: kinds.len(),
            got: args.len(),
        });
    }
    for kind in kinds {
        kind.ensure_supported()?;
    }

    kinds
        .iter()
        .zip(args)
        .map(|(kind, arg)| {
            debug!("input type: {}, input value: {}", kind, arg);
            Ok((kind.clone(), kind.tokenize(arg)?))
        })
        .collect()
}
