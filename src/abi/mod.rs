//! ABI argument codec
//!
//! This module provides:
//! - The closed set of supported argument types
//! - Call data encoding from human string arguments
//! - Display decoding of call results
//! - Contract reads and ERC-20 helpers

pub mod codec;
pub mod contract;
pub mod kind;

pub use codec::{
    decode, decode_return_data, encode, encode_by_signature, selector, AbiCall, CallSource,
    ContractInterface, NamedValue,
};
pub use contract::{read_contract, Erc20};
pub use kind::{parse_address, AbiKind};
