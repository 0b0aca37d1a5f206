//! Conversion between human decimal strings and integer base-unit amounts
//!
//! Amounts are parsed as exact decimals: a string with more fractional
//! digits than its unit can represent is rejected, never rounded.

use crate::error::{TxError, TxResult};

use ethers::types::U256;
use ethers::utils::{format_units, parse_units};
use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;
use std::str::FromStr;

lazy_static! {
    static ref DECIMAL_RE: Regex = Regex::new(r"^[0-9]+(\.[0-9]+)?$").unwrap();
}

/// U256 holds at most 78 decimal digits; stay one below to rule out overflow
const MAX_DIGITS: usize = 77;

/// Unit scale an amount is expressed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Unit {
    /// Native coin, 18 decimals over wei
    Ether,
    /// Fee unit, 9 decimals over wei
    Gwei,
    /// ERC-20 style token with its declared decimals
    Token(u8),
}

impl Unit {
    /// Token unit, rejecting decimals U256 cannot scale by
    pub fn token(decimals: u8) -> TxResult<Self> {
        if decimals as usize >= MAX_DIGITS {
            return Err(TxError::InvalidAmount(format!(
                "token decimals {} out of range",
                decimals
            )));
        }
        Ok(Unit::Token(decimals))
    }

    pub fn decimals(&self) -> u32 {
        match self {
            Unit::Ether => 18,
            Unit::Gwei => 9,
            Unit::Token(decimals) => *decimals as u32,
        }
    }

    /// Ether and gwei amounts are both counted in wei
    fn shares_base_with(&self, other: Unit) -> bool {
        match (self, other) {
            (Unit::Ether | Unit::Gwei, Unit::Ether | Unit::Gwei) => true,
            (Unit::Token(a), Unit::Token(b)) => *a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unit::Ether => write!(f, "ether"),
            Unit::Gwei => write!(f, "gwei"),
            Unit::Token(decimals) => write!(f, "token({})", decimals),
        }
    }
}

/// An integer amount of base units tagged with the unit it is shown in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitAmount {
    value: U256,
    unit: Unit,
}

impl UnitAmount {
    pub fn from_base(value: U256, unit: Unit) -> Self {
        Self { value, unit }
    }

    pub fn zero(unit: Unit) -> Self {
        Self::from_base(U256::zero(), unit)
    }

    /// Raw base-unit value (wei for ether and gwei)
    pub fn value(&self) -> U256 {
        self.value
    }

    pub fn unit(&self) -> Unit {
        self.unit
    }

    pub fn is_zero(&self) -> bool {
        self.value.is_zero()
    }

    /// Re-tag the amount in another unit over the same base
    pub fn convert(self, unit: Unit) -> TxResult<Self> {
        if !self.unit.shares_base_with(unit) {
            return Err(TxError::InvalidAmount(format!(
                "cannot convert {} amount to {}",
                self.unit, unit
            )));
        }
        Ok(Self::from_base(self.value, unit))
    }

    pub fn checked_add(&self, other: &UnitAmount) -> TxResult<UnitAmount> {
        self.ensure_same_unit(other)?;
        self.value
            .checked_add(other.value)
            .map(|value| Self::from_base(value, self.unit))
            .ok_or_else(|| TxError::InvalidAmount("amount overflow".to_string()))
    }

    /// Subtract, returning `None` when the result would be negative
    pub fn checked_sub(&self, other: &UnitAmount) -> TxResult<Option<UnitAmount>> {
        self.ensure_same_unit(other)?;
        Ok(self
            .value
            .checked_sub(other.value)
            .map(|value| Self::from_base(value, self.unit)))
    }

    /// Multiply a per-gas price by a gas amount
    pub fn mul_gas(&self, gas: u64) -> TxResult<UnitAmount> {
        self.value
            .checked_mul(U256::from(gas))
            .map(|value| Self::from_base(value, self.unit))
            .ok_or_else(|| TxError::InvalidAmount("fee overflow".to_string()))
    }

    /// Scale by a decimal ratio, flooring to an integer
    pub fn scale(&self, ratio: &Ratio) -> TxResult<UnitAmount> {
        Ok(Self::from_base(ratio.apply(self.value)?, self.unit))
    }

    fn ensure_same_unit(&self, other: &UnitAmount) -> TxResult<()> {
        if self.unit != other.unit {
            return Err(TxError::InvalidAmount(format!(
                "unit mismatch: {} vs {}",
                self.unit, other.unit
            )));
        }
        Ok(())
    }
}

impl fmt::Display for UnitAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", to_decimal_string(self), self.unit)
    }
}

/// Parse a human decimal string into base units of `unit`
pub fn to_base_units(amount: &str, unit: Unit) -> TxResult<UnitAmount> {
    let amount = amount.trim();
    if !DECIMAL_RE.is_match(amount) {
        return Err(TxError::InvalidAmount(format!(
            "{:?} is not a non-negative decimal",
            amount
        )));
    }

    let (integer, fraction) = amount.split_once('.').unwrap_or((amount, ""));
    let decimals = unit.decimals();
    if fraction.len() > decimals as usize {
        return Err(TxError::InvalidAmount(format!(
            "{} has more than {} fractional digits",
            amount, decimals
        )));
    }
    let integer = integer.trim_start_matches('0');
    if integer.len() + decimals as usize > MAX_DIGITS {
        return Err(TxError::InvalidAmount(format!("{} is too large", amount)));
    }

    let value: U256 = parse_units(amount, decimals)
        .map_err(|e| TxError::InvalidAmount(format!("{}: {}", amount, e)))?
        .into();

    Ok(UnitAmount::from_base(value, unit))
}

/// Render an amount as a canonical decimal string in its own unit
pub fn to_decimal_string(amount: &UnitAmount) -> String {
    match format_units(amount.value, amount.unit.decimals()) {
        Ok(formatted) => canonicalize(&formatted),
        Err(_) => amount.value.to_string(),
    }
}

/// Strip leading integer zeros and trailing fractional zeros
pub fn canonicalize(decimal: &str) -> String {
    let (integer, fraction) = decimal.split_once('.').unwrap_or((decimal, ""));
    let integer = integer.trim_start_matches('0');
    let integer = if integer.is_empty() { "0" } else { integer };
    let fraction = fraction.trim_end_matches('0');
    if fraction.is_empty() {
        integer.to_string()
    } else {
        format!("{}.{}", integer, fraction)
    }
}

/// A positive decimal multiplier such as `1.25`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ratio {
    numerator: U256,
    scale: u32,
}

impl Ratio {
    /// Multiply and floor
    pub fn apply(&self, value: U256) -> TxResult<U256> {
        let scaled = value
            .checked_mul(self.numerator)
            .ok_or_else(|| TxError::InvalidAmount(format!("{} x {} overflows", value, self)))?;
        Ok(scaled / U256::exp10(self.scale as usize))
    }

    pub fn apply_u64(&self, value: u64) -> TxResult<u64> {
        let scaled = self.apply(U256::from(value))?;
        if scaled > U256::from(u64::MAX) {
            return Err(TxError::InvalidAmount(format!(
                "{} x {} exceeds 64 bits",
                value, self
            )));
        }
        Ok(scaled.as_u64())
    }
}

impl FromStr for Ratio {
    type Err = TxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if !DECIMAL_RE.is_match(s) {
            return Err(TxError::InvalidAmount(format!("invalid ratio {:?}", s)));
        }
        let scale = s.split_once('.').map(|(_, f)| f.len()).unwrap_or(0);
        if scale > 18 {
            return Err(TxError::InvalidAmount(format!("ratio {} is too precise", s)));
        }
        let amount = to_base_units(s, Unit::Token(scale as u8))?;
        if amount.is_zero() {
            return Err(TxError::InvalidAmount("ratio must be positive".to_string()));
        }
        Ok(Self {
            numerator: amount.value(),
            scale: scale as u32,
        })
    }
}

impl fmt::Display for Ratio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let amount = UnitAmount::from_base(self.numerator, Unit::Token(self.scale as u8));
        write!(f, "{}", to_decimal_string(&amount))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ether_to_wei_is_exact() {
        let amount = to_base_units("1.5", Unit::Ether).unwrap();
        assert_eq!(amount.value(), U256::from(1_500_000_000_000_000_000u64));
        assert_eq!(amount.unit(), Unit::Ether);
    }

    #[test]
    fn test_gwei_to_wei() {
        let amount = to_base_units("20", Unit::Gwei).unwrap();
        assert_eq!(amount.value(), U256::from(20_000_000_000u64));
        let fractional = to_base_units("3.14", Unit::Gwei).unwrap();
        assert_eq!(fractional.value(), U256::from(3_140_000_000u64));
    }

    #[test]
    fn test_high_decimal_token_has_no_drift() {
        let unit = Unit::token(18).unwrap();
        let amount = to_base_units("0.123456789012345678", unit).unwrap();
        assert_eq!(amount.value(), U256::from(123_456_789_012_345_678u64));
        assert_eq!(to_decimal_string(&amount), "0.123456789012345678");
    }

    #[test]
    fn test_rejects_invalid_amounts() {
        for bad in ["", "-1", "1e18", "abc", "1.2.3", "0x10", " . "] {
            let err = to_base_units(bad, Unit::Ether).unwrap_err();
            assert!(matches!(err, TxError::InvalidAmount(_)), "accepted {:?}", bad);
        }
        // More fractional digits than the unit holds
        assert!(to_base_units("1.0000000001", Unit::Gwei).is_err());
        assert!(to_base_units("1.5", Unit::Token(0)).is_err());
    }

    #[test]
    fn test_rejects_overflowing_amounts() {
        let huge = "9".repeat(70);
        assert!(matches!(
            to_base_units(&huge, Unit::Ether),
            Err(TxError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_round_trip_canonicalizes() {
        let cases = [
            ("1.50", Unit::Ether, "1.5"),
            ("007", Unit::Ether, "7"),
            ("0.000000000000000001", Unit::Ether, "0.000000000000000001"),
            ("0.0", Unit::Gwei, "0"),
            ("12.340", Unit::Token(6), "12.34"),
            ("42", Unit::Token(0), "42"),
        ];
        for (input, unit, expected) in cases {
            let amount = to_base_units(input, unit).unwrap();
            assert_eq!(to_decimal_string(&amount), expected);
            assert_eq!(to_decimal_string(&amount), canonicalize(input));
        }
    }

    #[test]
    fn test_arithmetic_requires_same_unit() {
        let ether = to_base_units("1", Unit::Ether).unwrap();
        let gwei = to_base_units("1", Unit::Gwei).unwrap();
        assert!(ether.checked_add(&gwei).is_err());

        let as_ether = gwei.convert(Unit::Ether).unwrap();
        let sum = ether.checked_add(&as_ether).unwrap();
        assert_eq!(sum.value(), U256::from(1_000_000_001_000_000_000u64));
        assert!(gwei.convert(Unit::Token(9)).is_err());
    }

    #[test]
    fn test_checked_sub_reports_negative() {
        let small = UnitAmount::from_base(U256::from(5), Unit::Ether);
        let big = UnitAmount::from_base(U256::from(7), Unit::Ether);
        assert_eq!(small.checked_sub(&big).unwrap(), None);
        assert_eq!(
            big.checked_sub(&small).unwrap().map(|a| a.value()),
            Some(U256::from(2))
        );
    }

    #[test]
    fn test_ratio_scales_and_floors() {
        let ratio: Ratio = "1.5".parse().unwrap();
        assert_eq!(ratio.apply(U256::from(21_000)).unwrap(), U256::from(31_500));
        assert_eq!(ratio.apply_u64(3).unwrap(), 4);
        assert_eq!(ratio.to_string(), "1.5");

        let price = UnitAmount::from_base(U256::from(10), Unit::Gwei);
        let halved = price.scale(&"0.55".parse().unwrap()).unwrap();
        assert_eq!(halved.value(), U256::from(5));
    }

    #[test]
    fn test_ratio_rejects_zero_and_garbage() {
        assert!("0".parse::<Ratio>().is_err());
        assert!("-1.2".parse::<Ratio>().is_err());
        assert!("fast".parse::<Ratio>().is_err());
    }
}
