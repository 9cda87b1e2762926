//! Exact currency arithmetic.
//!
//! Every price, fee and balance in the marketplace is carried as an integer
//! number of base units together with the currency that gives those units
//! meaning. Ratios such as fee percentages are expressed as [`Fraction`]s.
//! Nothing in this module touches floating point.

use alloy::primitives::{Address, U256, U512};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

/// Number of fractional digits used when rendering values below one.
const SIGNIFICANT_EXPANSION: u32 = 40;

/// Errors raised by amount and fraction arithmetic.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AmountError {
	/// Two amounts of different currencies were combined or compared.
	#[error("Mismatched currency: {left} vs {right}")]
	MismatchedCurrency { left: String, right: String },
	/// A decimal string could not be parsed.
	#[error("Invalid decimal '{0}'")]
	InvalidDecimal(String),
	/// A decimal string carries more fractional digits than the currency supports.
	#[error("'{value}' has more than {decimals} fractional digits")]
	ExcessPrecision { value: String, decimals: u8 },
	/// A subtraction would produce a negative amount.
	#[error("Negative result: {0}")]
	Negative(String),
	/// A denominator or divisor was zero.
	#[error("Division by zero")]
	DivisionByZero,
	/// An intermediate value exceeded 256 bits.
	#[error("Arithmetic overflow")]
	Overflow,
}

/// Rounding mode applied when rendering a value with fewer digits than it holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Rounding {
	RoundDown,
	#[default]
	RoundHalfUp,
	RoundUp,
}

/// A settlement currency: native coin (zero address) or an ERC-20 token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Currency {
	pub chain_id: u64,
	pub address: Address,
	pub decimals: u8,
	pub symbol: String,
}

impl Currency {
	pub fn new(chain_id: u64, address: Address, decimals: u8, symbol: impl Into<String>) -> Self {
		Self {
			chain_id,
			address,
			decimals,
			symbol: symbol.into(),
		}
	}

	/// The chain's native coin.
	pub fn native(chain_id: u64, symbol: impl Into<String>) -> Self {
		Self::new(chain_id, Address::ZERO, 18, symbol)
	}

	pub fn is_native(&self) -> bool {
		self.address == Address::ZERO
	}

	/// Two descriptors denote the same currency when chain and contract match.
	pub fn is_same(&self, other: &Currency) -> bool {
		self.chain_id == other.chain_id && self.address == other.address
	}

	/// `10^decimals`, the number of base units in one whole token.
	pub fn scale(&self) -> Result<U256, AmountError> {
		pow10(self.decimals as u32)
	}
}

impl fmt::Display for Currency {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}({}:{})", self.symbol, self.chain_id, self.address)
	}
}

fn pow10(exp: u32) -> Result<U256, AmountError> {
	U256::from(10u8)
		.checked_pow(U256::from(exp))
		.ok_or(AmountError::Overflow)
}

fn widen(value: U256) -> U512 {
	U512::from_be_slice(&value.to_be_bytes::<32>())
}

fn narrow(value: U512) -> Result<U256, AmountError> {
	if value > widen(U256::MAX) {
		return Err(AmountError::Overflow);
	}
	let bytes = value.to_be_bytes::<64>();
	Ok(U256::from_be_slice(&bytes[32..]))
}

/// A non-negative rational number.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Fraction {
	numerator: U256,
	denominator: U256,
}

impl Fraction {
	pub fn new(numerator: U256, denominator: U256) -> Result<Self, AmountError> {
		if denominator.is_zero() {
			return Err(AmountError::DivisionByZero);
		}
		Ok(Self {
			numerator,
			denominator,
		})
	}

	pub fn from_integer(value: U256) -> Self {
		Self {
			numerator: value,
			denominator: U256::from(1u8),
		}
	}

	/// `value / 100`.
	pub fn percent(value: u64) -> Self {
		Self {
			numerator: U256::from(value),
			denominator: U256::from(100u8),
		}
	}

	/// `bps / 10_000`.
	pub fn basis_points(bps: u64) -> Self {
		Self {
			numerator: U256::from(bps),
			denominator: U256::from(10_000u16),
		}
	}

	/// Parses a human decimal such as `"2.5"`, `"0.001"` or `"1e-3"`.
	///
	/// The result is exact: `"2.5"` becomes `25/10`.
	pub fn from_decimal(value: &str) -> Result<Self, AmountError> {
		let trimmed = value.trim();
		let invalid = || AmountError::InvalidDecimal(value.to_string());

		if trimmed.starts_with('-') {
			return Err(AmountError::Negative(value.to_string()));
		}

		if let Some((mantissa, exponent)) = trimmed.split_once(['e', 'E']) {
			let base = Self::from_decimal(mantissa)?;
			let exponent: i32 = exponent.parse().map_err(|_| invalid())?;
			let scale = pow10(exponent.unsigned_abs())?;
			return if exponent >= 0 {
				Self::new(
					base.numerator
						.checked_mul(scale)
						.ok_or(AmountError::Overflow)?,
					base.denominator,
				)
			} else {
				Self::new(
					base.numerator,
					base.denominator
						.checked_mul(scale)
						.ok_or(AmountError::Overflow)?,
				)
			};
		}

		let trimmed = trimmed.strip_prefix('+').unwrap_or(trimmed);
		let (integer, fractional) = trimmed.split_once('.').unwrap_or((trimmed, ""));
		if integer.is_empty() && fractional.is_empty() {
			return Err(invalid());
		}
		if !integer.chars().chain(fractional.chars()).all(|c| c.is_ascii_digit()) {
			return Err(invalid());
		}

		let digits = format!("{}{}", integer, fractional);
		let numerator = U256::from_str_radix(&digits, 10).map_err(|_| invalid())?;
		let denominator = pow10(fractional.len() as u32)?;
		Self::new(numerator, denominator)
	}

	pub fn numerator(&self) -> U256 {
		self.numerator
	}

	pub fn denominator(&self) -> U256 {
		self.denominator
	}

	pub fn add(&self, other: &Fraction) -> Result<Fraction, AmountError> {
		if self.denominator == other.denominator {
			let numerator = self
				.numerator
				.checked_add(other.numerator)
				.ok_or(AmountError::Overflow)?;
			return Self::new(numerator, self.denominator);
		}
		let left = mul(self.numerator, other.denominator)?;
		let right = mul(other.numerator, self.denominator)?;
		Self::new(
			left.checked_add(right).ok_or(AmountError::Overflow)?,
			mul(self.denominator, other.denominator)?,
		)
	}

	pub fn subtract(&self, other: &Fraction) -> Result<Fraction, AmountError> {
		let (left, right, denominator) = if self.denominator == other.denominator {
			(self.numerator, other.numerator, self.denominator)
		} else {
			(
				mul(self.numerator, other.denominator)?,
				mul(other.numerator, self.denominator)?,
				mul(self.denominator, other.denominator)?,
			)
		};
		let numerator = left
			.checked_sub(right)
			.ok_or_else(|| AmountError::Negative(format!("{} - {}", self, other)))?;
		Self::new(numerator, denominator)
	}

	pub fn multiply(&self, other: &Fraction) -> Result<Fraction, AmountError> {
		Self::new(
			mul(self.numerator, other.numerator)?,
			mul(self.denominator, other.denominator)?,
		)
	}

	pub fn divide(&self, other: &Fraction) -> Result<Fraction, AmountError> {
		Self::new(
			mul(self.numerator, other.denominator)?,
			mul(self.denominator, other.numerator)?,
		)
	}

	pub fn invert(&self) -> Result<Fraction, AmountError> {
		Self::new(self.denominator, self.numerator)
	}

	/// Integer part, truncated.
	pub fn quotient(&self) -> U256 {
		self.numerator / self.denominator
	}

	pub fn is_zero(&self) -> bool {
		self.numerator.is_zero()
	}

	/// Renders the value with exactly `decimal_places` fractional digits.
	pub fn to_fixed(&self, decimal_places: u32, rounding: Rounding) -> Result<String, AmountError> {
		let scalar = U512::from(10u8)
			.checked_pow(U512::from(decimal_places))
			.ok_or(AmountError::Overflow)?;
		let scaled = widen(self.numerator)
			.checked_mul(scalar)
			.ok_or(AmountError::Overflow)?;
		let denominator = widen(self.denominator);
		let mut result = scaled / denominator;
		let remainder = scaled % denominator;

		match rounding {
			Rounding::RoundDown => {}
			Rounding::RoundHalfUp => {
				if remainder * U512::from(2u8) >= denominator {
					result += U512::from(1u8);
				}
			}
			Rounding::RoundUp => {
				if !remainder.is_zero() {
					result += U512::from(1u8);
				}
			}
		}

		let digits = result.to_string();
		if decimal_places == 0 {
			return Ok(digits);
		}

		let places = decimal_places as usize;
		if digits.len() <= places {
			Ok(format!("0.{}{}", "0".repeat(places - digits.len()), digits))
		} else {
			let split = digits.len() - places;
			Ok(format!("{}.{}", &digits[..split], &digits[split..]))
		}
	}

	/// Renders the value with `significant_digits` significant digits.
	///
	/// Values below one are expanded to forty fractional digits and truncated
	/// to the requested precision with trailing zeros removed; values of one or
	/// more are rendered with [`Fraction::to_fixed`].
	pub fn to_significant(
		&self,
		significant_digits: u32,
		rounding: Rounding,
	) -> Result<String, AmountError> {
		let quotient = self.quotient();

		if quotient.is_zero() {
			let expanded = widen(self.numerator)
				.checked_mul(widen(pow10(SIGNIFICANT_EXPANSION)?))
				.ok_or(AmountError::Overflow)?
				/ widen(self.denominator);
			let expanded = format!(
				"{:0>width$}",
				expanded.to_string(),
				width = SIGNIFICANT_EXPANSION as usize
			);

			let Some(first_non_zero) = expanded.find(|c: char| c != '0') else {
				return Ok("0".to_string());
			};

			let end = (first_non_zero + significant_digits as usize).min(expanded.len());
			let significant = expanded[first_non_zero..end].trim_end_matches('0');
			return Ok(format!("0.{}{}", "0".repeat(first_non_zero), significant));
		}

		let integer_digits = quotient.to_string().len() as u32;
		self.to_fixed(significant_digits.saturating_sub(integer_digits), rounding)
	}
}

fn mul(a: U256, b: U256) -> Result<U256, AmountError> {
	a.checked_mul(b).ok_or(AmountError::Overflow)
}

impl PartialEq for Fraction {
	fn eq(&self, other: &Self) -> bool {
		self.cmp(other) == Ordering::Equal
	}
}

impl Eq for Fraction {}

impl PartialOrd for Fraction {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for Fraction {
	fn cmp(&self, other: &Self) -> Ordering {
		let left = widen(self.numerator) * widen(other.denominator);
		let right = widen(other.numerator) * widen(self.denominator);
		left.cmp(&right)
	}
}

impl fmt::Display for Fraction {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}/{}", self.numerator, self.denominator)
	}
}

/// An exact amount of a specific currency, held in base units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyAmount {
	currency: Currency,
	raw: U256,
}

impl CurrencyAmount {
	pub fn from_raw(currency: Currency, raw: U256) -> Self {
		Self { currency, raw }
	}

	pub fn zero(currency: Currency) -> Self {
		Self::from_raw(currency, U256::ZERO)
	}

	/// Parses a human decimal (`"1.5"`) into base units of `currency`.
	///
	/// Inputs carrying more fractional digits than `currency.decimals` are
	/// rejected rather than rounded.
	pub fn from_decimal(currency: Currency, value: &str) -> Result<Self, AmountError> {
		let fraction = Fraction::from_decimal(value)?;
		let scaled = fraction.multiply(&Fraction::from_integer(currency.scale()?))?;
		if !(scaled.numerator % scaled.denominator).is_zero() {
			return Err(AmountError::ExcessPrecision {
				value: value.to_string(),
				decimals: currency.decimals,
			});
		}
		Ok(Self::from_raw(currency, scaled.quotient()))
	}

	pub fn currency(&self) -> &Currency {
		&self.currency
	}

	pub fn raw(&self) -> U256 {
		self.raw
	}

	pub fn is_zero(&self) -> bool {
		self.raw.is_zero()
	}

	fn ensure_same_currency(&self, other: &CurrencyAmount) -> Result<(), AmountError> {
		if self.currency.is_same(&other.currency) {
			Ok(())
		} else {
			Err(AmountError::MismatchedCurrency {
				left: self.currency.to_string(),
				right: other.currency.to_string(),
			})
		}
	}

	pub fn add(&self, other: &CurrencyAmount) -> Result<CurrencyAmount, AmountError> {
		self.ensure_same_currency(other)?;
		let raw = self
			.raw
			.checked_add(other.raw)
			.ok_or(AmountError::Overflow)?;
		Ok(Self::from_raw(self.currency.clone(), raw))
	}

	pub fn subtract(&self, other: &CurrencyAmount) -> Result<CurrencyAmount, AmountError> {
		self.ensure_same_currency(other)?;
		let raw = self.raw.checked_sub(other.raw).ok_or_else(|| {
			AmountError::Negative(format!("{} - {} {}", self.raw, other.raw, self.currency.symbol))
		})?;
		Ok(Self::from_raw(self.currency.clone(), raw))
	}

	/// `raw * numerator / denominator`, truncated toward zero.
	///
	/// Fees computed this way round down and leave the remainder with the
	/// payee, so displayed totals always reconcile exactly.
	pub fn multiply(&self, fraction: &Fraction) -> Result<CurrencyAmount, AmountError> {
		let product = widen(self.raw) * widen(fraction.numerator) / widen(fraction.denominator);
		Ok(Self::from_raw(self.currency.clone(), narrow(product)?))
	}

	pub fn multiply_int(&self, factor: U256) -> Result<CurrencyAmount, AmountError> {
		let raw = self.raw.checked_mul(factor).ok_or(AmountError::Overflow)?;
		Ok(Self::from_raw(self.currency.clone(), raw))
	}

	/// `raw * denominator / numerator`, truncated toward zero.
	pub fn divide(&self, fraction: &Fraction) -> Result<CurrencyAmount, AmountError> {
		self.multiply(&fraction.invert()?)
	}

	pub fn checked_cmp(&self, other: &CurrencyAmount) -> Result<Ordering, AmountError> {
		self.ensure_same_currency(other)?;
		Ok(self.raw.cmp(&other.raw))
	}

	/// The amount in whole tokens as an exact fraction.
	pub fn to_fraction(&self) -> Result<Fraction, AmountError> {
		Fraction::new(self.raw, self.currency.scale()?)
	}

	pub fn to_fixed(&self, decimal_places: u32, rounding: Rounding) -> Result<String, AmountError> {
		self.to_fraction()?.to_fixed(decimal_places, rounding)
	}

	pub fn to_significant(
		&self,
		significant_digits: u32,
		rounding: Rounding,
	) -> Result<String, AmountError> {
		self.to_fraction()?
			.to_significant(significant_digits, rounding)
	}

	/// Full-precision decimal rendering with trailing zeros removed.
	pub fn to_exact(&self) -> Result<String, AmountError> {
		let fixed = self.to_fixed(self.currency.decimals as u32, Rounding::RoundDown)?;
		if fixed.contains('.') {
			Ok(fixed
				.trim_end_matches('0')
				.trim_end_matches('.')
				.to_string())
		} else {
			Ok(fixed)
		}
	}
}

impl fmt::Display for CurrencyAmount {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self.to_exact() {
			Ok(value) => write!(f, "{} {}", value, self.currency.symbol),
			Err(_) => write!(f, "{} (raw) {}", self.raw, self.currency.symbol),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn weth() -> Currency {
		Currency::new(
			1,
			"0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2"
				.parse()
				.unwrap(),
			18,
			"WETH",
		)
	}

	fn usdc() -> Currency {
		Currency::new(
			1,
			"0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"
				.parse()
				.unwrap(),
			6,
			"USDC",
		)
	}

	#[test]
	fn test_fraction_from_decimal() {
		let fraction = Fraction::from_decimal("2.5").unwrap();
		assert_eq!(fraction.numerator(), U256::from(25));
		assert_eq!(fraction.denominator(), U256::from(10));

		let scientific = Fraction::from_decimal("1e-3").unwrap();
		assert_eq!(scientific, Fraction::new(U256::from(1), U256::from(1000)).unwrap());

		let large = Fraction::from_decimal("1.5e2").unwrap();
		assert_eq!(large.quotient(), U256::from(150));

		assert!(matches!(
			Fraction::from_decimal("abc"),
			Err(AmountError::InvalidDecimal(_))
		));
		assert!(matches!(
			Fraction::from_decimal("-1"),
			Err(AmountError::Negative(_))
		));
	}

	#[test]
	fn test_fraction_arithmetic() {
		let half = Fraction::new(U256::from(1), U256::from(2)).unwrap();
		let third = Fraction::new(U256::from(1), U256::from(3)).unwrap();

		let sum = half.add(&third).unwrap();
		assert_eq!(sum, Fraction::new(U256::from(5), U256::from(6)).unwrap());

		let difference = half.subtract(&third).unwrap();
		assert_eq!(difference, Fraction::new(U256::from(1), U256::from(6)).unwrap());

		assert!(matches!(
			third.subtract(&half),
			Err(AmountError::Negative(_))
		));

		let product = half.multiply(&third).unwrap();
		assert_eq!(product, Fraction::new(U256::from(1), U256::from(6)).unwrap());

		let quotient = half.divide(&third).unwrap();
		assert_eq!(quotient, Fraction::new(U256::from(3), U256::from(2)).unwrap());
		assert_eq!(quotient.invert().unwrap(), Fraction::new(U256::from(2), U256::from(3)).unwrap());
		assert!(half > third);
	}

	#[test]
	fn test_fraction_to_fixed_rounding() {
		let value = Fraction::new(U256::from(2), U256::from(3)).unwrap();
		assert_eq!(value.to_fixed(2, Rounding::RoundHalfUp).unwrap(), "0.67");
		assert_eq!(value.to_fixed(2, Rounding::RoundDown).unwrap(), "0.66");
		assert_eq!(value.to_fixed(0, Rounding::RoundUp).unwrap(), "1");

		let small = Fraction::new(U256::from(1), U256::from(1000)).unwrap();
		assert_eq!(small.to_fixed(4, Rounding::RoundHalfUp).unwrap(), "0.0010");
	}

	#[test]
	fn test_fraction_to_significant() {
		let value = Fraction::from_decimal("1.23456789").unwrap();
		assert_eq!(value.to_significant(3, Rounding::RoundHalfUp).unwrap(), "1.23");

		let small = Fraction::from_decimal("0.000123456").unwrap();
		assert_eq!(small.to_significant(3, Rounding::RoundHalfUp).unwrap(), "0.000123");

		let padded = Fraction::from_decimal("0.5").unwrap();
		assert_eq!(padded.to_significant(6, Rounding::RoundHalfUp).unwrap(), "0.5");

		let zero = Fraction::from_integer(U256::ZERO);
		assert_eq!(zero.to_significant(6, Rounding::RoundHalfUp).unwrap(), "0");
	}

	#[test]
	fn test_currency_amount_from_decimal() {
		let amount = CurrencyAmount::from_decimal(weth(), "1.5").unwrap();
		assert_eq!(amount.raw(), U256::from(1_500_000_000_000_000_000u128));

		let err = CurrencyAmount::from_decimal(usdc(), "1.0000001").unwrap_err();
		assert!(matches!(err, AmountError::ExcessPrecision { decimals: 6, .. }));
	}

	#[test]
	fn test_currency_amount_fee_truncates() {
		let price = CurrencyAmount::from_raw(usdc(), U256::from(999));
		let fee = price.multiply(&Fraction::percent(2)).unwrap();
		// 999 * 2 / 100 = 19.98, truncated
		assert_eq!(fee.raw(), U256::from(19));
		let rest = price.subtract(&fee).unwrap();
		assert_eq!(rest.add(&fee).unwrap(), price);
	}

	#[test]
	fn test_currency_amount_mismatched_currency() {
		let a = CurrencyAmount::from_decimal(weth(), "1").unwrap();
		let b = CurrencyAmount::from_decimal(usdc(), "1").unwrap();
		assert!(matches!(
			a.add(&b),
			Err(AmountError::MismatchedCurrency { .. })
		));
		assert!(matches!(
			a.checked_cmp(&b),
			Err(AmountError::MismatchedCurrency { .. })
		));
	}

	#[test]
	fn test_currency_amount_formatting() {
		let amount = CurrencyAmount::from_raw(weth(), U256::from(1_234_567_890_000_000_000u128));
		assert_eq!(amount.to_significant(3, Rounding::RoundHalfUp).unwrap(), "1.23");
		assert_eq!(amount.to_fixed(2, Rounding::RoundHalfUp).unwrap(), "1.23");
		assert_eq!(amount.to_exact().unwrap(), "1.23456789");
		assert_eq!(amount.to_string(), "1.23456789 WETH");
	}

	#[test]
	fn test_currency_amount_divide() {
		let amount = CurrencyAmount::from_raw(usdc(), U256::from(10));
		let third = amount
			.divide(&Fraction::from_integer(U256::from(3)))
			.unwrap();
		assert_eq!(third.raw(), U256::from(3));
	}
}
