//! Price breakdown engine for the marketplace.
//!
//! Splits what a buyer pays into the platform service fee, creator royalties
//! and the seller's revenue, and sums what a taker must hold per currency
//! before a purchase can go ahead. All math is exact integer arithmetic on
//! base units; fees are truncated so the remainder always lands in revenue.

use market_types::{
	Address, AmountError, Currency, CurrencyAmount, Fraction, ItemType, Order, OrderFill, U256,
};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

/// Platform service fee applied when no override is configured: 2%.
pub const DEFAULT_SERVICE_FEE_BPS: u64 = 200;

/// Errors that can occur while computing price breakdowns.
#[derive(Debug, Error)]
pub enum PricingError {
	#[error("Amount error: {0}")]
	Amount(#[from] AmountError),
	/// Fees exceed the total; the asset's royalty configuration is invalid.
	#[error("Invalid fee configuration: fees {fees} exceed total {total}")]
	InvalidFeeConfiguration { total: String, fees: String },
	#[error("Order {0} has a zero start amount")]
	ZeroOrderSize(String),
}

/// One priced position of a cart or sale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineItem {
	pub unit_price: CurrencyAmount,
	pub quantity: U256,
	/// Royalty rate as a fraction of price, with its payout address.
	pub creator_fee: Option<(Fraction, Address)>,
}

impl LineItem {
	pub fn new(unit_price: CurrencyAmount, quantity: U256) -> Self {
		Self {
			unit_price,
			quantity,
			creator_fee: None,
		}
	}

	pub fn with_creator_fee(mut self, rate: Fraction, recipient: Address) -> Self {
		self.creator_fee = Some((rate, recipient));
		self
	}

	/// Line item for filling `units` of `order`, taking the royalty from the
	/// order's first asset.
	pub fn from_order(order: &Order, units: U256) -> Result<Self, PricingError> {
		let creator_fee = match order.assets.first() {
			Some(asset) => asset.creator_fee()?,
			None => None,
		};
		Ok(Self {
			unit_price: order.unit_price()?,
			quantity: units,
			creator_fee,
		})
	}

	pub fn from_fill(fill: &OrderFill) -> Result<Self, PricingError> {
		Self::from_order(&fill.order, fill.units)
	}

	pub fn currency(&self) -> &Currency {
		self.unit_price.currency()
	}

	fn subtotal(&self) -> Result<CurrencyAmount, AmountError> {
		self.unit_price.multiply_int(self.quantity)
	}
}

/// Where a sale's proceeds go, all in one currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceBreakdown {
	pub total_price: CurrencyAmount,
	pub service_fee: CurrencyAmount,
	pub creator_fees: CurrencyAmount,
	pub revenue: CurrencyAmount,
}

impl PriceBreakdown {
	pub fn currency(&self) -> &Currency {
		self.total_price.currency()
	}
}

/// A currency in which the wallet holds less than a purchase needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Shortfall {
	pub required: CurrencyAmount,
	pub available: CurrencyAmount,
	pub missing: CurrencyAmount,
}

/// Computes fee splits and funding requirements.
#[derive(Debug, Clone)]
pub struct PriceBreakdownEngine {
	service_fee: Fraction,
}

impl Default for PriceBreakdownEngine {
	fn default() -> Self {
		Self::new(DEFAULT_SERVICE_FEE_BPS)
	}
}

impl PriceBreakdownEngine {
	pub fn new(service_fee_bps: u64) -> Self {
		Self {
			service_fee: Fraction::basis_points(service_fee_bps),
		}
	}

	pub fn service_fee_rate(&self) -> &Fraction {
		&self.service_fee
	}

	/// Breakdown of `items`, which must all be priced in `currency`.
	///
	/// The service fee is taken on the total; creator fees are computed per
	/// line and summed. Revenue is what remains and must not go negative.
	pub fn compute_breakdown(
		&self,
		items: &[LineItem],
		currency: &Currency,
	) -> Result<PriceBreakdown, PricingError> {
		let mut total_price = CurrencyAmount::zero(currency.clone());
		let mut creator_fees = CurrencyAmount::zero(currency.clone());

		for item in items {
			let subtotal = item.subtotal()?;
			total_price = total_price.add(&subtotal)?;

			if let Some((rate, _)) = &item.creator_fee {
				creator_fees = creator_fees.add(&subtotal.multiply(rate)?)?;
			}
		}

		let service_fee = total_price.multiply(&self.service_fee)?;
		let fees = service_fee.add(&creator_fees)?;

		let revenue = total_price.subtract(&fees).map_err(|e| match e {
			AmountError::Negative(_) => PricingError::InvalidFeeConfiguration {
				total: total_price.to_string(),
				fees: fees.to_string(),
			},
			other => PricingError::Amount(other),
		})?;

		debug!(
			currency = %currency.symbol,
			total = %total_price,
			service_fee = %service_fee,
			creator_fees = %creator_fees,
			"Computed price breakdown"
		);

		Ok(PriceBreakdown {
			total_price,
			service_fee,
			creator_fees,
			revenue,
		})
	}

	/// One breakdown per settlement currency, in first-seen order.
	pub fn compute_breakdowns(&self, items: &[LineItem]) -> Result<Vec<PriceBreakdown>, PricingError> {
		group_by_currency(items, LineItem::currency)
			.into_iter()
			.map(|(currency, group)| {
				let group: Vec<LineItem> = group.into_iter().cloned().collect();
				self.compute_breakdown(&group, &currency)
			})
			.collect()
	}

	/// What the taker pays per currency to fill `fills`.
	///
	/// Offers are funded by their first offer item. Listings are funded by
	/// their consideration, scaled by `units / start_amount` for partial fills.
	pub fn summarize_required_funds(
		&self,
		fills: &[OrderFill],
	) -> Result<Vec<CurrencyAmount>, PricingError> {
		let mut amounts = Vec::with_capacity(fills.len());
		for fill in fills {
			amounts.push(required_for_fill(fill)?);
		}

		let mut totals: Vec<CurrencyAmount> = Vec::new();
		for amount in amounts {
			match totals
				.iter_mut()
				.find(|total| total.currency().is_same(amount.currency()))
			{
				Some(total) => *total = total.add(&amount)?,
				None => totals.push(amount),
			}
		}
		Ok(totals)
	}

	/// Currencies in `required` that `balances` do not cover. A currency with
	/// no balance entry counts as held at zero.
	pub fn find_shortfalls(
		&self,
		required: &[CurrencyAmount],
		balances: &[CurrencyAmount],
	) -> Result<Vec<Shortfall>, PricingError> {
		let mut shortfalls = Vec::new();
		for need in required {
			let available = balances
				.iter()
				.find(|b| b.currency().is_same(need.currency()))
				.cloned()
				.unwrap_or_else(|| CurrencyAmount::zero(need.currency().clone()));

			if available.raw() < need.raw() {
				shortfalls.push(Shortfall {
					missing: need.subtract(&available)?,
					required: need.clone(),
					available,
				});
			}
		}
		Ok(shortfalls)
	}
}

fn required_for_fill(fill: &OrderFill) -> Result<CurrencyAmount, PricingError> {
	let order = &fill.order;

	if let Some(first) = order.offer.first() {
		if first.item_type == ItemType::Erc20 {
			return Ok(CurrencyAmount::from_raw(
				order.currency.clone(),
				first.start_amount,
			));
		}
	}

	if order.consideration.is_empty() {
		return Ok(order.unit_price()?.multiply_int(fill.units)?);
	}

	if order.start_amount.is_zero() {
		return Err(PricingError::ZeroOrderSize(order.hash.to_string()));
	}
	let portion = Fraction::new(fill.units, order.start_amount)?;

	let mut total = CurrencyAmount::zero(order.currency.clone());
	for item in &order.consideration {
		let full = CurrencyAmount::from_raw(order.currency.clone(), item.start_amount);
		total = total.add(&full.multiply(&portion)?)?;
	}
	Ok(total)
}

fn group_by_currency<T, F>(items: &[T], currency_of: F) -> Vec<(Currency, Vec<&T>)>
where
	F: Fn(&T) -> &Currency,
{
	let mut groups: Vec<(Currency, Vec<&T>)> = Vec::new();
	for item in items {
		let currency = currency_of(item);
		match groups.iter_mut().find(|(c, _)| c.is_same(currency)) {
			Some((_, group)) => group.push(item),
			None => groups.push((currency.clone(), vec![item])),
		}
	}
	groups
}
