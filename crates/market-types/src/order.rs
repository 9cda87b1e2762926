//! Orders and assets as published by the off-chain index.

use crate::amount::{AmountError, Currency, CurrencyAmount, Fraction};
use alloy::primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

/// Whether the maker is selling (listing) or buying (offer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderCategory {
	Listing,
	Offer,
}

/// Scope of an order: one specific token or any token of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OfferType {
	Single,
	Collection,
}

/// Token standard of an asset contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContractType {
	#[serde(rename = "ERC721")]
	Erc721,
	#[serde(rename = "ERC1155")]
	Erc1155,
}

/// Item kinds that can appear in an order's offer or consideration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemType {
	Native,
	Erc20,
	Erc721,
	Erc1155,
	Erc721WithCriteria,
	Erc1155WithCriteria,
}

impl ItemType {
	pub fn is_fungible(&self) -> bool {
		matches!(self, ItemType::Native | ItemType::Erc20)
	}

	pub fn is_erc721(&self) -> bool {
		matches!(self, ItemType::Erc721 | ItemType::Erc721WithCriteria)
	}

	pub fn is_erc1155(&self) -> bool {
		matches!(self, ItemType::Erc1155 | ItemType::Erc1155WithCriteria)
	}
}

/// One leg of an order's offer or consideration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
	pub item_type: ItemType,
	pub token: Address,
	pub identifier_or_criteria: U256,
	pub start_amount: U256,
	#[serde(default)]
	pub available_amount: Option<U256>,
	#[serde(default)]
	pub recipient: Option<Address>,
}

impl OrderItem {
	/// Amount still outstanding on this leg.
	pub fn remaining(&self) -> U256 {
		self.available_amount.unwrap_or(self.start_amount)
	}
}

/// A unique token instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
	/// `{chainId}:{contractAddress}:{tokenId}`.
	pub asset_id: String,
	pub chain_id: u64,
	pub contract_address: Address,
	pub asset_token_id: U256,
	pub contract_type: ContractType,
	/// Creator royalty as a decimal percent, e.g. `"2.5"`.
	#[serde(default)]
	pub creator_fee_rate: Option<String>,
	#[serde(default)]
	pub creator_fee_recipient: Option<Address>,
}

impl Asset {
	pub fn new(
		chain_id: u64,
		contract_address: Address,
		asset_token_id: U256,
		contract_type: ContractType,
	) -> Self {
		Self {
			asset_id: format!("{}:{}:{}", chain_id, contract_address, asset_token_id),
			chain_id,
			contract_address,
			asset_token_id,
			contract_type,
			creator_fee_rate: None,
			creator_fee_recipient: None,
		}
	}

	pub fn with_creator_fee(mut self, rate: impl Into<String>, recipient: Address) -> Self {
		self.creator_fee_rate = Some(rate.into());
		self.creator_fee_recipient = Some(recipient);
		self
	}

	/// Creator fee as a fraction of price. Present only when both a rate and
	/// a payout address are configured.
	pub fn creator_fee(&self) -> Result<Option<(Fraction, Address)>, AmountError> {
		match (&self.creator_fee_rate, self.creator_fee_recipient) {
			(Some(rate), Some(recipient)) => {
				let fraction = Fraction::from_decimal(rate)?.multiply(&Fraction::percent(1))?;
				Ok(Some((fraction, recipient)))
			}
			_ => Ok(None),
		}
	}

	pub fn key(&self) -> TokenKey {
		TokenKey {
			contract: self.contract_address,
			token_id: self.asset_token_id,
		}
	}
}

/// Identifies a token independent of chain metadata. Token ids are only
/// unique within their contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenKey {
	pub contract: Address,
	pub token_id: U256,
}

/// A signed exchange order as tracked by the off-chain index.
///
/// The fillable flags are a cache of chain state and may be stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
	pub hash: B256,
	pub chain_id: u64,
	pub exchange_address: Address,
	pub offerer: Address,
	pub category: OrderCategory,
	pub offer_type: OfferType,
	/// Price of one unit as a human decimal in `currency`.
	pub per_unit_price: String,
	pub currency: Currency,
	pub start_time: u64,
	pub end_time: u64,
	#[serde(default)]
	pub is_cancelled: bool,
	#[serde(default = "default_fillable")]
	pub is_fillable: bool,
	/// Total units the order was created for.
	pub start_amount: U256,
	/// Units not yet filled.
	#[serde(default)]
	pub available_amount: Option<U256>,
	#[serde(default)]
	pub offer: Vec<OrderItem>,
	#[serde(default)]
	pub consideration: Vec<OrderItem>,
	#[serde(default)]
	pub assets: Vec<Asset>,
}

fn default_fillable() -> bool {
	true
}

impl Order {
	pub fn price_symbol(&self) -> &str {
		&self.currency.symbol
	}

	pub fn unit_price(&self) -> Result<CurrencyAmount, AmountError> {
		CurrencyAmount::from_decimal(self.currency.clone(), &self.per_unit_price)
	}

	pub fn remaining_units(&self) -> U256 {
		self.available_amount.unwrap_or(self.start_amount)
	}

	pub fn is_expired(&self, now: u64) -> bool {
		self.end_time != 0 && self.end_time <= now
	}

	pub fn is_offered_by(&self, account: &Address) -> bool {
		// Address equality is byte equality, so checksum casing never matters.
		self.offerer == *account
	}

	/// Whether the cached index state still allows a fill.
	pub fn looks_fillable(&self, now: u64) -> bool {
		!self.is_cancelled
			&& self.is_fillable
			&& !self.is_expired(now)
			&& !self.remaining_units().is_zero()
	}
}
