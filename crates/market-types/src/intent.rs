//! User intents: what a workflow has been asked to achieve.

use crate::amount::Currency;
use crate::order::{Asset, OfferType, Order, OrderCategory};
use alloy::primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

/// An order selected for fulfillment together with how much of it to take.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderFill {
	pub order: Order,
	pub units: U256,
	/// Token used to satisfy a collection offer.
	#[serde(default)]
	pub criteria_token_id: Option<U256>,
}

impl OrderFill {
	pub fn new(order: Order, units: U256) -> Self {
		Self {
			order,
			units,
			criteria_token_id: None,
		}
	}
}

/// Terms of a new listing or offer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderTerms {
	pub category: OrderCategory,
	pub offer_type: OfferType,
	/// For collection offers only the contract of this asset matters.
	pub asset: Asset,
	pub currency: Currency,
	pub per_unit_price: String,
	pub quantity: U256,
	pub start_time: u64,
	pub end_time: u64,
}

/// A token drop that can be minted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MintRequest {
	pub chain_id: u64,
	pub contract_address: Address,
	pub quantity: u64,
	/// Currency charged per mint; `None` for free drops.
	#[serde(default)]
	pub currency: Option<Currency>,
	#[serde(default)]
	pub unit_price: Option<String>,
	/// Whether eligibility must be proven before minting.
	#[serde(default)]
	pub whitelist_gated: bool,
}

/// Eligibility for a gated mint, as issued by the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhitelistProof {
	pub eligible: bool,
	/// Merkle proof of inclusion; empty when not eligible.
	#[serde(default)]
	pub proof: Vec<B256>,
}

/// An asset and how many units of it to move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferItem {
	pub asset: Asset,
	pub amount: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchTransferRequest {
	pub chain_id: u64,
	pub items: Vec<TransferItem>,
	pub to: Address,
}

/// Which side of a swap the amount fixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TradeType {
	ExactInput,
	ExactOutput,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapRequest {
	pub token_in: Currency,
	pub token_out: Currency,
	/// Raw amount of `token_in` (exact input) or `token_out` (exact output).
	pub amount: U256,
	pub trade_type: TradeType,
	pub slippage_bps: u32,
}

/// Everything a workflow can be asked to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Intent {
	/// Buy listed tokens.
	FulfillListing { fills: Vec<OrderFill> },
	/// Sell tokens into existing offers. The taker supplies the assets.
	FulfillOffer {
		fills: Vec<OrderFill>,
		assets: Vec<Asset>,
	},
	/// Publish new listings or offers.
	CreateOrder { terms: Vec<OrderTerms> },
	CancelOrders { orders: Vec<Order> },
	Mint(MintRequest),
	BatchTransfer(BatchTransferRequest),
	Swap(SwapRequest),
}

impl Intent {
	/// Short lowercase name used in logs and events.
	pub fn kind(&self) -> &'static str {
		match self {
			Intent::FulfillListing { .. } => "purchase",
			Intent::FulfillOffer { .. } => "accept-offer",
			Intent::CreateOrder { .. } => "create-order",
			Intent::CancelOrders { .. } => "cancel",
			Intent::Mint(_) => "mint",
			Intent::BatchTransfer(_) => "transfer",
			Intent::Swap(_) => "swap",
		}
	}

	/// Chains this intent touches, in first-seen order.
	pub fn chain_ids(&self) -> Vec<u64> {
		let mut chains: Vec<u64> = Vec::new();
		let mut push = |chain: u64| {
			if !chains.contains(&chain) {
				chains.push(chain);
			}
		};
		match self {
			Intent::FulfillListing { fills } | Intent::FulfillOffer { fills, .. } => {
				fills.iter().for_each(|f| push(f.order.chain_id))
			}
			Intent::CreateOrder { terms } => terms.iter().for_each(|t| push(t.asset.chain_id)),
			Intent::CancelOrders { orders } => orders.iter().for_each(|o| push(o.chain_id)),
			Intent::Mint(request) => push(request.chain_id),
			Intent::BatchTransfer(request) => push(request.chain_id),
			Intent::Swap(request) => push(request.token_in.chain_id),
		}
		chains
	}

	/// Orders being filled. These are validated before anything is
	/// compiled; cancelled orders are the viewer's own and are not.
	pub fn fill_orders(&self) -> Vec<&Order> {
		match self {
			Intent::FulfillListing { fills } | Intent::FulfillOffer { fills, .. } => {
				fills.iter().map(|f| &f.order).collect()
			}
			_ => Vec::new(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::order::fixtures;

	#[test]
	fn test_chain_ids_are_deduplicated_in_order() {
		let mut a = fixtures::offer(1, Address::repeat_byte(1), "1");
		let mut b = fixtures::offer(2, Address::repeat_byte(1), "1");
		let c = fixtures::offer(3, Address::repeat_byte(1), "1");
		a.chain_id = 137;
		b.chain_id = 1;
		let intent = Intent::CancelOrders {
			orders: vec![a, b, c],
		};
		assert_eq!(intent.chain_ids(), vec![137, 1]);
		assert!(intent.fill_orders().is_empty());
		assert_eq!(intent.kind(), "cancel");
	}

	#[test]
	fn test_intent_json_is_tagged() {
		let intent = Intent::FulfillListing { fills: vec![] };
		let json = serde_json::to_value(&intent).unwrap();
		assert_eq!(json["type"], "fulfillListing");
	}

	#[test]
	fn test_fill_orders_follow_fills() {
		let listing = fixtures::offer(1, Address::repeat_byte(1), "1");
		let intent = Intent::FulfillListing {
			fills: vec![OrderFill::new(listing.clone(), U256::from(1))],
		};
		assert_eq!(intent.fill_orders(), vec![&listing]);
	}
}
