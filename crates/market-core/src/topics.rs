//! Cache invalidation topics per intent.

use market_types::{CacheTopic, Intent};

/// Topics to invalidate once `intent` has succeeded.
///
/// Listing or offer creation and cancellation touch both sides of the book,
/// so they share the widest set. Swaps change no marketplace view.
pub fn invalidation_topics(intent: &Intent) -> Vec<CacheTopic> {
	match intent {
		Intent::FulfillListing { .. } => vec![
			CacheTopic::MyItems,
			CacheTopic::Activity,
			CacheTopic::Nfts,
			CacheTopic::Offers,
		],
		Intent::FulfillOffer { fills, .. } => {
			let mut topics = vec![
				CacheTopic::MyItems,
				CacheTopic::Activity,
				CacheTopic::Nfts,
				CacheTopic::Offers,
				CacheTopic::OffersReceived,
				CacheTopic::InstantSellItems,
			];
			for fill in fills {
				let topic = CacheTopic::Order(fill.order.hash);
				if !topics.contains(&topic) {
					topics.push(topic);
				}
			}
			topics
		}
		Intent::CreateOrder { .. } | Intent::CancelOrders { .. } => vec![
			CacheTopic::MyItems,
			CacheTopic::Activity,
			CacheTopic::Nfts,
			CacheTopic::AssetListings,
			CacheTopic::Listings,
			CacheTopic::Offers,
			CacheTopic::OffersMade,
			CacheTopic::OffersReceived,
		],
		Intent::BatchTransfer(_) => vec![CacheTopic::MyItems, CacheTopic::Nfts],
		Intent::Mint(request) => vec![
			CacheTopic::BlindboxAssets,
			CacheTopic::MyItems,
			CacheTopic::LaunchpadHistory(request.contract_address),
		],
		Intent::Swap(_) => Vec::new(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use market_types::{
		Address, BatchTransferRequest, Currency, MintRequest, SwapRequest, TradeType, U256,
	};

	#[test]
	fn test_purchase_topics() {
		let topics = invalidation_topics(&Intent::FulfillListing { fills: vec![] });
		assert_eq!(
			topics,
			vec![
				CacheTopic::MyItems,
				CacheTopic::Activity,
				CacheTopic::Nfts,
				CacheTopic::Offers
			]
		);
	}

	#[test]
	fn test_cancel_is_superset_of_purchase_and_create() {
		let cancel = invalidation_topics(&Intent::CancelOrders { orders: vec![] });
		let create = invalidation_topics(&Intent::CreateOrder { terms: vec![] });
		let purchase = invalidation_topics(&Intent::FulfillListing { fills: vec![] });

		for topic in create.iter().chain(purchase.iter()) {
			assert!(cancel.contains(topic), "missing {}", topic);
		}
	}

	#[test]
	fn test_mint_names_the_drop() {
		let contract = Address::repeat_byte(0xD0);
		let topics = invalidation_topics(&Intent::Mint(MintRequest {
			chain_id: 1,
			contract_address: contract,
			quantity: 1,
			currency: None,
			unit_price: None,
			whitelist_gated: false,
		}));
		assert!(topics.contains(&CacheTopic::LaunchpadHistory(contract)));
		assert!(topics.contains(&CacheTopic::BlindboxAssets));
	}

	#[test]
	fn test_transfer_and_swap_topics() {
		let transfer = invalidation_topics(&Intent::BatchTransfer(BatchTransferRequest {
			chain_id: 1,
			items: vec![],
			to: Address::repeat_byte(2),
		}));
		assert_eq!(transfer, vec![CacheTopic::MyItems, CacheTopic::Nfts]);

		let swap = invalidation_topics(&Intent::Swap(SwapRequest {
			token_in: Currency::native(1, "ETH"),
			token_out: Currency::native(1, "ETH"),
			amount: U256::from(1),
			trade_type: TradeType::ExactInput,
			slippage_bps: 50,
		}));
		assert!(swap.is_empty());
	}
}
