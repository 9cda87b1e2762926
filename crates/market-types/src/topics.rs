//! Cache invalidation topics consumed by data-fetching layers.

use alloy::primitives::{Address, B256};
use serde::{Serialize, Serializer};
use std::fmt;

/// A tag naming a cached view that may now be stale.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheTopic {
	MyItems,
	Activity,
	Nfts,
	Offers,
	OffersMade,
	OffersReceived,
	Listings,
	AssetListings,
	Order(B256),
	InstantSellItems,
	LaunchpadHistory(Address),
	BlindboxAssets,
}

impl fmt::Display for CacheTopic {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			CacheTopic::MyItems => f.write_str("my-items"),
			CacheTopic::Activity => f.write_str("activity"),
			CacheTopic::Nfts => f.write_str("nfts"),
			CacheTopic::Offers => f.write_str("offers"),
			CacheTopic::OffersMade => f.write_str("offers-made"),
			CacheTopic::OffersReceived => f.write_str("offers-received"),
			CacheTopic::Listings => f.write_str("listings"),
			CacheTopic::AssetListings => f.write_str("asset-listings"),
			CacheTopic::Order(hash) => write!(f, "order:{}", hash),
			CacheTopic::InstantSellItems => f.write_str("instant-sell-items"),
			CacheTopic::LaunchpadHistory(contract) => {
				write!(f, "launchpad-history:{}", contract.to_string().to_lowercase())
			}
			CacheTopic::BlindboxAssets => f.write_str("blindbox-assets"),
		}
	}
}

impl Serialize for CacheTopic {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.collect_str(self)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_topic_tags() {
		assert_eq!(CacheTopic::MyItems.to_string(), "my-items");
		assert_eq!(CacheTopic::InstantSellItems.to_string(), "instant-sell-items");
		assert_eq!(
			CacheTopic::Order(B256::repeat_byte(0x11)).to_string(),
			format!("order:0x{}", "11".repeat(32))
		);
		assert_eq!(
			CacheTopic::LaunchpadHistory(Address::repeat_byte(0xAB)).to_string(),
			format!("launchpad-history:0x{}", "ab".repeat(20))
		);
	}

	#[test]
	fn test_topics_serialize_as_strings() {
		let json = serde_json::to_value(vec![CacheTopic::Nfts, CacheTopic::Offers]).unwrap();
		assert_eq!(json, serde_json::json!(["nfts", "offers"]));
	}
}
