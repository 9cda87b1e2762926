//! The user's working set of selected items (a cart).
//!
//! Only validation and successful execution mutate it, always through the
//! methods below.

use market_types::B256;
use tokio::sync::RwLock;

/// One selected item: an order and, for multi-asset orders, which asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedItem {
	pub order_hash: B256,
	pub asset_id: Option<String>,
}

impl SelectedItem {
	pub fn order(order_hash: B256) -> Self {
		Self {
			order_hash,
			asset_id: None,
		}
	}
}

#[derive(Debug, Default)]
pub struct SelectionStore {
	items: RwLock<Vec<SelectedItem>>,
}

impl SelectionStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds an item unless an identical one is already selected.
	pub async fn add(&self, item: SelectedItem) {
		let mut items = self.items.write().await;
		if !items.contains(&item) {
			items.push(item);
		}
	}

	/// Removes every item belonging to one of `hashes`. Returns how many went.
	pub async fn remove_by_order_hashes(&self, hashes: &[B256]) -> usize {
		let mut items = self.items.write().await;
		let before = items.len();
		items.retain(|item| !hashes.contains(&item.order_hash));
		before - items.len()
	}

	pub async fn clear(&self) {
		self.items.write().await.clear();
	}

	pub async fn items(&self) -> Vec<SelectedItem> {
		self.items.read().await.clone()
	}

	pub async fn len(&self) -> usize {
		self.items.read().await.len()
	}

	pub async fn is_empty(&self) -> bool {
		self.items.read().await.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_add_is_idempotent_and_remove_by_hash() {
		let store = SelectionStore::new();
		let a = B256::repeat_byte(1);
		let b = B256::repeat_byte(2);

		store.add(SelectedItem::order(a)).await;
		store.add(SelectedItem::order(a)).await;
		store
			.add(SelectedItem {
				order_hash: b,
				asset_id: Some("1:0x01:7".to_string()),
			})
			.await;
		assert_eq!(store.len().await, 2);

		assert_eq!(store.remove_by_order_hashes(&[a]).await, 1);
		assert_eq!(store.items().await[0].order_hash, b);

		store.clear().await;
		assert!(store.is_empty().await);
	}
}
