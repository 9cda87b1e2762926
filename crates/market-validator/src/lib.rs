//! Order validation.
//!
//! Before a workflow prices or compiles anything, every candidate order is
//! checked for self-dealing and then re-validated against the exchange
//! protocol's on-chain state in a single batch. Orders that turn out to be
//! unfillable are re-synced with the index and dropped from the selection.

use async_trait::async_trait;
use market_index::IndexInterface;
use market_types::{Address, ConfigSchema, Order, B256};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod selection;

pub mod implementations {
	pub mod onchain;
}

pub use selection::{SelectedItem, SelectionStore};

/// Errors that can occur during order validation.
#[derive(Debug, Error)]
pub enum ValidatorError {
	/// The strict validator could not reach chain state.
	#[error("RPC error: {0}")]
	Rpc(String),
	/// Orders in one batch must share a chain.
	#[error("Orders span multiple chains: {0:?}")]
	MixedChains(Vec<u64>),
	#[error("Validator returned {actual} results for {expected} orders")]
	ResultMismatch { expected: usize, actual: usize },
	#[error("Invalid configuration: {0}")]
	InvalidConfig(String),
}

impl ValidatorError {
	pub fn is_retryable(&self) -> bool {
		matches!(self, ValidatorError::Rpc(_))
	}
}

/// The exchange protocol's strict validator.
///
/// Checks signature validity, on-chain cancellation and expiry, and the
/// offerer's balances and approvals. Results map positionally onto `orders`.
#[async_trait]
pub trait StrictValidatorInterface: Send + Sync {
	/// Returns the configuration schema for this validator implementation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	async fn validate_orders(
		&self,
		chain_id: u64,
		orders: &[Order],
	) -> Result<Vec<bool>, ValidatorError>;
}

/// Outcome of validating one order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationStatus {
	/// The viewer made this order and may not take it.
	Owned,
	Valid,
	Invalid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
	pub order_hash: B256,
	pub status: ValidationStatus,
}

/// Validates candidate orders for a viewer.
pub struct OrderValidator {
	strict: Box<dyn StrictValidatorInterface>,
	index: Arc<dyn IndexInterface>,
}

impl OrderValidator {
	pub fn new(strict: Box<dyn StrictValidatorInterface>, index: Arc<dyn IndexInterface>) -> Self {
		Self { strict, index }
	}

	/// Returns one result per order, in input order.
	///
	/// Invalid orders are re-synced with the index and removed from
	/// `selection`. If the batch check itself fails no order is tagged and the
	/// error is returned.
	pub async fn validate(
		&self,
		orders: &[Order],
		viewer: Option<&Address>,
		selection: &SelectionStore,
	) -> Result<Vec<ValidationResult>, ValidatorError> {
		let mut statuses: Vec<Option<ValidationStatus>> = orders
			.iter()
			.map(|order| match viewer {
				Some(viewer) if order.is_offered_by(viewer) => Some(ValidationStatus::Owned),
				_ => None,
			})
			.collect();

		let pending: Vec<usize> = statuses
			.iter()
			.enumerate()
			.filter(|(_, status)| status.is_none())
			.map(|(i, _)| i)
			.collect();

		if !pending.is_empty() {
			let batch: Vec<Order> = pending.iter().map(|&i| orders[i].clone()).collect();

			let mut chains: Vec<u64> = Vec::new();
			for order in &batch {
				if !chains.contains(&order.chain_id) {
					chains.push(order.chain_id);
				}
			}
			if chains.len() > 1 {
				return Err(ValidatorError::MixedChains(chains));
			}

			let verdicts = self.strict.validate_orders(chains[0], &batch).await?;
			if verdicts.len() != batch.len() {
				return Err(ValidatorError::ResultMismatch {
					expected: batch.len(),
					actual: verdicts.len(),
				});
			}

			for (&i, valid) in pending.iter().zip(verdicts) {
				statuses[i] = Some(if valid {
					ValidationStatus::Valid
				} else {
					ValidationStatus::Invalid
				});
			}
		}

		let results: Vec<ValidationResult> = orders
			.iter()
			.zip(statuses)
			.map(|(order, status)| ValidationResult {
				order_hash: order.hash,
				status: status.unwrap_or(ValidationStatus::Invalid),
			})
			.collect();

		let invalid: Vec<&Order> = orders
			.iter()
			.zip(&results)
			.filter(|(_, result)| result.status == ValidationStatus::Invalid)
			.map(|(order, _)| order)
			.collect();

		for order in &invalid {
			if let Err(e) = self
				.index
				.sync_order(order.chain_id, &order.exchange_address, &order.hash)
				.await
			{
				warn!(order_hash = %order.hash, error = %e, "Failed to re-sync invalid order");
			}
		}

		if !invalid.is_empty() {
			let hashes: Vec<B256> = invalid.iter().map(|order| order.hash).collect();
			let removed = selection.remove_by_order_hashes(&hashes).await;
			debug!(removed, "Dropped invalid orders from selection");
		}

		info!(
			total = results.len(),
			invalid = invalid.len(),
			owned = results
				.iter()
				.filter(|r| r.status == ValidationStatus::Owned)
				.count(),
			"Validated orders"
		);

		Ok(results)
	}
}


#[cfg(test)]
mod tests {
	use super::mocks::*;
	use super::*;
	use market_types::{Currency, OfferType, OrderCategory, U256};
	use std::sync::Mutex;

	fn order(byte: u8, offerer: Address) -> Order {
		Order {
			hash: B256::repeat_byte(byte),
			chain_id: 1,
			exchange_address: Address::repeat_byte(0xEE),
			offerer,
			category: OrderCategory::Offer,
			offer_type: OfferType::Single,
			per_unit_price: "1.5".to_string(),
			currency: Currency::new(1, Address::repeat_byte(0x99), 18, "WETH"),
			start_time: 0,
			end_time: 0,
			is_cancelled: false,
			is_fillable: true,
			start_amount: U256::from(1),
			available_amount: None,
			offer: vec![],
			consideration: vec![],
			assets: vec![],
		}
	}

	fn validator(
		invalid: Vec<B256>,
		fail: bool,
	) -> (OrderValidator, Arc<RecordingIndex>, Arc<Mutex<Vec<usize>>>) {
		let index = Arc::new(RecordingIndex::default());
		let calls = Arc::new(Mutex::new(Vec::new()));
		let validator = OrderValidator::new(
			Box::new(FixedValidator {
				invalid,
				fail,
				calls: calls.clone(),
			}),
			index.clone(),
		);
		(validator, index, calls)
	}

	#[tokio::test]
	async fn test_self_offer_is_owned_and_skips_onchain_check() {
		let maker = Address::repeat_byte(0xA);
		let (validator, _, calls) = validator(vec![B256::repeat_byte(1)], false);
		let selection = SelectionStore::new();

		let results = validator
			.validate(&[order(1, maker)], Some(&maker), &selection)
			.await
			.unwrap();

		assert_eq!(results[0].status, ValidationStatus::Owned);
		assert!(calls.lock().unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_batch_is_positional_and_invalid_orders_are_resynced() {
		let maker = Address::repeat_byte(0xA);
		let viewer = Address::repeat_byte(0xB);
		let (validator, index, calls) = validator(vec![B256::repeat_byte(2)], false);
		let selection = SelectionStore::new();
		for byte in 1..=3 {
			selection
				.add(SelectedItem::order(B256::repeat_byte(byte)))
				.await;
		}

		let orders = vec![order(1, maker), order(2, maker), order(3, viewer)];
		let results = validator
			.validate(&orders, Some(&viewer), &selection)
			.await
			.unwrap();

		let statuses: Vec<ValidationStatus> = results.iter().map(|r| r.status).collect();
		assert_eq!(
			statuses,
			vec![
				ValidationStatus::Valid,
				ValidationStatus::Invalid,
				ValidationStatus::Owned
			]
		);
		assert_eq!(*calls.lock().unwrap(), vec![2]);
		assert_eq!(*index.synced.lock().unwrap(), vec![B256::repeat_byte(2)]);

		let remaining: Vec<B256> = selection
			.items()
			.await
			.into_iter()
			.map(|item| item.order_hash)
			.collect();
		assert_eq!(remaining, vec![B256::repeat_byte(1), B256::repeat_byte(3)]);
	}

	#[tokio::test]
	async fn test_rpc_failure_fails_whole_call_without_side_effects() {
		let (validator, index, _) = validator(vec![], true);
		let selection = SelectionStore::new();
		selection.add(SelectedItem::order(B256::repeat_byte(1))).await;

		let err = validator
			.validate(&[order(1, Address::repeat_byte(0xA))], None, &selection)
			.await
			.unwrap_err();

		assert!(err.is_retryable());
		assert!(index.synced.lock().unwrap().is_empty());
		assert_eq!(selection.len().await, 1);
	}

	#[tokio::test]
	async fn test_mixed_chains_are_rejected() {
		let (validator, _, _) = validator(vec![], false);
		let mut other = order(2, Address::repeat_byte(0xA));
		other.chain_id = 137;

		let err = validator
			.validate(
				&[order(1, Address::repeat_byte(0xA)), other],
				None,
				&SelectionStore::new(),
			)
			.await
			.unwrap_err();
		assert!(matches!(err, ValidatorError::MixedChains(chains) if chains == vec![1, 137]));
	}

	#[tokio::test]
	async fn test_empty_input_returns_empty_result() {
		let (validator, _, calls) = validator(vec![], false);
		let results = validator
			.validate(&[], None, &SelectionStore::new())
			.await
			.unwrap();
		assert!(results.is_empty());
		assert!(calls.lock().unwrap().is_empty());
	}
}
