//! Alloy-based EVM wallet transport.
//!
//! Signs with a local key through the provider's wallet filler, submits over
//! HTTP and polls for receipts until the requested confirmation depth or the
//! configured timeout is reached.

use crate::{DeliveryError, DeliveryInterface};
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use market_types::{
	truncate_hash, validate_private_key, ConfigSchema, Field, FieldType, RawLog, RawTransaction,
	Schema, TransactionReceipt, ValidationError, B256,
};
use std::time::Duration;

const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;
const DEFAULT_TIMEOUT_SECONDS: u64 = 300;

/// Wallet transport over an HTTP JSON-RPC endpoint.
pub struct AlloyDelivery {
	provider: DynProvider,
	poll_interval: Duration,
	timeout: Duration,
}

impl AlloyDelivery {
	/// Connects a wallet-enabled provider to `rpc_url`.
	pub fn new(
		rpc_url: &str,
		signer: PrivateKeySigner,
		poll_interval: Duration,
		timeout: Duration,
	) -> Result<Self, DeliveryError> {
		let url = rpc_url
			.parse()
			.map_err(|e| DeliveryError::InvalidConfig(format!("Invalid RPC URL: {}", e)))?;

		let wallet = EthereumWallet::from(signer);
		let provider = ProviderBuilder::new()
			.wallet(wallet)
			.connect_http(url)
			.erased();

		Ok(Self {
			provider,
			poll_interval,
			timeout,
		})
	}
}

/// Converts a marketplace transaction into an Alloy request.
pub(crate) fn to_request(tx: &RawTransaction) -> TransactionRequest {
	TransactionRequest::default()
		.with_to(tx.to)
		.with_input(tx.data.clone())
		.with_value(tx.value)
		.with_chain_id(tx.chain_id)
}

/// Schema for the `alloy` delivery table.
pub struct AlloyDeliverySchema;

impl ConfigSchema for AlloyDeliverySchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![
				Field::new("rpc_url", FieldType::Url),
				Field::new("private_key", FieldType::String).with_validator(validate_private_key),
			],
			vec![
				Field::new(
					"poll_interval_ms",
					FieldType::Integer {
						min: Some(100),
						max: None,
					},
				),
				Field::new(
					"timeout_seconds",
					FieldType::Integer {
						min: Some(1),
						max: Some(3600),
					},
				),
			],
		);

		schema.validate(config)
	}
}

#[async_trait]
impl DeliveryInterface for AlloyDelivery {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(AlloyDeliverySchema)
	}

	async fn chain_id(&self) -> Result<u64, DeliveryError> {
		self.provider
			.get_chain_id()
			.await
			.map_err(|e| DeliveryError::Network(format!("Failed to get chain id: {}", e)))
	}

	async fn submit(&self, tx: RawTransaction) -> Result<B256, DeliveryError> {
		let request = to_request(&tx);

		let pending_tx = self
			.provider
			.send_transaction(request)
			.await
			.map_err(|e| DeliveryError::Rejected(e.to_string()))?;

		let tx_hash = *pending_tx.tx_hash();
		tracing::debug!(tx_hash = %truncate_hash(&tx_hash), to = %tx.to, "Broadcast transaction");

		Ok(tx_hash)
	}

	async fn wait_for_confirmation(
		&self,
		hash: &B256,
		confirmations: u64,
	) -> Result<TransactionReceipt, DeliveryError> {
		tracing::info!(
			tx_hash = %truncate_hash(hash),
			confirmations,
			timeout_secs = self.timeout.as_secs(),
			"Awaiting confirmation"
		);

		tokio::time::timeout(self.timeout, self.poll_receipt(hash, confirmations))
			.await
			.map_err(|_| {
				DeliveryError::Timeout(format!(
					"No confirmation for {} after {} seconds",
					truncate_hash(hash),
					self.timeout.as_secs()
				))
			})?
	}
}

impl AlloyDelivery {
	/// Polls until the receipt for `hash` is buried `confirmations` deep.
	async fn poll_receipt(
		&self,
		hash: &B256,
		confirmations: u64,
	) -> Result<TransactionReceipt, DeliveryError> {
		loop {
			let mined = self
				.provider
				.get_transaction_receipt(*hash)
				.await
				.map_err(|e| DeliveryError::Network(format!("Failed to get receipt: {}", e)))?;

			if let Some(receipt) = mined {
				let head = self.provider.get_block_number().await.map_err(|e| {
					DeliveryError::Network(format!("Failed to get block number: {}", e))
				})?;
				let mined_at = receipt.block_number.unwrap_or(head);
				let depth = confirmation_depth(head, mined_at);

				if depth >= confirmations {
					return Ok(into_receipt(&receipt, mined_at));
				}
				tracing::debug!(
					tx_hash = %truncate_hash(hash),
					depth,
					confirmations,
					"Mined, waiting for depth"
				);
			}

			tokio::time::sleep(self.poll_interval).await;
		}
	}
}

/// Confirmations of a transaction mined at `mined_at` when the chain head is
/// `head`. The inclusion block counts as the first.
fn confirmation_depth(head: u64, mined_at: u64) -> u64 {
	head.saturating_sub(mined_at) + 1
}

fn into_receipt(
	receipt: &alloy::rpc::types::TransactionReceipt,
	block_number: u64,
) -> TransactionReceipt {
	let logs = receipt
		.inner
		.logs()
		.iter()
		.map(|log| RawLog {
			address: log.inner.address,
			topics: log.inner.data.topics().to_vec(),
			data: log.inner.data.data.clone(),
		})
		.collect();

	TransactionReceipt {
		hash: receipt.transaction_hash,
		block_number,
		success: receipt.status(),
		logs,
	}
}

/// Builds an [`AlloyDelivery`] from a `[delivery.config]` table holding
/// `rpc_url` and `private_key`, plus optional `poll_interval_ms` and
/// `timeout_seconds`.
pub fn create_http_delivery(
	config: &toml::Value,
) -> Result<Box<dyn DeliveryInterface>, DeliveryError> {
	AlloyDeliverySchema
		.validate(config)
		.map_err(|e| DeliveryError::InvalidConfig(e.to_string()))?;

	let rpc_url = config
		.get("rpc_url")
		.and_then(|v| v.as_str())
		.ok_or_else(|| DeliveryError::InvalidConfig("rpc_url is required".to_string()))?;

	let private_key = config
		.get("private_key")
		.and_then(|v| v.as_str())
		.ok_or_else(|| DeliveryError::InvalidConfig("private_key is required".to_string()))?;

	let signer: PrivateKeySigner = private_key
		.parse()
		.map_err(|e| DeliveryError::InvalidConfig(format!("Invalid private key: {}", e)))?;

	let poll_interval_ms = config
		.get("poll_interval_ms")
		.and_then(|v| v.as_integer())
		.map(|v| v as u64)
		.unwrap_or(DEFAULT_POLL_INTERVAL_MS);

	let timeout_seconds = config
		.get("timeout_seconds")
		.and_then(|v| v.as_integer())
		.map(|v| v as u64)
		.unwrap_or(DEFAULT_TIMEOUT_SECONDS);

	let delivery = AlloyDelivery::new(
		rpc_url,
		signer,
		Duration::from_millis(poll_interval_ms),
		Duration::from_secs(timeout_seconds),
	)?;

	Ok(Box::new(delivery))
}
