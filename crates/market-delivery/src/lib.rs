//! Wallet transport for the marketplace.
//!
//! Delivery owns everything between an unsigned [`RawTransaction`] and a mined
//! [`TransactionReceipt`]: reporting the wallet's active chain, signing and
//! broadcasting, and waiting for confirmation within the transport's own
//! timeout.

use async_trait::async_trait;
use market_types::{truncate_hash, ConfigSchema, RawTransaction, TransactionReceipt, B256};
use thiserror::Error;
use tracing::{info, warn};

pub mod implementations {
	pub mod evm {
		pub mod alloy;
	}
}

/// Errors that can occur while delivering a transaction.
#[derive(Debug, Error)]
pub enum DeliveryError {
	/// The wallet refused to sign or the node refused the transaction.
	#[error("Transaction rejected: {0}")]
	Rejected(String),
	/// The transaction was mined but reverted.
	#[error("Transaction {0} reverted")]
	Reverted(B256),
	/// No receipt arrived within the transport timeout.
	#[error("Timed out: {0}")]
	Timeout(String),
	#[error("Network error: {0}")]
	Network(String),
	#[error("Invalid configuration: {0}")]
	InvalidConfig(String),
}

impl DeliveryError {
	/// Whether re-attempting the same step may succeed.
	pub fn is_retryable(&self) -> bool {
		!matches!(self, DeliveryError::InvalidConfig(_))
	}
}

/// Trait defining the interface for wallet transports.
#[async_trait]
pub trait DeliveryInterface: Send + Sync {
	/// Returns the configuration schema for this delivery implementation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Chain the connected wallet is currently on.
	async fn chain_id(&self) -> Result<u64, DeliveryError>;

	/// Signs and broadcasts a transaction, returning its hash.
	async fn submit(&self, tx: RawTransaction) -> Result<B256, DeliveryError>;

	/// Waits until the transaction is `confirmations` blocks deep, counting
	/// the block that includes it.
	async fn wait_for_confirmation(
		&self,
		hash: &B256,
		confirmations: u64,
	) -> Result<TransactionReceipt, DeliveryError>;
}

/// Service that submits transactions one at a time and waits for each.
pub struct DeliveryService {
	provider: Box<dyn DeliveryInterface>,
	confirmations: u64,
}

impl DeliveryService {
	pub fn new(provider: Box<dyn DeliveryInterface>, confirmations: u64) -> Self {
		Self {
			provider,
			confirmations,
		}
	}

	pub async fn active_chain_id(&self) -> Result<u64, DeliveryError> {
		self.provider.chain_id().await
	}

	/// Submits `tx`, waits for it to be mined and fails if it reverted.
	pub async fn deliver(&self, tx: RawTransaction) -> Result<TransactionReceipt, DeliveryError> {
		let hash = self.provider.submit(tx).await?;
		info!(tx_hash = %truncate_hash(&hash), "Transaction submitted");

		let receipt = self
			.provider
			.wait_for_confirmation(&hash, self.confirmations)
			.await?;

		if !receipt.success {
			warn!(tx_hash = %truncate_hash(&hash), block = receipt.block_number, "Transaction reverted");
			return Err(DeliveryError::Reverted(hash));
		}

		info!(
			tx_hash = %truncate_hash(&hash),
			block = receipt.block_number,
			"Transaction confirmed"
		);
		Ok(receipt)
	}
}
