//! Client for the off-chain order index.
//!
//! The index is the marketplace's cached view of orders and assets. The
//! execution pipeline reads orders from it, asks it to re-sync orders and
//! transactions against chain truth, fetches mint eligibility proofs and
//! registers newly signed orders.

use async_trait::async_trait;
use market_types::{
	Address, ConfigSchema, Order, RawLog, SignedOrder, WhitelistProof, B256,
};
use thiserror::Error;

pub mod implementations {
	pub mod http;
}

/// Errors that can occur while talking to the index.
#[derive(Debug, Error)]
pub enum IndexError {
	#[error("HTTP error: {0}")]
	Http(String),
	#[error("Index responded {status}: {body}")]
	Status { status: u16, body: String },
	#[error("Failed to decode response: {0}")]
	Decode(String),
	#[error("Invalid configuration: {0}")]
	InvalidConfig(String),
}

/// Trait defining the operations the pipeline needs from the index.
#[async_trait]
pub trait IndexInterface: Send + Sync {
	/// Returns the configuration schema for this index implementation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// `PUT orders/sync/{chainId}/{exchangeAddress}`: re-reads one order's on-chain state.
	async fn sync_order(
		&self,
		chain_id: u64,
		exchange_address: &Address,
		hash: &B256,
	) -> Result<(), IndexError>;

	/// `PUT orders/sync/{chainId}/{txHash}`: re-reads a mined transaction and
	/// returns its transfer-event logs.
	async fn sync_transaction(&self, chain_id: u64, tx_hash: &B256)
		-> Result<Vec<RawLog>, IndexError>;

	/// `POST whitelist/proof`: eligibility and merkle proof for a gated mint.
	async fn whitelist_proof(
		&self,
		chain_id: u64,
		contract_address: &Address,
		account: &Address,
	) -> Result<WhitelistProof, IndexError>;

	/// `POST orders/bulk`: registers signed orders, returning the stored records.
	async fn post_orders(&self, orders: Vec<SignedOrder>) -> Result<Vec<Order>, IndexError>;
}
