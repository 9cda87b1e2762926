//! Signing accounts.
//!
//! An account is the identity a workflow acts for: it supplies the viewer
//! address used for self-dealing checks and signs order digests for
//! off-chain order creation. Transaction signing belongs to the delivery
//! transport.

use async_trait::async_trait;
use market_types::{Address, ConfigSchema, B256};
use thiserror::Error;

pub mod implementations {
	pub mod local;
}

#[derive(Debug, Error)]
pub enum AccountError {
	#[error("Signing failed: {0}")]
	SigningFailed(String),
	#[error("Invalid key: {0}")]
	InvalidKey(String),
	#[error("Invalid configuration: {0}")]
	InvalidConfig(String),
}

#[async_trait]
pub trait AccountInterface: Send + Sync {
	/// Returns the configuration schema for this account implementation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	async fn address(&self) -> Result<Address, AccountError>;

	/// Signs a 32-byte digest and returns the 65-byte `r || s || v` signature.
	async fn sign_hash(&self, hash: &B256) -> Result<Vec<u8>, AccountError>;
}

pub struct AccountService {
	provider: Box<dyn AccountInterface>,
}

impl AccountService {
	pub fn new(provider: Box<dyn AccountInterface>) -> Self {
		Self { provider }
	}

	pub async fn get_address(&self) -> Result<Address, AccountError> {
		self.provider.address().await
	}

	pub async fn sign_digest(&self, hash: &B256) -> Result<Vec<u8>, AccountError> {
		self.provider.sign_hash(hash).await
	}
}
