//! On-chain approval checker.
//!
//! Reads ERC-20 allowances and operator approvals so a replanned intent does
//! not ask the wallet to approve something it already has.

use crate::{ApprovalCheckerInterface, PlanError};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use async_trait::async_trait;
use market_types::contracts::{IERC20, IERC721};
use market_types::{
	Address, Approval, ApprovalKind, ConfigSchema, Field, FieldType, Schema, ValidationError,
};

/// Approval checker backed by direct contract reads.
pub struct OnchainApprovalChecker {
	provider: DynProvider,
	chain_id: Option<u64>,
}

impl OnchainApprovalChecker {
	pub fn new(rpc_url: &str, chain_id: Option<u64>) -> Result<Self, PlanError> {
		let url = rpc_url
			.parse()
			.map_err(|e| PlanError::InvalidConfig(format!("Invalid RPC URL: {}", e)))?;

		Ok(Self {
			provider: ProviderBuilder::new().connect_http(url).erased(),
			chain_id,
		})
	}
}

/// Configuration schema for the on-chain approval checker.
pub struct OnchainApprovalSchema;

impl ConfigSchema for OnchainApprovalSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![Field::new("rpc_url", FieldType::Url)],
			vec![Field::new(
				"chain_id",
				FieldType::Integer {
					min: Some(1),
					max: None,
				},
			)],
		);

		schema.validate(config)
	}
}

#[async_trait]
impl ApprovalCheckerInterface for OnchainApprovalChecker {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(OnchainApprovalSchema)
	}

	async fn is_granted(&self, owner: &Address, approval: &Approval) -> Result<bool, PlanError> {
		if let Some(chain_id) = self.chain_id {
			if approval.transaction.chain_id != chain_id {
				// Not readable from this endpoint.
				return Ok(false);
			}
		}

		match &approval.kind {
			ApprovalKind::Allowance { amount } => {
				let token = IERC20::new(approval.token, &self.provider);
				let allowance = token
					.allowance(*owner, approval.operator)
					.call()
					.await
					.map_err(|e| PlanError::Aggregator(format!("allowance: {}", e)))?;
				Ok(allowance >= *amount)
			}
			ApprovalKind::ForAll => {
				// ERC-1155 shares the ERC-721 selector.
				let token = IERC721::new(approval.token, &self.provider);
				token
					.isApprovedForAll(*owner, approval.operator)
					.call()
					.await
					.map_err(|e| PlanError::Aggregator(format!("isApprovedForAll: {}", e)))
			}
		}
	}
}

/// Builds an [`OnchainApprovalChecker`] from its `[aggregator.approvals]` table.
pub fn create_onchain_approval_checker(
	config: &toml::Value,
) -> Result<Box<dyn ApprovalCheckerInterface>, PlanError> {
	OnchainApprovalSchema
		.validate(config)
		.map_err(|e| PlanError::InvalidConfig(e.to_string()))?;

	let rpc_url = config
		.get("rpc_url")
		.and_then(|v| v.as_str())
		.ok_or_else(|| PlanError::InvalidConfig("rpc_url is required".to_string()))?;

	let chain_id = config
		.get("chain_id")
		.and_then(|v| v.as_integer())
		.map(|v| v as u64);

	Ok(Box::new(OnchainApprovalChecker::new(rpc_url, chain_id)?))
}
