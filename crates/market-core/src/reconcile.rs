//! Post-transaction reconciliation.
//!
//! After a terminal transaction is mined the index is asked to re-read it.
//! The transfer events it returns say which tokens actually moved, which for
//! a batch purchase may be fewer than were requested.

use alloy::sol_types::SolEvent;
use market_index::{IndexError, IndexInterface};
use market_types::contracts::{IERC1155, IERC721};
use market_types::{truncate_hash, Address, Asset, Order, RawLog, TokenKey, B256, U256};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ReconcileError {
	#[error("Index sync failed: {0}")]
	Index(#[from] IndexError),
}

/// One token movement decoded from a transfer event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenTransfer {
	pub contract: Address,
	pub from: Address,
	pub to: Address,
	pub token_id: U256,
}

impl TokenTransfer {
	pub fn key(&self) -> TokenKey {
		TokenKey {
			contract: self.contract,
			token_id: self.token_id,
		}
	}
}

/// What a mined transaction changed, as far as the index could tell.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reconciliation {
	pub transfers: Vec<TokenTransfer>,
	/// Tokens from `transfers`, deduplicated by contract and id in
	/// first-seen order.
	pub affected_tokens: Vec<TokenKey>,
}

impl Reconciliation {
	pub fn from_logs(logs: &[RawLog]) -> Self {
		let transfers = extract_transfers(logs);
		let mut affected_tokens: Vec<TokenKey> = Vec::new();
		for key in transfers.iter().map(TokenTransfer::key) {
			if !affected_tokens.contains(&key) {
				affected_tokens.push(key);
			}
		}
		Self {
			transfers,
			affected_tokens,
		}
	}

	/// The subset of `requested` that appears in the transfer logs.
	pub fn acquired(&self, requested: &[Asset]) -> Vec<Asset> {
		requested
			.iter()
			.filter(|asset| self.affected_tokens.contains(&asset.key()))
			.cloned()
			.collect()
	}
}

/// Decodes ERC-721 `Transfer` and ERC-1155 `TransferSingle`/`TransferBatch`
/// events. ERC-20 `Transfer` shares the ERC-721 signature but has only three
/// topics and is skipped.
pub fn extract_transfers(logs: &[RawLog]) -> Vec<TokenTransfer> {
	let mut transfers = Vec::new();

	for log in logs {
		let Some(signature) = log.topics.first() else {
			continue;
		};
		let topics = log.topics.iter().copied();

		if *signature == IERC721::Transfer::SIGNATURE_HASH && log.topics.len() == 4 {
			match IERC721::Transfer::decode_raw_log(topics, &log.data) {
				Ok(event) => transfers.push(TokenTransfer {
					contract: log.address,
					from: event.from,
					to: event.to,
					token_id: event.tokenId,
				}),
				Err(e) => debug!(contract = %log.address, error = %e, "Undecodable Transfer log"),
			}
		} else if *signature == IERC1155::TransferSingle::SIGNATURE_HASH {
			match IERC1155::TransferSingle::decode_raw_log(topics, &log.data) {
				Ok(event) => transfers.push(TokenTransfer {
					contract: log.address,
					from: event.from,
					to: event.to,
					token_id: event.id,
				}),
				Err(e) => {
					debug!(contract = %log.address, error = %e, "Undecodable TransferSingle log")
				}
			}
		} else if *signature == IERC1155::TransferBatch::SIGNATURE_HASH {
			match IERC1155::TransferBatch::decode_raw_log(topics, &log.data) {
				Ok(event) => transfers.extend(event.ids.iter().map(|id| TokenTransfer {
					contract: log.address,
					from: event.from,
					to: event.to,
					token_id: *id,
				})),
				Err(e) => {
					debug!(contract = %log.address, error = %e, "Undecodable TransferBatch log")
				}
			}
		}
	}

	transfers
}

/// Syncs mined transactions and orders back into the index.
pub struct Reconciler {
	index: Arc<dyn IndexInterface>,
}

impl Reconciler {
	pub fn new(index: Arc<dyn IndexInterface>) -> Self {
		Self { index }
	}

	/// Syncs `tx_hash` and decodes its transfers, failing if the index does.
	pub async fn try_reconcile(
		&self,
		chain_id: u64,
		tx_hash: &B256,
	) -> Result<Reconciliation, ReconcileError> {
		let logs = self.index.sync_transaction(chain_id, tx_hash).await?;
		let reconciliation = Reconciliation::from_logs(&logs);

		info!(
			tx_hash = %truncate_hash(tx_hash),
			chain_id,
			logs = logs.len(),
			tokens = reconciliation.affected_tokens.len(),
			"Reconciled transaction"
		);

		Ok(reconciliation)
	}

	/// Like [`Self::try_reconcile`], but a sync failure is logged and yields an
	/// empty reconciliation. The transaction already succeeded on-chain.
	pub async fn reconcile(&self, chain_id: u64, tx_hash: &B256) -> Reconciliation {
		match self.try_reconcile(chain_id, tx_hash).await {
			Ok(reconciliation) => reconciliation,
			Err(e) => {
				warn!(
					tx_hash = %truncate_hash(tx_hash),
					chain_id,
					error = %e,
					"Reconciliation failed; views will refresh on next fetch"
				);
				Reconciliation::default()
			}
		}
	}

	/// Re-syncs each order with the index, logging failures. Returns how
	/// many syncs succeeded.
	pub async fn resync_orders(&self, orders: &[Order]) -> usize {
		let mut synced = 0;
		for order in orders {
			match self
				.index
				.sync_order(order.chain_id, &order.exchange_address, &order.hash)
				.await
			{
				Ok(()) => synced += 1,
				Err(e) => {
					warn!(order_hash = %order.hash, error = %e, "Failed to re-sync order")
				}
			}
		}
		synced
	}
}
