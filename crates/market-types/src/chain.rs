//! Transaction receipts and log entries as seen by the marketplace.

use alloy::primitives::{Address, Bytes, B256};
use serde::{Deserialize, Serialize};

/// A raw event log: emitting contract, topics and undecoded data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
	pub address: Address,
	pub topics: Vec<B256>,
	#[serde(default)]
	pub data: Bytes,
}

/// Outcome of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
	pub hash: B256,
	pub block_number: u64,
	pub success: bool,
	#[serde(default)]
	pub logs: Vec<RawLog>,
}

/// Shortens a hash for log output.
pub fn truncate_hash(hash: &B256) -> String {
	let hash_str = hex::encode(hash.0);
	format!("0x{}..", &hash_str[..8])
}
