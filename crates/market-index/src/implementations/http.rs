//! HTTP/JSON index client.

use crate::{IndexError, IndexInterface};
use async_trait::async_trait;
use market_types::{
	Address, ConfigSchema, Field, FieldType, Order, RawLog, Schema, SignedOrder, ValidationError,
	WhitelistProof, B256,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

/// Index client speaking the `/v3` REST API.
pub struct HttpIndex {
	client: reqwest::Client,
	base_url: String,
	api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SyncTransactionResponse {
	#[serde(default)]
	logs: Vec<RawLog>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WhitelistProofRequest {
	chain_id: u64,
	contract_address: Address,
	wallet_address: Address,
}

#[derive(Debug, Serialize)]
struct BulkOrdersRequest {
	orders: Vec<SignedOrder>,
}

#[derive(Debug, Deserialize)]
struct BulkOrdersResponse {
	#[serde(default)]
	orders: Vec<Order>,
}

impl HttpIndex {
	pub fn new(
		base_url: impl Into<String>,
		api_key: Option<String>,
		timeout: Duration,
	) -> Result<Self, IndexError> {
		let client = reqwest::Client::builder()
			.timeout(timeout)
			.build()
			.map_err(|e| IndexError::InvalidConfig(e.to_string()))?;

		Ok(Self {
			client,
			base_url: base_url.into().trim_end_matches('/').to_string(),
			api_key,
		})
	}

	fn url(&self, path: &str) -> String {
		format!("{}/{}", self.base_url, path)
	}

	fn with_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
		match &self.api_key {
			Some(key) => request.header("x-api-key", key),
			None => request,
		}
	}

	async fn send<T: DeserializeOwned>(
		&self,
		request: reqwest::RequestBuilder,
	) -> Result<T, IndexError> {
		let response = self
			.with_auth(request)
			.send()
			.await
			.map_err(|e| IndexError::Http(e.to_string()))?;

		let status = response.status();
		if !status.is_success() {
			let body = response.text().await.unwrap_or_default();
			return Err(IndexError::Status {
				status: status.as_u16(),
				body,
			});
		}

		response
			.json::<T>()
			.await
			.map_err(|e| IndexError::Decode(e.to_string()))
	}
}

pub(crate) fn sync_order_path(chain_id: u64, exchange_address: &Address, hash: &B256) -> String {
	format!(
		"orders/sync/{}/{}?hash={}",
		chain_id,
		exchange_address.to_string().to_lowercase(),
		hash
	)
}

pub(crate) fn sync_transaction_path(chain_id: u64, tx_hash: &B256) -> String {
	format!("orders/sync/{}/{}", chain_id, tx_hash)
}

/// Configuration schema for the HTTP index.
pub struct HttpIndexSchema;

impl ConfigSchema for HttpIndexSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![Field::new("base_url", FieldType::Url)],
			vec![
				Field::new("api_key", FieldType::String),
				Field::new(
					"timeout_seconds",
					FieldType::Integer {
						min: Some(1),
						max: Some(300),
					},
				),
			],
		);

		schema.validate(config)
	}
}

#[async_trait]
impl IndexInterface for HttpIndex {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(HttpIndexSchema)
	}

	async fn sync_order(
		&self,
		chain_id: u64,
		exchange_address: &Address,
		hash: &B256,
	) -> Result<(), IndexError> {
		let path = sync_order_path(chain_id, exchange_address, hash);
		debug!(%path, "Requesting order sync");
		let _: serde_json::Value = self.send(self.client.put(self.url(&path))).await?;
		Ok(())
	}

	async fn sync_transaction(
		&self,
		chain_id: u64,
		tx_hash: &B256,
	) -> Result<Vec<RawLog>, IndexError> {
		let path = sync_transaction_path(chain_id, tx_hash);
		debug!(%path, "Requesting transaction sync");
		let response: SyncTransactionResponse =
			self.send(self.client.put(self.url(&path))).await?;
		Ok(response.logs)
	}

	async fn whitelist_proof(
		&self,
		chain_id: u64,
		contract_address: &Address,
		account: &Address,
	) -> Result<WhitelistProof, IndexError> {
		let body = WhitelistProofRequest {
			chain_id,
			contract_address: *contract_address,
			wallet_address: *account,
		};
		self.send(self.client.post(self.url("whitelist/proof")).json(&body))
			.await
	}

	async fn post_orders(&self, orders: Vec<SignedOrder>) -> Result<Vec<Order>, IndexError> {
		let body = BulkOrdersRequest { orders };
		let response: BulkOrdersResponse = self
			.send(self.client.post(self.url("orders/bulk")).json(&body))
			.await?;
		Ok(response.orders)
	}
}

/// Builds an [`HttpIndex`] from its `[index.config]` table.
pub fn create_http_index(config: &toml::Value) -> Result<Box<dyn IndexInterface>, IndexError> {
	HttpIndexSchema
		.validate(config)
		.map_err(|e| IndexError::InvalidConfig(e.to_string()))?;

	let base_url = config
		.get("base_url")
		.and_then(|v| v.as_str())
		.ok_or_else(|| IndexError::InvalidConfig("base_url is required".to_string()))?;

	let api_key = config
		.get("api_key")
		.and_then(|v| v.as_str())
		.map(str::to_string);

	let timeout_seconds = config
		.get("timeout_seconds")
		.and_then(|v| v.as_integer())
		.map(|v| v as u64)
		.unwrap_or(DEFAULT_TIMEOUT_SECONDS);

	Ok(Box::new(HttpIndex::new(
		base_url,
		api_key,
		Duration::from_secs(timeout_seconds),
	)?))
}
