//! HTTP/JSON aggregator client.
//!
//! Each intent maps to one POST endpoint answering with the actions that
//! realise it, in the tagged [`Action`] JSON shape.

use crate::{AggregatorInterface, PlanError, SwapPlan};
use async_trait::async_trait;
use market_types::{
	Action, Address, BatchTransferRequest, ConfigSchema, Field, FieldType, MintRequest, Order,
	OrderFill, OrderTerms, Schema, SwapRequest, ValidationError, WhitelistProof,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

/// Aggregator reached over its REST API.
pub struct HttpAggregator {
	client: reqwest::Client,
	base_url: String,
	api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ActionsResponse {
	#[serde(default)]
	actions: Vec<Action>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FulfillRequest<'a> {
	chain_id: u64,
	orders: &'a [OrderFill],
	account_address: Address,
	is_fulfill_offer: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateRequest<'a> {
	terms: &'a [OrderTerms],
	account_address: Address,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CancelRequest<'a> {
	chain_id: u64,
	orders: &'a [Order],
	account_address: Address,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MintBody<'a> {
	#[serde(flatten)]
	request: &'a MintRequest,
	account_address: Address,
	#[serde(skip_serializing_if = "Option::is_none")]
	whitelist_proof: Option<&'a WhitelistProof>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchTransferBody<'a> {
	#[serde(flatten)]
	request: &'a BatchTransferRequest,
	account_address: Address,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SwapBody<'a> {
	#[serde(flatten)]
	request: &'a SwapRequest,
	account_address: Address,
}

impl HttpAggregator {
	pub fn new(
		base_url: impl Into<String>,
		api_key: Option<String>,
		timeout: Duration,
	) -> Result<Self, PlanError> {
		let client = reqwest::Client::builder()
			.timeout(timeout)
			.build()
			.map_err(|e| PlanError::InvalidConfig(e.to_string()))?;

		Ok(Self {
			client,
			base_url: base_url.into().trim_end_matches('/').to_string(),
			api_key,
		})
	}

	fn url(&self, path: &str) -> String {
		format!("{}/{}", self.base_url, path)
	}

	async fn post<B: Serialize + Sync, T: DeserializeOwned>(
		&self,
		path: &str,
		body: &B,
	) -> Result<T, PlanError> {
		debug!(%path, "Requesting aggregator plan");

		let mut request = self.client.post(self.url(path)).json(body);
		if let Some(key) = &self.api_key {
			request = request.header("x-api-key", key);
		}

		let response = request
			.send()
			.await
			.map_err(|e| PlanError::Aggregator(e.to_string()))?;

		let status = response.status();
		if !status.is_success() {
			let body = response.text().await.unwrap_or_default();
			return Err(PlanError::Aggregator(format!(
				"{} responded {}: {}",
				path,
				status.as_u16(),
				body
			)));
		}

		response
			.json::<T>()
			.await
			.map_err(|e| PlanError::Aggregator(format!("Failed to decode {}: {}", path, e)))
	}

	async fn actions<B: Serialize + Sync>(
		&self,
		path: &str,
		body: &B,
	) -> Result<Vec<Action>, PlanError> {
		let response: ActionsResponse = self.post(path, body).await?;
		Ok(response.actions)
	}
}

/// Configuration schema for the HTTP aggregator.
pub struct HttpAggregatorSchema;

impl ConfigSchema for HttpAggregatorSchema {
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
impl AggregatorInterface for HttpAggregator {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(HttpAggregatorSchema)
	}

	async fn fulfill_orders(
		&self,
		chain_id: u64,
		fills: &[OrderFill],
		account: &Address,
		is_fulfill_offer: bool,
	) -> Result<Vec<Action>, PlanError> {
		let body = FulfillRequest {
			chain_id,
			orders: fills,
			account_address: *account,
			is_fulfill_offer,
		};
		self.actions("orders/fulfill", &body).await
	}

	async fn create_orders(
		&self,
		terms: &[OrderTerms],
		account: &Address,
	) -> Result<Vec<Action>, PlanError> {
		let body = CreateRequest {
			terms,
			account_address: *account,
		};
		self.actions("orders/create", &body).await
	}

	async fn cancel_orders(
		&self,
		chain_id: u64,
		orders: &[Order],
		account: &Address,
	) -> Result<Vec<Action>, PlanError> {
		let body = CancelRequest {
			chain_id,
			orders,
			account_address: *account,
		};
		self.actions("orders/cancel", &body).await
	}

	async fn mint(
		&self,
		request: &MintRequest,
		account: &Address,
		proof: Option<&WhitelistProof>,
	) -> Result<Vec<Action>, PlanError> {
		let body = MintBody {
			request,
			account_address: *account,
			whitelist_proof: proof,
		};
		self.actions("mint", &body).await
	}

	async fn batch_transfer(
		&self,
		request: &BatchTransferRequest,
		account: &Address,
	) -> Result<Vec<Action>, PlanError> {
		let body = BatchTransferBody {
			request,
			account_address: *account,
		};
		self.actions("transfers/batch", &body).await
	}

	async fn swap(&self, request: &SwapRequest, account: &Address) -> Result<SwapPlan, PlanError> {
		let body = SwapBody {
			request,
			account_address: *account,
		};
		self.post("swap/quote", &body).await
	}
}

/// Builds an [`HttpAggregator`] from its `[aggregator.config]` table.
pub fn create_http_aggregator(
	config: &toml::Value,
) -> Result<Box<dyn AggregatorInterface>, PlanError> {
	HttpAggregatorSchema
		.validate(config)
		.map_err(|e| PlanError::InvalidConfig(e.to_string()))?;

	let base_url = config
		.get("base_url")
		.and_then(|v| v.as_str())
		.ok_or_else(|| PlanError::InvalidConfig("base_url is required".to_string()))?;

	let api_key = config
		.get("api_key")
		.and_then(|v| v.as_str())
		.map(str::to_string);

	let timeout_seconds = config
		.get("timeout_seconds")
		.and_then(|v| v.as_integer())
		.map(|v| v as u64)
		.unwrap_or(DEFAULT_TIMEOUT_SECONDS);

	Ok(Box::new(HttpAggregator::new(
		base_url,
		api_key,
		Duration::from_secs(timeout_seconds),
	)?))
}
