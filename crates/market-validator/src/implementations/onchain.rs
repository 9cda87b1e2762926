//! On-chain strict validator.
//!
//! Reads the offerer's balances, ownership and approvals for every offer item
//! directly from the chain, and optionally the exchange's own order status.
//! All reads for a cart go through Multicall3 `aggregate3`, so a cart costs
//! one round-trip per batch rather than one per item.

use crate::{StrictValidatorInterface, ValidatorError};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::sol_types::{SolCall, SolValue};
use async_trait::async_trait;
use market_types::contracts::{
	IExchange, IMulticall3, IERC1155, IERC20, IERC721, MULTICALL3_ADDRESS,
};
use market_types::{
	now_secs, Address, ConfigSchema, Field, FieldType, ItemType, Order, OrderItem, Schema,
	ValidationError, U256,
};
use tracing::debug;

/// Calls per `aggregate3` request unless configured otherwise.
const DEFAULT_BATCH_SIZE: usize = 300;

fn rpc_error(context: &str, e: impl std::fmt::Display) -> ValidatorError {
	ValidatorError::Rpc(format!("{}: {}", context, e))
}

/// What a read must return for its order to stay fillable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
	/// A `uint256` of at least this much.
	AtLeast(U256),
	/// An owner equal to this address.
	Owner(Address),
	/// A `true` flag.
	True,
	/// An exchange order status that is neither cancelled nor fully filled.
	OpenOrder,
}

impl Expect {
	/// A reverted call never passes.
	fn holds(&self, result: &IMulticall3::Call3Result) -> bool {
		if !result.success {
			return false;
		}
		let data = result.returnData.as_ref();
		match self {
			Expect::AtLeast(min) => U256::abi_decode(data).is_ok_and(|value| value >= *min),
			Expect::Owner(expected) => {
				Address::abi_decode(data).is_ok_and(|owner| owner == *expected)
			}
			Expect::True => bool::abi_decode(data).unwrap_or(false),
			Expect::OpenOrder => {
				IExchange::getOrderStatusCall::abi_decode_returns(data).is_ok_and(|status| {
					let exhausted =
						!status.totalSize.is_zero() && status.totalFilled >= status.totalSize;
					!status.isCancelled && !exhausted
				})
			}
		}
	}
}

/// One read in a batch, tagged with the order it decides.
struct Check {
	order: usize,
	call: IMulticall3::Call3,
	expect: Expect,
}

fn read(target: Address, call: impl SolCall, expect: Expect) -> (IMulticall3::Call3, Expect) {
	let call = IMulticall3::Call3 {
		target,
		allowFailure: true,
		callData: call.abi_encode().into(),
	};
	(call, expect)
}

/// Strict validator backed by batched contract reads.
pub struct OnchainValidator {
	provider: DynProvider,
	/// Operator that must hold approvals; defaults to each order's exchange.
	operator: Option<Address>,
	check_order_status: bool,
	multicall_address: Address,
	batch_size: usize,
}

impl OnchainValidator {
	pub fn new(
		rpc_url: &str,
		operator: Option<Address>,
		check_order_status: bool,
	) -> Result<Self, ValidatorError> {
		let url = rpc_url
			.parse()
			.map_err(|e| ValidatorError::InvalidConfig(format!("Invalid RPC URL: {}", e)))?;

		let provider = ProviderBuilder::new().connect_http(url).erased();

		Ok(Self {
			provider,
			operator,
			check_order_status,
			multicall_address: MULTICALL3_ADDRESS,
			batch_size: DEFAULT_BATCH_SIZE,
		})
	}

	pub fn with_multicall(mut self, address: Address, batch_size: usize) -> Self {
		self.multicall_address = address;
		self.batch_size = batch_size.max(1);
		self
	}

	fn item_reads(
		&self,
		offerer: Address,
		operator: Address,
		item: &OrderItem,
	) -> Vec<(IMulticall3::Call3, Expect)> {
		let amount = item.remaining();
		let token = item.token;

		match item.item_type {
			ItemType::Native => vec![read(
				self.multicall_address,
				IMulticall3::getEthBalanceCall { addr: offerer },
				Expect::AtLeast(amount),
			)],
			ItemType::Erc20 => vec![
				read(
					token,
					IERC20::balanceOfCall { owner: offerer },
					Expect::AtLeast(amount),
				),
				read(
					token,
					IERC20::allowanceCall {
						owner: offerer,
						spender: operator,
					},
					Expect::AtLeast(amount),
				),
			],
			ItemType::Erc721 => vec![
				read(
					token,
					IERC721::ownerOfCall {
						tokenId: item.identifier_or_criteria,
					},
					Expect::Owner(offerer),
				),
				read(
					token,
					IERC721::isApprovedForAllCall {
						owner: offerer,
						operator,
					},
					Expect::True,
				),
			],
			ItemType::Erc1155 => vec![
				read(
					token,
					IERC1155::balanceOfCall {
						account: offerer,
						id: item.identifier_or_criteria,
					},
					Expect::AtLeast(amount),
				),
				read(
					token,
					IERC1155::isApprovedForAllCall {
						account: offerer,
						operator,
					},
					Expect::True,
				),
			],
			// The concrete token is chosen at fill time; only the approval is knowable.
			ItemType::Erc721WithCriteria | ItemType::Erc1155WithCriteria => vec![read(
				token,
				IERC721::isApprovedForAllCall {
					owner: offerer,
					operator,
				},
				Expect::True,
			)],
		}
	}

	/// Settles what can be decided locally and lists the reads the rest
	/// needs. Orders outside their time window get no reads.
	fn plan(
		&self,
		chain_id: u64,
		orders: &[Order],
		now: u64,
	) -> Result<(Vec<bool>, Vec<Check>), ValidatorError> {
		let mut verdicts = Vec::with_capacity(orders.len());
		let mut checks = Vec::new();

		for (index, order) in orders.iter().enumerate() {
			if order.chain_id != chain_id {
				return Err(ValidatorError::MixedChains(vec![chain_id, order.chain_id]));
			}
			if order.is_expired(now) || order.start_time > now {
				verdicts.push(false);
				continue;
			}
			verdicts.push(true);

			let mut reads = Vec::new();
			if self.check_order_status {
				reads.push(read(
					order.exchange_address,
					IExchange::getOrderStatusCall {
						orderHash: order.hash,
					},
					Expect::OpenOrder,
				));
			}
			let operator = self.operator.unwrap_or(order.exchange_address);
			for item in &order.offer {
				reads.extend(self.item_reads(order.offerer, operator, item));
			}

			checks.extend(reads.into_iter().map(|(call, expect)| Check {
				order: index,
				call,
				expect,
			}));
		}

		Ok((verdicts, checks))
	}
}

/// Folds one batch of results into the verdicts.
fn apply_results(
	verdicts: &mut [bool],
	orders: &[Order],
	batch: &[Check],
	results: &[IMulticall3::Call3Result],
) -> Result<(), ValidatorError> {
	if results.len() != batch.len() {
		return Err(ValidatorError::Rpc(format!(
			"aggregate3 returned {} results for {} calls",
			results.len(),
			batch.len()
		)));
	}

	for (check, result) in batch.iter().zip(results) {
		if verdicts[check.order] && !check.expect.holds(result) {
			debug!(
				order_hash = %orders[check.order].hash,
				target = %check.call.target,
				expect = ?check.expect,
				"Order not fillable"
			);
			verdicts[check.order] = false;
		}
	}
	Ok(())
}

/// Configuration schema for the on-chain validator.
pub struct OnchainValidatorSchema;

impl ConfigSchema for OnchainValidatorSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![Field::new("rpc_url", FieldType::Url)],
			vec![
				Field::new("operator", FieldType::Address),
				Field::new("check_order_status", FieldType::Boolean),
				Field::new("multicall_address", FieldType::Address),
				Field::new(
					"multicall_batch_size",
					FieldType::Integer {
						min: Some(1),
						max: None,
					},
				),
			],
		);

		schema.validate(config)
	}
}

#[async_trait]
impl StrictValidatorInterface for OnchainValidator {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(OnchainValidatorSchema)
	}

	async fn validate_orders(
		&self,
		chain_id: u64,
		orders: &[Order],
	) -> Result<Vec<bool>, ValidatorError> {
		let (mut verdicts, checks) = self.plan(chain_id, orders, now_secs())?;
		let multicall = IMulticall3::new(self.multicall_address, &self.provider);

		for batch in checks.chunks(self.batch_size) {
			let calls: Vec<_> = batch.iter().map(|check| check.call.clone()).collect();
			let results = multicall
				.aggregate3(calls)
				.call()
				.await
				.map_err(|e| rpc_error("aggregate3", e))?;
			apply_results(&mut verdicts, orders, batch, &results)?;
		}

		debug!(
			orders = orders.len(),
			reads = checks.len(),
			batches = checks.len().div_ceil(self.batch_size),
			"Validated orders on-chain"
		);
		Ok(verdicts)
	}
}

/// Builds an [`OnchainValidator`] from its `[validator.config]` table.
pub fn create_onchain_validator(
	config: &toml::Value,
) -> Result<Box<dyn StrictValidatorInterface>, ValidatorError> {
	OnchainValidatorSchema
		.validate(config)
		.map_err(|e| ValidatorError::InvalidConfig(e.to_string()))?;

	let rpc_url = config
		.get("rpc_url")
		.and_then(|v| v.as_str())
		.ok_or_else(|| ValidatorError::InvalidConfig("rpc_url is required".to_string()))?;

	let operator = config
		.get("operator")
		.and_then(|v| v.as_str())
		.map(|s| s.parse::<Address>())
		.transpose()
		.map_err(|e| ValidatorError::InvalidConfig(format!("Invalid operator: {}", e)))?;

	let check_order_status = config
		.get("check_order_status")
		.and_then(|v| v.as_bool())
		.unwrap_or(true);

	let multicall_address = config
		.get("multicall_address")
		.and_then(|v| v.as_str())
		.map(|s| s.parse::<Address>())
		.transpose()
		.map_err(|e| ValidatorError::InvalidConfig(format!("Invalid multicall_address: {}", e)))?
		.unwrap_or(MULTICALL3_ADDRESS);

	let batch_size = config
		.get("multicall_batch_size")
		.and_then(|v| v.as_integer())
		.map(|n| n as usize)
		.unwrap_or(DEFAULT_BATCH_SIZE);

	Ok(Box::new(
		OnchainValidator::new(rpc_url, operator, check_order_status)?
			.with_multicall(multicall_address, batch_size),
	))
}
