//! In-memory stand-ins for every service seam, for workflow tests.

use crate::reconcile::Reconciler;
use crate::workflow::Services;
use crate::EventBus;
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use market_account::{AccountError, AccountInterface, AccountService};
use market_delivery::{DeliveryError, DeliveryInterface, DeliveryService};
use market_index::{IndexError, IndexInterface};
use market_plan::{
	AggregatorInterface, ApprovalCheckerInterface, PlanCompiler, PlanError, SwapPlan,
};
use market_pricing::PriceBreakdownEngine;
use market_types::contracts::IERC721;
use market_types::{
	Action, Address, Approval, ApprovalKind, Asset, BatchTransferRequest, Bytes, ConfigSchema,
	ContractType, Currency, MintRequest, OfferType, Order, OrderCategory, OrderFill, OrderItem,
	ItemType, OrderTerms, RawLog, RawTransaction, Schema, SignedOrder, SwapRequest,
	TransactionReceipt, ValidationError, WhitelistProof, B256, U256,
};
use market_validator::{OrderValidator, SelectionStore, StrictValidatorInterface, ValidatorError};
use std::sync::{Arc, Mutex};

pub struct NoSchema;

impl ConfigSchema for NoSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		Schema::new(vec![], vec![]).validate(config)
	}
}

pub const CHAIN: u64 = 1;

pub fn seller() -> Address {
	Address::repeat_byte(0x0A)
}

pub fn buyer() -> Address {
	Address::repeat_byte(0x0B)
}

pub fn nft() -> Address {
	Address::repeat_byte(0xAA)
}

pub fn exchange() -> Address {
	Address::repeat_byte(0xEE)
}

pub fn weth() -> Currency {
	Currency::new(CHAIN, Address::repeat_byte(0x0E), 18, "WETH")
}

pub fn eth() -> Currency {
	Currency::native(CHAIN, "ETH")
}

/// A single-token listing of token `id` priced in ETH.
pub fn listing(id: u8, price: &str) -> Order {
	Order {
		hash: B256::repeat_byte(id),
		chain_id: CHAIN,
		exchange_address: exchange(),
		offerer: seller(),
		category: OrderCategory::Listing,
		offer_type: OfferType::Single,
		per_unit_price: price.to_string(),
		currency: eth(),
		start_time: 0,
		end_time: 0,
		is_cancelled: false,
		is_fillable: true,
		start_amount: U256::from(1),
		available_amount: None,
		offer: vec![],
		consideration: vec![],
		assets: vec![Asset::new(CHAIN, nft(), U256::from(id), ContractType::Erc721)],
	}
}

/// A WETH offer from `offerer` for token `id`.
pub fn offer(id: u8, offerer: Address, price: &str, end_time: u64) -> Order {
	let mut order = listing(id, price);
	order.category = OrderCategory::Offer;
	order.offerer = offerer;
	order.currency = weth();
	order.end_time = end_time;
	order.offer = vec![OrderItem {
		item_type: ItemType::Erc20,
		token: weth().address,
		identifier_or_criteria: U256::ZERO,
		start_amount: U256::from(1),
		available_amount: None,
		recipient: None,
	}];
	order
}

pub fn tx(to: Address) -> RawTransaction {
	RawTransaction {
		chain_id: CHAIN,
		to,
		data: Bytes::new(),
		value: U256::ZERO,
	}
}

pub fn approval(token: u8) -> Action {
	Action::Approve(Approval {
		token: Address::repeat_byte(token),
		operator: exchange(),
		kind: ApprovalKind::ForAll,
		transaction: tx(Address::repeat_byte(token)),
	})
}

pub fn erc721_transfer(to: Address, token_id: u8) -> RawLog {
	RawLog {
		address: nft(),
		topics: vec![
			IERC721::Transfer::SIGNATURE_HASH,
			seller().into_word(),
			to.into_word(),
			B256::from(U256::from(token_id)),
		],
		data: Bytes::new(),
	}
}

pub struct StaticAccount(pub Address);

#[async_trait]
impl AccountInterface for StaticAccount {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(NoSchema)
	}

	async fn address(&self) -> Result<Address, AccountError> {
		Ok(self.0)
	}

	async fn sign_hash(&self, hash: &B256) -> Result<Vec<u8>, AccountError> {
		let mut signature = hash.to_vec();
		signature.extend_from_slice(hash.as_slice());
		signature.push(27);
		Ok(signature)
	}
}

/// What the scripted wallet has been asked to do.
#[derive(Default)]
pub struct WalletLog {
	pub submitted: Vec<RawTransaction>,
	/// The next submission to this address is rejected.
	pub reject_to: Option<Address>,
	/// The next transaction to this address is broadcast but its
	/// confirmation times out.
	pub timeout_to: Option<Address>,
}

pub struct ScriptedWallet {
	pub chain_id: u64,
	pub log: Arc<Mutex<WalletLog>>,
}

#[async_trait]
impl DeliveryInterface for ScriptedWallet {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(NoSchema)
	}

	async fn chain_id(&self) -> Result<u64, DeliveryError> {
		Ok(self.chain_id)
	}

	async fn submit(&self, tx: RawTransaction) -> Result<B256, DeliveryError> {
		let mut log = self.log.lock().unwrap();
		if log.reject_to == Some(tx.to) {
			log.reject_to = None;
			return Err(DeliveryError::Rejected("user rejected the request".to_string()));
		}
		log.submitted.push(tx);
		Ok(B256::from(U256::from(log.submitted.len())))
	}

	async fn wait_for_confirmation(
		&self,
		hash: &B256,
		_confirmations: u64,
	) -> Result<TransactionReceipt, DeliveryError> {
		let mut log = self.log.lock().unwrap();
		// Hashes are 1-based positions in `submitted`.
		let position: usize = U256::from_be_bytes(hash.0).to();
		let to = log.submitted[position - 1].to;
		if log.timeout_to == Some(to) {
			log.timeout_to = None;
			return Err(DeliveryError::Timeout(format!(
				"no receipt for {} after 120s",
				hash
			)));
		}
		Ok(TransactionReceipt {
			hash: *hash,
			block_number: 100,
			success: true,
			logs: vec![],
		})
	}
}

/// What the scripted index has been asked to do.
#[derive(Default)]
pub struct IndexLog {
	pub synced_orders: Vec<B256>,
	pub synced_transactions: Vec<B256>,
	pub posted: Vec<SignedOrder>,
}

pub struct ScriptedIndex {
	pub transfer_logs: Vec<RawLog>,
	pub sync_fails: bool,
	pub eligible: bool,
	pub log: Arc<Mutex<IndexLog>>,
}

#[async_trait]
impl IndexInterface for ScriptedIndex {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(NoSchema)
	}

	async fn sync_order(
		&self,
		_chain_id: u64,
		_exchange_address: &Address,
		hash: &B256,
	) -> Result<(), IndexError> {
		self.log.lock().unwrap().synced_orders.push(*hash);
		Ok(())
	}

	async fn sync_transaction(
		&self,
		_chain_id: u64,
		tx_hash: &B256,
	) -> Result<Vec<RawLog>, IndexError> {
		if self.sync_fails {
			return Err(IndexError::Status {
				status: 503,
				body: "unavailable".to_string(),
			});
		}
		self.log.lock().unwrap().synced_transactions.push(*tx_hash);
		Ok(self.transfer_logs.clone())
	}

	async fn whitelist_proof(
		&self,
		_chain_id: u64,
		_contract_address: &Address,
		_account: &Address,
	) -> Result<WhitelistProof, IndexError> {
		Ok(WhitelistProof {
			eligible: self.eligible,
			proof: if self.eligible {
				vec![B256::repeat_byte(0x77)]
			} else {
				vec![]
			},
		})
	}

	async fn post_orders(&self, orders: Vec<SignedOrder>) -> Result<Vec<Order>, IndexError> {
		let created = (0..orders.len())
			.map(|i| listing(0x50 + i as u8, "1"))
			.collect();
		self.log.lock().unwrap().posted.extend(orders);
		Ok(created)
	}
}

/// Reports the listed order hashes as unfillable.
pub struct FixedValidator {
	pub invalid: Vec<B256>,
	pub calls: Arc<Mutex<usize>>,
}

#[async_trait]
impl StrictValidatorInterface for FixedValidator {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(NoSchema)
	}

	async fn validate_orders(
		&self,
		_chain_id: u64,
		orders: &[Order],
	) -> Result<Vec<bool>, ValidatorError> {
		*self.calls.lock().unwrap() += 1;
		Ok(orders
			.iter()
			.map(|o| !self.invalid.contains(&o.hash))
			.collect())
	}
}

/// Answers every intent with the same action list.
pub struct FixedAggregator {
	pub actions: Vec<Action>,
	pub calls: Arc<Mutex<usize>>,
}

impl FixedAggregator {
	fn answer(&self) -> Result<Vec<Action>, PlanError> {
		*self.calls.lock().unwrap() += 1;
		Ok(self.actions.clone())
	}
}

#[async_trait]
impl AggregatorInterface for FixedAggregator {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(NoSchema)
	}

	async fn fulfill_orders(
		&self,
		_chain_id: u64,
		_fills: &[OrderFill],
		_account: &Address,
		_is_fulfill_offer: bool,
	) -> Result<Vec<Action>, PlanError> {
		self.answer()
	}

	async fn create_orders(
		&self,
		_terms: &[OrderTerms],
		_account: &Address,
	) -> Result<Vec<Action>, PlanError> {
		self.answer()
	}

	async fn cancel_orders(
		&self,
		_chain_id: u64,
		_orders: &[Order],
		_account: &Address,
	) -> Result<Vec<Action>, PlanError> {
		self.answer()
	}

	async fn mint(
		&self,
		_request: &MintRequest,
		_account: &Address,
		_proof: Option<&WhitelistProof>,
	) -> Result<Vec<Action>, PlanError> {
		self.answer()
	}

	async fn batch_transfer(
		&self,
		_request: &BatchTransferRequest,
		_account: &Address,
	) -> Result<Vec<Action>, PlanError> {
		self.answer()
	}

	async fn swap(&self, _request: &SwapRequest, _account: &Address) -> Result<SwapPlan, PlanError> {
		Err(PlanError::Aggregator("no route".to_string()))
	}
}

/// Reports approvals of the listed tokens as already granted.
pub struct GrantedTokens(pub Vec<Address>);

#[async_trait]
impl ApprovalCheckerInterface for GrantedTokens {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(NoSchema)
	}

	async fn is_granted(&self, _owner: &Address, approval: &Approval) -> Result<bool, PlanError> {
		Ok(self.0.contains(&approval.token))
	}
}

/// A full set of services around scripted seams, plus handles to inspect them.
pub struct Harness {
	pub services: Services,
	pub wallet: Arc<Mutex<WalletLog>>,
	pub index: Arc<Mutex<IndexLog>>,
	pub validator_calls: Arc<Mutex<usize>>,
	pub aggregator_calls: Arc<Mutex<usize>>,
}

pub struct HarnessBuilder {
	pub viewer: Address,
	pub wallet_chain: u64,
	pub actions: Vec<Action>,
	pub invalid: Vec<B256>,
	pub transfer_logs: Vec<RawLog>,
	pub sync_fails: bool,
	pub eligible: bool,
}

impl HarnessBuilder {
	pub fn new(viewer: Address) -> Self {
		Self {
			viewer,
			wallet_chain: CHAIN,
			actions: vec![Action::Exchange(tx(exchange()))],
			invalid: vec![],
			transfer_logs: vec![],
			sync_fails: false,
			eligible: true,
		}
	}

	pub fn build(self) -> Harness {
		let wallet = Arc::new(Mutex::new(WalletLog::default()));
		let index_log = Arc::new(Mutex::new(IndexLog::default()));
		let validator_calls = Arc::new(Mutex::new(0));
		let aggregator_calls = Arc::new(Mutex::new(0));

		let index: Arc<dyn IndexInterface> = Arc::new(ScriptedIndex {
			transfer_logs: self.transfer_logs,
			sync_fails: self.sync_fails,
			eligible: self.eligible,
			log: index_log.clone(),
		});

		let services = Services {
			account: Arc::new(AccountService::new(Box::new(StaticAccount(self.viewer)))),
			delivery: Arc::new(DeliveryService::new(
				Box::new(ScriptedWallet {
					chain_id: self.wallet_chain,
					log: wallet.clone(),
				}),
				1,
			)),
			index: index.clone(),
			validator: Arc::new(OrderValidator::new(
				Box::new(FixedValidator {
					invalid: self.invalid,
					calls: validator_calls.clone(),
				}),
				index.clone(),
			)),
			pricing: Arc::new(PriceBreakdownEngine::default()),
			compiler: Arc::new(PlanCompiler::new(Box::new(FixedAggregator {
				actions: self.actions,
				calls: aggregator_calls.clone(),
			}))),
			reconciler: Arc::new(Reconciler::new(index)),
			selection: Arc::new(SelectionStore::new()),
			event_bus: EventBus::new(64),
		};

		Harness {
			services,
			wallet,
			index: index_log,
			validator_calls,
			aggregator_calls,
		}
	}
}
