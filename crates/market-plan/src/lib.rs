//! Action plan compilation for the marketplace.
//!
//! Turns a user [`Intent`] into an [`ActionPlan`]: the approvals the account
//! still needs followed by one terminal action. Building the concrete
//! transactions is delegated to the aggregator; this crate enforces the
//! preconditions that must hold before the aggregator is asked, normalises
//! the approvals it returns and drops those already granted on-chain.

use async_trait::async_trait;
use market_types::{
	Action, ActionPlan, Address, Approval, BatchTransferRequest, ConfigSchema, Intent, ItemType,
	MintRequest, OfferType, Order, OrderCategory, OrderFill, OrderTerms, PlanShapeError, SwapQuote,
	SwapRequest, WhitelistProof, B256,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod implementations {
	pub mod http;
	pub mod onchain;
}

/// Errors that can occur while compiling a plan.
#[derive(Debug, Error)]
pub enum PlanError {
	#[error("No account connected")]
	NoAccount,
	#[error("Nothing to compile: {0}")]
	NoTerms(String),
	#[error("Unsupported token type: {0}")]
	UnsupportedTokenType(String),
	#[error("Wallet is on chain {active} but the intent requires chain {required}")]
	ChainMismatch { required: u64, active: u64 },
	#[error("Intent spans multiple chains: {0:?}")]
	MixedChains(Vec<u64>),
	#[error("Order {0} is not owned by the connected account")]
	NotOrderOwner(B256),
	#[error("Collection offer {0} needs a token to fill it with")]
	MissingCriteriaToken(B256),
	#[error("Aggregator error: {0}")]
	Aggregator(String),
	#[error("Malformed plan: {0}")]
	Shape(#[from] PlanShapeError),
	#[error("Invalid configuration: {0}")]
	InvalidConfig(String),
}

impl PlanError {
	/// Whether the user can fix this by changing their input or wallet,
	/// as opposed to the plan itself failing to build.
	pub fn is_precondition(&self) -> bool {
		matches!(
			self,
			PlanError::NoAccount
				| PlanError::NoTerms(_)
				| PlanError::ChainMismatch { .. }
				| PlanError::MixedChains(_)
				| PlanError::NotOrderOwner(_)
				| PlanError::MissingCriteriaToken(_)
		)
	}
}

/// A swap route together with the actions that execute it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapPlan {
	pub quote: SwapQuote,
	pub actions: Vec<Action>,
}

/// Trait defining the interface for the protocol aggregator.
///
/// Every method returns a flat action list; the compiler checks its layout.
#[async_trait]
pub trait AggregatorInterface: Send + Sync {
	/// Returns the configuration schema for this aggregator implementation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Fills listings, or with `is_fulfill_offer` sells into offers.
	async fn fulfill_orders(
		&self,
		chain_id: u64,
		fills: &[OrderFill],
		account: &Address,
		is_fulfill_offer: bool,
	) -> Result<Vec<Action>, PlanError>;

	async fn create_orders(
		&self,
		terms: &[OrderTerms],
		account: &Address,
	) -> Result<Vec<Action>, PlanError>;

	async fn cancel_orders(
		&self,
		chain_id: u64,
		orders: &[Order],
		account: &Address,
	) -> Result<Vec<Action>, PlanError>;

	async fn mint(
		&self,
		request: &MintRequest,
		account: &Address,
		proof: Option<&WhitelistProof>,
	) -> Result<Vec<Action>, PlanError>;

	async fn batch_transfer(
		&self,
		request: &BatchTransferRequest,
		account: &Address,
	) -> Result<Vec<Action>, PlanError>;

	/// Quotes an exact-input or exact-output trade.
	async fn swap(&self, request: &SwapRequest, account: &Address) -> Result<SwapPlan, PlanError>;
}

/// Reads whether an approval is already in place.
#[async_trait]
pub trait ApprovalCheckerInterface: Send + Sync {
	/// Returns the configuration schema for this checker implementation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	async fn is_granted(
		&self,
		owner: &Address,
		approval: &Approval,
	) -> Result<bool, PlanError>;
}

/// Wallet state a plan is compiled against.
#[derive(Debug, Clone, Default)]
pub struct CompileContext {
	pub account: Option<Address>,
	pub active_chain_id: u64,
	/// Eligibility proof for gated mints, fetched beforehand.
	pub whitelist_proof: Option<WhitelistProof>,
}

impl CompileContext {
	pub fn new(account: Option<Address>, active_chain_id: u64) -> Self {
		Self {
			account,
			active_chain_id,
			whitelist_proof: None,
		}
	}

	pub fn with_whitelist_proof(mut self, proof: WhitelistProof) -> Self {
		self.whitelist_proof = Some(proof);
		self
	}
}

/// Compiles intents into action plans through the aggregator.
pub struct PlanCompiler {
	aggregator: Box<dyn AggregatorInterface>,
	approvals: Option<Box<dyn ApprovalCheckerInterface>>,
}

impl PlanCompiler {
	pub fn new(aggregator: Box<dyn AggregatorInterface>) -> Self {
		Self {
			aggregator,
			approvals: None,
		}
	}

	/// Re-checks every approval on-chain and drops those already granted.
	pub fn with_approval_checker(mut self, checker: Box<dyn ApprovalCheckerInterface>) -> Self {
		self.approvals = Some(checker);
		self
	}

	pub async fn compile(
		&self,
		intent: &Intent,
		ctx: &CompileContext,
	) -> Result<ActionPlan, PlanError> {
		let account = ctx.account.ok_or(PlanError::NoAccount)?;
		check_terms(intent)?;

		let required = required_chain(intent)?;
		if required != ctx.active_chain_id {
			return Err(PlanError::ChainMismatch {
				required,
				active: ctx.active_chain_id,
			});
		}

		check_intent(intent, &account)?;

		let (actions, quote) = match intent {
			Intent::FulfillListing { fills } => (
				self.aggregator
					.fulfill_orders(required, fills, &account, false)
					.await?,
				None,
			),
			Intent::FulfillOffer { fills, .. } => (
				self.aggregator
					.fulfill_orders(required, fills, &account, true)
					.await?,
				None,
			),
			Intent::CreateOrder { terms } => {
				(self.aggregator.create_orders(terms, &account).await?, None)
			}
			Intent::CancelOrders { orders } => (
				self.aggregator
					.cancel_orders(required, orders, &account)
					.await?,
				None,
			),
			Intent::Mint(request) => (
				self.aggregator
					.mint(request, &account, ctx.whitelist_proof.as_ref())
					.await?,
				None,
			),
			Intent::BatchTransfer(request) => (
				self.aggregator.batch_transfer(request, &account).await?,
				None,
			),
			Intent::Swap(request) => {
				let swap = self.aggregator.swap(request, &account).await?;
				(swap.actions, Some(swap.quote))
			}
		};

		let mut plan = ActionPlan::from_actions(dedupe_approvals(actions))?;
		if let Some(quote) = quote {
			plan = plan.with_quote(quote);
		}

		if let Some(checker) = &self.approvals {
			drop_granted(checker.as_ref(), &account, &mut plan).await;
		}

		info!(
			intent = intent.kind(),
			chain_id = required,
			approvals = plan.total_approvals(),
			terminal = %plan.terminal().kind(),
			"Compiled action plan"
		);

		Ok(plan)
	}
}

fn check_terms(intent: &Intent) -> Result<(), PlanError> {
	let missing = match intent {
		Intent::FulfillListing { fills } => fills.is_empty().then_some("no orders to fill"),
		Intent::FulfillOffer { fills, .. } => fills.is_empty().then_some("no offers to accept"),
		Intent::CreateOrder { terms } => terms.is_empty().then_some("no order terms"),
		Intent::CancelOrders { orders } => orders.is_empty().then_some("no orders to cancel"),
		Intent::Mint(request) => (request.quantity == 0).then_some("mint quantity is zero"),
		Intent::BatchTransfer(request) => request.items.is_empty().then_some("no items to transfer"),
		Intent::Swap(request) => request.amount.is_zero().then_some("swap amount is zero"),
	};

	if let Some(reason) = missing {
		return Err(PlanError::NoTerms(reason.to_string()));
	}

	let zero_units = match intent {
		Intent::FulfillListing { fills } | Intent::FulfillOffer { fills, .. } => {
			fills.iter().any(|f| f.units.is_zero())
		}
		Intent::CreateOrder { terms } => terms.iter().any(|t| t.quantity.is_zero()),
		Intent::BatchTransfer(request) => request.items.iter().any(|i| i.amount.is_zero()),
		_ => false,
	};

	if zero_units {
		return Err(PlanError::NoTerms("zero quantity".to_string()));
	}

	Ok(())
}

fn required_chain(intent: &Intent) -> Result<u64, PlanError> {
	let chains = intent.chain_ids();
	match chains.as_slice() {
		[] => Err(PlanError::NoTerms("intent names no chain".to_string())),
		[chain] => Ok(*chain),
		_ => Err(PlanError::MixedChains(chains)),
	}
}

fn check_intent(intent: &Intent, account: &Address) -> Result<(), PlanError> {
	match intent {
		Intent::FulfillOffer { fills, .. } => {
			for fill in fills {
				let pays_in_erc20 = fill
					.order
					.offer
					.first()
					.map(|item| item.item_type == ItemType::Erc20)
					.unwrap_or(true);
				if !pays_in_erc20 {
					return Err(PlanError::UnsupportedTokenType(format!(
						"offer {} is not paid in an ERC-20 token",
						fill.order.hash
					)));
				}
				if fill.order.offer_type == OfferType::Collection && fill.criteria_token_id.is_none()
				{
					return Err(PlanError::MissingCriteriaToken(fill.order.hash));
				}
			}
		}
		Intent::CreateOrder { terms } => {
			for term in terms {
				if term.category == OrderCategory::Offer && term.currency.is_native() {
					return Err(PlanError::UnsupportedTokenType(format!(
						"offers cannot be priced in native {}",
						term.currency.symbol
					)));
				}
			}
		}
		Intent::CancelOrders { orders } => {
			if let Some(order) = orders.iter().find(|o| !o.is_offered_by(account)) {
				return Err(PlanError::NotOrderOwner(order.hash));
			}
		}
		Intent::Swap(request) => {
			if request.token_in.is_same(&request.token_out) {
				return Err(PlanError::UnsupportedTokenType(format!(
					"cannot swap {} into itself",
					request.token_in.symbol
				)));
			}
		}
		_ => {}
	}
	Ok(())
}

/// Keeps the first approval for each `(token, operator)` pair, preserving
/// the order in which tokens were first seen.
pub fn dedupe_approvals(actions: Vec<Action>) -> Vec<Action> {
	let mut seen: Vec<(Address, Address)> = Vec::new();
	actions
		.into_iter()
		.filter(|action| match action {
			Action::Approve(approval) => {
				let key = (approval.token, approval.operator);
				if seen.contains(&key) {
					debug!(token = %approval.token, "Dropping duplicate approval");
					false
				} else {
					seen.push(key);
					true
				}
			}
			_ => true,
		})
		.collect()
}

async fn drop_granted(
	checker: &dyn ApprovalCheckerInterface,
	owner: &Address,
	plan: &mut ActionPlan,
) {
	let mut granted = Vec::with_capacity(plan.total_approvals());
	for approval in plan.approvals() {
		match checker.is_granted(owner, approval).await {
			Ok(is_granted) => granted.push(is_granted),
			Err(e) => {
				// An unknown state keeps the approval in the plan.
				warn!(token = %approval.token, error = %e, "Failed to read approval state");
				granted.push(false);
			}
		}
	}

	let mut position = 0;
	plan.retain_approvals(|approval| {
		let keep = !granted[position];
		position += 1;
		if !keep {
			debug!(token = %approval.token, operator = %approval.operator, "Approval already granted");
		}
		keep
	});
}


#[cfg(test)]
mod tests {
	use super::mocks::*;
	use super::*;
	use market_types::{
		ActionKind, Asset, ContractType, Currency, OrderItem, TradeType, U256,
	};

	fn account() -> Address {
		Address::repeat_byte(0x0B)
	}

	fn order(hash: u8, chain_id: u64, offerer: Address) -> Order {
		Order {
			hash: B256::repeat_byte(hash),
			chain_id,
			exchange_address: Address::repeat_byte(0xEE),
			offerer,
			category: OrderCategory::Listing,
			offer_type: OfferType::Single,
			per_unit_price: "1".to_string(),
			currency: weth(),
			start_time: 0,
			end_time: 0,
			is_cancelled: false,
			is_fillable: true,
			start_amount: U256::from(1),
			available_amount: None,
			offer: vec![],
			consideration: vec![],
			assets: vec![],
		}
	}

	fn purchase(chain_id: u64) -> Intent {
		Intent::FulfillListing {
			fills: vec![OrderFill::new(
				order(1, chain_id, Address::repeat_byte(0x0A)),
				U256::from(1),
			)],
		}
	}

	fn ctx(chain_id: u64) -> CompileContext {
		CompileContext::new(Some(account()), chain_id)
	}

	#[tokio::test]
	async fn test_approvals_deduplicated_in_first_seen_order() {
		let (aggregator, _) = ScriptedAggregator::new(vec![
			approval(3),
			approval(1),
			approval(3),
			approval(2),
			approval(1),
			Action::Exchange(tx(1, 9)),
		]);
		let compiler = PlanCompiler::new(Box::new(aggregator));

		let plan = compiler.compile(&purchase(1), &ctx(1)).await.unwrap();
		let tokens: Vec<Address> = plan.approvals().iter().map(|a| a.token).collect();
		assert_eq!(
			tokens,
			vec![
				Address::repeat_byte(3),
				Address::repeat_byte(1),
				Address::repeat_byte(2)
			]
		);
		assert_eq!(plan.terminal().kind(), ActionKind::Exchange);
	}

	#[tokio::test]
	async fn test_no_approval_plan_has_one_action() {
		let (aggregator, _) = ScriptedAggregator::new(vec![Action::Exchange(tx(1, 9))]);
		let compiler = PlanCompiler::new(Box::new(aggregator));

		let plan = compiler.compile(&purchase(1), &ctx(1)).await.unwrap();
		assert_eq!(plan.len(), 1);
		assert_eq!(plan.total_approvals(), 0);
	}

	#[tokio::test]
	async fn test_chain_mismatch_rejected_before_aggregator() {
		let (aggregator, calls) = ScriptedAggregator::new(vec![Action::Exchange(tx(137, 9))]);
		let compiler = PlanCompiler::new(Box::new(aggregator));

		let result = compiler.compile(&purchase(137), &ctx(1)).await;
		assert!(matches!(
			result,
			Err(PlanError::ChainMismatch {
				required: 137,
				active: 1
			})
		));
		assert!(calls.lock().unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_preconditions() {
		let (aggregator, calls) = ScriptedAggregator::new(vec![Action::Exchange(tx(1, 9))]);
		let compiler = PlanCompiler::new(Box::new(aggregator));

		let no_account = CompileContext::new(None, 1);
		assert!(matches!(
			compiler.compile(&purchase(1), &no_account).await,
			Err(PlanError::NoAccount)
		));

		let empty = Intent::FulfillListing { fills: vec![] };
		let err = compiler.compile(&empty, &ctx(1)).await.unwrap_err();
		assert!(matches!(err, PlanError::NoTerms(_)));
		assert!(err.is_precondition());

		let mixed = Intent::CancelOrders {
			orders: vec![order(1, 1, account()), order(2, 10, account())],
		};
		assert!(matches!(
			compiler.compile(&mixed, &ctx(1)).await,
			Err(PlanError::MixedChains(_))
		));

		let foreign = Intent::CancelOrders {
			orders: vec![order(1, 1, account()), order(2, 1, Address::repeat_byte(0x0A))],
		};
		assert!(matches!(
			compiler.compile(&foreign, &ctx(1)).await,
			Err(PlanError::NotOrderOwner(hash)) if hash == B256::repeat_byte(2)
		));

		assert!(calls.lock().unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_offer_acceptance_checks() {
		let (aggregator, calls) = ScriptedAggregator::new(vec![approval(0xAA), Action::Exchange(tx(1, 9))]);
		let compiler = PlanCompiler::new(Box::new(aggregator));

		let mut offer = order(5, 1, Address::repeat_byte(0x0A));
		offer.category = OrderCategory::Offer;
		offer.offer_type = OfferType::Collection;
		offer.offer = vec![OrderItem {
			item_type: ItemType::Erc20,
			token: weth().address,
			identifier_or_criteria: U256::ZERO,
			start_amount: U256::from(10),
			available_amount: None,
			recipient: None,
		}];
		let asset = Asset::new(1, Address::repeat_byte(0xAA), U256::from(7), ContractType::Erc721);

		let mut fill = OrderFill::new(offer.clone(), U256::from(1));
		let intent = Intent::FulfillOffer {
			fills: vec![fill.clone()],
			assets: vec![asset.clone()],
		};
		assert!(matches!(
			compiler.compile(&intent, &ctx(1)).await,
			Err(PlanError::MissingCriteriaToken(_))
		));

		fill.criteria_token_id = Some(U256::from(7));
		let intent = Intent::FulfillOffer {
			fills: vec![fill],
			assets: vec![asset],
		};
		let plan = compiler.compile(&intent, &ctx(1)).await.unwrap();
		assert_eq!(plan.total_approvals(), 1);
		assert_eq!(calls.lock().unwrap().as_slice(), ["fulfill_offer"]);
	}

	#[tokio::test]
	async fn test_native_priced_offer_unsupported() {
		let (aggregator, _) = ScriptedAggregator::new(vec![Action::Create(
			market_types::OrderCreation {
				chain_id: 1,
				drafts: vec![],
			},
		)]);
		let compiler = PlanCompiler::new(Box::new(aggregator));

		let terms = OrderTerms {
			category: OrderCategory::Offer,
			offer_type: OfferType::Single,
			asset: Asset::new(1, Address::repeat_byte(0xAA), U256::from(1), ContractType::Erc721),
			currency: Currency::native(1, "ETH"),
			per_unit_price: "1".to_string(),
			quantity: U256::from(1),
			start_time: 0,
			end_time: 0,
		};
		let intent = Intent::CreateOrder {
			terms: vec![terms.clone()],
		};
		assert!(matches!(
			compiler.compile(&intent, &ctx(1)).await,
			Err(PlanError::UnsupportedTokenType(_))
		));

		let listing = OrderTerms {
			category: OrderCategory::Listing,
			..terms
		};
		let plan = compiler
			.compile(&Intent::CreateOrder { terms: vec![listing] }, &ctx(1))
			.await
			.unwrap();
		assert_eq!(plan.terminal().kind(), ActionKind::Create);
	}

	#[tokio::test]
	async fn test_granted_approvals_are_dropped() {
		let (aggregator, _) = ScriptedAggregator::new(vec![
			approval(1),
			approval(2),
			approval(3),
			Action::Exchange(tx(1, 9)),
		]);
		let compiler = PlanCompiler::new(Box::new(aggregator)).with_approval_checker(Box::new(
			GrantedTokens {
				tokens: vec![Address::repeat_byte(2)],
				fail: false,
			},
		));

		let plan = compiler.compile(&purchase(1), &ctx(1)).await.unwrap();
		let tokens: Vec<Address> = plan.approvals().iter().map(|a| a.token).collect();
		assert_eq!(tokens, vec![Address::repeat_byte(1), Address::repeat_byte(3)]);
	}

	#[tokio::test]
	async fn test_unreadable_approval_state_keeps_approval() {
		let (aggregator, _) = ScriptedAggregator::new(vec![approval(1), Action::Exchange(tx(1, 9))]);
		let compiler = PlanCompiler::new(Box::new(aggregator)).with_approval_checker(Box::new(
			GrantedTokens {
				tokens: vec![Address::repeat_byte(1)],
				fail: true,
			},
		));

		let plan = compiler.compile(&purchase(1), &ctx(1)).await.unwrap();
		assert_eq!(plan.total_approvals(), 1);
	}

	#[tokio::test]
	async fn test_swap_plan_carries_quote() {
		let (aggregator, _) = ScriptedAggregator::new(vec![approval(0x0E), Action::Swap(tx(1, 9))]);
		let compiler = PlanCompiler::new(Box::new(aggregator));

		let intent = Intent::Swap(SwapRequest {
			token_in: weth(),
			token_out: Currency::new(1, Address::repeat_byte(0x0C), 6, "USDC"),
			amount: U256::from(1000),
			trade_type: TradeType::ExactInput,
			slippage_bps: 50,
		});
		let plan = compiler.compile(&intent, &ctx(1)).await.unwrap();
		let quote = plan.quote().unwrap();
		assert_eq!(quote.amount_in.raw(), U256::from(1000));
		assert_eq!(quote.amount_out.raw(), U256::from(2000));
	}

	#[tokio::test]
	async fn test_malformed_aggregator_plan_is_rejected() {
		let (aggregator, _) = ScriptedAggregator::new(vec![approval(1)]);
		let compiler = PlanCompiler::new(Box::new(aggregator));

		let err = compiler.compile(&purchase(1), &ctx(1)).await.unwrap_err();
		assert!(matches!(err, PlanError::Shape(PlanShapeError::MissingTerminal)));
		assert!(!err.is_precondition());
	}

	#[tokio::test]
	async fn test_gated_mint_passes_proof() {
		let (aggregator, calls) = ScriptedAggregator::new(vec![Action::Mint(tx(1, 9))]);
		let compiler = PlanCompiler::new(Box::new(aggregator));

		let intent = Intent::Mint(MintRequest {
			chain_id: 1,
			contract_address: Address::repeat_byte(0xD0),
			quantity: 2,
			currency: None,
			unit_price: None,
			whitelist_gated: true,
		});
		let ctx = ctx(1).with_whitelist_proof(WhitelistProof {
			eligible: true,
			proof: vec![B256::repeat_byte(1)],
		});
		compiler.compile(&intent, &ctx).await.unwrap();
		assert_eq!(calls.lock().unwrap().as_slice(), ["mint_with_proof"]);
	}
}
