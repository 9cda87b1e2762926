//! One execution workflow: validate, price, compile, execute, reconcile.
//!
//! A [`Workflow`] owns its [`ExecutionState`] exclusively and runs every step
//! to completion before the next starts. Steps that fail leave the phase and
//! cursor where they were, so calling the same method again retries exactly
//! the step that failed.

use crate::event_bus::EventBus;
use crate::reconcile::Reconciler;
use crate::state::{ErrorInfo, ErrorKind, ExecutionState, Phase, StateError, Step, Transition};
use crate::topics::invalidation_topics;
use market_account::AccountService;
use market_delivery::{DeliveryError, DeliveryService};
use market_index::IndexInterface;
use market_plan::{CompileContext, PlanCompiler, PlanError};
use market_pricing::{LineItem, PriceBreakdown, PriceBreakdownEngine, PricingError};
use market_types::{
	truncate_hash, Action, ActionPlan, Address, Asset, Bytes, CurrencyAmount, Intent, Order,
	SignedOrder, TokenKey, TransactionReceipt, WorkflowEvent,
};
use market_validator::{OrderValidator, SelectionStore, ValidationResult, ValidationStatus};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors a workflow step can end with, one variant per error class.
#[derive(Debug, Error)]
pub enum WorkflowError {
	/// Wrong input or wallet state; nothing was built.
	#[error("{message}")]
	Precondition { message: String, retryable: bool },
	/// The plan could not be built.
	#[error("Failed to build plan: {message}")]
	Compilation { message: String, retryable: bool },
	/// The wallet or chain failed the current step.
	#[error("{message}")]
	Transaction { message: String, retryable: bool },
	#[error(transparent)]
	State(#[from] StateError),
}

impl WorkflowError {
	fn precondition(message: impl Into<String>) -> Self {
		WorkflowError::Precondition {
			message: message.into(),
			retryable: false,
		}
	}

	pub fn kind(&self) -> ErrorKind {
		match self {
			WorkflowError::Precondition { .. } | WorkflowError::State(_) => ErrorKind::Precondition,
			WorkflowError::Compilation { .. } => ErrorKind::Compilation,
			WorkflowError::Transaction { .. } => ErrorKind::Transaction,
		}
	}

	pub fn is_retryable(&self) -> bool {
		match self {
			WorkflowError::Precondition { retryable, .. }
			| WorkflowError::Compilation { retryable, .. }
			| WorkflowError::Transaction { retryable, .. } => *retryable,
			WorkflowError::State(_) => false,
		}
	}
}

impl From<PlanError> for WorkflowError {
	fn from(e: PlanError) -> Self {
		if e.is_precondition() {
			WorkflowError::Precondition {
				message: e.to_string(),
				retryable: false,
			}
		} else {
			WorkflowError::Compilation {
				retryable: matches!(e, PlanError::Aggregator(_)),
				message: e.to_string(),
			}
		}
	}
}

impl From<PricingError> for WorkflowError {
	fn from(e: PricingError) -> Self {
		WorkflowError::precondition(e.to_string())
	}
}

impl From<DeliveryError> for WorkflowError {
	fn from(e: DeliveryError) -> Self {
		// The wallet's message is surfaced verbatim.
		WorkflowError::Transaction {
			retryable: e.is_retryable(),
			message: e.to_string(),
		}
	}
}

/// What a successful terminal action produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Artifact {
	Receipt(TransactionReceipt),
	CreatedOrders(Vec<Order>),
}

/// How a workflow ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum Outcome {
	Success {
		#[serde(flatten)]
		artifact: Artifact,
		#[serde(rename = "affectedTokenIds")]
		affected_tokens: Vec<TokenKey>,
		/// Requested assets that the transfer logs show arriving.
		acquired: Vec<Asset>,
	},
	Failed {
		phase: Phase,
		#[serde(rename = "errorKind")]
		error_kind: ErrorKind,
		message: String,
	},
	/// Closed before completion. Broadcast transactions are not recalled.
	Cancelled,
}

/// Everything a workflow talks to. Cheap to clone.
#[derive(Clone)]
pub struct Services {
	pub account: Arc<AccountService>,
	pub delivery: Arc<DeliveryService>,
	pub index: Arc<dyn IndexInterface>,
	pub validator: Arc<OrderValidator>,
	pub pricing: Arc<PriceBreakdownEngine>,
	pub compiler: Arc<PlanCompiler>,
	pub reconciler: Arc<Reconciler>,
	pub selection: Arc<SelectionStore>,
	pub event_bus: EventBus,
}

/// A single user intent being carried out.
pub struct Workflow {
	id: String,
	intent: Intent,
	services: Services,
	state: ExecutionState,
	plan: Option<ActionPlan>,
	/// Chain the plan was compiled for.
	chain_id: u64,
	balances: Option<Vec<CurrencyAmount>>,
	outcome: Option<Outcome>,
}

impl Workflow {
	pub fn new(intent: Intent, services: Services) -> Self {
		Self {
			id: uuid::Uuid::new_v4().to_string(),
			intent,
			services,
			state: ExecutionState::new(),
			plan: None,
			chain_id: 0,
			balances: None,
			outcome: None,
		}
	}

	/// Picks up a compiled plan whose first `completed_approvals` approvals
	/// are already mined.
	pub fn resume(
		intent: Intent,
		services: Services,
		plan: ActionPlan,
		chain_id: u64,
		completed_approvals: usize,
	) -> Self {
		let mut workflow = Self::new(intent, services);
		workflow.state = ExecutionState::resume(completed_approvals, plan.total_approvals());
		workflow.plan = Some(plan);
		workflow.chain_id = chain_id;
		workflow
	}

	/// Wallet balances to check purchases against before compiling.
	pub fn with_balances(mut self, balances: Vec<CurrencyAmount>) -> Self {
		self.balances = Some(balances);
		self
	}

	pub fn id(&self) -> &str {
		&self.id
	}

	/// The intent, narrowed to the valid orders once validation has run.
	pub fn intent(&self) -> &Intent {
		&self.intent
	}

	pub fn state(&self) -> &ExecutionState {
		&self.state
	}

	pub fn plan(&self) -> Option<&ActionPlan> {
		self.plan.as_ref()
	}

	pub fn outcome(&self) -> Option<&Outcome> {
		self.outcome.as_ref()
	}

	/// Validates the intent's orders and drops those that cannot be taken.
	///
	/// With nothing left to do the workflow closes with a precondition
	/// outcome. Cancellations and intents without orders pass through.
	pub async fn validate(&mut self) -> Result<Vec<ValidationResult>, WorkflowError> {
		self.ensure_phase(Phase::Validate, "validate")?;

		match self.run_validation().await {
			Ok(results) => Ok(results),
			Err(e) => Err(self.fail(e)),
		}
	}

	async fn run_validation(&mut self) -> Result<Vec<ValidationResult>, WorkflowError> {
		let viewer = self.viewer().await?;

		let orders: Vec<Order> = self.intent.fill_orders().into_iter().cloned().collect();
		let results = if orders.is_empty() {
			Vec::new()
		} else {
			self.services
				.validator
				.validate(&orders, Some(&viewer), &self.services.selection)
				.await
				.map_err(|e| WorkflowError::Precondition {
					message: format!("Could not validate orders: {}", e),
					retryable: e.is_retryable(),
				})?
		};

		let valid_hashes: Vec<_> = results
			.iter()
			.filter(|r| r.status == ValidationStatus::Valid)
			.map(|r| r.order_hash)
			.collect();

		let valid = match &mut self.intent {
			Intent::FulfillListing { fills } | Intent::FulfillOffer { fills, .. } => {
				fills.retain(|f| valid_hashes.contains(&f.order.hash));
				fills.len()
			}
			Intent::CancelOrders { orders } => orders.len(),
			_ => 1,
		};
		let rejected = results.len().saturating_sub(valid_hashes.len());

		info!(
			workflow_id = %self.id,
			intent = self.intent.kind(),
			valid,
			rejected,
			"Validated intent"
		);
		self.services.event_bus.workflow(WorkflowEvent::Validated {
			workflow_id: self.id.clone(),
			valid,
			rejected,
		});

		self.state = self.state.apply(Transition::Validated { valid })?;

		if valid == 0 {
			let owned = results
				.iter()
				.any(|r| r.status == ValidationStatus::Owned);
			let message = if owned && results.iter().all(|r| r.status != ValidationStatus::Valid) {
				"Nothing to do: the remaining orders are your own"
			} else {
				"Nothing to do: none of the selected orders can be filled"
			};
			self.outcome = Some(Outcome::Failed {
				phase: Phase::Validate,
				error_kind: ErrorKind::Precondition,
				message: message.to_string(),
			});
		}

		Ok(results)
	}

	/// Fee split for what the intent trades, one breakdown per currency.
	pub fn breakdown(&self) -> Result<Vec<PriceBreakdown>, WorkflowError> {
		let items: Vec<LineItem> = match &self.intent {
			Intent::FulfillListing { fills } | Intent::FulfillOffer { fills, .. } => fills
				.iter()
				.map(LineItem::from_fill)
				.collect::<Result<_, _>>()?,
			Intent::CreateOrder { terms } => {
				let mut items = Vec::with_capacity(terms.len());
				for term in terms {
					let unit_price =
						CurrencyAmount::from_decimal(term.currency.clone(), &term.per_unit_price)
							.map_err(PricingError::from)?;
					let mut item = LineItem::new(unit_price, term.quantity);
					if let Some((rate, recipient)) =
						term.asset.creator_fee().map_err(PricingError::from)?
					{
						item = item.with_creator_fee(rate, recipient);
					}
					items.push(item);
				}
				items
			}
			_ => Vec::new(),
		};

		Ok(self.services.pricing.compute_breakdowns(&items)?)
	}

	/// Compiles the plan and moves to execution.
	///
	/// Everything that can be checked without a transaction is checked here:
	/// account, active chain, funds, and mint eligibility.
	pub async fn confirm(&mut self) -> Result<&ActionPlan, WorkflowError> {
		self.ensure_phase(Phase::Confirm, "confirm")?;

		if let Err(e) = self.compile().await {
			return Err(self.fail(e));
		}
		self.plan
			.as_ref()
			.ok_or_else(|| WorkflowError::precondition("No plan compiled"))
	}

	async fn compile(&mut self) -> Result<(), WorkflowError> {
		let account = self.viewer().await?;
		let active_chain_id = self
			.services
			.delivery
			.active_chain_id()
			.await
			.map_err(|e| WorkflowError::Precondition {
				message: format!("Could not read the wallet's chain: {}", e),
				retryable: e.is_retryable(),
			})?;

		self.check_funds()?;

		let mut ctx = CompileContext::new(Some(account), active_chain_id);
		if let Intent::Mint(request) = &self.intent {
			if request.whitelist_gated {
				let proof = self
					.services
					.index
					.whitelist_proof(request.chain_id, &request.contract_address, &account)
					.await
					.map_err(|e| WorkflowError::Precondition {
						message: format!("Could not fetch whitelist proof: {}", e),
						retryable: true,
					})?;
				if !proof.eligible {
					return Err(WorkflowError::precondition(
						"This wallet is not eligible for the drop",
					));
				}
				ctx = ctx.with_whitelist_proof(proof);
			}
		}

		let plan = self.services.compiler.compile(&self.intent, &ctx).await?;
		let total_approvals = plan.total_approvals();

		self.state = self
			.state
			.apply(Transition::PlanCompiled { total_approvals })?;
		self.services.event_bus.workflow(WorkflowEvent::PlanCompiled {
			workflow_id: self.id.clone(),
			total_approvals,
			terminal: plan.terminal().kind(),
		});

		self.chain_id = active_chain_id;
		self.plan = Some(plan);
		Ok(())
	}

	fn check_funds(&self) -> Result<(), WorkflowError> {
		let (Intent::FulfillListing { fills }, Some(balances)) = (&self.intent, &self.balances)
		else {
			return Ok(());
		};

		let pricing = &self.services.pricing;
		let required = pricing.summarize_required_funds(fills)?;
		let shortfalls = pricing.find_shortfalls(&required, balances)?;

		if let Some(shortfall) = shortfalls.first() {
			return Err(WorkflowError::precondition(format!(
				"Insufficient funds: need {} more",
				shortfall.missing
			)));
		}
		Ok(())
	}

	/// Submits the next action: the approval at the cursor, or the terminal
	/// action once every approval is mined. Returns the step it ran.
	pub async fn step(&mut self) -> Result<Step, WorkflowError> {
		let step = self
			.state
			.next_step()
			.ok_or_else(|| StateError::InvalidTransition {
				phase: self.state.phase(),
				transition: "step".to_string(),
			})?;

		let result = match step {
			Step::Approval(index) => self.submit_approval(index).await,
			Step::Terminal => self.submit_terminal().await,
		};

		match result {
			Ok(()) => Ok(step),
			Err(e) => Err(self.fail(e)),
		}
	}

	async fn submit_approval(&mut self, index: usize) -> Result<(), WorkflowError> {
		let approval = self
			.plan
			.as_ref()
			.and_then(|plan| plan.approvals().get(index))
			.cloned()
			.ok_or_else(|| WorkflowError::precondition(format!("No approval at {}", index)))?;

		debug!(
			workflow_id = %self.id,
			index,
			token = %approval.token,
			operator = %approval.operator,
			"Submitting approval"
		);

		let receipt = self.services.delivery.deliver(approval.transaction).await?;
		let tx_hash = receipt.hash;

		self.state = self
			.state
			.apply(Transition::ApprovalConfirmed { index, receipt })?;
		self.services
			.event_bus
			.workflow(WorkflowEvent::ApprovalConfirmed {
				workflow_id: self.id.clone(),
				index,
				tx_hash,
			});
		Ok(())
	}

	async fn submit_terminal(&mut self) -> Result<(), WorkflowError> {
		let terminal = self
			.plan
			.as_ref()
			.map(|plan| plan.terminal().clone())
			.ok_or_else(|| WorkflowError::precondition("No plan compiled"))?;

		let (artifact, tx_hash) = match terminal {
			Action::Create(creation) => {
				let mut signed = Vec::with_capacity(creation.drafts.len());
				for draft in creation.drafts {
					let signature = self
						.services
						.account
						.sign_digest(&draft.digest)
						.await
						.map_err(|e| WorkflowError::Transaction {
							message: e.to_string(),
							retryable: true,
						})?;
					signed.push(SignedOrder {
						payload: draft.payload,
						signature: Bytes::from(signature),
					});
				}

				let created = self
					.services
					.index
					.post_orders(signed)
					.await
					.map_err(|e| WorkflowError::Transaction {
						message: format!("Failed to register orders: {}", e),
						retryable: true,
					})?;
				(Artifact::CreatedOrders(created), None)
			}
			action => {
				let tx = action.transaction().cloned().ok_or_else(|| {
					WorkflowError::Compilation {
						message: format!("{} action carries no transaction", action.kind()),
						retryable: false,
					}
				})?;
				let receipt = self.services.delivery.deliver(tx).await?;
				let hash = receipt.hash;
				(Artifact::Receipt(receipt), Some(hash))
			}
		};

		let receipt = match &artifact {
			Artifact::Receipt(receipt) => Some(receipt.clone()),
			Artifact::CreatedOrders(_) => None,
		};
		self.state = self
			.state
			.apply(Transition::TerminalConfirmed { receipt })?;
		self.services
			.event_bus
			.workflow(WorkflowEvent::TerminalConfirmed {
				workflow_id: self.id.clone(),
				tx_hash,
			});

		self.finish(artifact, tx_hash).await;
		Ok(())
	}

	/// Reconciles a successful terminal action and records the outcome.
	/// Nothing here can fail the workflow.
	async fn finish(&mut self, artifact: Artifact, tx_hash: Option<market_types::B256>) {
		let reconciliation = match tx_hash {
			Some(hash) => {
				self.services
					.reconciler
					.reconcile(self.chain_id, &hash)
					.await
			}
			None => Default::default(),
		};

		let acquired = match &self.intent {
			Intent::FulfillListing { fills } => {
				let requested: Vec<Asset> = fills
					.iter()
					.flat_map(|f| f.order.assets.iter().cloned())
					.collect();
				let acquired = reconciliation.acquired(&requested);
				if tx_hash.is_some() && acquired.len() < requested.len() {
					warn!(
						workflow_id = %self.id,
						requested = requested.len(),
						acquired = acquired.len(),
						"Batch purchase partially filled"
					);
				}
				acquired
			}
			_ => Vec::new(),
		};

		match &self.intent {
			Intent::FulfillListing { fills } | Intent::FulfillOffer { fills, .. } => {
				let hashes: Vec<_> = fills.iter().map(|f| f.order.hash).collect();
				self.services
					.selection
					.remove_by_order_hashes(&hashes)
					.await;
			}
			Intent::CancelOrders { orders } => {
				let synced = self.services.reconciler.resync_orders(orders).await;
				debug!(workflow_id = %self.id, synced, "Re-synced cancelled orders");
			}
			_ => {}
		}

		self.services
			.event_bus
			.invalidate(invalidation_topics(&self.intent));
		self.services.event_bus.workflow(WorkflowEvent::Completed {
			workflow_id: self.id.clone(),
			affected_tokens: reconciliation.affected_tokens.clone(),
		});

		info!(
			workflow_id = %self.id,
			intent = self.intent.kind(),
			tx_hash = tx_hash.as_ref().map(truncate_hash).unwrap_or_default(),
			tokens = reconciliation.affected_tokens.len(),
			"Workflow succeeded"
		);

		self.outcome = Some(Outcome::Success {
			artifact,
			affected_tokens: reconciliation.affected_tokens,
			acquired,
		});
	}

	/// Drives the workflow from wherever it is to an outcome.
	///
	/// A failed step ends the run with a `failed` outcome but leaves the
	/// state in place, so calling `run` again retries that step.
	pub async fn run(&mut self) -> Outcome {
		loop {
			if let Some(outcome) = &self.outcome {
				return outcome.clone();
			}

			let result = match self.state.phase() {
				Phase::Validate => self.validate().await.map(|_| ()),
				Phase::Confirm => self.confirm().await.map(|_| ()),
				Phase::Execute => self.step().await.map(|_| ()),
				Phase::Success | Phase::Closed => {
					return self.outcome.clone().unwrap_or(Outcome::Cancelled)
				}
			};

			if let Err(e) = result {
				return Outcome::Failed {
					phase: self.state.phase(),
					error_kind: e.kind(),
					message: e.to_string(),
				};
			}
		}
	}

	/// Stops tracking the workflow. Already finished workflows keep their
	/// outcome.
	pub fn dismiss(&mut self) -> Outcome {
		match self.state.apply(Transition::Dismissed) {
			Ok(next) => {
				self.state = next;
				self.outcome = Some(Outcome::Cancelled);
				info!(workflow_id = %self.id, "Workflow dismissed");
				self.services.event_bus.workflow(WorkflowEvent::Dismissed {
					workflow_id: self.id.clone(),
				});
				Outcome::Cancelled
			}
			Err(_) => self.outcome.clone().unwrap_or(Outcome::Cancelled),
		}
	}

	async fn viewer(&self) -> Result<Address, WorkflowError> {
		self.services
			.account
			.get_address()
			.await
			.map_err(|e| WorkflowError::precondition(format!("No account connected: {}", e)))
	}

	fn ensure_phase(&self, expected: Phase, action: &str) -> Result<(), WorkflowError> {
		if self.state.phase() != expected {
			return Err(StateError::InvalidTransition {
				phase: self.state.phase(),
				transition: action.to_string(),
			}
			.into());
		}
		Ok(())
	}

	/// Records `error` against the current step and hands it back.
	fn fail(&mut self, error: WorkflowError) -> WorkflowError {
		let phase = self.state.phase();
		warn!(
			workflow_id = %self.id,
			%phase,
			kind = ?error.kind(),
			retryable = error.is_retryable(),
			error = %error,
			"Workflow step failed"
		);

		let info = ErrorInfo {
			phase,
			kind: error.kind(),
			message: error.to_string(),
			retryable: error.is_retryable(),
		};
		if let Ok(next) = self.state.apply(Transition::Failed(info)) {
			self.state = next;
		}

		self.services.event_bus.workflow(WorkflowEvent::StepFailed {
			workflow_id: self.id.clone(),
			phase: phase.to_string(),
			message: error.to_string(),
		});
		error
	}
}
