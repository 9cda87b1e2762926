//! Execution orchestrator for the marketplace.
//!
//! The engine wires the account, wallet transport, index, validator, pricing
//! and plan compiler into a set of shared [`Services`] and hands out
//! [`Workflow`]s, one per user intent. Each workflow walks the
//! validate → confirm → execute → success state machine, reconciles mined
//! transactions with the index and announces stale cache topics on the
//! [`EventBus`].

use market_account::{AccountError, AccountInterface, AccountService};
use market_config::Config;
use market_delivery::{DeliveryError, DeliveryInterface, DeliveryService};
use market_index::{IndexError, IndexInterface};
use market_plan::{AggregatorInterface, ApprovalCheckerInterface, PlanCompiler, PlanError};
use market_pricing::PriceBreakdownEngine;
use market_types::Intent;
use market_validator::{
	OrderValidator, SelectionStore, StrictValidatorInterface, ValidatorError,
};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

pub mod event_bus;
pub mod reconcile;
pub mod state;
pub mod topics;
pub mod workflow;

#[cfg(test)]
pub(crate) mod mocks;

pub use event_bus::EventBus;
pub use reconcile::{extract_transfers, Reconciliation, Reconciler, TokenTransfer};
pub use state::{ErrorInfo, ErrorKind, ExecutionState, Phase, Step, Transition};
pub use topics::invalidation_topics;
pub use workflow::{Artifact, Outcome, Services, Workflow, WorkflowError};

#[derive(Debug, Error)]
pub enum MarketError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Failed to build {component}: {message}")]
	Component {
		component: &'static str,
		message: String,
	},
}

impl MarketError {
	fn component(component: &'static str, e: impl std::fmt::Display) -> Self {
		MarketError::Component {
			component,
			message: e.to_string(),
		}
	}
}

/// Shared services plus the configuration they were built from.
pub struct MarketEngine {
	config: Config,
	services: Services,
}

impl MarketEngine {
	/// Starts a fresh workflow for `intent`. A new intent always gets a new
	/// state; nothing is shared with earlier workflows.
	pub fn create_workflow(&self, intent: Intent) -> Workflow {
		let workflow = Workflow::new(intent, self.services.clone());
		info!(
			workflow_id = %workflow.id(),
			intent = workflow.intent().kind(),
			"Created workflow"
		);
		workflow
	}

	pub fn services(&self) -> &Services {
		&self.services
	}

	pub fn event_bus(&self) -> &EventBus {
		&self.services.event_bus
	}

	pub fn selection(&self) -> &SelectionStore {
		&self.services.selection
	}

	pub fn pricing(&self) -> &PriceBreakdownEngine {
		&self.services.pricing
	}

	pub fn config(&self) -> &Config {
		&self.config
	}
}

type AccountFactory =
	Box<dyn Fn(&toml::Value) -> Result<Box<dyn AccountInterface>, AccountError> + Send>;
type DeliveryFactory =
	Box<dyn Fn(&toml::Value) -> Result<Box<dyn DeliveryInterface>, DeliveryError> + Send>;
type IndexFactory =
	Box<dyn Fn(&toml::Value) -> Result<Box<dyn IndexInterface>, IndexError> + Send>;
type ValidatorFactory = Box<
	dyn Fn(&toml::Value) -> Result<Box<dyn StrictValidatorInterface>, ValidatorError> + Send,
>;
type AggregatorFactory =
	Box<dyn Fn(&toml::Value) -> Result<Box<dyn AggregatorInterface>, PlanError> + Send>;
type ApprovalFactory =
	Box<dyn Fn(&toml::Value) -> Result<Box<dyn ApprovalCheckerInterface>, PlanError> + Send>;

/// Builds a [`MarketEngine`] from configuration and named factories.
///
/// Each config section names a `provider`; the factory registered under that
/// name builds it from the section's `config` table.
pub struct MarketBuilder {
	config: Config,
	account_factories: HashMap<String, AccountFactory>,
	delivery_factories: HashMap<String, DeliveryFactory>,
	index_factories: HashMap<String, IndexFactory>,
	validator_factories: HashMap<String, ValidatorFactory>,
	aggregator_factories: HashMap<String, AggregatorFactory>,
	approval_factories: HashMap<String, ApprovalFactory>,
}

impl MarketBuilder {
	pub fn new(config: Config) -> Self {
		Self {
			config,
			account_factories: HashMap::new(),
			delivery_factories: HashMap::new(),
			index_factories: HashMap::new(),
			validator_factories: HashMap::new(),
			aggregator_factories: HashMap::new(),
			approval_factories: HashMap::new(),
		}
	}

	pub fn with_account_factory<F>(mut self, name: &str, factory: F) -> Self
	where
		F: Fn(&toml::Value) -> Result<Box<dyn AccountInterface>, AccountError> + Send + 'static,
	{
		self.account_factories
			.insert(name.to_string(), Box::new(factory));
		self
	}

	pub fn with_delivery_factory<F>(mut self, name: &str, factory: F) -> Self
	where
		F: Fn(&toml::Value) -> Result<Box<dyn DeliveryInterface>, DeliveryError> + Send + 'static,
	{
		self.delivery_factories
			.insert(name.to_string(), Box::new(factory));
		self
	}

	pub fn with_index_factory<F>(mut self, name: &str, factory: F) -> Self
	where
		F: Fn(&toml::Value) -> Result<Box<dyn IndexInterface>, IndexError> + Send + 'static,
	{
		self.index_factories
			.insert(name.to_string(), Box::new(factory));
		self
	}

	pub fn with_validator_factory<F>(mut self, name: &str, factory: F) -> Self
	where
		F: Fn(&toml::Value) -> Result<Box<dyn StrictValidatorInterface>, ValidatorError>
			+ Send
			+ 'static,
	{
		self.validator_factories
			.insert(name.to_string(), Box::new(factory));
		self
	}

	pub fn with_aggregator_factory<F>(mut self, name: &str, factory: F) -> Self
	where
		F: Fn(&toml::Value) -> Result<Box<dyn AggregatorInterface>, PlanError> + Send + 'static,
	{
		self.aggregator_factories
			.insert(name.to_string(), Box::new(factory));
		self
	}

	pub fn with_approval_factory<F>(mut self, name: &str, factory: F) -> Self
	where
		F: Fn(&toml::Value) -> Result<Box<dyn ApprovalCheckerInterface>, PlanError>
			+ Send
			+ 'static,
	{
		self.approval_factories
			.insert(name.to_string(), Box::new(factory));
		self
	}

	pub fn build(self) -> Result<MarketEngine, MarketError> {
		let config = &self.config;

		let factory = lookup(&self.account_factories, "account", &config.account.provider)?;
		let account_provider =
			factory(&config.account.config).map_err(|e| MarketError::component("account", e))?;
		let account = Arc::new(AccountService::new(account_provider));

		let factory = lookup(&self.delivery_factories, "delivery", &config.delivery.provider)?;
		let delivery_provider =
			factory(&config.delivery.config).map_err(|e| MarketError::component("delivery", e))?;
		let delivery = Arc::new(DeliveryService::new(
			delivery_provider,
			config.market.confirmations,
		));

		let factory = lookup(&self.index_factories, "index", &config.index.provider)?;
		let index: Arc<dyn IndexInterface> = Arc::from(
			factory(&config.index.config).map_err(|e| MarketError::component("index", e))?,
		);

		let factory = lookup(&self.validator_factories, "validator", &config.validator.provider)?;
		let strict =
			factory(&config.validator.config).map_err(|e| MarketError::component("validator", e))?;
		let validator = Arc::new(OrderValidator::new(strict, index.clone()));

		let factory = lookup(
			&self.aggregator_factories,
			"aggregator",
			&config.aggregator.provider,
		)?;
		let aggregator = factory(&config.aggregator.config)
			.map_err(|e| MarketError::component("aggregator", e))?;
		let mut compiler = PlanCompiler::new(aggregator);

		if let Some(approvals) = &config.approvals {
			let factory = lookup(&self.approval_factories, "approvals", &approvals.provider)?;
			let checker =
				factory(&approvals.config).map_err(|e| MarketError::component("approvals", e))?;
			compiler = compiler.with_approval_checker(checker);
		}

		let services = Services {
			account,
			delivery,
			index: index.clone(),
			validator,
			pricing: Arc::new(PriceBreakdownEngine::new(config.market.service_fee_bps)),
			compiler: Arc::new(compiler),
			reconciler: Arc::new(Reconciler::new(index)),
			selection: Arc::new(SelectionStore::new()),
			event_bus: EventBus::new(config.market.event_capacity),
		};

		info!(
			market = %config.market.name,
			chain_id = config.market.chain_id,
			service_fee_bps = config.market.service_fee_bps,
			approval_checks = config.approvals.is_some(),
			"Market engine built"
		);

		Ok(MarketEngine {
			config: self.config,
			services,
		})
	}
}

fn lookup<'a, F>(
	factories: &'a HashMap<String, F>,
	section: &str,
	provider: &str,
) -> Result<&'a F, MarketError> {
	factories.get(provider).ok_or_else(|| {
		MarketError::Config(format!(
			"No {} factory registered for provider '{}'",
			section, provider
		))
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::mocks::*;
	use market_types::{Action, Address};
	use std::sync::Mutex;

	const CONFIG: &str = r#"
[market]
name = "test-market"
chain_id = 1
service_fee_bps = 250

[account]
provider = "static"

[delivery]
provider = "scripted"

[index]
provider = "scripted"

[aggregator]
provider = "fixed"

[validator]
provider = "fixed"
"#;

	fn builder(config: &str) -> MarketBuilder {
		let config: Config = toml::from_str(config).unwrap();
		MarketBuilder::new(config)
			.with_account_factory("static", |_| Ok(Box::new(StaticAccount(buyer()))))
			.with_delivery_factory("scripted", |_| {
				Ok(Box::new(ScriptedWallet {
					chain_id: CHAIN,
					log: Default::default(),
				}))
			})
			.with_index_factory("scripted", |_| {
				Ok(Box::new(ScriptedIndex {
					transfer_logs: vec![],
					sync_fails: false,
					eligible: true,
					log: Default::default(),
				}))
			})
			.with_validator_factory("fixed", |_| {
				Ok(Box::new(FixedValidator {
					invalid: vec![],
					calls: Default::default(),
				}))
			})
			.with_aggregator_factory("fixed", |_| {
				Ok(Box::new(FixedAggregator {
					actions: vec![Action::Exchange(tx(exchange()))],
					calls: Arc::new(Mutex::new(0)),
				}))
			})
	}

	#[tokio::test]
	async fn test_build_wires_configured_providers() {
		let engine = builder(CONFIG).build().unwrap();
		assert_eq!(engine.config().market.name, "test-market");
		assert_eq!(
			engine.pricing().service_fee_rate(),
			&market_types::Fraction::basis_points(250)
		);

		let mut events = engine.event_bus().subscribe();
		let mut workflow = engine.create_workflow(Intent::FulfillListing {
			fills: vec![market_types::OrderFill::new(
				listing(1, "1"),
				market_types::U256::from(1),
			)],
		});
		assert!(matches!(workflow.run().await, Outcome::Success { .. }));
		assert!(events.try_recv().is_ok());
	}

	#[test]
	fn test_unknown_provider_is_a_config_error() {
		let config = CONFIG.replace(
			"provider = \"fixed\"\n\n[validator]",
			"provider = \"zeroex\"\n\n[validator]",
		);
		let result = builder(&config).build();
		assert!(matches!(result, Err(MarketError::Config(msg)) if msg.contains("zeroex")));
	}

	#[test]
	fn test_factory_errors_name_the_component() {
		let result = builder(CONFIG)
			.with_account_factory("static", |_| {
				Err(AccountError::InvalidConfig("private_key is required".to_string()))
			})
			.build();
		assert!(matches!(
			result,
			Err(MarketError::Component { component: "account", .. })
		));
	}

	#[test]
	fn test_approvals_section_requires_registered_factory() {
		let config = format!("{}\n[approvals]\nprovider = \"onchain\"\n", CONFIG);
		assert!(matches!(
			builder(&config).build(),
			Err(MarketError::Config(_))
		));

		let engine = builder(&config)
			.with_approval_factory("onchain", |_| {
				Ok(Box::new(GrantedTokens(vec![Address::repeat_byte(1)])))
			})
			.build();
		assert!(engine.is_ok());
	}

	#[test]
	fn test_workflows_get_fresh_state() {
		let engine = builder(CONFIG).build().unwrap();
		let first = engine.create_workflow(Intent::CancelOrders { orders: vec![] });
		let second = engine.create_workflow(Intent::CancelOrders { orders: vec![] });
		assert_ne!(first.id(), second.id());
		assert_eq!(second.state().phase(), Phase::Validate);
	}
}
