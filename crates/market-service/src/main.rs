use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use market_config::{Config, ConfigLoader};
use market_core::{MarketBuilder, MarketEngine, Outcome};
use market_pricing::{LineItem, PriceBreakdownEngine};
use market_types::{Address, Currency, CurrencyAmount, Fraction, Intent, U256};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "market")]
#[command(about = "NFT marketplace order execution", long_about = None)]
struct Cli {
	#[command(subcommand)]
	command: Commands,

	#[arg(short, long, value_name = "FILE", default_value = "config/local.toml")]
	config: PathBuf,

	#[arg(long, env = "MARKET_LOG_LEVEL", default_value = "info")]
	log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
	/// Validate the configuration file
	ValidateConfig,
	/// Print the fee breakdown for a set of line items
	Breakdown {
		/// JSON array of line items, or @path to a file holding one
		#[arg(long)]
		items: String,
	},
	/// Validate, price and execute an intent
	Execute {
		/// JSON intent, or @path to a file holding one
		#[arg(long)]
		intent: String,
		/// Confirm the plan without prompting; otherwise the workflow is
		/// dismissed after pricing
		#[arg(long)]
		yes: bool,
	},
}

/// A line item as accepted on the command line.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemInput {
	currency: Currency,
	/// Decimal unit price, e.g. "1.5".
	unit_price: String,
	#[serde(default = "default_quantity")]
	quantity: u64,
	/// Royalty as a decimal percent, e.g. "2.5" for 2.5%.
	creator_fee_rate: Option<String>,
	creator_fee_recipient: Option<Address>,
}

fn default_quantity() -> u64 {
	1
}

impl ItemInput {
	fn into_line_item(self) -> Result<LineItem> {
		let unit_price = CurrencyAmount::from_decimal(self.currency, &self.unit_price)
			.with_context(|| format!("Invalid unit price {:?}", self.unit_price))?;
		let item = LineItem::new(unit_price, U256::from(self.quantity));

		match (self.creator_fee_rate, self.creator_fee_recipient) {
			(Some(rate), Some(recipient)) => {
				let fraction = Fraction::from_decimal(&rate)
					.and_then(|r| r.multiply(&Fraction::percent(1)))
					.with_context(|| format!("Invalid creator fee rate {:?}", rate))?;
				Ok(item.with_creator_fee(fraction, recipient))
			}
			(None, None) => Ok(item),
			_ => bail!("creatorFeeRate and creatorFeeRecipient must be given together"),
		}
	}
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();

	// Initialize tracing
	setup_tracing(&cli.log_level)?;

	let config = load_config(&cli.config).await?;

	match cli.command {
		Commands::ValidateConfig => validate_config(&config),
		Commands::Breakdown { items } => breakdown(&config, &items),
		Commands::Execute { intent, yes } => execute(config, &intent, yes).await,
	}
}

async fn load_config(path: &Path) -> Result<Config> {
	info!("Loading configuration from: {:?}", path);
	ConfigLoader::new()
		.with_file(path)
		.load()
		.await
		.context("Failed to load configuration")
}

fn validate_config(config: &Config) -> Result<()> {
	// Building instantiates every provider, which runs its schema check.
	build_engine(config.clone())?;

	info!("Configuration is valid");
	info!("Market name: {}", config.market.name);
	info!("Chain: {}", config.market.chain_id);
	info!("Service fee: {} bps", config.market.service_fee_bps);
	info!("  Account: {}", config.account.provider);
	info!("  Delivery: {}", config.delivery.provider);
	info!("  Index: {}", config.index.provider);
	info!("  Validator: {}", config.validator.provider);
	info!("  Aggregator: {}", config.aggregator.provider);
	if let Some(approvals) = &config.approvals {
		info!("  Approvals: {}", approvals.provider);
	}

	Ok(())
}

fn breakdown(config: &Config, raw: &str) -> Result<()> {
	let inputs: Vec<ItemInput> =
		serde_json::from_str(&read_argument(raw)?).context("Failed to parse line items")?;
	let items = inputs
		.into_iter()
		.map(ItemInput::into_line_item)
		.collect::<Result<Vec<_>>>()?;

	let engine = PriceBreakdownEngine::new(config.market.service_fee_bps);
	let breakdowns = engine
		.compute_breakdowns(&items)
		.context("Failed to compute breakdown")?;

	println!("{}", serde_json::to_string_pretty(&breakdowns)?);
	Ok(())
}

async fn execute(config: Config, raw: &str, yes: bool) -> Result<()> {
	let intent: Intent =
		serde_json::from_str(&read_argument(raw)?).context("Failed to parse intent")?;

	let engine = build_engine(config)?;
	let mut events = engine.event_bus().subscribe();
	let event_logger = tokio::spawn(async move {
		while let Ok(event) = events.recv().await {
			info!(event = ?event, "Market event");
		}
	});

	let mut workflow = engine.create_workflow(intent);
	info!(
		workflow_id = %workflow.id(),
		kind = workflow.intent().kind(),
		"Executing intent"
	);

	let outcome = match workflow.validate().await {
		Ok(results) => {
			info!(orders = results.len(), "Validation finished");
			match workflow.outcome() {
				Some(outcome) => outcome.clone(),
				None => {
					let breakdowns = workflow.breakdown().context("Failed to price intent")?;
					println!("{}", serde_json::to_string_pretty(&breakdowns)?);

					if yes {
						workflow.run().await
					} else {
						warn!("Not confirmed; pass --yes to execute");
						workflow.dismiss()
					}
				}
			}
		}
		Err(e) => bail!("Validation failed: {}", e),
	};

	println!("{}", serde_json::to_string_pretty(&outcome)?);
	event_logger.abort();

	if let Outcome::Failed { message, .. } = &outcome {
		bail!("Execution failed: {}", message);
	}
	Ok(())
}

fn build_engine(config: Config) -> Result<MarketEngine> {
	MarketBuilder::new(config)
		.with_account_factory("local", market_account::implementations::local::create_account)
		.with_delivery_factory(
			"alloy",
			market_delivery::implementations::evm::alloy::create_http_delivery,
		)
		.with_index_factory("http", market_index::implementations::http::create_http_index)
		.with_validator_factory(
			"onchain",
			market_validator::implementations::onchain::create_onchain_validator,
		)
		.with_aggregator_factory(
			"http",
			market_plan::implementations::http::create_http_aggregator,
		)
		.with_approval_factory(
			"onchain",
			market_plan::implementations::onchain::create_onchain_approval_checker,
		)
		.build()
		.context("Failed to build market engine")
}

/// Returns `raw`, or the contents of the file it names when prefixed with `@`.
fn read_argument(raw: &str) -> Result<String> {
	match raw.strip_prefix('@') {
		Some(path) => std::fs::read_to_string(path)
			.with_context(|| format!("Failed to read {}", path)),
		None => Ok(raw.to_string()),
	}
}

fn setup_tracing(log_level: &str) -> Result<()> {
	let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

	tracing_subscriber::registry()
		.with(env_filter)
		.with(tracing_subscriber::fmt::layer())
		.init();

	Ok(())
}
