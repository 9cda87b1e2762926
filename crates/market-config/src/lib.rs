//! Configuration loading for the marketplace service.
//!
//! Configuration is a single TOML file. `${VAR}` placeholders are replaced
//! from the environment before parsing, a small set of settings can be
//! overridden through prefixed environment variables, and the result is
//! checked for cross-field consistency before it is handed out.

use serde::{Deserialize, Serialize};
use std::env;
use regex::Regex;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ConfigError {
	#[error("File not found: {0}")]
	FileNotFound(String),

	#[error("Parse error: {0}")]
	ParseError(String),

	#[error("Validation error: {0}")]
	ValidationError(String),

	#[error("Environment variable not found: {0}")]
	EnvVarNotFound(String),

	#[error("IO error: {0}")]
	IoError(#[from] std::io::Error),
}

/// Complete marketplace configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	pub market: MarketSettings,
	/// Signing account.
	pub account: ComponentConfig,
	/// Wallet transport used to submit transactions.
	pub delivery: ComponentConfig,
	/// Off-chain order index.
	pub index: ComponentConfig,
	/// Protocol client that compiles intents into action plans.
	pub aggregator: ComponentConfig,
	/// Strict on-chain order validator.
	pub validator: ComponentConfig,
	/// Re-checks approvals on-chain so granted ones are not requested again.
	#[serde(default)]
	pub approvals: Option<ComponentConfig>,
}

/// Marketplace-wide settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MarketSettings {
	pub name: String,
	/// Chain the service operates on.
	pub chain_id: u64,
	/// Platform fee in basis points of the total price.
	#[serde(default = "default_service_fee_bps")]
	pub service_fee_bps: u64,
	/// Blocks to wait before a transaction counts as confirmed.
	#[serde(default = "default_confirmations")]
	pub confirmations: u64,
	/// Buffered events per subscriber on the event bus.
	#[serde(default = "default_event_capacity")]
	pub event_capacity: usize,
}

fn default_service_fee_bps() -> u64 {
	200
}

fn default_confirmations() -> u64 {
	1
}

fn default_event_capacity() -> usize {
	1000
}

/// A pluggable component: which implementation to build and its settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ComponentConfig {
	pub provider: String,
	#[serde(default = "empty_table")]
	pub config: toml::Value,
}

fn empty_table() -> toml::Value {
	toml::Value::Table(toml::Table::new())
}

impl Config {
	fn components(&self) -> Vec<(&'static str, &ComponentConfig)> {
		let mut components = vec![
			("account", &self.account),
			("delivery", &self.delivery),
			("index", &self.index),
			("aggregator", &self.aggregator),
			("validator", &self.validator),
		];
		if let Some(approvals) = &self.approvals {
			components.push(("approvals", approvals));
		}
		components
	}
}

/// Loads a [`Config`] from disk.
pub struct ConfigLoader {
	path: Option<PathBuf>,
	env_prefix: String,
}

impl Default for ConfigLoader {
	fn default() -> Self {
		Self::new()
	}
}

impl ConfigLoader {
	pub fn new() -> Self {
		Self {
			path: None,
			env_prefix: "MARKET_".to_string(),
		}
	}

	pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
		self.path = Some(path.as_ref().to_path_buf());
		self
	}

	/// Prefix for override variables such as `MARKET_CHAIN_ID`.
	pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.env_prefix = prefix.into();
		self
	}

	pub async fn load(&self) -> Result<Config, ConfigError> {
		let path = self.path.as_deref().ok_or_else(|| {
			ConfigError::FileNotFound("No configuration file specified".to_string())
		})?;

		let content = match tokio::fs::read_to_string(path).await {
			Ok(content) => content,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				return Err(ConfigError::FileNotFound(path.display().to_string()))
			}
			Err(e) => return Err(e.into()),
		};
		debug!(path = %path.display(), "Read configuration file");
		self.parse(&content)
	}

	/// Parses, overrides and validates configuration from a TOML string.
	pub fn parse(&self, content: &str) -> Result<Config, ConfigError> {
		let expanded = expand_env_vars(content)?;

		let mut config: Config =
			toml::from_str(&expanded).map_err(|e| ConfigError::ParseError(e.to_string()))?;

		self.apply_env_overrides(&mut config)?;
		self.validate_config(&config)?;

		Ok(config)
	}

	fn apply_env_overrides(&self, config: &mut Config) -> Result<(), ConfigError> {
		if let Ok(chain_id) = env::var(format!("{}CHAIN_ID", self.env_prefix)) {
			config.market.chain_id = chain_id
				.parse()
				.map_err(|e| ConfigError::ValidationError(format!("Invalid chain id: {}", e)))?;
		}

		if let Ok(fee) = env::var(format!("{}SERVICE_FEE_BPS", self.env_prefix)) {
			config.market.service_fee_bps = fee.parse().map_err(|e| {
				ConfigError::ValidationError(format!("Invalid service fee: {}", e))
			})?;
		}

		Ok(())
	}

	fn validate_config(&self, config: &Config) -> Result<(), ConfigError> {
		if config.market.name.trim().is_empty() {
			return Err(ConfigError::ValidationError(
				"Market name cannot be empty".to_string(),
			));
		}

		if config.market.chain_id == 0 {
			return Err(ConfigError::ValidationError(
				"Chain id must be greater than zero".to_string(),
			));
		}

		if config.market.service_fee_bps > 10_000 {
			return Err(ConfigError::ValidationError(format!(
				"Service fee of {} bps exceeds 100%",
				config.market.service_fee_bps
			)));
		}

		if config.market.event_capacity == 0 {
			return Err(ConfigError::ValidationError(
				"Event capacity must be greater than zero".to_string(),
			));
		}

		for (section, component) in config.components() {
			if component.provider.trim().is_empty() {
				return Err(ConfigError::ValidationError(format!(
					"[{}] provider cannot be empty",
					section
				)));
			}
			if !component.config.is_table() {
				return Err(ConfigError::ValidationError(format!(
					"[{}] config must be a table",
					section
				)));
			}
		}

		Ok(())
	}
}

/// Replaces every `${NAME}` in `content` with the variable's value. Values
/// are inserted verbatim and never re-expanded.
fn expand_env_vars(content: &str) -> Result<String, ConfigError> {
	let placeholder = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")
		.map_err(|e| ConfigError::ParseError(e.to_string()))?;

	let mut expanded = String::with_capacity(content.len());
	let mut last = 0;
	for caps in placeholder.captures_iter(content) {
		let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
			continue;
		};
		let value = env::var(name.as_str())
			.map_err(|_| ConfigError::EnvVarNotFound(name.as_str().to_string()))?;
		expanded.push_str(&content[last..whole.start()]);
		expanded.push_str(&value);
		last = whole.end();
	}
	expanded.push_str(&content[last..]);

	Ok(expanded)
}
