//! Configuration validation for pluggable marketplace components.
//!
//! Each implementation (account, delivery, index, aggregator, validator)
//! receives a free-form TOML table and checks it against a [`Schema`]
//! before it is constructed.

use alloy::primitives::Address;
use thiserror::Error;

/// Why a component's configuration table was rejected.
#[derive(Debug, Error)]
pub enum ValidationError {
	#[error("Missing required field: {0}")]
	Missing(String),
	#[error("Invalid value for field '{field}': {reason}")]
	Invalid { field: String, reason: String },
	#[error("Field '{field}' should be {expected}, found {found}")]
	WrongType {
		field: String,
		expected: &'static str,
		found: &'static str,
	},
}

/// The shape a configuration value must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
	String,
	Integer { min: Option<i64>, max: Option<i64> },
	Boolean,
	/// A `0x`-prefixed 20-byte hex address.
	Address,
	/// An `http://` or `https://` endpoint.
	Url,
}

impl FieldType {
	fn name(&self) -> &'static str {
		match self {
			FieldType::String => "a string",
			FieldType::Integer { .. } => "an integer",
			FieldType::Boolean => "a boolean",
			FieldType::Address => "an address",
			FieldType::Url => "a URL",
		}
	}

	/// Checks `value` against this type, reporting failures under `field`.
	fn check(&self, field: &str, value: &toml::Value) -> Result<(), ValidationError> {
		let wrong_type = || ValidationError::WrongType {
			field: field.to_string(),
			expected: self.name(),
			found: value.type_str(),
		};
		let invalid = |reason: String| ValidationError::Invalid {
			field: field.to_string(),
			reason,
		};

		match self {
			FieldType::String => value.as_str().map(|_| ()).ok_or_else(wrong_type),
			FieldType::Boolean => value.as_bool().map(|_| ()).ok_or_else(wrong_type),
			FieldType::Integer { min, max } => {
				let n = value.as_integer().ok_or_else(wrong_type)?;
				match (min, max) {
					(Some(min), _) if n < *min => Err(invalid(format!("{} is below {}", n, min))),
					(_, Some(max)) if n > *max => Err(invalid(format!("{} is above {}", n, max))),
					_ => Ok(()),
				}
			}
			FieldType::Address => {
				let raw = value.as_str().ok_or_else(wrong_type)?;
				if raw.starts_with("0x") && raw.parse::<Address>().is_ok() {
					Ok(())
				} else {
					Err(invalid(format!("'{}' is not a 0x-prefixed 20-byte address", raw)))
				}
			}
			FieldType::Url => {
				let raw = value.as_str().ok_or_else(wrong_type)?;
				if raw.starts_with("http://") || raw.starts_with("https://") {
					Ok(())
				} else {
					Err(invalid(format!("'{}' is not an http(s) URL", raw)))
				}
			}
		}
	}
}

/// Extra check run after the type check passes.
pub type FieldValidator = Box<dyn Fn(&toml::Value) -> Result<(), String> + Send + Sync>;

/// A named configuration field.
pub struct Field {
	pub name: String,
	pub field_type: FieldType,
	pub validator: Option<FieldValidator>,
}

impl std::fmt::Debug for Field {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Field")
			.field("name", &self.name)
			.field("field_type", &self.field_type)
			.finish_non_exhaustive()
	}
}

impl Field {
	pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
		Self {
			name: name.into(),
			field_type,
			validator: None,
		}
	}

	pub fn with_validator<F>(mut self, validator: F) -> Self
	where
		F: Fn(&toml::Value) -> Result<(), String> + Send + Sync + 'static,
	{
		self.validator = Some(Box::new(validator));
		self
	}

	fn check(&self, value: &toml::Value) -> Result<(), ValidationError> {
		self.field_type.check(&self.name, value)?;
		match &self.validator {
			Some(validator) => validator(value).map_err(|reason| ValidationError::Invalid {
				field: self.name.clone(),
				reason,
			}),
			None => Ok(()),
		}
	}
}

/// Required and optional fields of one component table. Unknown keys are
/// ignored.
#[derive(Debug)]
pub struct Schema {
	pub required: Vec<Field>,
	pub optional: Vec<Field>,
}

impl Schema {
	pub fn new(required: Vec<Field>, optional: Vec<Field>) -> Self {
		Self { required, optional }
	}

	pub fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let table = config.as_table().ok_or(ValidationError::WrongType {
			field: "config".to_string(),
			expected: "a table",
			found: config.type_str(),
		})?;

		for field in &self.required {
			match table.get(&field.name) {
				Some(value) => field.check(value)?,
				None => return Err(ValidationError::Missing(field.name.clone())),
			}
		}
		for field in &self.optional {
			if let Some(value) = table.get(&field.name) {
				field.check(value)?;
			}
		}

		Ok(())
	}
}

/// Accepts a 32-byte hex secret key, with or without `0x`.
pub fn validate_private_key(value: &toml::Value) -> Result<(), String> {
	let key = value.as_str().ok_or("private key must be a string")?;
	let digits = key.strip_prefix("0x").unwrap_or(key);

	match hex::decode(digits) {
		Ok(bytes) if bytes.len() == 32 => Ok(()),
		Ok(bytes) => Err(format!("private key is {} bytes, expected 32", bytes.len())),
		Err(_) => Err("private key is not valid hex".to_string()),
	}
}

/// A configuration schema that can validate TOML values.
pub trait ConfigSchema: Send + Sync {
	/// Validates a TOML configuration value against this schema.
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError>;
}
