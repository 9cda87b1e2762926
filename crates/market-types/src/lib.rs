//! Shared types for the marketplace execution pipeline.
//!
//! This crate holds the data model every other crate speaks: orders and
//! assets from the index, exact currency amounts, user intents, compiled
//! action plans, receipts, cache topics and bus events, plus the schema
//! machinery used to validate component configuration.

pub mod amount;
pub mod chain;
pub mod contracts;
pub mod events;
pub mod intent;
pub mod order;
pub mod plan;
pub mod topics;
pub mod validation;

pub use amount::{AmountError, Currency, CurrencyAmount, Fraction, Rounding};
pub use chain::{truncate_hash, RawLog, TransactionReceipt};
pub use events::{CacheEvent, MarketEvent, WorkflowEvent};
pub use intent::{
	BatchTransferRequest, Intent, MintRequest, OrderFill, OrderTerms, SwapRequest, TradeType,
	TransferItem, WhitelistProof,
};
pub use order::{
	Asset, ContractType, ItemType, OfferType, Order, OrderCategory, OrderItem, TokenKey,
};
pub use plan::{
	Action, ActionKind, ActionPlan, Approval, ApprovalKind, OrderCreation, OrderDraft,
	PlanShapeError, RawTransaction, SignedOrder, SwapQuote,
};
pub use topics::CacheTopic;
pub use validation::{
	validate_private_key, ConfigSchema, Field, FieldType, FieldValidator, Schema, ValidationError,
};

/// Re-exported so downstream crates agree on one primitive set.
pub use alloy::primitives::{Address, Bytes, B256, U256};

/// Seconds since the Unix epoch.
pub fn now_secs() -> u64 {
	chrono::Utc::now().timestamp().max(0) as u64
}
