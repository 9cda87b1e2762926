//! Action plans: the ordered blockchain steps that realise an intent.

use crate::amount::CurrencyAmount;
use alloy::primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// An unsigned transaction ready for the wallet transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTransaction {
	pub chain_id: u64,
	pub to: Address,
	#[serde(default)]
	pub data: Bytes,
	#[serde(default)]
	pub value: U256,
}

/// What an approval grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ApprovalKind {
	/// ERC-20 allowance of at least `amount`.
	Allowance { amount: U256 },
	/// ERC-721/1155 operator approval for the whole contract.
	ForAll,
}

/// Permission for `operator` to move `token` on the account's behalf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Approval {
	pub token: Address,
	pub operator: Address,
	#[serde(flatten)]
	pub kind: ApprovalKind,
	pub transaction: RawTransaction,
}

/// An unsigned order awaiting the maker's signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDraft {
	/// EIP-712 digest the maker signs.
	pub digest: B256,
	/// Order body as the index expects it, minus the signature.
	pub payload: serde_json::Value,
}

/// A draft together with the maker's signature over its digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedOrder {
	pub payload: serde_json::Value,
	pub signature: Bytes,
}

/// Off-chain order creation: sign every draft, then register with the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreation {
	pub chain_id: u64,
	pub drafts: Vec<OrderDraft>,
}

/// Expected amounts of a swap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapQuote {
	pub amount_in: CurrencyAmount,
	pub amount_out: CurrencyAmount,
}

/// One step of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Action {
	Approve(Approval),
	Exchange(RawTransaction),
	Create(OrderCreation),
	Mint(RawTransaction),
	BatchTransfer(RawTransaction),
	Swap(RawTransaction),
	Cancel(RawTransaction),
}

/// Discriminant of [`Action`], for logs and error reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionKind {
	Approve,
	Exchange,
	Create,
	Mint,
	BatchTransfer,
	Swap,
	Cancel,
}

impl fmt::Display for ActionKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			ActionKind::Approve => "approve",
			ActionKind::Exchange => "exchange",
			ActionKind::Create => "create",
			ActionKind::Mint => "mint",
			ActionKind::BatchTransfer => "batchTransfer",
			ActionKind::Swap => "swap",
			ActionKind::Cancel => "cancel",
		};
		f.write_str(name)
	}
}

impl Action {
	pub fn kind(&self) -> ActionKind {
		match self {
			Action::Approve(_) => ActionKind::Approve,
			Action::Exchange(_) => ActionKind::Exchange,
			Action::Create(_) => ActionKind::Create,
			Action::Mint(_) => ActionKind::Mint,
			Action::BatchTransfer(_) => ActionKind::BatchTransfer,
			Action::Swap(_) => ActionKind::Swap,
			Action::Cancel(_) => ActionKind::Cancel,
		}
	}

	/// The on-chain transaction this action submits, if any.
	pub fn transaction(&self) -> Option<&RawTransaction> {
		match self {
			Action::Approve(approval) => Some(&approval.transaction),
			Action::Exchange(tx)
			| Action::Mint(tx)
			| Action::BatchTransfer(tx)
			| Action::Swap(tx)
			| Action::Cancel(tx) => Some(tx),
			Action::Create(_) => None,
		}
	}
}

/// Plan shapes that violate the approvals-then-terminal layout.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlanShapeError {
	#[error("Plan contains no terminal action")]
	MissingTerminal,
	#[error("Plan contains more than one terminal action")]
	MultipleTerminals,
	#[error("Approval at position {0} follows the terminal action")]
	ApprovalAfterTerminal(usize),
}

/// Zero or more approvals followed by exactly one terminal action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionPlan {
	approvals: Vec<Approval>,
	terminal: Action,
	#[serde(default)]
	quote: Option<SwapQuote>,
}

impl ActionPlan {
	/// Builds a plan from a flat action list, enforcing its layout.
	pub fn from_actions(actions: Vec<Action>) -> Result<Self, PlanShapeError> {
		let mut approvals = Vec::new();
		let mut terminal = None;

		for (position, action) in actions.into_iter().enumerate() {
			match action {
				Action::Approve(approval) => {
					if terminal.is_some() {
						return Err(PlanShapeError::ApprovalAfterTerminal(position));
					}
					approvals.push(approval);
				}
				other => {
					if terminal.is_some() {
						return Err(PlanShapeError::MultipleTerminals);
					}
					terminal = Some(other);
				}
			}
		}

		let terminal = terminal.ok_or(PlanShapeError::MissingTerminal)?;
		Ok(Self {
			approvals,
			terminal,
			quote: None,
		})
	}

	pub fn with_quote(mut self, quote: SwapQuote) -> Self {
		self.quote = Some(quote);
		self
	}

	pub fn approvals(&self) -> &[Approval] {
		&self.approvals
	}

	pub fn terminal(&self) -> &Action {
		&self.terminal
	}

	pub fn quote(&self) -> Option<&SwapQuote> {
		self.quote.as_ref()
	}

	pub fn total_approvals(&self) -> usize {
		self.approvals.len()
	}

	/// Total number of steps including the terminal action.
	pub fn len(&self) -> usize {
		self.approvals.len() + 1
	}

	pub fn is_empty(&self) -> bool {
		false
	}

	/// Keeps only the approvals for which `keep` returns true.
	pub fn retain_approvals<F>(&mut self, keep: F)
	where
		F: FnMut(&Approval) -> bool,
	{
		self.approvals.retain(keep);
	}

	/// All actions in execution order.
	pub fn actions(&self) -> Vec<Action> {
		self.approvals
			.iter()
			.cloned()
			.map(Action::Approve)
			.chain(std::iter::once(self.terminal.clone()))
			.collect()
	}
}
