//! Events published on the marketplace event bus.

use crate::plan::ActionKind;
use crate::topics::CacheTopic;
use crate::order::TokenKey;
use alloy::primitives::B256;
use serde::Serialize;

/// Top-level event envelope.
#[derive(Debug, Clone, Serialize)]
pub enum MarketEvent {
	Workflow(WorkflowEvent),
	Cache(CacheEvent),
}

/// Progress of a single execution workflow.
#[derive(Debug, Clone, Serialize)]
pub enum WorkflowEvent {
	Validated {
		workflow_id: String,
		valid: usize,
		rejected: usize,
	},
	PlanCompiled {
		workflow_id: String,
		total_approvals: usize,
		terminal: ActionKind,
	},
	ApprovalConfirmed {
		workflow_id: String,
		index: usize,
		tx_hash: B256,
	},
	TerminalConfirmed {
		workflow_id: String,
		tx_hash: Option<B256>,
	},
	StepFailed {
		workflow_id: String,
		phase: String,
		message: String,
	},
	Completed {
		workflow_id: String,
		affected_tokens: Vec<TokenKey>,
	},
	Dismissed {
		workflow_id: String,
	},
}

/// Signals for consumers holding cached views.
#[derive(Debug, Clone, Serialize)]
pub enum CacheEvent {
	Invalidated { topics: Vec<CacheTopic> },
}
