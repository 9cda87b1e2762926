//! Execution state machine.
//!
//! A workflow moves `validate -> confirm -> execute -> success`, or ends in
//! `closed` when there is nothing to do or the user dismisses it. A failure
//! never moves the phase: it is recorded in `last_error` and the same step is
//! offered again. Inside `execute` the cursor is `completed_approvals`; it is
//! the only record of what remains.

use market_types::TransactionReceipt;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Workflow phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
	Validate,
	Confirm,
	Execute,
	Success,
	Closed,
}

impl fmt::Display for Phase {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			Phase::Validate => "validate",
			Phase::Confirm => "confirm",
			Phase::Execute => "execute",
			Phase::Success => "success",
			Phase::Closed => "closed",
		};
		f.write_str(name)
	}
}

/// Error classes surfaced to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
	/// Wrong input or wallet state, found before any transaction is built.
	Precondition,
	/// The aggregator could not build a plan.
	Compilation,
	/// A wallet or chain failure at one approval or the terminal action.
	Transaction,
	/// The index could not be synced after on-chain success. Logged only.
	Reconciliation,
}

/// The error a failed step left behind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
	pub phase: Phase,
	pub kind: ErrorKind,
	pub message: String,
	pub retryable: bool,
}

/// What the workflow should do next while executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
	/// Submit the approval at this plan index.
	Approval(usize),
	Terminal,
}

/// Events that drive the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
	/// Validation finished with this many actionable items.
	Validated { valid: usize },
	/// A plan was compiled.
	PlanCompiled { total_approvals: usize },
	/// The approval at `index` was mined.
	ApprovalConfirmed {
		index: usize,
		receipt: TransactionReceipt,
	},
	/// The terminal action succeeded. Order creation is signed off-chain and
	/// has no receipt.
	TerminalConfirmed { receipt: Option<TransactionReceipt> },
	/// The current step failed; the phase and cursor stay put.
	Failed(ErrorInfo),
	/// The user closed the workflow.
	Dismissed,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateError {
	#[error("Cannot apply {transition} in phase {phase}")]
	InvalidTransition { phase: Phase, transition: String },
	#[error("Approval {index} confirmed but the cursor is at {cursor}")]
	OutOfOrder { index: usize, cursor: usize },
	#[error("Terminal action confirmed with {remaining} approvals outstanding")]
	ApprovalsOutstanding { remaining: usize },
}

/// Snapshot of one workflow's progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionState {
	phase: Phase,
	completed_approvals: usize,
	total_approvals: usize,
	last_error: Option<ErrorInfo>,
	/// Receipts of every mined transaction, in submission order.
	tx_receipts: Vec<TransactionReceipt>,
}

impl Default for ExecutionState {
	fn default() -> Self {
		Self::new()
	}
}

impl ExecutionState {
	pub fn new() -> Self {
		Self {
			phase: Phase::Validate,
			completed_approvals: 0,
			total_approvals: 0,
			last_error: None,
			tx_receipts: Vec::new(),
		}
	}

	/// Resumes execution of a plan whose first `completed_approvals`
	/// approvals are already mined.
	pub fn resume(completed_approvals: usize, total_approvals: usize) -> Self {
		Self {
			phase: Phase::Execute,
			completed_approvals: completed_approvals.min(total_approvals),
			total_approvals,
			last_error: None,
			tx_receipts: Vec::new(),
		}
	}

	pub fn phase(&self) -> Phase {
		self.phase
	}

	/// Index of the next approval to submit, equal to `total_approvals`
	/// once only the terminal action remains.
	pub fn cursor(&self) -> usize {
		self.completed_approvals
	}

	pub fn completed_approvals(&self) -> usize {
		self.completed_approvals
	}

	pub fn total_approvals(&self) -> usize {
		self.total_approvals
	}

	pub fn last_error(&self) -> Option<&ErrorInfo> {
		self.last_error.as_ref()
	}

	pub fn tx_receipts(&self) -> &[TransactionReceipt] {
		&self.tx_receipts
	}

	pub fn is_finished(&self) -> bool {
		matches!(self.phase, Phase::Success | Phase::Closed)
	}

	pub fn next_step(&self) -> Option<Step> {
		if self.phase != Phase::Execute {
			return None;
		}
		if self.completed_approvals < self.total_approvals {
			Some(Step::Approval(self.completed_approvals))
		} else {
			Some(Step::Terminal)
		}
	}

	/// Returns the state after `transition`, leaving `self` untouched.
	pub fn apply(&self, transition: Transition) -> Result<ExecutionState, StateError> {
		let mut next = self.clone();

		match (self.phase, transition) {
			(Phase::Validate, Transition::Validated { valid }) => {
				next.phase = if valid == 0 {
					Phase::Closed
				} else {
					Phase::Confirm
				};
				next.last_error = None;
			}
			(Phase::Confirm, Transition::PlanCompiled { total_approvals }) => {
				// With no approvals the cursor already points at the terminal action.
				next.phase = Phase::Execute;
				next.completed_approvals = 0;
				next.total_approvals = total_approvals;
				next.last_error = None;
			}
			(Phase::Execute, Transition::ApprovalConfirmed { index, receipt }) => {
				if index != self.completed_approvals || index >= self.total_approvals {
					return Err(StateError::OutOfOrder {
						index,
						cursor: self.completed_approvals,
					});
				}
				next.completed_approvals += 1;
				next.tx_receipts.push(receipt);
				next.last_error = None;
			}
			(Phase::Execute, Transition::TerminalConfirmed { receipt }) => {
				if self.completed_approvals < self.total_approvals {
					return Err(StateError::ApprovalsOutstanding {
						remaining: self.total_approvals - self.completed_approvals,
					});
				}
				next.phase = Phase::Success;
				next.tx_receipts.extend(receipt);
				next.last_error = None;
			}
			(Phase::Validate | Phase::Confirm | Phase::Execute, Transition::Failed(error)) => {
				next.last_error = Some(error);
			}
			(Phase::Validate | Phase::Confirm | Phase::Execute, Transition::Dismissed) => {
				next.phase = Phase::Closed;
			}
			(phase, transition) => {
				return Err(StateError::InvalidTransition {
					phase,
					transition: format!("{:?}", transition),
				});
			}
		}

		Ok(next)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use market_types::B256;

	fn receipt(n: u8) -> TransactionReceipt {
		TransactionReceipt {
			hash: B256::repeat_byte(n),
			block_number: n as u64,
			success: true,
			logs: vec![],
		}
	}

	fn confirmed(index: usize) -> Transition {
		Transition::ApprovalConfirmed {
			index,
			receipt: receipt(index as u8 + 1),
		}
	}

	fn failure(phase: Phase) -> Transition {
		Transition::Failed(ErrorInfo {
			phase,
			kind: ErrorKind::Transaction,
			message: "user rejected".to_string(),
			retryable: true,
		})
	}

	fn executing(total: usize) -> ExecutionState {
		ExecutionState::new()
			.apply(Transition::Validated { valid: 1 })
			.unwrap()
			.apply(Transition::PlanCompiled {
				total_approvals: total,
			})
			.unwrap()
	}

	#[test]
	fn test_happy_path() {
		let mut state = executing(2);
		assert_eq!(state.next_step(), Some(Step::Approval(0)));

		state = state.apply(confirmed(0)).unwrap();
		assert_eq!(state.next_step(), Some(Step::Approval(1)));

		state = state.apply(confirmed(1)).unwrap();
		assert_eq!(state.next_step(), Some(Step::Terminal));

		state = state
			.apply(Transition::TerminalConfirmed {
				receipt: Some(receipt(9)),
			})
			.unwrap();
		assert_eq!(state.phase(), Phase::Success);
		assert_eq!(state.next_step(), None);
		assert!(state.is_finished());

		let hashes: Vec<B256> = state.tx_receipts().iter().map(|r| r.hash).collect();
		assert_eq!(
			hashes,
			vec![B256::repeat_byte(1), B256::repeat_byte(2), B256::repeat_byte(9)]
		);
	}

	#[test]
	fn test_failed_and_rejected_transitions_record_no_receipt() {
		let state = executing(2).apply(confirmed(0)).unwrap();
		assert_eq!(state.tx_receipts().len(), 1);

		let failed = state.apply(failure(Phase::Execute)).unwrap();
		assert_eq!(failed.tx_receipts(), state.tx_receipts());

		assert!(failed.apply(confirmed(0)).is_err());
		assert!(failed
			.apply(Transition::TerminalConfirmed { receipt: None })
			.is_err());
		assert_eq!(failed.tx_receipts().len(), 1);
	}

	#[test]
	fn test_off_chain_terminal_adds_no_receipt() {
		let done = executing(0)
			.apply(Transition::TerminalConfirmed { receipt: None })
			.unwrap();
		assert_eq!(done.phase(), Phase::Success);
		assert!(done.tx_receipts().is_empty());
	}

	#[test]
	fn test_zero_approvals_start_at_terminal() {
		let state = executing(0);
		assert_eq!(state.phase(), Phase::Execute);
		assert_eq!(state.completed_approvals(), 0);
		assert_eq!(state.total_approvals(), 0);
		assert_eq!(state.next_step(), Some(Step::Terminal));
	}

	#[test]
	fn test_resume_submits_exactly_the_cursor() {
		for total in 1..5 {
			for k in 0..total {
				let state = ExecutionState::resume(k, total);
				assert_eq!(state.next_step(), Some(Step::Approval(k)));
				assert!(state.apply(confirmed(k + 1)).is_err());
				if k > 0 {
					assert!(state.apply(confirmed(k - 1)).is_err());
				}
			}
		}
	}

	#[test]
	fn test_failure_keeps_cursor() {
		let state = executing(3).apply(confirmed(0)).unwrap();

		let failed = state.apply(failure(Phase::Execute)).unwrap();
		assert_eq!(failed.phase(), Phase::Execute);
		assert_eq!(failed.cursor(), 1);
		assert_eq!(failed.next_step(), Some(Step::Approval(1)));
		assert!(failed.last_error().is_some());

		let retried = failed.apply(confirmed(1)).unwrap();
		assert_eq!(retried.cursor(), 2);
		assert!(retried.last_error().is_none());
	}

	#[test]
	fn test_nothing_valid_closes() {
		let state = ExecutionState::new()
			.apply(Transition::Validated { valid: 0 })
			.unwrap();
		assert_eq!(state.phase(), Phase::Closed);
		assert!(state
			.apply(Transition::PlanCompiled { total_approvals: 0 })
			.is_err());
	}

	#[test]
	fn test_terminal_requires_all_approvals() {
		let state = executing(1);
		assert_eq!(
			state.apply(Transition::TerminalConfirmed { receipt: None }),
			Err(StateError::ApprovalsOutstanding { remaining: 1 })
		);
	}

	#[test]
	fn test_compilation_failure_stays_in_confirm() {
		let state = ExecutionState::new()
			.apply(Transition::Validated { valid: 2 })
			.unwrap()
			.apply(failure(Phase::Confirm))
			.unwrap();
		assert_eq!(state.phase(), Phase::Confirm);
		assert_eq!(state.next_step(), None);
	}

	#[test]
	fn test_apply_is_pure() {
		let state = executing(1);
		let _ = state.apply(confirmed(0));
		assert_eq!(state.cursor(), 0);
		assert!(state.tx_receipts().is_empty());
	}

	#[test]
	fn test_finished_states_reject_transitions() {
		let done = executing(0)
			.apply(Transition::TerminalConfirmed {
				receipt: Some(receipt(1)),
			})
			.unwrap();
		assert!(done.apply(Transition::Dismissed).is_err());
		assert!(done.apply(failure(Phase::Execute)).is_err());
	}
}
