// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::{DateTime, Utc};
use serde::Serialize;

pub use splitbill_server_db::{
	JsonMap, NewScheduledTask, NewTaskHistory, ScheduledTask, ScheduledTaskHistory,
	ScheduledTaskStatus, ScheduledTaskType, TaskUpdate,
};

/// Arguments handed to a handler: the stored mapping plus `max_attempt`.
pub type TaskArguments = JsonMap;

/// Result mapping returned by a handler and snapshotted into history.
pub type TaskResult = JsonMap;

/// Argument key injected with the task's retry budget before every attempt.
pub const MAX_ATTEMPT_ARG: &str = "max_attempt";

/// Outcome label written to `scheduled_task_histories.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
	Success,
	Failure,
	HandlerNotFound,
}

impl AttemptStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			AttemptStatus::Success => "success",
			AttemptStatus::Failure => "failure",
			AttemptStatus::HandlerNotFound => "handler_not_found",
		}
	}
}

impl std::fmt::Display for AttemptStatus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Final result of one due-cycle of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
	/// The handler succeeded. `next_due` is set when a recurring task stays active.
	Succeeded {
		attempts: u32,
		next_due: Option<DateTime<Utc>>,
	},
	Failed {
		attempts: u32,
	},
	HandlerNotFound,
}

impl TaskOutcome {
	pub fn attempts(&self) -> u32 {
		match self {
			TaskOutcome::Succeeded { attempts, .. } | TaskOutcome::Failed { attempts } => *attempts,
			TaskOutcome::HandlerNotFound => 1,
		}
	}

	/// Status the task row is left in after this outcome.
	pub fn final_status(&self) -> ScheduledTaskStatus {
		match self {
			TaskOutcome::Succeeded {
				next_due: Some(_), ..
			} => ScheduledTaskStatus::Active,
			TaskOutcome::Succeeded { next_due: None, .. } => ScheduledTaskStatus::Done,
			TaskOutcome::Failed { .. } | TaskOutcome::HandlerNotFound => ScheduledTaskStatus::Failure,
		}
	}
}

/// Counters for one dispatcher tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
	pub found: usize,
	pub launched: usize,
	pub succeeded: usize,
	pub failed: usize,
	pub handler_not_found: usize,
	pub skipped: usize,
	pub panicked: usize,
}

impl BatchSummary {
	pub fn record(&mut self, outcome: &TaskOutcome) {
		match outcome {
			TaskOutcome::Succeeded { .. } => self.succeeded += 1,
			TaskOutcome::Failed { .. } => self.failed += 1,
			TaskOutcome::HandlerNotFound => self.handler_not_found += 1,
		}
	}

	pub fn completed(&self) -> usize {
		self.succeeded + self.failed + self.handler_not_found
	}
}
