// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde_json::json;
use splitbill_server_db::{DbError, ScheduledTaskStore};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, instrument, warn};

use crate::context::{CancellationToken, TaskContext};
use crate::error::TaskError;
use crate::recurrence::next_occurrence;
use crate::registry::HandlerRegistry;
use crate::types::{
	AttemptStatus, NewTaskHistory, ScheduledTask, ScheduledTaskStatus, ScheduledTaskType,
	TaskArguments, TaskOutcome, TaskResult, TaskUpdate, MAX_ATTEMPT_ARG,
};

/// Delay inserted between failed attempts of one due-cycle.
///
/// The default policy retries immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryPolicy {
	pub base_delay: Duration,
	pub max_delay: Duration,
}

impl RetryPolicy {
	pub fn immediate() -> Self {
		Self::default()
	}

	pub fn exponential(base_delay: Duration, max_delay: Duration) -> Self {
		Self {
			base_delay,
			max_delay,
		}
	}

	/// Delay before retry number `retry_count` (1-based), doubling each time
	/// and capped at `max_delay`.
	pub fn delay_for(&self, retry_count: u32) -> Duration {
		if self.base_delay.is_zero() || retry_count == 0 {
			return Duration::ZERO;
		}
		let factor = 1u32.checked_shl(retry_count - 1).unwrap_or(u32::MAX);
		self.base_delay.saturating_mul(factor).min(self.max_delay)
	}
}

/// Runs one due-cycle of a task and advances its state machine.
///
/// The executor owns every status transition of an active task. Handler
/// errors are turned into history rows and never escape [`execute`];
/// storage failures are logged and skipped.
///
/// [`execute`]: TaskExecutor::execute
pub struct TaskExecutor {
	store: Arc<dyn ScheduledTaskStore>,
	registry: Arc<HandlerRegistry>,
	retry_policy: RetryPolicy,
}

impl TaskExecutor {
	pub fn new(store: Arc<dyn ScheduledTaskStore>, registry: Arc<HandlerRegistry>) -> Self {
		Self {
			store,
			registry,
			retry_policy: RetryPolicy::default(),
		}
	}

	pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
		self.retry_policy = retry_policy;
		self
	}

	pub fn store(&self) -> &Arc<dyn ScheduledTaskStore> {
		&self.store
	}

	#[instrument(
		skip(self, task, token),
		fields(task_id = task.id, task_name = %task.task_name, max_attempt = task.max_attempt)
	)]
	pub async fn execute(&self, task: ScheduledTask, token: &CancellationToken) -> TaskOutcome {
		let mut arguments = task.arguments.clone();
		arguments.insert(MAX_ATTEMPT_ARG.to_string(), json!(task.max_attempt));

		let Some(handler) = self.registry.resolve(&task.task_name) else {
			let err = TaskError::HandlerNotFound(task.task_name.clone());
			warn!(error = %err, "No handler registered for task");

			let now = Utc::now();
			self.write_history(
				&task,
				now,
				0,
				AttemptStatus::HandlerNotFound,
				1,
				&arguments,
				error_result(&err),
			)
			.await;
			self.apply_update(
				task.id,
				TaskUpdate {
					status: Some(ScheduledTaskStatus::Failure),
					last_run: Some(now),
					..Default::default()
				}
				.expecting(ScheduledTaskStatus::Active),
			)
			.await;
			return TaskOutcome::HandlerNotFound;
		};

		let max_attempt = task.max_attempt.max(1);
		let mut attempt = 1u32;

		loop {
			let ctx = TaskContext {
				task_id: task.id,
				task_name: task.task_name.clone(),
				attempt,
				max_attempt,
				cancellation_token: token.clone(),
			};

			let started_at = Utc::now();
			let timer = Instant::now();
			let result = AssertUnwindSafe(handler.handle(&ctx, Arc::clone(&self.store), arguments.clone()))
				.catch_unwind()
				.await
				.unwrap_or_else(|panic| Err(TaskError::HandlerPanicked(panic_message(panic.as_ref()))));
			let runtime_ms = i64::try_from(timer.elapsed().as_millis()).unwrap_or(i64::MAX);

			let (status, snapshot) = match result {
				Ok(output) => (AttemptStatus::Success, output),
				Err(e) => {
					warn!(attempt, runtime_ms, error = %e, "Task attempt failed");
					(AttemptStatus::Failure, error_result(&e))
				}
			};

			self.write_history(&task, started_at, runtime_ms, status, attempt, &arguments, snapshot)
				.await;
			self.apply_update(
				task.id,
				TaskUpdate {
					last_run: Some(started_at),
					..Default::default()
				},
			)
			.await;

			if status == AttemptStatus::Success {
				return self.finish_success(&task, attempt).await;
			}

			if attempt < max_attempt {
				attempt += 1;
				let delay = self.retry_policy.delay_for(attempt - 1);
				if !delay.is_zero() {
					info!(attempt, delay_ms = delay.as_millis() as u64, "Retrying task after backoff");
					tokio::select! {
						_ = tokio::time::sleep(delay) => {}
						_ = token.cancelled() => {}
					}
				}
				continue;
			}

			warn!(attempts = attempt, "Task exhausted its attempts");
			self.apply_update(
				task.id,
				TaskUpdate {
					status: Some(ScheduledTaskStatus::Failure),
					..Default::default()
				}
				.expecting(ScheduledTaskStatus::Active),
			)
			.await;
			return TaskOutcome::Failed { attempts: attempt };
		}
	}

	async fn finish_success(&self, task: &ScheduledTask, attempts: u32) -> TaskOutcome {
		let next_due = match (task.task_type, task.recurring_interval.as_deref()) {
			(ScheduledTaskType::Recurring, Some(rule)) => {
				let next = next_occurrence(rule, task.due, Utc::now());
				(next > task.due).then_some(next)
			}
			_ => None,
		};

		let update = match next_due {
			Some(due) => {
				info!(attempts, next_due = %due, "Recurring task rescheduled");
				TaskUpdate {
					status: Some(ScheduledTaskStatus::Active),
					due: Some(due),
					..Default::default()
				}
				.expecting(ScheduledTaskStatus::Active)
			}
			None => {
				info!(attempts, "Task done");
				TaskUpdate {
					status: Some(ScheduledTaskStatus::Done),
					..Default::default()
				}
				.expecting(ScheduledTaskStatus::Active)
			}
		};
		self.apply_update(task.id, update).await;

		TaskOutcome::Succeeded { attempts, next_due }
	}

	#[allow(clippy::too_many_arguments)]
	async fn write_history(
		&self,
		task: &ScheduledTask,
		run_at: DateTime<Utc>,
		runtime_ms: i64,
		status: AttemptStatus,
		attempt_number: u32,
		arguments: &TaskArguments,
		result: TaskResult,
	) {
		let entry = NewTaskHistory {
			scheduled_task_id: task.id,
			task_name: task.task_name.clone(),
			run_at,
			runtime_ms,
			status: status.as_str().to_string(),
			attempt_number,
			arguments: arguments.clone(),
			result,
		};
		if let Err(e) = self.store.record_history(&entry).await {
			error!(attempt = attempt_number, error = %e, "Failed to record task history");
		}
	}

	async fn apply_update(&self, task_id: i64, update: TaskUpdate) {
		match self.store.update_task(task_id, &update).await {
			Ok(()) => {}
			Err(DbError::Conflict(reason)) => {
				info!(task_id, reason = %reason, "Task status changed during execution, leaving it as is");
			}
			Err(e) => error!(task_id, error = %e, "Failed to update scheduled task"),
		}
	}
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
	panic
		.downcast_ref::<&str>()
		.map(|s| s.to_string())
		.or_else(|| panic.downcast_ref::<String>().cloned())
		.unwrap_or_else(|| "unknown panic payload".to_string())
}

fn error_result(err: &TaskError) -> TaskResult {
	let mut result = TaskResult::new();
	result.insert("error".to_string(), json!(err.to_string()));
	result
}
