// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Entry points used by callers outside the engine to create and disable tasks.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use splitbill_server_db::ScheduledTaskStore;
use tracing::{info, instrument};

use crate::error::{Result, TaskError};
use crate::recurrence::validate_rule;
use crate::types::{NewScheduledTask, ScheduledTask, ScheduledTaskStatus, ScheduledTaskType};

/// Build a task record from any serializable argument value.
///
/// The arguments must serialize to a JSON object; `null` is accepted as an
/// empty mapping.
pub fn build_task<A: Serialize + ?Sized>(
	task_name: impl Into<String>,
	arguments: &A,
	due: DateTime<Utc>,
	recurring_interval: Option<String>,
	task_type: ScheduledTaskType,
	max_attempt: u32,
) -> Result<NewScheduledTask> {
	let arguments = match serde_json::to_value(arguments)
		.map_err(|e| TaskError::InvalidArguments(e.to_string()))?
	{
		Value::Object(map) => map,
		Value::Null => Default::default(),
		other => {
			return Err(TaskError::InvalidArguments(format!(
				"arguments must be an object, got {other}"
			)))
		}
	};

	Ok(NewScheduledTask {
		task_name: task_name.into(),
		arguments,
		due,
		recurring_interval: recurring_interval.filter(|rule| !rule.trim().is_empty()),
		task_type,
		max_attempt,
	})
}

/// Validate and persist a new task with `status = active`.
#[instrument(skip(store, task), fields(task_name = %task.task_name, due = %task.due))]
pub async fn schedule_task(
	store: &dyn ScheduledTaskStore,
	task: &NewScheduledTask,
) -> Result<ScheduledTask> {
	task.validate()?;
	if let (ScheduledTaskType::Recurring, Some(rule)) =
		(task.task_type, task.recurring_interval.as_deref())
	{
		validate_rule(rule, task.due)?;
	}

	let created = store.create_task(task).await?;
	info!(task_id = created.id, "Scheduled task created");
	Ok(created)
}

/// Stop a task from being dispatched again. Running attempts are not interrupted.
#[instrument(skip(store))]
pub async fn disable_task(store: &dyn ScheduledTaskStore, task_id: i64) -> Result<()> {
	store.set_status(task_id, ScheduledTaskStatus::Disabled).await?;
	info!("Scheduled task disabled");
	Ok(())
}
