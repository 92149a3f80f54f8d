// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use serde_json::json;
use splitbill_server_db::ScheduledTaskStore;
use splitbill_server_jobs::{TaskArguments, TaskContext, TaskError, TaskHandler, TaskResult};
use std::sync::Arc;

/// Smoke-test handler: always succeeds with a fixed payload.
pub struct ExampleTask;

impl ExampleTask {
	pub const NAME: &'static str = "example_task";
}

#[async_trait]
impl TaskHandler for ExampleTask {
	async fn handle(
		&self,
		ctx: &TaskContext,
		_store: Arc<dyn ScheduledTaskStore>,
		args: TaskArguments,
	) -> Result<TaskResult, TaskError> {
		tracing::debug!(task_id = ctx.task_id, args = ?args, "executing example_task");

		let mut result = TaskResult::new();
		result.insert("status".to_string(), json!("success"));
		result.insert("message".to_string(), json!("Example task executed"));
		Ok(result)
	}
}
