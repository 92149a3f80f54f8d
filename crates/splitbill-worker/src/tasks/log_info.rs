// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use serde_json::json;
use splitbill_server_db::ScheduledTaskStore;
use splitbill_server_jobs::{TaskArguments, TaskContext, TaskError, TaskHandler, TaskResult};
use std::sync::Arc;

const DEFAULT_MESSAGE: &str = "No message provided";

/// Writes the `message` argument to the log.
pub struct LogInfoTask;

impl LogInfoTask {
	pub const NAME: &'static str = "log_info";
}

#[async_trait]
impl TaskHandler for LogInfoTask {
	async fn handle(
		&self,
		ctx: &TaskContext,
		_store: Arc<dyn ScheduledTaskStore>,
		args: TaskArguments,
	) -> Result<TaskResult, TaskError> {
		let message = args
			.get("message")
			.and_then(|v| v.as_str())
			.unwrap_or(DEFAULT_MESSAGE)
			.to_string();

		tracing::info!(task_id = ctx.task_id, attempt = ctx.attempt, message = %message, "log_info task");

		let mut result = TaskResult::new();
		result.insert("status".to_string(), json!("success"));
		result.insert("message".to_string(), json!(message));
		result.insert("max_attempts_info".to_string(), json!(ctx.max_attempt));
		Ok(result)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use splitbill_server_db::testing::create_task_test_pool;
	use splitbill_server_db::ScheduledTaskRepository;
	use splitbill_server_jobs::CancellationToken;

	fn ctx() -> TaskContext {
		TaskContext {
			task_id: 1,
			task_name: LogInfoTask::NAME.to_string(),
			attempt: 1,
			max_attempt: 5,
			cancellation_token: CancellationToken::new(),
		}
	}

	async fn store() -> Arc<dyn ScheduledTaskStore> {
		Arc::new(ScheduledTaskRepository::new(create_task_test_pool().await))
	}

	#[tokio::test]
	async fn test_echoes_message() {
		let mut args = TaskArguments::new();
		args.insert("message".to_string(), json!("rent reminder sent"));

		let result = LogInfoTask.handle(&ctx(), store().await, args).await.unwrap();
		assert_eq!(result["status"], json!("success"));
		assert_eq!(result["message"], json!("rent reminder sent"));
		assert_eq!(result["max_attempts_info"], json!(5));
	}

	#[tokio::test]
	async fn test_missing_message_uses_default() {
		let mut args = TaskArguments::new();
		args.insert("message".to_string(), json!(42));

		let result = LogInfoTask
			.handle(&ctx(), store().await, args)
			.await
			.unwrap();
		assert_eq!(result["message"], json!(DEFAULT_MESSAGE));
	}
}
