// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use splitbill_server_db::ScheduledTaskStore;
use std::future::Future;
use std::sync::Arc;

use crate::context::TaskContext;
use crate::error::TaskError;
use crate::types::{TaskArguments, TaskResult};

/// Task logic resolved by name from the [`HandlerRegistry`](crate::HandlerRegistry).
///
/// Handlers receive a copy of the task arguments with `max_attempt` injected.
/// They must not change the task row's status; the executor owns every state
/// transition. Returning `Err` marks the attempt as failed and lets the
/// executor retry while attempts remain.
#[async_trait]
pub trait TaskHandler: Send + Sync {
	async fn handle(
		&self,
		ctx: &TaskContext,
		store: Arc<dyn ScheduledTaskStore>,
		args: TaskArguments,
	) -> Result<TaskResult, TaskError>;
}

/// Adapter turning an async closure into a [`TaskHandler`].
pub struct FnHandler<F> {
	f: F,
}

/// Wrap an async closure so it can be registered as a handler.
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
	F: Fn(TaskContext, Arc<dyn ScheduledTaskStore>, TaskArguments) -> Fut + Send + Sync,
	Fut: Future<Output = Result<TaskResult, TaskError>> + Send + 'static,
{
	FnHandler { f }
}

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
	F: Fn(TaskContext, Arc<dyn ScheduledTaskStore>, TaskArguments) -> Fut + Send + Sync,
	Fut: Future<Output = Result<TaskResult, TaskError>> + Send + 'static,
{
	async fn handle(
		&self,
		ctx: &TaskContext,
		store: Arc<dyn ScheduledTaskStore>,
		args: TaskArguments,
	) -> Result<TaskResult, TaskError> {
		(self.f)(ctx.clone(), store, args).await
	}
}
