// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Scheduled task engine.
//!
//! A [`Dispatcher`] polls the task store for due tasks and hands each one to
//! the [`TaskExecutor`], which resolves a handler from the
//! [`HandlerRegistry`], records one history row per attempt and moves the
//! task through its `active -> done | failure` state machine. Recurring
//! tasks are rescheduled from their RRULE via [`next_occurrence`].

pub mod context;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod handler;
pub mod recurrence;
pub mod registry;
pub mod scheduling;
pub mod types;

pub use context::{CancellationToken, TaskContext};
pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use error::{Result, TaskError};
pub use executor::{RetryPolicy, TaskExecutor};
pub use handler::{handler_fn, FnHandler, TaskHandler};
pub use recurrence::{next_occurrence, validate_rule};
pub use registry::HandlerRegistry;
pub use scheduling::{build_task, disable_task, schedule_task};
pub use types::{
	AttemptStatus, BatchSummary, JsonMap, NewScheduledTask, NewTaskHistory, ScheduledTask,
	ScheduledTaskHistory, ScheduledTaskStatus, ScheduledTaskType, TaskArguments, TaskOutcome,
	TaskResult, TaskUpdate, MAX_ATTEMPT_ARG,
};
