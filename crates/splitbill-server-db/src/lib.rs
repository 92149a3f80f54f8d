// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Scheduled task store.
//!
//! Persists `ScheduledTask` job records and the append-only
//! `ScheduledTaskHistory` execution ledger in SQLite.

pub mod error;
pub mod pool;
pub mod scheduled_task;
pub mod testing;

pub use error::{DbError, Result};
pub use pool::{create_pool, run_migrations};
pub use scheduled_task::{
	JsonMap, NewScheduledTask, NewTaskHistory, ScheduledTask, ScheduledTaskHistory,
	ScheduledTaskRepository, ScheduledTaskStatus, ScheduledTaskStore, ScheduledTaskType, TaskUpdate,
};
