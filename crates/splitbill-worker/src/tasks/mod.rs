// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

mod example_task;
mod log_info;

pub use example_task::ExampleTask;
pub use log_info::LogInfoTask;

use splitbill_server_jobs::HandlerRegistry;
use std::sync::Arc;

/// Register the handlers shipped with the worker.
pub fn register_builtin_tasks(registry: &HandlerRegistry) {
	registry.register(LogInfoTask::NAME, Arc::new(LogInfoTask));
	registry.register(ExampleTask::NAME, Arc::new(ExampleTask));
}
