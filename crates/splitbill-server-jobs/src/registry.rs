// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use splitbill_server_db::ScheduledTaskStore;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};

use crate::context::TaskContext;
use crate::error::TaskError;
use crate::handler::{handler_fn, TaskHandler};
use crate::types::{TaskArguments, TaskResult};

/// Name to handler mapping shared between startup code and the executor.
///
/// Usually populated once before the dispatcher starts; lookups stay safe
/// while a registration is in progress.
#[derive(Default)]
pub struct HandlerRegistry {
	handlers: RwLock<HashMap<String, Arc<dyn TaskHandler>>>,
}

impl HandlerRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Store `handler` under `name`. The last registration for a name wins and
	/// the replaced handler is returned.
	pub fn register(
		&self,
		name: impl Into<String>,
		handler: Arc<dyn TaskHandler>,
	) -> Option<Arc<dyn TaskHandler>> {
		let name = name.into();
		let previous = self
			.handlers
			.write()
			.unwrap_or_else(PoisonError::into_inner)
			.insert(name.clone(), handler);

		if previous.is_some() {
			warn!(task_name = %name, "Replacing previously registered task handler");
		} else {
			debug!(task_name = %name, "Registered task handler");
		}
		previous
	}

	pub fn register_fn<F, Fut>(&self, name: impl Into<String>, f: F) -> Option<Arc<dyn TaskHandler>>
	where
		F: Fn(TaskContext, Arc<dyn ScheduledTaskStore>, TaskArguments) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<TaskResult, TaskError>> + Send + 'static,
	{
		self.register(name, Arc::new(handler_fn(f)))
	}

	pub fn resolve(&self, name: &str) -> Option<Arc<dyn TaskHandler>> {
		self
			.handlers
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.get(name)
			.cloned()
	}

	pub fn contains(&self, name: &str) -> bool {
		self
			.handlers
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.contains_key(name)
	}

	/// Registered names in sorted order.
	pub fn names(&self) -> Vec<String> {
		let mut names: Vec<String> = self
			.handlers
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.keys()
			.cloned()
			.collect();
		names.sort();
		names
	}

	pub fn len(&self) -> usize {
		self
			.handlers
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}
