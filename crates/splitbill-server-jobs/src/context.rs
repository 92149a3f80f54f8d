// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Execution context handed to a task handler for one attempt.
#[derive(Debug, Clone)]
pub struct TaskContext {
	pub task_id: i64,
	pub task_name: String,
	pub attempt: u32,
	pub max_attempt: u32,
	pub cancellation_token: CancellationToken,
}

/// Cooperative shutdown signal shared by the dispatcher and every handler.
#[derive(Debug, Clone)]
pub struct CancellationToken {
	inner: Arc<TokenState>,
}

#[derive(Debug)]
struct TokenState {
	cancelled: AtomicBool,
	notify: Notify,
}

impl CancellationToken {
	pub fn new() -> Self {
		Self {
			inner: Arc::new(TokenState {
				cancelled: AtomicBool::new(false),
				notify: Notify::new(),
			}),
		}
	}

	pub fn cancel(&self) {
		self.inner.cancelled.store(true, Ordering::SeqCst);
		self.inner.notify.notify_waiters();
	}

	pub fn is_cancelled(&self) -> bool {
		self.inner.cancelled.load(Ordering::SeqCst)
	}

	/// Resolves once `cancel` has been called on any clone of this token.
	pub async fn cancelled(&self) {
		loop {
			let notified = self.inner.notify.notified();
			if self.is_cancelled() {
				return;
			}
			notified.await;
		}
	}
}

impl Default for CancellationToken {
	fn default() -> Self {
		Self::new()
	}
}
