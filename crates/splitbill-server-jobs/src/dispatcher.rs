// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument};

use crate::context::CancellationToken;
use crate::executor::TaskExecutor;
use crate::types::{BatchSummary, TaskOutcome};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_MAX_CONCURRENT_TASKS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
	pub poll_interval: Duration,
	pub max_concurrent_tasks: usize,
}

impl Default for DispatcherConfig {
	fn default() -> Self {
		Self {
			poll_interval: DEFAULT_POLL_INTERVAL,
			max_concurrent_tasks: DEFAULT_MAX_CONCURRENT_TASKS,
		}
	}
}

/// Polls the task store for due tasks and runs each batch under a bounded
/// admission pool.
///
/// A single dispatcher is assumed per store. Batches never overlap: the next
/// poll happens only after every task of the current batch has finished.
pub struct Dispatcher {
	executor: Arc<TaskExecutor>,
	config: DispatcherConfig,
}

impl Dispatcher {
	pub fn new(executor: Arc<TaskExecutor>, config: DispatcherConfig) -> Self {
		Self { executor, config }
	}

	pub fn config(&self) -> &DispatcherConfig {
		&self.config
	}

	/// Poll once immediately, then every `poll_interval`, until `token` is cancelled.
	///
	/// Cancellation stops new batches and new launches; tasks already running
	/// are allowed to finish before this returns.
	pub async fn run(&self, token: CancellationToken) {
		let period = self.config.poll_interval.max(Duration::from_millis(1));
		let mut interval = tokio::time::interval(period);
		interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

		info!(
			poll_interval_secs = period.as_secs(),
			max_concurrent_tasks = self.config.max_concurrent_tasks,
			"Dispatcher started"
		);

		loop {
			tokio::select! {
				biased;
				_ = token.cancelled() => {
					info!("Shutting down dispatcher");
					break;
				}
				_ = interval.tick() => {
					self.tick(&token).await;
				}
			}
		}

		info!("Dispatcher stopped");
	}

	/// Run one poll and drain the resulting batch.
	#[instrument(skip(self, token))]
	pub async fn tick(&self, token: &CancellationToken) -> BatchSummary {
		let mut summary = BatchSummary::default();

		if token.is_cancelled() {
			debug!("Shutdown requested, skipping poll");
			return summary;
		}

		let tasks = match self.executor.store().list_due_tasks(Utc::now()).await {
			Ok(tasks) => tasks,
			Err(e) => {
				error!(error = %e, "Failed to query due tasks");
				return summary;
			}
		};

		summary.found = tasks.len();
		if tasks.is_empty() {
			debug!("No due tasks");
			return summary;
		}
		info!(count = summary.found, "Dispatching due tasks");

		let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_tasks.max(1)));
		let mut running: JoinSet<TaskOutcome> = JoinSet::new();
		let mut pending = tasks.into_iter();

		while let Some(task) = pending.next() {
			let permit = tokio::select! {
				biased;
				_ = token.cancelled() => None,
				permit = Arc::clone(&semaphore).acquire_owned() => permit.ok(),
			};
			let Some(permit) = permit else {
				summary.skipped = 1 + pending.len();
				info!(skipped = summary.skipped, "Shutdown requested, not launching remaining tasks");
				break;
			};

			let executor = Arc::clone(&self.executor);
			let token = token.clone();
			running.spawn(async move {
				let _permit = permit;
				executor.execute(task, &token).await
			});
			summary.launched += 1;
		}

		while let Some(joined) = running.join_next().await {
			match joined {
				Ok(outcome) => summary.record(&outcome),
				Err(e) => {
					summary.panicked += 1;
					error!(error = %e, "Task execution aborted");
				}
			}
		}

		info!(
			found = summary.found,
			launched = summary.launched,
			succeeded = summary.succeeded,
			failed = summary.failed,
			handler_not_found = summary.handler_not_found,
			skipped = summary.skipped,
			panicked = summary.panicked,
			"Batch drained"
		);
		summary
	}
}
