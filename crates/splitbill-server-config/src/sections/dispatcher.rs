// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Dispatcher polling, admission width and retry backoff.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DispatcherConfigLayer {
	pub poll_interval_secs: Option<u64>,
	pub max_concurrent_tasks: Option<usize>,
	pub retry_base_delay_ms: Option<u64>,
	pub retry_max_delay_ms: Option<u64>,
}

impl DispatcherConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.poll_interval_secs.is_some() {
			self.poll_interval_secs = other.poll_interval_secs;
		}
		if other.max_concurrent_tasks.is_some() {
			self.max_concurrent_tasks = other.max_concurrent_tasks;
		}
		if other.retry_base_delay_ms.is_some() {
			self.retry_base_delay_ms = other.retry_base_delay_ms;
		}
		if other.retry_max_delay_ms.is_some() {
			self.retry_max_delay_ms = other.retry_max_delay_ms;
		}
	}

	pub fn finalize(self) -> DispatcherConfig {
		let defaults = DispatcherConfig::default();
		DispatcherConfig {
			poll_interval_secs: self.poll_interval_secs.unwrap_or(defaults.poll_interval_secs),
			max_concurrent_tasks: self
				.max_concurrent_tasks
				.unwrap_or(defaults.max_concurrent_tasks),
			retry_base_delay_ms: self.retry_base_delay_ms.unwrap_or(defaults.retry_base_delay_ms),
			retry_max_delay_ms: self.retry_max_delay_ms.unwrap_or(defaults.retry_max_delay_ms),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispatcherConfig {
	pub poll_interval_secs: u64,
	pub max_concurrent_tasks: usize,
	/// Zero keeps retries immediate.
	pub retry_base_delay_ms: u64,
	pub retry_max_delay_ms: u64,
}

impl DispatcherConfig {
	pub fn poll_interval(&self) -> Duration {
		Duration::from_secs(self.poll_interval_secs)
	}

	pub fn retry_base_delay(&self) -> Duration {
		Duration::from_millis(self.retry_base_delay_ms)
	}

	pub fn retry_max_delay(&self) -> Duration {
		Duration::from_millis(self.retry_max_delay_ms)
	}
}

impl Default for DispatcherConfig {
	fn default() -> Self {
		Self {
			poll_interval_secs: 60,
			max_concurrent_tasks: 10,
			retry_base_delay_ms: 0,
			retry_max_delay_ms: 60_000,
		}
	}
}
