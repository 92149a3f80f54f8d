// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use splitbill_server_db::DbError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TaskError>;

#[derive(Debug, Error)]
pub enum TaskError {
	#[error("handler not found: {0}")]
	HandlerNotFound(String),

	#[error("{0}")]
	HandlerFailed(String),

	#[error("handler panicked: {0}")]
	HandlerPanicked(String),

	#[error("invalid task arguments: {0}")]
	InvalidArguments(String),

	#[error("invalid recurrence rule: {0}")]
	InvalidRecurrence(String),

	#[error("persistence error: {0}")]
	Persistence(#[from] DbError),

	#[error("shutdown requested")]
	ShutdownRequested,
}

impl TaskError {
	/// Shorthand used by handlers to report a retryable failure.
	pub fn failed(message: impl Into<String>) -> Self {
		TaskError::HandlerFailed(message.into())
	}
}
