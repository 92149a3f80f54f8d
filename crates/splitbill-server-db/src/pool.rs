// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqliteSynchronous};
use std::str::FromStr;
use std::time::Duration;

use crate::error::DbError;

const SCHEMA: &[&str] = &[
	r#"
	CREATE TABLE IF NOT EXISTS scheduled_tasks (
		id INTEGER PRIMARY KEY AUTOINCREMENT,
		created_at TEXT NOT NULL,
		updated_at TEXT NOT NULL,
		deleted_at TEXT,
		task_name TEXT NOT NULL,
		arguments TEXT NOT NULL DEFAULT '{}',
		last_run TEXT,
		due TEXT NOT NULL,
		recurring_interval TEXT,
		status TEXT NOT NULL CHECK (status IN ('active', 'done', 'failure', 'disabled')),
		task_type TEXT NOT NULL DEFAULT 'onetime' CHECK (task_type IN ('onetime', 'recurring')),
		max_attempt INTEGER NOT NULL CHECK (max_attempt >= 1)
	)
	"#,
	r#"
	CREATE INDEX IF NOT EXISTS idx_scheduled_tasks_status_due
		ON scheduled_tasks(status, due)
		WHERE deleted_at IS NULL
	"#,
	r#"
	CREATE TABLE IF NOT EXISTS scheduled_task_histories (
		id INTEGER PRIMARY KEY AUTOINCREMENT,
		created_at TEXT NOT NULL,
		scheduled_task_id INTEGER NOT NULL REFERENCES scheduled_tasks(id),
		task_name TEXT NOT NULL,
		run_at TEXT NOT NULL,
		runtime INTEGER NOT NULL DEFAULT 0,
		status TEXT NOT NULL,
		attempt_number INTEGER NOT NULL,
		arguments TEXT NOT NULL DEFAULT '{}',
		result TEXT NOT NULL DEFAULT '{}'
	)
	"#,
	r#"
	CREATE INDEX IF NOT EXISTS idx_scheduled_task_histories_task
		ON scheduled_task_histories(scheduled_task_id)
	"#,
];

/// Create a SqlitePool with WAL mode and common settings.
///
/// # Arguments
/// * `database_url` - SQLite connection string (e.g., "sqlite:./splitbill.db")
///
/// # Errors
/// Returns `DbError::Internal` if the URL is invalid or connection fails.
#[tracing::instrument(skip(database_url))]
pub async fn create_pool(database_url: &str) -> Result<SqlitePool, DbError> {
	let options = SqliteConnectOptions::from_str(database_url)
		.map_err(|e| DbError::Internal(format!("Invalid database URL: {e}")))?
		.journal_mode(SqliteJournalMode::Wal)
		.synchronous(SqliteSynchronous::Normal)
		.busy_timeout(Duration::from_secs(5))
		.create_if_missing(true);

	let pool = SqlitePool::connect_with(options).await?;

	tracing::debug!("database pool created");
	Ok(pool)
}

/// Create the task store schema. Safe to run on every start.
#[tracing::instrument(skip(pool))]
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), DbError> {
	for statement in SCHEMA {
		sqlx::query(statement).execute(pool).await?;
	}

	tracing::debug!("task store schema ready");
	Ok(())
}
