// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::error::{DbError, Result};

/// Open key/value mapping stored as a JSON object.
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduledTaskStatus {
	Active,
	Done,
	Failure,
	Disabled,
}

impl ScheduledTaskStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			ScheduledTaskStatus::Active => "active",
			ScheduledTaskStatus::Done => "done",
			ScheduledTaskStatus::Failure => "failure",
			ScheduledTaskStatus::Disabled => "disabled",
		}
	}
}

impl std::str::FromStr for ScheduledTaskStatus {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s {
			"active" => Ok(ScheduledTaskStatus::Active),
			"done" => Ok(ScheduledTaskStatus::Done),
			"failure" => Ok(ScheduledTaskStatus::Failure),
			"disabled" => Ok(ScheduledTaskStatus::Disabled),
			_ => Err(format!("unknown scheduled task status: {s}")),
		}
	}
}

impl std::fmt::Display for ScheduledTaskStatus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScheduledTaskType {
	#[serde(rename = "onetime")]
	OneTime,
	#[serde(rename = "recurring")]
	Recurring,
}

impl ScheduledTaskType {
	pub fn as_str(&self) -> &'static str {
		match self {
			ScheduledTaskType::OneTime => "onetime",
			ScheduledTaskType::Recurring => "recurring",
		}
	}
}

impl std::str::FromStr for ScheduledTaskType {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s {
			"onetime" | "one_time" => Ok(ScheduledTaskType::OneTime),
			"recurring" => Ok(ScheduledTaskType::Recurring),
			_ => Err(format!("unknown scheduled task type: {s}")),
		}
	}
}

impl std::fmt::Display for ScheduledTaskType {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A unit of deferred work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
	pub id: i64,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
	pub task_name: String,
	pub arguments: JsonMap,
	pub last_run: Option<DateTime<Utc>>,
	pub due: DateTime<Utc>,
	pub recurring_interval: Option<String>,
	pub status: ScheduledTaskStatus,
	pub task_type: ScheduledTaskType,
	pub max_attempt: u32,
}

/// Fields supplied by a caller creating a task. Status is always `active` on insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewScheduledTask {
	pub task_name: String,
	pub arguments: JsonMap,
	pub due: DateTime<Utc>,
	pub recurring_interval: Option<String>,
	pub task_type: ScheduledTaskType,
	pub max_attempt: u32,
}

impl NewScheduledTask {
	pub fn one_time(task_name: impl Into<String>, arguments: JsonMap, due: DateTime<Utc>) -> Self {
		Self {
			task_name: task_name.into(),
			arguments,
			due,
			recurring_interval: None,
			task_type: ScheduledTaskType::OneTime,
			max_attempt: 3,
		}
	}

	pub fn recurring(
		task_name: impl Into<String>,
		arguments: JsonMap,
		due: DateTime<Utc>,
		rule: impl Into<String>,
	) -> Self {
		Self {
			task_name: task_name.into(),
			arguments,
			due,
			recurring_interval: Some(rule.into()),
			task_type: ScheduledTaskType::Recurring,
			max_attempt: 3,
		}
	}

	pub fn with_max_attempt(mut self, max_attempt: u32) -> Self {
		self.max_attempt = max_attempt;
		self
	}

	/// Check the shape invariants of a task record before it is persisted.
	pub fn validate(&self) -> Result<()> {
		if self.task_name.trim().is_empty() {
			return Err(DbError::Validation("task_name must not be empty".to_string()));
		}
		if self.max_attempt == 0 {
			return Err(DbError::Validation("max_attempt must be at least 1".to_string()));
		}

		let has_rule = self
			.recurring_interval
			.as_deref()
			.is_some_and(|rule| !rule.trim().is_empty());
		match (self.task_type, has_rule) {
			(ScheduledTaskType::OneTime, true) => Err(DbError::Validation(
				"recurring_interval is only allowed for recurring tasks".to_string(),
			)),
			(ScheduledTaskType::Recurring, false) => Err(DbError::Validation(
				"recurring tasks require a recurring_interval".to_string(),
			)),
			_ => Ok(()),
		}
	}
}

/// Partial update applied by the execution engine. `None` leaves a column untouched.
///
/// When `expected_status` is set the update only applies while the row still
/// has that status; otherwise it fails with [`DbError::Conflict`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
	pub status: Option<ScheduledTaskStatus>,
	pub due: Option<DateTime<Utc>>,
	pub last_run: Option<DateTime<Utc>>,
	pub expected_status: Option<ScheduledTaskStatus>,
}

impl TaskUpdate {
	pub fn is_empty(&self) -> bool {
		self.status.is_none() && self.due.is_none() && self.last_run.is_none()
	}

	pub fn expecting(mut self, status: ScheduledTaskStatus) -> Self {
		self.expected_status = Some(status);
		self
	}
}

/// One immutable record per execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTaskHistory {
	pub id: i64,
	pub created_at: DateTime<Utc>,
	pub scheduled_task_id: i64,
	pub task_name: String,
	pub run_at: DateTime<Utc>,
	pub runtime_ms: i64,
	pub status: String,
	pub attempt_number: u32,
	pub arguments: JsonMap,
	pub result: JsonMap,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewTaskHistory {
	pub scheduled_task_id: i64,
	pub task_name: String,
	pub run_at: DateTime<Utc>,
	pub runtime_ms: i64,
	pub status: String,
	pub attempt_number: u32,
	pub arguments: JsonMap,
	pub result: JsonMap,
}

type TaskRow = (
	i64,
	String,
	String,
	String,
	String,
	Option<String>,
	String,
	Option<String>,
	String,
	String,
	i64,
);

type HistoryRow = (
	i64,
	String,
	i64,
	String,
	String,
	i64,
	String,
	i64,
	String,
	String,
);

const TASK_COLUMNS: &str = "id, created_at, updated_at, task_name, arguments, last_run, due, recurring_interval, status, task_type, max_attempt";

const HISTORY_COLUMNS: &str = "id, created_at, scheduled_task_id, task_name, run_at, runtime, status, attempt_number, arguments, result";

/// Timestamps are stored as fixed-width UTC RFC 3339 text so that SQL
/// comparisons on `due` order correctly.
fn format_ts(ts: DateTime<Utc>) -> String {
	ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
	DateTime::parse_from_rfc3339(raw)
		.map(|ts| ts.with_timezone(&Utc))
		.map_err(|e| DbError::Internal(format!("invalid timestamp '{raw}': {e}")))
}

fn parse_map(raw: &str) -> Result<JsonMap> {
	match serde_json::from_str::<serde_json::Value>(raw)? {
		serde_json::Value::Object(map) => Ok(map),
		serde_json::Value::Null => Ok(JsonMap::new()),
		other => Err(DbError::Internal(format!(
			"expected JSON object, found {other}"
		))),
	}
}

fn task_from_row(row: TaskRow) -> Result<ScheduledTask> {
	let (
		id,
		created_at,
		updated_at,
		task_name,
		arguments,
		last_run,
		due,
		recurring_interval,
		status,
		task_type,
		max_attempt,
	) = row;

	Ok(ScheduledTask {
		id,
		created_at: parse_ts(&created_at)?,
		updated_at: parse_ts(&updated_at)?,
		task_name,
		arguments: parse_map(&arguments)?,
		last_run: last_run.as_deref().map(parse_ts).transpose()?,
		due: parse_ts(&due)?,
		recurring_interval,
		status: status.parse().map_err(DbError::Internal)?,
		task_type: task_type.parse().map_err(DbError::Internal)?,
		max_attempt: u32::try_from(max_attempt)
			.map_err(|_| DbError::Internal(format!("invalid max_attempt {max_attempt}")))?,
	})
}

fn history_from_row(row: HistoryRow) -> Result<ScheduledTaskHistory> {
	let (
		id,
		created_at,
		scheduled_task_id,
		task_name,
		run_at,
		runtime_ms,
		status,
		attempt_number,
		arguments,
		result,
	) = row;

	Ok(ScheduledTaskHistory {
		id,
		created_at: parse_ts(&created_at)?,
		scheduled_task_id,
		task_name,
		run_at: parse_ts(&run_at)?,
		runtime_ms,
		status,
		attempt_number: u32::try_from(attempt_number)
			.map_err(|_| DbError::Internal(format!("invalid attempt_number {attempt_number}")))?,
		arguments: parse_map(&arguments)?,
		result: parse_map(&result)?,
	})
}

#[derive(Clone)]
pub struct ScheduledTaskRepository {
	pool: SqlitePool,
}

impl ScheduledTaskRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	pub fn pool(&self) -> &SqlitePool {
		&self.pool
	}

	#[tracing::instrument(skip(self, task), fields(task_name = %task.task_name))]
	pub async fn create_task(&self, task: &NewScheduledTask) -> Result<ScheduledTask> {
		task.validate()?;

		let now = format_ts(Utc::now());
		let arguments = serde_json::to_string(&task.arguments)?;
		let result = sqlx::query(
			r#"
            INSERT INTO scheduled_tasks (created_at, updated_at, task_name, arguments, due, recurring_interval, status, task_type, max_attempt)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
		)
		.bind(&now)
		.bind(&now)
		.bind(&task.task_name)
		.bind(arguments)
		.bind(format_ts(task.due))
		.bind(task.recurring_interval.as_deref())
		.bind(ScheduledTaskStatus::Active.as_str())
		.bind(task.task_type.as_str())
		.bind(i64::from(task.max_attempt))
		.execute(&self.pool)
		.await?;

		let id = result.last_insert_rowid();
		self
			.get_task(id)
			.await?
			.ok_or_else(|| DbError::Internal(format!("task {id} missing after insert")))
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_task(&self, id: i64) -> Result<Option<ScheduledTask>> {
		let row = sqlx::query_as::<_, TaskRow>(&format!(
			"SELECT {TASK_COLUMNS} FROM scheduled_tasks WHERE id = ? AND deleted_at IS NULL"
		))
		.bind(id)
		.fetch_optional(&self.pool)
		.await?;

		row.map(task_from_row).transpose()
	}

	#[tracing::instrument(skip(self))]
	pub async fn list_due_tasks(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledTask>> {
		let rows = sqlx::query_as::<_, TaskRow>(&format!(
			r#"
            SELECT {TASK_COLUMNS}
            FROM scheduled_tasks
            WHERE status = ? AND due <= ? AND deleted_at IS NULL
            ORDER BY due ASC, id ASC
            "#
		))
		.bind(ScheduledTaskStatus::Active.as_str())
		.bind(format_ts(now))
		.fetch_all(&self.pool)
		.await?;

		rows.into_iter().map(task_from_row).collect()
	}

	#[tracing::instrument(skip(self))]
	pub async fn list_tasks(
		&self,
		status: Option<ScheduledTaskStatus>,
		limit: u32,
		offset: u32,
	) -> Result<Vec<ScheduledTask>> {
		let rows = sqlx::query_as::<_, TaskRow>(&format!(
			r#"
            SELECT {TASK_COLUMNS}
            FROM scheduled_tasks
            WHERE deleted_at IS NULL AND (? IS NULL OR status = ?)
            ORDER BY id ASC
            LIMIT ? OFFSET ?
            "#
		))
		.bind(status.map(|s| s.as_str()))
		.bind(status.map(|s| s.as_str()))
		.bind(i64::from(limit))
		.bind(i64::from(offset))
		.fetch_all(&self.pool)
		.await?;

		rows.into_iter().map(task_from_row).collect()
	}

	#[tracing::instrument(skip(self, update))]
	pub async fn update_task(&self, id: i64, update: &TaskUpdate) -> Result<()> {
		if update.is_empty() {
			return Ok(());
		}

		let result = sqlx::query(
			r#"
            UPDATE scheduled_tasks
            SET status = COALESCE(?, status),
                due = COALESCE(?, due),
                last_run = COALESCE(?, last_run),
                updated_at = ?
            WHERE id = ? AND deleted_at IS NULL
              AND (? IS NULL OR status = ?)
            "#,
		)
		.bind(update.status.map(|s| s.as_str()))
		.bind(update.due.map(format_ts))
		.bind(update.last_run.map(format_ts))
		.bind(format_ts(Utc::now()))
		.bind(id)
		.bind(update.expected_status.map(|s| s.as_str()))
		.bind(update.expected_status.map(|s| s.as_str()))
		.execute(&self.pool)
		.await?;

		if result.rows_affected() == 0 {
			return match (update.expected_status, self.get_task(id).await?) {
				(Some(expected), Some(current)) => Err(DbError::Conflict(format!(
					"scheduled task {id} is {}, expected {expected}",
					current.status
				))),
				_ => Err(DbError::NotFound(format!("scheduled task {id}"))),
			};
		}

		Ok(())
	}

	#[tracing::instrument(skip(self))]
	pub async fn set_status(&self, id: i64, status: ScheduledTaskStatus) -> Result<()> {
		self
			.update_task(
				id,
				&TaskUpdate {
					status: Some(status),
					..Default::default()
				},
			)
			.await
	}

	#[tracing::instrument(skip(self))]
	pub async fn soft_delete_task(&self, id: i64) -> Result<()> {
		let now = format_ts(Utc::now());
		let result = sqlx::query(
			"UPDATE scheduled_tasks SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
		)
		.bind(&now)
		.bind(&now)
		.bind(id)
		.execute(&self.pool)
		.await?;

		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!("scheduled task {id}")));
		}

		Ok(())
	}

	#[tracing::instrument(
		skip(self, entry),
		fields(task_id = entry.scheduled_task_id, attempt = entry.attempt_number, status = %entry.status)
	)]
	pub async fn record_history(&self, entry: &NewTaskHistory) -> Result<ScheduledTaskHistory> {
		let created_at = Utc::now();
		let result = sqlx::query(
			r#"
            INSERT INTO scheduled_task_histories (created_at, scheduled_task_id, task_name, run_at, runtime, status, attempt_number, arguments, result)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
		)
		.bind(format_ts(created_at))
		.bind(entry.scheduled_task_id)
		.bind(&entry.task_name)
		.bind(format_ts(entry.run_at))
		.bind(entry.runtime_ms)
		.bind(&entry.status)
		.bind(i64::from(entry.attempt_number))
		.bind(serde_json::to_string(&entry.arguments)?)
		.bind(serde_json::to_string(&entry.result)?)
		.execute(&self.pool)
		.await?;

		Ok(ScheduledTaskHistory {
			id: result.last_insert_rowid(),
			created_at,
			scheduled_task_id: entry.scheduled_task_id,
			task_name: entry.task_name.clone(),
			run_at: entry.run_at,
			runtime_ms: entry.runtime_ms,
			status: entry.status.clone(),
			attempt_number: entry.attempt_number,
			arguments: entry.arguments.clone(),
			result: entry.result.clone(),
		})
	}

	#[tracing::instrument(skip(self))]
	pub async fn list_history(
		&self,
		task_id: i64,
		limit: u32,
		offset: u32,
	) -> Result<Vec<ScheduledTaskHistory>> {
		let rows = sqlx::query_as::<_, HistoryRow>(&format!(
			r#"
            SELECT {HISTORY_COLUMNS}
            FROM scheduled_task_histories
            WHERE scheduled_task_id = ?
            ORDER BY id ASC
            LIMIT ? OFFSET ?
            "#
		))
		.bind(task_id)
		.bind(i64::from(limit))
		.bind(i64::from(offset))
		.fetch_all(&self.pool)
		.await?;

		rows.into_iter().map(history_from_row).collect()
	}
}

/// Persistence contract consumed by the scheduling engine.
#[async_trait]
pub trait ScheduledTaskStore: Send + Sync {
	async fn create_task(&self, task: &NewScheduledTask) -> Result<ScheduledTask>;
	async fn get_task(&self, id: i64) -> Result<Option<ScheduledTask>>;
	async fn list_due_tasks(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledTask>>;
	async fn list_tasks(
		&self,
		status: Option<ScheduledTaskStatus>,
		limit: u32,
		offset: u32,
	) -> Result<Vec<ScheduledTask>>;
	async fn update_task(&self, id: i64, update: &TaskUpdate) -> Result<()>;
	async fn set_status(&self, id: i64, status: ScheduledTaskStatus) -> Result<()>;
	async fn soft_delete_task(&self, id: i64) -> Result<()>;
	async fn record_history(&self, entry: &NewTaskHistory) -> Result<ScheduledTaskHistory>;
	async fn list_history(
		&self,
		task_id: i64,
		limit: u32,
		offset: u32,
	) -> Result<Vec<ScheduledTaskHistory>>;
}

#[async_trait]
impl ScheduledTaskStore for ScheduledTaskRepository {
	async fn create_task(&self, task: &NewScheduledTask) -> Result<ScheduledTask> {
		self.create_task(task).await
	}

	async fn get_task(&self, id: i64) -> Result<Option<ScheduledTask>> {
		self.get_task(id).await
	}

	async fn list_due_tasks(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledTask>> {
		self.list_due_tasks(now).await
	}

	async fn list_tasks(
		&self,
		status: Option<ScheduledTaskStatus>,
		limit: u32,
		offset: u32,
	) -> Result<Vec<ScheduledTask>> {
		self.list_tasks(status, limit, offset).await
	}

	async fn update_task(&self, id: i64, update: &TaskUpdate) -> Result<()> {
		self.update_task(id, update).await
	}

	async fn set_status(&self, id: i64, status: ScheduledTaskStatus) -> Result<()> {
		self.set_status(id, status).await
	}

	async fn soft_delete_task(&self, id: i64) -> Result<()> {
		self.soft_delete_task(id).await
	}

	async fn record_history(&self, entry: &NewTaskHistory) -> Result<ScheduledTaskHistory> {
		self.record_history(entry).await
	}

	async fn list_history(
		&self,
		task_id: i64,
		limit: u32,
		offset: u32,
	) -> Result<Vec<ScheduledTaskHistory>> {
		self.list_history(task_id, limit, offset).await
	}
}
