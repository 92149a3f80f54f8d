// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! End-to-end behaviour of the dispatcher and execution engine against an
//! in-memory task store.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, SubsecRound, Utc};
use serde_json::json;
use splitbill_server_db::testing::create_task_test_pool;
use splitbill_server_db::{DbError, ScheduledTaskRepository, ScheduledTaskStore};
use splitbill_server_jobs::{
	disable_task, BatchSummary, CancellationToken, Dispatcher, DispatcherConfig, HandlerRegistry,
	JsonMap, NewScheduledTask, NewTaskHistory, ScheduledTask, ScheduledTaskHistory,
	ScheduledTaskStatus, TaskContext, TaskError, TaskExecutor, TaskOutcome, TaskResult, TaskUpdate,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct Harness {
	repo: Arc<ScheduledTaskRepository>,
	registry: Arc<HandlerRegistry>,
}

impl Harness {
	async fn new() -> Self {
		Self {
			repo: Arc::new(ScheduledTaskRepository::new(create_task_test_pool().await)),
			registry: Arc::new(HandlerRegistry::new()),
		}
	}

	fn dispatcher(&self, max_concurrent_tasks: usize) -> Dispatcher {
		dispatcher_for(self.repo.clone(), &self.registry, max_concurrent_tasks)
	}

	async fn tick(&self) -> BatchSummary {
		self.dispatcher(10).tick(&CancellationToken::new()).await
	}

	async fn create(&self, task: NewScheduledTask) -> ScheduledTask {
		self.repo.create_task(&task).await.unwrap()
	}

	async fn reload(&self, id: i64) -> ScheduledTask {
		self.repo.get_task(id).await.unwrap().unwrap()
	}

	async fn history(&self, id: i64) -> Vec<ScheduledTaskHistory> {
		self.repo.list_history(id, 100, 0).await.unwrap()
	}

	/// Register a handler that fails `failures` times before succeeding.
	fn register_flaky(&self, name: &str, failures: u32) -> Arc<AtomicU32> {
		let calls = Arc::new(AtomicU32::new(0));
		let counter = Arc::clone(&calls);
		self.registry.register_fn(name, move |_, _, _| {
			let n = counter.fetch_add(1, Ordering::SeqCst);
			async move {
				if n < failures {
					Err(TaskError::failed(format!("transient failure {}", n + 1)))
				} else {
					let mut result = TaskResult::new();
					result.insert("status".to_string(), json!("ok"));
					Ok(result)
				}
			}
		});
		calls
	}
}

fn dispatcher_for(
	store: Arc<dyn ScheduledTaskStore>,
	registry: &Arc<HandlerRegistry>,
	max_concurrent_tasks: usize,
) -> Dispatcher {
	let executor = Arc::new(TaskExecutor::new(store, Arc::clone(registry)));
	Dispatcher::new(
		executor,
		DispatcherConfig {
			poll_interval: Duration::from_secs(60),
			max_concurrent_tasks,
		},
	)
}

fn statuses(history: &[ScheduledTaskHistory]) -> Vec<&str> {
	history.iter().map(|h| h.status.as_str()).collect()
}

fn attempt_numbers(history: &[ScheduledTaskHistory]) -> Vec<u32> {
	history.iter().map(|h| h.attempt_number).collect()
}

fn past() -> DateTime<Utc> {
	Utc::now() - ChronoDuration::minutes(5)
}

#[tokio::test]
async fn one_time_task_succeeding_first_time_is_done() {
	let h = Harness::new().await;
	h.register_flaky("log_info", 0);
	let task = h
		.create(NewScheduledTask::one_time("log_info", JsonMap::new(), past()))
		.await;

	let summary = h.tick().await;
	assert_eq!(summary.found, 1);
	assert_eq!(summary.succeeded, 1);

	let history = h.history(task.id).await;
	assert_eq!(statuses(&history), vec!["success"]);
	assert_eq!(attempt_numbers(&history), vec![1]);
	assert_eq!(history[0].result["status"], json!("ok"));
	assert_eq!(h.reload(task.id).await.status, ScheduledTaskStatus::Done);
}

#[tokio::test]
async fn one_time_task_succeeds_on_third_attempt() {
	let h = Harness::new().await;
	let calls = h.register_flaky("send_notification", 2);
	let task = h
		.create(NewScheduledTask::one_time("send_notification", JsonMap::new(), past()).with_max_attempt(3))
		.await;

	let summary = h.tick().await;
	assert_eq!(summary.succeeded, 1);
	assert_eq!(calls.load(Ordering::SeqCst), 3);

	let history = h.history(task.id).await;
	assert_eq!(statuses(&history), vec!["failure", "failure", "success"]);
	assert_eq!(attempt_numbers(&history), vec![1, 2, 3]);
	assert_eq!(history[0].result["error"], json!("transient failure 1"));
	assert_eq!(history[1].result["error"], json!("transient failure 2"));
	assert_eq!(h.reload(task.id).await.status, ScheduledTaskStatus::Done);
}

#[tokio::test]
async fn unregistered_task_name_fails_without_retry() {
	let h = Harness::new().await;
	let mut arguments = JsonMap::new();
	arguments.insert("plan_id".to_string(), json!(12));
	let task = h
		.create(NewScheduledTask::one_time("charge_plan", arguments, past()).with_max_attempt(5))
		.await;

	let summary = h.tick().await;
	assert_eq!(summary.handler_not_found, 1);

	let history = h.history(task.id).await;
	assert_eq!(statuses(&history), vec!["handler_not_found"]);
	assert_eq!(attempt_numbers(&history), vec![1]);
	assert_eq!(history[0].runtime_ms, 0);
	assert_eq!(history[0].arguments["plan_id"], json!(12));
	assert_eq!(history[0].arguments["max_attempt"], json!(5));
	assert_eq!(history[0].result["error"], json!("handler not found: charge_plan"));

	let reloaded = h.reload(task.id).await;
	assert_eq!(reloaded.status, ScheduledTaskStatus::Failure);
	assert!(reloaded.last_run.is_some());
}

#[tokio::test]
async fn recurring_daily_task_advances_one_day() {
	let h = Harness::new().await;
	h.register_flaky("monthly_bill", 0);
	let due = (Utc::now() - ChronoDuration::hours(1)).trunc_subsecs(0);
	let task = h
		.create(NewScheduledTask::recurring("monthly_bill", JsonMap::new(), due, "FREQ=DAILY"))
		.await;

	let started = Utc::now();
	let summary = h.tick().await;
	assert_eq!(summary.succeeded, 1);

	let reloaded = h.reload(task.id).await;
	assert_eq!(reloaded.status, ScheduledTaskStatus::Active);
	assert_eq!(reloaded.due, due + ChronoDuration::days(1));
	let last_run = reloaded.last_run.unwrap();
	assert!(last_run >= started);

	let history = h.history(task.id).await;
	assert_eq!(history.len(), 1);
	assert_eq!(history[0].run_at, last_run);

	// not due again until tomorrow
	let summary = h.tick().await;
	assert_eq!(summary.found, 0);
}

#[tokio::test]
async fn recurring_task_with_exhausted_rule_is_done() {
	let h = Harness::new().await;
	h.register_flaky("monthly_bill", 0);
	let due = (Utc::now() - ChronoDuration::hours(1)).trunc_subsecs(0);
	let task = h
		.create(NewScheduledTask::recurring(
			"monthly_bill",
			JsonMap::new(),
			due,
			"RRULE:FREQ=DAILY;COUNT=1",
		))
		.await;

	h.tick().await;

	let reloaded = h.reload(task.id).await;
	assert_eq!(reloaded.status, ScheduledTaskStatus::Done);
	assert_eq!(reloaded.due, due);
	assert_eq!(h.history(task.id).await.len(), 1);
}

#[tokio::test]
async fn long_overdue_minutely_task_stays_active() {
	let h = Harness::new().await;
	h.register_flaky("sync_ledger", 0);
	let due = (Utc::now() - ChronoDuration::days(400)).trunc_subsecs(0);
	let task = h
		.create(NewScheduledTask::recurring(
			"sync_ledger",
			JsonMap::new(),
			due,
			"FREQ=MINUTELY",
		))
		.await;

	let before = Utc::now();
	h.tick().await;

	let reloaded = h.reload(task.id).await;
	assert_eq!(reloaded.status, ScheduledTaskStatus::Active);
	assert!(reloaded.due >= before);
	assert!(reloaded.due <= Utc::now() + ChronoDuration::minutes(1));
}

#[tokio::test]
async fn recurring_task_exhausting_attempts_fails_and_keeps_due() {
	let h = Harness::new().await;
	h.register_flaky("monthly_bill", u32::MAX);
	let due = (Utc::now() - ChronoDuration::hours(1)).trunc_subsecs(0);
	let task = h
		.create(
			NewScheduledTask::recurring("monthly_bill", JsonMap::new(), due, "FREQ=DAILY")
				.with_max_attempt(2),
		)
		.await;

	let summary = h.tick().await;
	assert_eq!(summary.failed, 1);

	let reloaded = h.reload(task.id).await;
	assert_eq!(reloaded.status, ScheduledTaskStatus::Failure);
	assert_eq!(reloaded.due, due);
	assert_eq!(attempt_numbers(&h.history(task.id).await), vec![1, 2]);
}

#[tokio::test]
async fn single_attempt_budget_never_retries() {
	let h = Harness::new().await;
	let calls = h.register_flaky("log_info", u32::MAX);
	let task = h
		.create(NewScheduledTask::one_time("log_info", JsonMap::new(), past()).with_max_attempt(1))
		.await;

	h.tick().await;

	assert_eq!(calls.load(Ordering::SeqCst), 1);
	assert_eq!(statuses(&h.history(task.id).await), vec!["failure"]);
	assert_eq!(h.reload(task.id).await.status, ScheduledTaskStatus::Failure);
}

#[tokio::test]
async fn each_due_task_runs_exactly_once_per_tick() {
	let h = Harness::new().await;
	let seen: Arc<Mutex<HashMap<i64, u32>>> = Arc::default();
	let recorder = Arc::clone(&seen);
	h.registry.register_fn("log_info", move |ctx: TaskContext, _, _| {
		*recorder.lock().unwrap().entry(ctx.task_id).or_default() += 1;
		async { Ok::<_, TaskError>(TaskResult::new()) }
	});

	let mut ids = Vec::new();
	for _ in 0..25 {
		ids.push(
			h.create(NewScheduledTask::one_time("log_info", JsonMap::new(), past()))
				.await
				.id,
		);
	}

	let summary = h.dispatcher(4).tick(&CancellationToken::new()).await;
	assert_eq!(summary.found, 25);
	assert_eq!(summary.launched, 25);
	assert_eq!(summary.completed(), 25);

	let seen = seen.lock().unwrap();
	assert_eq!(seen.len(), 25);
	for id in ids {
		assert_eq!(seen.get(&id), Some(&1), "task {id} should run once");
	}
	drop(seen);

	assert_eq!(h.tick().await.found, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrency_never_exceeds_admission_width() {
	let h = Harness::new().await;
	let in_flight = Arc::new(AtomicUsize::new(0));
	let peak = Arc::new(AtomicUsize::new(0));

	let (current, max) = (Arc::clone(&in_flight), Arc::clone(&peak));
	h.registry.register_fn("slow", move |_, _, _| {
		let current = Arc::clone(&current);
		let max = Arc::clone(&max);
		async move {
			let now = current.fetch_add(1, Ordering::SeqCst) + 1;
			max.fetch_max(now, Ordering::SeqCst);
			tokio::time::sleep(Duration::from_millis(25)).await;
			current.fetch_sub(1, Ordering::SeqCst);
			Ok::<_, TaskError>(TaskResult::new())
		}
	});

	for _ in 0..12 {
		h.create(NewScheduledTask::one_time("slow", JsonMap::new(), past()))
			.await;
	}

	let summary = h.dispatcher(3).tick(&CancellationToken::new()).await;
	assert_eq!(summary.succeeded, 12);

	let peak = peak.load(Ordering::SeqCst);
	assert!(peak <= 3, "peak concurrency {peak} exceeded width 3");
	assert!(peak >= 2, "batch was serialized (peak {peak})");
	assert_eq!(in_flight.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cancellation_stops_new_launches_but_finishes_in_flight() {
	let h = Harness::new().await;
	h.registry.register_fn("shutdown_trigger", |ctx: TaskContext, _, _| async move {
		ctx.cancellation_token.cancel();
		tokio::time::sleep(Duration::from_millis(10)).await;
		Ok::<_, TaskError>(TaskResult::new())
	});

	let mut ids = Vec::new();
	for _ in 0..5 {
		ids.push(
			h.create(NewScheduledTask::one_time("shutdown_trigger", JsonMap::new(), past()))
				.await
				.id,
		);
	}

	let summary = h.dispatcher(1).tick(&CancellationToken::new()).await;
	assert_eq!(summary.found, 5);
	assert_eq!(summary.launched, 1);
	assert_eq!(summary.succeeded, 1);
	assert_eq!(summary.skipped, 4);

	let mut done = 0;
	for id in ids {
		let task = h.reload(id).await;
		match task.status {
			ScheduledTaskStatus::Done => done += 1,
			ScheduledTaskStatus::Active => assert!(task.last_run.is_none()),
			other => panic!("unexpected status {other}"),
		}
	}
	assert_eq!(done, 1);
}

#[tokio::test]
async fn only_active_due_live_tasks_are_dispatched() {
	let h = Harness::new().await;
	let calls = h.register_flaky("log_info", 0);

	let due = h
		.create(NewScheduledTask::one_time("log_info", JsonMap::new(), past()))
		.await;
	let future = h
		.create(NewScheduledTask::one_time(
			"log_info",
			JsonMap::new(),
			Utc::now() + ChronoDuration::hours(1),
		))
		.await;
	let disabled = h
		.create(NewScheduledTask::one_time("log_info", JsonMap::new(), past()))
		.await;
	disable_task(h.repo.as_ref(), disabled.id).await.unwrap();
	let deleted = h
		.create(NewScheduledTask::one_time("log_info", JsonMap::new(), past()))
		.await;
	h.repo.soft_delete_task(deleted.id).await.unwrap();

	let summary = h.tick().await;
	assert_eq!(summary.found, 1);
	assert_eq!(calls.load(Ordering::SeqCst), 1);

	assert_eq!(h.reload(due.id).await.status, ScheduledTaskStatus::Done);
	assert_eq!(h.reload(future.id).await.status, ScheduledTaskStatus::Active);
	assert_eq!(h.reload(disabled.id).await.status, ScheduledTaskStatus::Disabled);
	assert!(h.history(disabled.id).await.is_empty());
}

#[tokio::test]
async fn handler_can_schedule_follow_up_work() {
	let h = Harness::new().await;
	h.registry
		.register_fn("plan_created", |_, store: Arc<dyn ScheduledTaskStore>, args| async move {
			let mut follow_up = JsonMap::new();
			follow_up.insert("plan_id".to_string(), args["plan_id"].clone());
			let created = store
				.create_task(&NewScheduledTask::one_time(
					"send_notification",
					follow_up,
					Utc::now() + ChronoDuration::days(1),
				))
				.await
				.map_err(|e| TaskError::failed(e.to_string()))?;

			let mut result = TaskResult::new();
			result.insert("follow_up_id".to_string(), json!(created.id));
			Ok::<_, TaskError>(result)
		});

	let mut arguments = JsonMap::new();
	arguments.insert("plan_id".to_string(), json!(3));
	let task = h
		.create(NewScheduledTask::one_time("plan_created", arguments, past()))
		.await;

	h.tick().await;

	let history = h.history(task.id).await;
	let follow_up_id = history[0].result["follow_up_id"].as_i64().unwrap();
	let follow_up = h.reload(follow_up_id).await;
	assert_eq!(follow_up.task_name, "send_notification");
	assert_eq!(follow_up.arguments["plan_id"], json!(3));
	assert_eq!(follow_up.status, ScheduledTaskStatus::Active);
}

/// Delegates to the repository but can fail selected operations.
struct FlakyStore {
	inner: ScheduledTaskRepository,
	fail_due_query: bool,
	fail_history: bool,
}

impl FlakyStore {
	fn unavailable() -> DbError {
		DbError::Internal("storage unavailable".to_string())
	}
}

#[async_trait]
impl ScheduledTaskStore for FlakyStore {
	async fn create_task(&self, task: &NewScheduledTask) -> splitbill_server_db::Result<ScheduledTask> {
		self.inner.create_task(task).await
	}

	async fn get_task(&self, id: i64) -> splitbill_server_db::Result<Option<ScheduledTask>> {
		self.inner.get_task(id).await
	}

	async fn list_due_tasks(&self, now: DateTime<Utc>) -> splitbill_server_db::Result<Vec<ScheduledTask>> {
		if self.fail_due_query {
			return Err(Self::unavailable());
		}
		self.inner.list_due_tasks(now).await
	}

	async fn list_tasks(
		&self,
		status: Option<ScheduledTaskStatus>,
		limit: u32,
		offset: u32,
	) -> splitbill_server_db::Result<Vec<ScheduledTask>> {
		self.inner.list_tasks(status, limit, offset).await
	}

	async fn update_task(&self, id: i64, update: &TaskUpdate) -> splitbill_server_db::Result<()> {
		self.inner.update_task(id, update).await
	}

	async fn set_status(&self, id: i64, status: ScheduledTaskStatus) -> splitbill_server_db::Result<()> {
		self.inner.set_status(id, status).await
	}

	async fn soft_delete_task(&self, id: i64) -> splitbill_server_db::Result<()> {
		self.inner.soft_delete_task(id).await
	}

	async fn record_history(
		&self,
		entry: &NewTaskHistory,
	) -> splitbill_server_db::Result<ScheduledTaskHistory> {
		if self.fail_history {
			return Err(Self::unavailable());
		}
		self.inner.record_history(entry).await
	}

	async fn list_history(
		&self,
		task_id: i64,
		limit: u32,
		offset: u32,
	) -> splitbill_server_db::Result<Vec<ScheduledTaskHistory>> {
		self.inner.list_history(task_id, limit, offset).await
	}
}

#[tokio::test]
async fn failed_due_query_yields_empty_batch() {
	let store = Arc::new(FlakyStore {
		inner: ScheduledTaskRepository::new(create_task_test_pool().await),
		fail_due_query: true,
		fail_history: false,
	});
	store
		.create_task(&NewScheduledTask::one_time("log_info", JsonMap::new(), past()))
		.await
		.unwrap();

	let registry = Arc::new(HandlerRegistry::new());
	let summary = dispatcher_for(store, &registry, 2)
		.tick(&CancellationToken::new())
		.await;
	assert_eq!(summary, BatchSummary::default());
}

#[tokio::test]
async fn history_write_failure_does_not_block_state_transition() {
	let store = Arc::new(FlakyStore {
		inner: ScheduledTaskRepository::new(create_task_test_pool().await),
		fail_due_query: false,
		fail_history: true,
	});
	let task = store
		.create_task(&NewScheduledTask::one_time("log_info", JsonMap::new(), past()))
		.await
		.unwrap();

	let registry = Arc::new(HandlerRegistry::new());
	registry.register_fn("log_info", |_, _, _| async { Ok::<_, TaskError>(TaskResult::new()) });

	let summary = dispatcher_for(store.clone(), &registry, 2)
		.tick(&CancellationToken::new())
		.await;
	assert_eq!(summary.succeeded, 1);

	let reloaded = store.get_task(task.id).await.unwrap().unwrap();
	assert_eq!(reloaded.status, ScheduledTaskStatus::Done);
	assert!(store.list_history(task.id, 10, 0).await.unwrap().is_empty());
}

mod attempt_bounds {
	use super::*;
	use proptest::prelude::*;

	async fn run_cycle(failures: u32, max_attempt: u32) -> (TaskOutcome, Vec<ScheduledTaskHistory>, ScheduledTask) {
		let h = Harness::new().await;
		h.register_flaky("flaky", failures);
		let task = h
			.create(NewScheduledTask::one_time("flaky", JsonMap::new(), past()).with_max_attempt(max_attempt))
			.await;

		let executor = TaskExecutor::new(h.repo.clone(), Arc::clone(&h.registry));
		let outcome = executor.execute(task.clone(), &CancellationToken::new()).await;
		(outcome, h.history(task.id).await, h.reload(task.id).await)
	}

	proptest! {
		#![proptest_config(ProptestConfig::with_cases(48))]

		#[test]
		fn history_rows_are_bounded_and_gapless(failures in 0u32..7, max_attempt in 1u32..6) {
			let runtime = tokio::runtime::Builder::new_current_thread()
				.enable_all()
				.build()
				.unwrap();
			let (outcome, history, task) = runtime.block_on(run_cycle(failures, max_attempt));

			let expected = (failures + 1).min(max_attempt);
			prop_assert_eq!(history.len() as u32, expected);
			prop_assert_eq!(attempt_numbers(&history), (1..=expected).collect::<Vec<_>>());
			prop_assert_eq!(outcome.attempts(), expected);

			if failures < max_attempt {
				prop_assert_eq!(task.status, ScheduledTaskStatus::Done);
				prop_assert_eq!(history.last().map(|row| row.status.as_str()), Some("success"));
			} else {
				prop_assert_eq!(task.status, ScheduledTaskStatus::Failure);
				prop_assert!(history.iter().all(|row| row.status == "failure"));
			}
		}
	}
}
