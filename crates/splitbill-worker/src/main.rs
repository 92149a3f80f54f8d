// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! splitbill scheduled task worker binary.

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Args as ClapArgs, Parser, Subcommand};
use serde_json::Value;
use splitbill_server_config::{LogFormat, LoggingConfig, WorkerConfig};
use splitbill_server_db::{ScheduledTaskRepository, ScheduledTaskStatus, ScheduledTaskStore};
use splitbill_server_jobs::{
	build_task, disable_task, schedule_task, CancellationToken, Dispatcher, DispatcherConfig,
	HandlerRegistry, RetryPolicy, ScheduledTaskType, TaskExecutor,
};
use splitbill_worker::cli::{parse_arguments, parse_due, resolve_task_type};
use splitbill_worker::register_builtin_tasks;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod version;

/// splitbill-worker - runs due scheduled tasks and manages the task store.
#[derive(Parser, Debug)]
#[command(
	name = "splitbill-worker",
	about = "splitbill scheduled task worker",
	version
)]
struct Args {
	/// Config file (defaults to /etc/splitbill/worker.toml)
	#[arg(long, global = true, env = "SPLITBILL_CONFIG")]
	config: Option<PathBuf>,

	/// Defaults to `run`
	#[command(subcommand)]
	command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Poll for due tasks and execute them until interrupted
	Run,
	/// Create a scheduled task
	Schedule(ScheduleArgs),
	/// Stop a task from being dispatched
	Disable {
		#[arg(long)]
		id: i64,
	},
	/// List scheduled tasks as JSON lines
	List {
		#[arg(long)]
		status: Option<ScheduledTaskStatus>,
		#[arg(long, default_value_t = 100)]
		limit: u32,
	},
	/// Show the execution history of a task as JSON lines
	History {
		#[arg(long)]
		id: i64,
		#[arg(long, default_value_t = 100)]
		limit: u32,
	},
	/// Show version and build information
	Version,
}

#[derive(ClapArgs, Debug)]
struct ScheduleArgs {
	/// Registered handler name
	#[arg(long)]
	task_name: String,
	/// JSON object passed to the handler
	#[arg(long, value_parser = parse_arguments)]
	arguments: Value,
	/// RFC 3339 instant or `YYYY-MM-DD HH:MM` in local time
	#[arg(long, value_parser = parse_due)]
	due: DateTime<Utc>,
	#[arg(long, default_value = "onetime")]
	task_type: ScheduledTaskType,
	/// RFC 5545 recurrence rule, e.g. `FREQ=MONTHLY;BYMONTHDAY=1`
	#[arg(long)]
	recurring: Option<String>,
	#[arg(long, default_value_t = 3)]
	max_attempt: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	if let Some(Command::Version) = args.command {
		println!("{}", version::format_version_info());
		return Ok(());
	}

	// Load .env file if present
	dotenvy::dotenv().ok();

	let config = match &args.config {
		Some(path) => splitbill_server_config::load_config_with_file(path),
		None => splitbill_server_config::load_config(),
	}
	.context("failed to load configuration")?;

	init_tracing(&config.logging);

	let pool = splitbill_server_db::create_pool(&config.database.url)
		.await
		.with_context(|| format!("failed to open database {}", config.database.url))?;
	splitbill_server_db::run_migrations(&pool)
		.await
		.context("failed to prepare task store schema")?;
	let store: Arc<dyn ScheduledTaskStore> = Arc::new(ScheduledTaskRepository::new(pool));

	match args.command.unwrap_or(Command::Run) {
		Command::Run => run_worker(store, &config).await,
		Command::Schedule(schedule) => schedule_command(store.as_ref(), schedule).await,
		Command::Disable { id } => {
			disable_task(store.as_ref(), id)
				.await
				.with_context(|| format!("failed to disable task {id}"))?;
			println!("Disabled task ID: {id}");
			Ok(())
		}
		Command::List { status, limit } => {
			for task in store.list_tasks(status, limit, 0).await? {
				println!("{}", serde_json::to_string(&task)?);
			}
			Ok(())
		}
		Command::History { id, limit } => {
			for entry in store.list_history(id, limit, 0).await? {
				println!("{}", serde_json::to_string(&entry)?);
			}
			Ok(())
		}
		Command::Version => Ok(()),
	}
}

fn init_tracing(logging: &LoggingConfig) {
	let filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| logging.level.clone().into());
	let registry = tracing_subscriber::registry().with(filter);

	match logging.format {
		LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
		LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
	}
}

async fn run_worker(store: Arc<dyn ScheduledTaskStore>, config: &WorkerConfig) -> anyhow::Result<()> {
	let registry = Arc::new(HandlerRegistry::new());
	register_builtin_tasks(&registry);

	let retry_policy = RetryPolicy::exponential(
		config.dispatcher.retry_base_delay(),
		config.dispatcher.retry_max_delay(),
	);
	let executor = Arc::new(
		TaskExecutor::new(Arc::clone(&store), Arc::clone(&registry)).with_retry_policy(retry_policy),
	);
	let dispatcher = Dispatcher::new(
		executor,
		DispatcherConfig {
			poll_interval: config.dispatcher.poll_interval(),
			max_concurrent_tasks: config.dispatcher.max_concurrent_tasks,
		},
	);

	tracing::info!(
		database = %config.database.url,
		handlers = ?registry.names(),
		"starting splitbill-worker"
	);

	let token = CancellationToken::new();
	let signal_token = token.clone();
	tokio::spawn(async move {
		shutdown_signal().await;
		tracing::info!("Received shutdown signal, waiting for running tasks to finish");
		signal_token.cancel();
	});

	dispatcher.run(token).await;

	tracing::info!("Worker shutdown complete");
	Ok(())
}

async fn schedule_command(store: &dyn ScheduledTaskStore, args: ScheduleArgs) -> anyhow::Result<()> {
	let task_type = resolve_task_type(args.task_type, args.recurring.as_deref());
	let task = build_task(
		args.task_name,
		&args.arguments,
		args.due,
		args.recurring,
		task_type,
		args.max_attempt,
	)?;
	let created = schedule_task(store, &task)
		.await
		.context("failed to create task")?;

	println!("Successfully created task ID: {}", created.id);
	println!(
		"Task: {}\nDue: {}\nType: {}",
		created.task_name,
		created.due.to_rfc3339(),
		created.task_type
	);
	Ok(())
}

async fn shutdown_signal() {
	let ctrl_c = async {
		if let Err(e) = tokio::signal::ctrl_c().await {
			tracing::error!(error = %e, "Failed to listen for Ctrl-C");
			std::future::pending::<()>().await;
		}
	};

	#[cfg(unix)]
	let terminate = async {
		use tokio::signal::unix::{signal, SignalKind};
		match signal(SignalKind::terminate()) {
			Ok(mut stream) => {
				stream.recv().await;
			}
			Err(e) => {
				tracing::error!(error = %e, "Failed to listen for SIGTERM");
				std::future::pending::<()>().await;
			}
		}
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {}
		_ = terminate => {}
	}
}
