// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration for the splitbill task worker.
//!
//! Layered from built-in defaults, a TOML file and `SPLITBILL_*` environment
//! variables, in increasing order of precedence.
//!
//! ```ignore
//! use splitbill_server_config::load_config;
//!
//! let config = load_config()?;
//! println!("polling every {}s", config.dispatcher.poll_interval_secs);
//! ```

pub mod error;
pub mod layer;
pub mod sections;
pub mod sources;

pub use error::ConfigError;
pub use layer::WorkerConfigLayer;
pub use sections::*;
pub use sources::{ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource};

use tracing::{debug, info};

/// Fully resolved worker configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerConfig {
	pub database: DatabaseConfig,
	pub dispatcher: DispatcherConfig,
	pub logging: LoggingConfig,
}

/// Load configuration from all sources with standard precedence.
///
/// Precedence (highest to lowest):
/// 1. Environment variables (`SPLITBILL_*`)
/// 2. Config file (`/etc/splitbill/worker.toml`)
/// 3. Built-in defaults
pub fn load_config() -> Result<WorkerConfig, ConfigError> {
	let sources: Vec<Box<dyn ConfigSource>> = vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::system()),
		Box::new(EnvSource),
	];
	load_from_sources(sources)
}

/// Load configuration with a custom config file path.
pub fn load_config_with_file(
	config_path: impl Into<std::path::PathBuf>,
) -> Result<WorkerConfig, ConfigError> {
	let sources: Vec<Box<dyn ConfigSource>> = vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::new(config_path)),
		Box::new(EnvSource),
	];
	load_from_sources(sources)
}

fn load_from_sources(mut sources: Vec<Box<dyn ConfigSource>>) -> Result<WorkerConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = WorkerConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		let layer = source.load()?;
		merged.merge(layer);
	}

	finalize(merged)
}

/// Finalize configuration layer into resolved config.
pub fn finalize(layer: WorkerConfigLayer) -> Result<WorkerConfig, ConfigError> {
	let database = layer.database.unwrap_or_default().finalize();
	let dispatcher = layer.dispatcher.unwrap_or_default().finalize();
	let logging = layer.logging.unwrap_or_default().finalize();

	validate_dispatcher(&dispatcher)?;

	info!(
		database = %database.url,
		poll_interval_secs = dispatcher.poll_interval_secs,
		max_concurrent_tasks = dispatcher.max_concurrent_tasks,
		retry_base_delay_ms = dispatcher.retry_base_delay_ms,
		log_level = %logging.level,
		"Worker configuration loaded"
	);

	Ok(WorkerConfig {
		database,
		dispatcher,
		logging,
	})
}

fn validate_dispatcher(dispatcher: &DispatcherConfig) -> Result<(), ConfigError> {
	if dispatcher.poll_interval_secs == 0 {
		return Err(ConfigError::Validation(
			"dispatcher.poll_interval_secs must be greater than zero".to_string(),
		));
	}
	if dispatcher.max_concurrent_tasks == 0 {
		return Err(ConfigError::Validation(
			"dispatcher.max_concurrent_tasks must be greater than zero".to_string(),
		));
	}
	if dispatcher.retry_base_delay_ms > dispatcher.retry_max_delay_ms {
		return Err(ConfigError::Validation(
			"dispatcher.retry_base_delay_ms must not exceed retry_max_delay_ms".to_string(),
		));
	}
	Ok(())
}
