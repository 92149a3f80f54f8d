// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: environment variables and TOML files.

use std::path::PathBuf;
use std::str::FromStr;

use tracing::{debug, trace};

use crate::error::ConfigError;
use crate::layer::WorkerConfigLayer;
use crate::sections::{DatabaseConfigLayer, DispatcherConfigLayer, LogFormat, LoggingConfigLayer};

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
}

/// Trait for configuration sources.
pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<WorkerConfigLayer, ConfigError>;
}

/// Built-in defaults source.
pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<WorkerConfigLayer, ConfigError> {
		debug!("loading defaults");
		Ok(WorkerConfigLayer::default())
	}
}

/// TOML file configuration source. A missing file is not an error.
pub struct TomlSource {
	path: PathBuf,
}

impl TomlSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn system() -> Self {
		Self::new("/etc/splitbill/worker.toml")
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<WorkerConfigLayer, ConfigError> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(WorkerConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let layer: WorkerConfigLayer =
			toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
				path: self.path.clone(),
				source: e,
			})?;

		trace!("parsed config layer from TOML");
		Ok(layer)
	}
}

/// Environment variable source.
///
/// Convention: SPLITBILL_<SECTION>_<FIELD>. `DATABASE_URL` is honoured when
/// `SPLITBILL_DATABASE_URL` is unset.
pub struct EnvSource;

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<WorkerConfigLayer, ConfigError> {
		debug!("loading environment variables");
		Ok(WorkerConfigLayer {
			database: Some(load_database_from_env()),
			dispatcher: Some(load_dispatcher_from_env()?),
			logging: Some(load_logging_from_env()?),
		})
	}
}

fn env_var(name: &str) -> Option<String> {
	std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn parse_value<T: FromStr>(name: &str, value: Option<String>) -> Result<Option<T>, ConfigError> {
	match value {
		Some(v) => v.trim().parse().map(Some).map_err(|_| ConfigError::InvalidValue {
			key: name.to_string(),
			message: format!("invalid value '{v}'"),
		}),
		None => Ok(None),
	}
}

fn env_u64(name: &str) -> Result<Option<u64>, ConfigError> {
	parse_value(name, env_var(name))
}

fn env_usize(name: &str) -> Result<Option<usize>, ConfigError> {
	parse_value(name, env_var(name))
}

fn load_database_from_env() -> DatabaseConfigLayer {
	DatabaseConfigLayer {
		url: env_var("SPLITBILL_DATABASE_URL").or_else(|| env_var("DATABASE_URL")),
	}
}

fn load_dispatcher_from_env() -> Result<DispatcherConfigLayer, ConfigError> {
	Ok(DispatcherConfigLayer {
		poll_interval_secs: env_u64("SPLITBILL_DISPATCHER_POLL_INTERVAL_SECS")?,
		max_concurrent_tasks: env_usize("SPLITBILL_DISPATCHER_MAX_CONCURRENT_TASKS")?,
		retry_base_delay_ms: env_u64("SPLITBILL_DISPATCHER_RETRY_BASE_DELAY_MS")?,
		retry_max_delay_ms: env_u64("SPLITBILL_DISPATCHER_RETRY_MAX_DELAY_MS")?,
	})
}

fn load_logging_from_env() -> Result<LoggingConfigLayer, ConfigError> {
	let format = match env_var("SPLITBILL_LOG_FORMAT") {
		Some(v) => Some(
			v.parse::<LogFormat>()
				.map_err(|message| ConfigError::InvalidValue {
					key: "SPLITBILL_LOG_FORMAT".to_string(),
					message,
				})?,
		),
		None => None,
	};

	Ok(LoggingConfigLayer {
		level: env_var("SPLITBILL_LOG_LEVEL"),
		format,
	})
}
