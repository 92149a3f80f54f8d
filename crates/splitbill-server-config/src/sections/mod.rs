// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

mod database;
mod dispatcher;
mod logging;

pub use database::{DatabaseConfig, DatabaseConfigLayer};
pub use dispatcher::{DispatcherConfig, DispatcherConfigLayer};
pub use logging::{LogFormat, LoggingConfig, LoggingConfigLayer};
