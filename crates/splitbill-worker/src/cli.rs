// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Argument parsing for the scheduling subcommands.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;
use splitbill_server_jobs::ScheduledTaskType;

const LOCAL_DUE_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Parse a due instant given as RFC 3339 or as `YYYY-MM-DD HH:MM` local time.
pub fn parse_due(input: &str) -> Result<DateTime<Utc>, String> {
	let input = input.trim();
	if let Ok(due) = DateTime::parse_from_rfc3339(input) {
		return Ok(due.with_timezone(&Utc));
	}

	let naive = NaiveDateTime::parse_from_str(input, LOCAL_DUE_FORMAT).map_err(|_| {
		format!("invalid due date '{input}': use RFC 3339 or 'YYYY-MM-DD HH:MM' (local time)")
	})?;
	Local
		.from_local_datetime(&naive)
		.earliest()
		.map(|due| due.with_timezone(&Utc))
		.ok_or_else(|| format!("'{input}' does not exist in the local time zone"))
}

/// Parse the `--arguments` JSON value. Object-ness is checked when the task is built.
pub fn parse_arguments(input: &str) -> Result<Value, String> {
	serde_json::from_str(input).map_err(|e| format!("invalid JSON arguments: {e}"))
}

/// A recurrence rule always makes the task recurring.
pub fn resolve_task_type(requested: ScheduledTaskType, recurring: Option<&str>) -> ScheduledTaskType {
	match recurring {
		Some(rule) if !rule.trim().is_empty() => ScheduledTaskType::Recurring,
		_ => requested,
	}
}
