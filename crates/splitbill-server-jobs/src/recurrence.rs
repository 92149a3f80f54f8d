// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Next-occurrence calculation for recurring tasks (RFC 5545 RRULE).

use chrono::{DateTime, Duration, Utc};
use rrule::{RRule, RRuleSet, Tz, Unvalidated};
use tracing::debug;

use crate::error::{Result, TaskError};

/// Strip an optional `RRULE:` prefix and surrounding whitespace.
///
/// Returns `None` for an empty rule.
fn normalize_rule(rule: &str) -> Option<&str> {
	let trimmed = rule.trim();
	let body = trimmed
		.strip_prefix("RRULE:")
		.or_else(|| trimmed.strip_prefix("rrule:"))
		.unwrap_or(trimmed)
		.trim();
	if body.is_empty() {
		None
	} else {
		Some(body)
	}
}

fn build_rule_set(rule: &str, anchor: DateTime<Utc>) -> Result<RRuleSet> {
	let parsed: RRule<Unvalidated> = rule
		.parse()
		.map_err(|e| TaskError::InvalidRecurrence(format!("{e}")))?;
	parsed
		.build(anchor.with_timezone(&Tz::UTC))
		.map_err(|e| TaskError::InvalidRecurrence(e.to_string()))
}

/// Compute the first occurrence of `rule`, anchored at `anchor`, that falls at
/// or after `after`.
///
/// Falls back to `anchor` when the rule is empty, fails to parse, or has no
/// occurrence left. Callers compare the result with the anchor to detect an
/// exhausted rule, so this never returns an error.
pub fn next_occurrence(rule: &str, anchor: DateTime<Utc>, after: DateTime<Utc>) -> DateTime<Utc> {
	let Some(rule) = normalize_rule(rule) else {
		return anchor;
	};

	let rule_set = match build_rule_set(rule, anchor) {
		Ok(set) => set,
		Err(e) => {
			debug!(rule, error = %e, "recurrence rule rejected, keeping anchor");
			return anchor;
		}
	};

	// The window bound is exclusive; widen it so an occurrence at `after` counts.
	let window_start = (after - Duration::nanoseconds(1)).with_timezone(&Tz::UTC);
	rule_set
		.after(window_start)
		.all(2)
		.dates
		.into_iter()
		.map(|occurrence| occurrence.with_timezone(&Utc))
		.find(|occurrence| *occurrence >= after)
		.unwrap_or(anchor)
}

/// Validate a recurrence rule for use with the given anchor.
///
/// Used when a task is created so that a malformed rule is reported to the
/// caller instead of silently finishing the task after its first run.
pub fn validate_rule(rule: &str, anchor: DateTime<Utc>) -> Result<()> {
	let rule = normalize_rule(rule)
		.ok_or_else(|| TaskError::InvalidRecurrence("rule is empty".to_string()))?;
	build_rule_set(rule, anchor)?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::{Duration, TimeZone};

	fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
		Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
	}

	#[test]
	fn test_daily_rule_advances_one_day() {
		let anchor = at(2026, 1, 19, 9, 0);
		let now = at(2026, 1, 19, 9, 5);

		let next = next_occurrence("FREQ=DAILY", anchor, now);
		assert_eq!(next, at(2026, 1, 20, 9, 0));
	}

	#[test]
	fn test_boundary_is_inclusive() {
		let anchor = at(2026, 1, 19, 9, 0);
		let next = next_occurrence("FREQ=DAILY", anchor, at(2026, 1, 21, 9, 0));
		assert_eq!(next, at(2026, 1, 21, 9, 0));
	}

	#[test]
	fn test_rrule_prefix_accepted() {
		let anchor = at(2026, 3, 2, 8, 30);
		let next = next_occurrence("RRULE:FREQ=WEEKLY;INTERVAL=2", anchor, anchor + Duration::hours(1));
		assert_eq!(next, at(2026, 3, 16, 8, 30));
	}

	#[test]
	fn test_skips_missed_occurrences() {
		let anchor = at(2026, 1, 1, 0, 0);
		let next = next_occurrence("FREQ=HOURLY;INTERVAL=6", anchor, at(2026, 1, 3, 13, 0));
		assert_eq!(next, at(2026, 1, 3, 18, 0));
	}

	#[test]
	fn test_long_overdue_minutely_rule_still_advances() {
		let anchor = at(2025, 1, 1, 0, 0);
		let after = anchor + Duration::days(400) + Duration::seconds(30);

		let next = next_occurrence("FREQ=MINUTELY", anchor, after);
		assert_eq!(next, anchor + Duration::days(400) + Duration::minutes(1));
	}

	#[test]
	fn test_long_overdue_secondly_rule_still_advances() {
		let anchor = at(2026, 1, 1, 0, 0);
		let after = anchor + Duration::days(30);

		let next = next_occurrence("FREQ=SECONDLY;INTERVAL=7", anchor, after);
		assert!(next >= after);
		assert!(next < after + Duration::seconds(7));
	}

	#[test]
	fn test_monthly_by_month_day() {
		let anchor = at(2026, 1, 25, 10, 0);
		let next = next_occurrence("FREQ=MONTHLY;BYMONTHDAY=25", anchor, at(2026, 1, 26, 0, 0));
		assert_eq!(next, at(2026, 2, 25, 10, 0));
	}

	#[test]
	fn test_exhausted_rule_returns_anchor() {
		let anchor = at(2026, 1, 19, 9, 0);
		let next = next_occurrence("FREQ=DAILY;COUNT=1", anchor, anchor + Duration::minutes(1));
		assert_eq!(next, anchor);
	}

	#[test]
	fn test_until_in_past_returns_anchor() {
		let anchor = at(2026, 1, 19, 9, 0);
		let next = next_occurrence(
			"FREQ=DAILY;UNTIL=20260121T090000Z",
			anchor,
			at(2026, 2, 1, 0, 0),
		);
		assert_eq!(next, anchor);
	}

	#[test]
	fn test_empty_or_invalid_rule_returns_anchor() {
		let anchor = at(2026, 1, 19, 9, 0);
		let later = anchor + Duration::days(3);
		assert_eq!(next_occurrence("", anchor, later), anchor);
		assert_eq!(next_occurrence("   ", anchor, later), anchor);
		assert_eq!(next_occurrence("RRULE:", anchor, later), anchor);
		assert_eq!(next_occurrence("every tuesday", anchor, later), anchor);
		assert_eq!(next_occurrence("FREQ=FORTNIGHTLY", anchor, later), anchor);
	}

	#[test]
	fn test_validate_rule() {
		let anchor = at(2026, 1, 19, 9, 0);
		assert!(validate_rule("FREQ=DAILY", anchor).is_ok());
		assert!(validate_rule("RRULE:FREQ=MONTHLY;BYMONTHDAY=1", anchor).is_ok());
		assert!(matches!(
			validate_rule("", anchor),
			Err(TaskError::InvalidRecurrence(_))
		));
		assert!(matches!(
			validate_rule("FREQ=SOMETIMES", anchor),
			Err(TaskError::InvalidRecurrence(_))
		));
	}

	mod proptests {
		use super::*;
		use proptest::prelude::*;

		const RULES: &[&str] = &[
			"FREQ=DAILY",
			"FREQ=WEEKLY",
			"FREQ=HOURLY;INTERVAL=6",
			"FREQ=DAILY;COUNT=2",
			"FREQ=MONTHLY;COUNT=3",
			"not a rule",
			"",
		];

		proptest! {
			#[test]
			fn next_occurrence_is_idempotent(
				rule_idx in 0..RULES.len(),
				anchor_offset_mins in 0i64..100_000,
				after_offset_mins in -2_000i64..40_000,
			) {
				let anchor = at(2026, 1, 1, 0, 0) + Duration::minutes(anchor_offset_mins);
				let after = anchor + Duration::minutes(after_offset_mins);
				let first = next_occurrence(RULES[rule_idx], anchor, after);
				let second = next_occurrence(RULES[rule_idx], anchor, after);
				prop_assert_eq!(first, second);
			}

			#[test]
			fn next_occurrence_is_anchor_or_not_before_after(
				rule_idx in 0..RULES.len(),
				anchor_offset_mins in 0i64..100_000,
				after_offset_mins in 0i64..40_000,
			) {
				let anchor = at(2026, 1, 1, 0, 0) + Duration::minutes(anchor_offset_mins);
				let after = anchor + Duration::minutes(after_offset_mins);
				let next = next_occurrence(RULES[rule_idx], anchor, after);
				prop_assert!(next == anchor || next >= after);
			}
		}
	}
}
