// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Partial worker configuration, merged source by source.

use serde::Deserialize;

use crate::sections::{DatabaseConfigLayer, DispatcherConfigLayer, LoggingConfigLayer};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkerConfigLayer {
	#[serde(default)]
	pub database: Option<DatabaseConfigLayer>,
	#[serde(default)]
	pub dispatcher: Option<DispatcherConfigLayer>,
	#[serde(default)]
	pub logging: Option<LoggingConfigLayer>,
}

impl WorkerConfigLayer {
	/// Overlay `other` on top of `self`; values present in `other` win.
	pub fn merge(&mut self, other: WorkerConfigLayer) {
		merge_section(&mut self.database, other.database, DatabaseConfigLayer::merge);
		merge_section(&mut self.dispatcher, other.dispatcher, DispatcherConfigLayer::merge);
		merge_section(&mut self.logging, other.logging, LoggingConfigLayer::merge);
	}
}

fn merge_section<T>(base: &mut Option<T>, other: Option<T>, merge: fn(&mut T, T)) {
	match (base.as_mut(), other) {
		(Some(existing), Some(incoming)) => merge(existing, incoming),
		(None, Some(incoming)) => *base = Some(incoming),
		(_, None) => {}
	}
}
