// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Task worker for splitbill: built-in task handlers and CLI helpers.

pub mod cli;
pub mod tasks;

pub use tasks::register_builtin_tasks;
