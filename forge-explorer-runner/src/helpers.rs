// Copyright (c) The forge-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! General support code for forge-explorer-runner.

use std::{
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

/// Utilities for pluralizing various words based on count.
pub(crate) mod plural {
    /// Returns "test" if `count` is 1, otherwise "tests".
    pub(crate) fn tests_str(count: usize) -> &'static str {
        if count == 1 { "test" } else { "tests" }
    }

    /// Returns "file" if `count` is 1, otherwise "files".
    pub(crate) fn files_str(count: usize) -> &'static str {
        if count == 1 { "file" } else { "files" }
    }

    /// Returns "contract" if `count` is 1, otherwise "contracts".
    pub(crate) fn contracts_str(count: usize) -> &'static str {
        if count == 1 { "contract" } else { "contracts" }
    }
}

/// Formats a duration as seconds with millisecond precision, e.g. `1.250s`.
pub(crate) fn format_duration(duration: Duration) -> String {
    format!("{:.3}s", duration.as_secs_f64())
}

/// Returns the last non-empty line of `text`, trimmed.
pub(crate) fn last_nonempty_line(text: &str) -> Option<&str> {
    text.lines().map(str::trim).rfind(|line| !line.is_empty())
}

/// Locks a mutex, ignoring poisoning. Critical sections guarded this way are single inserts,
/// removes or swaps.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
