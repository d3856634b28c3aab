// Copyright (c) The forge-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::{Deserialize, Deserializer, Serialize};
use std::{collections::BTreeMap, time::Duration};

/// The output of `forge test --json`: suite name to suite result.
///
/// Suite keys are produced by forge as `<path>:<ContractName>`; use
/// [`ForgeTestResults::suite_for_contract`] to look a suite up by contract name.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ForgeTestResults {
    /// Suites keyed by their forge identifier.
    pub suites: BTreeMap<String, SuiteResult>,
}

impl ForgeTestResults {
    /// Parses `forge test --json` output.
    pub fn parse(input: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(input)
    }

    /// Returns the suite for the given contract name.
    ///
    /// A suite matches if its key is exactly `contract`, or if its key ends with `:<contract>`.
    pub fn suite_for_contract(&self, contract: &str) -> Option<&SuiteResult> {
        if let Some(suite) = self.suites.get(contract) {
            return Some(suite);
        }
        self.suites.iter().find_map(|(key, suite)| {
            let (_, name) = key.rsplit_once(':')?;
            (name == contract).then_some(suite)
        })
    }

    /// Returns true if no suites were reported.
    pub fn is_empty(&self) -> bool {
        self.suites.is_empty()
    }
}

/// The result of running one test contract.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SuiteResult {
    /// How long the suite took, if reported.
    #[serde(default, deserialize_with = "deserialize_opt_duration")]
    pub duration: Option<Duration>,

    /// Results keyed by test function name.
    ///
    /// Forge reports functions with their signature (`testAdd()`); see
    /// [`SuiteResult::test_for_function`].
    #[serde(default)]
    pub test_results: BTreeMap<String, TestResult>,

    /// Warnings emitted for the suite.
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl SuiteResult {
    /// Returns the result for the given function name.
    ///
    /// A key matches if it is exactly `function` or `function(...)`.
    pub fn test_for_function(&self, function: &str) -> Option<&TestResult> {
        if let Some(result) = self.test_results.get(function) {
            return Some(result);
        }
        self.test_results.iter().find_map(|(key, result)| {
            let (name, _) = key.split_once('(')?;
            (name == function).then_some(result)
        })
    }
}

/// The result of a single test function.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    /// The outcome reported by forge.
    pub status: TestStatus,

    /// Why the test failed, if it did.
    #[serde(default)]
    pub reason: Option<String>,

    /// How long the test took, if reported.
    #[serde(default, deserialize_with = "deserialize_opt_duration")]
    pub duration: Option<Duration>,

    /// Logs decoded by forge. Only populated at higher verbosity levels.
    #[serde(default)]
    pub decoded_logs: Vec<String>,
}

/// The status of a single test function, as reported by forge.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum TestStatus {
    /// The test passed.
    Success,

    /// The test failed.
    Failure,

    /// The test was skipped with `vm.skip`.
    Skipped,

    /// A status not known to this version of forge-explorer.
    #[serde(other)]
    Unknown,
}

impl TestStatus {
    /// Returns true if this is [`TestStatus::Success`].
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Parts { secs: u64, nanos: u32 },
    Text(String),
}

fn deserialize_opt_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<RawDuration>::deserialize(deserializer)?;
    Ok(match raw {
        Some(RawDuration::Parts { secs, nanos }) => Some(Duration::new(secs, nanos)),
        // Durations that can't be read are dropped rather than failing the whole result.
        Some(RawDuration::Text(text)) => parse_duration_text(&text),
        None => None,
    })
}

/// Parses durations as printed by Rust's `Debug` impl, e.g. `1.5ms` or `12µs`.
fn parse_duration_text(text: &str) -> Option<Duration> {
    let text = text.trim();
    let split = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(split);
    let nanos_per_unit: u128 = match unit.trim() {
        "ns" => 1,
        "µs" | "us" => 1_000,
        "ms" => 1_000_000,
        "s" | "" => 1_000_000_000,
        _ => return None,
    };

    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    let whole: u128 = if whole.is_empty() {
        0
    } else {
        whole.parse().ok()?
    };
    let mut nanos = whole.checked_mul(nanos_per_unit)?;
    if !fraction.is_empty() {
        // Integer arithmetic keeps values like 1.5ms exact.
        let digits = u32::try_from(fraction.len()).ok()?;
        let fraction: u128 = fraction.parse().ok()?;
        let scale = 10u128.checked_pow(digits)?;
        nanos = nanos.checked_add(fraction.checked_mul(nanos_per_unit)? / scale)?;
    }

    let secs = u64::try_from(nanos / 1_000_000_000).ok()?;
    let subsec = u32::try_from(nanos % 1_000_000_000).ok()?;
    Some(Duration::new(secs, subsec))
}
