// Copyright (c) The forge-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::{Utf8Path, Utf8PathBuf};
use camino_tempfile::Utf8TempDir;
use color_eyre::eyre::{Result, WrapErr};
use forge_explorer_metadata::{
    ContractPositionSummary, TestPositionSummary, TestsPositionsParams, TestsPositionsResponse,
};
use forge_explorer_runner::{
    config::ExplorerConfig, errors::ResolverUnavailable, positions::PositionService,
};
use std::os::unix::fs::PermissionsExt;

pub(crate) const FOO_SOURCE: &str = "\
pragma solidity ^0.8.13;

contract FooTest {
    function setUp() public {}
    function testAdd() public {}
    function testSub() public {}
}
";

pub(crate) const BAR_SOURCE: &str = "\
pragma solidity ^0.8.13;

contract BarTest {
    function testBar() public {}
}
";

pub(crate) const FOO_RESULTS: &str = r#"{"test/Foo.t.sol:FooTest":{"duration":"2.512ms","test_results":{"testAdd()":{"status":"Success","reason":null,"decoded_logs":[]},"testSub()":{"status":"Failure","reason":"assertion failed","decoded_logs":[]}},"warnings":[]}}"#;

pub(crate) const BAR_RESULTS: &str = r#"{"test/Bar.t.sol:BarTest":{"duration":{"secs":0,"nanos":800000},"test_results":{"testBar()":{"status":"Success","reason":null,"decoded_logs":[]}},"warnings":[]}}"#;

/// Replays `results/<contract>.json` for `--match-contract <contract>`, and fails with the
/// contents of `results/<contract>.err` if that exists instead. Every invocation is appended to
/// `invocations.log`.
const FAKE_FORGE: &str = r#"#!/bin/sh
dir="$(dirname "$0")"
if [ "$1" = "--version" ]; then
    echo "forge 1.0.0 (fake)"
    exit 0
fi
echo "$*" >> "$dir/invocations.log"
contract=""
while [ $# -gt 0 ]; do
    if [ "$1" = "--match-contract" ]; then
        contract="$2"
        shift
    fi
    shift
done
if [ -f "$dir/results/$contract.err" ]; then
    cat "$dir/results/$contract.err" >&2
    exit 1
fi
if [ -f "$dir/results/$contract.json" ]; then
    echo "Compiling 2 files with Solc 0.8.23"
    cat "$dir/results/$contract.json"
    echo
    if grep -q '"Failure"' "$dir/results/$contract.json"; then
        exit 1
    fi
    exit 0
fi
echo "Error: no contracts matched \`$contract\`" >&2
exit 1
"#;

/// A temporary Foundry workspace with a fake `forge` on the side.
pub(crate) struct Workspace {
    // Held for its Drop impl.
    _dir: Utf8TempDir,
    root: Utf8PathBuf,
    bin: Utf8PathBuf,
}

impl Workspace {
    pub(crate) fn new() -> Result<Self> {
        let dir = Utf8TempDir::new().wrap_err("failed to create temp dir")?;
        // Canonicalize so that paths reported by the file watcher compare equal.
        let base = dir.path().canonicalize_utf8()?;
        let root = base.join("workspace");
        let bin = base.join("bin");
        std::fs::create_dir_all(&root)?;
        std::fs::create_dir_all(bin.join("results"))?;

        let forge = bin.join("forge");
        std::fs::write(&forge, FAKE_FORGE)?;
        std::fs::set_permissions(&forge, std::fs::Permissions::from_mode(0o755))?;

        Ok(Self {
            _dir: dir,
            root,
            bin,
        })
    }

    pub(crate) fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub(crate) fn forge(&self) -> Utf8PathBuf {
        self.bin.join("forge")
    }

    pub(crate) fn write(&self, path: &str, contents: &str) -> Result<Utf8PathBuf> {
        let path = self.root.join(path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, contents).wrap_err_with(|| format!("failed to write {path}"))?;
        Ok(path)
    }

    /// Writes `.config/forge-explorer.toml`, pointing forge at the fake script.
    pub(crate) fn write_config(&self, extra: &str) -> Result<()> {
        let config = format!("[forge]\nprogram = \"{}\"\n{extra}", self.forge());
        self.write(ExplorerConfig::CONFIG_PATH, &config)?;
        Ok(())
    }

    pub(crate) fn config(&self) -> Result<ExplorerConfig> {
        Ok(ExplorerConfig::from_sources(&self.root, None)?)
    }

    pub(crate) fn set_results(&self, contract: &str, json: &str) -> Result<()> {
        std::fs::write(self.bin.join("results").join(format!("{contract}.json")), json)?;
        Ok(())
    }

    pub(crate) fn set_failure(&self, contract: &str, stderr: &str) -> Result<()> {
        std::fs::write(self.bin.join("results").join(format!("{contract}.err")), stderr)?;
        Ok(())
    }

    /// Returns the argument lists forge was invoked with, excluding `--version` checks.
    pub(crate) fn invocations(&self) -> Vec<String> {
        std::fs::read_to_string(self.bin.join("invocations.log"))
            .map(|log| log.lines().map(str::to_owned).collect())
            .unwrap_or_default()
    }
}

/// Finds `contract X` and `function testY` declarations line by line.
#[derive(Clone, Debug, Default)]
pub(crate) struct ScanService;

impl PositionService for ScanService {
    async fn get_tests_positions(
        &self,
        params: TestsPositionsParams,
    ) -> Result<TestsPositionsResponse, ResolverUnavailable> {
        let mut contracts: Vec<ContractPositionSummary> = Vec::new();
        for (index, line) in params.file_content.lines().enumerate() {
            let line_number = index as u32 + 1;
            if let Some((name, range)) = declared(line, "contract ", line_number) {
                contracts.push(ContractPositionSummary {
                    name,
                    range,
                    tests: Vec::new(),
                });
            } else if let Some((name, range)) = declared(line, "function ", line_number)
                && name.starts_with("test")
                && let Some(contract) = contracts.last_mut()
            {
                contract.tests.push(TestPositionSummary { name, range });
            }
        }
        Ok(TestsPositionsResponse { contracts })
    }
}

fn declared(line: &str, keyword: &str, line_number: u32) -> Option<(String, lsp_types::Range)> {
    let start = line.find(keyword)? + keyword.len();
    let name: String = line[start..]
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    if name.is_empty() {
        return None;
    }
    let range = lsp_types::Range::new(
        lsp_types::Position::new(line_number, start as u32),
        lsp_types::Position::new(line_number, (start + name.len()) as u32),
    );
    Some((name, range))
}
