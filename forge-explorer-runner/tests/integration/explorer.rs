// Copyright (c) The forge-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use color_eyre::eyre::{Result, eyre};
use forge_explorer_metadata::{NodeKind, OutcomeStatus, RunStatus};
use forge_explorer_runner::{
    coordinator::RunRequest,
    explorer::Explorer,
    forge::ForgeRunner,
    reporter::{RunDisplayer, RunEvent},
    tree::{NodeKey, NodeQuery, TreeEvent},
};
use pretty_assertions::assert_eq;
use std::time::Duration;
use tokio::sync::broadcast;

fn explorer(workspace: &Workspace) -> Result<Explorer<ScanService, ForgeRunner>> {
    let config = workspace.config()?;
    let tool = ForgeRunner::from_config(&config);
    Ok(Explorer::new(config, ScanService, tool))
}

fn two_file_workspace(watch: bool) -> Result<Workspace> {
    let workspace = Workspace::new()?;
    workspace.write_config(&format!("[discovery]\nwatch = {watch}\n"))?;
    workspace.write("test/Foo.t.sol", FOO_SOURCE)?;
    workspace.write("test/Bar.t.sol", BAR_SOURCE)?;
    workspace.write("src/Counter.sol", "contract Counter {}\n")?;
    workspace.write(
        "lib/forge-std/test/StdMath.t.sol",
        "contract StdMathTest {\n    function testGetAbs() public {}\n}\n",
    )?;
    workspace.set_results("FooTest", FOO_RESULTS)?;
    workspace.set_results("BarTest", BAR_RESULTS)?;
    Ok(workspace)
}

#[tokio::test]
async fn discover_and_list() -> Result<()> {
    let workspace = two_file_workspace(false)?;
    let explorer = explorer(&workspace)?;

    let files = explorer.discover_root().await?;
    assert_eq!(files.len(), 2, "lib/ is excluded from discovery");
    assert!(files.iter().all(|file| !file.is_resolved()));

    for file in &files {
        explorer.resolve_node(Some(file.key())).await?;
    }
    let summary = explorer.tree().summary();
    let contracts: Vec<_> = summary
        .files
        .iter()
        .flat_map(|file| file.contracts.iter().map(|contract| contract.label.clone()))
        .collect();
    assert_eq!(contracts, vec!["BarTest", "FooTest"]);

    let foo = workspace.root().join("test/Foo.t.sol");
    let keys = explorer
        .tree()
        .find_matching(&"FooTest::testSub".parse::<NodeQuery>()?);
    assert_eq!(
        keys,
        vec![NodeKey::for_file(&foo).child("FooTest_testSub")]
    );
    Ok(())
}

#[tokio::test]
async fn run_everything() -> Result<()> {
    let workspace = two_file_workspace(false)?;
    let explorer = explorer(&workspace)?;

    let mut finished = Vec::new();
    let report = explorer
        .run(RunRequest::all(), |event| {
            if let RunEvent::NodeFinished(outcome) = event {
                finished.push(outcome.name);
            }
        })
        .await?;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.counts.passed, 2);
    assert_eq!(report.counts.failed, 1);
    assert_eq!(
        finished,
        vec![
            "BarTest::testBar",
            "BarTest",
            "FooTest::testAdd",
            "FooTest::testSub",
            "FooTest",
        ]
    );

    let sub = report
        .outcomes
        .iter()
        .find(|outcome| outcome.name == "FooTest::testSub")
        .ok_or_else(|| eyre!("testSub has an outcome"))?;
    assert_eq!(sub.status, OutcomeStatus::Failed);
    assert_eq!(sub.kind, Some(NodeKind::Case));
    assert_eq!(sub.message.as_deref(), Some("assertion failed"));
    assert_eq!(
        workspace.invocations(),
        vec![
            "test --json --match-contract BarTest",
            "test --json --match-contract FooTest",
        ]
    );

    let mut output = Vec::new();
    RunDisplayer::new().write_summary(&report, &mut output)?;
    let output = String::from_utf8(output)?;
    assert!(
        output.contains("3 tests run: 2 passed, 1 failed"),
        "unexpected summary:\n{output}"
    );
    Ok(())
}

#[tokio::test]
async fn compile_failure_errors_every_case() -> Result<()> {
    let workspace = two_file_workspace(false)?;
    workspace.set_failure("FooTest", "Error: Compiler run failed")?;
    let explorer = explorer(&workspace)?;
    explorer.discover_root().await?;

    let foo = NodeKey::for_file(&workspace.root().join("test/Foo.t.sol"));
    let report = explorer.run(RunRequest::new([foo]), |_| {}).await?;

    assert_eq!(report.counts.errored, 2);
    for outcome in &report.outcomes {
        assert_eq!(outcome.status, OutcomeStatus::Errored, "{}", outcome.name);
        let message = outcome.message.as_deref().unwrap_or_default();
        assert!(
            message.contains("Error: Compiler run failed"),
            "unexpected message for {}: {message}",
            outcome.name
        );
    }
    Ok(())
}

async fn next_event(events: &mut broadcast::Receiver<TreeEvent>) -> Result<TreeEvent> {
    Ok(tokio::time::timeout(Duration::from_secs(10), events.recv()).await??)
}

#[tokio::test]
async fn watcher_picks_up_new_and_deleted_files() -> Result<()> {
    let workspace = two_file_workspace(true)?;
    let explorer = explorer(&workspace)?;
    explorer.discover_root().await?;
    let mut events = explorer.subscribe();
    let _event_loop = explorer.spawn_event_loop();

    let baz = workspace.write(
        "test/Baz.t.sol",
        "contract BazTest {\n    function testBaz() public {}\n}\n",
    )?;
    let baz_key = NodeKey::for_file(&baz);
    loop {
        if next_event(&mut events).await? == TreeEvent::NodeCreated(baz_key.clone()) {
            break;
        }
    }
    assert!(explorer.tree().file(&baz).is_some());

    std::fs::remove_file(&baz)?;
    loop {
        if next_event(&mut events).await? == TreeEvent::NodeRemoved(baz_key.clone()) {
            break;
        }
    }
    assert!(explorer.tree().file(&baz).is_none());
    Ok(())
}
