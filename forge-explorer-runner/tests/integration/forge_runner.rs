// Copyright (c) The forge-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use color_eyre::eyre::{Result, bail};
use forge_explorer_metadata::TestStatus;
use forge_explorer_runner::{
    errors::{RunnerExecutionError, TestToolError},
    forge::{ForgeRunner, RunOptions, RunScope, TestRunner, TestTool},
};
use pretty_assertions::assert_eq;

#[tokio::test]
async fn contract_results_with_failures() -> Result<()> {
    let workspace = Workspace::new()?;
    workspace.set_results("FooTest", FOO_RESULTS)?;
    let runner = TestRunner::new(ForgeRunner::new(workspace.forge(), workspace.root()));

    assert!(runner.tool().check_tool_available().await);
    // The fake exits 1 because a test failed, but the results still come through.
    let results = runner
        .run_contract("FooTest", RunOptions::default())
        .await?;
    let suite = results
        .suite_for_contract("FooTest")
        .expect("FooTest suite is reported");
    assert_eq!(
        suite.test_for_function("testAdd").map(|test| test.status),
        Some(TestStatus::Success)
    );
    let sub = suite.test_for_function("testSub").expect("testSub is reported");
    assert_eq!(sub.status, TestStatus::Failure);
    assert_eq!(sub.reason.as_deref(), Some("assertion failed"));

    assert_eq!(
        workspace.invocations(),
        vec!["test --json --match-contract FooTest"]
    );
    Ok(())
}

#[tokio::test]
async fn function_scope_and_options_reach_forge() -> Result<()> {
    let workspace = Workspace::new()?;
    workspace.set_results("BarTest", BAR_RESULTS)?;
    let tool = ForgeRunner::new(workspace.forge(), workspace.root())
        .with_extra_args(vec!["--offline".to_owned()]);

    let results = tool
        .execute(
            RunScope::Function {
                contract: "BarTest".to_owned(),
                function: "testBar".to_owned(),
            },
            RunOptions { debug: true },
        )
        .await?;
    assert!(results.suite_for_contract("BarTest").is_some());
    assert_eq!(
        workspace.invocations(),
        vec!["test --json --offline --match-contract BarTest --match-test testBar -vvv"]
    );
    Ok(())
}

#[tokio::test]
async fn compile_failure_is_an_execution_error() -> Result<()> {
    let workspace = Workspace::new()?;
    workspace.set_failure("FooTest", "Error: Compiler run failed:\nError (2314): Expected ';'\n")?;
    let runner = TestRunner::new(ForgeRunner::new(workspace.forge(), workspace.root()));

    match runner.run_contract("FooTest", RunOptions::default()).await {
        Err(TestToolError::Execution(RunnerExecutionError::Failed {
            exit_status,
            diagnostics,
            ..
        })) => {
            assert_eq!(exit_status.code(), Some(1));
            assert_eq!(
                diagnostics,
                "Error: Compiler run failed:\nError (2314): Expected ';'"
            );
        }
        other => bail!("expected an execution failure, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn missing_program_is_unavailable() -> Result<()> {
    let workspace = Workspace::new()?;
    let program = workspace.root().join("no-such-forge");
    let runner = TestRunner::new(ForgeRunner::new(program.as_str(), workspace.root()));

    assert!(!runner.tool().check_tool_available().await);
    match runner.run_all(RunOptions::default()).await {
        Err(TestToolError::Unavailable(error)) => {
            assert_eq!(error.program(), program.as_str());
        }
        other => bail!("expected the tool to be unavailable, got {other:?}"),
    }
    Ok(())
}
