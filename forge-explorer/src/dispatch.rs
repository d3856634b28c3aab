// Copyright (c) The forge-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    ExpectedError,
    errors::Result,
    output::{OutputContext, OutputOpts, clap_styles},
};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand, ValueEnum};
use forge_explorer_metadata::{ExplorerExitCode, RunStatus};
use forge_explorer_runner::{
    config::ExplorerConfig,
    coordinator::{CancelToken, RunRequest},
    explorer::Explorer,
    forge::ForgeRunner,
    positions::LspPositionService,
    reporter::{RunDisplayer, TreeDisplayer},
    signal::SignalHandlerKind,
    tree::{NodeKey, NodeQuery, TreeEvent},
};
use owo_colors::OwoColorize;
use std::{
    collections::BTreeSet,
    io::{self, Write},
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

type ForgeExplorer = Explorer<LspPositionService, ForgeRunner>;

/// Discover and run Foundry tests.
#[derive(Debug, Parser)]
#[command(
    name = "forge-explorer",
    version,
    styles = clap_styles::style(),
    max_term_width = 100
)]
pub struct ForgeExplorerApp {
    #[clap(flatten)]
    common: CommonOpts,

    #[clap(subcommand)]
    command: Command,
}

impl ForgeExplorerApp {
    /// Initializes logging and colors.
    pub fn init_output(&self) -> OutputContext {
        self.common.output.init()
    }

    /// Executes the app, returning the process exit code on success.
    pub fn exec(self, output: OutputContext) -> Result<i32> {
        let workspace_root = self.common.workspace_root()?;
        let config =
            ExplorerConfig::from_sources(workspace_root, self.common.config_file.as_deref())?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|err| ExpectedError::RuntimeCreateError { err })?;

        runtime.block_on(self.command.exec(config, output))
    }
}

#[derive(Debug, Args)]
struct CommonOpts {
    /// Path to the Foundry workspace [default: current directory]
    #[arg(long, global = true, value_name = "DIR", env = "FORGE_EXPLORER_WORKSPACE")]
    workspace: Option<Utf8PathBuf>,

    /// Config file [default: <workspace>/.config/forge-explorer.toml]
    #[arg(long, global = true, value_name = "PATH")]
    config_file: Option<Utf8PathBuf>,

    #[clap(flatten)]
    output: OutputOpts,
}

impl CommonOpts {
    fn workspace_root(&self) -> Result<Utf8PathBuf> {
        if let Some(workspace) = &self.workspace {
            return Ok(workspace.clone());
        }
        let current_dir =
            std::env::current_dir().map_err(|err| ExpectedError::CurrentDirFailed { err })?;
        Utf8PathBuf::try_from(current_dir)
            .map_err(|err| ExpectedError::WorkspaceRootInvalidUtf8 { err })
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List test files, contracts and test functions
    ///
    /// Every test file is analyzed with the configured language server to find its contracts and
    /// test functions. Files that fail to analyze are listed as not resolved.
    List {
        #[arg(long, value_enum, default_value_t, value_name = "FORMAT")]
        message_format: MessageFormat,
    },

    /// Run tests with forge
    ///
    /// Without filters, every test in the workspace is run. A filter is a test file path, a contract
    /// name, `Contract::function`, or a node key.
    Run(RunOpts),

    /// Watch the workspace and report changes to the test tree
    Watch,
}

impl Command {
    async fn exec(self, mut config: ExplorerConfig, output: OutputContext) -> Result<i32> {
        // Only `watch` applies workspace events, so other commands don't start a watcher.
        config.set_watch(matches!(self, Self::Watch));
        let explorer = ForgeExplorer::from_config(config);
        match self {
            Self::List { message_format } => exec_list(&explorer, message_format, output).await,
            Self::Run(opts) => opts.exec(&explorer, output).await,
            Self::Watch => exec_watch(&explorer, output).await,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, ValueEnum)]
enum MessageFormat {
    /// Human-readable output
    #[default]
    Human,

    /// JSON output on stdout
    Json,
}

async fn resolve_all_files(explorer: &ForgeExplorer) -> Result<()> {
    for file in explorer.discover_root().await? {
        if let Err(error) = explorer.resolve_node(Some(file.key())).await {
            warn!("{error}");
        }
    }
    Ok(())
}

async fn exec_list(
    explorer: &ForgeExplorer,
    message_format: MessageFormat,
    output: OutputContext,
) -> Result<i32> {
    resolve_all_files(explorer).await?;

    let stdout = io::stdout();
    let mut writer = stdout.lock();
    match message_format {
        MessageFormat::Human => {
            let mut displayer = TreeDisplayer::new();
            if output.color.should_colorize(supports_color::Stream::Stdout) {
                displayer.colorize();
            }
            displayer
                .write_tree(
                    &explorer.tree().files(),
                    explorer.config().workspace_root(),
                    &mut writer,
                )
                .map_err(ExpectedError::write_output)?;
        }
        MessageFormat::Json => {
            serde_json::to_writer_pretty(&mut writer, &explorer.tree().summary())
                .map_err(|err| ExpectedError::SerializeError { err })?;
            writeln!(writer).map_err(ExpectedError::write_output)?;
        }
    }
    writer.flush().map_err(ExpectedError::write_output)?;
    Ok(ExplorerExitCode::OK)
}

#[derive(Debug, Args)]
struct RunOpts {
    /// Tests to run [default: all]
    #[arg(value_name = "FILTERS")]
    filters: Vec<String>,

    /// Tests to skip, in the same syntax as filters
    #[arg(long, value_name = "FILTER")]
    exclude: Vec<String>,

    /// Show logs emitted by tests in failure messages
    #[arg(long)]
    debug: bool,

    /// Format of the final report
    #[arg(long, value_enum, default_value_t, value_name = "FORMAT")]
    message_format: MessageFormat,
}

impl RunOpts {
    async fn exec(self, explorer: &ForgeExplorer, output: OutputContext) -> Result<i32> {
        let queries = parse_queries(&self.filters)?;
        let excludes = parse_queries(&self.exclude)?;

        explorer.discover_root().await?;
        // Contract and case queries only match analyzed files.
        let needs_resolution = queries
            .iter()
            .chain(&excludes)
            .any(|query| matches!(query, NodeQuery::Contract(_) | NodeQuery::Case { .. }));
        if needs_resolution {
            resolve_all_files(explorer).await?;
        }

        let targets = match_queries(explorer, &queries);
        if !queries.is_empty() && targets.is_empty() {
            return Err(ExpectedError::NoMatchingTests {
                filters: self.filters,
            });
        }
        let excluded = match_queries(explorer, &excludes);

        let cancel = CancelToken::new();
        let _signal_guard = SignalHandlerKind::Standard.cancel_on_signal(cancel.clone())?;

        let request = RunRequest::new(targets)
            .exclude(excluded)
            .set_debug(self.debug)
            .with_cancel_token(cancel);

        let mut displayer = RunDisplayer::new();
        if output.color.should_colorize(supports_color::Stream::Stderr) {
            displayer.colorize();
        }
        let stderr = io::stderr();
        let mut write_error = None;
        let report = explorer
            .run(request, |event| {
                if write_error.is_some() {
                    return;
                }
                if let Err(error) = displayer.write_event(&event, &mut stderr.lock()) {
                    write_error = Some(error);
                }
            })
            .await?;
        if let Some(err) = write_error {
            return Err(ExpectedError::write_output(err));
        }

        match self.message_format {
            MessageFormat::Human => {
                displayer
                    .write_summary(&report, &mut stderr.lock())
                    .map_err(ExpectedError::write_output)?;
            }
            MessageFormat::Json => {
                let stdout = io::stdout();
                let mut writer = stdout.lock();
                serde_json::to_writer_pretty(&mut writer, &report.to_summary())
                    .map_err(|err| ExpectedError::SerializeError { err })?;
                writeln!(writer).map_err(ExpectedError::write_output)?;
            }
        }

        if report.status == RunStatus::Cancelled {
            Err(ExpectedError::RunCancelled)
        } else if report.has_failures() {
            Err(ExpectedError::TestRunFailed)
        } else if report.counts.total() == 0 {
            Err(ExpectedError::NoTestsRun)
        } else {
            Ok(ExplorerExitCode::OK)
        }
    }
}

fn parse_queries(inputs: &[String]) -> Result<Vec<NodeQuery>> {
    inputs
        .iter()
        .map(|input| {
            input
                .parse()
                .map_err(|err| ExpectedError::InvalidFilter {
                    input: input.clone(),
                    err,
                })
        })
        .collect()
}

fn match_queries(explorer: &ForgeExplorer, queries: &[NodeQuery]) -> BTreeSet<NodeKey> {
    queries
        .iter()
        .flat_map(|query| explorer.tree().find_matching(query))
        .collect()
}

async fn exec_watch(explorer: &ForgeExplorer, output: OutputContext) -> Result<i32> {
    let files = explorer.discover_root().await?;
    if !explorer.is_watching() {
        return Err(ExpectedError::WatchUnavailable {
            workspace_root: explorer.config().workspace_root().to_owned(),
        });
    }
    let mut events = explorer.subscribe();
    let _event_loop = explorer.spawn_event_loop();

    let styles = output.stderr_styles();
    let root = explorer.config().workspace_root();
    info!(
        "watching {} for changes ({} test files), press Ctrl-C to stop",
        root.style(styles.bold),
        files.len()
    );

    let stdout = io::stdout();
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    write_tree_event(&event, root, &mut stdout.lock())
                        .map_err(ExpectedError::write_output)?;
                }
                Err(RecvError::Lagged(count)) => {
                    warn!("missed {count} tree events");
                }
                Err(RecvError::Closed) => break,
            },
            result = tokio::signal::ctrl_c() => {
                result.map_err(|err| ExpectedError::SignalHandlerSetupError { err: err.into() })?;
                break;
            }
        }
    }
    Ok(ExplorerExitCode::OK)
}

fn write_tree_event(event: &TreeEvent, root: &Utf8Path, writer: &mut dyn Write) -> io::Result<()> {
    let (word, key) = match event {
        TreeEvent::NodeCreated(key) => ("ADDED", key),
        TreeEvent::NodeRemoved(key) => ("REMOVED", key),
        TreeEvent::NodeResolved(key) => ("RESOLVED", key),
    };
    let path = key.file_path();
    let display = path.strip_prefix(root).unwrap_or(path.as_path());
    writeln!(writer, "{word:>12} {display}")
}
