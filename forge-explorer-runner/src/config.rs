// Copyright (c) The forge-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for forge-explorer.
//!
//! Configuration is layered: the defaults embedded in this crate come first, then the repository's
//! `.config/forge-explorer.toml` (or a file passed in explicitly) is merged on top.

use crate::{
    coordinator::BusyPolicy,
    errors::{ConfigParseError, ConfigParseErrorKind},
};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, ConfigBuilder, File, FileFormat, builder::DefaultState};
use serde::Deserialize;
use std::time::Duration;

/// Overall configuration for forge-explorer.
#[derive(Clone, Debug)]
pub struct ExplorerConfig {
    workspace_root: Utf8PathBuf,
    inner: ExplorerConfigImpl,
}

impl ExplorerConfig {
    /// The default location of the config within the workspace: `.config/forge-explorer.toml`.
    pub const CONFIG_PATH: &'static str = ".config/forge-explorer.toml";

    /// Contains the default config as a TOML file.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../default-config.toml");

    /// Reads the config from the default location within the workspace, or from `config_file` if
    /// specified. A missing file at the default location is not an error.
    pub fn from_sources(
        workspace_root: impl Into<Utf8PathBuf>,
        config_file: Option<&Utf8Path>,
    ) -> Result<Self, ConfigParseError> {
        let workspace_root = workspace_root.into();
        let (config_file, source) = match config_file {
            Some(file) => (file.to_owned(), File::new(file.as_str(), FileFormat::Toml)),
            None => {
                let config_file = workspace_root.join(Self::CONFIG_PATH);
                let source = File::new(config_file.as_str(), FileFormat::Toml).required(false);
                (config_file, source)
            }
        };

        let builder = Self::make_default_config().add_source(source);
        let inner = Self::build_and_deserialize_config(&builder)
            .map_err(|kind| ConfigParseError::new(config_file, kind))?;

        Ok(Self {
            workspace_root,
            inner,
        })
    }

    /// Returns the default configuration for a workspace, ignoring any config files.
    pub fn default_config(workspace_root: impl Into<Utf8PathBuf>) -> Self {
        let inner = Self::build_and_deserialize_config(&Self::make_default_config())
            .unwrap_or_else(|err| panic!("embedded default config is invalid: {err}"));
        Self {
            workspace_root: workspace_root.into(),
            inner,
        }
    }

    /// Returns the workspace root.
    pub fn workspace_root(&self) -> &Utf8Path {
        &self.workspace_root
    }

    /// Returns the test discovery settings.
    pub fn discovery(&self) -> &DiscoveryConfig {
        &self.inner.discovery
    }

    /// Returns the settings for invoking forge.
    pub fn forge(&self) -> &ForgeConfig {
        &self.inner.forge
    }

    /// Returns the position service settings.
    pub fn positions(&self) -> &PositionsConfig {
        &self.inner.positions
    }

    /// Returns the policy for run requests that arrive while another run is active.
    pub fn busy_policy(&self) -> BusyPolicy {
        self.inner.run.busy_policy
    }

    /// Overrides the busy policy.
    pub fn set_busy_policy(&mut self, busy_policy: BusyPolicy) -> &mut Self {
        self.inner.run.busy_policy = busy_policy;
        self
    }

    /// Overrides whether the workspace is watched after discovery.
    pub fn set_watch(&mut self, watch: bool) -> &mut Self {
        self.inner.discovery.watch = watch;
        self
    }

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    fn build_and_deserialize_config(
        builder: &ConfigBuilder<DefaultState>,
    ) -> Result<ExplorerConfigImpl, ConfigParseErrorKind> {
        let config = builder
            .build_cloned()
            .map_err(|error| ConfigParseErrorKind::BuildError(Box::new(error)))?;

        let inner: ExplorerConfigImpl = serde_path_to_error::deserialize(config)
            .map_err(|error| ConfigParseErrorKind::DeserializeError(Box::new(error)))?;

        if inner.discovery.test_file_suffix.is_empty() {
            return Err(ConfigParseErrorKind::EmptyTestFileSuffix);
        }
        if inner.positions.command.is_empty() {
            return Err(ConfigParseErrorKind::EmptyPositionsCommand);
        }
        Ok(inner)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ExplorerConfigImpl {
    discovery: DiscoveryConfig,
    forge: ForgeConfig,
    positions: PositionsConfig,
    run: RunConfigImpl,
}

/// Settings for finding test files.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DiscoveryConfig {
    /// Files whose names end with this suffix are test files.
    pub test_file_suffix: String,

    /// Directory names that are never scanned.
    pub exclude_dirs: Vec<String>,

    /// Whether to watch the workspace after discovery.
    pub watch: bool,
}

impl DiscoveryConfig {
    /// Returns true if `path` names a test file.
    pub fn is_test_file(&self, path: &Utf8Path) -> bool {
        path.file_name()
            .is_some_and(|name| name.ends_with(&self.test_file_suffix))
    }

    /// Returns true if the directory with this name should not be scanned.
    pub fn is_excluded_dir(&self, name: &str) -> bool {
        self.exclude_dirs.iter().any(|excluded| excluded == name)
    }
}

/// Settings for invoking forge.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ForgeConfig {
    /// The program to run.
    pub program: String,

    /// Extra arguments passed to every `forge test` invocation.
    pub extra_args: Vec<String>,
}

/// Settings for the position service.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PositionsConfig {
    /// The command (program followed by arguments) that starts the service.
    pub command: Vec<String>,

    /// How long to wait for a single response.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RunConfigImpl {
    busy_policy: BusyPolicy,
}
