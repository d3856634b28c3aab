// Copyright (c) The forge-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::PositionService;
use crate::{config::ExplorerConfig, errors::ResolverUnavailable};
use async_lsp::{MainLoop, ServerSocket, concurrency::ConcurrencyLayer, router::Router};
use camino::Utf8PathBuf;
use forge_explorer_metadata::{GetTestsPositions, TestsPositionsParams, TestsPositionsResponse};
use lsp_types::{
    InitializeParams, InitializedParams,
    notification::{Initialized, LogMessage, Notification},
    request::{Initialize, Request},
};
use std::{
    io,
    ops::ControlFlow,
    process::Stdio,
    sync::Arc,
    time::Duration,
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    process::{Child, Command},
    task::JoinHandle,
};
use tokio_util::compat::{TokioAsyncReadCompatExt, TokioAsyncWriteCompatExt};
use tower::ServiceBuilder;
use tracing::debug;

/// A [`PositionService`] backed by the tests-positions language server.
///
/// The server is started lazily on the first request and restarted if it exits. It speaks LSP
/// over its standard input and output.
#[derive(Debug)]
pub struct LspPositionService {
    command: Vec<String>,
    cwd: Utf8PathBuf,
    request_timeout: Duration,
    connection: tokio::sync::Mutex<Option<Arc<LspConnection>>>,
}

impl LspPositionService {
    /// Creates a new service that runs `command` in `cwd`.
    pub fn new(command: Vec<String>, cwd: impl Into<Utf8PathBuf>, request_timeout: Duration) -> Self {
        Self {
            command,
            cwd: cwd.into(),
            request_timeout,
            connection: tokio::sync::Mutex::new(None),
        }
    }

    /// Creates a new service from the `[positions]` section of the config.
    pub fn from_config(config: &ExplorerConfig) -> Self {
        Self::new(
            config.positions().command.clone(),
            config.workspace_root(),
            config.positions().request_timeout,
        )
    }

    async fn connection(&self) -> Result<Arc<LspConnection>, ResolverUnavailable> {
        let mut guard = self.connection.lock().await;
        if let Some(connection) = &*guard {
            if !connection.is_closed() {
                return Ok(connection.clone());
            }
            debug!("position service exited, restarting it");
        }

        let connection = Arc::new(self.spawn().await?);
        *guard = Some(connection.clone());
        Ok(connection)
    }

    async fn spawn(&self) -> Result<LspConnection, ResolverUnavailable> {
        let spawn_error = |error| ResolverUnavailable::Spawn {
            command: self.command.clone(),
            error,
        };
        let Some((program, args)) = self.command.split_first() else {
            return Err(spawn_error(io::Error::new(
                io::ErrorKind::InvalidInput,
                "empty command",
            )));
        };

        debug!(
            command = %shell_words::join(&self.command),
            cwd = %self.cwd,
            "starting position service"
        );
        let mut child = Command::new(program)
            .args(args)
            .current_dir(&self.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(ResolverUnavailable::Closed);
        };
        let connection = LspConnection::new(stdout, stdin, Some(child));
        connection.initialize(self.request_timeout).await?;
        Ok(connection)
    }
}

impl PositionService for LspPositionService {
    async fn get_tests_positions(
        &self,
        params: TestsPositionsParams,
    ) -> Result<TestsPositionsResponse, ResolverUnavailable> {
        let connection = self.connection().await?;
        connection
            .request::<GetTestsPositions>(params, self.request_timeout)
            .await
    }
}

/// A client connection to a language server.
///
/// The connection's main loop runs on its own task. Once that task ends, for any reason, the
/// connection is closed for good.
pub(crate) struct LspConnection {
    server: ServerSocket,
    main_loop: JoinHandle<()>,
    // Held so the server is killed when the connection is dropped.
    _child: Option<Child>,
}

impl std::fmt::Debug for LspConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LspConnection")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl LspConnection {
    pub(crate) fn new<R, W>(reader: R, writer: W, child: Option<Child>) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (main_loop, server) = MainLoop::new_client(|_server| {
            let mut router = Router::new(());
            router
                .notification::<LogMessage>(|_, params| {
                    debug!(target: "forge_explorer_runner::positions::server", "{}", params.message);
                    ControlFlow::Continue(())
                })
                .unhandled_notification(|_, _| ControlFlow::Continue(()));
            ServiceBuilder::new()
                .layer(ConcurrencyLayer::default())
                .service(router)
        });
        let main_loop = tokio::spawn(async move {
            match main_loop
                .run_buffered(reader.compat(), writer.compat_write())
                .await
            {
                Ok(()) => debug!("position service closed the connection"),
                Err(error) => debug!("position service connection failed: {error}"),
            }
        });

        Self {
            server,
            main_loop,
            _child: child,
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.main_loop.is_finished()
    }

    pub(crate) async fn initialize(&self, timeout: Duration) -> Result<(), ResolverUnavailable> {
        let params = InitializeParams {
            process_id: Some(std::process::id()),
            ..Default::default()
        };
        let result = self.request::<Initialize>(params, timeout).await?;
        if let Some(info) = &result.server_info {
            debug!(
                name = %info.name,
                version = info.version.as_deref().unwrap_or("unknown"),
                "position service initialized"
            );
        }
        self.notify::<Initialized>(InitializedParams {})
    }

    pub(crate) async fn request<R: Request>(
        &self,
        params: R::Params,
        timeout: Duration,
    ) -> Result<R::Result, ResolverUnavailable> {
        if self.is_closed() {
            return Err(ResolverUnavailable::Closed);
        }
        match tokio::time::timeout(timeout, self.server.request::<R>(params)).await {
            Ok(result) => result.map_err(from_lsp_error),
            Err(_) => Err(ResolverUnavailable::Timeout { timeout }),
        }
    }

    pub(crate) fn notify<N: Notification>(
        &self,
        params: N::Params,
    ) -> Result<(), ResolverUnavailable> {
        self.server.notify::<N>(params).map_err(from_lsp_error)
    }
}

impl Drop for LspConnection {
    fn drop(&mut self) {
        self.main_loop.abort();
    }
}

fn from_lsp_error(error: async_lsp::Error) -> ResolverUnavailable {
    match error {
        async_lsp::Error::Response(error) => ResolverUnavailable::Server {
            code: i64::from(error.code.0),
            message: error.message,
        },
        async_lsp::Error::Deserialize(error) => ResolverUnavailable::Malformed(error),
        async_lsp::Error::ServiceStopped => ResolverUnavailable::Closed,
        other => ResolverUnavailable::Protocol {
            message: other.to_string(),
        },
    }
}
