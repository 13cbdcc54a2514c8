/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Helpers for tests driving a debugger client against mock servers.

use std::future::Future;
use std::time::Duration;

use crate::error::Error;
use crate::responders;
use crate::responders::LaunchedServer;
use crate::responders::ProcessInfo;
use crate::server::MockServer;

/// Upper bound for any single client step in tests. The mock servers have no
/// timeouts of their own.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(10);

/// Installs a `fmt` subscriber filtered by `RUST_LOG`, defaulting to
/// `gdbmock=debug`.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("gdbmock=debug"));
    let collector = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .finish();

    // Tests may be running in parallel, and we don't care who "wins".
    tracing::subscriber::set_global_default(collector).unwrap_or(());
}

/// Configure tokio and tracing in the way that we like, and run the future.
pub fn run_tokio_test<F: Future>(fut: F) -> F::Output {
    init_tracing();
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .enable_time()
        .build()
        .expect("failed to build tokio runtime");
    rt.block_on(fut)
}

/// Awaits `fut`, failing with `TimedOut` after [`STEP_TIMEOUT`].
pub async fn step<F, T>(fut: F) -> Result<T, Error>
where
    F: Future<Output = Result<T, Error>>,
{
    tokio::time::timeout(STEP_TIMEOUT, fut)
        .await
        .map_err(|_| Error::Io(std::io::ErrorKind::TimedOut.into()))?
}

/// Starts a gdbserver stub, then a platform stub listing `processes` whose
/// `qLaunchGDBServer` reply points at the gdbserver.
///
/// Returns `(platform, gdbserver)`.
pub fn start_platform_pair(processes: Vec<ProcessInfo>) -> Result<(MockServer, MockServer), Error> {
    let gdbserver = MockServer::start("gdbserver", responders::gdbserver())?;
    let port = gdbserver.port().ok_or(Error::ServerNotStarted)?;
    let platform = MockServer::start(
        "platform",
        responders::platform(processes, LaunchedServer::new(1337, port)),
    )?;
    Ok((platform, gdbserver))
}
