/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::net::SocketAddr;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::dispatch::HandlerTable;
use crate::error::Error;
use crate::session::Session;
use crate::session::SessionSummary;
use crate::transport::ConnectUrl;
use crate::transport::Endpoint;
use crate::transport::Listener;

/// Configures a [`MockServer`] before it is started.
pub struct MockServerBuilder {
    role: String,
    endpoint: Endpoint,
    table: HandlerTable,
    sequence_ids: bool,
}

impl MockServerBuilder {
    /// Name used in log lines, e.g. `platform` or `gdbserver`.
    pub fn role<S: Into<String>>(mut self, role: S) -> Self {
        self.role = role.into();
        self
    }

    pub fn endpoint<E: Into<Endpoint>>(mut self, endpoint: E) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn accept_sequence_ids(mut self, enable: bool) -> Self {
        self.sequence_ids = enable;
        self
    }

    /// Binds, then spawns the accept/dispatch loop onto the current tokio
    /// runtime. The server is ready to accept when this returns.
    pub fn start(self) -> Result<MockServer, Error> {
        let mut listener = Listener::bind(&self.endpoint)?;
        let url = listener.connect_url().clone();
        let local_addr = listener.local_addr();
        let (stop_tx, mut stop_rx) = oneshot::channel();

        tracing::info!("[{}] mock server listening on {}", self.role, url);

        let role = self.role.clone();
        let table = self.table;
        let sequence_ids = self.sequence_ids;
        let handle = tokio::task::spawn(async move {
            let conn = tokio::select! {
                conn = listener.accept() => conn?,
                _ = &mut stop_rx => {
                    tracing::debug!("[{}] stopped before a client connected", role);
                    return Ok(SessionSummary::default());
                }
            };
            let mut session = Session::new(role.clone(), conn, table);
            session.accept_sequence_ids(sequence_ids);
            let result = session.run(stop_rx).await;
            if let Err(err) = &result {
                tracing::error!("[{}] mock server failed: {:?}", role, err);
            }
            result
        });

        Ok(MockServer {
            role: self.role,
            url,
            local_addr,
            stop_tx: Some(stop_tx),
            handle: Some(handle),
            outcome: None,
        })
    }
}

/// A running mock server. Dropping it aborts the background task, which
/// releases the socket even when a test bails out early.
pub struct MockServer {
    role: String,
    url: ConnectUrl,
    local_addr: Option<SocketAddr>,
    stop_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<Result<SessionSummary, Error>>>,
    /// How the session ended, errors kept as text.
    outcome: Option<Result<SessionSummary, String>>,
}

impl MockServer {
    pub fn builder(table: HandlerTable) -> MockServerBuilder {
        MockServerBuilder {
            role: "mock".to_owned(),
            endpoint: Endpoint::loopback(),
            table,
            sequence_ids: false,
        }
    }

    /// Starts a server on an ephemeral loopback port.
    pub fn start<S: Into<String>>(role: S, table: HandlerTable) -> Result<Self, Error> {
        Self::builder(table).role(role).start()
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    /// URL a client should connect to, e.g. `connect://127.0.0.1:4321`.
    pub fn connect_url(&self) -> String {
        self.url.to_string()
    }

    pub fn url(&self) -> &ConnectUrl {
        &self.url
    }

    /// Bound TCP port, `None` for unix domain sockets.
    pub fn port(&self) -> Option<u16> {
        self.local_addr.map(|addr| addr.port())
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Stops the server and returns what its session did. Calling it again
    /// reports the same outcome.
    pub async fn stop(&mut self) -> Result<SessionSummary, Error> {
        if let Some(stop_tx) = self.stop_tx.take() {
            // The session may already be over, then nobody listens.
            let _ = stop_tx.send(());
        }
        self.join().await
    }

    /// Waits for the client to disconnect on its own.
    pub async fn wait(&mut self) -> Result<SessionSummary, Error> {
        self.join().await
    }

    async fn join(&mut self) -> Result<SessionSummary, Error> {
        if let Some(outcome) = &self.outcome {
            return outcome.clone().map_err(Error::ServerTask);
        }
        let handle = self.handle.take().ok_or(Error::ServerNotStarted)?;
        let result = handle
            .await
            .map_err(|err| Error::ServerTask(err.to_string()))
            .and_then(|result| result);
        self.stop_tx = None;
        self.outcome = Some(match &result {
            Ok(summary) => Ok(summary.clone()),
            Err(err) => Err(err.to_string()),
        });
        result
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
