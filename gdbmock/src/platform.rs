/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Client side of the platform workflow: connect to a platform server,
//! list its processes, have it launch a gdbserver and attach through that.

use crate::client::error_code;
use crate::client::RemoteClient;
use crate::error::Error;
use crate::responders::LaunchedServer;
use crate::responders::ProcessInfo;
use crate::responders::ProcessMatch;
use crate::transport::ConnectUrl;

pub struct Platform {
    name: String,
    platform: Option<RemoteClient>,
    gdbserver: Option<RemoteClient>,
}

impl Platform {
    /// `name` is informational, e.g. `remote-linux`.
    pub fn new<S: Into<String>>(name: S) -> Self {
        Platform {
            name: name.into(),
            platform: None,
            gdbserver: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn connect_remote(&mut self, url: &str) -> Result<(), Error> {
        let mut client = RemoteClient::connect(url).await?;
        if !client.start_no_ack_mode().await? {
            tracing::debug!("[{}] server does not support no-ack mode", self.name);
        }
        self.platform = Some(client);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.platform.is_some()
    }

    fn client(&mut self) -> Result<&mut RemoteClient, Error> {
        self.platform.as_mut().ok_or(Error::NotConnected)
    }

    pub async fn get_all_processes(&mut self) -> Result<Vec<ProcessInfo>, Error> {
        self.find_processes(&ProcessMatch::default()).await
    }

    /// Walks `qfProcessInfo`/`qsProcessInfo` until the server reports an
    /// error (end of list) or doesn't understand the packet.
    pub async fn find_processes(
        &mut self,
        filter: &ProcessMatch,
    ) -> Result<Vec<ProcessInfo>, Error> {
        let client = self.client()?;
        let args = filter.encode();
        let mut request = if args.is_empty() {
            "qfProcessInfo".to_owned()
        } else {
            format!("qfProcessInfo:{}", args)
        };

        let mut processes = Vec::new();
        loop {
            let reply = client.send(request.as_bytes()).await?;
            if reply.is_empty() || error_code(&reply).is_some() {
                break;
            }
            processes.push(ProcessInfo::decode(&reply)?);
            request = "qsProcessInfo".to_owned();
        }
        Ok(processes)
    }

    pub async fn launch_gdbserver(&mut self, host: &str) -> Result<LaunchedServer, Error> {
        let reply = self
            .client()?
            .request(&format!("qLaunchGDBServer;host:{};", host))
            .await?;
        LaunchedServer::decode(reply.as_bytes())
    }

    /// Launches a gdbserver through the platform and attaches to `pid` with
    /// it. The gdbserver is reached on the platform's host.
    pub async fn attach(&mut self, pid: u32) -> Result<(), Error> {
        let host = match self.client()?.url() {
            ConnectUrl::Tcp { host, .. } => host.clone(),
            ConnectUrl::Unix(_) => "localhost".to_owned(),
        };
        let launched = self.launch_gdbserver(&host).await?;
        let url = ConnectUrl::Tcp {
            host,
            port: launched.port,
        };

        let mut gdbserver = RemoteClient::connect_url(url).await?;
        gdbserver.start_no_ack_mode().await?;
        let reply = gdbserver.request(&format!("vAttach;{:x}", pid)).await?;
        match reply.as_bytes() {
            // OK, or a stop reply for the freshly attached process.
            b"OK" | [b'T', ..] | [b'S', ..] => {}
            _ => {
                return Err(Error::UnexpectedReply {
                    request: "vAttach".to_owned(),
                    reply,
                });
            }
        }
        tracing::info!("[{}] attached to {} via {}", self.name, pid, gdbserver.url());
        self.gdbserver = Some(gdbserver);
        Ok(())
    }

    /// Client of the gdbserver spawned by the last successful `attach`.
    pub fn gdbserver(&mut self) -> Option<&mut RemoteClient> {
        self.gdbserver.as_mut()
    }

    /// Drops both connections. Safe to call when not connected.
    pub async fn disconnect_remote(&mut self) -> Result<(), Error> {
        if let Some(gdbserver) = self.gdbserver.take() {
            gdbserver.disconnect().await?;
        }
        if let Some(platform) = self.platform.take() {
            platform.disconnect().await?;
        }
        Ok(())
    }
}
