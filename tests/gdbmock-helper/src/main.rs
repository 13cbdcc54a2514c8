/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Runs mock GDB remote servers from a script, for driving a debugger by
//! hand or from an external test runner.
//!
//! Prints one `<name> <connect-url>` line per server once all are listening,
//! then serves until every client has disconnected or Ctrl-C.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::bail;
use anyhow::Error;
use clap::Parser;
use futures::future;
use gdbmock::MockServer;
use gdbmock::Script;
use gdbmock::ServerScript;
use gdbmock_util::parse_key_value;
use gdbmock_util::CommonArguments;

#[derive(Parser, Debug, Clone)]
struct GdbMockHelperArgs {
    /// JSON script describing the servers to start.
    #[clap(long, conflicts_with_all = ["reply", "listen"])]
    script: Option<PathBuf>,

    /// Scripted reply for a single ad-hoc server. Can be used multiple times.
    #[clap(
        long = "reply",
        short = 'r',
        value_name = "TOKEN=REPLY",
        value_parser = parse_key_value,
        num_args = 1
    )]
    reply: Vec<(String, String)>,

    /// Where the ad-hoc server listens, `host:port` or `unix:<path>`.
    #[clap(long)]
    listen: Option<String>,

    /// Layer the ad-hoc replies over the default responder set.
    #[clap(long)]
    base: bool,

    #[clap(flatten)]
    common: CommonArguments,
}

impl GdbMockHelperArgs {
    fn script(&self) -> Result<Script, Error> {
        if let Some(path) = &self.script {
            return Ok(Script::from_path(path)?);
        }
        if self.reply.is_empty() && !self.base {
            bail!("nothing to serve: pass --script, --reply or --base");
        }
        let replies: BTreeMap<String, Option<String>> = self
            .reply
            .iter()
            .map(|(token, reply)| (token.clone(), Some(reply.clone())))
            .collect();
        Ok(Script {
            servers: vec![ServerScript {
                name: "stub".to_owned(),
                listen: self.listen.clone(),
                base: self.base,
                replies,
                fallback: None,
            }],
        })
    }
}

async fn serve(mut servers: Vec<MockServer>) -> Result<(), Error> {
    for server in &servers {
        println!("{} {}", server.role(), server.connect_url());
    }

    let sessions = future::join_all(servers.iter_mut().map(|server| server.wait()));
    tokio::select! {
        results = sessions => {
            for result in results {
                result?;
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, stopping servers");
        }
    }

    for server in &mut servers {
        let summary = server.stop().await?;
        tracing::info!(
            "[{}] {} requests, {} rejected, unhandled: {:?}",
            server.role(),
            summary.requests,
            summary.rejected,
            summary.unhandled
        );
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Error> {
    let args = GdbMockHelperArgs::parse();
    let _guard = args.common.init_tracing()?;

    let servers = args.script()?.start()?;
    serve(servers).await
}

#[cfg(test)]
mod test {
    use gdbmock::RemoteClient;

    use super::*;

    #[test]
    fn ad_hoc_server_from_flags() {
        let args = GdbMockHelperArgs::try_parse_from([
            "gdbmock-helper",
            "--reply",
            "vAttach=OK",
            "-r",
            "qC=QC2a",
        ])
        .unwrap();
        let script = args.script().unwrap();
        assert_eq!(script.servers.len(), 1);
        assert_eq!(
            script.servers[0].replies.get("qC"),
            Some(&Some("QC2a".to_owned()))
        );
    }

    #[test]
    fn needs_something_to_serve() {
        let args = GdbMockHelperArgs::try_parse_from(["gdbmock-helper"]).unwrap();
        assert!(args.script().is_err());
    }

    #[test]
    fn script_conflicts_with_flags() {
        assert!(
            GdbMockHelperArgs::try_parse_from([
                "gdbmock-helper",
                "--script",
                "a.json",
                "--reply",
                "k=OK"
            ])
            .is_err()
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn bundled_platform_script() {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("scripts/platform.json");
        let path = path.to_string_lossy().into_owned();
        let args =
            GdbMockHelperArgs::try_parse_from(["gdbmock-helper", "--script", path.as_str()])
                .unwrap();
        let servers = args.script().unwrap().start().unwrap();
        let gdbserver_port = servers[0].port().unwrap();

        let mut client = RemoteClient::connect(&servers[1].connect_url())
            .await
            .unwrap();
        assert_eq!(
            client.request("qLaunchGDBServer;host:localhost;").await.unwrap(),
            format!("pid:1337;port:{};", gdbserver_port)
        );
        client.disconnect().await.unwrap();

        let mut client = RemoteClient::connect(&servers[0].connect_url())
            .await
            .unwrap();
        assert_eq!(client.request("vAttach;1").await.unwrap(), "OK");
        client.disconnect().await.unwrap();

        serve(servers).await.unwrap();
    }
}
