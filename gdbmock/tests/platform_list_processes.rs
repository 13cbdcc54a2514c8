/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! A platform stub and a gdbserver stub cooperating: the platform lists
//! processes and points the client at the gdbserver, which accepts the
//! attach.

use gdbmock::responders;
use gdbmock::testing::init_tracing;
use gdbmock::testing::run_tokio_test;
use gdbmock::testing::start_platform_pair;
use gdbmock::testing::step;
use gdbmock::Error;
use gdbmock::HandlerTable;
use gdbmock::LaunchedServer;
use gdbmock::MockServer;
use gdbmock::Platform;
use gdbmock::ProcessInfo;
use gdbmock::RemoteClient;

#[tokio::test(flavor = "current_thread")]
async fn attach_is_acknowledged() {
    init_tracing();
    let mut gdbserver = MockServer::start("gdbserver", HandlerTable::new().reply("vAttach", "OK"))
        .unwrap();

    let mut client = step(RemoteClient::connect(&gdbserver.connect_url()))
        .await
        .unwrap();
    assert_eq!(step(client.request("vAttach;1")).await.unwrap(), "OK");
    client.disconnect().await.unwrap();

    let summary = gdbserver.wait().await.unwrap();
    assert_eq!(summary.requests, 1);
    assert!(summary.unhandled.is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn list_processes_and_attach() {
    init_tracing();
    let mut gdbserver =
        MockServer::start("gdbserver", HandlerTable::new().reply("vAttach", "OK")).unwrap();
    let port = gdbserver.port().unwrap();

    let launched = format!("pid:1337;port:{};", port);
    let table = responders::base()
        .on("qLaunchGDBServer", move |_| launched.clone().into())
        .reply("qfProcessInfo", "pid:95117;name:666f6f;");
    let mut platform_server = MockServer::start("platform", table).unwrap();

    let mut platform = Platform::new("remote-linux");
    step(platform.connect_remote(&platform_server.connect_url()))
        .await
        .unwrap();
    assert!(platform.is_connected());

    let processes = step(platform.get_all_processes()).await.unwrap();
    assert_eq!(processes.len(), 1);
    assert_eq!(processes[0].pid, 95117);
    assert_eq!(processes[0].name.as_deref(), Some("foo"));

    step(platform.attach(95117)).await.unwrap();
    step(platform.disconnect_remote()).await.unwrap();
    assert!(!platform.is_connected());

    let summary = platform_server.stop().await.unwrap();
    assert!(summary.unhandled.is_empty(), "{:?}", summary.unhandled);
    // Stopping twice is harmless and reports the same session.
    assert_eq!(platform_server.stop().await.unwrap(), summary);

    let summary = gdbserver.stop().await.unwrap();
    assert!(summary.requests >= 1);
}

#[tokio::test(flavor = "current_thread")]
async fn platform_responder_filters_by_name() {
    init_tracing();
    let processes = vec![
        ProcessInfo::new(95117, "foo"),
        ProcessInfo::new(95118, "bar"),
        ProcessInfo::new(95119, "foobar"),
    ];
    let (mut platform_server, _gdbserver) = start_platform_pair(processes).unwrap();

    let mut platform = Platform::new("remote-linux");
    step(platform.connect_remote(&platform_server.connect_url()))
        .await
        .unwrap();

    let all = step(platform.get_all_processes()).await.unwrap();
    let pids: Vec<u32> = all.iter().map(|p| p.pid).collect();
    assert_eq!(pids, vec![95117, 95118, 95119]);

    let filter = gdbmock::ProcessMatch {
        name: Some("foo".to_owned()),
        name_match: gdbmock::NameMatch::StartsWith,
        ..Default::default()
    };
    let found = step(platform.find_processes(&filter)).await.unwrap();
    let pids: Vec<u32> = found.iter().map(|p| p.pid).collect();
    assert_eq!(pids, vec![95117, 95119]);

    let launched = step(platform.launch_gdbserver("localhost")).await.unwrap();
    assert_eq!(launched.pid, 1337);

    step(platform.disconnect_remote()).await.unwrap();
    platform_server.stop().await.unwrap();
}

#[tokio::test(flavor = "current_thread")]
async fn attach_failure_is_reported() {
    init_tracing();
    let mut gdbserver = MockServer::start(
        "gdbserver",
        responders::base().reply("vAttach", gdbmock::Reply::error(1)),
    )
    .unwrap();
    let launched = LaunchedServer::new(1337, gdbserver.port().unwrap());
    let platform_server =
        MockServer::start("platform", responders::platform(vec![], launched)).unwrap();

    let mut platform = Platform::new("remote-linux");
    step(platform.connect_remote(&platform_server.connect_url()))
        .await
        .unwrap();
    assert!(step(platform.get_all_processes()).await.unwrap().is_empty());
    assert!(matches!(
        step(platform.attach(42)).await,
        Err(Error::Remote(1))
    ));
    step(platform.disconnect_remote()).await.unwrap();
    gdbserver.stop().await.unwrap();
}

async fn attach_with_reply(reply: &'static str) -> Result<(), Error> {
    let mut gdbserver =
        MockServer::start("gdbserver", responders::base().reply("vAttach", reply)).unwrap();
    let launched = LaunchedServer::new(1337, gdbserver.port().unwrap());
    let mut platform_server =
        MockServer::start("platform", responders::platform(vec![], launched)).unwrap();

    let mut platform = Platform::new("remote-linux");
    step(platform.connect_remote(&platform_server.connect_url()))
        .await
        .unwrap();
    let result = step(platform.attach(42)).await;
    step(platform.disconnect_remote()).await.unwrap();
    platform_server.stop().await.unwrap();
    gdbserver.stop().await.unwrap();
    result
}

#[tokio::test(flavor = "current_thread")]
async fn attach_accepts_stop_replies_only() {
    init_tracing();
    attach_with_reply("T13thread:2a;").await.unwrap();
    attach_with_reply("S05").await.unwrap();
    // Console output is not an answer to the attach.
    assert!(matches!(
        attach_with_reply("O6869").await,
        Err(Error::UnexpectedReply { .. })
    ));
    assert!(matches!(
        attach_with_reply("OKAY").await,
        Err(Error::UnexpectedReply { .. })
    ));
}

#[tokio::test(flavor = "current_thread")]
async fn operations_require_a_connection() {
    let mut platform = Platform::new("remote-linux");
    assert!(!platform.is_connected());
    assert!(matches!(
        platform.get_all_processes().await,
        Err(Error::NotConnected)
    ));
    // Disconnecting while not connected is fine.
    platform.disconnect_remote().await.unwrap();
}

#[tokio::test(flavor = "current_thread")]
async fn server_over_unix_socket() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gdbserver.sock");
    let mut server = MockServer::builder(responders::gdbserver())
        .role("gdbserver")
        .endpoint(path.clone())
        .start()
        .unwrap();
    assert!(server.port().is_none());
    assert!(server.connect_url().starts_with("unix-connect://"));

    let mut client = step(RemoteClient::connect(&server.connect_url()))
        .await
        .unwrap();
    assert_eq!(step(client.request("vAttach;2a")).await.unwrap(), "OK");
    client.disconnect().await.unwrap();

    server.wait().await.unwrap();
    server.stop().await.unwrap();
}

#[test]
fn stop_before_any_client() {
    run_tokio_test(async {
        let mut server = MockServer::start("idle", HandlerTable::new()).unwrap();
        let summary = server.stop().await.unwrap();
        assert_eq!(summary.requests, 0);
        assert!(summary.peer.is_none());
        server.stop().await.unwrap();
    })
}
