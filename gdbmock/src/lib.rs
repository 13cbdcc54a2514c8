/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! A scriptable GDB remote serial protocol stub.
//!
//! Tests build a [`HandlerTable`] of command token to reply, start a
//! [`MockServer`] with it and point a debugger client at
//! [`MockServer::connect_url`]. Two servers can cooperate by capturing each
//! other's ports, e.g. a platform whose `qLaunchGDBServer` reply names the
//! port of a gdbserver stub.

mod client;
mod dispatch;
mod error;
mod framer;
mod hex;
mod logger;
mod packet;
mod platform;
pub mod responders;
mod response;
mod script;
mod server;
mod session;
pub mod testing;
mod transport;

pub use client::error_code;
pub use client::RemoteClient;
pub use dispatch::dispatch;
pub use dispatch::Handler;
pub use dispatch::HandlerTable;
pub use dispatch::Reply;
pub use error::Error;
pub use framer::Frame;
pub use framer::PacketReader;
pub use framer::PacketWriter;
pub use hex::decode_hex_string;
pub use hex::encode_hex_string;
pub use hex::GdbHexError;
pub use packet::Packet;
pub use packet::PacketParseError;
pub use packet::Request;
pub use packet::INTERRUPT_TOKEN;
pub use platform::Platform;
pub use responders::LaunchedServer;
pub use responders::NameMatch;
pub use responders::ProcessInfo;
pub use responders::ProcessMatch;
pub use script::Script;
pub use script::ServerScript;
pub use server::MockServer;
pub use server::MockServerBuilder;
pub use session::Session;
pub use session::SessionState;
pub use session::SessionSummary;
pub use transport::BoxReader;
pub use transport::BoxWriter;
pub use transport::ConnectUrl;
pub use transport::Connection;
pub use transport::Endpoint;
pub use transport::Listener;
