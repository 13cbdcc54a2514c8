/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::io;

use thiserror::Error;

use crate::hex::GdbHexError;
use crate::packet::PacketParseError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to bind mock server to {endpoint}")]
    Bind {
        endpoint: String,
        #[source]
        source: io::Error,
    },
    #[error("Failed waiting for client to connect")]
    Accept {
        #[source]
        source: io::Error,
    },
    #[error("Failed to connect to {url}")]
    Connect {
        url: String,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("Connection reset")]
    ConnReset,
    #[error("mock server not started")]
    ServerNotStarted,
    #[error("mock server task failed: {0}")]
    ServerTask(String),
    #[error(transparent)]
    PacketError(PacketParseError),
    #[error("Invalid connect url: {0:?}")]
    InvalidUrl(String),
    #[error("Reply payload cannot be framed, it contains `$` or `#`: {0:?}")]
    UnframeablePayload(String),
    #[error("Remote replied with error {0}")]
    Remote(u8),
    #[error("Unexpected reply to {request}: {reply:?}")]
    UnexpectedReply { request: String, reply: String },
    #[error("Not connected to a remote platform")]
    NotConnected,
    #[error("Invalid script: {0}")]
    Script(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl From<PacketParseError> for Error {
    fn from(err: PacketParseError) -> Self {
        Error::PacketError(err)
    }
}

impl From<GdbHexError> for Error {
    fn from(err: GdbHexError) -> Self {
        Error::PacketError(err.into())
    }
}
