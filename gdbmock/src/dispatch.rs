/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::packet::Request;

/// What a handler answers with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    /// Body of the reply frame. Framing is added by the session.
    Packet(Bytes),
    /// Don't send anything back (the request is still acked).
    NoReply,
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Packet(Bytes::from_static(b"OK"))
    }

    /// The empty packet, meaning "unsupported" to a gdb client.
    pub fn unsupported() -> Self {
        Reply::Packet(Bytes::new())
    }

    /// `Exx` error reply.
    pub fn error(code: u8) -> Self {
        Reply::Packet(Bytes::from(format!("E{:02x}", code)))
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Reply::Packet(bytes) => Some(bytes),
            Reply::NoReply => None,
        }
    }
}

impl From<&'static str> for Reply {
    fn from(s: &'static str) -> Self {
        Reply::Packet(Bytes::from_static(s.as_bytes()))
    }
}

impl From<String> for Reply {
    fn from(s: String) -> Self {
        Reply::Packet(Bytes::from(s))
    }
}

impl From<Bytes> for Reply {
    fn from(b: Bytes) -> Self {
        Reply::Packet(b)
    }
}

/// A scripted handler: argument payload in, reply out.
pub type Handler = Arc<dyn Fn(&[u8]) -> Reply + Send + Sync>;

/// Mapping from command token to handler, plus the reply used for commands
/// nobody scripted. Cloning is cheap, handlers are shared.
#[derive(Clone)]
pub struct HandlerTable {
    handlers: BTreeMap<String, Handler>,
    fallback: Reply,
}

impl Default for HandlerTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("HandlerTable")
            .field("tokens", &self.handlers.keys().collect::<Vec<_>>())
            .field("fallback", &self.fallback)
            .finish()
    }
}

impl HandlerTable {
    /// An empty table answering everything with the unsupported (empty) reply.
    pub fn new() -> Self {
        HandlerTable {
            handlers: BTreeMap::new(),
            fallback: Reply::unsupported(),
        }
    }

    /// Registers `handler` for `token`, replacing any previous one.
    pub fn on<S, F>(mut self, token: S, handler: F) -> Self
    where
        S: Into<String>,
        F: Fn(&[u8]) -> Reply + Send + Sync + 'static,
    {
        self.handlers.insert(token.into(), Arc::new(handler));
        self
    }

    /// Registers a handler that always answers `reply`.
    pub fn reply<S, R>(self, token: S, reply: R) -> Self
    where
        S: Into<String>,
        R: Into<Reply>,
    {
        let reply = reply.into();
        self.on(token, move |_| reply.clone())
    }

    /// Reply used for commands without a handler.
    pub fn fallback<R: Into<Reply>>(mut self, reply: R) -> Self {
        self.fallback = reply.into();
        self
    }

    /// Layers `other` on top of `self`. Handlers and fallback of `other` win.
    pub fn merge(mut self, other: HandlerTable) -> Self {
        self.handlers.extend(other.handlers);
        self.fallback = other.fallback;
        self
    }

    pub fn contains(&self, token: &str) -> bool {
        self.handlers.contains_key(token)
    }

    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub fn fallback_reply(&self) -> &Reply {
        &self.fallback
    }

    /// Finds the handler for `request` and the payload it should receive.
    ///
    /// The delimited token is tried first. Otherwise a single-character
    /// token matching the first byte of the body is used, which is how
    /// commands such as `m1000,4` or `D1` are matched. Longer tokens never
    /// match by prefix, so `vAttachWait` does not reach a `vAttach` handler.
    pub fn resolve<'a>(&'a self, request: &'a Request) -> Option<(&'a Handler, &'a [u8])> {
        if let Some(handler) = std::str::from_utf8(request.token())
            .ok()
            .and_then(|token| self.handlers.get(token))
        {
            return Some((handler, request.payload()));
        }

        let body = request.body();
        let first = std::str::from_utf8(body.get(..1)?).ok()?;
        self.handlers
            .get(first)
            .map(|handler| (handler, Request::payload_after(body, 1)))
    }
}

/// Maps a request to its scripted reply, or the table's fallback.
pub fn dispatch(request: &Request, table: &HandlerTable) -> Reply {
    match table.resolve(request) {
        Some((handler, payload)) => handler(payload),
        None => table.fallback.clone(),
    }
}
