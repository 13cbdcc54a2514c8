/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Ready-made responder sets. Tests usually start from [`base`] or one of the
//! role tables and layer their own handlers on top with
//! [`HandlerTable::merge`] or [`HandlerTable::on`].

use std::fmt::Write;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;

use serde::Deserialize;
use serde::Serialize;

use crate::dispatch::HandlerTable;
use crate::dispatch::Reply;
use crate::error::Error;
use crate::hex::decode_dec;
use crate::hex::decode_hex_string;
use crate::hex::encode_hex_string;

/// Iterates `key:value;` pairs of a platform packet.
pub(crate) fn key_values(payload: &[u8]) -> impl Iterator<Item = (&[u8], &[u8])> {
    payload
        .split(|b| *b == b';')
        .filter(|kv| !kv.is_empty())
        .map(|kv| match kv.iter().position(|b| *b == b':') {
            Some(i) => (&kv[..i], &kv[i + 1..]),
            None => (kv, &kv[kv.len()..]),
        })
}

fn decode_hex_utf8(value: &[u8]) -> Result<String, Error> {
    Ok(String::from_utf8_lossy(&decode_hex_string(value)?).into_owned())
}

fn malformed(what: &str, payload: &[u8]) -> Error {
    Error::UnexpectedReply {
        request: what.to_owned(),
        reply: String::from_utf8_lossy(payload).into_owned(),
    }
}

/// One entry of a `qfProcessInfo`/`qsProcessInfo` reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: u32,
    #[serde(default)]
    pub ppid: Option<u32>,
    #[serde(default)]
    pub uid: Option<u32>,
    #[serde(default)]
    pub gid: Option<u32>,
    #[serde(default)]
    pub euid: Option<u32>,
    #[serde(default)]
    pub egid: Option<u32>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub triple: Option<String>,
}

impl ProcessInfo {
    pub fn new<S: Into<String>>(pid: u32, name: S) -> Self {
        ProcessInfo {
            pid,
            name: Some(name.into()),
            ..Default::default()
        }
    }

    /// Wire form. `name`, `args` and `triple` are hex encoded.
    pub fn encode(&self) -> String {
        let mut s = format!("pid:{};", self.pid);
        for (key, value) in [
            ("ppid", self.ppid),
            ("uid", self.uid),
            ("gid", self.gid),
            ("euid", self.euid),
            ("egid", self.egid),
        ] {
            if let Some(value) = value {
                let _ = write!(s, "{}:{};", key, value);
            }
        }
        if let Some(name) = &self.name {
            let _ = write!(s, "name:{};", encode_hex_string(name.as_bytes()));
        }
        if !self.args.is_empty() {
            let args: Vec<String> = self
                .args
                .iter()
                .map(|arg| encode_hex_string(arg.as_bytes()))
                .collect();
            let _ = write!(s, "args:{};", args.join("-"));
        }
        if let Some(triple) = &self.triple {
            let _ = write!(s, "triple:{};", encode_hex_string(triple.as_bytes()));
        }
        s
    }

    pub fn to_reply(&self) -> Reply {
        Reply::from(self.encode())
    }

    /// Parses the wire form. Unknown keys are ignored.
    pub fn decode(payload: &[u8]) -> Result<Self, Error> {
        let mut pid = None;
        let mut info = ProcessInfo::default();
        for (key, value) in key_values(payload) {
            match key {
                b"pid" => pid = Some(decode_dec(value)?),
                b"ppid" => info.ppid = Some(decode_dec(value)?),
                b"uid" => info.uid = Some(decode_dec(value)?),
                b"gid" => info.gid = Some(decode_dec(value)?),
                b"euid" => info.euid = Some(decode_dec(value)?),
                b"egid" => info.egid = Some(decode_dec(value)?),
                b"name" => info.name = Some(decode_hex_utf8(value)?),
                b"triple" => info.triple = Some(decode_hex_utf8(value)?),
                b"args" => {
                    info.args = value
                        .split(|b| *b == b'-')
                        .filter(|arg| !arg.is_empty())
                        .map(decode_hex_utf8)
                        .collect::<Result<_, _>>()?
                }
                _ => {}
            }
        }
        info.pid = pid.ok_or_else(|| malformed("qfProcessInfo", payload))?;
        Ok(info)
    }
}

/// How a `qfProcessInfo` request narrows the process list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessMatch {
    pub pid: Option<u32>,
    pub name: Option<String>,
    pub name_match: NameMatch,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NameMatch {
    #[default]
    Equals,
    StartsWith,
    EndsWith,
    Contains,
}

impl ProcessMatch {
    pub fn decode(payload: &[u8]) -> Result<Self, Error> {
        let mut m = ProcessMatch::default();
        for (key, value) in key_values(payload) {
            match key {
                b"pid" => m.pid = Some(decode_dec(value)?),
                b"name" => m.name = Some(decode_hex_utf8(value)?),
                b"name_match" => {
                    m.name_match = match value {
                        b"equals" => NameMatch::Equals,
                        b"starts_with" => NameMatch::StartsWith,
                        b"ends_with" => NameMatch::EndsWith,
                        b"contains" => NameMatch::Contains,
                        _ => return Err(malformed("qfProcessInfo", payload)),
                    }
                }
                _ => {}
            }
        }
        Ok(m)
    }

    pub fn encode(&self) -> String {
        let mut s = String::new();
        if let Some(name) = &self.name {
            let how = match self.name_match {
                NameMatch::Equals => "equals",
                NameMatch::StartsWith => "starts_with",
                NameMatch::EndsWith => "ends_with",
                NameMatch::Contains => "contains",
            };
            let _ = write!(
                s,
                "name:{};name_match:{};",
                encode_hex_string(name.as_bytes()),
                how
            );
        }
        if let Some(pid) = self.pid {
            let _ = write!(s, "pid:{};", pid);
        }
        s
    }

    pub fn matches(&self, info: &ProcessInfo) -> bool {
        if self.pid.is_some_and(|pid| pid != info.pid) {
            return false;
        }
        match (&self.name, &info.name) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(want), Some(name)) => match self.name_match {
                NameMatch::Equals => name == want,
                NameMatch::StartsWith => name.starts_with(want.as_str()),
                NameMatch::EndsWith => name.ends_with(want.as_str()),
                NameMatch::Contains => name.contains(want.as_str()),
            },
        }
    }
}

/// Reply to `qLaunchGDBServer`: where the freshly spawned gdbserver listens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchedServer {
    pub pid: u32,
    pub port: u16,
    #[serde(default)]
    pub socket_name: Option<String>,
}

impl LaunchedServer {
    pub fn new(pid: u32, port: u16) -> Self {
        LaunchedServer {
            pid,
            port,
            socket_name: None,
        }
    }

    pub fn encode(&self) -> String {
        let mut s = format!("pid:{};port:{};", self.pid, self.port);
        if let Some(name) = &self.socket_name {
            let _ = write!(s, "socket_name:{};", encode_hex_string(name.as_bytes()));
        }
        s
    }

    pub fn to_reply(&self) -> Reply {
        Reply::from(self.encode())
    }

    pub fn decode(payload: &[u8]) -> Result<Self, Error> {
        let mut pid = None;
        let mut port = None;
        let mut socket_name = None;
        for (key, value) in key_values(payload) {
            match key {
                b"pid" => pid = Some(decode_dec(value)?),
                b"port" => port = Some(decode_dec(value)?),
                b"socket_name" => socket_name = Some(decode_hex_utf8(value)?),
                _ => {}
            }
        }
        Ok(LaunchedServer {
            pid: pid.ok_or_else(|| malformed("qLaunchGDBServer", payload))?,
            port: port.ok_or_else(|| malformed("qLaunchGDBServer", payload))?,
            socket_name,
        })
    }
}

/// Answers every mock server gives unless a test overrides it.
pub fn base() -> HandlerTable {
    HandlerTable::new()
        .reply("qSupported", "PacketSize=3fff;QStartNoAckMode+")
        .reply("qHostInfo", "ptrsize:8;endian:little;")
        .reply("QThreadSuffixSupported", "OK")
        .reply("QListThreadsInStopReply", "OK")
        .reply("qfThreadInfo", "l")
        .reply("qfProcessInfo", "E04")
        .reply("qsProcessInfo", "E04")
        .reply("?", "W00")
}

/// A platform server that lists `processes` and, asked to launch a
/// gdbserver, points the client at `launched`.
pub fn platform(processes: Vec<ProcessInfo>, launched: LaunchedServer) -> HandlerTable {
    let processes = Arc::new(processes);
    let matched = Arc::new(Mutex::new(Vec::<ProcessInfo>::new()));
    let cursor = Arc::new(AtomicUsize::new(0));

    let first = {
        let matched = matched.clone();
        let cursor = cursor.clone();
        move |payload: &[u8]| {
            let filter = match ProcessMatch::decode(payload) {
                Ok(filter) => filter,
                Err(_) => return Reply::error(0x16),
            };
            let found: Vec<ProcessInfo> = processes
                .iter()
                .filter(|info| filter.matches(info))
                .cloned()
                .collect();
            let reply = found.first().map_or_else(|| Reply::error(4), ProcessInfo::to_reply);
            cursor.store(1, Ordering::SeqCst);
            if let Ok(mut matched) = matched.lock() {
                *matched = found;
            }
            reply
        }
    };

    let next = move |_: &[u8]| {
        let i = cursor.fetch_add(1, Ordering::SeqCst);
        matched
            .lock()
            .ok()
            .and_then(|matched| matched.get(i).map(ProcessInfo::to_reply))
            .unwrap_or_else(|| Reply::error(4))
    };

    base()
        .on("qfProcessInfo", first)
        .on("qsProcessInfo", next)
        .reply("qLaunchGDBServer", launched.to_reply())
        .reply("qKillSpawnedProcess", "OK")
}

/// A gdbserver that accepts any `vAttach`.
pub fn gdbserver() -> HandlerTable {
    base().reply("vAttach", "OK").reply("D", "OK")
}
