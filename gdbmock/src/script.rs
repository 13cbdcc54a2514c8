/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! JSON scripts describing a set of cooperating mock servers.
//!
//! ```json
//! {
//!   "servers": [
//!     { "name": "gdbserver", "replies": { "vAttach": "OK" } },
//!     {
//!       "name": "platform",
//!       "base": true,
//!       "replies": {
//!         "qLaunchGDBServer": "pid:1337;port:${gdbserver.port};",
//!         "qfProcessInfo": "pid:95117;name:666f6f;"
//!       }
//!     }
//!   ]
//! }
//! ```
//!
//! A reply may reference `${<name>.port}` of a server declared before it.
//! A `null` reply means the request is acked but never answered.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde::Serialize;

use crate::dispatch::HandlerTable;
use crate::dispatch::Reply;
use crate::error::Error;
use crate::responders;
use crate::server::MockServer;
use crate::transport::Endpoint;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script {
    pub servers: Vec<ServerScript>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerScript {
    pub name: String,
    /// `host:port` or `unix:<path>`. Defaults to an ephemeral loopback port.
    #[serde(default)]
    pub listen: Option<String>,
    /// Start from the default responder set.
    #[serde(default)]
    pub base: bool,
    #[serde(default)]
    pub replies: BTreeMap<String, Option<String>>,
    /// Reply for unscripted commands, the empty packet if unset.
    #[serde(default)]
    pub fallback: Option<String>,
}

/// Expands `${<name>.port}` references.
fn substitute(template: &str, ports: &BTreeMap<String, u16>) -> Result<String, Error> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| Error::Script(format!("unterminated `${{` in {:?}", template)))?;
        let reference = &after[..end];
        let port = reference
            .strip_suffix(".port")
            .and_then(|name| ports.get(name))
            .ok_or_else(|| {
                Error::Script(format!(
                    "unknown reference `{}`, only ports of earlier servers can be used",
                    reference
                ))
            })?;
        out.push_str(&port.to_string());
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

impl Script {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn parse(json: &str) -> Result<Self, Error> {
        let script: Script = serde_json::from_str(json)?;
        script.validate()?;
        Ok(script)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.servers.is_empty() {
            return Err(Error::Script("no servers declared".to_owned()));
        }
        let mut seen = BTreeMap::new();
        for server in &self.servers {
            if server.name.is_empty() {
                return Err(Error::Script("server without a name".to_owned()));
            }
            if seen.insert(server.name.as_str(), ()).is_some() {
                return Err(Error::Script(format!("duplicate server `{}`", server.name)));
            }
        }
        Ok(())
    }

    /// Starts every server in declaration order, so that later servers can
    /// embed the ports of earlier ones.
    pub fn start(&self) -> Result<Vec<MockServer>, Error> {
        let mut ports = BTreeMap::new();
        let mut servers = Vec::with_capacity(self.servers.len());
        for script in &self.servers {
            let server = script.start(&ports)?;
            if let Some(port) = server.port() {
                ports.insert(script.name.clone(), port);
            }
            servers.push(server);
        }
        Ok(servers)
    }
}

impl ServerScript {
    fn table(&self, ports: &BTreeMap<String, u16>) -> Result<HandlerTable, Error> {
        let mut table = if self.base {
            responders::base()
        } else {
            HandlerTable::new()
        };
        for (token, reply) in &self.replies {
            table = match reply {
                Some(reply) => table.reply(token.clone(), substitute(reply, ports)?),
                None => table.reply(token.clone(), Reply::NoReply),
            };
        }
        if let Some(fallback) = &self.fallback {
            table = table.fallback(substitute(fallback, ports)?);
        }
        Ok(table)
    }

    fn start(&self, ports: &BTreeMap<String, u16>) -> Result<MockServer, Error> {
        let endpoint = match &self.listen {
            Some(listen) => listen.parse()?,
            None => Endpoint::loopback(),
        };
        MockServer::builder(self.table(ports)?)
            .role(self.name.clone())
            .endpoint(endpoint)
            .start()
    }
}
