/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The side-car symbol file: a JSON document naming symbols by file address
//! for a binary that carries no symbol table of its own.
//!
//! ```json
//! {
//!     "triple": "x86_64-unknown-linux-gnu",
//!     "uuid": "1C3B4A6D-...",
//!     "symbols": [
//!         { "name": "main", "addr": 4368 },
//!         { "name": "foo", "addr": 4352 }
//!     ]
//! }
//! ```

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::Deserialize;
use serde::Serialize;

use crate::error::Error;
use crate::module::Module;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolFile {
    pub triple: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sections: Vec<SectionEntry>,
    #[serde(default)]
    pub symbols: Vec<SymbolEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionEntry {
    pub name: String,
    #[serde(rename = "address")]
    pub addr: u64,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolEntry {
    pub name: String,
    pub addr: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl SymbolEntry {
    pub fn new<S: Into<String>>(name: S, addr: u64) -> Self {
        SymbolEntry {
            name: name.into(),
            addr,
            size: None,
            kind: None,
        }
    }
}

impl SymbolFile {
    pub fn new<S: Into<String>>(triple: S) -> Self {
        SymbolFile {
            triple: triple.into(),
            uuid: None,
            kind: None,
            sections: Vec::new(),
            symbols: Vec::new(),
        }
    }

    /// Describes `names` as found in `module`, typically an unstripped
    /// reference build. Names the module doesn't know are left out.
    pub fn from_module(module: &Module, names: &[&str]) -> Self {
        let mut file = SymbolFile::new(module.triple().unwrap_or_default());
        file.uuid = module.uuid().map(str::to_owned);
        for name in names {
            match module.find_symbol(name) {
                Some(symbol) => file.symbols.push(SymbolEntry::new(*name, symbol.file_addr)),
                None => tracing::debug!("{} has no symbol {}", module.name(), name),
            }
        }
        file
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, Error> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        Self::from_slice(&fs::read(path)?)
    }

    /// Pretty printed with a 4 space indent.
    pub fn to_json(&self) -> Result<String, Error> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut ser)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        let mut file = fs::File::create(path)?;
        file.write_all(self.to_json()?.as_bytes())?;
        Ok(())
    }
}
