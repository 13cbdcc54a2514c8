/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("Malformed symbol file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Failed to parse ELF: {0}")]
    Elf(#[from] goblin::error::Error),
    #[error("Symbol file uuid {file} does not match module uuid {module}")]
    UuidMismatch { module: String, file: String },
    #[error("No module named {0:?}")]
    NoSuchModule(String),
    #[error("No module matches uuid {0:?}")]
    NoModuleForUuid(Option<String>),
}
