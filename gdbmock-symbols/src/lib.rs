/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Side-car JSON symbol files, and just enough of a module and breakpoint
//! model to check what loading one changes.

mod error;
mod module;
mod symbol_file;
mod target;

pub use error::Error;
pub use module::Module;
pub use module::Section;
pub use module::Symbol;
pub use module::SymbolKind;
pub use symbol_file::SectionEntry;
pub use symbol_file::SymbolEntry;
pub use symbol_file::SymbolFile;
pub use target::Breakpoint;
pub use target::BreakpointId;
pub use target::Location;
pub use target::Target;
