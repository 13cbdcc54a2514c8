/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::collections::HashSet;
use std::fmt::Write;

use goblin::elf::header::EM_AARCH64;
use goblin::elf::header::EM_X86_64;
use goblin::elf::note::NT_GNU_BUILD_ID;
use goblin::elf::sym::STT_FILE;
use goblin::elf::sym::STT_FUNC;
use goblin::elf::sym::STT_OBJECT;
use goblin::elf::sym::STT_SECTION;
use goblin::elf::Elf;

use crate::error::Error;
use crate::symbol_file::SymbolFile;

/// A loaded section, addressed by file address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub name: String,
    pub file_addr: u64,
    pub size: u64,
}

impl Section {
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.file_addr && addr - self.file_addr < self.size
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Code,
    Data,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub file_addr: u64,
    /// Zero when unknown. The symbol then extends to the next one.
    pub size: u64,
    pub kind: SymbolKind,
}

/// A binary as the debugger sees it: sections and a symbol table.
#[derive(Debug, Clone, Default)]
pub struct Module {
    name: String,
    triple: Option<String>,
    uuid: Option<String>,
    sections: Vec<Section>,
    symbols: Vec<Symbol>,
}

/// Formats a build-id the usual way: upper case hex, dashes after the 4th,
/// 6th, 8th and 10th byte.
fn format_uuid(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2 + 4);
    for (i, b) in bytes.iter().enumerate() {
        if matches!(i, 4 | 6 | 8 | 10) {
            s.push('-');
        }
        let _ = write!(s, "{:02X}", b);
    }
    s
}

fn triple_for(machine: u16) -> &'static str {
    match machine {
        EM_X86_64 => "x86_64-unknown-linux-gnu",
        EM_AARCH64 => "aarch64-unknown-linux-gnu",
        _ => "unknown-unknown-linux",
    }
}

fn build_id(elf: &Elf, bytes: &[u8]) -> Option<String> {
    let notes = elf
        .iter_note_headers(bytes)
        .or_else(|| elf.iter_note_sections(bytes, None))?;
    notes
        .filter_map(Result::ok)
        .find(|note| note.n_type == NT_GNU_BUILD_ID && note.name.trim_end_matches('\0') == "GNU")
        .map(|note| format_uuid(note.desc))
}

impl Module {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Module {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_triple<S: Into<String>>(mut self, triple: S) -> Self {
        self.triple = Some(triple.into());
        self
    }

    pub fn with_uuid<S: Into<String>>(mut self, uuid: S) -> Self {
        self.uuid = Some(uuid.into());
        self
    }

    pub fn with_section<S: Into<String>>(mut self, name: S, file_addr: u64, size: u64) -> Self {
        self.sections.push(Section {
            name: name.into(),
            file_addr,
            size,
        });
        self
    }

    /// Loads sections and, unless `strip` is set, the static symbol table.
    pub fn from_elf_bytes<S: Into<String>>(
        name: S,
        bytes: &[u8],
        strip: bool,
    ) -> Result<Self, Error> {
        let elf = Elf::parse(bytes)?;
        let mut module = Module::new(name).with_triple(triple_for(elf.header.e_machine));
        module.uuid = build_id(&elf, bytes);

        for sh in &elf.section_headers {
            if !sh.is_alloc() || sh.sh_size == 0 {
                continue;
            }
            let name = elf.shdr_strtab.get_at(sh.sh_name).unwrap_or_default();
            module.sections.push(Section {
                name: name.to_owned(),
                file_addr: sh.sh_addr,
                size: sh.sh_size,
            });
        }

        if !strip {
            for sym in elf.syms.iter() {
                let kind = match sym.st_type() {
                    STT_FILE | STT_SECTION => continue,
                    STT_FUNC => SymbolKind::Code,
                    STT_OBJECT => SymbolKind::Data,
                    _ => SymbolKind::Other,
                };
                match elf.strtab.get_at(sym.st_name) {
                    Some(name) if !name.is_empty() && sym.st_value != 0 => {
                        module.symbols.push(Symbol {
                            name: name.to_owned(),
                            file_addr: sym.st_value,
                            size: sym.st_size,
                            kind,
                        });
                    }
                    _ => {}
                }
            }
        }

        tracing::debug!(
            "loaded {}: {} sections, {} symbols, uuid {:?}",
            module.name,
            module.sections.len(),
            module.symbols.len(),
            module.uuid
        );
        Ok(module)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn triple(&self) -> Option<&str> {
        self.triple.as_deref()
    }

    pub fn uuid(&self) -> Option<&str> {
        self.uuid.as_deref()
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    pub fn add_symbol(&mut self, symbol: Symbol) {
        self.symbols.push(symbol);
    }

    pub fn section_containing(&self, addr: u64) -> Option<&Section> {
        self.sections.iter().find(|section| section.contains(addr))
    }

    /// Applies a side-car symbol file and returns how many symbols it added.
    ///
    /// Symbols whose address lies outside every section are skipped, and of
    /// several symbols at one address only the first is kept.
    pub fn add_symbol_file(&mut self, file: &SymbolFile) -> Result<usize, Error> {
        if let (Some(module), Some(theirs)) = (&self.uuid, &file.uuid) {
            if !module.eq_ignore_ascii_case(theirs) {
                return Err(Error::UuidMismatch {
                    module: module.clone(),
                    file: theirs.clone(),
                });
            }
        }

        let mut seen = HashSet::new();
        let mut added = 0;
        for entry in &file.symbols {
            if self.section_containing(entry.addr).is_none() {
                tracing::debug!(
                    "Ignoring symbol '{}', whose address ({:#x}) is outside of {}. \
                     Mismatched symbol file?",
                    entry.name,
                    entry.addr,
                    self.name
                );
                continue;
            }
            if !seen.insert(entry.addr) {
                continue;
            }
            self.symbols.push(Symbol {
                name: entry.name.clone(),
                file_addr: entry.addr,
                size: entry.size.unwrap_or(0),
                kind: SymbolKind::Code,
            });
            added += 1;
        }
        tracing::info!("added {} symbols to {}", added, self.name);
        Ok(added)
    }

    pub fn find_symbol(&self, name: &str) -> Option<&Symbol> {
        self.symbols.iter().find(|symbol| symbol.name == name)
    }

    /// The symbol covering `addr`. Unsized symbols extend to the next symbol
    /// or the end of their section.
    pub fn symbol_containing(&self, addr: u64) -> Option<&Symbol> {
        let section = self.section_containing(addr)?;
        let symbol = self
            .symbols
            .iter()
            .filter(|symbol| symbol.file_addr <= addr && section.contains(symbol.file_addr))
            .max_by_key(|symbol| symbol.file_addr)?;
        if symbol.size == 0 || addr - symbol.file_addr < symbol.size {
            Some(symbol)
        } else {
            None
        }
    }
}
