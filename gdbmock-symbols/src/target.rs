/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use crate::error::Error;
use crate::module::Module;
use crate::symbol_file::SymbolFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BreakpointId(usize);

/// Where a breakpoint resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub module: String,
    pub file_addr: u64,
}

/// A breakpoint on a symbol name. It stays pending with no locations until
/// some module provides the symbol.
#[derive(Debug, Clone)]
pub struct Breakpoint {
    id: BreakpointId,
    name: String,
    module: Option<String>,
    locations: Vec<Location>,
}

impl Breakpoint {
    pub fn id(&self) -> BreakpointId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn locations(&self) -> &[Location] {
        &self.locations
    }

    pub fn num_locations(&self) -> usize {
        self.locations.len()
    }

    fn resolve(&mut self, modules: &[Module]) {
        self.locations = modules
            .iter()
            .filter(|module| self.module.as_deref().map_or(true, |name| module.name() == name))
            .filter_map(|module| {
                module.find_symbol(&self.name).map(|symbol| Location {
                    module: module.name().to_owned(),
                    file_addr: symbol.file_addr,
                })
            })
            .collect();
    }
}

/// Modules plus breakpoints. Anything that changes a module's symbols
/// re-resolves every breakpoint.
#[derive(Debug, Default)]
pub struct Target {
    modules: Vec<Module>,
    breakpoints: Vec<Breakpoint>,
}

impl Target {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_module(&mut self, module: Module) {
        self.modules.push(module);
        self.resolve_breakpoints();
    }

    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    pub fn module(&self, name: &str) -> Option<&Module> {
        self.modules.iter().find(|module| module.name() == name)
    }

    /// Breakpoint on `name`, optionally restricted to one module.
    pub fn breakpoint_create_by_name(&mut self, name: &str, module: Option<&str>) -> BreakpointId {
        let id = BreakpointId(self.breakpoints.len());
        let mut bp = Breakpoint {
            id,
            name: name.to_owned(),
            module: module.map(str::to_owned),
            locations: Vec::new(),
        };
        bp.resolve(&self.modules);
        tracing::debug!("breakpoint {:?} on {} has {} locations", id, name, bp.num_locations());
        self.breakpoints.push(bp);
        id
    }

    pub fn breakpoint(&self, id: BreakpointId) -> Option<&Breakpoint> {
        self.breakpoints.get(id.0)
    }

    /// Applies `file` to the named module.
    pub fn add_symbol_file(&mut self, module: &str, file: &SymbolFile) -> Result<usize, Error> {
        let target = self
            .modules
            .iter_mut()
            .find(|m| m.name() == module)
            .ok_or_else(|| Error::NoSuchModule(module.to_owned()))?;
        let added = target.add_symbol_file(file)?;
        self.resolve_breakpoints();
        Ok(added)
    }

    /// Applies `file` to the module whose uuid it names.
    pub fn add_symbol_file_by_uuid(&mut self, file: &SymbolFile) -> Result<usize, Error> {
        let name = file
            .uuid
            .as_deref()
            .and_then(|uuid| {
                self.modules
                    .iter()
                    .find(|m| m.uuid().is_some_and(|u| u.eq_ignore_ascii_case(uuid)))
            })
            .map(|m| m.name().to_owned())
            .ok_or_else(|| Error::NoModuleForUuid(file.uuid.clone()))?;
        self.add_symbol_file(&name, file)
    }

    fn resolve_breakpoints(&mut self) {
        for bp in &mut self.breakpoints {
            bp.resolve(&self.modules);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::symbol_file::SymbolEntry;

    fn module(name: &str) -> Module {
        Module::new(name)
            .with_uuid("1234")
            .with_section(".text", 0x1000, 0x100)
    }

    #[test]
    fn pending_breakpoint_resolves_after_load() {
        let mut target = Target::new();
        target.add_module(module("a.out"));
        let bp = target.breakpoint_create_by_name("main", Some("a.out"));
        assert_eq!(target.breakpoint(bp).unwrap().num_locations(), 0);

        let mut file = SymbolFile::new("x86_64-unknown-linux-gnu");
        file.symbols.push(SymbolEntry::new("main", 0x1020));
        assert_eq!(target.add_symbol_file("a.out", &file).unwrap(), 1);

        let bp = target.breakpoint(bp).unwrap();
        assert_eq!(bp.num_locations(), 1);
        assert_eq!(
            bp.locations()[0],
            Location {
                module: "a.out".to_owned(),
                file_addr: 0x1020
            }
        );
    }

    #[test]
    fn module_filter_and_new_modules() {
        let mut target = Target::new();
        let any = target.breakpoint_create_by_name("main", None);
        let only_b = target.breakpoint_create_by_name("main", Some("b.out"));

        let mut a = module("a.out");
        a.add_symbol_file(&{
            let mut f = SymbolFile::new("");
            f.symbols.push(SymbolEntry::new("main", 0x1000));
            f
        })
        .unwrap();
        target.add_module(a);

        assert_eq!(target.breakpoint(any).unwrap().num_locations(), 1);
        assert_eq!(target.breakpoint(only_b).unwrap().num_locations(), 0);
    }

    #[test]
    fn load_by_uuid() {
        let mut target = Target::new();
        target.add_module(module("a.out"));
        let mut file = SymbolFile::new("");
        file.symbols.push(SymbolEntry::new("foo", 0x1008));

        assert!(matches!(
            target.add_symbol_file_by_uuid(&file),
            Err(Error::NoModuleForUuid(None))
        ));
        file.uuid = Some("1234".to_owned());
        assert_eq!(target.add_symbol_file_by_uuid(&file).unwrap(), 1);
        assert!(target.module("a.out").unwrap().find_symbol("foo").is_some());
        assert!(matches!(
            target.add_symbol_file("b.out", &file),
            Err(Error::NoSuchModule(_))
        ));
    }
}
