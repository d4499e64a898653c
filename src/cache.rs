//! C4 — Module cache / loader: resolves a referenced module name to an IR,
//! reading `NAME.sv` next to the current source if not already cached
//! (spec.md §4.9).
//!
//! The teacher keeps a single `CoreSimulator` per process with no loader
//! concept (its IR arrives pre-elaborated as JSON); spec.md §9's "replacing
//! global mutable state" note licenses a per-run cache here instead of the
//! process-global singleton the original Python carries, so tests can run
//! in parallel without cross-talk.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::error::{Result, SimError};
use crate::ir::ModuleIr;
use crate::parser::module::parse_module;

pub struct ModuleCache {
    search_dirs: Vec<PathBuf>,
    modules: RefCell<HashMap<String, Rc<ModuleIr>>>,
}

impl ModuleCache {
    /// `search_dirs` are tried in order when a module is not already
    /// cached; conventionally the current working directory first, then
    /// the top source file's directory (spec.md §4.9).
    pub fn new(search_dirs: Vec<PathBuf>) -> Self {
        Self { search_dirs, modules: RefCell::new(HashMap::new()) }
    }

    /// Seed the cache directly with an already-parsed module, bypassing
    /// file resolution (used for a top module parsed from an in-memory
    /// string rather than a file).
    pub fn insert(&self, ir: ModuleIr) -> Rc<ModuleIr> {
        let rc = Rc::new(ir);
        self.modules.borrow_mut().insert(rc.name.clone(), rc.clone());
        rc
    }

    pub fn get(&self, name: &str) -> Result<Rc<ModuleIr>> {
        if let Some(found) = self.modules.borrow().get(name) {
            return Ok(found.clone());
        }
        let path = self.resolve_path(name)?;
        let source = std::fs::read_to_string(&path)?;
        let ir = parse_module(&source)?;
        let rc = Rc::new(ir);
        self.modules.borrow_mut().insert(name.to_string(), rc.clone());
        Ok(rc)
    }

    /// The configured search path, in order — reused by ROM-primitive
    /// data-file resolution (spec.md §4.7 "ROM primitive").
    pub fn search_dirs(&self) -> &[PathBuf] {
        &self.search_dirs
    }

    fn resolve_path(&self, name: &str) -> Result<PathBuf> {
        let filename = format!("{name}.sv");
        for dir in &self.search_dirs {
            let candidate = dir.join(&filename);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
        Err(SimError::MissingModule(name.to_string()))
    }

    pub fn clear(&self) {
        self.modules.borrow_mut().clear();
    }
}

/// Build the conventional two-entry search path: CWD first, then the
/// directory containing `top_source`.
pub fn default_search_dirs(top_source: &Path) -> Vec<PathBuf> {
    let mut dirs = vec![PathBuf::from(".")];
    if let Some(parent) = top_source.parent() {
        if !parent.as_os_str().is_empty() {
            dirs.push(parent.to_path_buf());
        }
    }
    dirs
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_a_missing_module_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nand_gate.sv");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(
            f,
            "module nand_gate(inA, inB, outY); input inA; input inB; output outY; assign outY = ~(inA & inB); endmodule"
        )
        .unwrap();

        let cache = ModuleCache::new(vec![dir.path().to_path_buf()]);
        let ir = cache.get("nand_gate").unwrap();
        assert_eq!(ir.name, "nand_gate");
        // second lookup must hit the cache, not touch the filesystem again
        let ir2 = cache.get("nand_gate").unwrap();
        assert!(Rc::ptr_eq(&ir, &ir2));
    }

    #[test]
    fn missing_module_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ModuleCache::new(vec![dir.path().to_path_buf()]);
        assert!(cache.get("does_not_exist").is_err());
    }
}
