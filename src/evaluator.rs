//! The polymorphic Evaluator capability (spec.md §9, "replacing dynamic
//! introspection"): every elaborated module instance is either
//! `Combinational` or `Sequential`, behind the same `evaluate`/`peek`/
//! `reset` surface, so a parent never has to ask "does this child have a
//! clock?" at runtime.
//!
//! Each instance owns its children exclusively (spec.md §9, "replacing
//! cyclic ownership risks") via a lazily-populated map keyed by instance
//! name, created on first reference and preserved across cycles.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::cache::ModuleCache;
use crate::env::SignalEnvironment;
use crate::error::{Result, SimError};
use crate::eval::{comb, seq};
use crate::ir::ModuleIr;
use crate::memory::{MemoryArray, MemoryBank};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingMode {
    Rom,
    Ram,
}

/// A memory binding supplied by a vector file (spec.md §4.8): associates a
/// data file with a (module, instance path, memory name) scope.
#[derive(Debug, Clone)]
pub struct MemoryBinding {
    pub module: Option<String>,
    pub instance_path: Option<String>,
    pub memory: Option<String>,
    pub mode: BindingMode,
    pub file: PathBuf,
}

impl MemoryBinding {
    fn matches(&self, module_name: &str, instance_path: &str, memory_name: &str) -> bool {
        if let Some(m) = &self.module {
            if m != module_name {
                return false;
            }
        }
        if let Some(p) = &self.instance_path {
            if !p.is_empty() && !instance_path.ends_with(p.as_str()) {
                return false;
            }
        }
        if let Some(mem) = &self.memory {
            if mem != memory_name {
                return false;
            }
        }
        true
    }
}

/// One elaborated module instance. The heavy combinational work lives in
/// `eval::comb`; the cycle algorithm in `eval::seq`. This type is just the
/// owning node in the instance tree, plus its persistent state.
///
/// `Rom` is the third, degenerate variant: a module whose name begins
/// with `rom_` never runs its own (near-empty) body at all — elaboration
/// short-circuits straight to a data-file lookup (spec.md §4.7 "ROM
/// primitive").
pub enum Evaluator {
    Combinational(Instance),
    Sequential(Instance, RefCell<SignalEnvironment>),
    Rom(RomInstance),
}

pub struct RomInstance {
    pub ir: Rc<ModuleIr>,
    pub words: Vec<u64>,
    pub input_name: String,
    pub output_name: String,
}

pub struct Instance {
    pub ir: Rc<ModuleIr>,
    pub cache: Rc<ModuleCache>,
    pub children: RefCell<HashMap<String, Evaluator>>,
    pub memories: RefCell<MemoryBank>,
    pub bindings: Rc<Vec<MemoryBinding>>,
    pub instance_path: String,
}

impl Evaluator {
    pub fn new(
        ir: Rc<ModuleIr>,
        cache: Rc<ModuleCache>,
        instance_path: String,
        bindings: Rc<Vec<MemoryBinding>>,
    ) -> Result<Self> {
        if let Some(rest) = ir.name.strip_prefix("rom_") {
            let path = resolve_rom_data_file(rest, cache.search_dirs())?;
            let words = load_rom_words(&path)?;
            let input_name = ir.inputs.first().cloned().ok_or_else(|| {
                SimError::InvalidSource(format!("rom primitive '{}' declares no address input", ir.name))
            })?;
            let output_name = ir.outputs.first().cloned().ok_or_else(|| {
                SimError::InvalidSource(format!("rom primitive '{}' declares no data output", ir.name))
            })?;
            return Ok(Evaluator::Rom(RomInstance { ir, words, input_name, output_name }));
        }

        let memories = build_memory_bank(&ir, &instance_path, &bindings)?;
        let instance = Instance {
            ir: ir.clone(),
            cache,
            children: RefCell::new(HashMap::new()),
            memories: RefCell::new(memories),
            bindings,
            instance_path,
        };
        if ir.is_sequential() {
            Ok(Evaluator::Sequential(instance, RefCell::new(SignalEnvironment::new())))
        } else {
            Ok(Evaluator::Combinational(instance))
        }
    }

    pub fn ir(&self) -> &Rc<ModuleIr> {
        match self {
            Evaluator::Combinational(i) => &i.ir,
            Evaluator::Sequential(i, _) => &i.ir,
            Evaluator::Rom(r) => &r.ir,
        }
    }

    /// `evaluate(inputs)`: combinational evaluation for a purely
    /// combinational instance, or one advancing cycle for a sequential
    /// one (spec.md §6's `evaluate`/`evaluateCycle` split collapses to
    /// this single entry point per variant).
    pub fn evaluate(&self, inputs: &SignalEnvironment) -> Result<SignalEnvironment> {
        match self {
            Evaluator::Combinational(inst) => comb::run_fixed_point(
                &inst.ir,
                inputs,
                &inst.cache,
                &inst.bindings,
                &inst.memories,
                &inst.children,
                true,
            ),
            Evaluator::Sequential(..) => self.evaluate_cycle(inputs),
            Evaluator::Rom(r) => Ok(rom_outputs(r, inputs)),
        }
    }

    pub fn evaluate_cycle(&self, inputs: &SignalEnvironment) -> Result<SignalEnvironment> {
        match self {
            Evaluator::Sequential(inst, state) => seq::evaluate_cycle(inst, state, inputs),
            Evaluator::Combinational(inst) => comb::run_fixed_point(
                &inst.ir,
                inputs,
                &inst.cache,
                &inst.bindings,
                &inst.memories,
                &inst.children,
                true,
            ),
            Evaluator::Rom(r) => Ok(rom_outputs(r, inputs)),
        }
    }

    /// Outputs without advancing sequential state — used by a parent's
    /// fixed-point loop so a sequential child only ticks once per parent
    /// cycle (spec.md §4.5 step 2).
    pub fn peek_outputs(&self, inputs: &SignalEnvironment) -> Result<SignalEnvironment> {
        match self {
            Evaluator::Combinational(inst) => comb::run_fixed_point(
                &inst.ir,
                inputs,
                &inst.cache,
                &inst.bindings,
                &inst.memories,
                &inst.children,
                false,
            ),
            Evaluator::Sequential(inst, state) => seq::peek_outputs(inst, state, inputs),
            Evaluator::Rom(r) => Ok(rom_outputs(r, inputs)),
        }
    }

    pub fn reset_state(&self) {
        match self {
            Evaluator::Combinational(inst) => reset_children(inst),
            Evaluator::Sequential(inst, state) => {
                state.borrow_mut().clear();
                let _ = reinit_memories(inst);
                reset_children(inst);
            }
            Evaluator::Rom(_) => {}
        }
    }

    /// The number of primitive-leaf instances reachable through
    /// instantiation, cycle-guarded (spec.md §6, §8 P6).
    pub fn count_primitive_gates(&self, primitive: &str, visited: &mut std::collections::HashSet<String>) -> usize {
        match self {
            Evaluator::Rom(r) => usize::from(r.ir.name == primitive),
            Evaluator::Combinational(inst) => count_via_instance(inst, primitive, visited),
            Evaluator::Sequential(inst, _) => count_via_instance(inst, primitive, visited),
        }
    }
}

fn count_via_instance(inst: &Instance, primitive: &str, visited: &mut std::collections::HashSet<String>) -> usize {
    if !visited.insert(inst.ir.name.clone()) {
        return 0;
    }
    let mut count = if inst.ir.name == primitive { 1 } else { 0 };
    for child_inst in &inst.ir.instances {
        let child_ir = match inst.cache.get(&child_inst.child_module) {
            Ok(ir) => ir,
            Err(_) => continue,
        };
        let child_path = format!("{}.{}", inst.instance_path, child_inst.instance_name);
        if let Ok(child_eval) = Evaluator::new(child_ir, inst.cache.clone(), child_path, inst.bindings.clone()) {
            count += child_eval.count_primitive_gates(primitive, visited);
        }
    }
    visited.remove(&inst.ir.name);
    count
}

/// `data[addr mod depth]` on the first output, addressed by the first
/// input — spec.md §4.7 "ROM primitive".
fn rom_outputs(r: &RomInstance, inputs: &SignalEnvironment) -> SignalEnvironment {
    let addr = inputs.get(&r.input_name).copied().unwrap_or(0) as usize;
    let len = r.words.len().max(1);
    let data = r.words.get(addr % len).copied().unwrap_or(0);
    let masked = r.ir.signal(&r.output_name).map(|d| data & d.mask()).unwrap_or(data);
    let mut out = SignalEnvironment::new();
    out.insert(r.output_name.clone(), masked);
    out
}

fn load_rom_words(path: &Path) -> Result<Vec<u64>> {
    let text = std::fs::read_to_string(path)?;
    let mut words = Vec::new();
    for raw_line in text.lines() {
        let line = raw_line.split("//").next().unwrap_or("").trim();
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        words.push(crate::memory::parse_init_word(line)?);
    }
    Ok(words)
}

fn reset_children(inst: &Instance) {
    for (_, child) in inst.children.borrow().iter() {
        child.reset_state();
    }
}

fn reinit_memories(inst: &Instance) -> Result<()> {
    let fresh = build_memory_bank(&inst.ir, &inst.instance_path, &inst.bindings)?;
    *inst.memories.borrow_mut() = fresh;
    Ok(())
}

fn build_memory_bank(ir: &ModuleIr, instance_path: &str, bindings: &[MemoryBinding]) -> Result<MemoryBank> {
    let mut bank = MemoryBank::new();
    for (name, decl) in &ir.memories {
        let binding = bindings.iter().find(|b| b.matches(&ir.name, instance_path, name));
        let mode = match binding.map(|b| b.mode) {
            Some(BindingMode::Rom) => crate::ir::MemoryMode::Rom,
            Some(BindingMode::Ram) | None => crate::ir::MemoryMode::Ram,
        };
        let mut array = MemoryArray::new(mode, decl.word_width, decl.depth);
        if let Some(b) = binding {
            array.load_init_file(&b.file)?;
        }
        bank.insert(name.clone(), array);
    }
    Ok(bank)
}

/// Resolve the `rom_`-prefixed data file search order (spec.md §4.7):
/// each of the cache's search directories, then a `roms/` subdirectory
/// next to each, then `roms/` under the process working directory.
pub fn resolve_rom_data_file(rest_of_name: &str, search_dirs: &[PathBuf]) -> Result<PathBuf> {
    let filename = format!("{rest_of_name}.txt");
    let mut candidates = Vec::new();
    for dir in search_dirs {
        candidates.push(dir.join(&filename));
        candidates.push(dir.join("roms").join(&filename));
    }
    candidates.push(PathBuf::from("roms").join(&filename));
    for c in &candidates {
        if c.is_file() {
            return Ok(c.clone());
        }
    }
    Err(SimError::MissingRom(filename))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{SignalDecl, SignalKind};
    use std::collections::HashSet;

    fn rom_boot_ir() -> ModuleIr {
        let mut signals = HashMap::new();
        signals.insert("addr".into(), SignalDecl::ranged("addr", 3, 0, SignalKind::Input));
        signals.insert("data".into(), SignalDecl::ranged("data", 7, 0, SignalKind::Output));
        ModuleIr {
            name: "rom_boot".into(),
            inputs: vec!["addr".into()],
            outputs: vec!["data".into()],
            signals,
            assigns: vec![],
            slice_assigns: vec![],
            concat_assigns: vec![],
            instances: vec![],
            sequential_blocks: vec![],
            comb_blocks: vec![],
            clocks: HashSet::new(),
            memories: HashMap::new(),
        }
    }

    #[test]
    fn rom_primitive_wraps_address_s6() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("boot.txt"), "0xAA\n0xBB\n0xCC\n0xDD\n").unwrap();

        let cache = Rc::new(ModuleCache::new(vec![dir.path().to_path_buf()]));
        let bindings: Rc<Vec<MemoryBinding>> = Rc::new(vec![]);
        let evaluator =
            Evaluator::new(Rc::new(rom_boot_ir()), cache, "top".into(), bindings).unwrap();

        let mut at = |addr: u64| {
            let mut inputs = SignalEnvironment::new();
            inputs.insert("addr".into(), addr);
            evaluator.evaluate(&inputs).unwrap().get("data").copied().unwrap()
        };
        assert_eq!(at(2), 0xCC);
        assert_eq!(at(17), 0xBB);
    }
}
