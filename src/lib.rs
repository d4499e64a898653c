//! A simulator for a structural subset of SystemVerilog: parses modules,
//! elaborates hierarchy on demand, and evaluates combinational and clocked
//! designs against vector files (spec.md §1).
//!
//! The return surface mirrors spec.md §6: [`parse`] lifts source text to an
//! elaborated [`ir::ModuleIr`]; [`make_evaluator`] builds a polymorphic
//! [`evaluator::Evaluator`] over it; [`count_primitive_gates`] is the cheap
//! structural metric the drivers use.

pub mod ast;
pub mod cache;
pub mod driver;
pub mod env;
pub mod error;
pub mod eval;
pub mod evaluator;
pub mod ir;
pub mod lexer;
pub mod memory;
pub mod parser;
pub mod signal;

use std::path::Path;
use std::rc::Rc;

use cache::ModuleCache;
use error::Result;
use evaluator::{Evaluator, MemoryBinding};
use ir::ModuleIr;

/// Parse a single module's source text into its elaborated IR (spec.md §6
/// `parse(source) -> ModuleIR`). Does not resolve child instances; that
/// happens lazily when an [`Evaluator`] is built over the result.
pub fn parse(source: &str) -> Result<ModuleIr> {
    parser::module::parse_module(source)
}

/// Build a module cache seeded with the conventional search path (current
/// directory, then the directory containing `top_source`) — spec.md §4.9.
pub fn default_cache(top_source: &Path) -> Rc<ModuleCache> {
    Rc::new(ModuleCache::new(cache::default_search_dirs(top_source)))
}

/// `makeEvaluator(ir, sourcePath, instancePath, bindings) -> Evaluator`
/// (spec.md §6). `cache` is shared across sibling evaluations so repeated
/// child lookups within one run hit the cache rather than re-parsing.
pub fn make_evaluator(
    ir: Rc<ModuleIr>,
    cache: Rc<ModuleCache>,
    instance_path: String,
    bindings: Rc<Vec<MemoryBinding>>,
) -> Result<Evaluator> {
    Evaluator::new(ir, cache, instance_path, bindings)
}

/// The number of `primitive`-named leaf instances reachable through
/// instantiation from `evaluator`, cycle-guarded (spec.md §6, §8 P6).
pub fn count_primitive_gates(evaluator: &Evaluator, primitive: &str) -> usize {
    let mut visited = std::collections::HashSet::new();
    evaluator.count_primitive_gates(primitive, &mut visited)
}
