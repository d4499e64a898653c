//! The elaborated, immutable module intermediate form (spec.md §3 `ModuleIR`).
//!
//! Grounded in the teacher's `ModuleIR`/`PortDef`/`RegDef`/`MemoryDef`
//! (`ir_interpreter::core`), generalized from a flat JSON signal table to
//! the richer bus/slice/concat/instance/memory model spec.md §3 requires.

use std::collections::{HashMap, HashSet};

use crate::ast::{Expr, Stmt, SequentialBlock};
use crate::signal::SignalDecl;

/// How a port-connection reference resolves against the parent scope
/// (spec.md §4.2 "The port-connect RHS may be...").
#[derive(Debug, Clone, PartialEq)]
pub enum PortRef {
    Bare(String),
    BitSelect(String, u32),
    Slice(String, u32, u32),
    Literal { value: u64, width: u32 },
}

#[derive(Debug, Clone)]
pub struct Instantiation {
    pub child_module: String,
    pub instance_name: String,
    /// child port name -> parent-scope reference, in declaration order.
    pub connections: Vec<(String, PortRef)>,
}

#[derive(Debug, Clone)]
pub struct SliceAssign {
    pub target: String,
    pub msb: u32,
    pub lsb: u32,
    pub expr: Expr,
}

#[derive(Debug, Clone)]
pub struct ConcatAssign {
    pub targets: Vec<String>,
    pub expr: Expr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryMode {
    Rom,
    Ram,
}

#[derive(Debug, Clone)]
pub struct MemoryDecl {
    pub name: String,
    pub word_width: u32,
    pub depth: usize,
}

/// A fully parsed module, immutable after construction (spec.md §3).
#[derive(Debug, Clone)]
pub struct ModuleIr {
    pub name: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub signals: HashMap<String, SignalDecl>,
    /// Bare continuous assignments: target signal -> expression.
    pub assigns: Vec<(String, Expr)>,
    pub slice_assigns: Vec<SliceAssign>,
    pub concat_assigns: Vec<ConcatAssign>,
    pub instances: Vec<Instantiation>,
    pub sequential_blocks: Vec<SequentialBlock>,
    pub comb_blocks: Vec<Stmt>,
    pub clocks: HashSet<String>,
    pub memories: HashMap<String, MemoryDecl>,
}

impl ModuleIr {
    pub fn signal(&self, name: &str) -> Option<&SignalDecl> {
        self.signals.get(name)
    }

    pub fn is_sequential(&self) -> bool {
        !self.sequential_blocks.is_empty()
    }

    pub fn is_memory(&self, name: &str) -> bool {
        self.memories.contains_key(name)
    }
}
