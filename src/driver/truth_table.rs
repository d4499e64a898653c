//! C9 — Truth-Table Driver: enumerates input bit patterns over a purely
//! combinational top module and collects each (inputs, outputs) row
//! (spec.md §4.10).

use std::rc::Rc;

use crate::cache::ModuleCache;
use crate::env::{self, SignalEnvironment};
use crate::error::Result;
use crate::evaluator::{Evaluator, MemoryBinding};
use crate::ir::ModuleIr;

/// One row: the input assignment that produced it and the resulting
/// (possibly partial — spec.md §7 "missing columns for unreachable
/// outputs") output assignment.
#[derive(Debug, Clone)]
pub struct TruthRow {
    pub inputs: SignalEnvironment,
    pub outputs: SignalEnvironment,
}

#[derive(Debug, Clone)]
pub struct TruthTable {
    pub input_names: Vec<String>,
    pub output_names: Vec<String>,
    pub rows: Vec<TruthRow>,
    /// Set when `2^N > max_combinations` truncated the enumeration
    /// (spec.md §8 B1).
    pub truncated: bool,
}

/// Sum input widths to `N`, enumerate `i ∈ [0, min(2^N, max_combinations))`,
/// slice `i`'s bits MSB-first into the declared inputs in declaration
/// order, and evaluate each combination (spec.md §4.10).
pub fn run(ir: &Rc<ModuleIr>, cache: &Rc<ModuleCache>, max_combinations: u64) -> Result<TruthTable> {
    let bindings: Rc<Vec<MemoryBinding>> = Rc::new(Vec::new());
    let evaluator = Evaluator::new(ir.clone(), cache.clone(), ir.name.clone(), bindings)?;

    let widths: Vec<(String, u32)> = ir
        .inputs
        .iter()
        .map(|name| (name.clone(), ir.signal(name).map(|d| d.width()).unwrap_or(1)))
        .collect();
    let total_bits: u32 = widths.iter().map(|(_, w)| *w).sum();

    // Cap the shift to avoid overflow; any width this large already dwarfs
    // realistic max_combinations values, so the comparison below still
    // truncates correctly.
    let total_combinations: u128 = 1u128 << total_bits.min(127);
    let max_combinations = max_combinations.max(1) as u128;
    let truncated = total_combinations > max_combinations;
    if truncated {
        log::warn!(
            "truth table for '{}' truncated: 2^{} combinations exceeds max_combinations={}",
            ir.name,
            total_bits,
            max_combinations
        );
    }
    let limit = total_combinations.min(max_combinations);

    let mut rows = Vec::with_capacity(limit as usize);
    let mut i: u128 = 0;
    while i < limit {
        let mut inputs = SignalEnvironment::new();
        let mut remaining = total_bits;
        for (name, width) in &widths {
            remaining -= width;
            let mask = crate::eval::compute_mask(*width);
            let value = ((i >> remaining) as u64) & mask;
            env::write_and_expand(&mut inputs, ir, name, value);
        }

        let full = evaluator.evaluate(&inputs)?;
        let mut outputs = SignalEnvironment::new();
        for name in &ir.outputs {
            let value = full.get(name).copied().or_else(|| env::collapse_from_aliases(&full, ir, name));
            if let Some(value) = value {
                outputs.insert(name.clone(), value);
            }
        }

        rows.push(TruthRow { inputs, outputs });
        i += 1;
    }

    Ok(TruthTable { input_names: ir.inputs.clone(), output_names: ir.outputs.clone(), rows, truncated })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{SignalDecl, SignalKind};
    use std::collections::{HashMap, HashSet};
    use crate::ast::Expr;

    fn nand_ir() -> ModuleIr {
        let mut signals = HashMap::new();
        signals.insert("a".into(), SignalDecl::scalar("a", SignalKind::Input));
        signals.insert("b".into(), SignalDecl::scalar("b", SignalKind::Input));
        signals.insert("y".into(), SignalDecl::scalar("y", SignalKind::Output));
        ModuleIr {
            name: "nand_gate".into(),
            inputs: vec!["a".into(), "b".into()],
            outputs: vec!["y".into()],
            signals,
            assigns: vec![(
                "y".into(),
                Expr::Unary {
                    op: crate::ast::UnaryOp::Not,
                    expr: Box::new(Expr::Binary {
                        op: crate::ast::BinaryOp::And,
                        lhs: Box::new(Expr::Signal("a".into())),
                        rhs: Box::new(Expr::Signal("b".into())),
                    }),
                },
            )],
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
    fn enumerates_all_four_combinations_for_nand() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Rc::new(ModuleCache::new(vec![dir.path().to_path_buf()]));
        let ir = Rc::new(nand_ir());
        let table = run(&ir, &cache, 100).unwrap();
        assert_eq!(table.rows.len(), 4);
        assert!(!table.truncated);
        for row in &table.rows {
            let a = row.inputs["a"];
            let b = row.inputs["b"];
            let expected = 1 - (a & b);
            assert_eq!(row.outputs["y"], expected);
        }
    }

    #[test]
    fn truncates_and_flags_when_over_budget() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Rc::new(ModuleCache::new(vec![dir.path().to_path_buf()]));
        let ir = Rc::new(nand_ir());
        let table = run(&ir, &cache, 2).unwrap();
        assert_eq!(table.rows.len(), 2);
        assert!(table.truncated);
    }
}
