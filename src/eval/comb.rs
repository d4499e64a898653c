//! C6 — Combinational evaluator: fixed-point propagation of continuous
//! assignments, instance connections, and `always_comb` blocks over one
//! module instance (spec.md §4.5).
//!
//! The teacher evaluates a topologically-sorted flat-op list once per
//! `evaluate()` call (`ir_interpreter::core::CoreSimulator::evaluate`);
//! here, because instances and `?:`-heavy expressions make a static order
//! unreliable to derive from text alone, the whole assignment set is
//! re-run to a fixed point instead, matching the original's iterate-
//! until-stable strategy (`original_source/pysvsim.py`'s `LogicEvaluator`).

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::{Stmt, Target};
use crate::cache::ModuleCache;
use crate::env::{self, SignalEnvironment};
use crate::error::{Result, SimError};
use crate::eval::compute_mask;
use crate::eval::expr::evaluate;
use crate::evaluator::{Evaluator, MemoryBinding};
use crate::ir::{ModuleIr, PortRef};
use crate::memory::MemoryBank;

/// Upper bound on fixed-point passes before giving up (spec.md §4.5 step 3,
/// sized as the original does: assignment/block count plus a constant).
fn max_iterations(ir: &ModuleIr) -> usize {
    ir.assigns.len() + 2 * ir.comb_blocks.len() + ir.slice_assigns.len() + ir.concat_assigns.len() + ir.instances.len() + 10
}

/// Evaluate one module instance combinationally against the given input
/// bindings, returning the full resulting signal environment.
///
/// `advance_sequential` controls whether stateful children are ticked
/// (`evaluate`) or merely sampled (`peek_outputs`) — spec.md §4.5 step 2.
pub fn run_fixed_point(
    ir: &ModuleIr,
    inputs: &SignalEnvironment,
    cache: &Rc<ModuleCache>,
    bindings: &Rc<Vec<MemoryBinding>>,
    memories: &RefCell<MemoryBank>,
    children: &RefCell<HashMap<String, Evaluator>>,
    advance_sequential: bool,
) -> Result<SignalEnvironment> {
    run_fixed_point_seeded(ir, inputs, cache, bindings, memories, children, advance_sequential)
}

/// Same as `run_fixed_point`, but the initial environment is seeded from
/// `state` first and `inputs` applied on top — used by the sequential
/// evaluator's "sample" and "re-present" steps (spec.md §4.7), where RHS
/// expressions must see persisted register/output values alongside the
/// current cycle's inputs.
pub fn run_fixed_point_with_state(
    ir: &ModuleIr,
    state: &SignalEnvironment,
    inputs: &SignalEnvironment,
    cache: &Rc<ModuleCache>,
    bindings: &Rc<Vec<MemoryBinding>>,
    memories: &RefCell<MemoryBank>,
    children: &RefCell<HashMap<String, Evaluator>>,
    advance_sequential: bool,
) -> Result<SignalEnvironment> {
    let mut seed = state.clone();
    for (k, v) in inputs {
        seed.insert(k.clone(), *v);
    }
    run_fixed_point_seeded(ir, &seed, cache, bindings, memories, children, advance_sequential)
}

fn run_fixed_point_seeded(
    ir: &ModuleIr,
    seed: &SignalEnvironment,
    cache: &Rc<ModuleCache>,
    bindings: &Rc<Vec<MemoryBinding>>,
    memories: &RefCell<MemoryBank>,
    children: &RefCell<HashMap<String, Evaluator>>,
    advance_sequential: bool,
) -> Result<SignalEnvironment> {
    let mut env = SignalEnvironment::new();
    env::seed_inputs(&mut env, ir, seed);

    // Instances are stateful and must run exactly once per evaluation,
    // hoisted above the fixed-point loop (spec.md §4.5 rationale).
    for inst in &ir.instances {
        evaluate_instance(inst, &mut env, ir, cache, bindings, children, advance_sequential)?;
    }

    {
        let mem = memories.borrow();
        let bound = max_iterations(ir);
        for _ in 0..bound {
            let mut changed = false;

            for (target, expr) in &ir.assigns {
                if let Ok(v) = evaluate(expr, &env, ir, &mem) {
                    changed |= write_if_new(&mut env, ir, target, v);
                }
            }

            for block in &ir.comb_blocks {
                changed |= exec_stmt(block, &mut env, ir, &mem)?;
            }

            if !changed {
                break;
            }
        }
    }

    {
        let mem = memories.borrow();
        for sa in &ir.slice_assigns {
            if let Ok(v) = evaluate(&sa.expr, &env, ir, &mem) {
                apply_slice(&mut env, ir, &sa.target, sa.msb, sa.lsb, v);
            }
        }

        for ca in &ir.concat_assigns {
            if let Ok(v) = evaluate(&ca.expr, &env, ir, &mem) {
                apply_concat(&mut env, ir, &ca.targets, v);
            }
        }
    }

    for name in ir.outputs.iter() {
        if !env.contains_key(name) {
            if let Some(v) = env::collapse_from_aliases(&env, ir, name) {
                env.insert(name.clone(), v);
            }
        }
    }

    Ok(env)
}

fn write_if_new(env: &mut SignalEnvironment, ir: &ModuleIr, name: &str, value: u64) -> bool {
    let masked = match ir.signal(name) {
        Some(decl) => value & decl.mask(),
        None => value,
    };
    if env.get(name) == Some(&masked) {
        return false;
    }
    env::write_and_expand(env, ir, name, masked);
    true
}

/// Apply `value` across the bit range `[msb:lsb]` of `target`, leaving the
/// rest of the bus untouched (spec.md §4.5 step 4).
pub(crate) fn apply_slice(env: &mut SignalEnvironment, ir: &ModuleIr, target: &str, msb: u32, lsb: u32, value: u64) {
    let decl = match ir.signal(target) {
        Some(d) => d,
        None => return,
    };
    let lo = (msb.min(lsb) as i64 - decl.lo()).max(0) as u32;
    let width = (msb as i64 - lsb as i64).unsigned_abs() as u32 + 1;
    let slice_mask = compute_mask(width) << lo;
    let whole = env.get(target).copied().unwrap_or(0);
    let merged = (whole & !slice_mask) | ((value << lo) & slice_mask);
    write_if_new(env, ir, target, merged);
}

/// Distribute a concatenation's value across its targets, LSB-first
/// across the target list (spec.md §4.5 step 4).
fn apply_concat(env: &mut SignalEnvironment, ir: &ModuleIr, targets: &[String], value: u64) {
    let mut shift = 0u32;
    for name in targets.iter().rev() {
        let width = ir.signal(name).map(|d| d.width()).unwrap_or(1);
        let piece = (value >> shift) & compute_mask(width);
        write_if_new(env, ir, name, piece);
        shift += width;
    }
}

/// Resolve a child instance's ports against the parent environment, get
/// or lazily create its (persistent) `Evaluator`, run it, and copy its
/// outputs back into the parent environment.
fn evaluate_instance(
    inst: &crate::ir::Instantiation,
    env: &mut SignalEnvironment,
    parent_ir: &ModuleIr,
    cache: &Rc<ModuleCache>,
    bindings: &Rc<Vec<MemoryBinding>>,
    children: &RefCell<HashMap<String, Evaluator>>,
    advance_sequential: bool,
) -> Result<()> {
    let child_ir = cache.get(&inst.child_module)?;

    if !children.borrow().contains_key(&inst.instance_name) {
        let evaluator = Evaluator::new(child_ir.clone(), cache.clone(), inst.instance_name.clone(), bindings.clone())?;
        children.borrow_mut().insert(inst.instance_name.clone(), evaluator);
    }

    let mut child_inputs = SignalEnvironment::new();
    for (port, reference) in &inst.connections {
        if !child_ir.inputs.contains(port) {
            continue;
        }
        let value = resolve_port_ref(reference, env, parent_ir)?;
        child_inputs.insert(port.clone(), value);
    }

    let child_env = {
        let borrowed = children.borrow();
        let child_eval = borrowed.get(&inst.instance_name).expect("just inserted above");
        if advance_sequential {
            child_eval.evaluate(&child_inputs)?
        } else {
            child_eval.peek_outputs(&child_inputs)?
        }
    };

    for (port, reference) in &inst.connections {
        if !child_ir.outputs.contains(port) {
            continue;
        }
        let value = child_env.get(port).copied().unwrap_or(0);
        match reference {
            PortRef::Bare(parent_name) => {
                write_if_new(env, parent_ir, parent_name, value);
            }
            PortRef::BitSelect(parent_name, idx) => {
                apply_slice(env, parent_ir, parent_name, *idx, *idx, value);
            }
            PortRef::Slice(parent_name, msb, lsb) => {
                apply_slice(env, parent_ir, parent_name, *msb, *lsb, value);
            }
            PortRef::Literal { .. } => {
                // A literal can't be an output target; nothing to write back.
            }
        }
    }

    Ok(())
}

fn resolve_port_ref(reference: &PortRef, env: &SignalEnvironment, ir: &ModuleIr) -> Result<u64> {
    match reference {
        PortRef::Literal { value, width } => Ok(value & compute_mask(*width)),
        PortRef::Bare(name) => env
            .get(name)
            .copied()
            .or_else(|| env::collapse_from_aliases(env, ir, name))
            .ok_or_else(|| SimError::UnresolvedSignal(name.clone())),
        PortRef::BitSelect(name, idx) => env
            .get(&format!("{name}[{idx}]"))
            .copied()
            .ok_or_else(|| SimError::UnresolvedSignal(format!("{name}[{idx}]"))),
        PortRef::Slice(name, msb, lsb) => {
            let whole = env
                .get(name)
                .copied()
                .or_else(|| env::collapse_from_aliases(env, ir, name))
                .ok_or_else(|| SimError::UnresolvedSignal(name.clone()))?;
            let decl = ir.signal(name).ok_or_else(|| SimError::UnresolvedSignal(name.clone()))?;
            let lo = (*msb).min(*lsb) as i64 - decl.lo();
            let width = (*msb as i64 - *lsb as i64).unsigned_abs() as u32 + 1;
            Ok((whole >> lo.max(0)) & compute_mask(width))
        }
    }
}

/// Execute a procedural statement in combinational context. Blocking and
/// non-blocking assignments are treated identically here: an
/// `always_comb` body has no clock edge to defer to, so a non-blocking
/// write degenerates to an immediate one (spec.md §4.6).
pub(crate) fn exec_stmt(stmt: &Stmt, env: &mut SignalEnvironment, ir: &ModuleIr, memories: &MemoryBank) -> Result<bool> {
    match stmt {
        Stmt::Block(stmts) => {
            let mut changed = false;
            for s in stmts {
                changed |= exec_stmt(s, env, ir, memories)?;
            }
            Ok(changed)
        }
        Stmt::If { cond, then_, else_ } => {
            if evaluate(cond, env, ir, memories)? != 0 {
                exec_stmt(then_, env, ir, memories)
            } else if let Some(e) = else_ {
                exec_stmt(e, env, ir, memories)
            } else {
                Ok(false)
            }
        }
        Stmt::Case { expr, arms, default_ } => {
            let v = evaluate(expr, env, ir, memories)?;
            for arm in arms {
                for label in &arm.labels {
                    if evaluate(label, env, ir, memories)? == v {
                        return exec_stmt(&arm.body, env, ir, memories);
                    }
                }
            }
            if let Some(d) = default_ {
                exec_stmt(d, env, ir, memories)
            } else {
                Ok(false)
            }
        }
        Stmt::BlockingAssign { target, rhs } | Stmt::NonblockingAssign { target, rhs } => {
            let v = evaluate(rhs, env, ir, memories)?;
            Ok(assign_target(env, ir, target, v))
        }
        Stmt::Raw(_) | Stmt::Empty => Ok(false),
    }
}

pub(crate) fn assign_target(env: &mut SignalEnvironment, ir: &ModuleIr, target: &Target, value: u64) -> bool {
    match target {
        Target::Whole(name) | Target::IndexedSignal(name, _) => write_if_new(env, ir, name, value),
        Target::Bit(name, index_expr) => {
            if let crate::ast::Expr::Literal { value: idx, .. } = index_expr.as_ref() {
                let bit = format!("{name}[{idx}]");
                let changed = env.get(&bit) != Some(&(value & 1));
                env.insert(bit, value & 1);
                changed
            } else {
                false
            }
        }
        Target::Slice(name, msb, lsb) => {
            apply_slice(env, ir, name, *msb, *lsb, value);
            true
        }
        Target::MemoryWord(_, _) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::MemoryMode;
    use crate::signal::{SignalDecl, SignalKind};
    use std::collections::HashSet;

    fn nand_ir() -> ModuleIr {
        let mut signals = HashMap::new();
        signals.insert("inA".into(), SignalDecl::scalar("inA", SignalKind::Input));
        signals.insert("inB".into(), SignalDecl::scalar("inB", SignalKind::Input));
        signals.insert("outY".into(), SignalDecl::scalar("outY", SignalKind::Output));
        ModuleIr {
            name: "nand_gate".into(),
            inputs: vec!["inA".into(), "inB".into()],
            outputs: vec!["outY".into()],
            signals,
            assigns: vec![(
                "outY".into(),
                crate::ast::Expr::Unary {
                    op: crate::ast::UnaryOp::Not,
                    expr: Box::new(crate::ast::Expr::Binary {
                        op: crate::ast::BinaryOp::And,
                        lhs: Box::new(crate::ast::Expr::Signal("inA".into())),
                        rhs: Box::new(crate::ast::Expr::Signal("inB".into())),
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
    fn nand_truth_table_s1() {
        let ir = nand_ir();
        let cache = Rc::new(ModuleCache::new(vec![]));
        let bindings: Rc<Vec<MemoryBinding>> = Rc::new(vec![]);
        let memories = RefCell::new(MemoryBank::new());
        let children = RefCell::new(HashMap::new());

        let mut check = |a: u64, b: u64, expect: u64| {
            let mut inputs = SignalEnvironment::new();
            inputs.insert("inA".into(), a);
            inputs.insert("inB".into(), b);
            let out = run_fixed_point(&ir, &inputs, &cache, &bindings, &memories, &children, true).unwrap();
            assert_eq!(out.get("outY"), Some(&expect));
        };
        check(0, 0, 1);
        check(1, 0, 1);
        check(1, 1, 0);
        let _ = MemoryMode::Rom;
    }
}
