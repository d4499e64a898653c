//! C7 — Sequential evaluator: the per-cycle wrapper over C6 that samples
//! state and inputs, walks each `always_ff` block's statement AST with
//! blocking/non-blocking discipline, commits, then re-presents
//! combinational outputs (spec.md §4.7).

use std::cell::RefCell;

use crate::ast::{CaseArm, EdgePolarity, Stmt, Target};
use crate::env::{self, SignalEnvironment};
use crate::error::Result;
use crate::eval::comb;
use crate::eval::expr::evaluate;
use crate::evaluator::Instance;
use crate::ir::ModuleIr;
use crate::memory::MemoryBank;

/// `evaluate_cycle(inputs)` (spec.md §4.7 steps 1-5).
pub fn evaluate_cycle(
    inst: &Instance,
    state: &RefCell<SignalEnvironment>,
    inputs: &SignalEnvironment,
) -> Result<SignalEnvironment> {
    let ir = &inst.ir;

    // 1. Sample: pre-edge combinational view seen by every block's RHS.
    let pre_edge = comb::run_fixed_point_with_state(
        ir,
        &state.borrow(),
        inputs,
        &inst.cache,
        &inst.bindings,
        &inst.memories,
        &inst.children,
        true,
    )?;

    // 2. Compute: each active block gets its own cycle-local copy
    // (ordering guarantee (c), spec.md §5) seeded from the pre-edge view.
    let mut blocking_overlay = SignalEnvironment::new();
    let mut nonblocking_overlay = SignalEnvironment::new();
    let mut blocking_mem_writes = Vec::new();
    let mut nonblocking_mem_writes = Vec::new();

    {
        let read_memories = inst.memories.borrow();
        for block in &ir.sequential_blocks {
            if !is_active(block, ir, inputs) {
                continue;
            }
            let mut working = pre_edge.clone();
            let mut local_nb = SignalEnvironment::new();
            let mut local_blocking_mem = Vec::new();
            let mut local_nb_mem = Vec::new();

            exec_stmt(
                &block.body,
                &mut working,
                &mut local_nb,
                &mut local_blocking_mem,
                &mut local_nb_mem,
                ir,
                &read_memories,
            )?;

            for (k, v) in working.iter() {
                if pre_edge.get(k) != Some(v) {
                    blocking_overlay.insert(k.clone(), *v);
                }
            }
            for (k, v) in local_nb {
                nonblocking_overlay.insert(k, v);
            }
            blocking_mem_writes.extend(local_blocking_mem);
            nonblocking_mem_writes.extend(local_nb_mem);
        }
    }

    // 3. Commit: blocking region, then non-blocking region, last writer
    // wins within each (spec.md §4.7 step 3).
    let mut next_state = state.borrow().clone();
    for (k, v) in &blocking_overlay {
        env::write_and_expand(&mut next_state, ir, k, *v);
    }
    for (k, v) in &nonblocking_overlay {
        env::write_and_expand(&mut next_state, ir, k, *v);
    }
    {
        let mut mem = inst.memories.borrow_mut();
        for (name, addr, val) in blocking_mem_writes {
            if let Some(arr) = mem.get_mut(&name) {
                arr.write(addr, val);
            }
        }
        for (name, addr, val) in nonblocking_mem_writes {
            if let Some(arr) = mem.get_mut(&name) {
                arr.write(addr, val);
            }
        }
    }
    *state.borrow_mut() = next_state;

    // 4. Re-present: post-edge combinational outputs without re-advancing
    // child sequential elements.
    let post_edge = comb::run_fixed_point_with_state(
        ir,
        &state.borrow(),
        inputs,
        &inst.cache,
        &inst.bindings,
        &inst.memories,
        &inst.children,
        false,
    )?;

    // 5. Outputs from the post-edge view, falling back to state.
    let mut result = state.borrow().clone();
    for (k, v) in &post_edge {
        result.insert(k.clone(), *v);
    }
    Ok(result)
}

/// `peek_outputs(inputs)`: the combinational view without mutating state,
/// used when a parent evaluates this instance inside its own fixed-point
/// loop without advancing it (spec.md §4.7 "Auxiliary").
pub fn peek_outputs(
    inst: &Instance,
    state: &RefCell<SignalEnvironment>,
    inputs: &SignalEnvironment,
) -> Result<SignalEnvironment> {
    let view = comb::run_fixed_point_with_state(
        &inst.ir,
        &state.borrow(),
        inputs,
        &inst.cache,
        &inst.bindings,
        &inst.memories,
        &inst.children,
        false,
    )?;
    let mut result = state.borrow().clone();
    for (k, v) in &view {
        result.insert(k.clone(), *v);
    }
    Ok(result)
}

/// A trigger is active iff its clock input is `1` for `posedge` or `0`
/// for `negedge`; a clock that is not a scope input is always treated as
/// active (spec.md §4.7, and the Open Question adopting `clk=1` as
/// always-active regardless of prior value). Any active trigger in a
/// mixed sensitivity list fires the whole block.
fn is_active(block: &crate::ast::SequentialBlock, ir: &ModuleIr, inputs: &SignalEnvironment) -> bool {
    for (clock, polarity) in &block.triggers {
        let is_scope_input = ir.inputs.iter().any(|i| i == clock);
        match inputs.get(clock) {
            Some(&v) if is_scope_input => {
                let fires = match polarity {
                    EdgePolarity::Posedge => v & 1 == 1,
                    EdgePolarity::Negedge => v & 1 == 0,
                };
                if fires {
                    return true;
                }
            }
            _ => return true,
        }
    }
    false
}

fn exec_stmt(
    stmt: &Stmt,
    working: &mut SignalEnvironment,
    nb: &mut SignalEnvironment,
    blocking_mem: &mut Vec<(String, usize, u64)>,
    nb_mem: &mut Vec<(String, usize, u64)>,
    ir: &ModuleIr,
    memories: &MemoryBank,
) -> Result<()> {
    match stmt {
        Stmt::Block(stmts) => {
            for s in stmts {
                exec_stmt(s, working, nb, blocking_mem, nb_mem, ir, memories)?;
            }
        }
        Stmt::If { cond, then_, else_ } => {
            if evaluate(cond, working, ir, memories)? != 0 {
                exec_stmt(then_, working, nb, blocking_mem, nb_mem, ir, memories)?;
            } else if let Some(e) = else_ {
                exec_stmt(e, working, nb, blocking_mem, nb_mem, ir, memories)?;
            }
        }
        Stmt::Case { expr, arms, default_ } => {
            let v = evaluate(expr, working, ir, memories)?;
            if let Some(body) = select_arm(arms, v, working, ir, memories)? {
                exec_stmt(body, working, nb, blocking_mem, nb_mem, ir, memories)?;
            } else if let Some(d) = default_ {
                exec_stmt(d, working, nb, blocking_mem, nb_mem, ir, memories)?;
            }
        }
        Stmt::BlockingAssign { target, rhs } => {
            let v = evaluate(rhs, working, ir, memories)?;
            apply_blocking(target, v, working, blocking_mem, ir, memories)?;
        }
        Stmt::NonblockingAssign { target, rhs } => {
            let v = evaluate(rhs, working, ir, memories)?;
            apply_nonblocking(target, v, working, nb, nb_mem, ir, memories)?;
        }
        Stmt::Raw(_) | Stmt::Empty => {}
    }
    Ok(())
}

fn select_arm<'a>(
    arms: &'a [CaseArm],
    value: u64,
    working: &SignalEnvironment,
    ir: &ModuleIr,
    memories: &MemoryBank,
) -> Result<Option<&'a Stmt>> {
    for arm in arms {
        for label in &arm.labels {
            if evaluate(label, working, ir, memories)? == value {
                return Ok(Some(arm.body.as_ref()));
            }
        }
    }
    Ok(None)
}

/// Blocking writes mutate `working` immediately, so later statements in
/// the same block observe them (spec.md §5 ordering guarantee (a)).
fn apply_blocking(
    target: &Target,
    value: u64,
    working: &mut SignalEnvironment,
    mem_writes: &mut Vec<(String, usize, u64)>,
    ir: &ModuleIr,
    memories: &MemoryBank,
) -> Result<()> {
    match target {
        Target::MemoryWord(mem, idx) => {
            let addr = evaluate(idx, working, ir, memories)? as usize;
            mem_writes.push((mem.clone(), addr, value));
        }
        Target::Whole(name) | Target::IndexedSignal(name, _) => {
            write_whole(working, ir, name, value);
        }
        Target::Bit(name, idx) if ir.memories.contains_key(name) => {
            let addr = evaluate(idx, working, ir, memories)? as usize;
            mem_writes.push((name.clone(), addr, value));
        }
        Target::Bit(name, idx) => {
            let bit_index = evaluate(idx, working, ir, memories)?;
            let merged = merge_bit(working, ir, name, bit_index, value);
            write_whole(working, ir, name, merged);
        }
        Target::Slice(name, msb, lsb) => {
            comb::apply_slice(working, ir, name, *msb, *lsb, value);
        }
    }
    Ok(())
}

/// Non-blocking writes are computed against `working` (this block's
/// blocking-so-far snapshot) but never mutate it — they land in `nb`
/// instead, invisible to every RHS in this cycle (spec.md §5 ordering
/// guarantee (b)).
fn apply_nonblocking(
    target: &Target,
    value: u64,
    working: &SignalEnvironment,
    nb: &mut SignalEnvironment,
    nb_mem: &mut Vec<(String, usize, u64)>,
    ir: &ModuleIr,
    memories: &MemoryBank,
) -> Result<()> {
    match target {
        Target::MemoryWord(mem, idx) => {
            let addr = evaluate(idx, working, ir, memories)? as usize;
            nb_mem.push((mem.clone(), addr, value));
        }
        Target::Whole(name) | Target::IndexedSignal(name, _) => {
            let masked = mask_for(ir, name, value);
            nb.insert(name.clone(), masked);
        }
        Target::Bit(name, idx) if ir.memories.contains_key(name) => {
            let addr = evaluate(idx, working, ir, memories)? as usize;
            nb_mem.push((name.clone(), addr, value));
        }
        Target::Bit(name, idx) => {
            let bit_index = evaluate(idx, working, ir, memories)?;
            let merged = merge_bit(working, ir, name, bit_index, value);
            nb.insert(name.clone(), mask_for(ir, name, merged));
        }
        Target::Slice(name, msb, lsb) => {
            let mut scratch = SignalEnvironment::new();
            scratch.insert(name.clone(), working.get(name).copied().unwrap_or(0));
            comb::apply_slice(&mut scratch, ir, name, *msb, *lsb, value);
            if let Some(v) = scratch.get(name) {
                nb.insert(name.clone(), *v);
            }
        }
    }
    Ok(())
}

fn mask_for(ir: &ModuleIr, name: &str, value: u64) -> u64 {
    ir.signal(name).map(|d| value & d.mask()).unwrap_or(value)
}

fn write_whole(working: &mut SignalEnvironment, ir: &ModuleIr, name: &str, value: u64) {
    let masked = mask_for(ir, name, value);
    env::write_and_expand(working, ir, name, masked);
}

/// Merge one bit into `name`'s current whole-signal value without
/// disturbing the other bits (keeps invariant P2 intact for single-bit
/// writes).
fn merge_bit(working: &SignalEnvironment, ir: &ModuleIr, name: &str, index: u64, bit_value: u64) -> u64 {
    let decl = ir.signal(name);
    let lo = decl.map(|d| d.lo()).unwrap_or(0);
    let shift = (index as i64 - lo).max(0) as u32;
    let whole = working.get(name).copied().unwrap_or(0);
    let mask = 1u64 << shift;
    if bit_value & 1 == 1 {
        whole | mask
    } else {
        whole & !mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinaryOp, Expr, SequentialBlock};
    use crate::cache::ModuleCache;
    use crate::evaluator::MemoryBinding;
    use crate::signal::{SignalDecl, SignalKind};
    use std::collections::{HashMap, HashSet};
    use std::rc::Rc;

    fn register_ir() -> ModuleIr {
        let mut signals = HashMap::new();
        signals.insert("clk".into(), SignalDecl::scalar("clk", SignalKind::Input));
        signals.insert("d".into(), SignalDecl::scalar("d", SignalKind::Input));
        signals.insert("q".into(), SignalDecl::scalar("q", SignalKind::Output));
        let mut clocks = HashSet::new();
        clocks.insert("clk".to_string());
        ModuleIr {
            name: "dff".into(),
            inputs: vec!["clk".into(), "d".into()],
            outputs: vec!["q".into()],
            signals,
            assigns: vec![],
            slice_assigns: vec![],
            concat_assigns: vec![],
            instances: vec![],
            sequential_blocks: vec![SequentialBlock {
                triggers: vec![("clk".into(), EdgePolarity::Posedge)],
                body: Stmt::NonblockingAssign { target: Target::Whole("q".into()), rhs: Expr::Signal("d".into()) },
            }],
            comb_blocks: vec![],
            clocks,
            memories: HashMap::new(),
        }
    }

    fn fresh_instance(ir: ModuleIr) -> (Instance, RefCell<SignalEnvironment>) {
        let cache = Rc::new(ModuleCache::new(vec![]));
        let bindings: Rc<Vec<MemoryBinding>> = Rc::new(vec![]);
        let memories = RefCell::new(MemoryBank::new());
        let instance = Instance {
            ir: Rc::new(ir),
            cache,
            children: RefCell::new(HashMap::new()),
            memories,
            bindings,
            instance_path: "top".into(),
        };
        (instance, RefCell::new(SignalEnvironment::new()))
    }

    #[test]
    fn register_captures_d_on_posedge_s4() {
        let (inst, state) = fresh_instance(register_ir());
        let mut inputs = SignalEnvironment::new();
        inputs.insert("clk".into(), 1);
        inputs.insert("d".into(), 1);
        let out = evaluate_cycle(&inst, &state, &inputs).unwrap();
        assert_eq!(out.get("q"), Some(&1));

        inputs.insert("d".into(), 0);
        let out2 = evaluate_cycle(&inst, &state, &inputs).unwrap();
        assert_eq!(out2.get("q"), Some(&0));
    }

    #[test]
    fn register_holds_value_while_clock_low_b3() {
        let (inst, state) = fresh_instance(register_ir());
        let mut inputs = SignalEnvironment::new();
        inputs.insert("clk".into(), 1);
        inputs.insert("d".into(), 1);
        evaluate_cycle(&inst, &state, &inputs).unwrap();

        inputs.insert("clk".into(), 0);
        inputs.insert("d".into(), 0);
        let out = evaluate_cycle(&inst, &state, &inputs).unwrap();
        assert_eq!(out.get("q"), Some(&1));
    }

    fn counter_ir() -> ModuleIr {
        let mut signals = HashMap::new();
        signals.insert("clk".into(), SignalDecl::scalar("clk", SignalKind::Input));
        signals.insert("rst".into(), SignalDecl::scalar("rst", SignalKind::Input));
        signals.insert("cnt".into(), SignalDecl::ranged("cnt", 7, 0, SignalKind::Output));
        let mut clocks = HashSet::new();
        clocks.insert("clk".to_string());
        let body = Stmt::If {
            cond: Expr::Signal("rst".into()),
            then_: Box::new(Stmt::NonblockingAssign {
                target: Target::Whole("cnt".into()),
                rhs: Expr::Literal { value: 0, width: 8 },
            }),
            else_: Some(Box::new(Stmt::NonblockingAssign {
                target: Target::Whole("cnt".into()),
                rhs: Expr::Binary {
                    op: BinaryOp::Add,
                    lhs: Box::new(Expr::Signal("cnt".into())),
                    rhs: Box::new(Expr::Literal { value: 1, width: 8 }),
                },
            })),
        };
        ModuleIr {
            name: "counter".into(),
            inputs: vec!["clk".into(), "rst".into()],
            outputs: vec!["cnt".into()],
            signals,
            assigns: vec![],
            slice_assigns: vec![],
            concat_assigns: vec![],
            instances: vec![],
            sequential_blocks: vec![SequentialBlock {
                triggers: vec![("clk".into(), EdgePolarity::Posedge)],
                body,
            }],
            comb_blocks: vec![],
            clocks,
            memories: HashMap::new(),
        }
    }

    #[test]
    fn counter_advances_and_resets_s5() {
        let (inst, state) = fresh_instance(counter_ir());
        let mut inputs = SignalEnvironment::new();
        inputs.insert("clk".into(), 1);
        inputs.insert("rst".into(), 0);

        for expected in 1..=3u64 {
            let out = evaluate_cycle(&inst, &state, &inputs).unwrap();
            assert_eq!(out.get("cnt"), Some(&expected));
        }

        inputs.insert("rst".into(), 1);
        let out = evaluate_cycle(&inst, &state, &inputs).unwrap();
        assert_eq!(out.get("cnt"), Some(&0));

        inputs.insert("clk".into(), 0);
        inputs.insert("rst".into(), 0);
        let out = evaluate_cycle(&inst, &state, &inputs).unwrap();
        assert_eq!(out.get("cnt"), Some(&0));
    }
}
