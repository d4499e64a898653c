//! C5 — Expression evaluator: walks a parsed `Expr` tree against a signal
//! environment and memory bank (spec.md §4.4).
//!
//! The teacher compiles `ExprDef` into a flat op list and dispatches over
//! `FlatOp` (`ir_interpreter::core::compile_expr_to_flat`); here the tree is
//! walked directly, since SPEC_FULL.md adopts the design note "replacing
//! textual re-evaluation" rather than a bytecode VM.

use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::env::SignalEnvironment;
use crate::error::{Result, SimError};
use crate::eval::compute_mask;
use crate::ir::ModuleIr;
use crate::memory::MemoryBank;

/// Width a given expression would occupy if used as a concatenation member
/// or replication body (spec.md §4.4 rule 7, "concatenation width is the
/// sum of its members' widths").
pub fn width_of(expr: &Expr, ir: &ModuleIr) -> Result<u32> {
    match expr {
        Expr::Signal(name) => ir
            .signal(name)
            .map(|d| d.width())
            .ok_or_else(|| SimError::UnresolvedSignal(name.clone())),
        Expr::Bit(_, _) | Expr::BitSelect { .. } => Ok(1),
        Expr::Literal { width, .. } => Ok(*width),
        Expr::Slice { msb, lsb, .. } => Ok((*msb as i64 - *lsb as i64).unsigned_abs() as u32 + 1),
        Expr::MemoryRead { memory, .. } => ir
            .memories
            .get(memory)
            .map(|m| m.word_width)
            .ok_or_else(|| SimError::MissingRom(memory.clone())),
        Expr::Concat(parts) => {
            let mut total = 0u32;
            for p in parts {
                total += width_of(p, ir)?;
            }
            Ok(total)
        }
        Expr::Replicate { count, expr } => Ok(count * width_of(expr, ir)?),
        Expr::Ternary { then_, else_, .. } => Ok(width_of(then_, ir)?.max(width_of(else_, ir)?)),
        Expr::Unary { expr, .. } => width_of(expr, ir),
        Expr::Binary { lhs, rhs, .. } => Ok(width_of(lhs, ir)?.max(width_of(rhs, ir)?)),
    }
}

/// Evaluate `expr` to a (masked) integer value.
pub fn evaluate(expr: &Expr, env: &SignalEnvironment, ir: &ModuleIr, memories: &MemoryBank) -> Result<u64> {
    match expr {
        Expr::Literal { value, width } => Ok(value & compute_mask(*width)),

        Expr::Signal(name) => {
            if ir.is_memory(name) {
                return Err(SimError::BadExpression(format!(
                    "memory '{name}' read without an index"
                )));
            }
            if let Some(&v) = env.get(name) {
                return Ok(v);
            }
            if let Some(v) = crate::env::collapse_from_aliases(env, ir, name) {
                return Ok(v);
            }
            Err(SimError::UnresolvedSignal(name.clone()))
        }

        Expr::Bit(name, index) => {
            if let Some(&v) = env.get(&format!("{name}[{index}]")) {
                return Ok(v & 1);
            }
            let whole = evaluate(&Expr::Signal(name.clone()), env, ir, memories)?;
            let decl = ir
                .signal(name)
                .ok_or_else(|| SimError::UnresolvedSignal(name.clone()))?;
            let shift = *index as i64 - decl.lo();
            if shift < 0 {
                return Err(SimError::UnresolvedSignal(format!("{name}[{index}]")));
            }
            Ok((whole >> shift) & 1)
        }

        Expr::BitSelect { signal, index } => {
            if ir.is_memory(signal) {
                let idx = evaluate(index, env, ir, memories)? as usize;
                return memories.read(signal, idx);
            }
            let idx = evaluate(index, env, ir, memories)?;
            evaluate(&Expr::Bit(signal.clone(), idx as u32), env, ir, memories)
        }

        Expr::Slice { signal, msb, lsb } => {
            let whole = evaluate(&Expr::Signal(signal.clone()), env, ir, memories)?;
            let decl = ir
                .signal(signal)
                .ok_or_else(|| SimError::UnresolvedSignal(signal.clone()))?;
            let lo = (*msb).min(*lsb) as i64 - decl.lo();
            let width = (*msb as i64 - *lsb as i64).unsigned_abs() as u32 + 1;
            if lo < 0 {
                return Err(SimError::UnresolvedSignal(format!("{signal}[{msb}:{lsb}]")));
            }
            Ok((whole >> lo) & compute_mask(width))
        }

        Expr::MemoryRead { memory, index } => {
            let idx = evaluate(index, env, ir, memories)? as usize;
            memories.read(memory, idx)
        }

        Expr::Concat(parts) => {
            let mut acc = 0u64;
            let mut shift = 0u32;
            for part in parts.iter().rev() {
                let v = evaluate(part, env, ir, memories)?;
                let w = width_of(part, ir)?;
                acc |= (v & compute_mask(w)) << shift;
                shift += w;
            }
            Ok(acc)
        }

        Expr::Replicate { count, expr } => {
            let v = evaluate(expr, env, ir, memories)?;
            let w = width_of(expr, ir)?;
            let unit = v & compute_mask(w);
            let mut acc = 0u64;
            for i in 0..*count {
                acc |= unit << (i * w);
            }
            Ok(acc)
        }

        Expr::Ternary { cond, then_, else_ } => {
            if evaluate(cond, env, ir, memories)? != 0 {
                evaluate(then_, env, ir, memories)
            } else {
                evaluate(else_, env, ir, memories)
            }
        }

        Expr::Unary { op, expr } => {
            let v = evaluate(expr, env, ir, memories)?;
            let w = width_of(expr, ir)?;
            let mask = compute_mask(w);
            Ok(match op {
                UnaryOp::Not => (!v) & mask,
                UnaryOp::LogicalNot => (v == 0) as u64,
                UnaryOp::Neg => v.wrapping_neg() & mask,
            })
        }

        Expr::Binary { op, lhs, rhs } => {
            let lv = evaluate(lhs, env, ir, memories)?;
            let rv = evaluate(rhs, env, ir, memories)?;
            let w = width_of(lhs, ir)?.max(width_of(rhs, ir)?);
            let mask = compute_mask(w);
            // Arithmetic/shift results are carried at full width here,
            // masked only where the value is actually written (target
            // signal, slice, or concat member), per spec.md §4.4 rule 10.
            // A chain like `A + B + Cin` must see its carry survive past
            // the inner `A + B` node; masking each node to its operands'
            // width would drop it before the outer add ever sees it.
            Ok(match op {
                BinaryOp::And => (lv & rv) & mask,
                BinaryOp::Or => (lv | rv) & mask,
                BinaryOp::Xor => (lv ^ rv) & mask,
                BinaryOp::Xnor => (!(lv ^ rv)) & mask,
                BinaryOp::LogicalAnd => ((lv != 0) && (rv != 0)) as u64,
                BinaryOp::LogicalOr => ((lv != 0) || (rv != 0)) as u64,
                BinaryOp::Add => lv.wrapping_add(rv),
                BinaryOp::Sub => lv.wrapping_sub(rv),
                BinaryOp::Mul => lv.wrapping_mul(rv),
                BinaryOp::Div => {
                    if rv == 0 {
                        return Err(SimError::BadExpression("division by zero".into()));
                    }
                    lv / rv
                }
                BinaryOp::Mod => {
                    if rv == 0 {
                        return Err(SimError::BadExpression("modulo by zero".into()));
                    }
                    lv % rv
                }
                BinaryOp::Shl => lv.checked_shl(rv as u32).unwrap_or(0),
                BinaryOp::Shr => lv.checked_shr(rv as u32).unwrap_or(0),
                BinaryOp::Eq => (lv == rv) as u64,
                BinaryOp::Ne => (lv != rv) as u64,
                BinaryOp::Lt => (lv < rv) as u64,
                BinaryOp::Gt => (lv > rv) as u64,
                BinaryOp::Le => (lv <= rv) as u64,
                BinaryOp::Ge => (lv >= rv) as u64,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{SignalDecl, SignalKind};
    use std::collections::{HashMap, HashSet};

    fn module_with(signals: Vec<SignalDecl>) -> ModuleIr {
        let mut map = HashMap::new();
        for s in signals {
            map.insert(s.name.clone(), s);
        }
        ModuleIr {
            name: "t".into(),
            inputs: vec![],
            outputs: vec![],
            signals: map,
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
    fn evaluates_nand() {
        let ir = module_with(vec![
            SignalDecl::scalar("a", SignalKind::Input),
            SignalDecl::scalar("b", SignalKind::Input),
        ]);
        let mut env = SignalEnvironment::new();
        env.insert("a".into(), 1);
        env.insert("b".into(), 1);
        let mem = MemoryBank::new();
        let expr = Expr::Unary {
            op: UnaryOp::Not,
            expr: Box::new(Expr::Binary {
                op: BinaryOp::And,
                lhs: Box::new(Expr::Signal("a".into())),
                rhs: Box::new(Expr::Signal("b".into())),
            }),
        };
        assert_eq!(evaluate(&expr, &env, &ir, &mem).unwrap(), 0);
    }

    #[test]
    fn slice_extracts_middle_bits() {
        let ir = module_with(vec![SignalDecl::ranged("bus", 7, 0, SignalKind::Wire)]);
        let mut env = SignalEnvironment::new();
        env.insert("bus".into(), 0b1011_0010);
        let mem = MemoryBank::new();
        let expr = Expr::Slice { signal: "bus".into(), msb: 5, lsb: 2 };
        assert_eq!(evaluate(&expr, &env, &ir, &mem).unwrap(), 0b1100);
    }

    #[test]
    fn concat_orders_msb_first() {
        let ir = module_with(vec![]);
        let env = SignalEnvironment::new();
        let mem = MemoryBank::new();
        let expr = Expr::Concat(vec![
            Expr::Literal { value: 0b10, width: 2 },
            Expr::Literal { value: 0b1, width: 1 },
        ]);
        assert_eq!(evaluate(&expr, &env, &ir, &mem).unwrap(), 0b101);
    }

    #[test]
    fn replicate_tiles_the_unit() {
        let ir = module_with(vec![]);
        let env = SignalEnvironment::new();
        let mem = MemoryBank::new();
        let expr = Expr::Replicate { count: 3, expr: Box::new(Expr::Literal { value: 0b10, width: 2 }) };
        assert_eq!(evaluate(&expr, &env, &ir, &mem).unwrap(), 0b10_10_10);
    }

    #[test]
    fn ternary_picks_branch_by_condition() {
        let ir = module_with(vec![]);
        let env = SignalEnvironment::new();
        let mem = MemoryBank::new();
        let expr = Expr::Ternary {
            cond: Box::new(Expr::Literal { value: 0, width: 1 }),
            then_: Box::new(Expr::Literal { value: 1, width: 1 }),
            else_: Box::new(Expr::Literal { value: 0, width: 1 }),
        };
        assert_eq!(evaluate(&expr, &env, &ir, &mem).unwrap(), 0);
    }

    #[test]
    fn unresolved_signal_is_an_error() {
        let ir = module_with(vec![SignalDecl::scalar("a", SignalKind::Input)]);
        let env = SignalEnvironment::new();
        let mem = MemoryBank::new();
        assert!(evaluate(&Expr::Signal("a".into()), &env, &ir, &mem).is_err());
    }
}
