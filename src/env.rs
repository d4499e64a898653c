//! `SignalEnvironment` (spec.md §3): a flat mapping from signal name, or
//! bit-alias `name[i]`, to its integer value, with helpers that keep a
//! bus and its per-bit aliases coherent (invariant P2, spec.md §8).

use std::collections::HashMap;

use crate::ir::ModuleIr;

pub type SignalEnvironment = HashMap<String, u64>;

/// Write `value` for `name` and expand it into per-bit aliases `name[i]`
/// when the module declares `name` as a multi-bit signal.
pub fn write_and_expand(env: &mut SignalEnvironment, ir: &ModuleIr, name: &str, value: u64) {
    env.insert(name.to_string(), value);
    expand_aliases(env, ir, name, value);
}

/// Expand an already-stored bus value into its per-bit aliases without
/// touching the bus entry itself.
pub fn expand_aliases(env: &mut SignalEnvironment, ir: &ModuleIr, name: &str, value: u64) {
    if let Some(decl) = ir.signal(name) {
        let width = decl.width();
        if width > 1 {
            let lo = decl.lo();
            for bit in 0..width as i64 {
                let abs_index = lo + bit;
                env.insert(format!("{name}[{abs_index}]"), (value >> bit) & 1);
            }
        }
    }
}

/// Seed `env` with every entry of `inputs`, expanding bus aliases as it
/// goes (spec.md §4.5 step 1).
pub fn seed_inputs(env: &mut SignalEnvironment, ir: &ModuleIr, inputs: &SignalEnvironment) {
    for (name, value) in inputs {
        write_and_expand(env, ir, name, *value);
    }
}

/// Reconstruct a bus's value from its per-bit aliases, used as a fallback
/// when an output was only ever written bit-by-bit (spec.md §4.5 step 5).
pub fn collapse_from_aliases(env: &SignalEnvironment, ir: &ModuleIr, name: &str) -> Option<u64> {
    let decl = ir.signal(name)?;
    let width = decl.width();
    let lo = decl.lo();
    let mut value = 0u64;
    let mut any_present = false;
    for bit in 0..width as i64 {
        let abs_index = lo + bit;
        if let Some(&bit_val) = env.get(&format!("{name}[{abs_index}]")) {
            any_present = true;
            value |= (bit_val & 1) << bit;
        }
    }
    any_present.then_some(value)
}
