//! C10 — Vector-Test Driver: runs declarative JSON test vectors (one-shot
//! combinational, or multi-cycle sequential) against a freshly elaborated
//! module instance and reports pass/fail (spec.md §4.10, §6).

use std::path::{Path, PathBuf};
use std::rc::Rc;

use serde_json::Value;

use crate::cache::ModuleCache;
use crate::env::SignalEnvironment;
use crate::error::{Result, SimError};
use crate::evaluator::{BindingMode, Evaluator, MemoryBinding};
use crate::ir::ModuleIr;

/// One failed expectation: which vector it came from, its optional
/// author-supplied description (surfaced by the CLI's `--descriptions`
/// flag), and the mismatch detail.
#[derive(Debug, Clone)]
pub struct VectorFailure {
    pub label: String,
    pub description: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct VectorReport {
    pub passed: usize,
    pub total: usize,
    pub failures: Vec<VectorFailure>,
}

impl VectorReport {
    pub fn all_passed(&self) -> bool {
        self.passed == self.total
    }
}

/// Build an evaluator for `ir` with whatever memory bindings `root`
/// declares, then dispatch to whichever of the three accepted vector
/// shapes `root` is (spec.md §6).
pub fn run(ir: &Rc<ModuleIr>, cache: &Rc<ModuleCache>, root: &Value, vectors_dir: &Path) -> Result<VectorReport> {
    let bindings = Rc::new(extract_bindings(root, vectors_dir)?);
    let evaluator = Evaluator::new(ir.clone(), cache.clone(), ir.name.clone(), bindings)?;

    if let Some(cycles) = legacy_sequential_cycles(root) {
        return run_legacy_sequential(&evaluator, cycles);
    }
    if let Some(cases) = modern_test_cases(root) {
        return run_modern_sequential(&evaluator, cases);
    }
    if let Some(arr) = root.as_array() {
        return run_combinational(&evaluator, arr);
    }
    Err(SimError::BadBinding(
        "vector file is neither a combinational array, a legacy sequential object, nor a modern sequential object"
            .into(),
    ))
}

fn legacy_sequential_cycles(root: &Value) -> Option<&Vec<Value>> {
    if root.get("test_type").and_then(Value::as_str) == Some("sequential") {
        root.get("test_cycles").and_then(Value::as_array)
    } else {
        None
    }
}

fn modern_test_cases(root: &Value) -> Option<&Vec<Value>> {
    let is_modern =
        root.get("sequential").and_then(Value::as_bool) == Some(true) || root.get("test_cases").is_some();
    if is_modern {
        root.get("test_cases").and_then(Value::as_array)
    } else {
        None
    }
}

fn run_combinational(evaluator: &Evaluator, cases: &[Value]) -> Result<VectorReport> {
    let mut passed = 0;
    let mut failures = Vec::new();
    for (i, case) in cases.iter().enumerate() {
        let obj = case
            .as_object()
            .ok_or_else(|| SimError::BadBinding(format!("vector[{i}] is not an object")))?;
        let expect = obj
            .get("expect")
            .ok_or_else(|| SimError::BadBinding(format!("vector[{i}] missing 'expect'")))?;
        let expected = json_obj_to_env(expect)?;

        let mut inputs = SignalEnvironment::new();
        for (key, value) in obj {
            if key == "expect" || key == "description" {
                continue;
            }
            inputs.insert(key.clone(), json_value_to_u64(value)?);
        }

        let label = format!("vector[{i}]");
        let description = obj.get("description").and_then(Value::as_str).map(String::from);
        match evaluator.evaluate(&inputs) {
            Ok(actual) => match compare(&expected, &actual) {
                Some(message) => failures.push(VectorFailure { label, description, message }),
                None => passed += 1,
            },
            Err(e) => failures.push(VectorFailure { label, description, message: e.to_string() }),
        }
    }
    Ok(VectorReport { passed, total: cases.len(), failures })
}

fn run_legacy_sequential(evaluator: &Evaluator, cycles: &[Value]) -> Result<VectorReport> {
    let mut passed = 0;
    let mut failures = Vec::new();
    for (i, cycle) in cycles.iter().enumerate() {
        let obj = cycle
            .as_object()
            .ok_or_else(|| SimError::BadBinding(format!("test_cycles[{i}] is not an object")))?;
        let inputs = obj.get("inputs").map(json_obj_to_env).transpose()?.unwrap_or_default();
        let expected = obj
            .get("expected_outputs")
            .map(json_obj_to_env)
            .transpose()?
            .unwrap_or_default();
        let description = obj.get("description").and_then(Value::as_str).map(String::from);
        let label = match obj.get("cycle").and_then(Value::as_i64) {
            Some(n) => format!("cycle {n}"),
            None => format!("test_cycles[{i}]"),
        };
        match evaluator.evaluate_cycle(&inputs) {
            Ok(actual) => match compare(&expected, &actual) {
                Some(message) => failures.push(VectorFailure { label, description, message }),
                None => passed += 1,
            },
            Err(e) => failures.push(VectorFailure { label, description, message: e.to_string() }),
        }
    }
    Ok(VectorReport { passed, total: cycles.len(), failures })
}

fn run_modern_sequential(evaluator: &Evaluator, cases: &[Value]) -> Result<VectorReport> {
    let mut passed = 0;
    let mut total = 0;
    let mut failures = Vec::new();

    for (i, case) in cases.iter().enumerate() {
        let obj = case
            .as_object()
            .ok_or_else(|| SimError::BadBinding(format!("test_cases[{i}] is not an object")))?;
        let name = obj
            .get("name")
            .and_then(Value::as_str)
            .map(String::from)
            .unwrap_or_else(|| format!("test_cases[{i}]"));
        let case_description = obj.get("description").and_then(Value::as_str).map(String::from);

        // Each test case starts from a clean slate: sequential state and
        // memory contents must not leak from one named case to the next.
        evaluator.reset_state();

        if let Some(sequence) = obj.get("sequence").and_then(Value::as_array) {
            for (j, step) in sequence.iter().enumerate() {
                total += 1;
                let step_obj = step
                    .as_object()
                    .ok_or_else(|| SimError::BadBinding(format!("{name}.sequence[{j}] is not an object")))?;
                let inputs = step_obj.get("inputs").map(json_obj_to_env).transpose()?.unwrap_or_default();
                let expected = step_obj
                    .get("expected")
                    .map(json_obj_to_env)
                    .transpose()?
                    .unwrap_or_default();
                let description = step_obj
                    .get("description")
                    .and_then(Value::as_str)
                    .map(String::from)
                    .or_else(|| case_description.clone());
                let label = format!("{name}[{j}]");
                match evaluator.evaluate_cycle(&inputs) {
                    Ok(actual) => match compare(&expected, &actual) {
                        Some(message) => failures.push(VectorFailure { label, description, message }),
                        None => passed += 1,
                    },
                    Err(e) => failures.push(VectorFailure { label, description, message: e.to_string() }),
                }
            }
        } else {
            total += 1;
            let inputs = obj.get("inputs").map(json_obj_to_env).transpose()?.unwrap_or_default();
            let expected = obj.get("expected").map(json_obj_to_env).transpose()?.unwrap_or_default();
            match evaluator.evaluate_cycle(&inputs) {
                Ok(actual) => match compare(&expected, &actual) {
                    Some(message) => {
                        failures.push(VectorFailure { label: name.clone(), description: case_description, message })
                    }
                    None => passed += 1,
                },
                Err(e) => failures.push(VectorFailure { label: name.clone(), description: case_description, message: e.to_string() }),
            }
        }
    }
    Ok(VectorReport { passed, total, failures })
}

/// Any mismatch or missing output fails the vector (spec.md §4.10).
fn compare(expected: &SignalEnvironment, actual: &SignalEnvironment) -> Option<String> {
    let mut mismatches = Vec::new();
    for (name, want) in expected {
        match actual.get(name) {
            Some(got) if got == want => {}
            Some(got) => mismatches.push(format!("{name}: expected {want}, got {got}")),
            None => mismatches.push(format!("{name}: expected {want}, got <missing>")),
        }
    }
    if mismatches.is_empty() {
        None
    } else {
        Some(mismatches.join("; "))
    }
}

fn json_value_to_u64(v: &Value) -> Result<u64> {
    match v {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_i64().map(|i| i as u64))
            .ok_or_else(|| SimError::BadBinding(format!("non-integer numeric value {n}"))),
        Value::Bool(b) => Ok(*b as u64),
        Value::String(s) => crate::memory::parse_init_word(s),
        other => Err(SimError::BadBinding(format!("expected an integer value, found {other}"))),
    }
}

fn json_obj_to_env(v: &Value) -> Result<SignalEnvironment> {
    let obj = v
        .as_object()
        .ok_or_else(|| SimError::BadBinding("expected a JSON object of signal:value pairs".into()))?;
    let mut env = SignalEnvironment::new();
    for (name, value) in obj {
        env.insert(name.clone(), json_value_to_u64(value)?);
    }
    Ok(env)
}

/// Memory bindings may appear as `memory_init`, `memory_files.rom`/`.ram`,
/// or bare top-level `rom`/`ram` keys (spec.md §6).
fn extract_bindings(root: &Value, vectors_dir: &Path) -> Result<Vec<MemoryBinding>> {
    let mut bindings = Vec::new();
    if let Some(v) = root.get("memory_init") {
        bindings.extend(parse_binding_entries(v, None, vectors_dir)?);
    }
    if let Some(files) = root.get("memory_files") {
        if let Some(rom) = files.get("rom") {
            bindings.extend(parse_binding_entries(rom, Some(BindingMode::Rom), vectors_dir)?);
        }
        if let Some(ram) = files.get("ram") {
            bindings.extend(parse_binding_entries(ram, Some(BindingMode::Ram), vectors_dir)?);
        }
    }
    if let Some(v) = root.get("rom") {
        bindings.extend(parse_binding_entries(v, Some(BindingMode::Rom), vectors_dir)?);
    }
    if let Some(v) = root.get("ram") {
        bindings.extend(parse_binding_entries(v, Some(BindingMode::Ram), vectors_dir)?);
    }
    Ok(bindings)
}

fn parse_binding_entries(value: &Value, default_mode: Option<BindingMode>, vectors_dir: &Path) -> Result<Vec<MemoryBinding>> {
    match value {
        Value::Array(items) => items.iter().map(|v| parse_binding_entry(v, default_mode, vectors_dir)).collect(),
        Value::Object(_) => Ok(vec![parse_binding_entry(value, default_mode, vectors_dir)?]),
        _ => Err(SimError::BadBinding("memory binding entry must be a JSON object or an array of objects".into())),
    }
}

fn parse_binding_entry(v: &Value, default_mode: Option<BindingMode>, vectors_dir: &Path) -> Result<MemoryBinding> {
    let mode = match v.get("type").and_then(Value::as_str) {
        Some("rom") => BindingMode::Rom,
        Some("ram") => BindingMode::Ram,
        Some(other) => return Err(SimError::BadBinding(format!("unknown memory binding type '{other}'"))),
        None => default_mode.unwrap_or(BindingMode::Ram),
    };
    let module = v.get("module").and_then(Value::as_str).map(String::from);
    let instance_path = v
        .get("instance")
        .or_else(|| v.get("instance_path"))
        .and_then(Value::as_str)
        .map(String::from);
    let memory = v.get("memory").or_else(|| v.get("name")).and_then(Value::as_str).map(String::from);
    let file_str = v
        .get("file")
        .or_else(|| v.get("path"))
        .and_then(Value::as_str)
        .ok_or_else(|| SimError::BadBinding("memory binding missing 'file'/'path'".into()))?;
    let file = resolve_relative(vectors_dir, file_str);
    Ok(MemoryBinding { module, instance_path, memory, mode, file })
}

fn resolve_relative(base_dir: &Path, file_str: &str) -> PathBuf {
    let p = PathBuf::from(file_str);
    if p.is_absolute() {
        p
    } else {
        base_dir.join(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinaryOp, Expr};
    use crate::signal::{SignalDecl, SignalKind};
    use std::collections::{HashMap, HashSet};

    fn and_gate_ir() -> ModuleIr {
        let mut signals = HashMap::new();
        signals.insert("a".into(), SignalDecl::scalar("a", SignalKind::Input));
        signals.insert("b".into(), SignalDecl::scalar("b", SignalKind::Input));
        signals.insert("y".into(), SignalDecl::scalar("y", SignalKind::Output));
        ModuleIr {
            name: "and_gate".into(),
            inputs: vec!["a".into(), "b".into()],
            outputs: vec!["y".into()],
            signals,
            assigns: vec![(
                "y".into(),
                Expr::Binary {
                    op: BinaryOp::And,
                    lhs: Box::new(Expr::Signal("a".into())),
                    rhs: Box::new(Expr::Signal("b".into())),
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
    fn combinational_array_reports_pass_fail() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Rc::new(ModuleCache::new(vec![dir.path().to_path_buf()]));
        let ir = Rc::new(and_gate_ir());
        let root: Value = serde_json::from_str(
            r#"[
                {"a": 1, "b": 1, "expect": {"y": 1}},
                {"a": 1, "b": 0, "expect": {"y": 1}}
            ]"#,
        )
        .unwrap();
        let report = run(&ir, &cache, &root, dir.path()).unwrap();
        assert_eq!(report.total, 2);
        assert_eq!(report.passed, 1);
        assert_eq!(report.failures.len(), 1);
    }

    #[test]
    fn unknown_binding_type_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Rc::new(ModuleCache::new(vec![dir.path().to_path_buf()]));
        let ir = Rc::new(and_gate_ir());
        let root: Value = serde_json::from_str(
            r#"{"rom": {"type": "flash", "file": "x.txt"}, "test_cases": []}"#,
        )
        .unwrap();
        assert!(run(&ir, &cache, &root, dir.path()).is_err());
    }
}
