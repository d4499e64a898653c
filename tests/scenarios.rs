//! End-to-end scenarios (spec.md §8 S1-S6): real `.sv` source text parsed,
//! elaborated, and evaluated through the public crate surface, distinct
//! from the inline-IR unit tests embedded next to each evaluator module.

use std::collections::HashMap;
use std::rc::Rc;

use sv_sim::cache::ModuleCache;
use sv_sim::env::SignalEnvironment;
use sv_sim::evaluator::MemoryBinding;
use sv_sim::{count_primitive_gates, make_evaluator, parse};

fn inputs(pairs: &[(&str, u64)]) -> SignalEnvironment {
    let mut env = HashMap::new();
    for (name, value) in pairs {
        env.insert((*name).to_string(), *value);
    }
    env
}

fn no_bindings() -> Rc<Vec<MemoryBinding>> {
    Rc::new(Vec::new())
}

#[test]
fn s1_nand_gate() {
    let src = "module nand_gate(inA, inB, outY);
        input inA;
        input inB;
        output outY;
        assign outY = ~(inA & inB);
    endmodule";
    let ir = parse(src).unwrap();
    let cache = Rc::new(ModuleCache::new(vec![]));
    let ir = cache.insert(ir);
    let evaluator = make_evaluator(ir, cache, "top".into(), no_bindings()).unwrap();

    let out = |a: u64, b: u64| evaluator.evaluate(&inputs(&[("inA", a), ("inB", b)])).unwrap();
    assert_eq!(out(0, 0).get("outY"), Some(&1));
    assert_eq!(out(1, 0).get("outY"), Some(&1));
    assert_eq!(out(1, 1).get("outY"), Some(&0));
}

#[test]
fn s2_xor_via_nand_and_primitive_count() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("nand_gate.sv"),
        "module nand_gate(inA, inB, outY);
            input inA;
            input inB;
            output outY;
            assign outY = ~(inA & inB);
        endmodule",
    )
    .unwrap();

    let xor_src = "module xor2(A, B, Y);
        input A;
        input B;
        output Y;
        wire n1, n2, n3;
        nand_gate g1 (.inA(A), .inB(B), .outY(n1));
        nand_gate g2 (.inA(A), .inB(n1), .outY(n2));
        nand_gate g3 (.inA(B), .inB(n1), .outY(n3));
        nand_gate g4 (.inA(n2), .inB(n3), .outY(Y));
    endmodule";
    let ir = parse(xor_src).unwrap();
    let cache = Rc::new(ModuleCache::new(vec![dir.path().to_path_buf()]));
    let ir = cache.insert(ir);
    let evaluator = make_evaluator(ir, cache, "top".into(), no_bindings()).unwrap();

    let out = |a: u64, b: u64| evaluator.evaluate(&inputs(&[("A", a), ("B", b)])).unwrap();
    assert_eq!(out(0, 0).get("Y"), Some(&0));
    assert_eq!(out(0, 1).get("Y"), Some(&1));
    assert_eq!(out(1, 0).get("Y"), Some(&1));
    assert_eq!(out(1, 1).get("Y"), Some(&0));

    // count_primitive_gates needs the instance tree elaborated at least once
    // so children are populated in each instance's child map.
    let _ = out(0, 0);
    assert_eq!(count_primitive_gates(&evaluator, "nand_gate"), 4);
}

#[test]
fn s3_ripple_carry_adder() {
    let src = "module adder4(A, B, Cin, Sum, Cout);
        input [3:0] A;
        input [3:0] B;
        input Cin;
        output [3:0] Sum;
        output Cout;
        wire [4:0] full;
        assign full = A + B + Cin;
        assign Sum = full[3:0];
        assign Cout = full[4];
    endmodule";
    let ir = parse(src).unwrap();
    let cache = Rc::new(ModuleCache::new(vec![]));
    let ir = cache.insert(ir);
    let evaluator = make_evaluator(ir, cache, "top".into(), no_bindings()).unwrap();

    let out = evaluator
        .evaluate(&inputs(&[("A", 0b1011), ("B", 0b0110), ("Cin", 0)]))
        .unwrap();
    assert_eq!(out.get("Sum"), Some(&0b0001));
    assert_eq!(out.get("Cout"), Some(&1));
}

#[test]
fn s4_one_bit_register() {
    let src = "module reg1(clk, d, q);
        input clk;
        input d;
        output q;
        always_ff @(posedge clk)
            q <= d;
    endmodule";
    let ir = parse(src).unwrap();
    let cache = Rc::new(ModuleCache::new(vec![]));
    let ir = cache.insert(ir);
    let evaluator = make_evaluator(ir, cache, "top".into(), no_bindings()).unwrap();

    let tick = |clk: u64, d: u64| evaluator.evaluate_cycle(&inputs(&[("clk", clk), ("d", d)])).unwrap();

    assert_eq!(tick(1, 1).get("q"), Some(&1));
    assert_eq!(tick(1, 0).get("q"), Some(&0));
    // posedge inactive: clk low leaves q unchanged regardless of d.
    assert_eq!(tick(0, 1).get("q"), Some(&0));
    assert_eq!(tick(0, 1).get("q"), Some(&0));
}

#[test]
fn s5_counter_with_sync_reset() {
    let src = "module counter(clk, rst, cnt);
        input clk;
        input rst;
        output [7:0] cnt;
        always_ff @(posedge clk)
            if (rst) cnt <= 0;
            else cnt <= cnt + 1;
    endmodule";
    let ir = parse(src).unwrap();
    let cache = Rc::new(ModuleCache::new(vec![]));
    let ir = cache.insert(ir);
    let evaluator = make_evaluator(ir, cache, "top".into(), no_bindings()).unwrap();

    let tick = |clk: u64, rst: u64| evaluator.evaluate_cycle(&inputs(&[("clk", clk), ("rst", rst)])).unwrap();

    assert_eq!(tick(1, 0).get("cnt"), Some(&1));
    assert_eq!(tick(1, 0).get("cnt"), Some(&2));
    assert_eq!(tick(1, 0).get("cnt"), Some(&3));
    assert_eq!(tick(1, 1).get("cnt"), Some(&0));
    assert_eq!(tick(0, 0).get("cnt"), Some(&0));
}

#[test]
fn s6_rom_primitive_wraps_address() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("boot.txt"), "0xAA\n0xBB\n0xCC\n0xDD\n").unwrap();

    let src = "module rom_boot(addr, data);
        input [3:0] addr;
        output [7:0] data;
    endmodule";
    let ir = parse(src).unwrap();
    let cache = Rc::new(ModuleCache::new(vec![dir.path().to_path_buf()]));
    let ir = cache.insert(ir);
    let evaluator = make_evaluator(ir, cache, "top".into(), no_bindings()).unwrap();

    let at = |addr: u64| evaluator.evaluate(&inputs(&[("addr", addr)])).unwrap().get("data").copied().unwrap();
    assert_eq!(at(2), 0xCC);
    assert_eq!(at(17), 0xBB);
}
