//! C2 — Module parser: lifts one `module NAME ( PORTS ) ; … endmodule`
//! declaration into a `ModuleIr` (spec.md §4.2).
//!
//! Grounded in the teacher's JSON-to-`ModuleIR` construction
//! (`ir_interpreter::core`'s `ModuleIR`/`PortDef`/`RegDef`/`MemoryDef`
//! deserialization), but built by scanning HDL source text directly
//! instead of deserializing an already-structured document.

use std::collections::{HashMap, HashSet};

use crate::ast::{EdgePolarity, Expr, SequentialBlock, Stmt};
use crate::error::{Result, SimError};
use crate::ir::{ConcatAssign, Instantiation, MemoryDecl, ModuleIr, PortRef, SliceAssign};
use crate::lexer;
use crate::parser::expr::parse_expr;
use crate::parser::statement::parse_one;
use crate::signal::{SignalDecl, SignalKind};

struct Builder {
    name: String,
    header_order: Vec<String>,
    signals: HashMap<String, SignalDecl>,
    assigns: Vec<(String, Expr)>,
    slice_assigns: Vec<SliceAssign>,
    concat_assigns: Vec<ConcatAssign>,
    instances: Vec<Instantiation>,
    sequential_blocks: Vec<SequentialBlock>,
    comb_blocks: Vec<Stmt>,
    clocks: HashSet<String>,
    memories: HashMap<String, MemoryDecl>,
}

/// Parse a single module definition out of cleaned or raw source text (it
/// is cleaned here if not already).
pub fn parse_module(source: &str) -> Result<ModuleIr> {
    let cleaned = lexer::clean(source)?;
    let after_kw = find_keyword(&cleaned, "module")
        .ok_or_else(|| SimError::InvalidSource("no module declaration".into()))?;

    let rest = cleaned[after_kw..].trim_start();
    let name_end = rest.find(|c: char| !(c.is_alphanumeric() || c == '_')).unwrap_or(rest.len());
    let name = rest[..name_end].to_string();
    if name.is_empty() {
        return Err(SimError::InvalidSource("module declaration missing a name".into()));
    }

    let after_name = rest[name_end..].trim_start();
    let after_paren = after_name
        .strip_prefix('(')
        .ok_or_else(|| SimError::InvalidSource("module header missing '('".into()))?;
    let close = lexer::find_matching(after_paren, '(', ')')
        .ok_or_else(|| SimError::InvalidSource("module header missing ')'".into()))?;
    let ports_str = &after_paren[..close];
    let after_ports = after_paren[close + 1..].trim_start();
    let after_semi = after_ports
        .strip_prefix(';')
        .ok_or_else(|| SimError::InvalidSource("module header missing ';'".into()))?;

    let body = match find_keyword(after_semi, "endmodule") {
        Some(idx) => &after_semi[..idx],
        None => after_semi,
    };

    let mut b = Builder {
        name,
        header_order: Vec::new(),
        signals: HashMap::new(),
        assigns: Vec::new(),
        slice_assigns: Vec::new(),
        concat_assigns: Vec::new(),
        instances: Vec::new(),
        sequential_blocks: Vec::new(),
        comb_blocks: Vec::new(),
        clocks: HashSet::new(),
        memories: HashMap::new(),
    };

    parse_header_ports(ports_str, &mut b)?;
    parse_body(body, &mut b)?;

    let mut inputs = Vec::new();
    let mut outputs = Vec::new();
    for name in &b.header_order {
        match b.signals.get(name).map(|d| d.kind) {
            Some(SignalKind::Input) => inputs.push(name.clone()),
            Some(SignalKind::Output) => outputs.push(name.clone()),
            _ => {}
        }
    }

    Ok(ModuleIr {
        name: b.name,
        inputs,
        outputs,
        signals: b.signals,
        assigns: b.assigns,
        slice_assigns: b.slice_assigns,
        concat_assigns: b.concat_assigns,
        instances: b.instances,
        sequential_blocks: b.sequential_blocks,
        comb_blocks: b.comb_blocks,
        clocks: b.clocks,
        memories: b.memories,
    })
}

/// Header port list: either bare comma-separated names (direction
/// established later by body `input`/`output` redeclarations, the common
/// style per spec.md §8's scenarios) or entries that already carry a
/// direction keyword and optional range.
fn parse_header_ports(ports_str: &str, b: &mut Builder) -> Result<()> {
    for raw in lexer::split_top_level(ports_str, ',') {
        let entry = raw.trim();
        if entry.is_empty() {
            continue;
        }
        if let Some(rest) = strip_word(entry, "input") {
            declare_ports(rest, SignalKind::Input, b)?;
        } else if let Some(rest) = strip_word(entry, "output") {
            declare_ports(rest, SignalKind::Output, b)?;
        } else {
            let name = strip_modifiers(entry);
            b.header_order.push(name.to_string());
        }
    }
    Ok(())
}

/// Strip the non-semantic modifier keywords spec.md §4.2 says to accept
/// and ignore (`wire`, `logic`, `reg`, `signed`, `unsigned`), returning
/// whatever text remains (expected to be a name or range+name).
fn strip_modifiers(mut s: &str) -> &str {
    loop {
        let trimmed = s.trim_start();
        let mut advanced = false;
        for kw in ["wire", "logic", "reg", "signed", "unsigned"] {
            if let Some(rest) = strip_word(trimmed, kw) {
                s = rest;
                advanced = true;
                break;
            }
        }
        if !advanced {
            return trimmed;
        }
    }
}

/// Parse `[range]? name (, name)*` under a known direction, declaring each
/// signal and recording it in header order.
fn declare_ports(s: &str, kind: SignalKind, b: &mut Builder) -> Result<()> {
    let s = strip_modifiers(s);
    let (range, rest) = take_range(s)?;
    for raw_name in lexer::split_top_level(rest, ',') {
        let name = raw_name.trim();
        if name.is_empty() {
            continue;
        }
        insert_signal(b, name, range, kind);
        b.header_order.push(name.to_string());
    }
    Ok(())
}

fn insert_signal(b: &mut Builder, name: &str, range: Option<(i64, i64)>, kind: SignalKind) {
    let decl = match range {
        Some((msb, lsb)) => SignalDecl::ranged(name, msb, lsb, kind),
        None => SignalDecl::scalar(name, kind),
    };
    b.signals.insert(name.to_string(), decl);
}

/// Consume an optional leading `[msb:lsb]`, returning it (if present) and
/// the remaining text.
fn take_range(s: &str) -> Result<(Option<(i64, i64)>, &str)> {
    let s = s.trim_start();
    if let Some(inner) = s.strip_prefix('[') {
        let close = lexer::find_matching(inner, '[', ']')
            .ok_or_else(|| SimError::InvalidSource("unterminated range".into()))?;
        let body = &inner[..close];
        let colon = lexer::find_top_level(body, ":")
            .ok_or_else(|| SimError::InvalidSource(format!("malformed range '[{body}]'")))?;
        let msb: i64 = body[..colon]
            .trim()
            .parse()
            .map_err(|_| SimError::InvalidSource(format!("bad range msb in '[{body}]'")))?;
        let lsb: i64 = body[colon + 1..]
            .trim()
            .parse()
            .map_err(|_| SimError::InvalidSource(format!("bad range lsb in '[{body}]'")))?;
        Ok((Some((msb, lsb)), inner[close + 1..].trim_start()))
    } else {
        Ok((None, s))
    }
}

fn parse_body(body: &str, b: &mut Builder) -> Result<()> {
    let mut rest = body.trim_start();
    while !rest.is_empty() {
        let next = parse_item(rest, b)?;
        let trimmed = next.trim_start();
        if trimmed.len() == rest.len() {
            break;
        }
        rest = trimmed;
    }
    Ok(())
}

fn parse_item<'a>(s: &'a str, b: &mut Builder) -> Result<&'a str> {
    if let Some(rest) = strip_word(s, "input") {
        return redeclare_port(rest, SignalKind::Input, b);
    }
    if let Some(rest) = strip_word(s, "output") {
        return redeclare_port(rest, SignalKind::Output, b);
    }
    if let Some(rest) = strip_word(s, "wire") {
        return parse_wire_decl(rest, b);
    }
    if let Some(rest) = strip_word(s, "reg").or_else(|| strip_word(s, "logic")) {
        return parse_reg_or_memory_decl(rest, b);
    }
    if let Some(rest) = strip_word(s, "assign") {
        return parse_assign(rest, b);
    }
    if let Some(rest) = strip_word(s, "always_ff") {
        return parse_always_ff(rest, b);
    }
    if let Some(rest) = strip_word(s, "always_comb") {
        let (stmt, remainder) = parse_one(rest)?;
        b.comb_blocks.push(stmt);
        return Ok(remainder);
    }
    parse_instantiation(s, b)
}

fn redeclare_port<'a>(s: &'a str, kind: SignalKind, b: &mut Builder) -> Result<&'a str> {
    let s = strip_modifiers(s);
    let (range, rest) = take_range(s)?;
    let semi = lexer::find_top_level(rest, ";").unwrap_or(rest.len());
    let names_str = &rest[..semi];
    for raw_name in lexer::split_top_level(names_str, ',') {
        let name = raw_name.trim();
        if name.is_empty() {
            continue;
        }
        insert_signal(b, name, range, kind);
        if !b.header_order.contains(&name.to_string()) {
            b.header_order.push(name.to_string());
        }
    }
    Ok(rest.get(semi + 1..).unwrap_or(""))
}

/// `wire [range]? name (= expr)? (, name (= expr)?)* ;`
fn parse_wire_decl<'a>(s: &'a str, b: &mut Builder) -> Result<&'a str> {
    let s = strip_modifiers(s);
    let (range, rest) = take_range(s)?;
    let semi = lexer::find_top_level(rest, ";").unwrap_or(rest.len());
    let body = &rest[..semi];
    for entry in lexer::split_top_level(body, ',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        if let Some(eq) = lexer::find_top_level(entry, "=") {
            let name = entry[..eq].trim();
            insert_signal(b, name, range, SignalKind::Wire);
            let init = parse_expr(entry[eq + 1..].trim())?;
            b.assigns.push((name.to_string(), init));
        } else {
            insert_signal(b, entry, range, SignalKind::Wire);
        }
    }
    Ok(rest.get(semi + 1..).unwrap_or(""))
}

/// `reg [range]? name ([depth_range])? (, name ([depth_range])?)* ;`
/// A trailing unpacked range turns the declaration into a `MemoryDecl`
/// (spec.md §4.2, "Memory declarations with a packed range ... and an
/// unpacked range").
fn parse_reg_or_memory_decl<'a>(s: &'a str, b: &mut Builder) -> Result<&'a str> {
    let s = strip_modifiers(s);
    let (range, rest) = take_range(s)?;
    let semi = lexer::find_top_level(rest, ";").unwrap_or(rest.len());
    let body = &rest[..semi];
    for entry in lexer::split_top_level(body, ',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        if let Some(bracket) = entry.find('[') {
            let name = entry[..bracket].trim();
            let inner = &entry[bracket + 1..];
            let close = lexer::find_matching(inner, '[', ']')
                .ok_or_else(|| SimError::InvalidSource(format!("unterminated memory range on '{name}'")))?;
            let depth_body = &inner[..close];
            let colon = lexer::find_top_level(depth_body, ":")
                .ok_or_else(|| SimError::InvalidSource(format!("malformed memory depth '[{depth_body}]'")))?;
            let d_msb: i64 = depth_body[..colon].trim().parse().unwrap_or(0);
            let d_lsb: i64 = depth_body[colon + 1..].trim().parse().unwrap_or(0);
            let depth = (d_msb - d_lsb).unsigned_abs() as usize + 1;
            let word_width = range.map(|(m, l)| (m - l).unsigned_abs() as u32 + 1).unwrap_or(1);
            b.memories.insert(
                name.to_string(),
                MemoryDecl { name: name.to_string(), word_width, depth },
            );
            insert_signal(b, name, None, SignalKind::MemoryIndex);
        } else {
            insert_signal(b, entry, range, SignalKind::Reg);
        }
    }
    Ok(rest.get(semi + 1..).unwrap_or(""))
}

/// `assign TARGET = EXPR ;`
fn parse_assign<'a>(s: &'a str, b: &mut Builder) -> Result<&'a str> {
    let s = s.trim_start();
    let semi = lexer::find_top_level(s, ";")
        .ok_or_else(|| SimError::InvalidSource("assign statement missing ';'".into()))?;
    let stmt = &s[..semi];
    let eq = lexer::find_top_level(stmt, "=")
        .ok_or_else(|| SimError::InvalidSource(format!("assign missing '=' in '{stmt}'")))?;
    let target_str = stmt[..eq].trim();
    let expr = parse_expr(stmt[eq + 1..].trim())?;

    if let Some(inner) = target_str.strip_prefix('{') {
        let inner = inner.strip_suffix('}').unwrap_or(inner);
        let targets = lexer::split_top_level(inner, ',')
            .into_iter()
            .map(|t| t.trim().to_string())
            .collect();
        b.concat_assigns.push(ConcatAssign { targets, expr });
    } else if let Some(bracket) = target_str.find('[') {
        let name = target_str[..bracket].trim().to_string();
        let inner = &target_str[bracket + 1..];
        let close = lexer::find_matching(inner, '[', ']')
            .ok_or_else(|| SimError::InvalidSource(format!("unterminated index on '{name}'")))?;
        let body = &inner[..close];
        let (msb, lsb) = match lexer::find_top_level(body, ":") {
            Some(colon) => (
                body[..colon].trim().parse().unwrap_or(0),
                body[colon + 1..].trim().parse().unwrap_or(0),
            ),
            None => {
                let idx: u32 = body.trim().parse().unwrap_or(0);
                (idx, idx)
            }
        };
        b.slice_assigns.push(SliceAssign { target: name, msb, lsb, expr });
    } else {
        b.assigns.push((target_str.to_string(), expr));
    }

    Ok(&s[semi + 1..])
}

/// `always_ff @( SENS ) STMT`
fn parse_always_ff<'a>(s: &'a str, b: &mut Builder) -> Result<&'a str> {
    let s = s.trim_start();
    let s = s
        .strip_prefix('@')
        .ok_or_else(|| SimError::InvalidSource("always_ff missing sensitivity list".into()))?
        .trim_start();
    let s = s
        .strip_prefix('(')
        .ok_or_else(|| SimError::InvalidSource("always_ff sensitivity list missing '('".into()))?;
    let close = lexer::find_matching(s, '(', ')')
        .ok_or_else(|| SimError::InvalidSource("always_ff sensitivity list missing ')'".into()))?;
    let sens_str = &s[..close];
    let after_sens = s[close + 1..].trim_start();

    let triggers = parse_sensitivity_list(sens_str);
    for (clock, _) in &triggers {
        b.clocks.insert(clock.clone());
    }

    let (stmt, remainder) = parse_one(after_sens)?;
    b.sequential_blocks.push(SequentialBlock { triggers, body: stmt });
    Ok(remainder)
}

/// Splits a sensitivity list on `or`/`,` and classifies each trigger. A
/// bare signal name defaults to `posedge` (spec.md §4.2). Mixed lists with
/// more than one trigger are a SPEC_FULL.md supplement grounded in the
/// original's sensitivity-list handling.
fn parse_sensitivity_list(s: &str) -> Vec<(String, EdgePolarity)> {
    let normalized = s.replace(" or ", ",");
    lexer::split_top_level(&normalized, ',')
        .into_iter()
        .filter_map(|part| {
            let part = part.trim();
            if part.is_empty() {
                return None;
            }
            if let Some(rest) = strip_word(part, "posedge") {
                Some((rest.trim().to_string(), EdgePolarity::Posedge))
            } else if let Some(rest) = strip_word(part, "negedge") {
                Some((rest.trim().to_string(), EdgePolarity::Negedge))
            } else {
                Some((part.to_string(), EdgePolarity::Posedge))
            }
        })
        .collect()
}

/// `ChildModule instanceName ( .port(expr), … ) ;`
fn parse_instantiation<'a>(s: &'a str, b: &mut Builder) -> Result<&'a str> {
    let s = s.trim_start();
    if s.is_empty() {
        return Ok(s);
    }
    let paren = s
        .find('(')
        .ok_or_else(|| SimError::InvalidSource(format!("expected instantiation near '{s}'")))?;
    let header = s[..paren].trim();
    let mut words = header.split_whitespace();
    let child_module = words
        .next()
        .ok_or_else(|| SimError::InvalidSource("instantiation missing a child module name".into()))?
        .to_string();
    let instance_name = words
        .next()
        .ok_or_else(|| SimError::InvalidSource("instantiation missing an instance name".into()))?
        .to_string();

    let inner = &s[paren + 1..];
    let close = lexer::find_matching(inner, '(', ')')
        .ok_or_else(|| SimError::InvalidSource("instantiation missing ')'".into()))?;
    let conn_str = &inner[..close];
    let after = inner[close + 1..].trim_start();
    let semi = lexer::find_top_level(after, ";").unwrap_or(after.len());

    let mut connections = Vec::new();
    for raw in lexer::split_top_level(conn_str, ',') {
        let entry = raw.trim();
        if entry.is_empty() {
            continue;
        }
        let entry = entry
            .strip_prefix('.')
            .ok_or_else(|| SimError::InvalidSource(format!("malformed port connection '{entry}'")))?;
        let open = entry
            .find('(')
            .ok_or_else(|| SimError::InvalidSource(format!("malformed port connection '.{entry}'")))?;
        let port_name = entry[..open].trim().to_string();
        let expr_inner = &entry[open + 1..];
        let expr_close = lexer::find_matching(expr_inner, '(', ')')
            .ok_or_else(|| SimError::InvalidSource(format!("unterminated port connection '.{entry}'")))?;
        let reference = parse_port_ref(expr_inner[..expr_close].trim())?;
        connections.push((port_name, reference));
    }

    b.instances.push(Instantiation { child_module, instance_name, connections });
    Ok(after.get(semi + 1..).unwrap_or(""))
}

fn parse_port_ref(s: &str) -> Result<PortRef> {
    match parse_expr(s)? {
        Expr::Signal(name) => Ok(PortRef::Bare(name)),
        Expr::Bit(name, idx) => Ok(PortRef::BitSelect(name, idx)),
        Expr::Slice { signal, msb, lsb } => Ok(PortRef::Slice(signal, msb, lsb)),
        Expr::Literal { value, width } => Ok(PortRef::Literal { value, width }),
        other => Err(SimError::UnresolvedSignal(format!("unsupported port connection {other:?}"))),
    }
}

fn strip_word<'a>(s: &'a str, word: &str) -> Option<&'a str> {
    let s = s.trim_start();
    let rest = s.strip_prefix(word)?;
    let boundary_ok = rest.chars().next().map(|c| !c.is_alphanumeric() && c != '_').unwrap_or(true);
    boundary_ok.then_some(rest)
}

fn find_keyword(s: &str, word: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let wlen = word.len();
    let mut i = 0usize;
    while i + wlen <= bytes.len() {
        if &s[i..i + wlen] == word {
            let before_ok = i == 0 || !(bytes[i - 1] as char).is_alphanumeric() && bytes[i - 1] != b'_';
            let after_ok = i + wlen == bytes.len()
                || (!(bytes[i + wlen] as char).is_alphanumeric() && bytes[i + wlen] != b'_');
            if before_ok && after_ok {
                return Some(i + wlen);
            }
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nand_gate() {
        let src = "module nand_gate(inA, inB, outY);
            input inA;
            input inB;
            output outY;
            assign outY = ~(inA & inB);
        endmodule";
        let ir = parse_module(src).unwrap();
        assert_eq!(ir.name, "nand_gate");
        assert_eq!(ir.inputs, vec!["inA", "inB"]);
        assert_eq!(ir.outputs, vec!["outY"]);
        assert_eq!(ir.assigns.len(), 1);
    }

    #[test]
    fn parses_register_with_sync_reset() {
        let src = "module counter(clk, rst, cnt);
            input clk;
            input rst;
            output [7:0] cnt;
            always_ff @(posedge clk)
                if (rst) cnt <= 0;
                else cnt <= cnt + 1;
        endmodule";
        let ir = parse_module(src).unwrap();
        assert_eq!(ir.sequential_blocks.len(), 1);
        assert!(ir.clocks.contains("clk"));
    }

    #[test]
    fn parses_instantiation_with_dotted_connections() {
        let src = "module xor2(a, b, y);
            input a;
            input b;
            output y;
            nand_gate u1 (.inA(a), .inB(b), .outY(y));
        endmodule";
        let ir = parse_module(src).unwrap();
        assert_eq!(ir.instances.len(), 1);
        assert_eq!(ir.instances[0].child_module, "nand_gate");
    }

    #[test]
    fn parses_memory_declaration() {
        let src = "module rom_boot(addr, data);
            input [3:0] addr;
            output [7:0] data;
            reg [7:0] mem [0:15];
            assign data = mem[addr];
        endmodule";
        let ir = parse_module(src).unwrap();
        let decl = ir.memories.get("mem").unwrap();
        assert_eq!(decl.word_width, 8);
        assert_eq!(decl.depth, 16);
    }

    #[test]
    fn missing_module_keyword_is_invalid_source() {
        assert!(parse_module("assign y = a;").is_err());
    }
}
