//! C3 — Statement parser: turns the body text of an `always_ff`/
//! `always_comb` block into the `Stmt` tree (spec.md §4.3).
//!
//! Unlike the expression grammar, statement bodies are parsed by
//! repeatedly peeling one statement off the front of the remaining text
//! (`parse_one`) rather than by tokenizing the whole body up front — the
//! boundary between an `if`'s single sub-statement and whatever follows it
//! depends on whether that sub-statement is a `begin...end` block or a
//! single `;`-terminated assignment, which a flat token stream would lose.

use crate::ast::{CaseArm, Stmt, Target};
use crate::error::{Result, SimError};
use crate::parser::expr::parse_expr;

/// Parse a full procedural block body (the text between a sensitivity
/// list's `)` and the construct's end) into a `Stmt`.
pub fn parse_body(body: &str) -> Result<Stmt> {
    let stmts = parse_block_body(body)?;
    Ok(Stmt::Block(stmts))
}

fn parse_block_body(s: &str) -> Result<Vec<Stmt>> {
    let mut stmts = Vec::new();
    let mut rest = s.trim_start();
    while !rest.is_empty() {
        let (stmt, remainder) = parse_one(rest)?;
        stmts.push(stmt);
        let trimmed = remainder.trim_start();
        if trimmed.len() == rest.len() {
            // No progress: avoid looping forever on unparseable trailing text.
            break;
        }
        rest = trimmed;
    }
    Ok(stmts)
}

/// Consume exactly one statement from the front of `s`, returning it and
/// whatever text remains. Exposed to the module parser, which uses it to
/// pull the single controlled statement off an `always_ff`/`always_comb`
/// construct (itself just "one statement" grammatically).
pub(crate) fn parse_one(s: &str) -> Result<(Stmt, &str)> {
    let s = s.trim_start();
    if s.is_empty() {
        return Ok((Stmt::Empty, ""));
    }

    if let Some(rest) = strip_keyword(s, "begin") {
        let (end_idx, after_idx) = scan_keyword_block(rest, &["begin", "case"], &["end", "endcase"])?;
        let body = &rest[..end_idx];
        let stmts = parse_block_body(body)?;
        return Ok((Stmt::Block(stmts), rest[after_idx..].trim_start()));
    }

    if let Some(rest) = strip_keyword(s, "if") {
        let rest = rest.trim_start();
        let rest = rest
            .strip_prefix('(')
            .ok_or_else(|| SimError::MalformedStatement("expected '(' after if".into()))?;
        let close = crate::lexer::find_matching(rest, '(', ')')
            .ok_or_else(|| SimError::MalformedStatement("unterminated if condition".into()))?;
        let cond_str = &rest[..close];
        let after_cond = rest[close + 1..].trim_start();
        let cond = parse_expr(cond_str)?;

        let (then_stmt, after_then) = parse_one(after_cond)?;
        let after_then_trim = after_then.trim_start();
        if let Some(after_else) = strip_keyword(after_then_trim, "else") {
            let (else_stmt, remainder) = parse_one(after_else)?;
            return Ok((
                Stmt::If { cond, then_: Box::new(then_stmt), else_: Some(Box::new(else_stmt)) },
                remainder,
            ));
        }
        return Ok((Stmt::If { cond, then_: Box::new(then_stmt), else_: None }, after_then_trim));
    }

    if let Some(rest) = strip_keyword(s, "case") {
        let rest = rest.trim_start();
        let rest = rest
            .strip_prefix('(')
            .ok_or_else(|| SimError::MalformedStatement("expected '(' after case".into()))?;
        let close = crate::lexer::find_matching(rest, '(', ')')
            .ok_or_else(|| SimError::MalformedStatement("unterminated case expression".into()))?;
        let expr_str = &rest[..close];
        let after_expr = rest[close + 1..].trim_start();
        let expr = parse_expr(expr_str)?;

        let (end_idx, after_idx) =
            scan_keyword_block(after_expr, &["case", "begin"], &["endcase", "end"])?;
        let body = &after_expr[..end_idx];
        let (arms, default_) = parse_case_arms(body)?;
        return Ok((Stmt::Case { expr, arms, default_ }, after_expr[after_idx..].trim_start()));
    }

    // Fall through: either an assignment or unrecognized text, both
    // terminated by the next top-level semicolon.
    let semi = crate::lexer::find_top_level(s, ";");
    let (stmt_text, remainder) = match semi {
        Some(idx) => (&s[..idx], &s[idx + 1..]),
        None => (s, ""),
    };
    let stmt = parse_assignment_or_raw(stmt_text.trim())?;
    Ok((stmt, remainder))
}

fn parse_case_arms(body: &str) -> Result<(Vec<CaseArm>, Option<Box<Stmt>>)> {
    let mut arms = Vec::new();
    let mut default_ = None;
    let mut rest = body.trim_start();
    while !rest.is_empty() {
        let colon = crate::lexer::find_top_level(rest, ":")
            .ok_or_else(|| SimError::MalformedStatement("case arm missing ':'".into()))?;
        let label_text = rest[..colon].trim();
        let after_colon = rest[colon + 1..].trim_start();
        let (arm_body, remainder) = parse_one(after_colon)?;

        if label_text == "default" {
            default_ = Some(Box::new(arm_body));
        } else {
            let labels = crate::lexer::split_top_level(label_text, ',')
                .into_iter()
                .map(|l| parse_expr(l.trim()))
                .collect::<Result<Vec<_>>>()?;
            arms.push(CaseArm { labels, body: Box::new(arm_body) });
        }

        let trimmed = remainder.trim_start();
        if trimmed.len() == rest.len() {
            break;
        }
        rest = trimmed;
    }
    Ok((arms, default_))
}

fn parse_assignment_or_raw(s: &str) -> Result<Stmt> {
    if s.is_empty() {
        return Ok(Stmt::Empty);
    }
    if let Some(idx) = find_top_level_assign_op(s, "<=") {
        let target = parse_target(s[..idx].trim())?;
        let rhs = parse_expr(s[idx + 2..].trim())?;
        return Ok(Stmt::NonblockingAssign { target, rhs });
    }
    if let Some(idx) = find_top_level_assign_op(s, "=") {
        let target = parse_target(s[..idx].trim())?;
        let rhs = parse_expr(s[idx + 1..].trim())?;
        return Ok(Stmt::BlockingAssign { target, rhs });
    }
    Ok(Stmt::Raw(s.to_string()))
}

/// Find the first top-level `op` (`=` or `<=`) that is a genuine
/// assignment operator rather than part of `==`, `!=`, `>=`, or a second
/// `<=` nested in the RHS expression.
fn find_top_level_assign_op(s: &str, op: &str) -> Option<usize> {
    let mut depth = 0i32;
    let bytes = s.as_bytes();
    let mut i = 0usize;
    while i < bytes.len() {
        match bytes[i] as char {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            _ => {}
        }
        if depth == 0 && s[i..].starts_with(op) {
            let prev = if i == 0 { None } else { Some(bytes[i - 1] as char) };
            let next = s[i + op.len()..].chars().next();
            let is_boundary_ok = !matches!(prev, Some('=') | Some('!') | Some('<') | Some('>'));
            let is_not_eqeq = next != Some('=');
            if is_boundary_ok && is_not_eqeq {
                return Some(i);
            }
        }
        i += 1;
    }
    None
}

fn parse_target(s: &str) -> Result<Target> {
    if let Some(bracket) = s.find('[') {
        let name = s[..bracket].trim().to_string();
        let inner = &s[bracket + 1..];
        let close = crate::lexer::find_matching(inner, '[', ']')
            .ok_or_else(|| SimError::MalformedStatement(format!("unterminated index on '{name}'")))?;
        let body = &inner[..close];
        if let Some(colon) = crate::lexer::find_top_level(body, ":") {
            let msb: u32 = body[..colon]
                .trim()
                .parse()
                .map_err(|_| SimError::MalformedStatement(format!("bad slice msb in '{s}'")))?;
            let lsb: u32 = body[colon + 1..]
                .trim()
                .parse()
                .map_err(|_| SimError::MalformedStatement(format!("bad slice lsb in '{s}'")))?;
            return Ok(Target::Slice(name, msb, lsb));
        }
        let index = parse_expr(body.trim())?;
        return Ok(Target::Bit(name, Box::new(index)));
    }
    Ok(Target::Whole(s.to_string()))
}

fn strip_keyword<'a>(s: &'a str, kw: &str) -> Option<&'a str> {
    let s = s.trim_start();
    if let Some(rest) = s.strip_prefix(kw) {
        let boundary_ok = rest.chars().next().map(|c| !c.is_alphanumeric() && c != '_').unwrap_or(true);
        if boundary_ok {
            return Some(rest);
        }
    }
    None
}

/// Scan `s` for the close keyword matching an already-consumed open
/// keyword, honoring nested open/close pairs from the given keyword sets.
/// Returns `(body_end, after_close)` byte offsets into `s`.
fn scan_keyword_block(s: &str, opens: &[&str], closes: &[&str]) -> Result<(usize, usize)> {
    let mut depth = 1i32;
    let bytes = s.as_bytes();
    let mut i = 0usize;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_alphabetic() || c == '_' {
            let start = i;
            let mut end = i;
            while end < bytes.len() {
                let cc = bytes[end] as char;
                if cc.is_alphanumeric() || cc == '_' {
                    end += 1;
                } else {
                    break;
                }
            }
            let word = &s[start..end];
            if opens.contains(&word) {
                depth += 1;
            } else if closes.contains(&word) {
                depth -= 1;
                if depth == 0 {
                    return Ok((start, end));
                }
            }
            i = end;
        } else {
            i += 1;
        }
    }
    Err(SimError::MalformedStatement("unterminated block (missing 'end'/'endcase')".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinaryOp, Expr};

    #[test]
    fn parses_simple_nonblocking_assignment() {
        let stmt = parse_body("q <= d ;").unwrap();
        match stmt {
            Stmt::Block(stmts) => {
                assert_eq!(stmts.len(), 1);
                assert!(matches!(stmts[0], Stmt::NonblockingAssign { .. }));
            }
            _ => panic!("expected block"),
        }
    }

    #[test]
    fn parses_if_else_without_begin_end() {
        let stmt = parse_body("if ( rst ) q <= 1'b0 ; else q <= d ;").unwrap();
        let Stmt::Block(stmts) = stmt else { panic!("expected block") };
        assert_eq!(stmts.len(), 1);
        match &stmts[0] {
            Stmt::If { else_, .. } => assert!(else_.is_some()),
            other => panic!("expected if, got {other:?}"),
        }
    }

    #[test]
    fn parses_begin_end_with_multiple_statements() {
        let stmt = parse_body("begin q <= d ; r <= e ; end").unwrap();
        let Stmt::Block(stmts) = stmt else { panic!("expected block") };
        assert_eq!(stmts.len(), 1);
        match &stmts[0] {
            Stmt::Block(inner) => assert_eq!(inner.len(), 2),
            other => panic!("expected nested block, got {other:?}"),
        }
    }

    #[test]
    fn parses_case_with_default() {
        let stmt = parse_body("case ( sel ) 2'b00 : y <= a ; 2'b01 : y <= b ; default : y <= 0 ; endcase").unwrap();
        let Stmt::Block(stmts) = stmt else { panic!("expected block") };
        match &stmts[0] {
            Stmt::Case { arms, default_, .. } => {
                assert_eq!(arms.len(), 2);
                assert!(default_.is_some());
            }
            other => panic!("expected case, got {other:?}"),
        }
    }

    #[test]
    fn parses_bit_select_target() {
        let stmt = parse_body("data[3] <= 1'b1 ;").unwrap();
        let Stmt::Block(stmts) = stmt else { panic!("expected block") };
        match &stmts[0] {
            Stmt::NonblockingAssign { target: Target::Bit(name, _), .. } => assert_eq!(name, "data"),
            other => panic!("expected bit target, got {other:?}"),
        }
    }

    #[test]
    fn distinguishes_nonblocking_from_relational_in_rhs() {
        let stmt = parse_body("flag <= a <= b ;").unwrap();
        let Stmt::Block(stmts) = stmt else { panic!("expected block") };
        match &stmts[0] {
            Stmt::NonblockingAssign { rhs, .. } => {
                assert!(matches!(rhs, Expr::Binary { op: BinaryOp::Le, .. }));
            }
            other => panic!("expected nonblocking assign, got {other:?}"),
        }
    }
}
