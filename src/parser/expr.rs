//! Expression parsing: lifts an HDL expression string into the `Expr` tree
//! once at parse time (spec.md §9, "Replacing textual re-evaluation").
//!
//! A small hand-rolled tokenizer + precedence-climbing parser, in the
//! spirit of the teacher's single compile-then-interpret pass
//! (`compile_expr_to_flat` in `ir_interpreter::core`) but built over HDL
//! source text instead of a JSON `ExprDef` tree.

use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::error::{Result, SimError};

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    /// A literal: `width'base digits` pre-split into width/radix/digits at
    /// lex time, or a plain decimal number with no size prefix.
    Number(u64, Option<u32>),
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Question,
    Op(String),
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    src: &'a str,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self { chars: src.char_indices().peekable(), src }
    }

    fn tokenize(mut self) -> Result<Vec<Tok>> {
        let mut out = Vec::new();
        while let Some(&(i, c)) = self.chars.peek() {
            if c.is_whitespace() {
                self.chars.next();
                continue;
            }
            match c {
                '(' => { self.chars.next(); out.push(Tok::LParen); }
                ')' => { self.chars.next(); out.push(Tok::RParen); }
                '[' => { self.chars.next(); out.push(Tok::LBracket); }
                ']' => { self.chars.next(); out.push(Tok::RBracket); }
                '{' => { self.chars.next(); out.push(Tok::LBrace); }
                '}' => { self.chars.next(); out.push(Tok::RBrace); }
                ',' => { self.chars.next(); out.push(Tok::Comma); }
                ':' => { self.chars.next(); out.push(Tok::Colon); }
                '?' => { self.chars.next(); out.push(Tok::Question); }
                '0'..='9' => out.push(self.lex_number()?),
                c if c.is_alphabetic() || c == '_' || c == '$' => out.push(self.lex_ident()),
                _ => out.push(self.lex_op(i)),
            }
        }
        Ok(out)
    }

    fn lex_ident(&mut self) -> Tok {
        let start = self.chars.peek().unwrap().0;
        let mut end = start;
        while let Some(&(i, c)) = self.chars.peek() {
            if c.is_alphanumeric() || c == '_' || c == '$' {
                end = i + c.len_utf8();
                self.chars.next();
            } else {
                break;
            }
        }
        Tok::Ident(self.src[start..end].to_string())
    }

    /// Lexes either a sized literal (`8'hFF`, `4'b1010`, `3'd5`) or a bare
    /// decimal number (spec.md §4.4 rule 6; bare decimals are a
    /// SPEC_FULL.md supplement whose width is resolved later by the
    /// evaluator against the assignment target).
    fn lex_number(&mut self) -> Result<Tok> {
        let start = self.chars.peek().unwrap().0;
        let mut end = start;
        while let Some(&(i, c)) = self.chars.peek() {
            if c.is_ascii_digit() {
                end = i + c.len_utf8();
                self.chars.next();
            } else {
                break;
            }
        }
        let digits_before_quote = &self.src[start..end];

        if let Some(&(_, '\'')) = self.chars.peek() {
            self.chars.next(); // consume '
            let width: u32 = digits_before_quote.parse().map_err(|_| {
                SimError::BadExpression(format!("malformed sized literal width at {start}"))
            })?;
            let base_char = match self.chars.next() {
                Some((_, c)) => c.to_ascii_lowercase(),
                None => return Err(SimError::BadExpression("truncated sized literal".into())),
            };
            let radix = match base_char {
                'b' => 2,
                'o' => 8,
                'd' => 10,
                'h' => 16,
                other => {
                    return Err(SimError::BadExpression(format!(
                        "unknown literal base '{other}'"
                    )))
                }
            };
            let digit_start = self.chars.peek().map(|&(i, _)| i).unwrap_or(self.src.len());
            let mut digit_end = digit_start;
            while let Some(&(i, c)) = self.chars.peek() {
                if c == '_' || c.is_ascii_hexdigit() || c == 'x' || c == 'X' || c == 'z' || c == 'Z' {
                    digit_end = i + c.len_utf8();
                    self.chars.next();
                } else {
                    break;
                }
            }
            let raw_digits = &self.src[digit_start..digit_end];
            let cleaned: String = raw_digits
                .chars()
                .filter(|&c| c != '_')
                .map(|c| if c == 'x' || c == 'X' || c == 'z' || c == 'Z' { '0' } else { c })
                .collect();
            let value = if cleaned.is_empty() {
                0
            } else {
                u64::from_str_radix(&cleaned, radix).map_err(|_| {
                    SimError::BadExpression(format!("malformed literal digits '{raw_digits}'"))
                })?
            };
            Ok(Tok::Number(value, Some(width)))
        } else {
            let value: u64 = digits_before_quote
                .parse()
                .map_err(|_| SimError::BadExpression(format!("malformed number '{digits_before_quote}'")))?;
            Ok(Tok::Number(value, None))
        }
    }

    fn lex_op(&mut self, _start: usize) -> Tok {
        // Greedily match the longest known multi-char operator first.
        let rest: String = {
            let mut s = String::new();
            let mut clone = self.chars.clone();
            for _ in 0..3 {
                if let Some((_, c)) = clone.next() {
                    s.push(c);
                } else {
                    break;
                }
            }
            s
        };
        for candidate in ["<<<", ">>>", "===", "!==", "&&", "||", "==", "!=", "<=", ">=", "<<", ">>", "~&", "~|", "~^", "^~"] {
            if rest.starts_with(candidate) {
                for _ in 0..candidate.chars().count() {
                    self.chars.next();
                }
                return Tok::Op(candidate.to_string());
            }
        }
        let (_, c) = self.chars.next().unwrap();
        Tok::Op(c.to_string())
    }
}

struct Parser {
    toks: Vec<Tok>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn next(&mut self) -> Option<Tok> {
        let t = self.toks.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn expect_op(&mut self, op: &str) -> Result<()> {
        match self.next() {
            Some(Tok::Op(ref s)) if s == op => Ok(()),
            other => Err(SimError::BadExpression(format!("expected '{op}', found {other:?}"))),
        }
    }

    fn expect(&mut self, tok: Tok) -> Result<()> {
        match self.next() {
            Some(t) if t == tok => Ok(()),
            other => Err(SimError::BadExpression(format!("expected {tok:?}, found {other:?}"))),
        }
    }

    // Ternary (right-associative, lowest precedence) — spec.md §4.4 rule 8.
    fn parse_ternary(&mut self) -> Result<Expr> {
        let cond = self.parse_logical_or()?;
        if matches!(self.peek(), Some(Tok::Question)) {
            self.next();
            let then_ = self.parse_ternary()?;
            self.expect(Tok::Colon)?;
            let else_ = self.parse_ternary()?;
            Ok(Expr::Ternary { cond: Box::new(cond), then_: Box::new(then_), else_: Box::new(else_) })
        } else {
            Ok(cond)
        }
    }

    fn parse_logical_or(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_logical_and()?;
        while matches!(self.peek(), Some(Tok::Op(op)) if op == "||") {
            self.next();
            let rhs = self.parse_logical_and()?;
            lhs = Expr::Binary { op: BinaryOp::LogicalOr, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_logical_and(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_bitor()?;
        while matches!(self.peek(), Some(Tok::Op(op)) if op == "&&") {
            self.next();
            let rhs = self.parse_bitor()?;
            lhs = Expr::Binary { op: BinaryOp::LogicalAnd, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_bitor(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_bitxor()?;
        while matches!(self.peek(), Some(Tok::Op(op)) if op == "|") {
            self.next();
            let rhs = self.parse_bitxor()?;
            lhs = Expr::Binary { op: BinaryOp::Or, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_bitxor(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_bitand()?;
        loop {
            match self.peek() {
                Some(Tok::Op(op)) if op == "^" => {
                    self.next();
                    let rhs = self.parse_bitand()?;
                    lhs = Expr::Binary { op: BinaryOp::Xor, lhs: Box::new(lhs), rhs: Box::new(rhs) };
                }
                Some(Tok::Op(op)) if op == "~^" || op == "^~" => {
                    self.next();
                    let rhs = self.parse_bitand()?;
                    lhs = Expr::Binary { op: BinaryOp::Xnor, lhs: Box::new(lhs), rhs: Box::new(rhs) };
                }
                _ => break,
            }
        }
        Ok(lhs)
    }

    fn parse_bitand(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_equality()?;
        while matches!(self.peek(), Some(Tok::Op(op)) if op == "&") {
            self.next();
            let rhs = self.parse_equality()?;
            lhs = Expr::Binary { op: BinaryOp::And, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_relational()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Op(op)) if op == "==" || op == "===" => BinaryOp::Eq,
                Some(Tok::Op(op)) if op == "!=" || op == "!==" => BinaryOp::Ne,
                _ => break,
            };
            self.next();
            let rhs = self.parse_relational()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_relational(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_shift()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Op(op)) if op == "<=" => BinaryOp::Le,
                Some(Tok::Op(op)) if op == ">=" => BinaryOp::Ge,
                Some(Tok::Op(op)) if op == "<" => BinaryOp::Lt,
                Some(Tok::Op(op)) if op == ">" => BinaryOp::Gt,
                _ => break,
            };
            self.next();
            let rhs = self.parse_shift()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_shift(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Op(op)) if op == "<<" || op == "<<<" => BinaryOp::Shl,
                Some(Tok::Op(op)) if op == ">>" || op == ">>>" => BinaryOp::Shr,
                _ => break,
            };
            self.next();
            let rhs = self.parse_additive()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_mul()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Op(op)) if op == "+" => BinaryOp::Add,
                Some(Tok::Op(op)) if op == "-" => BinaryOp::Sub,
                _ => break,
            };
            self.next();
            let rhs = self.parse_mul()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_mul(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Op(op)) if op == "*" => BinaryOp::Mul,
                Some(Tok::Op(op)) if op == "/" => BinaryOp::Div,
                Some(Tok::Op(op)) if op == "%" => BinaryOp::Mod,
                _ => break,
            };
            self.next();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        match self.peek() {
            Some(Tok::Op(op)) if op == "~" => {
                self.next();
                let inner = self.parse_unary()?;
                Ok(Expr::Unary { op: UnaryOp::Not, expr: Box::new(inner) })
            }
            Some(Tok::Op(op)) if op == "!" => {
                self.next();
                let inner = self.parse_unary()?;
                Ok(Expr::Unary { op: UnaryOp::LogicalNot, expr: Box::new(inner) })
            }
            Some(Tok::Op(op)) if op == "-" => {
                self.next();
                let inner = self.parse_unary()?;
                Ok(Expr::Unary { op: UnaryOp::Neg, expr: Box::new(inner) })
            }
            Some(Tok::Op(op)) if op == "+" => {
                self.next();
                self.parse_unary()
            }
            _ => self.parse_postfix(),
        }
    }

    /// Primary expression followed by any trailing `[...]` bit/slice
    /// selects or memory reads.
    fn parse_postfix(&mut self) -> Result<Expr> {
        let primary = self.parse_primary()?;
        if matches!(self.peek(), Some(Tok::LBracket)) {
            if let Expr::Signal(name) = primary {
                return self.parse_index(name);
            }
        }
        Ok(primary)
    }

    fn parse_index(&mut self, name: String) -> Result<Expr> {
        self.expect(Tok::LBracket)?;
        let first = self.parse_ternary()?;
        if matches!(self.peek(), Some(Tok::Colon)) {
            self.next();
            let second = self.parse_ternary()?;
            self.expect(Tok::RBracket)?;
            let msb = const_index(&first)?;
            let lsb = const_index(&second)?;
            return Ok(Expr::Slice { signal: name, msb, lsb });
        }
        self.expect(Tok::RBracket)?;
        if let Ok(idx) = const_index(&first) {
            Ok(Expr::Bit(name, idx))
        } else {
            Ok(Expr::BitSelect { signal: name, index: Box::new(first) })
        }
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.next() {
            Some(Tok::Number(value, Some(width))) => Ok(Expr::Literal { value, width }),
            Some(Tok::Number(value, None)) => {
                // A bare (unsized) number directly followed by `{` is a
                // replication count, not a literal: `4{a}`, or nested as
                // `{4{1'b1}}` — the outer brace's first part is parsed the
                // same way through `parse_ternary`/`parse_primary`.
                if matches!(self.peek(), Some(Tok::LBrace)) {
                    self.next();
                    let count = value as u32;
                    let inner = self.parse_ternary()?;
                    self.expect(Tok::RBrace)?;
                    return Ok(Expr::Replicate { count, expr: Box::new(inner) });
                }
                let width = 64u32.min(64 - value.leading_zeros()).max(1);
                Ok(Expr::Literal { value, width })
            }
            Some(Tok::LParen) => {
                let inner = self.parse_ternary()?;
                self.expect(Tok::RParen)?;
                Ok(inner)
            }
            Some(Tok::LBrace) => self.parse_brace(),
            Some(Tok::Ident(name)) => {
                if matches!(self.peek(), Some(Tok::LBrace)) {
                    // Replication: `N{expr}`.
                    self.next();
                    let count: u32 = name.parse().map_err(|_| {
                        SimError::BadExpression(format!("replication count must be an integer, found '{name}'"))
                    })?;
                    let inner = self.parse_ternary()?;
                    self.expect(Tok::RBrace)?;
                    return Ok(Expr::Replicate { count, expr: Box::new(inner) });
                }
                Ok(Expr::Signal(name))
            }
            other => Err(SimError::BadExpression(format!("unexpected token {other:?}"))),
        }
    }

    /// Parses the contents after an already-consumed `{`: either a plain
    /// concatenation `{e1, e2, ...}` or a replication `N{e}` when the
    /// first comma-separated part is itself followed immediately by
    /// another brace group (handled in `parse_primary` for the common
    /// `ident{...}` spelling; this covers `{N{e}, ...}` nesting).
    fn parse_brace(&mut self) -> Result<Expr> {
        let mut parts = Vec::new();
        loop {
            parts.push(self.parse_ternary()?);
            match self.peek() {
                Some(Tok::Comma) => {
                    self.next();
                }
                Some(Tok::RBrace) => {
                    self.next();
                    break;
                }
                other => return Err(SimError::BadExpression(format!("expected ',' or '}}', found {other:?}"))),
            }
        }
        Ok(Expr::Concat(parts))
    }
}

fn const_index(e: &Expr) -> Result<u32> {
    match e {
        Expr::Literal { value, .. } => Ok(*value as u32),
        _ => Err(SimError::BadExpression("expected a constant index".into())),
    }
}

/// Parse a full expression string into an `Expr` tree.
pub fn parse_expr(src: &str) -> Result<Expr> {
    let toks = Lexer::new(src).tokenize()?;
    if toks.is_empty() {
        return Err(SimError::BadExpression("empty expression".into()));
    }
    let mut parser = Parser { toks, pos: 0 };
    let expr = parser.parse_ternary()?;
    if parser.pos != parser.toks.len() {
        return Err(SimError::BadExpression(format!(
            "trailing tokens after expression '{src}'"
        )));
    }
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nand() {
        let e = parse_expr("~(inA & inB)").unwrap();
        assert!(matches!(e, Expr::Unary { op: UnaryOp::Not, .. }));
    }

    #[test]
    fn parses_sized_literal() {
        let e = parse_expr("4'b1010").unwrap();
        assert_eq!(e, Expr::Literal { value: 0b1010, width: 4 });
    }

    #[test]
    fn parses_hex_literal_with_underscore() {
        let e = parse_expr("8'hA_A").unwrap();
        assert_eq!(e, Expr::Literal { value: 0xAA, width: 8 });
    }

    #[test]
    fn parses_slice_and_bit_select() {
        let e = parse_expr("bus[3:0]").unwrap();
        assert_eq!(e, Expr::Slice { signal: "bus".into(), msb: 3, lsb: 0 });

        let e2 = parse_expr("bus[2]").unwrap();
        assert_eq!(e2, Expr::Bit("bus".into(), 2));
    }

    #[test]
    fn parses_ternary_right_associative() {
        let e = parse_expr("a ? b : c ? d : e").unwrap();
        match e {
            Expr::Ternary { else_, .. } => assert!(matches!(*else_, Expr::Ternary { .. })),
            _ => panic!("expected ternary"),
        }
    }

    #[test]
    fn parses_concat_and_replication() {
        let e = parse_expr("{a, b, c}").unwrap();
        assert!(matches!(e, Expr::Concat(parts) if parts.len() == 3));

        let e2 = parse_expr("4{a}").unwrap();
        assert_eq!(e2, Expr::Replicate { count: 4, expr: Box::new(Expr::Signal("a".into())) });
    }

    #[test]
    fn parses_memory_read_as_bit_select_then_reclassified() {
        // Bare memory reads look syntactically identical to a bit select;
        // the combinational evaluator reclassifies them using the
        // module's memory map (spec.md §4.4 rule 3).
        let e = parse_expr("rom[addr]").unwrap();
        assert!(matches!(e, Expr::BitSelect { .. }));
    }

    #[test]
    fn unterminated_paren_is_bad_expression() {
        assert!(parse_expr("(a & b").is_err());
    }
}
