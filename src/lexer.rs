//! C1 — Lexer/Cleaner: strip comments, normalize whitespace, and provide
//! brace/bracket-aware scanning helpers used by the module and statement
//! parsers (spec.md §4.1, §4.2's "brace/bracket-aware scanner").
//!
//! No tokens are emitted; later stages operate on the cleaned text plus
//! these local scanners, exactly as spec.md describes.

use crate::error::{Result, SimError};

/// Remove `//` line comments and non-nesting `/* */` block comments, then
/// collapse runs of whitespace to a single space.
pub fn clean(source: &str) -> Result<String> {
    let no_line_comments = strip_line_comments(source);
    let no_block_comments = strip_block_comments(&no_line_comments)?;
    Ok(collapse_whitespace(&no_block_comments))
}

fn strip_line_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.char_indices().peekable();
    while let Some((_, c)) = chars.next() {
        if c == '/' {
            if let Some(&(_, '/')) = chars.peek() {
                while let Some(&(_, next)) = chars.peek() {
                    if next == '\n' {
                        break;
                    }
                    chars.next();
                }
                continue;
            }
        }
        out.push(c);
    }
    out
}

fn strip_block_comments(source: &str) -> Result<String> {
    let mut out = String::with_capacity(source.len());
    let bytes: Vec<char> = source.chars().collect();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == '/' && bytes.get(i + 1) == Some(&'*') {
            let mut j = i + 2;
            let mut closed = false;
            while j + 1 < bytes.len() {
                if bytes[j] == '*' && bytes[j + 1] == '/' {
                    closed = true;
                    j += 2;
                    break;
                }
                j += 1;
            }
            if !closed {
                return Err(SimError::InvalidSource("unterminated block comment".into()));
            }
            out.push(' ');
            i = j;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Ok(out)
}

fn collapse_whitespace(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut last_was_space = false;
    for c in source.chars() {
        if c.is_whitespace() {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(c);
            last_was_space = false;
        }
    }
    out.trim().to_string()
}

/// Given a string starting just after an opening delimiter `open`, find the
/// byte offset of its matching closing delimiter, tracking nested
/// `()`, `[]`, `{}` so that slice/ternary colons inside them are not
/// mistaken for top-level ones.
pub fn find_matching(s: &str, open: char, close: char) -> Option<usize> {
    let mut depth = 1i32;
    for (idx, c) in s.char_indices() {
        if c == open {
            depth += 1;
        } else if c == close {
            depth -= 1;
            if depth == 0 {
                return Some(idx);
            }
        }
    }
    None
}

/// Split `s` on top-level occurrences of `sep`, ignoring `sep` that appears
/// nested inside `()`, `[]`, or `{}`.
pub fn split_top_level(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0usize;
    for (idx, c) in s.char_indices() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            _ if c == sep && depth == 0 => {
                parts.push(&s[start..idx]);
                start = idx + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

/// Find the first top-level occurrence of `needle` (a short operator or
/// keyword), skipping occurrences nested inside `()`, `[]`, `{}`.
pub fn find_top_level(s: &str, needle: &str) -> Option<usize> {
    let mut depth = 0i32;
    let bytes = s.as_bytes();
    let nlen = needle.len();
    if nlen == 0 || bytes.len() < nlen {
        return None;
    }
    let mut i = 0usize;
    while i + nlen <= bytes.len() {
        match bytes[i] as char {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            _ => {}
        }
        if depth == 0 && &s[i..i + nlen] == needle {
            return Some(i);
        }
        i += 1;
    }
    None
}
