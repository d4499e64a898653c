//! Signal declarations and widths (spec.md §3 `SignalDecl`).

use serde::Serialize;

/// What a declared signal is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Input,
    Output,
    Wire,
    Reg,
    MemoryIndex,
}

/// A declared signal: name, MSB/LSB, and derived width.
///
/// Scalars are width 1 with `msb == lsb == 0`. Widths are immutable once a
/// module finishes parsing.
#[derive(Debug, Clone, Serialize)]
pub struct SignalDecl {
    pub name: String,
    pub msb: i64,
    pub lsb: i64,
    pub kind: SignalKind,
}

impl SignalDecl {
    pub fn scalar(name: impl Into<String>, kind: SignalKind) -> Self {
        Self { name: name.into(), msb: 0, lsb: 0, kind }
    }

    pub fn ranged(name: impl Into<String>, msb: i64, lsb: i64, kind: SignalKind) -> Self {
        Self { name: name.into(), msb, lsb, kind }
    }

    /// `width = |msb - lsb| + 1`.
    pub fn width(&self) -> u32 {
        (self.msb - self.lsb).unsigned_abs() as u32 + 1
    }

    /// The lower bound of the bit range, regardless of declaration direction
    /// (`[3:0]` vs. the unusual `[0:3]`).
    pub fn lo(&self) -> i64 {
        self.msb.min(self.lsb)
    }

    pub fn mask(&self) -> u64 {
        crate::eval::compute_mask(self.width())
    }
}
