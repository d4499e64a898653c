//! Source parsing: expressions (used by both continuous assignments and
//! procedural statements), module headers/bodies, and procedural
//! statement bodies (spec.md §4.2-§4.3).

pub mod expr;
pub mod module;
pub mod statement;
