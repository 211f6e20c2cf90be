//! # inkwell-ot — text operations for collaborative editing
//!
//! A [`TextOperation`] describes one edit to a linear text buffer as a
//! sequence of retain / insert / delete components that together span the
//! whole document. Operations compose (sequential merge), transform
//! (concurrent merge, performed by clients) and travel as a compact JSON
//! array.
//!
//! ```text
//!   "hello"  ──[5, ", world"]──▸  "hello, world"
//!             retain 5, insert ", world"
//! ```
//!
//! Lengths count Unicode scalar values (`char`s), never bytes.
//!
//! ## Modules
//!
//! - [`operation`] — the operation type, builder, apply/compose/transform
//! - [`wire`] — JSON transport form

pub mod operation;
pub mod wire;

pub use operation::{Component, OperationError, TextOperation};
