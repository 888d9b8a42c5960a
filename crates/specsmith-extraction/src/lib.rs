//! Turning free-form model output into typed values
//!
//! [`parse_structured`] runs a permissive parser chain that never fails the
//! caller: strict YAML/JSON first, then a line-oriented heuristic, and finally
//! [`Parsed::Unparsed`] carrying the raw text. [`CodeBlockScanner`] finds
//! fenced code blocks, either over a whole response or incrementally over a
//! stream of chunks.

mod code_blocks;
mod structured;

pub use code_blocks::{CodeBlockScanner, extract_code_blocks};
pub use structured::{Parsed, parse_expecting, parse_structured, strip_fences};
