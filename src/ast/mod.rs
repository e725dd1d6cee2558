//! Abstract syntax of architecture descriptions.
//!
//! The parser that produces these trees lives outside this crate. What the
//! simulator relies on is the tagged-variant shape below and its JSON form,
//! which makes programs easy to store, diff and replay.

mod nodes;
mod serialization;
mod validation;

pub use nodes::{Expression, Program};
pub use serialization::{from_json, from_path, to_json_pretty};
pub use validation::{is_identifier, MAX_NESTING};
