//! JSON form of programs.
//!
//! Serde provides the encoding; these helpers keep error mapping and
//! validation in one place.

use std::path::Path;

use crate::ast::nodes::Program;
use crate::error::{SimError, SimResult};

/// Serialize a program to pretty JSON.
pub fn to_json_pretty(program: &Program) -> SimResult<String> {
    serde_json::to_string_pretty(program).map_err(|e| SimError::internal(format!("serialize program: {e}")))
}

/// Deserialize and validate a program from JSON.
pub fn from_json(s: &str) -> SimResult<Program> {
    let program = serde_json::from_str::<Program>(s)
        .map_err(|e| SimError::internal(format!("deserialize program: {e}")))?;
    program.validate()?;
    Ok(program)
}

/// Read, deserialize and validate a program from a JSON file.
pub fn from_path(path: impl AsRef<Path>) -> SimResult<Program> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .map_err(|e| SimError::internal(format!("read {}: {e}", path.display())))?;
    from_json(&text)
}
