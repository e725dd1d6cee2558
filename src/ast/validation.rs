//! Program validation.
//!
//! Programs usually arrive as JSON from an external parser, so they are
//! checked before evaluation: names must be identifiers, numeric settings
//! must be sensible, and nesting is bounded.

use std::sync::OnceLock;

use regex::Regex;

use crate::ast::nodes::{Expression, Program};
use crate::error::ValidationError;

/// Deepest allowed node nesting.
pub const MAX_NESTING: usize = 64;

static IDENTIFIER: OnceLock<Regex> = OnceLock::new();

/// Returns true if `name` is a valid symbol name.
#[must_use]
pub fn is_identifier(name: &str) -> bool {
    IDENTIFIER
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern compiles"))
        .is_match(name)
}

fn validate_identifier(name: &str) -> Result<(), ValidationError> {
    if is_identifier(name) {
        Ok(())
    } else {
        Err(ValidationError::InvalidIdentifier {
            name: name.to_string(),
        })
    }
}

fn validate_body(body: &[Expression], depth: usize) -> Result<(), ValidationError> {
    for node in body {
        node.validate_at(depth + 1)?;
    }
    Ok(())
}

impl Expression {
    /// Validates this node and its children.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.validate_at(0)
    }

    fn validate_at(&self, depth: usize) -> Result<(), ValidationError> {
        if depth > MAX_NESTING {
            return Err(ValidationError::InvalidValue {
                field: "body".to_string(),
                reason: format!("nesting deeper than {MAX_NESTING}"),
            });
        }
        match self {
            Self::DefineService { name, body } | Self::DefineOperation { name, body } => {
                validate_identifier(name)?;
                validate_body(body, depth)
            }
            Self::Settings { throttling, .. } => match throttling {
                Some(spec) => spec.validate(),
                None => Ok(()),
            },
            Self::Invoke {
                service,
                operation,
                timeout,
            } => {
                validate_identifier(service)?;
                validate_identifier(operation)?;
                if *timeout == Some(0) {
                    return Err(ValidationError::InvalidValue {
                        field: "timeout".to_string(),
                        reason: "must be > 0".to_string(),
                    });
                }
                Ok(())
            }
            Self::Trigger { service, operation } => {
                validate_identifier(service)?;
                validate_identifier(operation)
            }
            Self::IgnoreError { body } | Self::Retry { body, .. } | Self::Sequence { body } => {
                validate_body(body, depth)
            }
            Self::Think { .. } | Self::Fail => Ok(()),
        }
    }
}

impl Program {
    /// Validates the version and every node.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.version.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "version".to_string(),
            });
        }
        if self.version != Self::CURRENT_VERSION {
            return Err(ValidationError::InvalidValue {
                field: "version".to_string(),
                reason: format!("unsupported version '{}'", self.version),
            });
        }
        validate_body(&self.body, 0)
    }
}
