//! Evaluation of architecture descriptions.
//!
//! Definition nodes are evaluated once, against an [`Environment`], when
//! the simulation is built. Operation bodies are compiled into [`Action`]
//! lists that the simulation steps through for each request.
//!
//! [`Environment`]: crate::environment::Environment

mod actions;
mod evaluator;

pub use actions::{Action, Operation};
pub use evaluator::{Evaluator, Value};
