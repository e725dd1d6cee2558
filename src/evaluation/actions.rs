//! Runtime operations and the actions they are made of.

use std::rc::Rc;

use crate::ast::Expression;
use crate::clock::SimTime;
use crate::error::ConfigurationError;

/// One step of an operation body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Hold the worker for the given time.
    Think(SimTime),
    /// Call another service and wait for the reply.
    Invoke {
        /// Target service.
        service: String,
        /// Target operation.
        operation: String,
        /// Optional deadline for the reply.
        timeout: Option<SimTime>,
    },
    /// Call another service without waiting.
    Trigger {
        /// Target service.
        service: String,
        /// Target operation.
        operation: String,
    },
    /// Fail the operation.
    Fail,
    /// Run the body, swallowing failures.
    IgnoreError(Rc<[Action]>),
    /// Run the body, retrying after `delay` up to `limit` more times.
    Retry {
        /// Extra attempts.
        limit: u32,
        /// Wait between attempts.
        delay: SimTime,
        /// Retried actions.
        body: Rc<[Action]>,
    },
}

impl Action {
    /// Compiles an operation body. `Sequence` nodes are flattened; definition
    /// nodes are rejected.
    pub fn compile_body(body: &[Expression]) -> Result<Rc<[Self]>, ConfigurationError> {
        let mut actions = Vec::with_capacity(body.len());
        for node in body {
            compile_into(node, &mut actions)?;
        }
        Ok(actions.into())
    }

    fn visit_targets<'a>(&'a self, out: &mut Vec<(&'a str, &'a str)>) {
        match self {
            Self::Invoke {
                service, operation, ..
            }
            | Self::Trigger { service, operation } => out.push((service.as_str(), operation.as_str())),
            Self::IgnoreError(body) | Self::Retry { body, .. } => {
                for action in body.iter() {
                    action.visit_targets(out);
                }
            }
            Self::Think(_) | Self::Fail => {}
        }
    }
}

fn compile_into(node: &Expression, out: &mut Vec<Action>) -> Result<(), ConfigurationError> {
    let action = match node {
        Expression::Think { duration } => Action::Think(*duration),
        Expression::Invoke {
            service,
            operation,
            timeout,
        } => Action::Invoke {
            service: service.clone(),
            operation: operation.clone(),
            timeout: *timeout,
        },
        Expression::Trigger { service, operation } => Action::Trigger {
            service: service.clone(),
            operation: operation.clone(),
        },
        Expression::Fail => Action::Fail,
        Expression::IgnoreError { body } => Action::IgnoreError(Action::compile_body(body)?),
        Expression::Retry { limit, delay, body } => Action::Retry {
            limit: *limit,
            delay: *delay,
            body: Action::compile_body(body)?,
        },
        Expression::Sequence { body } => {
            for child in body {
                compile_into(child, out)?;
            }
            return Ok(());
        }
        Expression::DefineService { .. } | Expression::Settings { .. } | Expression::DefineOperation { .. } => {
            return Err(ConfigurationError::MalformedNode {
                reason: format!("'{}' is not allowed inside an operation body", node.kind()),
            });
        }
    };
    out.push(action);
    Ok(())
}

/// A named, invocable unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    name: String,
    body: Rc<[Action]>,
}

impl Operation {
    /// Creates an operation from compiled actions.
    pub fn new(name: impl Into<String>, body: impl Into<Rc<[Action]>>) -> Self {
        Self {
            name: name.into(),
            body: body.into(),
        }
    }

    /// Compiles a `DefineOperation` node.
    pub fn from_node(node: &Expression) -> Result<Self, ConfigurationError> {
        match node {
            Expression::DefineOperation { name, body } => Ok(Self::new(name.clone(), Action::compile_body(body)?)),
            other => Err(ConfigurationError::MalformedNode {
                reason: format!("expected 'define_operation', found '{}'", other.kind()),
            }),
        }
    }

    /// Operation name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Compiled body.
    #[must_use]
    pub fn body(&self) -> &Rc<[Action]> {
        &self.body
    }

    /// Every `(service, operation)` this operation may call, in body order.
    #[must_use]
    pub fn targets(&self) -> Vec<(&str, &str)> {
        let mut out = Vec::new();
        for action in self.body.iter() {
            action.visit_targets(&mut out);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequences_are_flattened() {
        let body = vec![
            Expression::think(1),
            Expression::Sequence {
                body: vec![Expression::think(2), Expression::Sequence { body: vec![Expression::Fail] }],
            },
        ];
        let actions = Action::compile_body(&body).unwrap();
        assert_eq!(&*actions, &[Action::Think(1), Action::Think(2), Action::Fail]);
    }

    #[test]
    fn definitions_inside_a_body_are_malformed() {
        let body = vec![Expression::define_operation("Inner", vec![])];
        let err = Action::compile_body(&body).unwrap_err();
        assert!(matches!(err, ConfigurationError::MalformedNode { .. }));
    }

    #[test]
    fn operation_from_node() {
        let node = Expression::define_operation("NOOP", vec![Expression::think(5)]);
        let op = Operation::from_node(&node).unwrap();
        assert_eq!(op.name(), "NOOP");
        assert_eq!(&**op.body(), &[Action::Think(5)]);

        assert!(Operation::from_node(&Expression::think(5)).is_err());
    }

    #[test]
    fn targets_include_nested_calls() {
        let node = Expression::define_operation(
            "Checkout",
            vec![
                Expression::invoke("Stock", "Reserve"),
                Expression::Retry {
                    limit: 2,
                    delay: 1,
                    body: vec![Expression::IgnoreError {
                        body: vec![Expression::trigger("Mail", "Send")],
                    }],
                },
            ],
        );
        let op = Operation::from_node(&node).unwrap();
        assert_eq!(op.targets(), vec![("Stock", "Reserve"), ("Mail", "Send")]);
    }
}
