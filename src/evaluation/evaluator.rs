//! Evaluation of definition nodes.

use std::rc::Rc;

use tracing::trace;

use crate::ast::{Expression, Program};
use crate::environment::{symbols, Binding, Environment};
use crate::error::{ConfigurationError, SimError, SimResult};
use crate::evaluation::Operation;
use crate::factory::Factory;
use crate::service::ServiceId;
use crate::simulation::Simulation;

/// Result of evaluating a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Nothing worth binding.
    Unit,
    /// A defined operation.
    Operation(Rc<Operation>),
    /// A created service.
    Service(ServiceId),
}

/// Walks definition nodes and turns them into services and operations of
/// one simulation.
#[derive(Debug)]
pub struct Evaluator<'a> {
    factory: &'a Factory,
    simulation: &'a mut Simulation,
}

impl<'a> Evaluator<'a> {
    /// Creates an evaluator that builds into `simulation`.
    pub fn new(factory: &'a Factory, simulation: &'a mut Simulation) -> Self {
        Self { factory, simulation }
    }

    /// Evaluates every top-level node against the root scope.
    pub fn evaluate_program(&mut self, program: &Program) -> SimResult<()> {
        let root = self.simulation.environment().clone();
        for node in &program.body {
            self.evaluate(node, &root)?;
        }
        Ok(())
    }

    /// Evaluates one node against `environment`.
    ///
    /// Action nodes are only meaningful inside an operation body and are
    /// rejected here.
    pub fn evaluate(&mut self, node: &Expression, environment: &Environment) -> SimResult<Value> {
        trace!(node = node.kind(), depth = environment.depth(), "evaluate");
        match node {
            Expression::DefineService { name, body } => {
                if environment.lookup_local(symbols::SELF).is_some() {
                    return Err(malformed(format!("service '{name}' is nested inside another service")));
                }
                let local = environment.create_local_environment();
                // Settings apply to the whole service, wherever they appear.
                for child in body.iter().filter(|n| matches!(n, Expression::Settings { .. })) {
                    self.evaluate(child, &local)?;
                }
                let id = self.factory.create_service(self.simulation, name, &local)?;
                for child in body.iter().filter(|n| !matches!(n, Expression::Settings { .. })) {
                    self.evaluate(child, &local)?;
                }
                environment.define(name.as_str(), Binding::Service(id));
                Ok(Value::Service(id))
            }
            Expression::Settings { workers, throttling } => {
                if let Some(workers) = workers {
                    environment.define(symbols::WORKERS, Binding::Workers(*workers));
                }
                if let Some(throttling) = throttling {
                    environment.define(symbols::QUEUE, Binding::Throttling(*throttling));
                }
                Ok(Value::Unit)
            }
            Expression::DefineOperation { .. } => {
                let operation = self.factory.create_operation(environment, node)?;
                self.simulation.register_operation(environment, &operation);
                Ok(Value::Operation(operation))
            }
            Expression::Think { .. }
            | Expression::Invoke { .. }
            | Expression::Trigger { .. }
            | Expression::Fail
            | Expression::IgnoreError { .. }
            | Expression::Retry { .. }
            | Expression::Sequence { .. } => Err(malformed(format!(
                "'{}' is only allowed inside an operation body",
                node.kind()
            ))),
        }
    }
}

fn malformed(reason: String) -> SimError {
    ConfigurationError::MalformedNode { reason }.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::monitoring::NullStorage;
    use crate::throttling::ThrottlingSpec;

    fn evaluate_all(nodes: Vec<Expression>) -> SimResult<Simulation> {
        let factory = Factory::default();
        let mut sim = factory.create_simulation(Box::new(NullStorage));
        Evaluator::new(&factory, &mut sim).evaluate_program(&Program::new(nodes))?;
        Ok(sim)
    }

    #[test]
    fn define_operation_binds_in_current_scope() {
        let factory = Factory::default();
        let mut sim = factory.create_simulation(Box::new(NullStorage));
        let root = sim.environment().clone();
        let value = Evaluator::new(&factory, &mut sim)
            .evaluate(&Expression::define_operation("Ping", vec![Expression::think(1)]), &root)
            .unwrap();
        let Value::Operation(op) = value else {
            panic!("expected an operation, got {value:?}");
        };
        assert_eq!(op.name(), "Ping");
        assert_eq!(root.lookup_operation("Ping").unwrap(), op);
    }

    #[test]
    fn service_settings_apply_before_creation() {
        let sim = evaluate_all(vec![Expression::define_service(
            "DB",
            vec![
                Expression::define_operation("Select", vec![Expression::think(5)]),
                Expression::settings(Some(3), Some(ThrottlingSpec::tail_drop(10))),
            ],
        )])
        .unwrap();
        let db = sim.service("DB").unwrap();
        assert_eq!(db.pool().capacity(), 3);
        assert_eq!(db.policy().name(), "tail-drop");
        assert!(db.lookup_operation("Select").is_ok());
        assert_eq!(sim.environment().lookup_service("DB").unwrap(), db.id());
    }

    #[test]
    fn service_operations_stay_local() {
        let sim = evaluate_all(vec![
            Expression::define_service("A", vec![Expression::define_operation("Only", vec![])]),
            Expression::define_service("B", vec![]),
        ])
        .unwrap();
        assert!(sim.service("A").unwrap().lookup_operation("Only").is_ok());
        assert!(sim.service("B").unwrap().lookup_operation("Only").is_err());
        assert!(sim.service("B").unwrap().lookup_operation(symbols::NOOP).is_ok());
    }

    #[test]
    fn nested_service_is_malformed() {
        let err = evaluate_all(vec![Expression::define_service(
            "Outer",
            vec![Expression::define_service("Inner", vec![])],
        )])
        .unwrap_err();
        assert!(matches!(err.as_configuration(), Some(ConfigurationError::MalformedNode { .. })));
    }

    #[test]
    fn top_level_action_is_malformed() {
        let err = evaluate_all(vec![Expression::think(3)]).unwrap_err();
        assert!(matches!(err.as_configuration(), Some(ConfigurationError::MalformedNode { .. })));
    }
}
