//! Building simulations.
//!
//! The [`Factory`] creates the root scope with the built-in symbols, wires
//! services to the throttling policy and worker count visible from their
//! scope, and compiles operation definitions. [`Factory::build`] runs the
//! whole pipeline for a [`Program`].

use std::rc::Rc;

use tracing::{debug, info};

use crate::ast::{is_identifier, Expression, Program};
use crate::config::SimulationConfig;
use crate::environment::{symbols, Binding, Environment};
use crate::error::{SimResult, ValidationError};
use crate::evaluation::{Evaluator, Operation};
use crate::monitoring::DataStorage;
use crate::service::{Service, ServiceId};
use crate::simulation::{Simulation, SimulationId};
use crate::tasks::TaskPool;

/// Builds simulations from a configuration.
#[derive(Debug, Clone, Default)]
pub struct Factory {
    config: SimulationConfig,
}

impl Factory {
    /// Creates a factory after validating `config`.
    pub fn new(config: SimulationConfig) -> SimResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The configuration handed to every simulation.
    #[must_use]
    pub const fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Creates an empty simulation.
    ///
    /// The root scope binds `QUEUE` and `WORKERS` to the configured defaults
    /// and `NOOP` to an operation that completes immediately.
    #[must_use]
    pub fn create_simulation(&self, storage: Box<dyn DataStorage>) -> Simulation {
        let root = Environment::new();
        root.define(symbols::QUEUE, Binding::Throttling(self.config.default_throttling));
        root.define(symbols::WORKERS, Binding::Workers(self.config.default_workers));
        root.define(
            symbols::NOOP,
            Binding::Operation(Rc::new(Operation::new(symbols::NOOP, Vec::new()))),
        );
        let simulation = Simulation::new(SimulationId::new(), self.config.clone(), root, storage);
        debug!(simulation = %simulation.id(), "simulation created");
        simulation
    }

    /// Creates a service named `name` that runs in `environment`.
    ///
    /// The policy and worker count are whatever `QUEUE` and `WORKERS` resolve
    /// to from `environment`. `SELF` is bound to the new service in that
    /// scope. Binding `name` itself is left to the caller.
    pub fn create_service(
        &self,
        simulation: &mut Simulation,
        name: &str,
        environment: &Environment,
    ) -> SimResult<ServiceId> {
        if !is_identifier(name) {
            return Err(ValidationError::InvalidIdentifier {
                name: name.to_string(),
            }
            .into());
        }
        let throttling = environment.lookup_throttling(symbols::QUEUE)?;
        throttling.validate()?;
        let workers = environment.lookup_workers(symbols::WORKERS)?;
        if workers == 0 {
            return Err(ValidationError::InvalidValue {
                field: symbols::WORKERS.to_string(),
                reason: format!("service '{name}' needs at least one worker"),
            }
            .into());
        }

        let report = simulation.storage_mut().report_for(name);
        let id = simulation.add_service(|id| {
            Service::new(
                id,
                name,
                environment.clone(),
                TaskPool::new(workers),
                throttling.build(),
                report,
            )
        });
        environment.define(symbols::SELF, Binding::Service(id));
        debug!(service = name, %id, workers, ?throttling, "service created");
        Ok(id)
    }

    /// Compiles a `DefineOperation` node and binds it in `environment`.
    pub fn create_operation(&self, environment: &Environment, node: &Expression) -> SimResult<Rc<Operation>> {
        let operation = Rc::new(Operation::from_node(node)?);
        environment.define(operation.name(), Binding::Operation(Rc::clone(&operation)));
        Ok(operation)
    }

    /// Validates, evaluates and verifies `program`.
    ///
    /// The simulation's ID is derived from the program fingerprint, so the
    /// same program always yields the same ID.
    pub fn build(&self, program: &Program, storage: Box<dyn DataStorage>) -> SimResult<Simulation> {
        program.validate()?;
        let mut simulation = self.create_simulation(storage);
        simulation.set_program(program.fingerprint());
        Evaluator::new(self, &mut simulation).evaluate_program(program)?;
        simulation.verify()?;
        info!(
            simulation = %simulation.id(),
            services = simulation.services().len(),
            "simulation built"
        );
        Ok(simulation)
    }
}
