//! # archsim - Discrete-event simulation of service architectures
//!
//! archsim evaluates a description of a software architecture (services,
//! their operations and how they call each other) and simulates requests
//! flowing through it in virtual time.
//!
//! ## Core Concepts
//!
//! - **Service**: a throttling policy in front of a FIFO queue in front of a
//!   pool of workers
//! - **Operation**: a named unit of work, made of timed actions and calls to
//!   other services
//! - **Request**: one invocation of an operation; it is answered exactly once,
//!   with success or error
//! - **Clock**: a virtual-time event queue, ordered by time then by
//!   scheduling order
//!
//! ## Usage
//!
//! ```rust,ignore
//! use archsim::{Expression, Factory, InMemoryStorage, NoopObserver, Program, ThrottlingSpec};
//!
//! let program = Program::new(vec![Expression::define_service(
//!     "DB",
//!     vec![
//!         Expression::settings(Some(2), Some(ThrottlingSpec::tail_drop(10))),
//!         Expression::define_operation("Select", vec![Expression::think(5)]),
//!     ],
//! )]);
//!
//! let storage = InMemoryStorage::new();
//! let mut sim = Factory::default().build(&program, Box::new(storage.clone()))?;
//! sim.schedule_request(0, "DB", "Select", Box::new(|_| {}), Box::new(|_| {}))?;
//! sim.run_until(100, &mut NoopObserver)?;
//! assert_eq!(storage.statistics("DB").unwrap().successes, 1);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod clock;
pub mod error;
pub mod requests;
pub mod tasks;
pub mod throttling;

// Architecture descriptions
pub mod ast;
pub mod environment;
pub mod evaluation;

// Runtime
pub mod config;
pub mod factory;
pub mod monitoring;
pub mod progress;
pub mod service;
pub mod simulation;

// Re-export primary types at crate root for convenience
pub use ast::{Expression, Program};
pub use clock::{Clock, NoopObserver, Observer, SimTime};
pub use config::SimulationConfig;
pub use environment::{symbols, Binding, Environment};
pub use error::{ConfigurationError, SimError, SimResult, ValidationError};
pub use evaluation::{Action, Evaluator, Operation, Value};
pub use factory::Factory;
pub use monitoring::{DataStorage, InMemoryStorage, NullStorage, Report, Sample, ServiceStatistics};
pub use progress::{progress_channel, ChannelObserver, Progress};
pub use requests::{ReplyKind, ReplySink, Request, RequestId, RequestStatus};
pub use service::{Admission, Service, ServiceId};
pub use simulation::{RunSummary, Simulation, SimulationId};
pub use tasks::TaskPool;
pub use throttling::{NoThrottling, TailDrop, ThrottlingPolicy, ThrottlingSpec};
