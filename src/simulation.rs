//! The running simulation.
//!
//! A [`Simulation`] owns the clock, the root environment and every service.
//! It moves requests through their lifecycle: admission, queueing,
//! processing and reply. Operation bodies run as activations, small
//! interpreters that suspend on `Think`, on calls to other services and
//! on retry delays, and resume when the matching event or reply arrives.
//!
//! Replies to child requests travel through a mailbox rather than straight
//! into simulation state, so a reply sink never needs access to the
//! simulation that owns it.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::clock::{Clock, Observer, SimTime};
use crate::config::SimulationConfig;
use crate::environment::Environment;
use crate::error::{ConfigurationError, SimResult};
use crate::evaluation::{Action, Operation};
use crate::monitoring::DataStorage;
use crate::requests::{ReplyKind, ReplySink, Request, RequestId, RequestStatus};
use crate::service::{Admission, Service, ServiceId};

/// Stable identifier for a simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SimulationId(Uuid);

impl SimulationId {
    /// Create a new random simulation ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Derive the ID from a program fingerprint, so rebuilding the same
    /// program yields the same ID.
    #[must_use]
    pub fn for_fingerprint(fingerprint: &str) -> Self {
        Self(Uuid::new_v5(&Uuid::NAMESPACE_OID, fingerprint.as_bytes()))
    }
}

impl Default for SimulationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SimulationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a call to [`Simulation::run_until`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Virtual time when the run started.
    pub start: SimTime,
    /// Virtual time when the run stopped.
    pub end: SimTime,
    /// Events dispatched during the run.
    pub events_dispatched: u64,
    /// True if the run stopped because the event budget ran out.
    pub stopped_early: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct ActivationId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    Proceed,
    Failed,
}

impl From<ReplyKind> for Signal {
    fn from(kind: ReplyKind) -> Self {
        match kind {
            ReplyKind::Success => Self::Proceed,
            ReplyKind::Error => Self::Failed,
        }
    }
}

enum Event {
    Arrival {
        service: ServiceId,
        request: Request,
    },
    Resume {
        activation: ActivationId,
        token: u64,
    },
    Timeout {
        activation: ActivationId,
        token: u64,
    },
    Sample,
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Arrival { service, request } => write!(f, "Arrival({service}, {})", request.id()),
            Self::Resume { activation, token } => write!(f, "Resume({}, {token})", activation.0),
            Self::Timeout { activation, token } => write!(f, "Timeout({}, {token})", activation.0),
            Self::Sample => f.write_str("Sample"),
        }
    }
}

#[derive(Debug)]
struct Message {
    activation: ActivationId,
    token: u64,
    outcome: ReplyKind,
}

type Mailbox = Rc<RefCell<VecDeque<Message>>>;

#[derive(Debug, Clone, Copy)]
enum Guard {
    Body,
    IgnoreError,
    Retry { remaining: u32, delay: SimTime },
}

#[derive(Debug)]
struct Frame {
    body: Rc<[Action]>,
    pc: usize,
    guard: Guard,
}

impl Frame {
    const fn new(body: Rc<[Action]>, guard: Guard) -> Self {
        Self { body, pc: 0, guard }
    }
}

#[derive(Debug)]
struct Activation {
    service: ServiceId,
    request: Request,
    frames: Vec<Frame>,
    waiting: Option<u64>,
}

/// A runnable simulation.
pub struct Simulation {
    id: SimulationId,
    config: SimulationConfig,
    clock: Clock<Event>,
    environment: Environment,
    services: Vec<Service>,
    storage: Box<dyn DataStorage>,
    definitions: Vec<(Environment, Rc<Operation>)>,
    activations: BTreeMap<ActivationId, Activation>,
    mailbox: Mailbox,
    ready: VecDeque<ServiceId>,
    next_request: u64,
    next_activation: u64,
    next_token: u64,
    steps: u64,
    sampling: bool,
    fingerprint: Option<String>,
}

impl fmt::Debug for Simulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Simulation")
            .field("id", &self.id)
            .field("now", &self.clock.now())
            .field("pending_events", &self.clock.pending())
            .field("services", &self.services)
            .field("in_flight", &self.activations.len())
            .finish_non_exhaustive()
    }
}

impl Simulation {
    pub(crate) fn new(
        id: SimulationId,
        config: SimulationConfig,
        environment: Environment,
        storage: Box<dyn DataStorage>,
    ) -> Self {
        Self {
            id,
            config,
            clock: Clock::new(),
            environment,
            services: Vec::new(),
            storage,
            definitions: Vec::new(),
            activations: BTreeMap::new(),
            mailbox: Rc::default(),
            ready: VecDeque::new(),
            next_request: 0,
            next_activation: 0,
            next_token: 0,
            steps: 0,
            sampling: false,
            fingerprint: None,
        }
    }

    /// Simulation identity.
    #[must_use]
    pub const fn id(&self) -> SimulationId {
        self.id
    }

    /// Configuration this simulation was built with.
    #[must_use]
    pub const fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Current virtual time.
    #[must_use]
    pub const fn now(&self) -> SimTime {
        self.clock.now()
    }

    /// Units of work charged against `max_events` so far: dispatched
    /// events, deliveries and request starts.
    #[must_use]
    pub const fn steps(&self) -> u64 {
        self.steps
    }

    /// Whether the configured work budget is used up. Once spent, no further
    /// work happens in this simulation.
    #[must_use]
    pub fn budget_spent(&self) -> bool {
        self.config.max_events.is_some_and(|max| self.steps >= max)
    }

    /// Events waiting on the clock.
    #[must_use]
    pub fn pending_events(&self) -> usize {
        self.clock.pending()
    }

    /// Time of the next pending event.
    #[must_use]
    pub fn next_event_time(&self) -> Option<SimTime> {
        self.clock.next_event_time()
    }

    /// Requests currently being processed, across all services.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.activations.len()
    }

    /// The root scope.
    #[must_use]
    pub const fn environment(&self) -> &Environment {
        &self.environment
    }

    /// Fingerprint of the program this simulation was built from.
    #[must_use]
    pub fn fingerprint(&self) -> Option<&str> {
        self.fingerprint.as_deref()
    }

    /// All services, in creation order.
    #[must_use]
    pub fn services(&self) -> &[Service] {
        &self.services
    }

    /// Finds a service by name. The most recently created one wins.
    pub fn service_id(&self, name: &str) -> SimResult<ServiceId> {
        self.services
            .iter()
            .rev()
            .find(|service| service.name() == name)
            .map(Service::id)
            .ok_or_else(|| {
                ConfigurationError::UndefinedService {
                    service: name.to_string(),
                }
                .into()
            })
    }

    /// Finds a service by name.
    pub fn service(&self, name: &str) -> SimResult<&Service> {
        let id = self.service_id(name)?;
        Ok(&self.services[id.0])
    }

    pub(crate) fn storage_mut(&mut self) -> &mut dyn DataStorage {
        self.storage.as_mut()
    }

    pub(crate) fn add_service(&mut self, build: impl FnOnce(ServiceId) -> Service) -> ServiceId {
        let id = ServiceId(self.services.len());
        self.services.push(build(id));
        id
    }

    pub(crate) fn register_operation(&mut self, environment: &Environment, operation: &Rc<Operation>) {
        self.definitions.push((environment.clone(), Rc::clone(operation)));
    }

    pub(crate) fn set_program(&mut self, fingerprint: String) {
        self.id = SimulationId::for_fingerprint(&fingerprint);
        self.fingerprint = Some(fingerprint);
    }

    /// Checks that every service call in every defined operation names an
    /// existing service and operation.
    pub fn verify(&self) -> SimResult<()> {
        for (environment, operation) in &self.definitions {
            for (service, target) in operation.targets() {
                self.resolve_target(environment, service, target)?;
            }
        }
        Ok(())
    }

    fn resolve_target(
        &self,
        environment: &Environment,
        service: &str,
        operation: &str,
    ) -> Result<ServiceId, ConfigurationError> {
        let id = environment.lookup_service(service).map_err(|err| match err {
            ConfigurationError::UnboundSymbol { .. } => ConfigurationError::UndefinedService {
                service: service.to_string(),
            },
            other => other,
        })?;
        self.services[id.0].lookup_operation(operation)?;
        Ok(id)
    }

    fn next_request_id(&mut self) -> RequestId {
        let id = RequestId(self.next_request);
        self.next_request += 1;
        id
    }

    fn next_token(&mut self) -> u64 {
        let token = self.next_token;
        self.next_token += 1;
        token
    }

    /// Builds a request for `operation`, arriving now.
    pub fn create_request(&mut self, operation: impl Into<String>, on_success: ReplySink, on_error: ReplySink) -> Request {
        let id = self.next_request_id();
        Request::new(id, operation, self.clock.now(), on_success, on_error)
    }

    /// Delivers `request` to the service called `service` right now.
    ///
    /// An unknown service or operation is a configuration error; the
    /// request is sent `reply_error` before the error is returned.
    pub fn submit(&mut self, service: &str, mut request: Request) -> SimResult<Admission> {
        let id = match self.service_id(service) {
            Ok(id) => id,
            Err(err) => {
                request.reply_error();
                return Err(err);
            }
        };
        let admission = self.deliver(id, request)?;
        self.settle()?;
        Ok(admission)
    }

    /// Schedules a request for `operation` to reach `service` after `delay`.
    ///
    /// The target is checked immediately, so a misspelled name fails here
    /// rather than mid-run.
    pub fn schedule_request(
        &mut self,
        delay: SimTime,
        service: &str,
        operation: &str,
        on_success: ReplySink,
        on_error: ReplySink,
    ) -> SimResult<RequestId> {
        let target = self.service_id(service)?;
        self.services[target.0].lookup_operation(operation)?;
        let id = self.next_request_id();
        let arrival = self.clock.now().saturating_add(delay);
        let request = Request::new(id, operation, arrival, on_success, on_error);
        self.clock.schedule_at(arrival, Event::Arrival { service: target, request });
        Ok(id)
    }

    /// Dispatches every event due no later than `limit`, then advances the
    /// clock to `limit`. `observer` is updated after every event.
    ///
    /// A configuration fault found while running stops the run; the request
    /// that hit it has already been sent `reply_error`.
    ///
    /// With `max_events` set, the run stops with `stopped_early` as soon as
    /// the budget is spent, including inside a burst of zero-time work. The
    /// clock then stays where it was, and later runs dispatch nothing.
    pub fn run_until(&mut self, limit: SimTime, observer: &mut dyn Observer) -> SimResult<RunSummary> {
        let start = self.clock.now();
        info!(simulation = %self.id, start, limit, "run started");
        self.arm_sampling();
        self.settle()?;

        let mut events_dispatched = 0;
        let mut stopped_early = false;
        loop {
            if self.budget_spent() {
                warn!(simulation = %self.id, now = self.clock.now(), steps = self.steps, "event budget exhausted");
                stopped_early = true;
                break;
            }
            let Some((_, event)) = self.clock.pop_until(limit) else {
                break;
            };
            self.steps += 1;
            if let Err(err) = self.dispatch(event) {
                warn!(simulation = %self.id, now = self.clock.now(), %err, "run aborted");
                return Err(err);
            }
            events_dispatched += 1;
            observer.update(self.clock.now(), limit);
        }
        if !stopped_early {
            self.clock.advance_to(limit);
        }

        let summary = RunSummary {
            start,
            end: self.clock.now(),
            events_dispatched,
            stopped_early,
        };
        info!(
            simulation = %self.id,
            end = summary.end,
            events = summary.events_dispatched,
            in_flight = self.activations.len(),
            "run finished"
        );
        Ok(summary)
    }

    fn arm_sampling(&mut self) {
        if self.sampling {
            return;
        }
        if let Some(period) = self.config.monitoring_period {
            self.sampling = true;
            self.clock.schedule(period, Event::Sample);
        }
    }

    fn dispatch(&mut self, event: Event) -> SimResult<()> {
        trace!(now = self.clock.now(), ?event, "dispatch");
        match event {
            Event::Arrival { service, request } => {
                self.deliver(service, request)?;
            }
            Event::Resume { activation, token } => self.wake(activation, token, Signal::Proceed)?,
            Event::Timeout { activation, token } => {
                if self.is_waiting(activation, token) {
                    debug!(activation = activation.0, now = self.clock.now(), "call timed out");
                }
                self.wake(activation, token, Signal::Failed)?;
            }
            Event::Sample => {
                let now = self.clock.now();
                for service in &mut self.services {
                    service.sample(now);
                }
                match self.config.monitoring_period {
                    Some(period) if !self.clock.is_idle() => {
                        self.clock.schedule(period, Event::Sample);
                    }
                    _ => self.sampling = false,
                }
            }
        }
        self.settle()
    }

    fn deliver(&mut self, service: ServiceId, mut request: Request) -> SimResult<Admission> {
        let now = self.clock.now();
        let target = &mut self.services[service.0];
        if let Err(err) = target.lookup_operation(request.operation()) {
            warn!(service = %target.name(), request = %request.id(), %err, "undefined operation");
            request.reply_error();
            return Err(err.into());
        }
        let admission = target.process(request, now);
        self.steps += 1;
        if admission == Admission::Queued {
            self.mark_ready(service);
        }
        Ok(admission)
    }

    fn mark_ready(&mut self, service: ServiceId) {
        if !self.ready.contains(&service) {
            self.ready.push_back(service);
        }
    }

    /// Runs everything that can happen without time passing: replies waiting
    /// in the mailbox and requests waiting for an idle worker.
    ///
    /// Stops as soon as the work budget is spent, leaving the rest pending.
    fn settle(&mut self) -> SimResult<()> {
        loop {
            if self.budget_spent() {
                return Ok(());
            }
            let message = self.mailbox.borrow_mut().pop_front();
            if let Some(message) = message {
                self.wake(message.activation, message.token, message.outcome.into())?;
                continue;
            }
            let Some(&service) = self.ready.front() else {
                return Ok(());
            };
            match self.services[service.0].dequeue_ready() {
                Some(request) => self.start(service, request)?,
                None => {
                    self.ready.pop_front();
                }
            }
        }
    }

    fn start(&mut self, service: ServiceId, mut request: Request) -> SimResult<()> {
        let operation = match self.services[service.0].lookup_operation(request.operation()) {
            Ok(operation) => operation,
            Err(err) => {
                let now = self.clock.now();
                self.services[service.0].complete(request, ReplyKind::Error, now);
                return Err(err.into());
            }
        };
        request.set_status(RequestStatus::Processing);
        self.steps += 1;
        let id = ActivationId(self.next_activation);
        self.next_activation += 1;
        trace!(service = %self.services[service.0].name(), request = %request.id(), activation = id.0, "processing");
        self.activations.insert(
            id,
            Activation {
                service,
                request,
                frames: vec![Frame::new(Rc::clone(operation.body()), Guard::Body)],
                waiting: None,
            },
        );
        self.step(id, Signal::Proceed)
    }

    fn is_waiting(&self, activation: ActivationId, token: u64) -> bool {
        self.activations
            .get(&activation)
            .is_some_and(|act| act.waiting == Some(token))
    }

    /// Resumes a suspended activation, unless the wake-up is stale.
    fn wake(&mut self, activation: ActivationId, token: u64, signal: Signal) -> SimResult<()> {
        let Some(act) = self.activations.get_mut(&activation) else {
            return Ok(());
        };
        if act.waiting != Some(token) {
            return Ok(());
        }
        act.waiting = None;
        self.step(activation, signal)
    }

    fn suspend(&mut self, id: ActivationId, mut act: Activation) -> u64 {
        let token = self.next_token();
        act.waiting = Some(token);
        self.activations.insert(id, act);
        token
    }

    fn finish(&mut self, act: Activation, outcome: ReplyKind) {
        let now = self.clock.now();
        let service = act.service;
        self.services[service.0].complete(act.request, outcome, now);
        self.mark_ready(service);
    }

    /// Interprets the activation until it suspends or finishes.
    fn step(&mut self, id: ActivationId, mut signal: Signal) -> SimResult<()> {
        let Some(mut act) = self.activations.remove(&id) else {
            return Ok(());
        };
        loop {
            if signal == Signal::Failed {
                let Some(frame) = act.frames.pop() else {
                    self.finish(act, ReplyKind::Error);
                    return Ok(());
                };
                match frame.guard {
                    Guard::Body => {}
                    Guard::IgnoreError => signal = Signal::Proceed,
                    Guard::Retry { remaining, delay } if remaining > 0 => {
                        act.frames.push(Frame::new(
                            frame.body,
                            Guard::Retry {
                                remaining: remaining - 1,
                                delay,
                            },
                        ));
                        signal = Signal::Proceed;
                        if delay > 0 {
                            let token = self.suspend(id, act);
                            self.clock.schedule(delay, Event::Resume { activation: id, token });
                            return Ok(());
                        }
                    }
                    Guard::Retry { .. } => {}
                }
                continue;
            }

            let Some(frame) = act.frames.last_mut() else {
                self.finish(act, ReplyKind::Success);
                return Ok(());
            };
            let body = Rc::clone(&frame.body);
            let Some(action) = body.get(frame.pc) else {
                act.frames.pop();
                continue;
            };
            frame.pc += 1;

            match action {
                Action::Think(duration) => {
                    let token = self.suspend(id, act);
                    self.clock.schedule(*duration, Event::Resume { activation: id, token });
                    return Ok(());
                }
                Action::Invoke {
                    service,
                    operation,
                    timeout,
                } => {
                    let caller = self.services[act.service.0].environment().clone();
                    let target = match self.resolve_target(&caller, service, operation) {
                        Ok(target) => target,
                        Err(err) => {
                            warn!(activation = id.0, %err, "call to undefined target");
                            self.finish(act, ReplyKind::Error);
                            return Err(err.into());
                        }
                    };
                    let token = self.suspend(id, act);
                    if let Some(timeout) = timeout {
                        self.clock.schedule(*timeout, Event::Timeout { activation: id, token });
                    }
                    let child = self.child_request(operation, id, token);
                    self.deliver(target, child)?;
                    return Ok(());
                }
                Action::Trigger { service, operation } => {
                    let caller = self.services[act.service.0].environment().clone();
                    let target = match self.resolve_target(&caller, service, operation) {
                        Ok(target) => target,
                        Err(err) => {
                            warn!(activation = id.0, %err, "trigger of undefined target");
                            self.finish(act, ReplyKind::Error);
                            return Err(err.into());
                        }
                    };
                    let request_id = self.next_request_id();
                    let child = Request::detached(request_id, operation.as_str(), self.clock.now());
                    self.deliver(target, child)?;
                }
                Action::Fail => signal = Signal::Failed,
                Action::IgnoreError(inner) => act.frames.push(Frame::new(Rc::clone(inner), Guard::IgnoreError)),
                Action::Retry { limit, delay, body } => act.frames.push(Frame::new(
                    Rc::clone(body),
                    Guard::Retry {
                        remaining: *limit,
                        delay: *delay,
                    },
                )),
            }
        }
    }

    fn child_request(&mut self, operation: &str, activation: ActivationId, token: u64) -> Request {
        let id = self.next_request_id();
        let on_success = Rc::clone(&self.mailbox);
        let on_error = Rc::clone(&self.mailbox);
        Request::new(
            id,
            operation,
            self.clock.now(),
            Box::new(move |_| {
                on_success.borrow_mut().push_back(Message {
                    activation,
                    token,
                    outcome: ReplyKind::Success,
                });
            }),
            Box::new(move |_| {
                on_error.borrow_mut().push_back(Message {
                    activation,
                    token,
                    outcome: ReplyKind::Error,
                });
            }),
        )
    }
}
