//! Services: a throttling policy in front of a FIFO queue in front of a
//! worker pool.
//!
//! A [`Service`] owns the admission and capacity bookkeeping of one node of
//! the architecture. Running operations is left to the simulation, which
//! asks the service for the next request it may start.

use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::clock::SimTime;
use crate::environment::Environment;
use crate::error::ConfigurationError;
use crate::evaluation::Operation;
use crate::monitoring::{Report, Sample};
use crate::requests::{ReplyKind, Request, RequestStatus};
use crate::tasks::TaskPool;
use crate::throttling::ThrottlingPolicy;

/// Index of a service within its simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ServiceId(pub usize);

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "service-{}", self.0)
    }
}

/// Outcome of submitting a request to a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The request waits in the queue.
    Queued,
    /// The throttling policy declined it; it has been sent `reply_error`.
    Rejected,
}

/// One service of the simulated architecture.
pub struct Service {
    id: ServiceId,
    name: String,
    pool: TaskPool,
    queue: VecDeque<Request>,
    policy: Box<dyn ThrottlingPolicy>,
    environment: Environment,
    report: Box<dyn Report>,
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("pool", &self.pool)
            .field("queue_length", &self.queue.len())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Service {
    /// Creates a service with an empty queue and idle workers.
    pub fn new(
        id: ServiceId,
        name: impl Into<String>,
        environment: Environment,
        pool: TaskPool,
        policy: Box<dyn ThrottlingPolicy>,
        report: Box<dyn Report>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            pool,
            queue: VecDeque::new(),
            policy,
            environment,
            report,
        }
    }

    /// Service identifier.
    #[must_use]
    pub const fn id(&self) -> ServiceId {
        self.id
    }

    /// Service name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The worker pool.
    #[must_use]
    pub const fn pool(&self) -> &TaskPool {
        &self.pool
    }

    /// The throttling policy.
    #[must_use]
    pub fn policy(&self) -> &dyn ThrottlingPolicy {
        self.policy.as_ref()
    }

    /// The service's own scope.
    #[must_use]
    pub const fn environment(&self) -> &Environment {
        &self.environment
    }

    /// Requests waiting for a worker.
    #[must_use]
    pub fn queue_length(&self) -> usize {
        self.queue.len()
    }

    /// Rejections so far.
    #[must_use]
    pub fn rejection_count(&self) -> u64 {
        self.policy.rejection_count()
    }

    /// Finds the operation `name` as seen from this service.
    pub fn lookup_operation(&self, name: &str) -> Result<Rc<Operation>, ConfigurationError> {
        self.environment.lookup_operation(name).map_err(|err| match err {
            ConfigurationError::UnboundSymbol { .. } => ConfigurationError::UndefinedOperation {
                service: self.name.clone(),
                operation: name.to_string(),
            },
            other => other,
        })
    }

    /// Admits or rejects an arriving request.
    ///
    /// A rejected request gets `reply_error` before this returns and never
    /// touches the queue. An admitted one is appended to the queue; call
    /// [`Service::dequeue_ready`] to start it.
    pub fn process(&mut self, mut request: Request, now: SimTime) -> Admission {
        self.report.record_arrival(now);
        if self.policy.accepts(self.queue.len(), self.pool.busy()) {
            trace!(service = %self.name, request = %request.id(), now, "queued");
            request.set_status(RequestStatus::Queued);
            self.queue.push_back(request);
            Admission::Queued
        } else {
            debug!(
                service = %self.name,
                request = %request.id(),
                now,
                queue_length = self.queue.len(),
                policy = self.policy.name(),
                "rejected"
            );
            request.set_status(RequestStatus::Rejected);
            self.report.record_rejection(now);
            request.reply_error();
            Admission::Rejected
        }
    }

    /// Takes the oldest waiting request if a worker is idle, reserving the
    /// worker for it.
    pub fn dequeue_ready(&mut self) -> Option<Request> {
        if !self.pool.has_idle() {
            return None;
        }
        let mut request = self.queue.pop_front()?;
        let acquired = self.pool.acquire_one();
        assert!(acquired, "dequeue without a free worker in service '{}'", self.name);
        request.set_status(RequestStatus::Dequeued);
        trace!(service = %self.name, request = %request.id(), busy = self.pool.busy(), "dequeued");
        Some(request)
    }

    /// Frees the worker of a finished request, replies to it and records the
    /// outcome.
    pub fn complete(&mut self, mut request: Request, outcome: ReplyKind, now: SimTime) {
        self.pool.release_one();
        let response_time = now.saturating_sub(request.arrival());
        match outcome {
            ReplyKind::Success => {
                request.set_status(RequestStatus::Completed);
                request.reply_success();
            }
            ReplyKind::Error => {
                request.set_status(RequestStatus::Failed);
                request.reply_error();
            }
        }
        trace!(service = %self.name, request = %request.id(), ?outcome, response_time, "completed");
        self.report.record_outcome(now, outcome, response_time);
    }

    /// Records a snapshot of the current load.
    pub fn sample(&mut self, now: SimTime) {
        let sample = Sample {
            time: now,
            queue_length: self.queue.len(),
            busy_workers: self.pool.busy(),
            capacity: self.pool.capacity(),
            rejections: self.policy.rejection_count(),
        };
        self.report.record_sample(sample);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::RefCell;

    use crate::monitoring::{DataStorage, InMemoryStorage};
    use crate::requests::RequestId;
    use crate::throttling::{NoThrottling, TailDrop};

    type Log = Rc<RefCell<Vec<(RequestId, ReplyKind)>>>;

    fn request(log: &Log, id: u64) -> Request {
        let ok = Rc::clone(log);
        let err = Rc::clone(log);
        Request::new(
            RequestId(id),
            "NOOP",
            0,
            Box::new(move |id| ok.borrow_mut().push((id, ReplyKind::Success))),
            Box::new(move |id| err.borrow_mut().push((id, ReplyKind::Error))),
        )
    }

    fn service(workers: usize, policy: Box<dyn ThrottlingPolicy>, storage: &InMemoryStorage) -> Service {
        Service::new(
            ServiceId(0),
            "DB",
            Environment::new(),
            TaskPool::new(workers),
            policy,
            storage.clone().report_for("DB"),
        )
    }

    #[test]
    fn rejected_request_gets_exactly_one_error_and_no_queueing() {
        let storage = InMemoryStorage::new();
        let log: Log = Rc::default();
        let mut service = service(1, Box::new(TailDrop::new(10)), &storage);

        // One busy worker and ten waiting requests.
        assert_eq!(service.process(request(&log, 0), 0), Admission::Queued);
        let running = service.dequeue_ready().unwrap();
        for id in 1..=10 {
            assert_eq!(service.process(request(&log, id), 0), Admission::Queued);
        }
        assert_eq!(service.queue_length(), 10);
        assert_eq!(service.pool().busy(), 1);

        let before = service.rejection_count();
        assert_eq!(service.process(request(&log, 99), 1), Admission::Rejected);
        assert_eq!(service.rejection_count(), before + 1);
        assert_eq!(service.queue_length(), 10);
        assert_eq!(*log.borrow(), vec![(RequestId(99), ReplyKind::Error)]);
        assert_eq!(storage.statistics("DB").unwrap().rejections, 1);
        drop(running);
    }

    #[test]
    fn dequeue_is_fifo_and_bounded_by_workers() {
        let storage = InMemoryStorage::new();
        let log: Log = Rc::default();
        let mut service = service(2, Box::new(NoThrottling), &storage);
        for id in 0..4 {
            service.process(request(&log, id), 0);
        }

        let first = service.dequeue_ready().unwrap();
        let second = service.dequeue_ready().unwrap();
        assert!(service.dequeue_ready().is_none());
        assert_eq!((first.id(), second.id()), (RequestId(0), RequestId(1)));
        assert_eq!(first.status(), RequestStatus::Dequeued);

        service.complete(first, ReplyKind::Success, 4);
        let third = service.dequeue_ready().unwrap();
        assert_eq!(third.id(), RequestId(2));
        assert_eq!(*log.borrow(), vec![(RequestId(0), ReplyKind::Success)]);
        drop((second, third));
    }

    #[test]
    fn complete_records_response_time() {
        let storage = InMemoryStorage::new();
        let log: Log = Rc::default();
        let mut service = service(1, Box::new(NoThrottling), &storage);
        service.process(request(&log, 1), 0);
        let running = service.dequeue_ready().unwrap();
        service.complete(running, ReplyKind::Error, 8);

        let stats = storage.statistics("DB").unwrap();
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.max_response_time, 8);
        assert_eq!(service.pool().busy(), 0);
        assert_eq!(*log.borrow(), vec![(RequestId(1), ReplyKind::Error)]);
    }

    #[test]
    fn unknown_operation_names_the_service() {
        let storage = InMemoryStorage::new();
        let service = service(1, Box::new(NoThrottling), &storage);
        let err = service.lookup_operation("Select").unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::UndefinedOperation {
                service: "DB".to_string(),
                operation: "Select".to_string(),
            }
        );
    }

    #[test]
    fn sample_reflects_load() {
        let storage = InMemoryStorage::new();
        let log: Log = Rc::default();
        let mut service = service(1, Box::new(NoThrottling), &storage);
        service.process(request(&log, 1), 0);
        service.process(request(&log, 2), 0);
        let running = service.dequeue_ready().unwrap();
        service.sample(3);

        let sample = storage.statistics("DB").unwrap().samples[0];
        assert_eq!(sample.queue_length, 1);
        assert_eq!(sample.busy_workers, 1);
        assert_eq!(sample.capacity, 1);
        drop(running);
    }
}
