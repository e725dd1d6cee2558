//! Requests and the reply protocol.
//!
//! A request carries two single-use reply sinks. Exactly one of them fires,
//! exactly once, over the request's lifetime; replying twice is an engine
//! bug and panics.

use std::fmt;

use crate::clock::SimTime;

/// Identifier of a request, unique within a simulation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a request inside a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestStatus {
    /// Created, not yet seen by a service.
    Arrived,
    /// Declined by the throttling policy. Terminal.
    Rejected,
    /// Waiting in the service queue.
    Queued,
    /// Taken out of the queue; a worker has been reserved.
    Dequeued,
    /// Its operation is running.
    Processing,
    /// Operation finished successfully. Terminal.
    Completed,
    /// Operation failed. Terminal.
    Failed,
}

impl RequestStatus {
    /// Returns true for states with no outgoing transition.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Completed | Self::Failed)
    }
}

/// Which sink was fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplyKind {
    /// `reply_success` was called.
    Success,
    /// `reply_error` was called.
    Error,
}

/// Single-use reply sink.
pub type ReplySink = Box<dyn FnOnce(RequestId)>;

/// A unit of work flowing through a service.
pub struct Request {
    id: RequestId,
    operation: String,
    arrival: SimTime,
    status: RequestStatus,
    on_success: Option<ReplySink>,
    on_error: Option<ReplySink>,
    reply: Option<ReplyKind>,
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("operation", &self.operation)
            .field("arrival", &self.arrival)
            .field("status", &self.status)
            .field("reply", &self.reply)
            .finish_non_exhaustive()
    }
}

impl Request {
    /// Creates a request for `operation`, arrived at `arrival`.
    pub fn new(
        id: RequestId,
        operation: impl Into<String>,
        arrival: SimTime,
        on_success: ReplySink,
        on_error: ReplySink,
    ) -> Self {
        Self {
            id,
            operation: operation.into(),
            arrival,
            status: RequestStatus::Arrived,
            on_success: Some(on_success),
            on_error: Some(on_error),
            reply: None,
        }
    }

    /// Creates a request whose replies are ignored.
    pub fn detached(id: RequestId, operation: impl Into<String>, arrival: SimTime) -> Self {
        Self::new(id, operation, arrival, Box::new(|_| {}), Box::new(|_| {}))
    }

    /// Request identifier.
    #[must_use]
    pub const fn id(&self) -> RequestId {
        self.id
    }

    /// Name of the operation this request targets.
    #[must_use]
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Virtual time at which the request arrived.
    #[must_use]
    pub const fn arrival(&self) -> SimTime {
        self.arrival
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn status(&self) -> RequestStatus {
        self.status
    }

    /// The reply sent so far, if any.
    #[must_use]
    pub const fn reply(&self) -> Option<ReplyKind> {
        self.reply
    }

    /// Returns true once either sink has fired.
    #[must_use]
    pub const fn is_replied(&self) -> bool {
        self.reply.is_some()
    }

    pub(crate) fn set_status(&mut self, status: RequestStatus) {
        debug_assert!(
            !self.status.is_terminal(),
            "request {} moved out of terminal state {:?}",
            self.id,
            self.status
        );
        self.status = status;
    }

    /// Fires the success sink.
    ///
    /// # Panics
    ///
    /// Panics if the request was already replied to.
    pub fn reply_success(&mut self) {
        self.fire(ReplyKind::Success);
    }

    /// Fires the error sink.
    ///
    /// # Panics
    ///
    /// Panics if the request was already replied to.
    pub fn reply_error(&mut self) {
        self.fire(ReplyKind::Error);
    }

    fn fire(&mut self, kind: ReplyKind) {
        if let Some(previous) = self.reply {
            panic!("request {} replied {kind:?} after {previous:?}", self.id);
        }
        self.reply = Some(kind);
        let success = self.on_success.take();
        let error = self.on_error.take();
        let sink = match kind {
            ReplyKind::Success => success,
            ReplyKind::Error => error,
        };
        if let Some(sink) = sink {
            sink(self.id);
        }
    }
}
