//! Admission control.
//!
//! A throttling policy sits in front of a service's queue and decides, for
//! each arriving request, whether it may be queued at all. Policies are
//! chosen by configuration through [`ThrottlingSpec`]; every service gets
//! its own policy instance.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Decides whether an arriving request may enter a service's queue.
pub trait ThrottlingPolicy: fmt::Debug {
    /// Short policy name, for logs and reports.
    fn name(&self) -> &'static str;

    /// Called once per arriving request, before queueing. Every `false`
    /// increments the rejection count by one.
    fn accepts(&mut self, queue_length: usize, busy_workers: usize) -> bool;

    /// Number of rejected arrivals so far. Never decreases.
    fn rejection_count(&self) -> u64;
}

/// Policy that admits every request.
#[derive(Debug, Default, Clone)]
pub struct NoThrottling;

impl ThrottlingPolicy for NoThrottling {
    fn name(&self) -> &'static str {
        "none"
    }

    fn accepts(&mut self, _queue_length: usize, _busy_workers: usize) -> bool {
        true
    }

    fn rejection_count(&self) -> u64 {
        0
    }
}

/// Tail drop: admit everything until the queue holds `capacity` requests,
/// then drop every arrival until the queue has drained to `resume_at` or
/// fewer waiting requests.
///
/// With the default `resume_at = capacity - 1` this is plain tail drop: a
/// request is admitted exactly when the queue is shorter than `capacity`.
#[derive(Debug, Clone)]
pub struct TailDrop {
    capacity: usize,
    resume_at: usize,
    dropping: bool,
    rejections: u64,
}

impl TailDrop {
    /// Plain tail drop with the given queue capacity.
    #[must_use]
    pub const fn new(capacity: usize) -> Self {
        Self::with_hysteresis(capacity, capacity.saturating_sub(1))
    }

    /// Tail drop that keeps dropping, once full, until the queue length
    /// falls to `resume_at`.
    #[must_use]
    pub const fn with_hysteresis(capacity: usize, resume_at: usize) -> Self {
        Self {
            capacity,
            resume_at,
            dropping: false,
            rejections: 0,
        }
    }

    /// Queue length at which dropping starts.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Queue length at or below which dropping stops.
    #[must_use]
    pub const fn resume_at(&self) -> usize {
        self.resume_at
    }

    /// Returns true while the policy is dropping arrivals.
    #[must_use]
    pub const fn is_dropping(&self) -> bool {
        self.dropping
    }
}

impl ThrottlingPolicy for TailDrop {
    fn name(&self) -> &'static str {
        "tail-drop"
    }

    fn accepts(&mut self, queue_length: usize, _busy_workers: usize) -> bool {
        if self.dropping && queue_length <= self.resume_at {
            self.dropping = false;
        }
        if !self.dropping && queue_length >= self.capacity {
            self.dropping = true;
        }
        if self.dropping {
            self.rejections += 1;
        }
        !self.dropping
    }

    fn rejection_count(&self) -> u64 {
        self.rejections
    }
}

/// Configuration-level description of a throttling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum ThrottlingSpec {
    /// Admit every request.
    #[default]
    None,

    /// Tail drop at `capacity` queued requests.
    TailDrop {
        /// Queue length at which arrivals start being dropped.
        capacity: usize,
        /// Queue length at or below which arrivals are admitted again.
        /// Defaults to `capacity - 1`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resume_at: Option<usize>,
    },
}

impl ThrottlingSpec {
    /// Plain tail drop with the given capacity.
    #[must_use]
    pub const fn tail_drop(capacity: usize) -> Self {
        Self::TailDrop {
            capacity,
            resume_at: None,
        }
    }

    /// Validates thresholds.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match *self {
            Self::None => Ok(()),
            Self::TailDrop { capacity, resume_at } => {
                if capacity == 0 {
                    return Err(ValidationError::InvalidValue {
                        field: "capacity".to_string(),
                        reason: "tail-drop capacity must be > 0".to_string(),
                    });
                }
                if let Some(resume_at) = resume_at {
                    if resume_at >= capacity {
                        return Err(ValidationError::InvalidValue {
                            field: "resume_at".to_string(),
                            reason: format!("must be below capacity ({capacity})"),
                        });
                    }
                }
                Ok(())
            }
        }
    }

    /// Builds a fresh policy instance.
    #[must_use]
    pub fn build(&self) -> Box<dyn ThrottlingPolicy> {
        match *self {
            Self::None => Box::new(NoThrottling),
            Self::TailDrop { capacity, resume_at } => match resume_at {
                Some(resume_at) => Box::new(TailDrop::with_hysteresis(capacity, resume_at)),
                None => Box::new(TailDrop::new(capacity)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_throttling_never_rejects() {
        let mut policy = NoThrottling;
        for queue_length in [0, 10, 10_000] {
            assert!(policy.accepts(queue_length, 5));
        }
        assert_eq!(policy.rejection_count(), 0);
    }

    #[test]
    fn tail_drop_rejects_at_capacity() {
        let mut policy = TailDrop::new(10);
        assert!(policy.accepts(9, 1));
        assert!(!policy.accepts(10, 1));
        assert_eq!(policy.rejection_count(), 1);
    }

    #[test]
    fn tail_drop_admits_again_once_below_capacity() {
        let mut policy = TailDrop::new(3);
        assert!(!policy.accepts(3, 1));
        assert!(!policy.accepts(4, 1));
        assert!(policy.accepts(2, 1));
        assert_eq!(policy.rejection_count(), 2);
    }

    #[test]
    fn hysteresis_keeps_dropping_until_drained() {
        let mut policy = TailDrop::with_hysteresis(5, 2);
        assert!(policy.accepts(4, 1));
        assert!(!policy.accepts(5, 1));
        assert!(policy.is_dropping());
        // Below capacity but above the resume threshold: still dropping.
        assert!(!policy.accepts(4, 1));
        assert!(!policy.accepts(3, 1));
        assert!(policy.accepts(2, 1));
        assert!(!policy.is_dropping());
        assert!(policy.accepts(4, 1));
        assert_eq!(policy.rejection_count(), 3);
    }

    #[test]
    fn rejection_count_grows_by_one_per_rejection() {
        let mut policy = TailDrop::new(1);
        let before = policy.rejection_count();
        for _ in 0..7 {
            assert!(!policy.accepts(1, 1));
        }
        assert_eq!(policy.rejection_count(), before + 7);
    }

    #[test]
    fn spec_builds_matching_policy() {
        let policy = ThrottlingSpec::tail_drop(4).build();
        assert_eq!(policy.name(), "tail-drop");
        assert_eq!(ThrottlingSpec::None.build().name(), "none");
    }

    #[test]
    fn spec_validation() {
        ThrottlingSpec::None.validate().unwrap();
        ThrottlingSpec::tail_drop(1).validate().unwrap();
        assert!(ThrottlingSpec::tail_drop(0).validate().is_err());
        assert!(ThrottlingSpec::TailDrop {
            capacity: 4,
            resume_at: Some(4),
        }
        .validate()
        .is_err());
    }

    #[test]
    fn spec_json_shape() {
        let spec: ThrottlingSpec =
            serde_json::from_str(r#"{"policy":"tail_drop","capacity":10}"#).unwrap();
        assert_eq!(spec, ThrottlingSpec::tail_drop(10));
        let none: ThrottlingSpec = serde_json::from_str(r#"{"policy":"none"}"#).unwrap();
        assert_eq!(none, ThrottlingSpec::None);
    }
}
