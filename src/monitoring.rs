//! Statistics sinks.
//!
//! The simulation hands every service a [`Report`] obtained from a
//! [`DataStorage`] when the service is created, and never looks inside it
//! again. [`InMemoryStorage`] keeps everything in memory for tests and
//! embedded use.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::clock::SimTime;
use crate::requests::ReplyKind;

/// Periodic snapshot of one service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    /// When the snapshot was taken.
    pub time: SimTime,
    /// Requests waiting in the queue.
    pub queue_length: usize,
    /// Busy workers.
    pub busy_workers: usize,
    /// Total workers.
    pub capacity: usize,
    /// Rejections so far.
    pub rejections: u64,
}

/// Per-service statistics sink.
pub trait Report {
    /// A request reached the service.
    fn record_arrival(&mut self, time: SimTime);

    /// The throttling policy turned a request away.
    fn record_rejection(&mut self, time: SimTime);

    /// A processed request was replied to, `response_time` after arriving.
    fn record_outcome(&mut self, time: SimTime, outcome: ReplyKind, response_time: SimTime);

    /// A periodic snapshot.
    fn record_sample(&mut self, sample: Sample);
}

/// Source of per-service reports.
pub trait DataStorage {
    /// Returns the report that will receive statistics for `service`.
    fn report_for(&mut self, service: &str) -> Box<dyn Report>;
}

/// Storage that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStorage;

impl DataStorage for NullStorage {
    fn report_for(&mut self, _service: &str) -> Box<dyn Report> {
        Box::new(NullReport)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct NullReport;

impl Report for NullReport {
    fn record_arrival(&mut self, _time: SimTime) {}
    fn record_rejection(&mut self, _time: SimTime) {}
    fn record_outcome(&mut self, _time: SimTime, _outcome: ReplyKind, _response_time: SimTime) {}
    fn record_sample(&mut self, _sample: Sample) {}
}

/// Aggregated statistics of one service.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatistics {
    /// Requests that reached the service.
    pub arrivals: u64,
    /// Requests turned away by the throttling policy.
    pub rejections: u64,
    /// Requests processed successfully.
    pub successes: u64,
    /// Requests whose operation failed.
    pub failures: u64,
    /// Sum of response times of processed requests.
    pub total_response_time: SimTime,
    /// Longest response time seen.
    pub max_response_time: SimTime,
    /// Time of the last recorded event.
    pub last_update: SimTime,
    /// Periodic snapshots, in time order.
    pub samples: Vec<Sample>,
}

impl ServiceStatistics {
    /// Requests that got a reply after processing.
    #[must_use]
    pub const fn processed(&self) -> u64 {
        self.successes + self.failures
    }

    /// Mean response time of processed requests.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mean_response_time(&self) -> Option<f64> {
        match self.processed() {
            0 => None,
            n => Some(self.total_response_time as f64 / n as f64),
        }
    }

    /// Successful requests per time unit over `elapsed`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn throughput(&self, elapsed: SimTime) -> f64 {
        if elapsed == 0 {
            0.0
        } else {
            self.successes as f64 / elapsed as f64
        }
    }

    /// Fraction of arrivals that were rejected.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn rejection_rate(&self) -> f64 {
        if self.arrivals == 0 {
            0.0
        } else {
            self.rejections as f64 / self.arrivals as f64
        }
    }
}

struct SharedReport(Rc<RefCell<ServiceStatistics>>);

impl Report for SharedReport {
    fn record_arrival(&mut self, time: SimTime) {
        let mut stats = self.0.borrow_mut();
        stats.arrivals += 1;
        stats.last_update = time;
    }

    fn record_rejection(&mut self, time: SimTime) {
        let mut stats = self.0.borrow_mut();
        stats.rejections += 1;
        stats.last_update = time;
    }

    fn record_outcome(&mut self, time: SimTime, outcome: ReplyKind, response_time: SimTime) {
        let mut stats = self.0.borrow_mut();
        match outcome {
            ReplyKind::Success => stats.successes += 1,
            ReplyKind::Error => stats.failures += 1,
        }
        stats.total_response_time += response_time;
        stats.max_response_time = stats.max_response_time.max(response_time);
        stats.last_update = time;
    }

    fn record_sample(&mut self, sample: Sample) {
        let mut stats = self.0.borrow_mut();
        stats.last_update = sample.time;
        stats.samples.push(sample);
    }
}

/// In-memory storage whose statistics stay readable after the run.
///
/// Clones share the same statistics, so a test can keep one handle and give
/// the other to the simulation.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStorage {
    services: Rc<RefCell<BTreeMap<String, Rc<RefCell<ServiceStatistics>>>>>,
}

impl InMemoryStorage {
    /// Creates empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the statistics recorded for `service`.
    #[must_use]
    pub fn statistics(&self, service: &str) -> Option<ServiceStatistics> {
        self.services
            .borrow()
            .get(service)
            .map(|stats| stats.borrow().clone())
    }

    /// Names of every service that asked for a report, sorted.
    #[must_use]
    pub fn services(&self) -> Vec<String> {
        self.services.borrow().keys().cloned().collect()
    }

    /// All statistics as JSON, keyed by service name.
    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        let snapshot: BTreeMap<String, ServiceStatistics> = self
            .services
            .borrow()
            .iter()
            .map(|(name, stats)| (name.clone(), stats.borrow().clone()))
            .collect();
        serde_json::to_value(snapshot)
    }
}

impl DataStorage for InMemoryStorage {
    fn report_for(&mut self, service: &str) -> Box<dyn Report> {
        let stats = Rc::clone(
            self.services
                .borrow_mut()
                .entry(service.to_string())
                .or_default(),
        );
        Box::new(SharedReport(stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_accumulates_into_shared_statistics() {
        let storage = InMemoryStorage::new();
        let mut report = storage.clone().report_for("DB");

        report.record_arrival(1);
        report.record_arrival(2);
        report.record_rejection(2);
        report.record_outcome(6, ReplyKind::Success, 5);
        report.record_outcome(9, ReplyKind::Error, 7);

        let stats = storage.statistics("DB").unwrap();
        assert_eq!(stats.arrivals, 2);
        assert_eq!(stats.rejections, 1);
        assert_eq!(stats.successes, 1);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.max_response_time, 7);
        assert_eq!(stats.mean_response_time(), Some(6.0));
        assert_eq!(stats.last_update, 9);
        assert!((stats.rejection_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn unknown_service_has_no_statistics() {
        let storage = InMemoryStorage::new();
        assert!(storage.statistics("nope").is_none());
        assert!(storage.services().is_empty());
    }

    #[test]
    fn throughput_over_elapsed_time() {
        let stats = ServiceStatistics {
            successes: 10,
            ..ServiceStatistics::default()
        };
        assert!((stats.throughput(5) - 2.0).abs() < f64::EPSILON);
        assert!(stats.throughput(0).abs() < f64::EPSILON);
        assert_eq!(stats.mean_response_time(), Some(0.0));
    }

    #[test]
    fn samples_are_kept_in_order() {
        let storage = InMemoryStorage::new();
        let mut report = storage.clone().report_for("API");
        for time in [10, 20, 30] {
            report.record_sample(Sample {
                time,
                queue_length: 1,
                busy_workers: 1,
                capacity: 2,
                rejections: 0,
            });
        }
        let times: Vec<_> = storage
            .statistics("API")
            .unwrap()
            .samples
            .iter()
            .map(|s| s.time)
            .collect();
        assert_eq!(times, vec![10, 20, 30]);
        let json = storage.to_json().unwrap();
        assert_eq!(json["API"]["samples"].as_array().unwrap().len(), 3);
    }
}
