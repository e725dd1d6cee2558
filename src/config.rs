//! Simulation configuration.

use serde::{Deserialize, Serialize};

use crate::clock::SimTime;
use crate::error::{SimError, SimResult, ValidationError};
use crate::throttling::ThrottlingSpec;

/// Defaults and limits applied to every simulation a factory builds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Workers of a service that does not say otherwise.
    pub default_workers: usize,
    /// Throttling policy of a service that does not say otherwise.
    pub default_throttling: ThrottlingSpec,
    /// Sample every service this often. `None` disables sampling.
    pub monitoring_period: Option<SimTime>,
    /// Work budget over the simulation's life. Dispatched events, deliveries
    /// and request starts each cost one step; once spent, runs stop early and
    /// nothing further happens.
    pub max_events: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            default_workers: 1,
            default_throttling: ThrottlingSpec::None,
            monitoring_period: None,
            max_events: None,
        }
    }
}

impl SimulationConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.default_workers == 0 {
            return Err(ValidationError::InvalidValue {
                field: "default_workers".to_string(),
                reason: "must be > 0".to_string(),
            });
        }
        if self.monitoring_period == Some(0) {
            return Err(ValidationError::InvalidValue {
                field: "monitoring_period".to_string(),
                reason: "must be > 0".to_string(),
            });
        }
        if self.max_events == Some(0) {
            return Err(ValidationError::InvalidValue {
                field: "max_events".to_string(),
                reason: "must be > 0".to_string(),
            });
        }
        self.default_throttling.validate()
    }

    /// Parse and validate a JSON configuration. Missing fields take their
    /// default value.
    pub fn from_json(s: &str) -> SimResult<Self> {
        let config = serde_json::from_str::<Self>(s)
            .map_err(|e| SimError::internal(format!("deserialize config: {e}")))?;
        config.validate()?;
        Ok(config)
    }
}
