//! AST node definitions.

use serde::{Deserialize, Serialize};

use crate::clock::SimTime;
use crate::throttling::ThrottlingSpec;

/// A complete architecture description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    /// Format version (e.g., "1.0").
    pub version: String,

    /// Top-level definitions, evaluated in order.
    pub body: Vec<Expression>,
}

impl Program {
    /// Current format version.
    pub const CURRENT_VERSION: &'static str = "1.0";

    /// Creates a program at the current version.
    #[must_use]
    pub fn new(body: Vec<Expression>) -> Self {
        Self {
            version: Self::CURRENT_VERSION.to_string(),
            body,
        }
    }

    /// Stable content hash of the program, as lowercase hex.
    ///
    /// Two programs with the same fingerprint simulate identically.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        // Serializing plain structs and enums into a Vec cannot fail.
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        blake3::hash(&bytes).to_hex().to_string()
    }
}

/// All node kinds.
///
/// Definition nodes (`DefineService`, `Settings`, `DefineOperation`) appear
/// at program or service level; the remaining nodes are actions and appear
/// only inside an operation body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum Expression {
    /// Define a service with its own scope.
    DefineService {
        /// Service name.
        name: String,
        /// Settings and operations of the service.
        body: Vec<Expression>,
    },

    /// Override the worker count and/or throttling policy in the current scope.
    Settings {
        /// Number of workers.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        workers: Option<usize>,
        /// Admission-control policy.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        throttling: Option<ThrottlingSpec>,
    },

    /// Define a named operation.
    DefineOperation {
        /// Operation name.
        name: String,
        /// Actions run when the operation is invoked.
        body: Vec<Expression>,
    },

    /// Keep the worker busy for `duration` time units.
    Think {
        /// Processing time.
        duration: SimTime,
    },

    /// Call an operation on another service and wait for its reply.
    Invoke {
        /// Target service.
        service: String,
        /// Target operation.
        operation: String,
        /// Give up after this long.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout: Option<SimTime>,
    },

    /// Send a request to another service without waiting.
    Trigger {
        /// Target service.
        service: String,
        /// Target operation.
        operation: String,
    },

    /// Fail the current operation.
    Fail,

    /// Run `body`, swallowing any failure.
    IgnoreError {
        /// Protected actions.
        body: Vec<Expression>,
    },

    /// Run `body`, rerunning it after `delay` on failure, at most `limit` more times.
    Retry {
        /// Extra attempts after the first one.
        limit: u32,
        /// Wait between attempts.
        #[serde(default)]
        delay: SimTime,
        /// Retried actions.
        body: Vec<Expression>,
    },

    /// Group of actions run in order.
    Sequence {
        /// Grouped actions.
        body: Vec<Expression>,
    },
}

impl Expression {
    /// `DefineService` node.
    pub fn define_service(name: impl Into<String>, body: Vec<Self>) -> Self {
        Self::DefineService {
            name: name.into(),
            body,
        }
    }

    /// `DefineOperation` node.
    pub fn define_operation(name: impl Into<String>, body: Vec<Self>) -> Self {
        Self::DefineOperation {
            name: name.into(),
            body,
        }
    }

    /// `Settings` node.
    #[must_use]
    pub const fn settings(workers: Option<usize>, throttling: Option<ThrottlingSpec>) -> Self {
        Self::Settings { workers, throttling }
    }

    /// `Think` node.
    #[must_use]
    pub const fn think(duration: SimTime) -> Self {
        Self::Think { duration }
    }

    /// `Invoke` node without timeout.
    pub fn invoke(service: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Invoke {
            service: service.into(),
            operation: operation.into(),
            timeout: None,
        }
    }

    /// `Invoke` node with a timeout.
    pub fn invoke_with_timeout(
        service: impl Into<String>,
        operation: impl Into<String>,
        timeout: SimTime,
    ) -> Self {
        Self::Invoke {
            service: service.into(),
            operation: operation.into(),
            timeout: Some(timeout),
        }
    }

    /// `Trigger` node.
    pub fn trigger(service: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Trigger {
            service: service.into(),
            operation: operation.into(),
        }
    }

    /// Node kind, as it appears in the JSON `node` tag.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::DefineService { .. } => "define_service",
            Self::Settings { .. } => "settings",
            Self::DefineOperation { .. } => "define_operation",
            Self::Think { .. } => "think",
            Self::Invoke { .. } => "invoke",
            Self::Trigger { .. } => "trigger",
            Self::Fail => "fail",
            Self::IgnoreError { .. } => "ignore_error",
            Self::Retry { .. } => "retry",
            Self::Sequence { .. } => "sequence",
        }
    }

    /// Returns true for nodes that only make sense inside an operation body.
    #[must_use]
    pub const fn is_action(&self) -> bool {
        !matches!(
            self,
            Self::DefineService { .. } | Self::Settings { .. } | Self::DefineOperation { .. }
        )
    }
}
