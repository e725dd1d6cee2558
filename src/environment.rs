//! Lexical scopes.
//!
//! An [`Environment`] maps symbol names to [`Binding`]s and may have a
//! parent. Lookups walk outwards; definitions always land in the local
//! scope, so a child never changes what its parent sees.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::error::ConfigurationError;
use crate::evaluation::Operation;
use crate::service::ServiceId;
use crate::throttling::ThrottlingSpec;

/// Well-known symbols.
pub mod symbols {
    /// Throttling policy used by services created in this scope.
    pub const QUEUE: &str = "QUEUE";
    /// Worker count used by services created in this scope.
    pub const WORKERS: &str = "WORKERS";
    /// The service whose body is being evaluated.
    pub const SELF: &str = "SELF";
    /// Built-in operation that does nothing.
    pub const NOOP: &str = "NOOP";
}

/// A value bound to a symbol.
#[derive(Debug, Clone)]
pub enum Binding {
    /// An invocable operation.
    Operation(Rc<Operation>),
    /// A throttling policy description.
    Throttling(ThrottlingSpec),
    /// A worker count.
    Workers(usize),
    /// A service of the running simulation.
    Service(ServiceId),
}

impl Binding {
    /// Human-readable kind, used in type-mismatch errors.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Operation(_) => "operation",
            Self::Throttling(_) => "throttling policy",
            Self::Workers(_) => "worker count",
            Self::Service(_) => "service",
        }
    }
}

struct Scope {
    parent: Option<Environment>,
    bindings: RefCell<HashMap<String, Binding>>,
}

/// Shared handle to a scope. Cloning the handle shares the scope.
#[derive(Clone)]
pub struct Environment(Rc<Scope>);

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self.0.bindings.borrow().keys().cloned().collect();
        names.sort();
        f.debug_struct("Environment")
            .field("depth", &self.depth())
            .field("symbols", &names)
            .finish()
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment {
    /// Creates an empty root scope.
    #[must_use]
    pub fn new() -> Self {
        Self(Rc::new(Scope {
            parent: None,
            bindings: RefCell::new(HashMap::new()),
        }))
    }

    /// Creates a child scope whose lookups fall back to `self`.
    #[must_use]
    pub fn create_local_environment(&self) -> Self {
        Self(Rc::new(Scope {
            parent: Some(self.clone()),
            bindings: RefCell::new(HashMap::new()),
        }))
    }

    /// Binds `name` in this scope. Redefinition overwrites silently.
    pub fn define(&self, name: impl Into<String>, binding: Binding) {
        self.0.bindings.borrow_mut().insert(name.into(), binding);
    }

    /// Finds the innermost binding of `name`.
    pub fn lookup(&self, name: &str) -> Result<Binding, ConfigurationError> {
        let mut scope = Some(self);
        while let Some(env) = scope {
            if let Some(binding) = env.0.bindings.borrow().get(name) {
                return Ok(binding.clone());
            }
            scope = env.0.parent.as_ref();
        }
        Err(ConfigurationError::UnboundSymbol {
            symbol: name.to_string(),
        })
    }

    /// Returns the binding of `name` in this scope only.
    #[must_use]
    pub fn lookup_local(&self, name: &str) -> Option<Binding> {
        self.0.bindings.borrow().get(name).cloned()
    }

    /// Returns true if `name` resolves in this scope or an ancestor.
    #[must_use]
    pub fn is_defined(&self, name: &str) -> bool {
        self.lookup(name).is_ok()
    }

    /// The enclosing scope, if any.
    #[must_use]
    pub fn parent(&self) -> Option<&Self> {
        self.0.parent.as_ref()
    }

    /// Number of ancestors.
    #[must_use]
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut scope = self.parent();
        while let Some(env) = scope {
            depth += 1;
            scope = env.parent();
        }
        depth
    }

    /// Looks up `name` and requires an operation.
    pub fn lookup_operation(&self, name: &str) -> Result<Rc<Operation>, ConfigurationError> {
        match self.lookup(name)? {
            Binding::Operation(op) => Ok(op),
            other => Err(mismatch(name, "operation", &other)),
        }
    }

    /// Looks up `name` and requires a throttling policy.
    pub fn lookup_throttling(&self, name: &str) -> Result<ThrottlingSpec, ConfigurationError> {
        match self.lookup(name)? {
            Binding::Throttling(spec) => Ok(spec),
            other => Err(mismatch(name, "throttling policy", &other)),
        }
    }

    /// Looks up `name` and requires a worker count.
    pub fn lookup_workers(&self, name: &str) -> Result<usize, ConfigurationError> {
        match self.lookup(name)? {
            Binding::Workers(count) => Ok(count),
            other => Err(mismatch(name, "worker count", &other)),
        }
    }

    /// Looks up `name` and requires a service.
    pub fn lookup_service(&self, name: &str) -> Result<ServiceId, ConfigurationError> {
        match self.lookup(name)? {
            Binding::Service(id) => Ok(id),
            other => Err(mismatch(name, "service", &other)),
        }
    }
}

fn mismatch(symbol: &str, expected: &'static str, found: &Binding) -> ConfigurationError {
    ConfigurationError::TypeMismatch {
        symbol: symbol.to_string(),
        expected,
        found: found.kind(),
    }
}
