//! Job Registry
//!
//! Explicit name → definition table consumed by the runner.
//!
//! A registry is an ordinary object: build one, register handlers, and hand
//! it to a `Runner` behind an `Arc`. Nothing is process-global.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::job::{Args, LockPolicy};

/// Error type handlers may return
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result returned by a handler
pub type HandlerResult = std::result::Result<(), HandlerError>;

/// A job handler, invoked with the job's positional arguments
pub type Handler = Arc<dyn Fn(&[Value]) -> HandlerResult + Send + Sync>;

/// Computes a lock key from a job's arguments; `None` means no lock
pub type KeyResolver = Arc<dyn Fn(&Args) -> Option<String> + Send + Sync>;

/// How executions of a definition are serialized
#[derive(Clone, Default)]
pub enum Exclusive {
    /// Run fully concurrently
    #[default]
    None,

    /// One job with this name at a time
    WholeJob,

    /// One job per distinct value of this argument
    Field(String),

    /// One job per distinct key returned by the resolver
    Custom(KeyResolver),
}

impl Exclusive {
    /// Build a custom resolver policy
    pub fn custom<F>(resolver: F) -> Self
    where
        F: Fn(&Args) -> Option<String> + Send + Sync + 'static,
    {
        Exclusive::Custom(Arc::new(resolver))
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Exclusive::None)
    }
}

impl From<LockPolicy> for Exclusive {
    fn from(policy: LockPolicy) -> Self {
        match policy {
            LockPolicy::None => Exclusive::None,
            LockPolicy::WholeJob => Exclusive::WholeJob,
            LockPolicy::Field(name) => Exclusive::Field(name),
        }
    }
}

impl fmt::Debug for Exclusive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exclusive::None => f.write_str("None"),
            Exclusive::WholeJob => f.write_str("WholeJob"),
            Exclusive::Field(name) => f.debug_tuple("Field").field(name).finish(),
            Exclusive::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Options attached to a definition at registration time
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    pub exclusive: Exclusive,
}

impl JobOptions {
    pub fn exclusive(exclusive: Exclusive) -> Self {
        Self { exclusive }
    }
}

/// A registered job: its handler and options
pub struct JobDefinition {
    name: String,
    handler: Handler,
    options: JobOptions,
}

impl JobDefinition {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &JobOptions {
        &self.options
    }

    /// Run the handler
    pub fn call(&self, args: &[Value]) -> HandlerResult {
        (self.handler)(args)
    }
}

impl fmt::Debug for JobDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobDefinition")
            .field("name", &self.name)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Name → definition lookup table
#[derive(Default)]
pub struct Registry {
    definitions: RwLock<HashMap<String, Arc<JobDefinition>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a definition
    pub fn register<F>(&self, name: impl Into<String>, options: JobOptions, handler: F)
    where
        F: Fn(&[Value]) -> HandlerResult + Send + Sync + 'static,
    {
        let name = name.into();
        let definition = Arc::new(JobDefinition {
            name: name.clone(),
            handler: Arc::new(handler),
            options,
        });

        if self.definitions.write().insert(name.clone(), definition).is_some() {
            tracing::debug!(job_name = %name, "replaced job definition");
        }
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<JobDefinition>> {
        self.definitions.read().get(name).cloned()
    }

    /// Remove a definition, returning it if present
    pub fn unregister(&self, name: &str) -> Option<Arc<JobDefinition>> {
        self.definitions.write().remove(name)
    }

    pub fn clear(&self) {
        self.definitions.write().clear();
    }

    pub fn len(&self) -> usize {
        self.definitions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.read().is_empty()
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.definitions.read().keys().cloned().collect();
        names.sort();
        names
    }
}
