//! Error types for fixture lifecycle operations.

use std::fmt;

use thiserror::Error;

/// Errors surfaced by a [`crate::Component`] and by the access guards of the
/// harnesses bound to it.
#[derive(Debug, Error)]
pub enum ComponentError {
    /// A live resource was requested outside the component's started window.
    #[error("component not started: harness {harness:?} has no live resources")]
    NotStarted { harness: String },

    /// A harness instance was handed to a second component (or started twice).
    #[error("harness {harness:?} is already bound to a component and cannot be reused")]
    DuplicateBinding { harness: String },

    /// A dependency's start hook failed. Later dependencies were not started.
    #[error("dependency #{index} ({harness:?}) failed to start")]
    DependencyStart {
        index: usize,
        harness: String,
        #[source]
        source: anyhow::Error,
    },

    /// An external process never reached its ready state.
    #[error("external {kind} process failed: {reason}")]
    ExternalProcess { kind: String, reason: String },

    /// The start sequence observed cancellation between two dependencies.
    #[error("start cancelled after {completed} dependencies were started")]
    Cancelled { completed: usize },

    /// A lifecycle operation was requested from a state that does not allow it.
    #[error("cannot {operation} a component that is {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    /// A deferred configuration step failed while assembling host configuration.
    #[error("failed to assemble host configuration")]
    Configuration {
        #[source]
        source: anyhow::Error,
    },

    /// The system under test failed to boot.
    #[error("service failed to boot")]
    ServiceBoot {
        #[source]
        source: anyhow::Error,
    },

    /// One or more stop hooks failed. Every dependency was still asked to stop.
    #[error("{} dependencies failed to stop: {}", .failures.len(), StopFailures(.failures))]
    Stop { failures: Vec<StopFailure> },

    /// No client factory was registered for the requested client type.
    #[error("no client factory registered for {client}")]
    UnregisteredClient { client: &'static str },
}

impl ComponentError {
    /// Shorthand for the access-guard error.
    pub fn not_started(harness: impl Into<String>) -> Self {
        Self::NotStarted {
            harness: harness.into(),
        }
    }

    /// Returns `true` if this is the access-guard error.
    pub fn is_not_started(&self) -> bool {
        matches!(self, Self::NotStarted { .. })
    }
}

/// A single failed stop hook, recorded during a best-effort unwind.
#[derive(Debug)]
pub struct StopFailure {
    /// Registration index of the dependency, or `None` for the service itself.
    pub index: Option<usize>,
    pub harness: String,
    pub error: anyhow::Error,
}

struct StopFailures<'a>(&'a [StopFailure]);

impl fmt::Display for StopFailures<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {:#}", failure.harness, failure.error)?;
        }
        Ok(())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = ComponentError> = std::result::Result<T, E>;
