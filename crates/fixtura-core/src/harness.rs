//! The harness capability sets and the single-owner binding every harness embeds.
//!
//! A harness exposes two surfaces:
//!
//! ```text
//!            orchestrator-only                 caller-facing
//! Component ----------------> Dependency      Harness ----> configure(pipeline)
//!            on_start/on_stop                     |        resource accessors
//!                                                 v
//!                                              Binding::guard --> ComponentError::NotStarted
//! ```
//!
//! [`Dependency`] is what a [`crate::Component`] drives: start and stop, in
//! registration order and reverse. [`Harness`] adds the build-time
//! configuration hook. Accessors for live resources live on the concrete
//! harness types and all go through [`Binding::guard`].

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU8, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::component::ComponentContext;
use crate::config::ConfigPipeline;
use crate::error::ComponentError;

/// Lifecycle hooks driven by the owning component.
///
/// The component binds the harness (see [`Binding`]) before calling
/// [`Dependency::on_start`] and marks it live once the hook succeeds. It
/// marks the harness stopped before calling [`Dependency::on_stop`], so
/// accessors already fail while the stop hook is releasing resources.
///
/// `on_stop` is also called for a dependency whose `on_start` failed, so it
/// must tolerate partially allocated state.
#[async_trait]
pub trait Dependency: Send + Sync {
    /// Human-readable name used in logs and errors (e.g. "postgres").
    fn name(&self) -> &str;

    /// The binding slot recording which component owns this harness.
    fn binding(&self) -> &Binding;

    /// Allocate resources. May launch external processes and block until ready.
    async fn on_start(&self, _ctx: &ComponentContext, _cancel: &CancellationToken) -> Result<()> {
        Ok(())
    }

    /// Release whatever `on_start` allocated.
    async fn on_stop(&self, _ctx: &ComponentContext, _cancel: &CancellationToken) -> Result<()> {
        Ok(())
    }
}

/// A pluggable infrastructure dependency of a test fixture.
pub trait Harness: Dependency {
    /// Contribute deferred configuration for the service.
    ///
    /// Called once, when the harness is added to a
    /// [`crate::ComponentBuilder`]. Must not block or touch live resources;
    /// anything that needs a running dependency belongs inside a pipeline
    /// step, which only runs right before the service boots.
    fn configure(&self, _pipeline: &mut ConfigPipeline) {}
}

// Compile-time assertion: both traits must stay object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn Dependency, _: &dyn Harness) {}
};

const UNBOUND: u8 = 0;
const STARTING: u8 = 1;
const LIVE: u8 = 2;
const STOPPED: u8 = 3;

/// Records the component a harness belongs to and whether it is live.
///
/// The owner is set exactly once. Binding the same harness again, from any
/// component, fails with [`ComponentError::DuplicateBinding`].
#[derive(Debug, Default)]
pub struct Binding {
    owner: OnceLock<ComponentContext>,
    state: AtomicU8,
}

impl Binding {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn bind(&self, ctx: &ComponentContext, harness: &str) -> Result<(), ComponentError> {
        self.owner
            .set(ctx.clone())
            .map_err(|_| ComponentError::DuplicateBinding {
                harness: harness.to_string(),
            })?;
        self.state.store(STARTING, Ordering::Release);
        Ok(())
    }

    pub(crate) fn mark_live(&self) {
        self.state.store(LIVE, Ordering::Release);
    }

    pub(crate) fn mark_stopped(&self) {
        self.state.store(STOPPED, Ordering::Release);
    }

    /// `true` between a successful start and the beginning of stop.
    pub fn is_live(&self) -> bool {
        self.state.load(Ordering::Acquire) == LIVE
    }

    /// `true` once any component has claimed this harness.
    pub fn is_bound(&self) -> bool {
        self.owner.get().is_some()
    }

    /// The owning component, if bound.
    pub fn owner(&self) -> Option<&ComponentContext> {
        self.owner.get()
    }

    /// Access guard: the owning component, or
    /// [`ComponentError::NotStarted`] outside the live window.
    pub fn guard(&self, harness: &str) -> Result<&ComponentContext, ComponentError> {
        match self.owner.get() {
            Some(ctx) if self.is_live() => Ok(ctx),
            _ => Err(ComponentError::not_started(harness)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbound_binding_rejects_access() {
        let binding = Binding::new();
        assert!(!binding.is_bound());
        assert!(!binding.is_live());
        let err = binding.guard("redis").unwrap_err();
        assert!(err.is_not_started());
    }

    #[test]
    fn binding_lifecycle() {
        let ctx = ComponentContext::new("svc");
        let binding = Binding::new();

        binding.bind(&ctx, "redis").unwrap();
        assert!(binding.is_bound());
        // Bound but not yet live: start has not completed.
        assert!(binding.guard("redis").is_err());

        binding.mark_live();
        let owner = binding.guard("redis").unwrap();
        assert_eq!(owner.id(), ctx.id());

        binding.mark_stopped();
        assert!(binding.guard("redis").unwrap_err().is_not_started());
    }

    #[test]
    fn second_bind_is_rejected() {
        let first = ComponentContext::new("first");
        let second = ComponentContext::new("second");
        let binding = Binding::new();

        binding.bind(&first, "kafka").unwrap();
        let err = binding.bind(&second, "kafka").unwrap_err();
        assert!(matches!(err, ComponentError::DuplicateBinding { ref harness } if harness == "kafka"));
        // The original owner is kept.
        assert_eq!(binding.owner().unwrap().id(), first.id());

        // Rebinding to the same component is rejected as well.
        assert!(binding.bind(&first, "kafka").is_err());
    }
}
