//! Shared test utilities for fixtura integration tests.
//!
//! Everything here runs without a container runtime:
//! - [`RecordingHarness`] logs its lifecycle hooks into an [`OrderLog`] and
//!   can be told to fail.
//! - [`ProbeEntryPoint`] boots a tiny axum service and remembers the
//!   configuration it was booted with.
//! - [`LoopbackDefinition`] is a container definition whose "process" is a
//!   TCP listener on the loopback interface.

use std::sync::Once;

pub mod loopback;
pub mod probe;
pub mod recording;

pub use loopback::{LoopbackDefinition, LoopbackStats};
pub use probe::ProbeEntryPoint;
pub use recording::{OrderLog, RecordingHarness};

static TRACING: Once = Once::new();

/// Install a test-writer tracing subscriber, once per test binary.
///
/// The filter comes from `FIXTURA_LOG`, then `RUST_LOG`, then `info`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = std::env::var("FIXTURA_LOG")
            .ok()
            .and_then(|directives| tracing_subscriber::EnvFilter::try_new(directives).ok())
            .or_else(|| tracing_subscriber::EnvFilter::try_from_default_env().ok())
            .unwrap_or_else(|| tracing_subscriber::EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
