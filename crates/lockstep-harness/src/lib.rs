//! # lockstep-harness: Declarative Multi-Threaded Tests
//!
//! A thin layer over [`lockstep`] for tests written as a *subject*: a
//! struct whose methods are the workers of the scenario.
//!
//! - [`MultiThreadedTest`] lists the subject's worker methods and an
//!   optional `finish` check.
//! - [`Runner`] registers those methods on a fresh conductor, conducts the
//!   scenario, repeats it as many times as asked, then runs `finish`.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use lockstep_harness::{MultiThreadedTest, Runner, Threaded};
//! # #[derive(Default)] struct Counter;
//! # impl MultiThreadedTest for Counter { fn threads() -> Vec<Threaded<Self>> { Vec::new() } }
//! lockstep_harness::init_test_tracing();
//! Runner::new(Arc::new(Counter::default())).times(3).run()?;
//! # Ok::<(), lockstep_harness::HarnessError>(())
//! ```

mod runner;
mod subject;

use std::sync::Once;

use tracing_subscriber::EnvFilter;

pub use lockstep::{ConductorConfig, ConductorError, Worker};
pub use runner::{HarnessError, Runner};
pub use subject::{MultiThreadedTest, ThreadMethod, Threaded};

/// Installs a `tracing` subscriber that writes through the test harness's
/// captured output. Filtered by `RUST_LOG` (default `warn`). Safe to call
/// from every test.
pub fn init_test_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        // Another subscriber may already be installed by the test binary.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
