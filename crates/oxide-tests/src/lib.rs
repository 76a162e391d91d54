//! Integration test infrastructure for the Oxide change pipeline.
//!
//! Provides a scripted in-memory mirror for driving pollers without git,
//! a [`Pipeline`] harness wiring poller, bus, and schedulers over the
//! in-memory database, and a testcontainers-backed PostgreSQL context.
//!
//! # Usage
//!
//! ```ignore
//! use oxide_tests::{CommitFixture, Pipeline};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let pipeline = Pipeline::new(&[SCHEDULER_YAML]).await.unwrap();
//!     pipeline.mirror.push(CommitFixture::new("abc"));
//!     pipeline.poller.poll().await.unwrap();
//! }
//! ```

pub mod containers;
pub mod context;
pub mod fixtures;
pub mod helpers;

pub use context::{Pipeline, TestContext};
pub use fixtures::*;
pub use helpers::*;

/// Initialize test logging (call once per test binary).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,oxide_tests=debug")),
        )
        .with_test_writer()
        .try_init();
}
