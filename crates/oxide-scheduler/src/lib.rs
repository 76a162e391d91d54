//! Change-driven scheduling for Oxide CI.
//!
//! Schedulers subscribe to the change bus, decide which changes matter, and
//! turn them into buildsets.

pub mod base;
pub mod buildset;
pub mod config;
pub mod filter;
pub mod immediate;

pub use base::{BaseScheduler, BuildsetOptions, ChangeHandler, LatestSource, SchedulerServices};
pub use buildset::BuildsetFactory;
pub use config::SchedulerConfig;
pub use filter::{ChangeFilter, Classification, FileIsImportant, ValueMatcher};
pub use immediate::ImmediateScheduler;
