//! Oxide CI Core
//!
//! Domain types, port traits, and error handling shared by the change
//! pollers, the change bus, and the schedulers.

pub mod buildset;
pub mod change;
pub mod error;
pub mod ids;
pub mod ports;

pub use error::{Error, Result};
pub use ids::*;
