//! Core library for the vessel container and task engine
//!
//! This crate contains the engine argument builder, namespace resolution,
//! inspect caching, the container lifecycle executor, the engine variants,
//! run-file concurrency tracking and the task execution wrapper.

pub mod args;
pub mod config;
pub mod confirm;
pub mod container;
pub mod engine;
pub mod env;
pub mod errors;
pub mod graph;
pub mod identity;
pub mod inspect;
pub mod lastrun;
pub mod lifecycle;
pub mod lock;
pub mod logging;
pub mod namespace;
pub mod process;
pub mod retcodes;
pub mod runfile;
pub mod status;
pub mod task;

pub use config::{Object, ObjectConfig};
pub use errors::{Result, VesselError};
pub use identity::{ObjectPath, ResourceId};
pub use status::Status;

// Re-export IndexMap for use by dependent crates (preserves insertion order for ordered maps)
pub use indexmap::IndexMap;

/// Get the version of the core library
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
