//! `lk-domain` — shared data model, error type, and configuration for
//! the listkeeper moderation daemon.

pub mod config;
pub mod error;
pub mod model;

pub use config::RuntimeConfig;
pub use error::{Error, Result};
pub use model::{Did, ListDescriptor, ListKey, Profile};
