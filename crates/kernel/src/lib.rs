//! Environment service: one configured mapping strategy behind a single
//! object that gameplay code queries for surfaces.
//!
//! # Invariants
//! - Exactly one strategy is active per environment.
//! - All map mutation flows through the environment's explicit operations.
//! - Missing depth is a normal state, never an error.

pub mod config;
pub mod environment;
mod error;

pub use config::{EnvironmentConfig, Strategy};
pub use environment::{Environment, UpdateOutcome};
pub use error::EnvironmentError;
