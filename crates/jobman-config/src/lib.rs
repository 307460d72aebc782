//! KDL configuration parsing for jobman.
//!
//! This crate handles parsing of scenario files: named sequences of registry
//! operations, each with the outcome it is expected to produce.

pub mod error;
pub mod scenario;

pub use error::{ConfigError, ConfigResult};
pub use scenario::{Expectation, Operation, Scenario, Step, load_scenario, parse_scenario};
