//! Core types for the jobman job association registry.
//!
//! This crate contains:
//! - Job identifiers (`JobId`)
//! - The `Job` capability trait and a plain `SimpleJob` holder
//! - The two-tier error type shared by the registry and its callers

pub mod error;
pub mod id;
pub mod job;

pub use error::{Error, Result};
pub use id::JobId;
pub use job::{Job, JobSnapshot, SimpleJob};
