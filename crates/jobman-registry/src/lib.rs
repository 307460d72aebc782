//! Job association registry for jobman.
//!
//! Tracks live jobs by id and keeps a one-to-one link from each job to a
//! child id, with forward and reverse lookups kept consistent under a single
//! lock.

mod index;
pub mod registry;

pub use jobman_core::{Error, Job, JobId, JobSnapshot, Result, SimpleJob};
pub use registry::JobRegistry;
