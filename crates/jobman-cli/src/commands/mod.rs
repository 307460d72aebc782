//! CLI command implementations.

pub mod run;
pub mod stress;

use anyhow::{Context, Result};
use jobman_core::SimpleJob;
use jobman_registry::JobRegistry;
use std::sync::Arc;

/// Registry type driven by the CLI.
pub type Registry = JobRegistry<Arc<SimpleJob<u64>>>;

pub fn validate(path: &str) -> Result<()> {
    let scenario = jobman_config::load_scenario(path)
        .with_context(|| format!("invalid scenario {}", path))?;
    println!(
        "Scenario '{}' is valid ({} steps)",
        scenario.name,
        scenario.steps.len()
    );
    Ok(())
}
