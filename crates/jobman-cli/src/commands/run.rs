//! Scenario execution.

use super::Registry;
use anyhow::{Context, Result, bail};
use jobman_config::{Expectation, Operation, Scenario};
use jobman_core::{Error, JobSnapshot, SimpleJob};
use serde::Serialize;
use tracing::{info, warn};

/// What a step actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    Ok,
    NotFound,
    Conflict,
    Invalid,
    Fatal,
}

impl Outcome {
    fn of(result: &jobman_core::Result<()>) -> Self {
        match result {
            Ok(()) => Outcome::Ok,
            Err(Error::NotFound(_)) => Outcome::NotFound,
            Err(Error::Conflict(_)) => Outcome::Conflict,
            Err(Error::InvalidInput(_)) => Outcome::Invalid,
            Err(Error::InvariantViolation(_)) => Outcome::Fatal,
        }
    }

    fn satisfies(self, expect: Expectation) -> bool {
        match expect {
            Expectation::Ok => self == Outcome::Ok,
            Expectation::NotFound => self == Outcome::NotFound,
            Expectation::Conflict => self == Outcome::Conflict,
            Expectation::Invalid => self == Outcome::Invalid,
            Expectation::Any => self != Outcome::Fatal,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StepReport {
    pub step: usize,
    pub operation: String,
    pub expect: Expectation,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StepReport {
    pub fn passed(&self) -> bool {
        self.outcome.satisfies(self.expect)
    }
}

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub scenario: String,
    pub steps: Vec<StepReport>,
    pub verified: bool,
    pub jobs: Vec<JobSnapshot<u64>>,
}

impl RunReport {
    pub fn failures(&self) -> usize {
        self.steps.iter().filter(|s| !s.passed()).count()
    }
}

fn apply(registry: &Registry, operation: &Operation) -> jobman_core::Result<()> {
    match operation {
        Operation::Insert { id, child_id } => {
            registry.insert(*id, SimpleJob::shared(*id), child_id.unwrap_or(0))
        }
        Operation::Remove { id } => registry.remove(*id).map(|_| ()),
        Operation::RemoveChild { child_id } => registry.remove_by_child_id(*child_id).map(|_| ()),
        Operation::RemoveMany { ids } => registry.remove_many(ids).map(|_| ()),
        Operation::Assign { id, child_id } => registry.assign_child_id(*id, *child_id),
        Operation::Unassign { id } => registry.unassign_child_id(*id).map(|_| ()),
    }
}

/// Apply every step of `scenario` to a fresh registry.
pub fn execute(scenario: &Scenario) -> RunReport {
    let registry = Registry::new();
    let mut steps = Vec::with_capacity(scenario.steps.len());

    for (idx, step) in scenario.steps.iter().enumerate() {
        let result = apply(&registry, &step.operation);
        let report = StepReport {
            step: idx + 1,
            operation: step.operation.to_string(),
            expect: step.expect,
            outcome: Outcome::of(&result),
            message: result.err().map(|e| e.to_string()),
        };

        if !report.passed() {
            warn!(
                step = report.step,
                operation = %report.operation,
                expect = %report.expect,
                outcome = ?report.outcome,
                "Step did not match expectation"
            );
        }
        steps.push(report);
    }

    let verified = match registry.verify() {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Registry failed verification");
            false
        }
    };

    RunReport {
        scenario: scenario.name.clone(),
        steps,
        verified,
        jobs: registry.snapshot(),
    }
}

fn print_text(report: &RunReport) {
    println!("Scenario '{}'", report.scenario);
    for step in &report.steps {
        let mark = if step.passed() { "ok  " } else { "FAIL" };
        match &step.message {
            Some(message) => println!(
                "  [{}] {:>3}. {} -> {}",
                mark, step.step, step.operation, message
            ),
            None => println!("  [{}] {:>3}. {}", mark, step.step, step.operation),
        }
    }

    println!("Jobs ({}):", report.jobs.len());
    for job in &report.jobs {
        match job.child_id {
            Some(child_id) => println!("  {} -> {}", job.id, child_id),
            None => println!("  {}", job.id),
        }
    }
}

pub fn run(path: &str, json: bool) -> Result<()> {
    let scenario = jobman_config::load_scenario(path)
        .with_context(|| format!("failed to load scenario {}", path))?;
    info!(scenario = %scenario.name, steps = scenario.steps.len(), "Running scenario");

    let report = execute(&scenario);
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_text(&report);
    }

    let failures = report.failures();
    if failures > 0 {
        bail!("{} of {} steps did not match", failures, report.steps.len());
    }
    if !report.verified {
        bail!("registry invariants violated");
    }
    Ok(())
}
