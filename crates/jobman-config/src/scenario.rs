//! Scenario configuration parsing.
//!
//! A scenario is a KDL document naming a sequence of registry operations:
//!
//! ```kdl
//! scenario "linking"
//! insert 5
//! insert 6 child=42
//! assign 6 43 expect="conflict"
//! remove-child 42
//! ```

use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// A parsed scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Scenario {
    pub name: String,
    pub steps: Vec<Step>,
}

/// One operation and the outcome it should produce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Step {
    pub operation: Operation,
    pub expect: Expectation,
}

/// A registry operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum Operation {
    Insert { id: u64, child_id: Option<u64> },
    Remove { id: u64 },
    RemoveChild { child_id: u64 },
    RemoveMany { ids: Vec<u64> },
    Assign { id: u64, child_id: u64 },
    Unassign { id: u64 },
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Insert { id, child_id: None } => write!(f, "insert {id}"),
            Operation::Insert {
                id,
                child_id: Some(child_id),
            } => write!(f, "insert {id} child={child_id}"),
            Operation::Remove { id } => write!(f, "remove {id}"),
            Operation::RemoveChild { child_id } => write!(f, "remove-child {child_id}"),
            Operation::RemoveMany { ids } => {
                write!(f, "remove-many")?;
                for id in ids {
                    write!(f, " {id}")?;
                }
                Ok(())
            }
            Operation::Assign { id, child_id } => write!(f, "assign {id} {child_id}"),
            Operation::Unassign { id } => write!(f, "unassign {id}"),
        }
    }
}

/// Expected outcome of a step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Expectation {
    #[default]
    Ok,
    NotFound,
    Conflict,
    Invalid,
    /// Accept any recoverable outcome.
    Any,
}

impl Expectation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Expectation::Ok => "ok",
            Expectation::NotFound => "not-found",
            Expectation::Conflict => "conflict",
            Expectation::Invalid => "invalid",
            Expectation::Any => "any",
        }
    }
}

impl fmt::Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Expectation {
    type Err = ConfigError;

    fn from_str(s: &str) -> ConfigResult<Self> {
        match s {
            "ok" => Ok(Expectation::Ok),
            "not-found" | "not_found" => Ok(Expectation::NotFound),
            "conflict" => Ok(Expectation::Conflict),
            "invalid" => Ok(Expectation::Invalid),
            "any" => Ok(Expectation::Any),
            _ => Err(ConfigError::InvalidValue {
                field: "expect".to_string(),
                message: format!("unknown outcome: {}", s),
            }),
        }
    }
}

/// Read and parse a scenario file.
pub fn load_scenario(path: impl AsRef<Path>) -> ConfigResult<Scenario> {
    let content = std::fs::read_to_string(path)?;
    parse_scenario(&content)
}

/// Parse a scenario from KDL text.
pub fn parse_scenario(kdl: &str) -> ConfigResult<Scenario> {
    let doc: KdlDocument = kdl.parse()?;

    let mut name: Option<String> = None;
    let mut steps = Vec::new();

    for node in doc.nodes() {
        match node.name().value() {
            "scenario" => {
                if name.is_some() {
                    return Err(ConfigError::Duplicate("scenario".to_string()));
                }
                name = Some(
                    get_first_string_arg(node)
                        .ok_or_else(|| ConfigError::MissingField("scenario name".to_string()))?,
                );
            }
            _ => steps.push(parse_step(node)?),
        }
    }

    let name = name.ok_or_else(|| ConfigError::MissingField("scenario name".to_string()))?;
    if name.is_empty() {
        return Err(ConfigError::MissingField("scenario name".to_string()));
    }

    Ok(Scenario { name, steps })
}

fn parse_step(node: &KdlNode) -> ConfigResult<Step> {
    let op = node.name().value();
    let ids = get_id_args(node)?;

    let allowed: &[&str] = if op == "insert" {
        &["expect", "child"]
    } else {
        &["expect"]
    };
    check_props(node, allowed)?;

    let operation = match op {
        "insert" => {
            let [id] = expect_args::<1>(op, &ids)?;
            Operation::Insert {
                id,
                child_id: get_id_prop(node, "child")?,
            }
        }
        "remove" => {
            let [id] = expect_args::<1>(op, &ids)?;
            Operation::Remove { id }
        }
        "remove-child" => {
            let [child_id] = expect_args::<1>(op, &ids)?;
            Operation::RemoveChild { child_id }
        }
        // an empty batch is a valid no-op
        "remove-many" => Operation::RemoveMany { ids },
        "assign" => {
            let [id, child_id] = expect_args::<2>(op, &ids)?;
            Operation::Assign { id, child_id }
        }
        "unassign" => {
            let [id] = expect_args::<1>(op, &ids)?;
            Operation::Unassign { id }
        }
        _ => return Err(ConfigError::UnknownOperation(op.to_string())),
    };

    let expect = match node.get("expect") {
        Some(value) => value
            .as_string()
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "expect".to_string(),
                message: format!("expected a string, found {}", value),
            })?
            .parse()?,
        None => Expectation::default(),
    };

    Ok(Step { operation, expect })
}

fn expect_args<const N: usize>(op: &str, ids: &[u64]) -> ConfigResult<[u64; N]> {
    ids.try_into().map_err(|_| ConfigError::InvalidValue {
        field: op.to_string(),
        message: format!("expected {} id argument(s), found {}", N, ids.len()),
    })
}

// Helper functions for extracting values from KDL nodes

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn check_props(node: &KdlNode, allowed: &[&str]) -> ConfigResult<()> {
    for entry in node.entries() {
        if let Some(name) = entry.name() {
            if !allowed.contains(&name.value()) {
                return Err(ConfigError::InvalidValue {
                    field: node.name().value().to_string(),
                    message: format!("unknown property '{}'", name.value()),
                });
            }
        }
    }
    Ok(())
}

fn get_id_args(node: &KdlNode) -> ConfigResult<Vec<u64>> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .map(|e| to_id(node.name().value(), e.value()))
        .collect()
}

fn get_id_prop(node: &KdlNode, name: &str) -> ConfigResult<Option<u64>> {
    node.get(name).map(|v| to_id(name, v)).transpose()
}

fn to_id(field: &str, value: &kdl::KdlValue) -> ConfigResult<u64> {
    let invalid = |message: String| ConfigError::InvalidValue {
        field: field.to_string(),
        message,
    };

    let n = value
        .as_integer()
        .ok_or_else(|| invalid(format!("expected an integer id, found {}", value)))?;
    u64::try_from(n).map_err(|_| invalid(format!("id {} is out of range", n)))
}
