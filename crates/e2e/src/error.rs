//! Error types for the uwf E2E harness

use std::process::ExitStatus;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Failed to launch `{command}`: {source}")]
    Launch {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command `{command}` exited with {status}")]
    CommandFailed { command: String, status: ExitStatus },

    #[error("Timeout after {waited:?} waiting for: {resources}")]
    Timeout { resources: String, waited: Duration },

    #[error("Title text does not exist in response from {0}")]
    MissingTitle(String),

    #[error("Assertion failed: expected title {expected:?}, got {actual:?}")]
    AssertionFailed { expected: String, actual: String },

    #[error("Failed to terminate process tree {pid}: {reason}")]
    Termination { pid: u32, reason: String },

    #[error("Scenario {name} did not finish within {limit:?}")]
    ScenarioTimeout { name: String, limit: Duration },

    #[error("Unknown scenario: {0}")]
    UnknownScenario(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl E2eError {
    /// Short machine-friendly kind, used in result reports
    pub fn kind(&self) -> &'static str {
        match self {
            E2eError::Launch { .. } => "launch",
            E2eError::CommandFailed { .. } => "command_failed",
            E2eError::Timeout { .. } => "timeout",
            E2eError::MissingTitle(_) => "missing_title",
            E2eError::AssertionFailed { .. } => "assertion",
            E2eError::Termination { .. } => "termination",
            E2eError::ScenarioTimeout { .. } => "scenario_timeout",
            E2eError::UnknownScenario(_) => "unknown_scenario",
            E2eError::Config(_) => "config",
            E2eError::Io(_) => "io",
            E2eError::Json(_) => "json",
            E2eError::Yaml(_) => "yaml",
            E2eError::Http(_) => "http",
        }
    }
}

pub type E2eResult<T> = Result<T, E2eError>;
