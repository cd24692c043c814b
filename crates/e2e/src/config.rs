//! Harness configuration
//!
//! Everything the scenarios touch outside the process (repository layout,
//! home directory, URL, tool names) is carried here explicitly so the
//! orchestrator never reads ambient environment.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{E2eError, E2eResult};

/// Title served by the starter kit page of both scenarios
pub const EXPECTED_TITLE: &str = "React Starter Kit - www.reactstarterkit.com";

/// Upper bound for every configured timeout (one week)
pub const MAX_TIMEOUT_SECS: u64 = 7 * 24 * 60 * 60;

/// How a spawned child's stdout is wired
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Child writes straight to our stdout
    #[default]
    Inherit,
    /// Child stdout is piped and forwarded line by line through tracing
    Log,
    /// Child stdout is discarded
    Null,
}

/// Harness configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Package manager used for init/pack/add and to run the tool
    pub package_manager: String,

    /// Name of the tool under test, as exposed through the package manager
    pub tool: String,

    /// Root of the tool's repository
    pub repo_root: PathBuf,

    /// Example project started by the first scenario (relative to repo_root)
    pub example_dir: PathBuf,

    /// Tool source package that gets packed (relative to repo_root)
    pub lib_dir: PathBuf,

    /// Home directory under which the scratch project is created
    pub home_dir: PathBuf,

    /// Scratch project directory name inside home_dir
    pub user_dir_name: String,

    /// File name of the packed archive inside the scratch project
    pub packed_name: String,

    /// Runtime dependencies installed next to the packed tool
    pub runtime_dependencies: Vec<String>,

    /// URL the started app serves
    pub app_url: String,

    /// Title the served page must carry
    pub expected_title: String,

    /// Availability timeout in seconds
    pub wait_timeout_secs: u64,

    /// Outer bound per scenario; defaults to twice the availability timeout
    pub scenario_timeout_secs: Option<u64>,

    /// First availability poll interval in milliseconds
    pub poll_interval_ms: u64,

    /// Upper bound for the backed-off poll interval in milliseconds
    pub max_poll_interval_ms: u64,

    /// Time a process tree gets to exit after SIGTERM before SIGKILL
    pub termination_grace_ms: u64,

    /// Time allowed for the tree to disappear after SIGKILL
    pub termination_confirm_ms: u64,

    /// Stdout wiring for spawned commands
    pub output: OutputMode,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            package_manager: "yarn".to_string(),
            tool: "uwf".to_string(),
            repo_root: PathBuf::from("."),
            example_dir: PathBuf::from("examples/basic"),
            lib_dir: PathBuf::from("packages/uwf"),
            home_dir: PathBuf::from("target/e2e-home"),
            user_dir_name: "tmpUserDir".to_string(),
            packed_name: "uwf-packed.tgz".to_string(),
            runtime_dependencies: [
                "react",
                "react-dom",
                "classnames",
                "node-fetch",
                "normalize.css",
            ]
            .iter()
            .map(|d| d.to_string())
            .collect(),
            app_url: "http://localhost:3000".to_string(),
            expected_title: EXPECTED_TITLE.to_string(),
            wait_timeout_secs: 1000,
            scenario_timeout_secs: None,
            poll_interval_ms: 250,
            max_poll_interval_ms: 5_000,
            termination_grace_ms: 5_000,
            termination_confirm_ms: 5_000,
            output: OutputMode::Inherit,
        }
    }
}

impl HarnessConfig {
    /// Load configuration from a YAML file; missing keys keep their defaults
    pub fn load(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the scenarios cannot run with
    pub fn validate(&self) -> E2eResult<()> {
        if self.package_manager.trim().is_empty() {
            return Err(E2eError::Config("package_manager must not be empty".into()));
        }
        if self.tool.trim().is_empty() {
            return Err(E2eError::Config("tool must not be empty".into()));
        }
        if self.user_dir_name.is_empty()
            || Path::new(&self.user_dir_name).components().count() != 1
        {
            return Err(E2eError::Config(format!(
                "user_dir_name must be a single path component, got {:?}",
                self.user_dir_name
            )));
        }
        if self.packed_name.is_empty() || self.packed_name.contains('/') {
            return Err(E2eError::Config(format!(
                "packed_name must be a plain file name, got {:?}",
                self.packed_name
            )));
        }
        if !self.app_url.starts_with("http://") && !self.app_url.starts_with("https://") {
            return Err(E2eError::Config(format!(
                "app_url must be an http(s) URL, got {:?}",
                self.app_url
            )));
        }
        if self.wait_timeout_secs == 0 || self.wait_timeout_secs > MAX_TIMEOUT_SECS {
            return Err(E2eError::Config(format!(
                "wait_timeout_secs must be between 1 and {}",
                MAX_TIMEOUT_SECS
            )));
        }
        if self
            .scenario_timeout_secs
            .map_or(false, |secs| secs == 0 || secs > MAX_TIMEOUT_SECS)
        {
            return Err(E2eError::Config(format!(
                "scenario_timeout_secs must be between 1 and {}",
                MAX_TIMEOUT_SECS
            )));
        }
        let max_ms = MAX_TIMEOUT_SECS * 1000;
        if self.termination_grace_ms > max_ms || self.termination_confirm_ms > max_ms {
            return Err(E2eError::Config(format!(
                "termination windows must not exceed {} ms",
                max_ms
            )));
        }
        if self.poll_interval_ms == 0 || self.poll_interval_ms > self.max_poll_interval_ms {
            return Err(E2eError::Config(
                "poll_interval_ms must be positive and not exceed max_poll_interval_ms".into(),
            ));
        }
        Ok(())
    }

    pub fn example_path(&self) -> PathBuf {
        self.repo_root.join(&self.example_dir)
    }

    pub fn lib_path(&self) -> PathBuf {
        self.repo_root.join(&self.lib_dir)
    }

    pub fn user_dir(&self) -> PathBuf {
        self.home_dir.join(&self.user_dir_name)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    pub fn scenario_timeout(&self) -> Duration {
        self.scenario_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.wait_timeout().saturating_mul(2))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_poll_interval(&self) -> Duration {
        Duration::from_millis(self.max_poll_interval_ms)
    }

    pub fn termination_grace(&self) -> Duration {
        Duration::from_millis(self.termination_grace_ms)
    }

    pub fn termination_confirm(&self) -> Duration {
        Duration::from_millis(self.termination_confirm_ms)
    }
}
