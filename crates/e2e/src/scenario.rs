//! Scenario runner that sequences the tool, the waiter, the verifier and cleanup

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::HarnessConfig;
use crate::error::{E2eError, E2eResult};
use crate::process::{CommandRunner, ExternalCommand, SpawnedProcess, SystemCommandRunner};
use crate::terminate::ProcessTerminator;
use crate::verify::ContentVerifier;
use crate::wait::AvailabilityWaiter;
use crate::workdir::ScratchDir;

/// The scenarios the harness knows how to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScenarioKind {
    /// `start` compiles and serves the bundled basic example
    StartExample,
    /// `init` scaffolds a fresh project from the packed tool, which then starts
    InitProject,
}

impl ScenarioKind {
    pub const ALL: [ScenarioKind; 2] = [ScenarioKind::StartExample, ScenarioKind::InitProject];

    pub fn name(&self) -> &'static str {
        match self {
            ScenarioKind::StartExample => "start-example",
            ScenarioKind::InitProject => "init-project",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ScenarioKind::StartExample => "\"start\" compiles and starts examples/basic correctly",
            ScenarioKind::InitProject => "\"init\" initializes a project from scratch correctly",
        }
    }
}

impl fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ScenarioKind {
    type Err = E2eError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ScenarioKind::ALL
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| E2eError::UnknownScenario(s.to_string()))
    }
}

/// One step of a scenario plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Remove any leftover directory and create it empty
    PrepareDir(PathBuf),
    /// Run a command to completion, failing on non-zero exit
    Run(ExternalCommand),
    /// Start the long-running app
    Start(ExternalCommand),
    /// Block until every URL answers
    WaitFor(Vec<String>),
    /// Fetch the page and compare its title
    VerifyTitle { url: String, expected: String },
    /// Kill the started app's process tree
    Terminate,
    /// Delete the prepared directory
    RemoveDir,
}

impl Step {
    fn name(&self) -> String {
        match self {
            Step::PrepareDir(path) => format!("prepare:{}", path.display()),
            Step::Run(cmd) => format!("run:{}", cmd),
            Step::Start(cmd) => format!("start:{}", cmd),
            Step::WaitFor(urls) => format!("wait:{}", urls.join(",")),
            Step::VerifyTitle { url, .. } => format!("verify:{}", url),
            Step::Terminate => "terminate".to_string(),
            Step::RemoveDir => "cleanup".to_string(),
        }
    }
}

/// A planned scenario
#[derive(Debug, Clone)]
pub struct Scenario {
    pub kind: ScenarioKind,
    pub working_dir: PathBuf,
    pub timeout: Duration,
    pub steps: Vec<Step>,
}

/// Result of executing a single step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_name: String,
    pub success: bool,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Result of running a single scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub name: String,
    pub description: String,
    pub success: bool,
    pub duration_ms: u64,
    pub steps: Vec<StepResult>,
    pub error_kind: Option<String>,
    pub error: Option<String>,
}

/// Result of running a set of scenarios
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteResult {
    pub started_at: DateTime<Utc>,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub results: Vec<ScenarioResult>,
}

/// Resources a scenario holds while its steps run
#[derive(Default)]
struct Acquired {
    dir: Option<ScratchDir>,
    app: Option<SpawnedProcess>,
}

/// Runs scenarios one after another against the tool under test
pub struct ScenarioRunner<R = SystemCommandRunner> {
    config: HarnessConfig,
    commands: R,
    waiter: AvailabilityWaiter,
    verifier: ContentVerifier,
    terminator: ProcessTerminator,
}

impl ScenarioRunner<SystemCommandRunner> {
    /// Runner that executes real commands
    pub fn system(config: HarnessConfig) -> E2eResult<Self> {
        let commands = SystemCommandRunner::new(config.output);
        Self::new(config, commands)
    }
}

impl<R: CommandRunner> ScenarioRunner<R> {
    pub fn new(config: HarnessConfig, commands: R) -> E2eResult<Self> {
        config.validate()?;

        let waiter = AvailabilityWaiter::new(
            config.wait_timeout(),
            config.poll_interval(),
            config.max_poll_interval(),
        )?;
        let verifier = ContentVerifier::new()?;
        let terminator =
            ProcessTerminator::new(config.termination_grace(), config.termination_confirm());

        Ok(Self {
            config,
            commands,
            waiter,
            verifier,
            terminator,
        })
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    fn pm(&self, cwd: &Path) -> ExternalCommand {
        ExternalCommand::new(&self.config.package_manager, cwd)
    }

    fn start_command(&self, cwd: &Path) -> ExternalCommand {
        self.pm(cwd)
            .args(["run", self.config.tool.as_str(), "start", "--silent"])
    }

    fn verification_steps(&self) -> [Step; 2] {
        [
            Step::WaitFor(vec![self.config.app_url.clone()]),
            Step::VerifyTitle {
                url: self.config.app_url.clone(),
                expected: self.config.expected_title.clone(),
            },
        ]
    }

    /// Build the ordered step list for a scenario
    pub fn plan(&self, kind: ScenarioKind) -> Scenario {
        match kind {
            ScenarioKind::StartExample => {
                let example = self.config.example_path();
                let mut steps = vec![Step::Start(self.start_command(&example))];
                steps.extend(self.verification_steps());
                steps.push(Step::Terminate);

                Scenario {
                    kind,
                    working_dir: example,
                    timeout: self.config.scenario_timeout(),
                    steps,
                }
            }
            ScenarioKind::InitProject => {
                let user_dir = self.config.user_dir();
                let packed = user_dir.join(&self.config.packed_name);
                let packed_rel = format!("./{}", self.config.packed_name);
                let tool = self.config.tool.as_str();

                let mut steps = vec![
                    Step::PrepareDir(user_dir.clone()),
                    Step::Run(self.pm(&user_dir).args(["init", "--yes"])),
                    Step::Run(
                        self.pm(&self.config.lib_path())
                            .args(["pack", "--filename"])
                            .arg(packed.to_string_lossy()),
                    ),
                    Step::Run(self.pm(&user_dir).args(["--force", "add", "-D"]).arg(packed_rel)),
                    Step::Run(
                        self.pm(&user_dir)
                            .arg("add")
                            .args(self.config.runtime_dependencies.iter().cloned()),
                    ),
                    Step::Run(self.pm(&user_dir).args([tool, "init", "--verbose"])),
                    Step::Start(self.start_command(&user_dir)),
                ];
                steps.extend(self.verification_steps());
                steps.push(Step::Terminate);
                steps.push(Step::RemoveDir);

                Scenario {
                    kind,
                    working_dir: user_dir,
                    timeout: self.config.scenario_timeout(),
                    steps,
                }
            }
        }
    }

    /// Execute a scenario, releasing the app and the directory on every path.
    ///
    /// The first failing step wins; a cleanup failure is only returned when
    /// all steps succeeded.
    pub async fn execute(&self, scenario: &Scenario) -> E2eResult<()> {
        let mut records = Vec::new();
        self.execute_recorded(scenario, &mut records).await
    }

    async fn execute_recorded(
        &self,
        scenario: &Scenario,
        records: &mut Vec<StepResult>,
    ) -> E2eResult<()> {
        let mut acquired = Acquired::default();
        let outcome = self.run_steps(scenario, &mut acquired, records).await;
        let cleanup = self.release(&mut acquired).await;

        match (outcome, cleanup) {
            (Err(e), Err(cleanup_err)) => {
                warn!("Cleanup after failed scenario also failed: {}", cleanup_err);
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
            (Ok(()), cleanup) => cleanup,
        }
    }

    async fn run_steps(
        &self,
        scenario: &Scenario,
        acquired: &mut Acquired,
        records: &mut Vec<StepResult>,
    ) -> E2eResult<()> {
        for step in &scenario.steps {
            let start = Instant::now();
            let step_name = step.name();
            debug!("Executing step: {}", step_name);

            let result = self.run_step(step, acquired).await;
            let duration_ms = start.elapsed().as_millis() as u64;

            records.push(StepResult {
                step_name,
                success: result.is_ok(),
                duration_ms,
                error: result.as_ref().err().map(|e| e.to_string()),
            });

            // Stop on first failure
            result?;
        }
        Ok(())
    }

    async fn run_step(&self, step: &Step, acquired: &mut Acquired) -> E2eResult<()> {
        match step {
            Step::PrepareDir(path) => {
                acquired.dir = Some(ScratchDir::fresh(path).await?);
            }
            Step::Run(cmd) => {
                self.commands.run(cmd).await?;
            }
            Step::Start(cmd) => {
                acquired.app = Some(self.commands.spawn(cmd)?);
            }
            Step::WaitFor(urls) => {
                self.waiter.wait_for(urls).await?;
            }
            Step::VerifyTitle { url, expected } => {
                info!("verifying..");
                let actual = self.verifier.verify(url, expected).await?;
                info!("verified: {}", actual);
            }
            Step::Terminate => {
                if let Some(mut app) = acquired.app.take() {
                    info!("terminating..");
                    self.terminator.terminate(&mut app).await?;
                    info!("terminated");
                }
            }
            Step::RemoveDir => {
                if let Some(dir) = acquired.dir.take() {
                    info!("cleaning..");
                    dir.remove().await?;
                    info!("cleaned");
                }
            }
        }
        Ok(())
    }

    /// Release whatever the steps left behind, app first so nothing holds
    /// files in the directory.
    async fn release(&self, acquired: &mut Acquired) -> E2eResult<()> {
        let mut result = Ok(());

        if let Some(mut app) = acquired.app.take() {
            info!("Terminating leftover process tree {}", app.pid());
            if let Err(e) = self.terminator.terminate(&mut app).await {
                result = Err(e);
            }
        }

        if let Some(dir) = acquired.dir.take() {
            info!("Removing leftover directory {}", dir.path().display());
            if let Err(e) = dir.remove().await {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }

        result
    }

    /// Execute a scenario under its outer timeout and report the outcome
    pub async fn run(&self, scenario: &Scenario) -> ScenarioResult {
        let start = Instant::now();
        info!("Running scenario {}: {}", scenario.kind, scenario.kind.description());

        let mut records = Vec::new();
        let outcome = match tokio::time::timeout(
            scenario.timeout,
            self.execute_recorded(scenario, &mut records),
        )
        .await
        {
            Ok(outcome) => outcome,
            // Dropped guards have already killed the app and removed the directory
            Err(_) => Err(E2eError::ScenarioTimeout {
                name: scenario.kind.name().to_string(),
                limit: scenario.timeout,
            }),
        };

        let duration_ms = start.elapsed().as_millis() as u64;

        ScenarioResult {
            name: scenario.kind.name().to_string(),
            description: scenario.kind.description().to_string(),
            success: outcome.is_ok(),
            duration_ms,
            steps: records,
            error_kind: outcome.as_ref().err().map(|e| e.kind().to_string()),
            error: outcome.err().map(|e| e.to_string()),
        }
    }

    /// Run scenarios in order; they share the app port so never concurrently
    pub async fn run_all(&self, kinds: &[ScenarioKind]) -> SuiteResult {
        let started_at = Utc::now();
        let start = Instant::now();
        let mut results = Vec::with_capacity(kinds.len());
        let mut passed = 0;
        let mut failed = 0;

        info!("Running {} scenario(s)...", kinds.len());

        for kind in kinds {
            let scenario = self.plan(*kind);
            let result = self.run(&scenario).await;

            if result.success {
                passed += 1;
                info!("✓ {} ({} ms)", result.name, result.duration_ms);
            } else {
                failed += 1;
                error!(
                    "✗ {} - {}",
                    result.name,
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }
            results.push(result);
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Scenario Results: {} passed, {} failed ({} ms)",
            passed, failed, duration_ms
        );

        SuiteResult {
            started_at,
            total: kinds.len(),
            passed,
            failed,
            duration_ms,
            results,
        }
    }
}

/// Write suite results as JSON into `output_dir`
pub fn write_results(output_dir: &Path, results: &SuiteResult) -> E2eResult<PathBuf> {
    std::fs::create_dir_all(output_dir)?;

    let path = output_dir.join("scenario-results.json");
    let json = serde_json::to_string_pretty(results)?;
    std::fs::write(&path, json)?;

    info!("Results written to: {}", path.display());
    Ok(path)
}
