//! Scenario runner tests against a fake package manager and a fixture app
//!
//! The fake records package manager calls and "starts" the app as a plain
//! `sleep`, while an axum server on an ephemeral port plays the dev server.

use async_trait::async_trait;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use uwf_e2e::scenario::write_results;
use uwf_e2e::terminate::tree_alive;
use uwf_e2e::{
    CommandRunner, E2eError, E2eResult, ExternalCommand, HarnessConfig, OutputMode,
    ProcessRunner, ScenarioKind, ScenarioRunner, SpawnedProcess, SystemCommandRunner,
    EXPECTED_TITLE,
};

#[derive(Clone, Default)]
struct FakeRunner {
    calls: Arc<Mutex<Vec<String>>>,
    pids: Arc<Mutex<Vec<u32>>>,
    fail_on: Option<&'static str>,
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, command: &ExternalCommand) -> E2eResult<()> {
        self.calls.lock().unwrap().push(command.to_string());

        match self.fail_on {
            Some(needle) if command.to_string().contains(needle) => {
                SystemCommandRunner::new(OutputMode::Null)
                    .run(&ExternalCommand::new("false", &command.cwd))
                    .await
            }
            _ => Ok(()),
        }
    }

    fn spawn(&self, command: &ExternalCommand) -> E2eResult<SpawnedProcess> {
        self.calls.lock().unwrap().push(command.to_string());
        let stand_in = ExternalCommand::new("sleep", &command.cwd).arg("30");
        let process = ProcessRunner::spawn(&stand_in, OutputMode::Null)?;
        self.pids.lock().unwrap().push(process.pid());
        Ok(process)
    }
}

struct Fixture {
    _root: TempDir,
    repo: PathBuf,
    home: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let root = tempfile::tempdir().unwrap();
        let repo = root.path().join("repo");
        let home = root.path().join("home");
        std::fs::create_dir_all(repo.join("examples/basic")).unwrap();
        std::fs::create_dir_all(repo.join("packages/uwf")).unwrap();
        std::fs::create_dir_all(&home).unwrap();

        Self {
            _root: root,
            repo,
            home,
        }
    }

    fn config(&self, app_url: &str) -> HarnessConfig {
        HarnessConfig {
            repo_root: self.repo.clone(),
            home_dir: self.home.clone(),
            app_url: app_url.to_string(),
            wait_timeout_secs: 1,
            poll_interval_ms: 20,
            max_poll_interval_ms: 100,
            termination_grace_ms: 1_000,
            termination_confirm_ms: 2_000,
            ..Default::default()
        }
    }

    fn user_dir(&self) -> PathBuf {
        self.home.join("tmpUserDir")
    }
}

async fn serve(body: &'static str) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().route("/", get(move || async move { Html(body) }));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn closed_port_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{}", port)
}

fn starter_kit_page() -> &'static str {
    "<!doctype html><html><head><title>React Starter Kit - www.reactstarterkit.com</title></head><body></body></html>"
}

fn assert_all_gone(pids: &[u32]) {
    for pid in pids {
        assert!(!tree_alive(*pid).unwrap(), "process tree {} still alive", pid);
    }
}

fn dir_is(path: &Path) -> bool {
    path.exists()
}

#[tokio::test]
async fn test_start_example_verifies_title_and_kills_app() {
    let fixture = Fixture::new();
    let url = serve(starter_kit_page()).await;
    let fake = FakeRunner::default();
    let runner = ScenarioRunner::new(fixture.config(&url), fake.clone()).unwrap();

    let scenario = runner.plan(ScenarioKind::StartExample);
    runner.execute(&scenario).await.unwrap();

    assert_eq!(
        *fake.calls.lock().unwrap(),
        vec!["yarn run uwf start --silent".to_string()]
    );
    let pids = fake.pids.lock().unwrap().clone();
    assert_eq!(pids.len(), 1);
    assert_all_gone(&pids);
}

#[tokio::test]
async fn test_init_project_replaces_leftovers_and_removes_user_dir() {
    let fixture = Fixture::new();
    std::fs::create_dir_all(fixture.user_dir().join("node_modules")).unwrap();
    std::fs::write(fixture.user_dir().join("stale.txt"), "previous run").unwrap();

    let url = serve(starter_kit_page()).await;
    let fake = FakeRunner::default();
    let runner = ScenarioRunner::new(fixture.config(&url), fake.clone()).unwrap();

    let result = runner.run(&runner.plan(ScenarioKind::InitProject)).await;
    assert!(result.success, "{:?}", result.error);

    let packed = fixture.user_dir().join("uwf-packed.tgz");
    assert_eq!(
        *fake.calls.lock().unwrap(),
        vec![
            "yarn init --yes".to_string(),
            format!("yarn pack --filename {}", packed.display()),
            "yarn --force add -D ./uwf-packed.tgz".to_string(),
            "yarn add react react-dom classnames node-fetch normalize.css".to_string(),
            "yarn uwf init --verbose".to_string(),
            "yarn run uwf start --silent".to_string(),
        ]
    );
    assert!(!dir_is(&fixture.user_dir()));
    assert_all_gone(&fake.pids.lock().unwrap());
    assert!(result.steps.iter().all(|s| s.success));
    assert_eq!(result.steps.last().unwrap().step_name, "cleanup");
}

#[tokio::test]
async fn test_failing_install_aborts_and_still_removes_user_dir() {
    let fixture = Fixture::new();
    let url = serve(starter_kit_page()).await;
    let fake = FakeRunner {
        fail_on: Some("add -D"),
        ..Default::default()
    };
    let runner = ScenarioRunner::new(fixture.config(&url), fake.clone()).unwrap();

    let err = runner
        .execute(&runner.plan(ScenarioKind::InitProject))
        .await
        .unwrap_err();

    assert!(matches!(err, E2eError::CommandFailed { .. }), "{:?}", err);
    assert_eq!(fake.calls.lock().unwrap().len(), 3);
    assert!(fake.pids.lock().unwrap().is_empty());
    assert!(!dir_is(&fixture.user_dir()));
}

#[tokio::test]
async fn test_wrong_title_is_assertion_failure_and_app_is_released() {
    let fixture = Fixture::new();
    let url = serve("<html><head><title>Some Other App</title></head></html>").await;
    let fake = FakeRunner::default();
    let runner = ScenarioRunner::new(fixture.config(&url), fake.clone()).unwrap();

    let err = runner
        .execute(&runner.plan(ScenarioKind::InitProject))
        .await
        .unwrap_err();

    match err {
        E2eError::AssertionFailed { expected, actual } => {
            assert_eq!(expected, EXPECTED_TITLE);
            assert_eq!(actual, "Some Other App");
        }
        other => panic!("expected AssertionFailed, got {:?}", other),
    }
    assert_all_gone(&fake.pids.lock().unwrap());
    assert!(!dir_is(&fixture.user_dir()));
}

#[tokio::test]
async fn test_page_without_title_is_missing_title() {
    let fixture = Fixture::new();
    let url = serve("<html><body>loading</body></html>").await;
    let fake = FakeRunner::default();
    let runner = ScenarioRunner::new(fixture.config(&url), fake.clone()).unwrap();

    let err = runner
        .execute(&runner.plan(ScenarioKind::StartExample))
        .await
        .unwrap_err();

    assert!(matches!(err, E2eError::MissingTitle(_)), "{:?}", err);
    assert_all_gone(&fake.pids.lock().unwrap());
}

#[tokio::test]
async fn test_unreachable_app_times_out_before_any_fetch() {
    let fixture = Fixture::new();
    let fake = FakeRunner::default();
    let runner = ScenarioRunner::new(fixture.config(&closed_port_url()), fake.clone()).unwrap();

    let result = runner.run(&runner.plan(ScenarioKind::StartExample)).await;

    assert!(!result.success);
    assert_eq!(result.error_kind.as_deref(), Some("timeout"));
    let names: Vec<_> = result.steps.iter().map(|s| s.step_name.as_str()).collect();
    assert!(names.last().unwrap().starts_with("wait:"));
    assert!(!names.iter().any(|n| n.starts_with("verify:")));
    assert_all_gone(&fake.pids.lock().unwrap());
}

#[tokio::test]
async fn test_scenario_timeout_cancels_and_kills_app() {
    let fixture = Fixture::new();
    let fake = FakeRunner::default();
    let mut config = fixture.config(&closed_port_url());
    config.wait_timeout_secs = 30;
    let runner = ScenarioRunner::new(config, fake.clone()).unwrap();

    let mut scenario = runner.plan(ScenarioKind::InitProject);
    scenario.timeout = Duration::from_millis(300);
    let result = runner.run(&scenario).await;

    assert_eq!(result.error_kind.as_deref(), Some("scenario_timeout"));
    assert!(!dir_is(&fixture.user_dir()));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_all_gone(&fake.pids.lock().unwrap());
}

#[tokio::test]
async fn test_run_all_serializes_and_writes_report() {
    let fixture = Fixture::new();
    let url = serve(starter_kit_page()).await;
    let runner = ScenarioRunner::new(fixture.config(&url), FakeRunner::default()).unwrap();

    let suite = runner.run_all(&ScenarioKind::ALL).await;
    assert_eq!(suite.total, 2);
    assert_eq!(suite.passed, 2);
    assert_eq!(suite.failed, 0);

    let out = tempfile::tempdir().unwrap();
    let path = write_results(out.path(), &suite).unwrap();
    let report: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(report["results"][0]["name"], "start-example");
    assert_eq!(report["results"][1]["name"], "init-project");
}
