//! uwf E2E harness entry point
//!
//! Run with: cargo run -p uwf-e2e -- --repo-root ../uwf

use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use uwf_e2e::scenario::write_results;
use uwf_e2e::{E2eResult, HarnessConfig, OutputMode, ScenarioKind, ScenarioRunner};

#[derive(Parser, Debug)]
#[command(name = "uwf-e2e")]
#[command(about = "End-to-end scenarios for the uwf build/start tool")]
#[command(version)]
struct Args {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Scenario to run (start-example, init-project); repeatable, default all
    #[arg(short, long = "scenario")]
    scenarios: Vec<String>,

    /// Root of the uwf repository
    #[arg(long)]
    repo_root: Option<PathBuf>,

    /// Home directory for the scratch project
    #[arg(long, env = "HOME")]
    home: Option<PathBuf>,

    /// URL the started app serves
    #[arg(long)]
    url: Option<String>,

    /// Availability timeout in seconds
    #[arg(long)]
    wait_timeout: Option<u64>,

    /// Forward child stdout through the log instead of inheriting it
    #[arg(long)]
    log_output: bool,

    /// Output directory for results
    #[arg(short, long, default_value = "test-results")]
    output: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn main() {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to create tokio runtime: {}", e);
            std::process::exit(2);
        }
    };

    match rt.block_on(async_main(args)) {
        Ok(true) => std::process::exit(0),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    }
}

fn build_config(args: &Args) -> E2eResult<HarnessConfig> {
    let mut config = match &args.config {
        Some(path) => HarnessConfig::load(path)?,
        None => HarnessConfig::default(),
    };

    if let Some(repo_root) = &args.repo_root {
        config.repo_root = repo_root.clone();
    }
    if let Some(home) = &args.home {
        config.home_dir = home.clone();
    }
    if let Some(url) = &args.url {
        config.app_url = url.clone();
    }
    if let Some(secs) = args.wait_timeout {
        config.wait_timeout_secs = secs;
    }
    if args.log_output {
        config.output = OutputMode::Log;
    }

    config.validate()?;
    Ok(config)
}

async fn async_main(args: Args) -> E2eResult<bool> {
    let config = build_config(&args)?;

    let kinds = if args.scenarios.is_empty() {
        ScenarioKind::ALL.to_vec()
    } else {
        args.scenarios
            .iter()
            .map(|s| s.parse())
            .collect::<E2eResult<Vec<ScenarioKind>>>()?
    };

    info!(
        "Testing {} from {} against {}",
        config.tool,
        config.repo_root.display(),
        config.app_url
    );

    let runner = ScenarioRunner::system(config)?;
    let results = runner.run_all(&kinds).await;
    write_results(&args.output, &results)?;

    Ok(results.failed == 0)
}
