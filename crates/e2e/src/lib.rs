//! uwf E2E Test Harness
//!
//! This crate drives the `uwf` build/start tool end to end:
//! - Spawns the tool as a subprocess in its own process group
//! - Polls the app URL until the dev server answers
//! - Fetches the page and asserts on its `<title>`
//! - Kills the whole process tree and removes scratch directories
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ScenarioRunner<R: CommandRunner>            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  plan(kind) -> Scenario { steps }                           │
//! │    ├── prepare { dir }         ScratchDir::fresh            │
//! │    ├── run { command }         CommandRunner::run           │
//! │    ├── start { command }       CommandRunner::spawn         │
//! │    ├── wait { urls }           AvailabilityWaiter           │
//! │    ├── verify { url, title }   ContentVerifier              │
//! │    ├── terminate               ProcessTerminator            │
//! │    └── cleanup                 ScratchDir::remove           │
//! │  execute(scenario) -> releases app + dir on every path      │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod process;
pub mod scenario;
pub mod terminate;
pub mod verify;
pub mod wait;
pub mod workdir;

pub use config::{HarnessConfig, OutputMode, EXPECTED_TITLE};
pub use error::{E2eError, E2eResult};
pub use process::{CommandRunner, ExternalCommand, ProcessRunner, SpawnedProcess, SystemCommandRunner};
pub use scenario::{Scenario, ScenarioKind, ScenarioResult, ScenarioRunner, Step, SuiteResult};
pub use terminate::ProcessTerminator;
pub use verify::ContentVerifier;
pub use wait::AvailabilityWaiter;
pub use workdir::ScratchDir;
