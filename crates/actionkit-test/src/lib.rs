//! Golden-fixture test harness for actionkit actions.
//!
//! A suite is a directory of test cases. Each case holds an input file, an
//! optional expected rendition, optional `params.json`, an optional
//! `validate` script and optional mock specs. [`TestOrchestrator`] runs all
//! cases against one action container and [`ResultsCollector`] turns the
//! outcomes into JUnit XML, a timing CSV and a console summary.

pub mod error;
pub mod fixture;
pub mod orchestrator;
pub mod results;
pub mod staging;
pub mod validate;
pub mod worker;

pub use error::{Result, SuiteError};
pub use fixture::{discover_cases, CasePattern, Expectation, Fixture, FixtureFiles, LocalFiles, TestCase};
pub use orchestrator::{classify, RenditionCheck, SuiteOptions, SuiteOutcome, TestOrchestrator, Verdict};
pub use results::{Outcome, ReportPaths, ResultsCollector, TestResult, TestSuiteReport};
pub use staging::StagingDirs;
pub use worker::{run_once, RunOutcome, RunRequest};
