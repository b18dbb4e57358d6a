//! Runs a golden-fixture suite against one action.
//!
//! One action container serves the whole suite. Per test case the
//! orchestrator starts the declared mocks, stages the fixture, invokes the
//! action once and classifies the outcome; staging directories are emptied
//! and mocks stopped whatever the outcome. Cases run strictly in sequence.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use actionkit_core::mock::READY_TIMEOUT;
use actionkit_core::runtime::Mount;
use actionkit_core::{
    obs, ActionDescriptor, ActionRunner, ContainerRuntime, HarnessConfig, HarnessError,
    MockService, RunnerConfig, TestLog,
};
use serde_json::{json, Value};
use tracing::{info, warn, Instrument};

use crate::error::{Result, SuiteError};
use crate::fixture::{
    discover_cases, suite_uses_mocks, CasePattern, Expectation, Fixture, FixtureFiles, LocalFiles,
    TestCase, RENDITION_PREFIX,
};
use crate::results::{format_duration, Outcome, PendingResult, ReportPaths, ResultsCollector, TestSuiteReport};
use crate::staging::StagingDirs;
use crate::validate::validate_rendition;

const REQUEST_ID_SEPARATOR: &str = "-----------------------------------------------";
const MOCK_CRT_MOUNT: &str = "/mock-crt";

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// What to run and where to put the artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuiteOptions {
    /// Directory whose sub-directories are the test cases.
    pub tests_dir: PathBuf,
    pub build_dir: PathBuf,
    /// Only run test cases whose name matches this glob.
    pub pattern: Option<String>,
    /// Overwrite expected renditions with the actual output on mismatch.
    pub update_renditions: bool,
    /// Unique id of this run, safe for file and container names.
    pub run_id: String,
}

impl SuiteOptions {
    pub fn new(tests_dir: impl Into<PathBuf>, build_dir: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self {
            tests_dir: tests_dir.into(),
            build_dir: build_dir.into(),
            pattern: None,
            update_renditions: false,
            run_id: run_id.into(),
        }
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn with_update_renditions(mut self, update: bool) -> Self {
        self.update_renditions = update;
        self
    }

    /// `<build>/test-results/test-<action>`
    pub fn results_dir(&self, action: &str) -> PathBuf {
        self.build_dir.join("test-results").join(format!("test-{action}"))
    }

    /// `<build>/test-worker/<action>`
    pub fn staging_root(&self, action: &str) -> PathBuf {
        self.build_dir.join("test-worker").join(action)
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Outcome of one test case plus its message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub outcome: Outcome,
    pub message: Option<String>,
}

impl Verdict {
    pub fn passed() -> Self {
        Self {
            outcome: Outcome::Passed,
            message: None,
        }
    }

    pub fn expected_error() -> Self {
        Self {
            outcome: Outcome::ExpectedError,
            message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Failed,
            message: Some(message.into()),
        }
    }

    pub fn errored(message: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Errored,
            message: Some(message.into()),
        }
    }

    pub fn skipped(message: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Skipped,
            message: Some(message.into()),
        }
    }
}

/// Result of checking the produced rendition against the expected one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenditionCheck {
    Matches,
    /// Mismatch, but the expected file was replaced by the actual output.
    Updated,
    Missing,
    Mismatch(String),
    /// The validation itself could not run.
    Broken(String),
}

/// First entry of a result's `renditionErrors` list.
pub fn rendition_error(result: &Value) -> Option<&Value> {
    result.get("renditionErrors")?.as_array()?.first()
}

fn rendition_error_reason(error: &Value) -> String {
    ["reason", "name", "message"]
        .iter()
        .find_map(|key| error.get(key).and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string())
}

/// Classify an invocation against what the fixture expects.
///
/// `rendition` is the check of the produced output; it is only consulted
/// for a successful invocation that must produce a rendition.
pub fn classify(
    expectation: &Expectation,
    invocation: &std::result::Result<Value, HarnessError>,
    rendition: Option<RenditionCheck>,
) -> Verdict {
    use HarnessError::{UnexpectedOutcome, ValidationFailure};

    match (expectation, invocation) {
        (Expectation::Rendition(_), Err(e)) => Verdict::errored(e.to_string()),
        (Expectation::Rendition(_), Ok(_)) => match rendition {
            Some(RenditionCheck::Matches) | Some(RenditionCheck::Updated) => Verdict::passed(),
            Some(RenditionCheck::Mismatch(message)) => Verdict::failed(ValidationFailure(message).to_string()),
            Some(RenditionCheck::Broken(message)) => Verdict::errored(message),
            Some(RenditionCheck::Missing) | None => {
                Verdict::failed(ValidationFailure("No rendition generated".to_string()).to_string())
            }
        },
        (Expectation::Error(expected), Err(e)) => {
            let reasons = e.failure_reasons();
            if reasons.iter().any(|r| r == expected) {
                Verdict::expected_error()
            } else {
                Verdict::errored(
                    UnexpectedOutcome(format!(
                        "Expected error '{}' but got '{}'",
                        expected,
                        reasons.first().map(String::as_str).unwrap_or_default()
                    ))
                    .to_string(),
                )
            }
        }
        (Expectation::Error(expected), Ok(result)) => match rendition_error(result) {
            Some(error)
                if [error.get("reason"), error.get("name")]
                    .iter()
                    .flatten()
                    .any(|v| v.as_str() == Some(expected.as_str())) =>
            {
                Verdict::expected_error()
            }
            Some(error) => Verdict::errored(
                UnexpectedOutcome(format!(
                    "Expected error '{}' but got '{}'",
                    expected,
                    rendition_error_reason(error)
                ))
                .to_string(),
            ),
            None => Verdict::failed(
                UnexpectedOutcome(format!("Expected error '{expected}' but none occurred")).to_string(),
            ),
        },
        (Expectation::FormatOnly(_) | Expectation::Nothing, Err(e)) => Verdict::errored(e.to_string()),
        (Expectation::FormatOnly(_) | Expectation::Nothing, Ok(_)) => Verdict::errored(
            UnexpectedOutcome(
                "Missing expected rendition and no expected 'errorReason' in params.json".to_string(),
            )
            .to_string(),
        ),
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Report and artifact locations of a suite run.
#[derive(Debug, Clone)]
pub struct SuiteOutcome {
    pub report: TestSuiteReport,
    pub paths: ReportPaths,
    /// The run stopped before every case ran.
    pub aborted: bool,
}

impl SuiteOutcome {
    pub fn summary(&self) -> String {
        if self.aborted {
            self.report.aborted_summary(&self.paths)
        } else {
            self.report.summary(&self.paths)
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.report.exit_code()
    }
}

pub struct TestOrchestrator {
    action: ActionDescriptor,
    options: SuiteOptions,
    harness: HarnessConfig,
    runtime: Arc<dyn ContainerRuntime>,
    files: Arc<dyn FixtureFiles>,
    mock_ready_timeout: Duration,
    log: TestLog,
    // live resources, released by shutdown() on every exit path
    runner: Option<ActionRunner>,
    mocks: Vec<MockService>,
    dirs: Option<StagingDirs>,
}

impl TestOrchestrator {
    pub fn new(
        action: ActionDescriptor,
        options: SuiteOptions,
        harness: HarnessConfig,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Self {
        Self {
            action,
            options,
            harness,
            runtime,
            files: Arc::new(LocalFiles),
            mock_ready_timeout: READY_TIMEOUT,
            log: TestLog::disabled(),
            runner: None,
            mocks: Vec::new(),
            dirs: None,
        }
    }

    pub fn with_fixture_files(mut self, files: Arc<dyn FixtureFiles>) -> Self {
        self.files = files;
        self
    }

    pub fn with_mock_ready_timeout(mut self, timeout: Duration) -> Self {
        self.mock_ready_timeout = timeout;
        self
    }

    pub fn options(&self) -> &SuiteOptions {
        &self.options
    }

    pub fn report_paths(&self) -> ReportPaths {
        ReportPaths::in_dir(&self.options.results_dir(&self.action.name))
    }

    /// Run the suite and write the reports.
    ///
    /// Only a missing tests directory, a failing action start or a staging
    /// I/O error fail the run; everything else becomes a test outcome. A
    /// failed run is a [`SuiteError::Aborted`] carrying the partial report.
    pub async fn run(&mut self) -> Result<SuiteOutcome> {
        let span = obs::suite_span(&self.action.name);
        self.run_suite().instrument(span).await
    }

    /// Best-effort release of every live resource: mocks, the action
    /// container and the staging directories. Safe to call repeatedly.
    pub async fn shutdown(&mut self) {
        self.stop_mocks().await;
        if let Some(mut runner) = self.runner.take() {
            if let Err(e) = runner.stop().await {
                obs::emit_cleanup_warning("action container", &e);
            }
        }
        if let Some(dirs) = self.dirs.take() {
            if let Err(e) = dirs.cleanup() {
                obs::emit_cleanup_warning("staging directories", &e);
            }
        }
    }

    // -------------------------------< internal >--------------------------

    async fn run_suite(&mut self) -> Result<SuiteOutcome> {
        let suite_name = format!("Worker unit tests for {}", self.action.name);
        let mut collector = ResultsCollector::new(&suite_name);

        let ran = self.run_cases(&mut collector).await;
        self.shutdown().await;

        // the cases that did run are reported even when the suite stops early
        let report = collector.complete();
        let results_dir = self.options.results_dir(&self.action.name);
        let written = report.write_reports(&results_dir);
        self.log
            .timestamped(format!("Finished tests for {}.", self.action.name));
        obs::emit_suite_finished(
            &suite_name,
            (report.time_secs * 1000.0) as u64,
            report.total_run(),
            report.failures(),
            report.errors(),
        );
        let mut outcome = SuiteOutcome {
            report,
            paths: ReportPaths::in_dir(&results_dir),
            aborted: false,
        };

        let cause = match (ran, written) {
            (Ok(()), Ok(_)) => return Ok(outcome),
            (Ok(()), Err(e)) => SuiteError::from(e),
            (Err(cause), Ok(_)) => cause,
            (Err(cause), Err(e)) => {
                obs::emit_cleanup_warning("test reports", &e);
                cause
            }
        };
        outcome.aborted = true;
        Err(SuiteError::Aborted {
            outcome: Box::new(outcome),
            cause: Box::new(cause),
        })
    }

    async fn run_cases(&mut self, collector: &mut ResultsCollector) -> Result<()> {
        let tests_dir = self.options.tests_dir.clone();
        if !tests_dir.is_dir() {
            return Err(SuiteError::NoTests(tests_dir));
        }
        let pattern = self
            .options
            .pattern
            .as_deref()
            .map(CasePattern::new)
            .transpose()?;
        let cases = discover_cases(&tests_dir, pattern.as_ref())?;

        self.log = TestLog::create(self.report_paths().log)?;
        self.log.timestamped(format!(
            "Running tests for {} in {}",
            self.action.name,
            tests_dir.display()
        ));
        obs::emit_suite_started(&self.action.name, &tests_dir.display().to_string());

        self.prepare(&cases).await?;

        println!("Test cases:");
        println!();
        for case in &cases {
            self.run_case(case, collector).await?;
        }
        println!();
        Ok(())
    }

    /// Create the staging area and start the shared action container.
    async fn prepare(&mut self, cases: &[TestCase]) -> Result<()> {
        let dirs = StagingDirs::new(
            self.options.staging_root(&self.action.name),
            &self.options.run_id,
        );
        dirs.prepare()?;
        self.dirs = Some(dirs.clone());

        let mut config = RunnerConfig::from_harness(&self.harness)
            .worker(&dirs.input, &dirs.output)
            .with_container_name(format!(
                "actionkit-testworker-{}-{}",
                self.action.name, self.options.run_id
            ));
        if suite_uses_mocks(cases) {
            config = self.trust_mock_ca(config, &dirs)?;
        }

        let action = self.action.name.clone();
        let runner = ActionRunner::new(self.action.clone(), config, self.runtime.clone())
            .with_log(self.log.clone());
        let runner = self.runner.insert(runner);
        runner
            .start()
            .await
            .map_err(|source| SuiteError::ActionStart { action, source })
    }

    /// Hand the mock services' CA certificate to the action container.
    fn trust_mock_ca(&self, config: RunnerConfig, dirs: &StagingDirs) -> Result<RunnerConfig> {
        let Some(cert) = &self.harness.mock_ca_cert else {
            warn!("test cases use mock services but no CA certificate is configured (ACTIONKIT_MOCK_CA_CERT)");
            return Ok(config);
        };
        let file_name = cert
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| HarnessError::InvalidFixture(format!("invalid CA certificate path {}", cert.display())))?;
        std::fs::copy(cert, dirs.mock_crt.join(&file_name))
            .map_err(|e| HarnessError::io("failed to copy CA certificate", cert, e))?;
        Ok(config
            .with_mount(Mount::read_only(&dirs.mock_crt, MOCK_CRT_MOUNT))
            .with_env("NODE_EXTRA_CA_CERTS", format!("{MOCK_CRT_MOUNT}/{file_name}")))
    }

    async fn run_case(&mut self, case: &TestCase, collector: &mut ResultsCollector) -> Result<()> {
        println!(" - {}", case.name);
        obs::emit_case_started(&case.name);

        let mut pending = collector.begin_case(&case.name);
        let verdict = match self.exercise(case, &mut pending).await {
            Ok(verdict) => verdict,
            Err(e) => {
                collector.finish(pending, Outcome::Errored, Some(e.to_string()));
                return Err(e);
            }
        };

        let elapsed = pending.elapsed();
        self.print_verdict(&verdict, elapsed);
        obs::emit_case_finished(&case.name, verdict.outcome.as_str(), elapsed.as_millis() as u64);
        collector.finish(pending, verdict.outcome, verdict.message);
        Ok(())
    }

    async fn exercise(&mut self, case: &TestCase, pending: &mut PendingResult) -> Result<Verdict> {
        let fixture = match Fixture::load(&case.name, &case.dir, self.files.as_ref()).await {
            Ok(fixture) => fixture,
            Err(e) => return Ok(Verdict::errored(e.to_string())),
        };
        let Some(source) = fixture.source.clone() else {
            return Ok(Verdict::skipped("no test input file found"));
        };
        let expectation = match fixture.expectation() {
            Ok(expectation) => expectation,
            Err(e) => return Ok(Verdict::errored(e.to_string())),
        };
        if expectation == Expectation::Nothing {
            return Ok(Verdict::skipped(
                "no expected rendition, 'fmt' or 'errorReason' in params.json",
            ));
        }

        let mut scope = self.log.begin_case(format!(
            "Running test case: {} from {}",
            case.name,
            case.dir.display()
        ));
        let verdict = self
            .invoke(&fixture, &source, &expectation, pending, &mut scope)
            .await;

        // whatever happened, the next case starts from a clean slate
        self.stop_mocks().await;
        let emptied = match &self.dirs {
            Some(dirs) => dirs.empty(),
            None => Ok(()),
        };
        drop(scope);

        let verdict = verdict?;
        emptied?;
        Ok(verdict)
    }

    async fn invoke(
        &mut self,
        fixture: &Fixture,
        source: &Path,
        expectation: &Expectation,
        pending: &mut PendingResult,
        scope: &mut actionkit_core::CaseScope,
    ) -> Result<Verdict> {
        if let Err(e) = self.start_mocks(fixture).await {
            scope.begin_validation();
            return Ok(Verdict::errored(e.to_string()));
        }

        let dirs = self
            .dirs
            .clone()
            .ok_or(HarnessError::InvalidState("staging directories not prepared"))?;
        dirs.stage_fixture(&fixture.dir, source)?;

        let params = json!({
            "source": file_name(source),
            "renditions": [fixture.rendition_request()],
            "requestId": format!("Test: {} {}", fixture.name, REQUEST_ID_SEPARATOR),
        });

        let runner = self
            .runner
            .as_ref()
            .ok_or(HarnessError::InvalidState("action runner not started"))?;
        let started = Instant::now();
        let invocation = runner.run(params).await;
        if invocation.is_ok() {
            pending.record_processing(started.elapsed());
        }

        scope.begin_validation();
        match &invocation {
            Ok(result) => match rendition_error(result) {
                Some(error) => scope.log().line(format!("Rendition error: {error}")),
                None if matches!(expectation, Expectation::Error(_)) => scope
                    .log()
                    .line(format!("Expected error, but no rendition error in result: {result}")),
                None => {}
            },
            Err(e) => scope.log().line(format!("Invocation failed: {e}")),
        }

        let check = match (expectation, &invocation) {
            (Expectation::Rendition(expected), Ok(_)) => {
                Some(self.check_rendition(fixture, expected, &dirs).await)
            }
            _ => None,
        };
        Ok(classify(expectation, &invocation, check))
    }

    async fn check_rendition(
        &self,
        fixture: &Fixture,
        expected: &Path,
        dirs: &StagingDirs,
    ) -> RenditionCheck {
        let Some(actual) = find_rendition(dirs, fixture.rendition_name().as_deref()) else {
            self.log.line("Validation failed: No rendition generated");
            return RenditionCheck::Missing;
        };

        match validate_rendition(fixture.validate.as_deref(), expected, &actual, &self.log).await {
            Ok(None) => RenditionCheck::Matches,
            Ok(Some(message)) => {
                // keep the bad output around for inspection
                if let Err(e) = archive_rendition(dirs, &fixture.name, &actual) {
                    obs::emit_cleanup_warning("failed rendition", &e);
                }
                if !self.options.update_renditions {
                    return RenditionCheck::Mismatch(message);
                }
                println!("Updating expected rendition {}", expected.display());
                match std::fs::copy(&actual, expected) {
                    Ok(_) => RenditionCheck::Updated,
                    Err(e) => RenditionCheck::Broken(
                        HarnessError::io("failed to update expected rendition", expected, e)
                            .to_string(),
                    ),
                }
            }
            Err(e) => RenditionCheck::Broken(e.to_string()),
        }
    }

    async fn start_mocks(&mut self, fixture: &Fixture) -> actionkit_core::Result<()> {
        self.stop_mocks().await;
        let container = match &self.runner {
            Some(runner) => runner.container_name().to_string(),
            None => return Err(HarnessError::InvalidState("action runner not started")),
        };

        for file in &fixture.mocks {
            let mock = MockService::new(file, container.clone(), self.runtime.clone())?
                .with_ready_timeout(self.mock_ready_timeout);
            info!(host = %mock.host(), "starting mock");
            self.mocks.push(mock);
            let started = match self.mocks.last() {
                Some(mock) => mock.start().await,
                None => Ok(()),
            };
            if let Err(e) = started {
                // a failed start has already cleaned up after itself
                self.mocks.pop();
                return Err(e);
            }
        }
        Ok(())
    }

    async fn stop_mocks(&mut self) {
        while let Some(mock) = self.mocks.last() {
            mock.stop(false).await;
            self.mocks.pop();
        }
    }

    fn print_verdict(&self, verdict: &Verdict, elapsed: Duration) {
        let time = format_duration(elapsed.as_secs_f64());
        let message = verdict.message.as_deref().unwrap_or_default();
        let log = self.report_paths().log;
        match verdict.outcome {
            Outcome::Passed => println!("      ✔  Succeeded. {time}"),
            Outcome::ExpectedError => println!("      ✔  Succeeded (expected error). {time}"),
            Outcome::Failed => println!(
                "      ✖  Failure: {message}. Check {}. {time}",
                log.display()
            ),
            Outcome::Errored => println!(
                "      ✖  Error: {message}. Check {}. {time}",
                log.display()
            ),
            Outcome::Skipped => println!("      o Skipping: {message}"),
        }
    }
}

/// The produced rendition: the requested name, else the first `rendition*`.
fn find_rendition(dirs: &StagingDirs, name: Option<&str>) -> Option<PathBuf> {
    if let Some(name) = name {
        let path = dirs.output.join(name);
        if path.is_file() {
            return Some(path);
        }
    }
    dirs.output_files().into_iter().find(|p| {
        p.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(RENDITION_PREFIX.trim_end_matches('.')))
    })
}

fn archive_rendition(dirs: &StagingDirs, case: &str, actual: &Path) -> actionkit_core::Result<PathBuf> {
    let target_dir = dirs.failed.join(case);
    std::fs::create_dir_all(&target_dir)
        .map_err(|e| HarnessError::io("failed to create", &target_dir, e))?;
    let target = target_dir.join(actual.file_name().unwrap_or_default());
    std::fs::copy(actual, &target).map_err(|e| HarnessError::io("failed to archive", actual, e))?;
    Ok(target)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn protocol_error(payload: Value) -> HarnessError {
        HarnessError::InvocationProtocol {
            action: "worker".to_string(),
            status: Some(502),
            error: Some(payload),
        }
    }

    fn rendition() -> Expectation {
        Expectation::Rendition(PathBuf::from("rendition.jpg"))
    }

    #[test]
    fn test_rendition_expectations() {
        let ok = Ok(json!({}));
        assert_eq!(
            classify(&rendition(), &ok, Some(RenditionCheck::Matches)).outcome,
            Outcome::Passed
        );
        assert_eq!(
            classify(&rendition(), &ok, Some(RenditionCheck::Updated)).outcome,
            Outcome::Passed
        );
        assert_eq!(
            classify(&rendition(), &ok, Some(RenditionCheck::Missing)),
            Verdict::failed("No rendition generated")
        );
        assert_eq!(
            classify(&rendition(), &ok, Some(RenditionCheck::Mismatch("differs".into()))),
            Verdict::failed("differs")
        );
        let err = Err(protocol_error(json!("boom")));
        assert_eq!(classify(&rendition(), &err, None).outcome, Outcome::Errored);
    }

    #[test]
    fn test_verdict_messages_follow_failure_taxonomy() {
        let mismatch = classify(&rendition(), &Ok(json!({})), Some(RenditionCheck::Mismatch("differs".into())));
        assert_eq!(
            mismatch.message,
            Some(HarnessError::ValidationFailure("differs".into()).to_string())
        );

        let expected = Expectation::Error("SourceCorrupt".to_string());
        let verdict = classify(&expected, &Ok(json!({})), None);
        assert_eq!(
            verdict.message,
            Some(
                HarnessError::UnexpectedOutcome("Expected error 'SourceCorrupt' but none occurred".into())
                    .to_string()
            )
        );
    }

    #[test]
    fn test_thrown_error_reason() {
        let expected = Expectation::Error("unsupportedType".to_string());
        let matching = Err(protocol_error(json!("unsupportedType")));
        assert_eq!(classify(&expected, &matching, None), Verdict::expected_error());

        let other = Err(protocol_error(json!({"reason": "SourceCorrupt"})));
        assert_eq!(
            classify(&expected, &other, None),
            Verdict::errored("Expected error 'unsupportedType' but got 'SourceCorrupt'")
        );
    }

    #[test]
    fn test_rendition_error_reason() {
        let expected = Expectation::Error("SourceUnsupported".to_string());
        let by_reason = Ok(json!({"renditionErrors": [{"reason": "SourceUnsupported"}]}));
        assert_eq!(classify(&expected, &by_reason, None), Verdict::expected_error());

        let by_name = Ok(json!({"renditionErrors": [{"name": "SourceUnsupported", "reason": "x"}]}));
        assert_eq!(classify(&expected, &by_name, None), Verdict::expected_error());

        let differs = Ok(json!({"renditionErrors": [{"reason": "RenditionTooLarge"}]}));
        assert_eq!(classify(&expected, &differs, None).outcome, Outcome::Errored);

        let none = Ok(json!({"renditions": []}));
        let verdict = classify(&expected, &none, None);
        assert_eq!(verdict.outcome, Outcome::Failed);
        assert_eq!(
            verdict.message.as_deref(),
            Some("Expected error 'SourceUnsupported' but none occurred")
        );
    }

    #[test]
    fn test_format_only_never_passes() {
        let expected = Expectation::FormatOnly("png".to_string());
        assert_eq!(classify(&expected, &Ok(json!({})), None).outcome, Outcome::Errored);
        let err = Err(protocol_error(json!("boom")));
        assert_eq!(classify(&expected, &err, None).outcome, Outcome::Errored);
    }

    #[test]
    fn test_suite_paths() {
        let options = SuiteOptions::new("tests", "build", "run_1");
        assert_eq!(
            options.results_dir("worker"),
            PathBuf::from("build/test-results/test-worker")
        );
        assert_eq!(options.staging_root("worker"), PathBuf::from("build/test-worker/worker"));
    }

    #[test]
    fn test_find_rendition_falls_back_to_prefix() {
        let base = tempfile::tempdir().unwrap();
        let dirs = StagingDirs::new(base.path(), "run");
        dirs.prepare().unwrap();
        assert_eq!(find_rendition(&dirs, Some("rendition.png")), None);

        std::fs::write(dirs.output.join("rendition0.png"), "x").unwrap();
        assert_eq!(
            find_rendition(&dirs, Some("rendition.png")),
            Some(dirs.output.join("rendition0.png"))
        );
        std::fs::write(dirs.output.join("rendition.png"), "x").unwrap();
        assert_eq!(
            find_rendition(&dirs, Some("rendition.png")),
            Some(dirs.output.join("rendition.png"))
        );
    }
}
