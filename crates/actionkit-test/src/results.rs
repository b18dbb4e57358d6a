//! Test results: collection, counts and report rendering.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use actionkit_core::{HarnessError, Result};
use serde::{Deserialize, Serialize};

pub const RESULTS_FILE: &str = "test-results.xml";
pub const TIMING_FILE: &str = "test-timing-results.csv";
pub const LOG_FILE: &str = "test.log";

/// Classified outcome of one test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Outcome {
    Passed,
    Failed,
    Errored,
    Skipped,
    ExpectedError,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Passed => "passed",
            Outcome::Failed => "failed",
            Outcome::Errored => "errored",
            Outcome::Skipped => "skipped",
            Outcome::ExpectedError => "expectedError",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final record of one test case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub outcome: Outcome,
    /// Wall time in seconds; absent for skipped cases.
    pub time_secs: Option<f64>,
    /// Time spent in the invocation alone.
    pub processing_secs: Option<f64>,
    pub message: Option<String>,
}

/// A test case that has begun but not been classified yet.
///
/// Consumed by [`ResultsCollector::finish`], so every case is finalized
/// exactly once.
#[derive(Debug)]
pub struct PendingResult {
    name: String,
    started: Instant,
    processing: Option<Duration>,
}

impl PendingResult {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn record_processing(&mut self, elapsed: Duration) {
        self.processing = Some(elapsed);
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Ordered results and aggregate counts of one suite run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSuiteReport {
    pub name: String,
    pub results: Vec<TestResult>,
    /// Time spent running test cases.
    pub test_time_secs: f64,
    /// Total wall time, including container start and teardown.
    pub time_secs: f64,
}

impl TestSuiteReport {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            results: Vec::new(),
            test_time_secs: 0.0,
            time_secs: 0.0,
        }
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        self.results.iter().filter(|r| r.outcome == outcome).count()
    }

    pub fn passed(&self) -> usize {
        self.count(Outcome::Passed)
    }

    pub fn failures(&self) -> usize {
        self.count(Outcome::Failed)
    }

    pub fn errors(&self) -> usize {
        self.count(Outcome::Errored)
    }

    pub fn skipped(&self) -> usize {
        self.count(Outcome::Skipped)
    }

    pub fn expected_errors(&self) -> usize {
        self.count(Outcome::ExpectedError)
    }

    /// Every case that ran; skipped cases do not count.
    pub fn total_run(&self) -> usize {
        self.passed() + self.failures() + self.errors() + self.expected_errors()
    }

    /// Whether the process should report a non-zero status.
    pub fn has_failures(&self) -> bool {
        self.failures() > 0 || self.errors() > 0
    }

    pub fn exit_code(&self) -> i32 {
        if self.has_failures() {
            1
        } else {
            0
        }
    }

    /// JUnit-style XML report.
    pub fn to_junit_xml(&self) -> String {
        let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        let _ = writeln!(
            xml,
            "<testsuite name=\"{}\" time=\"{:.2}\" tests=\"{}\" failures=\"{}\" errors=\"{}\" skipped=\"{}\" expectedErrors=\"{}\">",
            escape_xml(&self.name),
            self.time_secs,
            self.results.len(),
            self.failures(),
            self.errors(),
            self.skipped(),
            self.expected_errors()
        );
        for result in &self.results {
            let mut open = format!("  <testcase name=\"{}\"", escape_xml(&result.name));
            if let Some(time) = result.time_secs {
                let _ = write!(open, " time=\"{time:.2}\"");
            }
            let message = escape_xml(result.message.as_deref().unwrap_or_default());
            let child = match result.outcome {
                Outcome::Failed => Some(format!("<failure message=\"{message}\"/>")),
                Outcome::Errored => Some(format!("<error message=\"{message}\"/>")),
                Outcome::Skipped => Some("<skipped/>".to_string()),
                Outcome::Passed | Outcome::ExpectedError => None,
            };
            match child {
                Some(child) => {
                    let _ = writeln!(xml, "{open}>\n    {child}\n  </testcase>");
                }
                None => {
                    let _ = writeln!(xml, "{open}/>");
                }
            }
        }
        xml.push_str("</testsuite>\n");
        xml
    }

    /// Timing breakdown as CSV with a trailing `total` row.
    pub fn to_timing_csv(&self) -> String {
        let mut csv = String::from("name,processing time,test time\n");
        let mut total_processing = 0.0;
        for result in &self.results {
            let name = escape_csv(&result.name);
            match (result.time_secs, result.processing_secs) {
                (None, _) => {
                    let _ = writeln!(csv, "{name},,");
                }
                (Some(time), None) => {
                    let _ = writeln!(csv, "{name},,{time:.3}");
                }
                (Some(time), Some(processing)) => {
                    total_processing += processing;
                    let _ = writeln!(csv, "{name},{processing:.3},{time:.3}");
                }
            }
        }
        let _ = writeln!(csv, "total,{:.3},{:.3}", total_processing, self.time_secs);
        csv
    }

    /// Write both report files into `dir`.
    pub fn write_reports(&self, dir: &Path) -> Result<ReportPaths> {
        std::fs::create_dir_all(dir)
            .map_err(|e| HarnessError::io("failed to create report directory", dir, e))?;
        let paths = ReportPaths::in_dir(dir);
        std::fs::write(&paths.results, self.to_junit_xml())
            .map_err(|e| HarnessError::io("problem writing test results", &paths.results, e))?;
        std::fs::write(&paths.timing, self.to_timing_csv())
            .map_err(|e| HarnessError::io("problem writing timing results", &paths.timing, e))?;
        Ok(paths)
    }

    /// Human-readable end-of-run summary.
    pub fn summary(&self, paths: &ReportPaths) -> String {
        let headline = match (self.failures() > 0, self.errors() > 0) {
            (true, true) => "error: There were test failures and errors.",
            (true, false) => "error: There were test failures.",
            (false, true) => "error: There were test errors.",
            (false, false) => "✔︎ All tests were successful.",
        };
        self.render_summary(headline, paths)
    }

    /// Summary of a run that stopped before all cases ran.
    pub fn aborted_summary(&self, paths: &ReportPaths) -> String {
        self.render_summary("error: The test run was aborted.", paths)
    }

    fn render_summary(&self, headline: &str, paths: &ReportPaths) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{headline}");
        let _ = writeln!(out, "  - Tests run      : {}", self.total_run());
        let _ = writeln!(out, "  - Failures       : {}", self.failures());
        let _ = writeln!(out, "  - Errors         : {}", self.errors());
        if self.skipped() > 0 {
            let _ = writeln!(out, "  - Skipped        : {}", self.skipped());
        }
        if self.expected_errors() > 0 {
            let _ = writeln!(out, "  - Expected errors: {}", self.expected_errors());
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "Test time : {}", format_duration(self.test_time_secs));
        let _ = writeln!(out, "Total time: {}", format_duration(self.time_secs));
        let _ = writeln!(out);
        let _ = writeln!(out, "Test results   : {}", paths.results.display());
        let _ = writeln!(out, "Timing results : {}", paths.timing.display());
        let _ = writeln!(out, "Test log       : {}", paths.log.display());
        out
    }
}

/// Locations of the report artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportPaths {
    pub results: PathBuf,
    pub timing: PathBuf,
    pub log: PathBuf,
}

impl ReportPaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            results: dir.join(RESULTS_FILE),
            timing: dir.join(TIMING_FILE),
            log: dir.join(LOG_FILE),
        }
    }
}

/// Accumulates results while a suite runs.
#[derive(Debug)]
pub struct ResultsCollector {
    report: TestSuiteReport,
    started: Instant,
    cases_started: Option<Instant>,
}

impl ResultsCollector {
    pub fn new(name: impl Into<String>) -> Self {
        Self::starting_at(name, Instant::now())
    }

    /// Collector whose total time counts from `started`.
    pub fn starting_at(name: impl Into<String>, started: Instant) -> Self {
        Self {
            report: TestSuiteReport::new(name),
            started,
            cases_started: None,
        }
    }

    pub fn begin_case(&mut self, name: impl Into<String>) -> PendingResult {
        let now = Instant::now();
        self.cases_started.get_or_insert(now);
        PendingResult {
            name: name.into(),
            started: now,
            processing: None,
        }
    }

    /// Record the classified outcome of a case.
    pub fn finish(
        &mut self,
        pending: PendingResult,
        outcome: Outcome,
        message: Option<String>,
    ) -> &TestResult {
        let time_secs = match outcome {
            Outcome::Skipped => None,
            _ => Some(pending.started.elapsed().as_secs_f64()),
        };
        self.report.results.push(TestResult {
            name: pending.name,
            outcome,
            time_secs,
            processing_secs: pending.processing.map(|d| d.as_secs_f64()),
            message,
        });
        &self.report.results[self.report.results.len() - 1]
    }

    pub fn report(&self) -> &TestSuiteReport {
        &self.report
    }

    /// Stop the clocks and hand out the report.
    pub fn complete(mut self) -> TestSuiteReport {
        self.report.test_time_secs = self
            .cases_started
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or_default();
        self.report.time_secs = self.started.elapsed().as_secs_f64();
        self.report
    }
}

/// `1s 234ms`
pub fn format_duration(secs: f64) -> String {
    let duration = Duration::from_secs_f64(secs.max(0.0));
    format!("{}s {}ms", duration.as_secs(), duration.subsec_millis())
}

fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            '\n' => out.push_str("&#10;"),
            c => out.push(c),
        }
    }
    out
}

fn escape_csv(s: &str) -> String {
    if s.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}
