//! Test case discovery and fixture loading.
//!
//! One test case is one sub-directory of the suite's tests directory:
//!
//! ```text
//! tests/
//!   simple-jpg/
//!     file.jpg               input (first `file*` match)
//!     rendition.png          expected output, extension gives the format
//!     params.json            optional: fmt, errorReason, rendition overrides
//!     validate               optional: `validate <expected> <actual>`
//!     mock-example.com.json  optional: mocked dependency
//! ```

use std::path::{Path, PathBuf};

use actionkit_core::mock::is_mock_spec;
use actionkit_core::{HarnessError, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

pub const SOURCE_PREFIX: &str = "file";
pub const RENDITION_PREFIX: &str = "rendition.";
pub const PARAMS_FILE: &str = "params.json";
pub const VALIDATE_SCRIPT: &str = "validate";

// ---------------------------------------------------------------------------
// Fixture file resolution
// ---------------------------------------------------------------------------

/// Turns a fixture file reference into a readable local path.
///
/// Fixtures may reference files kept in remote storage; fetching those is
/// up to the implementation.
#[async_trait]
pub trait FixtureFiles: Send + Sync {
    async fn resolve(&self, path: &Path) -> Result<PathBuf>;
}

/// Fixture files that are already on the local disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFiles;

#[async_trait]
impl FixtureFiles for LocalFiles {
    async fn resolve(&self, path: &Path) -> Result<PathBuf> {
        Ok(path.to_path_buf())
    }
}

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Schema of `params.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenditionParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fmt: Option<String>,
    /// Expected failure reason; never sent to the action.
    #[serde(rename = "errorReason", default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
    /// Any other rendition instructions, passed through as-is.
    #[serde(flatten)]
    pub overrides: Map<String, Value>,
}

impl RenditionParams {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| HarnessError::io("failed to read", path, e))?;
        let value: Value = serde_json::from_str(&text).map_err(|e| {
            HarnessError::InvalidFixture(format!("{} is not valid JSON: {e}", path.display()))
        })?;
        if !value.is_object() {
            return Err(HarnessError::InvalidFixture(format!(
                "{} must contain a JSON object",
                path.display()
            )));
        }
        serde_json::from_value(value)
            .map_err(|e| HarnessError::InvalidFixture(format!("{}: {e}", path.display())))
    }
}

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

/// What a test case expects from its invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expectation {
    /// Output must match this file.
    Rendition(PathBuf),
    /// Invocation must fail with this reason.
    Error(String),
    /// A format is requested, but there is nothing to compare against.
    FormatOnly(String),
    /// Nothing to validate.
    Nothing,
}

/// Complete input of one test case.
#[derive(Debug, Clone, PartialEq)]
pub struct Fixture {
    pub name: String,
    pub dir: PathBuf,
    pub source: Option<PathBuf>,
    pub expected_rendition: Option<PathBuf>,
    pub params: RenditionParams,
    pub validate: Option<PathBuf>,
    pub mocks: Vec<PathBuf>,
}

impl Fixture {
    pub async fn load(name: &str, dir: &Path, files: &dyn FixtureFiles) -> Result<Self> {
        let entries = list_files(dir)?;

        let source = match first_match(dir, &entries, SOURCE_PREFIX, "test input") {
            Some(path) => Some(files.resolve(&path).await?),
            None => None,
        };
        let expected_rendition =
            match first_match(dir, &entries, RENDITION_PREFIX, "expected rendition") {
                Some(path) => Some(files.resolve(&path).await?),
                None => None,
            };

        let params_file = dir.join(PARAMS_FILE);
        let params = if params_file.is_file() {
            RenditionParams::from_file(&params_file)?
        } else {
            RenditionParams::default()
        };

        let validate = Some(dir.join(VALIDATE_SCRIPT)).filter(|p| p.is_file());
        let mocks = entries
            .iter()
            .filter(|n| is_mock_spec(n))
            .map(|n| dir.join(n))
            .collect();

        Ok(Self {
            name: name.to_string(),
            dir: dir.to_path_buf(),
            source,
            expected_rendition,
            params,
            validate,
            mocks,
        })
    }

    /// Requested output format: explicit `fmt`, else the expected
    /// rendition's extension.
    pub fn format(&self) -> Option<String> {
        self.params.fmt.clone().or_else(|| {
            self.expected_rendition
                .as_deref()
                .and_then(Path::extension)
                .and_then(|e| e.to_str())
                .map(str::to_string)
        })
    }

    /// File name the action is asked to produce.
    pub fn rendition_name(&self) -> Option<String> {
        self.format().map(|fmt| format!("{RENDITION_PREFIX}{fmt}"))
    }

    pub fn expectation(&self) -> Result<Expectation> {
        match (&self.expected_rendition, &self.params.error_reason) {
            (Some(rendition), Some(_)) => Err(HarnessError::InvalidFixture(format!(
                "Invalid test case '{}': expects an error ('errorReason' in params.json) and a rendition ({})",
                self.name,
                rendition
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default()
            ))),
            (Some(rendition), None) => Ok(Expectation::Rendition(rendition.clone())),
            (None, Some(reason)) => Ok(Expectation::Error(reason.clone())),
            (None, None) => Ok(self
                .format()
                .map(Expectation::FormatOnly)
                .unwrap_or(Expectation::Nothing)),
        }
    }

    /// Rendition instruction sent to the action: `{fmt, name, ...overrides}`.
    pub fn rendition_request(&self) -> Value {
        let mut rendition = Map::new();
        if let (Some(fmt), Some(name)) = (self.format(), self.rendition_name()) {
            rendition.insert("fmt".to_string(), Value::String(fmt));
            rendition.insert("name".to_string(), Value::String(name));
        }
        for (key, value) in &self.params.overrides {
            rendition.insert(key.clone(), value.clone());
        }
        Value::Object(rendition)
    }
}

/// Sorted names of the regular files (or links to them) in `dir`.
fn list_files(dir: &Path) -> Result<Vec<String>> {
    let entries =
        std::fs::read_dir(dir).map_err(|e| HarnessError::io("failed to read fixture", dir, e))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| HarnessError::io("failed to read fixture", dir, e))?;
        if entry.path().is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

fn first_match(dir: &Path, names: &[String], prefix: &str, description: &str) -> Option<PathBuf> {
    let matches: Vec<&String> = names.iter().filter(|n| n.starts_with(prefix)).collect();
    if matches.len() > 1 {
        warn!(
            dir = %dir.display(),
            files = ?matches,
            "multiple {} files found, only using the first one",
            description
        );
    }
    matches.first().map(|n| dir.join(n))
}

// ---------------------------------------------------------------------------
// Test case discovery
// ---------------------------------------------------------------------------

/// Shell-style test case name filter supporting `*` and `?`.
#[derive(Debug, Clone)]
pub struct CasePattern {
    glob: String,
    regex: Regex,
}

impl CasePattern {
    pub fn new(glob: &str) -> Result<Self> {
        let mut expr = String::from("^");
        for c in glob.chars() {
            match c {
                '*' => expr.push_str(".*"),
                '?' => expr.push('.'),
                other => expr.push_str(&regex::escape(&other.to_string())),
            }
        }
        expr.push('$');
        let regex = Regex::new(&expr).map_err(|e| {
            HarnessError::InvalidFixture(format!("invalid test case pattern '{glob}': {e}"))
        })?;
        Ok(Self {
            glob: glob.to_string(),
            regex,
        })
    }

    pub fn matches(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }

    pub fn as_str(&self) -> &str {
        &self.glob
    }
}

/// A test case directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    pub name: String,
    pub dir: PathBuf,
}

/// Test case directories under `tests_dir`, in lexical order.
pub fn discover_cases(tests_dir: &Path, pattern: Option<&CasePattern>) -> Result<Vec<TestCase>> {
    let entries = std::fs::read_dir(tests_dir)
        .map_err(|e| HarnessError::io("failed to read tests directory", tests_dir, e))?;

    let mut cases = Vec::new();
    for entry in entries {
        let entry =
            entry.map_err(|e| HarnessError::io("failed to read tests directory", tests_dir, e))?;
        let dir = entry.path();
        if !dir.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(pattern) = pattern {
            if !pattern.matches(&name) {
                debug!(
                    "skipping test case '{}' as it does not match pattern '{}'",
                    name,
                    pattern.as_str()
                );
                continue;
            }
        }
        cases.push(TestCase { name, dir });
    }
    cases.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(cases)
}

/// Whether any test case in the suite declares a mock service.
pub fn suite_uses_mocks(cases: &[TestCase]) -> bool {
    cases.iter().any(|case| {
        list_files(&case.dir)
            .map(|names| names.iter().any(|n| is_mock_spec(n)))
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn write(dir: &Path, name: &str, content: &str) {
        std::fs::write(dir.join(name), content).unwrap();
    }

    #[tokio::test]
    async fn test_load_full_fixture() {
        let dir = tempdir().unwrap();
        write(dir.path(), "file.jpg", "src");
        write(dir.path(), "rendition.png", "out");
        write(dir.path(), "params.json", r#"{"width": 100}"#);
        write(dir.path(), "validate", "#!/bin/bash\nexit 0\n");
        write(dir.path(), "mock-example.com.json", "[]");

        let fixture = Fixture::load("case", dir.path(), &LocalFiles).await.unwrap();
        assert_eq!(fixture.source, Some(dir.path().join("file.jpg")));
        assert_eq!(fixture.format().as_deref(), Some("png"));
        assert_eq!(fixture.rendition_name().as_deref(), Some("rendition.png"));
        assert!(fixture.validate.is_some());
        assert_eq!(fixture.mocks, vec![dir.path().join("mock-example.com.json")]);
        assert_eq!(
            fixture.rendition_request(),
            json!({"fmt": "png", "name": "rendition.png", "width": 100})
        );
        assert_eq!(
            fixture.expectation().unwrap(),
            Expectation::Rendition(dir.path().join("rendition.png"))
        );
    }

    #[tokio::test]
    async fn test_error_reason_is_not_sent() {
        let dir = tempdir().unwrap();
        write(dir.path(), "file.txt", "src");
        write(dir.path(), "params.json", r#"{"errorReason": "unsupportedType", "fmt": "png"}"#);

        let fixture = Fixture::load("case", dir.path(), &LocalFiles).await.unwrap();
        assert_eq!(
            fixture.expectation().unwrap(),
            Expectation::Error("unsupportedType".to_string())
        );
        let request = fixture.rendition_request();
        assert!(request.get("errorReason").is_none());
        assert_eq!(request["fmt"], "png");
    }

    #[tokio::test]
    async fn test_rendition_and_error_reason_is_invalid() {
        let dir = tempdir().unwrap();
        write(dir.path(), "file.txt", "src");
        write(dir.path(), "rendition.txt", "out");
        write(dir.path(), "params.json", r#"{"errorReason": "boom"}"#);

        let fixture = Fixture::load("case", dir.path(), &LocalFiles).await.unwrap();
        let err = fixture.expectation().unwrap_err();
        assert!(err.to_string().contains("expects an error"));
    }

    #[tokio::test]
    async fn test_missing_source_and_expectation() {
        let dir = tempdir().unwrap();
        write(dir.path(), "notes.md", "nothing here");

        let fixture = Fixture::load("case", dir.path(), &LocalFiles).await.unwrap();
        assert!(fixture.source.is_none());
        assert_eq!(fixture.expectation().unwrap(), Expectation::Nothing);
    }

    #[test]
    fn test_params_must_be_object() {
        let dir = tempdir().unwrap();
        write(dir.path(), "params.json", "[1, 2]");
        let err = RenditionParams::from_file(&dir.path().join("params.json")).unwrap_err();
        assert!(err.to_string().contains("must contain a JSON object"));

        write(dir.path(), "params.json", r#"{"fmt": 5}"#);
        assert!(RenditionParams::from_file(&dir.path().join("params.json")).is_err());
    }

    #[test]
    fn test_first_source_wins() {
        let dir = tempdir().unwrap();
        let names = vec!["file-a.jpg".to_string(), "file-b.jpg".to_string()];
        assert_eq!(
            first_match(dir.path(), &names, SOURCE_PREFIX, "test input"),
            Some(dir.path().join("file-a.jpg"))
        );
    }

    #[test]
    fn test_case_pattern() {
        let pattern = CasePattern::new("jpg-*").unwrap();
        assert!(pattern.matches("jpg-small"));
        assert!(!pattern.matches("png-small"));
        let pattern = CasePattern::new("case-?.x").unwrap();
        assert!(pattern.matches("case-1.x"));
        assert!(!pattern.matches("case-10.x"));
        assert!(!pattern.matches("case-1yx"));
    }

    #[test]
    fn test_discover_cases_sorted_and_filtered() {
        let dir = tempdir().unwrap();
        for name in ["b-case", "a-case", "c-other"] {
            std::fs::create_dir(dir.path().join(name)).unwrap();
        }
        write(dir.path(), "README.md", "not a case");

        let all = discover_cases(dir.path(), None).unwrap();
        let names: Vec<_> = all.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a-case", "b-case", "c-other"]);

        let pattern = CasePattern::new("*-case").unwrap();
        let filtered = discover_cases(dir.path(), Some(&pattern)).unwrap();
        assert_eq!(filtered.len(), 2);
        assert!(!suite_uses_mocks(&filtered));
    }
}
