//! Rendition validation: custom `validate` script or exact comparison.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use actionkit_core::{HarnessError, Result, TestLog};
use tokio::process::Command;

/// Upper bound for a custom validation script.
pub const VALIDATE_TIMEOUT: Duration = Duration::from_secs(300);

/// Result of running a validation script.
#[derive(Debug, Clone)]
pub struct ScriptResult {
    /// Exit code (-1 when terminated by a signal).
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub success: bool,
}

impl ScriptResult {
    pub fn passed(&self) -> bool {
        self.success && self.exit_code == 0
    }
}

/// Run `bash -x <script> <expected> <actual>`.
pub async fn run_script(script: &Path, expected: &Path, actual: &Path) -> Result<ScriptResult> {
    let start = Instant::now();
    let command_line = format!(
        "bash -x {} {} {}",
        script.display(),
        expected.display(),
        actual.display()
    );

    let child = Command::new("bash")
        .arg("-x")
        .arg(script)
        .arg(expected)
        .arg(actual)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| HarnessError::Runtime {
            command: command_line.clone(),
            stderr: e.to_string(),
        })?;

    let output = tokio::time::timeout(VALIDATE_TIMEOUT, child.wait_with_output())
        .await
        .map_err(|_| HarnessError::Runtime {
            command: command_line.clone(),
            stderr: format!("timed out after {} seconds", VALIDATE_TIMEOUT.as_secs()),
        })?
        .map_err(|e| HarnessError::Runtime {
            command: command_line,
            stderr: e.to_string(),
        })?;

    Ok(ScriptResult {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        duration_ms: start.elapsed().as_millis() as u64,
        success: output.status.success(),
    })
}

/// Byte offset of the first difference, `None` when both files are equal.
pub fn first_difference(expected: &[u8], actual: &[u8]) -> Option<usize> {
    let common = expected.len().min(actual.len());
    expected[..common]
        .iter()
        .zip(&actual[..common])
        .position(|(a, b)| a != b)
        .or(if expected.len() == actual.len() {
            None
        } else {
            Some(common)
        })
}

/// Validate `actual` against `expected`.
///
/// Returns the failure message, or `None` when the rendition is correct.
/// Script output and the command that ran are written to `log`.
pub async fn validate_rendition(
    script: Option<&Path>,
    expected: &Path,
    actual: &Path,
    log: &TestLog,
) -> Result<Option<String>> {
    let actual_name = file_name(actual);

    let failure = match script {
        Some(script) => {
            log.line(format!(
                "Running validation: {} {} {}",
                script.display(),
                expected.display(),
                actual.display()
            ));
            let result = run_script(script, expected, actual).await?;
            if !result.stdout.trim().is_empty() {
                log.line(result.stdout.trim());
            }
            if !result.stderr.trim().is_empty() {
                log.line(result.stderr.trim());
            }
            if result.passed() {
                None
            } else {
                Some(format!(
                    "Rendition '{}' not as expected. Validate exit code was: {}",
                    actual_name, result.exit_code
                ))
            }
        }
        None => {
            log.line(format!(
                "Running validation: compare {} {}",
                expected.display(),
                actual.display()
            ));
            let expected_bytes = std::fs::read(expected)
                .map_err(|e| HarnessError::io("failed to read", expected, e))?;
            let actual_bytes =
                std::fs::read(actual).map_err(|e| HarnessError::io("failed to read", actual, e))?;
            first_difference(&expected_bytes, &actual_bytes).map(|offset| {
                format!(
                    "Rendition '{}' not as expected: differs from '{}' at byte {}",
                    actual_name,
                    file_name(expected),
                    offset
                )
            })
        }
    };

    match &failure {
        Some(message) => log.line(format!("!!! Validation failed: {message}")),
        None => log.line("Validation successful."),
    }
    Ok(failure)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
