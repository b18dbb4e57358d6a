//! Plain-text suite log capturing container output per test case.
//!
//! A [`TestLog`] is handed explicitly to the runner and orchestrator instead
//! of swapping the process's standard streams. [`TestLog::begin_case`] opens
//! a capture scope; its guard writes the closing marker when dropped.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};

use crate::error::{HarnessError, Result};

const BEGIN_VALIDATION: &str =
    "--------------------------------------------------------------------------------";
const END_CASE: &str =
    "================================================================================";

#[derive(Debug, Default)]
struct Inner {
    file: Option<File>,
    capturing: bool,
}

/// Cloneable handle to the suite's log file.
#[derive(Debug, Clone, Default)]
pub struct TestLog {
    path: Option<PathBuf>,
    inner: Arc<Mutex<Inner>>,
}

impl TestLog {
    /// Create (truncating) the log file, creating parent directories.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| HarnessError::io("failed to create log directory", parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(|e| HarnessError::io("failed to open test log", path, e))?;
        Ok(Self {
            path: Some(path.to_path_buf()),
            inner: Arc::new(Mutex::new(Inner {
                file: Some(file),
                capturing: false,
            })),
        })
    }

    /// A log that discards everything.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append one line. Write errors are ignored: the log is diagnostic only.
    pub fn line(&self, message: impl AsRef<str>) {
        if let Ok(mut inner) = self.inner.lock() {
            if let Some(file) = inner.file.as_mut() {
                let _ = writeln!(file, "{}", message.as_ref());
            }
        }
    }

    /// Append a line prefixed with an RFC 3339 timestamp.
    pub fn timestamped(&self, message: impl AsRef<str>) {
        self.line(format!(
            "{} {}",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            message.as_ref()
        ));
    }

    /// Forward captured process output; dropped unless a case scope is open.
    pub fn capture(&self, output: impl AsRef<str>) {
        let capturing = self.inner.lock().map(|i| i.capturing).unwrap_or(false);
        if capturing {
            self.line(output);
        }
    }

    /// Whether a case scope is currently open.
    pub fn is_capturing(&self) -> bool {
        self.inner.lock().map(|i| i.capturing).unwrap_or(false)
    }

    /// Open the capture scope of one test case.
    pub fn begin_case(&self, message: impl AsRef<str>) -> CaseScope {
        self.timestamped(message);
        self.set_capturing(true);
        CaseScope {
            log: self.clone(),
            validating: false,
        }
    }

    fn set_capturing(&self, capturing: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.capturing = capturing;
        }
    }
}

/// Capture scope of one test case.
///
/// Capture stops when validation begins or when the scope is dropped,
/// whichever comes first; the closing marker is always written.
#[derive(Debug)]
pub struct CaseScope {
    log: TestLog,
    validating: bool,
}

impl CaseScope {
    /// Stop capturing container output and mark the start of validation.
    pub fn begin_validation(&mut self) {
        if !self.validating {
            self.validating = true;
            self.log.set_capturing(false);
            self.log.line(BEGIN_VALIDATION);
        }
    }

    pub fn log(&self) -> &TestLog {
        &self.log
    }
}

impl Drop for CaseScope {
    fn drop(&mut self) {
        self.log.set_capturing(false);
        self.log.line(END_CASE);
    }
}
