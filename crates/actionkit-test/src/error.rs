//! Suite-level errors.
//!
//! Per-case problems never surface here: they become a test outcome. A
//! `SuiteError` means the whole run could not proceed.

use std::path::PathBuf;

use actionkit_core::HarnessError;

use crate::orchestrator::SuiteOutcome;

#[derive(Debug, thiserror::Error)]
pub enum SuiteError {
    #[error("no tests found, missing directory: {}", .0.display())]
    NoTests(PathBuf),

    #[error("could not start action '{action}': {source}")]
    ActionStart {
        action: String,
        #[source]
        source: HarnessError,
    },

    #[error(transparent)]
    Harness(#[from] HarnessError),

    /// The suite stopped early. `outcome` holds the cases that did run.
    #[error("{cause}")]
    Aborted {
        outcome: Box<SuiteOutcome>,
        cause: Box<SuiteError>,
    },
}

impl SuiteError {
    /// Container logs of a failed action start, for diagnostics.
    pub fn container_logs(&self) -> Option<&str> {
        match self {
            SuiteError::ActionStart { source, .. } | SuiteError::Harness(source) => {
                source.container_logs()
            }
            SuiteError::Aborted { cause, .. } => cause.container_logs(),
            SuiteError::NoTests(_) => None,
        }
    }

    /// The error that stopped the run, looking through [`SuiteError::Aborted`].
    pub fn cause(&self) -> &SuiteError {
        match self {
            SuiteError::Aborted { cause, .. } => cause.cause(),
            other => other,
        }
    }

    /// Results of the cases that ran before the suite stopped.
    pub fn partial_outcome(&self) -> Option<&SuiteOutcome> {
        match self {
            SuiteError::Aborted { outcome, .. } => Some(outcome.as_ref()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SuiteError>;
