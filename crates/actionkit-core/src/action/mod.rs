//! Action execution: descriptor, control protocol and container runner.
//!
//! - [`descriptor`]: `ActionDescriptor`, kinds, limits
//! - [`protocol`]: `/init` and `/run` request/response bodies
//! - [`runner`]: `ActionRunner`, `RunnerConfig`, lifecycle states

pub mod descriptor;
pub mod protocol;
pub mod runner;

pub use descriptor::{ActionCode, ActionDescriptor, ActionLimits, ActionRuntime};
pub use protocol::{InitRequest, InitResponse, RunRequest, RUNTIME_PORT};
pub use runner::{ActionRunner, ContainerHandle, RunnerConfig, RunnerState};
