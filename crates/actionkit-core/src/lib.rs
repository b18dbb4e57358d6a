//! actionkit core library
//!
//! Runs serverless-style actions in disposable local containers:
//! - [`runtime`] abstracts the container runtime (Docker CLI by default)
//! - [`action`] drives the `/init` + `/run` control protocol of one action
//! - [`mock`] stands up per-test mock HTTP(S) dependencies
//! - [`test_log`], [`obs`] and [`telemetry`] cover logs and lifecycle events

pub mod action;
pub mod config;
pub mod error;
pub mod fakes;
pub mod mock;
pub mod obs;
pub mod runtime;
pub mod telemetry;
pub mod test_log;

pub use action::{
    ActionCode, ActionDescriptor, ActionLimits, ActionRunner, ActionRuntime, ContainerHandle,
    RunnerConfig, RunnerState,
};
pub use config::HarnessConfig;
pub use error::{HarnessError, Result};
pub use mock::MockService;
pub use runtime::{ContainerRuntime, ContainerSpec, DockerCli, LogFollower, Mount};
pub use telemetry::init_tracing;
pub use test_log::{CaseScope, TestLog};
