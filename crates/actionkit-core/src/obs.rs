//! Structured lifecycle events for suites, test cases and their containers.
//!
//! Events are emitted at `info!` level with an `event` field, so they can be
//! filtered with `RUST_LOG` and aggregated from JSON log lines.

use tracing::info;

/// Span covering one suite run; attach it with `Instrument::instrument`.
///
/// # Example
///
/// ```ignore
/// orchestrator.run().instrument(obs::suite_span("worker")).await
/// // every event below carries action = "worker"
/// ```
pub fn suite_span(action: &str) -> tracing::Span {
    tracing::info_span!("actionkit.suite", action = %action)
}

pub fn emit_suite_started(suite: &str, test_dir: &str) {
    info!(event = "suite.started", suite = %suite, test_dir = %test_dir);
}

/// Aggregate counts once every case has run.
pub fn emit_suite_finished(
    suite: &str,
    duration_ms: u64,
    total_run: usize,
    failures: usize,
    errors: usize,
) {
    info!(
        event = "suite.finished",
        suite = %suite,
        duration_ms = duration_ms,
        total_run = total_run,
        failures = failures,
        errors = errors,
    );
}

pub fn emit_case_started(case: &str) {
    info!(event = "case.started", case = %case);
}

pub fn emit_case_finished(case: &str, outcome: &str, duration_ms: u64) {
    info!(
        event = "case.finished",
        case = %case,
        outcome = %outcome,
        duration_ms = duration_ms,
    );
}

pub fn emit_action_ready(action: &str, container: &str) {
    info!(event = "action.ready", action = %action, container = %container);
}

pub fn emit_mock_started(host: &str, container: &str, network: &str) {
    info!(
        event = "mock.started",
        host = %host,
        container = %container,
        network = %network,
    );
}

pub fn emit_mock_stopped(host: &str) {
    info!(event = "mock.stopped", host = %host);
}

/// Teardown problem that was logged instead of propagated.
pub fn emit_cleanup_warning(what: &str, error: &dyn std::fmt::Display) {
    tracing::warn!(event = "cleanup.warning", what = %what, error = %error);
}
