//! ActionRunner against an HTTP stand-in for the action runtime.

use std::sync::Arc;
use std::time::Duration;

use actionkit_core::fakes::FakeRuntime;
use actionkit_core::{
    ActionCode, ActionDescriptor, ActionRunner, HarnessError, RunnerConfig, RunnerState, TestLog,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn action() -> ActionDescriptor {
    ActionDescriptor::new("worker", ActionCode::Script("exports.main = () => ({})".into()))
        .unwrap()
        .with_limits(2_000, 0)
}

fn fast_config() -> RunnerConfig {
    RunnerConfig {
        retry_delay: Duration::from_millis(10),
        log_attach_delay: Duration::ZERO,
        ..RunnerConfig::default()
    }
}

async fn runtime_for(server: &MockServer) -> Arc<FakeRuntime> {
    Arc::new(FakeRuntime::new().with_port_mapping(server.address().to_string()))
}

async fn mount_init_ok(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/init"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"OK": true})))
        .mount(server)
        .await;
}

/// Test: start, invoke once, stop
#[tokio::test]
async fn test_start_run_stop() {
    let server = MockServer::start().await;
    mount_init_ok(&server).await;
    Mock::given(method("POST"))
        .and(path("/run"))
        .and(body_partial_json(json!({
            "action_name": "worker",
            "value": {"source": "file.jpg"},
            "api_host": "local",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"renditions": 1})))
        .expect(1)
        .mount(&server)
        .await;

    let runtime = runtime_for(&server).await;
    let mut runner = ActionRunner::new(action(), fast_config(), runtime.clone());
    runner.start().await.expect("start failed");
    assert_eq!(runner.state(), RunnerState::Ready);
    assert_eq!(runtime.live_containers(), vec!["actionkit-worker"]);

    let result = runner.run(json!({"source": "file.jpg"})).await.expect("run failed");
    assert_eq!(result, json!({"renditions": 1}));

    runner.stop().await.unwrap();
    runner.stop().await.unwrap();
    assert_eq!(runner.state(), RunnerState::Stopped);
    assert!(runtime.live_containers().is_empty());
}

/// Test: container spec carries image, memory limit and published port
#[tokio::test]
async fn test_container_spec_from_descriptor() {
    let server = MockServer::start().await;
    mount_init_ok(&server).await;

    let runtime = runtime_for(&server).await;
    let action = action().with_limits(2_000, 512);
    let config = fast_config().with_env("DEBUG", "worker:*");
    let mut runner = ActionRunner::new(action, config, runtime.clone());
    runner.start().await.unwrap();

    let spec = &runtime.specs()[0];
    assert_eq!(spec.image, "adobeapiplatform/adobe-action-nodejs-v10:3.0.27");
    assert_eq!(spec.memory_bytes, Some(512 * 1024 * 1024));
    assert_eq!(spec.publish.as_ref().map(|p| p.container_port), Some(8080));
    assert_eq!(spec.env.get("DEBUG").map(String::as_str), Some("worker:*"));
    assert!(spec.auto_remove);

    runner.stop().await.unwrap();
}

/// Test: init error response fails start and removes the container
#[tokio::test]
async fn test_init_error_removes_container() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/init"))
        .respond_with(ResponseTemplate::new(502).set_body_json(json!({"error": "bad zip"})))
        .mount(&server)
        .await;

    let runtime = Arc::new(
        FakeRuntime::new()
            .with_port_mapping(server.address().to_string())
            .with_logs("actionkit-worker", &["Error: cannot unzip"]),
    );
    let mut runner = ActionRunner::new(action(), fast_config(), runtime.clone());
    let err = runner.start().await.unwrap_err();

    match &err {
        HarnessError::InitFailed { reason, .. } => assert_eq!(reason, "bad zip"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.container_logs(), Some("Error: cannot unzip"));
    assert_eq!(runner.state(), RunnerState::Failed);
    assert!(runtime.live_containers().is_empty());
}

/// Test: init is retried until the timeout budget is exhausted
#[tokio::test]
async fn test_init_unreachable_times_out() {
    // nothing listens on port 1
    let runtime = Arc::new(FakeRuntime::new().with_port_mapping("127.0.0.1:1"));
    let action = action().with_limits(100, 0);
    let mut runner = ActionRunner::new(action, fast_config(), runtime.clone());

    let err = runner.start().await.unwrap_err();
    match err {
        HarnessError::InitTimeout { attempts, .. } => assert!((1..=10).contains(&attempts)),
        other => panic!("unexpected error: {other}"),
    }
    assert!(runtime.live_containers().is_empty());
}

/// Test: a runtime that accepts /init but never answers is bounded by the action timeout
#[tokio::test]
async fn test_init_hanging_runtime_bounded_by_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/init"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"OK": true}))
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&server)
        .await;

    let runtime = runtime_for(&server).await;
    let action = action().with_limits(500, 0);
    let config = RunnerConfig {
        retry_delay: Duration::from_millis(100),
        ..fast_config()
    };
    let mut runner = ActionRunner::new(action, config, runtime.clone());

    let started = std::time::Instant::now();
    let err = runner.start().await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, HarnessError::InitTimeout { .. }), "unexpected error: {err}");
    assert!(elapsed < Duration::from_millis(1_500), "init took {elapsed:?}");
    assert_eq!(runner.state(), RunnerState::Failed);
    assert!(runtime.live_containers().is_empty());
}

/// Test: a start abandoned during the container launch still releases the container
#[tokio::test]
async fn test_stop_after_abandoned_launch() {
    let runtime = Arc::new(FakeRuntime::new().with_run_delay(Duration::from_secs(30)));
    let mut runner = ActionRunner::new(action(), fast_config(), runtime.clone());

    let abandoned = tokio::time::timeout(Duration::from_millis(50), runner.start()).await;
    assert!(abandoned.is_err());
    assert_eq!(runner.state(), RunnerState::Launching);
    assert!(runner.container().is_none());
    assert_eq!(runtime.live_containers(), vec!["actionkit-worker"]);

    runner.stop().await.unwrap();
    assert_eq!(runner.state(), RunnerState::Stopped);
    assert!(runtime.live_containers().is_empty());
}

/// Test: unsupported kind fails before any container is launched
#[tokio::test]
async fn test_unsupported_kind() {
    let runtime = Arc::new(FakeRuntime::new());
    let action = action().with_runtime(actionkit_core::ActionRuntime::Kind("python:3".into()));
    let mut runner = ActionRunner::new(action, fast_config(), runtime.clone());

    let err = runner.start().await.unwrap_err();
    assert!(matches!(err, HarnessError::UnsupportedKind(_)));
    assert!(runtime.specs().is_empty());
}

/// Test: error payload of a failed invocation is preserved
#[tokio::test]
async fn test_run_protocol_error() {
    let server = MockServer::start().await;
    mount_init_ok(&server).await;
    Mock::given(method("POST"))
        .and(path("/run"))
        .respond_with(ResponseTemplate::new(502).set_body_json(json!({
            "error": {"name": "SourceCorruptError", "reason": "SourceCorrupt"}
        })))
        .mount(&server)
        .await;

    let runtime = runtime_for(&server).await;
    let mut runner = ActionRunner::new(action(), fast_config(), runtime);
    runner.start().await.unwrap();

    let err = runner.run(json!({})).await.unwrap_err();
    match &err {
        HarnessError::InvocationProtocol { status, .. } => assert_eq!(*status, Some(502)),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.failure_reasons()[0], "SourceCorrupt");
    runner.stop().await.unwrap();
}

/// Test: empty result body is an invocation failure
#[tokio::test]
async fn test_run_empty_result() {
    let server = MockServer::start().await;
    mount_init_ok(&server).await;
    Mock::given(method("POST"))
        .and(path("/run"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let runtime = runtime_for(&server).await;
    let mut runner = ActionRunner::new(action(), fast_config(), runtime);
    runner.start().await.unwrap();

    let err = runner.run(json!({})).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "'worker' invocation failed: (returned empty result)"
    );
    runner.stop().await.unwrap();
}

/// Test: slow invocation hits the action timeout
#[tokio::test]
async fn test_run_timeout() {
    let server = MockServer::start().await;
    mount_init_ok(&server).await;
    Mock::given(method("POST"))
        .and(path("/run"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({}))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let runtime = runtime_for(&server).await;
    let action = action().with_limits(500, 0);
    let mut runner = ActionRunner::new(action, fast_config(), runtime);
    runner.start().await.unwrap();

    let err = runner.run(json!({})).await.unwrap_err();
    assert_eq!(err.to_string(), "action 'worker' timed out after 0.5 seconds");
    runner.stop().await.unwrap();
}

/// Test: container output during an invocation lands in the case log
#[tokio::test]
async fn test_run_forwards_container_output() {
    let server = MockServer::start().await;
    mount_init_ok(&server).await;
    Mock::given(method("POST"))
        .and(path("/run"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("test.log");
    let log = TestLog::create(&log_path).unwrap();

    let runtime = Arc::new(
        FakeRuntime::new()
            .with_port_mapping(server.address().to_string())
            .with_logs("actionkit-worker", &["processing rendition"]),
    );
    let config = RunnerConfig {
        log_attach_delay: Duration::from_millis(50),
        ..fast_config()
    };
    let mut runner = ActionRunner::new(action(), config, runtime).with_log(log.clone());
    runner.start().await.unwrap();

    {
        let _scope = log.begin_case("Running test case: one");
        runner.run(json!({})).await.unwrap();
    }
    runner.stop().await.unwrap();

    let content = std::fs::read_to_string(&log_path).unwrap();
    assert!(content.contains("Running test case: one"));
    assert!(content.contains("processing rendition"));
}
