//! MockService lifecycle against the in-memory runtime.

use std::sync::Arc;
use std::time::Duration;

use actionkit_core::fakes::FakeRuntime;
use actionkit_core::runtime::ContainerSpec;
use actionkit_core::{ContainerRuntime, HarnessError, MockService};

async fn runtime_with_worker(runtime: FakeRuntime) -> Arc<FakeRuntime> {
    let runtime = Arc::new(runtime);
    runtime
        .run_detached(&ContainerSpec {
            name: "worker".to_string(),
            image: "img".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    runtime
}

/// Test: started mock is reachable under its hostname from the action
#[tokio::test]
async fn test_start_wires_network() {
    let runtime = runtime_with_worker(FakeRuntime::new()).await;
    let mock = MockService::new("/t/case/mock-example.com.json", "worker", runtime.clone()).unwrap();

    mock.start().await.expect("mock start failed");

    assert_eq!(runtime.networks(), vec!["mock-network-example.com"]);
    assert_eq!(
        runtime.network_members("mock-network-example.com"),
        vec!["mock-server-example.com", "worker"]
    );
    assert!(runtime
        .calls()
        .contains(&"network connect mock-network-example.com mock-server-example.com --alias example.com".to_string()));

    mock.stop(false).await;
    assert!(runtime.networks().is_empty());
    assert_eq!(runtime.live_containers(), vec!["worker"]);
}

/// Test: a mock that never becomes ready is torn down
#[tokio::test]
async fn test_not_ready_cleans_up() {
    let runtime = runtime_with_worker(FakeRuntime::new().without_mock_readiness()).await;
    let mock = MockService::new("/t/case/mock-example.com.json", "worker", runtime.clone())
        .unwrap()
        .with_ready_timeout(Duration::from_millis(50));

    let err = mock.start().await.unwrap_err();
    assert!(matches!(err, HarnessError::MockSetup { .. }));
    assert!(err.to_string().contains("mock-server-example.com"));
    assert!(runtime.networks().is_empty());
    assert_eq!(runtime.live_containers(), vec!["worker"]);
}

/// Test: network wiring failure leaves nothing behind
#[tokio::test]
async fn test_network_failure_cleans_up() {
    let runtime = runtime_with_worker(FakeRuntime::new().failing("network_connect")).await;
    let mock = MockService::new("/t/case/mock-example.com.json", "worker", runtime.clone()).unwrap();

    assert!(mock.start().await.is_err());
    assert!(runtime.networks().is_empty());
    assert_eq!(runtime.live_containers(), vec!["worker"]);
}

/// Test: stop is safe when nothing was started
#[tokio::test]
async fn test_stop_without_start() {
    let runtime = runtime_with_worker(FakeRuntime::new()).await;
    let mock = MockService::new("/t/mock-example.com.json", "worker", runtime.clone()).unwrap();
    mock.stop(true).await;
    mock.stop(false).await;
    assert_eq!(runtime.live_containers(), vec!["worker"]);
}
