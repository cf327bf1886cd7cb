//! Pod readiness polling and identity resolution against the mock backend.


use std::sync::Arc;
use std::time::Duration;

use systest::node::NodeRecord;
use systest::peer::{MockNetwork, PeerConnector};
use systest::platform::{MockPlatform, PlatformClient, PodPhase};
use systest::readiness::{self, ReadinessError};
use systest::settings::ProbeConfig;
use test_helpers::*;
use tokio_util::sync::CancellationToken;

const POLL: Duration = Duration::from_millis(10);

async fn platform_with_pod(replicas: u32) -> Arc<MockPlatform> {
    let platform = MockPlatform::new_arc();
    platform.apply_namespace("ns").await.unwrap();
    apply_replicas(&platform, "ns", "smesher", replicas).await;
    platform
}

fn probe_config(attempts: u32) -> ProbeConfig {
    ProbeConfig {
        attempts,
        dial_timeout_ms: 100,
        poll_interval_ms: 10,
    }
}

#[systest::test(start_paused = true)]
async fn wait_running_polls_until_the_pod_runs() {
    let platform = platform_with_pod(1).await;
    platform
        .script_pod(
            "smesher-0",
            [PodPhase::Pending, PodPhase::Pending, PodPhase::Running],
        )
        .await;
    let cancel = CancellationToken::new();

    let pod = readiness::wait_running(&*platform, "ns", "smesher-0", POLL, &cancel)
        .await
        .unwrap();
    assert_eq!(pod.phase, PodPhase::Running);
    assert!(!pod.ip.is_empty());
}

#[systest::test(start_paused = true)]
async fn failed_phase_is_fatal() {
    let platform = platform_with_pod(1).await;
    platform
        .script_pod("smesher-0", [PodPhase::Pending, PodPhase::Failed])
        .await;
    let cancel = CancellationToken::new();

    let err = readiness::wait_running(&*platform, "ns", "smesher-0", POLL, &cancel)
        .await
        .unwrap_err();
    assert!(
        matches!(err, ReadinessError::PodFailed { ref name } if name == "smesher-0"),
        "unexpected error: {err}"
    );
}

#[systest::test(start_paused = true)]
async fn exited_pod_is_fatal() {
    let platform = platform_with_pod(1).await;
    platform
        .script_pod("smesher-0", [PodPhase::Pending, PodPhase::Succeeded])
        .await;
    let cancel = CancellationToken::new();

    let err = with_timeout!(60_000, {
        readiness::wait_running(&*platform, "ns", "smesher-0", POLL, &cancel).await
    })
    .unwrap_err();
    assert!(
        matches!(err, ReadinessError::PodExited { ref name } if name == "smesher-0"),
        "unexpected error: {err}"
    );
}

#[systest::test(start_paused = true)]
async fn unscheduled_pod_waits_until_cancelled() {
    let platform = platform_with_pod(1).await;
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        trigger.cancel();
    });

    let started = tokio::time::Instant::now();
    let err = readiness::wait_running(&*platform, "ns", "smesher-7", POLL, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, ReadinessError::Cancelled { .. }), "{err}");
    assert!(started.elapsed() >= Duration::from_secs(5));
}

#[systest::test(start_paused = true)]
async fn cancelled_token_stops_before_polling() {
    let platform = platform_with_pod(1).await;
    platform
        .script_pod("smesher-0", [PodPhase::Failed])
        .await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = readiness::wait_running(&*platform, "ns", "smesher-0", POLL, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, ReadinessError::Cancelled { .. }), "{err}");
}

#[systest::test(start_paused = true)]
async fn resolve_retries_until_the_peer_answers() {
    let platform = platform_with_pod(1).await;
    let network = MockNetwork::new(platform.clone());
    network.fail_dials("smesher-0", 3).await;
    let pod = platform.get_pod("ns", "smesher-0").await.unwrap();
    let cancel = CancellationToken::new();

    let client = readiness::resolve_node(
        &network,
        NodeRecord::new("smesher-0", pod.ip),
        &probe_config(10),
        &cancel,
    )
    .await
    .unwrap();

    assert_eq!(network.dial_attempts("smesher-0").await, 4);
    assert_eq!(
        client.record().identity(),
        Some(MockNetwork::identity_of("smesher-0").as_str())
    );
    assert!(client.record().p2p_endpoint().unwrap().ends_with("/p2p/12D3KooWsmesher-0"));
}

#[systest::test(start_paused = true)]
async fn resolve_gives_up_after_exactly_the_attempt_budget() {
    let platform = platform_with_pod(1).await;
    let network = MockNetwork::new(platform.clone());
    network.fail_dials("smesher-0", 100).await;
    let pod = platform.get_pod("ns", "smesher-0").await.unwrap();
    let cancel = CancellationToken::new();

    let err = readiness::resolve_node(
        &network,
        NodeRecord::new("smesher-0", pod.ip),
        &probe_config(7),
        &cancel,
    )
    .await
    .unwrap_err();

    match err {
        ReadinessError::Exhausted { name, attempts, .. } => {
            assert_eq!(name, "smesher-0");
            assert_eq!(attempts, 7);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(network.dial_attempts("smesher-0").await, 7);
}

#[systest::test(start_paused = true)]
async fn zero_attempts_still_dials_once() {
    let platform = platform_with_pod(1).await;
    let network = MockNetwork::new(platform.clone());
    let pod = platform.get_pod("ns", "smesher-0").await.unwrap();

    readiness::resolve_node(
        &network,
        NodeRecord::new("smesher-0", pod.ip),
        &probe_config(0),
        &CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(network.dial_attempts("smesher-0").await, 1);
}

#[systest::test(start_paused = true)]
async fn unknown_address_is_a_dial_error() {
    let platform = platform_with_pod(0).await;
    let network = MockNetwork::new(platform.clone());

    let err = network
        .connect("10.9.9.9:9092", Duration::from_millis(100))
        .await
        .err()
        .expect("dial should fail");
    assert!(err.to_string().contains("10.9.9.9:9092"), "{err}");
}

#[systest::test(start_paused = true)]
async fn probe_waits_then_resolves() {
    let platform = platform_with_pod(2).await;
    platform
        .script_pod("smesher-1", [PodPhase::Pending, PodPhase::Running])
        .await;
    let network = MockNetwork::new(platform.clone());
    let cancel = CancellationToken::new();

    let client = readiness::probe(
        &*platform,
        &network,
        "ns",
        "smesher-1",
        &probe_config(3),
        &cancel,
    )
    .await
    .unwrap();
    assert_eq!(client.name(), "smesher-1");
    assert_eq!(client.record().api_port, 9092);
    assert!(client.record().identity().is_some());
}
