//! Fault injection and teardown.


use std::sync::Arc;

use systest::chaos::{self, ChaosError, FaultKind, FaultState};
use systest::collect::CollectError;
use systest::node;
use systest::platform::{
    FaultPlatformClient, MockPlatform, Platform, PlatformClient, ResourceKind,
};
use test_helpers::*;

async fn platform() -> (Arc<MockPlatform>, Arc<dyn Platform>) {
    let mock = MockPlatform::new_arc();
    mock.apply_namespace("ns").await.unwrap();
    let platform: Arc<dyn Platform> = mock.clone();
    (mock, platform)
}

#[systest::test]
async fn partition_cuts_traffic_between_the_sets_only() {
    let (mock, platform) = platform().await;
    let handle = chaos::partition(
        platform,
        "ns",
        "split",
        &strings(&["a", "b"]),
        &strings(&["c"]),
    )
    .await
    .unwrap();

    assert_eq!(handle.kind(), FaultKind::Partition);
    assert_eq!(handle.selectors().len(), 2);
    assert_eq!(handle.state().await, FaultState::Active);
    assert!(mock.reachable("ns", "a", "b").await);
    assert!(!mock.reachable("ns", "a", "c").await);
    assert!(!mock.reachable("ns", "c", "b").await);

    handle.teardown().await.unwrap();
    assert_eq!(handle.state().await, FaultState::TornDown);
    assert!(mock.reachable("ns", "a", "c").await);
    assert!(mock.active_faults("ns").await.is_empty());
}

#[systest::test]
async fn teardown_is_idempotent() {
    let (mock, platform) = platform().await;
    let handle = chaos::fail(platform, "ns", "down", &strings(&["a"]))
        .await
        .unwrap();
    assert!(mock.is_failed("ns", "a").await);

    handle.teardown().await.unwrap();
    handle.teardown().await.unwrap();
    assert_eq!(mock.fault_delete_count(), 1);
    assert!(!mock.is_failed("ns", "a").await);
}

#[systest::test]
async fn missing_fault_object_counts_as_removed() {
    let (mock, platform) = platform().await;
    let handle = chaos::partition(platform, "ns", "split", &strings(&["a"]), &strings(&["b"]))
        .await
        .unwrap();
    mock.delete_fault("ns", ResourceKind::NetworkChaos, "split")
        .await
        .unwrap();

    handle.teardown().await.unwrap();
    assert_eq!(handle.state().await, FaultState::TornDown);
}

#[systest::test]
async fn failed_teardown_stays_active_and_can_be_retried() {
    let (mock, platform) = platform().await;
    let handle = chaos::fail(platform, "ns", "down", &strings(&["a", "b"]))
        .await
        .unwrap();
    mock.fail_next(ResourceKind::PodChaos, 1).await;

    let err = handle.teardown().await.unwrap_err();
    assert!(matches!(err, ChaosError::Teardown { .. }), "{err}");
    assert_eq!(handle.state().await, FaultState::Active);
    assert_eq!(mock.active_faults("ns").await, ["down"]);

    handle.teardown().await.unwrap();
    assert_eq!(handle.state().await, FaultState::TornDown);
    assert!(mock.active_faults("ns").await.is_empty());
}

#[systest::test]
async fn invalid_selectors_are_rejected_without_side_effects() {
    let (mock, platform) = platform().await;

    let err = chaos::partition(
        platform.clone(),
        "ns",
        "overlap",
        &strings(&["a", "b"]),
        &strings(&["b", "c"]),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ChaosError::InvalidSelector { .. }), "{err}");

    let err = chaos::partition(platform.clone(), "ns", "empty", &[], &strings(&["c"]))
        .await
        .unwrap_err();
    assert!(matches!(err, ChaosError::InvalidSelector { .. }), "{err}");

    let err = chaos::fail(platform, "ns", "nobody", &[]).await.unwrap_err();
    assert!(matches!(err, ChaosError::InvalidSelector { .. }), "{err}");

    assert!(mock.active_faults("ns").await.is_empty());
}

#[systest::test]
async fn creation_failure_yields_no_handle() {
    let (mock, platform) = platform().await;
    mock.fail_next(ResourceKind::NetworkChaos, 1).await;

    let err = chaos::partition(platform, "ns", "split", &strings(&["a"]), &strings(&["b"]))
        .await
        .unwrap_err();
    assert!(matches!(err, ChaosError::Apply { .. }), "{err}");
    assert!(mock.active_faults("ns").await.is_empty());
}

#[systest::test(start_paused = true)]
async fn scheduled_fault_lives_between_rounds() {
    let h = Harness::new().await;
    let cluster = h.deploy(1, 3).await;
    let _clock = h.start_clock();

    let observer = cluster.client(0).unwrap().clone();
    let platform = h.ctx.platform().clone();
    let namespace = h.namespace().to_string();
    let targets = node::names(&cluster.clients()[2..]);
    let probe = h.platform.clone();
    let probe_ns = namespace.clone();

    let schedule = tokio::spawn({
        let cancel = h.ctx.cancel_token().clone();
        async move {
            chaos::schedule(
                &observer,
                3,
                6,
                move || async move { chaos::fail(platform, &namespace, "down", &targets).await },
                &cancel,
            )
            .await
        }
    });

    // Sample between round ticks while the schedule runs.
    tokio::time::sleep(std::time::Duration::from_millis(125)).await;
    let mut seen_active = false;
    while !schedule.is_finished() {
        let round = h.network.current_round();
        let active = !probe.active_faults(&probe_ns).await.is_empty();
        if active {
            assert!((3..6).contains(&round), "fault active at round {round}");
            seen_active = true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(250)).await;
    }

    schedule.await.unwrap().unwrap();
    assert!(seen_active);
    assert!(h.platform.active_faults(h.namespace()).await.is_empty());
    assert_eq!(h.platform.fault_delete_count(), 1);
}

#[systest::test(start_paused = true)]
async fn failed_scheduled_action_is_reported() {
    let h = Harness::new().await;
    let cluster = h.deploy(1, 0).await;
    let _clock = h.start_clock();
    let platform = h.ctx.platform().clone();
    let namespace = h.namespace().to_string();

    let err = chaos::schedule(
        cluster.client(0).unwrap(),
        2,
        4,
        move || async move { chaos::fail(platform, &namespace, "nobody", &[]).await },
        h.ctx.cancel_token(),
    )
    .await
    .unwrap_err();
    assert!(
        matches!(err, CollectError::Chaos(ChaosError::InvalidSelector { .. })),
        "{err}"
    );
}

#[systest::test(start_paused = true)]
async fn namespace_cleanup_removes_faults() {
    let h = Harness::new().await;
    let cluster = h.deploy(1, 1).await;
    let _handle = chaos::partition(
        h.ctx.platform().clone(),
        h.namespace(),
        "split",
        &strings(&["boot-0"]),
        &node::names(&cluster.clients()[1..]),
    )
    .await
    .unwrap();

    h.ctx.finish().await.unwrap();
    assert!(!h.platform.has_namespace("test-mock").await);
    assert!(h.platform.active_faults("test-mock").await.is_empty());
    assert!(h.ctx.cancel_token().is_cancelled());
}
