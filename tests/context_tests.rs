//! Run context lifecycle: namespace, deadline and cleanup.


use std::sync::Arc;
use std::time::Duration;

use systest::context::{ContextError, TestContext};
use systest::peer::MockNetwork;
use systest::platform::{MockPlatform, Platform, ResourceKind};
use systest::settings::HarnessConfig;
use test_helpers::*;

async fn context_with(cfg: HarnessConfig) -> (TestContext, Arc<MockPlatform>) {
    let platform = MockPlatform::new_arc();
    let network = MockNetwork::new(platform.clone());
    let ctx = TestContext::new(
        cfg,
        platform.clone() as Arc<dyn Platform>,
        Arc::new(network),
    )
    .await
    .unwrap();
    (ctx, platform)
}

#[systest::test(start_paused = true)]
async fn empty_namespace_gets_a_random_one() {
    let cfg = HarnessConfig {
        namespace: String::new(),
        ..mock_config()
    };
    let (ctx, platform) = context_with(cfg).await;
    assert!(ctx.namespace().starts_with("test-"));
    assert!(platform.has_namespace(ctx.namespace()).await);
}

#[systest::test(start_paused = true)]
async fn namespace_creation_failure_is_reported() {
    let platform = MockPlatform::new_arc();
    platform.fail_next(ResourceKind::Namespace, 1).await;
    let network = MockNetwork::new(platform.clone());
    let result = TestContext::new(mock_config(), platform.clone(), Arc::new(network)).await;
    assert!(matches!(result, Err(ContextError::Namespace { .. })));
}

#[systest::test(start_paused = true)]
async fn deadline_cancels_the_run_but_not_the_lifetime() {
    let cfg = HarnessConfig {
        test_timeout_secs: 30,
        ..mock_config()
    };
    let (ctx, _platform) = context_with(cfg).await;
    assert_eq!(ctx.test_timeout(), Duration::from_secs(30));

    tokio::time::sleep(Duration::from_secs(29)).await;
    assert!(!ctx.cancel_token().is_cancelled());
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(ctx.cancel_token().is_cancelled());
    assert!(!ctx.lifetime_token().is_cancelled());
}

#[systest::test(start_paused = true)]
async fn cleanup_runs_once() {
    let (ctx, platform) = context_with(mock_config()).await;
    ctx.cleanup().await.unwrap();
    ctx.cleanup().await.unwrap();
    assert_eq!(platform.delete_count(), 1);
    assert!(!platform.has_namespace("test-mock").await);
}

#[systest::test(start_paused = true)]
async fn failed_cleanup_can_be_retried() {
    let (ctx, platform) = context_with(mock_config()).await;
    platform.fail_next(ResourceKind::Namespace, 1).await;

    let err = ctx.cleanup().await.unwrap_err();
    assert!(matches!(err, ContextError::Cleanup { .. }), "{err}");
    assert!(platform.has_namespace("test-mock").await);

    ctx.cleanup().await.unwrap();
    assert!(!platform.has_namespace("test-mock").await);
}

#[systest::test(start_paused = true)]
async fn run_finishes_whatever_the_body_returns() {
    let (ctx, platform) = context_with(mock_config()).await;
    let out: Result<(), &str> = ctx.run(|_ctx| async move { Err("body failed") }).await;

    assert_eq!(out, Err("body failed"));
    assert!(ctx.cancel_token().is_cancelled());
    assert!(ctx.lifetime_token().is_cancelled());
    assert!(!platform.has_namespace("test-mock").await);
}

#[systest::test(start_paused = true)]
async fn already_deleted_namespace_counts_as_cleaned() {
    let (ctx, platform) = context_with(mock_config()).await;
    systest::platform::PlatformClient::delete_namespace(&*platform, "test-mock")
        .await
        .unwrap();
    ctx.finish().await.unwrap();
}
