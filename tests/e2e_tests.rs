//! Scenarios against a real Kubernetes cluster with chaos-mesh installed.
//!
//! Ignored by default. Run with
//! `cargo test --test e2e_tests -- --ignored` and a kubeconfig in scope.
#![cfg(feature = "k8s")]


use systest::chaos;
use systest::cluster::{Cluster, ClusterOptions};
use systest::collect::{self, TaskGroup};
use systest::context::TestContext;
use systest::node::{self, NodeClient};
use systest::settings::HarnessConfig;
use systest::verify;

fn target_outbound(size: usize) -> usize {
    if size < 10 { 3 } else { size * 3 / 10 }
}

async fn context() -> TestContext {
    let cfg = HarnessConfig::load(None).expect("load config");
    TestContext::connect(cfg).await.expect("connect to cluster")
}

#[systest::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "needs a Kubernetes cluster"]
async fn partition_heals() {
    let ctx = context().await;
    ctx.run(|ctx| async move {
        let size = 7;
        let options =
            ClusterOptions::from_config(ctx.config()).with_target_outbound(target_outbound(size));
        let cluster = Cluster::deploy(&ctx, options, 2, size - 2)
            .await
            .expect("deploy");

        let (left, right): (Vec<NodeClient>, Vec<NodeClient>) = cluster
            .clients()
            .iter()
            .cloned()
            .partition(|c| c.name() != "boot-1" && c.name() != "smesher-4");
        let observer = cluster.client(0).expect("observer").clone();
        let platform = ctx.platform().clone();
        let namespace = ctx.namespace().to_string();
        let (a, b) = (node::names(&left), node::names(&right));

        let mut faults = TaskGroup::new(ctx.cancel_token());
        faults.spawn(move |cancel| async move {
            chaos::schedule(
                &observer,
                12,
                17,
                move || async move { chaos::partition(platform, &namespace, "partition1", &a, &b).await },
                &cancel,
            )
            .await
        });
        let mut layers = TaskGroup::new(ctx.cancel_token());
        collect::spawn_layer_collectors(&mut layers, &left, 60);
        let (faults, layers) = tokio::join!(faults.wait(), layers.wait());
        faults.expect("fault schedule");
        let records = layers.expect("layer collectors");
        verify::verify_rounds(&records, 1..=60).expect("consistent rounds");
    })
    .await;
}

#[systest::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "needs a Kubernetes cluster"]
async fn smeshers_get_equal_rewards() {
    let ctx = context().await;
    ctx.run(|ctx| async move {
        let size = ctx.config().cluster_size;
        let options =
            ClusterOptions::from_config(ctx.config()).with_target_outbound(target_outbound(size));
        let cluster = Cluster::deploy(&ctx, options, 2, size.saturating_sub(2))
            .await
            .expect("deploy");

        let mut rewards = TaskGroup::new(ctx.cancel_token());
        collect::spawn_reward_collectors(&mut rewards, cluster.clients(), 20);
        let records = rewards.wait().await.expect("reward collectors");
        verify::verify_rewards(&records, 0.1).expect("rewards within tolerance");
    })
    .await;
}
