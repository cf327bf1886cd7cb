//! Operator commands behind `systestctl`.
//!
//! Every command writes its report to the given writer, so the binary and
//! the tests share the same code.

use std::io::Write;
use std::sync::Arc;

use serde_json::json;

use crate::chaos;
use crate::cluster::{Cluster, ClusterOptions};
use crate::context::TestContext;
use crate::platform::Platform;

/// Options shared by all commands.
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
    /// Namespace to act on
    pub namespace: String,
    /// Output in JSON format instead of human-readable text
    pub json: bool,
}

#[derive(Debug, Clone)]
pub struct UpOptions {
    pub bootnodes: usize,
    pub workload: usize,
    pub target_outbound: Option<usize>,
    pub with_poet: bool,
}

/// Deploy a cluster in the context's namespace and print its members. The
/// namespace is left in place.
pub async fn up<W: Write>(
    ctx: &TestContext,
    opts: &UpOptions,
    json_output: bool,
    out: &mut W,
) -> anyhow::Result<()> {
    let mut options = ClusterOptions::from_config(ctx.config());
    if let Some(target) = opts.target_outbound {
        options = options.with_target_outbound(target);
    }
    let mut cluster = Cluster::new(ctx, options);
    cluster.add_bootstrap_peers(opts.bootnodes).await?;
    if opts.with_poet {
        cluster.add_auxiliary_service().await?;
    }
    cluster.add_workload_peers(opts.workload).await?;

    if json_output {
        let nodes: Vec<_> = cluster
            .clients()
            .iter()
            .map(|c| {
                let r = c.record();
                json!({
                    "name": r.name,
                    "address": r.address,
                    "p2p_port": r.p2p_port,
                    "api_port": r.api_port,
                    "identity": r.identity(),
                })
            })
            .collect();
        let report = json!({
            "namespace": cluster.namespace(),
            "auxiliary": cluster.auxiliary_endpoint(),
            "nodes": nodes,
        });
        writeln!(out, "{}", serde_json::to_string_pretty(&report)?)?;
    } else {
        writeln!(out, "Namespace: {}", cluster.namespace())?;
        if let Some(endpoint) = cluster.auxiliary_endpoint() {
            writeln!(out, "Poet:      {}", endpoint)?;
        }
        writeln!(out)?;
        writeln!(out, "{:<16} {:<16} {}", "NAME", "ADDRESS", "IDENTITY")?;
        writeln!(out, "{}", "-".repeat(80))?;
        for client in cluster.clients() {
            let r = client.record();
            writeln!(
                out,
                "{:<16} {:<16} {}",
                r.name,
                r.address,
                r.identity().unwrap_or("-")
            )?;
        }
    }
    Ok(())
}

/// Delete a namespace and everything in it.
pub async fn down<W: Write>(
    platform: &Arc<dyn Platform>,
    opts: &GlobalOptions,
    out: &mut W,
) -> anyhow::Result<()> {
    match platform.delete_namespace(&opts.namespace).await {
        Ok(()) => writeln!(out, "deleted namespace {}", opts.namespace)?,
        Err(e) if e.is_not_found() => writeln!(out, "namespace {} not found", opts.namespace)?,
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Partition two sets of pods.
pub async fn partition<W: Write>(
    platform: &Arc<dyn Platform>,
    opts: &GlobalOptions,
    out: &mut W,
    name: &str,
    a: &[String],
    b: &[String],
) -> anyhow::Result<()> {
    let handle = chaos::partition(platform.clone(), &opts.namespace, name, a, b).await?;
    report_fault(opts, out, handle.name(), "partition", handle.selectors())
}

/// Fail a set of pods until healed.
pub async fn fail<W: Write>(
    platform: &Arc<dyn Platform>,
    opts: &GlobalOptions,
    out: &mut W,
    name: &str,
    targets: &[String],
) -> anyhow::Result<()> {
    let handle = chaos::fail(platform.clone(), &opts.namespace, name, targets).await?;
    report_fault(opts, out, handle.name(), "failure", handle.selectors())
}

/// Remove a fault object by name.
pub async fn heal<W: Write>(
    platform: &Arc<dyn Platform>,
    opts: &GlobalOptions,
    out: &mut W,
    kind: chaos::FaultKind,
    name: &str,
) -> anyhow::Result<()> {
    match platform.delete_fault(&opts.namespace, kind.resource(), name).await {
        Ok(()) => writeln!(out, "removed {} {}", kind, name)?,
        Err(e) if e.is_not_found() => writeln!(out, "{} {} not found", kind, name)?,
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

fn report_fault<W: Write>(
    opts: &GlobalOptions,
    out: &mut W,
    name: &str,
    kind: &str,
    selectors: &[Vec<String>],
) -> anyhow::Result<()> {
    if opts.json {
        let report = json!({
            "namespace": opts.namespace,
            "name": name,
            "kind": kind,
            "selectors": selectors,
        });
        writeln!(out, "{}", serde_json::to_string_pretty(&report)?)?;
    } else {
        writeln!(out, "applied {} {} in {}", kind, name, opts.namespace)?;
        for (i, set) in selectors.iter().enumerate() {
            writeln!(out, "  set {}: {}", i, set.join(","))?;
        }
    }
    Ok(())
}

/// Split a comma separated list of pod names.
pub fn parse_names(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
