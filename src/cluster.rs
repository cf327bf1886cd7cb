//! Cluster topology: bootstrap peers, workload peers and the auxiliary
//! (poet) service.
//!
//! Each peer group is a StatefulSet behind a headless service. Growing a group
//! applies the workload with a larger replica count and resolves only the new
//! ordinals. Growth is all or nothing: any failure leaves the group poisoned.

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::context::TestContext;
use crate::flags::{self, DeploymentFlag};
use crate::node::{API_PORT, NodeClient, NodeGroup, P2P_PORT, Role};
use crate::peer::PeerConnector;
use crate::platform::{
    Platform, PlatformError, PodSpec, ServicePort, ServiceSpec, WorkloadSpec,
};
use crate::readiness::{self, ReadinessError};
use crate::settings::ProbeConfig;

const POET_NAME: &str = "poet";
const POET_PORT: u16 = 80;
const STORAGE: &str = "1Gi";

#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("workload peers need at least one bootstrap peer")]
    NoBootstrapPeers,
    #[error("auxiliary service already deployed at {0}")]
    AuxiliaryExists(String),
    #[error("{0} group is unusable after a failed growth")]
    GroupUnusable(Role),
    #[error("adding {requested} peers to {current} exceeds the limit of {max}")]
    TooLarge {
        requested: usize,
        current: usize,
        max: usize,
    },
    #[error(transparent)]
    Platform(#[from] PlatformError),
    #[error(transparent)]
    Readiness(#[from] ReadinessError),
}

/// Deployment parameters shared by every peer of a cluster.
#[derive(Debug, Clone)]
pub struct ClusterOptions {
    pub image: String,
    pub poet_image: String,
    pub preset: String,
    pub genesis_time: DateTime<Utc>,
    pub network_id: u32,
    /// Passed as `--target-outbound` when set
    pub target_outbound: Option<usize>,
    pub rerun_interval: Option<Duration>,
    /// Prefunded accounts, address to balance
    pub accounts: BTreeMap<String, u64>,
    pub max_size: usize,
    pub node_selector: BTreeMap<String, String>,
    pub probe: ProbeConfig,
}

impl ClusterOptions {
    /// Options from the harness configuration, with genesis at now plus the
    /// bootstrap offset.
    pub fn from_config(cfg: &crate::settings::HarnessConfig) -> Self {
        let offset = chrono::Duration::from_std(cfg.bootstrap_duration())
            .unwrap_or_else(|_| chrono::Duration::seconds(30));
        Self {
            image: cfg.image.clone(),
            poet_image: cfg.poet_image.clone(),
            preset: cfg.preset.clone(),
            genesis_time: Utc::now() + offset,
            network_id: 777,
            target_outbound: None,
            rerun_interval: None,
            accounts: BTreeMap::new(),
            max_size: cfg.max_cluster_size,
            node_selector: cfg.node_selector.clone(),
            probe: cfg.probe.clone(),
        }
    }

    pub fn with_target_outbound(mut self, target: usize) -> Self {
        self.target_outbound = Some(target);
        self
    }

    pub fn with_rerun_interval(mut self, interval: Duration) -> Self {
        self.rerun_interval = Some(interval);
        self
    }

    pub fn with_accounts(mut self, accounts: BTreeMap<String, u64>) -> Self {
        self.accounts = accounts;
        self
    }

    pub fn with_genesis_time(mut self, genesis: DateTime<Utc>) -> Self {
        self.genesis_time = genesis;
        self
    }

    pub fn with_network_id(mut self, id: u32) -> Self {
        self.network_id = id;
        self
    }

    pub fn with_max_size(mut self, max: usize) -> Self {
        self.max_size = max;
        self
    }
}

pub struct Cluster {
    namespace: String,
    platform: Arc<dyn Platform>,
    connector: Arc<dyn PeerConnector>,
    cancel: CancellationToken,
    options: ClusterOptions,
    boot: NodeGroup,
    workload: NodeGroup,
    auxiliary: Option<String>,
    clients: Vec<NodeClient>,
}

impl Cluster {
    pub fn new(ctx: &TestContext, options: ClusterOptions) -> Self {
        Self {
            namespace: ctx.namespace().to_string(),
            platform: ctx.platform().clone(),
            connector: ctx.connector().clone(),
            cancel: ctx.cancel_token().clone(),
            options,
            boot: NodeGroup::new(Role::Bootnode),
            workload: NodeGroup::new(Role::Workload),
            auxiliary: None,
            clients: Vec::new(),
        }
    }

    /// Bootstrap peers, then the auxiliary service, then workload peers.
    pub async fn deploy(
        ctx: &TestContext,
        options: ClusterOptions,
        bootnodes: usize,
        workload: usize,
    ) -> Result<Self, ClusterError> {
        let mut cluster = Self::new(ctx, options);
        cluster.add_bootstrap_peers(bootnodes).await?;
        cluster.add_auxiliary_service().await?;
        cluster.add_workload_peers(workload).await?;
        Ok(cluster)
    }

    pub fn options(&self) -> &ClusterOptions {
        &self.options
    }

    /// Fail if adding `n` peers would exceed the size limit.
    pub fn resource_control(&self, n: usize) -> Result<(), ClusterError> {
        let current = self.total();
        match current.checked_add(n) {
            Some(total) if total <= self.options.max_size => Ok(()),
            _ => Err(ClusterError::TooLarge {
                requested: n,
                current,
                max: self.options.max_size,
            }),
        }
    }

    pub async fn add_bootstrap_peers(&mut self, n: usize) -> Result<(), ClusterError> {
        self.grow(Role::Bootnode, n).await
    }

    pub async fn add_workload_peers(&mut self, n: usize) -> Result<(), ClusterError> {
        if self.boot.is_empty() {
            return Err(ClusterError::NoBootstrapPeers);
        }
        self.grow(Role::Workload, n).await
    }

    /// Deploy the poet pod and its service, gatewayed through every current
    /// bootstrap peer. Returns the service endpoint.
    pub async fn add_auxiliary_service(&mut self) -> Result<String, ClusterError> {
        if let Some(endpoint) = &self.auxiliary {
            return Err(ClusterError::AuxiliaryExists(endpoint.clone()));
        }
        let headless = self.boot.headless_service();
        let mut args: Vec<String> = self
            .boot
            .clients()
            .iter()
            .map(|c| {
                format!(
                    "--gateway=dns:///{}.{}:{}",
                    c.name(),
                    headless,
                    c.record().api_port
                )
            })
            .collect();
        args.extend([
            format!("--restlisten=0.0.0.0:{POET_PORT}"),
            "--duration=30s".to_string(),
            "--n=10".to_string(),
        ]);
        let labels = app_labels(POET_NAME);
        let port = ServicePort {
            name: "rest".to_string(),
            port: POET_PORT,
        };
        self.platform
            .apply_pod(
                &self.namespace,
                &PodSpec {
                    name: POET_NAME.to_string(),
                    image: self.options.poet_image.clone(),
                    args,
                    labels: labels.clone(),
                    port: port.clone(),
                    node_selector: self.options.node_selector.clone(),
                },
            )
            .await?;
        self.platform
            .apply_service(
                &self.namespace,
                &ServiceSpec {
                    name: POET_NAME.to_string(),
                    selector: labels,
                    ports: vec![port],
                    headless: false,
                },
            )
            .await?;
        readiness::wait_running(
            &*self.platform,
            &self.namespace,
            POET_NAME,
            self.options.probe.poll_interval(),
            &self.cancel,
        )
        .await?;
        let endpoint = format!("{POET_NAME}:{POET_PORT}");
        info!(endpoint = %endpoint, "auxiliary service ready");
        self.auxiliary = Some(endpoint.clone());
        Ok(endpoint)
    }

    /// Flags every peer created from now on receives.
    pub fn deployment_flags(&self) -> Vec<DeploymentFlag> {
        let opts = &self.options;
        let mut out = vec![
            flags::genesis_time(opts.genesis_time),
            flags::network_id(opts.network_id),
        ];
        if let Some(target) = opts.target_outbound {
            out.push(flags::target_outbound(target));
        }
        if let Some(interval) = opts.rerun_interval {
            out.push(flags::rerun_interval(interval));
        }
        if !opts.accounts.is_empty() {
            out.push(flags::accounts(&opts.accounts));
        }
        if let Some(endpoint) = &self.auxiliary {
            out.push(flags::poet_endpoint(endpoint));
        }
        out
    }

    fn bootnode_flag(&self) -> DeploymentFlag {
        let endpoints: Vec<String> = self
            .boot
            .clients()
            .iter()
            .filter_map(|c| c.record().p2p_endpoint())
            .collect();
        flags::bootnodes(&endpoints)
    }

    async fn grow(&mut self, role: Role, n: usize) -> Result<(), ClusterError> {
        self.resource_control(n)?;
        let group = match role {
            Role::Bootnode => &self.boot,
            Role::Workload => &self.workload,
        };
        if group.is_poisoned() {
            return Err(ClusterError::GroupUnusable(role));
        }
        if n == 0 {
            return Ok(());
        }
        let current = group.len();
        // Bounded by `max_size`, which `resource_control` checked above.
        let target = current + n;
        let replicas = u32::try_from(target).map_err(|_| ClusterError::TooLarge {
            requested: n,
            current: self.total(),
            max: self.options.max_size,
        })?;
        let name = group.name();
        let headless = group.headless_service();
        let pods: Vec<String> = (current..target).map(|i| group.pod_name(i)).collect();

        let mut flags = self.deployment_flags();
        if role == Role::Workload {
            flags.push(self.bootnode_flag());
        }
        let labels = app_labels(name);
        let service = ServiceSpec {
            name: headless.clone(),
            selector: labels.clone(),
            ports: vec![ServicePort {
                name: "grpc".to_string(),
                port: API_PORT,
            }],
            headless: true,
        };
        let workload = WorkloadSpec {
            name: name.to_string(),
            service_name: headless,
            replicas,
            image: self.options.image.clone(),
            command: flags::peer_command(&self.options.preset, &flags),
            labels,
            p2p_port: P2P_PORT,
            api_port: API_PORT,
            storage: STORAGE.to_string(),
            node_selector: self.options.node_selector.clone(),
        };
        info!(role = %role, from = current, to = target, "scaling peer group");

        let result = self.apply_and_resolve(&service, &workload, &pods).await;
        let group = match role {
            Role::Bootnode => &mut self.boot,
            Role::Workload => &mut self.workload,
        };
        match result {
            Ok(clients) => {
                group.extend(clients);
                self.clients = self
                    .boot
                    .clients()
                    .iter()
                    .chain(self.workload.clients())
                    .cloned()
                    .collect();
                Ok(())
            }
            Err(err) => {
                group.poison();
                Err(err)
            }
        }
    }

    async fn apply_and_resolve(
        &self,
        service: &ServiceSpec,
        workload: &WorkloadSpec,
        pods: &[String],
    ) -> Result<Vec<NodeClient>, ClusterError> {
        self.platform.apply_service(&self.namespace, service).await?;
        self.platform
            .apply_workload(&self.namespace, workload)
            .await?;
        let probes = pods.iter().map(|pod| {
            readiness::probe(
                &*self.platform,
                &*self.connector,
                &self.namespace,
                pod,
                &self.options.probe,
                &self.cancel,
            )
        });
        Ok(try_join_all(probes).await?)
    }

    /// Bootstrap and workload peers, in that order.
    pub fn total(&self) -> usize {
        self.boot.len() + self.workload.len()
    }

    pub fn clients(&self) -> &[NodeClient] {
        &self.clients
    }

    pub fn client(&self, i: usize) -> Option<&NodeClient> {
        self.clients.get(i)
    }

    pub fn boot(&self, i: usize) -> Option<&NodeClient> {
        self.boot.get(i)
    }

    pub fn workload(&self, i: usize) -> Option<&NodeClient> {
        self.workload.get(i)
    }

    pub fn boot_count(&self) -> usize {
        self.boot.len()
    }

    pub fn workload_count(&self) -> usize {
        self.workload.len()
    }

    pub fn auxiliary_endpoint(&self) -> Option<&str> {
        self.auxiliary.as_deref()
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn platform(&self) -> &Arc<dyn Platform> {
        &self.platform
    }
}

fn app_labels(app: &str) -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), app.to_string())])
}
