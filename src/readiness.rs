//! Turns a freshly scheduled replica into a resolved [`NodeClient`].
//!
//! Two phases: poll the backend until the pod runs (bounded only by the
//! cancellation token), then dial the management endpoint and ask for the
//! network identity, with a fixed attempt budget and no pause between
//! attempts.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::node::{IdentityAlreadySet, NodeClient, NodeRecord};
use crate::peer::{PeerApi, PeerConnector, RpcError};
use crate::platform::{Platform, PlatformError, PodPhase, PodStatus};
use crate::settings::ProbeConfig;

#[derive(Debug, thiserror::Error)]
pub enum ReadinessError {
    #[error("pod {name} failed")]
    PodFailed { name: String },
    #[error("pod {name} exited")]
    PodExited { name: String },
    #[error("waiting for {name} cancelled")]
    Cancelled { name: String },
    #[error("read pod {name}: {source}")]
    Platform {
        name: String,
        #[source]
        source: PlatformError,
    },
    #[error("resolve {name}: gave up after {attempts} attempts: {last}")]
    Exhausted {
        name: String,
        attempts: u32,
        #[source]
        last: RpcError,
    },
    #[error(transparent)]
    Identity(#[from] IdentityAlreadySet),
}

/// Poll `name` until it runs. The terminal `Failed` and `Succeeded` phases
/// are fatal. A pod the backend does not know yet counts as not scheduled.
pub async fn wait_running(
    platform: &dyn Platform,
    namespace: &str,
    name: &str,
    poll_interval: Duration,
    cancel: &CancellationToken,
) -> Result<PodStatus, ReadinessError> {
    let cancelled = || ReadinessError::Cancelled {
        name: name.to_string(),
    };
    loop {
        if cancel.is_cancelled() {
            return Err(cancelled());
        }
        let status = tokio::select! {
            _ = cancel.cancelled() => return Err(cancelled()),
            status = platform.get_pod(namespace, name) => status,
        };
        match status {
            Ok(pod) if pod.phase == PodPhase::Running => return Ok(pod),
            Ok(pod) if pod.phase == PodPhase::Failed => {
                return Err(ReadinessError::PodFailed {
                    name: name.to_string(),
                });
            }
            Ok(pod) if pod.phase == PodPhase::Succeeded => {
                return Err(ReadinessError::PodExited {
                    name: name.to_string(),
                });
            }
            Ok(pod) => debug!(pod = %name, phase = ?pod.phase, "pod not running yet"),
            Err(e) if e.is_not_found() => debug!(pod = %name, "pod not scheduled yet"),
            Err(source) => {
                return Err(ReadinessError::Platform {
                    name: name.to_string(),
                    source,
                });
            }
        }
        tokio::select! {
            _ = cancel.cancelled() => return Err(cancelled()),
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }
}

/// Dial `record` and resolve its identity, making at most `settings.attempts`
/// attempts. Only the last attempt's error is reported.
pub async fn resolve_node(
    connector: &dyn PeerConnector,
    mut record: NodeRecord,
    settings: &ProbeConfig,
    cancel: &CancellationToken,
) -> Result<NodeClient, ReadinessError> {
    let attempts = settings.attempts.max(1);
    let endpoint = record.api_endpoint();
    let timeout = settings.dial_timeout();
    let mut attempt = 1;
    loop {
        let result = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(ReadinessError::Cancelled { name: record.name.clone() });
            }
            result = resolve_once(connector, &endpoint, timeout) => result,
        };
        match result {
            Ok((api, identity)) => {
                record.set_identity(identity)?;
                info!(
                    name = %record.name,
                    address = %record.address,
                    identity = record.identity().unwrap_or_default(),
                    "peer ready"
                );
                return Ok(NodeClient::new(record, api));
            }
            Err(last) if attempt >= attempts => {
                return Err(ReadinessError::Exhausted {
                    name: record.name.clone(),
                    attempts,
                    last,
                });
            }
            Err(err) => {
                debug!(name = %record.name, attempt, error = %err, "resolve failed, retrying");
                attempt += 1;
            }
        }
    }
}

async fn resolve_once(
    connector: &dyn PeerConnector,
    endpoint: &str,
    timeout: Duration,
) -> Result<(Arc<dyn PeerApi>, String), RpcError> {
    let api = tokio::time::timeout(timeout, connector.connect(endpoint, timeout))
        .await
        .map_err(|_| RpcError::DialTimeout {
            endpoint: endpoint.to_string(),
            timeout,
        })??;
    let identity = api.network_info().await?;
    Ok((api, identity))
}

/// `wait_running` then `resolve_node`.
pub async fn probe(
    platform: &dyn Platform,
    connector: &dyn PeerConnector,
    namespace: &str,
    name: &str,
    settings: &ProbeConfig,
    cancel: &CancellationToken,
) -> Result<NodeClient, ReadinessError> {
    let pod = wait_running(platform, namespace, name, settings.poll_interval(), cancel).await?;
    resolve_node(connector, NodeRecord::new(name, pod.ip), settings, cancel).await
}
