//! Fault injection: network partitions and pod failures.
//!
//! A fault exists as a namespaced object on the platform for as long as its
//! [`FaultHandle`] is active. Teardown deletes the object; it can be retried
//! after a failure and is a no-op once it has succeeded.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collect::CollectError;
use crate::node::NodeClient;
use crate::peer::LayerStatus;
use crate::platform::{FailureSpec, PartitionSpec, Platform, PlatformError, ResourceKind};

#[derive(Debug, thiserror::Error)]
pub enum ChaosError {
    #[error("invalid fault {name}: {reason}")]
    InvalidSelector { name: String, reason: String },
    #[error("create fault {name}: {source}")]
    Apply {
        name: String,
        #[source]
        source: PlatformError,
    },
    #[error("tear down fault {name}: {source}")]
    Teardown {
        name: String,
        #[source]
        source: PlatformError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Partition,
    Failure,
}

impl FaultKind {
    pub fn resource(&self) -> ResourceKind {
        match self {
            FaultKind::Partition => ResourceKind::NetworkChaos,
            FaultKind::Failure => ResourceKind::PodChaos,
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultKind::Partition => f.write_str("partition"),
            FaultKind::Failure => f.write_str("failure"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultState {
    Active,
    TornDown,
}

/// An applied fault. Dropping the handle does not remove the fault; namespace
/// cleanup does.
pub struct FaultHandle {
    kind: FaultKind,
    name: String,
    namespace: String,
    selectors: Vec<Vec<String>>,
    platform: Arc<dyn Platform>,
    state: Mutex<FaultState>,
}

impl fmt::Debug for FaultHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaultHandle")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("selectors", &self.selectors)
            .finish_non_exhaustive()
    }
}

impl FaultHandle {
    pub fn kind(&self) -> FaultKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pod-name sets: two for a partition, one for a failure.
    pub fn selectors(&self) -> &[Vec<String>] {
        &self.selectors
    }

    pub async fn state(&self) -> FaultState {
        *self.state.lock().await
    }

    /// Remove the fault object. An already missing object counts as removed.
    /// Other errors leave the handle active so the call can be retried.
    pub async fn teardown(&self) -> Result<(), ChaosError> {
        let mut state = self.state.lock().await;
        if *state == FaultState::TornDown {
            return Ok(());
        }
        match self
            .platform
            .delete_fault(&self.namespace, self.kind.resource(), &self.name)
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!(fault = %self.name, "fault object already gone");
            }
            Err(source) => {
                return Err(ChaosError::Teardown {
                    name: self.name.clone(),
                    source,
                });
            }
        }
        *state = FaultState::TornDown;
        info!(fault = %self.name, kind = %self.kind, "fault removed");
        Ok(())
    }

    /// Like [`Self::teardown`], but only logs failures.
    pub async fn teardown_best_effort(&self) {
        if let Err(err) = self.teardown().await {
            warn!(fault = %self.name, error = %err, "fault teardown failed");
        }
    }
}

fn invalid(name: &str, reason: impl Into<String>) -> ChaosError {
    ChaosError::InvalidSelector {
        name: name.to_string(),
        reason: reason.into(),
    }
}

/// Partition the pods in `a` from the pods in `b`, in both directions.
pub async fn partition(
    platform: Arc<dyn Platform>,
    namespace: &str,
    name: &str,
    a: &[String],
    b: &[String],
) -> Result<FaultHandle, ChaosError> {
    if a.is_empty() || b.is_empty() {
        return Err(invalid(name, "both sides of a partition need members"));
    }
    let left: HashSet<&String> = a.iter().collect();
    if let Some(shared) = b.iter().find(|p| left.contains(p)) {
        return Err(invalid(name, format!("{shared} is on both sides")));
    }
    let spec = PartitionSpec {
        name: name.to_string(),
        selector: a.to_vec(),
        target: b.to_vec(),
    };
    platform
        .apply_partition(namespace, &spec)
        .await
        .map_err(|source| ChaosError::Apply {
            name: name.to_string(),
            source,
        })?;
    info!(fault = %name, a = ?a, b = ?b, "partition applied");
    Ok(FaultHandle {
        kind: FaultKind::Partition,
        name: name.to_string(),
        namespace: namespace.to_string(),
        selectors: vec![a.to_vec(), b.to_vec()],
        platform,
        state: Mutex::new(FaultState::Active),
    })
}

/// Fail every pod in `targets` and keep them down while the fault exists.
pub async fn fail(
    platform: Arc<dyn Platform>,
    namespace: &str,
    name: &str,
    targets: &[String],
) -> Result<FaultHandle, ChaosError> {
    if targets.is_empty() {
        return Err(invalid(name, "no targets"));
    }
    let spec = FailureSpec {
        name: name.to_string(),
        targets: targets.to_vec(),
    };
    platform
        .apply_failure(namespace, &spec)
        .await
        .map_err(|source| ChaosError::Apply {
            name: name.to_string(),
            source,
        })?;
    info!(fault = %name, targets = ?targets, "failure applied");
    Ok(FaultHandle {
        kind: FaultKind::Failure,
        name: name.to_string(),
        namespace: namespace.to_string(),
        selectors: vec![targets.to_vec()],
        platform,
        state: Mutex::new(FaultState::Active),
    })
}

/// Watch `client`'s confirmed rounds; apply a fault through `action` once the
/// round reaches `from`, and tear it down once it reaches `until`. The fault is
/// removed on every exit path.
pub async fn schedule<F, Fut>(
    client: &NodeClient,
    from: u32,
    until: u32,
    action: F,
    cancel: &CancellationToken,
) -> Result<(), CollectError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<FaultHandle, ChaosError>>,
{
    let peer = client.name().to_string();
    let mut stream = client
        .api()
        .layer_stream()
        .await
        .map_err(|source| CollectError::Rpc {
            peer: peer.clone(),
            source,
        })?;
    let mut action = Some(action);
    let mut handle: Option<FaultHandle> = None;
    let result = loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break Err(CollectError::Cancelled { peer: peer.clone() }),
            next = stream.next() => next,
        };
        let layer = match next {
            None => break Err(CollectError::StreamClosed { peer: peer.clone() }),
            Some(Err(source)) => {
                break Err(CollectError::Rpc {
                    peer: peer.clone(),
                    source,
                });
            }
            Some(Ok(layer)) => layer,
        };
        if layer.status != LayerStatus::Confirmed {
            continue;
        }
        if layer.round >= until {
            break Ok(());
        }
        if layer.round >= from {
            if let Some(action) = action.take() {
                debug!(round = layer.round, "applying scheduled fault");
                match action().await {
                    Ok(h) => handle = Some(h),
                    Err(e) => break Err(e.into()),
                }
            }
        }
    };
    if let Some(handle) = handle {
        match &result {
            Ok(()) => handle.teardown().await?,
            Err(_) => handle.teardown_best_effort().await,
        }
    }
    result
}
