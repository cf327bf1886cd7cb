//! Concurrent consumption of per-peer event streams.
//!
//! [`collect`] drives one stream through a predicate until it says stop.
//! [`TaskGroup`] runs one such task per peer, cancels the siblings on the
//! first failure, and returns the per-peer results in spawn order.

use std::collections::BTreeMap;
use std::future::Future;
use tokio::task::JoinSet;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::chaos::ChaosError;
use crate::peer::{EventStream, RpcError};

pub mod layers;
pub mod proposals;
pub mod rewards;
pub mod transactions;

pub use layers::{RoundHashes, collect_layers, spawn_layer_collectors};
pub use proposals::{ProposalRecord, collect_proposals, spawn_proposal_collectors};
pub use rewards::{RewardRecord, collect_rewards, spawn_reward_collectors};
pub use transactions::{
    TransactionEncoder, collect_transactions, spawn_transaction_collectors, submit_batches,
};

#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error("{peer}: collection cancelled")]
    Cancelled { peer: String },
    #[error("{peer}: stream closed")]
    StreamClosed { peer: String },
    #[error("{peer}: {source}")]
    Rpc {
        peer: String,
        #[source]
        source: RpcError,
    },
    #[error("{peer}: {message}")]
    Rejected { peer: String, message: String },
    #[error(transparent)]
    Chaos(#[from] ChaosError),
    #[error("collector task failed: {0}")]
    Task(String),
}

impl CollectError {
    pub(crate) fn rpc(peer: &str, source: RpcError) -> Self {
        CollectError::Rpc {
            peer: peer.to_string(),
            source,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CollectError::Cancelled { .. })
    }
}

/// Feed `stream` into `predicate` until it returns `Ok(false)`.
///
/// Ends with an error when the predicate fails, the stream yields an error or
/// ends, or `cancel` fires.
pub async fn collect<T, P>(
    peer: &str,
    mut stream: EventStream<T>,
    cancel: &CancellationToken,
    mut predicate: P,
) -> Result<(), CollectError>
where
    P: FnMut(T) -> Result<bool, CollectError>,
{
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(CollectError::Cancelled { peer: peer.to_string() });
            }
            next = stream.next() => next,
        };
        match next {
            None => {
                return Err(CollectError::StreamClosed {
                    peer: peer.to_string(),
                });
            }
            Some(Err(source)) => return Err(CollectError::rpc(peer, source)),
            Some(Ok(event)) => {
                if !predicate(event)? {
                    return Ok(());
                }
            }
        }
    }
}

/// Output of one per-peer collector.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerRecord<T> {
    pub peer: String,
    pub record: T,
}

/// A round number that arrived out of order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundAnomaly {
    pub previous: u32,
    pub received: u32,
}

/// Per-round values as observed by one peer.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundRecord<V> {
    values: BTreeMap<u32, V>,
    last: Option<u32>,
    anomalies: Vec<RoundAnomaly>,
}

impl<V> Default for RoundRecord<V> {
    fn default() -> Self {
        Self {
            values: BTreeMap::new(),
            last: None,
            anomalies: Vec::new(),
        }
    }
}

impl<V> RoundRecord<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `value` for `round`. Rounds should strictly increase; a round at
    /// or below the last one overwrites and is kept as an anomaly.
    pub fn insert(&mut self, round: u32, value: V) {
        if let Some(previous) = self.last {
            if round <= previous {
                warn!(previous, received = round, "round out of order");
                self.anomalies.push(RoundAnomaly {
                    previous,
                    received: round,
                });
            }
        }
        self.last = Some(self.last.map_or(round, |l| l.max(round)));
        self.values.insert(round, value);
    }

    pub fn get(&self, round: u32) -> Option<&V> {
        self.values.get(&round)
    }

    pub fn values(&self) -> &BTreeMap<u32, V> {
        &self.values
    }

    pub fn last_round(&self) -> Option<u32> {
        self.last
    }

    pub fn anomalies(&self) -> &[RoundAnomaly] {
        &self.anomalies
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<V> FromIterator<(u32, V)> for RoundRecord<V> {
    fn from_iter<I: IntoIterator<Item = (u32, V)>>(iter: I) -> Self {
        let mut record = Self::new();
        for (round, value) in iter {
            record.insert(round, value);
        }
        record
    }
}

/// Tasks sharing one cancellation scope.
///
/// Every task gets a child token of the group's token. The first failure
/// cancels the group; [`TaskGroup::wait`] still joins every task.
pub struct TaskGroup<T> {
    tasks: JoinSet<(usize, Result<T, CollectError>)>,
    cancel: CancellationToken,
    spawned: usize,
}

impl<T: Send + 'static> TaskGroup<T> {
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            tasks: JoinSet::new(),
            cancel: parent.child_token(),
            spawned: 0,
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn len(&self) -> usize {
        self.spawned
    }

    pub fn is_empty(&self) -> bool {
        self.spawned == 0
    }

    /// Spawn a task; returns its index in the output of [`Self::wait`].
    pub fn spawn<F, Fut>(&mut self, task: F) -> usize
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, CollectError>> + Send + 'static,
    {
        let index = self.spawned;
        self.spawned += 1;
        let fut = task(self.cancel.child_token());
        self.tasks.spawn(async move { (index, fut.await) });
        index
    }

    /// Join every task. Returns the first failure, or all outputs in spawn
    /// order.
    pub async fn wait(mut self) -> Result<Vec<T>, CollectError> {
        let mut outputs: Vec<Option<T>> = (0..self.spawned).map(|_| None).collect();
        let mut first_err = None;
        while let Some(joined) = self.tasks.join_next().await {
            let err = match joined {
                Ok((index, Ok(value))) => {
                    outputs[index] = Some(value);
                    continue;
                }
                Ok((index, Err(err))) => {
                    debug!(task = index, error = %err, "task failed");
                    err
                }
                Err(join_err) => CollectError::Task(join_err.to_string()),
            };
            if first_err.is_none() {
                self.cancel.cancel();
                first_err = Some(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(outputs.into_iter().flatten().collect()),
        }
    }
}
