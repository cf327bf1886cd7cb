//! Simulated peer network on top of [`MockPlatform`].
//!
//! A shared round clock drives every stream. When a round is confirmed each
//! registered peer fixes its digest for it from the round number and the set
//! of registered peers it cannot reach at that moment, so peers on the same
//! side of a partition agree and peers on different sides diverge for the
//! rounds confirmed while the partition is active. Dialing goes through the
//! platform: only running pods answer.

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{
    BlockInfo, EventStream, LayerEvent, LayerStatus, PeerApi, PeerConnector, ProposalEvent,
    ProposalStatus, RewardEvent, RpcError, TransactionInfo, TxReceipt, TxState,
};
use crate::platform::{MockPlatform, PodPhase};

#[derive(Debug, Clone)]
pub struct MockNetworkOptions {
    /// Rounds a peer registered after genesis waits before it proposes
    pub join_delay: u32,
    /// Eligibilities carried by every proposal
    pub eligibilities: u32,
    /// Reward paid per round a peer proposes in
    pub layer_reward: u64,
    pub rounds_per_epoch: u32,
}

impl Default for MockNetworkOptions {
    fn default() -> Self {
        Self {
            join_delay: 16,
            eligibilities: 2,
            layer_reward: 1_000,
            rounds_per_epoch: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Clock {
    round: u32,
    closed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct PeerKey {
    namespace: String,
    name: String,
}

#[derive(Debug, Clone)]
struct PeerState {
    identity: String,
    joined_at: u32,
}

#[derive(Debug, Default)]
struct NetState {
    peers: BTreeMap<PeerKey, PeerState>,
    dial_failures: HashMap<String, u32>,
    dial_attempts: HashMap<String, u32>,
    pending: Vec<TransactionInfo>,
    blocks: BTreeMap<u32, Vec<TransactionInfo>>,
    digests: BTreeMap<u32, HashMap<PeerKey, Vec<u8>>>,
    tx_seq: u64,
}

struct Inner {
    platform: Arc<MockPlatform>,
    options: MockNetworkOptions,
    clock: watch::Sender<Clock>,
    state: Mutex<NetState>,
}

/// Simulated network. Cloning shares the same network.
#[derive(Clone)]
pub struct MockNetwork {
    inner: Arc<Inner>,
}

impl MockNetwork {
    pub fn new(platform: Arc<MockPlatform>) -> Self {
        Self::with_options(platform, MockNetworkOptions::default())
    }

    pub fn with_options(platform: Arc<MockPlatform>, options: MockNetworkOptions) -> Self {
        let (clock, _) = watch::channel(Clock::default());
        Self {
            inner: Arc::new(Inner {
                platform,
                options,
                clock,
                state: Mutex::new(NetState::default()),
            }),
        }
    }

    pub fn current_round(&self) -> u32 {
        self.inner.clock.borrow().round
    }

    /// Confirm the next round. Transactions submitted since the previous
    /// round land in this round's block.
    pub async fn advance(&self) -> u32 {
        let round = self.current_round() + 1;
        let keys: Vec<PeerKey> = {
            let state = self.inner.state.lock().await;
            state.peers.keys().cloned().collect()
        };
        let mut digests = HashMap::with_capacity(keys.len());
        for key in &keys {
            digests.insert(key.clone(), self.inner.digest(key, round).await);
        }
        let mut state = self.inner.state.lock().await;
        let txs = std::mem::take(&mut state.pending);
        state.blocks.insert(round, txs);
        state.digests.insert(round, digests);
        self.inner.clock.send_modify(|c| c.round = round);
        round
    }

    /// Advance one round every `period` until `cancel` fires.
    pub fn run_clock(&self, period: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let net = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(period) => {}
                }
                let round = net.advance().await;
                debug!(round, "mock round");
            }
        })
    }

    /// End every open stream.
    pub fn close(&self) {
        self.inner.clock.send_modify(|c| c.closed = true);
    }

    /// Make the next `count` dials of `pod` fail.
    pub async fn fail_dials(&self, pod: &str, count: u32) {
        let mut state = self.inner.state.lock().await;
        *state.dial_failures.entry(pod.to_string()).or_default() += count;
    }

    pub async fn dial_attempts(&self, pod: &str) -> u32 {
        let state = self.inner.state.lock().await;
        state.dial_attempts.get(pod).copied().unwrap_or(0)
    }

    /// Identity a pod reports once dialed.
    pub fn identity_of(pod: &str) -> String {
        format!("12D3KooW{pod}")
    }
}

#[async_trait]
impl PeerConnector for MockNetwork {
    async fn connect(
        &self,
        endpoint: &str,
        _timeout: Duration,
    ) -> Result<Arc<dyn PeerApi>, RpcError> {
        let refused = |message: &str| RpcError::Dial {
            endpoint: endpoint.to_string(),
            message: message.to_string(),
        };
        let ip = endpoint.rsplit_once(':').map_or(endpoint, |(ip, _)| ip);
        let (namespace, name) = self
            .inner
            .platform
            .pod_by_ip(ip)
            .await
            .ok_or_else(|| refused("no route to host"))?;

        {
            let mut state = self.inner.state.lock().await;
            *state.dial_attempts.entry(name.clone()).or_default() += 1;
            if let Some(remaining) = state.dial_failures.get_mut(&name) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(refused("connection refused"));
                }
            }
        }

        let phase = self.inner.platform.peek_phase(&namespace, &name).await;
        if phase != Some(PodPhase::Running) {
            return Err(refused("connection refused"));
        }

        let key = PeerKey { namespace, name };
        let round = self.current_round();
        let mut state = self.inner.state.lock().await;
        state
            .peers
            .entry(key.clone())
            .or_insert_with(|| PeerState {
                identity: Self::identity_of(&key.name),
                joined_at: round,
            });
        Ok(Arc::new(MockPeer {
            inner: self.inner.clone(),
            key,
        }))
    }
}

impl Inner {
    async fn is_down(&self, key: &PeerKey) -> bool {
        self.platform.peek_phase(&key.namespace, &key.name).await != Some(PodPhase::Running)
    }

    async fn peers_in(&self, namespace: &str) -> Vec<(PeerKey, PeerState)> {
        let state = self.state.lock().await;
        state
            .peers
            .iter()
            .filter(|(k, _)| k.namespace == namespace)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn eligible(&self, peer: &PeerState, round: u32) -> bool {
        peer.joined_at == 0 || round >= peer.joined_at + self.options.join_delay
    }

    async fn digest(&self, key: &PeerKey, round: u32) -> Vec<u8> {
        let mut unreachable = Vec::new();
        for (other, _) in self.peers_in(&key.namespace).await {
            if !self
                .platform
                .reachable(&key.namespace, &key.name, &other.name)
                .await
            {
                unreachable.push(other.name);
            }
        }
        format!("{round}:{}", unreachable.join(",")).into_bytes()
    }

    async fn layer(&self, key: &PeerKey, round: u32) -> Result<Vec<LayerEvent>, RpcError> {
        if self.is_down(key).await {
            return Err(RpcError::call("LayerStream", "peer unavailable"));
        }
        let (fixed, transactions) = {
            let state = self.state.lock().await;
            (
                state.digests.get(&round).and_then(|d| d.get(key)).cloned(),
                state.blocks.get(&round).cloned().unwrap_or_default(),
            )
        };
        let hash = match fixed {
            Some(hash) => hash,
            None => self.digest(key, round).await,
        };
        Ok(vec![LayerEvent {
            round,
            status: LayerStatus::Confirmed,
            hash,
            blocks: vec![BlockInfo {
                id: format!("block-{round}").into_bytes(),
                transactions,
            }],
        }])
    }

    async fn proposals(&self, key: &PeerKey, round: u32) -> Result<Vec<ProposalEvent>, RpcError> {
        if self.is_down(key).await {
            return Err(RpcError::call("ProposalsStream", "peer unavailable"));
        }
        let mut events = Vec::new();
        for (other, peer) in self.peers_in(&key.namespace).await {
            if !self.eligible(&peer, round) {
                continue;
            }
            let own = other == *key;
            if !own
                && !self
                    .platform
                    .reachable(&key.namespace, &key.name, &other.name)
                    .await
            {
                continue;
            }
            events.push(ProposalEvent {
                id: format!("{}/{round}", other.name).into_bytes(),
                round,
                epoch: u64::from(round / self.options.rounds_per_epoch.max(1)),
                smesher: peer.identity.clone().into_bytes(),
                eligibilities: self.options.eligibilities,
                status: if own {
                    ProposalStatus::Created
                } else {
                    ProposalStatus::Included
                },
            });
        }
        Ok(events)
    }

    async fn reward(
        &self,
        key: &PeerKey,
        round: u32,
        total: &mut u64,
    ) -> Result<Vec<RewardEvent>, RpcError> {
        if self.is_down(key).await {
            return Err(RpcError::call("SmesherRewardStream", "peer unavailable"));
        }
        let peer = {
            let state = self.state.lock().await;
            state.peers.get(key).cloned()
        };
        match peer {
            Some(peer) if self.eligible(&peer, round) => {
                *total += self.options.layer_reward;
                Ok(vec![RewardEvent {
                    round,
                    layer_reward: self.options.layer_reward,
                    total: *total,
                }])
            }
            _ => Ok(Vec::new()),
        }
    }
}

struct MockPeer {
    inner: Arc<Inner>,
    key: PeerKey,
}

type Produce<T> = Box<dyn FnMut(u32) -> BoxFuture<'static, Result<Vec<T>, RpcError>> + Send>;

/// Emit the events of every round confirmed after subscription, in order.
fn round_stream<T: Send + 'static>(inner: &Inner, mut produce: Produce<T>) -> EventStream<T> {
    let (tx, rx) = mpsc::channel(64);
    let mut clock = inner.clock.subscribe();
    let mut last = clock.borrow_and_update().round;
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tx.closed() => return,
                changed = clock.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
            let Clock { round, closed } = *clock.borrow_and_update();
            if closed {
                return;
            }
            for r in last + 1..=round {
                match produce(r).await {
                    Ok(items) => {
                        for item in items {
                            if tx.send(Ok(item)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(err) => {
                        let _ = tx.send(Err(err)).await;
                        return;
                    }
                }
            }
            last = last.max(round);
        }
    });
    Box::pin(ReceiverStream::new(rx))
}

#[async_trait]
impl PeerApi for MockPeer {
    async fn network_info(&self) -> Result<String, RpcError> {
        if self.inner.is_down(&self.key).await {
            return Err(RpcError::call("NetworkInfo", "peer unavailable"));
        }
        Ok(MockNetwork::identity_of(&self.key.name))
    }

    async fn layer_stream(&self) -> Result<EventStream<LayerEvent>, RpcError> {
        let inner = self.inner.clone();
        let key = self.key.clone();
        Ok(round_stream(
            &self.inner,
            Box::new(move |round| {
                let inner = inner.clone();
                let key = key.clone();
                async move { inner.layer(&key, round).await }.boxed()
            }),
        ))
    }

    async fn proposal_stream(&self) -> Result<EventStream<ProposalEvent>, RpcError> {
        let inner = self.inner.clone();
        let key = self.key.clone();
        Ok(round_stream(
            &self.inner,
            Box::new(move |round| {
                let inner = inner.clone();
                let key = key.clone();
                async move { inner.proposals(&key, round).await }.boxed()
            }),
        ))
    }

    async fn smesher_id(&self) -> Result<Vec<u8>, RpcError> {
        Ok(MockNetwork::identity_of(&self.key.name).into_bytes())
    }

    async fn reward_stream(&self, account: Vec<u8>) -> Result<EventStream<RewardEvent>, RpcError> {
        if account != MockNetwork::identity_of(&self.key.name).into_bytes() {
            return Err(RpcError::call("SmesherRewardStream", "unknown account"));
        }
        let inner = self.inner.clone();
        let key = self.key.clone();
        let total = Arc::new(AtomicU64::new(0));
        Ok(round_stream(
            &self.inner,
            Box::new(move |round| {
                let inner = inner.clone();
                let key = key.clone();
                let total = total.clone();
                async move {
                    let mut current = total.load(Ordering::SeqCst);
                    let events = inner.reward(&key, round, &mut current).await?;
                    total.store(current, Ordering::SeqCst);
                    Ok(events)
                }
                .boxed()
            }),
        ))
    }

    async fn submit_transaction(&self, raw: Vec<u8>) -> Result<TxReceipt, RpcError> {
        if self.inner.is_down(&self.key).await {
            return Err(RpcError::call("SubmitTransaction", "peer unavailable"));
        }
        let mut state = self.inner.state.lock().await;
        state.tx_seq += 1;
        let id = state.tx_seq.to_be_bytes().to_vec();
        state.pending.push(TransactionInfo {
            id: id.clone(),
            raw,
        });
        Ok(TxReceipt {
            id,
            state: TxState::Mempool,
        })
    }
}
