//! Client side of the peer management RPC.
//!
//! The harness talks to peers through [`PeerApi`], which hands out plain event
//! types rather than protobuf messages. [`GrpcConnector`] dials real peers;
//! [`MockNetwork`] simulates a whole network on top of a `MockPlatform`.

use async_trait::async_trait;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::Stream;

pub mod grpc;
pub mod mock;

pub use grpc::{GrpcConnector, GrpcPeer};
pub use mock::{MockNetwork, MockNetworkOptions};

/// Error type for peer RPC operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum RpcError {
    #[error("dial {endpoint}: {message}")]
    Dial { endpoint: String, message: String },
    #[error("dial {endpoint} timed out after {timeout:?}")]
    DialTimeout { endpoint: String, timeout: Duration },
    #[error("{method}: {message}")]
    Call {
        method: &'static str,
        message: String,
    },
    #[error("{0} returned an empty message")]
    EmptyResponse(&'static str),
}

impl RpcError {
    pub(crate) fn call(method: &'static str, message: impl ToString) -> Self {
        RpcError::Call {
            method,
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerStatus {
    Unspecified,
    Approved,
    Confirmed,
    Applied,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionInfo {
    pub id: Vec<u8>,
    pub raw: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockInfo {
    pub id: Vec<u8>,
    pub transactions: Vec<TransactionInfo>,
}

/// One round ("layer") as reported by a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerEvent {
    pub round: u32,
    pub status: LayerStatus,
    pub hash: Vec<u8>,
    pub blocks: Vec<BlockInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProposalStatus {
    Unspecified,
    /// Authored by the reporting peer
    Created,
    /// Received from another peer
    Included,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposalEvent {
    pub id: Vec<u8>,
    pub round: u32,
    pub epoch: u64,
    pub smesher: Vec<u8>,
    pub eligibilities: u32,
    pub status: ProposalStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewardEvent {
    pub round: u32,
    pub layer_reward: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Unspecified,
    Rejected,
    Mempool,
    Processed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub id: Vec<u8>,
    pub state: TxState,
}

/// A boxed stream of peer events
pub type EventStream<T> = Pin<Box<dyn Stream<Item = Result<T, RpcError>> + Send>>;

/// Typed calls against one peer.
#[async_trait]
pub trait PeerApi: Send + Sync {
    /// The peer's network identity.
    async fn network_info(&self) -> Result<String, RpcError>;

    /// Rounds in increasing order, starting after subscription.
    async fn layer_stream(&self) -> Result<EventStream<LayerEvent>, RpcError>;

    async fn proposal_stream(&self) -> Result<EventStream<ProposalEvent>, RpcError>;

    /// Account that collects this peer's rewards.
    async fn smesher_id(&self) -> Result<Vec<u8>, RpcError>;

    async fn reward_stream(&self, account: Vec<u8>) -> Result<EventStream<RewardEvent>, RpcError>;

    /// Submit an already signed and encoded transaction.
    async fn submit_transaction(&self, raw: Vec<u8>) -> Result<TxReceipt, RpcError>;
}

/// Dials peers by management endpoint (`address:port`).
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn connect(
        &self,
        endpoint: &str,
        timeout: Duration,
    ) -> Result<Arc<dyn PeerApi>, RpcError>;
}
