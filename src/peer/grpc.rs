//! tonic client for real peers.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::StreamExt;
use tonic::transport::Channel;
use tracing::debug;

use super::{
    BlockInfo, EventStream, LayerEvent, LayerStatus, PeerApi, PeerConnector, ProposalEvent,
    ProposalStatus, RewardEvent, RpcError, TransactionInfo, TxReceipt, TxState,
};
use crate::pb;
use crate::pb::debug_service_client::DebugServiceClient;
use crate::pb::global_state_service_client::GlobalStateServiceClient;
use crate::pb::mesh_service_client::MeshServiceClient;
use crate::pb::smesher_service_client::SmesherServiceClient;
use crate::pb::transaction_service_client::TransactionServiceClient;

/// Dials peers over plaintext HTTP/2.
#[derive(Debug, Clone, Copy, Default)]
pub struct GrpcConnector;

#[async_trait]
impl PeerConnector for GrpcConnector {
    async fn connect(
        &self,
        endpoint: &str,
        timeout: Duration,
    ) -> Result<Arc<dyn PeerApi>, RpcError> {
        let peer = GrpcPeer::connect(endpoint, timeout).await?;
        Ok(Arc::new(peer))
    }
}

/// A connected peer. Cloning shares the underlying channel.
#[derive(Debug, Clone)]
pub struct GrpcPeer {
    channel: Channel,
}

impl GrpcPeer {
    pub async fn connect(endpoint: &str, timeout: Duration) -> Result<Self, RpcError> {
        let full_addr = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else {
            format!("http://{}", endpoint)
        };
        debug!(addr = %full_addr, "dialing peer");
        let dial_err = |e: tonic::transport::Error| RpcError::Dial {
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        };
        let channel_endpoint = Channel::from_shared(full_addr)
            .map_err(|e| RpcError::Dial {
                endpoint: endpoint.to_string(),
                message: e.to_string(),
            })?
            .connect_timeout(timeout);
        let channel = tokio::time::timeout(timeout, channel_endpoint.connect())
            .await
            .map_err(|_| RpcError::DialTimeout {
                endpoint: endpoint.to_string(),
                timeout,
            })?
            .map_err(dial_err)?;
        Ok(Self { channel })
    }

    pub fn from_channel(channel: Channel) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl PeerApi for GrpcPeer {
    async fn network_info(&self) -> Result<String, RpcError> {
        let resp = DebugServiceClient::new(self.channel.clone())
            .network_info(pb::NetworkInfoRequest {})
            .await
            .map_err(|s| RpcError::call("NetworkInfo", s))?;
        Ok(resp.into_inner().id)
    }

    async fn layer_stream(&self) -> Result<EventStream<LayerEvent>, RpcError> {
        let stream = MeshServiceClient::new(self.channel.clone())
            .layer_stream(pb::LayerStreamRequest {})
            .await
            .map_err(|s| RpcError::call("LayerStream", s))?
            .into_inner();
        Ok(Box::pin(stream.map(|item| match item {
            Ok(resp) => resp
                .layer
                .map(LayerEvent::from)
                .ok_or(RpcError::EmptyResponse("LayerStream")),
            Err(status) => Err(RpcError::call("LayerStream", status)),
        })))
    }

    async fn proposal_stream(&self) -> Result<EventStream<ProposalEvent>, RpcError> {
        let stream = DebugServiceClient::new(self.channel.clone())
            .proposals_stream(pb::ProposalsStreamRequest {})
            .await
            .map_err(|s| RpcError::call("ProposalsStream", s))?
            .into_inner();
        Ok(Box::pin(stream.map(|item| {
            item.map(ProposalEvent::from)
                .map_err(|status| RpcError::call("ProposalsStream", status))
        })))
    }

    async fn smesher_id(&self) -> Result<Vec<u8>, RpcError> {
        let resp = SmesherServiceClient::new(self.channel.clone())
            .smesher_id(pb::SmesherIdRequest {})
            .await
            .map_err(|s| RpcError::call("SmesherId", s))?;
        Ok(resp.into_inner().address)
    }

    async fn reward_stream(&self, account: Vec<u8>) -> Result<EventStream<RewardEvent>, RpcError> {
        let stream = GlobalStateServiceClient::new(self.channel.clone())
            .smesher_reward_stream(pb::SmesherRewardStreamRequest { id: account })
            .await
            .map_err(|s| RpcError::call("SmesherRewardStream", s))?
            .into_inner();
        Ok(Box::pin(stream.map(|item| match item {
            Ok(resp) => resp
                .reward
                .map(RewardEvent::from)
                .ok_or(RpcError::EmptyResponse("SmesherRewardStream")),
            Err(status) => Err(RpcError::call("SmesherRewardStream", status)),
        })))
    }

    async fn submit_transaction(&self, raw: Vec<u8>) -> Result<TxReceipt, RpcError> {
        let resp = TransactionServiceClient::new(self.channel.clone())
            .submit_transaction(pb::SubmitTransactionRequest { transaction: raw })
            .await
            .map_err(|s| RpcError::call("SubmitTransaction", s))?;
        resp.into_inner()
            .txstate
            .map(TxReceipt::from)
            .ok_or(RpcError::EmptyResponse("SubmitTransaction"))
    }
}

impl From<pb::Layer> for LayerEvent {
    fn from(layer: pb::Layer) -> Self {
        let status = match layer.status() {
            pb::layer::Status::Unspecified => LayerStatus::Unspecified,
            pb::layer::Status::Approved => LayerStatus::Approved,
            pb::layer::Status::Confirmed => LayerStatus::Confirmed,
            pb::layer::Status::Applied => LayerStatus::Applied,
        };
        LayerEvent {
            round: layer.number,
            status,
            hash: layer.hash,
            blocks: layer
                .blocks
                .into_iter()
                .map(|b| BlockInfo {
                    id: b.id,
                    transactions: b
                        .transactions
                        .into_iter()
                        .map(|t| TransactionInfo { id: t.id, raw: t.raw })
                        .collect(),
                })
                .collect(),
        }
    }
}

impl From<pb::Proposal> for ProposalEvent {
    fn from(p: pb::Proposal) -> Self {
        let status = match p.status() {
            pb::proposal::Status::Unspecified => ProposalStatus::Unspecified,
            pb::proposal::Status::Created => ProposalStatus::Created,
            pb::proposal::Status::Included => ProposalStatus::Included,
        };
        ProposalEvent {
            id: p.id,
            round: p.layer,
            epoch: p.epoch,
            smesher: p.smesher,
            eligibilities: p.eligibilities,
            status,
        }
    }
}

impl From<pb::Reward> for RewardEvent {
    fn from(r: pb::Reward) -> Self {
        RewardEvent {
            round: r.layer,
            layer_reward: r.layer_reward,
            total: r.total,
        }
    }
}

impl From<pb::TransactionState> for TxReceipt {
    fn from(t: pb::TransactionState) -> Self {
        let state = match t.state() {
            pb::transaction_state::State::Unspecified => TxState::Unspecified,
            pb::transaction_state::State::Rejected => TxState::Rejected,
            pb::transaction_state::State::Mempool => TxState::Mempool,
            pb::transaction_state::State::Processed => TxState::Processed,
        };
        TxReceipt { id: t.id, state }
    }
}
