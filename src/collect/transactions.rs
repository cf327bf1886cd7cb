use std::time::Duration;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{CollectError, PeerRecord, TaskGroup, collect};
use crate::node::NodeClient;
use crate::peer::{LayerStatus, RpcError, TransactionInfo};

const SUBMIT_TIMEOUT: Duration = Duration::from_secs(1);

/// Signs and encodes a transaction for a given nonce. Key material and the
/// byte format belong to the implementor.
pub trait TransactionEncoder: Send + Sync {
    fn encode(&self, nonce: u64) -> Vec<u8>;
}

impl<F> TransactionEncoder for F
where
    F: Fn(u64) -> Vec<u8> + Send + Sync,
{
    fn encode(&self, nonce: u64) -> Vec<u8> {
        self(nonce)
    }
}

/// Submit `batch` transactions with consecutive nonces for every newly
/// confirmed round, until `stop_round` is confirmed. Returns the number of
/// submitted transactions.
pub async fn submit_batches(
    client: NodeClient,
    encoder: &dyn TransactionEncoder,
    batch: u64,
    stop_round: u32,
    cancel: CancellationToken,
) -> Result<u64, CollectError> {
    let peer = client.name().to_string();
    let mut stream = client
        .api()
        .layer_stream()
        .await
        .map_err(|e| CollectError::rpc(&peer, e))?;
    let mut nonce = 0u64;
    let mut max_round = 0u32;
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Err(CollectError::Cancelled { peer }),
            next = stream.next() => next,
        };
        let layer = match next {
            None => return Err(CollectError::StreamClosed { peer }),
            Some(Err(e)) => return Err(CollectError::rpc(&peer, e)),
            Some(Ok(layer)) => layer,
        };
        if layer.status != LayerStatus::Confirmed || layer.round <= max_round {
            continue;
        }
        max_round = layer.round;
        if layer.round >= stop_round {
            return Ok(nonce);
        }
        for _ in 0..batch {
            debug!(client = %peer, layer = layer.round, nonce, batch, "submitting transaction");
            submit_one(&client, encoder.encode(nonce)).await?;
            nonce += 1;
        }
    }
}

async fn submit_one(client: &NodeClient, raw: Vec<u8>) -> Result<(), CollectError> {
    let receipt = tokio::time::timeout(SUBMIT_TIMEOUT, client.api().submit_transaction(raw))
        .await
        .map_err(|_| {
            CollectError::rpc(
                client.name(),
                RpcError::call("SubmitTransaction", "deadline exceeded"),
            )
        })?
        .map_err(|e| CollectError::rpc(client.name(), e))?;
    debug!(client = %client.name(), state = ?receipt.state, "transaction accepted");
    Ok(())
}

/// Transactions of confirmed rounds below `stop_round`, in round order.
pub async fn collect_transactions(
    client: NodeClient,
    stop_round: u32,
    cancel: CancellationToken,
) -> Result<PeerRecord<Vec<TransactionInfo>>, CollectError> {
    let peer = client.name().to_string();
    let stream = client
        .api()
        .layer_stream()
        .await
        .map_err(|e| CollectError::rpc(&peer, e))?;
    let mut txs = Vec::new();
    collect(&peer, stream, &cancel, |layer| {
        if layer.status != LayerStatus::Confirmed {
            return Ok(true);
        }
        if layer.round >= stop_round {
            return Ok(false);
        }
        let before = txs.len();
        for block in layer.blocks {
            txs.extend(block.transactions);
        }
        debug!(
            client = %peer,
            layer = layer.round,
            transactions = txs.len() - before,
            "received transactions"
        );
        Ok(true)
    })
    .await?;
    Ok(PeerRecord { peer, record: txs })
}

pub fn spawn_transaction_collectors(
    group: &mut TaskGroup<PeerRecord<Vec<TransactionInfo>>>,
    clients: &[NodeClient],
    stop_round: u32,
) {
    for client in clients {
        let client = client.clone();
        group.spawn(move |cancel| collect_transactions(client, stop_round, cancel));
    }
}
