use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{CollectError, PeerRecord, RoundRecord, TaskGroup, collect};
use crate::node::NodeClient;
use crate::peer::LayerStatus;
use crate::pretty_hex;

/// Round digests observed by one peer.
pub type RoundHashes = RoundRecord<Vec<u8>>;

/// Record the digest of every confirmed round up to and including `cutoff`.
pub async fn collect_layers(
    client: NodeClient,
    cutoff: u32,
    cancel: CancellationToken,
) -> Result<PeerRecord<RoundHashes>, CollectError> {
    let peer = client.name().to_string();
    let stream = client
        .api()
        .layer_stream()
        .await
        .map_err(|e| CollectError::rpc(&peer, e))?;
    let mut record = RoundHashes::new();
    collect(&peer, stream, &cancel, |layer| {
        // Approved rounds run ahead of confirmation.
        if layer.status != LayerStatus::Confirmed {
            return Ok(true);
        }
        if layer.round > cutoff {
            return Ok(false);
        }
        debug!(
            client = %peer,
            layer = layer.round,
            hash = %pretty_hex(&layer.hash),
            "confirmed layer"
        );
        record.insert(layer.round, layer.hash);
        Ok(layer.round < cutoff)
    })
    .await?;
    Ok(PeerRecord { peer, record })
}

pub fn spawn_layer_collectors(
    group: &mut TaskGroup<PeerRecord<RoundHashes>>,
    clients: &[NodeClient],
    cutoff: u32,
) {
    for client in clients {
        let client = client.clone();
        group.spawn(move |cancel| collect_layers(client, cutoff, cancel));
    }
}
