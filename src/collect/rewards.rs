use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{CollectError, PeerRecord, TaskGroup, collect};
use crate::node::NodeClient;
use crate::pretty_hex;

/// Rewards paid to one peer's own account.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewardRecord {
    pub account: Vec<u8>,
    /// Rounds the peer was paid in, ascending
    pub rounds: Vec<u32>,
    pub sum: u64,
}

/// Sum the rewards of rounds up to and including `cutoff`.
pub async fn collect_rewards(
    client: NodeClient,
    cutoff: u32,
    cancel: CancellationToken,
) -> Result<PeerRecord<RewardRecord>, CollectError> {
    let peer = client.name().to_string();
    let account = client
        .api()
        .smesher_id()
        .await
        .map_err(|e| CollectError::rpc(&peer, e))?;
    let stream = client
        .api()
        .reward_stream(account.clone())
        .await
        .map_err(|e| CollectError::rpc(&peer, e))?;
    let mut record = RewardRecord {
        account,
        ..Default::default()
    };
    collect(&peer, stream, &cancel, |reward| {
        if reward.round > cutoff {
            return Ok(false);
        }
        debug!(
            client = %peer,
            layer = reward.round,
            account = %pretty_hex(&record.account),
            reward = reward.layer_reward,
            "received reward"
        );
        record.rounds.push(reward.round);
        record.sum += reward.layer_reward;
        Ok(reward.round < cutoff)
    })
    .await?;
    Ok(PeerRecord { peer, record })
}

pub fn spawn_reward_collectors(
    group: &mut TaskGroup<PeerRecord<RewardRecord>>,
    clients: &[NodeClient],
    cutoff: u32,
) {
    for client in clients {
        let client = client.clone();
        group.spawn(move |cancel| collect_rewards(client, cutoff, cancel));
    }
}
