use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{CollectError, PeerRecord, TaskGroup, collect};
use crate::node::NodeClient;
use crate::peer::{ProposalEvent, ProposalStatus};
use crate::pretty_hex;

/// Proposals seen by one peer, grouped by round.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProposalRecord {
    /// Authored by the observing peer
    pub created: BTreeMap<u32, Vec<ProposalEvent>>,
    /// Received from others
    pub included: BTreeMap<u32, Vec<ProposalEvent>>,
}

impl ProposalRecord {
    pub fn push(&mut self, proposal: ProposalEvent) {
        let by_round = match proposal.status {
            ProposalStatus::Created => &mut self.created,
            ProposalStatus::Included => &mut self.included,
            ProposalStatus::Unspecified => return,
        };
        by_round.entry(proposal.round).or_default().push(proposal);
    }

    pub fn created_count(&self) -> usize {
        self.created.values().map(Vec::len).sum()
    }

    pub fn included_count(&self) -> usize {
        self.included.values().map(Vec::len).sum()
    }
}

/// Collect proposals of rounds up to and including `cutoff`.
pub async fn collect_proposals(
    client: NodeClient,
    cutoff: u32,
    cancel: CancellationToken,
) -> Result<PeerRecord<ProposalRecord>, CollectError> {
    let peer = client.name().to_string();
    let stream = client
        .api()
        .proposal_stream()
        .await
        .map_err(|e| CollectError::rpc(&peer, e))?;
    let mut record = ProposalRecord::default();
    collect(&peer, stream, &cancel, |proposal| {
        if proposal.round > cutoff {
            return Ok(false);
        }
        if proposal.status == ProposalStatus::Created {
            debug!(
                client = %peer,
                layer = proposal.round,
                epoch = proposal.epoch,
                smesher = %pretty_hex(&proposal.smesher),
                eligibilities = proposal.eligibilities,
                "received proposal event"
            );
        }
        record.push(proposal);
        Ok(true)
    })
    .await?;
    Ok(PeerRecord { peer, record })
}

pub fn spawn_proposal_collectors(
    group: &mut TaskGroup<PeerRecord<ProposalRecord>>,
    clients: &[NodeClient],
    cutoff: u32,
) {
    for client in clients {
        let client = client.clone();
        group.spawn(move |cancel| collect_proposals(client, cutoff, cancel));
    }
}
