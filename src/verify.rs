//! Cross-peer consistency checks over collected records.
//!
//! Every check returns the first violation it finds as a
//! [`ConsistencyError`] naming the peer, the round and both values.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::RangeInclusive;

use crate::collect::{PeerRecord, ProposalRecord, RewardRecord, RoundAnomaly, RoundRecord};
use crate::peer::TransactionInfo;
use crate::pretty_hex;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConsistencyError {
    #[error("no records to compare")]
    Empty,
    #[error("{peer} shares no rounds with reference {reference}")]
    NoCommonRounds { reference: String, peer: String },
    #[error("{peer} round {round}: expected {expected}, got {actual}")]
    RoundMismatch {
        peer: String,
        round: u32,
        expected: String,
        actual: String,
    },
    #[error("{peer} received round {} after round {}", anomaly.received, anomaly.previous)]
    OutOfOrder { peer: String, anomaly: RoundAnomaly },
    #[error("{peer} reward {actual} deviates from {expected} by more than {tolerance}")]
    RewardOutOfTolerance {
        peer: String,
        expected: u64,
        actual: u64,
        tolerance: f64,
    },
    #[error("smesher {smesher}: expected {expected} eligibilities, got {actual}")]
    EligibilityMismatch {
        smesher: String,
        expected: u64,
        actual: u64,
    },
    #[error("{peer}: expected {expected} {what}, got {actual}")]
    CountMismatch {
        peer: String,
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("reference {peer} saw no transactions")]
    NoTransactions { peer: String },
    #[error("{peer} transaction {index}: expected {expected}, got {actual}")]
    TransactionMismatch {
        peer: String,
        index: usize,
        expected: String,
        actual: String,
    },
}

/// Compare every record against the first one at every round both contain.
/// Rounds outside `rounds` are ignored. Out-of-order rounds in any record
/// fail the check.
pub fn verify_rounds(
    records: &[PeerRecord<RoundRecord<Vec<u8>>>],
    rounds: RangeInclusive<u32>,
) -> Result<(), ConsistencyError> {
    let (reference, rest) = records.split_first().ok_or(ConsistencyError::Empty)?;
    for tested in records {
        if let Some(anomaly) = tested.record.anomalies().first() {
            return Err(ConsistencyError::OutOfOrder {
                peer: tested.peer.clone(),
                anomaly: *anomaly,
            });
        }
    }
    for tested in rest {
        let mut compared = 0usize;
        for (round, expected) in reference.record.values().range(rounds.clone()) {
            let Some(actual) = tested.record.get(*round) else {
                continue;
            };
            compared += 1;
            if actual != expected {
                return Err(ConsistencyError::RoundMismatch {
                    peer: tested.peer.clone(),
                    round: *round,
                    expected: pretty_hex(expected),
                    actual: pretty_hex(actual),
                });
            }
        }
        if compared == 0 {
            return Err(ConsistencyError::NoCommonRounds {
                reference: reference.peer.clone(),
                peer: tested.peer.clone(),
            });
        }
    }
    Ok(())
}

/// Every peer's reward sum must be within `tolerance` (relative) of the
/// first peer's.
pub fn verify_rewards(
    records: &[PeerRecord<RewardRecord>],
    tolerance: f64,
) -> Result<(), ConsistencyError> {
    let (reference, rest) = records.split_first().ok_or(ConsistencyError::Empty)?;
    let expected = reference.record.sum;
    for tested in rest {
        let actual = tested.record.sum;
        let deviation = expected.abs_diff(actual) as f64;
        if deviation > expected as f64 * tolerance {
            return Err(ConsistencyError::RewardOutOfTolerance {
                peer: tested.peer.clone(),
                expected,
                actual,
                tolerance,
            });
        }
    }
    Ok(())
}

/// Total eligibilities per authoring smesher over every created proposal.
pub fn aggregate_eligibilities(records: &[PeerRecord<ProposalRecord>]) -> BTreeMap<String, u64> {
    let mut aggregated = BTreeMap::new();
    for record in records {
        for proposal in record.record.created.values().flatten() {
            *aggregated.entry(pretty_hex(&proposal.smesher)).or_default() +=
                u64::from(proposal.eligibilities);
        }
    }
    aggregated
}

/// All smeshers must have accumulated the same number of eligibilities.
pub fn verify_equal_eligibilities(
    records: &[PeerRecord<ProposalRecord>],
) -> Result<(), ConsistencyError> {
    let aggregated = aggregate_eligibilities(records);
    let mut iter = aggregated.iter();
    let Some((_, expected)) = iter.next() else {
        return Err(ConsistencyError::Empty);
    };
    for (smesher, actual) in iter {
        if actual != expected {
            return Err(ConsistencyError::EligibilityMismatch {
                smesher: smesher.clone(),
                expected: *expected,
                actual: *actual,
            });
        }
    }
    Ok(())
}

/// Every peer must have seen the same number of included proposals in
/// `rounds`.
pub fn verify_included_counts(
    records: &[PeerRecord<ProposalRecord>],
    rounds: RangeInclusive<u32>,
) -> Result<(), ConsistencyError> {
    let count = |r: &ProposalRecord| -> usize {
        r.included.range(rounds.clone()).map(|(_, v)| v.len()).sum()
    };
    let (reference, rest) = records.split_first().ok_or(ConsistencyError::Empty)?;
    let expected = count(&reference.record);
    for tested in rest {
        let actual = count(&tested.record);
        if actual != expected {
            return Err(ConsistencyError::CountMismatch {
                peer: tested.peer.clone(),
                what: "included proposals",
                expected,
                actual,
            });
        }
    }
    Ok(())
}

/// Distinct authoring smeshers of created proposals, per epoch.
pub fn unique_proposers(records: &[PeerRecord<ProposalRecord>]) -> BTreeMap<u64, BTreeSet<String>> {
    let mut unique: BTreeMap<u64, BTreeSet<String>> = BTreeMap::new();
    for record in records {
        for proposal in record.record.created.values().flatten() {
            unique
                .entry(proposal.epoch)
                .or_default()
                .insert(pretty_hex(&proposal.smesher));
        }
    }
    unique
}

/// Each epoch in `epochs` must have exactly `expected` unique proposers.
pub fn verify_proposer_counts(
    unique: &BTreeMap<u64, BTreeSet<String>>,
    epochs: RangeInclusive<u64>,
    expected: usize,
) -> Result<(), ConsistencyError> {
    for epoch in epochs {
        let actual = unique.get(&epoch).map_or(0, BTreeSet::len);
        if actual != expected {
            return Err(ConsistencyError::CountMismatch {
                peer: format!("epoch {epoch}"),
                what: "unique proposers",
                expected,
                actual,
            });
        }
    }
    Ok(())
}

/// All peers must report the same non-empty transaction sequence.
pub fn verify_transactions(
    records: &[PeerRecord<Vec<TransactionInfo>>],
) -> Result<(), ConsistencyError> {
    let (reference, rest) = records.split_first().ok_or(ConsistencyError::Empty)?;
    if reference.record.is_empty() {
        return Err(ConsistencyError::NoTransactions {
            peer: reference.peer.clone(),
        });
    }
    for tested in rest {
        if tested.record.len() != reference.record.len() {
            return Err(ConsistencyError::CountMismatch {
                peer: tested.peer.clone(),
                what: "transactions",
                expected: reference.record.len(),
                actual: tested.record.len(),
            });
        }
        for (index, (expected, actual)) in reference.record.iter().zip(&tested.record).enumerate() {
            if expected != actual {
                return Err(ConsistencyError::TransactionMismatch {
                    peer: tested.peer.clone(),
                    index,
                    expected: pretty_hex(&expected.id),
                    actual: pretty_hex(&actual.id),
                });
            }
        }
    }
    Ok(())
}
