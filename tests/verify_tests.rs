//! Cross-peer consistency checks on hand-built records.


use std::collections::BTreeMap;

use systest::collect::{PeerRecord, ProposalRecord, RewardRecord, RoundRecord};
use systest::peer::{ProposalEvent, ProposalStatus, TransactionInfo};
use systest::verify::{self, ConsistencyError};

fn hashes(peer: &str, rounds: &[(u32, &str)]) -> PeerRecord<RoundRecord<Vec<u8>>> {
    PeerRecord {
        peer: peer.to_string(),
        record: rounds
            .iter()
            .map(|(round, hash)| (*round, hash.as_bytes().to_vec()))
            .collect(),
    }
}

fn proposal(smesher: &str, round: u32, epoch: u64, status: ProposalStatus) -> ProposalEvent {
    ProposalEvent {
        id: format!("{smesher}/{round}").into_bytes(),
        round,
        epoch,
        smesher: smesher.as_bytes().to_vec(),
        eligibilities: 2,
        status,
    }
}

fn proposals(peer: &str, events: Vec<ProposalEvent>) -> PeerRecord<ProposalRecord> {
    let mut record = ProposalRecord::default();
    for event in events {
        record.push(event);
    }
    PeerRecord {
        peer: peer.to_string(),
        record,
    }
}

fn rewards(peer: &str, sum: u64) -> PeerRecord<RewardRecord> {
    PeerRecord {
        peer: peer.to_string(),
        record: RewardRecord {
            account: peer.as_bytes().to_vec(),
            rounds: Vec::new(),
            sum,
        },
    }
}

fn txs(peer: &str, ids: &[u8]) -> PeerRecord<Vec<TransactionInfo>> {
    PeerRecord {
        peer: peer.to_string(),
        record: ids
            .iter()
            .map(|id| TransactionInfo {
                id: vec![*id],
                raw: vec![*id, *id],
            })
            .collect(),
    }
}

#[systest::test]
fn identical_rounds_pass() {
    let records = vec![
        hashes("a", &[(1, "x"), (2, "y"), (3, "z")]),
        hashes("b", &[(1, "x"), (2, "y"), (3, "z")]),
    ];
    verify::verify_rounds(&records, 1..=3).unwrap();
}

#[systest::test]
fn mismatch_names_peer_round_and_both_values() {
    let records = vec![
        hashes("a", &[(1, "x"), (2, "y")]),
        hashes("b", &[(1, "x"), (2, "w")]),
    ];
    let err = verify::verify_rounds(&records, 1..=2).unwrap_err();
    assert_eq!(
        err,
        ConsistencyError::RoundMismatch {
            peer: "b".to_string(),
            round: 2,
            expected: "0x79".to_string(),
            actual: "0x77".to_string(),
        }
    );
}

#[systest::test]
fn rounds_outside_the_window_are_ignored() {
    let records = vec![
        hashes("a", &[(1, "x"), (2, "y"), (3, "z")]),
        hashes("b", &[(1, "q"), (2, "y"), (3, "z")]),
    ];
    verify::verify_rounds(&records, 2..=3).unwrap();
    assert!(verify::verify_rounds(&records, 1..=3).is_err());
}

#[systest::test]
fn rounds_missing_from_a_peer_are_skipped_but_some_must_overlap() {
    let records = vec![
        hashes("a", &[(1, "x"), (2, "y")]),
        hashes("b", &[(2, "y")]),
    ];
    verify::verify_rounds(&records, 1..=2).unwrap();

    let disjoint = vec![hashes("a", &[(1, "x")]), hashes("b", &[(2, "y")])];
    let err = verify::verify_rounds(&disjoint, 1..=2).unwrap_err();
    assert!(matches!(err, ConsistencyError::NoCommonRounds { .. }), "{err}");
}

#[systest::test]
fn out_of_order_rounds_fail() {
    let mut record = RoundRecord::new();
    record.insert(2, b"y".to_vec());
    record.insert(1, b"x".to_vec());
    let records = vec![
        PeerRecord {
            peer: "a".to_string(),
            record,
        },
        hashes("b", &[(1, "x"), (2, "y")]),
    ];
    let err = verify::verify_rounds(&records, 1..=2).unwrap_err();
    assert!(matches!(err, ConsistencyError::OutOfOrder { ref peer, .. } if peer == "a"), "{err}");
}

#[systest::test]
fn no_records_is_an_error() {
    assert_eq!(
        verify::verify_rounds(&[], 1..=2).unwrap_err(),
        ConsistencyError::Empty
    );
    assert_eq!(
        verify::verify_rewards(&[], 0.1).unwrap_err(),
        ConsistencyError::Empty
    );
}

#[systest::test]
fn rewards_within_tolerance_pass() {
    let records = vec![rewards("a", 1000), rewards("b", 1090), rewards("c", 910)];
    verify::verify_rewards(&records, 0.1).unwrap();

    let records = vec![rewards("a", 1000), rewards("b", 1200)];
    let err = verify::verify_rewards(&records, 0.1).unwrap_err();
    assert!(
        matches!(err, ConsistencyError::RewardOutOfTolerance { actual: 1200, .. }),
        "{err}"
    );
}

#[systest::test]
fn eligibilities_are_aggregated_per_smesher() {
    let records = vec![
        proposals(
            "a",
            vec![
                proposal("a", 1, 0, ProposalStatus::Created),
                proposal("a", 2, 0, ProposalStatus::Created),
                proposal("b", 1, 0, ProposalStatus::Included),
            ],
        ),
        proposals(
            "b",
            vec![
                proposal("b", 1, 0, ProposalStatus::Created),
                proposal("b", 2, 0, ProposalStatus::Created),
            ],
        ),
    ];
    let aggregated = verify::aggregate_eligibilities(&records);
    assert_eq!(
        aggregated,
        BTreeMap::from([("0x61".to_string(), 4), ("0x62".to_string(), 4)])
    );
    verify::verify_equal_eligibilities(&records).unwrap();
}

#[systest::test]
fn unequal_eligibilities_fail() {
    let records = vec![
        proposals("a", vec![proposal("a", 1, 0, ProposalStatus::Created)]),
        proposals(
            "b",
            vec![
                proposal("b", 1, 0, ProposalStatus::Created),
                proposal("b", 2, 0, ProposalStatus::Created),
            ],
        ),
    ];
    let err = verify::verify_equal_eligibilities(&records).unwrap_err();
    assert_eq!(
        err,
        ConsistencyError::EligibilityMismatch {
            smesher: "0x62".to_string(),
            expected: 2,
            actual: 4,
        }
    );
}

#[systest::test]
fn included_counts_are_compared_within_the_window() {
    let records = vec![
        proposals(
            "a",
            vec![
                proposal("b", 1, 0, ProposalStatus::Included),
                proposal("b", 5, 1, ProposalStatus::Included),
            ],
        ),
        proposals("b", vec![proposal("a", 1, 0, ProposalStatus::Included)]),
    ];
    verify::verify_included_counts(&records, 1..=4).unwrap();
    let err = verify::verify_included_counts(&records, 1..=5).unwrap_err();
    assert!(
        matches!(err, ConsistencyError::CountMismatch { expected: 2, actual: 1, .. }),
        "{err}"
    );
}

#[systest::test]
fn unique_proposers_are_grouped_by_epoch() {
    let records = vec![
        proposals(
            "a",
            vec![
                proposal("a", 4, 1, ProposalStatus::Created),
                proposal("a", 8, 2, ProposalStatus::Created),
            ],
        ),
        proposals(
            "b",
            vec![
                proposal("b", 5, 1, ProposalStatus::Created),
                proposal("a", 8, 2, ProposalStatus::Included),
            ],
        ),
    ];
    let unique = verify::unique_proposers(&records);
    assert_eq!(unique[&1].len(), 2);
    assert_eq!(unique[&2].len(), 1);

    verify::verify_proposer_counts(&unique, 1..=1, 2).unwrap();
    let err = verify::verify_proposer_counts(&unique, 1..=3, 2).unwrap_err();
    assert!(
        matches!(err, ConsistencyError::CountMismatch { expected: 2, actual: 1, .. }),
        "{err}"
    );
}

#[systest::test]
fn transactions_must_match_in_order() {
    verify::verify_transactions(&[txs("a", &[1, 2, 3]), txs("b", &[1, 2, 3])]).unwrap();

    let err = verify::verify_transactions(&[txs("a", &[1, 2, 3]), txs("b", &[1, 3, 2])])
        .unwrap_err();
    assert_eq!(
        err,
        ConsistencyError::TransactionMismatch {
            peer: "b".to_string(),
            index: 1,
            expected: "0x02".to_string(),
            actual: "0x03".to_string(),
        }
    );

    let err = verify::verify_transactions(&[txs("a", &[1, 2]), txs("b", &[1])]).unwrap_err();
    assert!(matches!(err, ConsistencyError::CountMismatch { .. }), "{err}");
}

#[systest::test]
fn empty_reference_transactions_fail() {
    let err = verify::verify_transactions(&[txs("a", &[]), txs("b", &[])]).unwrap_err();
    assert_eq!(
        err,
        ConsistencyError::NoTransactions {
            peer: "a".to_string()
        }
    );
}

#[systest::test]
fn pretty_hex_is_lowercase_with_prefix() {
    assert_eq!(systest::pretty_hex(&[0xAB, 0x01]), "0xab01");
    assert_eq!(systest::pretty_hex(&[]), "0x");
    let digest = [0x5fu8; 32];
    assert_eq!(systest::pretty_hex(&digest), format!("0x{}", "5f".repeat(32)));
}
