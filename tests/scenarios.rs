//! End-to-end scenarios (§8 S1-S6), exercising `Replica` directly with no
//! transport involved. S1, S2, and S4 reproduce the spec's literal inputs
//! exactly by driving a fresh replica through the public `step` API; S3,
//! S5, and S6 here start from a freshly-elected leader/follower rather
//! than the spec's literal pre-populated state (which needs direct field
//! access to seed cheaply) — see `replica.rs`'s inline tests for the
//! literal S3/S5/S6 cases.

use tinyraft::log::{Entry, LogStore};
use tinyraft::message::{Message, MessageBody};
use tinyraft::rng::FixedSequence;
use tinyraft::storage::NullStorage;
use tinyraft::{Replica, ReplicaConfig};

fn replica(id: &str, peers: &[&str]) -> Replica {
    Replica::new(
        id,
        peers.iter().map(|s| s.to_string()).collect(),
        0.0,
        ReplicaConfig::default(),
        Box::new(FixedSequence::always(0)),
        Box::new(NullStorage::default()),
    )
    .unwrap()
}

/// Drives a fresh replica through a real election so it reaches Leader role
/// via the public `step` API, rather than reaching into role internals.
fn leader(id: &str, peers: &[&str]) -> Replica {
    let mut r = replica(id, peers);
    let deadline = r.election_deadline();
    r.step(deadline + 0.001, vec![]).unwrap();
    assert!(r.role().is_candidate());

    let term = r.current_term();
    let votes = peers
        .iter()
        .map(|p| Message::new(*p, id, MessageBody::VoteGranted { term }))
        .collect();
    r.step(deadline + 0.002, votes).unwrap();
    assert!(r.role().is_leader());
    r
}

#[test]
fn s1_follower_acks_first_entry() {
    let mut follower = replica("F1", &["L"]);

    let out = follower
        .step(
            0.01,
            vec![Message::new(
                "L",
                "F1",
                MessageBody::AppendEntries {
                    term: 1,
                    leader_id: "L".into(),
                    prev_index: 0,
                    prev_term: 0,
                    entries: vec![Entry { term: 1, command: "SET x 1".into() }],
                    leader_commit: 0,
                },
            )],
        )
        .unwrap();

    assert_eq!(
        out.outbox,
        vec![Message::new(
            "F1",
            "L",
            MessageBody::AppendEntriesSucceeded { term: 1, match_index: 1 }
        )]
    );
    assert_eq!(follower.current_term(), 1);
    assert_eq!(follower.log().last_index(), 1);
}

#[test]
fn s2_follower_rejects_term_mismatch() {
    let mut follower = replica("F1", &["L"]);
    follower.step(0.01, vec![]).ok(); // no-op, just to mirror a "running" replica
    // Force the follower onto term 2 with an established 2-entry log.
    let setup = follower
        .step(
            0.02,
            vec![Message::new(
                "L",
                "F1",
                MessageBody::AppendEntries {
                    term: 2,
                    leader_id: "L".into(),
                    prev_index: 0,
                    prev_term: 0,
                    entries: vec![
                        Entry { term: 1, command: "SET a 1".into() },
                        Entry { term: 2, command: "SET b 2".into() },
                    ],
                    leader_commit: 0,
                },
            )],
        )
        .unwrap();
    assert_eq!(setup.outbox.len(), 1);

    let out = follower
        .step(
            0.03,
            vec![Message::new(
                "L",
                "F1",
                MessageBody::AppendEntries {
                    term: 2,
                    leader_id: "L".into(),
                    prev_index: 2,
                    prev_term: 1, // actual term at index 2 is 2, not 1
                    entries: vec![Entry { term: 1, command: "wrong".into() }],
                    leader_commit: 0,
                },
            )],
        )
        .unwrap();

    assert_eq!(
        out.outbox,
        vec![Message::new("F1", "L", MessageBody::AppendEntriesFailed { term: 2 })]
    );
    assert_eq!(follower.log().last_index(), 2);
}

#[test]
fn s3_leader_backtracking_converges() {
    let mut l = leader("L", &["F"]);
    let term = l.current_term();
    let base = l.election_deadline(); // the moment leadership was won

    for (i, cmd) in ["SET a 1", "SET b 2", "SET c 3"].into_iter().enumerate() {
        l.step(
            base + 0.003 + i as f64 * 0.001,
            vec![Message::new("client", "L", MessageBody::ClientSet { cmd: cmd.into() })],
        )
        .unwrap();
    }
    assert_eq!(l.log().last_index(), 3);

    // Follower rejects the leader's probe (it's behind on its log).
    let out = l
        .step(base + 0.007, vec![Message::new("F", "L", MessageBody::AppendEntriesFailed { term })])
        .unwrap();
    assert_eq!(out.outbox.len(), 1);
    if let MessageBody::AppendEntries { prev_index, .. } = &out.outbox[0].body {
        assert!(*prev_index < 3);
    } else {
        panic!("expected a backtracking AppendEntries probe");
    }

    // Eventually the follower reports success once the leader backs off far
    // enough; simulate it catching up to match_index=3.
    let out = l
        .step(
            base + 0.008,
            vec![Message::new("F", "L", MessageBody::AppendEntriesSucceeded { term, match_index: 3 })],
        )
        .unwrap();
    assert_eq!(l.commit_index(), 3);
    assert_eq!(out.applied.len(), 3);
}

#[test]
fn s4_election_succeeds_in_three_node_cluster() {
    let mut a = replica("A", &["B", "C"]);
    let deadline = a.election_deadline();

    let out = a.step(deadline + 0.001, vec![]).unwrap();
    assert!(a.role().is_candidate());
    assert_eq!(out.outbox.len(), 2);

    let out = a
        .step(
            deadline + 0.002,
            vec![
                Message::new("B", "A", MessageBody::VoteGranted { term: 1 }),
                Message::new("C", "A", MessageBody::VoteGranted { term: 1 }),
            ],
        )
        .unwrap();
    assert!(a.role().is_leader());
    assert_eq!(out.outbox.len(), 2); // immediate heartbeat round
}

#[test]
fn s5_vote_denied_for_stale_log() {
    let mut follower = replica("F", &["C"]);
    follower.step(0.0, vec![]).ok();
    // Install a log whose last entry is ahead of the candidate's claim.
    let setup = follower
        .step(
            0.01,
            vec![Message::new(
                "L",
                "F",
                MessageBody::AppendEntries {
                    term: 1,
                    leader_id: "L".into(),
                    prev_index: 0,
                    prev_term: 0,
                    entries: vec![
                        Entry { term: 1, command: "a".into() },
                        Entry { term: 1, command: "b".into() },
                    ],
                    leader_commit: 0,
                },
            )],
        )
        .unwrap();
    assert_eq!(setup.outbox.len(), 1);

    let out = follower
        .step(
            0.02,
            vec![Message::new(
                "C",
                "F",
                MessageBody::RequestVote { term: 1, candidate_id: "C".into(), last_index: 1, last_term: 1 },
            )],
        )
        .unwrap();

    assert_eq!(
        out.outbox,
        vec![Message::new("F", "C", MessageBody::VoteDenied { term: 1 })]
    );
}

#[test]
fn s6_commit_advances_only_on_current_term_majority() {
    let mut l = leader("L", &["p1", "p2"]);
    let term = l.current_term();
    let base = l.election_deadline();

    l.step(
        base + 0.003,
        vec![Message::new("client", "L", MessageBody::ClientSet { cmd: "SET x 1".into() })],
    )
    .unwrap();

    let out = l
        .step(
            base + 0.004,
            vec![
                Message::new("p1", "L", MessageBody::AppendEntriesSucceeded { term, match_index: 1 }),
                Message::new("p2", "L", MessageBody::AppendEntriesSucceeded { term, match_index: 1 }),
            ],
        )
        .unwrap();

    assert_eq!(l.commit_index(), 1);
    assert_eq!(out.applied, vec![(1, Entry { term, command: "SET x 1".into() })]);
}
