// tests/store.rs
// Calendar store durability and state-transition invariants.

use sha2::{Digest as ShaDigest, Sha256};
use stampd::merkle::{Digest, InclusionStep, Side};
use stampd::store::{CalendarStore, CommitmentState, StoreError};

fn digest(data: &[u8]) -> Digest {
    Sha256::digest(data).into()
}

fn sample_path(seed: u8) -> Vec<InclusionStep> {
    vec![InclusionStep {
        sibling: digest(&[seed]),
        side: Side::Right,
    }]
}

#[test]
fn record_roundtrip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = CalendarStore::open(dir.path()).expect("open");

    let d = digest(b"content");
    let root = digest(b"root");
    assert!(store.get_record(&d).expect("get").is_none());

    store
        .put_record(&d, sample_path(1), &root)
        .expect("put record");
    let rec = store.get_record(&d).expect("get").expect("present");
    assert_eq!(rec.digest, d);
    assert_eq!(rec.root, root);
    assert_eq!(rec.path, sample_path(1));
}

#[test]
fn identical_record_reput_is_noop() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = CalendarStore::open(dir.path()).expect("open");

    let d = digest(b"content");
    let root = digest(b"root");
    store.put_record(&d, sample_path(1), &root).expect("put");
    store
        .put_record(&d, sample_path(1), &root)
        .expect("identical re-put succeeds");
}

#[test]
fn divergent_record_is_a_conflict() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = CalendarStore::open(dir.path()).expect("open");

    let d = digest(b"content");
    store
        .put_record(&d, sample_path(1), &digest(b"root-a"))
        .expect("put");

    let err = store
        .put_record(&d, sample_path(1), &digest(b"root-b"))
        .expect_err("divergent root must fail");
    assert!(matches!(err, StoreError::Conflict));

    let err = store
        .put_record(&d, sample_path(2), &digest(b"root-a"))
        .expect_err("divergent path must fail");
    assert!(matches!(err, StoreError::Conflict));

    // the offending writes were rejected, not applied
    let rec = store.get_record(&d).expect("get").expect("present");
    assert_eq!(rec.root, digest(b"root-a"));
    assert_eq!(rec.path, sample_path(1));
}

#[test]
fn commitment_transitions_are_monotonic() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = CalendarStore::open(dir.path()).expect("open");

    let root = digest(b"root");
    let c = store.put_commitment(&root).expect("create");
    assert_eq!(c.state, CommitmentState::Pending);

    // skipping Broadcast is illegal
    let err = store
        .advance_commitment(
            &root,
            CommitmentState::Confirmed {
                txid: "tx1".into(),
                depth: 6,
            },
        )
        .expect_err("pending -> confirmed must fail");
    assert!(matches!(err, StoreError::InvalidTransition { .. }));

    let c = store
        .advance_commitment(&root, CommitmentState::Broadcast { txid: "tx1".into() })
        .expect("pending -> broadcast");
    assert_eq!(c.attempts.len(), 1);
    assert_eq!(c.attempts[0].txid, "tx1");

    // moving backward is illegal
    let err = store
        .advance_commitment(&root, CommitmentState::Pending)
        .expect_err("broadcast -> pending via advance must fail");
    assert!(matches!(err, StoreError::InvalidTransition { .. }));

    let c = store
        .advance_commitment(
            &root,
            CommitmentState::Confirmed {
                txid: "tx1".into(),
                depth: 7,
            },
        )
        .expect("broadcast -> confirmed");
    assert!(matches!(c.state, CommitmentState::Confirmed { .. }));

    // confirmed is terminal
    let err = store
        .advance_commitment(&root, CommitmentState::Broadcast { txid: "tx2".into() })
        .expect_err("confirmed is terminal");
    assert!(matches!(err, StoreError::InvalidTransition { .. }));
    let err = store.mark_reorged(&root).expect_err("confirmed is terminal");
    assert!(matches!(err, StoreError::InvalidTransition { .. }));
}

#[test]
fn reorg_edge_requires_broadcast_state() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = CalendarStore::open(dir.path()).expect("open");

    let root = digest(b"root");
    store.put_commitment(&root).expect("create");

    let err = store
        .mark_reorged(&root)
        .expect_err("pending commitment cannot be reorged");
    assert!(matches!(err, StoreError::InvalidTransition { .. }));

    store
        .advance_commitment(&root, CommitmentState::Broadcast { txid: "tx1".into() })
        .expect("broadcast");
    let c = store.mark_reorged(&root).expect("broadcast -> pending");
    assert_eq!(c.state, CommitmentState::Pending);
    // the abandoned attempt stays in the history
    assert_eq!(c.attempts.len(), 1);
}

#[test]
fn put_commitment_is_idempotent_per_root() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = CalendarStore::open(dir.path()).expect("open");

    let root = digest(b"root");
    let first = store.put_commitment(&root).expect("create");
    let again = store.put_commitment(&root).expect("re-put");
    assert_eq!(first.seq, again.seq);
    assert_eq!(store.list_unconfirmed().expect("list").len(), 1);
}

#[test]
fn unconfirmed_queue_is_fifo_and_drains_on_confirm() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = CalendarStore::open(dir.path()).expect("open");

    let roots: Vec<Digest> = (0u8..3).map(|i| digest(&[b'r', i])).collect();
    for root in &roots {
        store.put_commitment(root).expect("create");
    }

    let listed: Vec<Digest> = store
        .list_unconfirmed()
        .expect("list")
        .into_iter()
        .map(|c| c.root)
        .collect();
    assert_eq!(listed, roots, "queue order must match creation order");

    store
        .advance_commitment(&roots[0], CommitmentState::Broadcast { txid: "tx".into() })
        .expect("broadcast");
    store
        .advance_commitment(
            &roots[0],
            CommitmentState::Confirmed {
                txid: "tx".into(),
                depth: 6,
            },
        )
        .expect("confirm");

    let listed: Vec<Digest> = store
        .list_unconfirmed()
        .expect("list")
        .into_iter()
        .map(|c| c.root)
        .collect();
    assert_eq!(listed, roots[1..].to_vec());
}

#[test]
fn unconfirmed_commitments_survive_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = digest(b"crashy-root");
    let d = digest(b"crashy-digest");

    {
        let store = CalendarStore::open(dir.path()).expect("open");
        store.put_commitment(&root).expect("create");
        store.put_record(&d, sample_path(3), &root).expect("record");
        // simulated crash: store dropped before any broadcast happens
    }

    let store = CalendarStore::open(dir.path()).expect("reopen");
    let unconfirmed = store.list_unconfirmed().expect("list");
    assert_eq!(unconfirmed.len(), 1, "root recovered exactly once");
    assert_eq!(unconfirmed[0].root, root);
    assert_eq!(unconfirmed[0].state, CommitmentState::Pending);

    let rec = store.get_record(&d).expect("get").expect("record survived");
    assert_eq!(rec.root, root);
}

#[test]
fn broadcast_state_survives_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = digest(b"inflight-root");

    {
        let store = CalendarStore::open(dir.path()).expect("open");
        store.put_commitment(&root).expect("create");
        store
            .advance_commitment(&root, CommitmentState::Broadcast { txid: "tx9".into() })
            .expect("broadcast");
    }

    let store = CalendarStore::open(dir.path()).expect("reopen");
    let unconfirmed = store.list_unconfirmed().expect("list");
    assert_eq!(unconfirmed.len(), 1);
    assert_eq!(
        unconfirmed[0].state,
        CommitmentState::Broadcast { txid: "tx9".into() }
    );
}
