// Replication between persistent stores

use kolibri_fkv::{apply_delta, build_delta, EntryType, Fkv, PersistenceConfig};
use kolibri_swarm::codec::Frame;
use std::path::Path;

fn config(dir: &Path, name: &str) -> PersistenceConfig {
    PersistenceConfig::new(
        dir.join(name).join("wal.log"),
        dir.join(name).join("snapshots"),
    )
}

#[test]
fn test_delta_between_persistent_stores_survives_restart() {
    let dir = tempfile::tempdir().unwrap();

    let source = Fkv::open(config(dir.path(), "a")).unwrap();
    source.put(&[1, 2, 3], &[4, 5], EntryType::Value).unwrap();
    source.put(&[1, 2, 9], &[6], EntryType::Program).unwrap();
    source.put(&[8, 8], &[1], EntryType::Value).unwrap();

    let Frame::FkvDelta(payload) = build_delta(&source, &[1, 2]).unwrap() else {
        panic!("expected delta frame");
    };
    assert_eq!(payload.entry_count, 2);

    {
        let replica = Fkv::open(config(dir.path(), "b")).unwrap();
        apply_delta(&replica, &payload).unwrap();
        assert_eq!(replica.get_prefix(&[1, 2], 0).unwrap().len(), 2);
        // Replicated puts are WAL-logged like any other write
    }

    let reopened = Fkv::open(config(dir.path(), "b")).unwrap();
    let entries = reopened.get_prefix(&[1, 2], 0).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].key, vec![1, 2, 3]);
    assert_eq!(entries[0].value, vec![4, 5]);
    assert_eq!(entries[1].entry_type, EntryType::Program);
    // The delta covered only the requested prefix
    assert!(reopened.get_prefix(&[8], 0).unwrap().is_empty());
}

#[test]
fn test_wire_roundtrip_reattaches_payload() {
    let dir = tempfile::tempdir().unwrap();
    let source = Fkv::open(config(dir.path(), "a")).unwrap();
    source.put(&[5, 5, 5], &[9], EntryType::Value).unwrap();

    let frame = build_delta(&source, &[5]).unwrap();
    let Frame::FkvDelta(original) = &frame else {
        panic!("expected delta frame");
    };

    // The decimal wire form carries the header fields; the compressed
    // payload travels out-of-band and is reattached on receipt
    let wire = frame.serialize().unwrap();
    let Frame::FkvDelta(mut received) = Frame::parse(&wire).unwrap() else {
        panic!("expected delta frame");
    };
    assert_eq!(received.entry_count, original.entry_count);
    assert_eq!(received.checksum, original.checksum);
    assert_eq!(received.compressed_size, original.compressed_size);
    received.raw_size = original.raw_size;
    received.data = original.data.clone();

    let replica = Fkv::new();
    apply_delta(&replica, &received).unwrap();
    assert_eq!(replica.get_prefix(&[5, 5, 5], 0).unwrap()[0].value, vec![9]);
}

#[test]
fn test_sequence_delta_synchronizes_follower() {
    let dir = tempfile::tempdir().unwrap();
    let leader = Fkv::open(config(dir.path(), "leader")).unwrap();
    let follower = Fkv::new();

    leader.put(&[1], &[1], EntryType::Value).unwrap();
    let synced_to = leader.current_sequence();
    follower
        .apply_sequence_delta(&leader.export_delta(0).unwrap())
        .unwrap();

    leader.put(&[2], &[2], EntryType::Value).unwrap();
    leader.put(&[3], &[3], EntryType::Value).unwrap();

    // Catch up from the recorded watermark only
    let delta = leader.export_delta(synced_to).unwrap();
    assert_eq!(delta.entries.len(), 2);
    follower.apply_sequence_delta(&delta).unwrap();

    assert_eq!(
        follower.get_prefix(&[], 0).unwrap().len(),
        leader.get_prefix(&[], 0).unwrap().len()
    );
}
