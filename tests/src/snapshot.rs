use sparsetable::{
    DefaultHashBuilder, PrimeGrowthPolicy, SparseMap, SparseSet, SparseTableError,
};

type PrimeMap<K, V> = SparseMap<K, V, DefaultHashBuilder, PrimeGrowthPolicy>;

#[test]
fn map_snapshot_round_trip() {
    let mut map: SparseMap<String, u64> = SparseMap::new();
    for key in 0..50u64 {
        map.insert(format!("key-{}", key), key).unwrap();
    }
    // Leave a batch of tombstones behind (below the sweep threshold) so the
    // snapshot is taken with broken-up probe chains: keys displaced past a
    // tombstoned bucket must survive the round trip.
    for key in 0..10u64 {
        map.remove(format!("key-{}", key).as_str()).unwrap();
    }
    assert!(map.tombstone_count() > 0);

    let mut buf = Vec::new();
    map.snapshot(&mut buf);

    let restored: SparseMap<String, u64> = SparseMap::restore(&mut buf.as_slice()).unwrap();
    assert_eq!(restored.len(), map.len());
    assert_eq!(restored.bucket_count(), map.bucket_count());
    assert_eq!(restored.tombstone_count(), 0);
    for key in 0..50u64 {
        let name = format!("key-{}", key);
        assert_eq!(restored.get(name.as_str()), map.get(name.as_str()));
    }
}

#[test]
fn set_snapshot_round_trip() {
    let mut set: SparseSet<u64> = SparseSet::new();
    for key in 0..200 {
        set.insert(key * 7).unwrap();
    }
    let mut buf = Vec::new();
    set.snapshot(&mut buf);

    let restored: SparseSet<u64> = SparseSet::restore(&mut buf.as_slice()).unwrap();
    assert_eq!(restored.len(), 200);
    assert_eq!(restored.bucket_count(), set.bucket_count());
    for key in 0..200 {
        assert!(restored.contains(&(key * 7)));
    }
}

#[test]
fn restore_with_wrong_policy_is_rejected() {
    let mut map: SparseMap<u64, u64> = SparseMap::new();
    map.insert(1, 2).unwrap();

    let mut buf = Vec::new();
    map.snapshot(&mut buf);

    match PrimeMap::<u64, u64>::restore(&mut buf.as_slice()) {
        Err(SparseTableError::DeserializationMismatch(_)) => {}
        other => panic!("unexpected result: {:?}", other.map(|m| m.len())),
    }
}

#[test]
fn truncated_snapshot_is_rejected() {
    let mut map: SparseMap<u64, u64> = SparseMap::new();
    for key in 0..20 {
        map.insert(key, key).unwrap();
    }
    let mut buf = Vec::new();
    map.snapshot(&mut buf);
    buf.truncate(buf.len() - 4);

    match SparseMap::<u64, u64>::restore(&mut buf.as_slice()) {
        Err(SparseTableError::DeserializationMismatch(_)) => {}
        other => panic!("unexpected result: {:?}", other.map(|m| m.len())),
    }
}

#[test]
fn snapshot_preserves_prime_policy_state() {
    let mut map: PrimeMap<u64, u64> = SparseMap::new();
    for key in 0..100 {
        map.insert(key, key).unwrap();
    }
    let mut buf = Vec::new();
    map.snapshot(&mut buf);

    let mut restored: PrimeMap<u64, u64> = SparseMap::restore(&mut buf.as_slice()).unwrap();
    assert_eq!(restored.bucket_count(), map.bucket_count());
    // Growth continues from the restored ladder position.
    for key in 100..200 {
        restored.insert(key, key).unwrap();
    }
    assert_eq!(restored.len(), 200);
    assert!(restored.bucket_count() > map.bucket_count());
}
