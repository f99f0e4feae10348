use sparsetable::{
    DefaultHashBuilder, FactorGrowthPolicy, PrimeGrowthPolicy, SparseMap, SparseSet,
    SparseTableError, TableConfig,
};

type PrimeMap<K, V> = SparseMap<K, V, DefaultHashBuilder, PrimeGrowthPolicy>;
type FactorMap<K, V> = SparseMap<K, V, DefaultHashBuilder, FactorGrowthPolicy<3, 2>>;

#[test]
fn growth_trigger_power_of_two() {
    // Room for 8 entries at max load 0.5 means 16 buckets.
    let mut map: SparseMap<u64, u64> = SparseMap::with_capacity(8);
    assert_eq!(map.bucket_count(), 16);

    for key in 0..8 {
        map.insert(key, key).unwrap();
        assert_eq!(map.bucket_count(), 16);
    }
    // The ninth insert crosses the load threshold: exactly one rehash, to
    // the policy's next step.
    map.insert(8, 8).unwrap();
    assert_eq!(map.bucket_count(), 32);
    for key in 0..9 {
        assert_eq!(map.get(&key), Some(&key));
    }
}

#[test]
fn growth_trigger_prime() {
    let mut map: PrimeMap<u64, u64> = SparseMap::with_capacity(8);
    // The prime ladder rounds 16 buckets up to 17.
    assert_eq!(map.bucket_count(), 17);

    for key in 0..8 {
        map.insert(key, key).unwrap();
        assert_eq!(map.bucket_count(), 17);
    }
    map.insert(8, 8).unwrap();
    assert!(map.bucket_count() > 16);
    assert_eq!(map.bucket_count(), 29);
    for key in 0..9 {
        assert_eq!(map.get(&key), Some(&key));
    }
}

#[test]
fn erasures_accumulate_tombstones_until_sweep() {
    let mut map: SparseMap<u64, u64> = SparseMap::with_capacity(8);
    for key in 0..8 {
        map.insert(key, key).unwrap();
    }

    // floor(0.125 * 16) = 2 tombstones are tolerated in 16 buckets.
    map.remove(&0).unwrap();
    assert_eq!(map.tombstone_count(), 1);
    map.remove(&1).unwrap();
    assert_eq!(map.tombstone_count(), 2);

    // The third erase fires the sweep: tombstones vanish, capacity stays.
    map.remove(&2).unwrap();
    assert_eq!(map.tombstone_count(), 0);
    assert_eq!(map.bucket_count(), 16);
    assert_eq!(map.len(), 5);
    for key in 3..8 {
        assert_eq!(map.get(&key), Some(&key));
    }
}

#[test]
fn reserve_avoids_intermediate_rehashes() {
    let mut set: SparseSet<u64> = SparseSet::new();
    set.reserve(1000).unwrap();
    let buckets = set.bucket_count();
    for key in 0..1000 {
        set.insert(key).unwrap();
        assert_eq!(set.bucket_count(), buckets);
    }
    assert_eq!(set.len(), 1000);
}

#[test]
fn forced_rehash_preserves_content() {
    let mut map: SparseMap<u64, String> = SparseMap::new();
    for key in 0..100 {
        map.insert(key, format!("v{}", key)).unwrap();
    }
    let before: Vec<(u64, String)> = {
        let mut pairs: Vec<_> = map.iter().map(|(k, v)| (*k, v.clone())).collect();
        pairs.sort();
        pairs
    };

    map.rehash(1024).unwrap();
    assert_eq!(map.bucket_count(), 1024);
    assert_eq!(map.tombstone_count(), 0);

    let after: Vec<(u64, String)> = {
        let mut pairs: Vec<_> = map.iter().map(|(k, v)| (*k, v.clone())).collect();
        pairs.sort();
        pairs
    };
    assert_eq!(before, after);
    for key in 0..100 {
        assert!(map.contains_key(&key));
    }
}

#[test]
fn factor_policy_end_to_end() {
    let mut map: FactorMap<u64, u64> = SparseMap::new();
    for key in 0..200 {
        map.insert(key, key + 1).unwrap();
    }
    assert_eq!(map.len(), 200);
    for key in 0..200 {
        assert_eq!(map.get(&key), Some(&(key + 1)));
    }
}

#[test]
fn prime_policy_handles_correlated_low_bits() {
    let mut map: PrimeMap<u64, u64> = SparseMap::new();
    for k in 0..128u64 {
        map.insert(k << 10, k).unwrap();
    }
    for k in 0..128u64 {
        assert_eq!(map.get(&(k << 10)), Some(&k));
    }
}

#[test]
fn max_load_factor_validation() {
    let mut map: SparseMap<u64, u64> = SparseMap::new();
    match map.set_max_load_factor(1.5) {
        Err(SparseTableError::InvalidArgument(_)) => {}
        other => panic!("unexpected result: {:?}", other),
    }
    map.set_max_load_factor(0.75).unwrap();
    assert_eq!(map.max_load_factor(), 0.75);
}

#[test]
fn config_validation_is_surfaced_at_configuration_time() {
    assert!(TableConfig::new(0.5, 0.125).is_ok());
    match TableConfig::new(-0.5, 0.125) {
        Err(SparseTableError::InvalidArgument(_)) => {}
        other => panic!("unexpected result: {:?}", other),
    }
}
