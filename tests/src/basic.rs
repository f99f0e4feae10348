use std::collections::HashSet;

use rand::seq::SliceRandom;

use sparsetable::{SparseMap, SparseSet};

#[test]
fn basic_map_use() {
    let mut map: SparseMap<String, i32> = SparseMap::new();
    map.insert("a".to_string(), 1).unwrap();
    map.insert("b".to_string(), 2).unwrap();
    map.insert("c".to_string(), 3).unwrap();

    *map.get_mut("c").unwrap() = 4;
    map.remove("b").unwrap();

    assert_eq!(map.len(), 2);
    assert!(map.contains_key("a"));
    assert!(map.contains_key("c"));
    assert!(!map.contains_key("b"));
    assert_eq!(map.get("c"), Some(&4));
}

#[test]
fn iteration_completeness() {
    let mut set: SparseSet<u32> = SparseSet::new();
    for key in 0..1000 {
        set.insert(key).unwrap();
    }
    let collected: HashSet<u32> = set.iter().copied().collect();
    assert_eq!(collected.len(), 1000);
    assert_eq!(collected, (0..1000).collect::<HashSet<u32>>());
}

#[test]
fn insert_erase_insert_is_idempotent() {
    let mut churned: SparseMap<u64, u64> = SparseMap::new();
    churned.insert(42, 1).unwrap();
    churned.remove(&42).unwrap();
    churned.insert(42, 1).unwrap();

    let mut fresh: SparseMap<u64, u64> = SparseMap::new();
    fresh.insert(42, 1).unwrap();

    assert_eq!(churned.len(), fresh.len());
    let churned_pairs: Vec<(u64, u64)> = churned.iter().map(|(k, v)| (*k, *v)).collect();
    let fresh_pairs: Vec<(u64, u64)> = fresh.iter().map(|(k, v)| (*k, *v)).collect();
    assert_eq!(churned_pairs, fresh_pairs);
}

#[test]
fn every_inserted_key_stays_findable() {
    let mut keys: Vec<u64> = (0..500).collect();
    keys.shuffle(&mut rand::thread_rng());

    let mut map: SparseMap<u64, u64> = SparseMap::new();
    for &key in &keys {
        map.insert(key, key * 3).unwrap();
    }
    // Erase a third, in a different order than insertion.
    let erased: Vec<u64> = keys.iter().copied().filter(|k| k % 3 == 0).collect();
    for key in &erased {
        assert_eq!(map.remove(key).unwrap(), Some(key * 3));
    }
    for key in 0..500u64 {
        if key % 3 == 0 {
            assert!(!map.contains_key(&key));
        } else {
            assert_eq!(map.get(&key), Some(&(key * 3)));
        }
    }
}

#[test]
fn clear_empties_but_keeps_buckets() {
    let mut map: SparseMap<u64, String> = SparseMap::new();
    for key in 0..100 {
        map.insert(key, format!("value-{}", key)).unwrap();
    }
    let buckets = map.bucket_count();
    map.clear();
    assert_eq!(map.len(), 0);
    assert_eq!(map.iter().count(), 0);
    assert_eq!(map.bucket_count(), buckets);

    // The cleared map is fully usable again.
    map.insert(7, "seven".to_string()).unwrap();
    assert_eq!(map.get(&7).map(String::as_str), Some("seven"));
}

#[test]
fn values_are_mutable_through_iter_mut_only() {
    let mut map: SparseMap<String, u64> = SparseMap::new();
    for key in 0..20u64 {
        map.insert(key.to_string(), 0).unwrap();
    }
    for (key, value) in map.iter_mut() {
        *value = key.parse().unwrap();
    }
    for key in 0..20u64 {
        assert_eq!(map.get(key.to_string().as_str()), Some(&key));
    }
}
