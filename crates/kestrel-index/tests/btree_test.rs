//! End-to-end B+Tree tests: bulk loads, deletions down to an empty tree,
//! range scans, and structural integrity after every mutation batch.

use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use tempfile::TempDir;

use kestrel_buffer::{BufferPoolConfig, BufferPoolManager, DiskManager, DiskManagerConfig};
use kestrel_common::config::IndexConfig;
use kestrel_common::key::DefaultKeyComparator;
use kestrel_common::page::PageId;
use kestrel_common::rid::Rid;
use kestrel_index::BPlusTree;

fn setup_pool(num_frames: usize) -> (TempDir, Arc<BufferPoolManager>) {
    let dir = TempDir::new().unwrap();
    let disk = DiskManager::new(DiskManagerConfig {
        data_dir: dir.path().to_path_buf(),
        fsync_enabled: false,
    })
    .unwrap();
    let pool = Arc::new(BufferPoolManager::new(
        BufferPoolConfig {
            num_frames,
            lru_k: 2,
        },
        disk,
    ));
    (dir, pool)
}

fn setup_tree(
    pool: &Arc<BufferPoolManager>,
    leaf_max: usize,
    internal_max: usize,
) -> BPlusTree<i64> {
    BPlusTree::new(
        "btree_test",
        Arc::clone(pool),
        DefaultKeyComparator,
        IndexConfig::with_max_sizes(leaf_max, internal_max),
    )
    .unwrap()
}

fn rid(k: i64) -> Rid {
    Rid::new(PageId(k as i32), k as u32)
}

#[test]
fn test_sequential_bulk_load_small_fanout() {
    let (_dir, pool) = setup_pool(512);
    let tree = setup_tree(&pool, 4, 4);

    for k in 1..=255i64 {
        assert!(tree.insert(&k, rid(k)).unwrap(), "insert {k}");
    }
    tree.check_integrity().unwrap();

    // 255 keys across 4-slot nodes cannot fit in two levels.
    assert!(tree.height().unwrap() >= 3);

    let keys: Vec<i64> = tree.iter().unwrap().map(|(k, _)| k).collect();
    assert_eq!(keys, (1..=255).collect::<Vec<_>>());
    for k in 1..=255i64 {
        assert_eq!(tree.get_value(&k).unwrap(), Some(rid(k)), "lookup {k}");
    }
}

#[test]
fn test_insert_then_delete_everything() {
    let (_dir, pool) = setup_pool(256);
    let tree = setup_tree(&pool, 4, 4);

    for k in 1..=10i64 {
        tree.insert(&k, rid(k)).unwrap();
    }
    for k in 1..=10i64 {
        tree.remove(&k).unwrap();
        tree.check_integrity().unwrap();
    }

    assert!(tree.is_empty());
    assert_eq!(tree.root_page_id(), PageId::INVALID);
    assert_eq!(tree.get_value(&5).unwrap(), None);
}

#[test]
fn test_point_delete_keeps_neighbors() {
    let (_dir, pool) = setup_pool(256);
    let tree = setup_tree(&pool, 4, 4);

    for k in 1..=10i64 {
        tree.insert(&k, rid(k)).unwrap();
    }
    tree.remove(&5).unwrap();
    tree.check_integrity().unwrap();

    assert_eq!(tree.get_value(&5).unwrap(), None);
    assert_eq!(tree.get_value(&4).unwrap(), Some(rid(4)));
    assert_eq!(tree.get_value(&6).unwrap(), Some(rid(6)));

    let keys: Vec<i64> = tree.iter().unwrap().map(|(k, _)| k).collect();
    assert_eq!(keys, vec![1, 2, 3, 4, 6, 7, 8, 9, 10]);
}

#[test]
fn test_random_permutation_roundtrip() {
    let (_dir, pool) = setup_pool(1024);
    let tree = setup_tree(&pool, 4, 4);
    let mut rng = rand::rngs::StdRng::seed_from_u64(0x5eed);

    let mut keys: Vec<i64> = (1..=500).collect();
    keys.shuffle(&mut rng);
    for &k in &keys {
        assert!(tree.insert(&k, rid(k)).unwrap());
    }
    tree.check_integrity().unwrap();

    let scanned: Vec<i64> = tree.iter().unwrap().map(|(k, _)| k).collect();
    assert_eq!(scanned, (1..=500).collect::<Vec<_>>());

    keys.shuffle(&mut rng);
    for (i, &k) in keys.iter().enumerate() {
        tree.remove(&k).unwrap();
        if i % 50 == 0 {
            tree.check_integrity().unwrap();
        }
    }

    assert!(tree.is_empty());
    assert_eq!(tree.root_page_id(), PageId::INVALID);
    assert_eq!(tree.iter().unwrap().count(), 0);
}

#[test]
fn test_interleaved_inserts_and_deletes() {
    let (_dir, pool) = setup_pool(512);
    let tree = setup_tree(&pool, 5, 4);

    // Insert evens, then odds, then delete every multiple of three.
    for k in (2..=200i64).step_by(2) {
        tree.insert(&k, rid(k)).unwrap();
    }
    for k in (1..=199i64).step_by(2) {
        tree.insert(&k, rid(k)).unwrap();
    }
    tree.check_integrity().unwrap();

    for k in 1..=200i64 {
        if k % 3 == 0 {
            tree.remove(&k).unwrap();
        }
    }
    tree.check_integrity().unwrap();

    for k in 1..=200i64 {
        let expected = if k % 3 == 0 { None } else { Some(rid(k)) };
        assert_eq!(tree.get_value(&k).unwrap(), expected, "key {k}");
    }

    let expected: Vec<i64> = (1..=200).filter(|k| k % 3 != 0).collect();
    let scanned: Vec<i64> = tree.iter().unwrap().map(|(k, _)| k).collect();
    assert_eq!(scanned, expected);
}

#[test]
fn test_range_scan_from_key() {
    let (_dir, pool) = setup_pool(256);
    let tree = setup_tree(&pool, 4, 4);

    for k in (10..=100i64).step_by(10) {
        tree.insert(&k, rid(k)).unwrap();
    }

    let tail: Vec<i64> = tree.iter_from(&50).unwrap().map(|(k, _)| k).collect();
    assert_eq!(tail, vec![50, 60, 70, 80, 90, 100]);

    // Between stored keys the scan starts at the next greater key.
    let tail: Vec<i64> = tree.iter_from(&55).unwrap().map(|(k, _)| k).collect();
    assert_eq!(tail, vec![60, 70, 80, 90, 100]);

    let values: Vec<Rid> = tree.iter_from(&95).unwrap().map(|(_, r)| r).collect();
    assert_eq!(values, vec![rid(100)]);
}

#[test]
fn test_default_fanout_larger_load() {
    let (_dir, pool) = setup_pool(1024);
    let tree: BPlusTree<i64> = BPlusTree::new(
        "btree_default_fanout",
        Arc::clone(&pool),
        DefaultKeyComparator,
        IndexConfig::default(),
    )
    .unwrap();

    for k in 1..=5_000i64 {
        assert!(tree.insert(&k, rid(k)).unwrap());
    }
    tree.check_integrity().unwrap();

    assert_eq!(tree.iter().unwrap().count(), 5_000);
    assert_eq!(tree.get_value(&1).unwrap(), Some(rid(1)));
    assert_eq!(tree.get_value(&5_000).unwrap(), Some(rid(5_000)));
    assert_eq!(tree.get_value(&5_001).unwrap(), None);
}

#[test]
fn test_reopen_after_flush() {
    let dir = TempDir::new().unwrap();
    let disk_config = DiskManagerConfig {
        data_dir: dir.path().to_path_buf(),
        fsync_enabled: false,
    };

    {
        let disk = DiskManager::new(disk_config.clone()).unwrap();
        let pool = Arc::new(BufferPoolManager::new(
            BufferPoolConfig {
                num_frames: 256,
                lru_k: 2,
            },
            disk,
        ));
        let tree = setup_tree(&pool, 4, 4);
        for k in 1..=64i64 {
            tree.insert(&k, rid(k)).unwrap();
        }
        pool.flush_all().unwrap();
    }

    // A fresh pool over the same file finds the root through the header
    // page and serves every key from disk.
    let disk = DiskManager::new(disk_config).unwrap();
    let pool = Arc::new(BufferPoolManager::new(
        BufferPoolConfig {
            num_frames: 256,
            lru_k: 2,
        },
        disk,
    ));
    let tree = setup_tree(&pool, 4, 4);
    assert!(!tree.is_empty());
    tree.check_integrity().unwrap();
    for k in 1..=64i64 {
        assert_eq!(tree.get_value(&k).unwrap(), Some(rid(k)), "key {k}");
    }
    let keys: Vec<i64> = tree.iter().unwrap().map(|(k, _)| k).collect();
    assert_eq!(keys, (1..=64).collect::<Vec<_>>());
}
