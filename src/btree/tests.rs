use std::collections::BTreeMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

use super::*;
use crate::table::TableId;
use crate::txn::{LockManager, LockTable, TxnId, UndoLog};

fn options(leaf_order: usize, internal_order: usize) -> TreeOptions {
    TreeOptions {
        leaf_order,
        internal_order,
        delayed_merge: false,
    }
}

fn setup(options: TreeOptions, capacity: usize) -> (TempDir, BPlusTree) {
    let temp_dir = tempfile::tempdir().unwrap();
    let pool = Arc::new(BufferPool::new(capacity).unwrap());
    let file = pool.open_file(temp_dir.path().join("tree.db")).unwrap();
    let tree = BPlusTree::new(pool, file, options).unwrap();
    (temp_dir, tree)
}

fn val(key: Key) -> Value {
    Value::new(format!("value-{key}").as_bytes()).unwrap()
}

fn page_count(tree: &BPlusTree) -> u64 {
    tree.pool.page_count(tree.file()).unwrap()
}

fn assert_matches_model(tree: &BPlusTree, model: &BTreeMap<Key, Value>) {
    let all = tree.find_range(Key::MIN, Key::MAX).unwrap();
    let expected: Vec<(Key, Value)> = model.iter().map(|(&k, &v)| (k, v)).collect();
    assert_eq!(all, expected);

    let stats = tree.verify().unwrap();
    assert_eq!(stats.key_count, model.len());
}

#[test]
fn test_empty_tree() {
    let (_temp_dir, tree) = setup(TreeOptions::default(), 16);

    assert!(tree.is_empty().unwrap());
    assert_eq!(tree.height().unwrap(), 0);
    assert_eq!(tree.find(1).unwrap(), None);
    assert!(tree.find_range(Key::MIN, Key::MAX).unwrap().is_empty());
    assert!(matches!(tree.remove(1), Err(BPlusTreeError::KeyNotFound(1))));
    assert!(matches!(tree.update(1, val(1)), Err(BPlusTreeError::KeyNotFound(1))));
    assert_eq!(tree.verify().unwrap(), TreeStats::default());
    assert_eq!(tree.destroy_tree().unwrap(), 0);
}

#[test]
fn test_insert_and_find() {
    let (_temp_dir, tree) = setup(TreeOptions::default(), 16);

    tree.insert(10, val(10)).unwrap();
    tree.insert(20, val(20)).unwrap();
    tree.insert(5, val(5)).unwrap();

    assert_eq!(tree.height().unwrap(), 1);
    assert_eq!(tree.find(10).unwrap(), Some(val(10)));
    assert_eq!(tree.find(5).unwrap(), Some(val(5)));
    assert_eq!(tree.find(20).unwrap(), Some(val(20)));
    assert_eq!(tree.find(15).unwrap(), None);
}

#[test]
fn test_extreme_keys() {
    let (_temp_dir, tree) = setup(options(4, 5), 16);

    for key in [Key::MIN, -1, 0, 1, Key::MAX] {
        tree.insert(key, val(key)).unwrap();
    }

    assert_eq!(tree.find(Key::MIN).unwrap(), Some(val(Key::MIN)));
    assert_eq!(tree.find(Key::MAX).unwrap(), Some(val(Key::MAX)));
    let keys: Vec<Key> = tree
        .find_range(Key::MIN, Key::MAX)
        .unwrap()
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    assert_eq!(keys, vec![Key::MIN, -1, 0, 1, Key::MAX]);
    tree.verify().unwrap();
}

#[test]
fn test_duplicate_key_leaves_tree_unchanged() {
    let (_temp_dir, tree) = setup(options(4, 5), 16);
    for key in 0..10 {
        tree.insert(key, val(key)).unwrap();
    }
    let before = tree.verify().unwrap();

    let result = tree.insert(7, val(700));
    assert!(matches!(result, Err(BPlusTreeError::DuplicateKey(7))));
    assert_eq!(tree.find(7).unwrap(), Some(val(7)));
    assert_eq!(tree.verify().unwrap(), before);
}

#[test]
fn test_small_orders_scenario() {
    let (_temp_dir, tree) = setup(options(4, 5), 32);

    for key in 0..40 {
        tree.insert(key, val(key)).unwrap();
    }
    assert!(tree.height().unwrap() >= 3);
    let before = tree.verify().unwrap();
    assert_eq!(before.key_count, 40);
    // Ascending inserts leave every leaf at its two-record minimum
    assert_eq!(before.leaf_count, 20);

    // The leaf holding 10 underflows and merges with its neighbor
    tree.remove(10).unwrap();
    let merged = tree.verify().unwrap();
    assert_eq!(merged.leaf_count, before.leaf_count - 1);

    tree.remove(11).unwrap();

    for key in 0..40 {
        let expected = if key == 10 || key == 11 { None } else { Some(val(key)) };
        assert_eq!(tree.find(key).unwrap(), expected, "key {key}");
    }
    let after = tree.verify().unwrap();
    assert_eq!(after.key_count, 38);
    assert_eq!(after.leaf_count, merged.leaf_count);

    // Putting both keys back splits the merged leaf again
    tree.insert(10, val(10)).unwrap();
    tree.insert(11, val(11)).unwrap();
    assert_eq!(tree.verify().unwrap().leaf_count, before.leaf_count);
}

#[test]
fn test_leaf_split_shape() {
    let (_temp_dir, tree) = setup(options(4, 5), 16);

    // A full leaf of three keys splits 2/2 on the fourth
    for key in 1..=4 {
        tree.insert(key, val(key)).unwrap();
    }
    let stats = tree.verify().unwrap();
    assert_eq!(stats.height, 2);
    assert_eq!(stats.leaf_count, 2);
    assert_eq!(stats.internal_count, 1);
}

#[test]
fn test_remove_returns_value() {
    let (_temp_dir, tree) = setup(options(4, 5), 16);
    for key in 0..20 {
        tree.insert(key, val(key)).unwrap();
    }

    assert_eq!(tree.remove(13).unwrap(), val(13));
    assert!(matches!(tree.remove(13), Err(BPlusTreeError::KeyNotFound(13))));
    assert_eq!(tree.find(13).unwrap(), None);
}

#[test]
fn test_random_operations_match_btreemap() {
    let (_temp_dir, tree) = setup(options(4, 5), 16);
    let mut model = BTreeMap::new();
    let mut rng = StdRng::seed_from_u64(42);

    for step in 0..3000 {
        let key = rng.gen_range(0..400);
        if rng.gen_bool(0.6) {
            let result = tree.insert(key, val(key));
            if model.insert(key, val(key)).is_some() {
                assert!(matches!(result, Err(BPlusTreeError::DuplicateKey(_))));
            } else {
                result.unwrap();
            }
        } else {
            let result = tree.remove(key);
            match model.remove(&key) {
                Some(value) => assert_eq!(result.unwrap(), value),
                None => assert!(matches!(result, Err(BPlusTreeError::KeyNotFound(_)))),
            }
        }

        if step % 250 == 0 {
            assert_matches_model(&tree, &model);
        }
    }

    assert_matches_model(&tree, &model);
    for key in 0..400 {
        assert_eq!(tree.find(key).unwrap(), model.get(&key).copied());
    }
}

#[test]
fn test_minimum_orders() {
    let (_temp_dir, tree) = setup(options(3, 3), 16);
    let mut model = BTreeMap::new();
    let mut rng = StdRng::seed_from_u64(7);

    let mut keys: Vec<Key> = (0..300).collect();
    keys.shuffle(&mut rng);
    for &key in &keys {
        tree.insert(key, val(key)).unwrap();
        model.insert(key, val(key));
    }
    assert_matches_model(&tree, &model);

    keys.shuffle(&mut rng);
    for &key in keys.iter().take(250) {
        tree.remove(key).unwrap();
        model.remove(&key);
    }
    assert_matches_model(&tree, &model);
}

#[test]
fn test_range_completeness() {
    let (_temp_dir, tree) = setup(options(5, 4), 16);
    let mut model = BTreeMap::new();
    let mut rng = StdRng::seed_from_u64(99);

    let mut keys: Vec<Key> = (0..500).map(|k| k * 3).collect();
    keys.shuffle(&mut rng);
    for key in keys {
        tree.insert(key, val(key)).unwrap();
        model.insert(key, val(key));
    }

    for _ in 0..200 {
        let a: Key = rng.gen_range(-50..1600);
        let b: Key = rng.gen_range(-50..1600);
        let (lo, hi) = (a.min(b), a.max(b));

        let got = tree.find_range(lo, hi).unwrap();
        let expected: Vec<(Key, Value)> = model.range(lo..=hi).map(|(&k, &v)| (k, v)).collect();
        assert_eq!(got, expected, "range {lo}..={hi}");
    }

    assert!(tree.find_range(10, 5).unwrap().is_empty());
    assert!(tree.find_range(2000, 3000).unwrap().is_empty());
    assert_eq!(tree.find_range(3, 3).unwrap(), vec![(3, val(3))]);
    assert!(tree.find_range(4, 4).unwrap().is_empty());
}

#[test]
fn test_descending_inserts() {
    let (_temp_dir, tree) = setup(options(4, 5), 16);
    let mut model = BTreeMap::new();

    for key in (0..200).rev() {
        tree.insert(key, val(key)).unwrap();
        model.insert(key, val(key));
    }
    assert_matches_model(&tree, &model);
}

#[test]
fn test_delete_all_reuses_pages() {
    let (_temp_dir, tree) = setup(options(4, 5), 16);

    for key in 0..200 {
        tree.insert(key, val(key)).unwrap();
    }
    let grown = page_count(&tree);

    for key in 0..200 {
        tree.remove(key).unwrap();
    }
    assert!(tree.is_empty().unwrap());
    assert_eq!(tree.height().unwrap(), 0);
    assert_eq!(tree.verify().unwrap(), TreeStats::default());

    // Freed pages go back on the free list; the file does not grow again
    for key in 0..200 {
        tree.insert(key, val(key)).unwrap();
    }
    assert_eq!(page_count(&tree), grown);
    assert_eq!(tree.verify().unwrap().key_count, 200);
}

#[test]
fn test_delayed_merge() {
    let opts = TreeOptions {
        delayed_merge: true,
        ..options(4, 5)
    };
    let (_temp_dir, tree) = setup(opts, 16);
    let mut model = BTreeMap::new();
    let mut rng = StdRng::seed_from_u64(3);

    for key in 0..300 {
        tree.insert(key, val(key)).unwrap();
        model.insert(key, val(key));
    }
    let full = tree.verify().unwrap();

    let mut keys: Vec<Key> = (0..300).collect();
    keys.shuffle(&mut rng);
    for &key in keys.iter().take(200) {
        tree.remove(key).unwrap();
        model.remove(&key);
    }
    assert_matches_model(&tree, &model);

    // Nodes are only merged when empty, so the tree stays bushier than a strict one
    let sparse = tree.verify().unwrap();
    assert!(sparse.leaf_count <= full.leaf_count);
    assert!(sparse.leaf_count >= 1);

    for &key in keys.iter().skip(200) {
        tree.remove(key).unwrap();
    }
    assert!(tree.is_empty().unwrap());
}

#[test]
fn test_destroy_tree() {
    let (_temp_dir, tree) = setup(options(4, 5), 16);
    for key in 0..300 {
        tree.insert(key, val(key)).unwrap();
    }
    let stats = tree.verify().unwrap();
    let grown = page_count(&tree);

    let freed = tree.destroy_tree().unwrap();
    assert_eq!(freed, stats.leaf_count + stats.internal_count);
    assert!(tree.is_empty().unwrap());
    assert_eq!(tree.find(5).unwrap(), None);

    // Rebuilding the same tree needs exactly the pages that were freed
    for key in 0..300 {
        tree.insert(key, val(key)).unwrap();
    }
    assert_eq!(page_count(&tree), grown);
    assert_eq!(tree.verify().unwrap(), stats);
}

#[test]
fn test_update() {
    let (_temp_dir, tree) = setup(options(4, 5), 16);
    for key in 0..50 {
        tree.insert(key, val(key)).unwrap();
    }

    let new_value = Value::try_from("updated").unwrap();
    tree.update(25, new_value).unwrap();
    assert_eq!(tree.find(25).unwrap(), Some(new_value));
    assert_eq!(tree.find(24).unwrap(), Some(val(24)));

    assert!(matches!(
        tree.update(99, new_value),
        Err(BPlusTreeError::KeyNotFound(99))
    ));
    assert_eq!(tree.verify().unwrap().key_count, 50);
}

#[test]
fn test_invalid_orders() {
    let temp_dir = tempfile::tempdir().unwrap();
    let pool = Arc::new(BufferPool::new(4).unwrap());
    let file = pool.open_file(temp_dir.path().join("tree.db")).unwrap();

    for (leaf, internal) in [(2, 5), (MAX_LEAF_ORDER + 1, 5), (4, 2), (4, MAX_INTERNAL_ORDER + 1)] {
        let result = BPlusTree::new(Arc::clone(&pool), file, options(leaf, internal));
        assert!(matches!(result, Err(BPlusTreeError::InvalidOrder { .. })));
    }
    assert!(BPlusTree::new(pool, file, options(MAX_LEAF_ORDER, MAX_INTERNAL_ORDER)).is_ok());
}

#[test]
fn test_default_orders() {
    let (_temp_dir, tree) = setup(TreeOptions::default(), 64);
    let mut model = BTreeMap::new();

    for key in 0..5000 {
        tree.insert(key, val(key)).unwrap();
        model.insert(key, val(key));
    }
    let stats = tree.verify().unwrap();
    assert!(stats.height >= 2);
    assert_eq!(stats.key_count, 5000);

    for key in (0..5000).step_by(3) {
        tree.remove(key).unwrap();
        model.remove(&key);
    }
    assert_matches_model(&tree, &model);
}

#[test]
fn test_tiny_pool() {
    // Every engine access pins one page at a time, so a single frame is enough
    let (_temp_dir, tree) = setup(options(4, 5), 1);
    let mut model = BTreeMap::new();
    let mut rng = StdRng::seed_from_u64(11);

    for _ in 0..600 {
        let key = rng.gen_range(0..150);
        if rng.gen_bool(0.55) {
            if tree.insert(key, val(key)).is_ok() {
                model.insert(key, val(key));
            }
        } else if tree.remove(key).is_ok() {
            model.remove(&key);
        }
    }
    assert_matches_model(&tree, &model);
}

#[test]
fn test_persistence_after_reopen() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("tree.db");

    {
        let pool = Arc::new(BufferPool::new(8).unwrap());
        let file = pool.open_file(&path).unwrap();
        let tree = BPlusTree::new(pool, file, options(4, 5)).unwrap();
        for key in 0..100 {
            tree.insert(key, val(key)).unwrap();
        }
        tree.remove(50).unwrap();
        // pool is dropped here, should flush
    }

    let pool = Arc::new(BufferPool::new(8).unwrap());
    let file = pool.open_file(&path).unwrap();
    let tree = BPlusTree::new(pool, file, options(4, 5)).unwrap();

    assert_eq!(tree.find(49).unwrap(), Some(val(49)));
    assert_eq!(tree.find(50).unwrap(), None);
    assert_eq!(tree.verify().unwrap().key_count, 99);
}

#[test]
fn test_transactional_update_and_locks() {
    let (_temp_dir, tree) = setup(options(4, 5), 16);
    for key in 0..30 {
        tree.insert(key, val(key)).unwrap();
    }

    let locks = LockTable::new();
    let log = UndoLog::new();
    let t1 = TxnScope::new(TxnId(1), TableId(0), &locks, &log);
    let t2 = TxnScope::new(TxnId(2), TableId(0), &locks, &log);

    let new_value = Value::try_from("t1 wrote this").unwrap();
    let lsn = tree.update_in(&t1, 12, new_value).unwrap();

    assert_eq!(tree.find(12).unwrap(), Some(new_value));
    let records = log.records_for(TxnId(1));
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].lsn, lsn);
    assert_eq!(records[0].before.as_slice(), val(12).as_bytes());
    assert_eq!(records[0].after.as_slice(), new_value.as_bytes());

    // t1 holds the record exclusively
    assert_eq!(tree.find_in(&t1, 12).unwrap(), Some(new_value));
    assert!(matches!(
        tree.find_in(&t2, 12),
        Err(BPlusTreeError::LockConflict(_))
    ));
    assert!(matches!(
        tree.update_in(&t2, 12, val(0)),
        Err(BPlusTreeError::LockConflict(_))
    ));

    // Other records are free
    assert_eq!(tree.find_in(&t2, 13).unwrap(), Some(val(13)));
    assert_eq!(tree.find_in(&t2, 1000).unwrap(), None);
    assert!(matches!(
        tree.update_in(&t2, 1000, val(0)),
        Err(BPlusTreeError::KeyNotFound(1000))
    ));

    locks.release_all(TxnId(1));
    assert_eq!(tree.find_in(&t2, 12).unwrap(), Some(new_value));
    tree.verify().unwrap();
}

#[test]
fn test_restore_image() {
    let (_temp_dir, tree) = setup(options(4, 5), 16);
    for key in 0..10 {
        tree.insert(key, val(key)).unwrap();
    }

    let locks = LockTable::new();
    let log = UndoLog::new();
    let scope = TxnScope::new(TxnId(1), TableId(0), &locks, &log);
    tree.update_in(&scope, 4, val(400)).unwrap();

    let records = log.records_for(TxnId(1));
    let record = &records[0];
    tree.restore_image(record.resource.page, record.offset, &record.before)
        .unwrap();
    assert_eq!(tree.find(4).unwrap(), Some(val(4)));

    assert!(matches!(
        tree.restore_image(record.resource.page, PAGE_SIZE - 1, &record.before),
        Err(BPlusTreeError::InvalidState(_))
    ));
    tree.verify().unwrap();
}

#[test]
fn test_concurrent_writers_and_readers() {
    let (_temp_dir, tree) = setup(options(4, 5), 8);
    let tree = Arc::new(tree);

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let tree = Arc::clone(&tree);
            std::thread::spawn(move || {
                for k in 0..500 {
                    tree.insert(k * 4 + t, val(k * 4 + t)).unwrap();
                }
                // Drop every other key this thread wrote
                for k in (0..500).step_by(2) {
                    assert_eq!(tree.remove(k * 4 + t).unwrap(), val(k * 4 + t));
                }
            })
        })
        .collect();
    let readers: Vec<_> = (0..2)
        .map(|_| {
            let tree = Arc::clone(&tree);
            std::thread::spawn(move || {
                for _ in 0..50 {
                    let all = tree.find_range(Key::MIN, Key::MAX).unwrap();
                    assert!(all.windows(2).all(|w| w[0].0 < w[1].0));
                }
            })
        })
        .collect();
    for handle in writers.into_iter().chain(readers) {
        handle.join().unwrap();
    }

    let stats = tree.verify().unwrap();
    assert_eq!(stats.key_count, 1000);
    for key in 0..2000 {
        let expected = ((key / 4) % 2 == 1).then(|| val(key));
        assert_eq!(tree.find(key).unwrap(), expected, "key {key}");
    }
}
