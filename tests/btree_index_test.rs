use std::sync::Arc;

use anyhow::Result;
use rand::seq::SliceRandom;

use ferrodb::common::types::HEADER_PAGE_ID;
use ferrodb::index::btree::BPlusTree;
use ferrodb::storage::buffer::BufferPoolManager;
use ferrodb::Rid;

mod common;
use common::create_test_buffer_pool;

// The directory page must exist before any index does; allocating the
// first page of a fresh file yields page 0.
fn setup_header_page(buffer_pool: &Arc<BufferPoolManager>) -> Result<()> {
    let (_, page_id) = buffer_pool.new_page()?;
    assert_eq!(page_id, HEADER_PAGE_ID);
    buffer_pool.unpin_page(page_id, true);
    Ok(())
}

#[test]
fn test_empty_tree() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(20)?;
    setup_header_page(&buffer_pool)?;

    let tree = BPlusTree::<i64>::new("empty", buffer_pool, 5, 5)?;
    assert!(tree.is_empty());
    assert_eq!(tree.get(&1)?, None);
    tree.remove(&1)?;
    assert!(tree.iter()?.next().is_none());
    Ok(())
}

#[test]
fn test_insert_ascending_and_scan() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(50)?;
    setup_header_page(&buffer_pool)?;

    let tree = BPlusTree::<i64>::new("ascending", buffer_pool, 5, 5)?;
    for key in 1..=5i64 {
        assert!(tree.insert(&key, Rid::new(0, key as u32))?);
    }
    assert!(!tree.is_empty());

    for key in 1..=5i64 {
        let rid = tree.get(&key)?.unwrap();
        assert_eq!(rid.slot, key as u32);
    }

    let mut current_key = 1i64;
    for entry in tree.iter_from(&1)? {
        let (key, rid) = entry?;
        assert_eq!(key, current_key);
        assert_eq!(rid.page_id, 0);
        assert_eq!(rid.slot, current_key as u32);
        current_key += 1;
    }
    assert_eq!(current_key, 6);
    Ok(())
}

#[test]
fn test_delete_and_rescan() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(50)?;
    setup_header_page(&buffer_pool)?;

    let tree = BPlusTree::<i64>::new("delete", buffer_pool, 5, 5)?;
    for key in 1..=5i64 {
        tree.insert(&key, Rid::new(0, key as u32))?;
    }
    tree.remove(&1)?;
    tree.remove(&5)?;

    assert_eq!(tree.get(&1)?, None);
    assert_eq!(tree.get(&5)?, None);

    let mut size = 0;
    let mut current_key = 2i64;
    for entry in tree.iter_from(&2)? {
        let (key, rid) = entry?;
        assert_eq!(key, current_key);
        assert_eq!(rid.slot, current_key as u32);
        current_key += 1;
        size += 1;
    }
    assert_eq!(size, 3);
    Ok(())
}

#[test]
fn test_duplicate_keys_rejected() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(50)?;
    setup_header_page(&buffer_pool)?;

    let tree = BPlusTree::<i64>::new("dup", buffer_pool, 5, 5)?;
    assert!(tree.insert(&7, Rid::new(0, 1))?);
    assert!(!tree.insert(&7, Rid::new(0, 2))?);
    assert_eq!(tree.get(&7)?, Some(Rid::new(0, 1)));
    Ok(())
}

#[test]
fn test_shuffled_inserts_and_deletes() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(64)?;
    setup_header_page(&buffer_pool)?;

    // small orders force deep trees, splits, merges and redistributions
    let tree = BPlusTree::<i64>::new("mixed", buffer_pool, 4, 4)?;
    let mut rng = rand::thread_rng();

    let mut keys: Vec<i64> = (0..400).collect();
    keys.shuffle(&mut rng);
    for &key in &keys {
        assert!(tree.insert(&key, Rid::new((key >> 8) as u32, key as u32))?);
    }

    for key in 0..400i64 {
        assert_eq!(tree.get(&key)?, Some(Rid::new((key >> 8) as u32, key as u32)));
    }

    // full scan comes back sorted and complete
    let mut expected = 0i64;
    for entry in tree.iter()? {
        let (key, _) = entry?;
        assert_eq!(key, expected);
        expected += 1;
    }
    assert_eq!(expected, 400);

    // delete the even keys in random order
    let mut evens: Vec<i64> = (0..400).filter(|k| k % 2 == 0).collect();
    evens.shuffle(&mut rng);
    for &key in &evens {
        tree.remove(&key)?;
    }

    for key in 0..400i64 {
        let found = tree.get(&key)?;
        if key % 2 == 0 {
            assert_eq!(found, None, "key {} should be gone", key);
        } else {
            assert!(found.is_some(), "key {} should remain", key);
        }
    }

    let remaining: Vec<i64> = tree
        .iter()?
        .map(|entry| entry.map(|(k, _)| k))
        .collect::<Result<_, _>>()?;
    let odds: Vec<i64> = (0..400).filter(|k| k % 2 == 1).collect();
    assert_eq!(remaining, odds);
    Ok(())
}

#[test]
fn test_remove_everything_then_reuse() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(64)?;
    setup_header_page(&buffer_pool)?;

    let tree = BPlusTree::<i64>::new("drain", buffer_pool, 4, 4)?;
    for key in 0..100i64 {
        tree.insert(&key, Rid::new(0, key as u32))?;
    }
    for key in 0..100i64 {
        tree.remove(&key)?;
    }
    for key in 0..100i64 {
        assert_eq!(tree.get(&key)?, None);
    }
    assert!(tree.iter()?.next().is_none());

    // the drained tree accepts inserts again
    for key in 0..20i64 {
        assert!(tree.insert(&key, Rid::new(1, key as u32))?);
    }
    assert_eq!(tree.get(&19)?, Some(Rid::new(1, 19)));
    Ok(())
}

#[test]
fn test_iter_from_between_keys() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(64)?;
    setup_header_page(&buffer_pool)?;

    let tree = BPlusTree::<i64>::new("between", buffer_pool, 4, 4)?;
    for key in (0..100i64).map(|k| k * 10) {
        tree.insert(&key, Rid::new(0, key as u32))?;
    }

    // 15 is absent: the scan starts at the next present key
    let first = tree.iter_from(&15)?.next().unwrap()?;
    assert_eq!(first.0, 20);

    // past the largest key: the scan is immediately exhausted
    assert!(tree.iter_from(&1000)?.next().is_none());
    Ok(())
}

#[test]
fn test_open_by_name_reuses_root() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(64)?;
    setup_header_page(&buffer_pool)?;

    {
        let tree = BPlusTree::<i64>::new("orders_pk", buffer_pool.clone(), 4, 4)?;
        for key in 0..50i64 {
            tree.insert(&key, Rid::new(0, key as u32))?;
        }
    }

    let tree = BPlusTree::<i64>::open("orders_pk", buffer_pool, 4, 4)?;
    assert!(!tree.is_empty());
    for key in 0..50i64 {
        assert_eq!(tree.get(&key)?, Some(Rid::new(0, key as u32)));
    }
    Ok(())
}

#[test]
fn test_concurrent_disjoint_inserts() -> Result<()> {
    const THREADS: usize = 8;
    const KEYS_PER_THREAD: i64 = 1 << 14;

    let (buffer_pool, _temp_file) = create_test_buffer_pool(2048)?;
    setup_header_page(&buffer_pool)?;

    let tree = BPlusTree::<i64>::with_default_orders("concurrent", buffer_pool)?;

    std::thread::scope(|scope| {
        for thread_id in 0..THREADS as i64 {
            let tree = &tree;
            scope.spawn(move || {
                let mut keys: Vec<i64> = (0..KEYS_PER_THREAD)
                    .map(|i| thread_id * KEYS_PER_THREAD + i)
                    .collect();
                keys.shuffle(&mut rand::thread_rng());
                for key in keys {
                    tree.insert(&key, Rid::new((key >> 16) as u32, key as u32))
                        .unwrap();
                }
            });
        }
    });

    let total = THREADS as i64 * KEYS_PER_THREAD;
    for key in (0..total).step_by(997) {
        assert_eq!(
            tree.get(&key)?,
            Some(Rid::new((key >> 16) as u32, key as u32))
        );
    }

    // a full scan sees every key in ascending order
    let mut expected = 0i64;
    for entry in tree.iter()? {
        let (key, _) = entry?;
        assert_eq!(key, expected);
        expected += 1;
    }
    assert_eq!(expected, total);

    // and any suffix scan sees exactly the tail
    for &start in &[1i64, 4097, total - 100, total / 2] {
        let mut expected = start;
        for entry in tree.iter_from(&start)? {
            let (key, _) = entry?;
            assert_eq!(key, expected);
            expected += 1;
        }
        assert_eq!(expected, total);
    }
    Ok(())
}
