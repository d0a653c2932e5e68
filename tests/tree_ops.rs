//! Tree operations over an in-memory container: bulk inserts through
//! multi-level splits, ordered scans, overflow values, and deletions down
//! to an empty tree.

use ixtl::{Container, Key};

fn value_for(i: i32) -> Vec<u8> {
    // Roughly 100 bytes so a leaf holds a few dozen cells.
    format!("{i:0>8}").into_bytes().repeat(12)
}

/// Deterministic shuffle, no RNG dependency needed.
fn shuffled(count: i32) -> Vec<i32> {
    let mut keys: Vec<i32> = (0..count).collect();
    let mut state = 0x2545F491u64;
    for i in (1..keys.len()).rev() {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let j = (state >> 33) as usize % (i + 1);
        keys.swap(i, j);
    }
    keys
}

#[test]
fn bulk_insert_builds_a_scannable_multi_level_tree() {
    let container = Container::in_memory().unwrap();
    let tree = container.tree(0).unwrap();

    for i in shuffled(5000) {
        tree.insert(&Key::from_i32(i), &value_for(i)).unwrap();
    }

    let rows = tree.select(&Key::min(), &Key::max()).unwrap();
    assert_eq!(rows.len(), 5000);
    for (i, (key, value)) in rows.iter().enumerate() {
        assert_eq!(key, &Key::from_i32(i as i32), "row {i} out of order");
        assert_eq!(value, &value_for(i as i32));
    }

    for i in [0, 1, 2499, 4998, 4999] {
        assert_eq!(tree.get(&Key::from_i32(i)).unwrap(), Some(value_for(i)));
    }
    assert_eq!(tree.get(&Key::from_i32(5000)).unwrap(), None);
    assert_eq!(tree.get(&Key::from_i32(-1)).unwrap(), None);
}

#[test]
fn select_bounds_are_inclusive() {
    let container = Container::in_memory().unwrap();
    let tree = container.tree(0).unwrap();
    for i in 0..100 {
        tree.insert(&Key::from_i32(i), b"v").unwrap();
    }

    let rows = tree
        .select(&Key::from_i32(10), &Key::from_i32(20))
        .unwrap();
    assert_eq!(rows.len(), 11);
    assert_eq!(rows[0].0, Key::from_i32(10));
    assert_eq!(rows[10].0, Key::from_i32(20));

    // Bounds that fall between stored keys.
    let rows = tree
        .select(&Key::from_i32(-50), &Key::from_i32(5))
        .unwrap();
    assert_eq!(rows.len(), 6);

    let rows = tree
        .select(&Key::from_i32(200), &Key::max())
        .unwrap();
    assert!(rows.is_empty());
}

#[test]
fn insertion_order_does_not_change_the_stored_content() {
    let ascending = Container::in_memory().unwrap();
    let descending = Container::in_memory().unwrap();

    for i in 0..2000 {
        ascending
            .tree(0)
            .unwrap()
            .insert(&Key::from_i32(i), &value_for(i))
            .unwrap();
        descending
            .tree(0)
            .unwrap()
            .insert(&Key::from_i32(1999 - i), &value_for(1999 - i))
            .unwrap();
    }

    let a = ascending.tree(0).unwrap().select(&Key::min(), &Key::max()).unwrap();
    let d = descending.tree(0).unwrap().select(&Key::min(), &Key::max()).unwrap();
    assert_eq!(a, d);
}

#[test]
fn delete_every_other_key_then_the_rest() {
    let container = Container::in_memory().unwrap();
    let tree = container.tree(0).unwrap();
    for i in 0..3000 {
        tree.insert(&Key::from_i32(i), &value_for(i)).unwrap();
    }

    for i in (0..3000).step_by(2) {
        assert!(tree.delete(&Key::from_i32(i)).unwrap(), "key {i} missing");
    }
    let rows = tree.select(&Key::min(), &Key::max()).unwrap();
    assert_eq!(rows.len(), 1500);
    for (i, (key, _)) in rows.iter().enumerate() {
        assert_eq!(key, &Key::from_i32(i as i32 * 2 + 1));
    }

    for i in (1..3000).step_by(2) {
        assert!(tree.delete(&Key::from_i32(i)).unwrap());
    }
    assert!(tree.select(&Key::min(), &Key::max()).unwrap().is_empty());

    // The emptied tree accepts new data.
    tree.insert(&Key::from_i32(7), b"again").unwrap();
    assert_eq!(tree.get(&Key::from_i32(7)).unwrap(), Some(b"again".to_vec()));
}

#[test]
fn overflow_values_roundtrip_byte_exact() {
    let container = Container::in_memory().unwrap();
    let tree = container.tree(0).unwrap();
    let key = Key::from_ascii("big").unwrap();

    // 117 inline bytes for a 3-byte key, then one overflow page.
    let value: Vec<u8> = (0..3022u32).map(|i| (i * 7 % 256) as u8).collect();
    tree.insert(&key, &value).unwrap();
    assert_eq!(tree.get(&key).unwrap(), Some(value));

    // Multi-page chain.
    let value: Vec<u8> = (0..20_000u32).map(|i| (i * 13 % 256) as u8).collect();
    tree.insert(&key, &value).unwrap();
    assert_eq!(tree.get(&key).unwrap(), Some(value));

    // Shrinking back to inline releases the chain.
    tree.insert(&key, b"tiny").unwrap();
    assert_eq!(tree.get(&key).unwrap(), Some(b"tiny".to_vec()));
}

#[test]
fn deleting_overflow_values_releases_their_pages() {
    let container = Container::in_memory().unwrap();
    let tree = container.tree(0).unwrap();
    let value = vec![0xABu8; 50_000];

    tree.insert(&Key::from_i32(1), &value).unwrap();
    let pages_with_chain = container.page_count();
    let free_with_chain = container.free_page_count().unwrap();

    tree.delete(&Key::from_i32(1)).unwrap();
    tree.insert(&Key::from_i32(2), &value).unwrap();

    // The second chain fits entirely in recycled pages.
    assert_eq!(container.page_count(), pages_with_chain);
    assert_eq!(container.free_page_count().unwrap(), free_with_chain);
}

#[test]
fn update_rewrites_values_in_place() {
    let container = Container::in_memory().unwrap();
    let tree = container.tree(0).unwrap();
    for i in 0..500 {
        tree.insert(&Key::from_i32(i), &value_for(i)).unwrap();
    }

    assert!(tree.update(&Key::from_i32(250), b"patched").unwrap());
    assert!(!tree.update(&Key::from_i32(9999), b"missing").unwrap());

    assert_eq!(
        tree.get(&Key::from_i32(250)).unwrap(),
        Some(b"patched".to_vec())
    );
    assert_eq!(tree.select(&Key::min(), &Key::max()).unwrap().len(), 500);
}

#[test]
fn sentinel_and_oversized_keys_are_rejected() {
    let container = Container::in_memory().unwrap();
    let tree = container.tree(0).unwrap();

    let err = tree.insert(&Key::max(), b"v").unwrap_err();
    assert!(err.to_string().contains("key out of range"));

    let err = tree
        .insert(&Key::from_bytes(&[1u8; 121]), b"v")
        .unwrap_err();
    assert!(err.to_string().contains("key too long"));

    // A failed insert leaves the tree usable.
    tree.insert(&Key::from_i32(1), b"ok").unwrap();
    assert_eq!(tree.get(&Key::from_i32(1)).unwrap(), Some(b"ok".to_vec()));
}

#[test]
fn empty_key_is_a_valid_minimum() {
    let container = Container::in_memory().unwrap();
    let tree = container.tree(0).unwrap();

    tree.insert(&Key::min(), b"lowest").unwrap();
    tree.insert(&Key::from_bytes(&[0]), b"next").unwrap();

    let rows = tree.select(&Key::min(), &Key::max()).unwrap();
    assert_eq!(rows[0].0, Key::min());
    assert_eq!(rows[0].1, b"lowest");
    assert_eq!(rows[1].1, b"next");
}
