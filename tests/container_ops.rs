//! Container-level behavior against real files: persistence across reopen,
//! header validation, free-list recycling and file growth.

use ixtl::{Container, Key};
use tempfile::tempdir;

#[test]
fn data_persists_across_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store.ixtl");

    {
        let container = Container::create_file(&path).unwrap();
        for slot in [0, 7, 15] {
            let tree = container.tree(slot).unwrap();
            for i in 0..200 {
                let value = format!("slot{slot}-value{i}");
                tree.insert(&Key::from_i32(i), value.as_bytes()).unwrap();
            }
        }
        container.dispose();
    }

    let container = Container::open_file(&path).unwrap();
    for slot in [0, 7, 15] {
        let tree = container.tree(slot).unwrap();
        let rows = tree.select(&Key::min(), &Key::max()).unwrap();
        assert_eq!(rows.len(), 200, "slot {slot}");
        assert_eq!(rows[42].1, format!("slot{slot}-value42").into_bytes());
    }
    // Untouched slots stay empty.
    assert!(container
        .tree(3)
        .unwrap()
        .select(&Key::min(), &Key::max())
        .unwrap()
        .is_empty());
}

#[test]
fn overflow_chains_persist_across_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("overflow.ixtl");
    let value: Vec<u8> = (0..12_345u32).map(|i| (i % 251) as u8).collect();

    {
        let container = Container::create_file(&path).unwrap();
        container
            .tree(0)
            .unwrap()
            .insert(&Key::from_ascii("blob").unwrap(), &value)
            .unwrap();
        container.dispose();
    }

    let container = Container::open_file(&path).unwrap();
    assert_eq!(
        container
            .tree(0)
            .unwrap()
            .get(&Key::from_ascii("blob").unwrap())
            .unwrap(),
        Some(value)
    );
}

#[test]
fn open_rejects_foreign_files() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("not-a-container");
    std::fs::write(&path, vec![0u8; 4096]).unwrap();

    let err = match Container::open_file(&path) {
        Ok(_) => panic!("foreign file opened as a container"),
        Err(err) => err,
    };
    assert!(err.to_string().contains("invalid magic"));
}

#[test]
fn crash_with_a_pending_transaction_leaks_no_pages() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("pending.ixtl");

    {
        let container = Container::create_file(&path).unwrap();
        // Slot 1 allocates two pages and never commits.
        container.write_tree(1).unwrap();
        container.create_leaf(1).unwrap();
        container.create_leaf(1).unwrap();
        // Slot 0 commits afterwards; its header write must account for
        // slot 1's in-flight pages.
        container
            .tree(0)
            .unwrap()
            .insert(&Key::from_i32(1), b"committed")
            .unwrap();
        container.dispose();
    }

    let container = Container::open_file(&path).unwrap();
    let rows = container
        .tree(0)
        .unwrap()
        .select(&Key::min(), &Key::max())
        .unwrap();
    assert_eq!(rows.len(), 1);
    // 9 pages total: the header, one leaf for slot 0, the rest free.
    assert_eq!(container.page_count(), 9);
    assert_eq!(container.free_page_count().unwrap(), 7);
}

#[test]
fn freed_pages_are_recycled_before_the_file_grows() {
    let container = Container::in_memory().unwrap();
    let tree = container.tree(0).unwrap();

    for i in 0..1000 {
        tree.insert(&Key::from_i32(i), &[7u8; 100]).unwrap();
    }
    for i in 0..1000 {
        tree.delete(&Key::from_i32(i)).unwrap();
    }
    let pages_after_churn = container.page_count();
    let free_after_churn = container.free_page_count().unwrap();
    assert!(free_after_churn > 0);

    // Refilling with the same data fits in recycled pages.
    for i in 0..1000 {
        tree.insert(&Key::from_i32(i), &[7u8; 100]).unwrap();
    }
    assert_eq!(container.page_count(), pages_after_churn);
}

#[test]
fn growth_steps_up_with_file_size() {
    let container = Container::in_memory().unwrap();
    let tree = container.tree(0).unwrap();

    // First allocation: 1 header page grown by the smallest step.
    tree.insert(&Key::from_i32(0), b"v").unwrap();
    assert_eq!(container.page_count(), 9);

    // Fill past the first tier and watch the step widen.
    for i in 1..200 {
        tree.insert(&Key::from_i32(i), &[1u8; 3000]).unwrap();
    }
    let pages = container.page_count();
    assert!(pages > 64);
    // Page totals are always 1 + a sum of growth steps.
    assert_eq!((pages - 1) % 8, 0);
}

#[test]
fn explicit_lock_cycle_is_exposed() {
    let container = Container::in_memory().unwrap();

    container.write_tree(2).unwrap();
    container.commit_write(2).unwrap();

    container.read_tree(2).unwrap();
    container.unlock_read(2).unwrap();

    let err = container.unlock_read(2).unwrap_err();
    assert!(err.to_string().contains("no read lock"));
    let err = container.commit_write(2).unwrap_err();
    assert!(err.to_string().contains("no write transaction"));
}
