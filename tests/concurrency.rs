//! Locking behavior across threads: writer exclusion per tree, parallel
//! slots, same-thread conflict detection and disposal waking blocked
//! waiters.

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use ixtl::{Container, Key};

#[test]
fn writers_on_the_same_tree_serialize() {
    let container = Arc::new(Container::in_memory().unwrap());
    let barrier = Arc::new(Barrier::new(4));

    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let container = Arc::clone(&container);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let tree = container.tree(0).unwrap();
                for i in 0..50 {
                    let key = Key::from_i32(worker * 1000 + i);
                    tree.insert(&key, &[worker as u8; 64]).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let rows = container
        .tree(0)
        .unwrap()
        .select(&Key::min(), &Key::max())
        .unwrap();
    assert_eq!(rows.len(), 200);
    for (key, value) in rows {
        let Some(bytes) = key.bytes().map(<[u8]>::to_vec) else {
            panic!("sentinel key stored");
        };
        let worker = (i32::from_be_bytes([
            bytes[0] ^ 0x80,
            bytes[1],
            bytes[2],
            bytes[3],
        ])) / 1000;
        assert_eq!(value, vec![worker as u8; 64]);
    }
}

#[test]
fn writers_on_different_trees_run_in_parallel() {
    let container = Arc::new(Container::in_memory().unwrap());
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8usize)
        .map(|slot| {
            let container = Arc::clone(&container);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let tree = container.tree(slot).unwrap();
                for i in 0..100 {
                    tree.insert(&Key::from_i32(i), &[slot as u8; 32]).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for slot in 0..8 {
        let rows = container
            .tree(slot)
            .unwrap()
            .select(&Key::min(), &Key::max())
            .unwrap();
        assert_eq!(rows.len(), 100, "slot {slot}");
    }
}

#[test]
fn readers_share_a_tree_concurrently() {
    let container = Arc::new(Container::in_memory().unwrap());
    container
        .tree(0)
        .unwrap()
        .insert(&Key::from_i32(1), b"v")
        .unwrap();

    // Both threads must be inside the read lock at the same time; the
    // barrier deadlocks the test if readers exclude each other.
    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let container = Arc::clone(&container);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                container.read_tree(0).unwrap();
                barrier.wait();
                container.unlock_read(0).unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn same_thread_conflicting_locks_fail_fast() {
    let container = Container::in_memory().unwrap();

    container.read_tree(0).unwrap();
    let err = container.write_tree(0).unwrap_err();
    assert!(err.to_string().contains("lock conflict"));
    container.unlock_read(0).unwrap();

    container.write_tree(0).unwrap();
    let err = container.read_tree(0).unwrap_err();
    assert!(err.to_string().contains("lock conflict"));
    let err = container.write_tree(0).unwrap_err();
    assert!(err.to_string().contains("lock conflict"));
    container.rollback_write(0).unwrap();

    // Other slots are unaffected.
    container.read_tree(0).unwrap();
    container.write_tree(1).unwrap();
    container.rollback_write(1).unwrap();
    container.unlock_read(0).unwrap();
}

#[test]
fn a_writer_blocks_readers_until_commit() {
    let container = Arc::new(Container::in_memory().unwrap());
    container.write_tree(0).unwrap();

    let reader = {
        let container = Arc::clone(&container);
        thread::spawn(move || {
            // Blocks until the writer below commits.
            container.read_tree(0).unwrap();
            container.unlock_read(0).unwrap();
        })
    };
    thread::sleep(Duration::from_millis(100));
    assert!(!reader.is_finished());

    container.commit_write(0).unwrap();
    reader.join().unwrap();
}

#[test]
fn dispose_wakes_blocked_waiters() {
    let container = Arc::new(Container::in_memory().unwrap());
    container.write_tree(0).unwrap();

    let blocked = {
        let container = Arc::clone(&container);
        thread::spawn(move || container.write_tree(0))
    };
    thread::sleep(Duration::from_millis(100));
    assert!(!blocked.is_finished());

    container.dispose();
    let err = blocked.join().unwrap().unwrap_err();
    assert!(err.to_string().contains("container disposed"));
}
