/*
 * Created on Thu Sep 22 2022
 *
 * This file is a part of Skylock
 * Skylock is a hierarchical reader/writer lock manager developed by
 * Sayan Nandan ("the Author") that coordinates concurrent access to
 * tree-shaped namespaces without blocking unrelated subtrees.
 *
 * Copyright (c) 2022, Sayan Nandan <ohsayan@outlook.com>
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 *
*/

//! End-to-end scenarios against the public surface: exclusion across the
//! tree, all-or-nothing walks, lazy erasure, rename under load

use crate::config::{LOOSE_READ_UNLOCK, LOOSE_WRITE_UNLOCK, RECURSIVE};
use crate::{Error, LockTree};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

const STRICT: u32 = 0;

fn panic_timeout<T, F>(dur: Duration, f: F) -> T
where
    T: Send + 'static,
    F: (FnOnce() -> T) + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<()>();
    let handle = thread::spawn(move || {
        let val = f();
        tx.send(()).unwrap();
        val
    });
    match rx.recv_timeout(dur) {
        Ok(_) => handle.join().expect("thread panicked"),
        Err(_) => panic!("thread passed timeout"),
    }
}

/// An increment with a deliberate window: only mutual exclusion keeps the
/// final count honest
fn slow_increment(ctr: &AtomicUsize) {
    let seen = ctr.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(1));
    ctr.store(seen + 1, Ordering::SeqCst);
}

/// From another thread: readable, but not writable
fn read_locked_elsewhere(tree: &LockTree, path: &str) -> bool {
    let tree = tree.clone();
    let path = path.to_owned();
    thread::spawn(move || {
        tree.read(&path, false, 0.0).unwrap().release().unwrap();
        tree.write(&path, false, 0.0).is_err()
    })
    .join()
    .unwrap()
}

/// From another thread: not even readable
fn write_locked_elsewhere(tree: &LockTree, path: &str) -> bool {
    let tree = tree.clone();
    let path = path.to_owned();
    thread::spawn(move || tree.read(&path, false, 0.0).is_err())
        .join()
        .unwrap()
}

#[test]
fn exclusive_lock_unlock() {
    let tree = LockTree::new('/');
    let mut l1 = tree.write("a", true, 0.0).unwrap();
    l1.release().unwrap();
    let mut l2 = tree.write("a", false, 0.0).unwrap();
    l2.release().unwrap();
    assert_eq!(tree.size(), 0);
}

#[test]
fn shared_lock_unlock() {
    let tree = LockTree::new('/');
    let mut l1 = tree.read("a", true, 0.0).unwrap();
    l1.release().unwrap();
    let mut l2 = tree.read("a", true, 0.0).unwrap();
    l2.release().unwrap();
    assert_eq!(tree.size(), 0);
}

#[test]
fn scoped_handles_release_on_drop() {
    let tree = LockTree::new('/');
    {
        let _guard = tree.write("a", true, 0.0).unwrap();
    }
    {
        // only possible if the previous scope really released
        let _guard = tree.write("a", false, 0.0).unwrap();
    }
    assert_eq!(tree.size(), 0);
}

#[test]
fn empty_path_is_an_empty_handle() {
    let tree = LockTree::new('/');
    let mut rd = tree.read("", true, 0.0).unwrap();
    let mut wr = tree.write("///", true, 0.0).unwrap();
    assert_eq!(tree.size(), 0);
    rd.release().unwrap();
    wr.release().unwrap();
    assert_eq!(tree.size(), 0);
}

#[test]
fn double_release_is_a_noop() {
    let tree = LockTree::new('/');
    let mut guard = tree.write("a/b", true, 0.0).unwrap();
    guard.release().unwrap();
    guard.release().unwrap();
    assert_eq!(tree.size(), 0);
}

#[test]
fn read_and_write_inside_a_write() {
    let tree = LockTree::with_flags('/', STRICT).unwrap();
    let mut l1 = tree.write("a/b/c", true, 0.0).unwrap();
    assert!(tree.write("a", false, 0.0).is_err());
    assert!(tree.write("a/b", false, 0.0).is_err());
    // read lock while write is held deeper down
    let mut l2 = tree.read("a/b", false, 0.0).unwrap();
    // write lock on a sibling
    let mut l3 = tree.write("a/b/d", false, 0.0).unwrap();
    l1.release().unwrap();
    // partial release: the root is still pinned by l2 and l3
    assert!(tree.write("a", false, 0.0).is_err());
    l3.release().unwrap();
    assert!(tree.write("a", false, 0.0).is_err());
    l2.release().unwrap();
    tree.write("a", false, 0.0).unwrap();
    assert_eq!(tree.size(), 0);
}

#[test]
fn write_root_after_full_release() {
    let tree = LockTree::with_flags('/', STRICT).unwrap();
    let mut l1 = tree.write("a/b/c", true, 0.0).unwrap();
    l1.release().unwrap();
    let mut l4 = tree.write("a", false, 0.0).unwrap();
    // the exclusive root refuses descendants, even from its own thread in
    // strict mode
    assert!(tree.read("a/b", false, 0.0).is_err());
    l4.release().unwrap();
    tree.read("a/b", false, 0.0).unwrap();
    assert_eq!(tree.size(), 0);
}

#[test]
fn exclusion_and_sibling_independence() {
    let tree = LockTree::new('/');
    let (ready_tx, ready_rx) = mpsc::channel();
    let (done_tx, done_rx) = mpsc::channel::<()>();
    let holder = {
        let tree = tree.clone();
        thread::spawn(move || {
            let mut guard = tree.write("a/b/c", true, 0.0).unwrap();
            ready_tx.send(()).unwrap();
            done_rx.recv().unwrap();
            guard.release().unwrap();
        })
    };
    ready_rx.recv().unwrap();
    // exclusive vs any on the same path
    assert!(tree.write("a/b/c", false, 0.0).is_err());
    assert!(tree.read("a/b/c", false, 0.0).is_err());
    // ancestor coupling
    assert!(tree.write("a", false, 0.0).is_err());
    assert!(tree.write("a/b", false, 0.0).is_err());
    // sibling independence
    tree.write("a/b/d", false, 0.0).unwrap().release().unwrap();
    done_tx.send(()).unwrap();
    holder.join().unwrap();
    assert_eq!(tree.size(), 0);
}

#[test]
fn readers_coexist_with_descendant_writers() {
    let tree = LockTree::new('/');
    let mut rd = tree.read("a/b", true, 0.0).unwrap();
    let probe = {
        let tree = tree.clone();
        thread::spawn(move || {
            tree.read("a/b/c", false, 0.0).unwrap().release().unwrap();
            // a write on a descendant only escalates the final node
            tree.write("a/b/c", false, 0.0).unwrap().release().unwrap();
        })
    };
    probe.join().unwrap();
    rd.release().unwrap();
    assert_eq!(tree.size(), 0);
}

#[test]
fn failed_walk_leaves_no_trace() {
    let tree = LockTree::new('/');
    let (ready_tx, ready_rx) = mpsc::channel();
    let (done_tx, done_rx) = mpsc::channel::<()>();
    let holder = {
        let tree = tree.clone();
        thread::spawn(move || {
            let mut guard = tree.write("a/b", true, 0.0).unwrap();
            ready_tx.send(()).unwrap();
            done_rx.recv().unwrap();
            guard.release().unwrap();
        })
    };
    ready_rx.recv().unwrap();
    // the walk acquires `a`, fails on `b`, and must roll `a` back without
    // leaving a node for `c` behind
    assert!(tree.write("a/b/c", false, 0.0).is_err());
    assert_eq!(tree.size(), 2);
    done_tx.send(()).unwrap();
    holder.join().unwrap();
    assert_eq!(tree.size(), 0);
}

#[test]
fn same_thread_reentrance() {
    let tree = LockTree::new('/');
    let mut l1 = tree.write("a/b", true, 0.0).unwrap();
    let mut l2 = tree.write("a/b", false, 0.0).unwrap();
    // and a write below a path we already read
    let mut l3 = tree.read("a", false, 0.0).unwrap();
    let mut l4 = tree.write("a/b/c", false, 0.0).unwrap();
    l4.release().unwrap();
    l3.release().unwrap();
    l2.release().unwrap();
    l1.release().unwrap();
    assert_eq!(tree.size(), 0);
}

#[test]
fn escalate_and_deescalate() {
    let tree = LockTree::new('/');
    let mut l1 = tree.write("a", true, 0.0).unwrap();
    let mut l2 = tree.read("a", true, 0.0).unwrap();
    l1.release().unwrap();
    assert_eq!(tree.size(), 1);
    assert!(read_locked_elsewhere(&tree, "a"));
    let mut l3 = tree.write("a", true, 0.0).unwrap();
    l2.release().unwrap();
    assert!(write_locked_elsewhere(&tree, "a"));
    l3.release().unwrap();
    assert_eq!(tree.size(), 0);
}

#[test]
fn rename_moves_the_lock() {
    let tree = LockTree::with_flags('/', STRICT).unwrap();
    let mut l1 = tree.write("a/b/c/d", true, 0.0).unwrap();
    tree.rename("a/b/c/d", "a/b/r/x", false, 0.0).unwrap();
    // a, b, the cloned r and the re-keyed leaf
    assert_eq!(tree.size(), 4);
    // the new ancestor carries the leaf's pressure
    assert!(tree.write("a/b/r", false, 0.0).is_err());
    // the moved leaf still excludes other threads
    assert!(write_locked_elsewhere(&tree, "a/b/r/x"));
    // the old ancestor was released by the rename
    tree.write("a/b/c", false, 0.0).unwrap().release().unwrap();
    l1.release().unwrap();
    tree.write("a/b/r/x", false, 0.0).unwrap().release().unwrap();
    assert_eq!(tree.size(), 0);
}

#[test]
fn rename_onto_held_destination() {
    let tree = LockTree::new('/');
    let mut l1 = tree.write("a/b/c/d", true, 0.0).unwrap();
    let mut l2 = tree.write("a/b/c", true, 0.0).unwrap();
    tree.rename("a/b/c/d", "a/b/c", false, 0.0).unwrap();
    // the destination key now resolves to the moved, exclusively held leaf
    assert!(write_locked_elsewhere(&tree, "a/b/c"));
    l1.release().unwrap();
    l2.release().unwrap();
    assert_eq!(tree.size(), 0);
}

#[test]
fn rename_missing_source() {
    let tree = LockTree::new('/');
    assert_eq!(
        tree.rename("nope/x", "y", true, 0.0).unwrap_err(),
        Error::RenameSourceMissing
    );
    let mut guard = tree.write("a", true, 0.0).unwrap();
    assert_eq!(
        tree.rename("a/b", "a/c", true, 0.0).unwrap_err(),
        Error::RenameSourceMissing
    );
    guard.release().unwrap();
    assert_eq!(tree.size(), 0);
}

#[test]
fn rename_empty_destination() {
    let tree = LockTree::new('/');
    let mut guard = tree.write("a", true, 0.0).unwrap();
    assert!(matches!(
        tree.rename("a", "//", true, 0.0).unwrap_err(),
        Error::AcquireFailed(_)
    ));
    guard.release().unwrap();
    assert_eq!(tree.size(), 0);
}

#[test]
fn rename_onto_self_is_a_noop() {
    let tree = LockTree::new('/');
    let mut guard = tree.write("a/b", true, 0.0).unwrap();
    tree.rename("a/b", "a/b", true, 0.0).unwrap();
    assert_eq!(tree.size(), 2);
    assert!(write_locked_elsewhere(&tree, "a/b"));
    guard.release().unwrap();
    assert_eq!(tree.size(), 0);
}

#[test]
fn timed_acquire_waits_at_least_the_timeout() {
    for flags in [RECURSIVE, STRICT] {
        let tree = LockTree::with_flags('/', flags).unwrap();
        let mut own = tree.write("y", true, 0.0).unwrap();
        let remote = {
            let tree = tree.clone();
            thread::spawn(move || {
                let mut wr1 = tree.write("a/b", true, 0.0).unwrap();
                // parks here until the main thread lets go of y
                let mut wr2 = tree.write("y", true, 0.0).unwrap();
                wr1.release().unwrap();
                wr2.release().unwrap();
            })
        };
        // spin until the remote thread holds a/b
        while tree.read("a/b", false, 0.0).is_ok() {
            thread::yield_now();
        }
        let start = Instant::now();
        assert!(tree.read("a/b", true, 0.01).is_err());
        assert!(start.elapsed() >= Duration::from_millis(10));
        let start = Instant::now();
        assert!(tree.write("a/b", true, 0.01).is_err());
        assert!(start.elapsed() >= Duration::from_millis(10));
        own.release().unwrap();
        remote.join().unwrap();
        assert_eq!(tree.size(), 0);
    }
}

#[test]
fn deep_reentrant_writes_under_contention() {
    const POOL: usize = 100;
    panic_timeout(Duration::from_secs(120), || {
        let tree = LockTree::new('/');
        let ctr = Arc::new(AtomicUsize::new(0));
        let mut threads = Vec::with_capacity(POOL);
        for _ in 0..POOL {
            let tree = tree.clone();
            let ctr = ctr.clone();
            threads.push(thread::spawn(move || {
                let mut l1 = tree.write("a/b/c/d/e", true, 0.0).unwrap();
                let mut l2 = tree.write("a/b/c/d/e", true, 0.0).unwrap();
                slow_increment(&ctr);
                l1.release().unwrap();
                l2.release().unwrap();
            }));
        }
        threads.into_iter().for_each(|t| t.join().unwrap());
        assert_eq!(ctr.load(Ordering::SeqCst), POOL);
        assert_eq!(tree.size(), 0);
    });
}

#[test]
fn nested_reads_and_writes_under_contention() {
    const POOL: usize = 100;
    panic_timeout(Duration::from_secs(120), || {
        let tree = LockTree::new('/');
        let ctr = Arc::new(AtomicUsize::new(0));
        let mut threads = Vec::with_capacity(POOL);
        for _ in 0..POOL {
            let tree = tree.clone();
            let ctr = ctr.clone();
            threads.push(thread::spawn(move || {
                let mut rd = tree.read("a/b/c", true, 0.0).unwrap();
                let mut wr = tree.write("a/b/c/d/e", true, 0.0).unwrap();
                slow_increment(&ctr);
                wr.release().unwrap();
                rd.release().unwrap();
            }));
        }
        threads.into_iter().for_each(|t| t.join().unwrap());
        assert_eq!(ctr.load(Ordering::SeqCst), POOL);
        assert_eq!(tree.size(), 0);
    });
}

#[test]
fn random_depth_writers_drain_to_zero() {
    use rand::Rng;
    const POOL: usize = 100;
    const PATHS: [&str; 5] = ["a", "a/b", "a/b/c", "a/b/c/d", "a/b/c/d/e"];
    panic_timeout(Duration::from_secs(120), || {
        let tree = LockTree::new('/');
        let ctr = Arc::new(AtomicUsize::new(0));
        let mut threads = Vec::with_capacity(POOL);
        for _ in 0..POOL {
            let tree = tree.clone();
            let ctr = ctr.clone();
            let depth = rand::thread_rng().gen_range(0..PATHS.len());
            threads.push(thread::spawn(move || {
                let mut guard = tree.write(PATHS[depth], true, 0.0).unwrap();
                slow_increment(&ctr);
                guard.release().unwrap();
            }));
        }
        threads.into_iter().for_each(|t| t.join().unwrap());
        assert_eq!(ctr.load(Ordering::SeqCst), POOL);
        assert_eq!(tree.size(), 0);
    });
}

#[test]
fn rename_racers_keep_their_locks() {
    const POOL: usize = 100;
    const PATHS: [&str; 2] = ["a/x", "a/b"];
    panic_timeout(Duration::from_secs(120), || {
        let tree = LockTree::new('/');
        let ctr = Arc::new(AtomicUsize::new(0));
        let mut threads = Vec::with_capacity(POOL);
        for i in 0..POOL {
            let tree = tree.clone();
            let ctr = ctr.clone();
            threads.push(thread::spawn(move || {
                let mut guard = tree.write(PATHS[i % 2], true, 0.0).unwrap();
                // losing the rename race just means someone moved us first
                let _ = tree.rename(PATHS[i % 2], PATHS[(i + 1) % 2], true, 0.0);
                ctr.fetch_add(1, Ordering::SeqCst);
                guard.release().unwrap();
            }));
        }
        threads.into_iter().for_each(|t| t.join().unwrap());
        assert_eq!(ctr.load(Ordering::SeqCst), POOL);
        assert_eq!(tree.size(), 0);
    });
}

#[test]
fn loose_unlock_releases_from_another_thread() {
    let tree =
        LockTree::with_flags('/', RECURSIVE | LOOSE_READ_UNLOCK | LOOSE_WRITE_UNLOCK).unwrap();
    let (tx, rx) = mpsc::channel();
    {
        let tree = tree.clone();
        thread::spawn(move || tx.send(tree.write("a/b", true, 0.0).unwrap()).unwrap())
            .join()
            .unwrap();
    }
    let mut guard = rx.recv().unwrap();
    guard.release().unwrap();
    assert_eq!(tree.size(), 0);
}

#[test]
fn strict_ownership_refuses_foreign_release() {
    let tree = LockTree::new('/');
    let (tx, rx) = mpsc::channel();
    {
        let tree = tree.clone();
        thread::spawn(move || tx.send(tree.write("a", true, 0.0).unwrap()).unwrap())
            .join()
            .unwrap();
    }
    let mut guard = rx.recv().unwrap();
    assert!(matches!(
        guard.release().unwrap_err(),
        Error::InvalidUnlock(_)
    ));
}
