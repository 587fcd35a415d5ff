/*
 * Created on Sat Mar 11 2023
 *
 * This file is a part of Skylock
 * Skylock is a hierarchical reader/writer lock manager developed by
 * Sayan Nandan ("the Author") that coordinates concurrent access to
 * tree-shaped namespaces without blocking unrelated subtrees.
 *
 * Copyright (c) 2023, Sayan Nandan <ohsayan@outlook.com>
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

#![deny(unused_crate_dependencies)]
#![deny(unused_imports)]

mod utils;

use crossbeam_channel::bounded;
use devtimer::SimpleTimer;
use log::{info, trace, warn};
use skylock::LockTree;
use std::env;
use std::thread;

/// Lock/unlock cycles every worker runs per round
pub const DEFAULT_OPS_PER_WORKER: usize = 1_000;
/// The rename round is much more contended, so it runs fewer cycles
pub const RENAME_OPS_PER_WORKER: usize = 100;
pub const DEEP_PATH: &str = "a/b/c/d/e";

#[macro_export]
macro_rules! logstress {
    ($stressid:expr, $extra:expr) => {
        log::info!("Stress ({}): {}", $stressid, $extra);
    };
}

macro_rules! log_round {
    ($stressid:expr, $workers:expr, $ops:expr, $timer:expr) => {
        log::info!(
            "Stress ({}) [OK]: Workers: {}; ops: {}; time: {}ns",
            $stressid,
            $workers,
            $ops,
            $timer.time_in_nanos().unwrap()
        );
    };
}

fn main() {
    env_logger::Builder::new()
        .parse_filters(&env::var("SKYLOCK_LOG").unwrap_or_else(|_| "info".to_owned()))
        .init();
    warn!("The stress test checks correctness under load and DOES NOT show the true throughput");
    let core_count = num_cpus::get();
    let max_workers = core_count * 2;
    trace!(
        "This host has {} logical cores. Will spawn a maximum of {} workers",
        core_count,
        max_workers
    );
    stress_deep_reentrant_writes(max_workers);
    stress_random_paths(max_workers);
    stress_rename_churn(max_workers);
    info!("SUCCESS. Stress test complete!");
}

/// Every worker hammers the same deep path with nested (reentrant) writes.
/// This is the worst case for the root: every single operation couples on it
fn stress_deep_reentrant_writes(max_workers: usize) {
    logstress!(
        "A [DEEP]",
        "Reentrant writers on one deep path with monotonically increasing workers"
    );
    let mut current_workers = 1usize;
    while current_workers <= max_workers {
        let tree = LockTree::new('/');
        let (tx, rx) = bounded::<usize>(current_workers);
        let mut timer = SimpleTimer::new();
        timer.start();
        let workers: Vec<_> = (0..current_workers)
            .map(|_| {
                let tree = tree.clone();
                let tx = tx.clone();
                thread::spawn(move || {
                    let mut done = 0usize;
                    for _ in 0..DEFAULT_OPS_PER_WORKER {
                        let mut outer = tree.write(DEEP_PATH, true, 0.0).unwrap();
                        let mut inner = tree.write(DEEP_PATH, true, 0.0).unwrap();
                        inner.release().unwrap();
                        outer.release().unwrap();
                        done += 1;
                    }
                    tx.send(done).unwrap();
                })
            })
            .collect();
        drop(tx);
        let total: usize = rx.iter().sum();
        workers.into_iter().for_each(|w| w.join().unwrap());
        timer.stop();
        assert_eq!(total, current_workers * DEFAULT_OPS_PER_WORKER);
        assert_eq!(tree.size(), 0, "tree must drain once all handles are gone");
        log_round!("A [DEEP]", current_workers, total, timer);
        current_workers += 1;
    }
}

/// Random reads and writes over a small shared alphabet of paths, so workers
/// constantly overlap on ancestors without ever conflicting on lock order
fn stress_random_paths(max_workers: usize) {
    logstress!(
        "B [RANDOM]",
        "Random-depth readers and writers with monotonically increasing workers"
    );
    let mut rng = rand::thread_rng();
    let mut current_workers = 1usize;
    while current_workers <= max_workers {
        let tree = LockTree::new('/');
        let (tx, rx) = bounded::<usize>(current_workers);
        let mut timer = SimpleTimer::new();
        timer.start();
        let workers: Vec<_> = (0..current_workers)
            .map(|_| {
                let tree = tree.clone();
                let tx = tx.clone();
                let paths = utils::generate_random_paths(DEFAULT_OPS_PER_WORKER, 4, &mut rng);
                thread::spawn(move || {
                    use rand::Rng;
                    let mut rng = rand::thread_rng();
                    let mut done = 0usize;
                    for path in paths {
                        if rng.gen_bool(0.5) {
                            tree.read(&path, true, 0.0).unwrap().release().unwrap();
                        } else {
                            tree.write(&path, true, 0.0).unwrap().release().unwrap();
                        }
                        done += 1;
                    }
                    tx.send(done).unwrap();
                })
            })
            .collect();
        drop(tx);
        let total: usize = rx.iter().sum();
        workers.into_iter().for_each(|w| w.join().unwrap());
        timer.stop();
        assert_eq!(total, current_workers * DEFAULT_OPS_PER_WORKER);
        assert_eq!(tree.size(), 0, "tree must drain once all handles are gone");
        log_round!("B [RANDOM]", current_workers, total, timer);
        current_workers += 1;
    }
}

/// Workers hold a leaf exclusively and rename it back and forth between two
/// keys. Losing the race to another renamer is fine; keeping the handle valid
/// and draining the tree at the end is what's under test
fn stress_rename_churn(max_workers: usize) {
    logstress!(
        "C [RENAME]",
        "Rename churn between two keys with monotonically increasing workers"
    );
    const PATHS: [&str; 2] = ["dir/old", "dir/new"];
    let mut current_workers = 1usize;
    while current_workers <= max_workers {
        let tree = LockTree::new('/');
        let (tx, rx) = bounded::<usize>(current_workers);
        let mut timer = SimpleTimer::new();
        timer.start();
        let workers: Vec<_> = (0..current_workers)
            .map(|i| {
                let tree = tree.clone();
                let tx = tx.clone();
                thread::spawn(move || {
                    let mut done = 0usize;
                    for _ in 0..RENAME_OPS_PER_WORKER {
                        let mut guard = tree.write(PATHS[i % 2], true, 0.0).unwrap();
                        let _ = tree.rename(PATHS[i % 2], PATHS[(i + 1) % 2], true, 0.0);
                        guard.release().unwrap();
                        done += 1;
                    }
                    tx.send(done).unwrap();
                })
            })
            .collect();
        drop(tx);
        let total: usize = rx.iter().sum();
        workers.into_iter().for_each(|w| w.join().unwrap());
        timer.stop();
        assert_eq!(total, current_workers * RENAME_OPS_PER_WORKER);
        assert_eq!(tree.size(), 0, "tree must drain once all handles are gone");
        log_round!("C [RENAME]", current_workers, total, timer);
        current_workers += 1;
    }
}
