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

use rand::Rng;

/// The segment alphabet for random workloads. A small alphabet is deliberate:
/// it forces different workers onto overlapping subtrees so the hand-over-hand
/// coupling actually gets exercised
const SEGMENTS: [&str; 8] = [
    "alpha", "beta", "gamma", "delta", "epsilon", "zeta", "eta", "theta",
];

/// Generate `count` random paths with a depth in `1..=max_depth`. Walks only
/// ever lock ancestors before descendants, so any mix of these paths is
/// deadlock-free under blocking acquires
pub fn generate_random_paths(count: usize, max_depth: usize, rng: &mut impl Rng) -> Vec<String> {
    let mut paths = Vec::with_capacity(count);
    for _ in 0..count {
        let depth = rng.gen_range(1..=max_depth);
        let mut segments = Vec::with_capacity(depth);
        for _ in 0..depth {
            segments.push(SEGMENTS[rng.gen_range(0..SEGMENTS.len())]);
        }
        paths.push(segments.join("/"));
    }
    paths
}
