/*
 * Created on Mon Sep 12 2022
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

//! # Skylock
//!
//! A hierarchical reader/writer lock manager. String paths like `a/b/c` name
//! nodes in a tree that is materialised on demand; locking a path takes a
//! shared lock on every ancestor and a shared or exclusive lock on the leaf.
//! That gives you hand-over-hand semantics: a writer on `a/b/c` excludes
//! conflicting readers and writers on its ancestors and descendants while
//! unrelated subtrees stay fully concurrent.
//!
//! ```no_run
//! use skylock::LockTree;
//!
//! let tree = LockTree::new('/');
//! {
//!     let _guard = tree.write("users/42/inbox", true, 0.0).unwrap();
//!     // `users` and `users/42` are read-locked, `inbox` is write-locked
//! }
//! // dropped: everything is released and the empty nodes are collected
//! assert_eq!(tree.size(), 0);
//! ```
//!
//! Nodes are erased lazily: once nothing holds them, a solo try-lock proves
//! they're unused and the registry forgets them. Renaming a locked path is
//! supported and keeps every outstanding handle valid.

#![deny(unused_crate_dependencies)]
#![deny(unused_imports)]

pub mod config;
mod error;
mod mutex;
mod path;
mod tree;
#[cfg(test)]
mod tests;

pub use error::{Error, LockResult};
pub use mutex::{Reentrance, SharedMutex};
pub use path::Segments;
pub use tree::{LockHandle, LockTree};
