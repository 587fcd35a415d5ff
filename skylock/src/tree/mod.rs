/*
 * Created on Tue Sep 20 2022
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

//! # The lock tree
//!
//! [`LockTree`] owns the node registry: a map from `(parent identity,
//! segment)` to shared-owned nodes, serialised by one manager mutex. The
//! walker materialises nodes on demand, acquires them hand-over-hand from the
//! root down, and rolls the whole chain back if any single acquisition fails.
//! Nodes are never eagerly destroyed; every release attempts a lazy erase
//! that only succeeds once a solo lock proves the node is unused.
//!
//! Locking order is registry first, then any node mutex. The walker drops
//! the registry mutex before it blocks on a node; rename is the exception
//! and keeps the registry mutex across its node operations, which is what
//! makes it atomic from the caller's point of view.

mod handle;
mod node;

pub use handle::LockHandle;
pub(crate) use handle::Mode;

use crate::config::{Configuration, RECURSIVE};
use crate::error::{Error, LockResult};
use crate::path::Segments;
use log::{debug, trace};
use node::{Node, NodeKey};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

type Registry = HashMap<NodeKey, Arc<Node>>;

/// The hierarchical lock manager. Paths name nodes in a dynamically
/// materialised tree; `read` and `write` hand out [`LockHandle`]s that hold
/// a shared lock on every ancestor and a shared/exclusive lock on the leaf.
///
/// Clones share the same tree. Handles keep the tree alive, so it is never
/// torn down under an outstanding lock
#[derive(Debug, Clone)]
pub struct LockTree {
    inner: Arc<TreeInner>,
}

#[derive(Debug)]
struct TreeInner {
    registry: Mutex<Registry>,
    cfg: Configuration,
}

impl LockTree {
    /// A manager with full reentrance, the default configuration
    pub fn new(sep: char) -> Self {
        match Self::with_flags(sep, RECURSIVE) {
            Ok(tree) => tree,
            // RECURSIVE is always a valid bitset
            Err(_) => unreachable!(),
        }
    }

    /// A manager with an explicit flags bitset (see [`crate::config`])
    pub fn with_flags(sep: char, flags: u32) -> LockResult<Self> {
        Ok(Self {
            inner: Arc::new(TreeInner {
                registry: Mutex::new(Registry::new()),
                cfg: Configuration::from_flags(sep, flags)?,
            }),
        })
    }

    pub(crate) fn config(&self) -> &Configuration {
        &self.inner.cfg
    }

    /// The number of live nodes in the registry
    pub fn size(&self) -> usize {
        self.inner.registry.lock().len()
    }

    /// Acquire a shared lock on every node along `path`. An empty path (after
    /// trimming separators) yields an empty handle
    pub fn read(&self, path: &str, block: bool, timeout: f64) -> LockResult<LockHandle> {
        self.walk(path, block, timeout, Mode::Shared)
    }

    /// Acquire a shared lock on every ancestor of `path` and an exclusive
    /// lock on its final node
    pub fn write(&self, path: &str, block: bool, timeout: f64) -> LockResult<LockHandle> {
        self.walk(path, block, timeout, Mode::Exclusive)
    }

    fn walk(&self, path: &str, block: bool, timeout: f64, mode: Mode) -> LockResult<LockHandle> {
        let mut segments = Segments::new(path, self.config().sep()).peekable();
        let mut cur: Option<Arc<Node>> = None;
        while let Some(segment) = segments.next() {
            let node = self.get_node(NodeKey::new(cur.clone(), segment.to_owned()));
            let exclusive = mode == Mode::Exclusive && segments.peek().is_none();
            let ok = if exclusive {
                node.mutex().lock_with(block, timeout)
            } else {
                node.mutex().lock_shared_with(block, timeout)
            };
            node.unpin();
            if !ok {
                debug!("walk: giving up on '{}' at '{}', rolling back", path, segment);
                // everything acquired so far is shared-held by this thread;
                // a throwaway shared handle releases it all and runs GC
                drop(LockHandle::new(self.clone(), Mode::Shared, cur));
                return Err(Error::AcquireFailed("failed to lock"));
            }
            trace!(
                "walk: locked '{}' ({})",
                segment,
                if exclusive { "exclusive" } else { "shared" }
            );
            cur = Some(node);
        }
        Ok(LockHandle::new(self.clone(), mode, cur))
    }

    /// Look up or create the node for `key`, pinned against GC. The caller
    /// must unpin once its acquire attempt on the node has completed
    fn get_node(&self, key: NodeKey) -> Arc<Node> {
        let mut registry = self.inner.registry.lock();
        let node = match registry.get(&key) {
            Some(node) => node.clone(),
            None => {
                let node = Arc::new(Node::new(key.clone(), self.config().reentrance()));
                registry.insert(key, node.clone());
                node
            }
        };
        node.pin();
        node
    }

    /// Resolve `path` to its full node chain, root first. `None` if any
    /// segment is missing (or the path is empty)
    fn find_chain(&self, registry: &Registry, path: &str) -> Option<Vec<Arc<Node>>> {
        let mut chain = Vec::new();
        let mut cur: Option<Arc<Node>> = None;
        for segment in Segments::new(path, self.config().sep()) {
            let node = registry
                .get(&NodeKey::new(cur.clone(), segment.to_owned()))?
                .clone();
            chain.push(node.clone());
            cur = Some(node);
        }
        if chain.is_empty() {
            None
        } else {
            Some(chain)
        }
    }

    /// Move the leaf at `from` to `to`, keeping its lock state intact. New
    /// uncommon ancestors of `to` get the leaf's hold pressure cloned onto
    /// them; uncommon ancestors of `from` get it released and become
    /// candidates for erasure. Runs entirely under the registry mutex, so
    /// concurrent walkers observe either the old tree or the new one
    pub fn rename(&self, from: &str, to: &str, block: bool, timeout: f64) -> LockResult<()> {
        let mut registry = self.inner.registry.lock();
        let chain = match self.find_chain(&registry, from) {
            Some(chain) => chain,
            None => return Err(Error::RenameSourceMissing),
        };
        let leaf = match chain.last() {
            Some(leaf) => leaf.clone(),
            None => return Err(Error::RenameSourceMissing),
        };
        debug!("rename: '{}' -> '{}'", from, to);

        let mut segments = Segments::new(to, self.config().sep()).peekable();
        let mut cur_to: Option<Arc<Node>> = None;
        let mut common = true;
        let mut matched = 0usize;
        let mut to_key: Option<NodeKey> = None;
        while let Some(segment) = segments.next() {
            let key = NodeKey::new(cur_to.clone(), segment.to_owned());
            if common {
                match chain.get(matched) {
                    Some(node) if node.key() == key => {
                        trace!("rename: common ancestor '{}'", segment);
                        cur_to = Some(node.clone());
                        matched += 1;
                        to_key = Some(key);
                        continue;
                    }
                    Some(_) => common = false,
                    // every source node matched a destination prefix and the
                    // destination keeps going: the leaf would become its own
                    // descendant
                    None => {
                        return Err(Error::AcquireFailed(
                            "rename destination is inside the source",
                        ))
                    }
                }
            }
            if segments.peek().is_some() {
                // uncommon non-leaf destination: materialise it and mirror
                // the leaf's hold pressure so it guards the moved leaf the
                // same way the old ancestors did
                let dest = match registry.get(&key) {
                    Some(node) => node.clone(),
                    None => {
                        let node = Arc::new(Node::new(key.clone(), self.config().reentrance()));
                        registry.insert(key.clone(), node.clone());
                        node
                    }
                };
                trace!("rename: cloning leaf counts onto '{}'", segment);
                if !dest.mutex().clone_shared_from(leaf.mutex(), block, timeout) {
                    return Err(Error::AcquireFailed("unable to lock rename destination"));
                }
                cur_to = Some(dest);
            }
            to_key = Some(key);
        }
        let to_key = match to_key {
            Some(key) => key,
            None => return Err(Error::AcquireFailed("rename destination is empty")),
        };

        // from-ancestors that no longer guard the leaf lose its cloned
        // pressure and become erase candidates. When `to` ran out while
        // still on the common prefix, the last matched node is the
        // destination position itself and is released too
        let start = if common { matched.saturating_sub(1) } else { matched };
        let mut deferred: Vec<Arc<Node>> = Vec::new();
        for node in chain.iter().take(chain.len() - 1).skip(start) {
            trace!("rename: releasing leaf counts from '{}'", node.segment());
            node.mutex().unclone_shared_from(leaf.mutex())?;
            deferred.push(node.clone());
        }
        for node in &deferred {
            self.erase_locked(&mut registry, node);
        }

        // keep the leaf's locks, only change its key
        registry.remove(&leaf.key());
        leaf.set_key(to_key.clone());
        registry.insert(to_key, leaf);
        Ok(())
    }

    /// Attempt to lazily erase a node that may have fallen out of use
    pub(crate) fn erase_safe(&self, node: &Arc<Node>) {
        let mut registry = self.inner.registry.lock();
        self.erase_locked(&mut registry, node);
    }

    /// The erase protocol: a cheap pin pre-check, then a solo lock to prove
    /// nobody holds the node, then an `inref` re-check to defeat the walker
    /// that grabbed the node from the registry just before us. Only the
    /// exact node we were asked about is ever removed
    fn erase_locked(&self, registry: &mut Registry, node: &Arc<Node>) {
        if node.pinned() {
            return;
        }
        if !node.mutex().try_solo_lock() {
            return;
        }
        if !node.pinned() {
            let key = node.key();
            let matches = registry
                .get(&key)
                .map_or(false, |live| Arc::ptr_eq(live, node));
            if matches {
                trace!("gc: erasing '{}'", key.segment());
                registry.remove(&key);
            }
        }
        // the solo lock is ours; releasing it cannot fail
        let _ = node.mutex().unlock();
    }
}
