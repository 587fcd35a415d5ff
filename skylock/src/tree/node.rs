/*
 * Created on Mon Sep 19 2022
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

use crate::mutex::{Reentrance, SharedMutex};
use parking_lot::Mutex;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A node's registry key: the parent's *identity* plus one path segment.
/// `None` is the root marker. Two nodes with the same segment under distinct
/// parents get distinct keys, which is what makes subtrees independent
#[derive(Clone)]
pub(crate) struct NodeKey {
    parent: Option<Arc<Node>>,
    segment: String,
}

impl NodeKey {
    pub fn new(parent: Option<Arc<Node>>, segment: String) -> Self {
        Self { parent, segment }
    }
    pub fn parent(&self) -> Option<&Arc<Node>> {
        self.parent.as_ref()
    }
    pub fn segment(&self) -> &str {
        &self.segment
    }
    fn parent_ptr(&self) -> *const Node {
        self.parent.as_ref().map_or(ptr::null(), Arc::as_ptr)
    }
}

impl PartialEq for NodeKey {
    fn eq(&self, other: &Self) -> bool {
        ptr::eq(self.parent_ptr(), other.parent_ptr()) && self.segment == other.segment
    }
}

impl Eq for NodeKey {}

impl Hash for NodeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.parent_ptr().hash(state);
        self.segment.hash(state);
    }
}

impl fmt::Debug for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeKey")
            .field("parent", &self.parent_ptr())
            .field("segment", &self.segment)
            .finish()
    }
}

/// One tree node: its key, its mutex, and the `inref` pin count that guards
/// the window between a registry lookup and the actual lock acquisition
#[derive(Debug)]
pub(crate) struct Node {
    /// the node's current key; rename re-keys a live node, so this sits
    /// behind a lock even though every writer already holds the registry
    /// mutex (readers, like handle release, don't)
    key: Mutex<NodeKey>,
    mutex: SharedMutex,
    inref: AtomicUsize,
}

impl Node {
    pub fn new(key: NodeKey, policy: Reentrance) -> Self {
        Self {
            key: Mutex::new(key),
            mutex: SharedMutex::new(policy),
            inref: AtomicUsize::new(0),
        }
    }
    pub fn mutex(&self) -> &SharedMutex {
        &self.mutex
    }
    pub fn key(&self) -> NodeKey {
        self.key.lock().clone()
    }
    pub fn set_key(&self, key: NodeKey) {
        *self.key.lock() = key;
    }
    pub fn parent(&self) -> Option<Arc<Node>> {
        self.key.lock().parent().cloned()
    }
    pub fn segment(&self) -> String {
        self.key.lock().segment().to_owned()
    }
    /// Pin the node against garbage collection while a walker moves from the
    /// registry lookup to the lock acquisition
    pub fn pin(&self) {
        self.inref.fetch_add(1, Ordering::AcqRel);
    }
    pub fn unpin(&self) {
        self.inref.fetch_sub(1, Ordering::AcqRel);
    }
    pub fn pinned(&self) -> bool {
        self.inref.load(Ordering::Acquire) != 0
    }
}
