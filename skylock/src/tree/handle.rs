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

use super::node::Node;
use super::LockTree;
use crate::error::LockResult;
use log::trace;
use std::sync::Arc;
use std::thread::{self, ThreadId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Shared,
    Exclusive,
}

/// The token returned by a successful `read`/`write`. It records the leaf of
/// the acquired chain and the mode; the full chain is recovered by walking
/// the leaf's parent references. Dropping the handle releases everything it
/// holds, on every exit path
#[derive(Debug)]
pub struct LockHandle {
    mgr: LockTree,
    leaf: Option<Arc<Node>>,
    mode: Mode,
    /// the acquiring thread; loose unlock releases on its behalf
    owner: ThreadId,
    released: bool,
}

impl LockHandle {
    pub(crate) fn new(mgr: LockTree, mode: Mode, leaf: Option<Arc<Node>>) -> Self {
        Self {
            mgr,
            leaf,
            mode,
            owner: thread::current().id(),
            released: false,
        }
    }

    /// Release every node this handle holds, leaf first, attempting garbage
    /// collection on each. Calling this twice is a no-op
    pub fn release(&mut self) -> LockResult<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        let mut chain = Vec::new();
        let mut cur = self.leaf.clone();
        while let Some(node) = cur {
            cur = node.parent();
            chain.push(node);
        }
        let cfg = self.mgr.config();
        for (depth, node) in chain.iter().enumerate() {
            // only the leaf is ever held exclusively; ancestors are shared
            if depth == 0 && self.mode == Mode::Exclusive {
                trace!("release: exclusive unlock on '{}'", node.segment());
                if cfg.loose_write_unlock() {
                    node.mutex().unlock_by(self.owner)?;
                } else {
                    node.mutex().unlock()?;
                }
            } else {
                trace!("release: shared unlock on '{}'", node.segment());
                if cfg.loose_read_unlock() {
                    node.mutex().unlock_shared_by(self.owner)?;
                } else {
                    node.mutex().unlock_shared()?;
                }
            }
            self.mgr.erase_safe(node);
        }
        Ok(())
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        // invariant breaches on a destructor-time release are swallowed
        let _ = self.release();
    }
}
