/*
 * Created on Fri Sep 16 2022
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

//! # The per-node mutex
//!
//! [`SharedMutex`] is a recursive shared/exclusive mutex: it tracks an
//! exclusive depth owned by a single thread and a per-thread map of shared
//! counts, all under one internal monitor. Which state transitions are legal
//! depends on the [`Reentrance`] policy picked at construction; the policy is
//! consulted through a small set of predicates and everything else is shared
//! across policies.
//!
//! The solo try-lock is a special exclusive acquire that succeeds only on a
//! completely free mutex and blocks reentrance while held. The garbage
//! collection path uses it to prove that a node is truly unused.

use crate::error::{Error, LockResult};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::HashMap;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

/// Which same-thread state transitions a [`SharedMutex`] permits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reentrance {
    /// No reentrance of any kind
    Strict,
    /// Re-enter exclusive; never escalate a shared holder to exclusive
    WriteOnly,
    /// Re-enter exclusive and downgrade to shared, but never shared→exclusive
    OneWay,
    /// Full reentrance including escalation and de-escalation
    Full,
}

impl Reentrance {
    const fn recursive(&self) -> bool {
        !matches!(self, Self::Strict)
    }
}

#[derive(Debug, Default)]
struct MutexState {
    /// owner of the exclusive hold; meaningful only while `excl_count > 0`
    excl_thread: Option<ThreadId>,
    excl_count: usize,
    /// per-thread shared counts; entries are strictly positive
    shared: HashMap<ThreadId, usize>,
    solo: bool,
}

impl MutexState {
    fn exclusively_locked(&self) -> bool {
        self.excl_count > 0
    }
    fn shared_locked(&self) -> bool {
        !self.shared.is_empty()
    }
    fn exclusively_locked_by(&self, tid: ThreadId) -> bool {
        self.excl_count > 0 && self.excl_thread == Some(tid)
    }
    fn shared_only_by(&self, tid: ThreadId) -> bool {
        self.shared.len() == 1 && self.shared.contains_key(&tid)
    }
    fn can_start_exclusive(&self, policy: Reentrance, tid: ThreadId) -> bool {
        !self.exclusively_locked()
            && (!self.shared_locked()
                || (policy == Reentrance::Full && self.shared_only_by(tid)))
    }
    fn can_increment_exclusive(&self, policy: Reentrance, tid: ThreadId) -> bool {
        policy.recursive()
            && self.exclusively_locked_by(tid)
            && !self.solo
            && (policy != Reentrance::OneWay || !self.shared_locked())
    }
    fn can_exclusive(&self, policy: Reentrance, tid: ThreadId) -> bool {
        self.can_start_exclusive(policy, tid) || self.can_increment_exclusive(policy, tid)
    }
    fn can_shared(&self, policy: Reentrance, tid: ThreadId) -> bool {
        !self.exclusively_locked()
            || (matches!(policy, Reentrance::OneWay | Reentrance::Full)
                && self.exclusively_locked_by(tid))
    }
    fn can_solo(&self) -> bool {
        !self.exclusively_locked() && !self.shared_locked()
    }
    fn take_exclusive(&mut self, tid: ThreadId) {
        if self.exclusively_locked_by(tid) {
            self.excl_count += 1;
        } else {
            self.excl_thread = Some(tid);
            self.excl_count = 1;
        }
    }
    fn take_shared(&mut self, tid: ThreadId) {
        *self.shared.entry(tid).or_insert(0) += 1;
    }
}

#[derive(Debug)]
pub struct SharedMutex {
    state: Mutex<MutexState>,
    cond: Condvar,
    policy: Reentrance,
}

impl SharedMutex {
    pub fn new(policy: Reentrance) -> Self {
        Self {
            state: Mutex::new(MutexState::default()),
            cond: Condvar::new(),
            policy,
        }
    }

    /// Wait on the monitor until `pred` holds or `deadline` passes. Returns
    /// false only if the deadline expired with the predicate still false
    fn wait_until(
        &self,
        state: &mut MutexGuard<'_, MutexState>,
        deadline: Instant,
        pred: impl Fn(&MutexState) -> bool,
    ) -> bool {
        while !pred(&**state) {
            if self.cond.wait_until(state, deadline).timed_out() {
                return pred(&**state);
            }
        }
        true
    }

    /// Exclusive acquire with the caller's blocking parameters. `block=false`
    /// tries once; `block=true` with a positive timeout waits that long;
    /// `block=true` with a zero timeout waits forever
    pub(crate) fn lock_with(&self, block: bool, secs: f64) -> bool {
        let tid = thread::current().id();
        let mut state = self.state.lock();
        if !block {
            if !state.can_exclusive(self.policy, tid) {
                return false;
            }
        } else if secs > 0.0 {
            let deadline = Instant::now() + Duration::from_secs_f64(secs);
            if !self.wait_until(&mut state, deadline, |st| st.can_exclusive(self.policy, tid)) {
                return false;
            }
        } else {
            while !state.can_exclusive(self.policy, tid) {
                self.cond.wait(&mut state);
            }
        }
        state.take_exclusive(tid);
        true
    }

    /// Shared acquire crediting `tid`, with the caller's blocking parameters.
    /// The walker credits the current thread; the rename clone path credits
    /// the original holders
    pub(crate) fn lock_shared_as(&self, tid: ThreadId, block: bool, secs: f64) -> bool {
        let mut state = self.state.lock();
        if !block {
            if !state.can_shared(self.policy, tid) {
                return false;
            }
        } else if secs > 0.0 {
            let deadline = Instant::now() + Duration::from_secs_f64(secs);
            if !self.wait_until(&mut state, deadline, |st| st.can_shared(self.policy, tid)) {
                return false;
            }
        } else {
            while !state.can_shared(self.policy, tid) {
                self.cond.wait(&mut state);
            }
        }
        state.take_shared(tid);
        true
    }

    pub(crate) fn lock_shared_with(&self, block: bool, secs: f64) -> bool {
        self.lock_shared_as(thread::current().id(), block, secs)
    }

    /// Block until the exclusive lock is held
    pub fn lock(&self) {
        self.lock_with(true, 0.0);
    }

    pub fn try_lock(&self) -> bool {
        self.lock_with(false, 0.0)
    }

    pub fn try_lock_for(&self, secs: f64) -> bool {
        if secs > 0.0 {
            self.lock_with(true, secs)
        } else {
            self.try_lock()
        }
    }

    /// Exclusive acquire that succeeds only when no holder of any kind
    /// exists. While held, even the owner thread cannot re-enter
    pub fn try_solo_lock(&self) -> bool {
        let tid = thread::current().id();
        let mut state = self.state.lock();
        if !state.can_solo() {
            return false;
        }
        state.take_exclusive(tid);
        state.solo = true;
        true
    }

    /// Block until a shared lock is held
    pub fn lock_shared(&self) {
        self.lock_shared_with(true, 0.0);
    }

    pub fn try_lock_shared(&self) -> bool {
        self.lock_shared_with(false, 0.0)
    }

    pub fn try_lock_shared_for(&self, secs: f64) -> bool {
        if secs > 0.0 {
            self.lock_shared_with(true, secs)
        } else {
            self.try_lock_shared()
        }
    }

    pub fn unlock(&self) -> LockResult<()> {
        self.unlock_by(thread::current().id())
    }

    /// Release one exclusive count held by `tid`. Fails if the mutex is not
    /// exclusively locked or `tid` is not the owner
    pub fn unlock_by(&self, tid: ThreadId) -> LockResult<()> {
        {
            let mut state = self.state.lock();
            if !state.exclusively_locked() {
                return Err(Error::InvalidUnlock("not exclusively locked"));
            }
            if state.excl_thread != Some(tid) {
                return Err(Error::InvalidUnlock("exclusive unlock from a non-owner thread"));
            }
            state.excl_count -= 1;
            state.solo = false;
        }
        self.cond.notify_all();
        Ok(())
    }

    pub fn unlock_shared(&self) -> LockResult<()> {
        self.unlock_shared_by(thread::current().id())
    }

    /// Release one shared count held by `tid`. Fails if `tid` holds none
    pub fn unlock_shared_by(&self, tid: ThreadId) -> LockResult<()> {
        {
            let mut state = self.state.lock();
            if !state.shared_locked() {
                return Err(Error::InvalidUnlock("not shared locked"));
            }
            let emptied = match state.shared.get_mut(&tid) {
                Some(count) => {
                    *count -= 1;
                    *count == 0
                }
                None => {
                    return Err(Error::InvalidUnlock("shared unlock from a non-holder thread"))
                }
            };
            if emptied {
                state.shared.remove(&tid);
            }
        }
        self.cond.notify_all();
        Ok(())
    }

    /// Release one shared count from whichever thread holds one, preferring
    /// the current thread. Only the rename engine should need this
    pub fn unlock_any_shared(&self) -> LockResult<()> {
        {
            let mut state = self.state.lock();
            let tid = thread::current().id();
            let victim = match state
                .shared
                .keys()
                .find(|holder| **holder == tid)
                .or_else(|| state.shared.keys().next())
            {
                Some(holder) => *holder,
                None => return Err(Error::InvalidUnlock("not shared locked")),
            };
            let emptied = match state.shared.get_mut(&victim) {
                Some(count) => {
                    *count -= 1;
                    *count == 0
                }
                None => return Err(Error::InvalidUnlock("not shared locked")),
            };
            if emptied {
                state.shared.remove(&victim);
            }
        }
        self.cond.notify_all();
        Ok(())
    }

    /// True while any exclusive or shared holder exists
    pub fn is_locked(&self) -> bool {
        let state = self.state.lock();
        state.exclusively_locked() || state.shared_locked()
    }

    /// Snapshot of the current holders: per-thread shared counts plus the
    /// exclusive (thread, depth) if one exists
    fn holders(&self) -> (Vec<(ThreadId, usize)>, Option<(ThreadId, usize)>) {
        let state = self.state.lock();
        let shared = state.shared.iter().map(|(t, c)| (*t, *c)).collect();
        let excl = state
            .excl_thread
            .filter(|_| state.excl_count > 0)
            .map(|t| (t, state.excl_count));
        (shared, excl)
    }

    /// Total hold pressure: the sum of all shared counts plus the exclusive
    /// depth
    fn hold_count(&self) -> usize {
        let state = self.state.lock();
        state.shared.values().sum::<usize>() + state.excl_count
    }

    /// Acquire shared counts on `self` mirroring every hold on `src`: one per
    /// shared count crediting its holder, plus one per exclusive depth
    /// crediting the exclusive owner. Used by rename to transfer a leaf's
    /// lock pressure onto new ancestors
    pub(crate) fn clone_shared_from(&self, src: &SharedMutex, block: bool, secs: f64) -> bool {
        let (shared, excl) = src.holders();
        for (tid, count) in shared {
            for _ in 0..count {
                if !self.lock_shared_as(tid, block, secs) {
                    return false;
                }
            }
        }
        if let Some((tid, depth)) = excl {
            for _ in 0..depth {
                if !self.lock_shared_as(tid, block, secs) {
                    return false;
                }
            }
        }
        true
    }

    /// The inverse of [`Self::clone_shared_from`]: drop as many shared counts
    /// from `self` as `src` currently holds in total
    pub(crate) fn unclone_shared_from(&self, src: &SharedMutex) -> LockResult<()> {
        for _ in 0..src.hold_count() {
            self.unlock_any_shared()?;
        }
        Ok(())
    }
}
