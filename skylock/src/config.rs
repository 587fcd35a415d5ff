/*
 * Created on Tue Sep 13 2022
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

//! # Manager configuration
//!
//! A manager is built from a separator character and a flags bitset. The raw
//! bits are validated exactly once, at construction, into a [`Configuration`]
//! that the rest of the crate consumes. Anything the bitset can express that
//! we don't support is rejected here and never gets to run.

use crate::error::{Error, LockResult};
use crate::mutex::Reentrance;

/// Exclusive holds may be re-entered by their owner thread. No escalation
/// from a shared hold, no downgrade to one
pub const RECURSIVE_WRITE: u32 = 1 << 0;
/// Exclusive holds may be re-entered and downgraded to shared, but a shared
/// holder can never go exclusive
pub const RECURSIVE_ONEWAY: u32 = 1 << 1;
/// Full reentrance: both escalation and downgrade on the owner thread
pub const RECURSIVE: u32 = RECURSIVE_WRITE | RECURSIVE_ONEWAY;
/// Shared handles may be released by a thread other than the acquirer
pub const LOOSE_READ_UNLOCK: u32 = 1 << 3;
/// Exclusive handles may be released by a thread other than the acquirer
pub const LOOSE_WRITE_UNLOCK: u32 = 1 << 4;

// bit 2 was once reserved for recursive read-only locks; never shipped
const RECURSIVE_READ: u32 = 1 << 2;
const KNOWN: u32 = RECURSIVE | LOOSE_READ_UNLOCK | LOOSE_WRITE_UNLOCK;

#[derive(Debug, Clone, Copy)]
/// The validated per-manager configuration
pub struct Configuration {
    sep: char,
    reentrance: Reentrance,
    loose_read_unlock: bool,
    loose_write_unlock: bool,
}

impl Configuration {
    /// Validate a raw flags bitset into a [`Configuration`]
    pub fn from_flags(sep: char, flags: u32) -> LockResult<Self> {
        if flags & RECURSIVE_READ != 0 {
            return Err(Error::ConfigInvalid(
                "recursive read-only locks are not supported".to_owned(),
            ));
        }
        if flags & !KNOWN != 0 {
            return Err(Error::ConfigInvalid(format!(
                "unknown flag bits: {:#b}",
                flags & !KNOWN
            )));
        }
        let reentrance = match flags & RECURSIVE {
            0 => Reentrance::Strict,
            RECURSIVE_WRITE => Reentrance::WriteOnly,
            RECURSIVE_ONEWAY => Reentrance::OneWay,
            _ => Reentrance::Full,
        };
        Ok(Self {
            sep,
            reentrance,
            loose_read_unlock: flags & LOOSE_READ_UNLOCK != 0,
            loose_write_unlock: flags & LOOSE_WRITE_UNLOCK != 0,
        })
    }
    pub const fn sep(&self) -> char {
        self.sep
    }
    pub const fn reentrance(&self) -> Reentrance {
        self.reentrance
    }
    pub const fn loose_read_unlock(&self) -> bool {
        self.loose_read_unlock
    }
    pub const fn loose_write_unlock(&self) -> bool {
        self.loose_write_unlock
    }
}
