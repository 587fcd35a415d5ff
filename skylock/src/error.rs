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

use std::fmt;

pub type LockResult<T> = Result<T, Error>;

#[derive(Debug, PartialEq, Eq)]
/// Errors returned by the lock manager
pub enum Error {
    /// A non-blocking or timed acquire ran out of patience while walking a path
    AcquireFailed(&'static str),
    /// The source path passed to a rename has no live leaf node
    RenameSourceMissing,
    /// An unlock was attempted by a thread that holds no matching count, or the
    /// count would underflow
    InvalidUnlock(&'static str),
    /// The flags passed at construction don't name a supported configuration
    ConfigInvalid(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AcquireFailed(reason) => write!(f, "lock failure: {}", reason),
            Self::RenameSourceMissing => write!(f, "lock failure: rename source lock not found"),
            Self::InvalidUnlock(reason) => write!(f, "lock failure: invalid unlock: {}", reason),
            Self::ConfigInvalid(reason) => write!(f, "lock failure: bad configuration: {}", reason),
        }
    }
}

impl std::error::Error for Error {}
