/*
 * Created on Wed Sep 14 2022
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

/// A lazy iterator over the non-empty segments of a separator-delimited path.
/// Leading, trailing and repeated separators never yield empty segments, so
/// `//a//b//` walks the same nodes as `a/b`
#[derive(Debug, Clone)]
pub struct Segments<'a> {
    rem: &'a str,
    sep: char,
}

impl<'a> Segments<'a> {
    pub fn new(path: &'a str, sep: char) -> Self {
        Self {
            rem: path.trim_matches(sep),
            sep,
        }
    }
}

impl<'a> Iterator for Segments<'a> {
    type Item = &'a str;
    fn next(&mut self) -> Option<Self::Item> {
        self.rem = self.rem.trim_start_matches(self.sep);
        if self.rem.is_empty() {
            return None;
        }
        let seg = match self.rem.find(self.sep) {
            Some(idx) => {
                let (seg, rest) = self.rem.split_at(idx);
                self.rem = rest;
                seg
            }
            None => {
                let seg = self.rem;
                self.rem = "";
                seg
            }
        };
        Some(seg)
    }
}
