/*
 * Created on Wed Feb 07 2024
 *
 * This file is a part of Cinnabar
 * Cinnabar is a free and open-source Redis-compatible in-memory key/value
 * store that speaks RESP2 over TCP, with append-only-file and snapshot
 * persistence and asynchronous primary/replica replication.
 *
 * Copyright (c) 2024, The Cinnabar developers
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

use bytes::Bytes;
use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;

/// A binary-safe blob: the unit of keys, values, members and fields across
/// every data type. Cloning is a cheap reference count bump
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Data {
    blob: Bytes,
}

impl Data {
    /// Create a blob by copying a slice
    pub fn copy_from_slice(slice: &[u8]) -> Self {
        Self {
            blob: Bytes::copy_from_slice(slice),
        }
    }
    /// Create a blob from an existing `Bytes` handle (zero-copy)
    pub const fn from_blob(blob: Bytes) -> Self {
        Self { blob }
    }
    /// The raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.blob
    }
    /// The inner `Bytes` handle
    pub fn into_blob(self) -> Bytes {
        self.blob
    }
    pub fn len(&self) -> usize {
        self.blob.len()
    }
    pub fn is_empty(&self) -> bool {
        self.blob.is_empty()
    }
}

// Hash must agree with `Borrow<[u8]>` so maps keyed by `Data` can be probed
// with plain slices
impl Hash for Data {
    fn hash<H: Hasher>(&self, state: &mut H) {
        <[u8] as Hash>::hash(&self.blob, state)
    }
}

impl Borrow<[u8]> for Data {
    fn borrow(&self) -> &[u8] {
        &self.blob
    }
}

impl Deref for Data {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.blob
    }
}

impl PartialOrd for Data {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Data {
    fn cmp(&self, other: &Self) -> Ordering {
        self.blob.as_ref().cmp(other.blob.as_ref())
    }
}

impl fmt::Debug for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Data({:?})", String::from_utf8_lossy(&self.blob))
    }
}

impl From<&[u8]> for Data {
    fn from(slice: &[u8]) -> Self {
        Self::copy_from_slice(slice)
    }
}

impl From<&str> for Data {
    fn from(string: &str) -> Self {
        Self::copy_from_slice(string.as_bytes())
    }
}

impl From<Bytes> for Data {
    fn from(blob: Bytes) -> Self {
        Self::from_blob(blob)
    }
}

impl From<Vec<u8>> for Data {
    fn from(vec: Vec<u8>) -> Self {
        Self::from_blob(Bytes::from(vec))
    }
}

impl From<String> for Data {
    fn from(string: String) -> Self {
        Self::from_blob(Bytes::from(string.into_bytes()))
    }
}
