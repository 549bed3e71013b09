/*
 * Created on Thu Feb 08 2024
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

//! # The core in-memory engine
//!
//! A [`Corestore`] is a cheaply clonable handle to the shared table. The
//! table itself — a [`Coretable`] — owns every value, the per-key expiry
//! instants and the per-key monotonic version counters that back `WATCH`.
//!
//! Expiration is lazy: any operation that touches a key first checks its
//! expiry and reaps it if it lies in the past. Reaping is an observable
//! mutation and bumps the key version. A periodic sweeper (see
//! `services::expiry_sweeper`) additionally reaps keys nobody touches.

pub mod data;
pub mod hashes;
pub mod keyspace;
pub mod lists;
pub mod pattern;
pub mod sets;
pub mod stream;
pub mod strings;
pub mod value;
pub mod zset;

pub use data::Data;
pub use value::Value;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the UNIX epoch
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}

/// Errors a store operation can produce. The action layer maps each of these
/// onto its stable client-visible message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// The key holds a value of another type
    WrongType,
    /// The stored value (or an argument) is not integer-formatted
    NotInteger,
    /// The stored value (or an argument) is not float-formatted
    NotFloat,
    /// The increment/decrement would leave the 64-bit range
    Overflow,
    /// The source key of a rename/copy does not exist
    NoSuchKey,
    /// An index addressed a position outside the list
    IndexOutOfRange,
    /// An explicit stream id does not advance the stream
    StreamIdTooSmall,
    /// A stream id could not be parsed
    InvalidStreamId,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self {
            StoreError::WrongType => "wrong type",
            StoreError::NotInteger => "not an integer",
            StoreError::NotFloat => "not a float",
            StoreError::Overflow => "integer overflow",
            StoreError::NoSuchKey => "no such key",
            StoreError::IndexOutOfRange => "index out of range",
            StoreError::StreamIdTooSmall => "stream id does not advance the stream",
            StoreError::InvalidStreamId => "invalid stream id",
        };
        f.write_str(what)
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A stored value along with its optional absolute expiry (ms since epoch)
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub value: Value,
    pub expires_at: Option<u64>,
}

impl Entry {
    pub const fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }
    pub const fn with_expiry(value: Value, expires_at: Option<u64>) -> Self {
        Self { value, expires_at }
    }
    fn is_expired(&self, now: u64) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

/// The table holding every key. All access happens under the [`Shared`]
/// lock; the methods here and in the per-family modules assume exclusion
/// has already been arranged
#[derive(Debug, Default)]
pub struct Coretable {
    map: HashMap<Data, Entry>,
    /// Key versions survive deletion so a WATCH taken before a DEL still
    /// observes the mutation
    versions: HashMap<Data, u64>,
}

impl Coretable {
    pub fn new() -> Self {
        Self::default()
    }
    /// Record an observable mutation of `key`
    pub fn bump_version(&mut self, key: &[u8]) {
        match self.versions.get_mut(key) {
            Some(version) => *version += 1,
            None => {
                self.versions.insert(Data::copy_from_slice(key), 1);
            }
        }
    }
    /// The current version of `key`. Keys never written are at version 0
    pub fn version_of(&self, key: &[u8]) -> u64 {
        self.versions.get(key).copied().unwrap_or(0)
    }
    /// Reap `key` if its expiry lies in the past. Returns true if the key
    /// was reaped. Reaping bumps the version
    pub fn expire_if_needed(&mut self, key: &[u8]) -> bool {
        let now = now_millis();
        let expired = matches!(self.map.get(key), Some(entry) if entry.is_expired(now));
        if expired {
            self.map.remove(key);
            self.bump_version(key);
        }
        expired
    }
    /// Look up a live entry
    pub fn entry(&mut self, key: &[u8]) -> Option<&Entry> {
        self.expire_if_needed(key);
        self.map.get(key)
    }
    /// Look up a live entry mutably. The caller is responsible for bumping
    /// the version if it mutates
    pub fn entry_mut(&mut self, key: &[u8]) -> Option<&mut Entry> {
        self.expire_if_needed(key);
        self.map.get_mut(key)
    }
    /// Insert or replace an entry wholesale, bumping the version
    pub fn put(&mut self, key: Data, entry: Entry) {
        self.bump_version(&key);
        self.map.insert(key, entry);
    }
    /// Remove an entry, bumping the version if it existed
    pub fn remove(&mut self, key: &[u8]) -> Option<Entry> {
        self.expire_if_needed(key);
        let removed = self.map.remove(key);
        if removed.is_some() {
            self.bump_version(key);
        }
        removed
    }
    /// Drop a collection entry that emptied out. Internal bookkeeping after
    /// pops and removals; the caller already bumped the version
    pub(in crate::corestore) fn drop_if_hollow(&mut self, key: &[u8]) {
        if matches!(self.map.get(key), Some(entry) if entry.value.is_hollow()) {
            self.map.remove(key);
        }
    }
    /// The expiry currently attached to `key`, if any. Counter writes carry
    /// it over instead of clearing it
    pub fn expiry_of(&self, key: &[u8]) -> Option<u64> {
        self.map.get(key).and_then(|entry| entry.expires_at)
    }
    /// The number of keys, counting only live (non-expired) entries
    pub fn live_len(&mut self) -> usize {
        self.reap_all_expired();
        self.map.len()
    }
    /// The raw number of entries, expired or not. Used by persistence
    pub fn raw_len(&self) -> usize {
        self.map.len()
    }
    /// Iterate over all entries (including not-yet-reaped expired ones).
    /// Used by persistence and replication snapshots
    pub fn iter(&self) -> impl Iterator<Item = (&Data, &Entry)> {
        self.map.iter()
    }
    /// Reap every expired key. Returns the number reaped
    pub fn reap_all_expired(&mut self) -> usize {
        let now = now_millis();
        let doomed: Vec<Data> = self
            .map
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        let count = doomed.len();
        for key in doomed {
            self.map.remove(&key[..]);
            self.bump_version(&key);
        }
        count
    }
    /// Clear all keys in one observable step. Every existing key's version
    /// is bumped so pending WATCHes are invalidated
    pub fn flush_all(&mut self) {
        let keys: Vec<Data> = self.map.keys().cloned().collect();
        for key in &keys {
            self.bump_version(key);
        }
        self.map.clear();
    }
    /// Total payload estimate across all entries, for `MEMORY STATS`
    pub fn mem_usage_total(&self) -> usize {
        self.map
            .iter()
            .map(|(key, entry)| key.len() + entry.value.mem_usage())
            .sum()
    }
    /// Count of keys that carry an expiry, for the `Keyspace` INFO section
    pub fn volatile_len(&self) -> usize {
        self.map
            .values()
            .filter(|entry| entry.expires_at.is_some())
            .count()
    }
}

/// The shared state behind every [`Corestore`] handle
#[derive(Debug)]
pub struct Shared {
    pub table: RwLock<Coretable>,
}

/// A thread-safe handle to the database; cloning gives another atomic
/// reference to the same shared table
#[derive(Debug, Clone)]
pub struct Corestore {
    shared: Arc<Shared>,
}

impl Default for Corestore {
    fn default() -> Self {
        Self::new()
    }
}

impl Corestore {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                table: RwLock::new(Coretable::new()),
            }),
        }
    }
    /// Acquire the write-exclusive discipline. Every command (and a whole
    /// EXEC block) runs under this guard; persistence and replication
    /// propagate while it is held so their order equals the write order
    pub fn write(&self) -> RwLockWriteGuard<'_, Coretable> {
        self.shared.table.write()
    }
    /// Acquire shared read access. Used by snapshotting and INFO, which
    /// never mutate
    pub fn read(&self) -> RwLockReadGuard<'_, Coretable> {
        self.shared.table.read()
    }
}
