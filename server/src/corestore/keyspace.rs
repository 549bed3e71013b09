/*
 * Created on Fri Feb 09 2024
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

//! Key management: existence, deletion, globbing, TTLs, cursor iteration,
//! renames and copies

use super::{now_millis, pattern, Coretable, Data, StoreError, StoreResult};

/// What `TTL`/`PTTL` observed about a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// The key does not exist (reply `-2`)
    Absent,
    /// The key exists but carries no expiry (reply `-1`)
    NoExpiry,
    /// Milliseconds until the key expires
    Remaining(u64),
}

/// One page of a cursor iteration
#[derive(Debug, PartialEq)]
pub struct ScanPage {
    /// The cursor to pass to the next call; 0 means iteration is complete
    pub cursor: u64,
    pub keys: Vec<Data>,
}

/// Default COUNT when the client omits it or passes zero
pub const SCAN_DEFAULT_COUNT: usize = 10;

/// The capability surface for key management handlers
pub trait KeyspaceStore {
    /// `DEL` one key; returns whether it existed
    fn remove_key(&mut self, key: &[u8]) -> bool;
    /// `EXISTS` one key
    fn key_exists(&mut self, key: &[u8]) -> bool;
    /// `KEYS`: every live key matching the pattern, sorted for determinism
    fn keys_matching(&mut self, pattern: &[u8]) -> Vec<Data>;
    /// `DBSIZE`
    fn db_size(&mut self) -> usize;
    /// `SCAN`: one page of keys over a stable-enough snapshot of the key
    /// list. Cursor 0 both starts and ends the iteration
    fn scan_keys(
        &mut self,
        cursor: u64,
        pattern: Option<&[u8]>,
        count: usize,
        type_filter: Option<&str>,
    ) -> ScanPage;
    /// `TTL`/`PTTL`
    fn ttl_of(&mut self, key: &[u8]) -> Ttl;
    /// `EXPIRE`: attach an absolute expiry; false if the key is absent
    fn expire_key(&mut self, key: &[u8], at_ms: u64) -> bool;
    /// `TYPE`: `"none"` if absent
    fn type_of(&mut self, key: &[u8]) -> &'static str;
    /// `RENAME`: implicitly deletes a pre-existing destination; TTL moves
    /// with the value. Rename-to-self is a no-op
    fn rename_key(&mut self, src: &[u8], dst: &[u8]) -> StoreResult<()>;
    /// `RENAMENX`: false (and no state change) if the destination exists
    fn rename_key_nx(&mut self, src: &[u8], dst: &[u8]) -> StoreResult<bool>;
    /// `COPY`: false if the destination exists and REPLACE was not given
    fn copy_key(&mut self, src: &[u8], dst: &[u8], replace: bool) -> StoreResult<bool>;
}

impl KeyspaceStore for Coretable {
    fn remove_key(&mut self, key: &[u8]) -> bool {
        self.remove(key).is_some()
    }
    fn key_exists(&mut self, key: &[u8]) -> bool {
        self.entry(key).is_some()
    }
    fn keys_matching(&mut self, pat: &[u8]) -> Vec<Data> {
        self.reap_all_expired();
        let mut keys: Vec<Data> = self
            .iter()
            .filter(|(key, _)| pattern::matches(pat, key))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort_unstable();
        keys
    }
    fn db_size(&mut self) -> usize {
        self.live_len()
    }
    fn scan_keys(
        &mut self,
        cursor: u64,
        pat: Option<&[u8]>,
        count: usize,
        type_filter: Option<&str>,
    ) -> ScanPage {
        let count = if count == 0 { SCAN_DEFAULT_COUNT } else { count };
        self.reap_all_expired();
        let mut keys: Vec<Data> = self
            .iter()
            .filter(|(key, entry)| {
                pat.map_or(true, |p| pattern::matches(p, key))
                    && type_filter.map_or(true, |t| entry.value.type_name() == t)
            })
            .map(|(key, _)| key.clone())
            .collect();
        // sorting makes the cursor stable across calls as long as the
        // keyspace holds still; concurrent churn is best-effort by contract
        keys.sort_unstable();
        page_of(keys, cursor, count)
    }
    fn ttl_of(&mut self, key: &[u8]) -> Ttl {
        match self.entry(key) {
            None => Ttl::Absent,
            Some(entry) => match entry.expires_at {
                None => Ttl::NoExpiry,
                Some(at) => Ttl::Remaining(at.saturating_sub(now_millis())),
            },
        }
    }
    fn expire_key(&mut self, key: &[u8], at_ms: u64) -> bool {
        match self.entry_mut(key) {
            None => false,
            Some(entry) => {
                entry.expires_at = Some(at_ms);
                self.bump_version(key);
                true
            }
        }
    }
    fn type_of(&mut self, key: &[u8]) -> &'static str {
        self.entry(key)
            .map(|entry| entry.value.type_name())
            .unwrap_or("none")
    }
    fn rename_key(&mut self, src: &[u8], dst: &[u8]) -> StoreResult<()> {
        if src == dst {
            return if self.key_exists(src) {
                Ok(())
            } else {
                Err(StoreError::NoSuchKey)
            };
        }
        match self.remove(src) {
            Some(entry) => {
                self.put(Data::copy_from_slice(dst), entry);
                Ok(())
            }
            None => Err(StoreError::NoSuchKey),
        }
    }
    fn rename_key_nx(&mut self, src: &[u8], dst: &[u8]) -> StoreResult<bool> {
        if !self.key_exists(src) {
            return Err(StoreError::NoSuchKey);
        }
        if self.key_exists(dst) {
            return Ok(false);
        }
        match self.remove(src) {
            Some(entry) => {
                self.put(Data::copy_from_slice(dst), entry);
                Ok(true)
            }
            None => Err(StoreError::NoSuchKey),
        }
    }
    fn copy_key(&mut self, src: &[u8], dst: &[u8], replace: bool) -> StoreResult<bool> {
        let entry = match self.entry(src) {
            Some(entry) => entry.clone(),
            None => return Err(StoreError::NoSuchKey),
        };
        if src == dst {
            return Ok(false);
        }
        if self.key_exists(dst) && !replace {
            return Ok(false);
        }
        self.put(Data::copy_from_slice(dst), entry);
        Ok(true)
    }
}

/// Slice one page out of a sorted item list, computing the follow-up cursor.
/// Shared by SCAN, SSCAN and HSCAN
pub fn page_of(items: Vec<Data>, cursor: u64, count: usize) -> ScanPage {
    let total = items.len();
    let start = (cursor as usize).min(total);
    let end = start.saturating_add(count).min(total);
    let keys = items
        .into_iter()
        .skip(start)
        .take(end - start)
        .collect();
    let cursor = if end >= total { 0 } else { end as u64 };
    ScanPage { cursor, keys }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corestore::strings::StringStore;

    fn seeded() -> Coretable {
        let mut table = Coretable::new();
        for key in ["user:1", "user:2", "session:1", "plain"] {
            table.set_string(key.into(), "v".into(), None);
        }
        table
    }

    #[test]
    fn del_and_exists() {
        let mut table = seeded();
        assert!(table.key_exists(b"user:1"));
        assert!(table.remove_key(b"user:1"));
        assert!(!table.remove_key(b"user:1"));
        assert!(!table.key_exists(b"user:1"));
    }

    #[test]
    fn keys_globbing() {
        let mut table = seeded();
        assert_eq!(table.keys_matching(b"user:*").len(), 2);
        assert_eq!(table.keys_matching(b"*").len(), 4);
        assert_eq!(table.keys_matching(b"plain").len(), 1);
        assert_eq!(table.keys_matching(b"*:1").len(), 2);
    }

    #[test]
    fn ttl_states() {
        let mut table = seeded();
        assert_eq!(table.ttl_of(b"missing"), Ttl::Absent);
        assert_eq!(table.ttl_of(b"plain"), Ttl::NoExpiry);
        assert!(table.expire_key(b"plain", now_millis() + 10_000));
        assert!(matches!(table.ttl_of(b"plain"), Ttl::Remaining(ms) if ms > 8_000));
        assert!(!table.expire_key(b"missing", now_millis() + 10_000));
    }

    #[test]
    fn expired_key_is_logically_absent() {
        let mut table = seeded();
        table.expire_key(b"plain", now_millis().saturating_sub(5));
        assert_eq!(table.ttl_of(b"plain"), Ttl::Absent);
        assert!(!table.key_exists(b"plain"));
        assert_eq!(table.type_of(b"plain"), "none");
        assert_eq!(table.db_size(), 3);
    }

    #[test]
    fn expiry_observation_bumps_the_version() {
        let mut table = seeded();
        table.expire_key(b"plain", now_millis().saturating_sub(5));
        let version = table.version_of(b"plain");
        assert!(!table.key_exists(b"plain")); // lazy reap happens here
        assert!(table.version_of(b"plain") > version);
    }

    #[test]
    fn rename_moves_value_and_ttl() {
        let mut table = seeded();
        let at = now_millis() + 60_000;
        table.expire_key(b"user:1", at);
        table.rename_key(b"user:1", b"user:9").unwrap();
        assert!(!table.key_exists(b"user:1"));
        assert!(matches!(table.ttl_of(b"user:9"), Ttl::Remaining(_)));
        assert_eq!(
            table.rename_key(b"ghost", b"x"),
            Err(StoreError::NoSuchKey)
        );
        // rename-to-self is an accepted no-op
        table.rename_key(b"user:9", b"user:9").unwrap();
        assert!(table.key_exists(b"user:9"));
    }

    #[test]
    fn rename_nx_refuses_existing_destination() {
        let mut table = seeded();
        assert!(!table.rename_key_nx(b"user:1", b"user:2").unwrap());
        assert!(table.key_exists(b"user:1"));
        assert!(table.rename_key_nx(b"user:1", b"fresh").unwrap());
        assert!(!table.key_exists(b"user:1"));
    }

    #[test]
    fn copy_honors_replace() {
        let mut table = seeded();
        assert!(table.copy_key(b"user:1", b"clone", false).unwrap());
        assert!(table.key_exists(b"user:1"));
        assert!(table.key_exists(b"clone"));
        assert!(!table.copy_key(b"user:2", b"clone", false).unwrap());
        assert!(table.copy_key(b"user:2", b"clone", true).unwrap());
        assert_eq!(
            table.copy_key(b"ghost", b"x", false),
            Err(StoreError::NoSuchKey)
        );
    }

    #[test]
    fn scan_visits_every_key_exactly_once() {
        let mut table = Coretable::new();
        for i in 0..25 {
            table.set_string(format!("key:{i:02}").into(), "v".into(), None);
        }
        let mut seen = Vec::new();
        let mut cursor = 0;
        loop {
            let page = table.scan_keys(cursor, None, 10, None);
            seen.extend(page.keys);
            cursor = page.cursor;
            if cursor == 0 {
                break;
            }
        }
        assert_eq!(seen.len(), 25);
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 25);
    }

    #[test]
    fn scan_filters_by_pattern_and_type() {
        let mut table = seeded();
        use crate::corestore::lists::ListStore;
        table.list_push(b"biglist", vec!["a".into()], false).unwrap();
        let page = table.scan_keys(0, Some(b"user:*"), 100, None);
        assert_eq!(page.keys.len(), 2);
        assert_eq!(page.cursor, 0);
        let page = table.scan_keys(0, None, 100, Some("list"));
        assert_eq!(page.keys, vec![Data::from("biglist")]);
    }

    #[test]
    fn scan_count_zero_uses_the_default() {
        let mut table = Coretable::new();
        for i in 0..15 {
            table.set_string(format!("k{i:02}").into(), "v".into(), None);
        }
        let page = table.scan_keys(0, None, 0, None);
        assert_eq!(page.keys.len(), SCAN_DEFAULT_COUNT);
        assert_ne!(page.cursor, 0);
    }
}
