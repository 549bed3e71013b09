/*
 * Created on Tue Feb 13 2024
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

//! Set operations. Membership tests are O(1) expected; an emptied set drops
//! its key

use super::keyspace::{page_of, ScanPage};
use super::{pattern, Coretable, Data, Entry, StoreError, StoreResult, Value};
use std::collections::HashSet;

/// The capability surface for set command handlers
pub trait SetStore {
    /// `SADD`: returns how many members were newly added
    fn set_add(&mut self, key: &[u8], members: Vec<Data>) -> StoreResult<usize>;
    /// `SREM`: returns how many members were removed
    fn set_rem(&mut self, key: &[u8], members: &[Data]) -> StoreResult<usize>;
    /// `SISMEMBER`
    fn set_contains(&mut self, key: &[u8], member: &[u8]) -> StoreResult<bool>;
    /// `SMEMBERS`, sorted for reply determinism
    fn set_members(&mut self, key: &[u8]) -> StoreResult<Vec<Data>>;
    /// `SCARD`: 0 if absent
    fn set_card(&mut self, key: &[u8]) -> StoreResult<usize>;
    /// `SPOP`: removes and returns the lexicographically smallest member.
    /// Deterministic on purpose: the popped command replays identically from
    /// the AOF and on replicas
    fn set_pop(&mut self, key: &[u8]) -> StoreResult<Option<Data>>;
    /// `SSCAN`
    fn set_scan(
        &mut self,
        key: &[u8],
        cursor: u64,
        pattern: Option<&[u8]>,
        count: usize,
    ) -> StoreResult<ScanPage>;
}

impl Coretable {
    fn set_ref(&mut self, key: &[u8]) -> StoreResult<Option<&HashSet<Data>>> {
        match self.entry(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Set(members),
                ..
            }) => Ok(Some(members)),
            Some(_) => Err(StoreError::WrongType),
        }
    }
    fn set_mut(&mut self, key: &[u8]) -> StoreResult<Option<&mut HashSet<Data>>> {
        match self.entry_mut(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Set(members),
                ..
            }) => Ok(Some(members)),
            Some(_) => Err(StoreError::WrongType),
        }
    }
    fn set_mut_or_create(&mut self, key: &[u8]) -> StoreResult<&mut HashSet<Data>> {
        self.expire_if_needed(key);
        let entry = self
            .map
            .entry(Data::copy_from_slice(key))
            .or_insert_with(|| Entry::new(Value::Set(HashSet::new())));
        match &mut entry.value {
            Value::Set(members) => Ok(members),
            _ => Err(StoreError::WrongType),
        }
    }
}

impl SetStore for Coretable {
    fn set_add(&mut self, key: &[u8], members: Vec<Data>) -> StoreResult<usize> {
        let set = self.set_mut_or_create(key)?;
        let mut added = 0;
        for member in members {
            if set.insert(member) {
                added += 1;
            }
        }
        if added > 0 {
            self.bump_version(key);
        }
        Ok(added)
    }
    fn set_rem(&mut self, key: &[u8], members: &[Data]) -> StoreResult<usize> {
        let removed = match self.set_mut(key)? {
            None => return Ok(0),
            Some(set) => members
                .iter()
                .filter(|member| set.remove(&member[..]))
                .count(),
        };
        if removed > 0 {
            self.bump_version(key);
            self.drop_if_hollow(key);
        }
        Ok(removed)
    }
    fn set_contains(&mut self, key: &[u8], member: &[u8]) -> StoreResult<bool> {
        Ok(self
            .set_ref(key)?
            .map(|set| set.contains(member))
            .unwrap_or(false))
    }
    fn set_members(&mut self, key: &[u8]) -> StoreResult<Vec<Data>> {
        let mut members: Vec<Data> = self
            .set_ref(key)?
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        members.sort_unstable();
        Ok(members)
    }
    fn set_card(&mut self, key: &[u8]) -> StoreResult<usize> {
        Ok(self.set_ref(key)?.map(HashSet::len).unwrap_or(0))
    }
    fn set_pop(&mut self, key: &[u8]) -> StoreResult<Option<Data>> {
        let popped = match self.set_mut(key)? {
            None => return Ok(None),
            Some(set) => match set.iter().min().cloned() {
                Some(member) => {
                    set.remove(&member[..]);
                    Some(member)
                }
                None => None,
            },
        };
        if popped.is_some() {
            self.bump_version(key);
            self.drop_if_hollow(key);
        }
        Ok(popped)
    }
    fn set_scan(
        &mut self,
        key: &[u8],
        cursor: u64,
        pat: Option<&[u8]>,
        count: usize,
    ) -> StoreResult<ScanPage> {
        let count = if count == 0 {
            super::keyspace::SCAN_DEFAULT_COUNT
        } else {
            count
        };
        let mut members: Vec<Data> = self
            .set_ref(key)?
            .map(|set| {
                set.iter()
                    .filter(|member| pat.map_or(true, |p| pattern::matches(p, member)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        members.sort_unstable();
        Ok(page_of(members, cursor, count))
    }
}
