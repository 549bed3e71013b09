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

//! Hash (field → value) operations

use super::keyspace::{page_of, ScanPage};
use super::strings::{format_float, parse_float, parse_int};
use super::{pattern, Coretable, Data, Entry, StoreError, StoreResult, Value};
use std::collections::HashMap;

/// The capability surface for hash command handlers
pub trait HashStore {
    /// `HSET`: returns how many fields were newly created
    fn hash_set(&mut self, key: &[u8], pairs: Vec<(Data, Data)>) -> StoreResult<usize>;
    /// `HGET`
    fn hash_get(&mut self, key: &[u8], field: &[u8]) -> StoreResult<Option<Data>>;
    /// `HDEL`: returns how many fields were removed
    fn hash_del(&mut self, key: &[u8], fields: &[Data]) -> StoreResult<usize>;
    /// `HEXISTS`
    fn hash_has(&mut self, key: &[u8], field: &[u8]) -> StoreResult<bool>;
    /// `HGETALL`, sorted by field for reply determinism
    fn hash_all(&mut self, key: &[u8]) -> StoreResult<Vec<(Data, Data)>>;
    /// `HLEN`: 0 if absent
    fn hash_len(&mut self, key: &[u8]) -> StoreResult<usize>;
    /// `HINCRBY`: errors if the current field value is not integer-formatted
    fn hash_incr_by(&mut self, key: &[u8], field: &[u8], delta: i64) -> StoreResult<i64>;
    /// `HINCRBYFLOAT`
    fn hash_incr_by_float(&mut self, key: &[u8], field: &[u8], delta: f64) -> StoreResult<f64>;
    /// `HSCAN`: pages of `[field, value, field, value, …]`
    fn hash_scan(
        &mut self,
        key: &[u8],
        cursor: u64,
        pattern: Option<&[u8]>,
        count: usize,
    ) -> StoreResult<ScanPage>;
}

impl Coretable {
    fn hash_ref(&mut self, key: &[u8]) -> StoreResult<Option<&HashMap<Data, Data>>> {
        match self.entry(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Hash(fields),
                ..
            }) => Ok(Some(fields)),
            Some(_) => Err(StoreError::WrongType),
        }
    }
    fn hash_mut(&mut self, key: &[u8]) -> StoreResult<Option<&mut HashMap<Data, Data>>> {
        match self.entry_mut(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Hash(fields),
                ..
            }) => Ok(Some(fields)),
            Some(_) => Err(StoreError::WrongType),
        }
    }
    fn hash_mut_or_create(&mut self, key: &[u8]) -> StoreResult<&mut HashMap<Data, Data>> {
        self.expire_if_needed(key);
        let entry = self
            .map
            .entry(Data::copy_from_slice(key))
            .or_insert_with(|| Entry::new(Value::Hash(HashMap::new())));
        match &mut entry.value {
            Value::Hash(fields) => Ok(fields),
            _ => Err(StoreError::WrongType),
        }
    }
}

impl HashStore for Coretable {
    fn hash_set(&mut self, key: &[u8], pairs: Vec<(Data, Data)>) -> StoreResult<usize> {
        let fields = self.hash_mut_or_create(key)?;
        let mut created = 0;
        for (field, value) in pairs {
            if fields.insert(field, value).is_none() {
                created += 1;
            }
        }
        self.bump_version(key);
        Ok(created)
    }
    fn hash_get(&mut self, key: &[u8], field: &[u8]) -> StoreResult<Option<Data>> {
        Ok(self
            .hash_ref(key)?
            .and_then(|fields| fields.get(field).cloned()))
    }
    fn hash_del(&mut self, key: &[u8], doomed: &[Data]) -> StoreResult<usize> {
        let removed = match self.hash_mut(key)? {
            None => return Ok(0),
            Some(fields) => doomed
                .iter()
                .filter(|field| fields.remove(&field[..]).is_some())
                .count(),
        };
        if removed > 0 {
            self.bump_version(key);
            self.drop_if_hollow(key);
        }
        Ok(removed)
    }
    fn hash_has(&mut self, key: &[u8], field: &[u8]) -> StoreResult<bool> {
        Ok(self
            .hash_ref(key)?
            .map(|fields| fields.contains_key(field))
            .unwrap_or(false))
    }
    fn hash_all(&mut self, key: &[u8]) -> StoreResult<Vec<(Data, Data)>> {
        let mut pairs: Vec<(Data, Data)> = self
            .hash_ref(key)?
            .map(|fields| {
                fields
                    .iter()
                    .map(|(field, value)| (field.clone(), value.clone()))
                    .collect()
            })
            .unwrap_or_default();
        pairs.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        Ok(pairs)
    }
    fn hash_len(&mut self, key: &[u8]) -> StoreResult<usize> {
        Ok(self.hash_ref(key)?.map(HashMap::len).unwrap_or(0))
    }
    fn hash_incr_by(&mut self, key: &[u8], field: &[u8], delta: i64) -> StoreResult<i64> {
        let fields = self.hash_mut_or_create(key)?;
        let current = match fields.get(field) {
            Some(value) => parse_int(value)?,
            None => 0,
        };
        let next = current.checked_add(delta).ok_or(StoreError::Overflow)?;
        fields.insert(Data::copy_from_slice(field), Data::from(next.to_string()));
        self.bump_version(key);
        Ok(next)
    }
    fn hash_incr_by_float(&mut self, key: &[u8], field: &[u8], delta: f64) -> StoreResult<f64> {
        let fields = self.hash_mut_or_create(key)?;
        let current = match fields.get(field) {
            Some(value) => parse_float(value)?,
            None => 0.0,
        };
        let next = current + delta;
        if next.is_nan() || next.is_infinite() {
            return Err(StoreError::NotFloat);
        }
        fields.insert(Data::copy_from_slice(field), Data::from(format_float(next)));
        self.bump_version(key);
        Ok(next)
    }
    fn hash_scan(
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
        let mut pairs = self.hash_all(key)?;
        if let Some(p) = pat {
            pairs.retain(|(field, _)| pattern::matches(p, field));
        }
        // page over fields, then interleave values back in
        let fields: Vec<Data> = pairs.iter().map(|(field, _)| field.clone()).collect();
        let page = page_of(fields, cursor, count);
        let mut interleaved = Vec::with_capacity(page.keys.len() * 2);
        for field in page.keys {
            if let Some((_, value)) = pairs.iter().find(|(f, _)| *f == field) {
                interleaved.push(field);
                interleaved.push(value.clone());
            }
        }
        Ok(ScanPage {
            cursor: page.cursor,
            keys: interleaved,
        })
    }
}
