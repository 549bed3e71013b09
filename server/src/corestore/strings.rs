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

//! String operations

use super::{Coretable, Data, Entry, StoreError, StoreResult, Value};

/// Format a float the way the wire expects it: no trailing zeros, no
/// exponent for the ranges commands produce
pub fn format_float(value: f64) -> String {
    // `{}` on an f64 already prints the shortest round-trip form and drops
    // a trailing `.0` is not produced for integral values
    let mut out = format!("{}", value);
    if out.ends_with(".0") {
        out.truncate(out.len() - 2);
    }
    out
}

/// Parse a strictly integer-formatted blob
pub fn parse_int(raw: &[u8]) -> StoreResult<i64> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or(StoreError::NotInteger)
}

/// Parse a float-formatted blob; NaN is never a valid value
pub fn parse_float(raw: &[u8]) -> StoreResult<f64> {
    let parsed = std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or(StoreError::NotFloat)?;
    if parsed.is_nan() {
        Err(StoreError::NotFloat)
    } else {
        Ok(parsed)
    }
}

/// Clamp the inclusive `(start, end)` range against a length, resolving
/// negative indices from the tail. Returns `None` for an empty slice
pub fn resolve_range(len: usize, start: i64, end: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let mut start = if start < 0 { len + start } else { start };
    let mut end = if end < 0 { len + end } else { end };
    if start < 0 {
        start = 0;
    }
    if end >= len {
        end = len - 1;
    }
    if len == 0 || start > end || start >= len || end < 0 {
        None
    } else {
        Some((start as usize, end as usize))
    }
}

/// The capability surface the string command handlers program against
pub trait StringStore {
    /// `SET`: store a value, replacing any previous entry regardless of its
    /// type, with an optional absolute expiry
    fn set_string(&mut self, key: Data, value: Data, expires_at: Option<u64>);
    /// `GET`: `None` if absent, `WrongType` for non-strings
    fn get_string(&mut self, key: &[u8]) -> StoreResult<Option<Data>>;
    /// `APPEND`: returns the new length, creating the key if needed
    fn append_string(&mut self, key: &[u8], tail: &[u8]) -> StoreResult<usize>;
    /// `STRLEN`: 0 if absent
    fn strlen(&mut self, key: &[u8]) -> StoreResult<usize>;
    /// `GETRANGE` with inclusive, tail-relative indices
    fn getrange(&mut self, key: &[u8], start: i64, end: i64) -> StoreResult<Data>;
    /// `INCR`/`DECR`/`INCRBY`/`DECRBY`: the current value must be strictly
    /// integer-formatted. The prior value is retained on overflow
    fn incr_by(&mut self, key: &[u8], delta: i64) -> StoreResult<i64>;
    /// `INCRBYFLOAT`
    fn incr_by_float(&mut self, key: &[u8], delta: f64) -> StoreResult<f64>;
}

impl Coretable {
    fn string_ref(&mut self, key: &[u8]) -> StoreResult<Option<&Data>> {
        match self.entry(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Str(s),
                ..
            }) => Ok(Some(s)),
            Some(_) => Err(StoreError::WrongType),
        }
    }
}

impl StringStore for Coretable {
    fn set_string(&mut self, key: Data, value: Data, expires_at: Option<u64>) {
        self.put(key, Entry::with_expiry(Value::Str(value), expires_at));
    }
    fn get_string(&mut self, key: &[u8]) -> StoreResult<Option<Data>> {
        Ok(self.string_ref(key)?.cloned())
    }
    fn append_string(&mut self, key: &[u8], tail: &[u8]) -> StoreResult<usize> {
        match self.entry_mut(key) {
            None => {
                let value = Data::copy_from_slice(tail);
                let len = value.len();
                self.put(Data::copy_from_slice(key), Entry::new(Value::Str(value)));
                Ok(len)
            }
            Some(Entry {
                value: Value::Str(current),
                ..
            }) => {
                let mut joined = Vec::with_capacity(current.len() + tail.len());
                joined.extend_from_slice(current);
                joined.extend_from_slice(tail);
                let len = joined.len();
                *current = Data::from(joined);
                self.bump_version(key);
                Ok(len)
            }
            Some(_) => Err(StoreError::WrongType),
        }
    }
    fn strlen(&mut self, key: &[u8]) -> StoreResult<usize> {
        Ok(self.string_ref(key)?.map(Data::len).unwrap_or(0))
    }
    fn getrange(&mut self, key: &[u8], start: i64, end: i64) -> StoreResult<Data> {
        let value = match self.string_ref(key)? {
            Some(value) => value,
            None => return Ok(Data::default()),
        };
        match resolve_range(value.len(), start, end) {
            Some((from, to)) => Ok(Data::copy_from_slice(&value[from..=to])),
            None => Ok(Data::default()),
        }
    }
    fn incr_by(&mut self, key: &[u8], delta: i64) -> StoreResult<i64> {
        let current = match self.string_ref(key)? {
            Some(value) => parse_int(value)?,
            None => 0,
        };
        // detect overflow before mutating so the prior value survives
        let next = current.checked_add(delta).ok_or(StoreError::Overflow)?;
        let expiry = self.expiry_of(key);
        self.set_string(
            Data::copy_from_slice(key),
            Data::from(next.to_string()),
            expiry,
        );
        Ok(next)
    }
    fn incr_by_float(&mut self, key: &[u8], delta: f64) -> StoreResult<f64> {
        let current = match self.string_ref(key)? {
            Some(value) => parse_float(value)?,
            None => 0.0,
        };
        let next = current + delta;
        if next.is_nan() || next.is_infinite() {
            return Err(StoreError::NotFloat);
        }
        let expiry = self.expiry_of(key);
        self.set_string(
            Data::copy_from_slice(key),
            Data::from(format_float(next)),
            expiry,
        );
        Ok(next)
    }
}
