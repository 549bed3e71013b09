/*
 * Created on Thu Feb 15 2024
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

//! Streams: append-only logs of (id, field map) entries, totally ordered by
//! the (ms, seq) id pair. A stream keeps its identity — and its high-water
//! `last_id` — even when every entry has been deleted

use super::{now_millis, Coretable, Data, Entry, StoreError, StoreResult, Value};
use std::fmt;

/// A stream entry id: milliseconds paired with a per-millisecond sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct StreamId {
    pub ms: u64,
    pub seq: u64,
}

impl StreamId {
    pub const ZERO: StreamId = StreamId { ms: 0, seq: 0 };
    pub const MAX: StreamId = StreamId {
        ms: u64::MAX,
        seq: u64::MAX,
    };
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

/// How the caller of XADD named the new id
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IdSpec {
    /// `*`: derive from the clock and the stream tip
    Auto,
    /// `<ms>-*`: pin the ms part, derive the sequence
    AutoSeq(u64),
    /// A fully explicit id. A bare `<ms>` is shorthand for `<ms>-0`
    Explicit(StreamId),
}

/// Parse an XADD id argument
pub fn parse_id_spec(raw: &[u8]) -> StoreResult<IdSpec> {
    if raw == b"*" {
        return Ok(IdSpec::Auto);
    }
    let text = std::str::from_utf8(raw).map_err(|_| StoreError::InvalidStreamId)?;
    match text.split_once('-') {
        Some((ms, "*")) => {
            let ms = ms.parse().map_err(|_| StoreError::InvalidStreamId)?;
            Ok(IdSpec::AutoSeq(ms))
        }
        Some((ms, seq)) => {
            let ms = ms.parse().map_err(|_| StoreError::InvalidStreamId)?;
            let seq = seq.parse().map_err(|_| StoreError::InvalidStreamId)?;
            Ok(IdSpec::Explicit(StreamId { ms, seq }))
        }
        None => {
            let ms = text.parse().map_err(|_| StoreError::InvalidStreamId)?;
            Ok(IdSpec::Explicit(StreamId { ms, seq: 0 }))
        }
    }
}

/// Parse an XRANGE/XREAD bound. `-` and `+` name the extremes; a bare `<ms>`
/// resolves to the start (`seq 0`) or end (`seq max`) of that millisecond
/// depending on which side of the range it sits on
pub fn parse_range_bound(raw: &[u8], is_end: bool) -> StoreResult<StreamId> {
    match raw {
        b"-" => return Ok(StreamId::ZERO),
        b"+" => return Ok(StreamId::MAX),
        _ => {}
    }
    let text = std::str::from_utf8(raw).map_err(|_| StoreError::InvalidStreamId)?;
    match text.split_once('-') {
        Some((ms, seq)) => {
            let ms = ms.parse().map_err(|_| StoreError::InvalidStreamId)?;
            let seq = seq.parse().map_err(|_| StoreError::InvalidStreamId)?;
            Ok(StreamId { ms, seq })
        }
        None => {
            let ms = text.parse().map_err(|_| StoreError::InvalidStreamId)?;
            Ok(StreamId {
                ms,
                seq: if is_end { u64::MAX } else { 0 },
            })
        }
    }
}

/// One entry: an id plus its field/value pairs in insertion order
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEntry {
    pub id: StreamId,
    pub fields: Vec<(Data, Data)>,
}

/// The stream structure. Entries are held in id order; `last_id` only ever
/// moves forward, even across XDEL/XTRIM
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stream {
    entries: Vec<StreamEntry>,
    last_id: StreamId,
}

impl Stream {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn len(&self) -> usize {
        self.entries.len()
    }
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
    pub const fn last_id(&self) -> StreamId {
        self.last_id
    }
    /// Used by persistence restore to rebuild the high-water mark
    pub fn restore(entries: Vec<StreamEntry>, last_id: StreamId) -> Self {
        Self { entries, last_id }
    }
    /// Append an entry, resolving the id spec against the tip. An explicit
    /// id must strictly exceed `last_id` and may not be `0-0`
    pub fn append(&mut self, spec: IdSpec, fields: Vec<(Data, Data)>) -> StoreResult<StreamId> {
        let id = match spec {
            IdSpec::Auto => {
                let now = now_millis().max(self.last_id.ms);
                if now == self.last_id.ms {
                    StreamId {
                        ms: now,
                        seq: self.last_id.seq.checked_add(1).ok_or(StoreError::StreamIdTooSmall)?,
                    }
                } else {
                    StreamId { ms: now, seq: 0 }
                }
            }
            IdSpec::AutoSeq(ms) => {
                if ms < self.last_id.ms {
                    return Err(StoreError::StreamIdTooSmall);
                }
                if ms == self.last_id.ms {
                    StreamId {
                        ms,
                        seq: self.last_id.seq.checked_add(1).ok_or(StoreError::StreamIdTooSmall)?,
                    }
                } else {
                    StreamId { ms, seq: 0 }
                }
            }
            IdSpec::Explicit(id) => {
                // 0-0 is forbidden outright and is also <= the initial tip
                if id <= self.last_id {
                    return Err(StoreError::StreamIdTooSmall);
                }
                id
            }
        };
        self.entries.push(StreamEntry { id, fields });
        self.last_id = id;
        Ok(id)
    }
    /// Entries with `start <= id <= end`, up to `count` (0 = unlimited)
    pub fn range(&self, start: StreamId, end: StreamId, count: usize) -> Vec<StreamEntry> {
        let limit = if count == 0 { usize::MAX } else { count };
        self.entries
            .iter()
            .filter(|entry| entry.id >= start && entry.id <= end)
            .take(limit)
            .cloned()
            .collect()
    }
    /// Entries strictly after `after`, up to `count` (0 = unlimited)
    pub fn read_after(&self, after: StreamId, count: usize) -> Vec<StreamEntry> {
        let limit = if count == 0 { usize::MAX } else { count };
        self.entries
            .iter()
            .filter(|entry| entry.id > after)
            .take(limit)
            .cloned()
            .collect()
    }
    /// Delete entries by exact id; returns how many existed
    pub fn delete(&mut self, ids: &[StreamId]) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| !ids.contains(&entry.id));
        before - self.entries.len()
    }
    /// Trim the stream down to its newest `maxlen` entries; returns how many
    /// were evicted
    pub fn trim_maxlen(&mut self, maxlen: usize) -> usize {
        if self.entries.len() <= maxlen {
            return 0;
        }
        let evict = self.entries.len() - maxlen;
        self.entries.drain(..evict);
        evict
    }
    pub fn iter(&self) -> impl Iterator<Item = &StreamEntry> {
        self.entries.iter()
    }
    pub fn mem_usage(&self) -> usize {
        self.entries
            .iter()
            .map(|entry| {
                16 + entry
                    .fields
                    .iter()
                    .map(|(field, value)| field.len() + value.len() + 32)
                    .sum::<usize>()
            })
            .sum()
    }
}

/// The capability surface for stream command handlers
pub trait StreamStore {
    /// `XADD`
    fn stream_add(
        &mut self,
        key: &[u8],
        spec: IdSpec,
        fields: Vec<(Data, Data)>,
    ) -> StoreResult<StreamId>;
    /// `XLEN`: 0 if absent
    fn stream_len(&mut self, key: &[u8]) -> StoreResult<usize>;
    /// `XRANGE`
    fn stream_range(
        &mut self,
        key: &[u8],
        start: StreamId,
        end: StreamId,
        count: usize,
    ) -> StoreResult<Vec<StreamEntry>>;
    /// `XDEL`
    fn stream_del(&mut self, key: &[u8], ids: &[StreamId]) -> StoreResult<usize>;
    /// `XTRIM ... MAXLEN n`
    fn stream_trim(&mut self, key: &[u8], maxlen: usize) -> StoreResult<usize>;
    /// `XREAD`: entries strictly after `after`
    fn stream_read_after(
        &mut self,
        key: &[u8],
        after: StreamId,
        count: usize,
    ) -> StoreResult<Vec<StreamEntry>>;
}

impl Coretable {
    fn stream_ref(&mut self, key: &[u8]) -> StoreResult<Option<&Stream>> {
        match self.entry(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Stream(stream),
                ..
            }) => Ok(Some(stream)),
            Some(_) => Err(StoreError::WrongType),
        }
    }
    fn stream_mut(&mut self, key: &[u8]) -> StoreResult<Option<&mut Stream>> {
        match self.entry_mut(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Stream(stream),
                ..
            }) => Ok(Some(stream)),
            Some(_) => Err(StoreError::WrongType),
        }
    }
    fn stream_mut_or_create(&mut self, key: &[u8]) -> StoreResult<&mut Stream> {
        self.expire_if_needed(key);
        let entry = self
            .map
            .entry(Data::copy_from_slice(key))
            .or_insert_with(|| Entry::new(Value::Stream(Stream::new())));
        match &mut entry.value {
            Value::Stream(stream) => Ok(stream),
            _ => Err(StoreError::WrongType),
        }
    }
}

impl StreamStore for Coretable {
    fn stream_add(
        &mut self,
        key: &[u8],
        spec: IdSpec,
        fields: Vec<(Data, Data)>,
    ) -> StoreResult<StreamId> {
        let created = self.entry(key).is_none();
        let outcome = self.stream_mut_or_create(key)?.append(spec, fields);
        match outcome {
            Ok(id) => {
                self.bump_version(key);
                Ok(id)
            }
            Err(e) => {
                // an XADD that failed on a fresh key must not leave an
                // empty stream behind
                if created {
                    self.map.remove(key);
                }
                Err(e)
            }
        }
    }
    fn stream_len(&mut self, key: &[u8]) -> StoreResult<usize> {
        Ok(self.stream_ref(key)?.map(Stream::len).unwrap_or(0))
    }
    fn stream_range(
        &mut self,
        key: &[u8],
        start: StreamId,
        end: StreamId,
        count: usize,
    ) -> StoreResult<Vec<StreamEntry>> {
        Ok(self
            .stream_ref(key)?
            .map(|stream| stream.range(start, end, count))
            .unwrap_or_default())
    }
    fn stream_del(&mut self, key: &[u8], ids: &[StreamId]) -> StoreResult<usize> {
        let deleted = match self.stream_mut(key)? {
            None => return Ok(0),
            Some(stream) => stream.delete(ids),
        };
        if deleted > 0 {
            self.bump_version(key);
        }
        Ok(deleted)
    }
    fn stream_trim(&mut self, key: &[u8], maxlen: usize) -> StoreResult<usize> {
        let evicted = match self.stream_mut(key)? {
            None => return Ok(0),
            Some(stream) => stream.trim_maxlen(maxlen),
        };
        if evicted > 0 {
            self.bump_version(key);
        }
        Ok(evicted)
    }
    fn stream_read_after(
        &mut self,
        key: &[u8],
        after: StreamId,
        count: usize,
    ) -> StoreResult<Vec<StreamEntry>> {
        Ok(self
            .stream_ref(key)?
            .map(|stream| stream.read_after(after, count))
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> Vec<(Data, Data)> {
        pairs
            .iter()
            .map(|(field, value)| (Data::from(*field), Data::from(*value)))
            .collect()
    }

    fn id(ms: u64, seq: u64) -> StreamId {
        StreamId { ms, seq }
    }

    #[test]
    fn id_parsing() {
        assert_eq!(parse_id_spec(b"*").unwrap(), IdSpec::Auto);
        assert_eq!(parse_id_spec(b"1000-2").unwrap(), IdSpec::Explicit(id(1000, 2)));
        assert_eq!(parse_id_spec(b"1000").unwrap(), IdSpec::Explicit(id(1000, 0)));
        assert_eq!(parse_id_spec(b"1000-*").unwrap(), IdSpec::AutoSeq(1000));
        assert_eq!(parse_id_spec(b"abc"), Err(StoreError::InvalidStreamId));
        assert_eq!(parse_id_spec(b"1-2-3"), Err(StoreError::InvalidStreamId));
    }

    #[test]
    fn range_bound_parsing() {
        assert_eq!(parse_range_bound(b"-", false).unwrap(), StreamId::ZERO);
        assert_eq!(parse_range_bound(b"+", true).unwrap(), StreamId::MAX);
        assert_eq!(parse_range_bound(b"5", false).unwrap(), id(5, 0));
        assert_eq!(parse_range_bound(b"5", true).unwrap(), id(5, u64::MAX));
        assert_eq!(parse_range_bound(b"5-3", true).unwrap(), id(5, 3));
    }

    #[test]
    fn explicit_ids_must_advance() {
        let mut table = Coretable::new();
        let first = table
            .stream_add(b"s", IdSpec::Explicit(id(1000, 0)), fields(&[("f", "v")]))
            .unwrap();
        assert_eq!(first, id(1000, 0));
        assert_eq!(
            table.stream_add(b"s", IdSpec::Explicit(id(1000, 0)), fields(&[("f", "v")])),
            Err(StoreError::StreamIdTooSmall)
        );
        assert_eq!(
            table.stream_add(b"s", IdSpec::Explicit(id(999, 9)), fields(&[("f", "v")])),
            Err(StoreError::StreamIdTooSmall)
        );
        assert_eq!(table.stream_len(b"s").unwrap(), 1);
        table
            .stream_add(b"s", IdSpec::Explicit(id(1000, 1)), fields(&[("f", "v")]))
            .unwrap();
    }

    #[test]
    fn zero_zero_is_never_insertable() {
        let mut table = Coretable::new();
        assert_eq!(
            table.stream_add(b"s", IdSpec::Explicit(StreamId::ZERO), fields(&[("f", "v")])),
            Err(StoreError::StreamIdTooSmall)
        );
        use crate::corestore::keyspace::KeyspaceStore;
        assert!(!table.key_exists(b"s"));
    }

    #[test]
    fn auto_ids_are_monotonic() {
        let mut stream = Stream::new();
        let a = stream.append(IdSpec::Auto, fields(&[("f", "1")])).unwrap();
        let b = stream.append(IdSpec::Auto, fields(&[("f", "2")])).unwrap();
        assert!(b > a);
        // auto after an explicit far-future id keeps advancing
        let far = id(u64::MAX - 1, 0);
        let mut stream = Stream::new();
        stream.append(IdSpec::Explicit(far), fields(&[("f", "v")])).unwrap();
        let next = stream.append(IdSpec::Auto, fields(&[("f", "v")])).unwrap();
        assert!(next > far);
    }

    #[test]
    fn auto_seq_pins_the_ms_part() {
        let mut stream = Stream::new();
        assert_eq!(
            stream.append(IdSpec::AutoSeq(5), fields(&[("f", "v")])).unwrap(),
            id(5, 0)
        );
        assert_eq!(
            stream.append(IdSpec::AutoSeq(5), fields(&[("f", "v")])).unwrap(),
            id(5, 1)
        );
        assert_eq!(
            stream.append(IdSpec::AutoSeq(4), fields(&[("f", "v")])),
            Err(StoreError::StreamIdTooSmall)
        );
    }

    #[test]
    fn range_and_read_after() {
        let mut table = Coretable::new();
        for ms in [1000u64, 2000, 3000] {
            table
                .stream_add(b"s", IdSpec::Explicit(id(ms, 0)), fields(&[("f", "v")]))
                .unwrap();
        }
        let all = table
            .stream_range(b"s", StreamId::ZERO, StreamId::MAX, 0)
            .unwrap();
        assert_eq!(all.len(), 3);
        let window = table
            .stream_range(b"s", id(1500, 0), id(2500, 0), 0)
            .unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].id, id(2000, 0));
        let after = table.stream_read_after(b"s", id(1000, 0), 0).unwrap();
        assert_eq!(after.len(), 2);
        let capped = table.stream_read_after(b"s", StreamId::ZERO, 1).unwrap();
        assert_eq!(capped.len(), 1);
    }

    #[test]
    fn delete_and_trim() {
        let mut table = Coretable::new();
        for ms in 1..=5u64 {
            table
                .stream_add(b"s", IdSpec::Explicit(id(ms, 0)), fields(&[("f", "v")]))
                .unwrap();
        }
        assert_eq!(table.stream_del(b"s", &[id(2, 0), id(9, 9)]).unwrap(), 1);
        assert_eq!(table.stream_len(b"s").unwrap(), 4);
        assert_eq!(table.stream_trim(b"s", 2).unwrap(), 2);
        assert_eq!(table.stream_len(b"s").unwrap(), 2);
        // the newest entries survive a trim
        let rest = table
            .stream_range(b"s", StreamId::ZERO, StreamId::MAX, 0)
            .unwrap();
        assert_eq!(rest[0].id, id(4, 0));
        assert_eq!(rest[1].id, id(5, 0));
    }

    #[test]
    fn last_id_survives_deletion() {
        let mut table = Coretable::new();
        table
            .stream_add(b"s", IdSpec::Explicit(id(10, 0)), fields(&[("f", "v")]))
            .unwrap();
        table.stream_del(b"s", &[id(10, 0)]).unwrap();
        assert_eq!(table.stream_len(b"s").unwrap(), 0);
        // the tombstoned id still gates new inserts
        assert_eq!(
            table.stream_add(b"s", IdSpec::Explicit(id(10, 0)), fields(&[("f", "v")])),
            Err(StoreError::StreamIdTooSmall)
        );
    }
}
