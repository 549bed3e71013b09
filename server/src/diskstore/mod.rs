/*
 * Created on Fri Mar 01 2024
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

//! # Disk persistence
//!
//! Two artifacts live in the configured data directory:
//!
//! - `cinnabar.flake` — the point-in-time snapshot ("flake") of the full
//!   dataset: a checksummed, length-prefixed binary encoding of every entry
//!   with its expiry. Snapshots are written to a temporary file first and
//!   renamed into place, so a crash mid-save never clobbers the previous one.
//! - `cinnabar.aof` — the append-only file: committed write commands as RESP
//!   arrays, replayed through normal dispatch at startup (after the flake).
//!
//! The same flake body doubles as the payload a primary ships to a replica
//! during FULLRESYNC.

pub mod aof;

use crate::corestore::stream::{Stream, StreamEntry, StreamId};
use crate::corestore::zset::Zset;
use crate::corestore::{Coretable, Data, Entry, Value};
use crate::util::error::{CinResult, Error};
use crc::{Crc, CRC_32_ISO_HDLC};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

/// The snapshot file name
pub const FLAKE_FILE: &str = "cinnabar.flake";
/// Snapshots are staged here and renamed over [`FLAKE_FILE`]
const FLAKE_TEMP_FILE: &str = "__cinnabar_flake.tmp";
const FLAKE_MAGIC: [u8; 8] = *b"CINFLAKE";
const FLAKE_VERSION: u32 = 1;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

mod tag {
    pub const STRING: u8 = 0;
    pub const LIST: u8 = 1;
    pub const SET: u8 = 2;
    pub const HASH: u8 = 3;
    pub const ZSET: u8 = 4;
    pub const STREAM: u8 = 5;
}

// ---------------------------------------------------------------------------
// encoding

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_u64(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_blob(out: &mut Vec<u8>, blob: &[u8]) {
    put_u32(out, blob.len() as u32);
    out.extend_from_slice(blob);
}

fn encode_value(out: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Str(s) => {
            out.push(tag::STRING);
            put_blob(out, s);
        }
        Value::List(items) => {
            out.push(tag::LIST);
            put_u32(out, items.len() as u32);
            for item in items {
                put_blob(out, item);
            }
        }
        Value::Set(members) => {
            out.push(tag::SET);
            put_u32(out, members.len() as u32);
            let mut sorted: Vec<&Data> = members.iter().collect();
            sorted.sort_unstable();
            for member in sorted {
                put_blob(out, member);
            }
        }
        Value::Hash(fields) => {
            out.push(tag::HASH);
            put_u32(out, fields.len() as u32);
            let mut sorted: Vec<(&Data, &Data)> = fields.iter().collect();
            sorted.sort_unstable_by(|a, b| a.0.cmp(b.0));
            for (field, fvalue) in sorted {
                put_blob(out, field);
                put_blob(out, fvalue);
            }
        }
        Value::Zset(zset) => {
            out.push(tag::ZSET);
            put_u32(out, zset.len() as u32);
            for (member, score) in zset.iter() {
                put_blob(out, member);
                put_u64(out, score.to_bits());
            }
        }
        Value::Stream(stream) => {
            out.push(tag::STREAM);
            put_u64(out, stream.last_id().ms);
            put_u64(out, stream.last_id().seq);
            put_u32(out, stream.len() as u32);
            for entry in stream.iter() {
                put_u64(out, entry.id.ms);
                put_u64(out, entry.id.seq);
                put_u32(out, entry.fields.len() as u32);
                for (field, fvalue) in &entry.fields {
                    put_blob(out, field);
                    put_blob(out, fvalue);
                }
            }
        }
    }
}

/// Serialize the full table into a flake image. Expired-but-unreaped entries
/// are skipped; a restart must not resurrect them
pub fn serialize_table(table: &Coretable) -> Vec<u8> {
    let now = crate::corestore::now_millis();
    let mut body = Vec::new();
    let mut count: u64 = 0;
    for (key, entry) in table.iter() {
        if matches!(entry.expires_at, Some(at) if at <= now) {
            continue;
        }
        put_blob(&mut body, key);
        put_u64(&mut body, entry.expires_at.unwrap_or(0));
        encode_value(&mut body, &entry.value);
        count += 1;
    }
    let mut out = Vec::with_capacity(24 + body.len());
    out.extend_from_slice(&FLAKE_MAGIC);
    put_u32(&mut out, FLAKE_VERSION);
    put_u64(&mut out, count);
    put_u32(&mut out, CRC32.checksum(&body));
    out.extend_from_slice(&body);
    out
}

// ---------------------------------------------------------------------------
// decoding

struct BodyReader<'a> {
    buf: &'a [u8],
    at: usize,
}

impl<'a> BodyReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, at: 0 }
    }
    fn take(&mut self, n: usize) -> CinResult<&'a [u8]> {
        match self.buf.get(self.at..self.at + n) {
            Some(slice) => {
                self.at += n;
                Ok(slice)
            }
            None => Err(Error::corrupt("flake body truncated")),
        }
    }
    fn u8(&mut self) -> CinResult<u8> {
        Ok(self.take(1)?[0])
    }
    fn u32(&mut self) -> CinResult<u32> {
        let raw = self.take(4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }
    fn u64(&mut self) -> CinResult<u64> {
        let raw = self.take(8)?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(raw);
        Ok(u64::from_le_bytes(bytes))
    }
    fn blob(&mut self) -> CinResult<Data> {
        let len = self.u32()? as usize;
        Ok(Data::copy_from_slice(self.take(len)?))
    }
    fn done(&self) -> bool {
        self.at == self.buf.len()
    }
}

fn decode_value(reader: &mut BodyReader<'_>) -> CinResult<Value> {
    let value = match reader.u8()? {
        tag::STRING => Value::Str(reader.blob()?),
        tag::LIST => {
            let n = reader.u32()? as usize;
            let mut items = VecDeque::with_capacity(n);
            for _ in 0..n {
                items.push_back(reader.blob()?);
            }
            Value::List(items)
        }
        tag::SET => {
            let n = reader.u32()? as usize;
            let mut members = HashSet::with_capacity(n);
            for _ in 0..n {
                members.insert(reader.blob()?);
            }
            Value::Set(members)
        }
        tag::HASH => {
            let n = reader.u32()? as usize;
            let mut fields = HashMap::with_capacity(n);
            for _ in 0..n {
                let field = reader.blob()?;
                let fvalue = reader.blob()?;
                fields.insert(field, fvalue);
            }
            Value::Hash(fields)
        }
        tag::ZSET => {
            let n = reader.u32()? as usize;
            let mut zset = Zset::new();
            for _ in 0..n {
                let member = reader.blob()?;
                let score = f64::from_bits(reader.u64()?);
                zset.insert(member, score);
            }
            Value::Zset(zset)
        }
        tag::STREAM => {
            let last_id = StreamId {
                ms: reader.u64()?,
                seq: reader.u64()?,
            };
            let n = reader.u32()? as usize;
            let mut entries = Vec::with_capacity(n);
            for _ in 0..n {
                let id = StreamId {
                    ms: reader.u64()?,
                    seq: reader.u64()?,
                };
                let field_count = reader.u32()? as usize;
                let mut fields = Vec::with_capacity(field_count);
                for _ in 0..field_count {
                    let field = reader.blob()?;
                    let fvalue = reader.blob()?;
                    fields.push((field, fvalue));
                }
                entries.push(StreamEntry { id, fields });
            }
            Value::Stream(Stream::restore(entries, last_id))
        }
        other => return Err(Error::corrupt(format!("unknown value tag {other}"))),
    };
    Ok(value)
}

/// Decode a flake image into `table`, clearing it first. Validates magic,
/// version and the body checksum
pub fn deserialize_into(image: &[u8], table: &mut Coretable) -> CinResult<()> {
    if image.len() < 24 {
        return Err(Error::corrupt("flake header truncated"));
    }
    if image[..8] != FLAKE_MAGIC {
        return Err(Error::corrupt("bad flake magic"));
    }
    let mut header = BodyReader::new(&image[8..24]);
    let version = header.u32()?;
    if version != FLAKE_VERSION {
        return Err(Error::corrupt(format!("unsupported flake version {version}")));
    }
    let count = header.u64()?;
    let checksum = header.u32()?;
    let body = &image[24..];
    if CRC32.checksum(body) != checksum {
        return Err(Error::corrupt("flake checksum mismatch"));
    }
    table.flush_all();
    let mut reader = BodyReader::new(body);
    for _ in 0..count {
        let key = reader.blob()?;
        let expires_at = match reader.u64()? {
            0 => None,
            at => Some(at),
        };
        let value = decode_value(&mut reader)?;
        table.put(key, Entry::with_expiry(value, expires_at));
    }
    if !reader.done() {
        return Err(Error::corrupt("trailing bytes after the last record"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// file plumbing

/// Write a flake for `table` into `dir`, atomically: stage in a temp file,
/// then rename over the previous snapshot
pub fn flush_flake(dir: &Path, table: &Coretable) -> CinResult<()> {
    let image = serialize_table(table);
    let staging = dir.join(FLAKE_TEMP_FILE);
    fs::write(&staging, &image)
        .map_err(|e| Error::ioerror_extra(e, "staging the snapshot"))?;
    fs::rename(&staging, dir.join(FLAKE_FILE))
        .map_err(|e| Error::ioerror_extra(e, "publishing the snapshot"))?;
    Ok(())
}

/// Load the flake from `dir` into `table` if one exists. Returns whether a
/// snapshot was restored; corruption is an error, absence is not
pub fn unflush_flake(dir: &Path, table: &mut Coretable) -> CinResult<bool> {
    let path = dir.join(FLAKE_FILE);
    let image = match fs::read(&path) {
        Ok(image) => image,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(Error::ioerror_extra(e, "reading the snapshot")),
    };
    deserialize_into(&image, table)?;
    Ok(true)
}

/// Drop the on-disk snapshot (FLUSHDB)
pub fn remove_flake(dir: &Path) -> CinResult<()> {
    match fs::remove_file(dir.join(FLAKE_FILE)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::ioerror_extra(e, "removing the snapshot")),
    }
}

/// The persistence bridge the engine drives: AOF appends, snapshot saves and
/// the FLUSHDB purge. One instance is shared process-wide
pub struct Persistence {
    dir: PathBuf,
    aof: aof::Aof,
}

impl Persistence {
    /// Open the persistence layer rooted at `dir`, creating the directory if
    /// needed. No data is loaded here; see [`Persistence::load_into`]
    pub fn init(dir: &str, appendonly: bool) -> CinResult<Self> {
        let dir = PathBuf::from(dir);
        fs::create_dir_all(&dir)
            .map_err(|e| Error::ioerror_extra(e, "creating the data directory"))?;
        Ok(Self {
            aof: aof::Aof::new(&dir, appendonly),
            dir,
        })
    }
    /// Restore state: snapshot first, then hand back the AOF commands for
    /// the engine to replay through normal dispatch. Also readies the AOF
    /// for appending
    pub fn load_into(&self, table: &mut Coretable) -> CinResult<Vec<crate::protocol::Command>> {
        if unflush_flake(&self.dir, table)? {
            log::info!("Restored a snapshot with {} keys", table.raw_len());
        }
        let commands = self.aof.replay()?;
        if !commands.is_empty() {
            log::info!("Replaying {} commands from the append-only file", commands.len());
        }
        self.aof.open_for_append()?;
        Ok(commands)
    }
    /// Append one committed write. AOF failures are logged, never surfaced
    /// to the client; the in-memory mutation stands
    pub fn append_command(&self, encoded: &[u8]) {
        if let Err(e) = self.aof.append(encoded) {
            log::error!("Failed to append to the AOF: {}", e);
        }
    }
    /// `SAVE`: synchronous snapshot of the given table
    pub fn save_rdb(&self, table: &Coretable) -> CinResult<()> {
        flush_flake(&self.dir, table)
    }
    /// `FLUSHDB`: purge on-disk state. The AOF is truncated rather than
    /// appended to, so it never grows from repeated flushes
    pub fn clear_data(&self) {
        if let Err(e) = self.aof.truncate() {
            log::error!("Failed to truncate the AOF: {}", e);
        }
        if let Err(e) = remove_flake(&self.dir) {
            log::error!("Failed to remove the snapshot: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corestore::hashes::HashStore;
    use crate::corestore::keyspace::KeyspaceStore;
    use crate::corestore::lists::ListStore;
    use crate::corestore::sets::SetStore;
    use crate::corestore::stream::{IdSpec, StreamStore};
    use crate::corestore::strings::StringStore;
    use crate::corestore::zset::SortedSetStore;
    use crate::corestore::now_millis;

    fn populated() -> Coretable {
        let mut table = Coretable::new();
        table.set_string("plain".into(), "value".into(), None);
        table.set_string(
            "volatile".into(),
            "value".into(),
            Some(now_millis() + 60_000),
        );
        table
            .list_push(b"list", vec!["a".into(), "b".into()], false)
            .unwrap();
        table
            .set_add(b"set", vec!["x".into(), "y".into()])
            .unwrap();
        table
            .hash_set(b"hash", vec![("f".into(), "v".into())])
            .unwrap();
        table
            .zset_add(b"zset", vec![(1.5, "m".into()), (0.5, "n".into())])
            .unwrap();
        table
            .stream_add(
                b"stream",
                IdSpec::Explicit(StreamId { ms: 5, seq: 1 }),
                vec![("f".into(), "v".into())],
            )
            .unwrap();
        table
    }

    #[test]
    fn image_round_trip_preserves_everything() {
        let table = populated();
        let image = serialize_table(&table);
        let mut restored = Coretable::new();
        deserialize_into(&image, &mut restored).unwrap();
        assert_eq!(restored.raw_len(), 7);
        assert_eq!(
            restored.get_string(b"plain").unwrap(),
            Some("value".into())
        );
        assert!(restored.expiry_of(b"volatile").is_some());
        assert_eq!(
            restored.list_range(b"list", 0, -1).unwrap(),
            vec![Data::from("a"), Data::from("b")]
        );
        assert!(restored.set_contains(b"set", b"x").unwrap());
        assert_eq!(
            restored.hash_get(b"hash", b"f").unwrap(),
            Some("v".into())
        );
        let ranked = restored.zset_range(b"zset", 0, -1).unwrap();
        assert_eq!(ranked[0], (Data::from("n"), 0.5));
        assert_eq!(ranked[1], (Data::from("m"), 1.5));
        assert_eq!(restored.stream_len(b"stream").unwrap(), 1);
        // the restored stream keeps its high-water mark
        assert_eq!(
            restored.stream_add(
                b"stream",
                IdSpec::Explicit(StreamId { ms: 5, seq: 1 }),
                vec![("f".into(), "v".into())],
            ),
            Err(crate::corestore::StoreError::StreamIdTooSmall)
        );
    }

    #[test]
    fn expired_entries_are_not_serialized() {
        let mut table = Coretable::new();
        table.set_string("dead".into(), "v".into(), Some(1));
        table.set_string("alive".into(), "v".into(), None);
        let image = serialize_table(&table);
        let mut restored = Coretable::new();
        deserialize_into(&image, &mut restored).unwrap();
        assert_eq!(restored.raw_len(), 1);
        assert!(restored.key_exists(b"alive"));
    }

    #[test]
    fn corruption_is_refused() {
        let table = populated();
        let mut image = serialize_table(&table);
        // flip a byte in the body
        let last = image.len() - 1;
        image[last] ^= 0xff;
        let mut restored = Coretable::new();
        assert!(deserialize_into(&image, &mut restored).is_err());
        // bad magic
        let mut image = serialize_table(&table);
        image[0] = b'X';
        assert!(deserialize_into(&image, &mut restored).is_err());
        // truncation
        let image = serialize_table(&table);
        assert!(deserialize_into(&image[..image.len() / 2], &mut restored).is_err());
    }

    #[test]
    fn empty_table_round_trips() {
        let table = Coretable::new();
        let image = serialize_table(&table);
        let mut restored = populated();
        deserialize_into(&image, &mut restored).unwrap();
        assert_eq!(restored.raw_len(), 0);
    }
}
