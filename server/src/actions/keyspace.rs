/*
 * Created on Tue Feb 20 2024
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

//! Handlers for key management: DEL, EXISTS, KEYS, DBSIZE, SCAN, the TTL
//! family, TYPE, RENAME/RENAMENX and COPY

use super::{
    data_array_frame, int_frame, keyword_eq, parse_count_arg, parse_int_arg, usize_frame,
    ActionError, ActionResult,
};
use crate::corestore::keyspace::{KeyspaceStore, Ttl};
use crate::corestore::now_millis;
use crate::protocol::Frame;
use bytes::Bytes;

/// `DEL key [key …]`
pub fn del<S: KeyspaceStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    let removed = args.iter().filter(|key| store.remove_key(key)).count();
    Ok(usize_frame(removed))
}

/// `EXISTS key [key …]` — duplicates count double, like upstream
pub fn exists<S: KeyspaceStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    let found = args.iter().filter(|key| store.key_exists(key)).count();
    Ok(usize_frame(found))
}

/// `KEYS pattern`
pub fn keys<S: KeyspaceStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    Ok(data_array_frame(store.keys_matching(&args[0])))
}

/// `DBSIZE`
pub fn dbsize<S: KeyspaceStore + ?Sized>(store: &mut S, _args: &[Bytes]) -> ActionResult<Frame> {
    Ok(usize_frame(store.db_size()))
}

/// `SCAN cursor [MATCH pattern] [COUNT n] [TYPE type]`
pub fn scan<S: KeyspaceStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    let cursor = parse_count_arg(&args[0])? as u64;
    let mut pattern: Option<Bytes> = None;
    let mut count = 0;
    let mut type_filter: Option<String> = None;
    let mut at = 1;
    while at < args.len() {
        if keyword_eq(&args[at], "MATCH") && at + 1 < args.len() {
            pattern = Some(args[at + 1].clone());
            at += 2;
        } else if keyword_eq(&args[at], "COUNT") && at + 1 < args.len() {
            count = parse_count_arg(&args[at + 1])?;
            at += 2;
        } else if keyword_eq(&args[at], "TYPE") && at + 1 < args.len() {
            type_filter = Some(String::from_utf8_lossy(&args[at + 1]).into_owned());
            at += 2;
        } else {
            return Err(ActionError::syntax());
        }
    }
    let page = store.scan_keys(
        cursor,
        pattern.as_deref(),
        count,
        type_filter.as_deref(),
    );
    Ok(Frame::Array(vec![
        Frame::bulk(page.cursor.to_string().as_bytes()),
        data_array_frame(page.keys),
    ]))
}

/// `TTL key` — seconds, `-1` without expiry, `-2` when absent
pub fn ttl<S: KeyspaceStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    let reply = match store.ttl_of(&args[0]) {
        Ttl::Absent => -2,
        Ttl::NoExpiry => -1,
        Ttl::Remaining(ms) => ((ms + 999) / 1000) as i64,
    };
    Ok(int_frame(reply))
}

/// `PTTL key`
pub fn pttl<S: KeyspaceStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    let reply = match store.ttl_of(&args[0]) {
        Ttl::Absent => -2,
        Ttl::NoExpiry => -1,
        Ttl::Remaining(ms) => ms as i64,
    };
    Ok(int_frame(reply))
}

/// `EXPIRE key seconds`. A non-positive duration expires the key on its next
/// observation
pub fn expire<S: KeyspaceStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    let seconds = parse_int_arg(&args[1])?;
    let at = (now_millis() as i64)
        .saturating_add(seconds.saturating_mul(1000))
        .max(0) as u64;
    Ok(int_frame(store.expire_key(&args[0], at) as i64))
}

/// `TYPE key`
pub fn type_of<S: KeyspaceStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    Ok(Frame::Simple(store.type_of(&args[0]).to_owned()))
}

/// `RENAME src dst`
pub fn rename<S: KeyspaceStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    store.rename_key(&args[0], &args[1])?;
    Ok(Frame::ok())
}

/// `RENAMENX src dst`
pub fn renamenx<S: KeyspaceStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    Ok(int_frame(store.rename_key_nx(&args[0], &args[1])? as i64))
}

/// `COPY src dst [REPLACE]`
pub fn copy<S: KeyspaceStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    let replace = match args.get(2) {
        None => false,
        Some(flag) if keyword_eq(flag, "REPLACE") => true,
        Some(_) => return Err(ActionError::syntax()),
    };
    Ok(int_frame(store.copy_key(&args[0], &args[1], replace)? as i64))
}
