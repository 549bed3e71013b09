/*
 * Created on Wed Feb 21 2024
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

//! Handlers for the hash command family

use super::{
    bulk_frame, data_array_frame, int_frame, keyword_eq, opt_bulk_frame, parse_count_arg,
    parse_float_arg, parse_int_arg, usize_frame, ActionError, ActionResult,
};
use crate::corestore::hashes::HashStore;
use crate::corestore::strings::format_float;
use crate::corestore::Data;
use crate::protocol::Frame;
use bytes::Bytes;

/// `HSET key field value [field value …]`
pub fn hset<S: HashStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    if args.len() < 3 || (args.len() - 1) % 2 != 0 {
        return Err(ActionError::syntax());
    }
    let pairs = args[1..]
        .chunks_exact(2)
        .map(|pair| (Data::from_blob(pair[0].clone()), Data::from_blob(pair[1].clone())))
        .collect();
    Ok(usize_frame(store.hash_set(&args[0], pairs)?))
}

/// `HGET key field`
pub fn hget<S: HashStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    Ok(opt_bulk_frame(store.hash_get(&args[0], &args[1])?))
}

/// `HDEL key field [field …]`
pub fn hdel<S: HashStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    let doomed: Vec<Data> = args[1..]
        .iter()
        .map(|field| Data::from_blob(field.clone()))
        .collect();
    Ok(usize_frame(store.hash_del(&args[0], &doomed)?))
}

/// `HEXISTS key field`
pub fn hexists<S: HashStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    Ok(int_frame(store.hash_has(&args[0], &args[1])? as i64))
}

/// `HGETALL key`
pub fn hgetall<S: HashStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    let mut flat = Vec::new();
    for (field, value) in store.hash_all(&args[0])? {
        flat.push(bulk_frame(field));
        flat.push(bulk_frame(value));
    }
    Ok(Frame::Array(flat))
}

/// `HKEYS key`
pub fn hkeys<S: HashStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    let fields = store
        .hash_all(&args[0])?
        .into_iter()
        .map(|(field, _)| field)
        .collect();
    Ok(data_array_frame(fields))
}

/// `HVALS key`
pub fn hvals<S: HashStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    let values = store
        .hash_all(&args[0])?
        .into_iter()
        .map(|(_, value)| value)
        .collect();
    Ok(data_array_frame(values))
}

/// `HLEN key`
pub fn hlen<S: HashStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    Ok(usize_frame(store.hash_len(&args[0])?))
}

/// `HINCRBY key field delta`
pub fn hincrby<S: HashStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    let delta = parse_int_arg(&args[2])?;
    Ok(int_frame(store.hash_incr_by(&args[0], &args[1], delta)?))
}

/// `HINCRBYFLOAT key field delta`
pub fn hincrbyfloat<S: HashStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    let delta = parse_float_arg(&args[2])?;
    let next = store.hash_incr_by_float(&args[0], &args[1], delta)?;
    Ok(Frame::bulk(format_float(next).as_bytes()))
}

/// `HSCAN key cursor [MATCH pattern] [COUNT n]`
pub fn hscan<S: HashStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    let cursor = parse_count_arg(&args[1])? as u64;
    let mut pattern: Option<Bytes> = None;
    let mut count = 0;
    let mut at = 2;
    while at < args.len() {
        if keyword_eq(&args[at], "MATCH") && at + 1 < args.len() {
            pattern = Some(args[at + 1].clone());
            at += 2;
        } else if keyword_eq(&args[at], "COUNT") && at + 1 < args.len() {
            count = parse_count_arg(&args[at + 1])?;
            at += 2;
        } else {
            return Err(ActionError::syntax());
        }
    }
    let page = store.hash_scan(&args[0], cursor, pattern.as_deref(), count)?;
    Ok(Frame::Array(vec![
        Frame::bulk(page.cursor.to_string().as_bytes()),
        data_array_frame(page.keys),
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corestore::Coretable;

    fn arg(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn hset_validates_pairing() {
        let mut table = Coretable::new();
        assert!(hset(&mut table, &[arg("h"), arg("f")]).is_err());
        assert_eq!(
            hset(&mut table, &[arg("h"), arg("f"), arg("v"), arg("g"), arg("w")]).unwrap(),
            Frame::Integer(2)
        );
        assert_eq!(
            hget(&mut table, &[arg("h"), arg("f")]).unwrap(),
            Frame::bulk(b"v")
        );
    }

    #[test]
    fn hgetall_interleaves() {
        let mut table = Coretable::new();
        hset(&mut table, &[arg("h"), arg("b"), arg("2"), arg("a"), arg("1")]).unwrap();
        assert_eq!(
            hgetall(&mut table, &[arg("h")]).unwrap(),
            Frame::Array(vec![
                Frame::bulk(b"a"),
                Frame::bulk(b"1"),
                Frame::bulk(b"b"),
                Frame::bulk(b"2"),
            ])
        );
        assert_eq!(
            hkeys(&mut table, &[arg("h")]).unwrap(),
            Frame::Array(vec![Frame::bulk(b"a"), Frame::bulk(b"b")])
        );
        assert_eq!(
            hvals(&mut table, &[arg("h")]).unwrap(),
            Frame::Array(vec![Frame::bulk(b"1"), Frame::bulk(b"2")])
        );
    }

    #[test]
    fn hincrby_non_numeric_field_errors() {
        let mut table = Coretable::new();
        hset(&mut table, &[arg("h"), arg("s"), arg("abc")]).unwrap();
        let err = hincrby(&mut table, &[arg("h"), arg("s"), arg("1")]).unwrap_err();
        assert_eq!(err.message(), "ERR value is not an integer or out of range");
        assert_eq!(
            hincrbyfloat(&mut table, &[arg("h"), arg("f"), arg("2.5")]).unwrap(),
            Frame::bulk(b"2.5")
        );
    }

    #[test]
    fn hdel_counts() {
        let mut table = Coretable::new();
        hset(&mut table, &[arg("h"), arg("a"), arg("1"), arg("b"), arg("2")]).unwrap();
        assert_eq!(
            hdel(&mut table, &[arg("h"), arg("a"), arg("ghost")]).unwrap(),
            Frame::Integer(1)
        );
        assert_eq!(hlen(&mut table, &[arg("h")]).unwrap(), Frame::Integer(1));
        assert_eq!(
            hexists(&mut table, &[arg("h"), arg("a")]).unwrap(),
            Frame::Integer(0)
        );
    }
}
