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

//! Handlers for the list command family

use super::{
    data_array_frame, opt_bulk_frame, parse_int_arg, usize_frame, ActionResult,
};
use crate::corestore::lists::ListStore;
use crate::corestore::Data;
use crate::protocol::Frame;
use bytes::Bytes;

fn values_of(args: &[Bytes]) -> Vec<Data> {
    args.iter()
        .map(|value| Data::from_blob(value.clone()))
        .collect()
}

/// `LPUSH key value [value …]`
pub fn lpush<S: ListStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    Ok(usize_frame(store.list_push(
        &args[0],
        values_of(&args[1..]),
        true,
    )?))
}

/// `RPUSH key value [value …]`
pub fn rpush<S: ListStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    Ok(usize_frame(store.list_push(
        &args[0],
        values_of(&args[1..]),
        false,
    )?))
}

/// `LPOP key`
pub fn lpop<S: ListStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    Ok(opt_bulk_frame(store.list_pop(&args[0], true)?))
}

/// `RPOP key`
pub fn rpop<S: ListStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    Ok(opt_bulk_frame(store.list_pop(&args[0], false)?))
}

/// `LLEN key`
pub fn llen<S: ListStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    Ok(usize_frame(store.list_len(&args[0])?))
}

/// `LRANGE key start stop`
pub fn lrange<S: ListStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    let start = parse_int_arg(&args[1])?;
    let stop = parse_int_arg(&args[2])?;
    Ok(data_array_frame(store.list_range(&args[0], start, stop)?))
}

/// `LINDEX key index`
pub fn lindex<S: ListStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    let index = parse_int_arg(&args[1])?;
    Ok(opt_bulk_frame(store.list_index(&args[0], index)?))
}

/// `LSET key index value`
pub fn lset<S: ListStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    let index = parse_int_arg(&args[1])?;
    store.list_set(&args[0], index, Data::from_blob(args[2].clone()))?;
    Ok(Frame::ok())
}

/// `LREM key count value`
pub fn lrem<S: ListStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    let count = parse_int_arg(&args[1])?;
    Ok(usize_frame(store.list_rem(&args[0], count, &args[2])?))
}

/// `LTRIM key start stop`
pub fn ltrim<S: ListStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    let start = parse_int_arg(&args[1])?;
    let stop = parse_int_arg(&args[2])?;
    store.list_trim(&args[0], start, stop)?;
    Ok(Frame::ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corestore::Coretable;

    fn arg(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn push_range_pop_flow() {
        let mut table = Coretable::new();
        assert_eq!(
            rpush(&mut table, &[arg("l"), arg("a"), arg("b")]).unwrap(),
            Frame::Integer(2)
        );
        assert_eq!(
            lpush(&mut table, &[arg("l"), arg("z")]).unwrap(),
            Frame::Integer(3)
        );
        assert_eq!(
            lrange(&mut table, &[arg("l"), arg("0"), arg("-1")]).unwrap(),
            Frame::Array(vec![Frame::bulk(b"z"), Frame::bulk(b"a"), Frame::bulk(b"b")])
        );
        assert_eq!(lpop(&mut table, &[arg("l")]).unwrap(), Frame::bulk(b"z"));
        assert_eq!(rpop(&mut table, &[arg("l")]).unwrap(), Frame::bulk(b"b"));
        assert_eq!(llen(&mut table, &[arg("l")]).unwrap(), Frame::Integer(1));
        assert_eq!(lpop(&mut table, &[arg("ghost")]).unwrap(), Frame::NullBulk);
    }

    #[test]
    fn lset_out_of_range_is_an_error() {
        let mut table = Coretable::new();
        rpush(&mut table, &[arg("l"), arg("a")]).unwrap();
        assert_eq!(
            lset(&mut table, &[arg("l"), arg("0"), arg("x")]).unwrap(),
            Frame::ok()
        );
        let err = lset(&mut table, &[arg("l"), arg("9"), arg("x")]).unwrap_err();
        assert_eq!(err.message(), "ERR index out of range");
    }

    #[test]
    fn lrem_and_ltrim_replies() {
        let mut table = Coretable::new();
        rpush(
            &mut table,
            &[arg("l"), arg("x"), arg("a"), arg("x"), arg("b")],
        )
        .unwrap();
        assert_eq!(
            lrem(&mut table, &[arg("l"), arg("0"), arg("x")]).unwrap(),
            Frame::Integer(2)
        );
        assert_eq!(
            ltrim(&mut table, &[arg("l"), arg("0"), arg("0")]).unwrap(),
            Frame::ok()
        );
        assert_eq!(
            lrange(&mut table, &[arg("l"), arg("0"), arg("-1")]).unwrap(),
            Frame::Array(vec![Frame::bulk(b"a")])
        );
    }
}
