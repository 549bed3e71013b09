/*
 * Created on Mon Feb 19 2024
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

//! Handlers for the string command family

use super::{
    bulk_frame, int_frame, keyword_eq, opt_bulk_frame, parse_float_arg, parse_int_arg,
    usize_frame, ActionError, ActionResult,
};
use crate::corestore::strings::{format_float, StringStore};
use crate::corestore::{now_millis, Data};
use crate::protocol::Frame;
use bytes::Bytes;

/// `SET key value [EX seconds | PX milliseconds]`
pub fn set<S: StringStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    let mut expires_at = None;
    let mut at = 2;
    while at < args.len() {
        if keyword_eq(&args[at], "EX") && at + 1 < args.len() {
            let seconds = parse_int_arg(&args[at + 1])?;
            expires_at = Some(offset_millis(seconds.saturating_mul(1000)));
            at += 2;
        } else if keyword_eq(&args[at], "PX") && at + 1 < args.len() {
            let millis = parse_int_arg(&args[at + 1])?;
            expires_at = Some(offset_millis(millis));
            at += 2;
        } else {
            return Err(ActionError::syntax());
        }
    }
    store.set_string(
        Data::from_blob(args[0].clone()),
        Data::from_blob(args[1].clone()),
        expires_at,
    );
    Ok(Frame::ok())
}

/// `GET key`
pub fn get<S: StringStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    Ok(opt_bulk_frame(store.get_string(&args[0])?))
}

/// `APPEND key value`
pub fn append<S: StringStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    Ok(usize_frame(store.append_string(&args[0], &args[1])?))
}

/// `STRLEN key`
pub fn strlen<S: StringStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    Ok(usize_frame(store.strlen(&args[0])?))
}

/// `GETRANGE key start end`
pub fn getrange<S: StringStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    let start = parse_int_arg(&args[1])?;
    let end = parse_int_arg(&args[2])?;
    Ok(bulk_frame(store.getrange(&args[0], start, end)?))
}

/// `INCR key`
pub fn incr<S: StringStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    Ok(int_frame(store.incr_by(&args[0], 1)?))
}

/// `DECR key`
pub fn decr<S: StringStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    Ok(int_frame(store.incr_by(&args[0], -1)?))
}

/// `INCRBY key delta`
pub fn incrby<S: StringStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    let delta = parse_int_arg(&args[1])?;
    Ok(int_frame(store.incr_by(&args[0], delta)?))
}

/// `DECRBY key delta`
pub fn decrby<S: StringStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    let delta = parse_int_arg(&args[1])?
        .checked_neg()
        .ok_or_else(|| ActionError::new(crate::protocol::responses::groups::OVERFLOW))?;
    Ok(int_frame(store.incr_by(&args[0], delta)?))
}

/// `INCRBYFLOAT key delta`
pub fn incrbyfloat<S: StringStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    let delta = parse_float_arg(&args[1])?;
    let next = store.incr_by_float(&args[0], delta)?;
    Ok(Frame::bulk(format_float(next).as_bytes()))
}

/// Resolve a signed millisecond offset from now into an absolute instant,
/// clamping into the representable range
fn offset_millis(delta_ms: i64) -> u64 {
    let now = now_millis() as i64;
    now.saturating_add(delta_ms).max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corestore::keyspace::{KeyspaceStore, Ttl};
    use crate::corestore::Coretable;

    fn arg(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn set_then_get() {
        let mut table = Coretable::new();
        assert_eq!(set(&mut table, &[arg("k"), arg("v")]).unwrap(), Frame::ok());
        assert_eq!(
            get(&mut table, &[arg("k")]).unwrap(),
            Frame::bulk(b"v")
        );
        assert_eq!(get(&mut table, &[arg("missing")]).unwrap(), Frame::NullBulk);
    }

    #[test]
    fn set_with_expiry_options() {
        let mut table = Coretable::new();
        set(&mut table, &[arg("k"), arg("v"), arg("EX"), arg("100")]).unwrap();
        assert!(matches!(table.ttl_of(b"k"), Ttl::Remaining(ms) if ms > 99_000));
        set(&mut table, &[arg("p"), arg("v"), arg("px"), arg("5000")]).unwrap();
        assert!(matches!(table.ttl_of(b"p"), Ttl::Remaining(ms) if ms <= 5_000));
        assert!(set(&mut table, &[arg("k"), arg("v"), arg("BOGUS")]).is_err());
        assert!(set(&mut table, &[arg("k"), arg("v"), arg("EX")]).is_err());
    }

    #[test]
    fn append_and_strlen_scenario() {
        let mut table = Coretable::new();
        assert_eq!(
            append(&mut table, &[arg("k"), arg("hello")]).unwrap(),
            Frame::Integer(5)
        );
        assert_eq!(
            append(&mut table, &[arg("k"), arg(" world")]).unwrap(),
            Frame::Integer(11)
        );
        assert_eq!(
            strlen(&mut table, &[arg("k")]).unwrap(),
            Frame::Integer(11)
        );
    }

    #[test]
    fn getrange_scenario() {
        let mut table = Coretable::new();
        set(&mut table, &[arg("k"), arg("Hello, world!")]).unwrap();
        assert_eq!(
            getrange(&mut table, &[arg("k"), arg("0"), arg("4")]).unwrap(),
            Frame::bulk(b"Hello")
        );
        assert_eq!(
            getrange(&mut table, &[arg("k"), arg("-100"), arg("100")]).unwrap(),
            Frame::bulk(b"Hello, world!")
        );
    }

    #[test]
    fn counter_family() {
        let mut table = Coretable::new();
        assert_eq!(incr(&mut table, &[arg("n")]).unwrap(), Frame::Integer(1));
        assert_eq!(
            incrby(&mut table, &[arg("n"), arg("10")]).unwrap(),
            Frame::Integer(11)
        );
        assert_eq!(decr(&mut table, &[arg("n")]).unwrap(), Frame::Integer(10));
        assert_eq!(
            decrby(&mut table, &[arg("n"), arg("10")]).unwrap(),
            Frame::Integer(0)
        );
        assert_eq!(
            incrbyfloat(&mut table, &[arg("f"), arg("10.5")]).unwrap(),
            Frame::bulk(b"10.5")
        );
    }

    #[test]
    fn incr_overflow_is_an_error_frame_level() {
        let mut table = Coretable::new();
        set(&mut table, &[arg("n"), arg(&i64::MAX.to_string())]).unwrap();
        let err = incrby(&mut table, &[arg("n"), arg("1")]).unwrap_err();
        assert!(err.message().contains("overflow"));
    }
}
