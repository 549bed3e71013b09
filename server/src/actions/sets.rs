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

//! Handlers for the set command family

use super::{
    data_array_frame, int_frame, keyword_eq, opt_bulk_frame, parse_count_arg, usize_frame,
    ActionError, ActionResult,
};
use crate::corestore::sets::SetStore;
use crate::corestore::Data;
use crate::protocol::Frame;
use bytes::Bytes;

fn members_of(args: &[Bytes]) -> Vec<Data> {
    args.iter()
        .map(|member| Data::from_blob(member.clone()))
        .collect()
}

/// `SADD key member [member …]`
pub fn sadd<S: SetStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    Ok(usize_frame(
        store.set_add(&args[0], members_of(&args[1..]))?,
    ))
}

/// `SREM key member [member …]`
pub fn srem<S: SetStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    Ok(usize_frame(
        store.set_rem(&args[0], &members_of(&args[1..]))?,
    ))
}

/// `SISMEMBER key member`
pub fn sismember<S: SetStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    Ok(int_frame(store.set_contains(&args[0], &args[1])? as i64))
}

/// `SMEMBERS key`
pub fn smembers<S: SetStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    Ok(data_array_frame(store.set_members(&args[0])?))
}

/// `SCARD key`
pub fn scard<S: SetStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    Ok(usize_frame(store.set_card(&args[0])?))
}

/// `SPOP key`
pub fn spop<S: SetStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    Ok(opt_bulk_frame(store.set_pop(&args[0])?))
}

/// `SSCAN key cursor [MATCH pattern] [COUNT n]`
pub fn sscan<S: SetStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
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
    let page = store.set_scan(&args[0], cursor, pattern.as_deref(), count)?;
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
    fn add_member_flow() {
        let mut table = Coretable::new();
        assert_eq!(
            sadd(&mut table, &[arg("s"), arg("a"), arg("b"), arg("a")]).unwrap(),
            Frame::Integer(2)
        );
        assert_eq!(
            sismember(&mut table, &[arg("s"), arg("a")]).unwrap(),
            Frame::Integer(1)
        );
        assert_eq!(
            sismember(&mut table, &[arg("s"), arg("z")]).unwrap(),
            Frame::Integer(0)
        );
        assert_eq!(scard(&mut table, &[arg("s")]).unwrap(), Frame::Integer(2));
        assert_eq!(
            smembers(&mut table, &[arg("s")]).unwrap(),
            Frame::Array(vec![Frame::bulk(b"a"), Frame::bulk(b"b")])
        );
        assert_eq!(
            srem(&mut table, &[arg("s"), arg("a")]).unwrap(),
            Frame::Integer(1)
        );
    }

    #[test]
    fn spop_on_missing_key_is_null() {
        let mut table = Coretable::new();
        assert_eq!(spop(&mut table, &[arg("ghost")]).unwrap(), Frame::NullBulk);
    }

    #[test]
    fn sscan_with_match() {
        let mut table = Coretable::new();
        sadd(
            &mut table,
            &[arg("s"), arg("user:1"), arg("user:2"), arg("other")],
        )
        .unwrap();
        let reply = sscan(
            &mut table,
            &[arg("s"), arg("0"), arg("MATCH"), arg("user:*")],
        )
        .unwrap();
        match reply {
            Frame::Array(items) => {
                assert!(matches!(&items[1], Frame::Array(members) if members.len() == 2));
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }
}
