/*
 * Created on Thu Feb 22 2024
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

//! Handlers for the sorted set command family

use super::{
    bulk_frame, keyword_eq, parse_count_arg, parse_float_arg, parse_int_arg, usize_frame,
    ActionError, ActionResult,
};
use crate::corestore::strings::format_float;
use crate::corestore::zset::SortedSetStore;
use crate::corestore::Data;
use crate::protocol::Frame;
use bytes::Bytes;

/// `ZADD key score member [score member …]`
pub fn zadd<S: SortedSetStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    if args.len() < 3 || (args.len() - 1) % 2 != 0 {
        return Err(ActionError::syntax());
    }
    let mut pairs = Vec::with_capacity((args.len() - 1) / 2);
    for pair in args[1..].chunks_exact(2) {
        let score = parse_float_arg(&pair[0])?;
        pairs.push((score, Data::from_blob(pair[1].clone())));
    }
    Ok(usize_frame(store.zset_add(&args[0], pairs)?))
}

/// `ZREM key member [member …]`
pub fn zrem<S: SortedSetStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    let members: Vec<Data> = args[1..]
        .iter()
        .map(|member| Data::from_blob(member.clone()))
        .collect();
    Ok(usize_frame(store.zset_rem(&args[0], &members)?))
}

/// `ZCARD key`
pub fn zcard<S: SortedSetStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    Ok(usize_frame(store.zset_card(&args[0])?))
}

/// `ZSCORE key member`
pub fn zscore<S: SortedSetStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    Ok(match store.zset_score(&args[0], &args[1])? {
        Some(score) => Frame::bulk(format_float(score).as_bytes()),
        None => Frame::NullBulk,
    })
}

/// `ZRANGE key start stop [WITHSCORES]`
pub fn zrange<S: SortedSetStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    let start = parse_int_arg(&args[1])?;
    let stop = parse_int_arg(&args[2])?;
    let withscores = match args.get(3) {
        None => false,
        Some(flag) if keyword_eq(flag, "WITHSCORES") => true,
        Some(_) => return Err(ActionError::syntax()),
    };
    let ranked = store.zset_range(&args[0], start, stop)?;
    Ok(ranked_frame(ranked, withscores))
}

/// `ZPOPMIN key [count]`
pub fn zpopmin<S: SortedSetStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    let count = match args.get(1) {
        Some(raw) => parse_count_arg(raw)?,
        None => 1,
    };
    // ZPOPMIN always reports scores
    Ok(ranked_frame(store.zset_pop_min(&args[0], count)?, true))
}

fn ranked_frame(ranked: Vec<(Data, f64)>, withscores: bool) -> Frame {
    let mut items = Vec::with_capacity(if withscores {
        ranked.len() * 2
    } else {
        ranked.len()
    });
    for (member, score) in ranked {
        items.push(bulk_frame(member));
        if withscores {
            items.push(Frame::bulk(format_float(score).as_bytes()));
        }
    }
    Frame::Array(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corestore::Coretable;

    fn arg(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn zadd_zrange_withscores_scenario() {
        let mut table = Coretable::new();
        assert_eq!(
            zadd(
                &mut table,
                &[
                    arg("z"),
                    arg("1"),
                    arg("one"),
                    arg("2"),
                    arg("two"),
                    arg("1.5"),
                    arg("mid"),
                ],
            )
            .unwrap(),
            Frame::Integer(3)
        );
        assert_eq!(
            zrange(&mut table, &[arg("z"), arg("0"), arg("-1"), arg("WITHSCORES")]).unwrap(),
            Frame::Array(vec![
                Frame::bulk(b"one"),
                Frame::bulk(b"1"),
                Frame::bulk(b"mid"),
                Frame::bulk(b"1.5"),
                Frame::bulk(b"two"),
                Frame::bulk(b"2"),
            ])
        );
        assert_eq!(
            zrange(&mut table, &[arg("z"), arg("0"), arg("0")]).unwrap(),
            Frame::Array(vec![Frame::bulk(b"one")])
        );
    }

    #[test]
    fn zadd_rejects_bad_scores_and_pairing() {
        let mut table = Coretable::new();
        assert!(zadd(&mut table, &[arg("z"), arg("1")]).is_err());
        assert!(zadd(&mut table, &[arg("z"), arg("notanumber"), arg("m")]).is_err());
        assert!(zadd(&mut table, &[arg("z"), arg("nan"), arg("m")]).is_err());
    }

    #[test]
    fn zscore_and_zrem() {
        let mut table = Coretable::new();
        zadd(&mut table, &[arg("z"), arg("2.5"), arg("m")]).unwrap();
        assert_eq!(
            zscore(&mut table, &[arg("z"), arg("m")]).unwrap(),
            Frame::bulk(b"2.5")
        );
        assert_eq!(
            zscore(&mut table, &[arg("z"), arg("ghost")]).unwrap(),
            Frame::NullBulk
        );
        assert_eq!(
            zrem(&mut table, &[arg("z"), arg("m")]).unwrap(),
            Frame::Integer(1)
        );
        assert_eq!(zcard(&mut table, &[arg("z")]).unwrap(), Frame::Integer(0));
    }

    #[test]
    fn zpopmin_reports_scores() {
        let mut table = Coretable::new();
        zadd(
            &mut table,
            &[arg("z"), arg("2"), arg("b"), arg("1"), arg("a")],
        )
        .unwrap();
        assert_eq!(
            zpopmin(&mut table, &[arg("z")]).unwrap(),
            Frame::Array(vec![Frame::bulk(b"a"), Frame::bulk(b"1")])
        );
        assert_eq!(
            zpopmin(&mut table, &[arg("z"), arg("5")]).unwrap(),
            Frame::Array(vec![Frame::bulk(b"b"), Frame::bulk(b"2")])
        );
    }
}
