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

//! Handlers for the stream command family

use super::{bulk_frame, keyword_eq, parse_count_arg, usize_frame, ActionError, ActionResult};
use crate::corestore::stream::{
    parse_id_spec, parse_range_bound, StreamEntry, StreamStore,
};
use crate::corestore::Data;
use crate::protocol::Frame;
use bytes::Bytes;

/// `XADD key id field value [field value …]`
pub fn xadd<S: StreamStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    if args.len() < 4 || (args.len() - 2) % 2 != 0 {
        return Err(ActionError::syntax());
    }
    let spec = parse_id_spec(&args[1])?;
    let fields = args[2..]
        .chunks_exact(2)
        .map(|pair| (Data::from_blob(pair[0].clone()), Data::from_blob(pair[1].clone())))
        .collect();
    let id = store.stream_add(&args[0], spec, fields)?;
    Ok(Frame::bulk(id.to_string().as_bytes()))
}

/// `XLEN key`
pub fn xlen<S: StreamStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    Ok(usize_frame(store.stream_len(&args[0])?))
}

/// `XRANGE key start end [COUNT n]`
pub fn xrange<S: StreamStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    let start = parse_range_bound(&args[1], false)?;
    let end = parse_range_bound(&args[2], true)?;
    let count = match args.get(3) {
        None => 0,
        Some(flag) if keyword_eq(flag, "COUNT") => match args.get(4) {
            Some(raw) => parse_count_arg(raw)?,
            None => return Err(ActionError::syntax()),
        },
        Some(_) => return Err(ActionError::syntax()),
    };
    let entries = store.stream_range(&args[0], start, end, count)?;
    Ok(entries_frame(entries))
}

/// `XDEL key id [id …]`
pub fn xdel<S: StreamStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    let mut ids = Vec::with_capacity(args.len() - 1);
    for raw in &args[1..] {
        ids.push(parse_range_bound(raw, false)?);
    }
    Ok(usize_frame(store.stream_del(&args[0], &ids)?))
}

/// `XTRIM key MAXLEN n`
pub fn xtrim<S: StreamStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    if !keyword_eq(&args[1], "MAXLEN") {
        return Err(ActionError::syntax());
    }
    let maxlen = parse_count_arg(&args[2])?;
    Ok(usize_frame(store.stream_trim(&args[0], maxlen)?))
}

/// `XREAD [COUNT n] STREAMS key id` — one stream, no blocking
pub fn xread<S: StreamStore + ?Sized>(store: &mut S, args: &[Bytes]) -> ActionResult<Frame> {
    let mut at = 0;
    let mut count = 0;
    if keyword_eq(&args[at], "COUNT") {
        count = match args.get(at + 1) {
            Some(raw) => parse_count_arg(raw)?,
            None => return Err(ActionError::syntax()),
        };
        at += 2;
    }
    if args.len() != at + 3 || !keyword_eq(&args[at], "STREAMS") {
        return Err(ActionError::syntax());
    }
    let key = &args[at + 1];
    let after = parse_range_bound(&args[at + 2], false)?;
    let entries = store.stream_read_after(key, after, count)?;
    if entries.is_empty() {
        return Ok(Frame::NullArray);
    }
    Ok(Frame::Array(vec![Frame::Array(vec![
        Frame::Bulk(key.clone()),
        entries_frame(entries),
    ])]))
}

/// The `[[id, [field, value, …]], …]` shape shared by XRANGE and XREAD
fn entries_frame(entries: Vec<StreamEntry>) -> Frame {
    Frame::Array(
        entries
            .into_iter()
            .map(|entry| {
                let mut flat = Vec::with_capacity(entry.fields.len() * 2);
                for (field, value) in entry.fields {
                    flat.push(bulk_frame(field));
                    flat.push(bulk_frame(value));
                }
                Frame::Array(vec![
                    Frame::bulk(entry.id.to_string().as_bytes()),
                    Frame::Array(flat),
                ])
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corestore::Coretable;

    fn arg(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn xadd_explicit_id_scenario() {
        let mut table = Coretable::new();
        assert_eq!(
            xadd(&mut table, &[arg("s"), arg("1000-0"), arg("f"), arg("v")]).unwrap(),
            Frame::bulk(b"1000-0")
        );
        let err = xadd(&mut table, &[arg("s"), arg("1000-0"), arg("f"), arg("v")]).unwrap_err();
        assert!(err.message().contains("equal or smaller"));
        assert_eq!(xlen(&mut table, &[arg("s")]).unwrap(), Frame::Integer(1));
    }

    #[test]
    fn xadd_auto_id() {
        let mut table = Coretable::new();
        let reply = xadd(&mut table, &[arg("s"), arg("*"), arg("f"), arg("v")]).unwrap();
        assert!(matches!(reply, Frame::Bulk(id) if id.iter().any(|b| *b == b'-')));
    }

    #[test]
    fn xrange_shape_and_count() {
        let mut table = Coretable::new();
        for ms in ["1-0", "2-0", "3-0"] {
            xadd(&mut table, &[arg("s"), arg(ms), arg("f"), arg("v")]).unwrap();
        }
        let reply = xrange(&mut table, &[arg("s"), arg("-"), arg("+")]).unwrap();
        match &reply {
            Frame::Array(entries) => {
                assert_eq!(entries.len(), 3);
                match &entries[0] {
                    Frame::Array(pair) => {
                        assert_eq!(pair[0], Frame::bulk(b"1-0"));
                        assert_eq!(
                            pair[1],
                            Frame::Array(vec![Frame::bulk(b"f"), Frame::bulk(b"v")])
                        );
                    }
                    other => panic!("unexpected entry: {other:?}"),
                }
            }
            other => panic!("unexpected reply: {other:?}"),
        }
        let capped = xrange(
            &mut table,
            &[arg("s"), arg("-"), arg("+"), arg("COUNT"), arg("2")],
        )
        .unwrap();
        assert!(matches!(capped, Frame::Array(entries) if entries.len() == 2));
    }

    #[test]
    fn xread_after_id() {
        let mut table = Coretable::new();
        for ms in ["1-0", "2-0"] {
            xadd(&mut table, &[arg("s"), arg(ms), arg("f"), arg("v")]).unwrap();
        }
        let reply = xread(
            &mut table,
            &[arg("STREAMS"), arg("s"), arg("1-0")],
        )
        .unwrap();
        match reply {
            Frame::Array(streams) => match &streams[0] {
                Frame::Array(pair) => {
                    assert_eq!(pair[0], Frame::bulk(b"s"));
                    assert!(matches!(&pair[1], Frame::Array(entries) if entries.len() == 1));
                }
                other => panic!("unexpected stream item: {other:?}"),
            },
            other => panic!("unexpected reply: {other:?}"),
        }
        // nothing new → null array
        assert_eq!(
            xread(&mut table, &[arg("STREAMS"), arg("s"), arg("2-0")]).unwrap(),
            Frame::NullArray
        );
    }

    #[test]
    fn xdel_and_xtrim() {
        let mut table = Coretable::new();
        for ms in ["1-0", "2-0", "3-0", "4-0"] {
            xadd(&mut table, &[arg("s"), arg(ms), arg("f"), arg("v")]).unwrap();
        }
        assert_eq!(
            xdel(&mut table, &[arg("s"), arg("2-0")]).unwrap(),
            Frame::Integer(1)
        );
        assert_eq!(
            xtrim(&mut table, &[arg("s"), arg("MAXLEN"), arg("2")]).unwrap(),
            Frame::Integer(1)
        );
        assert_eq!(xlen(&mut table, &[arg("s")]).unwrap(), Frame::Integer(2));
    }
}
