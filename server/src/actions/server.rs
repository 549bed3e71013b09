/*
 * Created on Fri Feb 23 2024
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

//! Table-local server commands: PING, ECHO and the MEMORY subcommands.
//! Everything that touches configuration, persistence or replication state
//! is dispatched at the engine layer instead

use super::{keyword_eq, usize_frame, ActionError, ActionResult};
use crate::corestore::Coretable;
use crate::protocol::Frame;
use bytes::Bytes;

/// `PING [message]`
pub fn ping(_store: &mut Coretable, args: &[Bytes]) -> ActionResult<Frame> {
    match args.first() {
        Some(message) => Ok(Frame::Bulk(message.clone())),
        None => Ok(Frame::Simple("PONG".to_owned())),
    }
}

/// `ECHO message`
pub fn echo(_store: &mut Coretable, args: &[Bytes]) -> ActionResult<Frame> {
    Ok(Frame::Bulk(args[0].clone()))
}

/// `MEMORY USAGE key` / `MEMORY STATS`
pub fn memory(store: &mut Coretable, args: &[Bytes]) -> ActionResult<Frame> {
    if keyword_eq(&args[0], "USAGE") {
        let key = match args.get(1) {
            Some(key) => key,
            None => return Err(ActionError::syntax()),
        };
        return Ok(match store.entry(key) {
            Some(entry) => usize_frame(key.len() + entry.value.mem_usage()),
            None => Frame::NullBulk,
        });
    }
    if keyword_eq(&args[0], "STATS") {
        let pairs = [
            ("keys.count", store.live_len()),
            ("dataset.bytes", store.mem_usage_total()),
            ("keys.with-expiry", store.volatile_len()),
        ];
        let mut flat = Vec::with_capacity(pairs.len() * 2);
        for (name, value) in pairs {
            flat.push(Frame::bulk(name.as_bytes()));
            flat.push(usize_frame(value));
        }
        return Ok(Frame::Array(flat));
    }
    Err(ActionError::new(format!(
        "ERR unknown MEMORY subcommand '{}'",
        String::from_utf8_lossy(&args[0])
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corestore::strings::StringStore;

    fn arg(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn ping_with_and_without_message() {
        let mut table = Coretable::new();
        assert_eq!(
            ping(&mut table, &[]).unwrap(),
            Frame::Simple("PONG".to_owned())
        );
        assert_eq!(ping(&mut table, &[arg("hi")]).unwrap(), Frame::bulk(b"hi"));
        assert_eq!(echo(&mut table, &[arg("yo")]).unwrap(), Frame::bulk(b"yo"));
    }

    #[test]
    fn memory_usage_reports_an_estimate() {
        let mut table = Coretable::new();
        table.set_string("k".into(), "hello".into(), None);
        match memory(&mut table, &[arg("USAGE"), arg("k")]).unwrap() {
            Frame::Integer(bytes) => assert!(bytes >= 6),
            other => panic!("unexpected reply: {other:?}"),
        }
        assert_eq!(
            memory(&mut table, &[arg("USAGE"), arg("ghost")]).unwrap(),
            Frame::NullBulk
        );
        assert!(memory(&mut table, &[arg("DOCTOR")]).is_err());
    }

    #[test]
    fn memory_stats_shape() {
        let mut table = Coretable::new();
        table.set_string("k".into(), "v".into(), None);
        match memory(&mut table, &[arg("STATS")]).unwrap() {
            Frame::Array(items) => assert_eq!(items.len(), 6),
            other => panic!("unexpected reply: {other:?}"),
        }
    }
}
