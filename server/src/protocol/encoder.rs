/*
 * Created on Tue Feb 06 2024
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

//! Serialization of [`Frame`]s into canonical RESP2 byte sequences

use super::{responses::full, Frame};
use bytes::Bytes;

/// Append the canonical encoding of `frame` to `out`. The common `+OK` and
/// null bulk replies take a pre-compiled fast path
pub fn encode(frame: &Frame, out: &mut Vec<u8>) {
    match frame {
        Frame::Simple(s) if s == "OK" => out.extend_from_slice(full::R_OKAY),
        Frame::Simple(s) => {
            out.push(b'+');
            out.extend_from_slice(s.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        Frame::Error(e) => {
            out.push(b'-');
            out.extend_from_slice(e.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        Frame::Integer(int) => {
            out.push(b':');
            out.extend_from_slice(int.to_string().as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        Frame::Bulk(payload) => {
            out.push(b'$');
            out.extend_from_slice(payload.len().to_string().as_bytes());
            out.extend_from_slice(b"\r\n");
            out.extend_from_slice(payload);
            out.extend_from_slice(b"\r\n");
        }
        Frame::NullBulk => out.extend_from_slice(full::R_NULL_BULK),
        Frame::Array(items) => {
            out.push(b'*');
            out.extend_from_slice(items.len().to_string().as_bytes());
            out.extend_from_slice(b"\r\n");
            for item in items {
                encode(item, out);
            }
        }
        Frame::NullArray => out.extend_from_slice(full::R_NULL_ARRAY),
    }
}

/// Encode a frame into a freshly allocated buffer
pub fn encode_to_bytes(frame: &Frame) -> Bytes {
    let mut out = Vec::new();
    encode(frame, &mut out);
    Bytes::from(out)
}

/// Encode raw command parts as an array of bulk strings. This is the byte
/// form appended to the AOF and shipped down the replication stream
pub fn encode_command_parts(parts: &[Bytes]) -> Bytes {
    let mut out = Vec::with_capacity(16 + parts.iter().map(|p| p.len() + 16).sum::<usize>());
    out.push(b'*');
    out.extend_from_slice(parts.len().to_string().as_bytes());
    out.extend_from_slice(b"\r\n");
    for part in parts {
        out.push(b'$');
        out.extend_from_slice(part.len().to_string().as_bytes());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(part);
        out.extend_from_slice(b"\r\n");
    }
    Bytes::from(out)
}
