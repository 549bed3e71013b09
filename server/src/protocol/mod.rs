/*
 * Created on Mon Feb 05 2024
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

//! # The RESP2 wire protocol
//!
//! This module implements deserialization of the five RESP2 frame kinds
//! (simple string, error, integer, bulk string, array) along with the inline
//! command fallback used by legacy telnet-style clients. The parser operates
//! directly on the connection's read buffer and reports how many bytes each
//! frame consumed so the caller can advance the buffer, exactly one frame at
//! a time or as a pipelined batch.

pub mod encoder;
pub mod responses;

use bytes::Bytes;

/// The maximum size of a single bulk string: 512 MiB
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;
/// The maximum number of elements in a single array frame
pub const MAX_ARRAY_LEN: usize = 1_048_576;
/// The maximum size of a whole frame: 1 GiB
pub const MAX_FRAME_SIZE: usize = 1024 * 1024 * 1024;

/// A single RESP2 frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A simple string (`+`)
    Simple(String),
    /// An error (`-`)
    Error(String),
    /// A signed 64-bit integer (`:`)
    Integer(i64),
    /// A bulk string (`$<len>`)
    Bulk(Bytes),
    /// The null bulk string (`$-1`)
    NullBulk,
    /// An array (`*<len>`)
    Array(Vec<Frame>),
    /// The null array (`*-1`)
    NullArray,
}

impl Frame {
    /// The canonical `+OK` reply
    pub fn ok() -> Self {
        Frame::Simple("OK".to_owned())
    }
    /// A bulk string frame copied out of a byte slice
    pub fn bulk(payload: impl AsRef<[u8]>) -> Self {
        Frame::Bulk(Bytes::copy_from_slice(payload.as_ref()))
    }
    /// Returns true if this frame is an error frame
    pub fn is_error(&self) -> bool {
        matches!(self, Frame::Error(_))
    }
}

#[derive(Debug, PartialEq)]
/// Outcome of a failed parse attempt
pub enum ParseError {
    /// More data needs to be read before the frame is complete
    NotEnough,
    /// The frame began with a byte that is not a valid type prefix
    UnknownPrefix(u8),
    /// A line terminator was not exactly CRLF
    BadLineEnding,
    /// A length prefix was not a valid integer, or an integer frame held junk
    InvalidLength,
    /// A declared size exceeded the protocol limits
    TooLarge,
}

pub type ParseResult<T> = Result<T, ParseError>;

/// A parsed frame along with the number of buffer bytes it consumed
pub type FrameWithAdvance = (Frame, usize);

const PREFIXES: [u8; 5] = [b'+', b'-', b':', b'$', b'*'];

/// The RESP2 frame parser. Construct one over the read buffer and call
/// [`Parser::parse`]; the buffer is never modified
pub struct Parser<'a> {
    buf: &'a [u8],
    cursor: usize,
}

impl<'a> Parser<'a> {
    pub const fn new(buf: &'a [u8]) -> Self {
        Self { buf, cursor: 0 }
    }
    /// Parse exactly one frame off the front of the buffer, falling back to
    /// the inline command form when the first byte is not a RESP prefix
    pub fn parse(buf: &'a [u8]) -> ParseResult<FrameWithAdvance> {
        let mut slf = Self::new(buf);
        if buf.is_empty() {
            return Err(ParseError::NotEnough);
        }
        let frame = if PREFIXES.contains(&buf[0]) {
            slf.frame()?
        } else {
            slf.inline()?
        };
        Ok((frame, slf.cursor))
    }
    fn remaining(&self) -> &'a [u8] {
        &self.buf[self.cursor..]
    }
    fn next_byte(&mut self) -> ParseResult<u8> {
        match self.buf.get(self.cursor) {
            Some(b) => {
                self.cursor += 1;
                Ok(*b)
            }
            None => Err(ParseError::NotEnough),
        }
    }
    /// Read one CRLF-terminated line (strict: a lone LF is rejected) and
    /// return its payload without the terminator
    fn line(&mut self) -> ParseResult<&'a [u8]> {
        let rem = self.remaining();
        let lf = match rem.iter().position(|b| *b == b'\n') {
            Some(position) => position,
            None => return Err(ParseError::NotEnough),
        };
        if lf == 0 || rem[lf - 1] != b'\r' {
            return Err(ParseError::BadLineEnding);
        }
        self.cursor += lf + 1;
        Ok(&rem[..lf - 1])
    }
    /// Parse a signed decimal off a line payload (used for lengths and for
    /// integer frames)
    fn decode_integer(line: &[u8]) -> ParseResult<i64> {
        let (digits, negative) = match line.first() {
            Some(b'-') => (&line[1..], true),
            Some(_) => (line, false),
            None => return Err(ParseError::InvalidLength),
        };
        if digits.is_empty() {
            return Err(ParseError::InvalidLength);
        }
        let mut int: i64 = 0;
        for byte in digits {
            let digit = match byte.checked_sub(b'0') {
                Some(d) if d <= 9 => i64::from(d),
                _ => return Err(ParseError::InvalidLength),
            };
            int = int
                .checked_mul(10)
                .and_then(|v| v.checked_add(digit))
                .ok_or(ParseError::InvalidLength)?;
        }
        Ok(if negative { -int } else { int })
    }
    /// Parse one frame, recursing into arrays. Unknown prefixes are an error
    /// here; the inline fallback only applies at the top level
    fn frame(&mut self) -> ParseResult<Frame> {
        if self.cursor > MAX_FRAME_SIZE {
            return Err(ParseError::TooLarge);
        }
        let prefix = self.next_byte()?;
        match prefix {
            b'+' => {
                let line = self.line()?;
                Ok(Frame::Simple(String::from_utf8_lossy(line).into_owned()))
            }
            b'-' => {
                let line = self.line()?;
                Ok(Frame::Error(String::from_utf8_lossy(line).into_owned()))
            }
            b':' => {
                let line = self.line()?;
                Ok(Frame::Integer(Self::decode_integer(line)?))
            }
            b'$' => {
                let len = Self::decode_integer(self.line()?)?;
                if len == -1 {
                    return Ok(Frame::NullBulk);
                }
                if len < 0 {
                    return Err(ParseError::InvalidLength);
                }
                let len = len as usize;
                if len > MAX_BULK_SIZE {
                    return Err(ParseError::TooLarge);
                }
                let rem = self.remaining();
                if rem.len() < len + 2 {
                    return Err(ParseError::NotEnough);
                }
                if &rem[len..len + 2] != b"\r\n" {
                    return Err(ParseError::BadLineEnding);
                }
                let payload = Bytes::copy_from_slice(&rem[..len]);
                self.cursor += len + 2;
                Ok(Frame::Bulk(payload))
            }
            b'*' => {
                let len = Self::decode_integer(self.line()?)?;
                if len == -1 {
                    return Ok(Frame::NullArray);
                }
                if len < 0 {
                    return Err(ParseError::InvalidLength);
                }
                let len = len as usize;
                if len > MAX_ARRAY_LEN {
                    return Err(ParseError::TooLarge);
                }
                let mut items = Vec::with_capacity(len.min(1024));
                for _ in 0..len {
                    items.push(self.frame()?);
                }
                Ok(Frame::Array(items))
            }
            other => Err(ParseError::UnknownPrefix(other)),
        }
    }
    /// The inline command fallback: consume the rest of the line leniently
    /// (LF, CRLF or a stray trailing CR are all accepted) and split it on
    /// whitespace into a command array
    fn inline(&mut self) -> ParseResult<Frame> {
        let rem = self.remaining();
        let lf = match rem.iter().position(|b| *b == b'\n') {
            Some(position) => position,
            None => return Err(ParseError::NotEnough),
        };
        let mut line = &rem[..lf];
        if line.last() == Some(&b'\r') {
            line = &line[..line.len() - 1];
        }
        self.cursor += lf + 1;
        let items = line
            .split(|b| b.is_ascii_whitespace())
            .filter(|part| !part.is_empty())
            .map(|part| Frame::Bulk(Bytes::copy_from_slice(part)))
            .collect();
        Ok(Frame::Array(items))
    }
}

/// Parse as many complete frames as are already buffered, without blocking.
/// A partial trailing frame is left for the next call. Protocol violations
/// abort the whole batch
pub fn parse_pipeline(buf: &[u8]) -> ParseResult<(Vec<Frame>, usize)> {
    let mut frames = Vec::new();
    let mut consumed = 0;
    while consumed < buf.len() {
        match Parser::parse(&buf[consumed..]) {
            Ok((frame, advance)) => {
                frames.push(frame);
                consumed += advance;
            }
            Err(ParseError::NotEnough) => break,
            Err(e) => return Err(e),
        }
    }
    Ok((frames, consumed))
}

/// A client command: the name followed by its arguments, all binary-safe
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    parts: Vec<Bytes>,
}

impl Command {
    /// Build a command from raw parts. The first part is the command name
    pub fn from_parts(parts: Vec<Bytes>) -> Option<Self> {
        if parts.is_empty() {
            None
        } else {
            Some(Self { parts })
        }
    }
    /// Convert a decoded frame into a command. Only arrays of bulk or simple
    /// strings qualify; a null bulk element becomes an empty argument. An
    /// empty array (a blank inline line) yields `None` and is skipped
    pub fn from_frame(frame: Frame) -> Result<Option<Self>, &'static str> {
        let items = match frame {
            Frame::Array(items) => items,
            _ => return Err("expected an array of bulk strings"),
        };
        let mut parts = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Frame::Bulk(payload) => parts.push(payload),
                Frame::NullBulk => parts.push(Bytes::new()),
                Frame::Simple(s) => parts.push(Bytes::from(s.into_bytes())),
                _ => return Err("expected an array of bulk strings"),
            }
        }
        Ok(Self::from_parts(parts))
    }
    /// The command name, as sent
    pub fn name(&self) -> &[u8] {
        &self.parts[0]
    }
    /// The command name normalized to uppercase for registry lookup
    pub fn name_uppercase(&self) -> String {
        String::from_utf8_lossy(&self.parts[0]).to_ascii_uppercase()
    }
    /// The arguments (everything after the name)
    pub fn args(&self) -> &[Bytes] {
        &self.parts[1..]
    }
    /// The number of arguments, excluding the name
    pub fn arg_count(&self) -> usize {
        self.parts.len() - 1
    }
    /// All parts including the name
    pub fn parts(&self) -> &[Bytes] {
        &self.parts
    }
    /// The canonical RESP encoding of this command, used for the AOF and
    /// the replication stream
    pub fn encoded(&self) -> Bytes {
        encoder::encode_command_parts(&self.parts)
    }
}
