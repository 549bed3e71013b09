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

//! # Actions
//!
//! Actions are the command handlers: each one decodes its arguments, drives
//! the store through the narrowest capability trait it needs and produces a
//! reply frame. Handlers are pure with respect to I/O, which keeps every one
//! of them testable against a bare table (or a mock implementing the trait)

pub mod hashes;
pub mod keyspace;
pub mod lists;
pub mod server;
pub mod sets;
pub mod streams;
pub mod strings;
pub mod zsets;

use crate::corestore::{Data, StoreError};
use crate::protocol::{responses::groups, Frame};

/// A command-level failure carrying the exact error string the client sees
#[derive(Debug, PartialEq)]
pub struct ActionError(String);

impl ActionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
    pub fn syntax() -> Self {
        Self(groups::SYNTAX.to_owned())
    }
    /// Convert into the RESP error frame the dispatcher writes out
    pub fn into_frame(self) -> Frame {
        Frame::Error(self.0)
    }
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl From<StoreError> for ActionError {
    fn from(e: StoreError) -> Self {
        let message = match e {
            StoreError::WrongType => groups::WRONGTYPE,
            StoreError::NotInteger => groups::NOT_INTEGER,
            StoreError::NotFloat => groups::NOT_FLOAT,
            StoreError::Overflow => groups::OVERFLOW,
            StoreError::NoSuchKey => groups::NO_SUCH_KEY,
            StoreError::IndexOutOfRange => groups::INDEX_OUT_OF_RANGE,
            StoreError::StreamIdTooSmall => groups::STREAM_ID_TOO_SMALL,
            StoreError::InvalidStreamId => groups::STREAM_ID_INVALID,
        };
        Self(message.to_owned())
    }
}

/// A generic result for actions
pub type ActionResult<T> = Result<T, ActionError>;

/// Decode an integer argument
pub fn parse_int_arg(raw: &[u8]) -> ActionResult<i64> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ActionError::new(groups::NOT_INTEGER))
}

/// Decode a float argument; NaN is rejected
pub fn parse_float_arg(raw: &[u8]) -> ActionResult<f64> {
    let parsed: f64 = std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ActionError::new(groups::NOT_FLOAT))?;
    if parsed.is_nan() {
        Err(ActionError::new(groups::NOT_FLOAT))
    } else {
        Ok(parsed)
    }
}

/// Decode a non-negative count/cursor style argument
pub fn parse_count_arg(raw: &[u8]) -> ActionResult<usize> {
    let value = parse_int_arg(raw)?;
    if value < 0 {
        Err(ActionError::syntax())
    } else {
        Ok(value as usize)
    }
}

/// Case-insensitive keyword comparison for option tokens like `EX`, `MATCH`
/// or `WITHSCORES`
pub fn keyword_eq(raw: &[u8], keyword: &str) -> bool {
    raw.eq_ignore_ascii_case(keyword.as_bytes())
}

// small frame constructors shared by the handlers

pub fn int_frame(value: i64) -> Frame {
    Frame::Integer(value)
}

pub fn usize_frame(value: usize) -> Frame {
    Frame::Integer(value as i64)
}

pub fn bulk_frame(data: Data) -> Frame {
    Frame::Bulk(data.into_blob())
}

pub fn opt_bulk_frame(data: Option<Data>) -> Frame {
    match data {
        Some(data) => bulk_frame(data),
        None => Frame::NullBulk,
    }
}

pub fn data_array_frame(items: Vec<Data>) -> Frame {
    Frame::Array(items.into_iter().map(bulk_frame).collect())
}
