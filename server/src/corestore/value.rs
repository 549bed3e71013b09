/*
 * Created on Wed Feb 07 2024
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

use super::data::Data;
use super::stream::Stream;
use super::zset::Zset;
use std::collections::{HashMap, HashSet, VecDeque};

/// The tagged value variant. A key's tag is fixed for its lifetime; commands
/// that assume a different tag fail with `WRONGTYPE`
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(Data),
    List(VecDeque<Data>),
    Set(HashSet<Data>),
    Hash(HashMap<Data, Data>),
    Zset(Zset),
    Stream(Stream),
}

impl Value {
    /// The name reported by `TYPE` and matched by `SCAN ... TYPE`
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Set(_) => "set",
            Value::Hash(_) => "hash",
            Value::Zset(_) => "zset",
            Value::Stream(_) => "stream",
        }
    }
    /// A rough payload size estimate in bytes, reported by `MEMORY USAGE`
    pub fn mem_usage(&self) -> usize {
        match self {
            Value::Str(s) => s.len(),
            Value::List(items) => items.iter().map(|item| item.len() + 16).sum(),
            Value::Set(members) => members.iter().map(|member| member.len() + 16).sum(),
            Value::Hash(fields) => fields
                .iter()
                .map(|(field, value)| field.len() + value.len() + 32)
                .sum(),
            Value::Zset(zset) => zset.mem_usage(),
            Value::Stream(stream) => stream.mem_usage(),
        }
    }
    /// Whether the underlying collection is empty. An empty collection means
    /// the key should be dropped; a plain string is never "empty" this way
    pub fn is_hollow(&self) -> bool {
        match self {
            Value::Str(_) => false,
            Value::List(items) => items.is_empty(),
            Value::Set(members) => members.is_empty(),
            Value::Hash(fields) => fields.is_empty(),
            Value::Zset(zset) => zset.is_empty(),
            // streams keep their identity (and last id) even when emptied
            Value::Stream(_) => false,
        }
    }
}
