/*
 * Created on Mon Feb 26 2024
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

//! # The command registry
//!
//! One record per data command: arity, read-only flag and the handler.
//! Lookups normalize the name to uppercase, so the table stores each name
//! exactly once. Commands that need engine state (persistence, replication,
//! configuration, transactions, auth) are not in this table; the query
//! engine intercepts them before consulting the registry

use crate::actions::{self, ActionResult};
use crate::corestore::Coretable;
use crate::protocol::Frame;
use bytes::Bytes;

/// A command handler: table in, frame out. Handlers run under the store's
/// write discipline arranged by the dispatcher
pub type Handler = fn(&mut Coretable, &[Bytes]) -> ActionResult<Frame>;

/// How many arguments (excluding the name) a command accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
}

impl Arity {
    pub fn accepts(&self, count: usize) -> bool {
        match self {
            Arity::Exact(n) => count == *n,
            Arity::AtLeast(n) => count >= *n,
        }
    }
}

/// One registry record
pub struct CmdSpec {
    pub arity: Arity,
    pub readonly: bool,
    pub run: Handler,
}

macro_rules! registry {
    ($($name:literal => $arity:expr, $readonly:expr, $run:expr);* $(;)?) => {
        /// Look up a command by its uppercase-normalized name
        pub fn lookup(name: &str) -> Option<&'static CmdSpec> {
            match name {
                $($name => {
                    static SPEC: CmdSpec = CmdSpec {
                        arity: $arity,
                        readonly: $readonly,
                        run: $run,
                    };
                    Some(&SPEC)
                })*
                _ => None,
            }
        }
        /// Every registered command name (used by INFO)
        pub const COMMAND_COUNT: usize = [$($name),*].len();
    };
}

use Arity::{AtLeast, Exact};

registry! {
    // strings
    "SET" => AtLeast(2), false, actions::strings::set::<Coretable>;
    "GET" => Exact(1), true, actions::strings::get::<Coretable>;
    "APPEND" => Exact(2), false, actions::strings::append::<Coretable>;
    "STRLEN" => Exact(1), true, actions::strings::strlen::<Coretable>;
    "GETRANGE" => Exact(3), true, actions::strings::getrange::<Coretable>;
    "INCR" => Exact(1), false, actions::strings::incr::<Coretable>;
    "DECR" => Exact(1), false, actions::strings::decr::<Coretable>;
    "INCRBY" => Exact(2), false, actions::strings::incrby::<Coretable>;
    "DECRBY" => Exact(2), false, actions::strings::decrby::<Coretable>;
    "INCRBYFLOAT" => Exact(2), false, actions::strings::incrbyfloat::<Coretable>;
    // key management
    "DEL" => AtLeast(1), false, actions::keyspace::del::<Coretable>;
    "EXISTS" => AtLeast(1), true, actions::keyspace::exists::<Coretable>;
    "KEYS" => Exact(1), true, actions::keyspace::keys::<Coretable>;
    "DBSIZE" => Exact(0), true, actions::keyspace::dbsize::<Coretable>;
    "SCAN" => AtLeast(1), true, actions::keyspace::scan::<Coretable>;
    "TTL" => Exact(1), true, actions::keyspace::ttl::<Coretable>;
    "PTTL" => Exact(1), true, actions::keyspace::pttl::<Coretable>;
    "EXPIRE" => Exact(2), false, actions::keyspace::expire::<Coretable>;
    "TYPE" => Exact(1), true, actions::keyspace::type_of::<Coretable>;
    "RENAME" => Exact(2), false, actions::keyspace::rename::<Coretable>;
    "RENAMENX" => Exact(2), false, actions::keyspace::renamenx::<Coretable>;
    "COPY" => AtLeast(2), false, actions::keyspace::copy::<Coretable>;
    // lists
    "LPUSH" => AtLeast(2), false, actions::lists::lpush::<Coretable>;
    "RPUSH" => AtLeast(2), false, actions::lists::rpush::<Coretable>;
    "LPOP" => Exact(1), false, actions::lists::lpop::<Coretable>;
    "RPOP" => Exact(1), false, actions::lists::rpop::<Coretable>;
    "LLEN" => Exact(1), true, actions::lists::llen::<Coretable>;
    "LRANGE" => Exact(3), true, actions::lists::lrange::<Coretable>;
    "LINDEX" => Exact(2), true, actions::lists::lindex::<Coretable>;
    "LSET" => Exact(3), false, actions::lists::lset::<Coretable>;
    "LREM" => Exact(3), false, actions::lists::lrem::<Coretable>;
    "LTRIM" => Exact(3), false, actions::lists::ltrim::<Coretable>;
    // sets
    "SADD" => AtLeast(2), false, actions::sets::sadd::<Coretable>;
    "SREM" => AtLeast(2), false, actions::sets::srem::<Coretable>;
    "SISMEMBER" => Exact(2), true, actions::sets::sismember::<Coretable>;
    "SMEMBERS" => Exact(1), true, actions::sets::smembers::<Coretable>;
    "SCARD" => Exact(1), true, actions::sets::scard::<Coretable>;
    "SPOP" => Exact(1), false, actions::sets::spop::<Coretable>;
    "SSCAN" => AtLeast(2), true, actions::sets::sscan::<Coretable>;
    // hashes
    "HSET" => AtLeast(3), false, actions::hashes::hset::<Coretable>;
    "HGET" => Exact(2), true, actions::hashes::hget::<Coretable>;
    "HDEL" => AtLeast(2), false, actions::hashes::hdel::<Coretable>;
    "HEXISTS" => Exact(2), true, actions::hashes::hexists::<Coretable>;
    "HGETALL" => Exact(1), true, actions::hashes::hgetall::<Coretable>;
    "HKEYS" => Exact(1), true, actions::hashes::hkeys::<Coretable>;
    "HVALS" => Exact(1), true, actions::hashes::hvals::<Coretable>;
    "HLEN" => Exact(1), true, actions::hashes::hlen::<Coretable>;
    "HINCRBY" => Exact(3), false, actions::hashes::hincrby::<Coretable>;
    "HINCRBYFLOAT" => Exact(3), false, actions::hashes::hincrbyfloat::<Coretable>;
    "HSCAN" => AtLeast(2), true, actions::hashes::hscan::<Coretable>;
    // sorted sets
    "ZADD" => AtLeast(3), false, actions::zsets::zadd::<Coretable>;
    "ZREM" => AtLeast(2), false, actions::zsets::zrem::<Coretable>;
    "ZCARD" => Exact(1), true, actions::zsets::zcard::<Coretable>;
    "ZSCORE" => Exact(2), true, actions::zsets::zscore::<Coretable>;
    "ZRANGE" => AtLeast(3), true, actions::zsets::zrange::<Coretable>;
    "ZPOPMIN" => AtLeast(1), false, actions::zsets::zpopmin::<Coretable>;
    // streams
    "XADD" => AtLeast(4), false, actions::streams::xadd::<Coretable>;
    "XLEN" => Exact(1), true, actions::streams::xlen::<Coretable>;
    "XRANGE" => AtLeast(3), true, actions::streams::xrange::<Coretable>;
    "XDEL" => AtLeast(2), false, actions::streams::xdel::<Coretable>;
    "XTRIM" => Exact(3), false, actions::streams::xtrim::<Coretable>;
    "XREAD" => AtLeast(3), true, actions::streams::xread::<Coretable>;
    // connection-local trivia
    "PING" => AtLeast(0), true, actions::server::ping;
    "ECHO" => Exact(1), true, actions::server::echo;
    "MEMORY" => AtLeast(1), true, actions::server::memory;
}
