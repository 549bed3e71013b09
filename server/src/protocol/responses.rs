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

//! Pre-compiled responses and the stable error strings

/// Pre-compiled complete replies. These are written to the stream as-is
pub mod full {
    /// The `+OK\r\n` fast path
    pub const R_OKAY: &[u8] = b"+OK\r\n";
    /// The null bulk string fast path
    pub const R_NULL_BULK: &[u8] = b"$-1\r\n";
    /// The null array (aborted EXEC)
    pub const R_NULL_ARRAY: &[u8] = b"*-1\r\n";
}

/// The stable error strings. Every message a client can observe lives here
/// so compatibility is maintained in one place
pub mod groups {
    /// Operation against a key of the wrong kind
    pub const WRONGTYPE: &str =
        "WRONGTYPE Operation against a key holding the wrong kind of value";
    /// A command was issued before a successful `AUTH`
    pub const NOAUTH: &str = "NOAUTH Authentication required.";
    /// The supplied password did not match
    pub const BAD_AUTH: &str = "ERR invalid password";
    /// `AUTH` on a server with no password configured
    pub const AUTH_WITHOUT_PASSWORD: &str =
        "ERR Client sent AUTH, but no password is set";
    /// Generic syntax error
    pub const SYNTAX: &str = "ERR syntax error";
    /// A value that should have been an integer was not
    pub const NOT_INTEGER: &str = "ERR value is not an integer or out of range";
    /// A value that should have been a float was not
    pub const NOT_FLOAT: &str = "ERR value is not a valid float";
    /// An increment or decrement would overflow the 64-bit range
    pub const OVERFLOW: &str = "ERR increment or decrement would overflow";
    /// The source key of a RENAME/COPY was absent
    pub const NO_SUCH_KEY: &str = "ERR no such key";
    /// `LSET` beyond the list bounds
    pub const INDEX_OUT_OF_RANGE: &str = "ERR index out of range";
    /// An explicit XADD id that does not advance the stream
    pub const STREAM_ID_TOO_SMALL: &str =
        "ERR The ID specified in XADD is equal or smaller than the target stream top item";
    /// An XADD/XRANGE id that could not be parsed
    pub const STREAM_ID_INVALID: &str = "ERR Invalid stream ID specified as stream command argument";
    /// `MULTI` inside MULTI
    pub const MULTI_NESTED: &str = "ERR MULTI calls can not be nested";
    /// `EXEC` outside MULTI
    pub const EXEC_WITHOUT_MULTI: &str = "ERR EXEC without MULTI";
    /// `DISCARD` outside MULTI
    pub const DISCARD_WITHOUT_MULTI: &str = "ERR DISCARD without MULTI";
    /// `WATCH` while queuing
    pub const WATCH_IN_MULTI: &str = "ERR WATCH inside MULTI is not allowed";
    /// `UNWATCH` while queuing
    pub const UNWATCH_IN_MULTI: &str = "ERR UNWATCH inside MULTI is not allowed";

    /// `ERR unknown command '<name>'`
    pub fn unknown_command(name: &str) -> String {
        format!("ERR unknown command '{name}'")
    }
    /// `ERR wrong number of arguments for '<name>' command`
    pub fn wrong_arity(name: &str) -> String {
        format!("ERR wrong number of arguments for '{name}' command")
    }
    /// A protocol violation; the connection is closed after this is sent
    pub fn protocol_error(detail: &str) -> String {
        format!("ERR Protocol error: {detail}")
    }
}
