/*
 * Created on Tue Jan 09 2024
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

//! The core library for Cinnabar
//!
//! This contains the tiny set of items which are shared by the server and any
//! companion tooling: version metadata, a generic result alias and terminal
//! helpers

pub mod util;

use std::error::Error;

/// A generic result
pub type TResult<T> = Result<T, Box<dyn Error>>;

/// The size of the read buffer in bytes
pub const BUF_CAP: usize = 8 * 1024; // 8 KB per-connection

/// The current version of the server
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The project URL
pub const URL: &str = "https://github.com/cinnabar-db/cinnabar";
