/*
 * Created on Thu Feb 29 2024
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

use crate::config::ConfigError;
use std::fmt;
use std::io::Error as IoError;

pub type CinResult<T> = Result<T, Error>;

/// Process-level failures: startup, persistence, replication plumbing.
/// Command-level failures never travel through this type
#[derive(Debug)]
pub enum Error {
    Io(IoError),
    IoExtra(IoError, String),
    Config(ConfigError),
    /// A persistence file failed validation; refusing to load it is fatal
    Corrupt(String),
    Other(String),
}

impl Error {
    pub fn ioerror_extra(ioe: IoError, extra: impl ToString) -> Self {
        Self::IoExtra(ioe, extra.to_string())
    }
    pub fn corrupt(what: impl ToString) -> Self {
        Self::Corrupt(what.to_string())
    }
    pub fn other(what: impl ToString) -> Self {
        Self::Other(what.to_string())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(ioe) => write!(f, "I/O error: {}", ioe),
            Self::IoExtra(ioe, extra) => write!(f, "I/O error while {extra}: {ioe}"),
            Self::Config(cfge) => write!(f, "{}", cfge),
            Self::Corrupt(what) => write!(f, "corrupt persistence file: {}", what),
            Self::Other(what) => write!(f, "error: {}", what),
        }
    }
}

impl From<IoError> for Error {
    fn from(ioe: IoError) -> Self {
        Self::Io(ioe)
    }
}

impl From<ConfigError> for Error {
    fn from(cfge: ConfigError) -> Self {
        Self::Config(cfge)
    }
}
