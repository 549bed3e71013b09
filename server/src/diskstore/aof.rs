/*
 * Created on Fri Mar 01 2024
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

//! The append-only file: committed write commands, RESP-encoded, in commit
//! order. Replay parses the file as one long pipeline and feeds every array
//! back through dispatch

use crate::protocol::{self, Command};
use crate::util::error::{CinResult, Error};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// The append-only file name
pub const AOF_FILE: &str = "cinnabar.aof";

/// The appender. When `appendonly` is off nothing is ever written or
/// replayed, but FLUSHDB still clears any stale file
pub struct Aof {
    enabled: bool,
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl Aof {
    pub fn new(dir: &Path, enabled: bool) -> Self {
        Self {
            enabled,
            path: dir.join(AOF_FILE),
            file: Mutex::new(None),
        }
    }
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }
    /// Parse the whole log into commands. Trailing garbage (a torn final
    /// write) is tolerated with a warning; malformed frames in the middle
    /// are fatal corruption
    pub fn replay(&self) -> CinResult<Vec<Command>> {
        if !self.enabled {
            return Ok(Vec::new());
        }
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::ioerror_extra(e, "reading the append-only file")),
        };
        let (frames, consumed) = protocol::parse_pipeline(&raw)
            .map_err(|e| Error::corrupt(format!("append-only file: {e:?}")))?;
        if consumed != raw.len() {
            log::warn!(
                "Dropping {} torn trailing bytes from the append-only file",
                raw.len() - consumed
            );
        }
        let mut commands = Vec::with_capacity(frames.len());
        for frame in frames {
            match Command::from_frame(frame) {
                Ok(Some(cmd)) => commands.push(cmd),
                Ok(None) => {}
                Err(what) => {
                    return Err(Error::corrupt(format!("append-only file: {what}")))
                }
            }
        }
        Ok(commands)
    }
    /// Open (or create) the log for appending. Replay must happen first
    pub fn open_for_append(&self) -> CinResult<()> {
        if !self.enabled {
            return Ok(());
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| Error::ioerror_extra(e, "opening the append-only file"))?;
        *self.file.lock() = Some(file);
        Ok(())
    }
    /// Append one encoded command. Called under the store's write exclusion,
    /// which is what keeps the log in commit order
    pub fn append(&self, encoded: &[u8]) -> std::io::Result<()> {
        if let Some(file) = self.file.lock().as_mut() {
            file.write_all(encoded)?;
        }
        Ok(())
    }
    /// Truncate the log (FLUSHDB)
    pub fn truncate(&self) -> std::io::Result<()> {
        let mut guard = self.file.lock();
        if let Some(file) = guard.as_mut() {
            file.set_len(0)?;
            return Ok(());
        }
        drop(guard);
        // appendonly is off: just drop any file a previous run left behind
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}
