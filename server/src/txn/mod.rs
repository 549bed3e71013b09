/*
 * Created on Tue Feb 27 2024
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

//! # Transactions
//!
//! The MULTI/EXEC/WATCH state for a single connection. The state lives
//! inside the connection task and dies with it; there is no cross-connection
//! registry of transactions. WATCH is optimistic: it records the watched
//! key's version at watch time and EXEC compares versions — under the
//! store's write exclusion — instead of taking any lock of its own

use crate::corestore::{Coretable, Data};
use crate::protocol::Command;

/// The two states of the per-connection machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Queuing,
}

/// Per-connection transaction state
#[derive(Debug)]
pub struct TxnState {
    state: State,
    queue: Vec<Command>,
    watched: Vec<(Data, u64)>,
}

impl Default for TxnState {
    fn default() -> Self {
        Self::new()
    }
}

impl TxnState {
    pub const fn new() -> Self {
        Self {
            state: State::Idle,
            queue: Vec::new(),
            watched: Vec::new(),
        }
    }
    pub fn is_queuing(&self) -> bool {
        self.state == State::Queuing
    }
    /// `MULTI`: errors if already queuing
    pub fn begin(&mut self) -> Result<(), ()> {
        if self.is_queuing() {
            return Err(());
        }
        self.state = State::Queuing;
        self.queue.clear();
        Ok(())
    }
    /// Buffer a command for EXEC
    pub fn push(&mut self, cmd: Command) {
        self.queue.push(cmd);
    }
    /// `DISCARD`: drop the queue and the watch set
    pub fn discard(&mut self) {
        self.state = State::Idle;
        self.queue.clear();
        self.watched.clear();
    }
    /// `WATCH`: remember the key at its current version. The expiry check
    /// runs first so that a key which lapsed since the last touch counts as
    /// mutated from here on
    pub fn watch(&mut self, table: &mut Coretable, key: &[u8]) {
        table.expire_if_needed(key);
        let version = table.version_of(key);
        self.watched.push((Data::copy_from_slice(key), version));
    }
    /// `UNWATCH`
    pub fn unwatch(&mut self) {
        self.watched.clear();
    }
    /// EXEC-time validation: true if any watched key moved past its recorded
    /// version (TTL expiry observed here counts as a mutation)
    pub fn invalidated(&self, table: &mut Coretable) -> bool {
        self.watched.iter().any(|(key, version)| {
            table.expire_if_needed(key);
            table.version_of(key) != *version
        })
    }
    /// Leave the queuing state, handing the buffered commands to EXEC.
    /// Watches are consumed as well: EXEC always clears them
    pub fn take_queue(&mut self) -> Vec<Command> {
        self.state = State::Idle;
        self.watched.clear();
        std::mem::take(&mut self.queue)
    }
    /// Whether this command name is one of the transaction-control verbs
    /// that bypass queuing
    pub fn is_control_verb(name: &str) -> bool {
        matches!(name, "MULTI" | "EXEC" | "DISCARD" | "WATCH" | "UNWATCH")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corestore::strings::StringStore;
    use bytes::Bytes;

    fn cmd(parts: &[&str]) -> Command {
        Command::from_parts(
            parts
                .iter()
                .map(|part| Bytes::copy_from_slice(part.as_bytes()))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn multi_cannot_nest() {
        let mut txn = TxnState::new();
        assert!(txn.begin().is_ok());
        assert!(txn.begin().is_err());
        txn.discard();
        assert!(txn.begin().is_ok());
    }

    #[test]
    fn queue_then_take() {
        let mut txn = TxnState::new();
        txn.begin().unwrap();
        txn.push(cmd(&["SET", "a", "1"]));
        txn.push(cmd(&["GET", "a"]));
        assert!(txn.is_queuing());
        let queue = txn.take_queue();
        assert_eq!(queue.len(), 2);
        assert!(!txn.is_queuing());
        assert!(txn.take_queue().is_empty());
    }

    #[test]
    fn watch_detects_mutation() {
        let mut table = Coretable::new();
        table.set_string("x".into(), "0".into(), None);
        let mut txn = TxnState::new();
        txn.watch(&mut table, b"x");
        assert!(!txn.invalidated(&mut table));
        // another connection writes the watched key
        table.set_string("x".into(), "1".into(), None);
        assert!(txn.invalidated(&mut table));
    }

    #[test]
    fn watch_detects_deletion_and_expiry() {
        let mut table = Coretable::new();
        use crate::corestore::keyspace::KeyspaceStore;
        table.set_string("x".into(), "0".into(), None);
        let mut txn = TxnState::new();
        txn.watch(&mut table, b"x");
        table.remove_key(b"x");
        assert!(txn.invalidated(&mut table));

        let mut table = Coretable::new();
        table.set_string("y".into(), "0".into(), None);
        let mut txn = TxnState::new();
        txn.watch(&mut table, b"y");
        table.expire_key(b"y", 1); // far in the past
        assert!(txn.invalidated(&mut table));
    }

    #[test]
    fn watch_on_absent_key_sees_creation() {
        let mut table = Coretable::new();
        let mut txn = TxnState::new();
        txn.watch(&mut table, b"fresh");
        assert!(!txn.invalidated(&mut table));
        table.set_string("fresh".into(), "v".into(), None);
        assert!(txn.invalidated(&mut table));
    }

    #[test]
    fn unwatch_resets() {
        let mut table = Coretable::new();
        table.set_string("x".into(), "0".into(), None);
        let mut txn = TxnState::new();
        txn.watch(&mut table, b"x");
        table.set_string("x".into(), "1".into(), None);
        txn.unwatch();
        assert!(!txn.invalidated(&mut table));
    }

    #[test]
    fn control_verbs() {
        for verb in ["MULTI", "EXEC", "DISCARD", "WATCH", "UNWATCH"] {
            assert!(TxnState::is_control_verb(verb));
        }
        assert!(!TxnState::is_control_verb("SET"));
    }
}
