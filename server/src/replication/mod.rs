/*
 * Created on Mon Mar 04 2024
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

//! # Replication
//!
//! The coordinator. On a primary it owns the replication stream: a stable
//! `run_id`, the byte `offset` of everything ever propagated, a bounded
//! backlog of recent stream bytes and one descriptor per connected replica.
//! Writes are propagated under the store's write exclusion, so the stream
//! order always equals the commit order.
//!
//! Each replica descriptor carries an unbounded channel. The handshake
//! registers the channel *while holding the write lock*, then serializes the
//! snapshot: anything committed while the RDB payload is still in flight
//! parks in the channel and flushes right after the snapshot terminator, so
//! no command is ever lost in the transition.
//!
//! On a replica the same struct tracks the link state and the applied
//! offset; `ROLE` reads both sides from here.

pub mod replica;

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::mpsc;

/// Upper bound on buffered recent stream bytes on the primary
pub const BACKLOG_CAPACITY: usize = 1024 * 1024;

/// Which side of replication this process sits on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Master,
    Replica { host: String, port: u16 },
}

/// One connected replica, master-side
pub struct ReplicaHandle {
    pub id: u64,
    pub addr: String,
    pub listening_port: Option<u16>,
    /// Offset acknowledged at registration time
    pub ack_offset: u64,
    tx: mpsc::UnboundedSender<Bytes>,
}

struct ReplInner {
    /// Master: bytes propagated so far. Replica: bytes applied so far
    offset: u64,
    backlog: VecDeque<u8>,
    replicas: Vec<ReplicaHandle>,
    next_replica_id: u64,
    /// Replica-side: whether the link to the primary is up
    link_up: bool,
}

/// The process-wide replication state
pub struct Replication {
    run_id: String,
    role: Role,
    inner: Mutex<ReplInner>,
}

impl Replication {
    fn new(role: Role) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().simple().to_string(),
            role,
            inner: Mutex::new(ReplInner {
                offset: 0,
                backlog: VecDeque::new(),
                replicas: Vec::new(),
                next_replica_id: 0,
                link_up: false,
            }),
        }
    }
    pub fn new_master() -> Self {
        Self::new(Role::Master)
    }
    pub fn new_replica(host: String, port: u16) -> Self {
        Self::new(Role::Replica { host, port })
    }
    /// The stable identifier generated at startup
    pub fn run_id(&self) -> &str {
        &self.run_id
    }
    pub fn role(&self) -> &Role {
        &self.role
    }
    pub fn is_replica(&self) -> bool {
        matches!(self.role, Role::Replica { .. })
    }
    pub fn offset(&self) -> u64 {
        self.inner.lock().offset
    }
    /// Master-side: ship one committed command to the stream. Bumps the
    /// offset, feeds the backlog and fans out to every live replica;
    /// replicas whose channel died are dropped here
    pub fn propagate(&self, encoded: Bytes) {
        let mut inner = self.inner.lock();
        inner.offset += encoded.len() as u64;
        inner.backlog.extend(encoded.iter().copied());
        while inner.backlog.len() > BACKLOG_CAPACITY {
            inner.backlog.pop_front();
        }
        inner.replicas.retain(|replica| {
            if replica.tx.send(encoded.clone()).is_ok() {
                true
            } else {
                log::info!("Replica {} went away", replica.addr);
                false
            }
        });
    }
    /// Master-side: add a replica descriptor and hand back its stream.
    /// The caller must invoke this under the store's write exclusion so the
    /// snapshot it cuts next is exactly the state at registration
    pub fn register_replica(
        &self,
        addr: String,
        listening_port: Option<u16>,
    ) -> (u64, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        let id = inner.next_replica_id;
        inner.next_replica_id += 1;
        let ack_offset = inner.offset;
        inner.replicas.push(ReplicaHandle {
            id,
            addr,
            listening_port,
            ack_offset,
            tx,
        });
        (id, rx)
    }
    /// Master-side: drop a replica descriptor after its connection closed
    pub fn unregister_replica(&self, id: u64) {
        self.inner.lock().replicas.retain(|replica| replica.id != id);
    }
    pub fn replica_count(&self) -> usize {
        self.inner.lock().replicas.len()
    }
    /// Whether an incremental resync from `offset` could be served out of
    /// the backlog. This build always answers PSYNC with a full resync, but
    /// the handshake still consults this to log the decision
    pub fn in_backlog(&self, offset: u64) -> bool {
        let inner = self.inner.lock();
        let backlog_start = inner.offset - inner.backlog.len() as u64;
        offset >= backlog_start && offset <= inner.offset
    }
    /// Replica-side: record the link state
    pub fn set_link(&self, up: bool) {
        self.inner.lock().link_up = up;
    }
    pub fn link_up(&self) -> bool {
        self.inner.lock().link_up
    }
    /// Replica-side: adopt the baseline offset announced by FULLRESYNC
    pub fn set_offset(&self, offset: u64) {
        self.inner.lock().offset = offset;
    }
    /// Replica-side: account for applied stream bytes
    pub fn advance_offset(&self, by: u64) {
        self.inner.lock().offset += by;
    }
    /// The string `ROLE` reports in its first element
    pub fn role_name(&self) -> &'static str {
        match self.role {
            Role::Master => "master",
            Role::Replica { .. } => "slave",
        }
    }
}
