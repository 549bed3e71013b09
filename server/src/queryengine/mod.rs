/*
 * Created on Tue Mar 05 2024
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

//! # The query engine
//!
//! [`Engine`] bundles the shared pieces — store, persistence, replication,
//! configuration, counters — behind one clonable handle, and `execute` is
//! the single entry point every client command funnels through (transaction
//! gate, control verbs, registry dispatch).
//!
//! The write path invariant lives here: a write handler runs under the
//! store's write lock, and its propagation (AOF append + replication
//! fan-out) happens before that lock is released. The AOF, the replication
//! stream and the key-version counters therefore all observe the same total
//! order. An EXEC block holds the lock across every queued command, so the
//! block is one contiguous run in that order.

use crate::config::ConfigurationSet;
use crate::corestore::{Coretable, Corestore};
use crate::diskstore::{self, Persistence};
use crate::protocol::responses::groups;
use crate::protocol::{encoder, Command, Frame};
use crate::registry;
use crate::replication::Replication;
use crate::txn::TxnState;
use crate::util::error::CinResult;
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Process-wide counters surfaced by INFO. Detailed metrics collection is an
/// external concern; these are the handful the sections need
#[derive(Debug)]
pub struct Stats {
    pub total_commands: AtomicU64,
    pub total_connections: AtomicU64,
    pub current_connections: AtomicU64,
    pub started_at: u64,
}

impl Default for Stats {
    fn default() -> Self {
        Self {
            total_commands: AtomicU64::new(0),
            total_connections: AtomicU64::new(0),
            current_connections: AtomicU64::new(0),
            started_at: crate::corestore::now_millis(),
        }
    }
}

impl Stats {
    pub fn uptime_seconds(&self) -> u64 {
        crate::corestore::now_millis().saturating_sub(self.started_at) / 1000
    }
}

/// The shared engine handle. Cloning is cheap; every connection task, the
/// background services and the replica link all hold one
#[derive(Clone)]
pub struct Engine {
    pub store: Corestore,
    pub persist: Arc<Persistence>,
    pub repl: Arc<Replication>,
    pub cfg: Arc<ConfigurationSet>,
    pub stats: Arc<Stats>,
}

impl Engine {
    /// Bring up the engine: open persistence, restore the snapshot, replay
    /// the AOF through the same handlers that serve clients
    pub fn init(cfg: ConfigurationSet) -> CinResult<Self> {
        let store = Corestore::new();
        let persist = Persistence::init(&cfg.dir, cfg.appendonly)?;
        let repl = match cfg.replica_of() {
            Some((host, port)) => Replication::new_replica(host, port),
            None => Replication::new_master(),
        };
        let engine = Self {
            store,
            persist: Arc::new(persist),
            repl: Arc::new(repl),
            cfg: Arc::new(cfg),
            stats: Arc::new(Stats::default()),
        };
        let replayable = {
            let mut table = engine.store.write();
            engine.persist.load_into(&mut table)?
        };
        for cmd in replayable {
            engine.apply_replayed(&cmd);
        }
        Ok(engine)
    }
    /// Execute one client command against this connection's transaction
    /// state, producing the reply frame
    pub fn execute(&self, txn: &mut TxnState, cmd: Command) -> Frame {
        self.stats.total_commands.fetch_add(1, Ordering::Relaxed);
        let name = cmd.name_uppercase();
        if txn.is_queuing() && !TxnState::is_control_verb(&name) {
            txn.push(cmd);
            return Frame::Simple("QUEUED".to_owned());
        }
        match name.as_str() {
            "MULTI" => match txn.begin() {
                Ok(()) => Frame::ok(),
                Err(()) => Frame::Error(groups::MULTI_NESTED.to_owned()),
            },
            "EXEC" => self.exec(txn),
            "DISCARD" => {
                if txn.is_queuing() {
                    txn.discard();
                    Frame::ok()
                } else {
                    Frame::Error(groups::DISCARD_WITHOUT_MULTI.to_owned())
                }
            }
            "WATCH" => {
                if txn.is_queuing() {
                    return Frame::Error(groups::WATCH_IN_MULTI.to_owned());
                }
                if cmd.arg_count() == 0 {
                    return Frame::Error(groups::wrong_arity("watch"));
                }
                let mut table = self.store.write();
                for key in cmd.args() {
                    txn.watch(&mut table, key);
                }
                Frame::ok()
            }
            "UNWATCH" => {
                if txn.is_queuing() {
                    return Frame::Error(groups::UNWATCH_IN_MULTI.to_owned());
                }
                txn.unwatch();
                Frame::ok()
            }
            "SAVE" => self.save(),
            "BGSAVE" => {
                self.bgsave_async();
                Frame::Simple("Background saving started".to_owned())
            }
            "FLUSHDB" => {
                let mut table = self.store.write();
                self.flush_locked(&mut table)
            }
            "INFO" => self.info(cmd.args().first().map(|raw| &raw[..])),
            "CONFIG" => self.config(cmd.args()),
            "ROLE" => self.role(),
            _ => {
                let mut table = self.store.write();
                self.run_registry_locked(&mut table, &cmd, &name)
            }
        }
    }
    /// Registry dispatch under an already-held write guard. Shared by the
    /// plain path and EXEC
    fn run_registry_locked(&self, table: &mut Coretable, cmd: &Command, name: &str) -> Frame {
        let spec = match registry::lookup(name) {
            Some(spec) => spec,
            None => {
                return Frame::Error(groups::unknown_command(&String::from_utf8_lossy(
                    cmd.name(),
                )))
            }
        };
        if !spec.arity.accepts(cmd.arg_count()) {
            return Frame::Error(groups::wrong_arity(&name.to_lowercase()));
        }
        match (spec.run)(table, cmd.args()) {
            Ok(frame) => {
                if !spec.readonly {
                    self.propagate_locked(cmd, &frame);
                }
                frame
            }
            Err(e) => e.into_frame(),
        }
    }
    /// Ship a committed write to the AOF and the replication stream. Must be
    /// called while the write lock is held so both observe commit order
    fn propagate_locked(&self, cmd: &Command, reply: &Frame) {
        let encoded = rewrite_for_log(cmd, reply);
        self.persist.append_command(&encoded);
        self.repl.propagate(encoded);
    }
    /// `EXEC`: validate watches and run the whole queue under one guard
    fn exec(&self, txn: &mut TxnState) -> Frame {
        if !txn.is_queuing() {
            return Frame::Error(groups::EXEC_WITHOUT_MULTI.to_owned());
        }
        let mut table = self.store.write();
        let invalidated = txn.invalidated(&mut table);
        let queue = txn.take_queue();
        if invalidated {
            return Frame::NullArray;
        }
        let replies = queue
            .into_iter()
            .map(|cmd| {
                let name = cmd.name_uppercase();
                match name.as_str() {
                    // FLUSHDB is legal inside a transaction
                    "FLUSHDB" => self.flush_locked(&mut table),
                    _ if registry::lookup(&name).is_some() => {
                        self.run_registry_locked(&mut table, &cmd, &name)
                    }
                    _ if TxnState::is_control_verb(&name) => {
                        // unreachable through the normal gate; queued only
                        // if a replica relays something odd
                        Frame::Error(groups::unknown_command(&name))
                    }
                    _ => Frame::Error(format!(
                        "ERR {} is not allowed in transactions",
                        name.to_lowercase()
                    )),
                }
            })
            .collect();
        Frame::Array(replies)
    }
    /// `FLUSHDB` under the write guard: one observable step that purges
    /// memory, truncates the AOF (instead of appending) and tells replicas
    fn flush_locked(&self, table: &mut Coretable) -> Frame {
        table.flush_all();
        self.persist.clear_data();
        self.repl
            .propagate(encoder::encode_command_parts(&[Bytes::from_static(
                b"FLUSHDB",
            )]));
        Frame::ok()
    }
    /// `SAVE`: synchronous snapshot; persistence failures surface as `ERR`
    fn save(&self) -> Frame {
        let table = self.store.read();
        match self.persist.save_rdb(&table) {
            Ok(()) => Frame::ok(),
            Err(e) => Frame::Error(format!("ERR {e}")),
        }
    }
    /// `BGSAVE`: snapshot on a blocking worker; outcome goes to the log
    pub fn bgsave_async(&self) {
        let store = self.store.clone();
        let persist = self.persist.clone();
        tokio::task::spawn_blocking(move || {
            let table = store.read();
            match persist.save_rdb(&table) {
                Ok(()) => log::info!("BGSAVE completed successfully"),
                Err(e) => log::error!("BGSAVE failed with error: '{}'", e),
            }
        });
    }
    /// Apply a command replayed from the AOF at startup: same handlers, no
    /// propagation (the log already holds it)
    fn apply_replayed(&self, cmd: &Command) {
        let name = cmd.name_uppercase();
        let mut table = self.store.write();
        match registry::lookup(&name) {
            Some(spec) if spec.arity.accepts(cmd.arg_count()) => {
                if let Err(e) = (spec.run)(&mut table, cmd.args()) {
                    log::warn!("AOF replay: '{}' failed: {}", name, e.message());
                }
            }
            _ => log::warn!("AOF replay: skipping unknown entry '{}'", name),
        }
    }
    /// Apply a command received over the replication link. Replicas are
    /// log-silent: nothing is appended to their own AOF
    pub fn apply_replicated(&self, cmd: &Command) {
        let name = cmd.name_uppercase();
        let mut table = self.store.write();
        if name == "FLUSHDB" {
            table.flush_all();
            return;
        }
        match registry::lookup(&name) {
            Some(spec) if spec.arity.accepts(cmd.arg_count()) => {
                if let Err(e) = (spec.run)(&mut table, cmd.args()) {
                    log::warn!("replication: '{}' failed locally: {}", name, e.message());
                }
            }
            _ => log::warn!("replication: ignoring unknown command '{}'", name),
        }
    }
    /// Cut a snapshot image of the current dataset for a FULLRESYNC, with
    /// the replica registered under the same guard so no write can fall
    /// between the image and the stream
    pub fn fullresync_image(
        &self,
        addr: String,
        listening_port: Option<u16>,
    ) -> (u64, u64, Vec<u8>, tokio::sync::mpsc::UnboundedReceiver<Bytes>) {
        let table = self.store.write();
        let (id, rx) = self.repl.register_replica(addr, listening_port);
        let offset = self.repl.offset();
        let image = diskstore::serialize_table(&table);
        (id, offset, image, rx)
    }
    /// `ROLE`
    fn role(&self) -> Frame {
        Frame::Array(vec![
            Frame::bulk(self.repl.role_name().as_bytes()),
            Frame::bulk(self.repl.run_id().as_bytes()),
            Frame::Integer(self.repl.offset() as i64),
        ])
    }
    /// `CONFIG GET|SET`
    fn config(&self, args: &[Bytes]) -> Frame {
        if args.is_empty() {
            return Frame::Error(groups::wrong_arity("config"));
        }
        if args[0].eq_ignore_ascii_case(b"GET") {
            if args.len() != 2 {
                return Frame::Error(groups::wrong_arity("config"));
            }
            let key = String::from_utf8_lossy(&args[1]).to_lowercase();
            return match self.cfg.config_get(&key) {
                Some(value) => Frame::Array(vec![
                    Frame::bulk(key.as_bytes()),
                    Frame::bulk(value.as_bytes()),
                ]),
                None => Frame::Array(Vec::new()),
            };
        }
        if args[0].eq_ignore_ascii_case(b"SET") {
            // accepted for compatibility; settings are immutable at runtime
            if args.len() != 3 {
                return Frame::Error(groups::wrong_arity("config"));
            }
            return Frame::ok();
        }
        Frame::Error(format!(
            "ERR unknown CONFIG subcommand '{}'",
            String::from_utf8_lossy(&args[0])
        ))
    }
    /// `INFO [section]`
    fn info(&self, section: Option<&[u8]>) -> Frame {
        let section = section.map(|raw| String::from_utf8_lossy(raw).to_lowercase());
        let sections: &[&str] = match section.as_deref() {
            None => &[
                "server", "clients", "memory", "stats", "commands", "keyspace", "cpu",
            ],
            Some(known @ ("server" | "clients" | "memory" | "stats" | "commands" | "keyspace"
            | "cpu")) => {
                // single-section form
                return Frame::bulk(self.info_section(known).as_bytes());
            }
            Some(_) => return Frame::Bulk(Bytes::new()),
        };
        let mut out = String::new();
        for name in sections {
            out.push_str(&self.info_section(name));
            out.push_str("\r\n");
        }
        Frame::bulk(out.as_bytes())
    }
    fn info_section(&self, name: &str) -> String {
        match name {
            "server" => {
                let mut section = format!(
                    "# Server\r\ncinnabar_version:{}\r\nrun_id:{}\r\nrole:{}\r\ntcp_port:{}\r\nuptime_in_seconds:{}\r\nserver_time_utc:{}\r\n",
                    libcinnabar::VERSION,
                    self.repl.run_id(),
                    self.repl.role_name(),
                    self.cfg.port,
                    self.stats.uptime_seconds(),
                    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                );
                if self.repl.is_replica() {
                    let status = if self.repl.link_up() { "up" } else { "down" };
                    section.push_str(&format!("master_link_status:{status}\r\n"));
                }
                section
            }
            "clients" => format!(
                "# Clients\r\nconnected_clients:{}\r\n",
                self.stats.current_connections.load(Ordering::Relaxed),
            ),
            "memory" => {
                let table = self.store.read();
                format!(
                    "# Memory\r\nused_memory_dataset:{}\r\n",
                    table.mem_usage_total(),
                )
            }
            "stats" => format!(
                "# Stats\r\ntotal_connections_received:{}\r\ntotal_commands_processed:{}\r\n",
                self.stats.total_connections.load(Ordering::Relaxed),
                self.stats.total_commands.load(Ordering::Relaxed),
            ),
            "commands" => format!(
                "# Commands\r\nregistered_commands:{}\r\n",
                registry::COMMAND_COUNT,
            ),
            "keyspace" => {
                let mut table = self.store.write();
                let keys = table.live_len();
                let expires = table.volatile_len();
                format!("# Keyspace\r\ndb0:keys={keys},expires={expires}\r\n")
            }
            // CPU accounting is an external collector's job; the section
            // exists with zeroed fields for compatibility
            "cpu" => "# CPU\r\nused_cpu_sys:0.000000\r\nused_cpu_user:0.000000\r\n".to_owned(),
            _ => String::new(),
        }
    }
}

/// The byte form a committed write takes in the AOF and on the wire to
/// replicas. Identical to the client's command, with one exception: an XADD
/// that used an auto (`*` or `ms-*`) id is rewritten to the concrete id it
/// produced, so replays and replicas converge on the same ids
fn rewrite_for_log(cmd: &Command, reply: &Frame) -> Bytes {
    if cmd.name().eq_ignore_ascii_case(b"XADD") {
        if let (Some(spec), Frame::Bulk(id)) = (cmd.args().get(1), reply) {
            if spec.iter().any(|b| *b == b'*') {
                let mut parts: Vec<Bytes> = cmd.parts().to_vec();
                parts[2] = id.clone();
                return encoder::encode_command_parts(&parts);
            }
        }
    }
    cmd.encoded()
}
